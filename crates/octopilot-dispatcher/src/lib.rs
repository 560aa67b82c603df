pub mod chooser;
pub mod config;
pub mod control;
pub mod marshaller;
pub mod watchtower;

pub use chooser::TrialChooser;
pub use config::{AgentConfig, BoxConfig, ParamSpec, PiConfig, TaskConfig};
pub use control::{DispatcherState, Outbound, SessionState};
pub use watchtower::{snapshot, StatusSnapshot, VideoRecorder};
