pub mod heartbeat;
pub mod state;

pub use heartbeat::HeartbeatMonitor;
pub use state::{AgentEffect, AgentEvent, AgentState, T_ALIVE_CHECK, T_ALIVE_HARD, T_ALIVE_SOFT};
