//! Shared data model, wire codec, and ROUTER/DEALER transport for
//! Octopilot's dispatcher↔agent control plane.
//!
//! This crate has no I/O policy of its own beyond the transport sockets
//! themselves — state machines, scheduling, and hardware backends live in
//! the dispatcher/agent/audio/gpio crates that depend on it.

pub mod codec;
pub mod config;
pub mod error;
pub mod messages;
pub mod model;
pub mod transport;

pub use codec::{decode, encode, FieldValue, RawMessage};
pub use config::{load_json, AgentConfig, BoxConfig, PiConfig};
pub use error::{FatalError, OctopilotError, ProtocolError, TransportError};
pub use messages::{AgentMessage, Command, SetTrialParameters, SideAudioParams};
pub use model::{Event, EventKind, EventPayload, Port, PortName, PortParams, Trial, TrialParams};
pub use transport::{AgentTransport, DispatcherTransport};
