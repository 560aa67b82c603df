//! Error kinds shared by every Octopilot crate.
//!
//! Transport, protocol, state-machine, and backend errors are all
//! recoverable: callers match and log them and keep running. `FatalError`
//! is the one kind that is never recovered from — it only ever surfaces
//! from a binary's `main` and ends the process.

use thiserror::Error;

/// A malformed or unparseable wire token.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("token `{0}` is not of the form key=value=dtype")]
    MalformedToken(String),
    #[error("unknown dtype `{0}`, expected one of int, float, str, bool")]
    UnknownDtype(String),
    #[error("field `{field}` has value `{value}` which does not parse as {dtype}")]
    TypeMismatch {
        field: String,
        value: String,
        dtype: &'static str,
    },
    #[error("message is missing required field `{0}`")]
    MissingField(String),
    #[error("unknown command `{0}`")]
    UnknownCommand(String),
    #[error("message has no command token")]
    EmptyMessage,
}

/// Recoverable errors surfaced by the transport, protocol, state machine,
/// audio/GPIO backends, and heartbeat monitor. Every variant is logged and
/// handled locally by its caller rather than propagated to `main`.
#[derive(Debug, Error)]
pub enum OctopilotError {
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),
    #[error("state violation: {0}")]
    StateViolation(String),
    #[error("backend error: {0}")]
    Backend(String),
    #[error("liveness error: {0}")]
    Liveness(String),
}

/// Peer unreachable, socket closed, bind failed, send/recv failed.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("failed to bind {0}: {1}")]
    Bind(String, String),
    #[error("failed to connect to {0}: {1}")]
    Connect(String, String),
    #[error("send failed: {0}")]
    Send(String),
    #[error("recv failed: {0}")]
    Recv(String),
    #[error("poll failed: {0}")]
    Poll(String),
}

/// Cannot initialize audio/GPIO at startup, cannot bind transport. Aborts
/// the process with a nonzero exit code from `main`.
#[derive(Debug, Error)]
pub enum FatalError {
    #[error("audio backend failed to initialize: {0}")]
    AudioInit(String),
    #[error("GPIO backend failed to initialize: {0}")]
    GpioInit(String),
    #[error("transport failed to bind: {0}")]
    TransportBind(#[from] TransportError),
    #[error("configuration error: {0}")]
    Config(String),
}
