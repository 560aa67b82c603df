pub mod autopoke;
pub mod backend;
pub mod error;
pub mod nosepoke;

#[cfg(target_os = "linux")]
pub use backend::rppal_backend::RppalBackend;
pub use autopoke::Autopoke;
pub use backend::{Edge, GpioBackend, StubBackend};
pub use error::GpioError;
pub use nosepoke::{Nosepoke, NosepokePins};
