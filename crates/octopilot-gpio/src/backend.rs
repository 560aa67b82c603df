//! GPIO access behind a trait, so `Nosepoke` and `Autopoke` never touch
//! hardware directly. Two implementations: a real one for the Pi, and a
//! software-driven stub for tests and non-Pi development — same split as
//! an audio engine that supports one hardware backend plus a desktop stub
//! behind a shared trait.

use crate::error::GpioError;
use std::sync::Arc;
use std::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Edge {
    Rising,
    Falling,
}

pub type EdgeHandler = Arc<dyn Fn(Instant) + Send + Sync>;

pub trait GpioBackend: Send + Sync {
    /// Drive an output pin high or low.
    fn write(&self, pin: u8, high: bool) -> Result<(), GpioError>;

    /// Register a callback fired on every occurrence of `edge` on `pin`,
    /// carrying the moment the edge occurred on the agent's own
    /// monotonic clock — never a wall-clock timestamp, so ordering and
    /// liveness math downstream is immune to clock adjustments.
    fn on_edge(&self, pin: u8, edge: Edge, handler: EdgeHandler) -> Result<(), GpioError>;
}

#[cfg(target_os = "linux")]
pub mod rppal_backend {
    use super::*;
    use ::rppal::gpio::{Gpio, Level, Trigger};
    use parking_lot::Mutex;
    use std::collections::HashMap;

    /// Real hardware backend, one [`rppal::gpio::Gpio`] instance shared
    /// across every output pin and interrupt registration.
    pub struct RppalBackend {
        gpio: Gpio,
        outputs: Mutex<HashMap<u8, ::rppal::gpio::OutputPin>>,
        inputs: Mutex<HashMap<u8, ::rppal::gpio::InputPin>>,
    }

    impl RppalBackend {
        pub fn new() -> Result<Self, GpioError> {
            let gpio = Gpio::new().map_err(|e| GpioError::PinInit(0, e.to_string()))?;
            Ok(RppalBackend {
                gpio,
                outputs: Mutex::new(HashMap::new()),
                inputs: Mutex::new(HashMap::new()),
            })
        }
    }

    impl GpioBackend for RppalBackend {
        fn write(&self, pin: u8, high: bool) -> Result<(), GpioError> {
            let mut outputs = self.outputs.lock();
            let out = match outputs.entry(pin) {
                std::collections::hash_map::Entry::Occupied(e) => e.into_mut(),
                std::collections::hash_map::Entry::Vacant(v) => {
                    let pin_handle = self
                        .gpio
                        .get(pin)
                        .map_err(|e| GpioError::PinInit(pin, e.to_string()))?
                        .into_output();
                    v.insert(pin_handle)
                }
            };
            if high {
                out.set_high();
            } else {
                out.set_low();
            }
            Ok(())
        }

        fn on_edge(&self, pin: u8, edge: Edge, handler: EdgeHandler) -> Result<(), GpioError> {
            let mut inputs = self.inputs.lock();
            let input_pin = self
                .gpio
                .get(pin)
                .map_err(|e| GpioError::PinInit(pin, e.to_string()))?
                .into_input();
            let mut input_pin = input_pin;
            let trigger = match edge {
                Edge::Rising => Trigger::RisingEdge,
                Edge::Falling => Trigger::FallingEdge,
            };
            input_pin
                .set_async_interrupt(trigger, move |level: Level| {
                    let _ = level;
                    handler(Instant::now());
                })
                .map_err(|e| GpioError::Interrupt(pin, e.to_string()))?;
            inputs.insert(pin, input_pin);
            Ok(())
        }
    }
}

/// Software-triggered backend for tests and non-Pi development.
/// [`StubBackend::trigger_edge`] simulates hardware firing an interrupt;
/// [`StubBackend::output_state`] lets a test observe what the service
/// wrote to an output pin.
pub struct StubBackend {
    outputs: parking_lot::Mutex<std::collections::HashMap<u8, bool>>,
    handlers: parking_lot::Mutex<std::collections::HashMap<(u8, Edge), Vec<EdgeHandler>>>,
}

impl StubBackend {
    pub fn new() -> Self {
        StubBackend {
            outputs: parking_lot::Mutex::new(std::collections::HashMap::new()),
            handlers: parking_lot::Mutex::new(std::collections::HashMap::new()),
        }
    }

    pub fn output_state(&self, pin: u8) -> bool {
        *self.outputs.lock().get(&pin).unwrap_or(&false)
    }

    /// Simulate an edge occurring on `pin` at `timestamp`, invoking every
    /// handler registered for that `(pin, edge)` pair.
    pub fn trigger_edge(&self, pin: u8, edge: Edge, timestamp: Instant) {
        let handlers = self.handlers.lock();
        if let Some(hs) = handlers.get(&(pin, edge)) {
            for h in hs {
                h(timestamp);
            }
        }
    }
}

impl Default for StubBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl GpioBackend for StubBackend {
    fn write(&self, pin: u8, high: bool) -> Result<(), GpioError> {
        self.outputs.lock().insert(pin, high);
        Ok(())
    }

    fn on_edge(&self, pin: u8, edge: Edge, handler: EdgeHandler) -> Result<(), GpioError> {
        self.handlers.lock().entry((pin, edge)).or_default().push(handler);
        Ok(())
    }
}
