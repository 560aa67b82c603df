//! One nosepoke: a poke-input pin, a solenoid reward pin, and three LED
//! pins (red/green/blue), plus the reward-armed flag and its poke-in
//! critical section.

use crate::backend::{Edge, GpioBackend};
use crate::error::GpioError;
use octopilot_proto::PortName;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

pub type PokeHandler = Box<dyn Fn(&PortName, Instant) + Send + Sync>;
pub type RewardHandler = Box<dyn Fn(&PortName, Instant) + Send + Sync>;

pub struct NosepokePins {
    pub poke_in: u8,
    pub solenoid: u8,
    pub led_red: u8,
    pub led_green: u8,
    pub led_blue: u8,
}

/// A photo-interrupter sensor representing one port. `reward_armed` may
/// only be set by the control loop and only cleared by the poke-in
/// callback, via compare-and-swap, so a second poke arriving before the
/// control loop re-arms cannot double-consume a reward.
pub struct Nosepoke {
    port_name: PortName,
    pins: NosepokePins,
    pulse_width: Duration,
    reward_armed: AtomicBool,
    on_poke_in: Mutex<Vec<PokeHandler>>,
    on_reward: Mutex<Vec<RewardHandler>>,
}

impl Nosepoke {
    pub fn new(port_name: PortName, pins: NosepokePins, pulse_width: Duration) -> Arc<Self> {
        Arc::new(Nosepoke {
            port_name,
            pins,
            pulse_width,
            reward_armed: AtomicBool::new(false),
            on_poke_in: Mutex::new(Vec::new()),
            on_reward: Mutex::new(Vec::new()),
        })
    }

    pub fn port_name(&self) -> &PortName {
        &self.port_name
    }

    pub fn set_reward_armed(&self, armed: bool) {
        self.reward_armed.store(armed, Ordering::SeqCst);
    }

    pub fn is_reward_armed(&self) -> bool {
        self.reward_armed.load(Ordering::SeqCst)
    }

    pub fn add_on_poke_in(&self, handler: PokeHandler) {
        self.on_poke_in.lock().push(handler);
    }

    pub fn add_on_reward(&self, handler: RewardHandler) {
        self.on_reward.lock().push(handler);
    }

    pub fn clear_handlers(&self) {
        self.on_poke_in.lock().clear();
        self.on_reward.lock().clear();
    }

    /// Install this nosepoke's interrupt handler on `backend`, binding its
    /// poke-in pin to [`Self::handle_poke_in`] on `edge`.
    pub fn bind(self: &Arc<Self>, backend: &Arc<dyn GpioBackend>, edge: Edge) -> Result<(), GpioError> {
        let this = self.clone();
        let backend_for_solenoid = backend.clone();
        backend.on_edge(
            self.pins.poke_in,
            edge,
            Arc::new(move |timestamp| {
                this.handle_poke_in(timestamp, &backend_for_solenoid);
            }),
        )
    }

    /// The poke-in critical section (component D, step 1-3). `timestamp`
    /// is the edge's own monotonic-clock timestamp, taken at the
    /// callback, never the time handlers finish running.
    pub fn handle_poke_in(&self, timestamp: Instant, backend: &Arc<dyn GpioBackend>) {
        let do_reward = self
            .reward_armed
            .compare_exchange(true, false, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok();

        for handler in self.on_poke_in.lock().iter() {
            handler(&self.port_name, timestamp);
        }

        if do_reward {
            self.actuate_solenoid(backend.clone());
            for handler in self.on_reward.lock().iter() {
                handler(&self.port_name, timestamp);
            }
        }
    }

    /// Pulse the solenoid on a short-lived thread so the reward action
    /// never blocks the control loop or a subsequent poke-in callback.
    fn actuate_solenoid(&self, backend: Arc<dyn GpioBackend>) {
        let pin = self.pins.solenoid;
        let pulse_width = self.pulse_width;
        std::thread::spawn(move || {
            if let Err(e) = backend.write(pin, true) {
                tracing::error!("failed to actuate solenoid on pin {pin}: {e}");
                return;
            }
            std::thread::sleep(pulse_width);
            if let Err(e) = backend.write(pin, false) {
                tracing::error!("failed to release solenoid on pin {pin}: {e}");
            }
        });
    }

    pub fn set_led(&self, backend: &dyn GpioBackend, red: bool, green: bool, blue: bool) -> Result<(), GpioError> {
        backend.write(self.pins.led_red, red)?;
        backend.write(self.pins.led_green, green)?;
        backend.write(self.pins.led_blue, blue)?;
        Ok(())
    }
}
