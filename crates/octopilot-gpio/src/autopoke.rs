//! Optional diagnostic that fires synthetic poke-in events at an expected
//! rate, for exercising the pipeline without a live animal.

use crate::backend::GpioBackend;
use crate::nosepoke::Nosepoke;
use rand::Rng;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

pub struct Autopoke {
    stop: Arc<AtomicBool>,
}

impl Autopoke {
    /// Start a timer thread with period `tick` that fires a synthetic
    /// poke-in with Bernoulli probability `rate_hz * tick.as_secs_f64()`
    /// on every tick.
    pub fn start(
        nosepoke: Arc<Nosepoke>,
        backend: Arc<dyn GpioBackend>,
        rate_hz: f64,
        tick: Duration,
    ) -> Self {
        let stop = Arc::new(AtomicBool::new(false));
        let stop_thread = stop.clone();
        let fire_probability = rate_hz * tick.as_secs_f64();

        std::thread::spawn(move || {
            let mut rng = rand::thread_rng();
            while !stop_thread.load(Ordering::SeqCst) {
                std::thread::sleep(tick);
                if rng.gen::<f64>() < fire_probability {
                    nosepoke.handle_poke_in(Instant::now(), &backend);
                }
            }
        });

        Autopoke { stop }
    }

    pub fn stop(&self) {
        self.stop.store(true, Ordering::SeqCst);
    }
}

impl Drop for Autopoke {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::StubBackend;
    use crate::nosepoke::NosepokePins;
    use octopilot_proto::PortName;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn zero_rate_never_fires() {
        let backend: Arc<dyn GpioBackend> = Arc::new(StubBackend::new());
        let poke = Nosepoke::new(
            PortName::from("agent1_L"),
            NosepokePins {
                poke_in: 1,
                solenoid: 2,
                led_red: 3,
                led_green: 4,
                led_blue: 5,
            },
            Duration::from_millis(5),
        );
        let count = Arc::new(AtomicUsize::new(0));
        let c = count.clone();
        poke.add_on_poke_in(Box::new(move |_, _| {
            c.fetch_add(1, Ordering::SeqCst);
        }));

        let autopoke = Autopoke::start(poke, backend, 0.0, Duration::from_millis(5));
        std::thread::sleep(Duration::from_millis(30));
        autopoke.stop();

        assert_eq!(count.load(Ordering::SeqCst), 0);
    }
}
