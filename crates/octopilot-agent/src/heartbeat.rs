//! Heartbeat-monitor timer thread: generalizes
//! `octopilot_gpio::Autopoke`'s start/stop/`Drop` thread shape from a
//! Bernoulli poke generator into a fixed-period tick source that feeds
//! the same MPSC funnel the GPIO callbacks use, so all liveness-flag
//! mutation still happens on the single control-loop thread.

use crate::state::AgentEvent;
use crossbeam_channel::Sender;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

pub struct HeartbeatMonitor {
    stop: Arc<AtomicBool>,
}

impl HeartbeatMonitor {
    pub fn start(event_tx: Sender<AgentEvent>, period: Duration) -> Self {
        let stop = Arc::new(AtomicBool::new(false));
        let stop_thread = stop.clone();

        std::thread::spawn(move || {
            while !stop_thread.load(Ordering::SeqCst) {
                std::thread::sleep(period);
                if stop_thread.load(Ordering::SeqCst) {
                    break;
                }
                if event_tx.send(AgentEvent::HeartbeatTick(Instant::now())).is_err() {
                    break;
                }
            }
        });

        HeartbeatMonitor { stop }
    }

    pub fn stop(&self) {
        self.stop.store(true, Ordering::SeqCst);
    }
}

impl Drop for HeartbeatMonitor {
    fn drop(&mut self) {
        self.stop();
    }
}
