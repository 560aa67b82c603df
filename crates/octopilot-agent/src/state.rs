//! `AgentState`: the hardware-free core of the agent control loop.
//!
//! Everything that touches real hardware (GPIO backend selection, the
//! `cpal` sink, the `zmq` transport) lives in `main.rs`. This module owns
//! only the flags and bookkeeping spec.md §4.E names, and reacts to
//! commands/events by returning a list of [`AgentEffect`]s for the caller
//! to carry out — the same split `main.rs`'s callers use to keep
//! `DispatcherState` transport-agnostic, applied here to keep this state
//! hardware-agnostic.

use chrono::{DateTime, Utc};
use crossbeam_channel::Sender;
use octopilot_audio::SideParams;
use octopilot_gpio::{GpioBackend, Nosepoke};
use octopilot_proto::{AgentMessage, Command, PortName, SetTrialParameters};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// How often the heartbeat-monitor timer thread ticks.
pub const T_ALIVE_CHECK: Duration = Duration::from_secs(5);
/// Age of the last `are_you_alive` beyond which a stale heartbeat is logged.
pub const T_ALIVE_SOFT: Duration = Duration::from_secs(5);
/// Age beyond which a stale heartbeat raises `critical_shutdown`.
pub const T_ALIVE_HARD: Duration = Duration::from_secs(15);

/// Events that reach the control loop through the single MPSC funnel
/// shared by GPIO callbacks and the heartbeat-monitor thread. Timestamps
/// are the agent's own monotonic clock, captured at the origin (the GPIO
/// edge, or the heartbeat tick) — never at the moment the event is
/// drained from the channel. They are converted to wall-clock time only
/// when a wire message is built from them, in [`AgentState::handle_event`].
#[derive(Debug, Clone)]
pub enum AgentEvent {
    PokeIn { port: PortName, at: Instant },
    Reward { port: PortName, at: Instant },
    HeartbeatTick(Instant),
}

/// Actions the control loop must carry out against real resources
/// (the audio cycle, the heartbeat-monitor thread, the transport) in
/// response to a command or event processed by [`AgentState`].
#[derive(Debug, Clone)]
pub enum AgentEffect {
    StartHeartbeatMonitor,
    StopHeartbeatMonitor,
    SetAudioParameters {
        left: Option<SideParams>,
        right: Option<SideParams>,
    },
    EmptyAudioQueue,
    Send(AgentMessage),
    Terminate,
}

/// One side's port identity plus its nosepoke handle.
struct Side {
    port_name: PortName,
    nosepoke: Arc<Nosepoke>,
}

/// The agent's core state machine: session flags, trial number, and the
/// two nosepokes it owns. Carries no transport/audio/GPIO-backend
/// references beyond what it needs to arm/disarm rewards and install
/// event handlers.
pub struct AgentState {
    left: Side,
    right: Side,
    backend: Arc<dyn GpioBackend>,
    event_tx: Sender<AgentEvent>,
    session_running: bool,
    trial_number: i64,
    shutdown: bool,
    critical_shutdown: bool,
    last_alive_request_time: Option<Instant>,
    /// A single `(monotonic, wall-clock)` reference pair captured at
    /// startup, used to translate monotonic-clock event timestamps into
    /// the wall-clock timestamps the wire protocol carries. Internal
    /// ordering and liveness decisions never go through this — only
    /// outgoing message construction does.
    clock_reference: (Instant, DateTime<Utc>),
}

impl AgentState {
    pub fn new(
        left_port: PortName,
        left_nosepoke: Arc<Nosepoke>,
        right_port: PortName,
        right_nosepoke: Arc<Nosepoke>,
        backend: Arc<dyn GpioBackend>,
        event_tx: Sender<AgentEvent>,
    ) -> Self {
        AgentState {
            left: Side { port_name: left_port, nosepoke: left_nosepoke },
            right: Side { port_name: right_port, nosepoke: right_nosepoke },
            backend,
            event_tx,
            session_running: false,
            trial_number: -1,
            shutdown: false,
            critical_shutdown: false,
            last_alive_request_time: None,
            clock_reference: (Instant::now(), Utc::now()),
        }
    }

    /// Translate a monotonic-clock event timestamp into the wall-clock
    /// timestamp carried on the wire, anchored to the reference pair
    /// captured at startup. `at` is always at or after `clock_reference.0`
    /// since both come from the same process's monotonic clock and the
    /// reference is captured first.
    fn wall_clock(&self, at: Instant) -> DateTime<Utc> {
        let (ref_instant, ref_utc) = self.clock_reference;
        let elapsed = at.saturating_duration_since(ref_instant);
        ref_utc + chrono::Duration::from_std(elapsed).unwrap_or(chrono::Duration::zero())
    }

    pub fn session_running(&self) -> bool {
        self.session_running
    }

    pub fn trial_number(&self) -> i64 {
        self.trial_number
    }

    pub fn shutdown(&self) -> bool {
        self.shutdown
    }

    pub fn critical_shutdown(&self) -> bool {
        self.critical_shutdown
    }

    fn side_for(&self, port: &PortName) -> Option<&Side> {
        if *port == self.left.port_name {
            Some(&self.left)
        } else if *port == self.right.port_name {
            Some(&self.right)
        } else {
            None
        }
    }

    /// Install the poke-in/reward handlers that funnel events into
    /// `event_tx`. Idempotent: `start` clears handlers before installing,
    /// so a second `start` without an intervening `stop` does not
    /// duplicate reported events.
    fn install_handlers(&self) {
        for side in [&self.left, &self.right] {
            side.nosepoke.clear_handlers();
            let tx = self.event_tx.clone();
            side.nosepoke.add_on_poke_in(Box::new(move |p, at| {
                let _ = tx.send(AgentEvent::PokeIn { port: p.clone(), at });
            }));
            let tx = self.event_tx.clone();
            side.nosepoke.add_on_reward(Box::new(move |p, at| {
                let _ = tx.send(AgentEvent::Reward { port: p.clone(), at });
            }));
        }
    }

    pub fn handle_command(&mut self, cmd: Command, now: Instant) -> Vec<AgentEffect> {
        match cmd {
            Command::Start => {
                self.install_handlers();
                self.session_running = true;
                vec![AgentEffect::StartHeartbeatMonitor]
            }
            Command::SetTrialParameters(params) => self.handle_set_trial_parameters(params),
            Command::Stop => self.stop_effects(),
            Command::Exit => {
                let mut effects = self.stop_effects();
                effects.push(AgentEffect::Terminate);
                effects
            }
            Command::AreYouAlive => {
                self.last_alive_request_time = Some(now);
                vec![AgentEffect::Send(AgentMessage::Alive)]
            }
        }
    }

    fn stop_effects(&mut self) -> Vec<AgentEffect> {
        self.left.nosepoke.clear_handlers();
        self.right.nosepoke.clear_handlers();
        self.session_running = false;
        self.shutdown = true;
        vec![
            AgentEffect::StopHeartbeatMonitor,
            AgentEffect::SetAudioParameters { left: None, right: None },
            AgentEffect::EmptyAudioQueue,
        ]
    }

    fn handle_set_trial_parameters(&mut self, params: SetTrialParameters) -> Vec<AgentEffect> {
        if !self.session_running {
            tracing::error!("set_trial_parameters received while session is not running, ignoring");
            return Vec::new();
        }

        self.left.nosepoke.set_reward_armed(params.left_reward);
        self.right.nosepoke.set_reward_armed(params.right_reward);

        let left = side_params(
            params.left.target_rate,
            params.left.distracter_rate,
            params.target_temporal_log_std,
            params.target_center_freq,
            params.target_log_amplitude,
            params.distracter_temporal_log_std,
            params.distracter_center_freq,
            params.distracter_log_amplitude,
        );
        let right = side_params(
            params.right.target_rate,
            params.right.distracter_rate,
            params.target_temporal_log_std,
            params.target_center_freq,
            params.target_log_amplitude,
            params.distracter_temporal_log_std,
            params.distracter_center_freq,
            params.distracter_log_amplitude,
        );

        self.trial_number = params.trial_number;

        vec![
            AgentEffect::SetAudioParameters { left, right },
            AgentEffect::EmptyAudioQueue,
        ]
    }

    /// Process one event drained from the shared MPSC funnel. Poke/reward
    /// events become wire sends carrying the current trial number and the
    /// event's own timestamp; heartbeat ticks update the liveness flags
    /// in place and never produce an effect of their own.
    pub fn handle_event(&mut self, event: AgentEvent) -> Vec<AgentEffect> {
        match event {
            AgentEvent::PokeIn { port, at } => {
                if self.side_for(&port).is_none() {
                    return Vec::new();
                }
                vec![AgentEffect::Send(AgentMessage::Poke {
                    trial_number: self.trial_number,
                    port_name: port.0,
                    poke_time: self.wall_clock(at).to_rfc3339(),
                })]
            }
            AgentEvent::Reward { port, at } => {
                if self.side_for(&port).is_none() {
                    return Vec::new();
                }
                vec![AgentEffect::Send(AgentMessage::Reward {
                    trial_number: self.trial_number,
                    port_name: port.0,
                    poke_time: self.wall_clock(at).to_rfc3339(),
                })]
            }
            AgentEvent::HeartbeatTick(now) => {
                self.check_heartbeat(now);
                Vec::new()
            }
        }
    }

    fn check_heartbeat(&mut self, now: Instant) {
        let Some(last) = self.last_alive_request_time else {
            return;
        };
        let age = now.saturating_duration_since(last);
        if age >= T_ALIVE_HARD {
            tracing::error!(age_secs = age.as_secs(), "heartbeat hard timeout, raising critical_shutdown");
            self.critical_shutdown = true;
        } else if age >= T_ALIVE_SOFT {
            tracing::error!(age_secs = age.as_secs(), "heartbeat is stale");
        }
    }

    /// Exposed for `main.rs` to drive hardware LEDs/solenoids on startup
    /// without poking at private fields.
    pub fn backend(&self) -> &Arc<dyn GpioBackend> {
        &self.backend
    }
}

/// Resolve one side's effective burst parameters: prefer the target
/// stream if its rate is positive, else the distracter stream, else
/// `None` (silent this cycle). `SetTrialParameters` models at most one
/// active stream per side on the wire — this is the agent's one
/// resolved ambiguity when both `target_rate` and `distracter_rate` are
/// present and positive, which `TrialChooser` never actually produces
/// (a port carries either reward-linked target audio or distracter
/// audio, never both) but which the wire format does not forbid.
fn side_params(
    target_rate: Option<f64>,
    distracter_rate: Option<f64>,
    target_temporal_log_std: Option<f64>,
    target_center_freq: Option<f64>,
    target_log_amplitude: Option<f64>,
    distracter_temporal_log_std: Option<f64>,
    distracter_center_freq: Option<f64>,
    distracter_log_amplitude: Option<f64>,
) -> Option<SideParams> {
    if let Some(rate_hz) = target_rate.filter(|r| *r > 0.0) {
        return Some(SideParams {
            rate_hz,
            temporal_log_std: target_temporal_log_std.unwrap_or(-1.0),
            center_freq: target_center_freq.unwrap_or(8_000.0),
            log_amplitude: target_log_amplitude.unwrap_or(-2.0),
            bandwidth: None,
            duration_s: None,
        });
    }
    if let Some(rate_hz) = distracter_rate.filter(|r| *r > 0.0) {
        return Some(SideParams {
            rate_hz,
            temporal_log_std: distracter_temporal_log_std.unwrap_or(-1.0),
            center_freq: distracter_center_freq.unwrap_or(4_000.0),
            log_amplitude: distracter_log_amplitude.unwrap_or(-2.0),
            bandwidth: None,
            duration_s: None,
        });
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use octopilot_gpio::{NosepokePins, StubBackend};
    use octopilot_proto::SideAudioParams;

    fn pins(base: u8) -> NosepokePins {
        NosepokePins {
            poke_in: base,
            solenoid: base + 1,
            led_red: base + 2,
            led_green: base + 3,
            led_blue: base + 4,
        }
    }

    fn make_state() -> (AgentState, crossbeam_channel::Receiver<AgentEvent>) {
        let backend: Arc<dyn GpioBackend> = Arc::new(StubBackend::new());
        let left = Nosepoke::new(PortName::from("agent1_L"), pins(1), Duration::from_millis(5));
        let right = Nosepoke::new(PortName::from("agent1_R"), pins(10), Duration::from_millis(5));
        let (tx, rx) = crossbeam_channel::unbounded();
        let state = AgentState::new(
            PortName::from("agent1_L"),
            left,
            PortName::from("agent1_R"),
            right,
            backend,
            tx,
        );
        (state, rx)
    }

    fn minimal_trial(trial_number: i64, left_reward: bool, right_reward: bool) -> SetTrialParameters {
        SetTrialParameters {
            trial_number,
            left_reward,
            right_reward,
            left: SideAudioParams::default(),
            right: SideAudioParams::default(),
            target_temporal_log_std: None,
            target_center_freq: None,
            target_log_amplitude: None,
            distracter_temporal_log_std: None,
            distracter_center_freq: None,
            distracter_log_amplitude: None,
        }
    }

    #[test]
    fn set_trial_parameters_before_start_is_rejected() {
        let (mut state, _rx) = make_state();
        let effects = state.handle_command(
            Command::SetTrialParameters(minimal_trial(0, true, false)),
            Instant::now(),
        );
        assert!(effects.is_empty());
        assert_eq!(state.trial_number(), -1);
    }

    #[test]
    fn start_then_set_trial_parameters_arms_rewards_and_stores_trial_number() {
        let (mut state, _rx) = make_state();
        state.handle_command(Command::Start, Instant::now());
        assert!(state.session_running());

        let effects = state.handle_command(
            Command::SetTrialParameters(minimal_trial(3, true, false)),
            Instant::now(),
        );
        assert_eq!(state.trial_number(), 3);
        assert!(state
            .left
            .nosepoke
            .is_reward_armed());
        assert!(!state.right.nosepoke.is_reward_armed());
        assert!(matches!(effects[0], AgentEffect::SetAudioParameters { .. }));
    }

    #[test]
    fn stop_disarms_session_and_clears_handlers() {
        let (mut state, rx) = make_state();
        state.handle_command(Command::Start, Instant::now());
        let effects = state.handle_command(Command::Stop, Instant::now());
        assert!(!state.session_running());
        assert!(state.shutdown());
        assert!(effects
            .iter()
            .any(|e| matches!(e, AgentEffect::StopHeartbeatMonitor)));

        // A poke fired after stop must not be forwarded: handlers were cleared.
        state.left.nosepoke.handle_poke_in(Instant::now(), state.backend());
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn exit_includes_terminate_effect() {
        let (mut state, _rx) = make_state();
        state.handle_command(Command::Start, Instant::now());
        let effects = state.handle_command(Command::Exit, Instant::now());
        assert!(effects.iter().any(|e| matches!(e, AgentEffect::Terminate)));
    }

    #[test]
    fn are_you_alive_replies_and_updates_last_alive() {
        let (mut state, _rx) = make_state();
        let effects = state.handle_command(Command::AreYouAlive, Instant::now());
        assert!(matches!(effects[0], AgentEffect::Send(AgentMessage::Alive)));
        assert!(state.last_alive_request_time.is_some());
    }

    #[test]
    fn poke_after_start_forwards_through_channel_as_event() {
        let (mut state, rx) = make_state();
        state.handle_command(Command::Start, Instant::now());
        state.left.nosepoke.handle_poke_in(Instant::now(), state.backend());
        let event = rx.try_recv().expect("poke event forwarded");
        assert!(matches!(event, AgentEvent::PokeIn { .. }));

        let effects = state.handle_event(event);
        assert_eq!(effects.len(), 1);
        assert!(matches!(&effects[0], AgentEffect::Send(AgentMessage::Poke { port_name, .. }) if port_name.as_str() == "agent1_L"));
    }

    #[test]
    fn heartbeat_tick_before_hard_threshold_does_not_raise_critical_shutdown() {
        let (mut state, _rx) = make_state();
        state.handle_command(Command::AreYouAlive, Instant::now());
        state.handle_event(AgentEvent::HeartbeatTick(Instant::now()));
        assert!(!state.critical_shutdown());
    }

    #[test]
    fn heartbeat_tick_past_hard_threshold_raises_critical_shutdown() {
        let (mut state, _rx) = make_state();
        let last_alive = Instant::now() - Duration::from_secs(20);
        state.last_alive_request_time = Some(last_alive);
        state.handle_event(AgentEvent::HeartbeatTick(Instant::now()));
        assert!(state.critical_shutdown());
    }

    #[test]
    fn re_starting_does_not_duplicate_poke_events() {
        let (mut state, rx) = make_state();
        state.handle_command(Command::Start, Instant::now());
        state.handle_command(Command::Start, Instant::now());
        state.left.nosepoke.handle_poke_in(Instant::now(), state.backend());
        assert_eq!(rx.try_iter().count(), 1);
    }
}
