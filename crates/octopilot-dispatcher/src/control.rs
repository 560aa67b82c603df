//! Connection registry, session state machine, trial advancement, and
//! event bookkeeping — the dispatcher's central state.

use crate::chooser::TrialChooser;
use crate::config::{AgentConfig, BoxConfig};
use chrono::{DateTime, Utc};
use octopilot_proto::{Command, PortName, PortParams, SetTrialParameters, SideAudioParams, TrialParams};
use std::collections::{BTreeMap, BTreeSet};
use std::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Running,
}

/// A command addressed to one agent, or broadcast to several, waiting to
/// be sent over the transport. The control loop is transport-agnostic —
/// it only ever produces these; a caller (the real dispatcher main loop,
/// or a test) drains and sends them.
#[derive(Debug, Clone)]
pub enum Outbound {
    ToAgent(String, Command),
    Broadcast(Vec<String>, Command),
}

#[derive(Debug, Default)]
pub struct EventBookkeeping {
    pub pokes_by_port: BTreeMap<PortName, Vec<DateTime<Utc>>>,
    pub rewarded_correct_pokes: BTreeMap<PortName, Vec<DateTime<Utc>>>,
    pub rewarded_incorrect_pokes: BTreeMap<PortName, Vec<DateTime<Utc>>>,
    pub ports_poked_per_trial: Vec<usize>,
}

impl EventBookkeeping {
    fn reset(&mut self) {
        self.pokes_by_port.clear();
        self.rewarded_correct_pokes.clear();
        self.rewarded_incorrect_pokes.clear();
        self.ports_poked_per_trial.clear();
    }
}

struct AgentPorts {
    left: PortName,
    right: PortName,
}

/// The dispatcher's central state: connection registry, session state
/// machine, current trial, and event bookkeeping.
pub struct DispatcherState {
    expected_agents: BTreeSet<String>,
    connected_agents: BTreeSet<String>,
    agent_ports: BTreeMap<String, AgentPorts>,
    port_to_agent: BTreeMap<PortName, String>,

    chooser: TrialChooser,
    state: SessionState,
    trial_number: i64,
    previously_rewarded_port: Option<PortName>,
    ports_poked_this_trial: BTreeSet<PortName>,
    /// When the current trial began, on the dispatcher's own monotonic
    /// clock — purely local timing, not an event timestamp from the wire.
    trial_started_at: Option<Instant>,
    current_goal_port: Option<PortName>,
    current_trial_params: Option<TrialParams>,
    current_port_params: BTreeMap<PortName, PortParams>,
    /// When each agent's last heartbeat reply was observed, on the
    /// dispatcher's own monotonic clock.
    last_alive: BTreeMap<String, Instant>,

    pub bookkeeping: EventBookkeeping,
    pending: Vec<Outbound>,
}

impl DispatcherState {
    pub fn new(box_config: &BoxConfig, chooser: TrialChooser) -> Self {
        let mut agent_ports = BTreeMap::new();
        let mut port_to_agent = BTreeMap::new();
        for agent in &box_config.agents {
            let left = PortName::from(agent.left_port_name.clone());
            let right = PortName::from(agent.right_port_name.clone());
            port_to_agent.insert(left.clone(), agent.name.clone());
            port_to_agent.insert(right.clone(), agent.name.clone());
            agent_ports.insert(agent.name.clone(), AgentPorts { left, right });
        }
        let expected_agents: BTreeSet<String> =
            box_config.agents.iter().map(|a: &AgentConfig| a.name.clone()).collect();

        DispatcherState {
            expected_agents,
            connected_agents: BTreeSet::new(),
            agent_ports,
            port_to_agent,
            chooser,
            state: SessionState::Idle,
            trial_number: -1,
            previously_rewarded_port: None,
            ports_poked_this_trial: BTreeSet::new(),
            trial_started_at: None,
            current_goal_port: None,
            current_trial_params: None,
            current_port_params: BTreeMap::new(),
            last_alive: BTreeMap::new(),
            bookkeeping: EventBookkeeping::default(),
            pending: Vec::new(),
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn trial_number(&self) -> i64 {
        self.trial_number
    }

    pub fn goal_port(&self) -> Option<&PortName> {
        self.current_goal_port.as_ref()
    }

    pub fn connected_agents(&self) -> &BTreeSet<String> {
        &self.connected_agents
    }

    pub fn trial_started_at(&self) -> Option<Instant> {
        self.trial_started_at
    }

    /// Drain messages queued for the transport layer to send.
    pub fn drain_outbound(&mut self) -> Vec<Outbound> {
        std::mem::take(&mut self.pending)
    }

    fn quorum(&self) -> bool {
        self.expected_agents == self.connected_agents
    }

    fn missing_agents(&self) -> Vec<String> {
        self.expected_agents
            .difference(&self.connected_agents)
            .cloned()
            .collect()
    }

    fn reset_history(&mut self) {
        self.bookkeeping.reset();
        self.trial_number = -1;
        self.previously_rewarded_port = None;
        self.ports_poked_this_trial.clear();
    }

    pub fn handle_hello(&mut self, agent: &str) {
        if !self.connected_agents.insert(agent.to_owned()) {
            tracing::warn!(agent, "duplicate hello, ignoring");
        }
    }

    pub fn handle_goodbye(&mut self, agent: &str) {
        self.connected_agents.remove(agent);
        if self.state == SessionState::Running && !self.quorum() {
            tracing::warn!(agent, "quorum lost, stopping session");
            self.pending.push(Outbound::Broadcast(
                self.connected_agents.iter().cloned().collect(),
                Command::Stop,
            ));
            self.reset_history();
            self.state = SessionState::Idle;
        }
    }

    pub fn handle_alive(&mut self, agent: &str, at: Instant) {
        self.last_alive.insert(agent.to_owned(), at);
    }

    pub fn last_alive(&self, agent: &str) -> Option<Instant> {
        self.last_alive.get(agent).copied()
    }

    /// Operator `start`. No-op (logged) unless every expected agent is
    /// connected.
    pub fn operator_start(&mut self) {
        if self.state == SessionState::Running {
            tracing::warn!("start requested while already running, ignoring");
            return;
        }
        if !self.quorum() {
            tracing::error!(missing = ?self.missing_agents(), "cannot start: agents missing");
            return;
        }
        self.reset_history();
        self.state = SessionState::Running;
        self.pending.push(Outbound::Broadcast(
            self.connected_agents.iter().cloned().collect(),
            Command::Start,
        ));
        self.enter_trial(0, None);
    }

    pub fn operator_stop(&mut self) {
        if self.state == SessionState::Idle {
            return;
        }
        self.pending.push(Outbound::Broadcast(
            self.connected_agents.iter().cloned().collect(),
            Command::Stop,
        ));
        self.reset_history();
        self.state = SessionState::Idle;
    }

    pub fn handle_poke(&mut self, port: &PortName, at: DateTime<Utc>) {
        if self.state != SessionState::Running {
            tracing::error!(?port, "poke received while not running, ignoring");
            return;
        }
        self.bookkeeping
            .pokes_by_port
            .entry(port.clone())
            .or_default()
            .push(at);
        self.ports_poked_this_trial.insert(port.clone());
    }

    pub fn handle_reward(&mut self, port: &PortName, at: DateTime<Utc>) {
        if self.state != SessionState::Running {
            tracing::error!(?port, "reward received while not running, ignoring");
            return;
        }
        if !self.ports_poked_this_trial.contains(port) {
            tracing::error!(
                ?port,
                "reward delivered to a port not poked this trial, ignoring"
            );
            return;
        }
        let excluded: BTreeSet<&PortName> = [Some(port), self.previously_rewarded_port.as_ref()]
            .into_iter()
            .flatten()
            .collect();
        let is_correct = self
            .ports_poked_this_trial
            .iter()
            .all(|p| excluded.contains(p));

        let bucket = if is_correct {
            &mut self.bookkeeping.rewarded_correct_pokes
        } else {
            &mut self.bookkeeping.rewarded_incorrect_pokes
        };
        bucket.entry(port.clone()).or_default().push(at);

        let distinct_count = self
            .ports_poked_this_trial
            .iter()
            .filter(|p| Some(*p) != self.previously_rewarded_port.as_ref())
            .count();
        self.bookkeeping.ports_poked_per_trial.push(distinct_count);

        let next_trial = self.trial_number + 1;
        self.enter_trial(next_trial, Some(port.clone()));
    }

    fn enter_trial(&mut self, trial_number: i64, previously_rewarded_port: Option<PortName>) {
        self.previously_rewarded_port = previously_rewarded_port.clone();
        self.trial_number = trial_number;
        self.ports_poked_this_trial.clear();
        self.trial_started_at = Some(Instant::now());

        let (goal_port, mut trial_params, port_table) =
            self.chooser.choose(previously_rewarded_port.as_ref());
        trial_params.trial_number = trial_number;
        self.current_goal_port = Some(goal_port);
        self.current_trial_params = Some(trial_params);
        self.current_port_params = port_table;

        for (agent, ports) in &self.agent_ports {
            if !self.connected_agents.contains(agent) {
                continue;
            }
            let left = self.current_port_params.get(&ports.left).copied().unwrap_or_default();
            let right = self.current_port_params.get(&ports.right).copied().unwrap_or_default();
            let msg = SetTrialParameters {
                trial_number,
                left_reward: left.is_rewarded,
                right_reward: right.is_rewarded,
                left: side_params(&left),
                right: side_params(&right),
                target_temporal_log_std: Some(trial_params.target_temporal_log_std),
                target_center_freq: Some(trial_params.target_center_freq),
                target_log_amplitude: Some(trial_params.target_log_amplitude),
                distracter_temporal_log_std: Some(trial_params.distracter_temporal_log_std),
                distracter_center_freq: Some(trial_params.distracter_center_freq),
                distracter_log_amplitude: Some(trial_params.distracter_log_amplitude),
            };
            self.pending
                .push(Outbound::ToAgent(agent.clone(), Command::SetTrialParameters(msg)));
        }
    }

    pub fn agent_for_port(&self, port: &PortName) -> Option<&str> {
        self.port_to_agent.get(port).map(|s| s.as_str())
    }
}

fn side_params(params: &PortParams) -> SideAudioParams {
    SideAudioParams {
        target_rate: if params.target_rate > 0.0 {
            Some(params.target_rate)
        } else {
            None
        },
        distracter_rate: if params.distracter_rate > 0.0 {
            Some(params.distracter_rate)
        } else {
            None
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ParamSpec, TaskConfig};

    fn box_config() -> BoxConfig {
        BoxConfig {
            desktop_ip: "10.0.0.100".into(),
            zmq_port: 5555,
            agents: vec![
                AgentConfig {
                    name: "alpha".into(),
                    ip: "10.0.0.1".into(),
                    left_port_name: "alpha_L".into(),
                    right_port_name: "alpha_R".into(),
                    left_port_position: 0.0,
                    right_port_position: 180.0,
                },
                AgentConfig {
                    name: "beta".into(),
                    ip: "10.0.0.2".into(),
                    left_port_name: "beta_L".into(),
                    right_port_name: "beta_R".into(),
                    left_port_position: 90.0,
                    right_port_position: 270.0,
                },
            ],
        }
    }

    fn task_config() -> TaskConfig {
        TaskConfig {
            play_targets: true,
            play_distracters: false,
            reward_radius: 0,
            target_radius: ParamSpec::Fixed(1.0),
            target_rate: ParamSpec::Fixed(4.0),
            target_temporal_log_std: ParamSpec::Fixed(-1.0),
            target_center_freq: ParamSpec::Fixed(8000.0),
            target_log_amplitude: ParamSpec::Fixed(-2.0),
            distracter_rate: ParamSpec::Fixed(2.0),
            distracter_temporal_log_std: ParamSpec::Fixed(-1.0),
            distracter_center_freq: ParamSpec::Fixed(4000.0),
            distracter_log_amplitude: ParamSpec::Fixed(-2.0),
            n_distracters: ParamSpec::Fixed(0.0),
        }
    }

    fn ports(box_cfg: &BoxConfig) -> Vec<PortName> {
        box_cfg
            .agents
            .iter()
            .flat_map(|a| {
                vec![
                    PortName::from(a.left_port_name.clone()),
                    PortName::from(a.right_port_name.clone()),
                ]
            })
            .collect()
    }

    fn new_state() -> DispatcherState {
        let box_cfg = box_config();
        let chooser = TrialChooser::new(ports(&box_cfg), &task_config());
        DispatcherState::new(&box_cfg, chooser)
    }

    #[test]
    fn start_without_quorum_stays_idle() {
        let mut s = new_state();
        s.handle_hello("alpha");
        s.operator_start();
        assert_eq!(s.state(), SessionState::Idle);
    }

    #[test]
    fn start_with_quorum_enters_trial_zero() {
        let mut s = new_state();
        s.handle_hello("alpha");
        s.handle_hello("beta");
        s.operator_start();
        assert_eq!(s.state(), SessionState::Running);
        assert_eq!(s.trial_number(), 0);
        assert!(s.goal_port().is_some());
    }

    #[test]
    fn happy_path_records_one_correct_trial_and_advances() {
        let mut s = new_state();
        s.handle_hello("alpha");
        s.handle_hello("beta");
        s.operator_start();
        let goal = s.goal_port().unwrap().clone();

        s.handle_poke(&goal, Utc::now());
        s.handle_reward(&goal, Utc::now());

        assert_eq!(s.bookkeeping.ports_poked_per_trial, vec![1]);
        assert_eq!(s.bookkeeping.rewarded_correct_pokes[&goal].len(), 1);
        assert!(s.bookkeeping.rewarded_incorrect_pokes.is_empty());
        assert_eq!(s.trial_number(), 1);
        assert_ne!(s.goal_port().unwrap(), &goal);
    }

    #[test]
    fn incorrect_poke_then_correct_reward_records_two_pokes_one_incorrect() {
        let mut s = new_state();
        s.handle_hello("alpha");
        s.handle_hello("beta");
        s.operator_start();
        let goal = s.goal_port().unwrap().clone();
        let other = ports(&box_config()).into_iter().find(|p| p != &goal).unwrap();

        s.handle_poke(&other, Utc::now());
        s.handle_poke(&goal, Utc::now());
        s.handle_reward(&goal, Utc::now());

        assert_eq!(s.bookkeeping.ports_poked_per_trial, vec![2]);
        assert!(s.bookkeeping.rewarded_correct_pokes.contains_key(&goal));
    }

    #[test]
    fn goodbye_during_run_with_quorum_lost_stops_session() {
        let mut s = new_state();
        s.handle_hello("alpha");
        s.handle_hello("beta");
        s.operator_start();
        s.handle_goodbye("alpha");
        assert_eq!(s.state(), SessionState::Idle);
        assert!(!s.connected_agents().contains("alpha"));
    }

    #[test]
    fn reward_for_a_port_not_poked_this_trial_is_ignored() {
        let mut s = new_state();
        s.handle_hello("alpha");
        s.handle_hello("beta");
        s.operator_start();
        let goal = s.goal_port().unwrap().clone();
        let trial_before = s.trial_number();

        s.handle_reward(&goal, Utc::now());

        assert!(s.bookkeeping.rewarded_correct_pokes.is_empty());
        assert!(s.bookkeeping.rewarded_incorrect_pokes.is_empty());
        assert!(s.bookkeeping.ports_poked_per_trial.is_empty());
        assert_eq!(s.trial_number(), trial_before);
    }

    #[test]
    fn operator_stop_resets_history() {
        let mut s = new_state();
        s.handle_hello("alpha");
        s.handle_hello("beta");
        s.operator_start();
        let goal = s.goal_port().unwrap().clone();
        s.handle_poke(&goal, Utc::now());
        s.handle_reward(&goal, Utc::now());
        s.operator_stop();
        assert_eq!(s.state(), SessionState::Idle);
        assert!(s.bookkeeping.ports_poked_per_trial.is_empty());
    }

    #[test]
    fn second_stop_is_a_no_op() {
        let mut s = new_state();
        s.handle_hello("alpha");
        s.handle_hello("beta");
        s.operator_start();
        s.operator_stop();
        let pending_before = s.drain_outbound().len();
        s.operator_stop();
        assert_eq!(s.drain_outbound().len(), 0);
        assert!(pending_before > 0);
    }

    #[test]
    fn goal_never_repeats_across_many_trials() {
        let mut s = new_state();
        s.handle_hello("alpha");
        s.handle_hello("beta");
        s.operator_start();
        let mut prev = s.goal_port().unwrap().clone();
        for _ in 0..200 {
            let current_goal = s.goal_port().unwrap().clone();
            s.handle_poke(&current_goal, Utc::now());
            s.handle_reward(&current_goal, Utc::now());
            let new_goal = s.goal_port().unwrap().clone();
            assert_ne!(new_goal, prev);
            prev = new_goal;
        }
    }
}
