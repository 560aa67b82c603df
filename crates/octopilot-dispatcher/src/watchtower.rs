//! Read-only status snapshots of the running session, plus an optional
//! HTTP client for starting/stopping external video recording.

use crate::control::{DispatcherState, SessionState};
use octopilot_proto::PortName;
use std::collections::BTreeMap;
use std::time::{Duration, Instant};

/// A point-in-time view of the dispatcher's state, safe to poll from a
/// CLI or GUI without taking any lock the control loop itself needs.
#[derive(Debug, Clone, PartialEq)]
pub struct StatusSnapshot {
    pub state: SessionState,
    pub trial_number: i64,
    pub goal_port: Option<PortName>,
    pub trial_elapsed: Option<Duration>,
    pub connected_agents: Vec<String>,
    pub pokes_by_port: BTreeMap<PortName, usize>,
    pub rewarded_correct: usize,
    pub rewarded_incorrect: usize,
}

pub fn snapshot(state: &DispatcherState, now: Instant) -> StatusSnapshot {
    let trial_elapsed = state
        .trial_started_at()
        .map(|started| now.saturating_duration_since(started));
    StatusSnapshot {
        state: state.state(),
        trial_number: state.trial_number(),
        goal_port: state.goal_port().cloned(),
        trial_elapsed,
        connected_agents: state.connected_agents().iter().cloned().collect(),
        pokes_by_port: state
            .bookkeeping
            .pokes_by_port
            .iter()
            .map(|(port, pokes)| (port.clone(), pokes.len()))
            .collect(),
        rewarded_correct: state
            .bookkeeping
            .rewarded_correct_pokes
            .values()
            .map(|v| v.len())
            .sum(),
        rewarded_incorrect: state
            .bookkeeping
            .rewarded_incorrect_pokes
            .values()
            .map(|v| v.len())
            .sum(),
    }
}

/// Thin client for an external video-recording appliance. Connection
/// failures are logged and degrade to a no-op rather than propagated —
/// recording is a convenience, not something a trial session should ever
/// block or abort on.
pub struct VideoRecorder {
    base_url: String,
    camera_name: String,
    api_token: parking_lot::Mutex<Option<String>>,
    client: reqwest::blocking::Client,
}

impl VideoRecorder {
    pub fn new(base_url: impl Into<String>, camera_name: impl Into<String>) -> Self {
        VideoRecorder {
            base_url: base_url.into(),
            camera_name: camera_name.into(),
            api_token: parking_lot::Mutex::new(None),
            client: reqwest::blocking::Client::builder()
                .timeout(Duration::from_secs(1))
                .danger_accept_invalid_certs(true)
                .build()
                .expect("building the video recorder http client"),
        }
    }

    /// Log in and stash the API token for subsequent calls. Returns
    /// `false` (and logs) if the appliance is unreachable.
    pub fn login(&self, username: &str, password: &str) -> bool {
        let url = format!("{}/api/login", self.base_url);
        match self
            .client
            .post(&url)
            .form(&[("username", username), ("password", password)])
            .send()
            .and_then(|r| r.error_for_status())
            .and_then(|r| r.json::<serde_json::Value>())
        {
            Ok(body) => {
                let token = body.get("apitoken").and_then(|v| v.as_str()).map(String::from);
                let ok = token.is_some();
                *self.api_token.lock() = token;
                ok
            }
            Err(err) => {
                tracing::debug!(%err, url, "cannot connect to video recorder");
                false
            }
        }
    }

    fn action(&self, action: &str) -> bool {
        let Some(token) = self.api_token.lock().clone() else {
            tracing::debug!("video recorder action attempted before a successful login");
            return false;
        };
        let url = format!("{}/api/cameras/action", self.base_url);
        match self
            .client
            .post(&url)
            .form(&[
                ("SerialGroup[]", self.camera_name.as_str()),
                ("Action", action),
                ("apitoken", token.as_str()),
            ])
            .send()
        {
            Ok(resp) if resp.status().is_success() => true,
            Ok(resp) => {
                tracing::debug!(status = %resp.status(), action, "video recorder rejected action");
                false
            }
            Err(err) => {
                tracing::debug!(%err, action, "cannot reach video recorder");
                false
            }
        }
    }

    pub fn start_recording(&self) -> bool {
        self.action("RECORDGROUP")
    }

    pub fn stop_recording(&self) -> bool {
        self.action("STOPRECORDGROUP")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chooser::TrialChooser;
    use crate::config::{AgentConfig, BoxConfig, ParamSpec, TaskConfig};

    fn task() -> TaskConfig {
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

    fn box_config() -> BoxConfig {
        BoxConfig {
            desktop_ip: "10.0.0.100".into(),
            zmq_port: 5555,
            agents: vec![AgentConfig {
                name: "alpha".into(),
                ip: "10.0.0.1".into(),
                left_port_name: "alpha_L".into(),
                right_port_name: "alpha_R".into(),
                left_port_position: 0.0,
                right_port_position: 180.0,
            }],
        }
    }

    #[test]
    fn snapshot_before_start_is_idle_with_no_goal() {
        let box_cfg = box_config();
        let ports = vec![PortName::from("alpha_L"), PortName::from("alpha_R")];
        let chooser = TrialChooser::new(ports, &task());
        let state = DispatcherState::new(&box_cfg, chooser);
        let snap = snapshot(&state, Instant::now());
        assert_eq!(snap.state, SessionState::Idle);
        assert!(snap.goal_port.is_none());
        assert!(snap.connected_agents.is_empty());
    }

    #[test]
    fn snapshot_after_start_reports_running_and_a_goal() {
        let box_cfg = box_config();
        let ports = vec![PortName::from("alpha_L"), PortName::from("alpha_R")];
        let chooser = TrialChooser::new(ports, &task());
        let mut state = DispatcherState::new(&box_cfg, chooser);
        state.handle_hello("alpha");
        state.operator_start();
        let snap = snapshot(&state, Instant::now());
        assert_eq!(snap.state, SessionState::Running);
        assert!(snap.goal_port.is_some());
        assert_eq!(snap.connected_agents, vec!["alpha".to_string()]);
    }
}
