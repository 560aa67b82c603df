//! Shared data model: ports, trials, per-port/per-trial parameters, and the
//! append-only event record.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A port's string name, e.g. `agent1_L`. Owned by exactly one agent.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PortName(pub String);

impl fmt::Display for PortName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for PortName {
    fn from(s: &str) -> Self {
        PortName(s.to_owned())
    }
}

impl From<String> for PortName {
    fn from(s: String) -> Self {
        PortName(s)
    }
}

/// A port as known to the dispatcher's box configuration. The angular
/// position is carried through only for the out-of-core visualization
/// collaborator; the core never reads it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Port {
    pub name: PortName,
    pub agent: String,
    pub position_deg: f64,
}

/// Per-port parameters derived for a single trial.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PortParams {
    pub is_goal: bool,
    pub is_rewarded: bool,
    pub target_rate: f64,
    pub distracter_rate: f64,
    pub abs_distance_to_goal: u32,
}

impl Default for PortParams {
    fn default() -> Self {
        PortParams {
            is_goal: false,
            is_rewarded: false,
            target_rate: 0.0,
            distracter_rate: 0.0,
            abs_distance_to_goal: 0,
        }
    }
}

/// Trial-wide scalar parameters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TrialParams {
    pub target_temporal_log_std: f64,
    pub target_center_freq: f64,
    pub target_log_amplitude: f64,
    pub distracter_temporal_log_std: f64,
    pub distracter_center_freq: f64,
    pub distracter_log_amplitude: f64,
    pub n_distracters: u32,
    pub trial_number: i64,
}

/// The kind of append-only event recorded by the core.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventKind {
    Poke,
    Reward,
    Sound,
    Alive,
    Hello,
    Goodbye,
}

/// Payload carried by an [`Event`], specific to its [`EventKind`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum EventPayload {
    None,
    Poke {
        trial_number: i64,
    },
    Reward {
        trial_number: i64,
    },
    Sound {
        trial_number: i64,
        data_left: f64,
        data_right: f64,
        last_frame_time: i64,
        frames_since_cycle_start: i64,
        data_hash: i64,
    },
}

/// An append-only event, as recorded by the dispatcher. `timestamp` is the
/// wall-clock time the originating edge/audio event occurred at its agent,
/// carried over the wire as an ISO 8601 string — the agent itself derives
/// it from its own monotonic clock and only converts to wall-clock time
/// when building the wire message, never at enqueue or receipt time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub kind: EventKind,
    pub agent: String,
    pub port: Option<PortName>,
    pub trial: Option<i64>,
    pub timestamp: DateTime<Utc>,
    pub payload: EventPayload,
}

/// One trial: the goal port, derived per-port table, trial-wide scalars,
/// and wall time it started. Sealed when the next reward arrives or the
/// session stops.
#[derive(Debug, Clone)]
pub struct Trial {
    pub index: i64,
    pub goal_port: PortName,
    pub port_params: std::collections::BTreeMap<PortName, PortParams>,
    pub trial_params: TrialParams,
    pub started_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn port_name_display_matches_inner_string() {
        let p = PortName::from("agent1_L");
        assert_eq!(p.to_string(), "agent1_L");
    }

    #[test]
    fn port_params_default_has_no_port_goal_or_reward() {
        let p = PortParams::default();
        assert!(!p.is_goal);
        assert!(!p.is_rewarded);
        assert_eq!(p.target_rate, 0.0);
    }
}
