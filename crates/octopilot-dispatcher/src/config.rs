//! Task configuration: parameter ranges consumed by the trial chooser.
//! Box and Pi configuration (shared with the agent binary) live in
//! `octopilot_proto::config` and are re-exported here so existing call
//! sites in this crate are unaffected.

use serde::{Deserialize, Serialize};

pub use octopilot_proto::config::{load_json, AgentConfig, BoxConfig, PiConfig};

/// A task parameter that is either pinned to one value, or ranged across
/// `n_choices` linearly-spaced values between `min` and `max` inclusive.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamSpec {
    Fixed(f64),
    Ranged { min: f64, max: f64, n_choices: u32 },
}

impl ParamSpec {
    /// The set of values this parameter may take, in ascending order.
    pub fn choices(&self) -> Vec<f64> {
        match *self {
            ParamSpec::Fixed(v) => vec![v],
            ParamSpec::Ranged { min, max, n_choices } => {
                if n_choices <= 1 {
                    return vec![min];
                }
                (0..n_choices)
                    .map(|i| min + (max - min) * (i as f64) / (n_choices as f64 - 1.0))
                    .collect()
            }
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskConfig {
    pub play_targets: bool,
    pub play_distracters: bool,
    pub reward_radius: u32,
    pub target_radius: ParamSpec,
    pub target_rate: ParamSpec,
    pub target_temporal_log_std: ParamSpec,
    pub target_center_freq: ParamSpec,
    pub target_log_amplitude: ParamSpec,
    pub distracter_rate: ParamSpec,
    pub distracter_temporal_log_std: ParamSpec,
    pub distracter_center_freq: ParamSpec,
    pub distracter_log_amplitude: ParamSpec,
    pub n_distracters: ParamSpec,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixed_param_has_one_choice() {
        assert_eq!(ParamSpec::Fixed(4.0).choices(), vec![4.0]);
    }

    #[test]
    fn ranged_param_is_linearly_spaced() {
        let choices = ParamSpec::Ranged {
            min: 0.0,
            max: 10.0,
            n_choices: 3,
        }
        .choices();
        assert_eq!(choices, vec![0.0, 5.0, 10.0]);
    }

    #[test]
    fn load_json_round_trips_a_task_config() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("task.json");
        let cfg = TaskConfig {
            play_targets: true,
            play_distracters: true,
            reward_radius: 1,
            target_radius: ParamSpec::Fixed(1.0),
            target_rate: ParamSpec::Ranged { min: 0.5, max: 2.0, n_choices: 4 },
            target_temporal_log_std: ParamSpec::Fixed(-1.0),
            target_center_freq: ParamSpec::Fixed(8000.0),
            target_log_amplitude: ParamSpec::Fixed(0.0),
            distracter_rate: ParamSpec::Fixed(0.5),
            distracter_temporal_log_std: ParamSpec::Fixed(-1.0),
            distracter_center_freq: ParamSpec::Fixed(4000.0),
            distracter_log_amplitude: ParamSpec::Fixed(-1.0),
            n_distracters: ParamSpec::Fixed(1.0),
        };
        std::fs::write(&path, serde_json::to_string(&cfg).unwrap()).unwrap();
        let loaded: TaskConfig = load_json(&path).unwrap();
        assert!(loaded.play_targets);
        assert_eq!(loaded.reward_radius, 1);
    }
}
