//! Trial parameter chooser: picks the next goal port and derives the
//! per-port and trial-wide parameter tables.

use crate::config::{ParamSpec, TaskConfig};
use octopilot_proto::{PortName, PortParams, TrialParams};
use rand::seq::SliceRandom;
use rand::Rng;
use std::collections::BTreeMap;

pub struct TrialChooser {
    ports: Vec<PortName>,
    reward_radius: u32,
    play_targets: bool,
    play_distracters: bool,
    target_radius: ParamSpec,
    target_rate: ParamSpec,
    target_temporal_log_std: ParamSpec,
    target_center_freq: ParamSpec,
    target_log_amplitude: ParamSpec,
    distracter_rate: ParamSpec,
    distracter_temporal_log_std: ParamSpec,
    distracter_center_freq: ParamSpec,
    distracter_log_amplitude: ParamSpec,
    n_distracters: ParamSpec,
}

impl TrialChooser {
    pub fn new(ports: Vec<PortName>, task: &TaskConfig) -> Self {
        TrialChooser {
            ports,
            reward_radius: task.reward_radius,
            play_targets: task.play_targets,
            play_distracters: task.play_distracters,
            target_radius: task.target_radius,
            target_rate: task.target_rate,
            target_temporal_log_std: task.target_temporal_log_std,
            target_center_freq: task.target_center_freq,
            target_log_amplitude: task.target_log_amplitude,
            distracter_rate: task.distracter_rate,
            distracter_temporal_log_std: task.distracter_temporal_log_std,
            distracter_center_freq: task.distracter_center_freq,
            distracter_log_amplitude: task.distracter_log_amplitude,
            n_distracters: task.n_distracters,
        }
    }

    fn ring_distance(&self, i: usize, g: usize) -> u32 {
        let n = self.ports.len();
        let diff = if i > g { i - g } else { g - i };
        diff.min(n - diff) as u32
    }

    fn pick<R: Rng>(&self, rng: &mut R, spec: &ParamSpec) -> f64 {
        let choices = spec.choices();
        choices[rng.gen_range(0..choices.len())]
    }

    /// Choose the next goal port and derive the per-port table and
    /// trial-wide scalars.
    pub fn choose(
        &self,
        previously_rewarded_port: Option<&PortName>,
    ) -> (PortName, TrialParams, BTreeMap<PortName, PortParams>) {
        let mut rng = rand::thread_rng();

        let candidates: Vec<usize> = (0..self.ports.len())
            .filter(|&i| Some(&self.ports[i]) != previously_rewarded_port)
            .collect();
        let goal_idx = candidates[rng.gen_range(0..candidates.len())];
        let goal_port = self.ports[goal_idx].clone();

        let target_radius = self.pick(&mut rng, &self.target_radius);
        let target_rate_goal = self.pick(&mut rng, &self.target_rate);
        let target_temporal_log_std = self.pick(&mut rng, &self.target_temporal_log_std);
        let target_center_freq = self.pick(&mut rng, &self.target_center_freq);
        let target_log_amplitude = self.pick(&mut rng, &self.target_log_amplitude);
        let distracter_rate_scalar = self.pick(&mut rng, &self.distracter_rate);
        let distracter_temporal_log_std = self.pick(&mut rng, &self.distracter_temporal_log_std);
        let distracter_center_freq = self.pick(&mut rng, &self.distracter_center_freq);
        let distracter_log_amplitude = self.pick(&mut rng, &self.distracter_log_amplitude);
        let n_distracters_raw = self.pick(&mut rng, &self.n_distracters);
        let n_distracters = n_distracters_raw.round() as u32;
        debug_assert!(
            (n_distracters_raw - n_distracters as f64).abs() < 1e-6,
            "n_distracters must be representable as an integer without loss"
        );

        let mut table: BTreeMap<PortName, PortParams> = BTreeMap::new();
        for (i, port) in self.ports.iter().enumerate() {
            let dist = self.ring_distance(i, goal_idx);
            let is_goal = i == goal_idx;
            let is_rewarded =
                dist <= self.reward_radius && Some(port) != previously_rewarded_port;
            table.insert(
                port.clone(),
                PortParams {
                    is_goal,
                    is_rewarded,
                    target_rate: 0.0,
                    distracter_rate: 0.0,
                    abs_distance_to_goal: dist,
                },
            );
        }
        assert!(
            table.values().any(|p| p.is_rewarded),
            "trial chooser must always reward at least one port"
        );

        if self.play_targets {
            for (i, port) in self.ports.iter().enumerate() {
                let dist = self.ring_distance(i, goal_idx) as f64;
                let rate = target_rate_goal
                    * (1.0 + target_radius - dist).max(0.0)
                    / (1.0 + target_radius);
                table.get_mut(port).unwrap().target_rate = rate.max(0.0);
            }
        }

        if self.play_distracters && n_distracters > 0 {
            let non_goal: Vec<&PortName> = self
                .ports
                .iter()
                .enumerate()
                .filter(|(i, _)| *i != goal_idx)
                .map(|(_, p)| p)
                .collect();
            let chosen: Vec<&&PortName> = non_goal
                .choose_multiple(&mut rng, n_distracters as usize)
                .collect();
            for port in chosen {
                table.get_mut(*port).unwrap().distracter_rate = distracter_rate_scalar;
            }
        }

        let trial_params = TrialParams {
            target_temporal_log_std,
            target_center_freq,
            target_log_amplitude,
            distracter_temporal_log_std,
            distracter_center_freq,
            distracter_log_amplitude,
            n_distracters,
            trial_number: 0,
        };

        (goal_port, trial_params, table)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ports(n: usize) -> Vec<PortName> {
        (0..n).map(|i| PortName::from(format!("p{i}"))).collect()
    }

    fn task(reward_radius: u32) -> TaskConfig {
        TaskConfig {
            play_targets: true,
            play_distracters: false,
            reward_radius,
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

    #[test]
    fn goal_never_equals_previously_rewarded_port() {
        let chooser = TrialChooser::new(ports(4), &task(0));
        let mut prev: Option<PortName> = None;
        for _ in 0..200 {
            let (goal, _, _) = chooser.choose(prev.as_ref());
            if let Some(p) = &prev {
                assert_ne!(&goal, p);
            }
            prev = Some(goal);
        }
    }

    #[test]
    fn reward_radius_zero_rewards_only_the_goal() {
        let chooser = TrialChooser::new(ports(4), &task(0));
        let (goal, _, table) = chooser.choose(None);
        let rewarded: Vec<&PortName> = table
            .iter()
            .filter(|(_, p)| p.is_rewarded)
            .map(|(name, _)| name)
            .collect();
        assert_eq!(rewarded, vec![&goal]);
    }

    #[test]
    fn large_reward_radius_rewards_every_non_previous_port() {
        let ports_vec = ports(4);
        let chooser = TrialChooser::new(ports_vec.clone(), &task(10));
        let prev = ports_vec[0].clone();
        let (_, _, table) = chooser.choose(Some(&prev));
        for (name, params) in &table {
            if *name == prev {
                assert!(!params.is_rewarded);
            } else {
                assert!(params.is_rewarded);
            }
        }
    }

    #[test]
    fn zero_target_rate_produces_zero_rate_everywhere_beyond_radius() {
        let mut t = task(0);
        t.target_rate = ParamSpec::Fixed(0.0);
        let chooser = TrialChooser::new(ports(4), &t);
        let (_, _, table) = chooser.choose(None);
        for params in table.values() {
            assert_eq!(params.target_rate, 0.0);
        }
    }

    #[test]
    fn distracters_are_assigned_to_exactly_n_non_goal_ports() {
        let mut t = task(0);
        t.play_distracters = true;
        t.n_distracters = ParamSpec::Fixed(2.0);
        let chooser = TrialChooser::new(ports(6), &t);
        let (goal, _, table) = chooser.choose(None);
        let distracted = table
            .iter()
            .filter(|(_, p)| p.distracter_rate > 0.0)
            .count();
        assert_eq!(distracted, 2);
        assert_eq!(table[&goal].distracter_rate, 0.0);
    }
}
