//! Box and Pi configuration records shared by the dispatcher and the
//! agent: plain `serde_json` documents loaded from disk, never a bespoke
//! config language. Task configuration (parameter ranges, reward radius)
//! is dispatcher-only and lives in `octopilot_dispatcher::config`.

use serde::{Deserialize, Serialize};
use std::path::Path;

/// One agent's entry in the box configuration: its hostname, SSH target,
/// the two ports it owns, and their angular positions (read only by the
/// out-of-core visualization collaborator).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    pub name: String,
    pub ip: String,
    pub left_port_name: String,
    pub right_port_name: String,
    pub left_port_position: f64,
    pub right_port_position: f64,
}

/// The box-wide configuration: where the dispatcher's ROUTER socket lives
/// and the set of agents expected to connect to it. `desktop_ip` is the
/// dispatcher's own address, handed to each agent (via its local copy of
/// this same file) so its DEALER socket knows where to connect back.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BoxConfig {
    pub desktop_ip: String,
    pub zmq_port: u16,
    pub agents: Vec<AgentConfig>,
}

impl BoxConfig {
    pub fn agent(&self, name: &str) -> Option<&AgentConfig> {
        self.agents.iter().find(|a| a.name == name)
    }
}

/// Per-Pi hardware configuration: GPIO pin assignments and the
/// backend-audio block size/sample rate. Loaded locally on each agent's
/// own filesystem, never sent over the wire.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PiConfig {
    pub left_poke_pin: u8,
    pub right_poke_pin: u8,
    pub left_solenoid_pin: u8,
    pub right_solenoid_pin: u8,
    pub left_led_pins: (u8, u8, u8),
    pub right_led_pins: (u8, u8, u8),
    pub sample_rate: u32,
    pub block_size: usize,
    /// Path to a CSV of `freq,atten_db` rows describing the frequency
    /// response correction to apply to every synthesized burst. Absent
    /// means no equalization.
    pub eq_curve_path: Option<std::path::PathBuf>,
}

pub fn load_json<T: serde::de::DeserializeOwned>(path: &Path) -> anyhow::Result<T> {
    use anyhow::Context;
    let file = std::fs::File::open(path)
        .with_context(|| format!("opening config file {}", path.display()))?;
    let value = serde_json::from_reader(file)
        .with_context(|| format!("parsing config file {}", path.display()))?;
    Ok(value)
}
