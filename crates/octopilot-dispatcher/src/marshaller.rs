//! Spawns and supervises one remote agent process per expected agent,
//! via `ssh`, and lays out the per-session sandbox directory.

use crate::config::{AgentConfig, BoxConfig, PiConfig, TaskConfig};
use anyhow::Context;
use std::fs::File;
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::time::Duration;

/// A running (or exited) remote agent process plus its log files.
pub struct AgentProcess {
    pub agent_name: String,
    child: Child,
    stdout_log: PathBuf,
    stderr_log: PathBuf,
}

impl AgentProcess {
    /// `true` if the process has already exited.
    pub fn poll(&mut self) -> anyhow::Result<Option<std::process::ExitStatus>> {
        Ok(self.child.try_wait()?)
    }

    pub fn kill(&mut self) -> anyhow::Result<()> {
        self.child.kill().context("killing agent process")
    }
}

/// Spawns an agent over
/// `ssh <host> <agent_binary> --pi-config <path> --box-config <path>`,
/// capturing stdout/stderr on dedicated reader threads that both log via
/// `tracing` and append to `<session_dir>/<agent>.{stdout,stderr}.log`.
pub fn spawn_agent(
    agent: &AgentConfig,
    agent_binary: &str,
    remote_pi_config_path: &str,
    remote_box_config_path: &str,
    session_dir: &Path,
) -> anyhow::Result<AgentProcess> {
    let mut child = Command::new("ssh")
        .arg(&agent.ip)
        .arg(agent_binary)
        .arg("--pi-config")
        .arg(remote_pi_config_path)
        .arg("--box-config")
        .arg(remote_box_config_path)
        .arg("--agent-name")
        .arg(&agent.name)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .with_context(|| format!("spawning ssh agent process for {}", agent.name))?;

    let stdout_log = session_dir.join(format!("{}.stdout.log", agent.name));
    let stderr_log = session_dir.join(format!("{}.stderr.log", agent.name));

    spawn_log_reader(
        agent.name.clone(),
        "stdout",
        child.stdout.take().expect("stdout was piped"),
        stdout_log.clone(),
    );
    spawn_log_reader(
        agent.name.clone(),
        "stderr",
        child.stderr.take().expect("stderr was piped"),
        stderr_log.clone(),
    );

    Ok(AgentProcess {
        agent_name: agent.name.clone(),
        child,
        stdout_log,
        stderr_log,
    })
}

fn spawn_log_reader<R: std::io::Read + Send + 'static>(
    agent_name: String,
    stream_name: &'static str,
    stream: R,
    log_path: PathBuf,
) {
    std::thread::spawn(move || {
        let mut log_file = match File::create(&log_path) {
            Ok(f) => f,
            Err(err) => {
                tracing::error!(%err, agent = %agent_name, path = %log_path.display(), "cannot open agent log file");
                return;
            }
        };
        let reader = BufReader::new(stream);
        for line in reader.lines() {
            let line = match line {
                Ok(l) => l,
                Err(err) => {
                    tracing::warn!(%err, agent = %agent_name, stream_name, "error reading agent stream");
                    break;
                }
            };
            tracing::info!(agent = %agent_name, stream_name, "{}", line);
            if writeln!(log_file, "{}", line).is_err() {
                tracing::warn!(agent = %agent_name, stream_name, "failed writing agent log line to disk");
            }
        }
    });
}

/// Grace period between sending `exit` over the transport and killing
/// any agent process that hasn't exited on its own.
pub const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Blocks until every process has exited or `SHUTDOWN_GRACE` elapses,
/// then force-kills any survivors.
pub fn shutdown_all(processes: &mut [AgentProcess]) {
    let deadline = std::time::Instant::now() + SHUTDOWN_GRACE;
    loop {
        let all_exited = processes.iter_mut().all(|p| matches!(p.poll(), Ok(Some(_))));
        if all_exited || std::time::Instant::now() >= deadline {
            break;
        }
        std::thread::sleep(Duration::from_millis(100));
    }
    for process in processes.iter_mut() {
        if matches!(process.poll(), Ok(None)) {
            tracing::warn!(agent = %process.agent_name, "agent process did not exit gracefully, killing");
            let _ = process.kill();
        }
    }
}

/// Creates `<runs_dir>/<timestamp>/` and writes a one-time snapshot of
/// the box/task/pi configuration used for this run alongside the agent
/// stdio logs that will be written into the same directory.
pub fn prepare_session_dir(
    runs_dir: &Path,
    timestamp: &str,
    box_config: &BoxConfig,
    task_config: &TaskConfig,
    pi_config: &PiConfig,
) -> anyhow::Result<PathBuf> {
    let session_dir = runs_dir.join(timestamp);
    std::fs::create_dir_all(&session_dir)
        .with_context(|| format!("creating session directory {}", session_dir.display()))?;

    write_json_snapshot(&session_dir.join("box_config.json"), box_config)?;
    write_json_snapshot(&session_dir.join("task_config.json"), task_config)?;
    write_json_snapshot(&session_dir.join("pi_config.json"), pi_config)?;

    Ok(session_dir)
}

fn write_json_snapshot<T: serde::Serialize>(path: &Path, value: &T) -> anyhow::Result<()> {
    let file = File::create(path)
        .with_context(|| format!("creating config snapshot {}", path.display()))?;
    serde_json::to_writer_pretty(file, value)
        .with_context(|| format!("writing config snapshot {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ParamSpec;

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

    fn pi_config() -> PiConfig {
        PiConfig {
            left_poke_pin: 17,
            right_poke_pin: 27,
            left_solenoid_pin: 22,
            right_solenoid_pin: 23,
            left_led_pins: (5, 6, 13),
            right_led_pins: (19, 26, 21),
            sample_rate: 44100,
            block_size: 1024,
            eq_curve_path: None,
        }
    }

    #[test]
    fn prepare_session_dir_writes_all_three_snapshots() {
        let tmp = tempfile::tempdir().unwrap();
        let session_dir =
            prepare_session_dir(tmp.path(), "20260727T000000", &box_config(), &task_config(), &pi_config())
                .unwrap();
        assert!(session_dir.join("box_config.json").exists());
        assert!(session_dir.join("task_config.json").exists());
        assert!(session_dir.join("pi_config.json").exists());
    }

    #[test]
    fn snapshot_contents_round_trip_through_json() {
        let tmp = tempfile::tempdir().unwrap();
        let session_dir =
            prepare_session_dir(tmp.path(), "20260727T000000", &box_config(), &task_config(), &pi_config())
                .unwrap();
        let raw = std::fs::read_to_string(session_dir.join("box_config.json")).unwrap();
        let loaded: BoxConfig = serde_json::from_str(&raw).unwrap();
        assert_eq!(loaded.zmq_port, 5555);
        assert_eq!(loaded.agents[0].name, "alpha");
    }
}
