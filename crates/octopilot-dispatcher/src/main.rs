use anyhow::Context;
use chrono::{DateTime, Utc};
use clap::Parser;
use octopilot_dispatcher::config::{load_json, BoxConfig, PiConfig, TaskConfig};
use octopilot_dispatcher::control::{DispatcherState, Outbound};
use octopilot_dispatcher::marshaller;
use octopilot_dispatcher::{watchtower, TrialChooser};
use octopilot_proto::{AgentMessage, Command, PortName};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

const T_ALIVE_SEND: Duration = Duration::from_secs(3);
const T_ALIVE_SOFT: Duration = Duration::from_secs(5);
const POLL_TIMEOUT_MS: i64 = 100;

#[derive(Parser, Debug)]
#[command(name = "octopilot-dispatcher", about = "Octopilot session dispatcher")]
struct Args {
    #[arg(long)]
    box_config: PathBuf,

    #[arg(long)]
    task_config: PathBuf,

    #[arg(long)]
    pi_config: PathBuf,

    #[arg(long, default_value = "./runs")]
    runs_dir: PathBuf,

    #[arg(long, default_value = "octopilot-agent")]
    agent_binary: String,

    #[arg(long)]
    remote_pi_config_path: Option<String>,

    #[arg(long)]
    remote_box_config_path: Option<String>,

    /// Skip spawning remote agent processes over ssh; assume they are
    /// already running (used in local/manual testing setups).
    #[arg(long)]
    no_spawn_agents: bool,

    #[arg(long)]
    watchtower_url: Option<String>,

    #[arg(long, default_value = "octopilot_rig")]
    camera_name: String,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();
    let args = Args::parse();

    let box_config: BoxConfig = load_json(&args.box_config)?;
    let task_config: TaskConfig = load_json(&args.task_config)?;
    let pi_config: PiConfig = load_json(&args.pi_config)?;

    let ports: Vec<PortName> = box_config
        .agents
        .iter()
        .flat_map(|a| {
            vec![
                PortName::from(a.left_port_name.clone()),
                PortName::from(a.right_port_name.clone()),
            ]
        })
        .collect();
    let chooser = TrialChooser::new(ports, &task_config);
    let mut state = DispatcherState::new(&box_config, chooser);

    let timestamp = Utc::now().format("%Y%m%dT%H%M%S").to_string();
    let session_dir = marshaller::prepare_session_dir(
        &args.runs_dir,
        &timestamp,
        &box_config,
        &task_config,
        &pi_config,
    )
    .context("preparing session directory")?;
    tracing::info!(session_dir = %session_dir.display(), "session directory ready");

    let mut agent_processes = Vec::new();
    if !args.no_spawn_agents {
        let remote_pi_config_path = args
            .remote_pi_config_path
            .as_deref()
            .unwrap_or("~/octopilot/pi_config.json");
        let remote_box_config_path = args
            .remote_box_config_path
            .as_deref()
            .unwrap_or("~/octopilot/box_config.json");
        for agent in &box_config.agents {
            let process = marshaller::spawn_agent(
                agent,
                &args.agent_binary,
                remote_pi_config_path,
                remote_box_config_path,
                &session_dir,
            )?;
            agent_processes.push(process);
        }
    }

    let recorder = args
        .watchtower_url
        .as_ref()
        .map(|url| watchtower::VideoRecorder::new(url.clone(), args.camera_name.clone()));
    if let Some(recorder) = &recorder {
        if recorder.login("mouse", "whitemattertest") {
            recorder.start_recording();
        }
    }

    let transport = octopilot_proto::DispatcherTransport::bind(box_config.zmq_port)
        .context("binding dispatcher transport")?;

    let shutdown_requested = Arc::new(AtomicBool::new(false));
    {
        let flag = shutdown_requested.clone();
        ctrlc::set_handler(move || {
            flag.store(true, Ordering::SeqCst);
        })
        .context("installing ctrl-c handler")?;
    }

    tracing::info!("dispatcher ready, waiting for all agents to connect");

    let mut last_heartbeat = Instant::now();
    while !shutdown_requested.load(Ordering::SeqCst) {
        if last_heartbeat.elapsed() >= T_ALIVE_SEND {
            broadcast_heartbeat(&transport, &state);
            check_liveness(&state, box_config.agents.iter().map(|a| a.name.as_str()));
            last_heartbeat = Instant::now();
        }

        match transport.recv_timeout(POLL_TIMEOUT_MS) {
            Ok(Some((identity, payload))) => {
                if let Err(err) = handle_inbound(&mut state, &identity, &payload) {
                    tracing::warn!(%err, identity, payload, "dropping malformed message");
                }
                if state.state() == octopilot_dispatcher::SessionState::Idle
                    && state.connected_agents().len() == box_config.agents.len()
                {
                    tracing::info!("all agents connected, starting session");
                    state.operator_start();
                }
                send_outbound(&transport, &mut state);
            }
            Ok(None) => {}
            Err(err) => tracing::error!(%err, "transport poll failed"),
        }
    }

    tracing::info!("shutdown requested, stopping session");
    state.operator_stop();
    send_outbound(&transport, &mut state);
    for agent in box_config.agents.iter().filter(|a| state.connected_agents().contains(&a.name)) {
        let _ = transport.send_to(&agent.name, &octopilot_proto::codec::encode(&Command::Exit.to_raw()));
    }
    marshaller::shutdown_all(&mut agent_processes);

    if let Some(recorder) = &recorder {
        recorder.stop_recording();
    }

    Ok(())
}

fn handle_inbound(
    state: &mut DispatcherState,
    identity: &str,
    payload: &str,
) -> anyhow::Result<()> {
    let raw = octopilot_proto::codec::decode(payload)?;
    let msg = AgentMessage::from_raw(&raw)?;
    match msg {
        AgentMessage::Hello => state.handle_hello(identity),
        AgentMessage::Goodbye => state.handle_goodbye(identity),
        AgentMessage::Alive => state.handle_alive(identity, Instant::now()),
        AgentMessage::Poke { poke_time, port_name, .. } => {
            let at = parse_timestamp(&poke_time)?;
            state.handle_poke(&PortName::from(port_name), at);
        }
        AgentMessage::Reward { poke_time, port_name, .. } => {
            let at = parse_timestamp(&poke_time)?;
            state.handle_reward(&PortName::from(port_name), at);
        }
        AgentMessage::Sound { trial_number, .. } => {
            tracing::trace!(identity, trial_number, "sound event received");
        }
    }
    Ok(())
}

fn parse_timestamp(s: &str) -> anyhow::Result<DateTime<Utc>> {
    Ok(s.parse::<DateTime<Utc>>()
        .with_context(|| format!("parsing event timestamp {s}"))?)
}

fn send_outbound(transport: &octopilot_proto::DispatcherTransport, state: &mut DispatcherState) {
    for outbound in state.drain_outbound() {
        let result = match outbound {
            Outbound::ToAgent(agent, command) => {
                transport.send_to(&agent, &octopilot_proto::codec::encode(&command.to_raw()))
            }
            Outbound::Broadcast(agents, command) => {
                transport.broadcast(&agents, &octopilot_proto::codec::encode(&command.to_raw()))
            }
        };
        if let Err(err) = result {
            tracing::error!(%err, "failed sending outbound command");
        }
    }
}

fn broadcast_heartbeat(transport: &octopilot_proto::DispatcherTransport, state: &DispatcherState) {
    let agents: Vec<String> = state.connected_agents().iter().cloned().collect();
    if agents.is_empty() {
        return;
    }
    if let Err(err) = transport.broadcast(&agents, &octopilot_proto::codec::encode(&Command::AreYouAlive.to_raw())) {
        tracing::error!(%err, "failed broadcasting heartbeat");
    }
}

fn check_liveness<'a>(state: &DispatcherState, agents: impl Iterator<Item = &'a str>) {
    let now = Instant::now();
    for agent in agents {
        if !state.connected_agents().contains(agent) {
            continue;
        }
        match state.last_alive(agent) {
            Some(last) => {
                let age = now.saturating_duration_since(last);
                if age > T_ALIVE_SOFT {
                    tracing::error!(agent, age_secs = age.as_secs(), "agent heartbeat is stale");
                }
            }
            None => tracing::warn!(agent, "no heartbeat received yet"),
        }
    }
}
