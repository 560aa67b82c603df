use anyhow::Context;
use clap::Parser;
use crossbeam_channel::unbounded;
use octopilot_agent::{AgentEffect, AgentState, HeartbeatMonitor, T_ALIVE_CHECK};
use octopilot_audio::{
    build_notify_channel, build_ring, feeder_handle, AudioCycle, AudioSink, EqCurve,
    SoundNotification,
};
use octopilot_gpio::{Edge, GpioBackend, Nosepoke, NosepokePins};
#[cfg(not(target_os = "linux"))]
use octopilot_gpio::StubBackend;
use octopilot_proto::{AgentConfig, AgentMessage, BoxConfig, Command, FatalError, PiConfig, PortName};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Default solenoid open time, matching the original Pi-side default
/// reward duration.
const REWARD_PULSE_WIDTH: Duration = Duration::from_millis(50);
/// How many already-queued frames to keep when a parameter change asks
/// for the ring to be emptied.
const RETAIN_TAIL_FRAMES: usize = 5;
const POLL_TIMEOUT_MS: i64 = 100;

#[derive(Parser, Debug)]
#[command(name = "octopilot-agent", about = "Octopilot embedded box agent")]
struct Args {
    #[arg(long)]
    pi_config: PathBuf,

    #[arg(long)]
    box_config: PathBuf,

    #[arg(long)]
    agent_name: String,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();
    let args = Args::parse();

    if let Err(err) = run(&args) {
        tracing::error!(%err, "agent exiting with fatal error");
        return Err(err);
    }
    Ok(())
}

fn run(args: &Args) -> anyhow::Result<()> {
    let pi_config: PiConfig =
        octopilot_proto::load_json(&args.pi_config).context("loading pi config")?;
    let box_config: BoxConfig =
        octopilot_proto::load_json(&args.box_config).context("loading box config")?;
    let agent_config: AgentConfig = box_config
        .agent(&args.agent_name)
        .cloned()
        .ok_or_else(|| FatalError::Config(format!("agent `{}` not found in box config", args.agent_name)))?;

    let backend: Arc<dyn GpioBackend> = build_gpio_backend()?;

    let left_port = PortName::from(agent_config.left_port_name.clone());
    let right_port = PortName::from(agent_config.right_port_name.clone());
    let left_nosepoke = Nosepoke::new(
        left_port.clone(),
        NosepokePins {
            poke_in: pi_config.left_poke_pin,
            solenoid: pi_config.left_solenoid_pin,
            led_red: pi_config.left_led_pins.0,
            led_green: pi_config.left_led_pins.1,
            led_blue: pi_config.left_led_pins.2,
        },
        REWARD_PULSE_WIDTH,
    );
    let right_nosepoke = Nosepoke::new(
        right_port.clone(),
        NosepokePins {
            poke_in: pi_config.right_poke_pin,
            solenoid: pi_config.right_solenoid_pin,
            led_red: pi_config.right_led_pins.0,
            led_green: pi_config.right_led_pins.1,
            led_blue: pi_config.right_led_pins.2,
        },
        REWARD_PULSE_WIDTH,
    );
    // GPIO interrupt registration happens exactly once here, regardless
    // of session state; `start`/`stop` only toggle the higher-level
    // poke/reward event handlers via `Nosepoke::{add_on_poke_in,
    // add_on_reward, clear_handlers}`.
    left_nosepoke
        .bind(&backend, Edge::Rising)
        .map_err(|e| FatalError::GpioInit(e.to_string()))?;
    right_nosepoke
        .bind(&backend, Edge::Rising)
        .map_err(|e| FatalError::GpioInit(e.to_string()))?;

    let (event_tx, event_rx) = unbounded();
    let mut state = AgentState::new(
        left_port,
        left_nosepoke,
        right_port,
        right_nosepoke,
        backend,
        event_tx.clone(),
    );

    let eq_curve = pi_config
        .eq_curve_path
        .as_ref()
        .map(|path| EqCurve::load_csv(path, pi_config.sample_rate as f64))
        .transpose()
        .context("loading equalization curve")?;

    let cycle = AudioCycle::new();
    let (producer, consumer) = build_ring();
    let (notify_tx, mut notify_rx) = build_notify_channel();
    let (sink, sample_rate) =
        AudioSink::start(consumer, Some(notify_tx)).map_err(|e| FatalError::AudioInit(e.to_string()))?;
    let mut feeder = feeder_handle(producer, &sink);

    let transport = octopilot_proto::AgentTransport::connect(
        &box_config.desktop_ip,
        box_config.zmq_port,
        &args.agent_name,
    )
    .map_err(FatalError::TransportBind)
    .context("connecting agent transport")?;

    send(&transport, &AgentMessage::Hello);

    let shutdown_requested = Arc::new(AtomicBool::new(false));
    {
        let flag = shutdown_requested.clone();
        ctrlc::set_handler(move || {
            flag.store(true, Ordering::SeqCst);
        })
        .context("installing ctrl-c handler")?;
    }

    let mut heartbeat_monitor: Option<HeartbeatMonitor> = None;
    let mut terminate = false;

    tracing::info!(agent = %args.agent_name, "agent ready, entering control loop");

    while !terminate && !state.critical_shutdown() && !shutdown_requested.load(Ordering::SeqCst) {
        top_up(&mut feeder, &cycle);
        report_sounds(&mut notify_rx, &transport, state.trial_number());

        while let Ok(event) = event_rx.try_recv() {
            let effects = state.handle_event(event);
            apply_effects(effects, &mut heartbeat_monitor, &event_tx, &cycle, &mut feeder, eq_curve.as_ref(), sample_rate.0 as f64, &transport, &mut terminate);
        }

        match transport.recv_timeout(POLL_TIMEOUT_MS) {
            Ok(Some(payload)) => {
                if let Err(err) = handle_inbound(&payload, &mut state, &mut heartbeat_monitor, &event_tx, &cycle, &mut feeder, eq_curve.as_ref(), sample_rate.0 as f64, &transport, &mut terminate) {
                    tracing::warn!(%err, payload, "dropping malformed command");
                }
            }
            Ok(None) => {}
            Err(err) => tracing::error!(%err, "transport poll failed"),
        }

        std::thread::yield_now();
    }

    if state.critical_shutdown() {
        tracing::error!("critical_shutdown raised, tearing down");
    }
    send(&transport, &AgentMessage::Goodbye);

    Ok(())
}

#[cfg(target_os = "linux")]
fn build_gpio_backend() -> anyhow::Result<Arc<dyn GpioBackend>> {
    let backend = octopilot_gpio::RppalBackend::new().map_err(|e| FatalError::GpioInit(e.to_string()))?;
    Ok(Arc::new(backend))
}

#[cfg(not(target_os = "linux"))]
fn build_gpio_backend() -> anyhow::Result<Arc<dyn GpioBackend>> {
    Ok(Arc::new(StubBackend::new()))
}

fn top_up(feeder: &mut octopilot_audio::SinkFeeder, cycle: &AudioCycle) {
    while feeder.slots_free() > feeder.target_depth() {
        match cycle.next_frame() {
            Some(frame) => {
                if !feeder.push(frame) {
                    break;
                }
            }
            None => break,
        }
    }
}

/// Drain every pending sound notification posted by the output callback
/// and report it as a `sound` event. `cpal` has no jack-style per-cycle
/// frame clock, so `frames_since_cycle_start` has no faithful
/// equivalent here and is reported as 0; `last_frame_time` carries the
/// sink's running frame counter instead.
fn report_sounds(
    notify_rx: &mut rtrb::Consumer<SoundNotification>,
    transport: &octopilot_proto::AgentTransport,
    trial_number: i64,
) {
    while let Ok(note) = notify_rx.pop() {
        let msg = AgentMessage::Sound {
            trial_number,
            data_left: note.data_left,
            data_right: note.data_right,
            last_frame_time: note.frame_index as i64,
            frames_since_cycle_start: 0,
            data_hash: note.data_hash,
            dt: chrono::Utc::now().to_rfc3339(),
        };
        send(transport, &msg);
    }
}

fn send(transport: &octopilot_proto::AgentTransport, msg: &AgentMessage) {
    let payload = octopilot_proto::codec::encode(&msg.to_raw());
    if let Err(err) = transport.send(&payload) {
        tracing::error!(%err, "failed sending agent message");
    }
}

#[allow(clippy::too_many_arguments)]
fn handle_inbound(
    payload: &str,
    state: &mut AgentState,
    heartbeat_monitor: &mut Option<HeartbeatMonitor>,
    event_tx: &crossbeam_channel::Sender<octopilot_agent::AgentEvent>,
    cycle: &AudioCycle,
    feeder: &mut octopilot_audio::SinkFeeder,
    eq_curve: Option<&EqCurve>,
    sample_rate: f64,
    transport: &octopilot_proto::AgentTransport,
    terminate: &mut bool,
) -> anyhow::Result<()> {
    let raw = octopilot_proto::codec::decode(payload)?;
    let cmd = Command::from_raw(&raw)?;
    let effects = state.handle_command(cmd, Instant::now());
    apply_effects(effects, heartbeat_monitor, event_tx, cycle, feeder, eq_curve, sample_rate, transport, terminate);
    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn apply_effects(
    effects: Vec<AgentEffect>,
    heartbeat_monitor: &mut Option<HeartbeatMonitor>,
    event_tx: &crossbeam_channel::Sender<octopilot_agent::AgentEvent>,
    cycle: &AudioCycle,
    feeder: &mut octopilot_audio::SinkFeeder,
    eq_curve: Option<&EqCurve>,
    sample_rate: f64,
    transport: &octopilot_proto::AgentTransport,
    terminate: &mut bool,
) {
    for effect in effects {
        match effect {
            AgentEffect::StartHeartbeatMonitor => {
                if heartbeat_monitor.is_none() {
                    *heartbeat_monitor = Some(HeartbeatMonitor::start(event_tx.clone(), T_ALIVE_CHECK));
                }
            }
            AgentEffect::StopHeartbeatMonitor => {
                *heartbeat_monitor = None;
            }
            AgentEffect::SetAudioParameters { left, right } => {
                cycle.set_audio_parameters(left, right, eq_curve, sample_rate);
            }
            AgentEffect::EmptyAudioQueue => {
                feeder.empty_queue(RETAIN_TAIL_FRAMES);
            }
            AgentEffect::Send(msg) => send(transport, &msg),
            AgentEffect::Terminate => {
                *terminate = true;
            }
        }
    }
}
