//! Typed dispatcher→agent [`Command`]s and agent→dispatcher [`AgentMessage`]s,
//! and their conversion to/from the wire-level [`RawMessage`].

use crate::codec::RawMessage;
use crate::error::ProtocolError;

/// Per-side audio parameters carried by `set_trial_parameters`. Every
/// field is optional on the wire — present only when that side is to play
/// targets and/or distracters this trial; omitted entirely when that side
/// plays neither.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct SideAudioParams {
    pub target_rate: Option<f64>,
    pub distracter_rate: Option<f64>,
}

/// `set_trial_parameters` payload.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SetTrialParameters {
    pub trial_number: i64,
    pub left_reward: bool,
    pub right_reward: bool,
    pub left: SideAudioParams,
    pub right: SideAudioParams,
    pub target_temporal_log_std: Option<f64>,
    pub target_center_freq: Option<f64>,
    pub target_log_amplitude: Option<f64>,
    pub distracter_temporal_log_std: Option<f64>,
    pub distracter_center_freq: Option<f64>,
    pub distracter_log_amplitude: Option<f64>,
}

/// Commands sent from the dispatcher to an agent.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Start,
    Stop,
    Exit,
    AreYouAlive,
    SetTrialParameters(SetTrialParameters),
}

impl Command {
    pub fn to_raw(&self) -> RawMessage {
        match self {
            Command::Start => RawMessage::new("start"),
            Command::Stop => RawMessage::new("stop"),
            Command::Exit => RawMessage::new("exit"),
            Command::AreYouAlive => RawMessage::new("are_you_alive"),
            Command::SetTrialParameters(p) => {
                let mut raw = RawMessage::new("set_trial_parameters")
                    .with_int("trial_number", p.trial_number)
                    .with_bool("left_reward", p.left_reward)
                    .with_bool("right_reward", p.right_reward);
                if let Some(v) = p.left.target_rate {
                    raw = raw.with_float("left_target_rate", v);
                }
                if let Some(v) = p.right.target_rate {
                    raw = raw.with_float("right_target_rate", v);
                }
                if let Some(v) = p.left.distracter_rate {
                    raw = raw.with_float("left_distracter_rate", v);
                }
                if let Some(v) = p.right.distracter_rate {
                    raw = raw.with_float("right_distracter_rate", v);
                }
                if let Some(v) = p.target_temporal_log_std {
                    raw = raw.with_float("target_temporal_log_std", v);
                }
                if let Some(v) = p.target_center_freq {
                    raw = raw.with_float("target_center_freq", v);
                }
                if let Some(v) = p.target_log_amplitude {
                    raw = raw.with_float("target_log_amplitude", v);
                }
                if let Some(v) = p.distracter_temporal_log_std {
                    raw = raw.with_float("distracter_temporal_log_std", v);
                }
                if let Some(v) = p.distracter_center_freq {
                    raw = raw.with_float("distracter_center_freq", v);
                }
                if let Some(v) = p.distracter_log_amplitude {
                    raw = raw.with_float("distracter_log_amplitude", v);
                }
                raw
            }
        }
    }

    pub fn from_raw(raw: &RawMessage) -> Result<Command, ProtocolError> {
        match raw.command.as_str() {
            "start" => Ok(Command::Start),
            "stop" => Ok(Command::Stop),
            "exit" => Ok(Command::Exit),
            "are_you_alive" => Ok(Command::AreYouAlive),
            "set_trial_parameters" => Ok(Command::SetTrialParameters(SetTrialParameters {
                trial_number: raw.get_int("trial_number")?,
                left_reward: raw.get_bool("left_reward")?,
                right_reward: raw.get_bool("right_reward")?,
                left: SideAudioParams {
                    target_rate: raw.get_float_opt("left_target_rate"),
                    distracter_rate: raw.get_float_opt("left_distracter_rate"),
                },
                right: SideAudioParams {
                    target_rate: raw.get_float_opt("right_target_rate"),
                    distracter_rate: raw.get_float_opt("right_distracter_rate"),
                },
                target_temporal_log_std: raw.get_float_opt("target_temporal_log_std"),
                target_center_freq: raw.get_float_opt("target_center_freq"),
                target_log_amplitude: raw.get_float_opt("target_log_amplitude"),
                distracter_temporal_log_std: raw.get_float_opt("distracter_temporal_log_std"),
                distracter_center_freq: raw.get_float_opt("distracter_center_freq"),
                distracter_log_amplitude: raw.get_float_opt("distracter_log_amplitude"),
            })),
            other => Err(ProtocolError::UnknownCommand(other.to_owned())),
        }
    }
}

/// Messages sent from an agent to the dispatcher.
#[derive(Debug, Clone, PartialEq)]
pub enum AgentMessage {
    Hello,
    Goodbye,
    Alive,
    Poke {
        trial_number: i64,
        port_name: String,
        poke_time: String,
    },
    Reward {
        trial_number: i64,
        port_name: String,
        poke_time: String,
    },
    Sound {
        trial_number: i64,
        data_left: f64,
        data_right: f64,
        last_frame_time: i64,
        frames_since_cycle_start: i64,
        data_hash: i64,
        dt: String,
    },
}

impl AgentMessage {
    pub fn to_raw(&self) -> RawMessage {
        match self {
            AgentMessage::Hello => RawMessage::new("hello"),
            AgentMessage::Goodbye => RawMessage::new("goodbye"),
            AgentMessage::Alive => RawMessage::new("alive"),
            AgentMessage::Poke {
                trial_number,
                port_name,
                poke_time,
            } => RawMessage::new("poke")
                .with_int("trial_number", *trial_number)
                .with_str("port_name", port_name.clone())
                .with_str("poke_time", poke_time.clone()),
            AgentMessage::Reward {
                trial_number,
                port_name,
                poke_time,
            } => RawMessage::new("reward")
                .with_int("trial_number", *trial_number)
                .with_str("port_name", port_name.clone())
                .with_str("poke_time", poke_time.clone()),
            AgentMessage::Sound {
                trial_number,
                data_left,
                data_right,
                last_frame_time,
                frames_since_cycle_start,
                data_hash,
                dt,
            } => RawMessage::new("sound")
                .with_int("trial_number", *trial_number)
                .with_float("data_left", *data_left)
                .with_float("data_right", *data_right)
                .with_int("last_frame_time", *last_frame_time)
                .with_int("frames_since_cycle_start", *frames_since_cycle_start)
                .with_int("data_hash", *data_hash)
                .with_str("dt", dt.clone()),
        }
    }

    pub fn from_raw(raw: &RawMessage) -> Result<AgentMessage, ProtocolError> {
        match raw.command.as_str() {
            "hello" => Ok(AgentMessage::Hello),
            "goodbye" => Ok(AgentMessage::Goodbye),
            "alive" => Ok(AgentMessage::Alive),
            "poke" => Ok(AgentMessage::Poke {
                trial_number: raw.get_int("trial_number")?,
                port_name: raw.get_str("port_name")?.to_owned(),
                poke_time: raw.get_str("poke_time")?.to_owned(),
            }),
            "reward" => Ok(AgentMessage::Reward {
                trial_number: raw.get_int("trial_number")?,
                port_name: raw.get_str("port_name")?.to_owned(),
                poke_time: raw.get_str("poke_time")?.to_owned(),
            }),
            "sound" => Ok(AgentMessage::Sound {
                trial_number: raw.get_int("trial_number")?,
                data_left: raw.get_float("data_left")?,
                data_right: raw.get_float("data_right")?,
                last_frame_time: raw.get_int("last_frame_time")?,
                frames_since_cycle_start: raw.get_int("frames_since_cycle_start")?,
                data_hash: raw.get_int("data_hash")?,
                dt: raw.get_str("dt")?.to_owned(),
            }),
            other => Err(ProtocolError::UnknownCommand(other.to_owned())),
        }
    }
}
