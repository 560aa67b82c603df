pub mod cycle;
pub mod filter;
pub mod frame;
pub mod notify;
pub mod sink;
pub mod synth;

pub use cycle::{AudioCycle, SideParams};
pub use frame::{AudioFrame, CYCLE_LEN_S, N_BLOCK, TARGET_Q};
pub use notify::{build_notify_channel, SoundNotification};
pub use sink::{build_ring, feeder_handle, AudioSink, SinkError, SinkFeeder};
pub use synth::{BurstSpec, Channel, EqCurve};
