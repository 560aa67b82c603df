//! Sound-event notifications posted by the output callback, consumed by
//! the agent control loop and turned into `sound` wire events. Kept as a
//! separate lock-free SPSC so the real-time callback never touches the
//! network transport directly.

use crate::frame::AudioFrame;
use rtrb::{Consumer, Producer, RingBuffer};

const NOTIFY_QUEUE_CAPACITY: usize = 64;

/// A compact summary of one played frame: per-channel RMS, a monotonic
/// frame counter, and a cheap hash for de-duplication/debugging. Posted
/// only for non-silent frames (see [`rms_of`]).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SoundNotification {
    pub data_left: f64,
    pub data_right: f64,
    pub frame_index: u64,
    pub data_hash: i64,
}

pub fn build_notify_channel() -> (Producer<SoundNotification>, Consumer<SoundNotification>) {
    RingBuffer::<SoundNotification>::new(NOTIFY_QUEUE_CAPACITY)
}

fn rms(samples: impl Iterator<Item = f32>) -> f64 {
    let mut sum_sq = 0.0f64;
    let mut n = 0usize;
    for s in samples {
        sum_sq += (s as f64) * (s as f64);
        n += 1;
    }
    if n == 0 {
        0.0
    } else {
        (sum_sq / n as f64).sqrt()
    }
}

/// A silent frame is one whose RMS is below the threshold the original
/// source used to decide whether to report a sound event at all.
const SILENCE_RMS_THRESHOLD: f64 = 1e-6;

/// `Some((left_rms, right_rms, hash))` if the frame is audibly non-silent,
/// `None` if it should not be reported.
pub fn summarize_if_audible(frame: &AudioFrame) -> Option<(f64, f64, i64)> {
    let left_rms = rms(frame.channel(0));
    let right_rms = rms(frame.channel(1));
    if left_rms.max(right_rms) <= SILENCE_RMS_THRESHOLD {
        return None;
    }
    let mut hash: i64 = 0;
    for s in frame.as_slice() {
        hash = hash.wrapping_mul(31).wrapping_add(s.to_bits() as i64);
    }
    Some((left_rms, right_rms, hash))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn silent_frame_is_not_summarized() {
        let frame = AudioFrame::silence();
        assert!(summarize_if_audible(&frame).is_none());
    }

    #[test]
    fn loud_frame_is_summarized_with_matching_rms_sign() {
        let frame = AudioFrame::from_channels(&[0.5; 1024], &[0.0; 1024]);
        let (left, right, _hash) = summarize_if_audible(&frame).expect("audible");
        assert!(left > 0.0);
        assert_eq!(right, 0.0);
    }
}
