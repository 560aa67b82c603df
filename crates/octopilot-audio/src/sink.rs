//! The audio sink: a lock-free producer/consumer ring feeding a `cpal`
//! output stream callback. A background feeder thread drains
//! [`crate::cycle::AudioCycle`] into the ring; the callback pops exactly
//! one frame per period and writes silence (rate-limited warning) when the
//! ring runs dry.

use crate::frame::{AudioFrame, N_BLOCK, TARGET_Q};
use crate::notify::{summarize_if_audible, SoundNotification};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleRate, StreamConfig};
use parking_lot::Mutex;
use rtrb::{Consumer, Producer, RingBuffer};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SinkError {
    #[error("no default output device available")]
    NoDevice,
    #[error("unsupported output stream config: {0}")]
    UnsupportedConfig(String),
    #[error("failed to build output stream: {0}")]
    BuildStream(String),
    #[error("failed to start output stream: {0}")]
    PlayStream(String),
}

/// Producer-side handle owned by the feeder thread. Pushing is
/// non-blocking; callers retry on a full ring rather than block the
/// feeder indefinitely. The consumer half is shared with the callback
/// behind a lock so [`Self::empty_queue`] can drain it from here — the
/// producer side, per the ring's own contract — rather than from inside
/// the real-time callback.
pub struct SinkFeeder {
    producer: Producer<AudioFrame>,
    consumer: Arc<Mutex<Consumer<AudioFrame>>>,
}

impl SinkFeeder {
    pub fn push(&mut self, frame: AudioFrame) -> bool {
        self.producer.push(frame).is_ok()
    }

    pub fn slots_free(&self) -> usize {
        self.producer.slots()
    }

    pub fn target_depth(&self) -> usize {
        TARGET_Q
    }

    /// Discard everything already queued except the last `retain` frames,
    /// so a parameter change is heard promptly rather than after the stale
    /// queue finishes playing. Runs on the control-loop thread and takes
    /// the consumer's lock directly; the callback only ever `try_lock`s,
    /// so this never contends with the real-time thread for long.
    pub fn empty_queue(&self, retain: usize) {
        let mut consumer = self.consumer.lock();
        while consumer.slots() > retain {
            if consumer.pop().is_err() {
                break;
            }
        }
    }
}

/// Build a fresh ring and split it into a feeder-side producer and the
/// consumer handed to [`AudioSink::start`].
pub fn build_ring() -> (Producer<AudioFrame>, Consumer<AudioFrame>) {
    RingBuffer::<AudioFrame>::new(TARGET_Q * 2)
}

/// Wrap a bare `Producer` with the consumer handle shared with its
/// matching `AudioSink`.
pub fn feeder_handle(producer: Producer<AudioFrame>, sink: &AudioSink) -> SinkFeeder {
    SinkFeeder { producer, consumer: sink.consumer.clone() }
}

/// Owns the `cpal` stream and the consumer half of the ring. Dropping this
/// stops playback.
pub struct AudioSink {
    _stream: cpal::Stream,
    underrun_count: Arc<AtomicU64>,
    consumer: Arc<Mutex<Consumer<AudioFrame>>>,
}

impl AudioSink {
    /// Start an output stream at the device's default config, popping at
    /// most one frame per callback period. `sound_tx`, when given,
    /// receives a [`SoundNotification`] for every audibly non-silent frame
    /// actually played — the callback never blocks on it, and a full
    /// notification queue just drops the oldest-pending report.
    pub fn start(
        consumer: Consumer<AudioFrame>,
        mut sound_tx: Option<Producer<SoundNotification>>,
    ) -> Result<(Self, SampleRate), SinkError> {
        let host = cpal::default_host();
        let device = host.default_output_device().ok_or(SinkError::NoDevice)?;
        let supported = device
            .default_output_config()
            .map_err(|e| SinkError::UnsupportedConfig(e.to_string()))?;
        let sample_rate = supported.sample_rate();
        let config = StreamConfig {
            channels: 2,
            sample_rate,
            buffer_size: cpal::BufferSize::Fixed(N_BLOCK as u32),
        };

        let underrun_count = Arc::new(AtomicU64::new(0));
        let underrun_count_cb = underrun_count.clone();
        let consumer = Arc::new(Mutex::new(consumer));
        let consumer_cb = consumer.clone();
        let mut last_warning_logged_at: Option<Instant> = None;
        let warning_interval = Duration::from_secs(1);
        let mut frame_index: u64 = 0;

        let stream = device
            .build_output_stream(
                &config,
                move |data: &mut [f32], _info: &cpal::OutputCallbackInfo| {
                    // `try_lock` never blocks: while `empty_queue` holds the
                    // lock on the control-loop thread, the callback just
                    // treats this period as an underrun rather than wait.
                    let popped = consumer_cb.try_lock().and_then(|mut c| c.pop().ok());

                    match popped {
                        Some(frame) => {
                            let src = frame.as_slice();
                            let n = data.len().min(src.len());
                            data[..n].copy_from_slice(&src[..n]);
                            for s in data[n..].iter_mut() {
                                *s = 0.0;
                            }
                            frame_index = frame_index.wrapping_add(1);
                            if let Some(tx) = sound_tx.as_mut() {
                                if let Some((data_left, data_right, data_hash)) =
                                    summarize_if_audible(&frame)
                                {
                                    let _ = tx.push(SoundNotification {
                                        data_left,
                                        data_right,
                                        frame_index,
                                        data_hash,
                                    });
                                }
                            }
                        }
                        None => {
                            for s in data.iter_mut() {
                                *s = 0.0;
                            }
                            underrun_count_cb.fetch_add(1, Ordering::Relaxed);
                            let should_warn = last_warning_logged_at
                                .map(|t| t.elapsed() >= warning_interval)
                                .unwrap_or(true);
                            if should_warn {
                                tracing::warn!(
                                    count = underrun_count_cb.load(Ordering::Relaxed),
                                    "audio ring underrun, substituting silence"
                                );
                                last_warning_logged_at = Some(Instant::now());
                            }
                        }
                    }
                },
                move |err| {
                    tracing::error!("audio output stream error: {err}");
                },
                None,
            )
            .map_err(|e| SinkError::BuildStream(e.to_string()))?;

        stream.play().map_err(|e| SinkError::PlayStream(e.to_string()))?;

        Ok((
            AudioSink {
                _stream: stream,
                underrun_count,
                consumer,
            },
            sample_rate,
        ))
    }

    pub fn underrun_count(&self) -> u64 {
        self.underrun_count.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Build a `SinkFeeder` straight from a ring half, bypassing
    /// `AudioSink::start` (which needs a real output device) — enough to
    /// exercise `empty_queue`'s actual drain behavior in isolation.
    fn standalone_feeder(producer: Producer<AudioFrame>, consumer: Consumer<AudioFrame>) -> SinkFeeder {
        SinkFeeder {
            producer,
            consumer: Arc::new(Mutex::new(consumer)),
        }
    }

    #[test]
    fn build_ring_has_target_capacity() {
        let (producer, _consumer) = build_ring();
        assert_eq!(producer.slots(), TARGET_Q * 2);
    }

    #[test]
    fn producer_push_succeeds_until_full() {
        let (mut producer, _consumer) = build_ring();
        let mut pushed = 0;
        while producer.push(AudioFrame::silence()).is_ok() {
            pushed += 1;
            if pushed > TARGET_Q * 4 {
                break;
            }
        }
        assert!(pushed >= TARGET_Q);
    }

    #[test]
    fn empty_queue_drains_down_to_the_retained_tail() {
        let (producer, consumer) = build_ring();
        let mut feeder = standalone_feeder(producer, consumer);
        for _ in 0..20 {
            assert!(feeder.push(AudioFrame::silence()));
        }

        feeder.empty_queue(5);

        let capacity = TARGET_Q * 2;
        assert_eq!(feeder.slots_free(), capacity - 5);
    }

    #[test]
    fn empty_queue_is_a_no_op_when_already_at_or_below_retain() {
        let (producer, consumer) = build_ring();
        let mut feeder = standalone_feeder(producer, consumer);
        for _ in 0..3 {
            assert!(feeder.push(AudioFrame::silence()));
        }

        feeder.empty_queue(5);

        let capacity = TARGET_Q * 2;
        assert_eq!(feeder.slots_free(), capacity - 3);
    }

    #[test]
    fn empty_queue_with_zero_retain_drains_everything() {
        let (producer, consumer) = build_ring();
        let mut feeder = standalone_feeder(producer, consumer);
        for _ in 0..10 {
            assert!(feeder.push(AudioFrame::silence()));
        }

        feeder.empty_queue(0);

        assert_eq!(feeder.slots_free(), TARGET_Q * 2);
    }
}
