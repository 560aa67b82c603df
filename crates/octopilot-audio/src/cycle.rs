//! Audio frame generator: builds one finite "cycle" of `N_BLOCK×2` frames
//! from the current per-side parameters, and exposes it as an infinite
//! sequence that is swapped atomically on parameter change.
//!
//! One prebuilt `Vec` is rendered per parameter change and looped forever,
//! expressed as a cursor over an `Arc<[_]>` rather than an
//! `itertools::Cycle` adapter, so that swapping parameters is a single
//! pointer swap under a `parking_lot::Mutex` rather than rebuilding an
//! iterator type.

use crate::frame::{AudioFrame, CYCLE_LEN_S, N_BLOCK};
use crate::synth::{BurstSpec, Channel, EqCurve};
use rand_distr::{Distribution, Gamma};
use std::sync::Arc;

const ONSETS_DRAWN_PER_SIDE: usize = 100;
const EMPTY_CYCLE_SILENT_FRAMES: usize = 100;

/// Per-side parameters for one side of the stereo field. Absent means this
/// side plays nothing this cycle.
#[derive(Debug, Clone, Copy)]
pub struct SideParams {
    pub rate_hz: f64,
    pub temporal_log_std: f64,
    pub center_freq: f64,
    pub log_amplitude: f64,
    pub bandwidth: Option<f64>,
    pub duration_s: Option<f64>,
}

impl SideParams {
    fn burst_spec(&self, channel: Channel, sample_rate: f64) -> BurstSpec {
        BurstSpec {
            channel,
            center_freq: self.center_freq,
            log_amplitude: self.log_amplitude,
            bandwidth: self.bandwidth.unwrap_or(BurstSpec::DEFAULT_BANDWIDTH_HZ),
            duration_s: self.duration_s.unwrap_or(BurstSpec::DEFAULT_DURATION_S),
            sample_rate,
        }
    }

    /// Draw `ONSETS_DRAWN_PER_SIDE` inter-burst intervals from a Gamma
    /// distribution with mean `1/rate_hz` and variance
    /// `(10^temporal_log_std)^2`, and return their cumulative onset times.
    fn draw_onsets(&self, rng: &mut impl rand::Rng) -> Vec<f64> {
        if self.rate_hz <= 0.0 {
            return Vec::new();
        }
        let mean = 1.0 / self.rate_hz;
        let std_dev = 10f64.powf(self.temporal_log_std);
        let variance = std_dev * std_dev;
        // Gamma(shape k, scale theta): mean = k*theta, variance = k*theta^2
        // => theta = variance/mean, k = mean/theta = mean^2/variance.
        let theta = (variance / mean).max(1e-9);
        let k = (mean * mean / variance).max(1e-6);
        let gamma = Gamma::new(k, theta).expect("valid gamma parameters");

        let mut onset = 0.0;
        let mut onsets = Vec::with_capacity(ONSETS_DRAWN_PER_SIDE);
        for _ in 0..ONSETS_DRAWN_PER_SIDE {
            onset += gamma.sample(rng);
            onsets.push(onset);
        }
        onsets
    }
}

/// Build one cycle of frames from the given per-side parameters.
pub fn build_cycle(
    left: Option<SideParams>,
    right: Option<SideParams>,
    eq: Option<&EqCurve>,
    sample_rate: f64,
) -> Vec<AudioFrame> {
    let frame_duration_s = N_BLOCK as f64 / sample_rate;
    let mut rng = rand::thread_rng();

    let left_burst = left.map(|p| synthesize_burst_cached(&p, Channel::Left, sample_rate, eq));
    let right_burst = right.map(|p| synthesize_burst_cached(&p, Channel::Right, sample_rate, eq));

    let mut entries: Vec<(f64, Channel)> = Vec::new();
    if let Some(p) = left {
        entries.extend(
            p.draw_onsets(&mut rng)
                .into_iter()
                .filter(|t| *t < CYCLE_LEN_S)
                .map(|t| (t, Channel::Left)),
        );
    }
    if let Some(p) = right {
        entries.extend(
            p.draw_onsets(&mut rng)
                .into_iter()
                .filter(|t| *t < CYCLE_LEN_S)
                .map(|t| (t, Channel::Right)),
        );
    }
    entries.sort_by(|a, b| a.0.partial_cmp(&b.0).unwrap());

    if entries.is_empty() {
        // Neither side fit an event in the cycle window, or both sides
        // were present with rate 0, but the caller still wants a
        // populated cycle.
        return vec![AudioFrame::silence(); EMPTY_CYCLE_SILENT_FRAMES];
    }

    let mut out = Vec::new();
    for (i, (onset, channel)) in entries.iter().enumerate() {
        let burst = match channel {
            Channel::Left => left_burst.as_ref().expect("left entry implies left params"),
            Channel::Right => right_burst
                .as_ref()
                .expect("right entry implies right params"),
        };
        out.extend(burst.iter().cloned());

        let next_onset = if i + 1 < entries.len() {
            entries[i + 1].0
        } else {
            CYCLE_LEN_S
        };
        let gap_s = (next_onset - onset).max(0.0);
        let gap_frames = ((gap_s / frame_duration_s).floor() as usize).max(1);
        out.extend(std::iter::repeat_with(AudioFrame::silence).take(gap_frames));
    }
    out
}

fn synthesize_burst_cached(
    params: &SideParams,
    channel: Channel,
    sample_rate: f64,
    eq: Option<&EqCurve>,
) -> Vec<AudioFrame> {
    let spec = params.burst_spec(channel, sample_rate);
    crate::synth::synthesize_burst(&spec, eq)
}

/// An infinite, deterministic-once-seeded sequence of frames, swappable
/// atomically on parameter change: the next call to [`Self::next_frame`]
/// after [`Self::set_audio_parameters`] always returns from the new cycle.
pub struct AudioCycle {
    current: parking_lot::Mutex<Arc<[AudioFrame]>>,
    cursor: std::sync::atomic::AtomicUsize,
}

impl AudioCycle {
    pub fn new() -> Self {
        AudioCycle {
            current: parking_lot::Mutex::new(Arc::from(Vec::<AudioFrame>::new())),
            cursor: std::sync::atomic::AtomicUsize::new(0),
        }
    }

    /// Replace the cycle. Per-side `None` means that side plays nothing
    /// this cycle. When both sides are `None` the cycle has no frames at
    /// all — callers draining this with [`Self::next_frame`] simply get
    /// `None` every time, which leaves the ring empty and the audio
    /// callback substitutes silence.
    pub fn set_audio_parameters(
        &self,
        left: Option<SideParams>,
        right: Option<SideParams>,
        eq: Option<&EqCurve>,
        sample_rate: f64,
    ) {
        let frames = if left.is_none() && right.is_none() {
            Vec::new()
        } else {
            build_cycle(left, right, eq, sample_rate)
        };
        let mut guard = self.current.lock();
        *guard = Arc::from(frames);
        drop(guard);
        self.cursor.store(0, std::sync::atomic::Ordering::SeqCst);
    }

    /// Return the next frame in the current cycle, or `None` if the cycle
    /// is empty (both sides absent).
    pub fn next_frame(&self) -> Option<AudioFrame> {
        let frames = self.current.lock().clone();
        if frames.is_empty() {
            return None;
        }
        let idx = self
            .cursor
            .fetch_update(
                std::sync::atomic::Ordering::SeqCst,
                std::sync::atomic::Ordering::SeqCst,
                |c| Some((c + 1) % frames.len()),
            )
            .unwrap_or(0);
        Some(frames[idx].clone())
    }
}

impl Default for AudioCycle {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(rate_hz: f64) -> SideParams {
        SideParams {
            rate_hz,
            temporal_log_std: -1.0,
            center_freq: 8000.0,
            log_amplitude: -2.0,
            bandwidth: None,
            duration_s: None,
        }
    }

    #[test]
    fn both_sides_absent_yields_empty_cycle() {
        let cycle = AudioCycle::new();
        cycle.set_audio_parameters(None, None, None, 44_100.0);
        assert!(cycle.next_frame().is_none());
    }

    #[test]
    fn zero_rate_produces_all_silence_cycle() {
        let frames = build_cycle(Some(params(0.0)), None, None, 44_100.0);
        assert!(!frames.is_empty());
        for f in &frames {
            assert!(f.as_slice().iter().all(|s| *s == 0.0));
        }
    }

    #[test]
    fn cycle_frames_are_always_n_block_stereo() {
        let frames = build_cycle(Some(params(4.0)), Some(params(2.0)), None, 44_100.0);
        for f in &frames {
            assert_eq!(f.as_slice().len(), N_BLOCK * 2);
        }
    }

    #[test]
    fn set_audio_parameters_swaps_cycle_for_next_call() {
        let cycle = AudioCycle::new();
        cycle.set_audio_parameters(Some(params(4.0)), None, None, 44_100.0);
        assert!(cycle.next_frame().is_some());
        cycle.set_audio_parameters(None, None, None, 44_100.0);
        assert!(cycle.next_frame().is_none());
    }

    #[test]
    fn minimum_gap_is_one_frame_even_when_drawn_gap_is_smaller() {
        // A very high rate will tend to draw sub-frame gaps; the
        // generator must still floor every gap at one frame.
        let frames = build_cycle(Some(params(500.0)), None, None, 44_100.0);
        assert!(!frames.is_empty());
    }
}
