//! Noise synthesizer: one bandpass-filtered stereo burst, partitioned into
//! zero-padded fixed-size frames. Runs entirely outside the audio
//! callback — called only when building a new cycle.

use crate::filter::Bandpass;
use crate::frame::{AudioFrame, N_BLOCK};
use rand::Rng;
use rustfft::num_complex::Complex32;
use rustfft::FftPlanner;

/// Which stereo channel a burst is placed in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Channel {
    Left,
    Right,
}

impl Channel {
    fn index(self) -> usize {
        match self {
            Channel::Left => 0,
            Channel::Right => 1,
        }
    }
}

/// Parameters for one burst. `bandwidth` and `duration_s` fall back to
/// sensible defaults when absent.
#[derive(Debug, Clone, Copy)]
pub struct BurstSpec {
    pub channel: Channel,
    pub center_freq: f64,
    pub log_amplitude: f64,
    pub bandwidth: f64,
    pub duration_s: f64,
    pub sample_rate: f64,
}

impl BurstSpec {
    pub const DEFAULT_BANDWIDTH_HZ: f64 = 1000.0;
    pub const DEFAULT_DURATION_S: f64 = 0.05;
}

/// An equalization curve: piecewise-linear attenuation (as a
/// multiplicative gain, 1.0 = unity) sampled uniformly from 0 Hz to
/// Nyquist, loaded once at agent start.
#[derive(Debug, Clone)]
pub struct EqCurve {
    gains: Vec<f32>,
}

/// Number of uniformly-spaced frequency points an equalization curve is
/// resampled to on load, covering 0 Hz to Nyquist.
const EQ_CURVE_RESOLUTION: usize = 257;

impl EqCurve {
    pub fn new(gains: Vec<f32>) -> Self {
        EqCurve { gains }
    }

    /// Load a `freq,atten_db` CSV (one header-less or headered row per
    /// frequency point, attenuation in dB) and resample it onto
    /// [`EQ_CURVE_RESOLUTION`] uniformly-spaced points from 0 Hz to
    /// Nyquist, converting dB attenuation to a multiplicative linear gain
    /// the same way the original Pi-side equalizer did:
    /// `gain = 10^(-atten_db / 20)`.
    pub fn load_csv(path: &std::path::Path, sample_rate: f64) -> anyhow::Result<Self> {
        use anyhow::Context;
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading eq curve csv {}", path.display()))?;

        let mut points: Vec<(f64, f64)> = Vec::new();
        for line in text.lines() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let mut fields = line.split(',');
            let freq: f64 = match fields.next().and_then(|s| s.trim().parse().ok()) {
                Some(f) => f,
                None => continue, // header row
            };
            let atten: f64 = fields
                .next()
                .and_then(|s| s.trim().parse().ok())
                .with_context(|| format!("malformed eq curve row: {line}"))?;
            points.push((freq, atten));
        }
        anyhow::ensure!(!points.is_empty(), "eq curve csv {} has no data rows", path.display());
        points.sort_by(|a, b| a.0.partial_cmp(&b.0).unwrap());

        let nyquist = sample_rate / 2.0;
        let mut gains = Vec::with_capacity(EQ_CURVE_RESOLUTION);
        for i in 0..EQ_CURVE_RESOLUTION {
            let freq = nyquist * i as f64 / (EQ_CURVE_RESOLUTION - 1) as f64;
            let atten_db = interp(&points, freq);
            gains.push(10f64.powf(-atten_db / 20.0) as f32);
        }
        Ok(EqCurve { gains })
    }

    fn gain_at_bin(&self, bin: usize, n_bins: usize) -> f32 {
        if self.gains.is_empty() || n_bins <= 1 {
            return 1.0;
        }
        let pos = bin as f32 / (n_bins - 1) as f32 * (self.gains.len() - 1) as f32;
        let lo = pos.floor() as usize;
        let hi = (lo + 1).min(self.gains.len() - 1);
        let frac = pos - lo as f32;
        self.gains[lo] * (1.0 - frac) + self.gains[hi] * frac
    }

    /// Apply this curve to `samples` in place via FFT -> multiply -> IFFT.
    fn apply(&self, samples: &mut [f32]) {
        let n = samples.len();
        if n == 0 {
            return;
        }
        let mut planner = FftPlanner::<f32>::new();
        let fft = planner.plan_fft_forward(n);
        let ifft = planner.plan_fft_inverse(n);

        let mut buf: Vec<Complex32> = samples.iter().map(|s| Complex32::new(*s, 0.0)).collect();
        fft.process(&mut buf);

        let n_bins = n / 2 + 1;
        for (bin, c) in buf.iter_mut().enumerate() {
            let mirrored = if bin < n_bins { bin } else { n - bin };
            let gain = self.gain_at_bin(mirrored, n_bins);
            *c *= gain;
        }

        ifft.process(&mut buf);
        let scale = 1.0 / n as f32;
        for (s, c) in samples.iter_mut().zip(buf.iter()) {
            *s = c.re * scale;
        }
    }
}

/// Linear interpolation over sorted `(x, y)` points, clamping to the
/// first/last `y` outside the point range (matches `numpy.interp`).
fn interp(points: &[(f64, f64)], x: f64) -> f64 {
    if x <= points[0].0 {
        return points[0].1;
    }
    if x >= points[points.len() - 1].0 {
        return points[points.len() - 1].1;
    }
    let idx = points.partition_point(|(px, _)| *px <= x);
    let (x0, y0) = points[idx - 1];
    let (x1, y1) = points[idx];
    if (x1 - x0).abs() < f64::EPSILON {
        return y0;
    }
    y0 + (y1 - y0) * (x - x0) / (x1 - x0)
}

/// Synthesize one burst and partition it into zero-padded `N_BLOCK`-sample
/// frames, ready to be enqueued as-is.
pub fn synthesize_burst(spec: &BurstSpec, eq: Option<&EqCurve>) -> Vec<AudioFrame> {
    let n_samples = (spec.duration_s * spec.sample_rate).round().max(1.0) as usize;

    let mut mono: Vec<f32> = {
        let mut rng = rand::thread_rng();
        (0..n_samples)
            .map(|_| rng.gen_range(-1.0f32..=1.0f32))
            .collect()
    };

    let amplitude = 10f64.powf(spec.log_amplitude) as f32;
    for s in mono.iter_mut() {
        *s *= amplitude;
    }

    let mut bandpass = Bandpass::new(spec.center_freq, spec.bandwidth, spec.sample_rate);
    bandpass.process(&mut mono);

    if let Some(curve) = eq {
        curve.apply(&mut mono);
    }

    let n_frames = n_samples.div_ceil(N_BLOCK);
    let mut frames = Vec::with_capacity(n_frames);
    for chunk_idx in 0..n_frames {
        let start = chunk_idx * N_BLOCK;
        let end = (start + N_BLOCK).min(n_samples);
        let chunk = &mono[start..end];
        frames.push(match spec.channel.index() {
            0 => AudioFrame::from_channels(chunk, &[]),
            _ => AudioFrame::from_channels(&[], chunk),
        });
    }
    frames
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::N_BLOCK;

    fn spec(channel: Channel) -> BurstSpec {
        BurstSpec {
            channel,
            center_freq: 8000.0,
            log_amplitude: -2.0,
            bandwidth: BurstSpec::DEFAULT_BANDWIDTH_HZ,
            duration_s: BurstSpec::DEFAULT_DURATION_S,
            sample_rate: 44_100.0,
        }
    }

    #[test]
    fn burst_frames_are_exactly_n_block_stereo_samples() {
        let frames = synthesize_burst(&spec(Channel::Left), None);
        assert!(!frames.is_empty());
        for f in &frames {
            assert_eq!(f.as_slice().len(), N_BLOCK * 2);
        }
    }

    #[test]
    fn burst_frame_count_covers_requested_duration() {
        let s = spec(Channel::Left);
        let n_samples = (s.duration_s * s.sample_rate).round() as usize;
        let expected = n_samples.div_ceil(N_BLOCK);
        let frames = synthesize_burst(&s, None);
        assert_eq!(frames.len(), expected);
    }

    #[test]
    fn left_channel_burst_leaves_right_channel_silent() {
        let frames = synthesize_burst(&spec(Channel::Left), None);
        for f in &frames {
            assert!(f.channel(1).all(|s| s == 0.0));
        }
    }

    #[test]
    fn right_channel_burst_leaves_left_channel_silent() {
        let frames = synthesize_burst(&spec(Channel::Right), None);
        for f in &frames {
            assert!(f.channel(0).all(|s| s == 0.0));
        }
    }

    #[test]
    fn tail_frame_is_zero_padded_not_truncated() {
        let mut s = spec(Channel::Left);
        // duration that doesn't divide N_BLOCK evenly
        s.duration_s = (N_BLOCK as f64 * 1.5) / s.sample_rate;
        let frames = synthesize_burst(&s, None);
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[1].as_slice().len(), N_BLOCK * 2);
    }

    #[test]
    fn eq_curve_is_applied_without_changing_frame_shape() {
        let curve = EqCurve::new(vec![1.0, 0.5, 0.1]);
        let frames = synthesize_burst(&spec(Channel::Left), Some(&curve));
        for f in &frames {
            assert_eq!(f.as_slice().len(), N_BLOCK * 2);
        }
    }

    #[test]
    fn load_csv_converts_zero_attenuation_to_unity_gain() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("eq.csv");
        std::fs::write(&path, "freq,atten\n0,0\n22050,0\n").unwrap();
        let curve = EqCurve::load_csv(&path, 44_100.0).unwrap();
        assert_eq!(curve.gains.len(), EQ_CURVE_RESOLUTION);
        for g in &curve.gains {
            assert!((g - 1.0).abs() < 1e-4, "expected unity gain, got {g}");
        }
    }

    #[test]
    fn load_csv_converts_positive_attenuation_to_sub_unity_gain() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("eq.csv");
        std::fs::write(&path, "0,20\n22050,20\n").unwrap();
        let curve = EqCurve::load_csv(&path, 44_100.0).unwrap();
        for g in &curve.gains {
            assert!((g - 0.1).abs() < 1e-3, "expected 0.1 gain, got {g}");
        }
    }

    #[test]
    fn load_csv_rejects_empty_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("eq.csv");
        std::fs::write(&path, "freq,atten\n").unwrap();
        assert!(EqCurve::load_csv(&path, 44_100.0).is_err());
    }
}
