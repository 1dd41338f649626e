//! Audio and RF filters.
//!
//! Butterworth responses are realised as cascaded biquad sections (RBJ
//! cookbook coefficients, one first-order section for odd orders) applied
//! with zero initial state, so repeated calls on independent buffers are
//! reproducible. Normalized cutoffs are expressed relative to Nyquist and
//! clamped to `(0.001, 0.999)`.

use crate::config::{DEEMPHASIS_TAU_US, FM_AUDIO_RATE};

const MIN_NORM_CUTOFF: f64 = 0.001;
const MAX_NORM_CUTOFF: f64 = 0.999;

/// Direct-form biquad section with persistent state.
#[derive(Debug, Clone)]
struct Biquad {
    b0: f64,
    b1: f64,
    b2: f64,
    a1: f64,
    a2: f64,
    x1: f64,
    x2: f64,
    y1: f64,
    y2: f64,
}

impl Biquad {
    fn lowpass(cutoff_norm: f64, q: f64) -> Self {
        let w0 = std::f64::consts::PI * cutoff_norm.clamp(MIN_NORM_CUTOFF, MAX_NORM_CUTOFF);
        let alpha = w0.sin() / (2.0 * q);
        let cos_w0 = w0.cos();
        let a0 = 1.0 + alpha;
        Self {
            b0: (1.0 - cos_w0) / 2.0 / a0,
            b1: (1.0 - cos_w0) / a0,
            b2: (1.0 - cos_w0) / 2.0 / a0,
            a1: -2.0 * cos_w0 / a0,
            a2: (1.0 - alpha) / a0,
            x1: 0.0,
            x2: 0.0,
            y1: 0.0,
            y2: 0.0,
        }
    }

    fn highpass(cutoff_norm: f64, q: f64) -> Self {
        let w0 = std::f64::consts::PI * cutoff_norm.clamp(MIN_NORM_CUTOFF, MAX_NORM_CUTOFF);
        let alpha = w0.sin() / (2.0 * q);
        let cos_w0 = w0.cos();
        let a0 = 1.0 + alpha;
        Self {
            b0: (1.0 + cos_w0) / 2.0 / a0,
            b1: -(1.0 + cos_w0) / a0,
            b2: (1.0 + cos_w0) / 2.0 / a0,
            a1: -2.0 * cos_w0 / a0,
            a2: (1.0 - alpha) / a0,
            x1: 0.0,
            x2: 0.0,
            y1: 0.0,
            y2: 0.0,
        }
    }

    fn process(&mut self, x: f64) -> f64 {
        let y = self.b0 * x + self.b1 * self.x1 + self.b2 * self.x2
            - self.a1 * self.y1
            - self.a2 * self.y2;
        self.x2 = self.x1;
        self.x1 = x;
        self.y2 = self.y1;
        self.y1 = y;
        y
    }
}

/// Single-pole section from the bilinear transform of `1/(1 + s/wc)`.
#[derive(Debug, Clone)]
struct OnePole {
    b0: f64,
    b1: f64,
    a1: f64,
    x1: f64,
    y1: f64,
}

impl OnePole {
    fn lowpass(cutoff_norm: f64) -> Self {
        let w0 = std::f64::consts::PI * cutoff_norm.clamp(MIN_NORM_CUTOFF, MAX_NORM_CUTOFF);
        let k = (w0 / 2.0).tan();
        Self {
            b0: k / (k + 1.0),
            b1: k / (k + 1.0),
            a1: (k - 1.0) / (k + 1.0),
            x1: 0.0,
            y1: 0.0,
        }
    }

    fn highpass(cutoff_norm: f64) -> Self {
        let w0 = std::f64::consts::PI * cutoff_norm.clamp(MIN_NORM_CUTOFF, MAX_NORM_CUTOFF);
        let k = (w0 / 2.0).tan();
        Self {
            b0: 1.0 / (k + 1.0),
            b1: -1.0 / (k + 1.0),
            a1: (k - 1.0) / (k + 1.0),
            x1: 0.0,
            y1: 0.0,
        }
    }

    fn process(&mut self, x: f64) -> f64 {
        let y = self.b0 * x + self.b1 * self.x1 - self.a1 * self.y1;
        self.x1 = x;
        self.y1 = y;
        y
    }
}

/// Butterworth stage Q values for a cascade of biquads.
///
/// `Q_k = 1 / (2 cos((2k - 1) pi / 2N))` for the conjugate pole pairs; odd
/// orders carry one extra real pole handled by a first-order section.
fn butterworth_stage_qs(order: usize) -> Vec<f64> {
    (1..=order / 2)
        .map(|k| {
            let theta = (2 * k - 1) as f64 * std::f64::consts::PI / (2.0 * order as f64);
            1.0 / (2.0 * theta.cos())
        })
        .collect()
}

fn apply_butterworth(samples: &[f64], cutoff_norm: f64, order: usize, high: bool) -> Vec<f64> {
    if samples.is_empty() {
        return Vec::new();
    }
    let order = order.max(1);

    let mut biquads: Vec<Biquad> = butterworth_stage_qs(order)
        .into_iter()
        .map(|q| {
            if high {
                Biquad::highpass(cutoff_norm, q)
            } else {
                Biquad::lowpass(cutoff_norm, q)
            }
        })
        .collect();
    let mut one_pole = (order % 2 == 1).then(|| {
        if high {
            OnePole::highpass(cutoff_norm)
        } else {
            OnePole::lowpass(cutoff_norm)
        }
    });

    samples
        .iter()
        .map(|&x| {
            let mut y = x;
            for stage in &mut biquads {
                y = stage.process(y);
            }
            if let Some(pole) = one_pole.as_mut() {
                y = pole.process(y);
            }
            y
        })
        .collect()
}

/// Butterworth low-pass at `cutoff_hz`.
pub fn lowpass_filter(samples: &[f64], cutoff_hz: f64, sample_rate: f64, order: usize) -> Vec<f64> {
    let nyquist = sample_rate / 2.0;
    apply_butterworth(samples, cutoff_hz / nyquist, order, false)
}

/// Butterworth high-pass at `cutoff_hz`.
pub fn highpass_filter(
    samples: &[f64],
    cutoff_hz: f64,
    sample_rate: f64,
    order: usize,
) -> Vec<f64> {
    let nyquist = sample_rate / 2.0;
    apply_butterworth(samples, cutoff_hz / nyquist, order, true)
}

/// Band-pass as a high-pass/low-pass cascade.
///
/// Returns the input unchanged when the clamped edges cross.
pub fn bandpass_filter(
    samples: &[f64],
    low_hz: f64,
    high_hz: f64,
    sample_rate: f64,
    order: usize,
) -> Vec<f64> {
    let nyquist = sample_rate / 2.0;
    let low = (low_hz / nyquist).clamp(MIN_NORM_CUTOFF, MAX_NORM_CUTOFF);
    let high = (high_hz / nyquist).clamp(MIN_NORM_CUTOFF, MAX_NORM_CUTOFF);
    if low >= high {
        return samples.to_vec();
    }
    let highpassed = apply_butterworth(samples, low, order, true);
    apply_butterworth(&highpassed, high, order, false)
}

/// DC removal with a slow recursive tracker: `y[n] = x[n] - x[n-1] + a y[n-1]`.
pub fn dc_block(samples: &[f64], alpha: f64) -> Vec<f64> {
    let mut prev_in = 0.0;
    let mut prev_out = 0.0;
    samples
        .iter()
        .map(|&x| {
            let y = x - prev_in + alpha * prev_out;
            prev_in = x;
            prev_out = y;
            y
        })
        .collect()
}

/// Fast DC removal by subtracting the buffer mean.
pub fn dc_block_fast(samples: &[f64]) -> Vec<f64> {
    if samples.is_empty() {
        return Vec::new();
    }
    let mean = samples.iter().sum::<f64>() / samples.len() as f64;
    samples.iter().map(|&x| x - mean).collect()
}

/// FM de-emphasis: bilinear transform of `H(s) = 1 / (1 + s tau)`.
///
/// `tau_us` is 75 for US/Korea broadcast, 50 for Europe.
pub fn deemphasis_filter(samples: &[f64], sample_rate: f64, tau_us: f64) -> Vec<f64> {
    let tau = tau_us * 1e-6;
    let w0 = 1.0 / tau;
    let alpha = w0 / (2.0 * sample_rate);
    let a0 = 1.0 + alpha;

    let mut x1 = 0.0;
    let mut y1 = 0.0;
    samples
        .iter()
        .map(|&x| {
            let y = (alpha * (x + x1) + (1.0 - alpha) * y1) / a0;
            x1 = x;
            y1 = y;
            y
        })
        .collect()
}

/// De-emphasis at the default broadcast time constant.
pub fn deemphasis_default(samples: &[f64]) -> Vec<f64> {
    deemphasis_filter(samples, f64::from(FM_AUDIO_RATE), DEEMPHASIS_TAU_US)
}

/// Integer-factor decimation with an anti-alias low-pass ahead of the
/// downsampling stride.
pub fn decimate(samples: &[f64], factor: usize) -> Vec<f64> {
    if factor <= 1 || samples.is_empty() {
        return samples.to_vec();
    }
    let filtered = apply_butterworth(samples, 0.8 / factor as f64, 5, false);
    filtered.iter().copied().step_by(factor).collect()
}

const RESAMPLE_TAPS: usize = 32;
const RESAMPLE_PHASES: usize = 64;

fn windowed_sinc_bank(cutoff: f64) -> Vec<[f64; RESAMPLE_TAPS]> {
    let anchor = (RESAMPLE_TAPS / 2 - 1) as f64;
    (0..RESAMPLE_PHASES)
        .map(|phase_idx| {
            let frac = phase_idx as f64 / RESAMPLE_PHASES as f64;
            let center = anchor + frac;
            let mut phase = [0.0; RESAMPLE_TAPS];
            let mut sum = 0.0;
            for (tap_idx, coeff) in phase.iter_mut().enumerate() {
                let x = tap_idx as f64 - center;
                let sinc = if x.abs() < 1e-9 {
                    cutoff
                } else {
                    (std::f64::consts::PI * x * cutoff).sin() / (std::f64::consts::PI * x)
                };
                let pos = tap_idx as f64 / (RESAMPLE_TAPS - 1) as f64;
                let tw = 2.0 * std::f64::consts::PI * pos;
                let window = 0.54 - 0.46 * tw.cos();
                *coeff = sinc * window;
                sum += *coeff;
            }
            if sum.abs() > 1e-12 {
                for coeff in &mut phase {
                    *coeff /= sum;
                }
            }
            phase
        })
        .collect()
}

/// Polyphase resampling to a new rate via a windowed-sinc phase bank.
pub fn resample(samples: &[f64], input_rate: f64, output_rate: f64) -> Vec<f64> {
    if samples.is_empty() || (input_rate - output_rate).abs() < f64::EPSILON {
        return samples.to_vec();
    }

    let ratio = output_rate / input_rate;
    let cutoff = ratio.min(1.0);
    let bank = windowed_sinc_bank(cutoff);
    let out_len = (samples.len() as f64 * ratio) as usize;
    let anchor = RESAMPLE_TAPS / 2 - 1;

    (0..out_len)
        .map(|n| {
            let t = n as f64 / ratio;
            let base = t.floor() as usize;
            let frac = t - base as f64;
            let phase_idx =
                ((frac * RESAMPLE_PHASES as f64).round() as usize).min(RESAMPLE_PHASES - 1);
            let coeffs = &bank[phase_idx];
            let mut acc = 0.0;
            for (tap, &c) in coeffs.iter().enumerate() {
                let idx = base as isize + tap as isize - anchor as isize;
                if idx >= 0 && (idx as usize) < samples.len() {
                    acc += samples[idx as usize] * c;
                }
            }
            acc
        })
        .collect()
}

/// Same-length moving-average smoothing.
pub fn moving_average(samples: &[f64], window_size: usize) -> Vec<f64> {
    if window_size <= 1 || samples.is_empty() {
        return samples.to_vec();
    }
    let half = window_size / 2;
    (0..samples.len())
        .map(|i| {
            let start = i.saturating_sub(half);
            let end = (i + window_size - half).min(samples.len());
            samples[start..end].iter().sum::<f64>() / (end - start) as f64
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use approx::assert_abs_diff_eq;

    use super::*;

    fn tone(freq_hz: f64, sample_rate: f64, n: usize) -> Vec<f64> {
        (0..n)
            .map(|i| (2.0 * std::f64::consts::PI * freq_hz * i as f64 / sample_rate).sin())
            .collect()
    }

    fn rms(samples: &[f64]) -> f64 {
        (samples.iter().map(|x| x * x).sum::<f64>() / samples.len() as f64).sqrt()
    }

    #[test]
    fn lowpass_attenuates_out_of_band_tone() {
        let fs = 48_000.0;
        let in_band = tone(1_000.0, fs, 4096);
        let out_of_band = tone(20_000.0, fs, 4096);

        let passed = lowpass_filter(&in_band, 5_000.0, fs, 5);
        let stopped = lowpass_filter(&out_of_band, 5_000.0, fs, 5);

        // Skip the transient head before measuring
        assert!(rms(&passed[512..]) > 0.6);
        assert!(rms(&stopped[512..]) < 0.05);
    }

    #[test]
    fn highpass_removes_low_tone() {
        let fs = 48_000.0;
        let low = tone(100.0, fs, 8192);
        let filtered = highpass_filter(&low, 2_000.0, fs, 5);
        assert!(rms(&filtered[1024..]) < 0.05);
    }

    #[test]
    fn bandpass_returns_input_when_edges_cross() {
        let samples = tone(1_000.0, 48_000.0, 256);
        let result = bandpass_filter(&samples, 5_000.0, 3_000.0, 48_000.0, 5);
        assert_eq!(result, samples);
    }

    #[test]
    fn dc_block_fast_zeroes_mean() {
        let samples: Vec<f64> = tone(440.0, 48_000.0, 2048).iter().map(|x| x + 3.5).collect();
        let blocked = dc_block_fast(&samples);
        let mean = blocked.iter().sum::<f64>() / blocked.len() as f64;
        assert_abs_diff_eq!(mean, 0.0, epsilon = 1e-9);
    }

    #[test]
    fn recursive_dc_block_converges() {
        let samples = vec![1.0; 8192];
        let blocked = dc_block(&samples, 0.995);
        assert!(blocked[8191].abs() < 0.01);
    }

    #[test]
    fn deemphasis_attenuates_treble_more_than_bass() {
        let fs = 48_000.0;
        let bass = deemphasis_filter(&tone(300.0, fs, 8192), fs, 75.0);
        let treble = deemphasis_filter(&tone(10_000.0, fs, 8192), fs, 75.0);
        assert!(rms(&bass[1024..]) > 3.0 * rms(&treble[1024..]));
    }

    #[test]
    fn decimate_reduces_length_by_factor() {
        let samples = tone(1_000.0, 48_000.0, 4800);
        let decimated = decimate(&samples, 4);
        assert_eq!(decimated.len(), 1200);
    }

    #[test]
    fn resample_scales_length_by_ratio() {
        let samples = tone(440.0, 48_000.0, 4800);
        let resampled = resample(&samples, 48_000.0, 12_000.0);
        assert_eq!(resampled.len(), 1200);

        let upsampled = resample(&samples, 12_000.0, 48_000.0);
        assert_eq!(upsampled.len(), 4800 * 4);
    }

    #[test]
    fn resample_preserves_tone_amplitude() {
        let fs = 48_000.0;
        let samples = tone(1_000.0, fs, 9600);
        let resampled = resample(&samples, fs, 24_000.0);
        assert_abs_diff_eq!(
            rms(&resampled[256..resampled.len() - 256]),
            rms(&samples),
            epsilon = 0.05
        );
    }

    #[test]
    fn moving_average_flattens_noise() {
        let samples: Vec<f64> = (0..100).map(|i| if i % 2 == 0 { 1.0 } else { -1.0 }).collect();
        let smoothed = moving_average(&samples, 10);
        assert_eq!(smoothed.len(), samples.len());
        assert!(smoothed[50].abs() < 0.2);
    }
}
