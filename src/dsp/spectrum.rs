//! FFT-based power-spectrum estimation and peak extraction.
//!
//! The scanner and watch engine both sit on top of these routines, so the
//! conventions match what downstream code expects: spectra are DC-centered
//! (fftshift applied), powers are in dB unless stated otherwise, and the
//! normalized frequency axis spans `[-0.5, 0.5]`.

use num_complex::Complex;
use rustfft::FftPlanner;
use serde::{Deserialize, Serialize};
use statrs::statistics::{Data, OrderStatistics};

use super::IqSample;
use crate::config::DEFAULT_FFT_SIZE;

/// Window function applied before the FFT.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum Window {
    Hamming,
    #[default]
    Hann,
    Blackman,
    Bartlett,
    None,
}

impl Window {
    /// Window coefficients for the given size.
    pub fn coefficients(self, size: usize) -> Vec<f64> {
        if size == 0 {
            return Vec::new();
        }
        if size == 1 {
            return vec![1.0];
        }
        let m = (size - 1) as f64;
        (0..size)
            .map(|i| {
                let x = i as f64 / m;
                let tw = 2.0 * std::f64::consts::PI * x;
                match self {
                    Self::Hamming => 0.54 - 0.46 * tw.cos(),
                    Self::Hann => 0.5 * (1.0 - tw.cos()),
                    Self::Blackman => 0.42 - 0.5 * tw.cos() + 0.08 * (2.0 * tw).cos(),
                    Self::Bartlett => 1.0 - (2.0 * x - 1.0).abs(),
                    Self::None => 1.0,
                }
            })
            .collect()
    }
}

/// Windowed complex DFT of the most recent `fft_size` samples.
///
/// Inputs longer than `fft_size` keep only the trailing block (the freshest
/// data); shorter inputs are zero-padded. With `shift` the zero-frequency
/// bin lands at the center of the output.
pub fn compute_fft(
    samples: &[IqSample],
    fft_size: usize,
    window: Window,
    shift: bool,
) -> Vec<Complex<f64>> {
    if fft_size == 0 {
        return Vec::new();
    }

    let start = samples.len().saturating_sub(fft_size);
    let coeffs = window.coefficients(fft_size);

    let mut buffer: Vec<Complex<f64>> = samples[start..]
        .iter()
        .zip(coeffs.iter())
        .map(|(s, &w)| Complex::new(f64::from(s.re) * w, f64::from(s.im) * w))
        .collect();
    buffer.resize(fft_size, Complex::new(0.0, 0.0));

    let mut planner = FftPlanner::new();
    let fft = planner.plan_fft_forward(fft_size);
    fft.process(&mut buffer);

    if shift {
        // fftshift: move the negative-frequency half in front of DC
        buffer.rotate_left(fft_size - fft_size / 2);
    }

    buffer
}

/// Power spectrum over the normalized frequency axis `[-0.5, 0.5]`.
///
/// Power is `|X[i]|^2 / fft_size`; with `log_scale` the result is converted
/// to dB as `10 log10(max(p, 1e-20))` so silent bins stay finite.
pub fn compute_power_spectrum(
    samples: &[IqSample],
    fft_size: usize,
    window: Window,
    log_scale: bool,
) -> (Vec<f64>, Vec<f64>) {
    let fft_result = compute_fft(samples, fft_size, window, true);
    let n = fft_result.len();
    if n == 0 {
        return (Vec::new(), Vec::new());
    }

    let power: Vec<f64> = fft_result
        .iter()
        .map(|x| {
            let p = x.norm_sqr() / n as f64;
            if log_scale {
                10.0 * p.max(1e-20).log10()
            } else {
                p
            }
        })
        .collect();

    let freqs = if n == 1 {
        vec![0.0]
    } else {
        (0..n).map(|i| -0.5 + i as f64 / (n - 1) as f64).collect()
    };

    (freqs, power)
}

/// Power spectrum with the frequency axis in absolute Hz.
pub fn compute_power_spectrum_hz(
    samples: &[IqSample],
    sample_rate: f64,
    center_freq: f64,
    fft_size: usize,
    window: Window,
) -> (Vec<f64>, Vec<f64>) {
    let (freqs_norm, power) = compute_power_spectrum(samples, fft_size, window, true);
    let freqs_hz = freqs_norm
        .iter()
        .map(|f| f * sample_rate + center_freq)
        .collect();
    (freqs_hz, power)
}

/// Time-frequency representation from overlapping FFT segments.
///
/// Returns `(segment start offsets in samples, normalized freqs, rows of
/// power in dB)`. `overlap` is the fraction of each segment shared with the
/// next, clamped so the hop is at least one sample.
pub fn compute_spectrogram(
    samples: &[IqSample],
    fft_size: usize,
    overlap: f64,
    window: Window,
) -> (Vec<f64>, Vec<f64>, Vec<Vec<f64>>) {
    if fft_size == 0 || samples.is_empty() {
        return (Vec::new(), Vec::new(), Vec::new());
    }

    let hop = ((fft_size as f64 * (1.0 - overlap.clamp(0.0, 0.99))) as usize).max(1);
    let num_segments = if samples.len() >= fft_size {
        (samples.len() - fft_size) / hop + 1
    } else {
        1
    };

    let mut rows = Vec::with_capacity(num_segments);
    let mut times = Vec::with_capacity(num_segments);
    let mut freqs = Vec::new();

    for i in 0..num_segments {
        let start = i * hop;
        let end = (start + fft_size).min(samples.len());
        let (f, power) = compute_power_spectrum(&samples[start..end], fft_size, window, true);
        if freqs.is_empty() {
            freqs = f;
        }
        times.push(start as f64);
        rows.push(power);
    }

    (times, freqs, rows)
}

/// Local maxima of a dB power spectrum.
///
/// A bin qualifies when it exceeds both neighbors and `threshold_db`.
/// Peaks within `min_distance` bins of a stronger peak are suppressed.
/// Returns `(bin_index, power_db)` pairs in ascending bin order.
pub fn find_peaks(
    power_spectrum: &[f64],
    threshold_db: f64,
    min_distance: usize,
) -> Vec<(usize, f64)> {
    if power_spectrum.len() < 3 {
        return Vec::new();
    }

    let mut candidates: Vec<(usize, f64)> = (1..power_spectrum.len() - 1)
        .filter(|&i| {
            power_spectrum[i] >= threshold_db
                && power_spectrum[i] > power_spectrum[i - 1]
                && power_spectrum[i] > power_spectrum[i + 1]
        })
        .map(|i| (i, power_spectrum[i]))
        .collect();

    // Strongest-first suppression of neighbors inside min_distance
    candidates.sort_by(|a, b| b.1.total_cmp(&a.1));
    let mut kept: Vec<(usize, f64)> = Vec::with_capacity(candidates.len());
    for (idx, p) in candidates {
        if kept
            .iter()
            .all(|&(k, _)| idx.abs_diff(k) >= min_distance.max(1))
        {
            kept.push((idx, p));
        }
    }
    kept.sort_by_key(|&(idx, _)| idx);
    kept
}

/// Noise floor estimate as a low percentile of the spectrum.
///
/// The 25th percentile is robust against strong in-band carriers, which only
/// occupy a small fraction of the bins.
pub fn estimate_noise_floor(power_spectrum: &[f64], percentile: f64) -> f64 {
    if power_spectrum.is_empty() {
        return -60.0;
    }
    let mut data = Data::new(power_spectrum.to_vec());
    data.percentile(percentile.clamp(0.0, 100.0) as usize)
}

/// Signal-to-noise estimate in dB.
///
/// Without explicit `signal_bins` the center quarter of the spectrum is
/// treated as signal and the noise floor as reference.
pub fn signal_to_noise(power_spectrum: &[f64], signal_bins: Option<(usize, usize)>) -> f64 {
    if power_spectrum.is_empty() {
        return 0.0;
    }

    let (start, end) = signal_bins.unwrap_or_else(|| {
        let center = power_spectrum.len() / 2;
        let width = power_spectrum.len() / 8;
        (center.saturating_sub(width), center + width)
    });
    let end = end.min(power_spectrum.len());
    let start = start.min(end);

    let noise_floor = estimate_noise_floor(power_spectrum, 25.0);
    let signal_power = power_spectrum[start..end]
        .iter()
        .copied()
        .fold(f64::NEG_INFINITY, f64::max);

    if signal_power.is_finite() {
        signal_power - noise_floor
    } else {
        0.0
    }
}
