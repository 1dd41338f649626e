//! Spectrum scanner: walk a frequency range and extract signal peaks.
//!
//! The scanner owns no hardware; it drives whatever [`Tuner`] it is handed.
//! Holding `&mut dyn Tuner` for the duration of a scan also keeps the
//! tuner-singleton rule honest by excluding every other subsystem.

use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::config::{
    DEFAULT_FFT_SIZE, DEFAULT_THRESHOLD_DB, FREQUENCY_TOLERANCE_HZ, PLL_SETTLE_MS,
};
use crate::device::{DeviceError, Tuner};
use crate::dsp::{compute_power_spectrum, estimate_noise_floor, find_peaks, IqSample, Window};

/// Transient USB read retries per scan step.
const MAX_READ_RETRIES: u32 = 3;

/// A detected signal peak. Immutable value.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SignalPeak {
    pub frequency_hz: f64,
    pub power_db: f64,
    pub bandwidth_hz: Option<f64>,
}

impl SignalPeak {
    pub fn new(frequency_hz: f64, power_db: f64) -> Self {
        Self {
            frequency_hz,
            power_db,
            bandwidth_hz: None,
        }
    }
}

impl std::fmt::Display for SignalPeak {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{:.3} MHz @ {:.1} dB",
            self.frequency_hz / 1e6,
            self.power_db
        )
    }
}

/// Result of a spectrum scan. Peaks are ordered by power, strongest first.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanResult {
    pub start_freq_hz: f64,
    pub end_freq_hz: f64,
    pub step_hz: f64,
    pub peaks: Vec<SignalPeak>,
    pub noise_floor_db: f64,
    pub scan_time_seconds: f64,
}

/// Configurable spectrum scanner.
#[derive(Debug, Clone)]
pub struct SpectrumScanner {
    pub fft_size: usize,
    pub window: Window,
    pub threshold_db: f64,
    /// Minimum peak separation passed to the peak finder (bins).
    pub min_peak_distance: usize,
}

impl Default for SpectrumScanner {
    fn default() -> Self {
        Self {
            fft_size: DEFAULT_FFT_SIZE,
            window: Window::Hann,
            threshold_db: DEFAULT_THRESHOLD_DB,
            min_peak_distance: 10,
        }
    }
}

impl SpectrumScanner {
    pub fn with_threshold(threshold_db: f64) -> Self {
        Self {
            threshold_db,
            ..Self::default()
        }
    }

    /// Scan `[start_hz, end_hz]` by stepping the tuner across the range.
    ///
    /// `step_hz` defaults to 80% of the tuner sample rate so adjacent steps
    /// overlap and no band edge is lost to filter roll-off. Any tuner
    /// failure aborts the scan; there is no partial result.
    pub fn scan(
        &self,
        tuner: &mut dyn Tuner,
        start_hz: f64,
        end_hz: f64,
        step_hz: Option<f64>,
        dwell_time_ms: f64,
    ) -> Result<ScanResult, DeviceError> {
        let sample_rate = tuner.sample_rate();
        let step_hz = step_hz.unwrap_or(sample_rate * 0.8);
        let num_steps = ((end_hz - start_hz) / step_hz).ceil() as usize + 1;
        let samples_per_step = (sample_rate * dwell_time_ms / 1000.0) as usize;

        info!(
            "scanning {:.1}-{:.1} MHz in {} steps",
            start_hz / 1e6,
            end_hz / 1e6,
            num_steps
        );

        let scan_start = Instant::now();
        let mut all_peaks: Vec<SignalPeak> = Vec::new();
        let mut noise_floors: Vec<f64> = Vec::new();

        for i in 0..num_steps {
            let center_freq = start_hz + i as f64 * step_hz;
            tuner.set_center_freq(center_freq)?;
            std::thread::sleep(Duration::from_millis(PLL_SETTLE_MS));

            let samples = self.read_with_retry(tuner, samples_per_step)?;
            let (freqs_norm, power) =
                compute_power_spectrum(&samples, self.fft_size, self.window, true);

            for (bin_idx, peak_power) in
                find_peaks(&power, self.threshold_db, self.min_peak_distance)
            {
                let abs_freq = center_freq + freqs_norm[bin_idx] * sample_rate;
                if (start_hz..=end_hz).contains(&abs_freq) {
                    all_peaks.push(SignalPeak::new(abs_freq, peak_power));
                }
            }

            noise_floors.push(estimate_noise_floor(&power, 25.0));
            debug!("step {}/{} at {:.3} MHz", i + 1, num_steps, center_freq / 1e6);
        }

        let mut peaks = merge_peaks(all_peaks, FREQUENCY_TOLERANCE_HZ);
        peaks.sort_by(|a, b| b.power_db.total_cmp(&a.power_db));

        let noise_floor_db = if noise_floors.is_empty() {
            -60.0
        } else {
            noise_floors.iter().sum::<f64>() / noise_floors.len() as f64
        };

        Ok(ScanResult {
            start_freq_hz: start_hz,
            end_freq_hz: end_hz,
            step_hz,
            peaks,
            noise_floor_db,
            scan_time_seconds: scan_start.elapsed().as_secs_f64(),
        })
    }

    /// Single power-spectrum pass at one center frequency, no retuning loop.
    pub fn quick_scan(
        &self,
        tuner: &mut dyn Tuner,
        center_freq_hz: f64,
    ) -> Result<Vec<SignalPeak>, DeviceError> {
        tuner.set_center_freq(center_freq_hz)?;
        std::thread::sleep(Duration::from_millis(PLL_SETTLE_MS));

        let sample_rate = tuner.sample_rate();
        let samples = self.read_with_retry(tuner, self.fft_size * 4)?;
        let (freqs_norm, power) = compute_power_spectrum(&samples, self.fft_size, self.window, true);

        Ok(
            find_peaks(&power, self.threshold_db, self.min_peak_distance)
                .into_iter()
                .map(|(idx, pwr)| {
                    SignalPeak::new(center_freq_hz + freqs_norm[idx] * sample_rate, pwr)
                })
                .collect(),
        )
    }

    /// Scan the FM broadcast band (87.5-108 MHz).
    pub fn scan_fm_band(&self, tuner: &mut dyn Tuner) -> Result<ScanResult, DeviceError> {
        self.scan(tuner, 87.5e6, 108.0e6, Some(200e3), 100.0)
    }

    fn read_with_retry(
        &self,
        tuner: &mut dyn Tuner,
        n: usize,
    ) -> Result<Vec<IqSample>, DeviceError> {
        let mut attempt = 0;
        loop {
            match tuner.read_samples(n) {
                Ok(samples) => return Ok(samples),
                Err(e) if e.is_transient() && attempt < MAX_READ_RETRIES => {
                    attempt += 1;
                    debug!("transient read error, retry {attempt}: {e}");
                }
                Err(e) => return Err(e),
            }
        }
    }
}

/// Merge peaks closer than `merge_threshold_hz` into one.
///
/// Peaks observed in overlapping step windows show up twice at slightly
/// different frequencies; each merge places the survivor at the midpoint and
/// keeps the higher power. The output is sorted by frequency and consecutive
/// entries are always at least `merge_threshold_hz` apart, so a second merge
/// pass is a no-op.
pub fn merge_peaks(peaks: Vec<SignalPeak>, merge_threshold_hz: f64) -> Vec<SignalPeak> {
    if peaks.is_empty() {
        return peaks;
    }

    let mut sorted = peaks;
    sorted.sort_by(|a, b| a.frequency_hz.total_cmp(&b.frequency_hz));

    let mut merged: Vec<SignalPeak> = Vec::with_capacity(sorted.len());
    let mut current = sorted[0];

    for peak in sorted.into_iter().skip(1) {
        if peak.frequency_hz - current.frequency_hz < merge_threshold_hz {
            current = SignalPeak {
                frequency_hz: (current.frequency_hz + peak.frequency_hz) / 2.0,
                power_db: current.power_db.max(peak.power_db),
                bandwidth_hz: current.bandwidth_hz.or(peak.bandwidth_hz),
            };
        } else {
            merged.push(current);
            current = peak;
        }
    }
    merged.push(current);
    merged
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn merge_combines_nearby_peaks_at_midpoint() {
        let peaks = vec![
            SignalPeak::new(100.00e6, -25.0),
            SignalPeak::new(100.03e6, -20.0),
            SignalPeak::new(101.00e6, -15.0),
        ];
        let merged = merge_peaks(peaks, 50_000.0);
        assert_eq!(merged.len(), 2);
        assert!((merged[0].frequency_hz - 100.015e6).abs() < 1.0);
        assert!((merged[0].power_db - -20.0).abs() < f64::EPSILON);
        assert!((merged[1].frequency_hz - 101.0e6).abs() < 1.0);
    }

    #[test]
    fn merge_is_idempotent() {
        let peaks: Vec<SignalPeak> = (0..20)
            .map(|i| SignalPeak::new(88.0e6 + f64::from(i) * 30_000.0, -30.0 + f64::from(i)))
            .collect();

        let once = merge_peaks(peaks, 50_000.0);
        let twice = merge_peaks(once.clone(), 50_000.0);
        assert_eq!(once, twice);
    }

    #[test]
    fn merge_of_empty_is_empty() {
        assert!(merge_peaks(Vec::new(), 50_000.0).is_empty());
    }
}
