//! Spectrum baseline learning and anomaly queries.
//!
//! Instead of hardcoded expectations, a watch learns each band's normal
//! population of emitters during a commissioning window and answers four
//! queries against it afterwards:
//!
//! - is this peak a **new signal**?
//! - does this peak's **power deviate** from its history?
//! - which stable signals have gone **missing**?
//! - how much has **total band activity** changed?
//!
//! Buckets are integer keys `floor(freq / tolerance)`; lookups probe the
//! bucket and both neighbors, never a range scan.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};
use statrs::statistics::Statistics;
use tracing::info;

use crate::config::FREQUENCY_TOLERANCE_HZ;
use crate::scanner::{ScanResult, SignalPeak};

/// Scans required before the baseline is considered established.
pub const DEFAULT_MIN_SCANS: u32 = 12;

/// Power deviation that counts as anomalous (dB).
pub const DEFAULT_POWER_DEVIATION_DB: f64 = 6.0;

/// Consecutive misses before a stable signal is reported lost.
pub const DEFAULT_MISS_THRESHOLD: u32 = 3;

/// Power history for one tracked signal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignalHistory {
    pub frequency_hz: f64,
    pub power_samples: Vec<f64>,
    pub last_seen_scan: u32,
    pub consecutive_misses: u32,
}

impl SignalHistory {
    fn new(frequency_hz: f64, power_db: f64, scan: u32) -> Self {
        Self {
            frequency_hz,
            power_samples: vec![power_db],
            last_seen_scan: scan,
            consecutive_misses: 0,
        }
    }

    /// Average power in dB, floor value when empty.
    pub fn average_power(&self) -> f64 {
        if self.power_samples.is_empty() {
            return -60.0;
        }
        self.power_samples.iter().copied().mean()
    }

    /// Sample standard deviation of the power history.
    pub fn power_std(&self) -> f64 {
        if self.power_samples.len() < 2 {
            return 0.0;
        }
        self.power_samples.iter().copied().std_dev()
    }

    /// Consistently present: three or more samples and no current misses.
    pub fn is_stable(&self) -> bool {
        self.power_samples.len() >= 3 && self.consecutive_misses == 0
    }
}

/// Learned per-frequency power distribution for a watched band.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpectrumBaseline {
    pub tolerance_hz: f64,
    pub min_scans_required: u32,
    pub power_deviation_threshold_db: f64,
    pub miss_threshold: u32,

    pub scan_count: u32,
    pub established: bool,
    pub total_power_history: Vec<f64>,
    pub signals: HashMap<i64, SignalHistory>,
}

impl Default for SpectrumBaseline {
    fn default() -> Self {
        Self::new(FREQUENCY_TOLERANCE_HZ, DEFAULT_MIN_SCANS)
    }
}

impl SpectrumBaseline {
    pub fn new(tolerance_hz: f64, min_scans_required: u32) -> Self {
        Self {
            tolerance_hz,
            min_scans_required,
            power_deviation_threshold_db: DEFAULT_POWER_DEVIATION_DB,
            miss_threshold: DEFAULT_MISS_THRESHOLD,
            scan_count: 0,
            established: false,
            total_power_history: Vec::new(),
            signals: HashMap::new(),
        }
    }

    fn freq_key(&self, freq_hz: f64) -> i64 {
        (freq_hz / self.tolerance_hz).floor() as i64
    }

    /// Key of the tracked signal matching `freq_hz`, probing the bucket and
    /// both neighbors. EW frequency updates can drift an entry toward a
    /// bucket edge, which the neighbor probe absorbs.
    fn find_matching_key(&self, freq_hz: f64) -> Option<i64> {
        let key = self.freq_key(freq_hz);
        [key - 1, key, key + 1].into_iter().find(|k| {
            self.signals
                .get(k)
                .is_some_and(|sig| (sig.frequency_hz - freq_hz).abs() <= self.tolerance_hz)
        })
    }

    fn find_matching(&self, freq_hz: f64) -> Option<&SignalHistory> {
        self.find_matching_key(freq_hz)
            .and_then(|k| self.signals.get(&k))
    }

    /// Ingest one scan into the baseline.
    pub fn add_scan(&mut self, result: &ScanResult) {
        self.scan_count += 1;
        let mut seen_keys: HashSet<i64> = HashSet::new();

        for peak in &result.peaks {
            if let Some(key) = self.find_matching_key(peak.frequency_hz) {
                seen_keys.insert(key);
                if let Some(sig) = self.signals.get_mut(&key) {
                    sig.power_samples.push(peak.power_db);
                    sig.last_seen_scan = self.scan_count;
                    sig.consecutive_misses = 0;
                    sig.frequency_hz = sig.frequency_hz * 0.9 + peak.frequency_hz * 0.1;
                }
            } else {
                let key = self.freq_key(peak.frequency_hz);
                seen_keys.insert(key);
                self.signals.insert(
                    key,
                    SignalHistory::new(peak.frequency_hz, peak.power_db, self.scan_count),
                );
            }
        }

        for (key, sig) in &mut self.signals {
            if !seen_keys.contains(key) && self.scan_count > sig.last_seen_scan {
                sig.consecutive_misses += 1;
            }
        }

        if !result.peaks.is_empty() {
            let total: f64 = result
                .peaks
                .iter()
                .map(|p| 10.0_f64.powf(p.power_db / 10.0))
                .sum();
            self.total_power_history.push(total);
        }

        if self.scan_count >= self.min_scans_required && !self.established {
            self.established = true;
            let stable = self.signals.values().filter(|s| s.is_stable()).count();
            info!(
                "baseline established: {} signals tracked, {} stable",
                self.signals.len(),
                stable
            );
        }
    }

    /// True when the peak matches nothing in the baseline. Always false
    /// before the baseline is established.
    pub fn is_new_signal(&self, peak: &SignalPeak) -> bool {
        self.established && self.find_matching(peak.frequency_hz).is_none()
    }

    /// Deviation of the peak's power from its tracked average, or `None`
    /// when the peak is not in the baseline.
    pub fn get_power_deviation(&self, peak: &SignalPeak) -> Option<f64> {
        let sig = self.find_matching(peak.frequency_hz)?;
        if sig.power_samples.is_empty() {
            return None;
        }
        Some(peak.power_db - sig.average_power())
    }

    /// True when the peak's power deviates beyond the configured threshold.
    pub fn is_power_anomaly(&self, peak: &SignalPeak) -> bool {
        self.get_power_deviation(peak)
            .is_some_and(|d| d.abs() > self.power_deviation_threshold_db)
    }

    /// Stable baseline signals not matched by any peak in the scan whose
    /// miss counter has reached the threshold. `(frequency_hz, avg_power)`.
    pub fn get_missing_signals(&self, result: &ScanResult) -> Vec<(f64, f64)> {
        if !self.established {
            return Vec::new();
        }

        self.signals
            .values()
            .filter(|sig| sig.consecutive_misses >= self.miss_threshold)
            .filter(|sig| sig.power_samples.len() >= 3)
            .filter(|sig| {
                !result
                    .peaks
                    .iter()
                    .any(|p| (p.frequency_hz - sig.frequency_hz).abs() <= self.tolerance_hz)
            })
            .map(|sig| (sig.frequency_hz, sig.average_power()))
            .collect()
    }

    /// Percentage change in total band power against the baseline average.
    ///
    /// Returns -100 on complete silence and 0 when the baseline has no
    /// power history to compare against.
    pub fn get_activity_change(&self, result: &ScanResult, band: Option<(f64, f64)>) -> f64 {
        if !self.established || self.total_power_history.is_empty() {
            return 0.0;
        }

        let peaks: Vec<&SignalPeak> = match band {
            Some((start, end)) => result
                .peaks
                .iter()
                .filter(|p| (start..=end).contains(&p.frequency_hz))
                .collect(),
            None => result.peaks.iter().collect(),
        };

        if peaks.is_empty() {
            return -100.0;
        }

        let current: f64 = peaks
            .iter()
            .map(|p| 10.0_f64.powf(p.power_db / 10.0))
            .sum();
        let baseline_avg = self.total_power_history.iter().copied().mean();
        if baseline_avg == 0.0 {
            return 0.0;
        }

        (current - baseline_avg) / baseline_avg * 100.0
    }

    /// All stable signals as `(frequency_hz, average_power_db)`.
    pub fn get_baseline_signals(&self) -> Vec<(f64, f64)> {
        self.signals
            .values()
            .filter(|s| s.is_stable())
            .map(|s| (s.frequency_hz, s.average_power()))
            .collect()
    }

    /// Drop all learned state.
    pub fn clear(&mut self) {
        self.signals.clear();
        self.total_power_history.clear();
        self.scan_count = 0;
        self.established = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scan_with(peaks: Vec<SignalPeak>) -> ScanResult {
        ScanResult {
            start_freq_hz: 88.0e6,
            end_freq_hz: 108.0e6,
            step_hz: 2e6,
            peaks,
            noise_floor_db: -60.0,
            scan_time_seconds: 0.1,
        }
    }

    fn steady_peaks() -> Vec<SignalPeak> {
        vec![
            SignalPeak::new(95.5e6, -20.0),
            SignalPeak::new(101.1e6, -25.0),
        ]
    }

    #[test]
    fn established_after_min_scans() {
        let mut baseline = SpectrumBaseline::new(50_000.0, 12);
        for _ in 0..11 {
            baseline.add_scan(&scan_with(steady_peaks()));
            assert!(!baseline.established);
        }
        baseline.add_scan(&scan_with(steady_peaks()));
        assert!(baseline.established);
        assert_eq!(baseline.scan_count, 12);
    }

    #[test]
    fn repeated_peak_tracks_one_signal() {
        let mut baseline = SpectrumBaseline::new(50_000.0, 3);
        for _ in 0..5 {
            baseline.add_scan(&scan_with(vec![SignalPeak::new(433.92e6, -30.0)]));
        }
        assert_eq!(baseline.signals.len(), 1);
        let sig = baseline.signals.values().next().unwrap();
        assert_eq!(sig.power_samples.len(), 5);
        assert!(sig.is_stable());
    }

    #[test]
    fn new_signal_detected_after_establishment() {
        let mut baseline = SpectrumBaseline::new(50_000.0, 3);
        for _ in 0..3 {
            baseline.add_scan(&scan_with(steady_peaks()));
        }
        assert!(baseline.is_new_signal(&SignalPeak::new(121.5e6, -18.0)));
        assert!(!baseline.is_new_signal(&SignalPeak::new(95.51e6, -20.0)));
    }

    #[test]
    fn not_new_before_establishment() {
        let baseline = SpectrumBaseline::new(50_000.0, 12);
        assert!(!baseline.is_new_signal(&SignalPeak::new(121.5e6, -18.0)));
    }

    #[test]
    fn power_anomaly_requires_deviation_beyond_threshold() {
        let mut baseline = SpectrumBaseline::new(50_000.0, 3);
        for _ in 0..4 {
            baseline.add_scan(&scan_with(vec![SignalPeak::new(95.5e6, -20.0)]));
        }
        assert!(!baseline.is_power_anomaly(&SignalPeak::new(95.5e6, -23.0)));
        assert!(baseline.is_power_anomaly(&SignalPeak::new(95.5e6, -10.0)));
        // Unmatched frequency has no history, so no anomaly
        assert!(!baseline.is_power_anomaly(&SignalPeak::new(150.0e6, -10.0)));
    }

    #[test]
    fn missing_signal_reported_after_miss_threshold() {
        let mut baseline = SpectrumBaseline::new(50_000.0, 3);
        for _ in 0..4 {
            baseline.add_scan(&scan_with(steady_peaks()));
        }

        // Signal at 101.1 MHz disappears
        let reduced = vec![SignalPeak::new(95.5e6, -20.0)];
        for _ in 0..2 {
            baseline.add_scan(&scan_with(reduced.clone()));
            assert!(baseline.get_missing_signals(&scan_with(reduced.clone())).is_empty());
        }
        baseline.add_scan(&scan_with(reduced.clone()));

        let missing = baseline.get_missing_signals(&scan_with(reduced));
        assert_eq!(missing.len(), 1);
        assert!((missing[0].0 - 101.1e6).abs() < 50_000.0);
    }

    #[test]
    fn activity_change_reports_silence_as_minus_100() {
        let mut baseline = SpectrumBaseline::new(50_000.0, 3);
        for _ in 0..3 {
            baseline.add_scan(&scan_with(steady_peaks()));
        }
        let change = baseline.get_activity_change(&scan_with(Vec::new()), None);
        assert!((change - -100.0).abs() < f64::EPSILON);
    }

    #[test]
    fn activity_change_zero_without_history() {
        let mut baseline = SpectrumBaseline::new(50_000.0, 1);
        baseline.add_scan(&scan_with(Vec::new()));
        assert!(baseline.established);
        let change = baseline.get_activity_change(&scan_with(steady_peaks()), None);
        assert!(change.abs() < f64::EPSILON);
    }

    #[test]
    fn snapshot_roundtrips_through_json() {
        let mut baseline = SpectrumBaseline::new(50_000.0, 3);
        for _ in 0..4 {
            baseline.add_scan(&scan_with(steady_peaks()));
        }

        let json = serde_json::to_string(&baseline).unwrap();
        let restored: SpectrumBaseline = serde_json::from_str(&json).unwrap();

        assert_eq!(restored.scan_count, baseline.scan_count);
        assert_eq!(restored.established, baseline.established);
        assert_eq!(restored.signals.len(), baseline.signals.len());
        assert_eq!(restored.total_power_history, baseline.total_power_history);
    }
}
