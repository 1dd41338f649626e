//! Watch configuration, runtime state, and alert models.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::{DEFAULT_THRESHOLD_DB, FREQUENCY_TOLERANCE_HZ};

/// Predefined bands a watch can monitor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum FrequencyBand {
    FmBroadcast,
    AmBroadcast,
    AircraftVhf,
    MarineVhf,
    Amateur2m,
    Amateur70cm,
    NoaaWeather,
    NoaaSatellite,
    FrsGmrs,
    Adsb,
}

impl FrequencyBand {
    /// Band edges in Hz.
    pub fn range(self) -> (f64, f64) {
        match self {
            Self::FmBroadcast => (87.5e6, 108.0e6),
            Self::AmBroadcast => (0.5e6, 1.7e6),
            Self::AircraftVhf => (118.0e6, 137.0e6),
            Self::MarineVhf => (156.0e6, 162.025e6),
            Self::Amateur2m => (144.0e6, 148.0e6),
            Self::Amateur70cm => (420.0e6, 450.0e6),
            Self::NoaaWeather => (162.4e6, 162.55e6),
            Self::NoaaSatellite => (137.0e6, 138.0e6),
            Self::FrsGmrs => (462.5625e6, 467.7125e6),
            Self::Adsb => (1_089.0e6, 1_091.0e6),
        }
    }
}

/// Frequencies of common interest, labelled.
pub const NOTABLE_FREQUENCIES: &[(f64, &str)] = &[
    (121.5e6, "Aircraft Emergency"),
    (156.8e6, "Marine Channel 16 (Distress)"),
    (162.55e6, "NOAA Weather"),
    (146.52e6, "2m FM Calling"),
    (446.0e6, "70cm FM Calling"),
];

/// Label for a notable frequency within 1 kHz, if any.
pub fn notable_frequency(freq_hz: f64) -> Option<&'static str> {
    NOTABLE_FREQUENCIES
        .iter()
        .find(|(f, _)| (f - freq_hz).abs() < 1_000.0)
        .map(|(_, label)| *label)
}

/// True for distress/emergency channels that escalate alert urgency.
pub fn is_emergency_frequency(freq_hz: f64) -> bool {
    notable_frequency(freq_hz).is_some_and(|label| {
        let label = label.to_lowercase();
        label.contains("emergency") || label.contains("distress")
    })
}

/// Which predicate an alert condition evaluates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum AlertConditionType {
    NewSignal,
    ThresholdBreach,
    BandActivity,
    SignalLoss,
}

impl AlertConditionType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::NewSignal => "new_signal",
            Self::ThresholdBreach => "threshold_breach",
            Self::BandActivity => "band_activity",
            Self::SignalLoss => "signal_loss",
        }
    }
}

fn default_tolerance() -> f64 {
    FREQUENCY_TOLERANCE_HZ
}

fn default_cooldown() -> u64 {
    60
}

/// A single alert condition to monitor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertCondition {
    pub condition_type: AlertConditionType,
    #[serde(default)]
    pub threshold_db: Option<f64>,
    #[serde(default)]
    pub frequency_hz: Option<f64>,
    #[serde(default = "default_tolerance")]
    pub frequency_tolerance_hz: f64,
    #[serde(default)]
    pub activity_change_percent: Option<f64>,
    /// Minimum gap between successive fires of the same
    /// `(condition_type, frequency)` key.
    #[serde(default = "default_cooldown")]
    pub cooldown_seconds: u64,
}

impl AlertCondition {
    pub fn new(condition_type: AlertConditionType) -> Self {
        Self {
            condition_type,
            threshold_db: None,
            frequency_hz: None,
            frequency_tolerance_hz: FREQUENCY_TOLERANCE_HZ,
            activity_change_percent: None,
            cooldown_seconds: 60,
        }
    }

    /// Key that serializes cooldown tracking per condition and frequency.
    pub fn cooldown_key(&self) -> String {
        match self.frequency_hz {
            Some(freq) => format!("{}_{freq}", self.condition_type.as_str()),
            None => format!("{}_any", self.condition_type.as_str()),
        }
    }

    /// Human-readable description.
    pub fn describe(&self) -> String {
        match self.condition_type {
            AlertConditionType::NewSignal => match self.frequency_hz {
                Some(f) => format!("New signal near {:.3} MHz", f / 1e6),
                None => "Any new signal detected".to_string(),
            },
            AlertConditionType::ThresholdBreach => {
                format!("Signal exceeds {} dB", self.threshold_db.unwrap_or(0.0))
            }
            AlertConditionType::BandActivity => format!(
                "Band activity changes by {}%",
                self.activity_change_percent.unwrap_or(0.0)
            ),
            AlertConditionType::SignalLoss => match self.frequency_hz {
                Some(f) => format!("Signal lost at {:.3} MHz", f / 1e6),
                None => "Any baseline signal lost".to_string(),
            },
        }
    }
}

fn default_scan_interval() -> f64 {
    5.0
}

fn default_dwell() -> f64 {
    100.0
}

fn default_threshold() -> f64 {
    DEFAULT_THRESHOLD_DB
}

fn default_baseline_scans() -> u32 {
    12
}

fn default_notifications() -> Vec<String> {
    vec!["console".to_string()]
}

fn default_enabled() -> bool {
    true
}

fn short_id() -> String {
    Uuid::new_v4().to_string()[..8].to_string()
}

/// Configuration for a spectrum watch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatchConfig {
    #[serde(default = "short_id")]
    pub watch_id: String,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub bands: Vec<FrequencyBand>,
    #[serde(default)]
    pub custom_range: Option<(f64, f64)>,
    #[serde(default)]
    pub alert_conditions: Vec<AlertCondition>,
    #[serde(default = "default_scan_interval")]
    pub scan_interval_seconds: f64,
    #[serde(default = "default_dwell")]
    pub dwell_time_ms: f64,
    #[serde(default = "default_threshold")]
    pub threshold_db: f64,
    #[serde(default = "default_baseline_scans")]
    pub baseline_scans: u32,
    #[serde(default = "default_notifications")]
    pub notifications: Vec<String>,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
}

impl WatchConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            watch_id: short_id(),
            name: name.into(),
            description: None,
            bands: Vec::new(),
            custom_range: None,
            alert_conditions: Vec::new(),
            scan_interval_seconds: default_scan_interval(),
            dwell_time_ms: default_dwell(),
            threshold_db: default_threshold(),
            baseline_scans: default_baseline_scans(),
            notifications: default_notifications(),
            enabled: true,
            created_at: Utc::now(),
        }
    }

    /// Union of band ranges plus the custom range, in Hz.
    pub fn frequency_ranges(&self) -> Vec<(f64, f64)> {
        let mut ranges: Vec<(f64, f64)> = self.bands.iter().map(|b| b.range()).collect();
        if let Some(custom) = self.custom_range {
            ranges.push(custom);
        }
        ranges
    }
}

/// Watch runtime status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WatchStatus {
    Idle,
    Baseline,
    Watching,
    Alerting,
    Paused,
    Stopped,
}

/// Runtime state of a watch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatchState {
    pub status: WatchStatus,
    pub baseline_established: bool,
    pub baseline_scans_completed: u32,
    pub last_scan_time: Option<DateTime<Utc>>,
    pub started_at: Option<DateTime<Utc>>,
    pub scans_completed: u64,
    pub alerts_sent: u64,
    pub error: Option<String>,
}

impl Default for WatchState {
    fn default() -> Self {
        Self {
            status: WatchStatus::Idle,
            baseline_established: false,
            baseline_scans_completed: 0,
            last_scan_time: None,
            started_at: None,
            scans_completed: 0,
            alerts_sent: 0,
            error: None,
        }
    }
}

/// A triggered alert.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Alert {
    #[serde(default = "short_id")]
    pub alert_id: String,
    pub watch_id: String,
    pub condition: AlertCondition,
    #[serde(default = "Utc::now")]
    pub triggered_at: DateTime<Utc>,
    pub frequency_hz: f64,
    pub power_db: f64,
    pub message: String,
    #[serde(default)]
    pub notified: bool,
    #[serde(default)]
    pub acknowledged: bool,
}

impl Alert {
    pub fn new(
        watch_id: &str,
        condition: &AlertCondition,
        frequency_hz: f64,
        power_db: f64,
        message: String,
    ) -> Self {
        Self {
            alert_id: short_id(),
            watch_id: watch_id.to_string(),
            condition: condition.clone(),
            triggered_at: Utc::now(),
            frequency_hz,
            power_db,
            message,
            notified: false,
            acknowledged: false,
        }
    }
}

/// A watch over one predefined band alerting on any new signal.
pub fn create_watch_for_band(band: FrequencyBand, name: impl Into<String>) -> WatchConfig {
    let mut config = WatchConfig::new(name);
    config.bands.push(band);
    config
        .alert_conditions
        .push(AlertCondition::new(AlertConditionType::NewSignal));
    config
}

/// A watch over a narrow window around one frequency.
pub fn create_watch_for_frequency(freq_hz: f64, name: impl Into<String>) -> WatchConfig {
    let mut config = WatchConfig::new(name);
    config.custom_range = Some((freq_hz - 1.0e6, freq_hz + 1.0e6));
    let mut condition = AlertCondition::new(AlertConditionType::NewSignal);
    condition.frequency_hz = Some(freq_hz);
    config.alert_conditions.push(condition);
    config
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frequency_ranges_union_bands_and_custom() {
        let mut config = WatchConfig::new("test");
        config.bands = vec![FrequencyBand::AircraftVhf, FrequencyBand::NoaaWeather];
        config.custom_range = Some((433.0e6, 435.0e6));

        let ranges = config.frequency_ranges();
        assert_eq!(ranges.len(), 3);
        assert_eq!(ranges[0], (118.0e6, 137.0e6));
        assert_eq!(ranges[2], (433.0e6, 435.0e6));
    }

    #[test]
    fn emergency_frequencies_detected() {
        assert!(is_emergency_frequency(121.5e6));
        assert!(is_emergency_frequency(156.8e6));
        assert!(!is_emergency_frequency(146.52e6));
        assert!(!is_emergency_frequency(100.1e6));
    }

    #[test]
    fn cooldown_key_includes_frequency_when_set() {
        let mut condition = AlertCondition::new(AlertConditionType::NewSignal);
        assert_eq!(condition.cooldown_key(), "new_signal_any");
        condition.frequency_hz = Some(121.5e6);
        assert_eq!(condition.cooldown_key(), "new_signal_121500000");
    }

    #[test]
    fn config_roundtrips_with_defaults() {
        let json = r#"{"name": "minimal", "bands": ["aircraft_vhf"]}"#;
        let config: WatchConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.baseline_scans, 12);
        assert!((config.scan_interval_seconds - 5.0).abs() < f64::EPSILON);
        assert_eq!(config.notifications, vec!["console".to_string()]);
        assert_eq!(config.watch_id.len(), 8);
    }
}
