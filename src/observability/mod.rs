//! Audit logging and frequency compliance checking.
//!
//! Every scanner, recorder, and watch operation appends one JSON line to the
//! audit log. The log is the source of truth for post-mortem analysis, so
//! writes never panic: a failed append degrades to a warning.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

/// US legal receive bands (MHz), no license required.
pub const LEGAL_BANDS_US: &[(f64, f64, &str)] = &[
    (0.5, 1.7, "AM Broadcast"),
    (87.5, 108.0, "FM Broadcast"),
    (108.0, 117.975, "VOR Navigation"),
    (118.0, 137.0, "Aircraft VHF"),
    (137.0, 138.0, "NOAA Satellites"),
    (144.0, 148.0, "Amateur 2m"),
    (156.0, 162.025, "Marine VHF"),
    (162.4, 162.55, "NOAA Weather"),
    (420.0, 450.0, "Amateur 70cm"),
    (462.5625, 467.7125, "FRS/GMRS"),
    (470.0, 608.0, "UHF TV"),
    (824.0, 849.0, "Cellular (850 MHz)"),
    (869.0, 894.0, "Cellular (850 MHz)"),
    (1090.0, 1090.0, "ADS-B"),
];

/// Ranges that may carry government or public-safety traffic.
pub const CAUTION_BANDS: &[(f64, f64, &str)] = &[
    (380.0, 400.0, "Government/Military"),
    (406.0, 420.0, "Federal Land Mobile"),
    (851.0, 869.0, "Public Safety"),
];

/// Compliance verdict recorded on every audit entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComplianceStatus {
    Ok,
    Warning,
    Violation,
}

/// One line of the JSONL audit log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    pub timestamp: String,
    pub adw_id: String,
    pub operation: String,
    pub params: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_seconds: Option<f64>,
    pub compliance_status: ComplianceStatus,
    pub warnings: Vec<String>,
}

/// Append-only structured audit logger.
pub struct AuditLogger {
    log_path: PathBuf,
    enabled: bool,
}

impl AuditLogger {
    pub fn new(log_path: impl Into<PathBuf>) -> Self {
        let log_path = log_path.into();
        if let Some(parent) = log_path.parent() {
            if let Err(e) = std::fs::create_dir_all(parent) {
                warn!("cannot create audit log directory {parent:?}: {e}");
            }
        }
        Self {
            log_path,
            enabled: true,
        }
    }

    pub fn disabled() -> Self {
        Self {
            log_path: PathBuf::new(),
            enabled: false,
        }
    }

    /// Append an operation to the log and return the entry written.
    pub fn log_operation(
        &self,
        adw_id: &str,
        operation: &str,
        params: Value,
        result: Option<Value>,
        duration_seconds: Option<f64>,
        compliance_status: ComplianceStatus,
        warnings: Vec<String>,
    ) -> AuditEntry {
        let entry = AuditEntry {
            timestamp: Utc::now().to_rfc3339(),
            adw_id: adw_id.to_string(),
            operation: operation.to_string(),
            params,
            result,
            duration_seconds,
            compliance_status,
            warnings,
        };

        if self.enabled {
            match serde_json::to_string(&entry) {
                Ok(line) => {
                    let write = OpenOptions::new()
                        .create(true)
                        .append(true)
                        .open(&self.log_path)
                        .and_then(|mut f| writeln!(f, "{line}"));
                    if let Err(e) = write {
                        warn!("failed to write audit log: {e}");
                    }
                }
                Err(e) => warn!("failed to serialize audit entry: {e}"),
            }
        }

        entry
    }

    /// Log a spectrum scan with compliance stamping of both band edges.
    pub fn log_scan(
        &self,
        adw_id: &str,
        start_freq_hz: f64,
        end_freq_hz: f64,
        num_signals: usize,
        duration_seconds: f64,
    ) -> AuditEntry {
        let checker = ComplianceChecker;
        let mut warnings = Vec::new();
        for (label, freq) in [("start", start_freq_hz), ("end", end_freq_hz)] {
            let verdict = checker.check_frequency(freq / 1e6);
            if !verdict.allowed {
                warnings.push(format!("{label} frequency: {}", verdict.message));
            }
        }
        let status = if warnings.is_empty() {
            ComplianceStatus::Ok
        } else {
            ComplianceStatus::Warning
        };

        self.log_operation(
            adw_id,
            "scan",
            serde_json::json!({
                "start_freq_mhz": start_freq_hz / 1e6,
                "end_freq_mhz": end_freq_hz / 1e6,
            }),
            Some(serde_json::json!({ "num_signals": num_signals })),
            Some(duration_seconds),
            status,
            warnings,
        )
    }

    /// Log a recording operation.
    pub fn log_recording(
        &self,
        adw_id: &str,
        freq_hz: f64,
        duration_seconds: f64,
        file_path: &Path,
        file_size_bytes: u64,
    ) -> AuditEntry {
        let verdict = ComplianceChecker.check_frequency(freq_hz / 1e6);
        let warnings = if verdict.allowed {
            Vec::new()
        } else {
            vec![verdict.message.clone()]
        };
        let status = if warnings.is_empty() {
            ComplianceStatus::Ok
        } else {
            ComplianceStatus::Warning
        };

        self.log_operation(
            adw_id,
            "record",
            serde_json::json!({ "freq_mhz": freq_hz / 1e6 }),
            Some(serde_json::json!({
                "duration_seconds": duration_seconds,
                "file_path": file_path.display().to_string(),
                "file_size_bytes": file_size_bytes,
            })),
            Some(duration_seconds),
            status,
            warnings,
        )
    }

    /// Most recent entries, newest first.
    pub fn get_entries(&self, limit: usize) -> Vec<AuditEntry> {
        let Ok(content) = std::fs::read_to_string(&self.log_path) else {
            return Vec::new();
        };
        let mut entries: Vec<AuditEntry> = content
            .lines()
            .filter_map(|line| serde_json::from_str(line).ok())
            .collect();
        entries.reverse();
        entries.truncate(limit);
        entries
    }
}

/// Result of a frequency compliance check.
#[derive(Debug, Clone)]
pub struct ComplianceVerdict {
    pub allowed: bool,
    pub message: String,
}

/// Checks frequencies against the US legal receive tables.
pub struct ComplianceChecker;

impl ComplianceChecker {
    /// Check one frequency (MHz) against the legal and caution tables.
    pub fn check_frequency(&self, freq_mhz: f64) -> ComplianceVerdict {
        for &(start, end, label) in CAUTION_BANDS {
            if (start..=end).contains(&freq_mhz) {
                return ComplianceVerdict {
                    allowed: false,
                    message: format!("{freq_mhz:.4} MHz is in a caution band: {label}"),
                };
            }
        }
        for &(start, end, label) in LEGAL_BANDS_US {
            if (start..=end).contains(&freq_mhz) {
                return ComplianceVerdict {
                    allowed: true,
                    message: format!("{freq_mhz:.4} MHz is in {label}"),
                };
            }
        }
        ComplianceVerdict {
            allowed: true,
            message: format!("{freq_mhz:.4} MHz is outside the catalogued bands"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fm_broadcast_is_legal() {
        let verdict = ComplianceChecker.check_frequency(100.1);
        assert!(verdict.allowed);
        assert!(verdict.message.contains("FM Broadcast"));
    }

    #[test]
    fn caution_band_flags_warning() {
        let verdict = ComplianceChecker.check_frequency(390.0);
        assert!(!verdict.allowed);
        assert!(verdict.message.contains("Government"));
    }

    #[test]
    fn audit_log_appends_jsonl() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audit.jsonl");
        let logger = AuditLogger::new(&path);

        logger.log_scan("adw_test", 87.5e6, 108.0e6, 3, 1.5);
        logger.log_scan("adw_test", 88.0e6, 90.0e6, 0, 0.5);

        let entries = logger.get_entries(10);
        assert_eq!(entries.len(), 2);
        // Newest first
        assert_eq!(entries[0].operation, "scan");
        assert_eq!(entries[1].adw_id, "adw_test");
        assert_eq!(entries[0].compliance_status, ComplianceStatus::Ok);
    }

    #[test]
    fn scan_into_caution_band_records_warning() {
        let dir = tempfile::tempdir().unwrap();
        let logger = AuditLogger::new(dir.path().join("audit.jsonl"));
        let entry = logger.log_scan("adw_test", 380.0e6, 400.0e6, 1, 1.0);
        assert_eq!(entry.compliance_status, ComplianceStatus::Warning);
        assert_eq!(entry.warnings.len(), 2);
    }
}
