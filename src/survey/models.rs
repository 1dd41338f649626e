//! Survey, segment, and status models.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Survey lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SurveyStatus {
    Pending,
    InProgress,
    Completed,
    Paused,
    Failed,
}

impl SurveyStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
            Self::Paused => "paused",
            Self::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "in_progress" => Some(Self::InProgress),
            "completed" => Some(Self::Completed),
            "paused" => Some(Self::Paused),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }
}

/// Segment lifecycle status. Terminal states are frozen; a failed segment
/// re-enters the queue only through an explicit operator reset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SegmentStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
}

impl SegmentStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "in_progress" => Some(Self::InProgress),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

/// Survey-level configuration persisted as a JSON column.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SurveyConfig {
    pub full_coverage: bool,
    pub coarse_step_hz: f64,
}

impl Default for SurveyConfig {
    fn default() -> Self {
        Self {
            full_coverage: true,
            coarse_step_hz: 2e6,
        }
    }
}

/// A spectrum survey: a plan for scanning a wide range in segments.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpectrumSurvey {
    pub survey_id: String,
    pub name: String,
    pub status: SurveyStatus,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub last_activity_at: Option<DateTime<Utc>>,
    pub start_freq_hz: f64,
    pub end_freq_hz: f64,
    pub total_segments: u32,
    pub completed_segments: u32,
    pub completion_pct: f64,
    pub total_signals_found: u32,
    pub config: SurveyConfig,
    pub location_name: Option<String>,
    pub run_number: Option<u32>,
    pub baseline_survey_id: Option<String>,
}

/// One scannable slice of a survey.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SurveySegment {
    pub segment_id: String,
    pub survey_id: String,
    pub name: String,
    pub start_freq_hz: f64,
    pub end_freq_hz: f64,
    /// 1 (highest) to 5 (gap filler).
    pub priority: u8,
    pub step_hz: f64,
    pub dwell_time_ms: f64,
    pub status: SegmentStatus,
    pub scan_id: Option<String>,
    pub error_message: Option<String>,
    pub signals_found: u32,
    pub noise_floor_db: Option<f64>,
    pub scan_time_seconds: Option<f64>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl SurveySegment {
    pub fn new(
        survey_id: &str,
        name: impl Into<String>,
        start_freq_hz: f64,
        end_freq_hz: f64,
        priority: u8,
        step_hz: f64,
        dwell_time_ms: f64,
    ) -> Self {
        Self {
            segment_id: Uuid::new_v4().to_string(),
            survey_id: survey_id.to_string(),
            name: name.into(),
            start_freq_hz,
            end_freq_hz,
            priority,
            step_hz,
            dwell_time_ms,
            status: SegmentStatus::Pending,
            scan_id: None,
            error_message: None,
            signals_found: 0,
            noise_floor_db: None,
            scan_time_seconds: None,
            started_at: None,
            completed_at: None,
        }
    }

    /// Rough wall-clock estimate: steps x (dwell + retune overhead).
    pub fn estimated_duration_seconds(&self) -> f64 {
        let steps = ((self.end_freq_hz - self.start_freq_hz) / self.step_hz).ceil() + 1.0;
        steps * (self.dwell_time_ms / 1000.0 + 0.05)
    }
}

/// Render a duration in a human-friendly form.
pub fn format_duration(seconds: f64) -> String {
    if seconds < 60.0 {
        format!("{seconds:.0}s")
    } else if seconds < 3600.0 {
        format!("{:.0}m {:.0}s", (seconds / 60.0).floor(), seconds % 60.0)
    } else {
        format!(
            "{:.0}h {:.0}m",
            (seconds / 3600.0).floor(),
            (seconds % 3600.0 / 60.0).floor()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_strings_roundtrip() {
        assert_eq!(SurveyStatus::parse("in_progress"), Some(SurveyStatus::InProgress));
        assert_eq!(SurveyStatus::InProgress.as_str(), "in_progress");
        assert_eq!(SegmentStatus::parse("bogus"), None);
    }

    #[test]
    fn terminal_segment_states() {
        assert!(SegmentStatus::Completed.is_terminal());
        assert!(SegmentStatus::Failed.is_terminal());
        assert!(!SegmentStatus::Pending.is_terminal());
        assert!(!SegmentStatus::InProgress.is_terminal());
    }

    #[test]
    fn duration_formatting() {
        assert_eq!(format_duration(42.0), "42s");
        assert_eq!(format_duration(125.0), "2m 5s");
        assert_eq!(format_duration(7260.0), "2h 1m");
    }
}
