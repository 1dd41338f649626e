//! Survey lifecycle manager.
//!
//! CRUD over surveys, segments, and their signals, with the invariants the
//! rest of the engine relies on:
//!
//! - segment selection is strict `(priority, start_freq)` order
//! - `pending -> in_progress` happens atomically with scan-id assignment
//! - `completed_segments` counts completed segments only, so a failed
//!   segment blocks survey completion until an operator resets it
//! - all state is durable before any segment begins, making surveys
//!   resumable from a fresh process

use chrono::{DateTime, Duration, Utc};
use rusqlite::{params, OptionalExtension, Row};
use thiserror::Error;
use tracing::{debug, info};
use uuid::Uuid;

use super::catalog::{self, RTL_SDR_MAX_HZ, RTL_SDR_MIN_HZ};
use super::models::{
    format_duration, SegmentStatus, SpectrumSurvey, SurveyConfig, SurveySegment, SurveyStatus,
};
use crate::config::FREQUENCY_TOLERANCE_HZ;
use crate::storage::db::{fmt_ts, StoreError, UnifiedDb};
use crate::storage::models::Signal;

#[derive(Debug, Error)]
pub enum SurveyError {
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("sql error: {0}")]
    Sql(#[from] rusqlite::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("survey not found: {0}")]
    SurveyNotFound(String),

    #[error("segment not found: {0}")]
    SegmentNotFound(String),

    #[error("segment {0} is not pending")]
    SegmentNotPending(String),
}

/// Options for creating a survey.
#[derive(Debug, Clone)]
pub struct CreateSurveyOptions {
    pub start_hz: f64,
    pub end_hz: f64,
    pub full_coverage: bool,
    pub coarse_step_hz: f64,
    pub location_name: Option<String>,
    pub baseline_survey_id: Option<String>,
}

impl Default for CreateSurveyOptions {
    fn default() -> Self {
        Self {
            start_hz: RTL_SDR_MIN_HZ,
            end_hz: RTL_SDR_MAX_HZ,
            full_coverage: true,
            coarse_step_hz: 2e6,
            location_name: None,
            baseline_survey_id: None,
        }
    }
}

/// Manages spectrum survey lifecycle against the unified store.
pub struct SurveyManager<'a> {
    db: &'a UnifiedDb,
}

impl<'a> SurveyManager<'a> {
    pub fn new(db: &'a UnifiedDb) -> Self {
        Self { db }
    }

    // ========================================================================
    // Survey CRUD
    // ========================================================================

    /// Create a survey with its segments, fully persisted before return.
    pub fn create_survey(
        &self,
        name: &str,
        options: CreateSurveyOptions,
    ) -> Result<SpectrumSurvey, SurveyError> {
        let survey_id = Uuid::new_v4().to_string();
        let now = Utc::now();

        // Run numbers increase monotonically per location
        let run_number = match &options.location_name {
            Some(location) => Some(self.db.connection().query_row(
                "SELECT COALESCE(MAX(run_number), 0) + 1 FROM spectrum_surveys WHERE location_name = ?1",
                params![location],
                |row| row.get::<_, i64>(0),
            )? as u32),
            None => None,
        };

        let segments = catalog::generate_segments(
            &survey_id,
            options.start_hz,
            options.end_hz,
            options.full_coverage,
            options.coarse_step_hz,
        );

        let survey = SpectrumSurvey {
            survey_id: survey_id.clone(),
            name: name.to_string(),
            status: SurveyStatus::Pending,
            created_at: now,
            started_at: None,
            completed_at: None,
            last_activity_at: None,
            start_freq_hz: options.start_hz,
            end_freq_hz: options.end_hz,
            total_segments: segments.len() as u32,
            completed_segments: 0,
            completion_pct: 0.0,
            total_signals_found: 0,
            config: SurveyConfig {
                full_coverage: options.full_coverage,
                coarse_step_hz: options.coarse_step_hz,
            },
            location_name: options.location_name,
            run_number,
            baseline_survey_id: options.baseline_survey_id,
        };

        self.db.connection().execute(
            "INSERT INTO spectrum_surveys (
                survey_id, name, status, created_at, start_freq_hz, end_freq_hz,
                total_segments, completed_segments, completion_pct,
                total_signals_found, config, location_name, run_number, baseline_survey_id
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
            params![
                survey.survey_id,
                survey.name,
                survey.status.as_str(),
                fmt_ts(&survey.created_at),
                survey.start_freq_hz,
                survey.end_freq_hz,
                survey.total_segments,
                survey.completed_segments,
                survey.completion_pct,
                survey.total_signals_found,
                serde_json::to_string(&survey.config)?,
                survey.location_name,
                survey.run_number,
                survey.baseline_survey_id,
            ],
        )?;

        for segment in &segments {
            self.insert_segment(segment)?;
        }

        info!(
            "created survey '{}' with {} segments ({} estimated)",
            name,
            segments.len(),
            format_duration(catalog::estimate_survey_duration(&segments))
        );

        Ok(survey)
    }

    pub fn get_survey(&self, survey_id: &str) -> Result<Option<SpectrumSurvey>, SurveyError> {
        self.db
            .connection()
            .query_row(
                "SELECT * FROM spectrum_surveys WHERE survey_id = ?1",
                params![survey_id],
                |row| Ok(row_to_survey(row)),
            )
            .optional()?
            .transpose()
    }

    pub fn list_surveys(
        &self,
        status: Option<SurveyStatus>,
        limit: usize,
    ) -> Result<Vec<SpectrumSurvey>, SurveyError> {
        let conn = self.db.connection();
        let mut surveys = Vec::new();
        match status {
            Some(status) => {
                let mut stmt = conn.prepare(
                    "SELECT * FROM spectrum_surveys WHERE status = ?1
                     ORDER BY created_at DESC LIMIT ?2",
                )?;
                let rows =
                    stmt.query_map(params![status.as_str(), limit as i64], |row| {
                        Ok(row_to_survey(row))
                    })?;
                for row in rows {
                    surveys.push(row??);
                }
            }
            None => {
                let mut stmt = conn.prepare(
                    "SELECT * FROM spectrum_surveys ORDER BY created_at DESC LIMIT ?1",
                )?;
                let rows = stmt.query_map(params![limit as i64], |row| Ok(row_to_survey(row)))?;
                for row in rows {
                    surveys.push(row??);
                }
            }
        }
        Ok(surveys)
    }

    pub fn list_surveys_by_location(
        &self,
        location_name: &str,
        limit: usize,
    ) -> Result<Vec<SpectrumSurvey>, SurveyError> {
        let conn = self.db.connection();
        let mut stmt = conn.prepare(
            "SELECT * FROM spectrum_surveys WHERE location_name = ?1
             ORDER BY run_number DESC, created_at DESC LIMIT ?2",
        )?;
        let rows = stmt.query_map(params![location_name, limit as i64], |row| {
            Ok(row_to_survey(row))
        })?;
        let mut surveys = Vec::new();
        for row in rows {
            surveys.push(row??);
        }
        Ok(surveys)
    }

    pub fn update_survey_status(
        &self,
        survey_id: &str,
        status: SurveyStatus,
    ) -> Result<(), SurveyError> {
        let now = fmt_ts(&Utc::now());
        let conn = self.db.connection();

        let changed = match status {
            SurveyStatus::InProgress => conn.execute(
                "UPDATE spectrum_surveys
                 SET status = ?2, last_activity_at = ?3,
                     started_at = COALESCE(started_at, ?3)
                 WHERE survey_id = ?1",
                params![survey_id, status.as_str(), now],
            )?,
            SurveyStatus::Completed => conn.execute(
                "UPDATE spectrum_surveys
                 SET status = ?2, last_activity_at = ?3, completed_at = ?3
                 WHERE survey_id = ?1",
                params![survey_id, status.as_str(), now],
            )?,
            _ => conn.execute(
                "UPDATE spectrum_surveys SET status = ?2, last_activity_at = ?3
                 WHERE survey_id = ?1",
                params![survey_id, status.as_str(), now],
            )?,
        };
        if changed == 0 {
            return Err(SurveyError::SurveyNotFound(survey_id.to_string()));
        }
        debug!("survey {survey_id} -> {}", status.as_str());
        Ok(())
    }

    // ========================================================================
    // Segments
    // ========================================================================

    fn insert_segment(&self, segment: &SurveySegment) -> Result<(), SurveyError> {
        self.db.connection().execute(
            "INSERT INTO survey_segments (
                segment_id, survey_id, name, start_freq_hz, end_freq_hz,
                priority, step_hz, dwell_time_ms, status, signals_found
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                segment.segment_id,
                segment.survey_id,
                segment.name,
                segment.start_freq_hz,
                segment.end_freq_hz,
                segment.priority,
                segment.step_hz,
                segment.dwell_time_ms,
                segment.status.as_str(),
                segment.signals_found,
            ],
        )?;
        Ok(())
    }

    pub fn get_segment(&self, segment_id: &str) -> Result<Option<SurveySegment>, SurveyError> {
        self.db
            .connection()
            .query_row(
                "SELECT * FROM survey_segments WHERE segment_id = ?1",
                params![segment_id],
                |row| Ok(row_to_segment(row)),
            )
            .optional()?
            .transpose()
    }

    pub fn get_segments(&self, survey_id: &str) -> Result<Vec<SurveySegment>, SurveyError> {
        let conn = self.db.connection();
        let mut stmt = conn.prepare(
            "SELECT * FROM survey_segments WHERE survey_id = ?1
             ORDER BY priority, start_freq_hz",
        )?;
        let rows = stmt.query_map(params![survey_id], |row| Ok(row_to_segment(row)))?;
        let mut segments = Vec::new();
        for row in rows {
            segments.push(row??);
        }
        Ok(segments)
    }

    /// Next pending segment in `(priority, start_freq)` order, or `None`
    /// when every segment is terminal or claimed.
    pub fn get_next_segment(&self, survey_id: &str) -> Result<Option<SurveySegment>, SurveyError> {
        self.db
            .connection()
            .query_row(
                "SELECT * FROM survey_segments
                 WHERE survey_id = ?1 AND status = 'pending'
                 ORDER BY priority, start_freq_hz
                 LIMIT 1",
                params![survey_id],
                |row| Ok(row_to_segment(row)),
            )
            .optional()?
            .transpose()
    }

    /// Claim a segment: `pending -> in_progress` atomically with scan-id
    /// assignment. Fails if the segment was already claimed.
    pub fn start_segment(&self, segment_id: &str, scan_id: &str) -> Result<(), SurveyError> {
        let changed = self.db.connection().execute(
            "UPDATE survey_segments
             SET status = 'in_progress', started_at = ?2, scan_id = ?3
             WHERE segment_id = ?1 AND status = 'pending'",
            params![segment_id, fmt_ts(&Utc::now()), scan_id],
        )?;
        if changed == 0 {
            return Err(SurveyError::SegmentNotPending(segment_id.to_string()));
        }
        Ok(())
    }

    pub fn complete_segment(
        &self,
        segment_id: &str,
        signals_found: u32,
        noise_floor_db: Option<f64>,
        scan_time_seconds: Option<f64>,
    ) -> Result<(), SurveyError> {
        let changed = self.db.connection().execute(
            "UPDATE survey_segments
             SET status = 'completed', completed_at = ?2, signals_found = ?3,
                 noise_floor_db = ?4, scan_time_seconds = ?5
             WHERE segment_id = ?1",
            params![
                segment_id,
                fmt_ts(&Utc::now()),
                signals_found,
                noise_floor_db,
                scan_time_seconds
            ],
        )?;
        if changed == 0 {
            return Err(SurveyError::SegmentNotFound(segment_id.to_string()));
        }

        if let Some(segment) = self.get_segment(segment_id)? {
            self.refresh_survey_progress(&segment.survey_id)?;
        }
        Ok(())
    }

    pub fn fail_segment(&self, segment_id: &str, error_message: &str) -> Result<(), SurveyError> {
        let changed = self.db.connection().execute(
            "UPDATE survey_segments
             SET status = 'failed', completed_at = ?2, error_message = ?3
             WHERE segment_id = ?1",
            params![segment_id, fmt_ts(&Utc::now()), error_message],
        )?;
        if changed == 0 {
            return Err(SurveyError::SegmentNotFound(segment_id.to_string()));
        }
        Ok(())
    }

    /// Operator reset of a failed or orphaned segment back to `pending`.
    pub fn reset_segment(&self, segment_id: &str) -> Result<(), SurveyError> {
        let changed = self.db.connection().execute(
            "UPDATE survey_segments
             SET status = 'pending', scan_id = NULL, error_message = NULL,
                 started_at = NULL, completed_at = NULL
             WHERE segment_id = ?1 AND status IN ('in_progress', 'failed')",
            params![segment_id],
        )?;
        if changed == 0 {
            return Err(SurveyError::SegmentNotFound(segment_id.to_string()));
        }
        Ok(())
    }

    /// Reset every `in_progress` segment whose start is older than `idle`.
    /// Never called automatically; a stale segment means its owning process
    /// died and the operator decided to reclaim it.
    pub fn reset_stale_segments(
        &self,
        survey_id: &str,
        idle: Duration,
    ) -> Result<usize, SurveyError> {
        let cutoff = fmt_ts(&(Utc::now() - idle));
        let changed = self.db.connection().execute(
            "UPDATE survey_segments
             SET status = 'pending', scan_id = NULL, started_at = NULL
             WHERE survey_id = ?1 AND status = 'in_progress' AND started_at < ?2",
            params![survey_id, cutoff],
        )?;
        Ok(changed)
    }

    /// Recompute progress counters after a segment state change. Marks the
    /// survey completed when every segment is completed.
    pub fn refresh_survey_progress(&self, survey_id: &str) -> Result<(), SurveyError> {
        let conn = self.db.connection();
        let (completed, signals): (i64, i64) = conn.query_row(
            "SELECT
                COUNT(CASE WHEN status = 'completed' THEN 1 END),
                COALESCE(SUM(CASE WHEN status = 'completed' THEN signals_found END), 0)
             FROM survey_segments
             WHERE survey_id = ?1",
            params![survey_id],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;

        let survey = self
            .get_survey(survey_id)?
            .ok_or_else(|| SurveyError::SurveyNotFound(survey_id.to_string()))?;

        let completion_pct = if survey.total_segments > 0 {
            completed as f64 / f64::from(survey.total_segments) * 100.0
        } else {
            0.0
        };

        conn.execute(
            "UPDATE spectrum_surveys
             SET completed_segments = ?2, total_signals_found = ?3,
                 completion_pct = ?4, last_activity_at = ?5
             WHERE survey_id = ?1",
            params![
                survey_id,
                completed,
                signals,
                completion_pct,
                fmt_ts(&Utc::now())
            ],
        )?;

        if completed as u32 >= survey.total_segments && survey.total_segments > 0 {
            self.update_survey_status(survey_id, SurveyStatus::Completed)?;
            info!("survey {survey_id} completed");
        }
        Ok(())
    }

    // ========================================================================
    // Signals
    // ========================================================================

    /// Record a detected signal with frequency dedupe.
    ///
    /// A detection within the shared frequency tolerance of an existing
    /// signal in the same survey increments its count, refreshes
    /// `last_seen`, and keeps the strongest power. Otherwise a fresh
    /// `discovered` row is inserted with partition columns derived from the
    /// survey location and the current time.
    pub fn record_signal(
        &self,
        survey_id: &str,
        segment_id: &str,
        frequency_hz: f64,
        power_db: f64,
        bandwidth_hz: Option<f64>,
    ) -> Result<Signal, SurveyError> {
        if let Some(existing) =
            self.db
                .find_signal_in_survey(survey_id, frequency_hz, FREQUENCY_TOLERANCE_HZ)?
        {
            self.db
                .record_signal_detection(&existing.signal_id, power_db)?;
            return self
                .db
                .get_signal(&existing.signal_id)?
                .ok_or_else(|| SurveyError::Store(StoreError::NotFound(existing.signal_id)))
        }

        let survey = self
            .get_survey(survey_id)?
            .ok_or_else(|| SurveyError::SurveyNotFound(survey_id.to_string()))?;

        let mut signal = Signal::new(frequency_hz, power_db);
        signal.bandwidth_hz = bandwidth_hz;
        signal.survey_id = Some(survey_id.to_string());
        signal.segment_id = Some(segment_id.to_string());
        signal.freq_band = Some(
            catalog::band_for_frequency(frequency_hz)
                .map_or_else(|| "gap".to_string(), |b| b.name.to_string()),
        );
        signal.location_name = survey.location_name.clone();

        self.db.insert_signal(&signal)?;
        Ok(signal)
    }

    pub fn get_signals(
        &self,
        survey_id: &str,
        state: Option<crate::storage::models::SignalState>,
        min_detections: u32,
    ) -> Result<Vec<Signal>, SurveyError> {
        Ok(self
            .db
            .get_signals_by_survey(survey_id, state, min_detections)?)
    }
}

fn row_to_survey(row: &Row<'_>) -> Result<SpectrumSurvey, SurveyError> {
    let status_raw: String = row.get("status")?;
    let created_at: String = row.get("created_at")?;
    let started_at: Option<String> = row.get("started_at")?;
    let completed_at: Option<String> = row.get("completed_at")?;
    let last_activity_at: Option<String> = row.get("last_activity_at")?;
    let config_raw: Option<String> = row.get("config")?;
    let run_number: Option<i64> = row.get("run_number")?;

    let parse = |raw: &str| -> Result<DateTime<Utc>, SurveyError> {
        DateTime::parse_from_rfc3339(raw)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(|_| SurveyError::Store(StoreError::InvalidColumn {
                table: "spectrum_surveys",
                column: "timestamp",
                value: raw.to_string(),
            }))
    };

    Ok(SpectrumSurvey {
        survey_id: row.get("survey_id")?,
        name: row.get("name")?,
        status: SurveyStatus::parse(&status_raw).ok_or_else(|| {
            SurveyError::Store(StoreError::InvalidColumn {
                table: "spectrum_surveys",
                column: "status",
                value: status_raw.clone(),
            })
        })?,
        created_at: parse(&created_at)?,
        started_at: started_at.as_deref().map(parse).transpose()?,
        completed_at: completed_at.as_deref().map(parse).transpose()?,
        last_activity_at: last_activity_at.as_deref().map(parse).transpose()?,
        start_freq_hz: row.get("start_freq_hz")?,
        end_freq_hz: row.get("end_freq_hz")?,
        total_segments: row.get::<_, i64>("total_segments")? as u32,
        completed_segments: row.get::<_, i64>("completed_segments")? as u32,
        completion_pct: row.get("completion_pct")?,
        total_signals_found: row.get::<_, i64>("total_signals_found")? as u32,
        config: config_raw
            .as_deref()
            .map(serde_json::from_str)
            .transpose()?
            .unwrap_or_default(),
        location_name: row.get("location_name")?,
        run_number: run_number.map(|n| n as u32),
        baseline_survey_id: row.get("baseline_survey_id")?,
    })
}

fn row_to_segment(row: &Row<'_>) -> Result<SurveySegment, SurveyError> {
    let status_raw: String = row.get("status")?;
    let started_at: Option<String> = row.get("started_at")?;
    let completed_at: Option<String> = row.get("completed_at")?;

    let parse = |raw: &str| -> Result<DateTime<Utc>, SurveyError> {
        DateTime::parse_from_rfc3339(raw)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(|_| SurveyError::Store(StoreError::InvalidColumn {
                table: "survey_segments",
                column: "timestamp",
                value: raw.to_string(),
            }))
    };

    Ok(SurveySegment {
        segment_id: row.get("segment_id")?,
        survey_id: row.get("survey_id")?,
        name: row.get("name")?,
        start_freq_hz: row.get("start_freq_hz")?,
        end_freq_hz: row.get("end_freq_hz")?,
        priority: row.get::<_, i64>("priority")? as u8,
        step_hz: row.get("step_hz")?,
        dwell_time_ms: row.get("dwell_time_ms")?,
        status: SegmentStatus::parse(&status_raw).ok_or_else(|| {
            SurveyError::Store(StoreError::InvalidColumn {
                table: "survey_segments",
                column: "status",
                value: status_raw.clone(),
            })
        })?,
        scan_id: row.get("scan_id")?,
        error_message: row.get("error_message")?,
        signals_found: row.get::<_, i64>("signals_found")? as u32,
        noise_floor_db: row.get("noise_floor_db")?,
        scan_time_seconds: row.get("scan_time_seconds")?,
        started_at: started_at.as_deref().map(parse).transpose()?,
        completed_at: completed_at.as_deref().map(parse).transpose()?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::models::SignalState;

    fn fm_survey(db: &UnifiedDb) -> SpectrumSurvey {
        let manager = SurveyManager::new(db);
        manager
            .create_survey(
                "FM sweep",
                CreateSurveyOptions {
                    start_hz: 88.0e6,
                    end_hz: 108.0e6,
                    full_coverage: false,
                    ..CreateSurveyOptions::default()
                },
            )
            .unwrap()
    }

    #[test]
    fn created_survey_is_durable() {
        let db = UnifiedDb::open_in_memory().unwrap();
        let survey = fm_survey(&db);
        let manager = SurveyManager::new(&db);

        let loaded = manager.get_survey(&survey.survey_id).unwrap().unwrap();
        assert_eq!(loaded.status, SurveyStatus::Pending);
        assert_eq!(loaded.total_segments, 1); // only fm_broadcast intersects
        assert!(!manager.get_segments(&survey.survey_id).unwrap().is_empty());
    }

    #[test]
    fn next_segment_follows_priority_then_frequency() {
        let db = UnifiedDb::open_in_memory().unwrap();
        let manager = SurveyManager::new(&db);
        let survey = manager
            .create_survey(
                "wide",
                CreateSurveyOptions {
                    start_hz: 87.5e6,
                    end_hz: 450.0e6,
                    full_coverage: false,
                    ..CreateSurveyOptions::default()
                },
            )
            .unwrap();

        // airband_vhf (118 MHz) and noaa_weather (162.4) and ism_433 share
        // priority 1; lowest start frequency wins
        let next = manager.get_next_segment(&survey.survey_id).unwrap().unwrap();
        assert_eq!(next.name, "airband_vhf");
    }

    #[test]
    fn start_segment_claims_atomically() {
        let db = UnifiedDb::open_in_memory().unwrap();
        let manager = SurveyManager::new(&db);
        let survey = fm_survey(&db);

        let segment = manager.get_next_segment(&survey.survey_id).unwrap().unwrap();
        manager.start_segment(&segment.segment_id, "scan-1").unwrap();

        // Second claim on the same segment is rejected
        assert!(matches!(
            manager.start_segment(&segment.segment_id, "scan-2"),
            Err(SurveyError::SegmentNotPending(_))
        ));

        let claimed = manager.get_segment(&segment.segment_id).unwrap().unwrap();
        assert_eq!(claimed.status, SegmentStatus::InProgress);
        assert_eq!(claimed.scan_id.as_deref(), Some("scan-1"));
    }

    #[test]
    fn completing_all_segments_completes_survey() {
        let db = UnifiedDb::open_in_memory().unwrap();
        let manager = SurveyManager::new(&db);
        let survey = fm_survey(&db);

        while let Some(segment) = manager.get_next_segment(&survey.survey_id).unwrap() {
            manager.start_segment(&segment.segment_id, "scan").unwrap();
            manager
                .complete_segment(&segment.segment_id, 5, Some(-60.0), Some(1.0))
                .unwrap();
        }

        let done = manager.get_survey(&survey.survey_id).unwrap().unwrap();
        assert_eq!(done.status, SurveyStatus::Completed);
        assert_eq!(done.completed_segments, done.total_segments);
        assert!((done.completion_pct - 100.0).abs() < f64::EPSILON);
        assert_eq!(done.total_signals_found, 5);
    }

    #[test]
    fn failed_segment_blocks_completion_until_reset() {
        let db = UnifiedDb::open_in_memory().unwrap();
        let manager = SurveyManager::new(&db);
        let survey = fm_survey(&db);

        let segment = manager.get_next_segment(&survey.survey_id).unwrap().unwrap();
        manager.start_segment(&segment.segment_id, "scan").unwrap();
        manager.fail_segment(&segment.segment_id, "device unplugged").unwrap();
        manager.refresh_survey_progress(&survey.survey_id).unwrap();

        let stuck = manager.get_survey(&survey.survey_id).unwrap().unwrap();
        assert_ne!(stuck.status, SurveyStatus::Completed);
        assert_eq!(stuck.completed_segments, 0);

        // No pending segment remains, yet the survey is incomplete
        assert!(manager.get_next_segment(&survey.survey_id).unwrap().is_none());

        manager.reset_segment(&segment.segment_id).unwrap();
        let retry = manager.get_next_segment(&survey.survey_id).unwrap().unwrap();
        assert_eq!(retry.segment_id, segment.segment_id);
    }

    #[test]
    fn signal_dedupe_within_tolerance() {
        let db = UnifiedDb::open_in_memory().unwrap();
        let manager = SurveyManager::new(&db);
        let survey = fm_survey(&db);
        let segment = manager.get_next_segment(&survey.survey_id).unwrap().unwrap();

        for (freq, power) in [
            (100.000e6, -30.0),
            (100.020e6, -28.0),
            (100.010e6, -33.0),
            (99.990e6, -31.0),
        ] {
            manager
                .record_signal(&survey.survey_id, &segment.segment_id, freq, power, None)
                .unwrap();
        }

        let signals = manager.get_signals(&survey.survey_id, None, 1).unwrap();
        assert_eq!(signals.len(), 1);
        assert_eq!(signals[0].detection_count, 4);
        assert!((signals[0].power_db - -28.0).abs() < f64::EPSILON);
        assert_eq!(signals[0].state, SignalState::Discovered);
    }

    #[test]
    fn run_numbers_increase_per_location() {
        let db = UnifiedDb::open_in_memory().unwrap();
        let manager = SurveyManager::new(&db);

        let opts = |loc: &str| CreateSurveyOptions {
            start_hz: 88.0e6,
            end_hz: 108.0e6,
            full_coverage: false,
            location_name: Some(loc.to_string()),
            ..CreateSurveyOptions::default()
        };

        let first = manager.create_survey("a", opts("lab")).unwrap();
        let second = manager.create_survey("b", opts("lab")).unwrap();
        let other = manager.create_survey("c", opts("field")).unwrap();

        assert_eq!(first.run_number, Some(1));
        assert_eq!(second.run_number, Some(2));
        assert_eq!(other.run_number, Some(1));
    }

    #[test]
    fn stale_segments_reset_on_operator_request() {
        let db = UnifiedDb::open_in_memory().unwrap();
        let manager = SurveyManager::new(&db);
        let survey = fm_survey(&db);

        let segment = manager.get_next_segment(&survey.survey_id).unwrap().unwrap();
        manager.start_segment(&segment.segment_id, "scan").unwrap();

        // Not stale yet
        assert_eq!(
            manager
                .reset_stale_segments(&survey.survey_id, Duration::hours(1))
                .unwrap(),
            0
        );
        // Zero idle threshold reclaims it
        assert_eq!(
            manager
                .reset_stale_segments(&survey.survey_id, Duration::seconds(0))
                .unwrap(),
            1
        );
        assert!(manager.get_next_segment(&survey.survey_id).unwrap().is_some());
    }
}
