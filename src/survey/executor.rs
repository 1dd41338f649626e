//! Survey segment executor.
//!
//! Drives the scanner over survey segments, records discovered signals, and
//! promotes recurring signals to persistent assets. A segment failure is
//! stored on the segment row and the survey continues; a promotion failure
//! is logged and the signal stays `discovered`.

use serde::Serialize;
use tracing::{error, info, warn};
use uuid::Uuid;

use super::manager::{SurveyError, SurveyManager};
use super::models::{SurveySegment, SurveyStatus};
use crate::config::FREQUENCY_TOLERANCE_HZ;
use crate::device::Tuner;
use crate::scanner::SpectrumScanner;
use crate::storage::classification::auto_classify_asset;
use crate::storage::db::UnifiedDb;
use crate::storage::models::{Asset, AssetType, RFProtocol, Signal, SignalState};

/// Detections required before a signal is promoted to an asset.
pub const AUTO_PROMOTE_THRESHOLD: u32 = 3;

/// Outcome of one segment scan.
#[derive(Debug, Clone, Serialize)]
pub struct SegmentResult {
    pub segment_id: String,
    pub success: bool,
    pub signals_found: u32,
    pub noise_floor_db: Option<f64>,
    pub scan_time_seconds: Option<f64>,
    pub promoted_count: u32,
    pub error: Option<String>,
}

/// Outcome of a continuous survey run.
#[derive(Debug, Clone, Serialize)]
pub struct SurveyRunResult {
    pub survey_id: String,
    pub complete: bool,
    pub segments_completed: u32,
    pub total_signals: u32,
    pub errors: Vec<String>,
}

/// Executes survey segments with signal tracking and auto-promotion.
pub struct SurveyExecutor<'a> {
    manager: &'a SurveyManager<'a>,
    db: &'a UnifiedDb,
    scanner: SpectrumScanner,
}

impl<'a> SurveyExecutor<'a> {
    pub fn new(manager: &'a SurveyManager<'a>, db: &'a UnifiedDb) -> Self {
        Self {
            manager,
            db,
            scanner: SpectrumScanner::default(),
        }
    }

    #[must_use]
    pub fn with_scanner(mut self, scanner: SpectrumScanner) -> Self {
        self.scanner = scanner;
        self
    }

    /// Execute one segment against the given tuner.
    pub fn execute_segment(
        &self,
        tuner: &mut dyn Tuner,
        segment: &SurveySegment,
        auto_promote: bool,
    ) -> Result<SegmentResult, SurveyError> {
        info!(
            "scanning segment {} ({:.1}-{:.1} MHz)",
            segment.name,
            segment.start_freq_hz / 1e6,
            segment.end_freq_hz / 1e6
        );

        let scan_id = Uuid::new_v4().to_string();
        self.manager.start_segment(&segment.segment_id, &scan_id)?;

        if let Some(survey) = self.manager.get_survey(&segment.survey_id)? {
            if survey.status == SurveyStatus::Pending {
                self.manager
                    .update_survey_status(&segment.survey_id, SurveyStatus::InProgress)?;
            }
        }

        let scan = self.scanner.scan(
            tuner,
            segment.start_freq_hz,
            segment.end_freq_hz,
            Some(segment.step_hz),
            segment.dwell_time_ms,
        );

        let result = match scan {
            Ok(scan) => {
                for peak in &scan.peaks {
                    self.manager.record_signal(
                        &segment.survey_id,
                        &segment.segment_id,
                        peak.frequency_hz,
                        peak.power_db,
                        peak.bandwidth_hz,
                    )?;
                }

                self.manager.complete_segment(
                    &segment.segment_id,
                    scan.peaks.len() as u32,
                    Some(scan.noise_floor_db),
                    Some(scan.scan_time_seconds),
                )?;

                let promoted_count = if auto_promote {
                    self.promote_recurring_signals(&segment.survey_id)?
                } else {
                    0
                };

                info!(
                    "segment {} complete: {} signals in {:.1}s",
                    segment.name,
                    scan.peaks.len(),
                    scan.scan_time_seconds
                );

                SegmentResult {
                    segment_id: segment.segment_id.clone(),
                    success: true,
                    signals_found: scan.peaks.len() as u32,
                    noise_floor_db: Some(scan.noise_floor_db),
                    scan_time_seconds: Some(scan.scan_time_seconds),
                    promoted_count,
                    error: None,
                }
            }
            Err(e) => {
                let message = e.to_string();
                error!("segment {} failed: {message}", segment.name);
                self.manager.fail_segment(&segment.segment_id, &message)?;

                SegmentResult {
                    segment_id: segment.segment_id.clone(),
                    success: false,
                    signals_found: 0,
                    noise_floor_db: None,
                    scan_time_seconds: None,
                    promoted_count: 0,
                    error: Some(message),
                }
            }
        };

        Ok(result)
    }

    /// Execute the next pending segment, or return `None` when the survey
    /// has no pending segments left.
    pub fn execute_next(
        &self,
        tuner: &mut dyn Tuner,
        survey_id: &str,
        auto_promote: bool,
    ) -> Result<Option<SegmentResult>, SurveyError> {
        match self.manager.get_next_segment(survey_id)? {
            Some(segment) => Ok(Some(self.execute_segment(tuner, &segment, auto_promote)?)),
            None => {
                info!("survey {survey_id}: no pending segments");
                Ok(None)
            }
        }
    }

    /// Run segments until the survey has none pending or `max_segments` is
    /// reached. Segment failures are collected, not fatal.
    pub fn run_continuous(
        &self,
        tuner: &mut dyn Tuner,
        survey_id: &str,
        max_segments: Option<u32>,
        auto_promote: bool,
    ) -> Result<SurveyRunResult, SurveyError> {
        let mut segments_completed = 0;
        let mut total_signals = 0;
        let mut errors = Vec::new();

        loop {
            if max_segments.is_some_and(|max| segments_completed >= max) {
                info!("reached segment limit ({segments_completed})");
                break;
            }

            let Some(segment) = self.manager.get_next_segment(survey_id)? else {
                break;
            };

            let result = self.execute_segment(tuner, &segment, auto_promote)?;
            if result.success {
                segments_completed += 1;
                total_signals += result.signals_found;
            } else if let Some(error) = result.error {
                errors.push(format!("{}: {error}", segment.name));
            }
        }

        let complete = self
            .manager
            .get_survey(survey_id)?
            .is_some_and(|s| s.status == SurveyStatus::Completed);

        Ok(SurveyRunResult {
            survey_id: survey_id.to_string(),
            complete,
            segments_completed,
            total_signals,
            errors,
        })
    }

    /// Promote every `discovered` signal that has hit the detection
    /// threshold. Returns the number promoted.
    pub fn promote_recurring_signals(&self, survey_id: &str) -> Result<u32, SurveyError> {
        let candidates = self.manager.get_signals(
            survey_id,
            Some(SignalState::Discovered),
            AUTO_PROMOTE_THRESHOLD,
        )?;

        let mut promoted = 0;
        for signal in candidates {
            if !signal.should_auto_promote(AUTO_PROMOTE_THRESHOLD) {
                continue;
            }
            match self.promote_signal_to_asset(&signal) {
                Ok(asset_id) => {
                    self.db.update_signal_state(
                        &signal.signal_id,
                        SignalState::Promoted,
                        Some(asset_id.as_str()),
                    )?;
                    promoted += 1;
                    info!(
                        "promoted signal at {:.3} MHz to asset {}",
                        signal.frequency_mhz(),
                        &asset_id[..8]
                    );
                }
                Err(e) => {
                    // Signal stays discovered; the next pass retries
                    warn!(
                        "failed to promote signal at {:.3} MHz: {e}",
                        signal.frequency_mhz()
                    );
                }
            }
        }
        Ok(promoted)
    }

    /// Create or refresh the asset backing a recurring signal. Returns the
    /// asset id.
    fn promote_signal_to_asset(&self, signal: &Signal) -> Result<String, SurveyError> {
        let existing = self
            .db
            .find_assets_by_frequency(signal.frequency_hz, FREQUENCY_TOLERANCE_HZ)?;

        if let Some(mut asset) = existing.into_iter().next() {
            asset.touch();
            if signal.power_db > asset.rf_signal_strength_db.unwrap_or(-100.0) {
                asset.rf_signal_strength_db = Some(signal.power_db);
            }
            self.db.update_asset(&asset)?;
            return Ok(asset.id);
        }

        let mut asset = Asset::new(
            format!("Signal at {:.3} MHz", signal.frequency_mhz()),
            AssetType::RfOnly,
        );
        asset.rf_frequency_hz = Some(signal.frequency_hz);
        asset.rf_signal_strength_db = Some(signal.power_db);
        asset.rf_bandwidth_hz = signal.bandwidth_hz;
        asset.rf_protocol = RFProtocol::Unknown;
        asset.discovery_source = Some("spectrum_survey".to_string());
        asset.first_seen = signal.first_seen;
        if let Some(survey_id) = &signal.survey_id {
            asset.metadata.insert(
                "survey_id".to_string(),
                serde_json::Value::String(survey_id.clone()),
            );
        }
        asset.metadata.insert(
            "detection_count".to_string(),
            serde_json::Value::from(signal.detection_count),
        );

        auto_classify_asset(&mut asset);
        self.db.insert_asset(&asset)?;
        Ok(asset.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::survey::manager::CreateSurveyOptions;

    fn survey_with_signal(
        db: &UnifiedDb,
        detections: u32,
    ) -> (String, String) {
        let manager = SurveyManager::new(db);
        let survey = manager
            .create_survey(
                "ism",
                CreateSurveyOptions {
                    start_hz: 433.0e6,
                    end_hz: 435.0e6,
                    full_coverage: false,
                    ..CreateSurveyOptions::default()
                },
            )
            .unwrap();
        let segment = manager.get_next_segment(&survey.survey_id).unwrap().unwrap();
        for _ in 0..detections {
            manager
                .record_signal(&survey.survey_id, &segment.segment_id, 433.92e6, -28.0, None)
                .unwrap();
        }
        (survey.survey_id, segment.segment_id)
    }

    #[test]
    fn below_threshold_signal_is_never_promoted() {
        let db = UnifiedDb::open_in_memory().unwrap();
        let (survey_id, _) = survey_with_signal(&db, 2);
        let manager = SurveyManager::new(&db);
        let executor = SurveyExecutor::new(&manager, &db);

        assert_eq!(executor.promote_recurring_signals(&survey_id).unwrap(), 0);
        assert!(db.get_all_assets(10).unwrap().is_empty());
    }

    #[test]
    fn recurring_signal_becomes_exactly_one_asset() {
        let db = UnifiedDb::open_in_memory().unwrap();
        let (survey_id, _) = survey_with_signal(&db, 4);
        let manager = SurveyManager::new(&db);
        let executor = SurveyExecutor::new(&manager, &db);

        assert_eq!(executor.promote_recurring_signals(&survey_id).unwrap(), 1);

        let assets = db.get_all_assets(10).unwrap();
        assert_eq!(assets.len(), 1);
        let asset = &assets[0];
        assert_eq!(asset.rf_frequency_hz, Some(433.92e6));
        assert_eq!(asset.asset_type, AssetType::RfOnly);
        assert_eq!(asset.discovery_source.as_deref(), Some("spectrum_survey"));
        assert_eq!(
            asset.cmdb_ci_class,
            Some(crate::storage::models::CmdbCiClass::IotDevice)
        );

        // Signal transitioned and carries the asset id
        let signals = manager
            .get_signals(&survey_id, Some(SignalState::Promoted), 1)
            .unwrap();
        assert_eq!(signals.len(), 1);
        assert_eq!(signals[0].promoted_asset_id.as_deref(), Some(asset.id.as_str()));

        // A second pass finds nothing left to promote
        assert_eq!(executor.promote_recurring_signals(&survey_id).unwrap(), 0);
        assert_eq!(db.get_all_assets(10).unwrap().len(), 1);
    }

    #[test]
    fn promotion_updates_existing_asset_at_same_frequency() {
        let db = UnifiedDb::open_in_memory().unwrap();
        let mut existing = Asset::new("known emitter", AssetType::RfOnly);
        existing.rf_frequency_hz = Some(433.93e6);
        existing.rf_signal_strength_db = Some(-40.0);
        db.insert_asset(&existing).unwrap();

        let (survey_id, _) = survey_with_signal(&db, 3);
        let manager = SurveyManager::new(&db);
        let executor = SurveyExecutor::new(&manager, &db);
        assert_eq!(executor.promote_recurring_signals(&survey_id).unwrap(), 1);

        let assets = db.get_all_assets(10).unwrap();
        assert_eq!(assets.len(), 1);
        // Stronger reading wins
        assert_eq!(assets[0].rf_signal_strength_db, Some(-28.0));
        assert_eq!(assets[0].name, "known emitter");
    }
}
