//! Survey resumability and promotion scenarios against a file-backed store.

use rf_sentinel::storage::models::{CmdbCiClass, SignalState};
use rf_sentinel::storage::UnifiedDb;
use rf_sentinel::survey::{
    CreateSurveyOptions, SurveyExecutor, SurveyManager, SurveyStatus,
};

/// A fresh process attaching to the same store can continue a survey where
/// the previous one left off.
#[test]
fn survey_resumes_across_connections() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("survey.db");

    let survey_id = {
        let db = UnifiedDb::open(&db_path).unwrap();
        let manager = SurveyManager::new(&db);
        let survey = manager
            .create_survey(
                "resume test",
                CreateSurveyOptions {
                    start_hz: 88.0e6,
                    end_hz: 165.0e6,
                    full_coverage: false,
                    ..CreateSurveyOptions::default()
                },
            )
            .unwrap();
        assert!(survey.total_segments >= 2);

        // Execute one segment without touching the tuner: claim it,
        // record a signal, complete it
        let segment = manager.get_next_segment(&survey.survey_id).unwrap().unwrap();
        manager.start_segment(&segment.segment_id, "scan-1").unwrap();
        manager
            .update_survey_status(&survey.survey_id, SurveyStatus::InProgress)
            .unwrap();
        manager
            .record_signal(&survey.survey_id, &segment.segment_id, 121.5e6, -20.0, None)
            .unwrap();
        manager
            .complete_segment(&segment.segment_id, 1, Some(-60.0), Some(2.0))
            .unwrap();

        survey.survey_id
        // Connection dropped here: the "crash"
    };

    // Reattach from a fresh connection
    let db = UnifiedDb::open(&db_path).unwrap();
    let manager = SurveyManager::new(&db);

    let survey = manager.get_survey(&survey_id).unwrap().unwrap();
    assert_eq!(survey.status, SurveyStatus::InProgress);
    assert_eq!(survey.completed_segments, 1);
    assert_eq!(survey.total_signals_found, 1);

    let next = manager.get_next_segment(&survey_id).unwrap();
    assert!(next.is_some(), "expected a pending segment after reattach");
}

/// Four detections of the same frequency produce one signal row, and the
/// promotion pass turns it into exactly one classified asset.
#[test]
fn repeated_detections_promote_to_one_asset() {
    let dir = tempfile::tempdir().unwrap();
    let db = UnifiedDb::open(dir.path().join("promo.db")).unwrap();
    let manager = SurveyManager::new(&db);
    let executor = SurveyExecutor::new(&manager, &db);

    let survey = manager
        .create_survey(
            "ism watch",
            CreateSurveyOptions {
                start_hz: 433.0e6,
                end_hz: 435.0e6,
                full_coverage: false,
                ..CreateSurveyOptions::default()
            },
        )
        .unwrap();
    let segment = manager.get_next_segment(&survey.survey_id).unwrap().unwrap();

    for _ in 0..4 {
        manager
            .record_signal(&survey.survey_id, &segment.segment_id, 433.92e6, -28.0, None)
            .unwrap();
    }

    let signals = manager.get_signals(&survey.survey_id, None, 1).unwrap();
    assert_eq!(signals.len(), 1);
    assert_eq!(signals[0].detection_count, 4);
    assert_eq!(signals[0].state, SignalState::Discovered);

    let promoted = executor.promote_recurring_signals(&survey.survey_id).unwrap();
    assert_eq!(promoted, 1);

    let signals = manager.get_signals(&survey.survey_id, None, 1).unwrap();
    assert_eq!(signals[0].state, SignalState::Promoted);

    let assets = db.get_all_assets(10).unwrap();
    assert_eq!(assets.len(), 1);
    assert_eq!(assets[0].rf_frequency_hz, Some(433.92e6));
    assert_eq!(assets[0].cmdb_ci_class, Some(CmdbCiClass::IotDevice));
    assert_eq!(
        signals[0].promoted_asset_id.as_deref(),
        Some(assets[0].id.as_str())
    );
}
