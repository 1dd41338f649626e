//! End-to-end synthetic run: survey a band with the simulated tuner,
//! promote recurring signals, then run the medallion transform.
//!
//! Useful for exercising the whole pipeline without hardware:
//!
//! ```bash
//! cargo run --bin simulation
//! ```

use anyhow::Result;
use tracing::info;
use tracing_subscriber::EnvFilter;

use rf_sentinel::device::sim::SimulatedTuner;
use rf_sentinel::device::TunerParams;
use rf_sentinel::storage::transform::{MedallionTransformer, TransformOptions};
use rf_sentinel::storage::UnifiedDb;
use rf_sentinel::survey::{CreateSurveyOptions, SurveyExecutor, SurveyManager};

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let db = UnifiedDb::open_in_memory()?;
    let manager = SurveyManager::new(&db);
    let executor = SurveyExecutor::new(&manager, &db);

    let mut tuner = SimulatedTuner::new(TunerParams::default(), -60.0)
        .with_carrier(100.1e6, -18.0)
        .with_carrier(433.92e6, -24.0)
        .with_carrier(121.5e6, -26.0);

    let survey = manager.create_survey(
        "synthetic survey",
        CreateSurveyOptions {
            start_hz: 87.5e6,
            end_hz: 450.0e6,
            full_coverage: false,
            location_name: Some("simulation".to_string()),
            ..CreateSurveyOptions::default()
        },
    )?;
    info!(
        "survey {} created with {} segments",
        survey.survey_id, survey.total_segments
    );

    // Run the survey a few times over so recurring signals cross the
    // promotion threshold
    for pass in 1..=3 {
        let result = executor.run_continuous(&mut tuner, &survey.survey_id, None, true)?;
        info!(
            "pass {pass}: {} segments, {} signals",
            result.segments_completed, result.total_signals
        );
        if pass < 3 {
            // Reopen completed segments for another detection round
            for segment in manager.get_segments(&survey.survey_id)? {
                let _ = db.connection().execute(
                    "UPDATE survey_segments SET status = 'pending', completed_at = NULL
                     WHERE segment_id = ?1",
                    rusqlite::params![segment.segment_id],
                );
            }
        }
    }

    let promoted = executor.promote_recurring_signals(&survey.survey_id)?;
    info!("promoted {promoted} signals this pass");

    let stats = db.get_statistics()?;
    info!(
        "store now holds {} assets, {} signals",
        stats.assets, stats.signals
    );

    let transformer = MedallionTransformer::new(&db);
    for result in transformer.run_full_pipeline(&TransformOptions {
        known_bands_only: false,
        ..TransformOptions::default()
    }) {
        info!(
            "{}.{}: {} rows (from {})",
            result.layer, result.table, result.rows_created, result.rows_source
        );
    }

    Ok(())
}
