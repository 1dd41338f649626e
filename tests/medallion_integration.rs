//! Medallion pipeline over a populated store.

use rf_sentinel::storage::models::Signal;
use rf_sentinel::storage::transform::{MedallionTransformer, TransformOptions};
use rf_sentinel::storage::UnifiedDb;

const BANDS: &[&str] = &["fm_broadcast", "ism_433", "airband_vhf", "adsb_1090", "gap"];

fn populated_db(rows: usize) -> UnifiedDb {
    let db = UnifiedDb::open_in_memory().unwrap();
    for i in 0..rows {
        let mut signal = Signal::new(88.0e6 + i as f64 * 10_000.0, (i % 40) as f64 - 10.0);
        signal.freq_band = Some(BANDS[i % BANDS.len()].to_string());
        signal.detection_count = (i % 5 + 1) as u32;
        db.insert_signal(&signal).unwrap();
    }
    db
}

/// Dry run reports source counts at each stage without creating tables,
/// and the counts match direct queries.
#[test]
fn dry_run_counts_match_queries() {
    let db = populated_db(1000);
    let transformer = MedallionTransformer::new(&db);

    let results = transformer.run_full_pipeline(&TransformOptions {
        dry_run: true,
        min_gold_power_db: 10.0,
        ..TransformOptions::default()
    });

    // No tables were created
    let table_count: i64 = db
        .connection()
        .query_row(
            "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table'
             AND (name LIKE 'bronze_%' OR name LIKE 'silver_%' OR name LIKE 'gold_%')",
            [],
            |row| row.get(0),
        )
        .unwrap();
    assert_eq!(table_count, 0);

    let silver = results.iter().find(|r| r.layer == "silver").unwrap();
    assert!(silver.success);
    assert_eq!(silver.rows_created, 0);

    let expected_silver: i64 = db
        .connection()
        .query_row(
            "SELECT COUNT(*) FROM signals
             WHERE power_db >= 0 AND detection_count >= 1
               AND freq_band IS NOT NULL AND freq_band NOT IN ('unknown', 'gap')",
            [],
            |row| row.get(0),
        )
        .unwrap();
    assert_eq!(silver.rows_source as i64, expected_silver);

    let gold = results.iter().find(|r| r.layer == "gold").unwrap();
    assert!(gold.success);
    assert_eq!(gold.rows_created, 0);

    let expected_gold: i64 = db
        .connection()
        .query_row(
            "SELECT COUNT(*) FROM signals
             WHERE power_db >= 10 AND detection_count >= 1
               AND freq_band IN ('fm_broadcast', 'adsb_1090')",
            [],
            |row| row.get(0),
        )
        .unwrap();
    assert_eq!(gold.rows_source as i64, expected_gold);
}

/// Counts only ever shrink down the layers.
#[test]
fn layer_counts_are_monotonic() {
    let db = populated_db(1000);
    let transformer = MedallionTransformer::new(&db);

    let results = transformer.run_full_pipeline(&TransformOptions {
        known_bands_only: false,
        ..TransformOptions::default()
    });
    assert!(results.iter().all(|r| r.success));

    let bronze = results
        .iter()
        .find(|r| r.layer == "bronze" && r.table == "signals")
        .unwrap();
    let silver = results
        .iter()
        .find(|r| r.layer == "silver" && r.table == "verified_signals")
        .unwrap();
    let gold = results.iter().find(|r| r.layer == "gold").unwrap();

    assert_eq!(bronze.rows_created, 1000);
    assert!(silver.rows_created <= bronze.rows_created);
    assert!(gold.rows_created <= silver.rows_created);

    // Gold rows carry lineage back to silver signal ids
    let orphans: i64 = db
        .connection()
        .query_row(
            "SELECT COUNT(*) FROM gold_rf_assets
             WHERE source_signal_id NOT IN (SELECT signal_id FROM silver_verified_signals)",
            [],
            |row| row.get(0),
        )
        .unwrap();
    assert_eq!(orphans, 0);
}

/// The wet run after a dry run produces exactly the counts the dry run
/// predicted.
#[test]
fn dry_run_predicts_wet_run() {
    let db = populated_db(500);
    let transformer = MedallionTransformer::new(&db);
    let options = TransformOptions::default();

    let dry = transformer.run_full_pipeline(&TransformOptions {
        dry_run: true,
        ..options.clone()
    });
    let wet = transformer.run_full_pipeline(&options);

    let pick = |results: &[rf_sentinel::storage::TransformResult], layer: &str| {
        results
            .iter()
            .find(|r| r.layer == layer && r.table != "band_inventory")
            .map(|r| (r.rows_source, r.rows_created))
            .unwrap()
    };

    assert_eq!(pick(&dry, "silver").0, pick(&wet, "silver").1);
    assert_eq!(pick(&dry, "gold").0, pick(&wet, "gold").1);
}
