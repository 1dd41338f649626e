//! Medallion transformations: Bronze -> Silver -> Gold.
//!
//! Each stage is a set-based SQL statement against the store. SQLite has no
//! schema namespaces, so layers are table-name prefixes: `bronze_signals`,
//! `silver_verified_signals`, `gold_rf_assets`. Every stage drops and
//! recreates its output table, making reruns idempotent. Dry-run mode
//! reports row counts without writing anything.

use std::time::Instant;

use rusqlite::params;
use serde::Serialize;
use thiserror::Error;
use tracing::{info, warn};

use super::classification::{CMDB_CLASS_CASE_SQL, PROTOCOL_CASE_SQL, PURDUE_LEVEL_CASE_SQL};
use super::db::UnifiedDb;

/// Tables copied verbatim into the bronze layer.
const BRONZE_TABLES: &[&str] = &["signals", "scan_sessions", "survey_segments", "network_scans"];

#[derive(Debug, Error)]
pub enum TransformError {
    #[error("sql error: {0}")]
    Sql(#[from] rusqlite::Error),
}

/// Result of one transformation stage.
#[derive(Debug, Clone, Serialize)]
pub struct TransformResult {
    pub layer: String,
    pub table: String,
    pub rows_created: usize,
    pub rows_source: usize,
    pub duration_seconds: f64,
    pub success: bool,
    pub error: Option<String>,
}

impl TransformResult {
    fn ok(layer: &str, table: &str, created: usize, source: usize, started: Instant) -> Self {
        Self {
            layer: layer.to_string(),
            table: table.to_string(),
            rows_created: created,
            rows_source: source,
            duration_seconds: started.elapsed().as_secs_f64(),
            success: true,
            error: None,
        }
    }

    fn dry_run(layer: &str, table: &str, source: usize, started: Instant) -> Self {
        Self {
            layer: layer.to_string(),
            table: table.to_string(),
            rows_created: 0,
            rows_source: source,
            duration_seconds: started.elapsed().as_secs_f64(),
            success: true,
            error: Some("dry run - no changes made".to_string()),
        }
    }

    fn failed(layer: &str, table: &str, error: String, started: Instant) -> Self {
        Self {
            layer: layer.to_string(),
            table: table.to_string(),
            rows_created: 0,
            rows_source: 0,
            duration_seconds: started.elapsed().as_secs_f64(),
            success: false,
            error: Some(error),
        }
    }
}

/// Thresholds for a pipeline run.
#[derive(Debug, Clone)]
pub struct TransformOptions {
    /// Minimum power for the silver layer (dB).
    pub min_silver_power_db: f64,
    /// Minimum detection count for the silver layer.
    pub min_silver_detections: u32,
    /// Minimum power for gold asset creation (dB).
    pub min_gold_power_db: f64,
    /// Exclude unknown-protocol rows from gold.
    pub known_bands_only: bool,
    /// Report counts without writing.
    pub dry_run: bool,
}

impl Default for TransformOptions {
    fn default() -> Self {
        Self {
            min_silver_power_db: 0.0,
            min_silver_detections: 1,
            min_gold_power_db: 10.0,
            known_bands_only: true,
            dry_run: false,
        }
    }
}

/// Medallion transformer over the unified store.
pub struct MedallionTransformer<'a> {
    db: &'a UnifiedDb,
}

impl<'a> MedallionTransformer<'a> {
    pub fn new(db: &'a UnifiedDb) -> Self {
        Self { db }
    }

    fn table_exists(&self, name: &str) -> Result<bool, TransformError> {
        let count: i64 = self.db.connection().query_row(
            "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?1",
            params![name],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    fn count_query(&self, sql: &str) -> Result<usize, TransformError> {
        let count: i64 = self
            .db
            .connection()
            .query_row(&format!("SELECT COUNT(*) FROM ({sql})"), [], |row| row.get(0))?;
        Ok(count as usize)
    }

    /// Table counts per layer prefix, for status displays.
    pub fn layer_counts(&self, prefix: &str) -> Result<Vec<(String, usize)>, TransformError> {
        let conn = self.db.connection();
        let mut stmt = conn.prepare(
            "SELECT name FROM sqlite_master WHERE type = 'table' AND name LIKE ?1 ORDER BY name",
        )?;
        let names: Vec<String> = stmt
            .query_map(params![format!("{prefix}_%")], |row| row.get(0))?
            .collect::<Result<_, _>>()?;

        let mut counts = Vec::with_capacity(names.len());
        for name in names {
            let count: i64 =
                conn.query_row(&format!("SELECT COUNT(*) FROM \"{name}\""), [], |row| row.get(0))?;
            counts.push((name, count as usize));
        }
        Ok(counts)
    }

    // ========================================================================
    // Bronze
    // ========================================================================

    /// Copy the operational tables into the bronze layer.
    pub fn migrate_to_bronze(&self) -> Vec<TransformResult> {
        let conn = self.db.connection();
        let mut results = Vec::with_capacity(BRONZE_TABLES.len());

        for table in BRONZE_TABLES {
            let started = Instant::now();
            let bronze = format!("bronze_{table}");

            let run = || -> Result<usize, TransformError> {
                conn.execute(&format!("DROP TABLE IF EXISTS \"{bronze}\""), [])?;
                conn.execute(
                    &format!("CREATE TABLE \"{bronze}\" AS SELECT * FROM \"{table}\""),
                    [],
                )?;
                self.count_query(&format!("SELECT * FROM \"{bronze}\""))
            };

            match run() {
                Ok(rows) => {
                    info!("migrated {table} to {bronze} ({rows} rows)");
                    results.push(TransformResult::ok("bronze", table, rows, rows, started));
                }
                Err(e) => {
                    warn!("bronze migration of {table} failed: {e}");
                    results.push(TransformResult::failed("bronze", table, e.to_string(), started));
                }
            }
        }
        results
    }

    // ========================================================================
    // Silver
    // ========================================================================

    fn silver_select(&self, options: &TransformOptions) -> Result<String, TransformError> {
        let source = if self.table_exists("bronze_signals")? {
            "bronze_signals"
        } else {
            "signals"
        };
        Ok(format!(
            "SELECT
                signal_id, frequency_hz, power_db, bandwidth_hz, freq_band,
                detection_count, state, first_seen, last_seen,
                survey_id, segment_id,
                {PROTOCOL_CASE_SQL} AS rf_protocol,
                location_name, year, month
             FROM {source}
             WHERE power_db >= {}
               AND detection_count >= {}
               AND freq_band IS NOT NULL
               AND freq_band NOT IN ('unknown', 'gap')",
            options.min_silver_power_db, options.min_silver_detections
        ))
    }

    /// Bronze signals -> `silver_verified_signals`.
    pub fn bronze_to_silver(&self, options: &TransformOptions) -> TransformResult {
        let started = Instant::now();
        let run = || -> Result<TransformResult, TransformError> {
            let sql = self.silver_select(options)?;
            let source_count = self.count_query(&sql)?;

            if options.dry_run {
                return Ok(TransformResult::dry_run(
                    "silver",
                    "verified_signals",
                    source_count,
                    started,
                ));
            }

            let conn = self.db.connection();
            conn.execute("DROP TABLE IF EXISTS silver_verified_signals", [])?;
            conn.execute(&format!("CREATE TABLE silver_verified_signals AS {sql}"), [])?;
            let created = self.count_query("SELECT * FROM silver_verified_signals")?;

            info!("created silver_verified_signals: {created} rows (from {source_count} bronze)");
            Ok(TransformResult::ok(
                "silver",
                "verified_signals",
                created,
                source_count,
                started,
            ))
        };

        run().unwrap_or_else(|e| {
            TransformResult::failed("silver", "verified_signals", e.to_string(), started)
        })
    }

    /// Per-band aggregation into `silver_band_inventory`.
    pub fn create_band_inventory(&self) -> TransformResult {
        let started = Instant::now();
        let run = || -> Result<TransformResult, TransformError> {
            let source = if self.table_exists("bronze_signals")? {
                "bronze_signals"
            } else {
                "signals"
            };
            let conn = self.db.connection();
            conn.execute("DROP TABLE IF EXISTS silver_band_inventory", [])?;
            conn.execute(
                &format!(
                    "CREATE TABLE silver_band_inventory AS
                     SELECT
                        freq_band,
                        COUNT(*) AS signal_count,
                        MIN(frequency_hz) AS min_freq_hz,
                        MAX(frequency_hz) AS max_freq_hz,
                        AVG(power_db) AS avg_power_db,
                        MAX(power_db) AS max_power_db,
                        MIN(first_seen) AS earliest_detection,
                        MAX(last_seen) AS latest_detection,
                        SUM(detection_count) AS total_detections
                     FROM {source}
                     WHERE freq_band IS NOT NULL
                     GROUP BY freq_band
                     ORDER BY signal_count DESC"
                ),
                [],
            )?;
            let created = self.count_query("SELECT * FROM silver_band_inventory")?;
            info!("created silver_band_inventory: {created} bands");
            Ok(TransformResult::ok(
                "silver",
                "band_inventory",
                created,
                created,
                started,
            ))
        };

        run().unwrap_or_else(|e| {
            TransformResult::failed("silver", "band_inventory", e.to_string(), started)
        })
    }

    // ========================================================================
    // Gold
    // ========================================================================

    fn gold_select(&self, options: &TransformOptions) -> Result<String, TransformError> {
        // In a dry run the silver table may not exist yet; compose the
        // silver selection inline so counts are still meaningful
        let source = if self.table_exists("silver_verified_signals")? {
            "silver_verified_signals".to_string()
        } else {
            format!("({})", self.silver_select(options)?)
        };

        let known_filter = if options.known_bands_only {
            "AND rf_protocol != 'unknown'"
        } else {
            ""
        };

        Ok(format!(
            "SELECT
                lower(hex(randomblob(16))) AS id,
                freq_band || '_' || CAST(ROUND(frequency_hz / 1e6, 1) AS TEXT) || 'MHz' AS name,
                'rf_only' AS asset_type,
                first_seen,
                last_seen,
                1.0 AS correlation_confidence,
                frequency_hz AS rf_frequency_hz,
                power_db AS rf_signal_strength_db,
                bandwidth_hz AS rf_bandwidth_hz,
                rf_protocol,
                {CMDB_CLASS_CASE_SQL} AS cmdb_ci_class,
                {PURDUE_LEVEL_CASE_SQL} AS purdue_level,
                CASE
                    WHEN {PURDUE_LEVEL_CASE_SQL} <= 1 THEN 'REQUIRES_REVIEW'
                    ELSE 'COMPLIANT'
                END AS security_posture,
                CASE
                    WHEN {PURDUE_LEVEL_CASE_SQL} <= 1 THEN 'HIGH'
                    WHEN rf_protocol = 'unknown' THEN 'MEDIUM'
                    ELSE 'LOW'
                END AS risk_level,
                signal_id AS source_signal_id,
                location_name
             FROM {source}
             WHERE power_db >= {}
             {known_filter}",
            options.min_gold_power_db
        ))
    }

    /// Silver signals -> `gold_rf_assets` with lineage.
    pub fn silver_to_gold(&self, options: &TransformOptions) -> TransformResult {
        let started = Instant::now();
        let run = || -> Result<TransformResult, TransformError> {
            let sql = self.gold_select(options)?;
            let source_count = self.count_query(&sql)?;

            if options.dry_run {
                return Ok(TransformResult::dry_run(
                    "gold",
                    "rf_assets",
                    source_count,
                    started,
                ));
            }

            let conn = self.db.connection();
            conn.execute("DROP TABLE IF EXISTS gold_rf_assets", [])?;
            conn.execute(&format!("CREATE TABLE gold_rf_assets AS {sql}"), [])?;
            let created = self.count_query("SELECT * FROM gold_rf_assets")?;

            info!("created gold_rf_assets: {created} assets (from {source_count} silver)");
            Ok(TransformResult::ok(
                "gold",
                "rf_assets",
                created,
                source_count,
                started,
            ))
        };

        run().unwrap_or_else(|e| TransformResult::failed("gold", "rf_assets", e.to_string(), started))
    }

    // ========================================================================
    // Full pipeline
    // ========================================================================

    /// Run bronze -> silver -> gold. In dry-run mode only the counting
    /// stages execute and nothing is written.
    pub fn run_full_pipeline(&self, options: &TransformOptions) -> Vec<TransformResult> {
        let mut results = Vec::new();

        if !options.dry_run {
            results.extend(self.migrate_to_bronze());
        }

        results.push(self.bronze_to_silver(options));

        if !options.dry_run {
            results.push(self.create_band_inventory());
        }

        results.push(self.silver_to_gold(options));
        results
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::models::Signal;

    /// Seed signals across bands and power levels.
    fn seeded_db() -> UnifiedDb {
        let db = UnifiedDb::open_in_memory().unwrap();
        let specs = [
            // (freq, power, band, detections)
            (100.1e6, 15.0, Some("fm_broadcast"), 5),
            (95.5e6, 5.0, Some("fm_broadcast"), 2),
            (433.92e6, 20.0, Some("ism_433"), 4),
            (121.5e6, 12.0, Some("airband_vhf"), 3),
            (50.0e6, 30.0, Some("gap"), 6),
            (70.0e6, 30.0, None, 6),
            (1090.0e6, 14.0, Some("adsb_1090"), 2),
        ];
        for (freq, power, band, detections) in specs {
            let mut signal = Signal::new(freq, power);
            signal.freq_band = band.map(ToString::to_string);
            signal.detection_count = detections;
            db.insert_signal(&signal).unwrap();
        }
        db
    }

    #[test]
    fn silver_filters_power_detections_and_bands() {
        let db = seeded_db();
        let transformer = MedallionTransformer::new(&db);
        let result = transformer.bronze_to_silver(&TransformOptions {
            min_silver_power_db: 10.0,
            min_silver_detections: 3,
            ..TransformOptions::default()
        });

        assert!(result.success);
        // fm 100.1 (15 dB, 5 det), ism 433 (20 dB, 4 det), airband (12 dB, 3 det)
        assert_eq!(result.rows_created, 3);

        // Protocol mapping applied
        let fm_protocol: String = db
            .connection()
            .query_row(
                "SELECT rf_protocol FROM silver_verified_signals WHERE freq_band = 'fm_broadcast'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(fm_protocol, "fm_broadcast");
    }

    #[test]
    fn gold_applies_power_gate_and_risk_heuristics() {
        let db = seeded_db();
        let transformer = MedallionTransformer::new(&db);
        let options = TransformOptions {
            known_bands_only: false,
            ..TransformOptions::default()
        };
        let results = transformer.run_full_pipeline(&options);
        assert!(results.iter().all(|r| r.success));

        let (name, risk): (String, String) = db
            .connection()
            .query_row(
                "SELECT name, risk_level FROM gold_rf_assets WHERE rf_protocol = 'fm_broadcast'",
                [],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .unwrap();
        assert_eq!(name, "fm_broadcast_100.1MHz");
        assert_eq!(risk, "LOW");

        // Unknown-protocol airband row is medium risk
        let airband_risk: String = db
            .connection()
            .query_row(
                "SELECT risk_level FROM gold_rf_assets WHERE source_signal_id IN
                 (SELECT signal_id FROM signals WHERE freq_band = 'airband_vhf')",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(airband_risk, "MEDIUM");
    }

    #[test]
    fn pipeline_counts_are_monotonic() {
        let db = seeded_db();
        let transformer = MedallionTransformer::new(&db);
        let results = transformer.run_full_pipeline(&TransformOptions {
            known_bands_only: false,
            ..TransformOptions::default()
        });

        let bronze = results
            .iter()
            .find(|r| r.layer == "bronze" && r.table == "signals")
            .unwrap();
        let silver = results
            .iter()
            .find(|r| r.layer == "silver" && r.table == "verified_signals")
            .unwrap();
        let gold = results.iter().find(|r| r.layer == "gold").unwrap();

        assert!(silver.rows_created <= bronze.rows_created);
        assert!(gold.rows_created <= silver.rows_created);
    }

    #[test]
    fn dry_run_writes_nothing_and_counts_match() {
        let db = seeded_db();
        let transformer = MedallionTransformer::new(&db);
        let results = transformer.run_full_pipeline(&TransformOptions {
            dry_run: true,
            ..TransformOptions::default()
        });

        // Nothing materialized
        assert!(!transformer.table_exists("bronze_signals").unwrap());
        assert!(!transformer.table_exists("silver_verified_signals").unwrap());
        assert!(!transformer.table_exists("gold_rf_assets").unwrap());

        let silver = results.iter().find(|r| r.layer == "silver").unwrap();
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
        assert_eq!(silver.rows_created, 0);

        let gold = results.iter().find(|r| r.layer == "gold").unwrap();
        assert!(gold.success);
        assert!(gold.rows_source <= silver.rows_source);
    }

    #[test]
    fn reruns_are_idempotent() {
        let db = seeded_db();
        let transformer = MedallionTransformer::new(&db);
        let options = TransformOptions::default();

        let first = transformer.run_full_pipeline(&options);
        let second = transformer.run_full_pipeline(&options);

        let counts = |results: &[TransformResult]| -> Vec<usize> {
            results.iter().map(|r| r.rows_created).collect()
        };
        assert_eq!(counts(&first), counts(&second));
    }
}
