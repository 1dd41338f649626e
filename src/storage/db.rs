//! Unified embedded store for assets, signals, and scan history.
//!
//! One SQLite file holds every canonical table. The connection is
//! single-writer: at most one thread may hold the write connection at a
//! time, and `UnifiedDb` is deliberately not `Sync`: wrap it in a mutex or
//! open independent read connections if you need sharing.
//!
//! Bulk export emits one Parquet file per table; CSV export is available
//! for `assets` only.

use std::collections::HashMap;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use arrow::array::{ArrayRef, Float64Array, Int64Array, StringArray};
use arrow::datatypes::{DataType, Field, Schema};
use arrow::record_batch::RecordBatch;
use chrono::{DateTime, Utc};
use parquet::arrow::ArrowWriter;
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, info};

use super::models::{
    Asset, AssetType, CmdbCiClass, DeviceCategory, NetworkScan, PurdueLevel, RFProtocol,
    RiskLevel, ScanSession, ScanType, SecurityPosture, Signal, SignalState,
};

/// Tables eligible for bulk Parquet export.
pub const EXPORT_TABLES: &[&str] = &[
    "assets",
    "signals",
    "network_scans",
    "scan_sessions",
    "spectrum_surveys",
    "survey_segments",
];

const SCHEMA_SQL: &str = "
CREATE TABLE IF NOT EXISTS assets (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    asset_type TEXT NOT NULL,
    first_seen TEXT NOT NULL,
    last_seen TEXT NOT NULL,
    correlation_confidence REAL NOT NULL DEFAULT 0,
    rf_frequency_hz REAL,
    rf_signal_strength_db REAL,
    rf_bandwidth_hz REAL,
    rf_modulation_type TEXT,
    rf_fingerprint_hash TEXT,
    net_mac_address TEXT,
    net_ip_address TEXT,
    net_hostname TEXT,
    net_open_ports TEXT,
    net_vendor TEXT,
    net_os_guess TEXT,
    discovery_source TEXT,
    metadata TEXT,
    cmdb_ci_class TEXT,
    cmdb_sys_id TEXT,
    rf_protocol TEXT NOT NULL DEFAULT 'unknown',
    security_posture TEXT NOT NULL DEFAULT 'unknown',
    risk_level TEXT NOT NULL DEFAULT 'informational',
    purdue_level INTEGER,
    device_category TEXT,
    ot_protocol TEXT,
    ot_criticality TEXT
);
CREATE INDEX IF NOT EXISTS idx_assets_frequency ON assets(rf_frequency_hz);
CREATE INDEX IF NOT EXISTS idx_assets_mac ON assets(net_mac_address);

CREATE TABLE IF NOT EXISTS signals (
    signal_id TEXT PRIMARY KEY,
    frequency_hz REAL NOT NULL,
    power_db REAL NOT NULL,
    bandwidth_hz REAL,
    freq_band TEXT,
    first_seen TEXT NOT NULL,
    last_seen TEXT NOT NULL,
    detection_count INTEGER NOT NULL DEFAULT 1,
    state TEXT NOT NULL DEFAULT 'discovered',
    survey_id TEXT,
    segment_id TEXT,
    scan_id TEXT,
    sigmf_path TEXT,
    rf_protocol TEXT NOT NULL DEFAULT 'unknown',
    notes TEXT,
    promoted_asset_id TEXT,
    location_name TEXT,
    year INTEGER NOT NULL,
    month INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_signals_survey ON signals(survey_id);
CREATE INDEX IF NOT EXISTS idx_signals_partition ON signals(location_name, year, month);
CREATE INDEX IF NOT EXISTS idx_signals_frequency ON signals(frequency_hz);

CREATE TABLE IF NOT EXISTS network_scans (
    scan_id TEXT PRIMARY KEY,
    timestamp TEXT NOT NULL,
    subnet TEXT NOT NULL,
    hosts_found INTEGER NOT NULL DEFAULT 0,
    results TEXT
);

CREATE TABLE IF NOT EXISTS scan_sessions (
    scan_id TEXT PRIMARY KEY,
    scan_type TEXT NOT NULL,
    start_time TEXT NOT NULL,
    end_time TEXT,
    parameters TEXT,
    results_summary TEXT
);

CREATE TABLE IF NOT EXISTS spectrum_surveys (
    survey_id TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    status TEXT NOT NULL DEFAULT 'pending',
    created_at TEXT NOT NULL,
    started_at TEXT,
    completed_at TEXT,
    last_activity_at TEXT,
    start_freq_hz REAL NOT NULL,
    end_freq_hz REAL NOT NULL,
    total_segments INTEGER NOT NULL DEFAULT 0,
    completed_segments INTEGER NOT NULL DEFAULT 0,
    completion_pct REAL NOT NULL DEFAULT 0,
    total_signals_found INTEGER NOT NULL DEFAULT 0,
    config TEXT,
    location_name TEXT,
    run_number INTEGER,
    baseline_survey_id TEXT
);

CREATE TABLE IF NOT EXISTS survey_segments (
    segment_id TEXT PRIMARY KEY,
    survey_id TEXT NOT NULL,
    name TEXT NOT NULL,
    start_freq_hz REAL NOT NULL,
    end_freq_hz REAL NOT NULL,
    priority INTEGER NOT NULL,
    step_hz REAL NOT NULL,
    dwell_time_ms REAL NOT NULL,
    status TEXT NOT NULL DEFAULT 'pending',
    scan_id TEXT,
    error_message TEXT,
    signals_found INTEGER NOT NULL DEFAULT 0,
    noise_floor_db REAL,
    scan_time_seconds REAL,
    started_at TEXT,
    completed_at TEXT
);
CREATE INDEX IF NOT EXISTS idx_segments_survey ON survey_segments(survey_id, status);
";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("sql error: {0}")]
    Sql(#[from] rusqlite::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("export error: {0}")]
    Export(String),

    #[error("invalid column value in {table}.{column}: {value}")]
    InvalidColumn {
        table: &'static str,
        column: &'static str,
        value: String,
    },

    #[error("not found: {0}")]
    NotFound(String),
}

/// Per-table and per-classification counts.
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct StoreStatistics {
    pub assets: u64,
    pub signals: u64,
    pub scan_sessions: u64,
    pub network_scans: u64,
    pub surveys: u64,
    pub protocol_distribution: HashMap<String, u64>,
    pub posture_distribution: HashMap<String, u64>,
}

/// Unified database handle. See the module docs for the concurrency
/// contract.
pub struct UnifiedDb {
    conn: Connection,
    path: Option<PathBuf>,
}

/// Fixed-width RFC 3339 with microsecond precision and a `Z` suffix.
///
/// Timestamps are TEXT columns compared lexicographically in SQL, so the
/// width must not vary with the value.
pub(crate) fn fmt_ts(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(chrono::SecondsFormat::Micros, true)
}

fn parse_datetime(raw: &str, table: &'static str, column: &'static str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|_| StoreError::InvalidColumn {
            table,
            column,
            value: raw.to_string(),
        })
}

impl UnifiedDb {
    /// Open (creating if needed) the store at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        let db = Self {
            conn,
            path: Some(path.to_path_buf()),
        };
        db.initialize_schema()?;
        info!("connected to store: {}", path.display());
        Ok(db)
    }

    /// Open an in-memory store (tests, dry runs).
    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        let db = Self { conn, path: None };
        db.initialize_schema()?;
        Ok(db)
    }

    fn initialize_schema(&self) -> Result<(), StoreError> {
        self.conn.execute_batch(SCHEMA_SQL)?;
        debug!("schema initialized");
        Ok(())
    }

    /// Raw connection for subsystems that own their SQL (survey manager,
    /// medallion transform). The single-writer contract still applies.
    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    // ========================================================================
    // Assets
    // ========================================================================

    pub fn insert_asset(&self, asset: &Asset) -> Result<(), StoreError> {
        self.conn.execute(
            "INSERT INTO assets (
                id, name, asset_type, first_seen, last_seen, correlation_confidence,
                rf_frequency_hz, rf_signal_strength_db, rf_bandwidth_hz,
                rf_modulation_type, rf_fingerprint_hash,
                net_mac_address, net_ip_address, net_hostname, net_open_ports,
                net_vendor, net_os_guess, discovery_source, metadata,
                cmdb_ci_class, cmdb_sys_id, rf_protocol, security_posture,
                risk_level, purdue_level, device_category, ot_protocol, ot_criticality
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14,
                      ?15, ?16, ?17, ?18, ?19, ?20, ?21, ?22, ?23, ?24, ?25, ?26, ?27, ?28)",
            params![
                asset.id,
                asset.name,
                asset.asset_type.as_str(),
                fmt_ts(&asset.first_seen),
                fmt_ts(&asset.last_seen),
                asset.correlation_confidence,
                asset.rf_frequency_hz,
                asset.rf_signal_strength_db,
                asset.rf_bandwidth_hz,
                asset.rf_modulation_type,
                asset.rf_fingerprint_hash,
                asset.net_mac_address,
                asset.net_ip_address,
                asset.net_hostname,
                serde_json::to_string(&asset.net_open_ports)?,
                asset.net_vendor,
                asset.net_os_guess,
                asset.discovery_source,
                serde_json::to_string(&asset.metadata)?,
                asset.cmdb_ci_class.map(CmdbCiClass::as_str),
                asset.cmdb_sys_id,
                asset.rf_protocol.as_str(),
                asset.security_posture.as_str(),
                asset.risk_level.as_str(),
                asset.purdue_level.map(PurdueLevel::as_i64),
                asset.device_category.map(DeviceCategory::as_str),
                asset.ot_protocol,
                asset.ot_criticality,
            ],
        )?;
        debug!("inserted asset {}", asset.id);
        Ok(())
    }

    pub fn update_asset(&self, asset: &Asset) -> Result<(), StoreError> {
        let changed = self.conn.execute(
            "UPDATE assets SET
                name = ?2, asset_type = ?3, last_seen = ?4, correlation_confidence = ?5,
                rf_frequency_hz = ?6, rf_signal_strength_db = ?7, rf_bandwidth_hz = ?8,
                rf_modulation_type = ?9, rf_fingerprint_hash = ?10,
                net_mac_address = ?11, net_ip_address = ?12, net_hostname = ?13,
                net_open_ports = ?14, net_vendor = ?15, net_os_guess = ?16,
                discovery_source = ?17, metadata = ?18,
                cmdb_ci_class = ?19, cmdb_sys_id = ?20, rf_protocol = ?21,
                security_posture = ?22, risk_level = ?23, purdue_level = ?24,
                device_category = ?25, ot_protocol = ?26, ot_criticality = ?27
             WHERE id = ?1",
            params![
                asset.id,
                asset.name,
                asset.asset_type.as_str(),
                fmt_ts(&asset.last_seen),
                asset.correlation_confidence,
                asset.rf_frequency_hz,
                asset.rf_signal_strength_db,
                asset.rf_bandwidth_hz,
                asset.rf_modulation_type,
                asset.rf_fingerprint_hash,
                asset.net_mac_address,
                asset.net_ip_address,
                asset.net_hostname,
                serde_json::to_string(&asset.net_open_ports)?,
                asset.net_vendor,
                asset.net_os_guess,
                asset.discovery_source,
                serde_json::to_string(&asset.metadata)?,
                asset.cmdb_ci_class.map(CmdbCiClass::as_str),
                asset.cmdb_sys_id,
                asset.rf_protocol.as_str(),
                asset.security_posture.as_str(),
                asset.risk_level.as_str(),
                asset.purdue_level.map(PurdueLevel::as_i64),
                asset.device_category.map(DeviceCategory::as_str),
                asset.ot_protocol,
                asset.ot_criticality,
            ],
        )?;
        if changed == 0 {
            return Err(StoreError::NotFound(asset.id.clone()));
        }
        Ok(())
    }

    pub fn get_asset(&self, asset_id: &str) -> Result<Option<Asset>, StoreError> {
        self.conn
            .query_row(
                "SELECT * FROM assets WHERE id = ?1",
                params![asset_id],
                |row| Ok(Self::row_to_asset(row)),
            )
            .optional()?
            .transpose()
    }

    /// Assets within `tolerance_hz` of a frequency, closest first.
    pub fn find_assets_by_frequency(
        &self,
        freq_hz: f64,
        tolerance_hz: f64,
    ) -> Result<Vec<Asset>, StoreError> {
        let mut stmt = self.conn.prepare(
            "SELECT * FROM assets
             WHERE rf_frequency_hz BETWEEN ?1 AND ?2
             ORDER BY ABS(rf_frequency_hz - ?3)",
        )?;
        let rows = stmt.query_map(
            params![freq_hz - tolerance_hz, freq_hz + tolerance_hz, freq_hz],
            |row| Ok(Self::row_to_asset(row)),
        )?;
        rows.map(|r| r.map_err(StoreError::from).and_then(|a| a))
            .collect()
    }

    /// Case-insensitive exact MAC lookup.
    pub fn find_assets_by_mac(&self, mac: &str) -> Result<Vec<Asset>, StoreError> {
        let mut stmt = self
            .conn
            .prepare("SELECT * FROM assets WHERE LOWER(net_mac_address) = LOWER(?1)")?;
        let rows = stmt.query_map(params![mac], |row| Ok(Self::row_to_asset(row)))?;
        rows.map(|r| r.map_err(StoreError::from).and_then(|a| a))
            .collect()
    }

    pub fn find_assets_by_protocol(&self, protocol: RFProtocol) -> Result<Vec<Asset>, StoreError> {
        let mut stmt = self
            .conn
            .prepare("SELECT * FROM assets WHERE rf_protocol = ?1")?;
        let rows = stmt.query_map(params![protocol.as_str()], |row| {
            Ok(Self::row_to_asset(row))
        })?;
        rows.map(|r| r.map_err(StoreError::from).and_then(|a| a))
            .collect()
    }

    pub fn get_all_assets(&self, limit: usize) -> Result<Vec<Asset>, StoreError> {
        let mut stmt = self
            .conn
            .prepare("SELECT * FROM assets ORDER BY last_seen DESC LIMIT ?1")?;
        let rows = stmt.query_map(params![limit as i64], |row| Ok(Self::row_to_asset(row)))?;
        rows.map(|r| r.map_err(StoreError::from).and_then(|a| a))
            .collect()
    }

    fn row_to_asset(row: &Row<'_>) -> Result<Asset, StoreError> {
        let first_seen: String = row.get("first_seen")?;
        let last_seen: String = row.get("last_seen")?;
        let asset_type_raw: String = row.get("asset_type")?;
        let protocol_raw: String = row.get("rf_protocol")?;
        let posture_raw: String = row.get("security_posture")?;
        let risk_raw: String = row.get("risk_level")?;
        let ports_raw: Option<String> = row.get("net_open_ports")?;
        let metadata_raw: Option<String> = row.get("metadata")?;
        let ci_class_raw: Option<String> = row.get("cmdb_ci_class")?;
        let category_raw: Option<String> = row.get("device_category")?;
        let purdue_raw: Option<i64> = row.get("purdue_level")?;

        Ok(Asset {
            id: row.get("id")?,
            name: row.get("name")?,
            asset_type: AssetType::parse(&asset_type_raw).ok_or(StoreError::InvalidColumn {
                table: "assets",
                column: "asset_type",
                value: asset_type_raw,
            })?,
            first_seen: parse_datetime(&first_seen, "assets", "first_seen")?,
            last_seen: parse_datetime(&last_seen, "assets", "last_seen")?,
            correlation_confidence: row.get("correlation_confidence")?,
            rf_frequency_hz: row.get("rf_frequency_hz")?,
            rf_signal_strength_db: row.get("rf_signal_strength_db")?,
            rf_bandwidth_hz: row.get("rf_bandwidth_hz")?,
            rf_modulation_type: row.get("rf_modulation_type")?,
            rf_fingerprint_hash: row.get("rf_fingerprint_hash")?,
            net_mac_address: row.get("net_mac_address")?,
            net_ip_address: row.get("net_ip_address")?,
            net_hostname: row.get("net_hostname")?,
            net_open_ports: ports_raw
                .as_deref()
                .map(serde_json::from_str)
                .transpose()?
                .unwrap_or_default(),
            net_vendor: row.get("net_vendor")?,
            net_os_guess: row.get("net_os_guess")?,
            discovery_source: row.get("discovery_source")?,
            metadata: metadata_raw
                .as_deref()
                .map(serde_json::from_str)
                .transpose()?
                .unwrap_or_default(),
            cmdb_ci_class: ci_class_raw.as_deref().and_then(CmdbCiClass::parse),
            cmdb_sys_id: row.get("cmdb_sys_id")?,
            rf_protocol: RFProtocol::parse(&protocol_raw).unwrap_or(RFProtocol::Unknown),
            security_posture: SecurityPosture::parse(&posture_raw)
                .unwrap_or(SecurityPosture::Unknown),
            risk_level: RiskLevel::parse(&risk_raw).unwrap_or(RiskLevel::Informational),
            purdue_level: purdue_raw.and_then(PurdueLevel::from_i64),
            device_category: category_raw.as_deref().and_then(DeviceCategory::parse),
            ot_protocol: row.get("ot_protocol")?,
            ot_criticality: row.get("ot_criticality")?,
        })
    }

    // ========================================================================
    // Signals
    // ========================================================================

    pub fn insert_signal(&self, signal: &Signal) -> Result<(), StoreError> {
        self.conn.execute(
            "INSERT INTO signals (
                signal_id, frequency_hz, power_db, bandwidth_hz, freq_band,
                first_seen, last_seen, detection_count, state,
                survey_id, segment_id, scan_id, sigmf_path,
                rf_protocol, notes, promoted_asset_id,
                location_name, year, month
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10,
                      ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18, ?19)",
            params![
                signal.signal_id,
                signal.frequency_hz,
                signal.power_db,
                signal.bandwidth_hz,
                signal.freq_band,
                fmt_ts(&signal.first_seen),
                fmt_ts(&signal.last_seen),
                signal.detection_count,
                signal.state.as_str(),
                signal.survey_id,
                signal.segment_id,
                signal.scan_id,
                signal.sigmf_path,
                signal.rf_protocol.as_str(),
                signal.notes,
                signal.promoted_asset_id,
                signal.location_name,
                signal.year,
                signal.month,
            ],
        )?;
        Ok(())
    }

    pub fn get_signal(&self, signal_id: &str) -> Result<Option<Signal>, StoreError> {
        self.conn
            .query_row(
                "SELECT * FROM signals WHERE signal_id = ?1",
                params![signal_id],
                |row| Ok(Self::row_to_signal(row)),
            )
            .optional()?
            .transpose()
    }

    /// The signal in a survey nearest to `freq_hz` within `tolerance_hz`.
    pub fn find_signal_in_survey(
        &self,
        survey_id: &str,
        freq_hz: f64,
        tolerance_hz: f64,
    ) -> Result<Option<Signal>, StoreError> {
        self.conn
            .query_row(
                "SELECT * FROM signals
                 WHERE survey_id = ?1 AND ABS(frequency_hz - ?2) < ?3
                 ORDER BY ABS(frequency_hz - ?2)
                 LIMIT 1",
                params![survey_id, freq_hz, tolerance_hz],
                |row| Ok(Self::row_to_signal(row)),
            )
            .optional()?
            .transpose()
    }

    /// Register another detection of an existing signal: bump the count,
    /// refresh `last_seen`, keep the strongest power.
    pub fn record_signal_detection(
        &self,
        signal_id: &str,
        power_db: f64,
    ) -> Result<(), StoreError> {
        let changed = self.conn.execute(
            "UPDATE signals
             SET detection_count = detection_count + 1,
                 last_seen = ?2,
                 power_db = MAX(power_db, ?3)
             WHERE signal_id = ?1",
            params![signal_id, fmt_ts(&Utc::now()), power_db],
        )?;
        if changed == 0 {
            return Err(StoreError::NotFound(signal_id.to_string()));
        }
        Ok(())
    }

    pub fn update_signal_state(
        &self,
        signal_id: &str,
        state: SignalState,
        promoted_asset_id: Option<&str>,
    ) -> Result<(), StoreError> {
        let changed = self.conn.execute(
            "UPDATE signals
             SET state = ?2,
                 promoted_asset_id = COALESCE(?3, promoted_asset_id)
             WHERE signal_id = ?1",
            params![signal_id, state.as_str(), promoted_asset_id],
        )?;
        if changed == 0 {
            return Err(StoreError::NotFound(signal_id.to_string()));
        }
        Ok(())
    }

    pub fn get_signals_by_survey(
        &self,
        survey_id: &str,
        state: Option<SignalState>,
        min_detections: u32,
    ) -> Result<Vec<Signal>, StoreError> {
        let mut signals = Vec::new();
        match state {
            Some(state) => {
                let mut stmt = self.conn.prepare(
                    "SELECT * FROM signals
                     WHERE survey_id = ?1 AND state = ?2 AND detection_count >= ?3
                     ORDER BY frequency_hz",
                )?;
                let rows = stmt.query_map(params![survey_id, state.as_str(), min_detections], |row| {
                    Ok(Self::row_to_signal(row))
                })?;
                for row in rows {
                    signals.push(row??);
                }
            }
            None => {
                let mut stmt = self.conn.prepare(
                    "SELECT * FROM signals
                     WHERE survey_id = ?1 AND detection_count >= ?2
                     ORDER BY frequency_hz",
                )?;
                let rows = stmt.query_map(params![survey_id, min_detections], |row| {
                    Ok(Self::row_to_signal(row))
                })?;
                for row in rows {
                    signals.push(row??);
                }
            }
        }
        Ok(signals)
    }

    /// Partition-pruned lookup by location and month.
    pub fn get_signals_by_location(
        &self,
        location_name: &str,
        year: i32,
        month: u32,
    ) -> Result<Vec<Signal>, StoreError> {
        let mut stmt = self.conn.prepare(
            "SELECT * FROM signals
             WHERE location_name = ?1 AND year = ?2 AND month = ?3
             ORDER BY frequency_hz",
        )?;
        let rows = stmt.query_map(params![location_name, year, month], |row| {
            Ok(Self::row_to_signal(row))
        })?;
        rows.map(|r| r.map_err(StoreError::from).and_then(|s| s))
            .collect()
    }

    pub fn get_signals_by_state(&self, state: SignalState) -> Result<Vec<Signal>, StoreError> {
        let mut stmt = self
            .conn
            .prepare("SELECT * FROM signals WHERE state = ?1 ORDER BY frequency_hz")?;
        let rows = stmt.query_map(params![state.as_str()], |row| Ok(Self::row_to_signal(row)))?;
        rows.map(|r| r.map_err(StoreError::from).and_then(|s| s))
            .collect()
    }

    fn row_to_signal(row: &Row<'_>) -> Result<Signal, StoreError> {
        let first_seen: String = row.get("first_seen")?;
        let last_seen: String = row.get("last_seen")?;
        let state_raw: String = row.get("state")?;
        let protocol_raw: String = row.get("rf_protocol")?;

        Ok(Signal {
            signal_id: row.get("signal_id")?,
            frequency_hz: row.get("frequency_hz")?,
            power_db: row.get("power_db")?,
            bandwidth_hz: row.get("bandwidth_hz")?,
            freq_band: row.get("freq_band")?,
            first_seen: parse_datetime(&first_seen, "signals", "first_seen")?,
            last_seen: parse_datetime(&last_seen, "signals", "last_seen")?,
            detection_count: row.get("detection_count")?,
            state: SignalState::parse(&state_raw).ok_or(StoreError::InvalidColumn {
                table: "signals",
                column: "state",
                value: state_raw,
            })?,
            survey_id: row.get("survey_id")?,
            segment_id: row.get("segment_id")?,
            scan_id: row.get("scan_id")?,
            sigmf_path: row.get("sigmf_path")?,
            rf_protocol: RFProtocol::parse(&protocol_raw).unwrap_or(RFProtocol::Unknown),
            notes: row.get("notes")?,
            promoted_asset_id: row.get("promoted_asset_id")?,
            location_name: row.get("location_name")?,
            year: row.get("year")?,
            month: row.get("month")?,
        })
    }

    // ========================================================================
    // Scan sessions & network scans
    // ========================================================================

    pub fn insert_scan_session(&self, session: &ScanSession) -> Result<(), StoreError> {
        self.conn.execute(
            "INSERT INTO scan_sessions (scan_id, scan_type, start_time, end_time, parameters, results_summary)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                session.scan_id,
                session.scan_type.as_str(),
                fmt_ts(&session.start_time),
                session.end_time.map(|t| fmt_ts(&t)),
                serde_json::to_string(&session.parameters)?,
                serde_json::to_string(&session.results_summary)?,
            ],
        )?;
        Ok(())
    }

    /// Close an open session, stamping its end time and summary.
    pub fn end_scan_session(&self, scan_id: &str, results_summary: &Value) -> Result<(), StoreError> {
        let changed = self.conn.execute(
            "UPDATE scan_sessions SET end_time = ?2, results_summary = ?3 WHERE scan_id = ?1",
            params![
                scan_id,
                fmt_ts(&Utc::now()),
                serde_json::to_string(results_summary)?
            ],
        )?;
        if changed == 0 {
            return Err(StoreError::NotFound(scan_id.to_string()));
        }
        Ok(())
    }

    pub fn get_scan_session(&self, scan_id: &str) -> Result<Option<ScanSession>, StoreError> {
        self.conn
            .query_row(
                "SELECT * FROM scan_sessions WHERE scan_id = ?1",
                params![scan_id],
                |row| {
                    let start_time: String = row.get("start_time")?;
                    let end_time: Option<String> = row.get("end_time")?;
                    let scan_type_raw: String = row.get("scan_type")?;
                    let parameters: Option<String> = row.get("parameters")?;
                    let results: Option<String> = row.get("results_summary")?;
                    Ok((start_time, end_time, scan_type_raw, parameters, results, row.get::<_, String>("scan_id")?))
                },
            )
            .optional()?
            .map(|(start_time, end_time, scan_type_raw, parameters, results, scan_id)| {
                Ok(ScanSession {
                    scan_id,
                    scan_type: ScanType::parse(&scan_type_raw).ok_or(StoreError::InvalidColumn {
                        table: "scan_sessions",
                        column: "scan_type",
                        value: scan_type_raw,
                    })?,
                    start_time: parse_datetime(&start_time, "scan_sessions", "start_time")?,
                    end_time: end_time
                        .as_deref()
                        .map(|t| parse_datetime(t, "scan_sessions", "end_time"))
                        .transpose()?,
                    parameters: parameters
                        .as_deref()
                        .map(serde_json::from_str)
                        .transpose()?
                        .unwrap_or(Value::Null),
                    results_summary: results
                        .as_deref()
                        .map(serde_json::from_str)
                        .transpose()?
                        .unwrap_or(Value::Null),
                })
            })
            .transpose()
    }

    pub fn insert_network_scan(&self, scan: &NetworkScan) -> Result<(), StoreError> {
        self.conn.execute(
            "INSERT INTO network_scans (scan_id, timestamp, subnet, hosts_found, results)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                scan.scan_id,
                fmt_ts(&scan.timestamp),
                scan.subnet,
                scan.hosts_found,
                serde_json::to_string(&scan.results)?,
            ],
        )?;
        Ok(())
    }

    // ========================================================================
    // Statistics
    // ========================================================================

    fn count_table(&self, table: &str) -> Result<u64, StoreError> {
        // Table name comes from the fixed EXPORT_TABLES list, never user input
        let count: i64 = self
            .conn
            .query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |row| row.get(0))?;
        Ok(count as u64)
    }

    fn distribution(&self, sql: &str) -> Result<HashMap<String, u64>, StoreError> {
        let mut stmt = self.conn.prepare(sql)?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
        })?;
        let mut map = HashMap::new();
        for row in rows {
            let (key, count) = row?;
            map.insert(key, count as u64);
        }
        Ok(map)
    }

    pub fn get_statistics(&self) -> Result<StoreStatistics, StoreError> {
        Ok(StoreStatistics {
            assets: self.count_table("assets")?,
            signals: self.count_table("signals")?,
            scan_sessions: self.count_table("scan_sessions")?,
            network_scans: self.count_table("network_scans")?,
            surveys: self.count_table("spectrum_surveys")?,
            protocol_distribution: self.distribution(
                "SELECT rf_protocol, COUNT(*) FROM assets GROUP BY rf_protocol",
            )?,
            posture_distribution: self.distribution(
                "SELECT security_posture, COUNT(*) FROM assets GROUP BY security_posture",
            )?,
        })
    }

    // ========================================================================
    // Export
    // ========================================================================

    /// Export every canonical table as Parquet, one file per table.
    /// Returns `(table, rows)` pairs.
    pub fn export_parquet(&self, output_dir: impl AsRef<Path>) -> Result<Vec<(String, usize)>, StoreError> {
        let output_dir = output_dir.as_ref();
        std::fs::create_dir_all(output_dir)?;

        let mut written = Vec::new();
        for table in EXPORT_TABLES {
            let path = output_dir.join(format!("{table}.parquet"));
            let rows = self.export_table_parquet(table, &path)?;
            written.push(((*table).to_string(), rows));
        }
        Ok(written)
    }

    fn export_table_parquet(&self, table: &str, path: &Path) -> Result<usize, StoreError> {
        let mut stmt = self.conn.prepare(&format!("SELECT * FROM {table}"))?;
        let column_names: Vec<String> = stmt
            .column_names()
            .into_iter()
            .map(ToString::to_string)
            .collect();

        let mut columns: Vec<Vec<rusqlite::types::Value>> = vec![Vec::new(); column_names.len()];
        let mut rows = stmt.query([])?;
        let mut row_count = 0usize;
        while let Some(row) = rows.next()? {
            for (i, column) in columns.iter_mut().enumerate() {
                column.push(row.get::<_, rusqlite::types::Value>(i)?);
            }
            row_count += 1;
        }

        let mut fields = Vec::with_capacity(column_names.len());
        let mut arrays: Vec<ArrayRef> = Vec::with_capacity(column_names.len());
        for (name, values) in column_names.iter().zip(columns.iter()) {
            let (field, array) = sqlite_column_to_arrow(name, values);
            fields.push(field);
            arrays.push(array);
        }

        let schema = Arc::new(Schema::new(fields));
        let batch = RecordBatch::try_new(schema.clone(), arrays)
            .map_err(|e| StoreError::Export(e.to_string()))?;

        let file = File::create(path)?;
        let mut writer = ArrowWriter::try_new(file, schema, None)
            .map_err(|e| StoreError::Export(e.to_string()))?;
        writer
            .write(&batch)
            .map_err(|e| StoreError::Export(e.to_string()))?;
        writer
            .close()
            .map_err(|e| StoreError::Export(e.to_string()))?;

        info!("exported {row_count} rows from {table} to {}", path.display());
        Ok(row_count)
    }

    /// CSV export of the assets table.
    pub fn export_assets_csv(&self, path: impl AsRef<Path>) -> Result<usize, StoreError> {
        use std::io::Write;

        let assets = self.get_all_assets(usize::MAX >> 1)?;
        let mut file = File::create(path.as_ref())?;

        writeln!(
            file,
            "id,name,asset_type,first_seen,last_seen,rf_frequency_hz,rf_signal_strength_db,\
             rf_protocol,cmdb_ci_class,security_posture,risk_level,purdue_level,device_category"
        )?;
        for asset in &assets {
            writeln!(
                file,
                "{},{},{},{},{},{},{},{},{},{},{},{},{}",
                csv_field(&asset.id),
                csv_field(&asset.name),
                asset.asset_type,
                fmt_ts(&asset.first_seen),
                fmt_ts(&asset.last_seen),
                asset.rf_frequency_hz.map_or(String::new(), |v| v.to_string()),
                asset
                    .rf_signal_strength_db
                    .map_or(String::new(), |v| v.to_string()),
                asset.rf_protocol,
                asset.cmdb_ci_class.map_or("", CmdbCiClass::as_str),
                asset.security_posture,
                asset.risk_level,
                asset
                    .purdue_level
                    .map_or(String::new(), |v| v.as_i64().to_string()),
                asset.device_category.map_or("", DeviceCategory::as_str),
            )?;
        }
        Ok(assets.len())
    }
}

fn csv_field(value: &str) -> String {
    if value.contains(',') || value.contains('"') || value.contains('\n') {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

/// Map one SQLite result column onto an Arrow field + array.
///
/// SQLite columns are dynamically typed, so the Arrow type is inferred from
/// the values actually present: any real makes the column Float64, otherwise
/// any integer makes it Int64, otherwise it is Utf8 (blobs are hex-encoded).
fn sqlite_column_to_arrow(name: &str, values: &[rusqlite::types::Value]) -> (Field, ArrayRef) {
    use rusqlite::types::Value as Sql;

    let has_real = values.iter().any(|v| matches!(v, Sql::Real(_)));
    let has_int = values.iter().any(|v| matches!(v, Sql::Integer(_)));
    let has_text = values
        .iter()
        .any(|v| matches!(v, Sql::Text(_) | Sql::Blob(_)));

    if has_real && !has_text {
        let array: Float64Array = values
            .iter()
            .map(|v| match v {
                Sql::Real(f) => Some(*f),
                Sql::Integer(i) => Some(*i as f64),
                _ => None,
            })
            .collect();
        (
            Field::new(name, DataType::Float64, true),
            Arc::new(array) as ArrayRef,
        )
    } else if has_int && !has_text {
        let array: Int64Array = values
            .iter()
            .map(|v| match v {
                Sql::Integer(i) => Some(*i),
                _ => None,
            })
            .collect();
        (
            Field::new(name, DataType::Int64, true),
            Arc::new(array) as ArrayRef,
        )
    } else {
        let array: StringArray = values
            .iter()
            .map(|v| match v {
                Sql::Text(s) => Some(s.clone()),
                Sql::Integer(i) => Some(i.to_string()),
                Sql::Real(f) => Some(f.to_string()),
                Sql::Blob(b) => Some(b.iter().map(|byte| format!("{byte:02x}")).collect()),
                Sql::Null => None,
            })
            .collect();
        (
            Field::new(name, DataType::Utf8, true),
            Arc::new(array) as ArrayRef,
        )
    }
}
