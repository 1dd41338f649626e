//! Row models and enums for the unified store.
//!
//! Enums align with the industry vocabularies the inventory is exported
//! into: ServiceNow CMDB CI classes, ISA-95/Purdue levels, and NIST device
//! categories. Every enum carries stable snake_case string values because
//! they are stored as TEXT columns and matched in SQL.

use std::collections::HashMap;

use chrono::{DateTime, Datelike, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

macro_rules! string_enum {
    ($(#[$meta:meta])* $name:ident { $($variant:ident => $value:literal),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub enum $name {
            $(#[serde(rename = $value)] $variant),+
        }

        impl $name {
            pub fn as_str(self) -> &'static str {
                match self {
                    $(Self::$variant => $value),+
                }
            }

            pub fn parse(s: &str) -> Option<Self> {
                match s {
                    $($value => Some(Self::$variant),)+
                    _ => None,
                }
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

string_enum! {
    /// RF protocol family attributed to an emitter.
    RFProtocol {
        Unknown => "unknown",
        FmBroadcast => "fm_broadcast",
        AmBroadcast => "am_broadcast",
        Adsb => "adsb",
        Wifi => "wifi",
        Bluetooth => "bluetooth",
        Ble => "ble",
        Zigbee => "zigbee",
        Zwave => "zwave",
        Lora => "lora",
        Lorawan => "lorawan",
        Tpms => "tpms",
        WeatherStation => "weather_station",
        WirelessHart => "wirelesshart",
        Isa100 => "isa100",
    }
}

string_enum! {
    /// ServiceNow CMDB configuration-item class.
    CmdbCiClass {
        Wap => "wap",
        NetworkGear => "network_gear",
        IotGateway => "iot_gateway",
        IotSensor => "iot_sensor",
        IotDevice => "iot_device",
        OtController => "ot_controller",
        OtDevice => "ot_device",
        RfEmitter => "rf_emitter",
    }
}

string_enum! {
    /// NIST-style device category.
    DeviceCategory {
        Sensor => "sensor",
        Endpoint => "endpoint",
        Controller => "controller",
        Gateway => "gateway",
    }
}

string_enum! {
    /// Security posture of an asset.
    SecurityPosture {
        Verified => "verified",
        Known => "known",
        Unknown => "unknown",
        Suspicious => "suspicious",
        Unauthorized => "unauthorized",
    }
}

string_enum! {
    /// Assessed risk level.
    RiskLevel {
        Critical => "critical",
        High => "high",
        Medium => "medium",
        Low => "low",
        Informational => "informational",
    }
}

string_enum! {
    /// Lifecycle state of a recorded signal.
    SignalState {
        Discovered => "discovered",
        Confirmed => "confirmed",
        Promoted => "promoted",
        Rejected => "rejected",
    }
}

string_enum! {
    /// How an asset was discovered and what attributes it carries.
    AssetType {
        RfOnly => "rf_only",
        NetworkOnly => "network_only",
        Correlated => "correlated",
    }
}

string_enum! {
    /// Kind of scan session.
    ScanType {
        RfSpectrum => "rf_spectrum",
        Network => "network",
        Wifi => "wifi",
        Iot => "iot",
        Recording => "recording",
        Analysis => "analysis",
        Combined => "combined",
    }
}

string_enum! {
    /// Protocol family of a decoded IoT transmission.
    IotProtocolType {
        Tpms => "tpms",
        WeatherStation => "weather_station",
        TemperatureSensor => "temperature_sensor",
        HumiditySensor => "humidity_sensor",
        DoorSensor => "door_sensor",
        MotionSensor => "motion_sensor",
        RemoteControl => "remote_control",
        SmokeDetector => "smoke_detector",
        WaterLeak => "water_leak",
        GenericOok => "generic_ook",
        Unknown => "unknown",
    }
}

/// ISA-95/Purdue Model level, stored as an integer column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PurdueLevel {
    PhysicalProcess = 0,
    BasicControl = 1,
    Supervisory = 2,
    SiteOperations = 3,
    EnterpriseIt = 4,
}

impl PurdueLevel {
    pub fn as_i64(self) -> i64 {
        self as i64
    }

    pub fn from_i64(v: i64) -> Option<Self> {
        match v {
            0 => Some(Self::PhysicalProcess),
            1 => Some(Self::BasicControl),
            2 => Some(Self::Supervisory),
            3 => Some(Self::SiteOperations),
            4 => Some(Self::EnterpriseIt),
            _ => None,
        }
    }
}

/// Persistent inventory record for a recurring emitter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Asset {
    pub id: String,
    pub name: String,
    pub asset_type: AssetType,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    pub correlation_confidence: f64,

    // RF attributes
    pub rf_frequency_hz: Option<f64>,
    pub rf_signal_strength_db: Option<f64>,
    pub rf_bandwidth_hz: Option<f64>,
    pub rf_modulation_type: Option<String>,
    pub rf_fingerprint_hash: Option<String>,

    // Network attributes
    pub net_mac_address: Option<String>,
    pub net_ip_address: Option<String>,
    pub net_hostname: Option<String>,
    pub net_open_ports: Vec<u16>,
    pub net_vendor: Option<String>,
    pub net_os_guess: Option<String>,

    pub discovery_source: Option<String>,
    pub metadata: HashMap<String, Value>,

    // Classification
    pub cmdb_ci_class: Option<CmdbCiClass>,
    pub cmdb_sys_id: Option<String>,
    pub rf_protocol: RFProtocol,
    pub security_posture: SecurityPosture,
    pub risk_level: RiskLevel,
    pub purdue_level: Option<PurdueLevel>,
    pub device_category: Option<DeviceCategory>,
    pub ot_protocol: Option<String>,
    pub ot_criticality: Option<String>,
}

impl Asset {
    pub fn new(name: impl Into<String>, asset_type: AssetType) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            name: name.into(),
            asset_type,
            first_seen: now,
            last_seen: now,
            correlation_confidence: 0.0,
            rf_frequency_hz: None,
            rf_signal_strength_db: None,
            rf_bandwidth_hz: None,
            rf_modulation_type: None,
            rf_fingerprint_hash: None,
            net_mac_address: None,
            net_ip_address: None,
            net_hostname: None,
            net_open_ports: Vec::new(),
            net_vendor: None,
            net_os_guess: None,
            discovery_source: None,
            metadata: HashMap::new(),
            cmdb_ci_class: None,
            cmdb_sys_id: None,
            rf_protocol: RFProtocol::Unknown,
            security_posture: SecurityPosture::Unknown,
            risk_level: RiskLevel::Informational,
            purdue_level: None,
            device_category: None,
            ot_protocol: None,
            ot_criticality: None,
        }
    }

    pub fn touch(&mut self) {
        self.last_seen = Utc::now();
    }
}

/// A detected signal in the unified `signals` table.
///
/// Survey linkage and partition columns live on the same row; there is no
/// separate per-survey signal table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Signal {
    pub signal_id: String,
    pub frequency_hz: f64,
    pub power_db: f64,
    pub bandwidth_hz: Option<f64>,
    pub freq_band: Option<String>,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    pub detection_count: u32,
    pub state: SignalState,

    pub survey_id: Option<String>,
    pub segment_id: Option<String>,
    pub scan_id: Option<String>,
    pub sigmf_path: Option<String>,

    pub rf_protocol: RFProtocol,
    pub notes: Option<String>,
    pub promoted_asset_id: Option<String>,

    // Partition columns, derived from the owning survey's location and the
    // first-seen timestamp
    pub location_name: Option<String>,
    pub year: i32,
    pub month: u32,
}

impl Signal {
    pub fn new(frequency_hz: f64, power_db: f64) -> Self {
        let now = Utc::now();
        Self {
            signal_id: Uuid::new_v4().to_string(),
            frequency_hz,
            power_db,
            bandwidth_hz: None,
            freq_band: None,
            first_seen: now,
            last_seen: now,
            detection_count: 1,
            state: SignalState::Discovered,
            survey_id: None,
            segment_id: None,
            scan_id: None,
            sigmf_path: None,
            rf_protocol: RFProtocol::Unknown,
            notes: None,
            promoted_asset_id: None,
            location_name: None,
            year: now.year(),
            month: now.month(),
        }
    }

    pub fn frequency_mhz(&self) -> f64 {
        self.frequency_hz / 1e6
    }

    /// Eligible for asset promotion once detected this many times.
    pub fn should_auto_promote(&self, threshold: u32) -> bool {
        self.state == SignalState::Discovered && self.detection_count >= threshold
    }
}

/// One scan session. Open sessions have no end time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanSession {
    pub scan_id: String,
    pub scan_type: ScanType,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub parameters: Value,
    pub results_summary: Value,
}

impl ScanSession {
    pub fn start(scan_type: ScanType, parameters: Value) -> Self {
        Self {
            scan_id: Uuid::new_v4().to_string(),
            scan_type,
            start_time: Utc::now(),
            end_time: None,
            parameters,
            results_summary: Value::Null,
        }
    }
}

/// A network discovery sweep recorded by an external scanner.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkScan {
    pub scan_id: String,
    pub timestamp: DateTime<Utc>,
    pub subnet: String,
    pub hosts_found: u32,
    pub results: Value,
}

impl NetworkScan {
    pub fn new(subnet: impl Into<String>, hosts_found: u32, results: Value) -> Self {
        Self {
            scan_id: Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            subnet: subnet.into(),
            hosts_found,
            results,
        }
    }
}
