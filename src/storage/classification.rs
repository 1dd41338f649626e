//! Classification and inference for asset standards alignment.
//!
//! Pure decision lists mapping `(protocol, category, posture)` onto CMDB CI
//! classes, Purdue levels, and risk levels, plus the pattern map that turns
//! free-text device-model strings from external decoders into protocol
//! families. The `*_CASE_SQL` fragments are the same decision lists
//! expressed as SQL for the set-based medallion transform.

use std::collections::HashSet;

use serde_json::Value;

use super::models::{
    Asset, CmdbCiClass, DeviceCategory, IotProtocolType, PurdueLevel, RFProtocol, RiskLevel,
    SecurityPosture,
};

/// Maps `freq_band` labels to `rf_protocol` values in the silver transform.
pub const PROTOCOL_CASE_SQL: &str = "CASE freq_band \
    WHEN 'fm_broadcast' THEN 'fm_broadcast' \
    WHEN 'am_broadcast' THEN 'am_broadcast' \
    WHEN 'adsb_1090' THEN 'adsb' \
    WHEN 'ism_915' THEN 'lora' \
    ELSE 'unknown' END";

/// Maps `rf_protocol` values to CMDB CI classes in the gold transform.
pub const CMDB_CLASS_CASE_SQL: &str = "CASE \
    WHEN rf_protocol = 'wifi' THEN 'network_gear' \
    WHEN rf_protocol IN ('fm_broadcast', 'am_broadcast', 'adsb') THEN 'rf_emitter' \
    WHEN rf_protocol IN ('zigbee', 'ble', 'zwave') THEN 'iot_sensor' \
    WHEN rf_protocol IN ('wirelesshart', 'isa100') THEN 'ot_device' \
    WHEN rf_protocol = 'lorawan' THEN 'iot_gateway' \
    ELSE 'iot_device' END";

/// Maps `rf_protocol` values to Purdue levels in the gold transform.
pub const PURDUE_LEVEL_CASE_SQL: &str = "CASE \
    WHEN rf_protocol IN ('wirelesshart', 'isa100') THEN 0 \
    WHEN rf_protocol = 'lorawan' THEN 3 \
    WHEN rf_protocol IN ('wifi', 'bluetooth', 'ble', 'zigbee', 'zwave') THEN 4 \
    ELSE NULL END";

/// Device-model substring patterns, matched case-insensitively in order.
pub const PROTOCOL_PATTERNS: &[(&[&str], IotProtocolType)] = &[
    (
        &["schrader", "tpms", "toyota-tpms", "ford-tpms", "bmw-tpms", "citroen", "peugeot"],
        IotProtocolType::Tpms,
    ),
    (
        &[
            "acurite", "oregon", "fineoffset", "wh1080", "wh2", "wh3", "ws2032", "lacrosse",
            "ambient", "bresser", "davis", "ecowitt",
        ],
        IotProtocolType::WeatherStation,
    ),
    (
        &["th", "thermo", "temp", "thermopro", "inkbird", "govee-h"],
        IotProtocolType::TemperatureSensor,
    ),
    (&["humid", "hygrometer"], IotProtocolType::HumiditySensor),
    (
        &["door", "window", "contact", "honeywell-door", "ge-door", "visonic"],
        IotProtocolType::DoorSensor,
    ),
    (&["motion", "pir", "occupancy"], IotProtocolType::MotionSensor),
    (
        &["remote", "garage", "keyfob", "fan-remote", "ceiling-fan", "rf-remote"],
        IotProtocolType::RemoteControl,
    ),
    (&["smoke", "fire", "co2", "carbon"], IotProtocolType::SmokeDetector),
    (&["water", "leak", "flood", "moisture"], IotProtocolType::WaterLeak),
    (&["ook", "generic", "pulse"], IotProtocolType::GenericOok),
];

/// Classify a device-model string from an external decoder.
pub fn classify_protocol(model: &str) -> IotProtocolType {
    let model_lower = model.to_lowercase();
    for (patterns, protocol) in PROTOCOL_PATTERNS {
        if patterns.iter().any(|p| model_lower.contains(p)) {
            return *protocol;
        }
    }
    IotProtocolType::Unknown
}

/// Stable device identifier from a decoded packet.
///
/// Fallback chain: `id` field, `sensor_id` field, model + channel composite,
/// finally an md5 digest of the whole packet.
pub fn extract_device_id(packet: &Value) -> String {
    let model = packet
        .get("model")
        .and_then(Value::as_str)
        .unwrap_or("Unknown");

    for key in ["id", "sensor_id"] {
        if let Some(id) = packet.get(key) {
            let id = match id {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            return format!("{model}_{id}");
        }
    }

    if let Some(channel) = packet.get("channel") {
        return format!("{model}_ch{channel}");
    }

    let digest = md5::compute(packet.to_string().as_bytes());
    format!("{model}_{digest:x}")
}

/// Fingerprint hash over an emitter's observable RF attributes.
pub fn rf_fingerprint(frequency_hz: f64, bandwidth_hz: Option<f64>, modulation: Option<&str>) -> String {
    let input = format!(
        "{:.0}|{:.0}|{}",
        frequency_hz,
        bandwidth_hz.unwrap_or(0.0),
        modulation.unwrap_or("")
    );
    format!("{:x}", md5::compute(input.as_bytes()))
}

/// Infer device category from protocol and optional frequency context.
pub fn infer_device_category(
    protocol: RFProtocol,
    _frequency_hz: Option<f64>,
) -> DeviceCategory {
    match protocol {
        RFProtocol::Tpms
        | RFProtocol::WeatherStation
        | RFProtocol::WirelessHart
        | RFProtocol::Isa100
        | RFProtocol::Lora
        | RFProtocol::Lorawan => DeviceCategory::Sensor,
        _ => DeviceCategory::Endpoint,
    }
}

/// Infer the CMDB CI class from protocol and device category.
pub fn infer_cmdb_ci_class(asset: &Asset) -> CmdbCiClass {
    let protocol = asset.rf_protocol;
    let category = asset.device_category;

    match (protocol, category) {
        (RFProtocol::Wifi, Some(DeviceCategory::Gateway)) => CmdbCiClass::Wap,
        (RFProtocol::Wifi, _) => CmdbCiClass::NetworkGear,
        (RFProtocol::Lorawan, Some(DeviceCategory::Gateway)) => CmdbCiClass::IotGateway,
        (RFProtocol::Zigbee | RFProtocol::Ble | RFProtocol::Zwave, Some(DeviceCategory::Sensor)) => {
            CmdbCiClass::IotSensor
        }
        (_, Some(DeviceCategory::Sensor)) => CmdbCiClass::IotDevice,
        (RFProtocol::WirelessHart | RFProtocol::Isa100, Some(DeviceCategory::Controller)) => {
            CmdbCiClass::OtController
        }
        (RFProtocol::WirelessHart | RFProtocol::Isa100, _) => CmdbCiClass::OtDevice,
        (_, Some(DeviceCategory::Controller)) => CmdbCiClass::OtController,
        (_, Some(DeviceCategory::Gateway)) => CmdbCiClass::IotGateway,
        (RFProtocol::FmBroadcast | RFProtocol::AmBroadcast | RFProtocol::Adsb, _) => {
            CmdbCiClass::RfEmitter
        }
        _ => CmdbCiClass::IotDevice,
    }
}

/// Infer the ISA-95/Purdue level, or `None` for non-industrial assets.
pub fn infer_purdue_level(asset: &Asset) -> Option<PurdueLevel> {
    let protocol = asset.rf_protocol;
    let category = asset.device_category;

    if matches!(protocol, RFProtocol::WirelessHart | RFProtocol::Isa100)
        || asset.ot_protocol.is_some()
    {
        return Some(match category {
            Some(DeviceCategory::Gateway | DeviceCategory::Controller) => {
                PurdueLevel::BasicControl
            }
            _ => PurdueLevel::PhysicalProcess,
        });
    }

    match protocol {
        RFProtocol::Lorawan if category == Some(DeviceCategory::Gateway) => {
            Some(PurdueLevel::SiteOperations)
        }
        RFProtocol::Bluetooth | RFProtocol::Ble | RFProtocol::Wifi => {
            Some(PurdueLevel::EnterpriseIt)
        }
        RFProtocol::Zigbee | RFProtocol::Zwave => Some(match category {
            Some(DeviceCategory::Controller) => PurdueLevel::Supervisory,
            _ => PurdueLevel::EnterpriseIt,
        }),
        _ => None,
    }
}

/// Assess security posture against the known MAC and fingerprint sets.
pub fn assess_security_posture(
    asset: &Asset,
    known_macs: &HashSet<String>,
    known_fingerprints: &HashSet<String>,
) -> SecurityPosture {
    if asset.cmdb_sys_id.is_some() {
        return SecurityPosture::Verified;
    }

    if let Some(mac) = &asset.net_mac_address {
        let mac_lower = mac.to_lowercase();
        if known_macs.iter().any(|m| m.to_lowercase() == mac_lower) {
            return SecurityPosture::Known;
        }
    }

    if let Some(fp) = &asset.rf_fingerprint_hash {
        if known_fingerprints.contains(fp) {
            return SecurityPosture::Known;
        }
    }

    if asset.rf_protocol == RFProtocol::Unknown
        && asset.net_ip_address.is_some()
        && asset.asset_type == super::models::AssetType::Correlated
    {
        return SecurityPosture::Suspicious;
    }

    SecurityPosture::Unknown
}

/// Calculate the risk level from posture, protocol, and known CVEs.
pub fn calculate_risk_level(asset: &Asset, known_vulns: &[String]) -> RiskLevel {
    if !known_vulns.is_empty() {
        if known_vulns.iter().any(|v| v.to_uppercase().contains("CRITICAL")) {
            return RiskLevel::Critical;
        }
        return RiskLevel::High;
    }

    match asset.security_posture {
        SecurityPosture::Unauthorized => return RiskLevel::Critical,
        SecurityPosture::Suspicious => return RiskLevel::High,
        _ => {}
    }

    if matches!(asset.rf_protocol, RFProtocol::WirelessHart | RFProtocol::Isa100) {
        return if asset.security_posture == SecurityPosture::Unknown {
            RiskLevel::Medium
        } else {
            RiskLevel::Low
        };
    }

    if asset.security_posture == SecurityPosture::Unknown && asset.net_ip_address.is_some() {
        return RiskLevel::Medium;
    }

    if matches!(
        asset.rf_protocol,
        RFProtocol::Tpms | RFProtocol::WeatherStation | RFProtocol::FmBroadcast
    ) {
        return RiskLevel::Low;
    }

    RiskLevel::Informational
}

/// NIST SP 800-213A capability availability per asset.
pub fn apply_nist_categorization(asset: &Asset) -> Vec<(&'static str, bool)> {
    vec![
        (
            "device_identification",
            asset.net_mac_address.is_some() || asset.rf_fingerprint_hash.is_some(),
        ),
        ("device_configuration", !asset.metadata.is_empty()),
        (
            "data_protection",
            asset.metadata.contains_key("encryption")
                || asset
                    .rf_modulation_type
                    .as_deref()
                    .is_some_and(|m| m.to_lowercase().contains("secure")),
        ),
        (
            "logical_access",
            !asset.net_open_ports.is_empty() || asset.net_ip_address.is_some(),
        ),
        (
            "software_update",
            asset.metadata.contains_key("firmware") || asset.metadata.contains_key("version"),
        ),
        (
            "cybersecurity_state",
            asset.security_posture != SecurityPosture::Unknown,
        ),
        ("device_security", asset.device_category.is_some()),
    ]
}

/// Fill every missing classification field on the asset in place.
pub fn auto_classify_asset(asset: &mut Asset) {
    if asset.device_category.is_none() {
        asset.device_category = Some(infer_device_category(
            asset.rf_protocol,
            asset.rf_frequency_hz,
        ));
    }
    if asset.cmdb_ci_class.is_none() {
        asset.cmdb_ci_class = Some(infer_cmdb_ci_class(asset));
    }
    if asset.purdue_level.is_none() {
        asset.purdue_level = infer_purdue_level(asset);
    }
    if asset.security_posture == SecurityPosture::Unknown {
        asset.security_posture =
            assess_security_posture(asset, &HashSet::new(), &HashSet::new());
    }
    if asset.risk_level == RiskLevel::Informational {
        asset.risk_level = calculate_risk_level(asset, &[]);
    }
}
