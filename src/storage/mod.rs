//! Unified storage: embedded store, row models, classification rules, and
//! the medallion transform.

pub mod classification;
pub mod db;
pub mod models;
pub mod transform;

pub use db::{StoreError, StoreStatistics, UnifiedDb};
pub use models::{
    Asset, AssetType, CmdbCiClass, DeviceCategory, IotProtocolType, NetworkScan, PurdueLevel,
    RFProtocol, RiskLevel, ScanSession, ScanType, SecurityPosture, Signal, SignalState,
};
pub use transform::{MedallionTransformer, TransformOptions, TransformResult};
