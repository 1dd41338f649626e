//! Continuous spectrum watch: baseline learning, condition evaluation, and
//! alert delivery with per-condition cooldowns.

pub mod config;
pub mod engine;

pub use config::{
    create_watch_for_band, create_watch_for_frequency, is_emergency_frequency,
    notable_frequency, Alert, AlertCondition, AlertConditionType, FrequencyBand, WatchConfig,
    WatchState, WatchStatus, NOTABLE_FREQUENCIES,
};
pub use engine::{SpectrumWatch, WatchCommand, WatchHandle, WatchSnapshot};
