//! RF-Sentinel: RF spectrum discovery and monitoring engine.
//!
//! Takes raw complex-baseband IQ from an SDR front-end and turns it into a
//! maintained inventory of emitters:
//!
//! - **DSP**: windowed FFT spectra, peak extraction, FM/AM/SSB demodulation
//! - **Scanner**: stepped sweeps over arbitrary frequency ranges
//! - **Survey engine**: prioritized, resumable wide-band surveys with
//!   automatic promotion of recurring signals to assets
//! - **Baseline + watch**: learned per-frequency power distributions with
//!   four alert conditions and cooldown-limited notification delivery
//! - **Storage**: embedded store with medallion (bronze/silver/gold)
//!   promotion and Parquet export

pub mod agent;
pub mod audio;
pub mod baseline;
pub mod config;
pub mod device;
pub mod dsp;
pub mod notify;
pub mod observability;
pub mod scanner;
pub mod sigmf;
pub mod storage;
pub mod survey;
pub mod watch;

// Re-export the types most callers need
pub use baseline::SpectrumBaseline;
pub use device::{DeviceError, Gain, Tuner, TunerParams};
pub use scanner::{ScanResult, SignalPeak, SpectrumScanner};
pub use storage::{Asset, RFProtocol, Signal, SignalState, UnifiedDb};
pub use survey::{SurveyExecutor, SurveyManager};
pub use watch::{SpectrumWatch, WatchConfig};
