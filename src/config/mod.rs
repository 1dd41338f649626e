//! System-wide defaults and platform tuning.
//!
//! Centralises the magic numbers shared by the DSP, scanner, and survey
//! subsystems so they live in one discoverable place.

use serde::{Deserialize, Serialize};

// ============================================================================
// DSP
// ============================================================================

/// Default FFT size for power-spectrum estimation (bins).
pub const DEFAULT_FFT_SIZE: usize = 2048;

/// Default audio output rate for the demodulators (Hz).
pub const FM_AUDIO_RATE: u32 = 48_000;

/// Broadcast FM frequency deviation (Hz).
pub const FM_DEVIATION_HZ: f64 = 75_000.0;

/// De-emphasis time constant for US/Korea broadcast FM (microseconds).
pub const DEEMPHASIS_TAU_US: f64 = 75.0;

/// De-emphasis time constant for European broadcast FM (microseconds).
pub const DEEMPHASIS_TAU_EU_US: f64 = 50.0;

// ============================================================================
// Scanner
// ============================================================================

/// Default peak-detection threshold (dB).
pub const DEFAULT_THRESHOLD_DB: f64 = -30.0;

/// Peaks closer than this are considered the same emitter (Hz).
///
/// Shared by the scanner's merge pass, the survey signal dedupe, and the
/// baseline bucket width.
pub const FREQUENCY_TOLERANCE_HZ: f64 = 50_000.0;

/// PLL settle time after a retune (milliseconds).
pub const PLL_SETTLE_MS: u64 = 10;

// ============================================================================
// Platform
// ============================================================================

/// Full-rate sampling for desktop-class hosts (samples/s).
pub const DEFAULT_SAMPLE_RATE: f64 = 2.4e6;

/// Sample-rate ceiling on memory-constrained hardware (samples/s).
///
/// RTL2832U dongles drop samples above 2.4 MS/s on single-board computers;
/// the tuner layer clamps requests to this value.
pub const MAX_SAFE_SAMPLE_RATE: f64 = 2.4e6;

/// Per-host tuning for the tuner and scanner.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlatformConfig {
    /// Sample rate the tuner is opened at (samples/s).
    pub sample_rate: f64,
    /// Device-open retries before giving up.
    pub max_retries: u32,
    /// Delay between open retries (ms).
    pub retry_delay_ms: u64,
}

impl Default for PlatformConfig {
    fn default() -> Self {
        Self {
            sample_rate: DEFAULT_SAMPLE_RATE,
            max_retries: 3,
            retry_delay_ms: 500,
        }
    }
}

impl PlatformConfig {
    /// Clamp a requested sample rate to what the platform can sustain.
    pub fn clamp_sample_rate(&self, requested: f64) -> f64 {
        requested.min(MAX_SAFE_SAMPLE_RATE)
    }
}
