//! Tuner abstraction.
//!
//! The actual RTL-SDR driver lives outside this crate; everything in here is
//! written against the [`Tuner`] trait so the scanner, watch engine, and
//! survey executor never name a concrete device. [`sim::SimulatedTuner`]
//! provides a hardware-free implementation for tests and the simulation
//! binary.

pub mod sim;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::dsp::IqSample;

/// Device-layer failures.
///
/// All of these are fatal to the current scan or read but recoverable at the
/// session level: callers may re-open the device and retry the operation.
#[derive(Debug, Error)]
pub enum DeviceError {
    #[error("no tuner device found (index {0})")]
    NotFound(u32),

    #[error("tuner device busy: {0}")]
    Busy(String),

    #[error("USB error (code {code}): {message}")]
    Usb { code: i32, message: String },

    #[error("unsupported sample rate: {0} samples/s")]
    UnsupportedSampleRate(f64),

    #[error("invalid frequency: {0} Hz")]
    InvalidFrequency(f64),

    #[error("invalid gain: {0}")]
    InvalidGain(String),
}

impl DeviceError {
    /// USB overflows are worth retrying; everything else is not.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Usb { .. })
    }
}

/// Tuner gain setting.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Gain {
    /// Hardware AGC.
    #[default]
    Auto,
    /// Fixed gain in dB.
    Db(f64),
}

impl std::str::FromStr for Gain {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.eq_ignore_ascii_case("auto") {
            Ok(Self::Auto)
        } else {
            s.parse::<f64>()
                .map(Self::Db)
                .map_err(|_| format!("invalid gain '{s}' (expected 'auto' or a dB value)"))
        }
    }
}

/// Parameters used to open a tuner.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TunerParams {
    pub sample_rate: f64,
    pub center_freq: f64,
    pub gain: Gain,
    pub ppm_correction: i32,
    pub device_index: u32,
}

impl Default for TunerParams {
    fn default() -> Self {
        Self {
            sample_rate: crate::config::DEFAULT_SAMPLE_RATE,
            center_freq: 100.0e6,
            gain: Gain::Auto,
            ppm_correction: 0,
            device_index: 0,
        }
    }
}

/// The RF front-end consumed by the scanner and demodulator apps.
///
/// A tuner is a process-wide singleton resource: exactly one of the scanner,
/// watch engine, or survey executor may hold it at a time. The `&mut self`
/// receivers enforce this at the type level for a single instance.
pub trait Tuner: Send {
    /// Retune the front-end. Callers wait [`crate::config::PLL_SETTLE_MS`]
    /// before reading after a retune.
    fn set_center_freq(&mut self, freq_hz: f64) -> Result<(), DeviceError>;

    /// Change the sample rate.
    fn set_sample_rate(&mut self, rate: f64) -> Result<(), DeviceError>;

    /// Change the gain.
    fn set_gain(&mut self, gain: Gain) -> Result<(), DeviceError>;

    /// Read `n` complex baseband samples.
    fn read_samples(&mut self, n: usize) -> Result<Vec<IqSample>, DeviceError>;

    /// Current center frequency in Hz.
    fn center_freq(&self) -> f64;

    /// Current sample rate in samples/s.
    fn sample_rate(&self) -> f64;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gain_parses_auto_and_db() {
        assert_eq!("auto".parse::<Gain>().ok(), Some(Gain::Auto));
        assert_eq!("Auto".parse::<Gain>().ok(), Some(Gain::Auto));
        assert_eq!("28.0".parse::<Gain>().ok(), Some(Gain::Db(28.0)));
        assert!("loud".parse::<Gain>().is_err());
    }

    #[test]
    fn only_usb_errors_are_transient() {
        assert!(DeviceError::Usb {
            code: -8,
            message: "overflow".into()
        }
        .is_transient());
        assert!(!DeviceError::NotFound(0).is_transient());
        assert!(!DeviceError::InvalidFrequency(-1.0).is_transient());
    }
}
