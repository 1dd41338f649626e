//! Audio output seam.
//!
//! Actual playback hardware lives outside this crate. The demodulator apps
//! write into an [`AudioSink`], and the process boundary picks the
//! implementation: a real device wrapper in the CLI, [`BufferSink`] in tests
//! and the simulation binary.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum AudioError {
    #[error("audio device unavailable: {0}")]
    DeviceUnavailable(String),

    #[error("audio write failed: {0}")]
    WriteFailed(String),
}

/// Best-effort buffered audio output.
///
/// No latency guarantee is part of this contract; implementations may buffer
/// arbitrarily.
pub trait AudioSink: Send {
    /// Output sample rate in Hz.
    fn sample_rate(&self) -> u32;

    /// Write a mono block.
    fn write_mono(&mut self, samples: &[f32]) -> Result<(), AudioError>;

    /// Write an interleaved stereo block from separate channels.
    fn write_stereo(&mut self, left: &[f32], right: &[f32]) -> Result<(), AudioError>;
}

/// Sink that accumulates samples in memory.
pub struct BufferSink {
    sample_rate: u32,
    /// Interleaved output; mono writes store one value per frame.
    pub samples: Vec<f32>,
    pub channels: u16,
}

impl BufferSink {
    pub fn new(sample_rate: u32) -> Self {
        Self {
            sample_rate,
            samples: Vec::new(),
            channels: 1,
        }
    }
}

impl AudioSink for BufferSink {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn write_mono(&mut self, samples: &[f32]) -> Result<(), AudioError> {
        self.channels = 1;
        self.samples.extend_from_slice(samples);
        Ok(())
    }

    fn write_stereo(&mut self, left: &[f32], right: &[f32]) -> Result<(), AudioError> {
        self.channels = 2;
        for (l, r) in left.iter().zip(right.iter()) {
            self.samples.push(*l);
            self.samples.push(*r);
        }
        Ok(())
    }
}
