//! DSP primitives: spectrum estimation, filtering, demodulation.
//!
//! All routines here are pure functions over contiguous sample buffers.
//! They never touch shared state and never fail on numeric data: a
//! zero-length input yields a zero-length output, and non-empty outputs
//! are guaranteed free of NaN/Inf.

pub mod demod;
pub mod filters;
pub mod spectrum;

pub use demod::{
    am_demodulate, compute_signal_strength, fm_demodulate, fm_demodulate_default,
    fm_demodulate_stereo, ssb_demodulate,
};
pub use filters::{
    bandpass_filter, dc_block, dc_block_fast, decimate, deemphasis_default, deemphasis_filter,
    highpass_filter, lowpass_filter, moving_average, resample,
};
pub use spectrum::{
    compute_fft, compute_power_spectrum, compute_power_spectrum_hz, compute_spectrogram,
    estimate_noise_floor, find_peaks, signal_to_noise, Window,
};

/// Complex baseband sample as delivered by the tuner.
pub type IqSample = num_complex::Complex<f32>;
