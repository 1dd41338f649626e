//! Spectrum surveys: resumable multi-segment scans over a wide range.
//!
//! A survey decomposes `[start_hz, end_hz]` into prioritized segments from
//! the band catalogue plus optional gap fillers, persists every state
//! transition before work begins, and promotes recurring signals into the
//! asset inventory.

pub mod catalog;
pub mod executor;
pub mod manager;
pub mod models;

pub use catalog::{band_for_frequency, generate_segments, PRIORITY_BANDS};
pub use executor::{SegmentResult, SurveyExecutor, SurveyRunResult, AUTO_PROMOTE_THRESHOLD};
pub use manager::{CreateSurveyOptions, SurveyError, SurveyManager};
pub use models::{
    format_duration, SegmentStatus, SpectrumSurvey, SurveyConfig, SurveySegment, SurveyStatus,
};
