//! SigMF recording support.
//!
//! A recording is a pair of files: `<base>.sigmf-data` holding raw
//! little-endian samples, and `<base>.sigmf-meta` holding a UTF-8 JSON
//! document with `global`, `captures`, and `annotations` sections. Keys
//! outside the `core:` namespace round-trip through a fallback map.
//!
//! Integer datatypes are stored full-scale: float samples are scaled by the
//! type's maximum on write and divided back on read, so a round-trip loses
//! only quantization.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::info;

use crate::dsp::IqSample;

/// SigMF version emitted in new recordings.
const SIGMF_VERSION: &str = "1.0.0";

/// Recorder tag stamped into new metadata.
const RECORDER_NAME: &str = "rf-sentinel";

#[derive(Debug, Error)]
pub enum SigMFError {
    #[error("invalid file extension: {0}")]
    InvalidExtension(String),

    #[error("paired file not found: {0}")]
    MissingFile(PathBuf),

    #[error("malformed metadata: {0}")]
    MalformedMetadata(String),

    #[error("unsupported datatype: {0}")]
    UnsupportedDatatype(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("metadata serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Recognized SigMF sample datatypes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SigMFDataType {
    #[serde(rename = "cf64_le")]
    Cf64Le,
    #[default]
    #[serde(rename = "cf32_le")]
    Cf32Le,
    #[serde(rename = "ci32_le")]
    Ci32Le,
    #[serde(rename = "ci16_le")]
    Ci16Le,
    #[serde(rename = "ci8")]
    Ci8,
    #[serde(rename = "rf64_le")]
    Rf64Le,
    #[serde(rename = "rf32_le")]
    Rf32Le,
    #[serde(rename = "ri32_le")]
    Ri32Le,
    #[serde(rename = "ri16_le")]
    Ri16Le,
    #[serde(rename = "ri8")]
    Ri8,
}

impl SigMFDataType {
    /// Bytes per sample (both components for complex types).
    pub fn sample_size(self) -> usize {
        match self {
            Self::Cf64Le => 16,
            Self::Cf32Le | Self::Ci32Le | Self::Rf64Le => 8,
            Self::Ci16Le | Self::Rf32Le | Self::Ri32Le => 4,
            Self::Ci8 | Self::Ri16Le => 2,
            Self::Ri8 => 1,
        }
    }

    pub fn is_complex(self) -> bool {
        matches!(
            self,
            Self::Cf64Le | Self::Cf32Le | Self::Ci32Le | Self::Ci16Le | Self::Ci8
        )
    }

    fn component_size(self) -> usize {
        if self.is_complex() {
            self.sample_size() / 2
        } else {
            self.sample_size()
        }
    }

    /// Full-scale value for integer types, 1.0 for floats.
    fn scale(self) -> f64 {
        match self {
            Self::Ci32Le | Self::Ri32Le => f64::from(i32::MAX),
            Self::Ci16Le | Self::Ri16Le => f64::from(i16::MAX),
            Self::Ci8 | Self::Ri8 => f64::from(i8::MAX),
            _ => 1.0,
        }
    }

    fn encode_component(self, value: f64, out: &mut Vec<u8>) {
        match self.component_size() {
            8 => out.extend_from_slice(&value.to_le_bytes()),
            4 if matches!(self, Self::Cf32Le | Self::Rf32Le) => {
                out.extend_from_slice(&(value as f32).to_le_bytes());
            }
            4 => out.extend_from_slice(
                &((value * self.scale()).round().clamp(f64::from(i32::MIN), f64::from(i32::MAX))
                    as i32)
                    .to_le_bytes(),
            ),
            2 => out.extend_from_slice(
                &((value * self.scale()).round().clamp(f64::from(i16::MIN), f64::from(i16::MAX))
                    as i16)
                    .to_le_bytes(),
            ),
            _ => out.push(
                (value * self.scale()).round().clamp(f64::from(i8::MIN), f64::from(i8::MAX)) as i8
                    as u8,
            ),
        }
    }

    fn decode_component(self, bytes: &[u8]) -> f64 {
        match self.component_size() {
            8 => f64::from_le_bytes([
                bytes[0], bytes[1], bytes[2], bytes[3], bytes[4], bytes[5], bytes[6], bytes[7],
            ]),
            4 if matches!(self, Self::Cf32Le | Self::Rf32Le) => {
                f64::from(f32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
            }
            4 => {
                f64::from(i32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
                    / self.scale()
            }
            2 => f64::from(i16::from_le_bytes([bytes[0], bytes[1]])) / self.scale(),
            _ => f64::from(bytes[0] as i8) / self.scale(),
        }
    }
}

/// One capture segment: pins a byte offset to a tuning.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SigMFCapture {
    #[serde(rename = "core:sample_start")]
    pub sample_start: u64,
    #[serde(rename = "core:frequency", skip_serializing_if = "Option::is_none")]
    pub frequency: Option<f64>,
    #[serde(rename = "core:datetime", skip_serializing_if = "Option::is_none")]
    pub datetime: Option<String>,
    #[serde(flatten)]
    pub extra: HashMap<String, Value>,
}

/// One annotation over `[sample_start, sample_start + sample_count)`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SigMFAnnotation {
    #[serde(rename = "core:sample_start")]
    pub sample_start: u64,
    #[serde(rename = "core:sample_count")]
    pub sample_count: u64,
    #[serde(rename = "core:freq_lower_edge", skip_serializing_if = "Option::is_none")]
    pub freq_lower_edge: Option<f64>,
    #[serde(rename = "core:freq_upper_edge", skip_serializing_if = "Option::is_none")]
    pub freq_upper_edge: Option<f64>,
    #[serde(rename = "core:label", skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(rename = "core:comment", skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
    #[serde(flatten)]
    pub extra: HashMap<String, Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct GlobalMeta {
    #[serde(rename = "core:datatype")]
    datatype: SigMFDataType,
    #[serde(rename = "core:sample_rate")]
    sample_rate: f64,
    #[serde(rename = "core:version")]
    version: String,
    #[serde(rename = "core:description", skip_serializing_if = "Option::is_none")]
    description: Option<String>,
    #[serde(rename = "core:author", skip_serializing_if = "Option::is_none")]
    author: Option<String>,
    #[serde(rename = "core:recorder", skip_serializing_if = "Option::is_none")]
    recorder: Option<String>,
    #[serde(rename = "core:license", skip_serializing_if = "Option::is_none")]
    license: Option<String>,
    #[serde(rename = "core:hw", skip_serializing_if = "Option::is_none")]
    hw: Option<String>,
    #[serde(flatten)]
    extra: HashMap<String, Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct MetaDocument {
    global: GlobalMeta,
    captures: Vec<SigMFCapture>,
    annotations: Vec<SigMFAnnotation>,
}

/// A SigMF recording: data blob plus metadata document.
#[derive(Debug, Clone)]
pub struct SigMFRecording {
    pub data_path: PathBuf,
    pub meta_path: PathBuf,

    pub datatype: SigMFDataType,
    pub sample_rate: f64,
    pub version: String,
    pub description: Option<String>,
    pub author: Option<String>,
    pub recorder: Option<String>,
    pub license: Option<String>,
    pub hw: Option<String>,

    pub captures: Vec<SigMFCapture>,
    pub annotations: Vec<SigMFAnnotation>,
    pub extensions: HashMap<String, Value>,
}

impl SigMFRecording {
    /// Write a new recording pair to `output_dir`.
    pub fn create(
        samples: &[IqSample],
        sample_rate: f64,
        center_freq: f64,
        output_dir: impl AsRef<Path>,
        basename: Option<&str>,
        description: Option<&str>,
        datatype: SigMFDataType,
    ) -> Result<Self, SigMFError> {
        let output_dir = output_dir.as_ref();
        std::fs::create_dir_all(output_dir)?;

        let basename = basename.map_or_else(
            || format!("recording_{}", Utc::now().format("%Y%m%d_%H%M%S")),
            ToString::to_string,
        );
        let data_path = output_dir.join(format!("{basename}.sigmf-data"));
        let meta_path = output_dir.join(format!("{basename}.sigmf-meta"));

        let mut bytes = Vec::with_capacity(samples.len() * datatype.sample_size());
        for s in samples {
            datatype.encode_component(f64::from(s.re), &mut bytes);
            if datatype.is_complex() {
                datatype.encode_component(f64::from(s.im), &mut bytes);
            }
        }
        std::fs::write(&data_path, &bytes)?;
        info!("saved {} samples to {}", samples.len(), data_path.display());

        let mut recording = Self {
            data_path,
            meta_path,
            datatype,
            sample_rate,
            version: SIGMF_VERSION.to_string(),
            description: description.map(ToString::to_string),
            author: None,
            recorder: Some(RECORDER_NAME.to_string()),
            license: None,
            hw: None,
            captures: vec![SigMFCapture {
                sample_start: 0,
                frequency: Some(center_freq),
                datetime: Some(Utc::now().to_rfc3339()),
                extra: HashMap::new(),
            }],
            annotations: Vec::new(),
            extensions: HashMap::new(),
        };
        recording.save_metadata()?;
        Ok(recording)
    }

    /// Load a recording from either half of the pair.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, SigMFError> {
        let path = path.as_ref();
        let (data_path, meta_path) = match path.extension().and_then(|e| e.to_str()) {
            Some("sigmf-data") => (path.to_path_buf(), path.with_extension("sigmf-meta")),
            Some("sigmf-meta") => (path.with_extension("sigmf-data"), path.to_path_buf()),
            other => {
                return Err(SigMFError::InvalidExtension(
                    other.unwrap_or("<none>").to_string(),
                ))
            }
        };
        if !meta_path.exists() {
            return Err(SigMFError::MissingFile(meta_path));
        }
        if !data_path.exists() {
            return Err(SigMFError::MissingFile(data_path));
        }

        let doc: MetaDocument = serde_json::from_str(&std::fs::read_to_string(&meta_path)?)
            .map_err(|e| SigMFError::MalformedMetadata(e.to_string()))?;

        let recording = Self {
            data_path,
            meta_path,
            datatype: doc.global.datatype,
            sample_rate: doc.global.sample_rate,
            version: doc.global.version,
            description: doc.global.description,
            author: doc.global.author,
            recorder: doc.global.recorder,
            license: doc.global.license,
            hw: doc.global.hw,
            captures: doc.captures,
            annotations: doc.annotations,
            extensions: doc.global.extra,
        };
        recording.validate()?;
        Ok(recording)
    }

    fn validate(&self) -> Result<(), SigMFError> {
        let data_len = std::fs::metadata(&self.data_path)?.len();
        let sample_size = self.datatype.sample_size() as u64;
        if data_len % sample_size != 0 {
            return Err(SigMFError::MalformedMetadata(format!(
                "data length {data_len} is not a multiple of the {sample_size}-byte sample size"
            )));
        }
        let num_samples = data_len / sample_size;

        if let Some(first) = self.captures.first() {
            if first.sample_start != 0 {
                return Err(SigMFError::MalformedMetadata(
                    "first capture must start at sample 0".to_string(),
                ));
            }
        }
        for ann in &self.annotations {
            if ann.sample_start + ann.sample_count > num_samples {
                return Err(SigMFError::MalformedMetadata(format!(
                    "annotation [{}, {}) exceeds recording length {num_samples}",
                    ann.sample_start,
                    ann.sample_start + ann.sample_count
                )));
            }
        }
        Ok(())
    }

    /// Decode the data blob into complex samples. Real datatypes come back
    /// with zero imaginary parts.
    pub fn to_samples(&self) -> Result<Vec<IqSample>, SigMFError> {
        let bytes = std::fs::read(&self.data_path)?;
        let sample_size = self.datatype.sample_size();
        let component = self.datatype.component_size();

        Ok(bytes
            .chunks_exact(sample_size)
            .map(|chunk| {
                let re = self.datatype.decode_component(&chunk[..component]);
                let im = if self.datatype.is_complex() {
                    self.datatype.decode_component(&chunk[component..])
                } else {
                    0.0
                };
                IqSample::new(re as f32, im as f32)
            })
            .collect())
    }

    /// Write the metadata document.
    pub fn save_metadata(&mut self) -> Result<(), SigMFError> {
        let doc = MetaDocument {
            global: GlobalMeta {
                datatype: self.datatype,
                sample_rate: self.sample_rate,
                version: self.version.clone(),
                description: self.description.clone(),
                author: self.author.clone(),
                recorder: self.recorder.clone(),
                license: self.license.clone(),
                hw: self.hw.clone(),
                extra: self.extensions.clone(),
            },
            captures: self.captures.clone(),
            annotations: self.annotations.clone(),
        };
        std::fs::write(&self.meta_path, serde_json::to_string_pretty(&doc)?)?;
        Ok(())
    }

    /// Append an annotation (call [`save_metadata`](Self::save_metadata) to
    /// persist it).
    pub fn add_annotation(&mut self, annotation: SigMFAnnotation) {
        self.annotations.push(annotation);
    }

    /// Recording length in seconds.
    pub fn duration_seconds(&self) -> f64 {
        if self.sample_rate <= 0.0 {
            return 0.0;
        }
        let Ok(meta) = std::fs::metadata(&self.data_path) else {
            return 0.0;
        };
        let num_samples = meta.len() / self.datatype.sample_size() as u64;
        num_samples as f64 / self.sample_rate
    }

    /// Center frequency from the first capture.
    pub fn center_frequency(&self) -> Option<f64> {
        self.captures.first().and_then(|c| c.frequency)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ramp(n: usize) -> Vec<IqSample> {
        (0..n)
            .map(|i| {
                let v = (i as f32 / n as f32) * 1.8 - 0.9;
                IqSample::new(v, -v / 2.0)
            })
            .collect()
    }

    #[test]
    fn roundtrip_preserves_float_samples_exactly() {
        let dir = tempfile::tempdir().unwrap();
        let samples = ramp(1024);
        let rec = SigMFRecording::create(
            &samples,
            2.4e6,
            100.1e6,
            dir.path(),
            Some("rt"),
            None,
            SigMFDataType::Cf32Le,
        )
        .unwrap();

        let loaded = SigMFRecording::load(rec.meta_path.clone()).unwrap();
        let decoded = loaded.to_samples().unwrap();
        assert_eq!(decoded, samples);
        assert_eq!(loaded.center_frequency(), Some(100.1e6));
    }

    #[test]
    fn roundtrip_within_quantization_for_integer_types() {
        let dir = tempfile::tempdir().unwrap();
        let samples = ramp(256);

        for (datatype, tolerance) in [
            (SigMFDataType::Ci16Le, 1.0 / 32_767.0),
            (SigMFDataType::Ci8, 1.0 / 127.0),
        ] {
            let rec = SigMFRecording::create(
                &samples,
                1.0e6,
                433.92e6,
                dir.path(),
                None,
                None,
                datatype,
            )
            .unwrap();
            let decoded = SigMFRecording::load(rec.data_path.clone())
                .unwrap()
                .to_samples()
                .unwrap();

            for (a, b) in samples.iter().zip(decoded.iter()) {
                assert!((a.re - b.re).abs() <= tolerance, "{datatype:?}");
                assert!((a.im - b.im).abs() <= tolerance, "{datatype:?}");
            }
        }
    }

    #[test]
    fn load_rejects_missing_pair() {
        let dir = tempfile::tempdir().unwrap();
        let orphan = dir.path().join("orphan.sigmf-meta");
        std::fs::write(&orphan, "{}").unwrap();
        assert!(matches!(
            SigMFRecording::load(&orphan),
            Err(SigMFError::MissingFile(_))
        ));
    }

    #[test]
    fn load_rejects_out_of_range_annotation() {
        let dir = tempfile::tempdir().unwrap();
        let mut rec = SigMFRecording::create(
            &ramp(100),
            1.0e6,
            100.0e6,
            dir.path(),
            Some("ann"),
            None,
            SigMFDataType::Cf32Le,
        )
        .unwrap();
        rec.add_annotation(SigMFAnnotation {
            sample_start: 90,
            sample_count: 20,
            ..SigMFAnnotation::default()
        });
        rec.save_metadata().unwrap();

        assert!(matches!(
            SigMFRecording::load(&rec.meta_path),
            Err(SigMFError::MalformedMetadata(_))
        ));
    }

    #[test]
    fn unknown_keys_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let mut rec = SigMFRecording::create(
            &ramp(64),
            1.0e6,
            100.0e6,
            dir.path(),
            Some("ext"),
            None,
            SigMFDataType::Cf32Le,
        )
        .unwrap();
        rec.extensions.insert(
            "sentinel:survey_id".to_string(),
            Value::String("abc123".to_string()),
        );
        rec.save_metadata().unwrap();

        let loaded = SigMFRecording::load(&rec.meta_path).unwrap();
        assert_eq!(
            loaded.extensions.get("sentinel:survey_id"),
            Some(&Value::String("abc123".to_string()))
        );
    }

    #[test]
    fn duration_follows_sample_count_and_rate() {
        let dir = tempfile::tempdir().unwrap();
        let rec = SigMFRecording::create(
            &ramp(48_000),
            48_000.0,
            100.0e6,
            dir.path(),
            Some("dur"),
            None,
            SigMFDataType::Cf32Le,
        )
        .unwrap();
        assert!((rec.duration_seconds() - 1.0).abs() < 1e-9);
    }
}
