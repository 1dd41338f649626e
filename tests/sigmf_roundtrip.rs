//! SigMF round-trips across every recognized datatype.

use rf_sentinel::dsp::IqSample;
use rf_sentinel::sigmf::{SigMFDataType, SigMFRecording};

fn test_signal(n: usize) -> Vec<IqSample> {
    (0..n)
        .map(|i| {
            let phase = i as f32 * 0.013;
            IqSample::new(0.8 * phase.cos(), 0.8 * phase.sin())
        })
        .collect()
}

#[test]
fn every_datatype_roundtrips_within_quantization() {
    let cases = [
        (SigMFDataType::Cf64Le, 0.0_f32),
        (SigMFDataType::Cf32Le, 0.0),
        (SigMFDataType::Ci32Le, 1.0 / 2_147_483_647.0),
        (SigMFDataType::Ci16Le, 1.0 / 32_767.0),
        (SigMFDataType::Ci8, 1.0 / 127.0),
        (SigMFDataType::Rf64Le, 0.0),
        (SigMFDataType::Rf32Le, 0.0),
        (SigMFDataType::Ri32Le, 1.0 / 2_147_483_647.0),
        (SigMFDataType::Ri16Le, 1.0 / 32_767.0),
        (SigMFDataType::Ri8, 1.0 / 127.0),
    ];

    let dir = tempfile::tempdir().unwrap();
    let samples = test_signal(512);

    for (i, (datatype, tolerance)) in cases.into_iter().enumerate() {
        let basename = format!("case_{i}");
        let recording = SigMFRecording::create(
            &samples,
            2.4e6,
            100.1e6,
            dir.path(),
            Some(basename.as_str()),
            None,
            datatype,
        )
        .unwrap();

        let loaded = SigMFRecording::load(&recording.meta_path).unwrap();
        assert_eq!(loaded.datatype, datatype);
        assert_eq!(loaded.sample_rate, 2.4e6);
        assert_eq!(loaded.center_frequency(), Some(100.1e6));

        let decoded = loaded.to_samples().unwrap();
        assert_eq!(decoded.len(), samples.len());

        // A float epsilon covers the f32 path; integer types allow one
        // quantization step
        let tolerance = tolerance.max(1e-6);
        for (original, roundtripped) in samples.iter().zip(decoded.iter()) {
            assert!(
                (original.re - roundtripped.re).abs() <= tolerance,
                "{datatype:?} re: {} vs {}",
                original.re,
                roundtripped.re
            );
            if datatype.is_complex() {
                assert!(
                    (original.im - roundtripped.im).abs() <= tolerance,
                    "{datatype:?} im"
                );
            } else {
                assert_eq!(roundtripped.im, 0.0, "{datatype:?} imaginary part");
            }
        }
    }
}

#[test]
fn data_file_length_matches_datatype_size() {
    let dir = tempfile::tempdir().unwrap();
    let samples = test_signal(100);

    let recording = SigMFRecording::create(
        &samples,
        1.0e6,
        433.92e6,
        dir.path(),
        Some("size_check"),
        None,
        SigMFDataType::Ci16Le,
    )
    .unwrap();

    let len = std::fs::metadata(&recording.data_path).unwrap().len();
    assert_eq!(len, 100 * 4); // two i16 components per sample
}

#[test]
fn annotations_persist_through_roundtrip() {
    let dir = tempfile::tempdir().unwrap();
    let mut recording = SigMFRecording::create(
        &test_signal(1000),
        2.4e6,
        100.0e6,
        dir.path(),
        Some("annotated"),
        Some("scan capture"),
        SigMFDataType::Cf32Le,
    )
    .unwrap();

    recording.add_annotation(rf_sentinel::sigmf::SigMFAnnotation {
        sample_start: 100,
        sample_count: 200,
        freq_lower_edge: Some(99.9e6),
        freq_upper_edge: Some(100.1e6),
        label: Some("fm_station".to_string()),
        comment: None,
        ..Default::default()
    });
    recording.save_metadata().unwrap();

    let loaded = SigMFRecording::load(&recording.meta_path).unwrap();
    assert_eq!(loaded.annotations.len(), 1);
    let ann = &loaded.annotations[0];
    assert_eq!(ann.sample_start, 100);
    assert_eq!(ann.sample_count, 200);
    assert_eq!(ann.label.as_deref(), Some("fm_station"));
    assert_eq!(ann.freq_lower_edge, Some(99.9e6));
    assert_eq!(loaded.description.as_deref(), Some("scan capture"));
}
