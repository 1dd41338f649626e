//! Frequency band catalog for spectrum surveys.
//!
//! Priority bands carry known semantic interest and predetermined scan
//! parameters. Gap segments fill whatever the priority bands leave
//! uncovered when a survey asks for full coverage.
//!
//! RTL-SDR (R820T tuner) coverage: ~24 MHz to ~1766 MHz.

use super::models::SurveySegment;

/// Lower edge of usable tuner coverage (Hz).
pub const RTL_SDR_MIN_HZ: f64 = 24e6;

/// Upper edge of usable tuner coverage (Hz).
pub const RTL_SDR_MAX_HZ: f64 = 1_766e6;

/// A catalogued band with recommended scan parameters.
#[derive(Debug, Clone, Copy)]
pub struct BandDefinition {
    pub name: &'static str,
    pub start_hz: f64,
    pub end_hz: f64,
    /// 1 (highest interest) to 5.
    pub priority: u8,
    pub step_hz: f64,
    pub dwell_time_ms: f64,
}

/// Static priority-band catalogue, US-centric.
pub const PRIORITY_BANDS: &[BandDefinition] = &[
    BandDefinition {
        name: "fm_broadcast",
        start_hz: 87.5e6,
        end_hz: 108.0e6,
        priority: 2,
        step_hz: 1.0e6,
        dwell_time_ms: 100.0,
    },
    BandDefinition {
        name: "airband_vhf",
        start_hz: 118.0e6,
        end_hz: 137.0e6,
        priority: 1,
        step_hz: 1.0e6,
        dwell_time_ms: 150.0,
    },
    BandDefinition {
        name: "noaa_satellite",
        start_hz: 137.0e6,
        end_hz: 138.0e6,
        priority: 3,
        step_hz: 0.5e6,
        dwell_time_ms: 150.0,
    },
    BandDefinition {
        name: "amateur_2m",
        start_hz: 144.0e6,
        end_hz: 148.0e6,
        priority: 2,
        step_hz: 1.0e6,
        dwell_time_ms: 100.0,
    },
    BandDefinition {
        name: "marine_vhf",
        start_hz: 156.0e6,
        end_hz: 162.025e6,
        priority: 2,
        step_hz: 1.0e6,
        dwell_time_ms: 100.0,
    },
    BandDefinition {
        name: "noaa_weather",
        start_hz: 162.4e6,
        end_hz: 162.55e6,
        priority: 1,
        step_hz: 0.1e6,
        dwell_time_ms: 200.0,
    },
    BandDefinition {
        name: "ism_315",
        start_hz: 314.0e6,
        end_hz: 316.0e6,
        priority: 2,
        step_hz: 1.0e6,
        dwell_time_ms: 200.0,
    },
    BandDefinition {
        name: "amateur_70cm",
        start_hz: 420.0e6,
        end_hz: 450.0e6,
        priority: 3,
        step_hz: 2.0e6,
        dwell_time_ms: 100.0,
    },
    BandDefinition {
        name: "ism_433",
        start_hz: 433.0e6,
        end_hz: 435.0e6,
        priority: 1,
        step_hz: 1.0e6,
        dwell_time_ms: 200.0,
    },
    BandDefinition {
        name: "frs_gmrs",
        start_hz: 462.5e6,
        end_hz: 467.8e6,
        priority: 3,
        step_hz: 1.0e6,
        dwell_time_ms: 100.0,
    },
    BandDefinition {
        name: "ism_868",
        start_hz: 868.0e6,
        end_hz: 870.0e6,
        priority: 2,
        step_hz: 1.0e6,
        dwell_time_ms: 150.0,
    },
    BandDefinition {
        name: "ism_915",
        start_hz: 902.0e6,
        end_hz: 928.0e6,
        priority: 3,
        step_hz: 2.0e6,
        dwell_time_ms: 100.0,
    },
    BandDefinition {
        name: "adsb_1090",
        start_hz: 1_089.0e6,
        end_hz: 1_091.0e6,
        priority: 2,
        step_hz: 2.0e6,
        dwell_time_ms: 150.0,
    },
];

/// The catalogued band containing a frequency, if any. Overlapping bands
/// resolve to the higher-priority (lower value) entry.
pub fn band_for_frequency(freq_hz: f64) -> Option<&'static BandDefinition> {
    PRIORITY_BANDS
        .iter()
        .filter(|b| (b.start_hz..=b.end_hz).contains(&freq_hz))
        .min_by_key(|b| b.priority)
}

/// Segments for every priority band intersecting `[start_hz, end_hz]`,
/// clipped to the requested range.
pub fn generate_priority_segments(
    survey_id: &str,
    start_hz: f64,
    end_hz: f64,
) -> Vec<SurveySegment> {
    PRIORITY_BANDS
        .iter()
        .filter(|band| band.end_hz > start_hz && band.start_hz < end_hz)
        .map(|band| {
            SurveySegment::new(
                survey_id,
                band.name,
                band.start_hz.max(start_hz),
                band.end_hz.min(end_hz),
                band.priority,
                band.step_hz,
                band.dwell_time_ms,
            )
        })
        .collect()
}

/// Priority-5 gap segments covering the set difference between the
/// requested range and the union of priority bands.
pub fn generate_gap_segments(
    survey_id: &str,
    start_hz: f64,
    end_hz: f64,
    coarse_step_hz: f64,
) -> Vec<SurveySegment> {
    // Union of band intervals, clipped and merged
    let mut intervals: Vec<(f64, f64)> = PRIORITY_BANDS
        .iter()
        .filter(|b| b.end_hz > start_hz && b.start_hz < end_hz)
        .map(|b| (b.start_hz.max(start_hz), b.end_hz.min(end_hz)))
        .collect();
    intervals.sort_by(|a, b| a.0.total_cmp(&b.0));

    let mut merged: Vec<(f64, f64)> = Vec::new();
    for (lo, hi) in intervals {
        match merged.last_mut() {
            Some(last) if lo <= last.1 => last.1 = last.1.max(hi),
            _ => merged.push((lo, hi)),
        }
    }

    let mut gaps = Vec::new();
    let mut cursor = start_hz;
    let mut index = 0;
    for (lo, hi) in &merged {
        if *lo > cursor {
            index += 1;
            gaps.push(SurveySegment::new(
                survey_id,
                format!("gap_{index}"),
                cursor,
                *lo,
                5,
                coarse_step_hz,
                100.0,
            ));
        }
        cursor = cursor.max(*hi);
    }
    if cursor < end_hz {
        index += 1;
        gaps.push(SurveySegment::new(
            survey_id,
            format!("gap_{index}"),
            cursor,
            end_hz,
            5,
            coarse_step_hz,
            100.0,
        ));
    }
    gaps
}

/// All segments for a survey over `[start_hz, end_hz]`.
pub fn generate_segments(
    survey_id: &str,
    start_hz: f64,
    end_hz: f64,
    full_coverage: bool,
    coarse_step_hz: f64,
) -> Vec<SurveySegment> {
    let mut segments = generate_priority_segments(survey_id, start_hz, end_hz);
    if full_coverage {
        segments.extend(generate_gap_segments(survey_id, start_hz, end_hz, coarse_step_hz));
    }
    segments.sort_by(|a, b| {
        a.priority
            .cmp(&b.priority)
            .then(a.start_freq_hz.total_cmp(&b.start_freq_hz))
    });
    segments
}

/// Total estimated duration for a set of segments (seconds).
pub fn estimate_survey_duration(segments: &[SurveySegment]) -> f64 {
    segments.iter().map(SurveySegment::estimated_duration_seconds).sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::survey::models::SegmentStatus;

    #[test]
    fn priority_segments_clip_to_requested_range() {
        let segments = generate_priority_segments("s", 100.0e6, 130.0e6);
        // FM broadcast (clipped at 100) and airband (clipped at 130)
        assert_eq!(segments.len(), 2);
        let fm = segments.iter().find(|s| s.name == "fm_broadcast").unwrap();
        assert!((fm.start_freq_hz - 100.0e6).abs() < 1.0);
        assert!((fm.end_freq_hz - 108.0e6).abs() < 1.0);
        let air = segments.iter().find(|s| s.name == "airband_vhf").unwrap();
        assert!((air.end_freq_hz - 130.0e6).abs() < 1.0);
    }

    #[test]
    fn gaps_cover_exactly_the_uncatalogued_ranges() {
        let gaps = generate_gap_segments("s", 87.5e6, 148.0e6, 2e6);
        // 108-118 (between FM and airband) and 138-144 (between NOAA sat
        // and 2m) are the only holes in this span
        assert_eq!(gaps.len(), 2);
        assert!((gaps[0].start_freq_hz - 108.0e6).abs() < 1.0);
        assert!((gaps[0].end_freq_hz - 118.0e6).abs() < 1.0);
        assert!((gaps[1].start_freq_hz - 138.0e6).abs() < 1.0);
        assert!((gaps[1].end_freq_hz - 144.0e6).abs() < 1.0);
        assert!(gaps.iter().all(|g| g.priority == 5));
    }

    #[test]
    fn segments_ordered_by_priority_then_frequency() {
        let segments = generate_segments("s", RTL_SDR_MIN_HZ, RTL_SDR_MAX_HZ, true, 2e6);
        for pair in segments.windows(2) {
            assert!(
                pair[0].priority < pair[1].priority
                    || (pair[0].priority == pair[1].priority
                        && pair[0].start_freq_hz <= pair[1].start_freq_hz)
            );
        }
        assert!(segments.iter().all(|s| s.status == SegmentStatus::Pending));
    }

    #[test]
    fn band_lookup_prefers_higher_priority_on_overlap() {
        // 433.92 MHz sits in both amateur_70cm (prio 3) and ism_433 (prio 1)
        let band = band_for_frequency(433.92e6).unwrap();
        assert_eq!(band.name, "ism_433");
        assert!(band_for_frequency(50.0e6).is_none());
    }
}
