//! FM/AM/SSB demodulation.
//!
//! All demodulators return `(audio, audio_rate)` with audio normalized to a
//! 0.9 peak so downstream sinks have predictable headroom.

use super::filters::{
    bandpass_filter, dc_block_fast, decimate, deemphasis_filter, lowpass_filter,
};
use super::IqSample;
use crate::config::{DEEMPHASIS_TAU_US, FM_AUDIO_RATE, FM_DEVIATION_HZ};

/// Rate the stereo decoder works at before the final decimation.
///
/// Must clear twice the 38 kHz subcarrier.
const STEREO_INTERMEDIATE_RATE: f64 = 152_000.0;

fn unwrapped_phase(samples: &[IqSample]) -> Vec<f64> {
    let mut phase = Vec::with_capacity(samples.len());
    let mut correction = 0.0;
    let mut prev = 0.0;
    for (i, s) in samples.iter().enumerate() {
        let raw = f64::from(s.im).atan2(f64::from(s.re));
        if i > 0 {
            let delta = raw - prev;
            if delta > std::f64::consts::PI {
                correction -= 2.0 * std::f64::consts::PI;
            } else if delta < -std::f64::consts::PI {
                correction += 2.0 * std::f64::consts::PI;
            }
        }
        prev = raw;
        phase.push(raw + correction);
    }
    phase
}

fn differentiate(phase: &[f64]) -> Vec<f64> {
    phase.windows(2).map(|w| w[1] - w[0]).collect()
}

fn normalize_peak(audio: &mut [f64]) {
    let max = audio.iter().fold(0.0_f64, |m, &x| m.max(x.abs()));
    if max > 0.0 {
        let scale = 0.9 / max;
        for x in audio.iter_mut() {
            *x *= scale;
        }
    }
}

fn to_f32(audio: Vec<f64>) -> Vec<f32> {
    audio.into_iter().map(|x| x as f32).collect()
}

/// Demodulate broadcast FM to mono audio.
///
/// Differentiate-and-divide: unwrap the instantaneous phase, differentiate
/// to angular frequency, normalize by the deviation, then anti-alias,
/// decimate to `audio_rate`, DC-block, and optionally de-emphasise with the
/// given time constant (`Some(75.0)` for US/Korea, `Some(50.0)` for Europe).
pub fn fm_demodulate(
    samples: &[IqSample],
    sample_rate: f64,
    audio_rate: u32,
    deviation: f64,
    deemphasis_tau_us: Option<f64>,
) -> (Vec<f32>, u32) {
    if samples.len() < 2 {
        return (Vec::new(), audio_rate);
    }

    let phase = unwrapped_phase(samples);
    let freq = differentiate(&phase);

    // The frequency deviation carries the audio amplitude
    let scale = sample_rate / (2.0 * std::f64::consts::PI * deviation);
    let audio: Vec<f64> = freq.iter().map(|&f| f * scale).collect();

    let audio = lowpass_filter(&audio, f64::from(audio_rate) / 2.0, sample_rate, 5);
    let decimation = (sample_rate / f64::from(audio_rate)) as usize;
    let audio = decimate(&audio, decimation);
    let mut audio = dc_block_fast(&audio);

    if let Some(tau_us) = deemphasis_tau_us {
        audio = deemphasis_filter(&audio, f64::from(audio_rate), tau_us);
    }

    normalize_peak(&mut audio);
    (to_f32(audio), audio_rate)
}

/// Demodulate FM with the broadcast defaults (75 kHz deviation, 75 us tau).
pub fn fm_demodulate_default(samples: &[IqSample], sample_rate: f64) -> (Vec<f32>, u32) {
    fm_demodulate(
        samples,
        sample_rate,
        FM_AUDIO_RATE,
        FM_DEVIATION_HZ,
        Some(DEEMPHASIS_TAU_US),
    )
}

/// Demodulate FM stereo to left/right channels.
///
/// The composite baseband carries L+R below 15 kHz, a 19 kHz pilot, and the
/// L-R difference as DSB-SC around 38 kHz. Squaring the extracted pilot
/// regenerates the 38 kHz carrier used to synchronously demodulate the
/// 23-53 kHz band.
pub fn fm_demodulate_stereo(
    samples: &[IqSample],
    sample_rate: f64,
    audio_rate: u32,
) -> (Vec<f32>, Vec<f32>, u32) {
    if samples.len() < 2 {
        return (Vec::new(), Vec::new(), audio_rate);
    }

    let phase = unwrapped_phase(samples);
    let baseband = differentiate(&phase);

    let decim1 = (sample_rate / STEREO_INTERMEDIATE_RATE) as usize;
    let (baseband, current_rate) = if decim1 > 1 {
        (decimate(&baseband, decim1), sample_rate / decim1 as f64)
    } else {
        (baseband, sample_rate)
    };

    // Mono (L+R)
    let mono = lowpass_filter(&baseband, 15_000.0, current_rate, 5);

    // Pilot squared: cos^2 = (1 + cos 2theta) / 2, so the DC-blocked square
    // is the 38 kHz carrier at half amplitude
    let pilot = bandpass_filter(&baseband, 18_500.0, 19_500.0, current_rate, 5);
    let squared: Vec<f64> = pilot.iter().map(|&p| p * p).collect();
    let carrier: Vec<f64> = dc_block_fast(&squared).iter().map(|&c| 2.0 * c).collect();

    // L-R around 38 kHz, demodulated against the recovered carrier
    let stereo_band = bandpass_filter(&baseband, 23_000.0, 53_000.0, current_rate, 5);
    let demodulated: Vec<f64> = stereo_band
        .iter()
        .zip(carrier.iter())
        .map(|(&s, &c)| s * c)
        .collect();
    let stereo_diff = lowpass_filter(&demodulated, 15_000.0, current_rate, 5);

    let len = mono.len().min(stereo_diff.len());
    let mut left: Vec<f64> = (0..len).map(|i| mono[i] + stereo_diff[i]).collect();
    let mut right: Vec<f64> = (0..len).map(|i| mono[i] - stereo_diff[i]).collect();

    let decim2 = (current_rate / f64::from(audio_rate)) as usize;
    if decim2 > 1 {
        left = decimate(&left, decim2);
        right = decimate(&right, decim2);
    }

    left = deemphasis_filter(&left, f64::from(audio_rate), DEEMPHASIS_TAU_US);
    right = deemphasis_filter(&right, f64::from(audio_rate), DEEMPHASIS_TAU_US);

    // Joint normalization keeps the stereo image intact
    let max = left
        .iter()
        .chain(right.iter())
        .fold(0.0_f64, |m, &x| m.max(x.abs()));
    if max > 0.0 {
        let scale = 0.9 / max;
        for x in left.iter_mut().chain(right.iter_mut()) {
            *x *= scale;
        }
    }

    (to_f32(left), to_f32(right), audio_rate)
}

/// Demodulate AM by envelope detection.
pub fn am_demodulate(samples: &[IqSample], sample_rate: f64, audio_rate: u32) -> (Vec<f32>, u32) {
    if samples.is_empty() {
        return (Vec::new(), audio_rate);
    }

    let envelope: Vec<f64> = samples.iter().map(|s| f64::from(s.norm())).collect();
    let audio = dc_block_fast(&envelope);
    let audio = lowpass_filter(&audio, f64::from(audio_rate) / 2.0, sample_rate, 5);
    let decimation = (sample_rate / f64::from(audio_rate)) as usize;
    let mut audio = decimate(&audio, decimation);

    normalize_peak(&mut audio);
    (to_f32(audio), audio_rate)
}

/// Demodulate SSB: real part for USB, imaginary part for LSB, band-limited
/// to the 300-3000 Hz voice range.
pub fn ssb_demodulate(
    samples: &[IqSample],
    sample_rate: f64,
    audio_rate: u32,
    upper_sideband: bool,
) -> (Vec<f32>, u32) {
    if samples.is_empty() {
        return (Vec::new(), audio_rate);
    }

    let audio: Vec<f64> = if upper_sideband {
        samples.iter().map(|s| f64::from(s.re)).collect()
    } else {
        samples.iter().map(|s| f64::from(s.im)).collect()
    };

    let audio = bandpass_filter(&audio, 300.0, 3_000.0, sample_rate, 5);
    let decimation = (sample_rate / f64::from(audio_rate)) as usize;
    let mut audio = decimate(&audio, decimation);

    normalize_peak(&mut audio);
    (to_f32(audio), audio_rate)
}

/// Mean signal power in dB.
pub fn compute_signal_strength(samples: &[IqSample]) -> f64 {
    if samples.is_empty() {
        return -200.0;
    }
    let power =
        samples.iter().map(|s| f64::from(s.norm_sqr())).sum::<f64>() / samples.len() as f64;
    10.0 * (power + 1e-20).log10()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rustfft::FftPlanner;

    /// FM-modulate a tone: phase is the running integral of the deviation.
    fn fm_modulate(tone_hz: f64, deviation: f64, sample_rate: f64, n: usize) -> Vec<IqSample> {
        let mut phase = 0.0_f64;
        (0..n)
            .map(|i| {
                let t = i as f64 / sample_rate;
                let m = (2.0 * std::f64::consts::PI * tone_hz * t).sin();
                phase += 2.0 * std::f64::consts::PI * deviation * m / sample_rate;
                IqSample::new(phase.cos() as f32, phase.sin() as f32)
            })
            .collect()
    }

    fn dominant_frequency(audio: &[f32], sample_rate: f64) -> f64 {
        let fft_size = 16_384.min(audio.len());
        let mut buffer: Vec<num_complex::Complex<f64>> = audio[..fft_size]
            .iter()
            .map(|&x| num_complex::Complex::new(f64::from(x), 0.0))
            .collect();
        let mut planner = FftPlanner::new();
        planner.plan_fft_forward(fft_size).process(&mut buffer);

        // Positive frequencies only; skip DC
        let (peak_bin, _) = buffer[1..fft_size / 2]
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.norm_sqr().total_cmp(&b.1.norm_sqr()))
            .unwrap();
        (peak_bin + 1) as f64 * sample_rate / fft_size as f64
    }

    #[test]
    fn fm_roundtrip_recovers_tone() {
        let sample_rate = 240_000.0;
        let samples = fm_modulate(1_000.0, FM_DEVIATION_HZ, sample_rate, 120_000);
        let (audio, rate) = fm_demodulate(
            &samples,
            sample_rate,
            FM_AUDIO_RATE,
            FM_DEVIATION_HZ,
            Some(DEEMPHASIS_TAU_US),
        );

        assert_eq!(rate, FM_AUDIO_RATE);
        assert!(!audio.is_empty());

        let detected = dominant_frequency(&audio, f64::from(rate));
        assert!(
            (detected - 1_000.0).abs() / 1_000.0 <= 0.01,
            "dominant frequency {detected} Hz"
        );
    }

    #[test]
    fn fm_output_is_normalized() {
        let samples = fm_modulate(1_000.0, FM_DEVIATION_HZ, 240_000.0, 48_000);
        let (audio, _) = fm_demodulate(&samples, 240_000.0, FM_AUDIO_RATE, FM_DEVIATION_HZ, None);
        let peak = audio.iter().fold(0.0_f32, |m, &x| m.max(x.abs()));
        assert!((peak - 0.9).abs() < 1e-3);
    }

    #[test]
    fn am_envelope_recovers_tone() {
        let sample_rate = 240_000.0;
        let samples: Vec<IqSample> = (0..120_000)
            .map(|i| {
                let t = i as f64 / sample_rate;
                let envelope = 1.0 + 0.5 * (2.0 * std::f64::consts::PI * 1_000.0 * t).sin();
                IqSample::new(envelope as f32, 0.0)
            })
            .collect();

        let (audio, rate) = am_demodulate(&samples, sample_rate, FM_AUDIO_RATE);
        let detected = dominant_frequency(&audio, f64::from(rate));
        assert!((detected - 1_000.0).abs() < 30.0, "detected {detected} Hz");
    }

    #[test]
    fn stereo_channels_share_length() {
        let samples = fm_modulate(1_000.0, FM_DEVIATION_HZ, 304_000.0, 60_800);
        let (left, right, rate) = fm_demodulate_stereo(&samples, 304_000.0, FM_AUDIO_RATE);
        assert_eq!(left.len(), right.len());
        assert_eq!(rate, FM_AUDIO_RATE);
        assert!(!left.is_empty());
    }

    #[test]
    fn ssb_produces_band_limited_audio() {
        let sample_rate = 48_000.0;
        let samples: Vec<IqSample> = (0..48_000)
            .map(|i| {
                let t = i as f64 / sample_rate;
                let v = (2.0 * std::f64::consts::PI * 1_000.0 * t).sin();
                IqSample::new(v as f32, 0.0)
            })
            .collect();
        let (audio, _) = ssb_demodulate(&samples, sample_rate, FM_AUDIO_RATE, true);
        let detected = dominant_frequency(&audio, sample_rate);
        assert!((detected - 1_000.0).abs() < 30.0);
    }

    #[test]
    fn empty_input_yields_empty_audio() {
        let (audio, _) = fm_demodulate(&[], 2.4e6, FM_AUDIO_RATE, FM_DEVIATION_HZ, None);
        assert!(audio.is_empty());
    }

    #[test]
    fn signal_strength_tracks_amplitude() {
        let strong = vec![IqSample::new(1.0, 0.0); 1024];
        let weak = vec![IqSample::new(0.01, 0.0); 1024];
        assert!(compute_signal_strength(&strong) > compute_signal_strength(&weak) + 30.0);
    }
}
