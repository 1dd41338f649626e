//! Synthetic tuner for tests and the simulation binary.
//!
//! Generates complex Gaussian noise at a configurable floor plus any number
//! of injected carriers. Carrier powers are calibrated so a Hann-windowed
//! power spectrum at [`DEFAULT_FFT_SIZE`] reports approximately the
//! configured dB value at the peak bin.

use std::sync::{Arc, Mutex};

use rand::rngs::StdRng;
use rand::SeedableRng;
use rand_distr::{Distribution, Normal};

use super::{DeviceError, Gain, Tuner, TunerParams};
use crate::config::DEFAULT_FFT_SIZE;
use crate::dsp::IqSample;

/// A carrier injected into the synthetic spectrum.
#[derive(Debug, Clone, Copy)]
pub struct InjectedCarrier {
    pub frequency_hz: f64,
    pub power_db: f64,
}

/// Hardware-free tuner producing noise plus injected carriers.
///
/// The carrier set sits behind a shared handle so a test or simulation
/// driver can change the spectrum while another thread owns the tuner.
pub struct SimulatedTuner {
    params: TunerParams,
    noise_floor_db: f64,
    carriers: Arc<Mutex<Vec<InjectedCarrier>>>,
    rng: StdRng,
    sample_counter: u64,
    /// When set, `read_samples` fails with a USB error after this many reads.
    fail_after_reads: Option<u32>,
    reads: u32,
}

impl SimulatedTuner {
    pub fn new(mut params: TunerParams, noise_floor_db: f64) -> Self {
        params.sample_rate =
            crate::config::PlatformConfig::default().clamp_sample_rate(params.sample_rate);
        Self {
            params,
            noise_floor_db,
            carriers: Arc::new(Mutex::new(Vec::new())),
            rng: StdRng::seed_from_u64(0x5d12),
            sample_counter: 0,
            fail_after_reads: None,
            reads: 0,
        }
    }

    /// Add a carrier at an absolute frequency.
    #[must_use]
    pub fn with_carrier(self, frequency_hz: f64, power_db: f64) -> Self {
        if let Ok(mut carriers) = self.carriers.lock() {
            carriers.push(InjectedCarrier {
                frequency_hz,
                power_db,
            });
        }
        self
    }

    /// Make `read_samples` fail after `reads` successful reads.
    #[must_use]
    pub fn failing_after(mut self, reads: u32) -> Self {
        self.fail_after_reads = Some(reads);
        self
    }

    /// Shared handle to the carrier set, for changing the spectrum while
    /// the tuner is owned elsewhere.
    pub fn carriers_handle(&self) -> Arc<Mutex<Vec<InjectedCarrier>>> {
        Arc::clone(&self.carriers)
    }
}

impl Tuner for SimulatedTuner {
    fn set_center_freq(&mut self, freq_hz: f64) -> Result<(), DeviceError> {
        if freq_hz <= 0.0 {
            return Err(DeviceError::InvalidFrequency(freq_hz));
        }
        self.params.center_freq = freq_hz;
        Ok(())
    }

    fn set_sample_rate(&mut self, rate: f64) -> Result<(), DeviceError> {
        if rate <= 0.0 {
            return Err(DeviceError::UnsupportedSampleRate(rate));
        }
        self.params.sample_rate = rate;
        Ok(())
    }

    fn set_gain(&mut self, gain: Gain) -> Result<(), DeviceError> {
        self.params.gain = gain;
        Ok(())
    }

    fn read_samples(&mut self, n: usize) -> Result<Vec<IqSample>, DeviceError> {
        if let Some(limit) = self.fail_after_reads {
            if self.reads >= limit {
                return Err(DeviceError::Usb {
                    code: -8,
                    message: "simulated overflow".into(),
                });
            }
        }
        self.reads += 1;

        let sample_rate = self.params.sample_rate;
        let center = self.params.center_freq;

        // Bin powers of white noise are exponentially distributed; the
        // scanner's floor estimate is the 25th percentile of Hann-windowed
        // bins. Compensate both so the measured floor lands at the
        // configured level: Hann noise gain (sum w^2 / N) and -ln(0.75)
        const HANN_NOISE_GAIN: f64 = 0.375;
        const PERCENTILE_25_FACTOR: f64 = 0.287_682;
        let noise_power = 10.0_f64.powf(self.noise_floor_db / 10.0)
            / (HANN_NOISE_GAIN * PERCENTILE_25_FACTOR);
        #[allow(clippy::unwrap_used)]
        let normal = Normal::new(0.0, (noise_power / 2.0).sqrt()).unwrap();

        // Carriers inside the current Nyquist window, with amplitude
        // compensating the Hann coherent gain at the calibration FFT size
        let visible: Vec<(f64, f64)> = self
            .carriers
            .lock()
            .map(|carriers| {
                carriers
                    .iter()
                    .filter(|c| (c.frequency_hz - center).abs() < sample_rate / 2.0)
                    .map(|c| {
                        let offset = c.frequency_hz - center;
                        let amplitude = (10.0_f64.powf(c.power_db / 10.0) * 4.0
                            / DEFAULT_FFT_SIZE as f64)
                            .sqrt();
                        (offset, amplitude)
                    })
                    .collect()
            })
            .unwrap_or_default();

        let start = self.sample_counter;
        self.sample_counter += n as u64;

        Ok((0..n)
            .map(|i| {
                let t = (start + i as u64) as f64 / sample_rate;
                let mut re = normal.sample(&mut self.rng);
                let mut im = normal.sample(&mut self.rng);
                for &(offset, amplitude) in &visible {
                    let phase = 2.0 * std::f64::consts::PI * offset * t;
                    re += amplitude * phase.cos();
                    im += amplitude * phase.sin();
                }
                IqSample::new(re as f32, im as f32)
            })
            .collect())
    }

    fn center_freq(&self) -> f64 {
        self.params.center_freq
    }

    fn sample_rate(&self) -> f64 {
        self.params.sample_rate
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dsp::{compute_power_spectrum_hz, estimate_noise_floor, Window};

    #[test]
    fn noise_floor_lands_near_configured_level() {
        let mut tuner = SimulatedTuner::new(TunerParams::default(), -60.0);
        tuner.set_center_freq(100e6).unwrap();
        let samples = tuner.read_samples(DEFAULT_FFT_SIZE * 4).unwrap();

        let (_, power) =
            compute_power_spectrum_hz(&samples, 2.4e6, 100e6, DEFAULT_FFT_SIZE, Window::Hann);
        let floor = estimate_noise_floor(&power, 25.0);
        assert!((-64.0..=-56.0).contains(&floor), "floor {floor} dB");
    }

    #[test]
    fn injected_carrier_appears_at_configured_power() {
        let mut tuner =
            SimulatedTuner::new(TunerParams::default(), -60.0).with_carrier(100.1e6, -20.0);
        tuner.set_center_freq(100e6).unwrap();
        let samples = tuner.read_samples(DEFAULT_FFT_SIZE * 4).unwrap();

        let (freqs, power) =
            compute_power_spectrum_hz(&samples, 2.4e6, 100e6, DEFAULT_FFT_SIZE, Window::Hann);
        let (peak_bin, &peak_db) = power
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.total_cmp(b.1))
            .unwrap();

        assert!((freqs[peak_bin] - 100.1e6).abs() < 5_000.0);
        assert!((-25.0..=-15.0).contains(&peak_db), "peak {peak_db} dB");
    }

    #[test]
    fn failure_injection_raises_usb_error() {
        let mut tuner = SimulatedTuner::new(TunerParams::default(), -60.0).failing_after(2);
        assert!(tuner.read_samples(64).is_ok());
        assert!(tuner.read_samples(64).is_ok());
        assert!(matches!(
            tuner.read_samples(64),
            Err(DeviceError::Usb { .. })
        ));
    }

    #[test]
    fn rejects_nonsense_tuning() {
        let mut tuner = SimulatedTuner::new(TunerParams::default(), -60.0);
        assert!(matches!(
            tuner.set_center_freq(-5.0),
            Err(DeviceError::InvalidFrequency(_))
        ));
        assert!(matches!(
            tuner.set_sample_rate(0.0),
            Err(DeviceError::UnsupportedSampleRate(_))
        ));
    }
}
