//! Shared DSP primitives: the smoothed log-magnitude spectrum analyser, RMS,
//! and test signal generators.

use realfft::num_complex::Complex;
use realfft::{RealFftPlanner, RealToComplex};
use std::sync::Arc;

/// Windowed FFT producing one frame of log-magnitude bins per call.
///
/// Frames follow the usual browser analyser conventions: `fft_size / 2`
/// bins, bin `i` centred on `i * sample_rate / fft_size`, a Blackman window,
/// magnitudes normalised by the FFT length and averaged over time with
/// `smoothing` (0.0 = no memory, close to 1.0 = very slow), then converted
/// to dBFS. Silent bins come out as negative infinity.
pub struct Analyser {
    fft: Arc<dyn RealToComplex<f32>>,
    fft_size: usize,
    window: Vec<f32>,
    smoothing: f32,
    /// Smoothed linear magnitudes, one per bin
    smoothed: Vec<f32>,
    input: Vec<f32>,
    spectrum: Vec<Complex<f32>>,
}

impl Analyser {
    pub fn new(fft_size: usize, smoothing: f32) -> Self {
        let fft_size = fft_size.max(2);
        let mut planner = RealFftPlanner::<f32>::new();
        let fft = planner.plan_fft_forward(fft_size);
        let input = fft.make_input_vec();
        let spectrum = fft.make_output_vec();

        Self {
            fft,
            fft_size,
            window: blackman(fft_size),
            smoothing: smoothing.clamp(0.0, 1.0),
            smoothed: vec![0.0; fft_size / 2],
            input,
            spectrum,
        }
    }

    pub fn fft_size(&self) -> usize {
        self.fft_size
    }

    pub fn bin_count(&self) -> usize {
        self.fft_size / 2
    }

    /// Analyse the most recent `fft_size` samples. Shorter input is treated
    /// as preceded by silence.
    pub fn frequency_frame(&mut self, samples: &[f32]) -> Vec<f32> {
        let n = self.fft_size;
        let take = samples.len().min(n);
        let pad = n - take;
        let recent = &samples[samples.len() - take..];

        for (i, slot) in self.input.iter_mut().enumerate() {
            *slot = if i < pad {
                0.0
            } else {
                recent[i - pad] * self.window[i]
            };
        }

        if self.fft.process(&mut self.input, &mut self.spectrum).is_err() {
            return vec![f32::NEG_INFINITY; self.bin_count()];
        }

        let tau = self.smoothing;
        let scale = 1.0 / n as f32;
        self.smoothed
            .iter_mut()
            .zip(self.spectrum.iter())
            .map(|(prev, c)| {
                let mag = c.norm() * scale;
                *prev = tau * *prev + (1.0 - tau) * mag;
                20.0 * prev.log10()
            })
            .collect()
    }

    /// Forget the smoothing history.
    pub fn reset(&mut self) {
        self.smoothed.iter_mut().for_each(|m| *m = 0.0);
    }
}

fn blackman(n: usize) -> Vec<f32> {
    use std::f32::consts::PI;
    const A: f32 = 0.16;
    let a0 = 0.5 * (1.0 - A);
    let a1 = 0.5;
    let a2 = 0.5 * A;
    (0..n)
        .map(|i| {
            let x = i as f32 / n as f32;
            a0 - a1 * (2.0 * PI * x).cos() + a2 * (4.0 * PI * x).cos()
        })
        .collect()
}

/// Root mean square of an audio buffer.
pub fn compute_rms(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum: f32 = samples.iter().map(|s| s * s).sum();
    (sum / samples.len() as f32).sqrt()
}

/// Test signal generators for unit tests.
#[cfg(test)]
pub mod test_helpers {
    use std::f64::consts::PI;

    /// Generate a mono sine wave.
    pub fn sine_wave(freq_hz: f64, amp: f64, sr: u32, ms: u32) -> Vec<f32> {
        let n = (sr as u64 * ms as u64 / 1000) as usize;
        (0..n)
            .map(|i| (amp * (2.0 * PI * freq_hz * i as f64 / sr as f64).sin()) as f32)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::test_helpers::sine_wave;
    use super::*;

    fn peak_bin(frame: &[f32]) -> usize {
        frame
            .iter()
            .enumerate()
            .filter(|(_, m)| m.is_finite())
            .max_by(|a, b| a.1.total_cmp(b.1))
            .map(|(i, _)| i)
            .unwrap()
    }

    #[test]
    fn test_frame_has_half_fft_bins() {
        let mut an = Analyser::new(2048, 0.0);
        let frame = an.frequency_frame(&sine_wave(440.0, 0.5, 48000, 100));
        assert_eq!(frame.len(), 1024);
        assert_eq!(an.bin_count(), 1024);
    }

    #[test]
    fn test_peak_lands_on_tone_bin() {
        let mut an = Analyser::new(4096, 0.0);
        let frame = an.frequency_frame(&sine_wave(440.0, 0.5, 48000, 200));
        let bin_hz = 48000.0 / 4096.0;
        let peak_hz = peak_bin(&frame) as f32 * bin_hz;
        assert!((peak_hz - 440.0).abs() < bin_hz, "peak at {:.1} Hz", peak_hz);
        // A half-scale tone is well above a -60 dB floor
        assert!(frame[peak_bin(&frame)] > -40.0);
    }

    #[test]
    fn test_silence_is_negative_infinity() {
        let mut an = Analyser::new(1024, 0.0);
        let frame = an.frequency_frame(&vec![0.0; 1024]);
        assert!(frame.iter().all(|m| *m == f32::NEG_INFINITY));
    }

    #[test]
    fn test_short_input_is_zero_padded() {
        let mut an = Analyser::new(2048, 0.0);
        let frame = an.frequency_frame(&sine_wave(440.0, 0.5, 48000, 10));
        assert_eq!(frame.len(), 1024);
        assert!(frame.iter().any(|m| m.is_finite()));
    }

    #[test]
    fn test_smoothing_decays_slowly() {
        let mut an = Analyser::new(2048, 0.8);
        let tone = sine_wave(440.0, 0.5, 48000, 100);
        let loud = an.frequency_frame(&tone);
        let bin = peak_bin(&loud);
        let after = an.frequency_frame(&vec![0.0; 2048]);
        // Smoothed: silence right after a tone still shows the tone, 20*log10(0.8) lower
        assert!((loud[bin] - after[bin] - 1.938).abs() < 0.01);
        an.reset();
        let fresh = an.frequency_frame(&vec![0.0; 2048]);
        assert_eq!(fresh[bin], f32::NEG_INFINITY);
    }

    #[test]
    fn test_rms() {
        assert_eq!(compute_rms(&[]), 0.0);
        let rms = compute_rms(&sine_wave(100.0, 1.0, 48000, 100));
        assert!((rms - std::f32::consts::FRAC_1_SQRT_2).abs() < 0.01);
    }
}
