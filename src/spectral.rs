use log::trace;

/// Lowest fundamental considered (Hz), the bottom of the sung voice range.
pub const BAND_LOW_HZ: f32 = 80.0;
/// Highest fundamental considered (Hz).
pub const BAND_HIGH_HZ: f32 = 1000.0;

/// Result of analysing one frequency frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PitchEstimate {
    pub frequency_hz: f32,
    /// Magnitude of the winning bin, dBFS
    pub amplitude_db: f32,
}

/// Band-limited peak picker for a single monophonic voice.
///
/// Takes the bin with the largest log magnitude between [`BAND_LOW_HZ`] and
/// [`BAND_HIGH_HZ`] and reports its centre frequency. A strong second
/// harmonic can win over a weak fundamental; for a voice in this narrow band
/// that is accepted rather than paying for autocorrelation.
///
/// Frames with no bins inside the band, or whose in-band peak does not rise
/// above the noise floor, yield no estimate.
#[derive(Debug, Clone)]
pub struct SpectralAnalyzer {
    noise_floor_db: f32,
}

impl SpectralAnalyzer {
    pub fn new(noise_floor_db: f32) -> Self {
        Self { noise_floor_db }
    }

    /// Noise floor for a sensitivity factor in [0, 2]: -60 dB at 1.0, lower
    /// (more sensitive) as the factor grows.
    pub fn with_sensitivity(sensitivity: f32) -> Self {
        Self::new(-60.0 * sensitivity.clamp(0.0, 2.0))
    }

    pub fn noise_floor_db(&self) -> f32 {
        self.noise_floor_db
    }

    /// Estimate the fundamental of one frame of log magnitudes.
    ///
    /// `magnitudes_db.len()` is the frame length; bin `i` is centred on
    /// `i * (sample_rate / 2) / frame_length`.
    pub fn analyze(&self, magnitudes_db: &[f32], sample_rate: u32) -> Option<PitchEstimate> {
        let frame_len = magnitudes_db.len();
        if frame_len == 0 || sample_rate == 0 {
            return None;
        }
        let bin_width = (sample_rate as f32 / 2.0) / frame_len as f32;

        let first = (BAND_LOW_HZ / bin_width).ceil() as usize;
        let last = ((BAND_HIGH_HZ / bin_width).floor() as usize).min(frame_len - 1);
        if first > last {
            return None;
        }

        let mut peak: Option<(usize, f32)> = None;
        for (i, &db) in magnitudes_db.iter().enumerate().take(last + 1).skip(first) {
            if !db.is_finite() {
                continue;
            }
            match peak {
                Some((_, best)) if db <= best => {}
                _ => peak = Some((i, db)),
            }
        }

        let (bin, amplitude_db) = peak?;
        if amplitude_db <= self.noise_floor_db {
            return None;
        }

        let frequency_hz = bin as f32 * bin_width;
        trace!(
            "spectral: peak bin {} → {:.1} Hz at {:.1} dB (floor {:.1})",
            bin,
            frequency_hz,
            amplitude_db,
            self.noise_floor_db
        );
        Some(PitchEstimate {
            frequency_hz,
            amplitude_db,
        })
    }
}

impl Default for SpectralAnalyzer {
    fn default() -> Self {
        Self::with_sensitivity(1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dsp::test_helpers::sine_wave;
    use crate::dsp::Analyser;

    /// 1024 bins at 48 kHz → bin width 23.4375 Hz.
    fn frame_with_peak(bin: usize, db: f32) -> Vec<f32> {
        let mut frame = vec![-100.0f32; 1024];
        frame[bin] = db;
        frame
    }

    #[test]
    fn test_peak_bin_frequency() {
        let an = SpectralAnalyzer::default();
        let est = an.analyze(&frame_with_peak(20, -10.0), 48000).unwrap();
        assert!((est.frequency_hz - 468.75).abs() < 1e-3);
        assert_eq!(est.amplitude_db, -10.0);
    }

    #[test]
    fn test_ignores_peaks_outside_band() {
        let an = SpectralAnalyzer::default();
        let mut frame = frame_with_peak(20, -30.0);
        frame[1] = 0.0; // 23 Hz rumble
        frame[100] = 0.0; // 2.3 kHz
        let est = an.analyze(&frame, 48000).unwrap();
        assert!((est.frequency_hz - 468.75).abs() < 1e-3);
    }

    #[test]
    fn test_below_noise_floor_is_no_pitch() {
        let an = SpectralAnalyzer::with_sensitivity(1.0);
        assert!(an.analyze(&frame_with_peak(20, -61.0), 48000).is_none());
        assert!(an.analyze(&vec![f32::NEG_INFINITY; 1024], 48000).is_none());
    }

    #[test]
    fn test_sensitivity_moves_floor() {
        let frame = frame_with_peak(20, -90.0);
        assert!(SpectralAnalyzer::with_sensitivity(1.0).analyze(&frame, 48000).is_none());
        assert!(SpectralAnalyzer::with_sensitivity(2.0).analyze(&frame, 48000).is_some());
        assert_eq!(SpectralAnalyzer::with_sensitivity(5.0).noise_floor_db(), -120.0);
    }

    #[test]
    fn test_no_bins_in_band() {
        let an = SpectralAnalyzer::default();
        // 4 bins at 48 kHz → 6 kHz per bin, nothing lands in 80–1000 Hz
        assert!(an.analyze(&[0.0; 4], 48000).is_none());
        assert!(an.analyze(&[], 48000).is_none());
    }

    #[test]
    fn test_real_tone_through_analyser() {
        let mut analyser = Analyser::new(4096, 0.0);
        let frame = analyser.frequency_frame(&sine_wave(523.25, 0.5, 48000, 200));
        let est = SpectralAnalyzer::default().analyze(&frame, 48000).unwrap();
        assert!((est.frequency_hz - 523.25).abs() < 12.0, "got {:.1}", est.frequency_hz);
    }
}
