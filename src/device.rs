//! Capture device seam and the WAV-file frame source.
//!
//! A capture device hands the recorder one log-magnitude frequency frame per
//! sampling step. Live hardware (`audio_input`, feature `audio`), WAV files
//! and the voice simulator all implement [`CaptureDevice`].

use crate::dsp::{compute_rms, Analyser};
use crate::error::EditorError;
use hound::{SampleFormat, WavReader};
use log::{info, warn};
use std::path::Path;

/// Analyser settings fixed for one capture session.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CaptureSettings {
    pub fft_size: usize,
    pub smoothing_time_constant: f32,
}

impl Default for CaptureSettings {
    fn default() -> Self {
        Self {
            fft_size: 2048,
            smoothing_time_constant: 0.8,
        }
    }
}

/// A source of frequency frames with an explicit acquire/release lifecycle.
pub trait CaptureDevice {
    /// Acquire the underlying input. Fails with
    /// [`EditorError::DeviceUnavailable`] when it cannot be opened.
    fn acquire(&mut self, settings: &CaptureSettings) -> Result<(), EditorError>;

    /// Release the input. Safe to call when not acquired.
    fn release(&mut self);

    /// Latest log-magnitude frame as of `elapsed_ms` into the session, or
    /// `None` when no audio is available yet (or the source is exhausted).
    /// Live devices ignore `elapsed_ms` and return their most recent frame.
    fn frequency_frame(&mut self, elapsed_ms: u64) -> Option<Vec<f32>>;

    fn sample_rate(&self) -> u32;
}

/// Plays back a decoded WAV file as a capture device.
///
/// The frame for `elapsed_ms` analyses the `fft_size` samples ending at that
/// point of the file, so driving the recorder with a simulated clock
/// reproduces what a live microphone would have seen.
pub struct WavSource {
    samples: Vec<f32>,
    sample_rate: u32,
    analyser: Option<Analyser>,
}

impl WavSource {
    /// Build a source from mono samples already in memory.
    pub fn from_samples(samples: Vec<f32>, sample_rate: u32) -> Self {
        Self {
            samples,
            sample_rate,
            analyser: None,
        }
    }

    /// Decode a WAV file and mix it down to mono.
    pub fn open(path: &Path) -> Result<Self, EditorError> {
        let reader = WavReader::open(path)
            .map_err(|e| EditorError::DeviceUnavailable(format!("{:?}: {}", path, e)))?;

        let spec = reader.spec();
        let channels = spec.channels.max(1) as usize;

        info!(
            "WAV: {:?}  {} Hz  {} ch  {:?}  {} bit",
            path.file_name().unwrap_or_default(),
            spec.sample_rate,
            channels,
            spec.sample_format,
            spec.bits_per_sample,
        );

        let interleaved: Vec<f32> = match spec.sample_format {
            SampleFormat::Float => reader
                .into_samples::<f32>()
                .filter_map(|s| s.ok())
                .collect(),
            SampleFormat::Int => {
                let max = (1i64 << (spec.bits_per_sample.max(1) - 1)) as f32;
                reader
                    .into_samples::<i32>()
                    .filter_map(|s| s.ok())
                    .map(|s| s as f32 / max)
                    .collect()
            }
        };

        let mono: Vec<f32> = if channels == 1 {
            interleaved
        } else {
            interleaved
                .chunks(channels)
                .map(|frame| frame.iter().sum::<f32>() / channels as f32)
                .collect()
        };

        if mono.is_empty() {
            warn!("WAV {:?} contains no samples", path);
        }
        info!(
            "WAV: {:.2}s, rms {:.4}",
            mono.len() as f64 / spec.sample_rate.max(1) as f64,
            compute_rms(&mono)
        );

        Ok(Self::from_samples(mono, spec.sample_rate))
    }

    /// Length of the file in milliseconds.
    pub fn duration_ms(&self) -> u64 {
        if self.sample_rate == 0 {
            return 0;
        }
        self.samples.len() as u64 * 1000 / self.sample_rate as u64
    }
}

impl CaptureDevice for WavSource {
    fn acquire(&mut self, settings: &CaptureSettings) -> Result<(), EditorError> {
        if self.sample_rate == 0 {
            return Err(EditorError::DeviceUnavailable(
                "WAV source has no sample rate".into(),
            ));
        }
        self.analyser = Some(Analyser::new(
            settings.fft_size,
            settings.smoothing_time_constant,
        ));
        Ok(())
    }

    fn release(&mut self) {
        self.analyser = None;
    }

    fn frequency_frame(&mut self, elapsed_ms: u64) -> Option<Vec<f32>> {
        let analyser = self.analyser.as_mut()?;
        let end = (elapsed_ms * self.sample_rate as u64 / 1000) as usize;
        if end == 0 || end > self.samples.len() {
            return None;
        }
        let start = end.saturating_sub(analyser.fft_size());
        Some(analyser.frequency_frame(&self.samples[start..end]))
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dsp::test_helpers::sine_wave;

    #[test]
    fn test_frames_require_acquire() {
        let mut src = WavSource::from_samples(sine_wave(440.0, 0.5, 48000, 500), 48000);
        assert!(src.frequency_frame(100).is_none());
        src.acquire(&CaptureSettings::default()).unwrap();
        let frame = src.frequency_frame(100).unwrap();
        assert_eq!(frame.len(), 1024);
        src.release();
        assert!(src.frequency_frame(100).is_none());
    }

    #[test]
    fn test_exhausted_source_yields_nothing() {
        let mut src = WavSource::from_samples(sine_wave(440.0, 0.5, 48000, 500), 48000);
        src.acquire(&CaptureSettings::default()).unwrap();
        assert_eq!(src.duration_ms(), 500);
        assert!(src.frequency_frame(0).is_none());
        assert!(src.frequency_frame(500).is_some());
        assert!(src.frequency_frame(501).is_none());
    }

    #[test]
    fn test_zero_rate_is_unavailable() {
        let mut src = WavSource::from_samples(vec![0.0; 10], 0);
        let err = src.acquire(&CaptureSettings::default()).unwrap_err();
        assert!(matches!(err, EditorError::DeviceUnavailable(_)));
    }

    #[test]
    fn test_wav_file_roundtrip() {
        let path = std::env::temp_dir().join(format!("voice_staff_src_{}.wav", std::process::id()));
        let spec = hound::WavSpec {
            channels: 2,
            sample_rate: 16000,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create(&path, spec).unwrap();
        for s in sine_wave(440.0, 0.5, 16000, 250) {
            let v = (s * i16::MAX as f32) as i16;
            writer.write_sample(v).unwrap();
            writer.write_sample(v).unwrap();
        }
        writer.finalize().unwrap();

        let src = WavSource::open(&path).unwrap();
        assert_eq!(src.sample_rate(), 16000);
        assert_eq!(src.duration_ms(), 250);
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn test_missing_file_is_unavailable() {
        let err = WavSource::open(Path::new("/nonexistent/take.wav")).err().unwrap();
        assert!(matches!(err, EditorError::DeviceUnavailable(_)));
    }
}
