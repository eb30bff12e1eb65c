use crate::device::{CaptureDevice, CaptureSettings};
use crate::dsp::Analyser;
use crate::error::EditorError;
use crate::pitch_table::midi_to_hz;
use crate::types::Pitch;
use log::info;
use std::f64::consts::PI;

/// One step of a simulated singing voice.
#[derive(Debug, Clone, PartialEq)]
pub enum Phrase {
    /// Hold a pitch for `ms` at a peak amplitude (0.0–1.0).
    Sing { pitch: Pitch, ms: u32, amplitude: f32 },
    /// Silence.
    Rest { ms: u32 },
}

impl Phrase {
    fn ms(&self) -> u32 {
        match self {
            Phrase::Sing { ms, .. } | Phrase::Rest { ms } => *ms,
        }
    }
}

const DEFAULT_AMPLITUDE: f32 = 0.5;

/// Synthesizes a scripted melody and serves it as a capture device, so the
/// whole record → analyse → correct path runs without a microphone.
///
/// The voice is a pure sine per phrase. Samples are computed from their
/// absolute index, so any window of the melody can be regenerated on demand
/// for whatever `elapsed_ms` the recorder asks about.
pub struct VoiceSimulator {
    phrases: Vec<Phrase>,
    /// Phrase end boundaries in samples (exclusive)
    ends: Vec<u64>,
    sample_rate: u32,
    analyser: Option<Analyser>,
}

impl VoiceSimulator {
    pub fn new(phrases: Vec<Phrase>, sample_rate: u32) -> Self {
        let mut ends = Vec::with_capacity(phrases.len());
        let mut acc = 0u64;
        for p in &phrases {
            acc += p.ms() as u64 * sample_rate as u64 / 1000;
            ends.push(acc);
        }
        Self {
            phrases,
            ends,
            sample_rate,
            analyser: None,
        }
    }

    /// Parse a melody script: comma-separated `PITCH:MS[@AMP]` items, with
    /// `-` as the pitch for a rest. Example: `"C5:400,E5:400@0.8,-:200"`.
    pub fn from_script(script: &str, sample_rate: u32) -> Result<Self, EditorError> {
        let phrases = parse_script(script)?;
        Ok(Self::new(phrases, sample_rate))
    }

    pub fn phrases(&self) -> &[Phrase] {
        &self.phrases
    }

    /// Total melody length in milliseconds.
    pub fn total_ms(&self) -> u64 {
        self.phrases.iter().map(|p| p.ms() as u64).sum()
    }

    fn total_samples(&self) -> u64 {
        self.ends.last().copied().unwrap_or(0)
    }

    fn sample_at(&self, index: u64) -> f32 {
        let slot = self.ends.partition_point(|&end| end <= index);
        match self.phrases.get(slot) {
            Some(Phrase::Sing {
                pitch, amplitude, ..
            }) => {
                let freq = midi_to_hz(pitch.midi() as f64);
                let t = index as f64 / self.sample_rate as f64;
                (*amplitude as f64 * (2.0 * PI * freq * t).sin()) as f32
            }
            _ => 0.0,
        }
    }
}

impl CaptureDevice for VoiceSimulator {
    fn acquire(&mut self, settings: &CaptureSettings) -> Result<(), EditorError> {
        if self.sample_rate == 0 {
            return Err(EditorError::DeviceUnavailable(
                "simulator has no sample rate".into(),
            ));
        }
        info!(
            "Voice simulator: {} phrases, {} ms",
            self.phrases.len(),
            self.total_ms()
        );
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
        let end = elapsed_ms * self.sample_rate as u64 / 1000;
        if end == 0 || end > self.total_samples() {
            return None;
        }
        let n = self.analyser.as_ref()?.fft_size() as u64;
        let start = end.saturating_sub(n);
        let window: Vec<f32> = (start..end).map(|i| self.sample_at(i)).collect();
        self.analyser
            .as_mut()
            .map(|analyser| analyser.frequency_frame(&window))
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }
}

/// Parse a melody script into phrases.
pub fn parse_script(script: &str) -> Result<Vec<Phrase>, EditorError> {
    let mut phrases = Vec::new();
    for item in script.split(',').map(str::trim).filter(|s| !s.is_empty()) {
        let (pitch_str, rest) = item
            .split_once(':')
            .ok_or_else(|| EditorError::InvalidInput(format!("missing ':' in \"{}\"", item)))?;
        let (ms_str, amp_str) = match rest.split_once('@') {
            Some((ms, amp)) => (ms, Some(amp)),
            None => (rest, None),
        };
        let ms: u32 = ms_str
            .trim()
            .parse()
            .map_err(|_| EditorError::InvalidInput(format!("bad duration in \"{}\"", item)))?;

        if pitch_str.trim() == "-" {
            phrases.push(Phrase::Rest { ms });
            continue;
        }

        let pitch: Pitch = pitch_str.parse().map_err(EditorError::InvalidInput)?;
        let amplitude = match amp_str {
            Some(a) => a
                .trim()
                .parse::<f32>()
                .ok()
                .filter(|a| (0.0..=1.0).contains(a))
                .ok_or_else(|| {
                    EditorError::InvalidInput(format!("bad amplitude in \"{}\"", item))
                })?,
            None => DEFAULT_AMPLITUDE,
        };
        phrases.push(Phrase::Sing {
            pitch,
            ms,
            amplitude,
        });
    }
    if phrases.is_empty() {
        return Err(EditorError::InvalidInput("empty melody script".into()));
    }
    Ok(phrases)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spectral::SpectralAnalyzer;

    #[test]
    fn test_parse_script() {
        let phrases = parse_script("C5:400, E5:300@0.8 ,-:200").unwrap();
        assert_eq!(phrases.len(), 3);
        assert_eq!(
            phrases[0],
            Phrase::Sing {
                pitch: "C5".parse().unwrap(),
                ms: 400,
                amplitude: DEFAULT_AMPLITUDE
            }
        );
        assert!(matches!(phrases[1], Phrase::Sing { amplitude, .. } if amplitude == 0.8));
        assert_eq!(phrases[2], Phrase::Rest { ms: 200 });
    }

    #[test]
    fn test_parse_script_errors() {
        assert!(parse_script("").is_err());
        assert!(parse_script("C5").is_err());
        assert!(parse_script("C5:abc").is_err());
        assert!(parse_script("X5:100").is_err());
        assert!(parse_script("C5:100@2.0").is_err());
    }

    #[test]
    fn test_total_length_and_exhaustion() {
        let mut sim = VoiceSimulator::from_script("A4:300,-:200", 48000).unwrap();
        assert_eq!(sim.total_ms(), 500);
        sim.acquire(&CaptureSettings::default()).unwrap();
        assert!(sim.frequency_frame(0).is_none());
        assert!(sim.frequency_frame(500).is_some());
        assert!(sim.frequency_frame(501).is_none());
    }

    #[test]
    fn test_sung_phrase_is_detected() {
        let mut sim = VoiceSimulator::from_script("A4:400,-:400", 48000).unwrap();
        sim.acquire(&CaptureSettings {
            fft_size: 4096,
            smoothing_time_constant: 0.0,
        })
        .unwrap();
        let analyzer = SpectralAnalyzer::default();

        let sung = sim.frequency_frame(300).unwrap();
        let est = analyzer.analyze(&sung, 48000).unwrap();
        assert!((est.frequency_hz - 440.0).abs() < 12.0);

        let rest = sim.frequency_frame(800).unwrap();
        assert!(analyzer.analyze(&rest, 48000).is_none());
    }
}
