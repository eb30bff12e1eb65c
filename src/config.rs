//! Editor configuration: recorder and playback knobs, stored as JSON.
//!
//! Every field has a default, so a config file only needs the values it
//! changes. Out-of-range values are clamped by [`Config::validated`].

use crate::device::CaptureSettings;
use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::io;
use std::path::Path;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub recorder: RecorderConfig,
    pub playback: PlaybackConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecorderConfig {
    /// Noise-floor scale in [0, 2]; the floor is `-60 dB * sensitivity`.
    pub sensitivity: f32,
    /// Analyser time averaging in [0, 1].
    pub smoothing_time_constant: f32,
    /// FFT length, a power of two; frames carry half as many bins.
    pub fft_size: usize,
    /// Sampling step period used by offline drivers (one rendered frame).
    pub frame_interval_ms: u64,
}

impl Default for RecorderConfig {
    fn default() -> Self {
        Self {
            sensitivity: 1.0,
            smoothing_time_constant: 0.8,
            fft_size: 2048,
            frame_interval_ms: 16,
        }
    }
}

impl RecorderConfig {
    pub fn capture_settings(&self) -> CaptureSettings {
        CaptureSettings {
            fft_size: self.fft_size,
            smoothing_time_constant: self.smoothing_time_constant,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlaybackConfig {
    /// Length of a timeline pass across the whole visual span.
    pub total_duration_ms: u64,
    /// Gap between notes in sequential playback.
    pub sequential_delay_ms: u64,
    /// Visual x coordinate where the timeline starts.
    pub span_start: f32,
    /// Visual x coordinate where the timeline ends.
    pub span_end: f32,
    /// A note this wide sounds for `reference_seconds`.
    pub reference_width: f32,
    pub reference_seconds: f32,
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            total_duration_ms: 4000,
            sequential_delay_ms: 500,
            span_start: 50.0,
            span_end: 700.0,
            reference_width: 40.0,
            reference_seconds: 0.5,
        }
    }
}

impl Config {
    /// Load from a JSON file. Returns None if file is absent or malformed.
    pub fn load(path: &Path) -> Option<Self> {
        let data = std::fs::read_to_string(path).ok()?;
        match serde_json::from_str::<Config>(&data) {
            Ok(c) => {
                info!("Loaded config from {:?}", path);
                Some(c.validated())
            }
            Err(e) => {
                warn!("Failed to parse config file {:?}: {}", path, e);
                None
            }
        }
    }

    pub fn save(&self, path: &Path) -> io::Result<()> {
        let json = serde_json::to_string_pretty(self).map_err(io::Error::other)?;
        std::fs::write(path, json)?;
        info!("Config saved to {:?}", path);
        Ok(())
    }

    /// Clamp every knob into its legal range, warning about each change.
    pub fn validated(mut self) -> Self {
        let defaults = Config::default();
        let r = &mut self.recorder;

        if !(0.0..=2.0).contains(&r.sensitivity) {
            let fixed = if r.sensitivity.is_nan() {
                defaults.recorder.sensitivity
            } else {
                r.sensitivity.clamp(0.0, 2.0)
            };
            warn!("sensitivity {} out of [0, 2], using {}", r.sensitivity, fixed);
            r.sensitivity = fixed;
        }
        if !(0.0..=1.0).contains(&r.smoothing_time_constant) {
            let fixed = if r.smoothing_time_constant.is_nan() {
                defaults.recorder.smoothing_time_constant
            } else {
                r.smoothing_time_constant.clamp(0.0, 1.0)
            };
            warn!(
                "smoothing_time_constant {} out of [0, 1], using {}",
                r.smoothing_time_constant, fixed
            );
            r.smoothing_time_constant = fixed;
        }
        if !r.fft_size.is_power_of_two() || !(32..=32768).contains(&r.fft_size) {
            warn!(
                "fft_size {} is not a power of two in 32..=32768, using {}",
                r.fft_size, defaults.recorder.fft_size
            );
            r.fft_size = defaults.recorder.fft_size;
        }
        if r.frame_interval_ms == 0 {
            warn!("frame_interval_ms must be positive, using {}", defaults.recorder.frame_interval_ms);
            r.frame_interval_ms = defaults.recorder.frame_interval_ms;
        }

        let p = &mut self.playback;
        if !(p.span_end > p.span_start) || !p.span_start.is_finite() || !p.span_end.is_finite() {
            warn!(
                "playback span [{}, {}] is invalid, using [{}, {}]",
                p.span_start, p.span_end, defaults.playback.span_start, defaults.playback.span_end
            );
            p.span_start = defaults.playback.span_start;
            p.span_end = defaults.playback.span_end;
        }
        if !(p.reference_width > 0.0)
            || !p.reference_width.is_finite()
            || !(p.reference_seconds >= 0.0)
            || !p.reference_seconds.is_finite()
        {
            warn!("playback reference width/seconds invalid, using defaults");
            p.reference_width = defaults.playback.reference_width;
            p.reference_seconds = defaults.playback.reference_seconds;
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_roundtrip() {
        let mut cfg = Config::default();
        cfg.recorder.sensitivity = 1.4;
        cfg.playback.sequential_delay_ms = 250;
        let json = serde_json::to_string_pretty(&cfg).unwrap();
        let loaded: Config = serde_json::from_str(&json).unwrap();
        assert_eq!(loaded, cfg);
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let cfg: Config = serde_json::from_str(r#"{"recorder":{"sensitivity":0.5}}"#).unwrap();
        assert_eq!(cfg.recorder.sensitivity, 0.5);
        assert_eq!(cfg.recorder.fft_size, 2048);
        assert_eq!(cfg.playback.total_duration_ms, 4000);
    }

    #[test]
    fn test_validated_clamps() {
        let mut cfg = Config::default();
        cfg.recorder.sensitivity = 3.0;
        cfg.recorder.smoothing_time_constant = -0.5;
        cfg.recorder.fft_size = 1000;
        cfg.playback.span_end = cfg.playback.span_start;
        let cfg = cfg.validated();
        assert_eq!(cfg.recorder.sensitivity, 2.0);
        assert_eq!(cfg.recorder.smoothing_time_constant, 0.0);
        assert_eq!(cfg.recorder.fft_size, 2048);
        assert_eq!(cfg.playback.span_start, 50.0);
        assert_eq!(cfg.playback.span_end, 700.0);
    }

    #[test]
    fn test_load_missing_and_malformed() {
        assert!(Config::load(Path::new("/nonexistent/voice-staff.json")).is_none());

        let path = std::env::temp_dir().join(format!("voice_staff_cfg_{}.json", std::process::id()));
        std::fs::write(&path, "{ not json").unwrap();
        assert!(Config::load(&path).is_none());

        Config::default().save(&path).unwrap();
        assert_eq!(Config::load(&path), Some(Config::default()));
        let _ = std::fs::remove_file(&path);
    }
}
