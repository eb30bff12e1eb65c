use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleFormat, Stream, StreamConfig};
use crossbeam_channel::Receiver;
use log::{debug, error, info};

use crate::device::{CaptureDevice, CaptureSettings};
use crate::dsp::Analyser;
use crate::error::EditorError;

/// Live microphone capture via cpal.
///
/// `acquire` opens the default input device and starts streaming; the
/// realtime callback mixes to mono and hands buffers over a bounded channel.
/// Each `frequency_frame` drains whatever arrived since the last call and
/// analyses the most recent `fft_size` samples. `release` drops the stream,
/// which stops capture.
pub struct LiveInput {
    stream: Option<Stream>,
    rx: Option<Receiver<Vec<f32>>>,
    /// Most recent samples, at most `fft_size` of them
    recent: Vec<f32>,
    analyser: Option<Analyser>,
    sample_rate: u32,
}

impl LiveInput {
    pub fn new() -> Self {
        Self {
            stream: None,
            rx: None,
            recent: Vec::new(),
            analyser: None,
            sample_rate: 0,
        }
    }
}

impl Default for LiveInput {
    fn default() -> Self {
        Self::new()
    }
}

impl CaptureDevice for LiveInput {
    fn acquire(&mut self, settings: &CaptureSettings) -> Result<(), EditorError> {
        let unavailable = EditorError::DeviceUnavailable;
        let host = cpal::default_host();

        let device = host
            .default_input_device()
            .ok_or_else(|| unavailable("No default audio input device found".into()))?;

        info!(
            "Audio input: {}",
            device.name().unwrap_or_else(|_| "unknown".into())
        );

        let supported = device
            .default_input_config()
            .map_err(|e| unavailable(format!("No supported input config: {e}")))?;

        // Prefer 48kHz when a range with the default channel count covers it
        let preferred = cpal::SampleRate(48000);
        let config_48k = device.supported_input_configs().ok().and_then(|configs| {
            configs
                .filter(|c| {
                    c.channels() == supported.channels()
                        && c.min_sample_rate() <= preferred
                        && c.max_sample_rate() >= preferred
                })
                .max_by_key(|c| c.max_sample_rate())
                .map(|c| c.with_sample_rate(preferred))
        });

        let (config, sample_rate, format): (StreamConfig, u32, SampleFormat) =
            if let Some(cfg) = config_48k {
                let sr = cfg.sample_rate().0;
                let fmt = cfg.sample_format();
                (cfg.into(), sr, fmt)
            } else {
                let sr = supported.sample_rate().0;
                let fmt = supported.sample_format();
                (supported.into(), sr, fmt)
            };

        let channels = config.channels as usize;

        info!(
            "Capture config: {}Hz  {} ch  {:?}",
            sample_rate, channels, format
        );

        // try_send keeps the audio callback from blocking on backpressure
        let (raw_tx, raw_rx) = crossbeam_channel::bounded::<Vec<f32>>(64);

        let err_fn = |e: cpal::StreamError| error!("Audio stream error: {e}");

        let stream = match format {
            SampleFormat::F32 => device.build_input_stream(
                &config,
                move |data: &[f32], _| {
                    let _ = raw_tx.try_send(mix_mono_f32(data, channels));
                },
                err_fn,
                None,
            ),
            SampleFormat::I16 => device.build_input_stream(
                &config,
                move |data: &[i16], _| {
                    let _ = raw_tx.try_send(mix_mono_i16(data, channels));
                },
                err_fn,
                None,
            ),
            SampleFormat::U16 => device.build_input_stream(
                &config,
                move |data: &[u16], _| {
                    let _ = raw_tx.try_send(mix_mono_u16(data, channels));
                },
                err_fn,
                None,
            ),
            fmt => {
                return Err(unavailable(format!(
                    "Unsupported sample format {fmt:?}. Use an F32 or I16 device."
                )))
            }
        }
        .map_err(|e| unavailable(e.to_string()))?;

        stream.play().map_err(|e| unavailable(e.to_string()))?;

        self.stream = Some(stream);
        self.rx = Some(raw_rx);
        self.recent.clear();
        self.analyser = Some(Analyser::new(
            settings.fft_size,
            settings.smoothing_time_constant,
        ));
        self.sample_rate = sample_rate;
        Ok(())
    }

    fn release(&mut self) {
        if self.stream.take().is_some() {
            debug!("Audio input released");
        }
        self.rx = None;
        self.analyser = None;
        self.recent.clear();
    }

    fn frequency_frame(&mut self, _elapsed_ms: u64) -> Option<Vec<f32>> {
        let rx = self.rx.as_ref()?;
        let analyser = self.analyser.as_mut()?;
        for chunk in rx.try_iter() {
            self.recent.extend_from_slice(&chunk);
        }
        if self.recent.is_empty() {
            return None;
        }
        let n = analyser.fft_size();
        if self.recent.len() > n {
            self.recent.drain(..self.recent.len() - n);
        }
        Some(analyser.frequency_frame(&self.recent))
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }
}

// ─── Per-format mono mixdown helpers ─────────────────────────────────────────

fn mix_mono_f32(data: &[f32], channels: usize) -> Vec<f32> {
    if channels == 1 {
        return data.to_vec();
    }
    data.chunks(channels)
        .map(|frame| frame.iter().sum::<f32>() / channels as f32)
        .collect()
}

fn mix_mono_i16(data: &[i16], channels: usize) -> Vec<f32> {
    const SCALE: f32 = i16::MAX as f32;
    data.chunks(channels)
        .map(|frame| {
            let sum: i32 = frame.iter().map(|&s| s as i32).sum();
            sum as f32 / (channels as f32 * SCALE)
        })
        .collect()
}

fn mix_mono_u16(data: &[u16], channels: usize) -> Vec<f32> {
    // U16: 0 = -1.0, 32768 = 0.0, 65535 = +1.0
    const MID: f32 = 32768.0;
    data.chunks(channels)
        .map(|frame| {
            let sum: f32 = frame.iter().map(|&s| (s as f32 - MID) / MID).sum();
            sum / channels as f32
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mixdown_formats() {
        assert_eq!(mix_mono_f32(&[0.5, -0.5, 1.0, 0.0], 2), vec![0.0, 0.5]);
        assert_eq!(mix_mono_i16(&[i16::MAX, i16::MAX], 2), vec![1.0]);
        assert_eq!(mix_mono_u16(&[32768, 0], 1), vec![0.0, -1.0]);
    }

    #[test]
    fn test_unacquired_device_yields_nothing() {
        let mut dev = LiveInput::new();
        assert!(dev.frequency_frame(0).is_none());
        dev.release();
        assert_eq!(dev.sample_rate(), 0);
    }
}
