//! Tone output: the fire-and-forget `play_tone` seam and its sinks.

use crate::error::EditorError;
use log::info;
use std::f32::consts::PI;
use std::path::Path;

/// Oscillator gain at note onset.
pub const GAIN_START: f32 = 0.3;
/// Gain the exponential decay reaches at the end of the note.
pub const GAIN_END: f32 = 0.01;

/// Something that can sound a sine tone. Tones cannot be cancelled once
/// handed over.
pub trait ToneSink {
    fn play_tone(&mut self, frequency_hz: f32, duration_secs: f32);
}

/// Envelope gain `t` seconds into a tone lasting `duration_secs`.
pub fn envelope(t: f32, duration_secs: f32) -> f32 {
    if duration_secs <= 0.0 {
        return 0.0;
    }
    GAIN_START * (GAIN_END / GAIN_START).powf((t / duration_secs).clamp(0.0, 1.0))
}

/// Logs each tone instead of sounding it. Used when no output is requested.
#[derive(Debug, Default)]
pub struct LogSink {
    count: usize,
}

impl LogSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn count(&self) -> usize {
        self.count
    }
}

impl ToneSink for LogSink {
    fn play_tone(&mut self, frequency_hz: f32, duration_secs: f32) {
        self.count += 1;
        info!("♪ {:.2} Hz for {:.3}s", frequency_hz, duration_secs);
    }
}

/// Mixes tones into an in-memory mono buffer and writes it as a WAV file.
///
/// Tones start at the current cursor, which the owner moves to the
/// playback clock before each scheduler poll. Overlapping tones are summed.
pub struct WavRenderer {
    sample_rate: u32,
    cursor: usize,
    buffer: Vec<f32>,
}

impl WavRenderer {
    pub fn new(sample_rate: u32) -> Self {
        Self {
            sample_rate: sample_rate.max(1),
            cursor: 0,
            buffer: Vec::new(),
        }
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Move the write cursor to `ms` from the start of the render.
    pub fn seek_ms(&mut self, ms: u64) {
        self.cursor = (ms * self.sample_rate as u64 / 1000) as usize;
    }

    /// Where the next tone will start.
    pub fn cursor_ms(&self) -> u64 {
        self.cursor as u64 * 1000 / self.sample_rate as u64
    }

    /// Pad with silence up to `ms` so the file covers the whole run.
    pub fn extend_to_ms(&mut self, ms: u64) {
        let len = (ms * self.sample_rate as u64 / 1000) as usize;
        if self.buffer.len() < len {
            self.buffer.resize(len, 0.0);
        }
    }

    pub fn samples(&self) -> &[f32] {
        &self.buffer
    }

    pub fn duration_ms(&self) -> u64 {
        self.buffer.len() as u64 * 1000 / self.sample_rate as u64
    }

    /// Write the mix as 16-bit mono PCM, clipping to [-1, 1].
    pub fn write(&self, path: &Path) -> Result<(), EditorError> {
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate: self.sample_rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create(path, spec).map_err(wav_error)?;
        for &s in &self.buffer {
            let v = (s.clamp(-1.0, 1.0) * i16::MAX as f32) as i16;
            writer.write_sample(v).map_err(wav_error)?;
        }
        writer.finalize().map_err(wav_error)?;
        info!(
            "Rendered {:.2}s of audio to {:?}",
            self.buffer.len() as f64 / self.sample_rate as f64,
            path
        );
        Ok(())
    }
}

fn wav_error(e: hound::Error) -> EditorError {
    match e {
        hound::Error::IoError(io) => EditorError::Io(io),
        other => EditorError::InvalidInput(other.to_string()),
    }
}

impl ToneSink for WavRenderer {
    fn play_tone(&mut self, frequency_hz: f32, duration_secs: f32) {
        let n = (duration_secs.max(0.0) * self.sample_rate as f32) as usize;
        let end = self.cursor + n;
        if self.buffer.len() < end {
            self.buffer.resize(end, 0.0);
        }
        let sr = self.sample_rate as f32;
        for (i, out) in self.buffer[self.cursor..end].iter_mut().enumerate() {
            let t = i as f32 / sr;
            *out += envelope(t, duration_secs) * (2.0 * PI * frequency_hz * t).sin();
        }
    }
}

#[cfg(feature = "audio")]
pub use speaker::SpeakerSink;

#[cfg(feature = "audio")]
mod speaker {
    use super::{envelope, ToneSink};
    use crate::error::EditorError;
    use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
    use cpal::{SampleFormat, Stream, StreamConfig};
    use crossbeam_channel::{Receiver, Sender};
    use log::{error, info, warn};
    use std::f32::consts::PI;

    /// Queued tones waiting for the output callback.
    const TONE_QUEUE: usize = 64;

    struct Voice {
        frequency_hz: f32,
        duration_secs: f32,
        /// Samples already rendered
        pos: usize,
        len: usize,
    }

    /// Realtime-side mixer: picks up new tones and sums active voices.
    struct Mixer {
        rx: Receiver<(f32, f32)>,
        voices: Vec<Voice>,
        sample_rate: f32,
    }

    impl Mixer {
        fn next_sample(&mut self) -> f32 {
            for (frequency_hz, duration_secs) in self.rx.try_iter() {
                self.voices.push(Voice {
                    frequency_hz,
                    duration_secs,
                    pos: 0,
                    len: (duration_secs * self.sample_rate) as usize,
                });
            }
            let mut out = 0.0;
            for v in &mut self.voices {
                let t = v.pos as f32 / self.sample_rate;
                out += envelope(t, v.duration_secs) * (2.0 * PI * v.frequency_hz * t).sin();
                v.pos += 1;
            }
            self.voices.retain(|v| v.pos < v.len);
            out.clamp(-1.0, 1.0)
        }

        fn fill_f32(&mut self, data: &mut [f32], channels: usize) {
            for frame in data.chunks_mut(channels) {
                let s = self.next_sample();
                frame.iter_mut().for_each(|o| *o = s);
            }
        }

        fn fill_i16(&mut self, data: &mut [i16], channels: usize) {
            for frame in data.chunks_mut(channels) {
                let s = (self.next_sample() * i16::MAX as f32) as i16;
                frame.iter_mut().for_each(|o| *o = s);
            }
        }
    }

    /// Sounds tones on the default output device.
    ///
    /// Holds the cpal `Stream` alive; drop this to stop output. Tones cross
    /// to the audio callback over a bounded channel and are dropped with a
    /// warning if the callback falls behind.
    pub struct SpeakerSink {
        tx: Sender<(f32, f32)>,
        _stream: Stream,
    }

    impl SpeakerSink {
        pub fn open() -> Result<Self, EditorError> {
            let host = cpal::default_host();
            let device = host.default_output_device().ok_or_else(|| {
                EditorError::DeviceUnavailable("No default audio output device found".into())
            })?;

            info!(
                "Audio output: {}",
                device.name().unwrap_or_else(|_| "unknown".into())
            );

            let supported = device.default_output_config().map_err(|e| {
                EditorError::DeviceUnavailable(format!("No supported output config: {e}"))
            })?;
            let format = supported.sample_format();
            let sample_rate = supported.sample_rate().0;
            let config: StreamConfig = supported.into();
            let channels = config.channels as usize;

            info!(
                "Output config: {}Hz  {} ch  {:?}",
                sample_rate, channels, format
            );

            let (tx, rx) = crossbeam_channel::bounded::<(f32, f32)>(TONE_QUEUE);
            let mut mixer = Mixer {
                rx,
                voices: Vec::new(),
                sample_rate: sample_rate as f32,
            };
            let err_fn = |e: cpal::StreamError| error!("Audio output stream error: {e}");

            let stream = match format {
                SampleFormat::F32 => device.build_output_stream(
                    &config,
                    move |data: &mut [f32], _| mixer.fill_f32(data, channels),
                    err_fn,
                    None,
                ),
                SampleFormat::I16 => device.build_output_stream(
                    &config,
                    move |data: &mut [i16], _| mixer.fill_i16(data, channels),
                    err_fn,
                    None,
                ),
                fmt => {
                    return Err(EditorError::DeviceUnavailable(format!(
                        "Unsupported output sample format {fmt:?}"
                    )))
                }
            }
            .map_err(|e| EditorError::DeviceUnavailable(e.to_string()))?;

            stream
                .play()
                .map_err(|e| EditorError::DeviceUnavailable(e.to_string()))?;

            Ok(Self {
                tx,
                _stream: stream,
            })
        }
    }

    impl ToneSink for SpeakerSink {
        fn play_tone(&mut self, frequency_hz: f32, duration_secs: f32) {
            if self.tx.try_send((frequency_hz, duration_secs)).is_err() {
                warn!("Tone {:.2} Hz dropped: output queue full", frequency_hz);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dsp::compute_rms;

    #[test]
    fn test_envelope_bounds() {
        assert!((envelope(0.0, 0.5) - GAIN_START).abs() < 1e-6);
        assert!((envelope(0.5, 0.5) - GAIN_END).abs() < 1e-6);
        assert!(envelope(0.25, 0.5) < GAIN_START && envelope(0.25, 0.5) > GAIN_END);
        assert_eq!(envelope(0.0, 0.0), 0.0);
    }

    #[test]
    fn test_renderer_places_tones_at_cursor() {
        let mut r = WavRenderer::new(8000);
        r.play_tone(440.0, 0.5);
        r.seek_ms(1000);
        assert_eq!(r.cursor_ms(), 1000);
        r.play_tone(523.25, 0.25);
        assert_eq!(r.duration_ms(), 1250);
        // Gap between the tones is silent
        assert_eq!(compute_rms(&r.samples()[4000..8000]), 0.0);
        assert!(compute_rms(&r.samples()[8000..9000]) > 0.01);
    }

    #[test]
    fn test_overlapping_tones_mix() {
        let mut a = WavRenderer::new(8000);
        a.play_tone(440.0, 0.1);
        let single = compute_rms(a.samples());
        a.play_tone(440.0, 0.1);
        assert!((compute_rms(a.samples()) - 2.0 * single).abs() < 1e-4);
        assert_eq!(a.duration_ms(), 100);
    }

    #[test]
    fn test_write_roundtrips_through_hound() {
        let mut r = WavRenderer::new(8000);
        r.play_tone(440.0, 0.2);
        r.extend_to_ms(500);
        let path = std::env::temp_dir().join(format!("voice_staff_tone_{}.wav", std::process::id()));
        r.write(&path).unwrap();
        let reader = hound::WavReader::open(&path).unwrap();
        assert_eq!(reader.spec().sample_rate, 8000);
        assert_eq!(reader.len(), 4000);
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn test_log_sink_counts() {
        let mut s = LogSink::new();
        s.play_tone(440.0, 0.5);
        s.play_tone(440.0, 0.5);
        assert_eq!(s.count(), 2);
    }
}
