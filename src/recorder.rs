use crate::config::RecorderConfig;
use crate::device::CaptureDevice;
use crate::error::EditorError;
use crate::pitch_table::nearest_voice_pitch;
use crate::spectral::SpectralAnalyzer;
use crate::types::{PitchContour, PitchSample};
use log::{debug, info, trace, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecorderState {
    Idle,
    Capturing,
}

/// Everything that exists only while capturing. Dropping it is the
/// cancellation: the next step finds no session and does not reschedule.
struct CaptureSession {
    device: Box<dyn CaptureDevice>,
    analyzer: SpectralAnalyzer,
    started_at_ms: u64,
    sample_rate: u32,
    frames: u64,
}

/// Owns a voice capture session and accumulates its pitch contour.
///
/// # Lifecycle
///
/// `Idle → Capturing → Idle`. [`start`](Self::start) takes exclusive
/// ownership of a capture device, [`step`](Self::step) is called once per
/// rendered frame by whoever drives the UI loop, and [`stop`](Self::stop)
/// hands the released device back. Nothing runs on its own thread: each
/// step does one bounded unit of work and reports whether the caller should
/// schedule another.
///
/// Sensitivity and smoothing are copied out of the config at `start` and
/// stay fixed until the session ends.
pub struct Recorder {
    config: RecorderConfig,
    session: Option<CaptureSession>,
    contour: PitchContour,
}

impl Recorder {
    pub fn new(config: RecorderConfig) -> Self {
        Self {
            config,
            session: None,
            contour: PitchContour::new(),
        }
    }

    /// Replace the configuration used by the next [`start`](Self::start).
    pub fn set_config(&mut self, config: RecorderConfig) {
        self.config = config;
    }

    pub fn config(&self) -> &RecorderConfig {
        &self.config
    }

    pub fn state(&self) -> RecorderState {
        if self.session.is_some() {
            RecorderState::Capturing
        } else {
            RecorderState::Idle
        }
    }

    pub fn is_capturing(&self) -> bool {
        self.session.is_some()
    }

    /// Contour of the current (or most recent) session.
    pub fn contour(&self) -> &PitchContour {
        &self.contour
    }

    /// Begin capturing from `device`.
    ///
    /// While already capturing this is a no-op and `device` is dropped
    /// without being acquired. If the device cannot be acquired the recorder
    /// stays idle and the previous contour is left as it was.
    pub fn start(
        &mut self,
        mut device: Box<dyn CaptureDevice>,
        now_ms: u64,
    ) -> Result<(), EditorError> {
        if self.session.is_some() {
            debug!("Recorder start ignored: already capturing");
            return Ok(());
        }

        let settings = self.config.capture_settings();
        if let Err(e) = device.acquire(&settings) {
            warn!("Recorder start failed: {}", e);
            return Err(e);
        }

        self.contour.clear();
        let sample_rate = device.sample_rate();
        let analyzer = SpectralAnalyzer::with_sensitivity(self.config.sensitivity);
        info!(
            "Recording started: {} Hz, fft {}, smoothing {:.2}, floor {:.1} dB",
            sample_rate,
            settings.fft_size,
            settings.smoothing_time_constant,
            analyzer.noise_floor_db()
        );
        self.session = Some(CaptureSession {
            device,
            analyzer,
            started_at_ms: now_ms,
            sample_rate,
            frames: 0,
        });
        Ok(())
    }

    /// One sampling step: pull the latest frame, estimate its pitch, and
    /// append a sample if it clears the noise floor.
    ///
    /// Returns `true` while capturing (schedule another step), `false` once
    /// idle.
    pub fn step(&mut self, now_ms: u64) -> bool {
        let Some(session) = self.session.as_mut() else {
            return false;
        };

        let elapsed = now_ms.saturating_sub(session.started_at_ms);
        let Some(frame) = session.device.frequency_frame(elapsed) else {
            return true;
        };
        session.frames += 1;

        if let Some(est) = session.analyzer.analyze(&frame, session.sample_rate) {
            let pitch = nearest_voice_pitch(est.frequency_hz);
            trace!(
                "t={}ms {:.1} Hz ({}) {:.1} dB",
                elapsed,
                est.frequency_hz,
                pitch,
                est.amplitude_db
            );
            self.contour.push(PitchSample {
                frequency_hz: est.frequency_hz,
                pitch,
                timestamp_ms: elapsed,
                amplitude_db: est.amplitude_db,
            });
        }
        true
    }

    /// Stop capturing and return the released device. A no-op returning
    /// `None` when already idle. The contour is kept for analysis.
    pub fn stop(&mut self) -> Option<Box<dyn CaptureDevice>> {
        let Some(mut session) = self.session.take() else {
            debug!("Recorder stop ignored: not capturing");
            return None;
        };
        session.device.release();
        info!(
            "Recording stopped: {} frames analysed, {} samples kept",
            session.frames,
            self.contour.len()
        );
        Some(session.device)
    }

    /// Drive a complete session against a simulated clock: start at
    /// `start_ms`, step every `frame_interval_ms` for `duration_ms`, stop.
    pub fn capture_offline(
        &mut self,
        device: Box<dyn CaptureDevice>,
        start_ms: u64,
        duration_ms: u64,
    ) -> Result<&PitchContour, EditorError> {
        self.start(device, start_ms)?;
        let interval = self.config.frame_interval_ms.max(1);
        let mut now = start_ms;
        while now <= start_ms + duration_ms && self.step(now) {
            now += interval;
        }
        self.stop();
        Ok(&self.contour)
    }
}

impl Default for Recorder {
    fn default() -> Self {
        Self::new(RecorderConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::CaptureSettings;
    use std::cell::RefCell;
    use std::rc::Rc;

    /// Frame source returning a fixed peak at bin 20 (468.75 Hz for 1024 bins
    /// at 48 kHz) with a configurable level, and recording lifecycle calls.
    struct FakeDevice {
        level_db: f32,
        fail: bool,
        log: Rc<RefCell<Vec<String>>>,
    }

    impl FakeDevice {
        fn boxed(level_db: f32, log: &Rc<RefCell<Vec<String>>>) -> Box<dyn CaptureDevice> {
            Box::new(Self {
                level_db,
                fail: false,
                log: Rc::clone(log),
            })
        }
    }

    impl CaptureDevice for FakeDevice {
        fn acquire(&mut self, settings: &CaptureSettings) -> Result<(), EditorError> {
            if self.fail {
                return Err(EditorError::DeviceUnavailable("permission denied".into()));
            }
            self.log
                .borrow_mut()
                .push(format!(
                    "acquire fft={} smoothing={:.1}",
                    settings.fft_size, settings.smoothing_time_constant
                ));
            Ok(())
        }

        fn release(&mut self) {
            self.log.borrow_mut().push("release".into());
        }

        fn frequency_frame(&mut self, _elapsed_ms: u64) -> Option<Vec<f32>> {
            let mut frame = vec![-150.0; 1024];
            frame[20] = self.level_db;
            Some(frame)
        }

        fn sample_rate(&self) -> u32 {
            48000
        }
    }

    #[test]
    fn test_lifecycle() {
        let log = Rc::new(RefCell::new(Vec::new()));
        let mut rec = Recorder::default();
        assert_eq!(rec.state(), RecorderState::Idle);
        assert!(!rec.step(0), "idle recorder does not reschedule");

        rec.start(FakeDevice::boxed(-20.0, &log), 1000).unwrap();
        assert_eq!(rec.state(), RecorderState::Capturing);
        assert!(rec.step(1000));
        assert!(rec.step(1016));
        assert!(rec.stop().is_some());
        assert_eq!(rec.state(), RecorderState::Idle);
        assert!(!rec.step(1032));

        let ts: Vec<u64> = rec.contour().samples().iter().map(|s| s.timestamp_ms).collect();
        assert_eq!(ts, vec![0, 16]);
        assert_eq!(*log.borrow(), vec!["acquire fft=2048 smoothing=0.8", "release"]);
    }

    #[test]
    fn test_stop_when_idle_is_noop() {
        let mut rec = Recorder::default();
        assert!(rec.stop().is_none());
        assert_eq!(rec.state(), RecorderState::Idle);
    }

    #[test]
    fn test_second_start_does_not_acquire() {
        let log = Rc::new(RefCell::new(Vec::new()));
        let mut rec = Recorder::default();
        rec.start(FakeDevice::boxed(-20.0, &log), 0).unwrap();
        rec.step(10);
        rec.start(FakeDevice::boxed(-20.0, &log), 20).unwrap();
        assert_eq!(log.borrow().len(), 1, "only one device acquired");
        assert_eq!(rec.contour().len(), 1, "contour not reset by ignored start");
    }

    #[test]
    fn test_device_unavailable() {
        let log = Rc::new(RefCell::new(Vec::new()));
        let mut rec = Recorder::default();
        let dev = Box::new(FakeDevice {
            level_db: -20.0,
            fail: true,
            log: Rc::clone(&log),
        });
        let err = rec.start(dev, 0).unwrap_err();
        assert!(matches!(err, EditorError::DeviceUnavailable(_)));
        assert_eq!(rec.state(), RecorderState::Idle);
        assert!(rec.contour().is_empty());
    }

    #[test]
    fn test_amplitude_gate_scales_with_sensitivity() {
        let log = Rc::new(RefCell::new(Vec::new()));

        let mut rec = Recorder::default();
        rec.start(FakeDevice::boxed(-75.0, &log), 0).unwrap();
        rec.step(0);
        rec.stop();
        assert!(rec.contour().is_empty(), "-75 dB is below the -60 dB floor");

        rec.set_config(RecorderConfig {
            sensitivity: 1.5,
            ..RecorderConfig::default()
        });
        rec.start(FakeDevice::boxed(-75.0, &log), 0).unwrap();
        rec.step(0);
        rec.stop();
        assert_eq!(rec.contour().len(), 1, "-75 dB clears the -90 dB floor");
    }

    #[test]
    fn test_config_fixed_for_session() {
        let log = Rc::new(RefCell::new(Vec::new()));
        let mut rec = Recorder::default();
        rec.start(FakeDevice::boxed(-75.0, &log), 0).unwrap();
        rec.set_config(RecorderConfig {
            sensitivity: 2.0,
            smoothing_time_constant: 0.2,
            ..RecorderConfig::default()
        });
        rec.step(0);
        assert!(rec.contour().is_empty(), "new sensitivity applies at next start");
        rec.stop();
        assert_eq!(*log.borrow(), vec!["acquire fft=2048 smoothing=0.8", "release"]);

        rec.start(FakeDevice::boxed(-75.0, &log), 100).unwrap();
        rec.step(100);
        assert_eq!(rec.contour().len(), 1);
        assert_eq!(log.borrow()[2], "acquire fft=2048 smoothing=0.2");
    }

    #[test]
    fn test_restart_discards_previous_contour() {
        let log = Rc::new(RefCell::new(Vec::new()));
        let mut rec = Recorder::default();
        rec.start(FakeDevice::boxed(-20.0, &log), 0).unwrap();
        rec.step(0);
        rec.step(16);
        rec.stop();
        assert_eq!(rec.contour().len(), 2);

        rec.start(FakeDevice::boxed(-20.0, &log), 100).unwrap();
        assert!(rec.contour().is_empty());
    }

    #[test]
    fn test_sample_named_from_voice_scale() {
        let log = Rc::new(RefCell::new(Vec::new()));
        let mut rec = Recorder::default();
        let contour = rec
            .capture_offline(FakeDevice::boxed(-20.0, &log), 0, 48)
            .unwrap();
        assert_eq!(contour.len(), 4); // t = 0, 16, 32, 48
        // 468.75 Hz is nearest A#4 (466.16 Hz)
        assert_eq!(contour.samples()[0].pitch.to_string(), "A#4");
        assert!(!rec.is_capturing());
    }
}
