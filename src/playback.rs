use crate::config::PlaybackConfig;
use crate::pitch_table::pitch_to_frequency;
use crate::tone::ToneSink;
use crate::types::{Note, NoteId};
use log::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackMode {
    /// Offsets proportional to each note's x position over the visual span.
    Timeline,
    /// Fixed delay between consecutive notes, ignoring x spacing.
    Sequential,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackState {
    Stopped,
    Playing,
}

/// One note firing, relative to playback start.
#[derive(Debug, Clone, PartialEq)]
pub struct ScheduledNote {
    pub note_id: NoteId,
    pub offset_ms: u64,
    pub frequency_hz: f32,
    pub duration_secs: f32,
}

/// Audible length of a note: linear in its width. Zero when the reference
/// width makes the ratio meaningless.
pub fn note_duration_secs(width: f32, config: &PlaybackConfig) -> f32 {
    let secs = width / config.reference_width * config.reference_seconds;
    if secs.is_finite() {
        secs.max(0.0)
    } else {
        0.0
    }
}

/// Everything a playback run will do, computed up front from a snapshot of
/// the notes. Later edits to the section do not affect a running plan.
#[derive(Debug, Clone, PartialEq)]
pub struct PlaybackPlan {
    mode: PlaybackMode,
    /// Sorted by offset; equal offsets keep time-position order
    notes: Vec<ScheduledNote>,
    length_ms: u64,
}

impl PlaybackPlan {
    /// Proportional plan over the visual span. The run lasts
    /// `total_duration_ms` however many notes there are, so the progress
    /// indicator sweeps the full span.
    pub fn timeline(notes: &[&Note], config: &PlaybackConfig) -> Self {
        let span = config.span_end - config.span_start;
        let total = config.total_duration_ms;
        let mut scheduled: Vec<ScheduledNote> = notes
            .iter()
            .map(|n| {
                let fraction = ((n.time_position() - config.span_start) / span).max(0.0);
                schedule(n, (fraction as f64 * total as f64).round() as u64, config)
            })
            .collect();
        scheduled.sort_by_key(|s| s.offset_ms);
        Self {
            mode: PlaybackMode::Timeline,
            notes: scheduled,
            length_ms: total,
        }
    }

    /// One note every `sequential_delay_ms`, in the order given. The run ends
    /// once the last note has finished sounding.
    pub fn sequential(notes: &[&Note], config: &PlaybackConfig) -> Self {
        let delay = config.sequential_delay_ms;
        let scheduled: Vec<ScheduledNote> = notes
            .iter()
            .enumerate()
            .map(|(i, n)| schedule(n, (i as u64).saturating_mul(delay), config))
            .collect();
        let length_ms = scheduled
            .last()
            .map(|s| {
                s.offset_ms
                    .saturating_add((s.duration_secs as f64 * 1000.0).round() as u64)
            })
            .unwrap_or(0);
        Self {
            mode: PlaybackMode::Sequential,
            notes: scheduled,
            length_ms,
        }
    }

    pub fn mode(&self) -> PlaybackMode {
        self.mode
    }

    pub fn notes(&self) -> &[ScheduledNote] {
        &self.notes
    }

    pub fn len(&self) -> usize {
        self.notes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.notes.is_empty()
    }

    /// Time after which the run stops itself.
    pub fn length_ms(&self) -> u64 {
        self.length_ms
    }
}

fn schedule(note: &Note, offset_ms: u64, config: &PlaybackConfig) -> ScheduledNote {
    ScheduledNote {
        note_id: note.id(),
        offset_ms,
        frequency_hz: pitch_to_frequency(note.pitch()),
        duration_secs: note_duration_secs(note.width(), config),
    }
}

struct Run {
    plan: PlaybackPlan,
    started_at_ms: u64,
    /// Index of the next note to fire
    next: usize,
}

/// Drives a [`PlaybackPlan`] against an externally supplied clock.
///
/// `Stopped → Playing → Stopped`. Nothing fires on its own: the owner calls
/// [`poll`](Self::poll) from its frame or timer loop, and every note whose
/// offset has elapsed is sounded at that moment. Because a note is only
/// sounded from inside `poll`, and `poll` does nothing once stopped, a
/// [`stop`](Self::stop) between scheduling and a note's offset always
/// suppresses that note. Tones already handed to the sink play out.
#[derive(Default)]
pub struct PlaybackScheduler {
    run: Option<Run>,
}

impl PlaybackScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> PlaybackState {
        if self.run.is_some() {
            PlaybackState::Playing
        } else {
            PlaybackState::Stopped
        }
    }

    pub fn is_playing(&self) -> bool {
        self.run.is_some()
    }

    /// Mode of the current run, if playing.
    pub fn mode(&self) -> Option<PlaybackMode> {
        self.run.as_ref().map(|r| r.plan.mode)
    }

    /// Begin a run at `now_ms`. Returns `false` (and drops `plan`) when a run
    /// is already in progress.
    pub fn start(&mut self, plan: PlaybackPlan, now_ms: u64) -> bool {
        if self.run.is_some() {
            debug!("Playback start ignored: already playing");
            return false;
        }
        info!(
            "Playback started: {:?}, {} notes over {} ms",
            plan.mode,
            plan.len(),
            plan.length_ms
        );
        self.run = Some(Run {
            plan,
            started_at_ms: now_ms,
            next: 0,
        });
        true
    }

    /// Sound every note that has come due by `now_ms`, in plan order, and
    /// stop the run once its length has elapsed. Returns the ids fired.
    pub fn poll(&mut self, now_ms: u64, sink: &mut dyn ToneSink) -> Vec<NoteId> {
        let mut fired = Vec::new();
        let Some(run) = self.run.as_mut() else {
            return fired;
        };

        let elapsed = now_ms.saturating_sub(run.started_at_ms);
        while let Some(note) = run.plan.notes.get(run.next) {
            if note.offset_ms > elapsed {
                break;
            }
            debug!(
                "t={}ms fire {} {:.2} Hz for {:.2}s",
                elapsed, note.note_id, note.frequency_hz, note.duration_secs
            );
            sink.play_tone(note.frequency_hz, note.duration_secs);
            fired.push(note.note_id);
            run.next += 1;
        }

        if elapsed >= run.plan.length_ms {
            info!("Playback finished after {} ms", elapsed);
            self.run = None;
        }
        fired
    }

    /// Absolute time of the next event worth polling for: the next pending
    /// note, or the end of the run. `None` when stopped.
    pub fn next_deadline_ms(&self) -> Option<u64> {
        let run = self.run.as_ref()?;
        let rel = run
            .plan
            .notes
            .get(run.next)
            .map(|n| n.offset_ms)
            .unwrap_or(run.plan.length_ms);
        Some(run.started_at_ms.saturating_add(rel))
    }

    /// Halt the run. Pending notes will never sound. Returns whether a run
    /// was actually stopped.
    pub fn stop(&mut self) -> bool {
        match self.run.take() {
            Some(run) => {
                info!(
                    "Playback stopped: {} of {} notes fired",
                    run.next,
                    run.plan.len()
                );
                true
            }
            None => {
                debug!("Playback stop ignored: not playing");
                false
            }
        }
    }

    /// Fraction of the run elapsed at `now_ms`, in [0, 1]. `None` when
    /// stopped, which is when the indicator should be hidden.
    pub fn progress(&self, now_ms: u64) -> Option<f32> {
        let run = self.run.as_ref()?;
        if run.plan.length_ms == 0 {
            return Some(1.0);
        }
        let elapsed = now_ms.saturating_sub(run.started_at_ms);
        Some((elapsed as f64 / run.plan.length_ms as f64).min(1.0) as f32)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::timeline::Section;
    use crate::types::{NoteKind, SectionId};

    #[derive(Default)]
    struct Tones(Vec<(f32, f32)>);

    impl ToneSink for Tones {
        fn play_tone(&mut self, frequency_hz: f32, duration_secs: f32) {
            self.0.push((frequency_hz, duration_secs));
        }
    }

    fn section(xs: &[(f32, f32)]) -> Section {
        let mut s = Section::new(SectionId(0), "main");
        for (i, &(x, y)) in xs.iter().enumerate() {
            s.insert(NoteId(i as u64), x, y, NoteKind::Quarter).unwrap();
        }
        s
    }

    #[test]
    fn test_duration_from_width() {
        let cfg = PlaybackConfig::default();
        assert_eq!(note_duration_secs(40.0, &cfg), 0.5);
        assert_eq!(note_duration_secs(80.0, &cfg), 1.0);
        assert_eq!(note_duration_secs(30.0, &cfg), 0.375);
    }

    #[test]
    fn test_timeline_offsets_proportional() {
        let cfg = PlaybackConfig::default();
        let s = section(&[(700.0, 120.0), (50.0, 140.0), (375.0, 80.0)]);
        let plan = PlaybackPlan::timeline(&s.sorted_notes(), &cfg);
        let offsets: Vec<(u64, u64)> = plan.notes().iter().map(|n| (n.note_id.0, n.offset_ms)).collect();
        assert_eq!(offsets, vec![(1, 0), (2, 2000), (0, 4000)]);
        assert_eq!(plan.length_ms(), 4000);
        // C5 on the 140 line
        assert!((plan.notes()[0].frequency_hz - 523.25).abs() < 0.01);
    }

    #[test]
    fn test_sequential_fires_in_time_order() {
        let cfg = PlaybackConfig::default();
        let s = section(&[(300.0, 120.0), (100.0, 140.0), (200.0, 100.0)]);
        let plan = PlaybackPlan::sequential(&s.sorted_notes(), &cfg);
        assert_eq!(plan.length_ms(), 1500);

        let mut sched = PlaybackScheduler::new();
        let mut tones = Tones::default();
        assert!(sched.start(plan, 10_000));

        assert_eq!(sched.poll(10_000, &mut tones), vec![NoteId(1)]);
        assert_eq!(sched.poll(10_499, &mut tones), vec![]);
        assert_eq!(sched.poll(10_500, &mut tones), vec![NoteId(2)]);
        assert_eq!(sched.poll(11_000, &mut tones), vec![NoteId(0)]);
        assert!(sched.is_playing());
        sched.poll(11_500, &mut tones);
        assert!(!sched.is_playing(), "stops after the last note sounds");
        assert_eq!(tones.0.len(), 3);
    }

    #[test]
    fn test_stop_before_offsets_is_silent() {
        let cfg = PlaybackConfig::default();
        let s = section(&[(200.0, 120.0), (400.0, 120.0)]);
        let mut sched = PlaybackScheduler::new();
        let mut tones = Tones::default();
        sched.start(PlaybackPlan::timeline(&s.sorted_notes(), &cfg), 0);
        assert!(sched.stop());
        assert!(sched.poll(5000, &mut tones).is_empty());
        assert!(tones.0.is_empty());
        assert_eq!(sched.progress(100), None);
    }

    #[test]
    fn test_start_while_playing_is_noop() {
        let cfg = PlaybackConfig::default();
        let s = section(&[(100.0, 120.0)]);
        let mut sched = PlaybackScheduler::new();
        assert!(sched.start(PlaybackPlan::timeline(&s.sorted_notes(), &cfg), 0));
        assert!(!sched.start(PlaybackPlan::sequential(&s.sorted_notes(), &cfg), 50));
        assert_eq!(sched.mode(), Some(PlaybackMode::Timeline));
        assert!(!PlaybackScheduler::new().stop());
    }

    #[test]
    fn test_late_poll_fires_everything_due_in_order() {
        let cfg = PlaybackConfig::default();
        let s = section(&[(375.0, 120.0), (50.0, 120.0)]);
        let mut sched = PlaybackScheduler::new();
        let mut tones = Tones::default();
        sched.start(PlaybackPlan::timeline(&s.sorted_notes(), &cfg), 0);
        assert_eq!(sched.poll(3000, &mut tones), vec![NoteId(1), NoteId(0)]);
    }

    #[test]
    fn test_progress_and_auto_stop() {
        let cfg = PlaybackConfig::default();
        let mut sched = PlaybackScheduler::new();
        let mut tones = Tones::default();
        sched.start(PlaybackPlan::timeline(&[], &cfg), 1000);
        assert_eq!(sched.progress(1000), Some(0.0));
        assert_eq!(sched.progress(2000), Some(0.25));
        assert_eq!(sched.next_deadline_ms(), Some(5000));
        sched.poll(4999, &mut tones);
        assert!(sched.is_playing());
        sched.poll(5000, &mut tones);
        assert!(!sched.is_playing());
        assert_eq!(sched.next_deadline_ms(), None);
    }

    #[test]
    fn test_degenerate_plan_saturates() {
        let cfg = PlaybackConfig {
            reference_width: 0.0,
            span_end: 50.0,
            ..PlaybackConfig::default()
        };
        assert_eq!(note_duration_secs(40.0, &cfg), 0.0);

        let s = section(&[(100.0, 120.0), (200.0, 120.0)]);
        let plan = PlaybackPlan::sequential(&s.sorted_notes(), &cfg);
        assert_eq!(plan.length_ms(), 500);

        let mut sched = PlaybackScheduler::new();
        sched.start(PlaybackPlan::timeline(&s.sorted_notes(), &cfg), 1000);
        assert_eq!(sched.next_deadline_ms(), Some(u64::MAX));
        assert!(sched.poll(10_000, &mut Tones::default()).is_empty());
        assert!(!sched.is_playing(), "the run still ends after total_duration_ms");
    }

    #[test]
    fn test_empty_sequential_ends_immediately() {
        let cfg = PlaybackConfig::default();
        let mut sched = PlaybackScheduler::new();
        let plan = PlaybackPlan::sequential(&[], &cfg);
        assert_eq!(plan.length_ms(), 0);
        sched.start(plan, 0);
        assert_eq!(sched.progress(0), Some(1.0));
        sched.poll(0, &mut Tones::default());
        assert!(!sched.is_playing());
    }
}
