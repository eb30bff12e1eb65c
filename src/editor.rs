use crate::config::Config;
use crate::correction::{ApplyReport, CorrectionEngine};
use crate::device::CaptureDevice;
use crate::error::EditorError;
use crate::pitch_table::pitch_to_frequency;
use crate::playback::{note_duration_secs, PlaybackMode, PlaybackPlan, PlaybackScheduler};
use crate::recorder::{Recorder, RecorderState};
use crate::timeline::Section;
use crate::tone::ToneSink;
use crate::types::*;
use log::{debug, info, warn};

/// Rendering-layer hook, told about every note whose shape changed or that
/// went away. The editor keeps only ids; views are looked up by the observer.
pub trait NoteObserver {
    fn note_changed(&mut self, note: &Note);
    fn note_removed(&mut self, id: NoteId);
}

/// Summary shown for the selected note.
#[derive(Debug, Clone, PartialEq)]
pub struct NoteInfo {
    pub pitch: Pitch,
    pub kind: NoteKind,
    pub duration_secs: f32,
    /// Horizontal position as a percentage of the staff width.
    pub position_percent: f32,
}

struct PendingBatch {
    section: SectionId,
    proposals: Vec<CorrectionProposal>,
}

/// The editing session: sections, selection, voice capture, corrections and
/// playback, all owned in one place and driven by explicit commands.
///
/// Note commands act on the active section; a note id from another section
/// is reported as [`EditorError::UnknownNote`]. Time is passed in as
/// `now_ms` by whatever loop drives the editor.
pub struct Editor {
    config: Config,
    sections: Vec<Section>,
    active: SectionId,
    next_note_id: u64,
    next_section_id: u32,
    selected: Option<NoteId>,
    recorder: Recorder,
    corrections: CorrectionEngine,
    pending: Option<PendingBatch>,
    playback: PlaybackScheduler,
    observers: Vec<Box<dyn NoteObserver>>,
}

impl Editor {
    /// A fresh editor with one empty section.
    pub fn new(config: Config) -> Self {
        let first = Section::new(SectionId(0), "Section 1");
        Self::with_sections(config, vec![first], SectionId(0))
    }

    /// Rebuild an editor around existing sections (a loaded session). Id
    /// counters continue past the largest ids present. An empty list gets a
    /// fresh section; an unknown `active` falls back to the first section.
    /// The config is clamped into range first.
    pub fn with_sections(config: Config, mut sections: Vec<Section>, active: SectionId) -> Self {
        let config = config.validated();
        if sections.is_empty() {
            sections.push(Section::new(SectionId(0), "Section 1"));
        }
        let active = if sections.iter().any(|s| s.id() == active) {
            active
        } else {
            warn!("Active {} not found, using {}", active, sections[0].id());
            sections[0].id()
        };
        let next_section_id = sections.iter().map(|s| s.id().0 + 1).max().unwrap_or(0);
        let next_note_id = sections
            .iter()
            .flat_map(|s| s.notes())
            .map(|n| n.id().0 + 1)
            .max()
            .unwrap_or(0);

        Self {
            recorder: Recorder::new(config.recorder.clone()),
            config,
            sections,
            active,
            next_note_id,
            next_section_id,
            selected: None,
            corrections: CorrectionEngine::new(),
            pending: None,
            playback: PlaybackScheduler::new(),
            observers: Vec::new(),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Replace the configuration. Recorder knobs take effect at the next
    /// recording start. Out-of-range knobs are clamped.
    pub fn set_config(&mut self, config: Config) {
        let config = config.validated();
        self.recorder.set_config(config.recorder.clone());
        self.config = config;
    }

    pub fn add_observer(&mut self, observer: Box<dyn NoteObserver>) {
        self.observers.push(observer);
    }

    // ── Sections ────────────────────────────────────────────────────────────

    pub fn sections(&self) -> &[Section] {
        &self.sections
    }

    pub fn section(&self, id: SectionId) -> Result<&Section, EditorError> {
        self.sections
            .iter()
            .find(|s| s.id() == id)
            .ok_or(EditorError::UnknownSection(id))
    }

    pub fn active_section_id(&self) -> SectionId {
        self.active
    }

    pub fn active_section(&self) -> &Section {
        // `active` always names a live section
        let idx = self.active_index();
        &self.sections[idx]
    }

    fn active_index(&self) -> usize {
        self.sections
            .iter()
            .position(|s| s.id() == self.active)
            .unwrap_or(0)
    }

    fn active_mut(&mut self) -> &mut Section {
        let idx = self.active_index();
        &mut self.sections[idx]
    }

    /// Append an empty section. It does not become active.
    pub fn add_section(&mut self, name: impl Into<String>) -> SectionId {
        let id = SectionId(self.next_section_id);
        self.next_section_id += 1;
        let name = name.into();
        info!("Added {} \"{}\"", id, name);
        self.sections.push(Section::new(id, name));
        id
    }

    /// Destroy a section with all its notes and their correction snapshots.
    /// The last remaining section cannot be removed.
    pub fn remove_section(&mut self, id: SectionId) -> Result<(), EditorError> {
        let idx = self
            .sections
            .iter()
            .position(|s| s.id() == id)
            .ok_or(EditorError::UnknownSection(id))?;
        if self.sections.len() == 1 {
            return Err(EditorError::LastSection);
        }

        let removed = self.sections.remove(idx);
        self.corrections.forget_all(removed.notes());
        if self.pending.as_ref().is_some_and(|p| p.section == id) {
            self.pending = None;
        }
        if self.selected.is_some_and(|sel| removed.contains(sel)) {
            self.selected = None;
        }
        for n in removed.notes() {
            for o in &mut self.observers {
                o.note_removed(n.id());
            }
        }
        if self.active == id {
            self.active = self.sections[idx.min(self.sections.len() - 1)].id();
        }
        info!(
            "Removed {} ({} notes), active is {}",
            id,
            removed.len(),
            self.active
        );
        Ok(())
    }

    pub fn set_active_section(&mut self, id: SectionId) -> Result<(), EditorError> {
        self.section(id)?;
        if self.active != id {
            self.active = id;
            self.selected = None;
            debug!("Active section is now {}", id);
        }
        Ok(())
    }

    pub fn rename_section(&mut self, id: SectionId, name: impl Into<String>) -> Result<(), EditorError> {
        self.sections
            .iter_mut()
            .find(|s| s.id() == id)
            .ok_or(EditorError::UnknownSection(id))?
            .set_name(name);
        Ok(())
    }

    // ── Notes ───────────────────────────────────────────────────────────────

    pub fn note(&self, id: NoteId) -> Result<&Note, EditorError> {
        self.active_section().get(id).ok_or(EditorError::UnknownNote(id))
    }

    /// Place a note in the active section and return its id.
    pub fn add_note(&mut self, x: f32, y: f32, kind: NoteKind) -> Result<NoteId, EditorError> {
        let id = NoteId(self.next_note_id);
        let idx = self.active_index();
        let note = self.sections[idx].insert(id, x, y, kind)?;
        self.next_note_id += 1;
        debug!("Added {}", note);
        notify_changed(&mut self.observers, note);
        Ok(id)
    }

    pub fn move_note(&mut self, id: NoteId, x: f32, y: f32) -> Result<Note, EditorError> {
        let idx = self.active_index();
        let note = self.sections[idx].move_note(id, x, y)?;
        notify_changed(&mut self.observers, note);
        Ok(note.clone())
    }

    pub fn resize_note(&mut self, id: NoteId, width: f32) -> Result<Note, EditorError> {
        let idx = self.active_index();
        let note = self.sections[idx].resize_note(id, width)?;
        notify_changed(&mut self.observers, note);
        Ok(note.clone())
    }

    /// Delete a note, dropping its correction snapshot and selection.
    pub fn delete_note(&mut self, id: NoteId) -> Result<Note, EditorError> {
        let note = self.active_mut().remove_note(id)?;
        self.note_gone(id);
        Ok(note)
    }

    /// Delete every note in the active section. Returns how many went.
    pub fn clear_section(&mut self) -> usize {
        let removed = self.active_mut().clear();
        for n in &removed {
            self.note_gone(n.id());
        }
        info!("Cleared {} notes from {}", removed.len(), self.active);
        removed.len()
    }

    fn note_gone(&mut self, id: NoteId) {
        self.corrections.forget(id);
        if self.selected == Some(id) {
            self.selected = None;
        }
        for o in &mut self.observers {
            o.note_removed(id);
        }
    }

    pub fn note_info(&self, id: NoteId) -> Result<NoteInfo, EditorError> {
        let note = self.note(id)?;
        let p = &self.config.playback;
        Ok(NoteInfo {
            pitch: note.pitch(),
            kind: note.kind(),
            duration_secs: note_duration_secs(note.width(), p),
            position_percent: (note.time_position() - p.span_start) / (p.span_end - p.span_start)
                * 100.0,
        })
    }

    /// Sound one note right away.
    pub fn play_note(&self, id: NoteId, sink: &mut dyn ToneSink) -> Result<(), EditorError> {
        let note = self.note(id)?;
        sink.play_tone(
            pitch_to_frequency(note.pitch()),
            note_duration_secs(note.width(), &self.config.playback),
        );
        Ok(())
    }

    // ── Selection ───────────────────────────────────────────────────────────

    pub fn selected(&self) -> Option<NoteId> {
        self.selected
    }

    /// Select a note of the active section, or clear the selection.
    pub fn select(&mut self, id: Option<NoteId>) -> Result<(), EditorError> {
        if let Some(id) = id {
            self.note(id)?;
        }
        self.selected = id;
        Ok(())
    }

    /// Move the selected note by a delta. `None` when nothing is selected.
    pub fn nudge_selected(&mut self, dx: f32, dy: f32) -> Result<Option<Note>, EditorError> {
        let Some(id) = self.selected else {
            return Ok(None);
        };
        let idx = self.active_index();
        let note = self.sections[idx].nudge_note(id, dx, dy)?;
        notify_changed(&mut self.observers, note);
        Ok(Some(note.clone()))
    }

    pub fn delete_selected(&mut self) -> Result<Option<Note>, EditorError> {
        match self.selected {
            Some(id) => self.delete_note(id).map(Some),
            None => Ok(None),
        }
    }

    /// Sound the selected note. Returns whether anything played.
    pub fn play_selected(&self, sink: &mut dyn ToneSink) -> Result<bool, EditorError> {
        match self.selected {
            Some(id) => self.play_note(id, sink).map(|_| true),
            None => Ok(false),
        }
    }

    // ── Recording ───────────────────────────────────────────────────────────

    pub fn recorder_state(&self) -> RecorderState {
        self.recorder.state()
    }

    pub fn contour(&self) -> &PitchContour {
        self.recorder.contour()
    }

    pub fn start_recording(
        &mut self,
        device: Box<dyn CaptureDevice>,
        now_ms: u64,
    ) -> Result<(), EditorError> {
        self.recorder.start(device, now_ms)
    }

    /// One sampling step; `true` while the caller should keep stepping.
    pub fn recording_step(&mut self, now_ms: u64) -> bool {
        self.recorder.step(now_ms)
    }

    pub fn stop_recording(&mut self) -> Option<Box<dyn CaptureDevice>> {
        self.recorder.stop()
    }

    /// Record a whole take from an offline source on a simulated clock.
    pub fn record_offline(
        &mut self,
        device: Box<dyn CaptureDevice>,
        duration_ms: u64,
    ) -> Result<usize, EditorError> {
        Ok(self.recorder.capture_offline(device, 0, duration_ms)?.len())
    }

    // ── Corrections ─────────────────────────────────────────────────────────

    /// Compare the last take with the active section and hold the resulting
    /// proposals as the pending batch, replacing any earlier one.
    pub fn analyze(&mut self) -> Result<&[CorrectionProposal], EditorError> {
        if self.recorder.is_capturing() {
            return Err(EditorError::CaptureInProgress);
        }
        let idx = self.active_index();
        let section = &self.sections[idx];
        let proposals = self
            .corrections
            .generate(self.recorder.contour(), &section.sorted_notes());
        let batch = self.pending.insert(PendingBatch {
            section: section.id(),
            proposals,
        });
        Ok(&batch.proposals)
    }

    pub fn pending_corrections(&self) -> &[CorrectionProposal] {
        self.pending
            .as_ref()
            .map(|p| p.proposals.as_slice())
            .unwrap_or(&[])
    }

    /// Apply the pending batch to the section it was generated for. The
    /// batch stays pending, so applying again changes nothing.
    pub fn apply_corrections(&mut self) -> Result<ApplyReport, EditorError> {
        let Some(batch) = self.pending.as_ref() else {
            debug!("No pending corrections to apply");
            return Ok(ApplyReport::default());
        };
        let idx = self
            .sections
            .iter()
            .position(|s| s.id() == batch.section)
            .ok_or(EditorError::UnknownSection(batch.section))?;
        let section = &mut self.sections[idx];
        let report = self.corrections.apply(&batch.proposals, section);
        for id in &report.applied {
            if let Some(note) = section.get(*id) {
                notify_changed(&mut self.observers, note);
            }
        }
        Ok(report)
    }

    /// Restore every analysed note of the active section to its shape before
    /// the first correction. Returns the number restored.
    pub fn reset_corrections(&mut self) -> usize {
        let idx = self.active_index();
        let section = &mut self.sections[idx];
        let restored = self.corrections.reset(section);
        for id in &restored {
            if let Some(note) = section.get(*id) {
                notify_changed(&mut self.observers, note);
            }
        }
        restored.len()
    }

    // ── Playback ────────────────────────────────────────────────────────────

    pub fn is_playing(&self) -> bool {
        self.playback.is_playing()
    }

    pub fn playback_mode(&self) -> Option<PlaybackMode> {
        self.playback.mode()
    }

    /// Play the active section proportionally to x position. No-op (returns
    /// `false`) while already playing.
    pub fn play_timeline(&mut self, now_ms: u64) -> bool {
        let plan = PlaybackPlan::timeline(&self.active_section().sorted_notes(), &self.config.playback);
        self.playback.start(plan, now_ms)
    }

    /// Play the active section note after note at a fixed delay.
    pub fn play_section(&mut self, now_ms: u64) -> bool {
        let plan =
            PlaybackPlan::sequential(&self.active_section().sorted_notes(), &self.config.playback);
        self.playback.start(plan, now_ms)
    }

    /// Play/stop button: stops a running playback, otherwise starts the
    /// timeline. Returns whether playback is running afterwards.
    pub fn toggle_playback(&mut self, now_ms: u64) -> bool {
        if self.playback.is_playing() {
            self.playback.stop();
            false
        } else {
            self.play_timeline(now_ms)
        }
    }

    pub fn stop_playback(&mut self) -> bool {
        self.playback.stop()
    }

    pub fn playback_poll(&mut self, now_ms: u64, sink: &mut dyn ToneSink) -> Vec<NoteId> {
        self.playback.poll(now_ms, sink)
    }

    pub fn playback_progress(&self, now_ms: u64) -> Option<f32> {
        self.playback.progress(now_ms)
    }

    pub fn next_playback_deadline(&self) -> Option<u64> {
        self.playback.next_deadline_ms()
    }
}

impl Default for Editor {
    fn default() -> Self {
        Self::new(Config::default())
    }
}

fn notify_changed(observers: &mut [Box<dyn NoteObserver>], note: &Note) {
    for o in observers {
        o.note_changed(note);
    }
}
