use crate::error::EditorError;
use crate::types::*;
use serde::{Deserialize, Serialize};

/// An independent, ordered set of notes sharing one playback space.
///
/// Notes are kept in insertion order; [`sorted_notes`](Self::sorted_notes)
/// gives the time-ordered view scheduling and correction work from. Every
/// mutation goes through a setter that re-quantizes the pitch position.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Section {
    id: SectionId,
    name: String,
    notes: Vec<Note>,
}

impl Section {
    pub fn new(id: SectionId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            notes: Vec::new(),
        }
    }

    pub fn id(&self) -> SectionId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn set_name(&mut self, name: impl Into<String>) {
        self.name = name.into();
    }

    pub fn len(&self) -> usize {
        self.notes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.notes.is_empty()
    }

    /// Notes in insertion order.
    pub fn notes(&self) -> &[Note] {
        &self.notes
    }

    /// Notes ordered by time position. Equal positions keep insertion order.
    pub fn sorted_notes(&self) -> Vec<&Note> {
        let mut sorted: Vec<&Note> = self.notes.iter().collect();
        sorted.sort_by(|a, b| a.time_position().total_cmp(&b.time_position()));
        sorted
    }

    pub fn get(&self, id: NoteId) -> Option<&Note> {
        self.notes.iter().find(|n| n.id() == id)
    }

    pub(crate) fn get_mut(&mut self, id: NoteId) -> Option<&mut Note> {
        self.notes.iter_mut().find(|n| n.id() == id)
    }

    pub fn contains(&self, id: NoteId) -> bool {
        self.get(id).is_some()
    }

    /// Place a new note. `x` is clamped to the staff area and `y` snapped to
    /// the nearest staff line.
    pub(crate) fn insert(
        &mut self,
        id: NoteId,
        x: f32,
        y: f32,
        kind: NoteKind,
    ) -> Result<&Note, EditorError> {
        check_finite("x", x)?;
        check_finite("y", y)?;
        let note = Note::new(
            id,
            self.id,
            x.clamp(TIME_MIN, TIME_MAX),
            y,
            kind.default_width(),
            kind,
        );
        self.notes.push(note);
        Ok(&self.notes[self.notes.len() - 1])
    }

    /// Adopt a note read from a session file, re-establishing invariants.
    pub(crate) fn adopt(&mut self, note: Note) -> &Note {
        self.notes.push(note.normalized(self.id));
        &self.notes[self.notes.len() - 1]
    }

    /// Move a note. `x` is clamped to the staff area, `y` snapped to a line.
    pub fn move_note(&mut self, id: NoteId, x: f32, y: f32) -> Result<&Note, EditorError> {
        check_finite("x", x)?;
        check_finite("y", y)?;
        let note = self.get_mut(id).ok_or(EditorError::UnknownNote(id))?;
        note.set_time_position(x.clamp(TIME_MIN, TIME_MAX));
        note.set_pitch_position(y);
        Ok(&*note)
    }

    /// Move a note by a delta, as the arrow keys do.
    pub fn nudge_note(&mut self, id: NoteId, dx: f32, dy: f32) -> Result<&Note, EditorError> {
        let note = self.get(id).ok_or(EditorError::UnknownNote(id))?;
        let (x, y) = (note.time_position() + dx, note.pitch_position() + dy);
        self.move_note(id, x, y)
    }

    /// Change a note's width, never below [`MIN_NOTE_WIDTH`].
    pub fn resize_note(&mut self, id: NoteId, width: f32) -> Result<&Note, EditorError> {
        check_finite("width", width)?;
        let note = self.get_mut(id).ok_or(EditorError::UnknownNote(id))?;
        note.set_width(width.max(MIN_NOTE_WIDTH));
        Ok(&*note)
    }

    pub fn remove_note(&mut self, id: NoteId) -> Result<Note, EditorError> {
        let idx = self
            .notes
            .iter()
            .position(|n| n.id() == id)
            .ok_or(EditorError::UnknownNote(id))?;
        Ok(self.notes.remove(idx))
    }

    /// Remove every note, returning them.
    pub fn clear(&mut self) -> Vec<Note> {
        std::mem::take(&mut self.notes)
    }
}

fn check_finite(what: &str, v: f32) -> Result<(), EditorError> {
    if v.is_finite() {
        Ok(())
    } else {
        Err(EditorError::InvalidInput(format!("{} must be finite, got {}", what, v)))
    }
}
