use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Instant;

// ─── Identifiers ────────────────────────────────────────────────────────────

/// Opaque note identifier, unique across every section of an editor and
/// stable for the note's lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NoteId(pub u64);

impl fmt::Display for NoteId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "note_{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SectionId(pub u32);

impl fmt::Display for SectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "section_{}", self.0)
    }
}

// ─── Pitch names ────────────────────────────────────────────────────────────

const PITCH_CLASSES: [&str; 12] = [
    "C", "C#", "D", "D#", "E", "F", "F#", "G", "G#", "A", "A#", "B",
];

/// A named equal-tempered pitch, stored as its MIDI note number.
/// Displays and serializes as scientific pitch notation ("C5", "F#4").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Pitch(u8);

impl Pitch {
    pub const fn from_midi(midi: u8) -> Self {
        Self(midi)
    }

    pub fn midi(self) -> u8 {
        self.0
    }

    pub fn octave(self) -> i32 {
        self.0 as i32 / 12 - 1
    }

    pub fn class_name(self) -> &'static str {
        PITCH_CLASSES[(self.0 % 12) as usize]
    }
}

impl fmt::Display for Pitch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.class_name(), self.octave())
    }
}

impl FromStr for Pitch {
    type Err = String;

    /// Accepts a letter, an optional `#` or `b`, and an octave number.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let mut chars = s.chars();
        let letter = chars.next().ok_or("empty pitch name")?;
        let base: i32 = match letter.to_ascii_uppercase() {
            'C' => 0,
            'D' => 2,
            'E' => 4,
            'F' => 5,
            'G' => 7,
            'A' => 9,
            'B' => 11,
            other => return Err(format!("bad pitch letter '{}' in \"{}\"", other, s)),
        };
        let rest = chars.as_str();
        let (accidental, octave_str) = match rest.strip_prefix('#') {
            Some(r) => (1, r),
            None => match rest.strip_prefix('b') {
                Some(r) => (-1, r),
                None => (0, rest),
            },
        };
        let octave: i32 = octave_str
            .parse()
            .map_err(|_| format!("bad octave in \"{}\"", s))?;
        let midi = (octave + 1) * 12 + base + accidental;
        u8::try_from(midi)
            .ok()
            .filter(|m| *m <= 127)
            .map(Pitch)
            .ok_or_else(|| format!("pitch \"{}\" out of MIDI range", s))
    }
}

impl TryFrom<String> for Pitch {
    type Error = String;
    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<Pitch> for String {
    fn from(p: Pitch) -> Self {
        p.to_string()
    }
}

// ─── Notes ──────────────────────────────────────────────────────────────────

/// Rhythmic value chosen at placement; only determines the initial width.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NoteKind {
    Eighth,
    #[default]
    Quarter,
    Half,
    Whole,
}

impl NoteKind {
    pub fn default_width(self) -> f32 {
        match self {
            NoteKind::Eighth => 30.0,
            NoteKind::Quarter => 40.0,
            NoteKind::Half => 60.0,
            NoteKind::Whole => 80.0,
        }
    }
}

impl FromStr for NoteKind {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "eighth" => Ok(NoteKind::Eighth),
            "quarter" => Ok(NoteKind::Quarter),
            "half" => Ok(NoteKind::Half),
            "whole" => Ok(NoteKind::Whole),
            other => Err(format!("unknown note kind \"{}\"", other)),
        }
    }
}

/// A pitched event on the staff grid.
///
/// `pitch_position` is always one of [`STAFF_LINES`] and `pitch` always
/// matches it under the pitch table. Fields are private so the only way to
/// move a note is through the quantizing setters on [`Section`](crate::timeline::Section).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Note {
    id: NoteId,
    section: SectionId,
    time_position: f32,
    pitch_position: f32,
    width: f32,
    pitch: Pitch,
    #[serde(default)]
    kind: NoteKind,
}

impl Note {
    pub(crate) fn new(
        id: NoteId,
        section: SectionId,
        time_position: f32,
        pitch_position: f32,
        width: f32,
        kind: NoteKind,
    ) -> Self {
        let mut note = Self {
            id,
            section,
            time_position,
            pitch_position,
            width,
            pitch: crate::pitch_table::DEFAULT_PITCH,
            kind,
        };
        note.set_pitch_position(pitch_position);
        note
    }

    pub fn id(&self) -> NoteId {
        self.id
    }

    pub fn section(&self) -> SectionId {
        self.section
    }

    pub fn time_position(&self) -> f32 {
        self.time_position
    }

    pub fn pitch_position(&self) -> f32 {
        self.pitch_position
    }

    pub fn width(&self) -> f32 {
        self.width
    }

    pub fn pitch(&self) -> Pitch {
        self.pitch
    }

    pub fn kind(&self) -> NoteKind {
        self.kind
    }

    /// Position/width/pitch triple used for correction snapshots.
    pub fn shape(&self) -> NoteShape {
        NoteShape {
            pitch_position: self.pitch_position,
            width: self.width,
            pitch: self.pitch,
        }
    }

    pub(crate) fn set_time_position(&mut self, x: f32) {
        self.time_position = x;
    }

    /// Quantize to the nearest staff line and re-derive the pitch name.
    pub(crate) fn set_pitch_position(&mut self, y: f32) {
        self.pitch_position = crate::pitch_table::quantize(y);
        self.pitch = crate::pitch_table::position_to_pitch(self.pitch_position);
    }

    pub(crate) fn set_width(&mut self, width: f32) {
        self.width = width;
    }

    pub(crate) fn restore(&mut self, shape: &NoteShape) {
        self.set_pitch_position(shape.pitch_position);
        self.width = shape.width;
    }

    /// Re-establish the invariants on a note read from outside (session files).
    pub(crate) fn normalized(mut self, section: SectionId) -> Self {
        self.section = section;
        let y = self.pitch_position;
        self.set_pitch_position(y);
        self.time_position = if self.time_position.is_finite() {
            self.time_position.clamp(TIME_MIN, TIME_MAX)
        } else {
            TIME_MIN
        };
        self.width = self.width.max(0.0);
        self
    }
}

impl fmt::Display for Note {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} x={:>6.1} y={:>5.1} w={:>5.1} {}",
            self.id, self.time_position, self.pitch_position, self.width, self.pitch
        )
    }
}

/// The part of a note that corrections change.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NoteShape {
    pub pitch_position: f32,
    pub width: f32,
    pub pitch: Pitch,
}

// ─── Pitch contour ──────────────────────────────────────────────────────────

/// One accepted analysis frame of a recording session.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PitchSample {
    pub frequency_hz: f32,
    pub pitch: Pitch,
    /// Milliseconds since the recording started
    pub timestamp_ms: u64,
    /// In-band spectral peak, dBFS
    pub amplitude_db: f32,
}

/// Time-ordered pitch samples of one recording session.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PitchContour {
    samples: Vec<PitchSample>,
}

impl PitchContour {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn samples(&self) -> &[PitchSample] {
        &self.samples
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn last_timestamp_ms(&self) -> Option<u64> {
        self.samples.last().map(|s| s.timestamp_ms)
    }

    /// Append a sample. Timestamps never run backwards: a stale timestamp is
    /// raised to the previous one.
    pub(crate) fn push(&mut self, mut sample: PitchSample) {
        if let Some(last) = self.last_timestamp_ms() {
            sample.timestamp_ms = sample.timestamp_ms.max(last);
        }
        self.samples.push(sample);
    }

    pub(crate) fn clear(&mut self) {
        self.samples.clear();
    }
}

impl FromIterator<PitchSample> for PitchContour {
    fn from_iter<I: IntoIterator<Item = PitchSample>>(iter: I) -> Self {
        let mut contour = PitchContour::new();
        for s in iter {
            contour.push(s);
        }
        contour
    }
}

// ─── Corrections ────────────────────────────────────────────────────────────

/// A suggested pitch/width adjustment for one note, derived from the voice
/// samples in that note's time slice.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CorrectionProposal {
    pub note_id: NoteId,
    pub original_pitch: Pitch,
    /// Nearest voice-scale pitch to what was sung. Not every one of these
    /// has a staff line; see `applied_pitch`.
    pub suggested_pitch: Pitch,
    /// The pitch the note carries once `suggested_position` is applied.
    pub applied_pitch: Pitch,
    pub original_position: f32,
    pub suggested_position: f32,
    pub original_width: f32,
    pub suggested_width: f32,
    /// 0.0–1.0, grows with the number of samples in the slice
    pub confidence: f32,
}

impl fmt::Display for CorrectionProposal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: {} → {} (heard {}, y {:.0} → {:.0})  width {:.1} → {:.1}  conf={:.2}",
            self.note_id,
            self.original_pitch,
            self.applied_pitch,
            self.suggested_pitch,
            self.original_position,
            self.suggested_position,
            self.original_width,
            self.suggested_width,
            self.confidence,
        )
    }
}

// ─── Session clock ──────────────────────────────────────────────────────────

/// Monotonic wall clock for a live editing session. Offline drivers and
/// tests pass their own millisecond counters instead.
#[derive(Clone)]
pub struct SessionClock {
    start: Instant,
}

impl SessionClock {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    pub fn now_ms(&self) -> u64 {
        self.start.elapsed().as_millis() as u64
    }
}

impl Default for SessionClock {
    fn default() -> Self {
        Self::new()
    }
}

// ─── Constants ──────────────────────────────────────────────────────────────

/// Staff lines a note's vertical position snaps to, top to bottom order of
/// the drawing coordinate system (smaller y = higher pitch).
pub const STAFF_LINES: [f32; 5] = [80.0, 100.0, 120.0, 140.0, 160.0];

/// Horizontal limits of the editable staff area.
pub const TIME_MIN: f32 = 50.0;
pub const TIME_MAX: f32 = 700.0;

/// Narrowest width a manual resize may produce.
pub const MIN_NOTE_WIDTH: f32 = 20.0;

/// Arrow-key nudge steps.
pub const NUDGE_X: f32 = 10.0;
pub const NUDGE_Y: f32 = 20.0;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pitch_names_roundtrip() {
        for name in ["C4", "C#4", "A4", "B5", "C6", "F#5"] {
            let p: Pitch = name.parse().unwrap();
            assert_eq!(p.to_string(), name);
        }
        assert_eq!("A4".parse::<Pitch>().unwrap().midi(), 69);
        assert_eq!("Bb4".parse::<Pitch>().unwrap().to_string(), "A#4");
    }

    #[test]
    fn test_pitch_rejects_garbage() {
        assert!("H4".parse::<Pitch>().is_err());
        assert!("C".parse::<Pitch>().is_err());
        assert!("".parse::<Pitch>().is_err());
        assert!("C99".parse::<Pitch>().is_err());
    }

    #[test]
    fn test_pitch_serializes_as_name() {
        let json = serde_json::to_string(&Pitch::from_midi(72)).unwrap();
        assert_eq!(json, "\"C5\"");
        let back: Pitch = serde_json::from_str("\"G4\"").unwrap();
        assert_eq!(back.midi(), 67);
    }

    #[test]
    fn test_note_construction_quantizes() {
        let note = Note::new(NoteId(1), SectionId(0), 100.0, 93.0, 40.0, NoteKind::Quarter);
        assert_eq!(note.pitch_position(), 100.0);
        assert_eq!(note.pitch().to_string(), "G5");
    }

    #[test]
    fn test_contour_timestamps_monotonic() {
        let sample = |t| PitchSample {
            frequency_hz: 440.0,
            pitch: Pitch::from_midi(69),
            timestamp_ms: t,
            amplitude_db: -20.0,
        };
        let contour: PitchContour = [sample(10), sample(5), sample(30)].into_iter().collect();
        let ts: Vec<u64> = contour.samples().iter().map(|s| s.timestamp_ms).collect();
        assert_eq!(ts, vec![10, 10, 30]);
        assert_eq!(contour.last_timestamp_ms(), Some(30));
    }

    #[test]
    fn test_note_kind_widths() {
        assert_eq!(NoteKind::Eighth.default_width(), 30.0);
        assert_eq!("whole".parse::<NoteKind>().unwrap(), NoteKind::Whole);
        assert!("breve".parse::<NoteKind>().is_err());
    }
}
