use crate::pitch_table::{nearest_voice_pitch, pitch_to_position, position_to_pitch, quantize};
use crate::timeline::Section;
use crate::types::*;
use log::{debug, info};
use std::collections::HashMap;

/// Samples needed in a slice for full confidence.
const CONFIDENCE_SATURATION: f32 = 10.0;
/// Amplitude spread (dB) that doubles a note's width.
const WIDTH_DB_SCALE: f32 = 50.0;
const MIN_SUGGESTED_WIDTH: f32 = 30.0;
const MAX_SUGGESTED_WIDTH: f32 = 100.0;

/// Outcome of applying a proposal batch.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ApplyReport {
    pub applied: Vec<NoteId>,
    /// Proposals whose note was deleted after analysis
    pub stale: Vec<NoteId>,
}

/// Turns a finished pitch contour into per-note correction proposals and
/// applies or reverts them.
///
/// # Alignment
///
/// The recording is split into as many equal time slices as there are
/// notes, and slice `i` belongs to the `i`-th note in time order. Actual note
/// spacing is not consulted: the singer is assumed to have spent equal time
/// on every note.
///
/// # Snapshots
///
/// The first time a note receives a proposal its position, width and pitch
/// are saved. Later analyses never overwrite that entry, so `reset` always
/// returns to the state before any correction, however many batches were
/// applied in between.
#[derive(Debug, Default)]
pub struct CorrectionEngine {
    originals: HashMap<NoteId, NoteShape>,
}

impl CorrectionEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Saved pre-correction shape of a note, if it was ever analysed.
    pub fn original(&self, id: NoteId) -> Option<&NoteShape> {
        self.originals.get(&id)
    }

    pub fn snapshot_count(&self) -> usize {
        self.originals.len()
    }

    /// Build proposals for `notes`, which must already be sorted by time
    /// position. Empty contour or empty note list yields no proposals.
    pub fn generate(&mut self, contour: &PitchContour, notes: &[&Note]) -> Vec<CorrectionProposal> {
        let samples = contour.samples();
        let n = notes.len();
        if samples.is_empty() || n == 0 {
            debug!(
                "Nothing to correct ({} samples, {} notes)",
                samples.len(),
                n
            );
            return Vec::new();
        }

        let total_ms = contour.last_timestamp_ms().unwrap_or(0);
        let mut slices: Vec<Vec<&PitchSample>> = vec![Vec::new(); n];
        for s in samples {
            slices[slice_index(s.timestamp_ms, total_ms, n)].push(s);
        }

        let mut proposals = Vec::new();
        for (note, slice) in notes.iter().zip(slices.iter()) {
            if slice.is_empty() {
                continue;
            }

            let count = slice.len() as f32;
            let mean_hz = slice.iter().map(|s| s.frequency_hz).sum::<f32>() / count;
            let (min_db, max_db) = slice.iter().fold(
                (f32::INFINITY, f32::NEG_INFINITY),
                |(lo, hi), s| (lo.min(s.amplitude_db), hi.max(s.amplitude_db)),
            );
            let amplitude_range = max_db - min_db;

            let suggested_pitch = nearest_voice_pitch(mean_hz);
            let suggested_position = quantize(pitch_to_position(suggested_pitch));
            let suggested_width = (note.width() * (1.0 + amplitude_range / WIDTH_DB_SCALE))
                .clamp(MIN_SUGGESTED_WIDTH, MAX_SUGGESTED_WIDTH);
            let confidence = (count / CONFIDENCE_SATURATION).min(1.0);

            self.originals.entry(note.id()).or_insert_with(|| note.shape());

            proposals.push(CorrectionProposal {
                note_id: note.id(),
                original_pitch: note.pitch(),
                suggested_pitch,
                applied_pitch: position_to_pitch(suggested_position),
                original_position: note.pitch_position(),
                suggested_position,
                original_width: note.width(),
                suggested_width,
                confidence,
            });
        }

        info!(
            "Analysis: {} samples over {} ms → {} proposals for {} notes",
            samples.len(),
            total_ms,
            proposals.len(),
            n
        );
        proposals
    }

    /// Apply every proposal to `section`. Notes deleted since analysis are
    /// skipped and reported; the rest still apply. Re-applying the same
    /// batch leaves the same state.
    pub fn apply(&self, proposals: &[CorrectionProposal], section: &mut Section) -> ApplyReport {
        let mut report = ApplyReport::default();
        for p in proposals {
            match section.get_mut(p.note_id) {
                Some(note) => {
                    note.set_pitch_position(p.suggested_position);
                    note.set_width(p.suggested_width);
                    report.applied.push(p.note_id);
                }
                None => {
                    debug!("Skipping proposal for deleted {}", p.note_id);
                    report.stale.push(p.note_id);
                }
            }
        }
        info!(
            "Applied {} corrections ({} stale)",
            report.applied.len(),
            report.stale.len()
        );
        report
    }

    /// Restore every snapshotted note of `section` to its original shape.
    /// Returns the ids restored; notes never analysed are untouched.
    pub fn reset(&self, section: &mut Section) -> Vec<NoteId> {
        let ids: Vec<NoteId> = section
            .notes()
            .iter()
            .map(|n| n.id())
            .filter(|id| self.originals.contains_key(id))
            .collect();
        for id in &ids {
            if let (Some(note), Some(shape)) = (section.get_mut(*id), self.originals.get(id)) {
                note.restore(shape);
            }
        }
        info!("Reset {} notes to their original shape", ids.len());
        ids
    }

    /// Drop the snapshot of one note.
    pub fn forget(&mut self, id: NoteId) {
        self.originals.remove(&id);
    }

    /// Drop the snapshots of the given notes (a destroyed section's notes).
    pub fn forget_all<'a>(&mut self, notes: impl IntoIterator<Item = &'a Note>) {
        for n in notes {
            self.originals.remove(&n.id());
        }
    }
}

/// Slice of `[0, total_ms]` that a timestamp falls into when split into `n`
/// equal parts. The final instant belongs to the last slice, and a
/// zero-length recording puts everything in the first.
fn slice_index(timestamp_ms: u64, total_ms: u64, n: usize) -> usize {
    if total_ms == 0 {
        return 0;
    }
    let idx = (timestamp_ms as u128 * n as u128 / total_ms as u128) as usize;
    idx.min(n - 1)
}
