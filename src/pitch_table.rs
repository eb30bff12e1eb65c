//! Fixed mapping between staff positions, pitch names and frequencies.
//!
//! All lookups are total: anything outside the closed vocabulary falls back
//! to a fixed default instead of failing.

use crate::types::{Pitch, STAFF_LINES};

/// Pitch returned for positions that are not in the table.
pub const DEFAULT_PITCH: Pitch = Pitch::from_midi(72); // C5
/// Position returned for pitches that are not in the table.
pub const DEFAULT_POSITION: f32 = 120.0;
/// Frequency returned for pitches that are not in the table (concert A).
pub const DEFAULT_FREQUENCY: f32 = 440.0;

/// Staff position → pitch, with the tuned frequency the editor plays.
/// Smaller y is higher on the staff.
const STAFF_PITCHES: [(f32, Pitch, f32); 11] = [
    (70.0, Pitch::from_midi(84), 1046.50),  // C6
    (80.0, Pitch::from_midi(83), 987.77),   // B5
    (90.0, Pitch::from_midi(81), 880.00),   // A5
    (100.0, Pitch::from_midi(79), 783.99),  // G5
    (110.0, Pitch::from_midi(77), 698.46),  // F5
    (120.0, Pitch::from_midi(76), 659.25),  // E5
    (130.0, Pitch::from_midi(74), 587.33),  // D5
    (140.0, Pitch::from_midi(72), 523.25),  // C5
    (150.0, Pitch::from_midi(71), 493.88),  // B4
    (160.0, Pitch::from_midi(69), 440.00),  // A4
    (170.0, Pitch::from_midi(67), 392.00),  // G4
];

/// Lowest pitch of the chromatic voice scale used for detected frequencies.
const VOICE_SCALE_LOW: u8 = 60; // C4
/// Two octaves, C4 through B5.
pub const VOICE_SCALE_LEN: usize = 24;

const POSITION_EPSILON: f32 = 1e-3;

/// Exact position lookup. Undefined positions map to [`DEFAULT_PITCH`].
pub fn position_to_pitch(position: f32) -> Pitch {
    STAFF_PITCHES
        .iter()
        .find(|(y, _, _)| (y - position).abs() < POSITION_EPSILON)
        .map(|&(_, p, _)| p)
        .unwrap_or(DEFAULT_PITCH)
}

/// Reverse lookup over the staff table. Absent pitches map to [`DEFAULT_POSITION`].
pub fn pitch_to_position(pitch: Pitch) -> f32 {
    STAFF_PITCHES
        .iter()
        .find(|(_, p, _)| *p == pitch)
        .map(|&(y, _, _)| y)
        .unwrap_or(DEFAULT_POSITION)
}

/// Playback frequency for a staff pitch. Absent pitches play concert A.
pub fn pitch_to_frequency(pitch: Pitch) -> f32 {
    STAFF_PITCHES
        .iter()
        .find(|(_, p, _)| *p == pitch)
        .map(|&(_, _, hz)| hz)
        .unwrap_or(DEFAULT_FREQUENCY)
}

/// Snap a vertical coordinate to the nearest staff line. Ties go to the line
/// that comes first in [`STAFF_LINES`].
pub fn quantize(position: f32) -> f32 {
    let mut best = STAFF_LINES[0];
    for &line in &STAFF_LINES[1..] {
        if (line - position).abs() < (best - position).abs() {
            best = line;
        }
    }
    best
}

/// True when `position` is exactly one of the staff lines.
pub fn is_staff_line(position: f32) -> bool {
    STAFF_LINES
        .iter()
        .any(|y| (y - position).abs() < POSITION_EPSILON)
}

/// The 24 chromatic pitches detected voice frequencies are named against.
pub fn voice_scale() -> impl Iterator<Item = (Pitch, f32)> {
    (0..VOICE_SCALE_LEN as u8).map(|i| {
        let midi = VOICE_SCALE_LOW + i;
        (Pitch::from_midi(midi), midi_to_hz(midi as f64) as f32)
    })
}

/// Name a frequency by the voice-scale pitch with the closest frequency.
pub fn nearest_voice_pitch(frequency_hz: f32) -> Pitch {
    let mut best = (Pitch::from_midi(VOICE_SCALE_LOW), f32::INFINITY);
    for (pitch, hz) in voice_scale() {
        let dist = (hz - frequency_hz).abs();
        if dist < best.1 {
            best = (pitch, dist);
        }
    }
    best.0
}

/// Convert MIDI note number to frequency in Hz.
pub fn midi_to_hz(midi: f64) -> f64 {
    440.0 * 2.0_f64.powf((midi - 69.0) / 12.0)
}
