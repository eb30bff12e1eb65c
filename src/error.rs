//! Error taxonomy for editor commands.
//!
//! Only genuine failures live here. Empty analysis input yields an empty
//! proposal batch, stale note references are reported through
//! [`ApplyReport`](crate::correction::ApplyReport), and start/stop calls made
//! in the target state are silently ignored.

use crate::types::{NoteId, SectionId};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EditorError {
    /// The audio input device could not be acquired (no device, permission
    /// denied, unsupported format). Capture aborts before any sample is taken.
    #[error("capture device unavailable: {0}")]
    DeviceUnavailable(String),

    #[error("unknown section {0}")]
    UnknownSection(SectionId),

    #[error("unknown note {0}")]
    UnknownNote(NoteId),

    #[error("cannot remove the last remaining section")]
    LastSection,

    #[error("a capture session is still running")]
    CaptureInProgress,

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("session file: {0}")]
    Session(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
