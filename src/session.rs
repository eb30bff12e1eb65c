//! JSONL session files: the editor's sections and notes on disk.
//!
//! The first line is a header naming the format, the active section and the
//! section list; every following line is one note. Works with any `BufRead`
//! for reading and any `Write` for saving.

use crate::config::Config;
use crate::editor::Editor;
use crate::error::EditorError;
use crate::timeline::Section;
use crate::types::{Note, SectionId};
use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;

pub const FORMAT: &str = "voice-staff";
pub const VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SectionEntry {
    pub id: SectionId,
    pub name: String,
}

/// Parsed header (first line of a session file).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionHeader {
    pub format: String,
    pub version: u32,
    pub active: SectionId,
    pub sections: Vec<SectionEntry>,
}

/// Line-by-line session reader.
pub struct SessionReader<R: BufRead> {
    reader: R,
    pub header: SessionHeader,
    line_buf: String,
}

impl<R: BufRead> SessionReader<R> {
    /// Read and validate the header line. Fails if the header is missing,
    /// unparseable, or not a `"format": "voice-staff"` header.
    pub fn open(mut reader: R) -> Result<Self, EditorError> {
        let mut first_line = String::new();
        reader.read_line(&mut first_line)?;

        let first_line = first_line.trim();
        if first_line.is_empty() {
            return Err(EditorError::Session("empty file".into()));
        }

        let raw: serde_json::Value = serde_json::from_str(first_line)
            .map_err(|e| EditorError::Session(format!("parse header: {}", e)))?;
        match raw["format"].as_str() {
            Some(FORMAT) => {}
            Some(other) => {
                return Err(EditorError::Session(format!("unknown format: {}", other)))
            }
            None => return Err(EditorError::Session("missing \"format\" field".into())),
        }

        let header: SessionHeader = serde_json::from_value(raw)
            .map_err(|e| EditorError::Session(format!("parse header: {}", e)))?;
        if header.version > VERSION {
            warn!(
                "Session version {} is newer than {}, reading anyway",
                header.version, VERSION
            );
        }

        Ok(Self {
            reader,
            header,
            line_buf: String::new(),
        })
    }

    /// Read the next note. `None` at EOF, `Err` for unparseable lines.
    pub fn next_note(&mut self) -> Option<Result<Note, EditorError>> {
        loop {
            self.line_buf.clear();
            match self.reader.read_line(&mut self.line_buf) {
                Ok(0) => return None,
                Ok(_) => {
                    let trimmed = self.line_buf.trim();
                    if trimmed.is_empty() {
                        continue;
                    }
                    return Some(
                        serde_json::from_str::<Note>(trimmed)
                            .map_err(|e| EditorError::Session(format!("parse note: {}", e))),
                    );
                }
                Err(e) => return Some(Err(EditorError::Io(e))),
            }
        }
    }

    /// Read all remaining notes, skipping malformed lines.
    pub fn read_all(mut self) -> Vec<Note> {
        let mut notes = Vec::new();
        while let Some(result) = self.next_note() {
            match result {
                Ok(note) => notes.push(note),
                Err(e) => warn!("Skipping session line: {}", e),
            }
        }
        notes
    }

    /// Build an editor from the header and every readable note. Notes naming
    /// an unknown section go to the active one; duplicate ids are dropped.
    pub fn into_editor(self, config: Config) -> Editor {
        let header = self.header.clone();
        let mut sections: Vec<Section> = header
            .sections
            .iter()
            .map(|e| Section::new(e.id, e.name.clone()))
            .collect();
        if sections.is_empty() {
            sections.push(Section::new(header.active, "Section 1"));
        }
        let fallback = if sections.iter().any(|s| s.id() == header.active) {
            header.active
        } else {
            sections[0].id()
        };

        let mut seen = HashSet::new();
        let mut loaded = 0usize;
        for note in self.read_all() {
            if !seen.insert(note.id()) {
                warn!("Dropping duplicate {}", note.id());
                continue;
            }
            let target = if sections.iter().any(|s| s.id() == note.section()) {
                note.section()
            } else {
                fallback
            };
            if let Some(section) = sections.iter_mut().find(|s| s.id() == target) {
                section.adopt(note);
                loaded += 1;
            }
        }

        info!(
            "Loaded session: {} sections, {} notes",
            sections.len(),
            loaded
        );
        Editor::with_sections(config, sections, header.active)
    }
}

/// Open a session file and build an editor from it.
pub fn load(path: &Path, config: Config) -> Result<Editor, EditorError> {
    let file = File::open(path)?;
    let reader = SessionReader::open(BufReader::new(file))?;
    Ok(reader.into_editor(config))
}

/// Write the header line and one line per note, section by section.
pub fn write<W: Write>(editor: &Editor, mut out: W) -> Result<(), EditorError> {
    let header = SessionHeader {
        format: FORMAT.into(),
        version: VERSION,
        active: editor.active_section_id(),
        sections: editor
            .sections()
            .iter()
            .map(|s| SectionEntry {
                id: s.id(),
                name: s.name().to_string(),
            })
            .collect(),
    };
    let to_session_err = |e: serde_json::Error| EditorError::Session(e.to_string());
    serde_json::to_writer(&mut out, &header).map_err(to_session_err)?;
    out.write_all(b"\n")?;
    for section in editor.sections() {
        for note in section.notes() {
            serde_json::to_writer(&mut out, note).map_err(to_session_err)?;
            out.write_all(b"\n")?;
        }
    }
    out.flush()?;
    Ok(())
}

pub fn save(editor: &Editor, path: &Path) -> Result<(), EditorError> {
    let file = File::create(path)?;
    write(editor, BufWriter::new(file))?;
    info!("Session saved to {:?}", path);
    Ok(())
}
