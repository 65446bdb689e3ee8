//! Per-container write-ahead journal.
//!
//! An append-only file of CRC-tagged records. Each record is a 12-byte
//! envelope `{ crc32, size, type }` (big-endian) followed by `size`
//! payload bytes; the CRC covers the payload only. Mutations are logged
//! as absolute states (`insert`, `modify`, `remove`), session operations
//! as revision markers.
//!
//! Adjacent session headers compress in place: a `start_undo` directly
//! followed by `commit` collapses into a single `revision` record, and a
//! `revision` record is overwritten by a following `start_undo` or
//! `revision`. Replay preserves the equivalence because `start_undo`
//! catches a container up via `set_revision(rev - 1)`.
//!
//! On recover, records are validated front to back; the first record
//! with a short envelope, short payload or CRC mismatch marks the torn
//! tail. The file is truncated there and replay stops. A torn tail is
//! normal after a crash, not an error.

mod record;

pub(crate) use record::JournalOp;

use crate::error::CoreResult;
use crate::object::Object;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use tracing::debug;
use undodb_codec::{crc32, Encoder};

const ENVELOPE_SIZE: u64 = 12;

/// A container's journal file.
pub struct Journal {
    file: File,
    path: PathBuf,
    write_pos: u64,
    last: Option<(u64, JournalOp)>,
}

impl Journal {
    /// Opens (or creates) the journal file, positioned for appending.
    pub fn open(path: &Path) -> CoreResult<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;
        let write_pos = file.metadata()?.len();
        Ok(Self {
            file,
            path: path.to_path_buf(),
            write_pos,
            last: None,
        })
    }

    /// Walks the journal from the start, validating each record and
    /// handing it to `apply`. Truncates the file at the first invalid
    /// record and leaves the journal positioned there for appends.
    pub fn recover(
        &mut self,
        mut apply: impl FnMut(JournalOp, &[u8]) -> CoreResult<()>,
    ) -> CoreResult<()> {
        self.file.seek(SeekFrom::Start(0))?;
        let mut data = Vec::new();
        self.file.read_to_end(&mut data)?;

        let mut pos = 0usize;
        loop {
            if data.len() - pos < ENVELOPE_SIZE as usize {
                break;
            }
            let crc = u32::from_be_bytes(data[pos..pos + 4].try_into().expect("4 bytes"));
            let size =
                u32::from_be_bytes(data[pos + 4..pos + 8].try_into().expect("4 bytes")) as usize;
            let op_raw = u32::from_be_bytes(data[pos + 8..pos + 12].try_into().expect("4 bytes"));

            let payload_start = pos + ENVELOPE_SIZE as usize;
            if data.len() - payload_start < size {
                break;
            }
            let payload = &data[payload_start..payload_start + size];
            if crc32(payload) != crc {
                break;
            }

            // Unknown record types are validated and skipped.
            if let Some(op) = JournalOp::from_u32(op_raw) {
                apply(op, payload)?;
            }
            pos = payload_start + size;
        }

        if pos as u64 != self.write_pos {
            debug!(
                path = %self.path.display(),
                valid = pos,
                total = self.write_pos,
                "journal tail truncated during recover"
            );
        }
        self.write_pos = pos as u64;
        self.file.set_len(self.write_pos)?;
        self.last = None;
        Ok(())
    }

    /// Logs an insertion.
    pub fn insert<T: Object>(&mut self, value: &T) -> CoreResult<()> {
        let mut enc = Encoder::new();
        value.encode(&mut enc);
        self.append(JournalOp::Insert, enc.as_bytes())
    }

    /// Logs a modification as the full new state.
    pub fn modify<T: Object>(&mut self, id: u64, value: &T) -> CoreResult<()> {
        let mut enc = Encoder::new();
        enc.write_u64(id);
        value.encode(&mut enc);
        self.append(JournalOp::Modify, enc.as_bytes())
    }

    /// Logs a removal.
    pub fn remove(&mut self, id: u64) -> CoreResult<()> {
        let mut enc = Encoder::new();
        enc.write_u64(id);
        self.append(JournalOp::Remove, enc.as_bytes())
    }

    /// Logs a session start at `revision`.
    pub fn start_undo(&mut self, revision: i64) -> CoreResult<()> {
        self.revision_entry(JournalOp::StartUndo, revision)
    }

    /// Logs a commit at `revision`.
    pub fn commit(&mut self, revision: i64) -> CoreResult<()> {
        self.revision_entry(JournalOp::Commit, revision)
    }

    /// Logs an undo down to `revision`.
    pub fn undo(&mut self, revision: i64) -> CoreResult<()> {
        self.revision_entry(JournalOp::Undo, revision)
    }

    /// Logs an undo of the whole stack down to `revision`.
    pub fn undo_all(&mut self, revision: i64) -> CoreResult<()> {
        self.revision_entry(JournalOp::UndoAll, revision)
    }

    /// Logs an explicit revision move.
    pub fn set_revision(&mut self, revision: i64) -> CoreResult<()> {
        self.revision_entry(JournalOp::Revision, revision)
    }

    fn revision_entry(&mut self, op: JournalOp, revision: i64) -> CoreResult<()> {
        let mut enc = Encoder::new();
        enc.write_i64(revision);
        self.append(op, enc.as_bytes())
    }

    fn append(&mut self, op: JournalOp, payload: &[u8]) -> CoreResult<()> {
        let (pos, write_op) = match self.last {
            Some((last_pos, last_op)) if can_compress(last_op, op) => {
                let effective = if last_op == JournalOp::StartUndo && op == JournalOp::Commit {
                    JournalOp::Revision
                } else {
                    op
                };
                (last_pos, effective)
            }
            _ => (self.write_pos, op),
        };

        let mut envelope = [0u8; ENVELOPE_SIZE as usize];
        envelope[0..4].copy_from_slice(&crc32(payload).to_be_bytes());
        envelope[4..8].copy_from_slice(&(payload.len() as u32).to_be_bytes());
        envelope[8..12].copy_from_slice(&write_op.as_u32().to_be_bytes());

        self.file.seek(SeekFrom::Start(pos))?;
        self.file.write_all(&envelope)?;
        self.file.write_all(payload)?;
        self.file.flush()?;

        self.write_pos = pos + ENVELOPE_SIZE + payload.len() as u64;
        // Every compressible pair has an identical payload width, so a
        // rewrite never leaves stale bytes past write_pos.
        self.last = Some((pos, write_op));
        Ok(())
    }
}

/// Whether `next` may overwrite `last` in place.
fn can_compress(last: JournalOp, next: JournalOp) -> bool {
    matches!(
        (last, next),
        (JournalOp::StartUndo, JournalOp::Commit)
            | (JournalOp::Revision, JournalOp::StartUndo)
            | (JournalOp::Revision, JournalOp::Revision)
    )
}

impl std::fmt::Debug for Journal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Journal")
            .field("path", &self.path)
            .field("write_pos", &self.write_pos)
            .finish_non_exhaustive()
    }
}
