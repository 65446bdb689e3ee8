//! Journal replay into a container.
//!
//! Replay drives the non-journaling inner operations, so recovering a
//! container never re-journals what it reads. Mutation records that
//! reference a missing id, and session records whose resulting revision
//! does not match the recorded one, mean the journal is inconsistent
//! with the segment snapshot; both are hard errors.

use crate::container::multi::UndoMultiIndex;
use crate::error::{CoreError, CoreResult};
use crate::journal::JournalOp;
use crate::object::Object;
use crate::segment::Segment;
use undodb_codec::Decoder;

impl<T: Object> UndoMultiIndex<T> {
    pub(crate) fn apply_journal_record(
        &self,
        seg: &mut Segment,
        op: JournalOp,
        payload: &[u8],
    ) -> CoreResult<()> {
        let mut dec = Decoder::new(payload);
        match op {
            JournalOp::Insert => {
                let value = T::decode(&mut dec)?;
                self.emplace_inner(seg, |v| *v = value.clone())
                    .map_err(|error| {
                        CoreError::journal_replay(format!(
                            "insert into {} failed: {error}",
                            T::TYPE_NAME
                        ))
                    })?;
            }

            JournalOp::Modify => {
                let id = dec.read_u64()?;
                let value = T::decode(&mut dec)?;
                self.modify_inner(seg, id, |v| *v = value.clone())
                    .map_err(|error| match error {
                        CoreError::ObjectNotFound { .. } => CoreError::journal_replay(format!(
                            "modify of non existing id {id} in {}",
                            T::TYPE_NAME
                        )),
                        other => CoreError::journal_replay(format!(
                            "modify of id {id} in {} failed: {other}",
                            T::TYPE_NAME
                        )),
                    })?;
            }

            JournalOp::Remove => {
                let id = dec.read_u64()?;
                self.remove_inner(seg, id).map_err(|error| match error {
                    CoreError::ObjectNotFound { .. } => CoreError::journal_replay(format!(
                        "delete of non existing id {id} in {}",
                        T::TYPE_NAME
                    )),
                    other => CoreError::journal_replay(format!(
                        "delete of id {id} in {} failed: {other}",
                        T::TYPE_NAME
                    )),
                })?;
            }

            JournalOp::StartUndo => {
                let revision = dec.read_i64()?;
                // A collapsed empty session leaves only a revision
                // marker behind; catch the container up before opening
                // the session so the revision line matches.
                if self.revision_field(seg) < revision - 1 {
                    self.set_revision_catch_up(seg, revision - 1)?;
                }
                let reached = self.start_undo_inner(seg)?;
                if reached != revision {
                    return Err(CoreError::journal_replay(format!(
                        "start undo revision mismatch: {reached} with expected {revision}"
                    )));
                }
            }

            JournalOp::Commit => {
                let revision = dec.read_i64()?;
                let reached = self.commit_inner(seg, revision)?;
                if reached != revision {
                    return Err(CoreError::journal_replay(format!(
                        "commit revision mismatch: {reached} with expected {revision}"
                    )));
                }
            }

            JournalOp::Undo => {
                let revision = dec.read_i64()?;
                self.undo_inner(seg)?;
                let reached = self.revision_field(seg);
                if reached != revision {
                    return Err(CoreError::journal_replay(format!(
                        "undo revision mismatch: {reached} with expected {revision}"
                    )));
                }
            }

            JournalOp::UndoAll => {
                let revision = dec.read_i64()?;
                self.undo_all_inner(seg)?;
                let reached = self.revision_field(seg);
                if reached != revision {
                    return Err(CoreError::journal_replay(format!(
                        "undo_all revision mismatch: {reached} with expected {revision}"
                    )));
                }
            }

            JournalOp::Revision => {
                let revision = dec.read_i64()?;
                self.set_revision_catch_up(seg, revision)?;
            }

            // Reserved; skipped like any other unapplied record.
            JournalOp::Create => {}
        }
        Ok(())
    }

    fn set_revision_catch_up(&self, seg: &mut Segment, revision: i64) -> CoreResult<()> {
        if revision < 0 {
            return Err(CoreError::journal_replay(format!(
                "negative revision {revision} in journal"
            )));
        }
        self.set_revision_inner(seg, revision as u64)
            .map_err(|error| CoreError::journal_replay(format!("set_revision failed: {error}")))
    }
}
