//! The undo engine: sessions, undo, squash, commit.
//!
//! The undo stack is a deque of `undo_state` records that index into two
//! singly linked lists. Each state remembers `next_id` and the heads of
//! `old_values`/`removed_values` as they were when the session started,
//! so the top session's reversal information is exactly the list prefix
//! up to the saved heads.
//!
//! Within the top session:
//! - a primary key is *new* if it is at least `old_next_id`;
//! - a key is *removed* if its node sits in the `removed_values` prefix
//!   (such nodes carry the erased sentinel in their flags byte);
//! - a key is *modified* if an entry for it sits in the `old_values`
//!   prefix.
//!
//! Operations on a given key always follow `CREATE MODIFY* REMOVE?`, so
//! when several entries exist for one key the oldest one is the correct
//! restoration target, which is what makes the compression rules safe.

use crate::container::layout::{node, old_node, removed_entry, undo_state, FLAG_ERASED};
use crate::container::multi::UndoMultiIndex;
use crate::container::session::Session;
use crate::error::{CoreError, CoreResult};
use crate::index::IndexKey;
use crate::object::Object;
use crate::segment::{Allocator, Segment};

/// Read-only description of the top undo session: the values created,
/// the pre-modification values of those modified, and the removed
/// values. Produced by [`UndoMultiIndex::last_undo_session`] after
/// compression, so the three sets are free of redundancies.
#[derive(Debug, Clone, Default)]
pub struct Delta<T> {
    /// Values created within the session, in `id` order.
    pub new_values: Vec<T>,
    /// Pre-session values of objects modified within the session,
    /// newest backup first.
    pub old_values: Vec<T>,
    /// Values removed within the session, newest removal first.
    pub removed_values: Vec<T>,
}

impl<T: Object> UndoMultiIndex<T> {
    // ------------------------------------------------------------------
    // Inner operations (no journaling; used by replay too)
    // ------------------------------------------------------------------

    pub(crate) fn start_undo_inner(&self, seg: &mut Segment) -> CoreResult<i64> {
        let monotonic = self.monotonic(seg) + 1;
        self.set_monotonic(seg, monotonic);

        let state = Allocator::allocate(seg, undo_state::RECORD_SIZE)?;
        let tail = self.undo_tail(seg);
        seg.write_u64(state + undo_state::PREV, tail);
        seg.write_u64(state + undo_state::NEXT, 0);
        seg.write_u64(state + undo_state::OLD_HEAD_AT_START, self.old_head(seg));
        seg.write_u64(
            state + undo_state::REMOVED_HEAD_AT_START,
            self.removed_head(seg),
        );
        seg.write_u64(state + undo_state::OLD_NEXT_ID, self.next_id(seg));
        seg.write_u64(state + undo_state::CTIME, monotonic);

        if tail != 0 {
            seg.write_u64(tail + undo_state::NEXT, state);
        } else {
            self.set_undo_head(seg, state);
        }
        self.set_undo_tail(seg, state);
        self.set_undo_len(seg, self.undo_len(seg) + 1);

        let revision = self.revision_field(seg) + 1;
        self.set_revision_field(seg, revision);
        Ok(revision)
    }

    /// Restores the container to the state remembered by the top
    /// `undo_state`.
    pub(crate) fn undo_inner(&self, seg: &mut Segment) -> CoreResult<()> {
        if self.undo_len(seg) == 0 {
            return Ok(());
        }
        let state = self.undo_tail(seg);
        let old_boundary = seg.read_u64(state + undo_state::OLD_HEAD_AT_START);
        let removed_boundary = seg.read_u64(state + undo_state::REMOVED_HEAD_AT_START);
        let old_next_id = seg.read_u64(state + undo_state::OLD_NEXT_ID);
        let ctime = seg.read_u64(state + undo_state::CTIME);

        // 1. Erase and destroy everything created within the session.
        let new_nodes = {
            let key_of = move |seg: &Segment, n: u64| Self::node_key(seg, n, 0);
            self.tree_at(0, &key_of)
                .collect_from(seg, &IndexKey::from_u64(old_next_id))?
        };
        for node_off in &new_nodes {
            self.erase_node_all(seg, *node_off);
            self.dispose_node(seg, *node_off);
        }
        self.set_size_field(seg, self.size_field(seg) - new_nodes.len() as u64);

        // 2. Restore pre-modification values. Entries whose backed-up
        //    mtime is not older than the session start shadow an earlier
        //    modify of the same key (they can only appear after a squash)
        //    and are skipped. Erased nodes get their value back here but
        //    are reinserted in pass 3.
        let mut cur = self.old_head(seg);
        while cur != old_boundary {
            let next = seg.read_u64(cur + old_node::NEXT);
            let mtime = seg.read_u64(cur + old_node::MTIME);
            if mtime < ctime {
                let node_off = seg.read_u64(cur + old_node::CURRENT);
                let value_off = seg.read_u64(cur + old_node::VALUE_OFF);
                let value_len = seg.read_u32(cur + old_node::VALUE_LEN) as usize;
                let bytes = seg.slice(value_off, value_len).to_vec();
                self.write_node_value(seg, node_off, &bytes)?;
                seg.write_u64(node_off + node::MTIME, mtime);
                if seg.read_u8(node_off + node::FLAGS) != FLAG_ERASED {
                    // Transient duplicates are tolerated; they resolve by
                    // the time the old_values walk finishes.
                    self.reposition(seg, node_off, false)?;
                }
            }
            self.dispose_old(seg, cur);
            cur = next;
        }
        self.set_old_head(seg, old_boundary);

        // 3. Reinsert removed pre-session nodes; destroy nodes that were
        //    both created and removed within the session.
        let mut cur = self.removed_head(seg);
        let mut restored = 0u64;
        while cur != removed_boundary {
            let next = seg.read_u64(cur + removed_entry::NEXT);
            let node_off = seg.read_u64(cur + removed_entry::NODE);
            if seg.read_u64(node_off + node::ID) < old_next_id {
                seg.write_u8(node_off + node::FLAGS, 0);
                if self.insert_node_all(seg, node_off)?.is_err() {
                    return Err(CoreError::corrupted(
                        "reinserting a removed node hit a uniqueness conflict",
                    ));
                }
                restored += 1;
            } else {
                self.dispose_node(seg, node_off);
            }
            Allocator::deallocate(seg, cur);
            cur = next;
        }
        self.set_removed_head(seg, removed_boundary);
        self.set_size_field(seg, self.size_field(seg) + restored);

        self.set_next_id(seg, old_next_id);
        self.pop_tail_state(seg);
        self.set_revision_field(seg, self.revision_field(seg) - 1);
        Ok(())
    }

    /// Merges the top session into the one below it.
    pub(crate) fn squash_inner(&self, seg: &mut Segment) -> CoreResult<()> {
        let len = self.undo_len(seg);
        if len == 0 {
            return Ok(());
        }
        if len == 1 {
            self.dispose_undo_lists(seg);
        } else {
            let top = self.undo_tail(seg);
            let prev = seg.read_u64(top + undo_state::PREV);
            self.compress_range(seg, top, prev)?;
        }
        self.pop_tail_state(seg);
        self.set_revision_field(seg, self.revision_field(seg) - 1);
        Ok(())
    }

    /// Discards undo states at or below `target`. Returns the current
    /// revision, which commit never changes.
    pub(crate) fn commit_inner(&self, seg: &mut Segment, target: i64) -> CoreResult<i64> {
        let revision = self.revision_field(seg);
        let target = target.min(revision);
        let len = self.undo_len(seg) as i64;
        if len == 0 {
            return Ok(revision);
        }

        if target == revision {
            self.dispose_undo_lists(seg);
            let mut state = self.undo_head(seg);
            while state != 0 {
                let next = seg.read_u64(state + undo_state::NEXT);
                Allocator::deallocate(seg, state);
                state = next;
            }
            self.set_undo_head(seg, 0);
            self.set_undo_tail(seg, 0);
            self.set_undo_len(seg, 0);
        } else if revision - target < len {
            let drop_count = len - (revision - target);

            let mut keep = self.undo_head(seg);
            for _ in 0..drop_count {
                keep = seg.read_u64(keep + undo_state::NEXT);
            }
            let old_boundary = seg.read_u64(keep + undo_state::OLD_HEAD_AT_START);
            let removed_boundary = seg.read_u64(keep + undo_state::REMOVED_HEAD_AT_START);

            self.dispose_old_suffix(seg, old_boundary);
            self.dispose_removed_suffix(seg, removed_boundary);

            // Kept states whose saved heads pointed into the disposed
            // suffix now mark the (empty) list end instead.
            let mut state = keep;
            while state != 0 {
                if old_boundary != 0
                    && seg.read_u64(state + undo_state::OLD_HEAD_AT_START) == old_boundary
                {
                    seg.write_u64(state + undo_state::OLD_HEAD_AT_START, 0);
                }
                if removed_boundary != 0
                    && seg.read_u64(state + undo_state::REMOVED_HEAD_AT_START) == removed_boundary
                {
                    seg.write_u64(state + undo_state::REMOVED_HEAD_AT_START, 0);
                }
                state = seg.read_u64(state + undo_state::NEXT);
            }

            let mut state = self.undo_head(seg);
            for _ in 0..drop_count {
                let next = seg.read_u64(state + undo_state::NEXT);
                Allocator::deallocate(seg, state);
                state = next;
            }
            self.set_undo_head(seg, keep);
            seg.write_u64(keep + undo_state::PREV, 0);
            self.set_undo_len(seg, (len - drop_count) as u64);
        }
        // target below the whole stack: nothing to discard.
        Ok(revision)
    }

    pub(crate) fn undo_all_inner(&self, seg: &mut Segment) -> CoreResult<()> {
        while self.undo_len(seg) != 0 {
            self.undo_inner(seg)?;
        }
        Ok(())
    }

    pub(crate) fn set_revision_inner(&self, seg: &mut Segment, revision: u64) -> CoreResult<()> {
        if self.undo_len(seg) != 0 {
            return Err(CoreError::invalid_operation(
                "cannot set revision while there is an existing undo stack",
            ));
        }
        if revision > i64::MAX as u64 {
            return Err(CoreError::invalid_operation("revision to set is too high"));
        }
        if (revision as i64) < self.revision_field(seg) {
            return Err(CoreError::invalid_operation("revision cannot decrease"));
        }
        self.set_revision_field(seg, revision as i64);
        Ok(())
    }

    /// Removes entries of the top session that would be redundant if all
    /// sessions above `threshold_state` were squashed into it:
    /// - `old_values` entries whose backed-up mtime is not older than the
    ///   threshold session (its own backup shadows them);
    /// - `old_values` entries whose node has since been erased; their
    ///   value and mtime are folded into the parked node first, so the
    ///   `removed_values` pass restores them;
    /// - `removed_values` entries for nodes created after the threshold
    ///   session began (undoing it would destroy them anyway).
    fn compress_range(
        &self,
        seg: &mut Segment,
        boundary_state: u64,
        threshold_state: u64,
    ) -> CoreResult<()> {
        let old_boundary = seg.read_u64(boundary_state + undo_state::OLD_HEAD_AT_START);
        let removed_boundary = seg.read_u64(boundary_state + undo_state::REMOVED_HEAD_AT_START);
        let threshold_ctime = seg.read_u64(threshold_state + undo_state::CTIME);
        let threshold_next_id = seg.read_u64(threshold_state + undo_state::OLD_NEXT_ID);

        let mut prev_entry = 0u64;
        let mut cur = self.old_head(seg);
        while cur != old_boundary {
            let next = seg.read_u64(cur + old_node::NEXT);
            let mtime = seg.read_u64(cur + old_node::MTIME);
            let mut drop = mtime >= threshold_ctime;
            if !drop {
                let node_off = seg.read_u64(cur + old_node::CURRENT);
                if seg.read_u8(node_off + node::FLAGS) == FLAG_ERASED {
                    let value_off = seg.read_u64(cur + old_node::VALUE_OFF);
                    let value_len = seg.read_u32(cur + old_node::VALUE_LEN) as usize;
                    let bytes = seg.slice(value_off, value_len).to_vec();
                    self.write_node_value(seg, node_off, &bytes)?;
                    seg.write_u64(node_off + node::MTIME, mtime);
                    drop = true;
                }
            }
            if drop {
                if prev_entry == 0 {
                    self.set_old_head(seg, next);
                } else {
                    seg.write_u64(prev_entry + old_node::NEXT, next);
                }
                self.dispose_old(seg, cur);
            } else {
                prev_entry = cur;
            }
            cur = next;
        }

        let mut prev_entry = 0u64;
        let mut cur = self.removed_head(seg);
        while cur != removed_boundary {
            let next = seg.read_u64(cur + removed_entry::NEXT);
            let node_off = seg.read_u64(cur + removed_entry::NODE);
            if seg.read_u64(node_off + node::ID) >= threshold_next_id {
                self.dispose_node(seg, node_off);
                if prev_entry == 0 {
                    self.set_removed_head(seg, next);
                } else {
                    seg.write_u64(prev_entry + removed_entry::NEXT, next);
                }
                Allocator::deallocate(seg, cur);
            } else {
                prev_entry = cur;
            }
            cur = next;
        }
        Ok(())
    }

    fn pop_tail_state(&self, seg: &mut Segment) {
        let state = self.undo_tail(seg);
        debug_assert_ne!(state, 0);
        let prev = seg.read_u64(state + undo_state::PREV);
        if prev != 0 {
            seg.write_u64(prev + undo_state::NEXT, 0);
        } else {
            self.set_undo_head(seg, 0);
        }
        self.set_undo_tail(seg, prev);
        self.set_undo_len(seg, self.undo_len(seg) - 1);
        Allocator::deallocate(seg, state);
    }

    /// Clears both reversal lists entirely, destroying parked nodes.
    fn dispose_undo_lists(&self, seg: &mut Segment) {
        let mut cur = self.old_head(seg);
        while cur != 0 {
            let next = seg.read_u64(cur + old_node::NEXT);
            self.dispose_old(seg, cur);
            cur = next;
        }
        self.set_old_head(seg, 0);

        let mut cur = self.removed_head(seg);
        while cur != 0 {
            let next = seg.read_u64(cur + removed_entry::NEXT);
            let node_off = seg.read_u64(cur + removed_entry::NODE);
            self.dispose_node(seg, node_off);
            Allocator::deallocate(seg, cur);
            cur = next;
        }
        self.set_removed_head(seg, 0);
    }

    /// Disposes the `old_values` suffix starting at `boundary`.
    fn dispose_old_suffix(&self, seg: &mut Segment, boundary: u64) {
        if boundary == 0 {
            return;
        }
        let head = self.old_head(seg);
        if head == boundary {
            self.set_old_head(seg, 0);
        } else {
            let mut pred = head;
            while seg.read_u64(pred + old_node::NEXT) != boundary {
                pred = seg.read_u64(pred + old_node::NEXT);
            }
            seg.write_u64(pred + old_node::NEXT, 0);
        }
        let mut cur = boundary;
        while cur != 0 {
            let next = seg.read_u64(cur + old_node::NEXT);
            self.dispose_old(seg, cur);
            cur = next;
        }
    }

    /// Disposes the `removed_values` suffix starting at `boundary`,
    /// destroying the parked nodes for good.
    fn dispose_removed_suffix(&self, seg: &mut Segment, boundary: u64) {
        if boundary == 0 {
            return;
        }
        let head = self.removed_head(seg);
        if head == boundary {
            self.set_removed_head(seg, 0);
        } else {
            let mut pred = head;
            while seg.read_u64(pred + removed_entry::NEXT) != boundary {
                pred = seg.read_u64(pred + removed_entry::NEXT);
            }
            seg.write_u64(pred + removed_entry::NEXT, 0);
        }
        let mut cur = boundary;
        while cur != 0 {
            let next = seg.read_u64(cur + removed_entry::NEXT);
            let node_off = seg.read_u64(cur + removed_entry::NODE);
            self.dispose_node(seg, node_off);
            Allocator::deallocate(seg, cur);
            cur = next;
        }
    }

    fn last_undo_session_inner(&self, seg: &mut Segment) -> CoreResult<Delta<T>> {
        if self.undo_len(seg) == 0 {
            return Ok(Delta::default());
        }
        let top = self.undo_tail(seg);
        self.compress_range(seg, top, top)?;

        let old_boundary = seg.read_u64(top + undo_state::OLD_HEAD_AT_START);
        let removed_boundary = seg.read_u64(top + undo_state::REMOVED_HEAD_AT_START);
        let old_next_id = seg.read_u64(top + undo_state::OLD_NEXT_ID);

        let mut delta = Delta::default();

        let new_nodes = {
            let key_of = move |seg: &Segment, n: u64| Self::node_key(seg, n, 0);
            self.tree_at(0, &key_of)
                .collect_from(seg, &IndexKey::from_u64(old_next_id))?
        };
        for node_off in new_nodes {
            delta.new_values.push(Self::decode_node_value(seg, node_off)?);
        }

        let mut cur = self.old_head(seg);
        while cur != old_boundary {
            let value_off = seg.read_u64(cur + old_node::VALUE_OFF);
            let value_len = seg.read_u32(cur + old_node::VALUE_LEN) as usize;
            let mut dec = undodb_codec::Decoder::new(seg.slice(value_off, value_len));
            delta.old_values.push(T::decode(&mut dec)?);
            cur = seg.read_u64(cur + old_node::NEXT);
        }

        let mut cur = self.removed_head(seg);
        while cur != removed_boundary {
            let node_off = seg.read_u64(cur + removed_entry::NODE);
            delta.removed_values.push(Self::decode_node_value(seg, node_off)?);
            cur = seg.read_u64(cur + removed_entry::NEXT);
        }

        Ok(delta)
    }

    // ------------------------------------------------------------------
    // Public session surface
    // ------------------------------------------------------------------

    /// Current revision: the number of sessions started minus the number
    /// undone or squashed.
    pub fn revision(&self) -> i64 {
        let seg = self.segment.read();
        self.revision_field(&seg)
    }

    /// Whether any undo state is on the stack.
    pub fn has_undo_session(&self) -> bool {
        let seg = self.segment.read();
        self.undo_len(&seg) != 0
    }

    /// `(revision - undo_stack.len(), revision)`.
    pub fn undo_stack_revision_range(&self) -> (i64, i64) {
        let seg = self.segment.read();
        let revision = self.revision_field(&seg);
        (revision - self.undo_len(&seg) as i64, revision)
    }

    /// Starts a reversible session. Dropping the returned [`Session`]
    /// without calling [`Session::push`] undoes everything performed
    /// through this container in the meantime.
    pub fn start_undo_session(&self) -> CoreResult<Session<'_, T>> {
        self.ensure_writable()?;
        let revision = {
            let mut seg = self.segment.write();
            self.start_undo_inner(&mut seg)?
        };
        if let Some(journal) = &self.journal {
            journal.lock().start_undo(revision)?;
        }
        Ok(Session::new(self))
    }

    /// Starts a session without a guard value; the caller owns the undo.
    pub(crate) fn start_undo_raw(&self) -> CoreResult<i64> {
        self.ensure_writable()?;
        let revision = {
            let mut seg = self.segment.write();
            self.start_undo_inner(&mut seg)?
        };
        if let Some(journal) = &self.journal {
            journal.lock().start_undo(revision)?;
        }
        Ok(revision)
    }

    /// Restores the state at the top of the undo stack.
    pub fn undo(&self) -> CoreResult<()> {
        self.ensure_writable()?;
        let revision = {
            let mut seg = self.segment.write();
            self.undo_inner(&mut seg)?;
            self.revision_field(&seg)
        };
        if let Some(journal) = &self.journal {
            journal.lock().undo(revision)?;
        }
        Ok(())
    }

    /// Combines the top two undo states.
    ///
    /// Squash has no journal record form; a journaled container that
    /// squashes relies on the segment staying clean until the next
    /// shutdown, exactly like the original design.
    pub fn squash(&self) -> CoreResult<()> {
        self.ensure_writable()?;
        let mut seg = self.segment.write();
        self.squash_inner(&mut seg)
    }

    /// Discards all undo history at or below `revision`. Returns the
    /// current revision.
    pub fn commit(&self, revision: i64) -> CoreResult<i64> {
        self.ensure_writable()?;
        let current = {
            let mut seg = self.segment.write();
            self.commit_inner(&mut seg, revision)?
        };
        if let Some(journal) = &self.journal {
            journal.lock().commit(current)?;
        }
        Ok(current)
    }

    /// Undoes every session on the stack.
    pub fn undo_all(&self) -> CoreResult<()> {
        self.ensure_writable()?;
        if !self.has_undo_session() {
            return Ok(());
        }
        let revision = {
            let mut seg = self.segment.write();
            self.undo_all_inner(&mut seg)?;
            self.revision_field(&seg)
        };
        if let Some(journal) = &self.journal {
            journal.lock().undo_all(revision)?;
        }
        Ok(())
    }

    /// Aligns an empty-stack container to an externally managed revision
    /// line. The revision may only grow.
    pub fn set_revision(&self, revision: u64) -> CoreResult<()> {
        self.ensure_writable()?;
        {
            let mut seg = self.segment.write();
            self.set_revision_inner(&mut seg, revision)?;
        }
        if let Some(journal) = &self.journal {
            journal.lock().set_revision(revision as i64)?;
        }
        Ok(())
    }

    /// The compressed delta of the top undo session.
    ///
    /// Compression rewrites the reversal lists in place (without changing
    /// the logical container state), so this needs a writable database.
    pub fn last_undo_session(&self) -> CoreResult<Delta<T>> {
        self.ensure_writable()?;
        let mut seg = self.segment.write();
        self.last_undo_session_inner(&mut seg)
    }
}
