//! The undo-capable multi-index container.

use crate::container::layout::{node, old_node, removed_entry, root, FLAG_ERASED};
use crate::error::{CoreError, CoreResult};
use crate::index::tree::{Inserted, Tree};
use crate::index::IndexKey;
use crate::journal::Journal;
use crate::object::Object;
use crate::segment::{Allocator, Segment};
use parking_lot::{Mutex, RwLock};
use std::marker::PhantomData;
use std::mem;
use std::sync::Arc;

/// A typed multi-index container with transactional undo.
///
/// Lookups return decoded owned copies of the stored values; mutators
/// re-resolve the target through the primary index. Nothing handed to the
/// caller aliases segment memory, so `undo` and `commit` can never
/// invalidate a value the caller still holds, at the price of a decode
/// per access.
///
/// Handles are obtained from [`crate::Database::add_index`] and shared as
/// `Arc<UndoMultiIndex<T>>`.
pub struct UndoMultiIndex<T: Object> {
    pub(crate) segment: Arc<RwLock<Segment>>,
    pub(crate) root: u64,
    pub(crate) journal: Option<Mutex<Journal>>,
    pub(crate) read_only: bool,
    pub(crate) _marker: PhantomData<fn() -> T>,
}

impl<T: Object> UndoMultiIndex<T> {
    pub(crate) fn new(segment: Arc<RwLock<Segment>>, root: u64, read_only: bool) -> Self {
        Self {
            segment,
            root,
            journal: None,
            read_only,
            _marker: PhantomData,
        }
    }

    pub(crate) fn attach_journal(&mut self, journal: Journal) {
        self.journal = Some(Mutex::new(journal));
    }

    /// Number of indices: the primary plus the secondaries.
    #[must_use]
    pub fn index_count() -> u64 {
        1 + T::secondary_indices().len() as u64
    }

    pub(crate) fn node_slot_size() -> u64 {
        node::slot_size(Self::index_count())
    }

    /// Allocates and zero-initializes a container root record.
    pub(crate) fn construct_root(seg: &mut Segment) -> CoreResult<u64> {
        let count = Self::index_count();
        let size = root::record_size(count);
        let off = Allocator::allocate(seg, size)?;
        seg.slice_mut(off, size as usize).fill(0);
        seg.write_u32(off + root::VALUE_SIZE, mem::size_of::<T>() as u32);
        seg.write_u32(off + root::NODE_SIZE, Self::node_slot_size() as u32);
        seg.write_u16(off + root::INDEX_COUNT, count as u16);
        seg.write_u16(off + root::TYPE_ID, T::TYPE_ID);
        Ok(off)
    }

    /// Checks the recorded layout fences against the running build.
    pub(crate) fn validate_layout(seg: &Segment, root_off: u64) -> CoreResult<()> {
        let value_size = seg.read_u32(root_off + root::VALUE_SIZE);
        let node_size = seg.read_u32(root_off + root::NODE_SIZE);
        let index_count = seg.read_u16(root_off + root::INDEX_COUNT);
        if value_size != mem::size_of::<T>() as u32
            || node_size != Self::node_slot_size() as u32
            || u64::from(index_count) != Self::index_count()
        {
            return Err(CoreError::LayoutMismatch {
                type_name: T::TYPE_NAME,
            });
        }
        Ok(())
    }

    pub(crate) fn ensure_writable(&self) -> CoreResult<()> {
        if self.read_only {
            return Err(CoreError::ReadOnly);
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Root field access
    // ------------------------------------------------------------------

    pub(crate) fn next_id(&self, seg: &Segment) -> u64 {
        seg.read_u64(self.root + root::NEXT_ID)
    }

    pub(crate) fn set_next_id(&self, seg: &mut Segment, id: u64) {
        seg.write_u64(self.root + root::NEXT_ID, id);
    }

    pub(crate) fn revision_field(&self, seg: &Segment) -> i64 {
        seg.read_i64(self.root + root::REVISION)
    }

    pub(crate) fn set_revision_field(&self, seg: &mut Segment, revision: i64) {
        seg.write_i64(self.root + root::REVISION, revision);
    }

    pub(crate) fn monotonic(&self, seg: &Segment) -> u64 {
        seg.read_u64(self.root + root::MONOTONIC)
    }

    pub(crate) fn set_monotonic(&self, seg: &mut Segment, value: u64) {
        seg.write_u64(self.root + root::MONOTONIC, value);
    }

    pub(crate) fn size_field(&self, seg: &Segment) -> u64 {
        seg.read_u64(self.root + root::SIZE)
    }

    pub(crate) fn set_size_field(&self, seg: &mut Segment, size: u64) {
        seg.write_u64(self.root + root::SIZE, size);
    }

    pub(crate) fn undo_head(&self, seg: &Segment) -> u64 {
        seg.read_u64(self.root + root::UNDO_HEAD)
    }

    pub(crate) fn set_undo_head(&self, seg: &mut Segment, state: u64) {
        seg.write_u64(self.root + root::UNDO_HEAD, state);
    }

    pub(crate) fn undo_tail(&self, seg: &Segment) -> u64 {
        seg.read_u64(self.root + root::UNDO_TAIL)
    }

    pub(crate) fn set_undo_tail(&self, seg: &mut Segment, state: u64) {
        seg.write_u64(self.root + root::UNDO_TAIL, state);
    }

    pub(crate) fn undo_len(&self, seg: &Segment) -> u64 {
        seg.read_u64(self.root + root::UNDO_LEN)
    }

    pub(crate) fn set_undo_len(&self, seg: &mut Segment, len: u64) {
        seg.write_u64(self.root + root::UNDO_LEN, len);
    }

    pub(crate) fn old_head(&self, seg: &Segment) -> u64 {
        seg.read_u64(self.root + root::OLD_HEAD)
    }

    pub(crate) fn set_old_head(&self, seg: &mut Segment, head: u64) {
        seg.write_u64(self.root + root::OLD_HEAD, head);
    }

    pub(crate) fn removed_head(&self, seg: &Segment) -> u64 {
        seg.read_u64(self.root + root::REMOVED_HEAD)
    }

    pub(crate) fn set_removed_head(&self, seg: &mut Segment, head: u64) {
        seg.write_u64(self.root + root::REMOVED_HEAD, head);
    }

    // ------------------------------------------------------------------
    // Nodes and trees
    // ------------------------------------------------------------------

    /// The ordering key of a node in one index. The primary key lives in
    /// the node header; secondary keys are extracted from the decoded
    /// value.
    pub(crate) fn node_key(seg: &Segment, node_off: u64, slot: usize) -> CoreResult<IndexKey> {
        if slot == 0 {
            Ok(IndexKey::from_u64(seg.read_u64(node_off + node::ID)))
        } else {
            let value = Self::decode_node_value(seg, node_off)?;
            Ok((T::secondary_indices()[slot - 1].key)(&value))
        }
    }

    pub(crate) fn tree_at<'a>(
        &self,
        slot: usize,
        key_of: crate::index::tree::KeyOf<'a>,
    ) -> Tree<'a> {
        Tree {
            root_field: self.root + root::INDEX_ROOTS + 8 * slot as u64,
            links_off: node::links_off(slot as u64),
            key_of,
        }
    }

    pub(crate) fn index_name(slot: usize) -> &'static str {
        if slot == 0 {
            "by_id"
        } else {
            T::secondary_indices()[slot - 1].name
        }
    }

    pub(crate) fn decode_node_value(seg: &Segment, node_off: u64) -> CoreResult<T> {
        let count = Self::index_count();
        let value_off = seg.read_u64(node_off + node::value_off_field(count));
        let value_len = seg.read_u32(node_off + node::value_len_field(count)) as usize;
        let mut dec = undodb_codec::Decoder::new(seg.slice(value_off, value_len));
        Ok(T::decode(&mut dec)?)
    }

    pub(crate) fn encode_value(value: &T) -> Vec<u8> {
        let mut enc = undodb_codec::Encoder::new();
        value.encode(&mut enc);
        enc.into_bytes()
    }

    fn alloc_node(&self, seg: &mut Segment, id: u64, mtime: u64) -> CoreResult<u64> {
        let size = Self::node_slot_size();
        let off = Allocator::allocate(seg, size)?;
        seg.slice_mut(off, size as usize).fill(0);
        seg.write_u64(off + node::ID, id);
        seg.write_u64(off + node::MTIME, mtime);
        Ok(off)
    }

    /// Rewrites a node's value bytes, growing the value block if needed.
    pub(crate) fn write_node_value(
        &self,
        seg: &mut Segment,
        node_off: u64,
        bytes: &[u8],
    ) -> CoreResult<()> {
        let count = Self::index_count();
        let cap = seg.read_u32(node_off + node::value_cap_field(count)) as usize;
        let old_off = seg.read_u64(node_off + node::value_off_field(count));
        if bytes.len() <= cap && old_off != 0 {
            seg.slice_mut(old_off, bytes.len()).copy_from_slice(bytes);
            seg.write_u32(node_off + node::value_len_field(count), bytes.len() as u32);
            return Ok(());
        }

        let new_off = Allocator::allocate(seg, bytes.len() as u64)?;
        seg.slice_mut(new_off, bytes.len()).copy_from_slice(bytes);
        if old_off != 0 {
            Allocator::deallocate(seg, old_off);
        }
        seg.write_u64(node_off + node::value_off_field(count), new_off);
        seg.write_u32(node_off + node::value_len_field(count), bytes.len() as u32);
        seg.write_u32(
            node_off + node::value_cap_field(count),
            (((bytes.len() as u64 + 7) & !7).max(16)) as u32,
        );
        Ok(())
    }

    pub(crate) fn dispose_node(&self, seg: &mut Segment, node_off: u64) {
        let count = Self::index_count();
        let value_off = seg.read_u64(node_off + node::value_off_field(count));
        if value_off != 0 {
            Allocator::deallocate(seg, value_off);
        }
        Allocator::deallocate(seg, node_off);
    }

    pub(crate) fn dispose_old(&self, seg: &mut Segment, record: u64) {
        let value_off = seg.read_u64(record + old_node::VALUE_OFF);
        if value_off != 0 {
            Allocator::deallocate(seg, value_off);
        }
        Allocator::deallocate(seg, record);
    }

    /// Inserts a node into every index in order, rolling back on a
    /// uniqueness conflict. Returns the failing index slot on conflict.
    pub(crate) fn insert_node_all(
        &self,
        seg: &mut Segment,
        node_off: u64,
    ) -> CoreResult<Result<(), usize>> {
        let count = Self::index_count() as usize;
        for slot in 0..count {
            let key_of = move |seg: &Segment, n: u64| Self::node_key(seg, n, slot);
            let tree = self.tree_at(slot, &key_of);
            match tree.insert_unique(seg, node_off)? {
                Inserted::Yes => {}
                Inserted::Duplicate(_) => {
                    for done in (0..slot).rev() {
                        let key_of = move |seg: &Segment, n: u64| Self::node_key(seg, n, done);
                        self.tree_at(done, &key_of).erase(seg, node_off);
                    }
                    return Ok(Err(slot));
                }
            }
        }
        Ok(Ok(()))
    }

    pub(crate) fn erase_node_all(&self, seg: &mut Segment, node_off: u64) {
        let count = Self::index_count() as usize;
        for slot in 0..count {
            let key_of = move |seg: &Segment, n: u64| Self::node_key(seg, n, slot);
            self.tree_at(slot, &key_of).erase(seg, node_off);
        }
    }

    /// Moves a node to its correct position in every secondary index,
    /// comparing against its neighbors first. On a uniqueness conflict
    /// the node is re-linked non-uniquely at the conflict position and
    /// the failing slot is returned; the caller decides how to recover.
    pub(crate) fn reposition(
        &self,
        seg: &mut Segment,
        node_off: u64,
        unique: bool,
    ) -> CoreResult<Result<(), usize>> {
        let count = Self::index_count() as usize;
        for slot in 1..count {
            let key_of = move |seg: &Segment, n: u64| Self::node_key(seg, n, slot);
            let tree = self.tree_at(slot, &key_of);
            let my_key = Self::node_key(seg, node_off, slot)?;

            let prev = tree.prev(seg, node_off);
            let next = tree.next(seg, node_off);
            let out_of_place = (prev != 0 && Self::node_key(seg, prev, slot)? >= my_key)
                || (next != 0 && Self::node_key(seg, next, slot)? <= my_key);
            if !out_of_place {
                continue;
            }

            tree.erase(seg, node_off);
            if unique {
                match tree.insert_unique(seg, node_off)? {
                    Inserted::Yes => {}
                    Inserted::Duplicate(_) => {
                        tree.insert_equal(seg, node_off)?;
                        return Ok(Err(slot));
                    }
                }
            } else {
                tree.insert_equal(seg, node_off)?;
            }
        }
        Ok(Ok(()))
    }

    fn find_node(&self, seg: &Segment, id: u64) -> CoreResult<u64> {
        let key_of = move |seg: &Segment, n: u64| Self::node_key(seg, n, 0);
        self.tree_at(0, &key_of)
            .find(seg, &IndexKey::from_u64(id))
    }

    // ------------------------------------------------------------------
    // Undo bookkeeping hooks
    // ------------------------------------------------------------------

    /// Before a modification: push a backup of the node onto `old_values`
    /// the first time the node is touched within the top session.
    /// Returns the backup record pushed by this call, if any.
    fn on_modify(&self, seg: &mut Segment, node_off: u64) -> CoreResult<Option<u64>> {
        if self.undo_len(seg) == 0 {
            return Ok(None);
        }
        let top = self.undo_tail(seg);
        let ctime = seg.read_u64(top + crate::container::layout::undo_state::CTIME);
        let mtime = seg.read_u64(node_off + node::MTIME);
        if mtime >= ctime {
            // Already backed up within this session.
            return Ok(None);
        }

        let count = Self::index_count();
        let value_off = seg.read_u64(node_off + node::value_off_field(count));
        let value_len = seg.read_u32(node_off + node::value_len_field(count));
        let copy_off = Allocator::allocate(seg, u64::from(value_len).max(1))?;
        seg.copy_within(value_off, copy_off, value_len as usize);

        let record = match Allocator::allocate(seg, old_node::RECORD_SIZE) {
            Ok(record) => record,
            Err(err) => {
                Allocator::deallocate(seg, copy_off);
                return Err(err);
            }
        };
        seg.write_u64(record + old_node::NEXT, self.old_head(seg));
        seg.write_u64(record + old_node::CURRENT, node_off);
        seg.write_u64(record + old_node::MTIME, mtime);
        seg.write_u64(record + old_node::VALUE_OFF, copy_off);
        seg.write_u32(record + old_node::VALUE_LEN, value_len);
        self.set_old_head(seg, record);

        let monotonic = self.monotonic(seg);
        seg.write_u64(node_off + node::MTIME, monotonic);
        Ok(Some(record))
    }

    /// Pops the `old_values` head pushed by [`Self::on_modify`].
    fn pop_backup(&self, seg: &mut Segment, record: u64) {
        debug_assert_eq!(self.old_head(seg), record);
        let next = seg.read_u64(record + old_node::NEXT);
        self.set_old_head(seg, next);
        self.dispose_old(seg, record);
    }

    /// After erasing a node from every index: park it in
    /// `removed_values` when a session needs it back, destroy it
    /// otherwise.
    pub(crate) fn on_remove_node(&self, seg: &mut Segment, node_off: u64) -> CoreResult<()> {
        if self.undo_len(seg) != 0 {
            let top = self.undo_tail(seg);
            let old_next_id =
                seg.read_u64(top + crate::container::layout::undo_state::OLD_NEXT_ID);
            let id = seg.read_u64(node_off + node::ID);
            if id < old_next_id {
                seg.write_u8(node_off + node::FLAGS, FLAG_ERASED);
                let entry = Allocator::allocate(seg, removed_entry::RECORD_SIZE)?;
                seg.write_u64(entry + removed_entry::NEXT, self.removed_head(seg));
                seg.write_u64(entry + removed_entry::NODE, node_off);
                self.set_removed_head(seg, entry);
                return Ok(());
            }
        }
        self.dispose_node(seg, node_off);
        Ok(())
    }

    // ------------------------------------------------------------------
    // Mutations
    // ------------------------------------------------------------------

    pub(crate) fn emplace_inner(
        &self,
        seg: &mut Segment,
        ctor: impl FnOnce(&mut T),
    ) -> CoreResult<T> {
        let id = self.next_id(seg);
        let mut value = T::default();
        value.set_id(id);
        ctor(&mut value);
        if value.id() != id {
            return Err(CoreError::IdChanged {
                type_name: T::TYPE_NAME,
            });
        }

        let mtime = if self.undo_len(seg) != 0 {
            self.monotonic(seg)
        } else {
            0
        };
        let node_off = self.alloc_node(seg, id, mtime)?;
        let bytes = Self::encode_value(&value);
        if let Err(err) = self.write_node_value(seg, node_off, &bytes) {
            Allocator::deallocate(seg, node_off);
            return Err(err);
        }

        match self.insert_node_all(seg, node_off)? {
            Ok(()) => {}
            Err(slot) => {
                self.dispose_node(seg, node_off);
                return Err(CoreError::UniquenessViolation {
                    type_name: T::TYPE_NAME,
                    index: Self::index_name(slot),
                });
            }
        }

        self.set_next_id(seg, id + 1);
        self.set_size_field(seg, self.size_field(seg) + 1);
        Ok(value)
    }

    pub(crate) fn modify_inner(
        &self,
        seg: &mut Segment,
        id: u64,
        modifier: impl FnOnce(&mut T),
    ) -> CoreResult<T> {
        let node_off = self.find_node(seg, id)?;
        if node_off == 0 {
            return Err(CoreError::ObjectNotFound {
                type_name: T::TYPE_NAME,
                id,
            });
        }

        let old_value = Self::decode_node_value(seg, node_off)?;
        let backup = self.on_modify(seg, node_off)?;

        let mut new_value = old_value;
        modifier(&mut new_value);
        if new_value.id() != id {
            if let Some(record) = backup {
                // The value is untouched; only the mtime bump and the
                // backup need unwinding.
                let mtime = seg.read_u64(record + old_node::MTIME);
                seg.write_u64(node_off + node::MTIME, mtime);
                self.pop_backup(seg, record);
            }
            return Err(CoreError::IdChanged {
                type_name: T::TYPE_NAME,
            });
        }

        self.write_node_value(seg, node_off, &Self::encode_value(&new_value))?;

        match self.reposition(seg, node_off, true)? {
            Ok(()) => Ok(new_value),
            Err(slot) => {
                if let Some(record) = backup {
                    // Restore the just-pushed backup and put the node
                    // back where it was. The restored state was
                    // consistent, so this reposition cannot fail.
                    let value_off = seg.read_u64(record + old_node::VALUE_OFF);
                    let value_len = seg.read_u32(record + old_node::VALUE_LEN) as usize;
                    let bytes = seg.slice(value_off, value_len).to_vec();
                    self.write_node_value(seg, node_off, &bytes)?;
                    self.pop_backup(seg, record);
                    if self.reposition(seg, node_off, true)?.is_err() {
                        return Err(CoreError::corrupted(
                            "restoring a modify backup hit a uniqueness conflict",
                        ));
                    }
                } else {
                    // No backup to restore from: the object is erased.
                    self.erase_node_all(seg, node_off);
                    self.on_remove_node(seg, node_off)?;
                    self.set_size_field(seg, self.size_field(seg) - 1);
                }
                Err(CoreError::UniquenessViolation {
                    type_name: T::TYPE_NAME,
                    index: Self::index_name(slot),
                })
            }
        }
    }

    pub(crate) fn remove_inner(&self, seg: &mut Segment, id: u64) -> CoreResult<()> {
        let node_off = self.find_node(seg, id)?;
        if node_off == 0 {
            return Err(CoreError::ObjectNotFound {
                type_name: T::TYPE_NAME,
                id,
            });
        }
        self.erase_node_all(seg, node_off);
        self.on_remove_node(seg, node_off)?;
        self.set_size_field(seg, self.size_field(seg) - 1);
        Ok(())
    }

    // ------------------------------------------------------------------
    // Public surface
    // ------------------------------------------------------------------

    /// Creates a new object. The constructor receives the value with its
    /// assigned `id` already set.
    ///
    /// The constructor runs while the segment lock is held and must not
    /// call back into the database.
    ///
    /// # Errors
    ///
    /// `UniquenessViolation` when the constructed value collides with an
    /// existing key in any index; the container is unchanged.
    pub fn emplace(&self, ctor: impl FnOnce(&mut T)) -> CoreResult<T> {
        self.ensure_writable()?;
        let value = {
            let mut seg = self.segment.write();
            self.emplace_inner(&mut seg, ctor)?
        };
        if let Some(journal) = &self.journal {
            journal.lock().insert(&value)?;
        }
        Ok(value)
    }

    /// Applies `modifier` to the object and repositions it in every
    /// secondary index. The modifier runs while the segment lock is held
    /// and must not call back into the database.
    ///
    /// # Errors
    ///
    /// `UniquenessViolation` when the modified value collides with
    /// another object's key. Recovery is *basic*: when this modify
    /// pushed the session backup the object is restored from it,
    /// otherwise the object is removed and the caller must assume the
    /// object may be gone.
    pub fn modify(&self, obj: &T, modifier: impl FnOnce(&mut T)) -> CoreResult<()> {
        self.ensure_writable()?;
        let id = obj.id();
        let new_value = {
            let mut seg = self.segment.write();
            self.modify_inner(&mut seg, id, modifier)?
        };
        if let Some(journal) = &self.journal {
            journal.lock().modify(id, &new_value)?;
        }
        Ok(())
    }

    /// Removes the object from every index.
    pub fn remove(&self, obj: &T) -> CoreResult<()> {
        self.ensure_writable()?;
        let id = obj.id();
        {
            let mut seg = self.segment.write();
            self.remove_inner(&mut seg, id)?;
        }
        if let Some(journal) = &self.journal {
            journal.lock().remove(id)?;
        }
        Ok(())
    }

    /// Looks up an object by primary key.
    pub fn find(&self, id: u64) -> CoreResult<Option<T>> {
        let seg = self.segment.read();
        let node_off = self.find_node(&seg, id)?;
        if node_off == 0 {
            return Ok(None);
        }
        Ok(Some(Self::decode_node_value(&seg, node_off)?))
    }

    /// Number of live objects.
    pub fn size(&self) -> u64 {
        let seg = self.segment.read();
        self.size_field(&seg)
    }

    /// Whether the container holds no objects.
    pub fn is_empty(&self) -> bool {
        self.size() == 0
    }

    /// Read-only view over one index; slot 0 is the primary.
    pub fn get(&self, slot: usize) -> CoreResult<crate::container::View<'_, T>> {
        if slot as u64 >= Self::index_count() {
            return Err(CoreError::invalid_operation(format!(
                "index slot {slot} out of range for {}",
                T::TYPE_NAME
            )));
        }
        Ok(crate::container::View::new(self, slot))
    }

    /// Read-only view over an index found by its descriptor name.
    pub fn get_by_name(&self, name: &str) -> CoreResult<crate::container::View<'_, T>> {
        if name == "by_id" {
            return self.get(0);
        }
        let slot = T::secondary_indices()
            .iter()
            .position(|def| def.name == name)
            .map(|i| i + 1)
            .ok_or_else(|| {
                CoreError::invalid_operation(format!(
                    "no index named \"{name}\" on {}",
                    T::TYPE_NAME
                ))
            })?;
        Ok(crate::container::View::new(self, slot))
    }

    /// Iterates the primary index in `id` order.
    pub fn iter(&self) -> crate::container::Iter<'_, T> {
        crate::container::View::new(self, 0).iter()
    }

    /// Projects an object into another index: returns the value as seen
    /// through index `slot`, or `None` when the object is not there.
    pub fn project(&self, obj: &T, slot: usize) -> CoreResult<Option<T>> {
        let view = self.get(slot)?;
        let key = if slot == 0 {
            IndexKey::from_u64(obj.id())
        } else {
            (T::secondary_indices()[slot - 1].key)(obj)
        };
        view.find(key)
    }
}

impl<T: Object> std::fmt::Debug for UndoMultiIndex<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UndoMultiIndex")
            .field("type_name", &T::TYPE_NAME)
            .field("root", &self.root)
            .field("read_only", &self.read_only)
            .field("journaled", &self.journal.is_some())
            .finish()
    }
}
