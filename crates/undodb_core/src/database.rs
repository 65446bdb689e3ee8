//! Database façade and container registry.

use crate::container::UndoMultiIndex;
use crate::error::{CoreError, CoreResult};
use crate::journal::Journal;
use crate::object::Object;
use crate::segment::{Allocator, Directory, Header, Segment, HEADER_SIZE, MANAGER_SIZE};
use parking_lot::{Mutex, RwLock};
use std::any::Any;
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, warn};

const MIB: u64 = 1 << 20;

/// Smallest file that can hold the header, the allocator bookkeeping and
/// a usable heap.
const MIN_FILE_SIZE: u64 = HEADER_SIZE as u64 + MANAGER_SIZE + 2046;

/// Database open mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenMode {
    /// Map the segment read-only; no lock is taken.
    ReadOnly,
    /// Map read-write with per-container journaling.
    ReadWrite,
    /// Map read-write without journaling.
    ReadWriteNoJournal,
}

/// What to do when the on-disk dirty flag is set at open.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DirtyAction {
    /// Fail with [`CoreError::Dirty`].
    Fail,
    /// Open anyway; the outcome reports [`OpenOutcome::Corrupted`].
    Allow,
    /// Recreate the segment from scratch (writable modes only).
    Reset,
}

/// The state of the database after opening.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenOutcome {
    /// The file was opened with no issues.
    Good,
    /// A new database file was created.
    Created,
    /// The dirty flag was set; data might be corrupted.
    Corrupted,
    /// The dirty flag was set; the segment was reset to a clean state.
    Reset,
}

/// Open options.
///
/// # Example
///
/// ```rust,ignore
/// let options = Options::new()
///     .mode(OpenMode::ReadWrite)
///     .size(4 << 20)
///     .dirty_action(DirtyAction::Reset);
/// let db = Database::open_with(Path::new("/tmp/t1.db"), options)?;
/// ```
#[derive(Debug, Clone, Copy)]
pub struct Options {
    /// Open mode; defaults to read-only.
    pub mode: OpenMode,
    /// Requested segment size in bytes, rounded up to a 1 MiB multiple.
    /// A writable open of an existing file grows it to this size.
    pub size: u64,
    /// Dirty-flag handling; defaults to failing.
    pub dirty_action: DirtyAction,
}

impl Options {
    /// Default options: read-only, minimal size, fail on dirty.
    #[must_use]
    pub fn new() -> Self {
        Self {
            mode: OpenMode::ReadOnly,
            size: 0,
            dirty_action: DirtyAction::Fail,
        }
    }

    /// Sets the open mode.
    #[must_use]
    pub fn mode(mut self, mode: OpenMode) -> Self {
        self.mode = mode;
        self
    }

    /// Sets the requested segment size.
    #[must_use]
    pub fn size(mut self, size: u64) -> Self {
        self.size = size;
        self
    }

    /// Sets the dirty-flag action.
    #[must_use]
    pub fn dirty_action(mut self, action: DirtyAction) -> Self {
        self.dirty_action = action;
        self
    }
}

impl Default for Options {
    fn default() -> Self {
        Self::new()
    }
}

/// Capability surface every registered container exposes to the
/// database, independent of its object type.
pub(crate) trait AnyContainer: Send + Sync {
    fn type_name(&self) -> &'static str;
    fn start_undo(&self) -> CoreResult<i64>;
    fn undo(&self) -> CoreResult<()>;
    fn squash(&self) -> CoreResult<()>;
    fn commit(&self, revision: i64) -> CoreResult<i64>;
    fn undo_all(&self) -> CoreResult<()>;
    fn set_revision(&self, revision: u64) -> CoreResult<()>;
    fn revision(&self) -> i64;
    fn undo_stack_revision_range(&self) -> (i64, i64);
    fn as_any_arc(self: Arc<Self>) -> Arc<dyn Any + Send + Sync>;
}

impl<T: Object> AnyContainer for UndoMultiIndex<T> {
    fn type_name(&self) -> &'static str {
        T::TYPE_NAME
    }

    fn start_undo(&self) -> CoreResult<i64> {
        self.start_undo_raw()
    }

    fn undo(&self) -> CoreResult<()> {
        UndoMultiIndex::undo(self)
    }

    fn squash(&self) -> CoreResult<()> {
        UndoMultiIndex::squash(self)
    }

    fn commit(&self, revision: i64) -> CoreResult<i64> {
        UndoMultiIndex::commit(self, revision)
    }

    fn undo_all(&self) -> CoreResult<()> {
        UndoMultiIndex::undo_all(self)
    }

    fn set_revision(&self, revision: u64) -> CoreResult<()> {
        UndoMultiIndex::set_revision(self, revision)
    }

    fn revision(&self) -> i64 {
        UndoMultiIndex::revision(self)
    }

    fn undo_stack_revision_range(&self) -> (i64, i64) {
        UndoMultiIndex::undo_stack_revision_range(self)
    }

    fn as_any_arc(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }
}

#[derive(Default)]
struct Registry {
    /// Containers in registration order, for coordinated fan-out.
    list: Vec<Arc<dyn AnyContainer>>,
    /// Sparse constant-time lookup by `type_id` (capacity ≤ 2^16).
    map: Vec<Option<Arc<dyn AnyContainer>>>,
}

/// An embedded database: one mapped segment hosting many undo-capable
/// multi-index containers on a single revision line.
///
/// # Opening
///
/// ```rust,ignore
/// use undodb_core::{Database, DirtyAction, OpenMode};
///
/// let db = Database::open(
///     Path::new("/tmp/t1.db"),
///     OpenMode::ReadWrite,
///     4 << 20,
///     DirtyAction::Fail,
/// )?;
/// let accounts = db.add_index::<Account>()?;
/// ```
///
/// # Coordinated sessions
///
/// [`Database::start_undo_session`] opens a session on every registered
/// container; the returned guard undoes all of them on drop unless
/// [`DatabaseSession::push`] is called. All containers therefore always
/// agree on `revision()` and the undo-stack depth.
pub struct Database {
    segment: Arc<RwLock<Segment>>,
    registry: Mutex<Registry>,
    mode: OpenMode,
    outcome: OpenOutcome,
    path: PathBuf,
}

impl Database {
    /// Opens a database file.
    ///
    /// # Errors
    ///
    /// - `NotFound`: read-only open of a missing file
    /// - `BadHeader`, `IncorrectDbVersion`, `Incompatible`: header fails
    ///   validation against this build
    /// - `Dirty`: dirty flag set and `dirty_action` is `Fail` (or the
    ///   mode cannot reset)
    /// - `BadSize`: existing file too small to be a segment
    /// - `NoAccess`: another process holds the exclusive lock
    pub fn open(
        path: &Path,
        mode: OpenMode,
        size: u64,
        dirty_action: DirtyAction,
    ) -> CoreResult<Self> {
        Self::open_with(
            path,
            Options::new().mode(mode).size(size).dirty_action(dirty_action),
        )
    }

    /// Opens a database file with [`Options`].
    pub fn open_with(path: &Path, options: Options) -> CoreResult<Self> {
        let writable = options.mode != OpenMode::ReadOnly;
        let exists = path.exists();

        if !writable && !exists {
            return Err(CoreError::not_found(path));
        }

        let mut outcome = OpenOutcome::Good;
        if exists {
            let dirty = Self::validate_file_header(path)?;
            if dirty {
                match options.dirty_action {
                    DirtyAction::Allow => outcome = OpenOutcome::Corrupted,
                    DirtyAction::Reset if writable => outcome = OpenOutcome::Reset,
                    _ => return Err(CoreError::dirty(path)),
                }
            }
        } else {
            outcome = OpenOutcome::Created;
        }

        let requested = options.size.max(MIN_FILE_SIZE).div_ceil(MIB) * MIB;

        let mut segment = if !exists || outcome == OpenOutcome::Reset {
            let mut seg = Segment::create(path, requested)?;
            seg.write_header(&Header::new());
            Allocator::init(&mut seg, requested);
            debug!(path = %path.display(), size = requested, "segment initialized");
            seg
        } else if writable {
            let existing = std::fs::metadata(path)?.len();
            let mut seg = Segment::open_rw(path)?;
            if requested > existing {
                seg.grow(requested)?;
                Allocator::grow(&mut seg, existing, requested);
                debug!(path = %path.display(), from = existing, to = requested, "segment grown");
            }
            seg
        } else {
            Segment::open_ro(path)?
        };

        if writable {
            segment.lock_exclusive()?;
            segment.set_dirty()?;
        }

        Ok(Self {
            segment: Arc::new(RwLock::new(segment)),
            registry: Mutex::new(Registry::default()),
            mode: options.mode,
            outcome,
            path: path.to_path_buf(),
        })
    }

    /// Validates the stored header before mapping; returns the dirty flag.
    fn validate_file_header(path: &Path) -> CoreResult<bool> {
        let metadata = std::fs::metadata(path)?;
        if metadata.len() < MIN_FILE_SIZE {
            return Err(CoreError::bad_size(format!(
                "\"{}\" is {} bytes, smaller than the minimum segment of {} bytes",
                path.display(),
                metadata.len(),
                MIN_FILE_SIZE
            )));
        }

        let mut file = File::open(path)?;
        let mut bytes = [0u8; HEADER_SIZE as usize];
        if file.read_exact(&mut bytes).is_err() {
            return Err(CoreError::bad_header(path));
        }
        let header = Header::decode(&bytes, path)?;
        let dirty = header.validate(path)?;
        Ok(dirty)
    }

    // ------------------------------------------------------------------
    // Container hosting
    // ------------------------------------------------------------------

    /// Finds or constructs the container for `T` in the segment,
    /// validates its layout, replays its journal when the segment is
    /// fresh, aligns its revision range with the other containers, and
    /// registers it.
    pub fn add_index<T: Object>(&self) -> CoreResult<Arc<UndoMultiIndex<T>>> {
        let mut registry = self.registry.lock();
        let type_id = T::TYPE_ID as usize;
        if registry
            .map
            .get(type_id)
            .and_then(|slot| slot.as_ref())
            .is_some()
        {
            return Err(CoreError::AlreadyRegistered {
                type_name: T::TYPE_NAME,
            });
        }

        let read_only = self.mode == OpenMode::ReadOnly;
        let (root, first_time) = {
            let mut seg = self.segment.write();
            if read_only {
                match Directory::find(&seg, T::TYPE_NAME) {
                    Some(root) => (root, false),
                    None => {
                        return Err(CoreError::invalid_operation(format!(
                            "unable to find index for {} in read only database",
                            T::TYPE_NAME
                        )))
                    }
                }
            } else {
                Directory::find_or_construct(&mut seg, T::TYPE_NAME, |seg| {
                    UndoMultiIndex::<T>::construct_root(seg)
                })?
            }
        };

        {
            let seg = self.segment.read();
            UndoMultiIndex::<T>::validate_layout(&seg, root)?;
        }

        let mut container = UndoMultiIndex::<T>::new(self.segment.clone(), root, read_only);

        if self.mode == OpenMode::ReadWrite {
            let journal_path = self.journal_path(T::TYPE_NAME);
            let mut journal = Journal::open(&journal_path)?;
            if matches!(self.outcome, OpenOutcome::Created | OpenOutcome::Reset) {
                let mut seg = self.segment.write();
                journal.recover(|op, payload| {
                    container.apply_journal_record(&mut seg, op, payload)
                })?;
                debug!(
                    type_name = T::TYPE_NAME,
                    revision = container.revision_field(&seg),
                    "journal replayed"
                );
            }
            container.attach_journal(journal);
        }

        let container = Arc::new(container);

        // The new container must sit on the database's revision line.
        if let Some(first) = registry.list.first() {
            let expected = first.undo_stack_revision_range();
            let got = container.undo_stack_revision_range();
            if got != expected {
                if !first_time {
                    return Err(CoreError::corrupted(format!(
                        "existing index for {} has an undo stack (revision range \
                         [{}, {}]) that is inconsistent with other indices in the \
                         database (revision range [{}, {}])",
                        T::TYPE_NAME, got.0, got.1, expected.0, expected.1
                    )));
                }
                if read_only {
                    return Err(CoreError::corrupted(format!(
                        "new index for {} requires an undo stack consistent with \
                         other indices in the database; cannot fix in read-only mode",
                        T::TYPE_NAME
                    )));
                }
                container.set_revision(expected.0 as u64)?;
                while container.revision() < expected.1 {
                    container.start_undo_raw()?;
                }
            }
        }

        let any: Arc<dyn AnyContainer> = container.clone();
        if registry.map.len() <= type_id {
            registry.map.resize_with(type_id + 1, || None);
        }
        registry.map[type_id] = Some(any.clone());
        registry.list.push(any);
        Ok(container)
    }

    /// Returns the registered container for `T`.
    pub fn get<T: Object>(&self) -> CoreResult<Arc<UndoMultiIndex<T>>> {
        let registry = self.registry.lock();
        let any = registry
            .map
            .get(T::TYPE_ID as usize)
            .and_then(|slot| slot.as_ref())
            .cloned()
            .ok_or_else(|| {
                CoreError::invalid_operation(format!("index for {} not registered", T::TYPE_NAME))
            })?;
        any.as_any_arc()
            .downcast::<UndoMultiIndex<T>>()
            .map_err(|_| CoreError::AlreadyRegistered {
                type_name: T::TYPE_NAME,
            })
    }

    fn journal_path(&self, type_name: &str) -> PathBuf {
        PathBuf::from(format!("{}.{type_name}.journal", self.path.display()))
    }

    // ------------------------------------------------------------------
    // Coordinated session operations
    // ------------------------------------------------------------------

    /// Opens a session on every registered container.
    pub fn start_undo_session(&self) -> CoreResult<DatabaseSession> {
        let list = self.registry.lock().list.clone();
        let mut started: Vec<Arc<dyn AnyContainer>> = Vec::with_capacity(list.len());
        for container in list {
            match container.start_undo() {
                Ok(_) => started.push(container),
                Err(error) => {
                    for opened in started.iter().rev() {
                        if let Err(undo_error) = opened.undo() {
                            warn!(%undo_error, "failed to unwind a partially started session");
                        }
                    }
                    return Err(error);
                }
            }
        }
        Ok(DatabaseSession {
            containers: started,
            apply: true,
        })
    }

    /// The database revision: the revision of any registered container
    /// (they are kept equal), or -1 when none is registered.
    pub fn revision(&self) -> i64 {
        let registry = self.registry.lock();
        match registry.list.first() {
            Some(first) => first.revision(),
            None => -1,
        }
    }

    /// Undoes the top session of every container.
    pub fn undo(&self) -> CoreResult<()> {
        for container in &self.registry.lock().list {
            container.undo()?;
        }
        Ok(())
    }

    /// Squashes the top two sessions of every container.
    pub fn squash(&self) -> CoreResult<()> {
        for container in &self.registry.lock().list {
            container.squash()?;
        }
        Ok(())
    }

    /// Discards undo history at or below `revision` in every container.
    pub fn commit(&self, revision: i64) -> CoreResult<()> {
        for container in &self.registry.lock().list {
            container.commit(revision)?;
        }
        Ok(())
    }

    /// Unwinds every container's whole undo stack.
    pub fn undo_all(&self) -> CoreResult<()> {
        for container in &self.registry.lock().list {
            container.undo_all()?;
        }
        Ok(())
    }

    /// Moves every container to `revision` (empty stacks only).
    pub fn set_revision(&self, revision: u64) -> CoreResult<()> {
        for container in &self.registry.lock().list {
            container.set_revision(revision)?;
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Introspection
    // ------------------------------------------------------------------

    /// Free bytes in the segment heap.
    pub fn get_free_memory(&self) -> u64 {
        Allocator::free_memory(&self.segment.read())
    }

    /// Used bytes in the segment.
    pub fn get_used_memory(&self) -> u64 {
        self.get_segment_size() - self.get_free_memory()
    }

    /// Total segment size in bytes.
    pub fn get_segment_size(&self) -> u64 {
        Allocator::segment_size(&self.segment.read())
    }

    /// Whether the database was opened read-only.
    #[must_use]
    pub fn is_read_only(&self) -> bool {
        self.mode == OpenMode::ReadOnly
    }

    /// Whether the segment was created (or reset) by this open.
    #[must_use]
    pub fn was_created(&self) -> bool {
        matches!(self.outcome, OpenOutcome::Created | OpenOutcome::Reset)
    }

    /// Whether the segment was opened dirty and left as-is.
    #[must_use]
    pub fn is_corrupted(&self) -> bool {
        self.outcome == OpenOutcome::Corrupted
    }

    /// Whether the segment was opened dirty and reset.
    #[must_use]
    pub fn was_corrupted(&self) -> bool {
        self.outcome == OpenOutcome::Reset
    }

    /// The open mode.
    #[must_use]
    pub fn mode(&self) -> OpenMode {
        self.mode
    }

    /// The open outcome.
    #[must_use]
    pub fn outcome(&self) -> OpenOutcome {
        self.outcome
    }

    /// Path of the segment file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Flushes the segment and clears the dirty flag.
    ///
    /// Called automatically on drop; exposed for explicit clean points.
    pub fn flush(&self) -> CoreResult<()> {
        if self.mode == OpenMode::ReadOnly {
            return Ok(());
        }
        let mut seg = self.segment.write();
        seg.flush()?;
        seg.clear_dirty()
    }
}

impl Drop for Database {
    fn drop(&mut self) {
        if let Err(error) = self.flush() {
            warn!(path = %self.path.display(), %error, "flush on close failed");
        }
    }
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database")
            .field("path", &self.path)
            .field("mode", &self.mode)
            .field("outcome", &self.outcome)
            .field("revision", &self.revision())
            .finish_non_exhaustive()
    }
}

/// A coordinated session across every container of a database.
///
/// Dropping the value undoes the per-container sessions in reverse
/// registration order; [`DatabaseSession::push`] keeps them.
#[must_use = "dropping a database session immediately undoes it"]
pub struct DatabaseSession {
    containers: Vec<Arc<dyn AnyContainer>>,
    apply: bool,
}

impl DatabaseSession {
    /// Keeps the sessions' mutations.
    pub fn push(mut self) {
        self.apply = false;
    }

    /// Merges the sessions into the ones below them.
    pub fn squash(mut self) -> CoreResult<()> {
        self.apply = false;
        for container in &self.containers {
            container.squash()?;
        }
        Ok(())
    }

    /// Explicitly undoes the sessions.
    pub fn undo(mut self) -> CoreResult<()> {
        self.apply = false;
        for container in self.containers.iter().rev() {
            container.undo()?;
        }
        Ok(())
    }
}

impl Drop for DatabaseSession {
    fn drop(&mut self) {
        if self.apply {
            for container in self.containers.iter().rev() {
                if let Err(error) = container.undo() {
                    warn!(
                        type_name = container.type_name(),
                        %error,
                        "undo on database session drop failed"
                    );
                }
            }
        }
    }
}
