//! Named root directory.
//!
//! A segment hosts one root object per container type, found by a stable
//! string name. The directory is a singly linked list of heap entries
//! `{ next, root_offset, name }` reachable from the manager record.

use crate::error::CoreResult;
use crate::segment::alloc::Allocator;
use crate::segment::Segment;

const NEXT_FIELD: u64 = 0;
const ROOT_FIELD: u64 = 8;
const NAME_LEN_FIELD: u64 = 16;
const NAME_FIELD: u64 = 20;

/// Lookup and registration of named root objects.
pub(crate) struct Directory;

impl Directory {
    /// Finds the root offset registered under `name`.
    pub(crate) fn find(seg: &Segment, name: &str) -> Option<u64> {
        let mut cur = Allocator::dir_head(seg);
        while cur != 0 {
            let len = seg.read_u32(cur + NAME_LEN_FIELD) as usize;
            if seg.slice(cur + NAME_FIELD, len) == name.as_bytes() {
                return Some(seg.read_u64(cur + ROOT_FIELD));
            }
            cur = seg.read_u64(cur + NEXT_FIELD);
        }
        None
    }

    /// Finds the root registered under `name`, constructing it with
    /// `construct` and registering it when absent.
    ///
    /// Returns `(root_offset, constructed)`.
    pub(crate) fn find_or_construct(
        seg: &mut Segment,
        name: &str,
        construct: impl FnOnce(&mut Segment) -> CoreResult<u64>,
    ) -> CoreResult<(u64, bool)> {
        if let Some(root) = Self::find(seg, name) {
            return Ok((root, false));
        }

        let root = construct(seg)?;
        let entry = Allocator::allocate(seg, NAME_FIELD + name.len() as u64)?;
        seg.write_u64(entry + NEXT_FIELD, Allocator::dir_head(seg));
        seg.write_u64(entry + ROOT_FIELD, root);
        seg.write_u32(entry + NAME_LEN_FIELD, name.len() as u32);
        seg.slice_mut(entry + NAME_FIELD, name.len())
            .copy_from_slice(name.as_bytes());
        Allocator::set_dir_head(seg, entry);
        Ok((root, true))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn fresh_segment() -> (tempfile::TempDir, Segment) {
        let dir = tempdir().unwrap();
        let path = dir.path().join("dir.db");
        let size = 1u64 << 20;
        let mut seg = Segment::create(&path, size).unwrap();
        Allocator::init(&mut seg, size);
        (dir, seg)
    }

    #[test]
    fn missing_name_is_none() {
        let (_dir, seg) = fresh_segment();
        assert_eq!(Directory::find(&seg, "account"), None);
    }

    #[test]
    fn construct_then_find() {
        let (_dir, mut seg) = fresh_segment();

        let (root, constructed) =
            Directory::find_or_construct(&mut seg, "account", |seg| Allocator::allocate(seg, 64))
                .unwrap();
        assert!(constructed);
        assert_eq!(Directory::find(&seg, "account"), Some(root));

        let (again, constructed) =
            Directory::find_or_construct(&mut seg, "account", |_| unreachable!()).unwrap();
        assert!(!constructed);
        assert_eq!(again, root);
    }

    #[test]
    fn names_are_independent() {
        let (_dir, mut seg) = fresh_segment();
        let (a, _) =
            Directory::find_or_construct(&mut seg, "account", |seg| Allocator::allocate(seg, 32))
                .unwrap();
        let (b, _) =
            Directory::find_or_construct(&mut seg, "balance", |seg| Allocator::allocate(seg, 32))
                .unwrap();
        assert_ne!(a, b);
        assert_eq!(Directory::find(&seg, "account"), Some(a));
        assert_eq!(Directory::find(&seg, "balance"), Some(b));
        assert_eq!(Directory::find(&seg, "accoun"), None);
    }

    #[test]
    fn directory_survives_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("dir.db");
        let size = 1u64 << 20;

        let root;
        {
            let mut seg = Segment::create(&path, size).unwrap();
            Allocator::init(&mut seg, size);
            root = Directory::find_or_construct(&mut seg, "account", |seg| {
                Allocator::allocate(seg, 64)
            })
            .unwrap()
            .0;
            seg.flush().unwrap();
        }

        let seg = Segment::open_ro(&path).unwrap();
        assert_eq!(Directory::find(&seg, "account"), Some(root));
    }
}
