//! Read-only index views.

use crate::container::multi::UndoMultiIndex;
use crate::error::CoreResult;
use crate::index::IndexKey;
use crate::object::Object;
use crate::segment::Segment;

/// A read-only view over one index of a container.
///
/// Lookups accept anything convertible into an [`IndexKey`], so an index
/// keyed by `String` can be probed with a `&str` (the compatible-key
/// behavior of the ordered indices).
pub struct View<'a, T: Object> {
    index: &'a UndoMultiIndex<T>,
    slot: usize,
}

impl<'a, T: Object> View<'a, T> {
    pub(crate) fn new(index: &'a UndoMultiIndex<T>, slot: usize) -> Self {
        Self { index, slot }
    }

    fn lookup(
        &self,
        search: impl FnOnce(&crate::index::tree::Tree<'_>, &Segment) -> CoreResult<u64>,
    ) -> CoreResult<Option<T>> {
        let slot = self.slot;
        let seg = self.index.segment.read();
        let key_of = move |seg: &Segment, n: u64| UndoMultiIndex::<T>::node_key(seg, n, slot);
        let tree = self.index.tree_at(slot, &key_of);
        let node_off = search(&tree, &seg)?;
        if node_off == 0 {
            return Ok(None);
        }
        Ok(Some(UndoMultiIndex::<T>::decode_node_value(&seg, node_off)?))
    }

    /// Finds the value with this exact key.
    pub fn find(&self, key: impl Into<IndexKey>) -> CoreResult<Option<T>> {
        let key = key.into();
        self.lookup(|tree, seg| tree.find(seg, &key))
    }

    /// First value whose key is not less than `key`.
    pub fn lower_bound(&self, key: impl Into<IndexKey>) -> CoreResult<Option<T>> {
        let key = key.into();
        self.lookup(|tree, seg| tree.lower_bound(seg, &key))
    }

    /// First value whose key is greater than `key`.
    pub fn upper_bound(&self, key: impl Into<IndexKey>) -> CoreResult<Option<T>> {
        let key = key.into();
        self.lookup(|tree, seg| tree.upper_bound(seg, &key))
    }

    /// All values with keys in `[from, to)`, in key order.
    pub fn range(
        &self,
        from: impl Into<IndexKey>,
        to: impl Into<IndexKey>,
    ) -> CoreResult<Vec<T>> {
        let from = from.into();
        let to = to.into();
        let slot = self.slot;
        let seg = self.index.segment.read();
        let key_of = move |seg: &Segment, n: u64| UndoMultiIndex::<T>::node_key(seg, n, slot);
        let tree = self.index.tree_at(slot, &key_of);

        let mut out = Vec::new();
        let mut cur = tree.lower_bound(&seg, &from)?;
        while cur != 0 {
            if UndoMultiIndex::<T>::node_key(&seg, cur, slot)? >= to {
                break;
            }
            out.push(UndoMultiIndex::<T>::decode_node_value(&seg, cur)?);
            cur = tree.next(&seg, cur);
        }
        Ok(out)
    }

    /// Streaming iteration in key order.
    ///
    /// The iterator resolves its position lazily; mutating the container
    /// while iterating is not supported (positions may be freed by
    /// `remove`, `undo` or `commit`).
    pub fn iter(&self) -> Iter<'a, T> {
        let slot = self.slot;
        let seg = self.index.segment.read();
        let key_of = move |seg: &Segment, n: u64| UndoMultiIndex::<T>::node_key(seg, n, slot);
        let cursor = self.index.tree_at(slot, &key_of).first(&seg);
        Iter {
            index: self.index,
            slot,
            cursor,
        }
    }

    /// All values in key order.
    pub fn collect(&self) -> CoreResult<Vec<T>> {
        self.iter().collect()
    }
}

/// Streaming iterator over one index.
pub struct Iter<'a, T: Object> {
    index: &'a UndoMultiIndex<T>,
    slot: usize,
    cursor: u64,
}

impl<T: Object> Iterator for Iter<'_, T> {
    type Item = CoreResult<T>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.cursor == 0 {
            return None;
        }
        let slot = self.slot;
        let seg = self.index.segment.read();
        let value = UndoMultiIndex::<T>::decode_node_value(&seg, self.cursor);
        let key_of = move |seg: &Segment, n: u64| UndoMultiIndex::<T>::node_key(seg, n, slot);
        self.cursor = self.index.tree_at(slot, &key_of).next(&seg, self.cursor);
        Some(value)
    }
}
