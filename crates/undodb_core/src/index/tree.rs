//! Intrusive AVL tree over segment offsets.
//!
//! Nodes do not belong to the tree; the tree threads through link blocks
//! embedded in node slots (parent/left/right offsets plus a balance
//! byte), one block per index a node participates in. Offset 0 is the
//! null sentinel: the segment header lives there, so no node can.
//!
//! Balance factors follow the `height(right) - height(left)` convention.
//! Rotations use the general balance-update formulas, which are valid for
//! both the insertion and the deletion retrace (transient values of ±2
//! pass through the balance byte mid-rotation).

use crate::error::CoreResult;
use crate::index::key::IndexKey;
use crate::segment::Segment;

const PARENT: u64 = 0;
const LEFT: u64 = 8;
const RIGHT: u64 = 16;
const BALANCE: u64 = 24;

/// Size of one embedded link block.
pub(crate) const LINKS_SIZE: u64 = 25;

/// Extracts the ordering key of the node at an offset.
pub(crate) type KeyOf<'a> = &'a dyn Fn(&Segment, u64) -> CoreResult<IndexKey>;

/// Outcome of a unique insertion.
pub(crate) enum Inserted {
    /// The node was linked into the tree.
    Yes,
    /// An equal key already exists at this offset; nothing was linked.
    Duplicate(u64),
}

/// A view of one tree: where its root pointer lives, where its link
/// block sits inside a node slot, and how to read a node's key.
pub(crate) struct Tree<'a> {
    /// Segment offset of the `u64` holding the root pointer.
    pub root_field: u64,
    /// Byte offset of this index's link block within a node slot.
    pub links_off: u64,
    /// Key extractor.
    pub key_of: KeyOf<'a>,
}

impl<'a> Tree<'a> {
    pub(crate) fn root(&self, seg: &Segment) -> u64 {
        seg.read_u64(self.root_field)
    }

    fn set_root(&self, seg: &mut Segment, node: u64) {
        seg.write_u64(self.root_field, node);
    }

    fn parent(&self, seg: &Segment, node: u64) -> u64 {
        seg.read_u64(node + self.links_off + PARENT)
    }

    fn set_parent(&self, seg: &mut Segment, node: u64, parent: u64) {
        seg.write_u64(node + self.links_off + PARENT, parent);
    }

    fn left(&self, seg: &Segment, node: u64) -> u64 {
        seg.read_u64(node + self.links_off + LEFT)
    }

    fn set_left(&self, seg: &mut Segment, node: u64, left: u64) {
        seg.write_u64(node + self.links_off + LEFT, left);
    }

    fn right(&self, seg: &Segment, node: u64) -> u64 {
        seg.read_u64(node + self.links_off + RIGHT)
    }

    fn set_right(&self, seg: &mut Segment, node: u64, right: u64) {
        seg.write_u64(node + self.links_off + RIGHT, right);
    }

    fn balance(&self, seg: &Segment, node: u64) -> i8 {
        seg.read_i8(node + self.links_off + BALANCE)
    }

    fn set_balance(&self, seg: &mut Segment, node: u64, balance: i8) {
        seg.write_i8(node + self.links_off + BALANCE, balance);
    }

    fn key(&self, seg: &Segment, node: u64) -> CoreResult<IndexKey> {
        (self.key_of)(seg, node)
    }

    fn replace_child(&self, seg: &mut Segment, parent: u64, old: u64, new: u64) {
        if parent == 0 {
            self.set_root(seg, new);
        } else if self.left(seg, parent) == old {
            self.set_left(seg, parent, new);
        } else {
            self.set_right(seg, parent, new);
        }
    }

    /// Inserts `node`, rejecting an equal key.
    pub(crate) fn insert_unique(&self, seg: &mut Segment, node: u64) -> CoreResult<Inserted> {
        let key = self.key(seg, node)?;
        let mut cur = self.root(seg);
        if cur == 0 {
            self.link_as_root(seg, node);
            return Ok(Inserted::Yes);
        }
        loop {
            let cur_key = self.key(seg, cur)?;
            if key < cur_key {
                let next = self.left(seg, cur);
                if next == 0 {
                    self.link_child(seg, node, cur, true);
                    break;
                }
                cur = next;
            } else if key > cur_key {
                let next = self.right(seg, cur);
                if next == 0 {
                    self.link_child(seg, node, cur, false);
                    break;
                }
                cur = next;
            } else {
                return Ok(Inserted::Duplicate(cur));
            }
        }
        self.retrace_insert(seg, node);
        Ok(Inserted::Yes)
    }

    /// Inserts `node` at its upper-bound position, tolerating equal keys.
    ///
    /// Only the undo engine uses this: repositioning during an undo walk
    /// may pass through transient duplicates that later steps resolve.
    pub(crate) fn insert_equal(&self, seg: &mut Segment, node: u64) -> CoreResult<()> {
        let key = self.key(seg, node)?;
        let mut cur = self.root(seg);
        if cur == 0 {
            self.link_as_root(seg, node);
            return Ok(());
        }
        loop {
            let cur_key = self.key(seg, cur)?;
            if key < cur_key {
                let next = self.left(seg, cur);
                if next == 0 {
                    self.link_child(seg, node, cur, true);
                    break;
                }
                cur = next;
            } else {
                let next = self.right(seg, cur);
                if next == 0 {
                    self.link_child(seg, node, cur, false);
                    break;
                }
                cur = next;
            }
        }
        self.retrace_insert(seg, node);
        Ok(())
    }

    /// Unlinks `node` from the tree.
    pub(crate) fn erase(&self, seg: &mut Segment, node: u64) {
        let left = self.left(seg, node);
        let right = self.right(seg, node);
        let parent = self.parent(seg, node);

        if left == 0 || right == 0 {
            let child = if left != 0 { left } else { right };
            let node_was_left = parent != 0 && self.left(seg, parent) == node;
            self.replace_child(seg, parent, node, child);
            if child != 0 {
                self.set_parent(seg, child, parent);
            }
            self.retrace_delete(seg, parent, node_was_left);
        } else {
            // Two children: the in-order successor takes the node's place.
            let mut succ = right;
            loop {
                let next = self.left(seg, succ);
                if next == 0 {
                    break;
                }
                succ = next;
            }

            let (retrace_from, retrace_left);
            if succ == right {
                retrace_from = succ;
                retrace_left = false;
            } else {
                let sp = self.parent(seg, succ);
                let sr = self.right(seg, succ);
                self.set_left(seg, sp, sr);
                if sr != 0 {
                    self.set_parent(seg, sr, sp);
                }
                self.set_right(seg, succ, right);
                self.set_parent(seg, right, succ);
                retrace_from = sp;
                retrace_left = true;
            }
            self.set_left(seg, succ, left);
            self.set_parent(seg, left, succ);
            self.replace_child(seg, parent, node, succ);
            self.set_parent(seg, succ, parent);
            self.set_balance(seg, succ, self.balance(seg, node));
            self.retrace_delete(seg, retrace_from, retrace_left);
        }
        self.clear_links(seg, node);
    }

    /// Finds the node with an equal key.
    pub(crate) fn find(&self, seg: &Segment, key: &IndexKey) -> CoreResult<u64> {
        let mut cur = self.root(seg);
        while cur != 0 {
            let cur_key = self.key(seg, cur)?;
            if *key < cur_key {
                cur = self.left(seg, cur);
            } else if *key > cur_key {
                cur = self.right(seg, cur);
            } else {
                return Ok(cur);
            }
        }
        Ok(0)
    }

    /// First node whose key is not less than `key`; 0 past the end.
    pub(crate) fn lower_bound(&self, seg: &Segment, key: &IndexKey) -> CoreResult<u64> {
        let mut cur = self.root(seg);
        let mut result = 0;
        while cur != 0 {
            if self.key(seg, cur)? >= *key {
                result = cur;
                cur = self.left(seg, cur);
            } else {
                cur = self.right(seg, cur);
            }
        }
        Ok(result)
    }

    /// First node whose key is greater than `key`; 0 past the end.
    pub(crate) fn upper_bound(&self, seg: &Segment, key: &IndexKey) -> CoreResult<u64> {
        let mut cur = self.root(seg);
        let mut result = 0;
        while cur != 0 {
            if self.key(seg, cur)? > *key {
                result = cur;
                cur = self.left(seg, cur);
            } else {
                cur = self.right(seg, cur);
            }
        }
        Ok(result)
    }

    /// Leftmost node; 0 when empty.
    pub(crate) fn first(&self, seg: &Segment) -> u64 {
        let mut cur = self.root(seg);
        if cur == 0 {
            return 0;
        }
        loop {
            let next = self.left(seg, cur);
            if next == 0 {
                return cur;
            }
            cur = next;
        }
    }

    /// In-order successor; 0 past the end.
    pub(crate) fn next(&self, seg: &Segment, node: u64) -> u64 {
        let right = self.right(seg, node);
        if right != 0 {
            let mut cur = right;
            loop {
                let next = self.left(seg, cur);
                if next == 0 {
                    return cur;
                }
                cur = next;
            }
        }
        let mut cur = node;
        loop {
            let parent = self.parent(seg, cur);
            if parent == 0 {
                return 0;
            }
            if self.right(seg, parent) == cur {
                cur = parent;
            } else {
                return parent;
            }
        }
    }

    /// In-order predecessor; 0 before the beginning.
    pub(crate) fn prev(&self, seg: &Segment, node: u64) -> u64 {
        let left = self.left(seg, node);
        if left != 0 {
            let mut cur = left;
            loop {
                let next = self.right(seg, cur);
                if next == 0 {
                    return cur;
                }
                cur = next;
            }
        }
        let mut cur = node;
        loop {
            let parent = self.parent(seg, cur);
            if parent == 0 {
                return 0;
            }
            if self.left(seg, parent) == cur {
                cur = parent;
            } else {
                return parent;
            }
        }
    }

    /// All node offsets in key order.
    pub(crate) fn collect(&self, seg: &Segment) -> Vec<u64> {
        let mut out = Vec::new();
        let mut cur = self.first(seg);
        while cur != 0 {
            out.push(cur);
            cur = self.next(seg, cur);
        }
        out
    }

    /// All node offsets with keys in `[lower_bound(key), end)`.
    pub(crate) fn collect_from(&self, seg: &Segment, key: &IndexKey) -> CoreResult<Vec<u64>> {
        let mut out = Vec::new();
        let mut cur = self.lower_bound(seg, key)?;
        while cur != 0 {
            out.push(cur);
            cur = self.next(seg, cur);
        }
        Ok(out)
    }

    fn link_as_root(&self, seg: &mut Segment, node: u64) {
        self.clear_links(seg, node);
        self.set_root(seg, node);
    }

    fn link_child(&self, seg: &mut Segment, node: u64, parent: u64, as_left: bool) {
        self.clear_links(seg, node);
        self.set_parent(seg, node, parent);
        if as_left {
            self.set_left(seg, parent, node);
        } else {
            self.set_right(seg, parent, node);
        }
    }

    fn clear_links(&self, seg: &mut Segment, node: u64) {
        self.set_parent(seg, node, 0);
        self.set_left(seg, node, 0);
        self.set_right(seg, node, 0);
        self.set_balance(seg, node, 0);
    }

    fn rotate_left(&self, seg: &mut Segment, x: u64) -> u64 {
        let y = self.right(seg, x);
        let t = self.left(seg, y);
        self.set_right(seg, x, t);
        if t != 0 {
            self.set_parent(seg, t, x);
        }
        let p = self.parent(seg, x);
        self.set_parent(seg, y, p);
        self.replace_child(seg, p, x, y);
        self.set_left(seg, y, x);
        self.set_parent(seg, x, y);

        let bx = self.balance(seg, x);
        let by = self.balance(seg, y);
        let nbx = bx - 1 - by.max(0);
        let nby = by - 1 + nbx.min(0);
        self.set_balance(seg, x, nbx);
        self.set_balance(seg, y, nby);
        y
    }

    fn rotate_right(&self, seg: &mut Segment, x: u64) -> u64 {
        let y = self.left(seg, x);
        let t = self.right(seg, y);
        self.set_left(seg, x, t);
        if t != 0 {
            self.set_parent(seg, t, x);
        }
        let p = self.parent(seg, x);
        self.set_parent(seg, y, p);
        self.replace_child(seg, p, x, y);
        self.set_right(seg, y, x);
        self.set_parent(seg, x, y);

        let bx = self.balance(seg, x);
        let by = self.balance(seg, y);
        let nbx = bx + 1 - by.min(0);
        let nby = by + 1 + nbx.max(0);
        self.set_balance(seg, x, nbx);
        self.set_balance(seg, y, nby);
        y
    }

    fn retrace_insert(&self, seg: &mut Segment, mut child: u64) {
        loop {
            let parent = self.parent(seg, child);
            if parent == 0 {
                return;
            }
            let mut bf = self.balance(seg, parent);
            bf += if self.left(seg, parent) == child { -1 } else { 1 };
            self.set_balance(seg, parent, bf);
            match bf {
                0 => return,
                -1 | 1 => {
                    child = parent;
                }
                2 => {
                    let y = self.right(seg, parent);
                    if self.balance(seg, y) < 0 {
                        self.rotate_right(seg, y);
                    }
                    self.rotate_left(seg, parent);
                    return;
                }
                _ => {
                    let y = self.left(seg, parent);
                    if self.balance(seg, y) > 0 {
                        self.rotate_left(seg, y);
                    }
                    self.rotate_right(seg, parent);
                    return;
                }
            }
        }
    }

    fn retrace_delete(&self, seg: &mut Segment, mut parent: u64, mut child_was_left: bool) {
        while parent != 0 {
            let mut bf = self.balance(seg, parent);
            bf += if child_was_left { 1 } else { -1 };
            let gp = self.parent(seg, parent);
            let parent_was_left = gp != 0 && self.left(seg, gp) == parent;
            match bf {
                -1 | 1 => {
                    self.set_balance(seg, parent, bf);
                    return;
                }
                0 => {
                    self.set_balance(seg, parent, 0);
                }
                _ => {
                    self.set_balance(seg, parent, bf);
                    let new_root = if bf == 2 {
                        let y = self.right(seg, parent);
                        if self.balance(seg, y) < 0 {
                            self.rotate_right(seg, y);
                        }
                        self.rotate_left(seg, parent)
                    } else {
                        let y = self.left(seg, parent);
                        if self.balance(seg, y) > 0 {
                            self.rotate_left(seg, y);
                        }
                        self.rotate_right(seg, parent)
                    };
                    if self.balance(seg, new_root) != 0 {
                        return;
                    }
                }
            }
            parent = gp;
            child_was_left = parent_was_left;
        }
    }
}
