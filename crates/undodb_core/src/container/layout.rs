//! On-segment record layouts for containers.
//!
//! All references are absolute segment offsets; 0 is the null sentinel
//! throughout. Integers are little-endian.

use crate::index::tree::LINKS_SIZE;

/// Flag value marking a node that sits in `removed_values`. The values
/// 0, 1 and -1 are reserved for tree bookkeeping in the original design,
/// so the sentinel is 2.
pub(crate) const FLAG_ERASED: u8 = 2;

/// Container root record.
///
/// ```text
/// u32 value_size        layout fence: size_of::<T>() at construction
/// u32 node_size         layout fence: node slot size at construction
/// u16 index_count       layout fence: 1 + number of secondary indices
/// u16 type_id
/// u32 reserved
/// u64 next_id
/// i64 revision
/// u64 monotonic_revision
/// u64 size
/// u64 undo_head         oldest undo_state
/// u64 undo_tail         newest undo_state
/// u64 undo_len
/// u64 old_values_head
/// u64 removed_values_head
/// u64 index_roots[index_count]
/// ```
pub(crate) mod root {
    pub(crate) const VALUE_SIZE: u64 = 0;
    pub(crate) const NODE_SIZE: u64 = 4;
    pub(crate) const INDEX_COUNT: u64 = 8;
    pub(crate) const TYPE_ID: u64 = 10;
    pub(crate) const NEXT_ID: u64 = 16;
    pub(crate) const REVISION: u64 = 24;
    pub(crate) const MONOTONIC: u64 = 32;
    pub(crate) const SIZE: u64 = 40;
    pub(crate) const UNDO_HEAD: u64 = 48;
    pub(crate) const UNDO_TAIL: u64 = 56;
    pub(crate) const UNDO_LEN: u64 = 64;
    pub(crate) const OLD_HEAD: u64 = 72;
    pub(crate) const REMOVED_HEAD: u64 = 80;
    pub(crate) const INDEX_ROOTS: u64 = 88;

    pub(crate) const fn record_size(index_count: u64) -> u64 {
        INDEX_ROOTS + 8 * index_count
    }
}

/// Node slot.
///
/// The encoded value lives in a separate heap block so that a value that
/// outgrows its capacity can move without touching any index links.
///
/// ```text
/// u64 id
/// u64 mtime             monotonic revision at last create/modify
/// u8  flags             FLAG_ERASED when parked in removed_values
/// links[index_count]    parent u64, left u64, right u64, balance i8
/// u64 value_off
/// u32 value_len
/// u32 value_cap
/// ```
pub(crate) mod node {
    use super::LINKS_SIZE;

    pub(crate) const ID: u64 = 0;
    pub(crate) const MTIME: u64 = 8;
    pub(crate) const FLAGS: u64 = 16;
    pub(crate) const LINKS: u64 = 17;

    pub(crate) const fn links_off(slot: u64) -> u64 {
        LINKS + LINKS_SIZE * slot
    }

    pub(crate) const fn value_off_field(index_count: u64) -> u64 {
        LINKS + LINKS_SIZE * index_count
    }

    pub(crate) const fn value_len_field(index_count: u64) -> u64 {
        value_off_field(index_count) + 8
    }

    pub(crate) const fn value_cap_field(index_count: u64) -> u64 {
        value_off_field(index_count) + 12
    }

    pub(crate) const fn slot_size(index_count: u64) -> u64 {
        value_off_field(index_count) + 16
    }
}

/// `undo_state` deque record (doubly linked; head oldest, tail newest).
pub(crate) mod undo_state {
    pub(crate) const PREV: u64 = 0;
    pub(crate) const NEXT: u64 = 8;
    pub(crate) const OLD_HEAD_AT_START: u64 = 16;
    pub(crate) const REMOVED_HEAD_AT_START: u64 = 24;
    pub(crate) const OLD_NEXT_ID: u64 = 32;
    pub(crate) const CTIME: u64 = 40;
    pub(crate) const RECORD_SIZE: u64 = 48;
}

/// `old_values` list record: a pre-modification copy plus a back pointer
/// to the live node it shadows.
pub(crate) mod old_node {
    pub(crate) const NEXT: u64 = 0;
    pub(crate) const CURRENT: u64 = 8;
    pub(crate) const MTIME: u64 = 16;
    pub(crate) const VALUE_OFF: u64 = 24;
    pub(crate) const VALUE_LEN: u64 = 32;
    pub(crate) const RECORD_SIZE: u64 = 40;
}

/// `removed_values` list record.
pub(crate) mod removed_entry {
    pub(crate) const NEXT: u64 = 0;
    pub(crate) const NODE: u64 = 8;
    pub(crate) const RECORD_SIZE: u64 = 16;
}
