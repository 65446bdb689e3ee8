//! Undo-capable multi-index containers.
//!
//! A container is one object type's home inside the segment: a tuple of
//! intrusive ordered indices over shared node slots (the primary keyed by
//! `id`, plus the type's secondary indices), a `next_id` counter, and the
//! undo machinery, a deque of `undo_state` records indexing into two
//! singly linked lists of reversal information (`old_values`,
//! `removed_values`).

pub(crate) mod layout;
mod multi;
mod replay;
mod session;
mod undo;
mod view;

pub use multi::UndoMultiIndex;
pub use session::Session;
pub use undo::Delta;
pub use view::{Iter, View};
