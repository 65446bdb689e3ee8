//! Scoped undo sessions.

use crate::container::multi::UndoMultiIndex;
use crate::error::CoreResult;
use crate::object::Object;
use tracing::warn;

/// A scope guard over one container's undo session.
///
/// Dropping the session is interpreted as cancellation and performs
/// `undo`; [`Session::push`] disowns that right, making the session's
/// mutations part of the container's durable history (still undoable
/// through the container until committed). [`Session::squash`] merges the
/// session into the enclosing one.
#[must_use = "dropping a session immediately undoes it"]
pub struct Session<'a, T: Object> {
    index: &'a UndoMultiIndex<T>,
    apply: bool,
}

impl<'a, T: Object> Session<'a, T> {
    pub(crate) fn new(index: &'a UndoMultiIndex<T>) -> Self {
        Self { index, apply: true }
    }

    /// Keeps the session's mutations; the drop becomes a no-op.
    pub fn push(mut self) {
        self.apply = false;
    }

    /// Merges this session into the one below it on the undo stack.
    pub fn squash(mut self) -> CoreResult<()> {
        self.apply = false;
        self.index.squash()
    }

    /// Explicitly undoes the session.
    pub fn undo(mut self) -> CoreResult<()> {
        self.apply = false;
        self.index.undo()
    }
}

impl<T: Object> Drop for Session<'_, T> {
    fn drop(&mut self) {
        if self.apply {
            if let Err(error) = self.index.undo() {
                warn!(type_name = T::TYPE_NAME, %error, "undo on session drop failed");
            }
        }
    }
}
