//! Journal record types.

/// Operation tag of a journal record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub(crate) enum JournalOp {
    /// Reserved by the format; never written.
    Create = 1,
    /// A new object (payload: encoded value).
    Insert = 2,
    /// A modification (payload: id + encoded new value).
    Modify = 3,
    /// A removal (payload: id).
    Remove = 4,
    /// A session start (payload: revision after the start).
    StartUndo = 5,
    /// A commit (payload: current revision).
    Commit = 6,
    /// An undo (payload: revision after the undo).
    Undo = 7,
    /// A full unwind (payload: revision after it).
    UndoAll = 8,
    /// An explicit revision move (payload: revision).
    Revision = 9,
}

impl JournalOp {
    pub(crate) fn from_u32(value: u32) -> Option<Self> {
        match value {
            1 => Some(Self::Create),
            2 => Some(Self::Insert),
            3 => Some(Self::Modify),
            4 => Some(Self::Remove),
            5 => Some(Self::StartUndo),
            6 => Some(Self::Commit),
            7 => Some(Self::Undo),
            8 => Some(Self::UndoAll),
            9 => Some(Self::Revision),
            _ => None,
        }
    }

    #[must_use]
    pub(crate) const fn as_u32(self) -> u32 {
        self as u32
    }
}
