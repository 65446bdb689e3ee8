//! Error types for UndoDB core.

use std::io;
use std::path::Path;
use thiserror::Error;

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors that can occur in UndoDB core operations.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Codec error.
    #[error("codec error: {0}")]
    Codec(#[from] undodb_codec::CodecError),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The database file does not exist and the open mode cannot create it.
    #[error("\"{path}\" database file not found")]
    NotFound {
        /// Path of the missing file.
        path: String,
    },

    /// The file is too short to contain a header, or the header is garbage.
    #[error("\"{path}\" database has an invalid header")]
    BadHeader {
        /// Path of the offending file.
        path: String,
    },

    /// The header magic or recorded header size does not match this build.
    #[error("\"{path}\" database has an incompatible version")]
    IncorrectDbVersion {
        /// Path of the offending file.
        path: String,
    },

    /// The segment was created by a different build environment.
    #[error("\"{path}\" database was created on a different environment:\n{environment}")]
    Incompatible {
        /// Path of the offending file.
        path: String,
        /// The stored environment description.
        environment: String,
    },

    /// The on-disk dirty flag is set and the dirty action forbids opening.
    #[error("\"{path}\" database dirty flag set")]
    Dirty {
        /// Path of the offending file.
        path: String,
    },

    /// The file or requested size cannot hold the segment structures.
    #[error("bad database size: {message}")]
    BadSize {
        /// Description of the size problem.
        message: String,
    },

    /// The exclusive file lock could not be acquired.
    #[error("\"{path}\" database could not acquire file lock")]
    NoAccess {
        /// Path of the locked file.
        path: String,
    },

    /// The segment cannot satisfy an allocation request.
    #[error("segment is out of memory: {requested} bytes requested")]
    SegmentFull {
        /// Size of the failed allocation.
        requested: u64,
    },

    /// The on-disk container layout differs from this build's layout.
    #[error("container layout for {type_name} does not match data expected by executable")]
    LayoutMismatch {
        /// Container type name.
        type_name: &'static str,
    },

    /// Cross-container state is inconsistent.
    #[error("corrupted database: {message}")]
    CorruptedDatabase {
        /// Description of the inconsistency.
        message: String,
    },

    /// An insert or modify would duplicate a key in an ordered-unique index.
    #[error("uniqueness constraint violated on index \"{index}\" of {type_name}")]
    UniquenessViolation {
        /// Container type name.
        type_name: &'static str,
        /// Name of the violated index.
        index: &'static str,
    },

    /// A container with this `type_id` is already registered.
    #[error("{type_name}::TYPE_ID is already in use")]
    AlreadyRegistered {
        /// Container type name.
        type_name: &'static str,
    },

    /// A journal record is inconsistent with the segment state.
    #[error("journal replay failed: {message}")]
    JournalReplayError {
        /// Description of the failure.
        message: String,
    },

    /// The object with this id is not in the primary index.
    #[error("object {id} not found in {type_name}")]
    ObjectNotFound {
        /// Container type name.
        type_name: &'static str,
        /// The missing primary key.
        id: u64,
    },

    /// A modifier changed the immutable `id` field.
    #[error("modifier changed the id of a {type_name} object")]
    IdChanged {
        /// Container type name.
        type_name: &'static str,
    },

    /// A write operation was attempted on a read-only database.
    #[error("database is read-only")]
    ReadOnly,

    /// Operation not permitted in the current state.
    #[error("invalid operation: {message}")]
    InvalidOperation {
        /// Description of why the operation is invalid.
        message: String,
    },
}

impl CoreError {
    pub(crate) fn not_found(path: &Path) -> Self {
        Self::NotFound {
            path: path.display().to_string(),
        }
    }

    pub(crate) fn bad_header(path: &Path) -> Self {
        Self::BadHeader {
            path: path.display().to_string(),
        }
    }

    pub(crate) fn incorrect_db_version(path: &Path) -> Self {
        Self::IncorrectDbVersion {
            path: path.display().to_string(),
        }
    }

    pub(crate) fn incompatible(path: &Path, environment: impl Into<String>) -> Self {
        Self::Incompatible {
            path: path.display().to_string(),
            environment: environment.into(),
        }
    }

    pub(crate) fn dirty(path: &Path) -> Self {
        Self::Dirty {
            path: path.display().to_string(),
        }
    }

    pub(crate) fn no_access(path: &Path) -> Self {
        Self::NoAccess {
            path: path.display().to_string(),
        }
    }

    /// Creates a bad-size error.
    pub fn bad_size(message: impl Into<String>) -> Self {
        Self::BadSize {
            message: message.into(),
        }
    }

    /// Creates a corrupted-database error.
    pub fn corrupted(message: impl Into<String>) -> Self {
        Self::CorruptedDatabase {
            message: message.into(),
        }
    }

    /// Creates a journal replay error.
    pub fn journal_replay(message: impl Into<String>) -> Self {
        Self::JournalReplayError {
            message: message.into(),
        }
    }

    /// Creates an invalid-operation error.
    pub fn invalid_operation(message: impl Into<String>) -> Self {
        Self::InvalidOperation {
            message: message.into(),
        }
    }
}
