//! # UndoDB Core
//!
//! An embedded, single-process, memory-mapped object store with
//! transactional undo.
//!
//! Objects live in a file-backed segment managed by a best-fit allocator.
//! Each object type gets a multi-index container: a primary unique index
//! keyed by a monotonically assigned `id` plus any number of secondary
//! ordered-unique indices. On top of every container sits a stack of
//! reversible sessions: every insert, modify and remove performed inside
//! a session can be undone to restore the exact prior state. An optional
//! write-ahead journal persists each mutation so a crash between commits
//! can be replayed on restart.
//!
//! The [`Database`] hosts many containers in one mapped segment and
//! coordinates their undo stacks so that all containers always sit on the
//! same revision line.

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod container;
pub mod database;
pub mod environment;
pub mod error;
pub mod index;
mod journal;
pub mod object;
pub mod segment;

pub use container::{Delta, Iter, Session, UndoMultiIndex, View};
pub use database::{Database, DatabaseSession, DirtyAction, OpenMode, OpenOutcome, Options};
pub use environment::Environment;
pub use error::{CoreError, CoreResult};
pub use index::IndexKey;
pub use object::{IndexDef, Object};
