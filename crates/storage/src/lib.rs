//! Persistence backends for teamprog.
//!
//! This crate provides the [`Backend`] trait the progress engine persists
//! through, an in-memory implementation, a JSON file implementation and, with
//! the `sqlite` feature, an SQLite implementation.

#![warn(missing_docs)]

pub mod trait_;
pub mod memory;
#[cfg(feature = "json")]
pub mod json_storage;
#[cfg(feature = "sqlite")]
pub mod sqlite_storage;

pub use trait_::{Backend, PendingReward, Result, StorageError};
pub use memory::MemoryBackend;
#[cfg(feature = "json")]
pub use json_storage::JsonBackend;
#[cfg(feature = "sqlite")]
pub use sqlite_storage::SqliteBackend;
