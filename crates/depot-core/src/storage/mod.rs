//! Storage abstraction for Depot.
//!
//! This module defines the `StorageBackend` trait and the types that cross it.
//!
//! ## Architecture
//!
//! The access layer is backend-agnostic:
//! - SQLite, one file per entity kind (`<directory>/<prefix>.sqlite`)
//! - Anything else that can fetch, look up by id, and commit atomically
//!
//! Backends store entities; they do not validate them and they do not order
//! concurrent writers. Both are the access manager's job.

mod row;
pub mod sqlite;
pub mod traits;
pub mod types;

// Re-export public types
pub use sqlite::SqliteBackend;
pub use traits::StorageBackend;
pub use types::{BackendOptions, Change, ChangeSet, StoreMetadata};
