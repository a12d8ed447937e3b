//! Storage backend trait definition.
//!
//! The `StorageBackend` trait is the narrow interface the access layer needs
//! from durable storage: open, fetch, identifier lookup, and an atomic commit
//! of inserts, saves, and deletes. SQLite is the shipped implementation; the
//! access manager never depends on it directly.

use std::path::Path;
use uuid::Uuid;

use super::types::{BackendOptions, ChangeSet, StoreMetadata};
use crate::error::Result;
use crate::model::Persisted;

/// Storage backend bound to a single entity kind.
///
/// All implementations must ensure:
/// - `commit` applies a whole change set or none of it
/// - `fetch_all` returns entities in a stable, backend-native order
/// - absence is `Ok(None)`, never an error
///
/// Implementations are synchronous; the access manager moves calls onto the
/// blocking pool. They must be shareable across threads, but callers must not
/// rely on them to order concurrent writers.
pub trait StorageBackend: Send + Sync + 'static {
    /// Open or create the store at `path`.
    ///
    /// # Errors
    ///
    /// Returns `DepotError::BackendOpen` if:
    /// - The location is inaccessible
    /// - The file belongs to another entity kind
    /// - The stored schema is newer, or older with no usable migration plan
    fn open(path: &Path, options: &BackendOptions) -> Result<Self>
    where
        Self: Sized;

    /// Entity kind prefix this backend is bound to.
    fn entity_kind(&self) -> &str;

    /// Store metadata.
    fn metadata(&self) -> Result<StoreMetadata>;

    /// Fetch every entity of kind `E`, in insertion order.
    ///
    /// # Errors
    ///
    /// Returns `DepotError::BackendRead` if the read or decoding fails.
    fn fetch_all<E: Persisted>(&self) -> Result<Vec<E>>;

    /// Fetch one entity by identifier.
    ///
    /// # Returns
    ///
    /// Returns `Ok(Some(entity))` if found, `Ok(None)` if not found.
    fn fetch_by_id<E: Persisted>(&self, id: &Uuid) -> Result<Option<E>>;

    /// Number of stored entities of kind `E`.
    fn count<E: Persisted>(&self) -> Result<usize>;

    /// Durably apply a change set.
    ///
    /// # Errors
    ///
    /// Returns `DepotError::BackendWrite` if any change fails; nothing from
    /// the set is visible afterwards.
    fn commit<E: Persisted>(&self, changes: ChangeSet<E>) -> Result<()>;

    /// Check store integrity.
    ///
    /// Verifies:
    /// - Storage engine consistency
    /// - Required metadata keys
    /// - Every record belongs to this kind and holds a valid document
    fn check_integrity(&self) -> Result<()>;
}
