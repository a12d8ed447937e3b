//! Core data types for the storage layer.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::migration::MigrationPlan;
use crate::model::Persisted;

/// Metadata stamped into every store file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreMetadata {
    /// On-disk format version (e.g., "0.1")
    pub format_version: String,

    /// Entity kind prefix this file belongs to
    pub entity_kind: String,

    /// Schema version of the stored documents
    pub schema_version: u32,

    /// When this store was created
    pub created_at: DateTime<Utc>,

    /// Last commit timestamp (informational)
    pub last_modified: DateTime<Utc>,
}

/// Parameters for opening a backend for one entity kind.
#[derive(Clone)]
pub struct BackendOptions {
    /// Entity kind prefix, taken from `Persisted::FILE_PREFIX`
    pub entity_kind: String,

    /// Current schema version, taken from `Persisted::SCHEMA_VERSION`
    pub schema_version: u32,

    /// How long SQLite waits on a locked file before failing
    pub busy_timeout: Duration,

    /// Applied when the stored schema is older than `schema_version`
    pub migration: Option<Arc<dyn MigrationPlan>>,
}

impl BackendOptions {
    pub fn for_entity<E: Persisted>() -> Self {
        Self {
            entity_kind: E::FILE_PREFIX.to_string(),
            schema_version: E::SCHEMA_VERSION,
            busy_timeout: Duration::from_millis(5000),
            migration: None,
        }
    }

    pub fn with_busy_timeout(mut self, timeout: Duration) -> Self {
        self.busy_timeout = timeout;
        self
    }

    pub fn with_migration(mut self, plan: Option<Arc<dyn MigrationPlan>>) -> Self {
        self.migration = plan;
        self
    }
}

impl std::fmt::Debug for BackendOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackendOptions")
            .field("entity_kind", &self.entity_kind)
            .field("schema_version", &self.schema_version)
            .field("busy_timeout", &self.busy_timeout)
            .field("migration", &self.migration.as_ref().map(|plan| plan.target_version()))
            .finish()
    }
}

/// A single pending mutation.
#[derive(Debug, Clone)]
pub enum Change<E> {
    /// Add a new entity; fails if the identifier is already stored
    Insert(E),
    /// Write an entity's current state, inserting it if absent
    Save(E),
    /// Remove the entity with this identifier
    Delete(Uuid),
}

/// Pending mutations of one logical transaction.
///
/// A backend applies a change set all-or-nothing in `commit`.
#[derive(Debug, Clone)]
pub struct ChangeSet<E> {
    changes: Vec<Change<E>>,
}

impl<E: Persisted> ChangeSet<E> {
    pub fn new() -> Self {
        Self {
            changes: Vec::new(),
        }
    }

    pub fn insert(mut self, entity: E) -> Self {
        self.changes.push(Change::Insert(entity));
        self
    }

    pub fn save(mut self, entity: E) -> Self {
        self.changes.push(Change::Save(entity));
        self
    }

    pub fn delete(mut self, id: Uuid) -> Self {
        self.changes.push(Change::Delete(id));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    pub fn len(&self) -> usize {
        self.changes.len()
    }

    pub fn changes(&self) -> &[Change<E>] {
        &self.changes
    }
}

impl<E: Persisted> Default for ChangeSet<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E> IntoIterator for ChangeSet<E> {
    type Item = Change<E>;
    type IntoIter = std::vec::IntoIter<Change<E>>;

    fn into_iter(self) -> Self::IntoIter {
        self.changes.into_iter()
    }
}
