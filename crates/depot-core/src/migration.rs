//! Pluggable schema migration.
//!
//! A [`MigrationPlan`] is handed to the backend provider when opening a
//! store. If the stored schema version is older than the entity kind's
//! `SCHEMA_VERSION`, every stored document is passed through the plan inside
//! the opening transaction. The core never decides how documents change
//! between versions; it only decides when a plan must run.

use std::collections::BTreeMap;

use serde_json::Value;

use crate::error::{DepotError, Result};

/// Strategy for lifting stored documents to the current schema version.
pub trait MigrationPlan: Send + Sync {
    /// Version this plan migrates to. Must equal the entity's `SCHEMA_VERSION`.
    fn target_version(&self) -> u32;

    /// Lift one stored document from `from_version` to `target_version()`.
    ///
    /// # Errors
    ///
    /// Any error aborts the open; the store is left untouched.
    fn migrate(&self, from_version: u32, record: Value) -> Result<Value>;
}

type Stage = Box<dyn Fn(Value) -> Result<Value> + Send + Sync>;

/// Ordered per-version document transforms.
///
/// The stage registered for version `n` lifts a document from `n` to `n + 1`.
/// Versions start at 1.
pub struct StagedMigration {
    stages: BTreeMap<u32, Stage>,
}

impl StagedMigration {
    pub fn new() -> Self {
        Self {
            stages: BTreeMap::new(),
        }
    }

    /// Register the transform lifting documents from `from_version` to the next version.
    ///
    /// A later registration for the same version replaces the earlier one.
    pub fn stage<F>(mut self, from_version: u32, transform: F) -> Self
    where
        F: Fn(Value) -> Result<Value> + Send + Sync + 'static,
    {
        self.stages.insert(from_version, Box::new(transform));
        self
    }
}

impl Default for StagedMigration {
    fn default() -> Self {
        Self::new()
    }
}

impl MigrationPlan for StagedMigration {
    fn target_version(&self) -> u32 {
        self.stages
            .keys()
            .next_back()
            .map(|version| version + 1)
            .unwrap_or(1)
    }

    fn migrate(&self, from_version: u32, record: Value) -> Result<Value> {
        let target = self.target_version();
        let mut version = from_version;
        let mut current = record;
        while version < target {
            let transform = self.stages.get(&version).ok_or_else(|| {
                DepotError::BackendOpen(format!(
                    "No migration stage from schema version {}",
                    version
                ))
            })?;
            current = transform(current)?;
            version += 1;
        }
        Ok(current)
    }
}
