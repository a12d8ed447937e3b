//! Backend provider: opens stores and hands out access managers.
//!
//! The provider derives each store's location from the entity kind's static
//! prefix (`<directory>/<prefix>.<extension>`), opens it once, and returns a
//! [`BackendHandle`]. Handles are immutable and cheap to clone; any number of
//! [`AccessManager`]s may be bound to the same handle.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::config::StoreConfig;
use crate::error::{DepotError, Result};
use crate::manager::AccessManager;
use crate::migration::MigrationPlan;
use crate::model::{Persisted, Transfer};
use crate::storage::{BackendOptions, SqliteBackend, StorageBackend};

/// Opened, shareable reference to a storage backend.
pub struct BackendHandle<B = SqliteBackend> {
    backend: Arc<B>,
}

impl<B> Clone for BackendHandle<B> {
    fn clone(&self) -> Self {
        Self {
            backend: Arc::clone(&self.backend),
        }
    }
}

impl<B: StorageBackend> BackendHandle<B> {
    pub fn new(backend: B) -> Self {
        Self {
            backend: Arc::new(backend),
        }
    }

    /// Direct access to the backend, bypassing any manager's ordering.
    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn entity_kind(&self) -> &str {
        self.backend.entity_kind()
    }

    pub(crate) fn shared(&self) -> Arc<B> {
        Arc::clone(&self.backend)
    }
}

impl<B: StorageBackend> std::fmt::Debug for BackendHandle<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackendHandle")
            .field("entity_kind", &self.entity_kind())
            .finish()
    }
}

/// Opens stores under one configured directory.
#[derive(Debug, Clone)]
pub struct BackendProvider {
    config: StoreConfig,
}

impl BackendProvider {
    pub fn new(config: StoreConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// Location of the store for entity kind `E` under the configured directory.
    pub fn store_path<E: Persisted>(&self) -> Result<PathBuf> {
        self.store_path_in::<E>(&self.config.directory)
    }

    /// Location of the store for entity kind `E` under `directory`.
    pub fn store_path_in<E: Persisted>(&self, directory: &Path) -> Result<PathBuf> {
        validate_file_part("prefix", E::FILE_PREFIX)?;
        validate_file_part("extension", &self.config.extension)?;
        Ok(directory.join(format!("{}.{}", E::FILE_PREFIX, self.config.extension)))
    }

    /// Open or create the SQLite store for `E` in the configured directory.
    pub async fn open<E: Persisted>(
        &self,
        migration: Option<Arc<dyn MigrationPlan>>,
    ) -> Result<BackendHandle<SqliteBackend>> {
        self.open_backend::<E, SqliteBackend>(&self.config.directory, migration)
            .await
    }

    /// Open or create the SQLite store for `E` in `directory`.
    pub async fn open_in<E: Persisted>(
        &self,
        directory: &Path,
        migration: Option<Arc<dyn MigrationPlan>>,
    ) -> Result<BackendHandle<SqliteBackend>> {
        self.open_backend::<E, SqliteBackend>(directory, migration)
            .await
    }

    /// Open the store for `E` in `directory` with any backend implementation.
    ///
    /// # Errors
    ///
    /// Returns `DepotError::BackendOpen` if the prefix or extension is unusable, the
    /// directory is missing (and may not be created), or the backend refuses
    /// the file.
    pub async fn open_backend<E: Persisted, B: StorageBackend>(
        &self,
        directory: &Path,
        migration: Option<Arc<dyn MigrationPlan>>,
    ) -> Result<BackendHandle<B>> {
        let path = self.store_path_in::<E>(directory)?;
        let options = BackendOptions::for_entity::<E>()
            .with_busy_timeout(self.config.busy_timeout())
            .with_migration(migration);
        let create_directory = self.config.create_directory;
        let directory = directory.to_path_buf();

        let backend = tokio::task::spawn_blocking(move || -> Result<B> {
            if create_directory {
                std::fs::create_dir_all(&directory).map_err(|e| {
                    DepotError::BackendOpen(format!(
                        "Cannot create store directory {}: {}",
                        directory.display(),
                        e
                    ))
                })?;
            }
            B::open(&path, &options)
        })
        .await
        .map_err(|e| DepotError::BackendOpen(format!("Open task failed: {}", e)))??;

        Ok(BackendHandle::new(backend))
    }

    /// A fresh manager bound to `handle`.
    pub fn manager_for<T, B>(&self, handle: &BackendHandle<B>) -> AccessManager<T, B>
    where
        T: Transfer,
        B: StorageBackend,
    {
        AccessManager::new(handle.clone())
    }
}

/// Prefixes and extensions become file names, so keep them portable.
fn validate_file_part(part: &str, value: &str) -> Result<()> {
    if value.is_empty() {
        return Err(DepotError::BackendOpen(format!("Store file {} is empty", part)));
    }
    if !value
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    {
        return Err(DepotError::BackendOpen(format!(
            "Store file {} '{}' contains invalid characters",
            part, value
        )));
    }
    Ok(())
}
