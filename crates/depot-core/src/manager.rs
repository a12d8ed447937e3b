//! Access manager: the serialized CRUD authority for one entity kind.
//!
//! Every operation on a manager runs one at a time, in the order callers
//! reach its gate (tokio's mutex is FIFO). The gate guard travels into the
//! blocking task that performs the lookup/convert/mutate/commit step, so a
//! caller that drops its future mid-operation cannot let the next operation
//! start before the in-flight commit has finished. An abandoned write either
//! never started or is fully committed.
//!
//! For parallel throughput, take several managers over the same
//! [`BackendHandle`]; they do not serialize against each other.

use std::marker::PhantomData;
use std::sync::Arc;

use tokio::sync::Mutex;
use uuid::Uuid;

use crate::error::{DepotError, Result};
use crate::model::{Configuration, Persisted, Transfer, ValidationScope};
use crate::provider::BackendHandle;
use crate::storage::{ChangeSet, SqliteBackend, StorageBackend};

type Entity<T> = <T as Transfer>::Entity;

/// Serialized CRUD access to one backend for one transfer type.
pub struct AccessManager<T: Transfer, B: StorageBackend = SqliteBackend> {
    backend: BackendHandle<B>,
    gate: Arc<Mutex<()>>,
    _transfer: PhantomData<fn() -> T>,
}

impl<T: Transfer, B: StorageBackend> AccessManager<T, B> {
    const KIND: &'static str = <Entity<T> as Persisted>::FILE_PREFIX;

    pub fn new(backend: BackendHandle<B>) -> Self {
        Self {
            backend,
            gate: Arc::new(Mutex::new(())),
            _transfer: PhantomData,
        }
    }

    /// Backend this manager is bound to.
    pub fn handle(&self) -> &BackendHandle<B> {
        &self.backend
    }

    /// Run `work` against the backend with exclusive access to this manager.
    async fn exclusive<R, F>(&self, failure: fn(String) -> DepotError, work: F) -> Result<R>
    where
        R: Send + 'static,
        F: FnOnce(&B) -> Result<R> + Send + 'static,
    {
        let guard = Arc::clone(&self.gate).lock_owned().await;
        let backend = self.backend.shared();
        tokio::task::spawn_blocking(move || {
            let _guard = guard;
            work(&*backend)
        })
        .await
        .map_err(|e| failure(format!("Storage task failed: {}", e)))?
    }

    /// Every entity, projected, in backend-native order.
    pub async fn fetch_all(&self) -> Result<Vec<T>> {
        self.exclusive(DepotError::BackendRead, |backend| {
            let entities = backend.fetch_all::<Entity<T>>()?;
            tracing::debug!(
                kind = Self::KIND,
                count = entities.len(),
                "fetched all"
            );
            Ok(entities.iter().map(T::from_entity).collect())
        })
        .await
    }

    /// Look up one entity. Absence is `Ok(None)`.
    pub async fn fetch_one(&self, id: Uuid) -> Result<Option<T>> {
        self.exclusive(DepotError::BackendRead, move |backend| {
            let entity = backend.fetch_by_id::<Entity<T>>(&id)?;
            tracing::debug!(
                kind = Self::KIND,
                %id,
                found = entity.is_some(),
                "fetched one"
            );
            Ok(entity.as_ref().map(T::from_entity))
        })
        .await
    }

    /// Number of stored entities.
    pub async fn count(&self) -> Result<usize> {
        self.exclusive(DepotError::BackendRead, |backend| {
            backend.count::<Entity<T>>()
        })
        .await
    }

    /// Validate, insert, and commit a new entity, returning its identifier.
    ///
    /// # Errors
    ///
    /// `ValidationFailed` if the configuration fails the creation rules (nothing
    /// is written); `BackendWrite` if the commit fails (nothing is visible).
    pub async fn add_item(&self, config: <Entity<T> as Persisted>::Config) -> Result<Uuid> {
        let entity = self.insert(config).await?;
        Ok(entity.id())
    }

    /// Same as [`add_item`](Self::add_item), returning the projection.
    pub async fn add_item_transfer(&self, config: <Entity<T> as Persisted>::Config) -> Result<T> {
        let entity = self.insert(config).await?;
        Ok(T::from_entity(&entity))
    }

    async fn insert(&self, config: <Entity<T> as Persisted>::Config) -> Result<Entity<T>> {
        if let Err(err) = config.validate(ValidationScope::Creation) {
            tracing::warn!(kind = Self::KIND, error = %err, "rejected new item");
            return Err(err);
        }

        let entity = <Entity<T> as Persisted>::from_config(config);
        self.exclusive(DepotError::BackendWrite, move |backend| {
            backend.commit(ChangeSet::new().insert(entity.clone()))?;
            tracing::info!(kind = Self::KIND, id = %entity.id(), "added item");
            Ok(entity)
        })
        .await
    }

    /// Delete by identifier.
    ///
    /// With `ignore_non_existent`, a missing identifier is a no-op; otherwise
    /// it is `NotFound`.
    pub async fn delete_item(&self, id: Uuid, ignore_non_existent: bool) -> Result<()> {
        self.exclusive(DepotError::BackendWrite, move |backend| {
            match backend.fetch_by_id::<Entity<T>>(&id)? {
                Some(_) => {
                    backend.commit(ChangeSet::<Entity<T>>::new().delete(id))?;
                    tracing::info!(kind = Self::KIND, %id, "deleted item");
                    Ok(())
                }
                None if ignore_non_existent => {
                    tracing::debug!(kind = Self::KIND, %id, "delete of absent item ignored");
                    Ok(())
                }
                None => Err(not_found::<Entity<T>>(&id)),
            }
        })
        .await
    }

    /// Apply a caller-supplied mutation to the live entity and commit it.
    ///
    /// The mutation is trusted: the result is not re-validated. A mutation
    /// that changes the identifier is `UpdateRejected` and writes nothing.
    pub async fn update_item<F>(&self, id: Uuid, mutation: F) -> Result<T>
    where
        F: FnOnce(&mut Entity<T>) + Send + 'static,
    {
        self.exclusive(DepotError::BackendWrite, move |backend| {
            let mut entity = backend
                .fetch_by_id::<Entity<T>>(&id)?
                .ok_or_else(|| not_found::<Entity<T>>(&id))?;
            mutation(&mut entity);
            Self::save(backend, id, entity)
        })
        .await
    }

    /// Validate `config` for the update scope, apply it with `Persisted::update`,
    /// and commit.
    ///
    /// # Errors
    ///
    /// `ValidationFailed` or `UpdateRejected` leave the stored entity untouched.
    pub async fn update_item_with(
        &self,
        id: Uuid,
        config: <Entity<T> as Persisted>::Config,
    ) -> Result<T> {
        if let Err(err) = config.validate(ValidationScope::Update) {
            tracing::warn!(kind = Self::KIND, %id, error = %err, "rejected update");
            return Err(err);
        }

        self.exclusive(DepotError::BackendWrite, move |backend| {
            let mut entity = backend
                .fetch_by_id::<Entity<T>>(&id)?
                .ok_or_else(|| not_found::<Entity<T>>(&id))?;
            if let Err(err) = entity.update(&config) {
                tracing::warn!(kind = Self::KIND, %id, error = %err, "update refused");
                return Err(err);
            }
            Self::save(backend, id, entity)
        })
        .await
    }

    /// Commit an updated entity; its identifier must still be `id`.
    fn save(backend: &B, id: Uuid, entity: Entity<T>) -> Result<T> {
        if entity.id() != id {
            tracing::warn!(kind = Self::KIND, %id, changed_to = %entity.id(), "update changed identifier");
            return Err(DepotError::rejected("identifier is immutable"));
        }
        let transfer = T::from_entity(&entity);
        backend.commit(ChangeSet::new().save(entity))?;
        tracing::info!(kind = Self::KIND, %id, "updated item");
        Ok(transfer)
    }
}

fn not_found<E: Persisted>(id: &Uuid) -> DepotError {
    DepotError::NotFound(format!("{} {}", E::FILE_PREFIX, id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::fixtures::{Note, NoteConfig, NoteView};
    use crate::storage::BackendOptions;

    fn manager() -> AccessManager<NoteView> {
        let backend = SqliteBackend::open_in_memory(&BackendOptions::for_entity::<Note>()).unwrap();
        AccessManager::new(BackendHandle::new(backend))
    }

    #[tokio::test]
    async fn test_add_fetch_update_delete_scenario() {
        let manager = manager();

        let id = manager.add_item(NoteConfig::named("A")).await.unwrap();
        let view = manager.fetch_one(id).await.unwrap().unwrap();
        assert_eq!(view.name, "A");
        assert_eq!(view.id, id);

        let view = manager
            .update_item(id, |note| note.name = "B".to_string())
            .await
            .unwrap();
        assert_eq!(view.name, "B");
        assert_eq!(manager.fetch_one(id).await.unwrap().unwrap().name, "B");

        manager.delete_item(id, true).await.unwrap();
        assert!(manager.fetch_one(id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_invalid_config_never_reaches_backend() {
        let manager = manager();
        manager.add_item(NoteConfig::named("kept")).await.unwrap();
        let before = manager.fetch_all().await.unwrap();

        let err = manager.add_item(NoteConfig::default()).await.unwrap_err();
        assert!(matches!(err, DepotError::ValidationFailed(_)));

        assert_eq!(manager.fetch_all().await.unwrap(), before);
        assert_eq!(manager.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_add_item_transfer_matches_identifier() {
        let manager = manager();
        let view = manager
            .add_item_transfer(NoteConfig::named("A"))
            .await
            .unwrap();
        let stored = manager.fetch_one(view.id).await.unwrap();
        assert_eq!(stored, Some(view));
    }

    #[tokio::test]
    async fn test_delete_absent() {
        let manager = manager();
        let id = Uuid::new_v4();

        manager.delete_item(id, true).await.unwrap();
        manager.delete_item(id, true).await.unwrap();

        let err = manager.delete_item(id, false).await.unwrap_err();
        assert!(matches!(err, DepotError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_update_absent_is_not_found() {
        let manager = manager();
        let err = manager
            .update_item(Uuid::new_v4(), |note| note.name.push('!'))
            .await
            .unwrap_err();
        assert!(matches!(err, DepotError::NotFound(_)));

        let err = manager
            .update_item_with(Uuid::new_v4(), NoteConfig::named("B"))
            .await
            .unwrap_err();
        assert!(matches!(err, DepotError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_update_with_config() {
        let manager = manager();
        let id = manager.add_item(NoteConfig::named("A")).await.unwrap();

        let view = manager
            .update_item_with(id, NoteConfig::named("B"))
            .await
            .unwrap();
        assert_eq!(view.name, "B");

        let identity_change = NoteConfig {
            id: Some(Uuid::new_v4()),
            ..NoteConfig::named("C")
        };
        let err = manager
            .update_item_with(id, identity_change)
            .await
            .unwrap_err();
        assert!(matches!(err, DepotError::ValidationFailed(_)));
        assert_eq!(manager.fetch_one(id).await.unwrap().unwrap().name, "B");
    }

    #[tokio::test]
    async fn test_rejected_update_writes_nothing() {
        let manager = manager();
        let id = manager.add_item(NoteConfig::named("A")).await.unwrap();
        manager.update_item(id, |note| note.locked = true).await.unwrap();

        let err = manager
            .update_item_with(id, NoteConfig::named("B"))
            .await
            .unwrap_err();
        assert!(matches!(err, DepotError::UpdateRejected(_)));
        assert_eq!(manager.fetch_one(id).await.unwrap().unwrap().name, "A");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_updates_are_not_lost() {
        let manager = Arc::new(manager());
        let id = manager.add_item(NoteConfig::named("A")).await.unwrap();

        let mut tasks = Vec::new();
        for _ in 0..16 {
            let manager = Arc::clone(&manager);
            tasks.push(tokio::spawn(async move {
                manager
                    .update_item(id, |note| note.body.push('x'))
                    .await
                    .unwrap();
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }

        let backend = manager.handle().backend();
        let note: Note = backend.fetch_by_id(&id).unwrap().unwrap();
        assert_eq!(note.body, "x".repeat(16));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_abandoned_update_still_commits() {
        let manager = Arc::new(manager());
        let id = manager.add_item(NoteConfig::named("A")).await.unwrap();

        let (started_tx, started_rx) = tokio::sync::oneshot::channel();
        let task = {
            let manager = Arc::clone(&manager);
            tokio::spawn(async move {
                manager
                    .update_item(id, move |note| {
                        let _ = started_tx.send(());
                        std::thread::sleep(std::time::Duration::from_millis(50));
                        note.name = "B".to_string();
                    })
                    .await
            })
        };

        started_rx.await.unwrap();
        task.abort();

        let view = manager.fetch_one(id).await.unwrap().unwrap();
        assert_eq!(view.name, "B");
    }

    #[tokio::test]
    async fn test_identifier_change_is_rejected() {
        let manager = manager();
        let id = manager.add_item(NoteConfig::named("A")).await.unwrap();

        let replacement = Uuid::new_v4();
        let err = manager
            .update_item(id, move |note| {
                note.id = replacement;
                note.name = "B".to_string();
            })
            .await
            .unwrap_err();
        assert!(matches!(err, DepotError::UpdateRejected(_)));

        assert_eq!(manager.count().await.unwrap(), 1);
        assert!(manager.fetch_one(replacement).await.unwrap().is_none());
        assert_eq!(manager.fetch_one(id).await.unwrap().unwrap().name, "A");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_caller_dropped_while_queued_writes_nothing() {
        let manager = Arc::new(manager());
        let id = manager.add_item(NoteConfig::named("A")).await.unwrap();

        // Hold the gate with a slow update so the next caller queues behind it.
        let (started_tx, started_rx) = tokio::sync::oneshot::channel();
        let (release_tx, release_rx) = std::sync::mpsc::channel::<()>();
        let holder = {
            let manager = Arc::clone(&manager);
            tokio::spawn(async move {
                manager
                    .update_item(id, move |note| {
                        let _ = started_tx.send(());
                        let _ = release_rx.recv();
                        note.body.push('1');
                    })
                    .await
            })
        };
        started_rx.await.unwrap();

        let queued = {
            let manager = Arc::clone(&manager);
            tokio::spawn(async move {
                manager
                    .update_item(id, |note| note.name = "queued".to_string())
                    .await
            })
        };
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        queued.abort();
        assert!(queued.await.unwrap_err().is_cancelled());

        release_tx.send(()).unwrap();
        holder.await.unwrap().unwrap();

        let backend = manager.handle().backend();
        let note: Note = backend.fetch_by_id(&id).unwrap().unwrap();
        assert_eq!(note.name, "A");
        assert_eq!(note.body, "1");
    }
}
