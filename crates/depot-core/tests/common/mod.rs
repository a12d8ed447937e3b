#![allow(dead_code)]

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};

use depot_core::storage::{BackendOptions, ChangeSet, StoreMetadata};
use depot_core::{
    Configuration, DepotError, Persisted, Result, SqliteBackend, StorageBackend, Transfer,
    ValidationScope,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

#[derive(Debug, Clone, Default)]
pub struct TaskConfig {
    pub id: Option<Uuid>,
    pub title: Option<String>,
    pub priority: Option<u8>,
}

impl TaskConfig {
    pub fn titled(title: &str) -> Self {
        Self {
            title: Some(title.to_string()),
            ..Self::default()
        }
    }
}

impl Configuration for TaskConfig {
    fn validate(&self, scope: ValidationScope) -> Result<()> {
        if scope == ValidationScope::Update && self.id.is_some() {
            return Err(DepotError::validation("task id is immutable"));
        }
        match (scope, self.title.as_deref()) {
            (ValidationScope::Creation, None) => {
                return Err(DepotError::validation("title is required"))
            }
            (_, Some(title)) if title.trim().is_empty() => {
                return Err(DepotError::validation("title must not be blank"))
            }
            _ => {}
        }
        if matches!(self.priority, Some(p) if p > 5) {
            return Err(DepotError::validation("priority must be between 0 and 5"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: Uuid,
    pub title: String,
    pub priority: u8,
    pub done: bool,
}

impl Persisted for Task {
    type Config = TaskConfig;
    const FILE_PREFIX: &'static str = "tasks";
    const SCHEMA_VERSION: u32 = 2;

    fn id(&self) -> Uuid {
        self.id
    }

    fn from_config(config: TaskConfig) -> Self {
        Self {
            id: config.id.unwrap_or_else(Uuid::new_v4),
            title: config.title.unwrap_or_default(),
            priority: config.priority.unwrap_or(0),
            done: false,
        }
    }

    fn update(&mut self, config: &TaskConfig) -> Result<()> {
        if self.done {
            return Err(DepotError::rejected("finished tasks are frozen"));
        }
        if let Some(title) = &config.title {
            self.title = title.clone();
        }
        if let Some(priority) = config.priority {
            self.priority = priority;
        }
        Ok(())
    }
}

/// Version 1 of the task document: no priority.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LegacyTask {
    pub id: Uuid,
    pub title: String,
    pub done: bool,
}

impl Persisted for LegacyTask {
    type Config = TaskConfig;
    const FILE_PREFIX: &'static str = "tasks";

    fn id(&self) -> Uuid {
        self.id
    }

    fn from_config(config: TaskConfig) -> Self {
        Self {
            id: Uuid::new_v4(),
            title: config.title.unwrap_or_default(),
            done: false,
        }
    }

    fn update(&mut self, config: &TaskConfig) -> Result<()> {
        if let Some(title) = &config.title {
            self.title = title.clone();
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TaskDto {
    pub id: Uuid,
    pub title: String,
    pub priority: u8,
    pub done: bool,
}

impl Transfer for TaskDto {
    type Entity = Task;

    fn from_entity(task: &Task) -> Self {
        Self {
            id: task.id,
            title: task.title.clone(),
            priority: task.priority,
            done: task.done,
        }
    }

    fn id(&self) -> Uuid {
        self.id
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct LegacyTaskDto {
    pub id: Uuid,
    pub title: String,
}

impl Transfer for LegacyTaskDto {
    type Entity = LegacyTask;

    fn from_entity(task: &LegacyTask) -> Self {
        Self {
            id: task.id,
            title: task.title.clone(),
        }
    }

    fn id(&self) -> Uuid {
        self.id
    }
}

/// SQLite backend whose commits can be made to fail on demand.
pub struct FlakyBackend {
    inner: SqliteBackend,
    fail_commits: AtomicBool,
}

impl FlakyBackend {
    pub fn fail_commits(&self, fail: bool) {
        self.fail_commits.store(fail, Ordering::SeqCst);
    }
}

impl StorageBackend for FlakyBackend {
    fn open(path: &Path, options: &BackendOptions) -> Result<Self> {
        Ok(Self {
            inner: SqliteBackend::open(path, options)?,
            fail_commits: AtomicBool::new(false),
        })
    }

    fn entity_kind(&self) -> &str {
        self.inner.entity_kind()
    }

    fn metadata(&self) -> Result<StoreMetadata> {
        self.inner.metadata()
    }

    fn fetch_all<E: Persisted>(&self) -> Result<Vec<E>> {
        self.inner.fetch_all()
    }

    fn fetch_by_id<E: Persisted>(&self, id: &Uuid) -> Result<Option<E>> {
        self.inner.fetch_by_id(id)
    }

    fn count<E: Persisted>(&self) -> Result<usize> {
        self.inner.count::<E>()
    }

    fn commit<E: Persisted>(&self, changes: ChangeSet<E>) -> Result<()> {
        if self.fail_commits.load(Ordering::SeqCst) {
            return Err(DepotError::BackendWrite("disk unavailable".to_string()));
        }
        self.inner.commit(changes)
    }

    fn check_integrity(&self) -> Result<()> {
        self.inner.check_integrity()
    }
}
