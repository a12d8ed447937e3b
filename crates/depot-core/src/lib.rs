//! # Depot Core
//!
//! Generic, type-safe persistence access layer.
//!
//! Callers describe an entity kind with three cooperating types (a
//! configuration, a persisted entity, a transfer object) and get validated,
//! serialized CRUD access without writing per-type storage or locking code.
//!
//! ## Architecture
//!
//! - **model**: the configuration / persisted / transfer trait triad
//! - **storage**: backend trait, change sets, and the SQLite backend
//! - **migration**: pluggable schema migration strategies
//! - **manager**: the serialized access manager
//! - **provider**: opens stores and hands out managers
//! - **config**: TOML-loadable store configuration

pub mod config;
pub mod error;
pub mod manager;
pub mod migration;
pub mod model;
pub mod provider;
pub mod storage;

pub use config::StoreConfig;
pub use error::{DepotError, Result};
pub use manager::AccessManager;
pub use migration::{MigrationPlan, StagedMigration};
pub use model::{Configuration, Persisted, Transfer, ValidationScope};
pub use provider::{BackendHandle, BackendProvider};
pub use storage::{SqliteBackend, StorageBackend};

/// Core version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
