//! The model triad: configuration, persisted entity, transfer object.
//!
//! Each entity kind is described by three cooperating types:
//!
//! - a [`Configuration`]: caller intent, validated before anything is written
//! - a [`Persisted`] entity: the durable record, owned by the storage backend
//! - a [`Transfer`] object: the read-only projection handed back to callers
//!
//! The associated types link the three so the compiler enforces the wiring:
//! a persisted type names its configuration, a transfer type names its
//! persisted type. Conversions are total; every failure belongs in
//! [`Configuration::validate`] or [`Persisted::update`].

use serde::de::DeserializeOwned;
use serde::Serialize;
use uuid::Uuid;

use crate::error::Result;

/// Which subset of validation rules applies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValidationScope {
    /// All fields required for a brand-new entity.
    Creation,
    /// Only fields legally mutable after creation; identity changes are rejected.
    Update,
}

impl ValidationScope {
    pub fn as_str(&self) -> &'static str {
        match self {
            ValidationScope::Creation => "creation",
            ValidationScope::Update => "update",
        }
    }
}

impl std::fmt::Display for ValidationScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Caller-supplied, not-yet-validated description of entity state.
pub trait Configuration: Send + Sync + 'static {
    /// Check this configuration against the rules of `scope`.
    ///
    /// # Errors
    ///
    /// Returns `DepotError::ValidationFailed` with a human-readable cause.
    /// Must not have side effects.
    fn validate(&self, scope: ValidationScope) -> Result<()>;
}

/// A durable, identifier-bearing record held by the storage backend.
///
/// Entities are stored as JSON documents, hence the serde bounds.
pub trait Persisted: Clone + Serialize + DeserializeOwned + Send + Sync + 'static {
    /// Configuration type this entity is built from.
    type Config: Configuration;

    /// Static naming prefix of this entity kind.
    ///
    /// The backing file is `<directory>/<FILE_PREFIX>.<extension>`; changing
    /// the prefix orphans existing data.
    const FILE_PREFIX: &'static str;

    /// Version of the stored document shape.
    const SCHEMA_VERSION: u32 = 1;

    /// Stable unique identifier, immutable once created.
    fn id(&self) -> Uuid;

    /// Build a new entity from a configuration that passed `Creation` validation.
    fn from_config(config: Self::Config) -> Self;

    /// Apply a configuration that passed `Update` validation in place.
    ///
    /// # Errors
    ///
    /// Returns `DepotError::UpdateRejected` when domain logic refuses the change.
    /// On error the entity must be left unchanged.
    fn update(&mut self, config: &Self::Config) -> Result<()>;
}

/// Read-only projection of a persisted entity, owned by the caller.
pub trait Transfer: Send + 'static {
    /// Persisted type this object projects.
    type Entity: Persisted;

    fn from_entity(entity: &Self::Entity) -> Self;

    /// Identifier of the projected entity.
    fn id(&self) -> Uuid;
}
