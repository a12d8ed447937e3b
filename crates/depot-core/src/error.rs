//! Error types for Depot core operations.
//!
//! This module defines the error hierarchy for all core operations.
//! Validation and lookup failures are recoverable by the caller; backend
//! failures are surfaced verbatim and never retried by the core.

use thiserror::Error;

/// Result type alias for Depot operations.
pub type Result<T> = std::result::Result<T, DepotError>;

/// Core error type for Depot operations.
#[derive(Debug, Error)]
pub enum DepotError {
    /// A configuration did not satisfy the rules of its validation scope
    #[error("Validation failed: {0}")]
    ValidationFailed(String),

    /// Domain update logic refused a mutation
    #[error("Update rejected: {0}")]
    UpdateRejected(String),

    /// Identifier lookup failed where absence was not tolerated
    #[error("Not found: {0}")]
    NotFound(String),

    /// Storage could not be opened, created, or migrated
    #[error("Backend open error: {0}")]
    BackendOpen(String),

    /// Storage read or decode failure
    #[error("Backend read error: {0}")]
    BackendRead(String),

    /// Storage write or commit failure
    #[error("Backend write error: {0}")]
    BackendWrite(String),

    /// Configuration file could not be read or parsed
    #[error("Config error: {0}")]
    Config(String),
}

impl DepotError {
    /// Build a `ValidationFailed` error from any displayable cause.
    pub fn validation(cause: impl Into<String>) -> Self {
        DepotError::ValidationFailed(cause.into())
    }

    /// Build an `UpdateRejected` error from any displayable cause.
    pub fn rejected(cause: impl Into<String>) -> Self {
        DepotError::UpdateRejected(cause.into())
    }

    /// Whether the caller can recover locally (fix input, pick another id).
    ///
    /// Backend failures are not: the caller decides whether to retry or escalate.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            DepotError::ValidationFailed(_) | DepotError::UpdateRejected(_) | DepotError::NotFound(_)
        )
    }

    pub(crate) fn open(err: impl std::fmt::Display) -> Self {
        DepotError::BackendOpen(err.to_string())
    }

    pub(crate) fn read(err: impl std::fmt::Display) -> Self {
        DepotError::BackendRead(err.to_string())
    }

    pub(crate) fn write(err: impl std::fmt::Display) -> Self {
        DepotError::BackendWrite(err.to_string())
    }
}
