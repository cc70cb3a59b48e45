//! The module contains the errors the engine can throw.
//!
//! - [`Validation`] bad or missing input; no side effects happened.
//! - [`Conflict`] the operation clashes with the current state (booked
//!   document, duplicate number, already booked).
//! - [`KeyNotFound`] a document, structure, posting or project is missing.
//! - [`Dependency`] a renderer or the artifact store failed; matching
//!   compensation already ran.
//! - [`Inconsistency`] a compensation step itself failed.
//!
//!  [`Validation`]: EngineError::Validation
//!  [`Conflict`]: EngineError::Conflict
//!  [`KeyNotFound`]: EngineError::KeyNotFound
//!  [`Dependency`]: EngineError::Dependency
//!  [`Inconsistency`]: EngineError::Inconsistency
use std::time::Duration;

use sea_orm::{DbErr, SqlErr};
use thiserror::Error;

/// Errors returned by the external collaborators (renderers, artifact store,
/// lookups).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CollaboratorError {
    /// The collaborator rejected the input, e.g. a mandatory e-invoice field
    /// is missing. The message is surfaced verbatim.
    #[error("{0}")]
    Validation(String),
    #[error("unavailable: {0}")]
    Unavailable(String),
    #[error("timed out after {0:?}")]
    Timeout(Duration),
    #[error("\"{0}\" not found")]
    NotFound(String),
}

/// Engine custom errors.
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Validation failed: {0}")]
    Validation(String),
    #[error("Conflict: {0}")]
    Conflict(String),
    #[error("\"{0}\" key not found!")]
    KeyNotFound(String),
    #[error("{step} failed: {source}")]
    Dependency {
        step: &'static str,
        #[source]
        source: CollaboratorError,
    },
    #[error("Inconsistent state: {0}")]
    Inconsistency(String),
    #[error(transparent)]
    Database(#[from] DbErr),
}

impl EngineError {
    pub(crate) fn dependency(step: &'static str, source: CollaboratorError) -> Self {
        match source {
            CollaboratorError::Validation(message) => Self::Validation(message),
            source => Self::Dependency { step, source },
        }
    }

    /// Turns a unique index violation into a conflict, passing other
    /// database errors through.
    pub(crate) fn from_unique_violation(err: DbErr, what: impl FnOnce() -> String) -> Self {
        match err.sql_err() {
            Some(SqlErr::UniqueConstraintViolation(_)) => Self::Conflict(what()),
            _ => Self::Database(err),
        }
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict(_))
    }

    pub fn is_validation(&self) -> bool {
        matches!(self, Self::Validation(_))
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::KeyNotFound(_))
    }
}

impl PartialEq for EngineError {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Validation(a), Self::Validation(b)) => a == b,
            (Self::Conflict(a), Self::Conflict(b)) => a == b,
            (Self::KeyNotFound(a), Self::KeyNotFound(b)) => a == b,
            (
                Self::Dependency {
                    step: a,
                    source: sa,
                },
                Self::Dependency {
                    step: b,
                    source: sb,
                },
            ) => a == b && sa == sb,
            (Self::Inconsistency(a), Self::Inconsistency(b)) => a == b,
            (Self::Database(a), Self::Database(b)) => a.to_string() == b.to_string(),
            _ => false,
        }
    }
}
