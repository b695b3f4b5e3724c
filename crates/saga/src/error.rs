//! Error types for the saga interpreter.
//!
//! Every failure a process can surface travels through [`ProcError`]. It is
//! `Clone` because a single completion is observed by many parties at once:
//! the top-level caller, every `Join` on the task, and the task handle's
//! `error()` accessor.

use std::sync::Arc;

use thiserror::Error;

use crate::value::Value;

/// Errors surfaced by a process or by one of its effects.
#[derive(Debug, Clone, Error)]
pub enum ProcError {
    /// The saga entry point was handed something that cannot be advanced.
    #[error("saga function result must be an advanceable routine")]
    NotAdvanceable,

    /// A value thrown by a routine or by an effect handler.
    #[error("{0}")]
    Raised(Value),

    /// A handler failure reported through `anyhow`.
    #[error("{0}")]
    Failed(Arc<anyhow::Error>),

    /// A race settled with a failing branch (`{key: error}`).
    #[error("race branch `{key}` failed: {error}")]
    Race {
        /// Key of the branch that failed first
        key: String,
        /// The branch's own failure
        error: Box<ProcError>,
    },

    /// The process was dropped before it settled (its `LocalSet` went away,
    /// or a branch task panicked), or a race or parallel branch was still
    /// waiting for an event when its process moved on.
    #[error("process abandoned before it settled")]
    Abandoned,
}

impl ProcError {
    /// Raise an arbitrary value as an error.
    pub fn raised(value: impl Into<Value>) -> Self {
        Self::Raised(value.into())
    }

    /// Tag a branch failure with its race key.
    pub fn race(key: impl Into<String>, error: ProcError) -> Self {
        Self::Race {
            key: key.into(),
            error: Box::new(error),
        }
    }

    /// The thrown value, if this error carries one.
    pub fn thrown(&self) -> Option<&Value> {
        match self {
            Self::Raised(value) => Some(value),
            _ => None,
        }
    }

    /// Key and inner error of a race rejection.
    pub fn race_branch(&self) -> Option<(&str, &ProcError)> {
        match self {
            Self::Race { key, error } => Some((key.as_str(), error.as_ref())),
            _ => None,
        }
    }
}

impl From<anyhow::Error> for ProcError {
    fn from(error: anyhow::Error) -> Self {
        Self::Failed(Arc::new(error))
    }
}

/// Result type using [`ProcError`]
pub type Result<T> = std::result::Result<T, ProcError>;
