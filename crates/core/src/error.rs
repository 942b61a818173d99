//! Error kinds shared across the service and client.
//!
//! Keep this focused on the kinds callers can act on: validation and
//! transition failures, missing resources, lease timeouts, and recoverable
//! backend faults. Infrastructure detail stays in the message.

use std::time::Duration;

use thiserror::Error;

/// Result type used across the workspace.
pub type Result<T> = std::result::Result<T, Error>;

/// Error kinds surfaced by the service and mapped onto the wire.
///
/// The task processor treats [`Error::Transient`] as recoverable (sleep and
/// retry); everything else is fatal under `stop_on_error`.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum Error {
    /// Bad input: empty identifier, non-positive timeout, malformed value.
    #[error("{0}")]
    Validation(String),

    /// Queue or task absent where one was required.
    #[error("{0}")]
    NotFound(String),

    /// Illegal status transition.
    #[error("{0}")]
    Conflict(String),

    /// Task execution exceeded its queue's timeout.
    #[error("task processing exceeded timeout of {0:?}")]
    Timeout(Duration),

    /// Database or network fault; safe to retry.
    #[error("{0}")]
    Transient(String),

    /// The processor was cancelled by its caller.
    #[error("processing canceled")]
    Canceled,

    /// Unexpected failure.
    #[error("{0}")]
    Internal(String),
}

impl Error {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }

    pub fn transient(msg: impl Into<String>) -> Self {
        Self::Transient(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Whether a retry can reasonably succeed without caller changes.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }
}
