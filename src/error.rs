// src/error.rs

//! Error types for the adoption and migration engine

use thiserror::Error;

/// Errors surfaced by engine operations
#[derive(Error, Debug)]
pub enum Error {
    /// Unknown candidate or runner id
    #[error("not found: {0}")]
    NotFound(String),

    /// External service without consent, or double-adoption of a path
    #[error("conflict: {0}")]
    Conflict(String),

    /// Operation attempted in a state that forbids it
    #[error("precondition failed: {0}")]
    PreconditionFailed(String),

    /// Verification poll exhausted its timeout without seeing a ready marker
    #[error("verification timed out after {waited_secs}s")]
    VerificationTimeout { waited_secs: u64 },

    /// OS denied a filesystem or service-manager operation
    #[error("permission denied: {0}")]
    PermissionDenied(String),

    /// Operation has no implementation on this platform
    #[error("unsupported platform: {0}")]
    Unsupported(String),

    /// Caller cancelled a verification wait; no state was mutated
    #[error("operation cancelled")]
    Cancelled,

    /// Service manager call failed
    #[error("service error: {0}")]
    Service(String),

    /// I/O error from copy/delete/spawn operations
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Store or metadata decode error
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Map an I/O error, promoting permission problems to their own variant
    /// so callers can prompt for elevation instead of retrying.
    pub(crate) fn from_io(context: &str, err: std::io::Error) -> Self {
        if err.kind() == std::io::ErrorKind::PermissionDenied {
            Error::PermissionDenied(format!("{context}: {err}"))
        } else {
            Error::Io(err)
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
