//! Error types for the session layer.

use std::time::Duration;

use thiserror::Error;

use crate::session::SessionState;

/// Result type alias for session operations.
pub type SessionResult<T> = Result<T, SessionError>;

/// Errors surfaced by the session manager and its storage.
#[derive(Debug, Error)]
pub enum SessionError {
    /// The ready-wait deadline elapsed. Carries the best-known session
    /// so callers can still distinguish "still starting" from "will
    /// never start" per name.
    #[error("session was not ready after {timeout:?}")]
    DeadlineExceeded {
        timeout: Duration,
        session: SessionState,
    },

    #[error("group {0} has no members")]
    EmptyGroup(String),

    #[error("file storage is not enabled")]
    StorageDisabled,

    #[error("session snapshot error: {0}")]
    Snapshot(#[from] serde_json::Error),

    #[error("storage io error: {0}")]
    Io(#[from] std::io::Error),
}
