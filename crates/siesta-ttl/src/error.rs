//! Error types for the expiring store.

use thiserror::Error;

/// Result type alias for store operations.
pub type TtlResult<T> = Result<T, TtlError>;

/// Errors that can occur during store operations.
///
/// The store itself is in-memory and effectively infallible; the only
/// signal worth an error is a compare-and-swap guard turning a put down.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TtlError {
    /// The compare-and-swap guard returned false. Not a failure so much
    /// as a negative result — callers branch on it.
    #[error("put rejected by compare-and-swap guard")]
    GuardRejected,
}
