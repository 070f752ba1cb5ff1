//! Store error types.
//!
//! Storage failure is deliberately distinct from absence: a session that
//! cannot be read means the request must fail, never "not
//! authenticated".

use thiserror::Error;

/// Infrastructure-level store failure. Fatal for the current request.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The backing store could not be reached or the query failed.
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// A stored document could not be (de)serialized.
    #[error("store serialization error: {0}")]
    Serialization(String),
}

impl From<sqlx::Error> for StoreError {
    fn from(e: sqlx::Error) -> Self {
        StoreError::Unavailable(e.to_string())
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        StoreError::Serialization(e.to_string())
    }
}

/// Outcome of a guarded, targeted mutation on a shared document.
///
/// Guarded updates only apply when the document is in the expected
/// state; when the guard does not match, the store diagnoses why so the
/// caller can map it to the right protocol error instead of silently
/// overwriting a concurrent writer.
#[derive(Debug, Error)]
pub enum MutateError {
    /// No document with that key exists.
    #[error("document not found")]
    NotFound,

    /// The document exists but its TTL has passed.
    #[error("document has expired")]
    Expired,

    /// The document is not in the state the mutation requires (for
    /// example, a response code was already bound by a concurrent
    /// completion).
    #[error("document state conflicts with the requested update")]
    Conflict,

    /// Infrastructure failure.
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl From<sqlx::Error> for MutateError {
    fn from(e: sqlx::Error) -> Self {
        MutateError::Store(StoreError::from(e))
    }
}
