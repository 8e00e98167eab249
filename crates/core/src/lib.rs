//! Shared primitives for all Rust crates in Voyra.

#![forbid(unsafe_code)]

use thiserror::Error;

/// Result type used across Voyra crates.
pub type AppResult<T> = Result<T, AppError>;

/// Common application error categories.
///
/// Every variant carries an owned message so errors stay `Clone`: the
/// single-flight cache broadcasts one refresh outcome to every waiting
/// caller, failures included.
#[derive(Debug, Clone, Error)]
pub enum AppError {
    /// Invalid input or violated invariant.
    #[error("validation error: {0}")]
    Validation(String),

    /// A distributed store operation failed (unreachable, timed out, or
    /// returned a protocol error). Swallowed by the dual-backend policy;
    /// callers of the limiter and cache never observe this variant on
    /// read or record paths.
    #[error("store error: {0}")]
    Store(String),

    /// The external credential endpoint rejected or failed the fetch.
    /// Delivered to every caller waiting on the in-flight refresh.
    #[error("credential fetch failed: {0}")]
    CredentialFetch(String),

    /// Internal unexpected error.
    #[error("internal error: {0}")]
    Internal(String),
}
