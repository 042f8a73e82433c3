//! Error taxonomy for the sync engine.
//!
//! NotFound and NotModified are not errors here: they are ordinary response
//! variants on the wire types. The categories below are the ones that demand
//! distinct handling policy.

use thiserror::Error;

/// Failure categories surfaced by the sync engine.
///
/// - `Transport` is retryable; the live stream consumer retries it with
///   bounded backoff, the replication service aborts the current pass.
/// - `Protocol` indicates a server guarantee was broken (an attachment
///   reference that can never resolve, a regressing cursor); surfaced, never
///   silently ignored.
/// - `Storage` means a local cache operation failed; logged and degraded to
///   cache-miss behavior, never fatal.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("transport failure: {0}")]
    Transport(anyhow::Error),

    #[error("protocol violation: {0}")]
    Protocol(String),

    #[error("storage failure: {0}")]
    Storage(anyhow::Error),
}

impl SyncError {
    pub fn transport(error: impl Into<anyhow::Error>) -> Self {
        SyncError::Transport(error.into())
    }

    pub fn storage(error: impl Into<anyhow::Error>) -> Self {
        SyncError::Storage(error.into())
    }
}

pub type Result<T, E = SyncError> = std::result::Result<T, E>;
