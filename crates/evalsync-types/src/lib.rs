//! Shared types for the evalsync workspace.
//!
//! This crate provides the data model used across the workspace, breaking
//! circular dependency chains:
//!
//! - [`handle`] — manifest entries and the conditional fetch token
//! - [`preview`] — preview/detail projections and sample summaries
//! - [`sample`] — incremental sample-stream wire shapes and cursors
//! - [`tree`] — JSON-like payload trees with attachment references
//! - [`cache`] — version-stamped cache entries

pub mod cache;
pub mod handle;
pub mod preview;
pub mod sample;
pub mod tree;

pub use cache::CacheEntry;
pub use handle::{ConditionalToken, LogHandle, LogListing};
pub use preview::{
    LogDetails, LogPreview, PrimaryMetric, RunResults, RunStatus, SampleId, SampleSummary,
};
pub use sample::{
    AttachmentRecord, EventRecord, PendingSampleResponse, PendingSamples, SampleData,
    SampleDataResponse, SampleKey,
};
pub use tree::{AttachmentTable, Node, ATTACHMENT_FIELD};

use std::time::Duration;

/// Configuration for retry behavior on the live sample stream.
#[derive(Debug, Copy, Clone)]
pub struct RetryConfig {
    /// Consecutive failures tolerated before giving up.
    pub max_retries: u32,
    /// Backoff for the first retry; doubles per consecutive failure.
    pub initial_backoff: Duration,
    /// Cap applied to the doubled backoff.
    pub max_backoff: Duration,
}

impl RetryConfig {
    pub fn new(max_retries: u32, initial_backoff_ms: u64, max_backoff_ms: u64) -> Self {
        Self {
            max_retries,
            initial_backoff: Duration::from_millis(initial_backoff_ms),
            max_backoff: Duration::from_millis(max_backoff_ms),
        }
    }

    /// Delay before the retry following the `failures`-th consecutive failure
    /// (zero-based): `min(initial * 2^failures, max)`.
    pub fn backoff(&self, failures: u32) -> Duration {
        let doubled = self
            .initial_backoff
            .saturating_mul(2u32.saturating_pow(failures));
        doubled.min(self.max_backoff)
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 10,
            initial_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(60),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_doubles_and_caps() {
        let config = RetryConfig::default();
        assert_eq!(config.backoff(0), Duration::from_secs(1));
        assert_eq!(config.backoff(1), Duration::from_secs(2));
        assert_eq!(config.backoff(5), Duration::from_secs(32));
        assert_eq!(config.backoff(6), Duration::from_secs(60));
        assert_eq!(config.backoff(31), Duration::from_secs(60));
        // saturating pow/mul must not wrap past the cap
        assert_eq!(config.backoff(u32::MAX), Duration::from_secs(60));
    }
}
