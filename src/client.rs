//! Remote log service boundary.
//!
//! The network transport is an external collaborator: this trait specifies
//! the primitive request operations the engine consumes, and implementations
//! (HTTP, in-process, test fakes) live outside the core. All methods surface
//! only [`SyncError::Transport`](crate::SyncError::Transport) failures;
//! not-found and not-modified outcomes are response variants.

use async_trait::async_trait;

use evalsync_types::{
    ConditionalToken, LogDetails, LogListing, LogPreview, PendingSampleResponse, SampleDataResponse,
    SampleId,
};

use crate::error::Result;

#[async_trait]
pub trait RemoteLogService: Send + Sync {
    /// Conditional manifest fetch. `token` summarizes the client's cached
    /// handle set; the server short-circuits to `NotModified` when it still
    /// matches.
    async fn list_logs(&self, token: Option<ConditionalToken>) -> Result<LogListing>;

    /// Batched preview fetch, order-aligned with `names`.
    async fn get_log_summaries(&self, names: &[String]) -> Result<Vec<LogPreview>>;

    /// Single detail fetch; callers batching details tolerate per-item
    /// failure without failing the batch.
    async fn get_log_details(&self, name: &str) -> Result<LogDetails>;

    /// Conditional fetch of the pending-sample index for a running log.
    async fn get_pending_samples(
        &self,
        log_name: &str,
        etag: Option<&str>,
    ) -> Result<PendingSampleResponse>;

    /// Conditional, cursor-based incremental fetch of one sample's growing
    /// transcript: only rows past `last_event` / `last_attachment` are
    /// returned.
    async fn get_sample_data(
        &self,
        log_name: &str,
        id: &SampleId,
        epoch: u32,
        last_event: Option<u64>,
        last_attachment: Option<u64>,
    ) -> Result<SampleDataResponse>;
}
