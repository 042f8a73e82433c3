//! Wire shapes for incremental sample streaming.
//!
//! An in-progress run buffers its events and de-duplicated attachments in
//! per-sample append-only sequences with autoincrement row ids; those row ids
//! are the cursors a client holds to request only the delta since its last
//! poll.

use serde::{Deserialize, Serialize};

use crate::preview::{PrimaryMetric, SampleId, SampleSummary};
use crate::tree::Node;

/// Identifies one sample subscription.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SampleKey {
    pub log: String,
    pub id: SampleId,
    pub epoch: u32,
}

impl SampleKey {
    pub fn new(log: impl Into<String>, id: impl Into<SampleId>, epoch: u32) -> Self {
        Self {
            log: log.into(),
            id: id.into(),
            epoch,
        }
    }
}

/// One buffered event row. `id` is the event cursor; `event` is the payload
/// tree, possibly holding attachment references.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventRecord {
    pub id: u64,
    pub event_id: String,
    pub event: Node,
}

/// One buffered attachment row. `id` is the attachment cursor; `hash` is the
/// content-addressed id that references inside event trees point at.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttachmentRecord {
    pub id: u64,
    pub hash: String,
    pub content: String,
}

/// Delta of one sample's growing transcript since the supplied cursors.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SampleData {
    pub events: Vec<EventRecord>,
    pub attachments: Vec<AttachmentRecord>,
}

impl SampleData {
    /// Highest event cursor in this delta, if any.
    pub fn last_event(&self) -> Option<u64> {
        self.events.iter().map(|e| e.id).max()
    }

    /// Highest attachment cursor in this delta, if any.
    pub fn last_attachment(&self) -> Option<u64> {
        self.attachments.iter().map(|a| a.id).max()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty() && self.attachments.is_empty()
    }
}

/// Conditional response carrying a sample delta.
#[derive(Debug, Clone, PartialEq)]
pub enum SampleDataResponse {
    Ok(SampleData),
    /// The sample is no longer buffered (the run finished and was flushed).
    NotFound,
    /// Nothing new since the supplied cursors.
    NotModified,
}

/// Pending-sample index for a run that is still executing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingSamples {
    pub samples: Vec<SampleSummary>,
    #[serde(default)]
    pub metrics: Vec<PrimaryMetric>,
    /// Server's suggested refresh interval in seconds.
    pub refresh: u64,
    pub etag: String,
}

/// Conditional response for the pending-sample index.
#[derive(Debug, Clone, PartialEq)]
pub enum PendingSampleResponse {
    Ok(PendingSamples),
    NotFound,
    NotModified,
}
