//! Client-side replica cache and synchronization engine for evaluation-run
//! logs.
//!
//! The engine keeps a local view of a remote log collection consistent with
//! the server while incrementally streaming the partial results of runs that
//! are still in progress:
//!
//! - [`ReplicationService`] reconciles the local cache against the remote
//!   manifest (conditional fetch, stale-entry invalidation, selection
//!   stability) and delegates all content fetching to prioritized background
//!   queues.
//! - [`live::subscribe`] polls one in-progress sample's cursor-delimited
//!   event stream, assembling a stable de-duplicated transcript with
//!   attachment references resolved incrementally.
//!
//! The network transport and the durable cache are external collaborators
//! behind the [`RemoteLogService`] and [`CacheStore`] traits; UI state is
//! reached only through the [`ApplicationContext`] callbacks injected at
//! startup.

pub mod client;
pub mod context;
pub mod error;
pub mod live;
pub mod replication;
pub mod store;

pub use client::RemoteLogService;
pub use context::ApplicationContext;
pub use error::SyncError;
pub use live::{
    monitor_pending_samples, should_stream, subscribe, PendingSamplesMonitor, SampleStreamConfig,
    SampleSubscription, StreamStatus, TranscriptEvent, TranscriptSnapshot,
};
pub use replication::{ReplicationConfig, ReplicationService};
pub use store::{CacheStore, MemoryStore};

pub use evalsync_queue::{Priority, QueueConfig, WorkQueue};
pub use evalsync_resolver::{resolve, ResolvedDocument};
pub use evalsync_types as types;
