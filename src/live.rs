//! Live sample stream consumer.
//!
//! While a run is still executing, each of its samples has a growing,
//! cursor-delimited event stream buffered server-side. A subscription polls
//! that stream, merges each delta into a stable de-duplicated transcript,
//! resolves attachment references incrementally, and publishes snapshots
//! through a watch channel. Transport failures stall the loop with bounded
//! exponential backoff; a `NotFound` means the run finished and was flushed,
//! which terminates the subscription normally.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{debug, warn};

use evalsync_resolver::ResolvedDocument;
use evalsync_types::{
    AttachmentTable, Node, PendingSampleResponse, PendingSamples, RetryConfig, RunStatus,
    SampleData, SampleDataResponse, SampleKey, SampleSummary,
};

use crate::client::RemoteLogService;
use crate::error::SyncError;

#[derive(Debug, Clone, Copy)]
pub struct SampleStreamConfig {
    /// Pause between polls when the stream is healthy.
    pub poll_interval: Duration,
    pub retry: RetryConfig,
}

impl Default for SampleStreamConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(2),
            retry: RetryConfig::default(),
        }
    }
}

/// Where the subscription's polling loop currently stands.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamStatus {
    Polling,
    /// Transport trouble; retrying with backoff.
    Stalled { retries: u32 },
    /// The sample is no longer buffered: the run finished and was flushed.
    /// Re-fetch through the ordinary detail path.
    Completed,
    /// Terminal failure, emitted exactly once.
    Failed(String),
}

/// One merged, resolved transcript event.
#[derive(Debug, Clone, PartialEq)]
pub struct TranscriptEvent {
    pub id: u64,
    pub event_id: String,
    pub event: Node,
}

/// Published view of the assembled transcript.
#[derive(Debug, Clone, PartialEq)]
pub struct TranscriptSnapshot {
    pub events: Vec<TranscriptEvent>,
    pub status: StreamStatus,
    pub last_event: Option<u64>,
    pub last_attachment: Option<u64>,
}

impl Default for TranscriptSnapshot {
    fn default() -> Self {
        Self {
            events: Vec::new(),
            status: StreamStatus::Polling,
            last_event: None,
            last_attachment: None,
        }
    }
}

/// Handle to one active polling loop. Dropping it (or calling [`stop`])
/// cancels the scheduled next poll; at most one loop runs per subscription.
///
/// [`stop`]: SampleSubscription::stop
pub struct SampleSubscription {
    shutdown: watch::Sender<bool>,
    snapshot: watch::Receiver<TranscriptSnapshot>,
}

impl SampleSubscription {
    pub fn snapshot(&self) -> TranscriptSnapshot {
        self.snapshot.borrow().clone()
    }

    /// Watch endpoint for UI updates.
    pub fn watch(&self) -> watch::Receiver<TranscriptSnapshot> {
        self.snapshot.clone()
    }

    /// Cancel the subscription: no further poll is scheduled, and an
    /// in-flight response is discarded when it arrives.
    pub fn stop(&self) {
        let _ = self.shutdown.send(true);
    }
}

impl Drop for SampleSubscription {
    fn drop(&mut self) {
        let _ = self.shutdown.send(true);
    }
}

/// Whether selecting this sample should start a live subscription: the run
/// is still producing, or the sample's own data has not been durably flushed
/// yet.
pub fn should_stream(run_status: RunStatus, summary: &SampleSummary) -> bool {
    run_status.is_running() || !summary.completed
}

/// Begin polling one in-progress sample. A fresh subscription always starts
/// from empty cursors and a fresh retry budget.
pub fn subscribe(
    remote: Arc<dyn RemoteLogService>,
    key: SampleKey,
    config: SampleStreamConfig,
) -> SampleSubscription {
    let (shutdown, shutdown_rx) = watch::channel(false);
    let (snapshot_tx, snapshot_rx) = watch::channel(TranscriptSnapshot::default());

    tokio::spawn(poll_loop(remote, key, config, snapshot_tx, shutdown_rx));

    SampleSubscription {
        shutdown,
        snapshot: snapshot_rx,
    }
}

struct TranscriptState {
    events: Vec<(u64, String, ResolvedDocument)>,
    table: AttachmentTable,
    last_event: Option<u64>,
    last_attachment: Option<u64>,
}

impl TranscriptState {
    fn new() -> Self {
        Self {
            events: Vec::new(),
            table: AttachmentTable::new(),
            last_event: None,
            last_attachment: None,
        }
    }

    /// Merge one delta. Returns `Ok(true)` if state advanced, `Ok(false)` if
    /// the delta was discarded (regressed cursor), `Err` on a protocol
    /// violation.
    fn apply(&mut self, data: SampleData) -> Result<bool, SyncError> {
        if data.is_empty() {
            return Ok(false);
        }

        // never regress: a delta whose cursors are behind the held state is
        // discarded wholesale
        let regressed = matches!((data.last_event(), self.last_event), (Some(delta), Some(held)) if delta < held)
            || matches!(
                (data.last_attachment(), self.last_attachment),
                (Some(delta), Some(held)) if delta < held
            );
        if regressed {
            warn!(
                delta_event = ?data.last_event(),
                held_event = ?self.last_event,
                "discarding delta with regressed cursor"
            );
            return Ok(false);
        }

        // attachments are guaranteed to arrive no later than the events that
        // reference them, so grow the table before merging events
        for attachment in &data.attachments {
            self.table.insert(attachment.hash.clone(), attachment.content.as_str());
        }
        self.last_attachment = self.last_attachment.max(data.last_attachment());

        // taken before the loop consumes the event records
        let delta_last_event = data.last_event();
        for record in data.events {
            if self.last_event.is_some_and(|held| record.id <= held) {
                continue; // already merged
            }
            let mut doc = ResolvedDocument::new(record.event, &self.table);
            if !doc.is_fully_resolved() {
                doc.apply_attachments(&self.table);
            }
            if !doc.is_fully_resolved() {
                let missing = doc.unresolved_ids().join(", ");
                return Err(SyncError::Protocol(format!(
                    "event {} references attachments that never arrived: {missing}",
                    record.id
                )));
            }
            self.events.push((record.id, record.event_id, doc));
        }
        self.last_event = self.last_event.max(delta_last_event);

        Ok(true)
    }

    fn snapshot(&self, status: StreamStatus) -> TranscriptSnapshot {
        TranscriptSnapshot {
            events: self
                .events
                .iter()
                .map(|(id, event_id, doc)| TranscriptEvent {
                    id: *id,
                    event_id: event_id.clone(),
                    event: doc.root().clone(),
                })
                .collect(),
            status,
            last_event: self.last_event,
            last_attachment: self.last_attachment,
        }
    }
}

async fn poll_loop(
    remote: Arc<dyn RemoteLogService>,
    key: SampleKey,
    config: SampleStreamConfig,
    snapshot: watch::Sender<TranscriptSnapshot>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut state = TranscriptState::new();
    let mut retries: u32 = 0;

    loop {
        let response = remote
            .get_sample_data(
                &key.log,
                &key.id,
                key.epoch,
                state.last_event,
                state.last_attachment,
            )
            .await;

        let delay = match response {
            Ok(SampleDataResponse::Ok(data)) => {
                retries = 0;
                match state.apply(data) {
                    Ok(true) => {
                        let _ = snapshot.send(state.snapshot(StreamStatus::Polling));
                    }
                    Ok(false) => {}
                    Err(violation) => {
                        warn!(sample = %key.id, error = %violation, "sample stream failed");
                        let _ = snapshot.send(state.snapshot(StreamStatus::Failed(
                            violation.to_string(),
                        )));
                        return;
                    }
                }
                config.poll_interval
            }
            Ok(SampleDataResponse::NotModified) => {
                retries = 0;
                config.poll_interval
            }
            Ok(SampleDataResponse::NotFound) => {
                // normal termination: the run finished and was flushed
                debug!(sample = %key.id, "sample no longer pending");
                let _ = snapshot.send(state.snapshot(StreamStatus::Completed));
                return;
            }
            Err(error) => {
                if retries >= config.retry.max_retries {
                    warn!(sample = %key.id, error = %error, "sample stream giving up");
                    let _ = snapshot.send(
                        state.snapshot(StreamStatus::Failed(error.to_string())),
                    );
                    return;
                }
                let delay = config.retry.backoff(retries);
                retries += 1;
                debug!(
                    sample = %key.id,
                    retries,
                    delay_ms = delay.as_millis() as u64,
                    "sample poll failed; backing off"
                );
                let _ = snapshot.send(state.snapshot(StreamStatus::Stalled { retries }));
                delay
            }
        };

        if !sleep_or_shutdown(&mut shutdown, delay).await {
            debug!(sample = %key.id, "subscription cancelled");
            return;
        }
    }
}

/// Sleep for `duration`; returns false if shutdown was signalled (or the
/// subscription handle was dropped) first.
async fn sleep_or_shutdown(shutdown: &mut watch::Receiver<bool>, duration: Duration) -> bool {
    tokio::select! {
        _ = tokio::time::sleep(duration) => true,
        changed = shutdown.changed() => match changed {
            Ok(()) => !*shutdown.borrow(),
            Err(_) => false,
        },
    }
}

/// Handle to a pending-sample index poll for one running log.
pub struct PendingSamplesMonitor {
    shutdown: watch::Sender<bool>,
    current: watch::Receiver<Option<PendingSamples>>,
}

impl PendingSamplesMonitor {
    pub fn current(&self) -> Option<PendingSamples> {
        self.current.borrow().clone()
    }

    pub fn watch(&self) -> watch::Receiver<Option<PendingSamples>> {
        self.current.clone()
    }

    pub fn stop(&self) {
        let _ = self.shutdown.send(true);
    }
}

impl Drop for PendingSamplesMonitor {
    fn drop(&mut self) {
        let _ = self.shutdown.send(true);
    }
}

/// Conditionally poll the pending-sample index of a running log, honoring the
/// server's suggested refresh interval and the same backoff policy as the
/// sample stream.
pub fn monitor_pending_samples(
    remote: Arc<dyn RemoteLogService>,
    log_name: String,
    config: SampleStreamConfig,
) -> PendingSamplesMonitor {
    let (shutdown, mut shutdown_rx) = watch::channel(false);
    let (current_tx, current_rx) = watch::channel(None);

    tokio::spawn(async move {
        let mut etag: Option<String> = None;
        let mut retries: u32 = 0;
        loop {
            let response = remote
                .get_pending_samples(&log_name, etag.as_deref())
                .await;
            let delay = match response {
                Ok(PendingSampleResponse::Ok(pending)) => {
                    retries = 0;
                    etag = Some(pending.etag.clone());
                    let refresh = if pending.refresh > 0 {
                        Duration::from_secs(pending.refresh)
                    } else {
                        config.poll_interval
                    };
                    let _ = current_tx.send(Some(pending));
                    refresh
                }
                Ok(PendingSampleResponse::NotModified) => {
                    retries = 0;
                    config.poll_interval
                }
                Ok(PendingSampleResponse::NotFound) => {
                    debug!(log = %log_name, "pending-sample index gone; run flushed");
                    return;
                }
                Err(error) => {
                    if retries >= config.retry.max_retries {
                        warn!(log = %log_name, error = %error, "pending-sample poll giving up");
                        return;
                    }
                    let delay = config.retry.backoff(retries);
                    retries += 1;
                    delay
                }
            };
            if !sleep_or_shutdown(&mut shutdown_rx, delay).await {
                return;
            }
        }
    });

    PendingSamplesMonitor {
        shutdown,
        current: current_rx,
    }
}
