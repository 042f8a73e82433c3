//! Live sample stream scenarios: delta merging with attachment resolution,
//! conditional cursors, adaptive backoff, cancellation, and the
//! pending-sample monitor, all on tokio's paused clock.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::json;
use tokio::time::Instant;

use evalsync::types::{
    AttachmentRecord, ConditionalToken, EventRecord, LogDetails, LogListing, LogPreview, Node,
    PendingSampleResponse, PendingSamples, RetryConfig, SampleData, SampleDataResponse, SampleId,
    SampleKey,
};
use evalsync::{subscribe, RemoteLogService, SampleStreamConfig, StreamStatus, SyncError};

// ---------------------------------------------------------------------------
// scripted fake
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
struct SampleCall {
    at: Instant,
    last_event: Option<u64>,
    last_attachment: Option<u64>,
}

struct ScriptedRemote {
    sample_responses: Mutex<VecDeque<Result<SampleDataResponse, SyncError>>>,
    sample_calls: Mutex<Vec<SampleCall>>,
    pending_responses: Mutex<VecDeque<Result<PendingSampleResponse, SyncError>>>,
    pending_etags: Mutex<Vec<Option<String>>>,
}

impl ScriptedRemote {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            sample_responses: Mutex::new(VecDeque::new()),
            sample_calls: Mutex::new(Vec::new()),
            pending_responses: Mutex::new(VecDeque::new()),
            pending_etags: Mutex::new(Vec::new()),
        })
    }

    fn script_sample(&self, responses: Vec<Result<SampleDataResponse, SyncError>>) {
        self.sample_responses.lock().extend(responses);
    }

    fn script_pending(&self, responses: Vec<Result<PendingSampleResponse, SyncError>>) {
        self.pending_responses.lock().extend(responses);
    }

    fn sample_call_count(&self) -> usize {
        self.sample_calls.lock().len()
    }
}

#[async_trait]
impl RemoteLogService for ScriptedRemote {
    async fn list_logs(
        &self,
        _token: Option<ConditionalToken>,
    ) -> Result<LogListing, SyncError> {
        Ok(LogListing::NotModified)
    }

    async fn get_log_summaries(&self, _names: &[String]) -> Result<Vec<LogPreview>, SyncError> {
        Ok(Vec::new())
    }

    async fn get_log_details(&self, name: &str) -> Result<LogDetails, SyncError> {
        Err(SyncError::transport(anyhow::anyhow!(
            "no details scripted for {name}"
        )))
    }

    async fn get_pending_samples(
        &self,
        _log_name: &str,
        etag: Option<&str>,
    ) -> Result<PendingSampleResponse, SyncError> {
        self.pending_etags.lock().push(etag.map(str::to_string));
        self.pending_responses
            .lock()
            .pop_front()
            .unwrap_or(Ok(PendingSampleResponse::NotModified))
    }

    async fn get_sample_data(
        &self,
        _log_name: &str,
        _id: &SampleId,
        _epoch: u32,
        last_event: Option<u64>,
        last_attachment: Option<u64>,
    ) -> Result<SampleDataResponse, SyncError> {
        self.sample_calls.lock().push(SampleCall {
            at: Instant::now(),
            last_event,
            last_attachment,
        });
        self.sample_responses
            .lock()
            .pop_front()
            .unwrap_or(Ok(SampleDataResponse::NotModified))
    }
}

fn event(id: u64, value: serde_json::Value) -> EventRecord {
    EventRecord {
        id,
        event_id: format!("ev-{id}"),
        event: Node::from_value(value),
    }
}

fn attachment(id: u64, hash: &str, content: &str) -> AttachmentRecord {
    AttachmentRecord {
        id,
        hash: hash.to_string(),
        content: content.to_string(),
    }
}

fn transport(message: &str) -> SyncError {
    SyncError::transport(anyhow::anyhow!(message.to_string()))
}

fn fast_retry_config() -> SampleStreamConfig {
    SampleStreamConfig {
        poll_interval: Duration::from_secs(2),
        retry: RetryConfig::default(),
    }
}

async fn wait_for_status(
    subscription: &evalsync::SampleSubscription,
    want: fn(&StreamStatus) -> bool,
) {
    let mut rx = subscription.watch();
    loop {
        if want(&rx.borrow().status) {
            return;
        }
        rx.changed().await.expect("stream task ended early");
    }
}

// ---------------------------------------------------------------------------
// scenarios
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn test_stream_assembles_resolved_transcript_across_deltas() {
    let remote = ScriptedRemote::new();
    remote.script_sample(vec![
        Ok(SampleDataResponse::Ok(SampleData {
            events: vec![event(1, json!({"msg": {"$attachment": "h1"}}))],
            attachments: vec![attachment(1, "h1", "first chunk")],
        })),
        Ok(SampleDataResponse::Ok(SampleData {
            events: vec![event(2, json!({"msg": {"$attachment": "h1"}, "more": true}))],
            attachments: vec![],
        })),
        Ok(SampleDataResponse::NotFound),
    ]);

    let subscription = subscribe(
        remote.clone(),
        SampleKey::new("logs/run.json", "sample-1", 1),
        fast_retry_config(),
    );
    wait_for_status(&subscription, |s| *s == StreamStatus::Completed).await;

    let snapshot = subscription.snapshot();
    assert_eq!(snapshot.events.len(), 2);
    assert_eq!(
        snapshot.events[0].event.to_value(),
        json!({"msg": "first chunk"})
    );
    // the second event reuses an attachment from the first delta's table
    assert_eq!(
        snapshot.events[1].event.to_value(),
        json!({"msg": "first chunk", "more": true})
    );
    assert_eq!(snapshot.last_event, Some(2));
    assert_eq!(snapshot.last_attachment, Some(1));

    // cursors were carried on the wire: second and third polls were
    // conditional on what the first delivered
    let calls = remote.sample_calls.lock();
    assert_eq!(calls[0].last_event, None);
    assert_eq!(calls[1].last_event, Some(1));
    assert_eq!(calls[1].last_attachment, Some(1));
    assert_eq!(calls[2].last_event, Some(2));
}

#[tokio::test(start_paused = true)]
async fn test_not_modified_keeps_polling_at_fixed_interval() {
    let remote = ScriptedRemote::new();
    // script nothing: every poll answers NotModified
    let subscription = subscribe(
        remote.clone(),
        SampleKey::new("logs/run.json", 1i64, 1),
        fast_retry_config(),
    );

    tokio::time::sleep(Duration::from_secs(7)).await;
    // polls at t=0, 2, 4, 6
    assert_eq!(remote.sample_call_count(), 4);
    let calls = remote.sample_calls.lock();
    for pair in calls.windows(2) {
        assert_eq!(pair[1].at - pair[0].at, Duration::from_secs(2));
    }
    drop(calls);
    subscription.stop();
}

#[tokio::test(start_paused = true)]
async fn test_backoff_doubles_caps_and_gives_up_once() {
    let remote = ScriptedRemote::new();
    remote.script_sample((0..12).map(|i| Err(transport(&format!("down {i}")))).collect());

    let subscription = subscribe(
        remote.clone(),
        SampleKey::new("logs/run.json", 1i64, 1),
        fast_retry_config(),
    );
    wait_for_status(&subscription, |s| matches!(s, StreamStatus::Failed(_))).await;

    // initial attempt plus ten retries, then terminal failure
    assert_eq!(remote.sample_call_count(), 11);
    let gaps: Vec<Duration> = {
        let calls = remote.sample_calls.lock();
        calls.windows(2).map(|pair| pair[1].at - pair[0].at).collect()
    };
    let expected: Vec<Duration> = [1u64, 2, 4, 8, 16, 32, 60, 60, 60, 60]
        .iter()
        .map(|&secs| Duration::from_secs(secs))
        .collect();
    assert_eq!(gaps, expected);

    // terminal: no further retries are ever scheduled
    tokio::time::sleep(Duration::from_secs(300)).await;
    assert_eq!(remote.sample_call_count(), 11);
    assert!(matches!(
        subscription.snapshot().status,
        StreamStatus::Failed(_)
    ));
}

#[tokio::test(start_paused = true)]
async fn test_success_resets_retry_budget() {
    let remote = ScriptedRemote::new();
    let mut script: Vec<Result<SampleDataResponse, SyncError>> = Vec::new();
    for _ in 0..9 {
        script.push(Err(transport("flaky")));
    }
    script.push(Ok(SampleDataResponse::NotModified));
    // nine more failures after the success must not trip the 10-retry bound
    for _ in 0..9 {
        script.push(Err(transport("flaky again")));
    }
    script.push(Ok(SampleDataResponse::NotFound));
    remote.script_sample(script);

    let subscription = subscribe(
        remote.clone(),
        SampleKey::new("logs/run.json", 1i64, 1),
        fast_retry_config(),
    );
    wait_for_status(&subscription, |s| *s == StreamStatus::Completed).await;
    assert_eq!(remote.sample_call_count(), 20);
}

#[tokio::test(start_paused = true)]
async fn test_stop_cancels_scheduled_poll() {
    let remote = ScriptedRemote::new();
    let subscription = subscribe(
        remote.clone(),
        SampleKey::new("logs/run.json", 1i64, 1),
        fast_retry_config(),
    );

    tokio::time::sleep(Duration::from_secs(3)).await;
    let before = remote.sample_call_count();
    assert!(before >= 1);

    subscription.stop();
    tokio::time::sleep(Duration::from_secs(30)).await;
    assert_eq!(remote.sample_call_count(), before);
}

#[tokio::test(start_paused = true)]
async fn test_dropping_subscription_cancels_polling() {
    let remote = ScriptedRemote::new();
    {
        let _subscription = subscribe(
            remote.clone(),
            SampleKey::new("logs/run.json", 1i64, 1),
            fast_retry_config(),
        );
        tokio::time::sleep(Duration::from_secs(3)).await;
    }
    let before = remote.sample_call_count();
    tokio::time::sleep(Duration::from_secs(30)).await;
    assert_eq!(remote.sample_call_count(), before);
}

#[tokio::test(start_paused = true)]
async fn test_pending_monitor_carries_etag_and_terminates_on_not_found() {
    let remote = ScriptedRemote::new();
    remote.script_pending(vec![
        Ok(PendingSampleResponse::Ok(PendingSamples {
            samples: Vec::new(),
            metrics: Vec::new(),
            refresh: 2,
            etag: "v1".to_string(),
        })),
        Ok(PendingSampleResponse::NotModified),
        Ok(PendingSampleResponse::NotFound),
    ]);

    let monitor = evalsync::monitor_pending_samples(
        remote.clone(),
        "logs/run.json".to_string(),
        fast_retry_config(),
    );
    tokio::time::sleep(Duration::from_secs(10)).await;

    assert_eq!(monitor.current().map(|p| p.etag), Some("v1".to_string()));
    let etags = remote.pending_etags.lock().clone();
    // first request unconditional, then conditional on the served etag
    assert_eq!(etags[0], None);
    assert_eq!(etags[1].as_deref(), Some("v1"));

    // NotFound ended the loop: no further requests
    let count = etags.len();
    drop(etags);
    tokio::time::sleep(Duration::from_secs(30)).await;
    assert_eq!(remote.pending_etags.lock().len(), count);
}
