//! Replication service: reconciles the local cache against the remote
//! manifest and drives the background fetch queues.
//!
//! `sync()` only ever mutates the handle manifest synchronously; preview and
//! detail content is always fetched through the work queues, so a slow or
//! large collection never blocks manifest reconciliation.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use evalsync_queue::{Priority, QueueConfig, WorkQueue};
use evalsync_types::{ConditionalToken, LogDetails, LogHandle, LogListing, LogPreview};

use crate::client::RemoteLogService;
use crate::context::ApplicationContext;
use crate::error::Result;
use crate::store::CacheStore;

#[derive(Debug, Clone, Copy)]
pub struct ReplicationConfig {
    /// Cadence of the periodic background reconciliation.
    pub sync_interval: Duration,
    pub preview_queue: QueueConfig,
    pub detail_queue: QueueConfig,
}

impl Default for ReplicationConfig {
    fn default() -> Self {
        Self {
            sync_interval: Duration::from_secs(5),
            preview_queue: QueueConfig {
                batch_size: 8,
                processing_delay: Duration::from_millis(100),
            },
            detail_queue: QueueConfig {
                batch_size: 3,
                processing_delay: Duration::from_millis(250),
            },
        }
    }
}

#[derive(Default)]
struct SyncGate {
    running: bool,
    rerun: bool,
    /// A queued re-run keeps the strongest `force_progress` of the calls that
    /// were folded into it.
    rerun_force: bool,
}

impl SyncGate {
    /// Returns true if the caller should run a pass itself; otherwise the
    /// request was folded into the in-flight pass as a re-run.
    fn enter(&mut self, force: bool) -> bool {
        if self.running {
            self.rerun = true;
            self.rerun_force |= force;
            false
        } else {
            self.running = true;
            true
        }
    }

    /// Settle a finished pass: `Some(force)` when a queued re-run should
    /// execute next, `None` when the gate is released.
    fn finish(&mut self, ok: bool) -> Option<bool> {
        if ok && self.rerun {
            self.rerun = false;
            let force = self.rerun_force;
            self.rerun_force = false;
            Some(force)
        } else {
            self.running = false;
            self.rerun = false;
            self.rerun_force = false;
            None
        }
    }
}

struct ReplicationInner {
    cache: Arc<dyn CacheStore>,
    remote: Arc<dyn RemoteLogService>,
    context: Arc<dyn ApplicationContext>,
    preview_queue: WorkQueue<LogHandle, Option<LogPreview>>,
    detail_queue: WorkQueue<LogHandle, Option<LogDetails>>,
    gate: Mutex<SyncGate>,
}

/// Handle to a running replication loop. Clone to share; `stop()` shuts the
/// periodic task down cooperatively.
#[derive(Clone)]
pub struct ReplicationService {
    inner: Arc<ReplicationInner>,
    shutdown: watch::Sender<bool>,
}

impl ReplicationService {
    /// Wire the fetch queues and spawn the periodic sync task (which runs an
    /// initial pass immediately).
    pub fn start(
        cache: Arc<dyn CacheStore>,
        remote: Arc<dyn RemoteLogService>,
        context: Arc<dyn ApplicationContext>,
        config: ReplicationConfig,
    ) -> Self {
        let service = Self::new(cache, remote, context, config);
        let mut shutdown_rx = service.shutdown.subscribe();
        let periodic = service.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(config.sync_interval);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        if let Err(sync_error) = periodic.sync(false).await {
                            error!(error = %sync_error, "background sync failed");
                        }
                    }
                    _ = shutdown_rx.changed() => {
                        if *shutdown_rx.borrow() {
                            debug!("replication loop shutting down");
                            return;
                        }
                    }
                }
            }
        });
        service
    }

    /// Wire the fetch queues without spawning the periodic task; callers
    /// drive `sync()` themselves.
    pub fn new(
        cache: Arc<dyn CacheStore>,
        remote: Arc<dyn RemoteLogService>,
        context: Arc<dyn ApplicationContext>,
        config: ReplicationConfig,
    ) -> Self {
        let preview_queue = {
            let remote = Arc::clone(&remote);
            let cache = Arc::clone(&cache);
            let context = Arc::clone(&context);
            WorkQueue::with_completion(
                config.preview_queue,
                move |handles: Vec<LogHandle>| {
                    let remote = Arc::clone(&remote);
                    let cache = Arc::clone(&cache);
                    async move {
                        let names: Vec<String> =
                            handles.iter().map(|h| h.name.clone()).collect();
                        let previews = remote
                            .get_log_summaries(&names)
                            .await
                            .map_err(anyhow::Error::from)?;
                        if let Err(error) = cache.write_previews(&previews, &handles).await {
                            warn!(error = %error, "preview cache write failed; treating as miss");
                        }
                        Ok(previews.into_iter().map(Some).collect())
                    }
                },
                move |outputs: &[Option<LogPreview>], _inputs: &[LogHandle]| {
                    let fetched: Vec<LogPreview> =
                        outputs.iter().flatten().cloned().collect();
                    if !fetched.is_empty() {
                        context.update_log_previews(fetched);
                    }
                },
            )
        };

        let detail_queue = {
            let remote = Arc::clone(&remote);
            let cache = Arc::clone(&cache);
            WorkQueue::new(config.detail_queue, move |handles: Vec<LogHandle>| {
                let remote = Arc::clone(&remote);
                let cache = Arc::clone(&cache);
                async move {
                    // details fail per-item without failing the batch
                    let mut outputs = Vec::with_capacity(handles.len());
                    for handle in &handles {
                        match remote.get_log_details(&handle.name).await {
                            Ok(details) => {
                                if let Err(error) = cache.write_details(handle, &details).await {
                                    warn!(
                                        log = %handle.name,
                                        error = %error,
                                        "detail cache write failed; treating as miss"
                                    );
                                }
                                outputs.push(Some(details));
                            }
                            Err(error) => {
                                warn!(log = %handle.name, error = %error, "detail fetch failed");
                                outputs.push(None);
                            }
                        }
                    }
                    Ok(outputs)
                }
            })
        };

        let inner = Arc::new(ReplicationInner {
            cache,
            remote,
            context,
            preview_queue,
            detail_queue,
            gate: Mutex::new(SyncGate::default()),
        });

        let (shutdown, _) = watch::channel(false);
        Self { inner, shutdown }
    }

    /// Stop the periodic task. Cooperative: an in-flight pass finishes, no
    /// further passes are scheduled.
    pub fn stop(&self) {
        let _ = self.shutdown.send(true);
    }

    /// Run one reconciliation pass. A call arriving while a pass is in
    /// flight flags a re-run and returns; the in-flight pass re-runs after
    /// finishing rather than diffing concurrently against a moving manifest.
    /// A forced call folded into a re-run keeps its `force_progress`.
    pub async fn sync(&self, force_progress: bool) -> Result<()> {
        if !self.inner.gate.lock().enter(force_progress) {
            debug!("sync already in flight; queueing re-run");
            return Ok(());
        }

        let mut force = force_progress;
        loop {
            let result = self.sync_once(force).await;
            match self.inner.gate.lock().finish(result.is_ok()) {
                Some(rerun_force) => force = rerun_force,
                None => return result,
            }
        }
    }

    async fn sync_once(&self, force_progress: bool) -> Result<()> {
        let inner = &self.inner;

        // storage failures degrade to an empty local set (cache-miss), never
        // abort the pass
        let local = match inner.cache.read_logs().await {
            Ok(handles) => handles,
            Err(error) => {
                warn!(error = %error, "reading cached handles failed; treating as empty");
                Vec::new()
            }
        };

        let token = ConditionalToken::for_handles(&local);
        let manifest = match inner.remote.list_logs(token).await? {
            LogListing::NotModified => {
                debug!("manifest unchanged");
                return Ok(());
            }
            LogListing::Listing(handles) => handles,
        };

        // diff: remote-authoritative; a handle absent locally or with a
        // strictly newer mtime invalidates its cached projections
        let local_versions: std::collections::HashMap<&str, i64> =
            local.iter().map(|h| (h.name.as_str(), h.mtime)).collect();
        let mut invalidated: HashSet<String> = HashSet::new();
        for handle in &manifest {
            let stale = match local_versions.get(handle.name.as_str()) {
                None => true,
                Some(&mtime) => handle.mtime > mtime,
            };
            if stale {
                invalidated.insert(handle.name.clone());
                if let Err(error) = inner.cache.clear_cache_for_file(&handle.name).await {
                    warn!(log = %handle.name, error = %error, "cache invalidation failed");
                }
            }
        }

        if let Err(error) = inner.cache.write_logs(&manifest).await {
            warn!(error = %error, "persisting handle list failed");
        }

        // keep the selection pinned to the same log across the refresh
        if let Some(selected) = inner.context.get_selected_log() {
            if let Some(index) = selected_index(&manifest, &selected) {
                inner.context.set_selected_log_index(index);
            }
        }
        inner.context.set_log_handles(manifest.clone());

        let cached_previews: HashSet<String> = match inner.cache.read_previews(&manifest).await {
            Ok(entries) => entries.into_iter().map(|e| e.key).collect(),
            Err(error) => {
                warn!(error = %error, "reading cached previews failed; refetching all");
                HashSet::new()
            }
        };
        let cached_details: HashSet<String> = match inner.cache.read_details(&manifest).await {
            Ok(entries) => entries.into_iter().map(|e| e.key).collect(),
            Err(error) => {
                warn!(error = %error, "reading cached details failed; refetching all");
                HashSet::new()
            }
        };

        let need_previews: Vec<LogHandle> = manifest
            .iter()
            .filter(|h| invalidated.contains(&h.name) || !cached_previews.contains(&h.name))
            .cloned()
            .collect();
        let need_details: Vec<LogHandle> = manifest
            .iter()
            .filter(|h| invalidated.contains(&h.name) || !cached_details.contains(&h.name))
            .cloned()
            .collect();

        let priority = if force_progress {
            Priority::High
        } else {
            Priority::Medium
        };
        if !need_previews.is_empty() || !need_details.is_empty() {
            info!(
                previews = need_previews.len(),
                details = need_details.len(),
                invalidated = invalidated.len(),
                "scheduling content fetches"
            );
        }
        self.queue_log_previews(need_previews, priority);
        self.queue_log_details(need_details, priority);

        Ok(())
    }

    /// Schedule background preview fetches.
    pub fn queue_log_previews(&self, handles: Vec<LogHandle>, priority: Priority) {
        if handles.is_empty() {
            return;
        }
        self.inner
            .preview_queue
            .enqueue(handles, |h| h.name.clone(), priority);
    }

    /// Schedule background detail fetches.
    pub fn queue_log_details(&self, handles: Vec<LogHandle>, priority: Priority) {
        if handles.is_empty() {
            return;
        }
        self.inner
            .detail_queue
            .enqueue(handles, |h| h.name.clone(), priority);
    }

    /// Fetch previews immediately, bypassing the scheduling delay (used for
    /// an explicit user-forced reload that blocks on the result).
    pub async fn fetch_previews_now(
        &self,
        handles: Vec<LogHandle>,
    ) -> Result<Vec<Option<LogPreview>>, anyhow::Error> {
        self.inner
            .preview_queue
            .at_once(handles, |h| h.name.clone())
            .await
    }

    /// Aggregate activity signal for a UI indicator.
    pub fn is_fetching(&self) -> bool {
        self.inner.preview_queue.is_processing() || self.inner.detail_queue.is_processing()
    }
}

/// Locate the selected log in a refreshed handle list. The stored selection
/// may be a bare file name while the manifest carries full URIs (or the
/// reverse), so match exactly first, then by suffix in either direction.
fn selected_index(handles: &[LogHandle], selected: &str) -> Option<usize> {
    handles
        .iter()
        .position(|h| h.name == selected)
        .or_else(|| {
            handles
                .iter()
                .position(|h| h.name.ends_with(selected) || selected.ends_with(&h.name))
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sync_gate_coalesces_and_keeps_forced_flag() {
        let mut gate = SyncGate::default();
        assert!(gate.enter(false));

        // a forced call folded into the running pass must not lose its flag
        assert!(!gate.enter(true));
        assert_eq!(gate.finish(true), Some(true));

        // the re-run settles with nothing queued: gate released
        assert_eq!(gate.finish(true), None);
        assert!(gate.enter(false));
    }

    #[test]
    fn test_sync_gate_failed_pass_drops_queued_rerun() {
        let mut gate = SyncGate::default();
        assert!(gate.enter(true));
        assert!(!gate.enter(false));
        assert_eq!(gate.finish(false), None);
        assert!(gate.enter(false));
    }

    #[test]
    fn test_selected_index_prefers_exact_match() {
        let handles = vec![
            LogHandle::new("dir/a.json", 1),
            LogHandle::new("a.json", 1),
        ];
        assert_eq!(selected_index(&handles, "a.json"), Some(1));
        assert_eq!(selected_index(&handles, "dir/a.json"), Some(0));
    }

    #[test]
    fn test_selected_index_suffix_matches_either_direction() {
        let handles = vec![LogHandle::new("s3://bucket/logs/b.json", 2)];
        assert_eq!(selected_index(&handles, "logs/b.json"), Some(0));
        let handles = vec![LogHandle::new("b.json", 2)];
        assert_eq!(selected_index(&handles, "s3://bucket/logs/b.json"), Some(0));
        assert_eq!(selected_index(&handles, "missing.json"), None);
    }
}
