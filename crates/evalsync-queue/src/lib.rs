//! Priority-ordered, de-duplicating batch scheduler for background fetch jobs.
//!
//! A [`WorkQueue`] accepts items keyed by a caller-supplied dedup key, drains
//! them strictly in priority order (FIFO within a tier), and hands them to an
//! async batch worker in chunks of at most `batch_size`. Exactly one batch is
//! in flight per queue instance, and a `processing_delay` pause is observed
//! between batches so background work never monopolizes the scheduler.
//!
//! Worker failures fail the whole batch: the items are dropped (retry policy
//! is the caller's concern) and the completion callback is not invoked.

use std::cmp::Reverse;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use parking_lot::Mutex;
use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, warn};

/// Scheduling priority; queues drain High before Medium before Low.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Priority {
    Low,
    Medium,
    High,
}

/// Queue tuning knobs.
#[derive(Debug, Clone, Copy)]
pub struct QueueConfig {
    /// Maximum items handed to the worker per invocation.
    pub batch_size: usize,
    /// Pause between the completion of one batch and the dispatch of the next.
    pub processing_delay: Duration,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            batch_size: 10,
            processing_delay: Duration::from_millis(100),
        }
    }
}

type Worker<I, O> = Arc<dyn Fn(Vec<I>) -> BoxFuture<'static, anyhow::Result<Vec<O>>> + Send + Sync>;
type OnComplete<I, O> = Arc<dyn Fn(&[O], &[I]) + Send + Sync>;

// Drain order: highest priority first, FIFO (by enqueue sequence) within a
// tier. The key index beside the map makes a re-prioritizing enqueue an
// O(log n) reposition instead of a scan.
type SlotKey = (Reverse<Priority>, u64);

struct PendingItem<I> {
    key: String,
    item: I,
}

struct QueueState<I> {
    pending: BTreeMap<SlotKey, PendingItem<I>>,
    index: HashMap<String, SlotKey>,
    in_flight: HashSet<String>,
    next_seq: u64,
    draining: bool,
}

impl<I> Default for QueueState<I> {
    fn default() -> Self {
        Self {
            pending: BTreeMap::new(),
            index: HashMap::new(),
            in_flight: HashSet::new(),
            next_seq: 0,
            draining: false,
        }
    }
}

struct QueueInner<I, O> {
    config: QueueConfig,
    worker: Worker<I, O>,
    on_complete: Option<OnComplete<I, O>>,
    state: Mutex<QueueState<I>>,
    /// Serializes batch execution: one batch in flight per queue instance,
    /// shared between the background drain and `at_once`.
    batch_gate: AsyncMutex<()>,
}

/// Generic batched job runner; see the module docs.
pub struct WorkQueue<I, O> {
    inner: Arc<QueueInner<I, O>>,
}

impl<I, O> Clone for WorkQueue<I, O> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<I, O> WorkQueue<I, O>
where
    I: Clone + Send + 'static,
    O: Send + 'static,
{
    pub fn new<F, Fut>(config: QueueConfig, worker: F) -> Self
    where
        F: Fn(Vec<I>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<Vec<O>>> + Send + 'static,
    {
        Self::build(config, worker, None)
    }

    /// Queue with a completion callback invoked after each successful batch
    /// with the outputs and their positionally aligned inputs.
    pub fn with_completion<F, Fut, C>(config: QueueConfig, worker: F, on_complete: C) -> Self
    where
        F: Fn(Vec<I>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<Vec<O>>> + Send + 'static,
        C: Fn(&[O], &[I]) + Send + Sync + 'static,
    {
        Self::build(config, worker, Some(Arc::new(on_complete)))
    }

    fn build<F, Fut>(config: QueueConfig, worker: F, on_complete: Option<OnComplete<I, O>>) -> Self
    where
        F: Fn(Vec<I>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<Vec<O>>> + Send + 'static,
    {
        let worker: Worker<I, O> =
            Arc::new(move |items| -> BoxFuture<'static, anyhow::Result<Vec<O>>> {
                Box::pin(worker(items))
            });
        Self {
            inner: Arc::new(QueueInner {
                config,
                worker,
                on_complete,
                state: Mutex::new(QueueState::default()),
                batch_gate: AsyncMutex::new(()),
            }),
        }
    }

    /// Enqueue items for background execution, de-duplicated by `key_fn`.
    ///
    /// A key already queued is never duplicated: the later call's priority
    /// and payload win, with the item keeping its original FIFO position
    /// within its (possibly new) tier. A key currently mid-batch is not
    /// re-executed.
    pub fn enqueue<F>(&self, items: Vec<I>, key_fn: F, priority: Priority)
    where
        F: Fn(&I) -> String,
    {
        let mut state = self.inner.state.lock();
        for item in items {
            let key = key_fn(&item);
            if state.in_flight.contains(&key) {
                debug!(key = %key, "item mid-batch; skipping re-enqueue");
                continue;
            }
            let slot = match state.index.get(&key).copied() {
                Some(existing) => {
                    let pending = state.pending.remove(&existing);
                    debug_assert!(pending.is_some());
                    (Reverse(priority), existing.1)
                }
                None => {
                    let seq = state.next_seq;
                    state.next_seq += 1;
                    (Reverse(priority), seq)
                }
            };
            state.index.insert(key.clone(), slot);
            state.pending.insert(slot, PendingItem { key, item });
        }
        if !state.pending.is_empty() && !state.draining {
            state.draining = true;
            drop(state);
            let inner = Arc::clone(&self.inner);
            tokio::spawn(async move {
                Self::drain(inner).await;
            });
        }
    }

    /// Execute the given items immediately as one or more batches, bypassing
    /// the scheduling delay (for callers blocking on the result). Still
    /// respects `batch_size` and the one-batch-in-flight discipline, and
    /// removes any queued duplicates so they are not executed twice.
    pub async fn at_once<F>(&self, items: Vec<I>, key_fn: F) -> anyhow::Result<Vec<O>>
    where
        F: Fn(&I) -> String,
    {
        let keys: Vec<String> = items.iter().map(|item| key_fn(item)).collect();
        {
            let mut state = self.inner.state.lock();
            for key in &keys {
                if let Some(slot) = state.index.remove(key) {
                    state.pending.remove(&slot);
                }
                state.in_flight.insert(key.clone());
            }
        }

        let mut outputs = Vec::with_capacity(items.len());
        let mut result = Ok(());
        for chunk in items.chunks(self.inner.config.batch_size) {
            match Self::run_batch(&self.inner, chunk.to_vec()).await {
                Ok(mut chunk_outputs) => outputs.append(&mut chunk_outputs),
                Err(error) => {
                    result = Err(error);
                    break;
                }
            }
        }

        {
            let mut state = self.inner.state.lock();
            for key in &keys {
                state.in_flight.remove(key);
            }
        }

        result.map(|_| outputs)
    }

    /// True while anything is queued or executing; drives activity
    /// indicators.
    pub fn is_processing(&self) -> bool {
        let state = self.inner.state.lock();
        !state.pending.is_empty() || !state.in_flight.is_empty()
    }

    async fn drain(inner: Arc<QueueInner<I, O>>) {
        loop {
            let batch: Vec<PendingItem<I>> = {
                let mut state = inner.state.lock();
                if state.pending.is_empty() {
                    state.draining = false;
                    return;
                }
                let slots: Vec<SlotKey> = state
                    .pending
                    .keys()
                    .take(inner.config.batch_size)
                    .copied()
                    .collect();
                let mut batch = Vec::with_capacity(slots.len());
                for slot in slots {
                    if let Some(pending) = state.pending.remove(&slot) {
                        state.index.remove(&pending.key);
                        state.in_flight.insert(pending.key.clone());
                        batch.push(pending);
                    }
                }
                batch
            };

            let keys: Vec<String> = batch.iter().map(|p| p.key.clone()).collect();
            let items: Vec<I> = batch.into_iter().map(|p| p.item).collect();
            if let Err(error) = Self::run_batch(&inner, items).await {
                warn!(error = %error, "batch worker failed; dropping batch");
            }

            // guard must not live across the sleep below
            {
                let mut state = inner.state.lock();
                for key in &keys {
                    state.in_flight.remove(key);
                }
            }

            tokio::time::sleep(inner.config.processing_delay).await;
        }
    }

    async fn run_batch(inner: &Arc<QueueInner<I, O>>, items: Vec<I>) -> anyhow::Result<Vec<O>> {
        if items.is_empty() {
            return Ok(Vec::new());
        }
        let _gate = inner.batch_gate.lock().await;
        let outputs = (inner.worker)(items.clone()).await?;
        if outputs.len() != items.len() {
            warn!(
                outputs = outputs.len(),
                inputs = items.len(),
                "batch worker returned misaligned outputs"
            );
        }
        if let Some(on_complete) = &inner.on_complete {
            on_complete(&outputs, &items);
        }
        Ok(outputs)
    }
}
