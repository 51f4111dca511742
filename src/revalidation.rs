//! Single-Flight Background Revalidation
//!
//! A stale read hands its key and a fetch function to the [`Revalidator`]. The
//! revalidator keeps at most one revalidation per key in flight (dedup map) and
//! feeds accepted tasks into the [`RevalidationQueue`], whose single worker
//! fetches one task at a time with a fixed pause between tasks. Distinct keys are
//! fetched in FIFO order, so upstream load stays bounded no matter how many stale
//! reads happen at once.
//!
//! Per-key state: `Idle -> Scheduled -> Fetching -> Idle`. A key is `Idle` when it
//! is absent from the dedup map; the worker removes it when the fetch settles,
//! whatever the outcome.

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use futures_util::FutureExt;
use parking_lot::Mutex;
use serde_json::Value;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::engine::{CacheEngine, RevalidationOutcome};
use crate::entry::TtlOptions;
use crate::stats::RuntimeCounters;

/// Future returned by a fetch function: the raw upstream JSON
pub type FetchFuture = Pin<Box<dyn Future<Output = anyhow::Result<Value>> + Send>>;

/// Zero-argument upstream fetch
pub type FetchFn = Box<dyn FnOnce() -> FetchFuture + Send>;

/// Acceptance check for a freshly fetched payload
pub type PayloadValidator = Arc<dyn Fn(&Value) -> bool + Send + Sync>;

/// Box an async closure as a [`FetchFn`]
///
/// ```rust
/// use odata_swr_cache::fetch_fn;
/// use serde_json::json;
///
/// let fetch = fetch_fn(|| async { Ok(json!({"value": []})) });
/// # drop(fetch);
/// ```
pub fn fetch_fn<F, Fut>(fetch: F) -> FetchFn
where
    F: FnOnce() -> Fut + Send + 'static,
    Fut: Future<Output = anyhow::Result<Value>> + Send + 'static,
{
    Box::new(move || Box::pin(fetch()))
}

/// How a fresh payload is written back
#[derive(Clone, Default)]
pub struct RevalidationOptions {
    /// TTL for the refreshed entry (configured defaults when `None`)
    pub ttl: Option<TtlOptions>,
    /// Merge collections item by item instead of replacing the entry
    pub enable_differential: bool,
    /// The endpoint is known to return a collection envelope
    pub collection: bool,
    /// Rejecting validator keeps the stale entry
    pub validator: Option<PayloadValidator>,
}

impl RevalidationOptions {
    /// Differential merge for a collection endpoint
    #[must_use]
    pub fn differential() -> Self {
        Self {
            enable_differential: true,
            collection: true,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_ttl(mut self, ttl: TtlOptions) -> Self {
        self.ttl = Some(ttl);
        self
    }

    #[must_use]
    pub fn with_validator<F>(mut self, validator: F) -> Self
    where
        F: Fn(&Value) -> bool + Send + Sync + 'static,
    {
        self.validator = Some(Arc::new(validator));
        self
    }

    fn merges(&self) -> bool {
        self.enable_differential && self.collection
    }
}

impl std::fmt::Debug for RevalidationOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RevalidationOptions")
            .field("ttl", &self.ttl)
            .field("enable_differential", &self.enable_differential)
            .field("collection", &self.collection)
            .field("validator", &self.validator.is_some())
            .finish()
    }
}

/// Position of a key in the revalidation lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RevalidationState {
    /// Waiting in the queue
    Scheduled,
    /// Upstream fetch running
    Fetching,
}

/// Result of a scheduling request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScheduleOutcome {
    /// Task accepted into the queue
    Scheduled,
    /// Key already in flight, request dropped
    Deduplicated,
    /// Store disabled or disconnected, or the worker is not running
    Skipped,
}

/// RAII cleanup guard for dedup-map entries
/// Ensures the key is removed even on early return, panic or task abort
pub(crate) struct CleanupGuard<'a, V> {
    pub(crate) map: &'a DashMap<String, V>,
    pub(crate) key: String,
}

impl<V> Drop for CleanupGuard<'_, V> {
    fn drop(&mut self) {
        self.map.remove(&self.key);
    }
}

struct RevalidationTask {
    key: String,
    fetch: FetchFn,
    options: RevalidationOptions,
}

/// Channel-fed sequential worker
pub struct RevalidationQueue {
    sender: Mutex<Option<mpsc::UnboundedSender<RevalidationTask>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
    queued: Arc<AtomicUsize>,
    delay: Duration,
}

impl RevalidationQueue {
    fn new(delay: Duration) -> Self {
        Self {
            sender: Mutex::new(None),
            worker: Mutex::new(None),
            queued: Arc::new(AtomicUsize::new(0)),
            delay,
        }
    }

    /// Tasks waiting for the worker
    #[must_use]
    pub fn len(&self) -> usize {
        self.queued.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn is_running(&self) -> bool {
        self.sender.lock().is_some()
    }

    fn start(&self, engine: Arc<CacheEngine>, in_flight: Arc<DashMap<String, RevalidationState>>) {
        let mut sender = self.sender.lock();
        if sender.is_some() {
            return;
        }
        let (tx, rx) = mpsc::unbounded_channel();
        *sender = Some(tx);

        let handle = tokio::spawn(run_worker(rx, engine, in_flight, Arc::clone(&self.queued), self.delay));
        *self.worker.lock() = Some(handle);
        info!(delay_ms = self.delay.as_millis(), "Revalidation worker started");
    }

    fn push(&self, task: RevalidationTask) -> Result<(), RevalidationTask> {
        let sender = self.sender.lock();
        let Some(tx) = sender.as_ref() else {
            return Err(task);
        };
        self.queued.fetch_add(1, Ordering::SeqCst);
        tx.send(task).map_err(|e| {
            self.queued.fetch_sub(1, Ordering::SeqCst);
            e.0
        })
    }

    /// Close the channel and wait up to `grace` for the worker to drain
    ///
    /// Returns `false` if the worker had to be aborted.
    async fn shutdown(&self, grace: Duration) -> bool {
        drop(self.sender.lock().take());
        let handle = self.worker.lock().take();
        let Some(mut handle) = handle else {
            return true;
        };

        let drained = if let Ok(joined) = tokio::time::timeout(grace, &mut handle).await {
            if let Err(e) = joined {
                warn!(error = %e, "Revalidation worker ended abnormally");
            }
            true
        } else {
            warn!(grace_ms = grace.as_millis(), "Revalidation worker did not drain in time, aborting");
            handle.abort();
            false
        };
        self.queued.store(0, Ordering::SeqCst);
        info!(drained, "Revalidation worker stopped");
        drained
    }
}

async fn run_worker(
    mut rx: mpsc::UnboundedReceiver<RevalidationTask>,
    engine: Arc<CacheEngine>,
    in_flight: Arc<DashMap<String, RevalidationState>>,
    queued: Arc<AtomicUsize>,
    delay: Duration,
) {
    while let Some(task) = rx.recv().await {
        queued.fetch_sub(1, Ordering::SeqCst);
        process(task, &engine, &in_flight).await;
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
    }
    debug!("Revalidation channel closed, worker exiting");
}

async fn process(task: RevalidationTask, engine: &CacheEngine, in_flight: &DashMap<String, RevalidationState>) {
    let RevalidationTask { key, fetch, options } = task;
    let _cleanup = CleanupGuard {
        map: in_flight,
        key: key.clone(),
    };
    if let Some(mut state) = in_flight.get_mut(&key) {
        *state = RevalidationState::Fetching;
    }

    let counters = &engine.counters;
    let fetched = AssertUnwindSafe(async move { fetch().await })
        .catch_unwind()
        .await
        .unwrap_or_else(|_| Err(anyhow::anyhow!("fetch function panicked")));
    let fresh = match fetched {
        Ok(fresh) => fresh,
        Err(e) => {
            warn!(key = %key, error = %e, "Background revalidation fetch failed, keeping stale entry");
            RuntimeCounters::bump(&counters.revalidations_failed);
            return;
        }
    };

    if let Some(validator) = &options.validator
        && !validator(&fresh)
    {
        warn!(key = %key, "Revalidated payload rejected by validator, keeping stale entry");
        RuntimeCounters::bump(&counters.revalidations_failed);
        return;
    }

    let ttl = options.ttl.unwrap_or_else(|| engine.default_ttl());
    match engine.apply_revalidation(&key, fresh, &ttl, options.merges()).await {
        RevalidationOutcome::WriteFailed => {
            debug!(key = %key, "Revalidated entry could not be written");
            RuntimeCounters::bump(&counters.revalidations_failed);
        }
        outcome => {
            debug!(key = %key, ?outcome, "Revalidation complete");
            RuntimeCounters::bump(&counters.revalidations_succeeded);
        }
    }
}

/// Dedup map plus queue
pub struct Revalidator {
    engine: Arc<CacheEngine>,
    in_flight: Arc<DashMap<String, RevalidationState>>,
    queue: RevalidationQueue,
}

impl Revalidator {
    pub(crate) fn new(engine: Arc<CacheEngine>) -> Self {
        let delay = engine.config.revalidation_delay;
        Self {
            engine,
            in_flight: Arc::new(DashMap::new()),
            queue: RevalidationQueue::new(delay),
        }
    }

    /// Start the worker (idempotent); must run inside a Tokio runtime
    pub(crate) fn start(&self) {
        self.queue.start(Arc::clone(&self.engine), Arc::clone(&self.in_flight));
    }

    /// Register `key` and enqueue its fetch unless it is already in flight
    pub fn schedule(&self, key: &str, fetch: FetchFn, options: RevalidationOptions) -> ScheduleOutcome {
        if !self.engine.store.is_available() || !self.queue.is_running() {
            debug!(key = %key, "Cache unavailable, skipping background revalidation");
            return ScheduleOutcome::Skipped;
        }

        match self.in_flight.entry(key.to_string()) {
            Entry::Occupied(_) => {
                debug!(key = %key, "Revalidation already in flight");
                RuntimeCounters::bump(&self.engine.counters.revalidations_deduplicated);
                return ScheduleOutcome::Deduplicated;
            }
            Entry::Vacant(slot) => {
                slot.insert(RevalidationState::Scheduled);
            }
        }

        let task = RevalidationTask {
            key: key.to_string(),
            fetch,
            options,
        };
        if self.queue.push(task).is_err() {
            self.in_flight.remove(key);
            debug!(key = %key, "Revalidation worker stopped, dropping task");
            return ScheduleOutcome::Skipped;
        }
        RuntimeCounters::bump(&self.engine.counters.revalidations_scheduled);
        debug!(key = %key, queued = self.queue.len(), "Background revalidation scheduled");
        ScheduleOutcome::Scheduled
    }

    /// Current state of `key` (`None` means idle)
    #[must_use]
    pub fn state(&self, key: &str) -> Option<RevalidationState> {
        self.in_flight.get(key).map(|s| *s)
    }

    /// Keys scheduled or fetching
    #[must_use]
    pub fn in_flight_count(&self) -> usize {
        self.in_flight.len()
    }

    /// Tasks waiting for the worker
    #[must_use]
    pub fn queued_count(&self) -> usize {
        self.queue.len()
    }

    /// Stop the worker within `grace`, then forget everything in flight
    pub(crate) async fn shutdown(&self, grace: Duration) -> bool {
        let drained = self.queue.shutdown(grace).await;
        self.in_flight.clear();
        drained
    }
}
