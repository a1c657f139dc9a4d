//! Throttled persistence writer.
//!
//! [`ThrottledWriter::submit`] is fire-and-forget: the per-market throttle is
//! applied on the caller's task and eligible events go onto a bounded queue.
//! A delta inside the window is held, not lost: the newest held change per
//! market is merged into the next write of that market, or written by
//! [`ThrottledWriter::flush_due`] once the window reopens. Runners carried
//! over from a held change keep their last ladders, so a runner that only
//! moved inside the window is still persisted.
//!
//! One worker task drains the queue and turns each event into ordered
//! [`WriteOp`]s (baseline roster, price sides, projection), retrying each op
//! on transient store errors.

use std::sync::Arc;
use std::sync::Mutex as StdMutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use ahash::AHashMap;
use pf_core::config::StoreConfig;
use pf_core::error::StoreError;
use pf_core::throttle::ThrottleMap;
use pf_core::time_util::now_ms;
use pf_core::types::{
    FeedEvent, FeedEventReceiver, FeedEventSender, MarketChangeEvent, same_handicap,
};
use tokio::sync::Mutex;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, trace, warn};

use crate::catalog::CatalogLookup;
use crate::rows::{WriteOp, plan_writes};
use crate::store::PriceStore;

/// What happened to a submitted event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitOutcome {
    Queued,
    /// Inside the market's throttle window; held for a later write.
    Throttled,
    /// Queue at capacity; dropped.
    QueueFull,
    /// Writer already shut down.
    Closed,
}

/// Exponential backoff for transient store errors.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Total attempts per op, first one included.
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &StoreConfig) -> Self {
        Self {
            max_attempts: config.retry_max_attempts.max(1),
            base_delay: Duration::from_millis(config.retry_base_delay_ms),
            max_delay: Duration::from_millis(config.retry_max_delay_ms),
        }
    }

    /// Delay before retry number `retry` (1-based).
    pub fn delay(&self, retry: u32) -> Duration {
        let factor = 1u32 << retry.saturating_sub(1).min(16);
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }
}

#[derive(Debug, Default)]
pub struct WriterStats {
    submitted: AtomicU64,
    throttled: AtomicU64,
    dropped_full: AtomicU64,
    written: AtomicU64,
    retried: AtomicU64,
    abandoned: AtomicU64,
}

/// Point-in-time copy of [`WriterStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WriterStatsSnapshot {
    pub submitted: u64,
    pub throttled: u64,
    pub dropped_full: u64,
    /// Write ops applied.
    pub written: u64,
    pub retried: u64,
    /// Write ops given up on.
    pub abandoned: u64,
}

impl WriterStats {
    #[inline]
    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> WriterStatsSnapshot {
        WriterStatsSnapshot {
            submitted: self.submitted.load(Ordering::Relaxed),
            throttled: self.throttled.load(Ordering::Relaxed),
            dropped_full: self.dropped_full.load(Ordering::Relaxed),
            written: self.written.load(Ordering::Relaxed),
            retried: self.retried.load(Ordering::Relaxed),
            abandoned: self.abandoned.load(Ordering::Relaxed),
        }
    }
}

/// Throttle marks and the change held back for each throttled market.
struct Gate {
    throttle: ThrottleMap,
    pending: AHashMap<String, MarketChangeEvent>,
}

pub struct ThrottledWriter {
    queue: StdMutex<Option<mpsc::Sender<MarketChangeEvent>>>,
    gate: StdMutex<Gate>,
    window: Duration,
    stats: Arc<WriterStats>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl ThrottledWriter {
    /// Start the worker task. Must be called inside a tokio runtime.
    pub fn spawn(
        store: Arc<dyn PriceStore>,
        catalog: Arc<dyn CatalogLookup>,
        config: &StoreConfig,
    ) -> Self {
        let (tx, rx) = mpsc::channel(config.queue_capacity.max(1));
        let stats = Arc::new(WriterStats::default());
        let worker = Worker {
            store,
            catalog,
            policy: RetryPolicy::from_config(config),
            stats: stats.clone(),
            baselined: AHashMap::new(),
        };
        let handle = tokio::spawn(worker.run(rx));
        info!(
            "[writer] started (window {:?}, queue {})",
            config.throttle_window(),
            config.queue_capacity
        );
        Self {
            queue: StdMutex::new(Some(tx)),
            gate: StdMutex::new(Gate {
                throttle: ThrottleMap::new(config.throttle_window()),
                pending: AHashMap::new(),
            }),
            window: config.throttle_window(),
            stats,
            worker: Mutex::new(Some(handle)),
        }
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    fn sender(&self) -> Option<mpsc::Sender<MarketChangeEvent>> {
        self.queue.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    fn gate(&self) -> std::sync::MutexGuard<'_, Gate> {
        self.gate.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn submit(&self, event: MarketChangeEvent) -> SubmitOutcome {
        self.submit_at(event, Instant::now())
    }

    /// [`submit`](Self::submit) with an explicit clock reading.
    pub fn submit_at(&self, mut event: MarketChangeEvent, now: Instant) -> SubmitOutcome {
        WriterStats::bump(&self.stats.submitted);
        let Some(tx) = self.sender() else {
            return SubmitOutcome::Closed;
        };

        let closed = event.is_closed();
        let bypass = event.full_image || event.definition_changed || closed;
        {
            let mut gate = self.gate();
            if let Some(held) = gate.pending.remove(&event.market_id) {
                // A full image already carries every runner.
                if !event.full_image {
                    carry_forward(&mut event, held);
                }
            }
            if closed {
                gate.throttle.remove(&event.market_id);
            } else if !bypass && !gate.throttle.check_and_mark(&event.market_id, now) {
                WriterStats::bump(&self.stats.throttled);
                trace!("[writer] {} throttled, holding", event.market_id);
                gate.pending.insert(event.market_id.clone(), event);
                return SubmitOutcome::Throttled;
            }
        }

        self.enqueue(&tx, event)
    }

    /// Queue the held change of every market whose window has reopened.
    /// Returns how many were queued.
    pub fn flush_due(&self, now: Instant) -> usize {
        let Some(tx) = self.sender() else {
            return 0;
        };
        let due: Vec<MarketChangeEvent> = {
            let mut gate = self.gate();
            let Gate { throttle, pending } = &mut *gate;
            let ready: Vec<String> = pending
                .keys()
                .filter(|id| throttle.check_and_mark(id, now))
                .cloned()
                .collect();
            ready.iter().filter_map(|id| pending.remove(id)).collect()
        };
        if !due.is_empty() {
            debug!("[writer] flushing {} held markets", due.len());
        }
        due.into_iter()
            .map(|event| self.enqueue(&tx, event))
            .filter(|outcome| *outcome == SubmitOutcome::Queued)
            .count()
    }

    fn enqueue(
        &self,
        tx: &mpsc::Sender<MarketChangeEvent>,
        event: MarketChangeEvent,
    ) -> SubmitOutcome {
        match tx.try_send(event) {
            Ok(()) => SubmitOutcome::Queued,
            Err(TrySendError::Full(event)) => {
                WriterStats::bump(&self.stats.dropped_full);
                warn!("[writer] queue full, dropping {}", event.market_id);
                SubmitOutcome::QueueFull
            }
            Err(TrySendError::Closed(_)) => SubmitOutcome::Closed,
        }
    }

    pub fn stats(&self) -> WriterStatsSnapshot {
        self.stats.snapshot()
    }

    pub fn is_closed(&self) -> bool {
        self.queue
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .is_none()
    }

    /// Stop accepting events, queue every held change and wait until all
    /// of it is written.
    pub async fn shutdown(&self) {
        let tx = self.queue.lock().unwrap_or_else(|e| e.into_inner()).take();
        if let Some(tx) = tx {
            let held: Vec<MarketChangeEvent> =
                self.gate().pending.drain().map(|(_, e)| e).collect();
            for event in held {
                if tx.send(event).await.is_err() {
                    break;
                }
            }
        }
        let handle = self.worker.lock().await.take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                warn!("[writer] worker ended abnormally: {e}");
            }
            let s = self.stats();
            info!(
                "[writer] stopped: {} written, {} retried, {} abandoned, {} throttled",
                s.written, s.retried, s.abandoned, s.throttled
            );
        }
    }
}

struct Worker {
    store: Arc<dyn PriceStore>,
    catalog: Arc<dyn CatalogLookup>,
    policy: RetryPolicy,
    stats: Arc<WriterStats>,
    /// Market id → definition version whose roster is persisted.
    baselined: AHashMap<String, u64>,
}

impl Worker {
    async fn run(mut self, mut rx: mpsc::Receiver<MarketChangeEvent>) {
        while let Some(event) = rx.recv().await {
            self.write_event(&event).await;
        }
        debug!("[writer] queue drained");
    }

    async fn write_event(&mut self, event: &MarketChangeEvent) {
        let catalog = self.catalog.lookup(&event.market_id);
        if catalog.is_none() {
            self.catalog.note_missing(&event.market_id);
        }
        let version = event.definition.as_ref().map(|d| d.version);
        let baseline = match version {
            Some(v) => self.baselined.get(&event.market_id) != Some(&v),
            None => false,
        };

        let ops = plan_writes(event, catalog.as_ref(), baseline, now_ms() as i64);
        for op in &ops {
            match self.apply(op).await {
                Ok(()) => {
                    WriterStats::bump(&self.stats.written);
                    if let WriteOp::EnsureRunners { market_id, version, .. } = op {
                        self.baselined.insert(market_id.clone(), *version);
                    }
                }
                Err(e) => {
                    WriterStats::bump(&self.stats.abandoned);
                    warn!("[writer] abandoned {op}: {e}");
                }
            }
        }

        if event.is_closed() {
            self.baselined.remove(&event.market_id);
        }
    }

    async fn apply(&self, op: &WriteOp) -> Result<(), StoreError> {
        let mut attempt = 1;
        loop {
            match self.store.apply(op).await {
                Ok(()) => return Ok(()),
                Err(e) if e.is_transient() && attempt < self.policy.max_attempts => {
                    WriterStats::bump(&self.stats.retried);
                    let delay = self.policy.delay(attempt);
                    debug!("[writer] {op} attempt {attempt} failed ({e}), retrying in {delay:?}");
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

/// Merge the runners of an older held change into `event`. Runners already
/// in `event` win; runners no longer active under its definition are dropped.
fn carry_forward(event: &mut MarketChangeEvent, held: MarketChangeEvent) {
    for runner in held.runners {
        let present = event.runners.iter().any(|r| {
            r.selection_id == runner.selection_id && same_handicap(r.handicap, runner.handicap)
        });
        if present {
            continue;
        }
        let active = match &event.definition {
            Some(def) => def
                .runner_status(runner.selection_id, runner.handicap)
                .is_none_or(|s| s.is_active()),
            None => true,
        };
        if active {
            event.runners.push(runner);
        }
    }
    if event.total_matched.is_none() {
        event.total_matched = held.total_matched;
    }
}

/// Drain a feed event channel into `writer`, passing every event on to
/// `forward` when given. Held changes are flushed as their windows reopen.
/// Returns when the channel closes.
pub async fn run_event_pump(
    mut events: FeedEventReceiver,
    writer: Arc<ThrottledWriter>,
    forward: Option<FeedEventSender>,
) {
    let period = writer.window().max(Duration::from_millis(100));
    let mut flush = tokio::time::interval(period);
    flush.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            event = events.recv() => {
                let Some(event) = event else { break };
                if let FeedEvent::MarketChanged(change) = &event {
                    writer.submit(change.clone());
                }
                if let Some(tx) = &forward {
                    match tx.try_send(event) {
                        Ok(()) => {}
                        Err(TrySendError::Full(_)) => warn!("[writer] forward channel full, dropping event"),
                        Err(TrySendError::Closed(_)) => {}
                    }
                }
            }
            _ = flush.tick() => {
                writer.flush_due(Instant::now());
            }
        }
    }
    debug!("[writer] event pump finished");
}
