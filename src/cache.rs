//! Cache Manager: owns the published [`Index`] and decides when to rebuild.
//!
//! # Lifecycle
//!
//! ```text
//! Empty ──▶ Loading ──▶ Ready ──(ttl)──▶ Stale ──▶ Loading ──▶ Ready …
//! ```
//!
//! Readers take an `Arc<Index>` out of an [`ArcSwapOption`] and drop the
//! handle when their request ends; publishing a new Index never waits for
//! them and the old one is freed when the last reader lets go.
//!
//! At most one rebuild runs at a time. Callers that find a rebuild in
//! flight queue on the rebuild gate and, once through, take the outcome of
//! the rebuild they waited on instead of starting their own.
//!
//! A load that outlives the source timeout is left running and kept in
//! the ledger. No new load starts until it finishes; the next rebuild then
//! collects its result instead.
//!
//! A failed rebuild keeps the last good Index published. Only when there
//! has never been one does the failure reach the caller, as
//! [`LinearError::NoDataAvailable`]. For `retry_backoff` after a failure,
//! callers get the fallback straight away without another attempt.

use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use arc_swap::ArcSwapOption;
use parking_lot::Mutex;
use serde::Serialize;

use crate::config::Config;
use crate::error::{LinearError, LinearResult};
use crate::index::{load_index, Index};
use crate::schema::SnifferOptions;
use crate::source::RecordSource;

const DEFAULT_RETRY_BACKOFF: Duration = Duration::from_secs(5);

/// Monotonic time source, injectable so tests can expire the TTL.
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// A clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    base: Instant,
    offset_ms: AtomicU64,
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            base: Instant::now(),
            offset_ms: AtomicU64::new(0),
        }
    }

    pub fn advance(&self, by: Duration) {
        self.offset_ms
            .fetch_add(by.as_millis() as u64, Ordering::SeqCst);
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.base + Duration::from_millis(self.offset_ms.load(Ordering::SeqCst))
    }
}

/// Produces a complete Index. Called on a blocking thread.
pub trait IndexLoader: Send + Sync {
    fn load(&self) -> LinearResult<Index>;
}

/// The production loader: sample, decode and index a snapshot.
pub struct SnapshotLoader {
    source: Arc<dyn RecordSource>,
    path: PathBuf,
    opts: SnifferOptions,
}

impl SnapshotLoader {
    pub fn new(source: Arc<dyn RecordSource>, path: PathBuf, opts: SnifferOptions) -> Self {
        Self { source, path, opts }
    }
}

impl IndexLoader for SnapshotLoader {
    fn load(&self) -> LinearResult<Index> {
        load_index(self.source.as_ref(), &self.path, &self.opts)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheState {
    Empty,
    Loading,
    Ready,
    Stale,
}

struct Published {
    index: Arc<Index>,
    built_at: Instant,
}

type LoadTask = tokio::task::JoinHandle<LinearResult<Index>>;

#[derive(Default)]
struct Ledger {
    /// Completed rebuild attempts, successful or not.
    attempts: u64,
    loading: bool,
    last_error: Option<LinearError>,
    /// A load abandoned at its timeout that may still be running.
    in_flight: Option<LoadTask>,
    /// No rebuild is attempted from `snapshot()` before this instant.
    retry_after: Option<Instant>,
}

pub struct CacheManager {
    loader: Arc<dyn IndexLoader>,
    clock: Arc<dyn Clock>,
    ttl: Duration,
    source_timeout: Duration,
    retry_backoff: Duration,
    current: ArcSwapOption<Published>,
    rebuild_gate: tokio::sync::Mutex<()>,
    ledger: Mutex<Ledger>,
    rebuilds: AtomicU64,
}

impl CacheManager {
    pub fn new(
        loader: Arc<dyn IndexLoader>,
        clock: Arc<dyn Clock>,
        ttl: Duration,
        source_timeout: Duration,
    ) -> Self {
        Self {
            loader,
            clock,
            ttl,
            source_timeout,
            retry_backoff: DEFAULT_RETRY_BACKOFF,
            current: ArcSwapOption::empty(),
            rebuild_gate: tokio::sync::Mutex::new(()),
            ledger: Mutex::new(Ledger::default()),
            rebuilds: AtomicU64::new(0),
        }
    }

    pub fn with_retry_backoff(mut self, backoff: Duration) -> Self {
        self.retry_backoff = backoff;
        self
    }

    /// Cache over the configured snapshot, on the system clock.
    pub fn from_config(config: &Config, source: Arc<dyn RecordSource>) -> Self {
        let loader = SnapshotLoader::new(
            source,
            config.snapshot_path(),
            SnifferOptions::from(&config.schema),
        );
        Self::new(
            Arc::new(loader),
            Arc::new(SystemClock),
            config.cache.ttl(),
            config.cache.source_timeout(),
        )
        .with_retry_backoff(config.cache.retry_backoff())
    }

    pub fn state(&self) -> CacheState {
        if self.ledger.lock().loading {
            return CacheState::Loading;
        }
        match self.current.load_full() {
            None => CacheState::Empty,
            Some(p) if self.is_fresh(&p) => CacheState::Ready,
            Some(_) => CacheState::Stale,
        }
    }

    /// Number of rebuilds started so far.
    pub fn rebuild_count(&self) -> u64 {
        self.rebuilds.load(Ordering::SeqCst)
    }

    /// Age of the published Index, if any.
    pub fn age(&self) -> Option<Duration> {
        self.current
            .load_full()
            .map(|p| self.clock.now().saturating_duration_since(p.built_at))
    }

    fn is_fresh(&self, published: &Published) -> bool {
        self.clock.now().saturating_duration_since(published.built_at) < self.ttl
    }

    fn fresh(&self) -> Option<Arc<Index>> {
        self.current
            .load_full()
            .filter(|p| self.is_fresh(p))
            .map(|p| p.index.clone())
    }

    /// Current Index, rebuilding first if it is missing or past its TTL.
    pub async fn snapshot(&self) -> LinearResult<Arc<Index>> {
        if let Some(index) = self.fresh() {
            return Ok(index);
        }
        if let Some(served) = self.backing_off() {
            return served;
        }

        let seen_attempts = self.ledger.lock().attempts;
        let _gate = self.rebuild_gate.lock().await;

        // A rebuild finished while we queued: its outcome is ours.
        let finished_meanwhile = {
            let ledger = self.ledger.lock();
            (ledger.attempts != seen_attempts).then(|| ledger.last_error.clone())
        };
        if let Some(last_error) = finished_meanwhile {
            return match self.fresh() {
                Some(index) => Ok(index),
                None => self.fallback(last_error),
            };
        }

        if let Some(index) = self.fresh() {
            return Ok(index);
        }
        self.rebuild_locked().await
    }

    /// Rebuild now regardless of age. Waits for any rebuild in flight.
    pub async fn refresh(&self) -> LinearResult<Arc<Index>> {
        let _gate = self.rebuild_gate.lock().await;
        self.rebuild_locked().await
    }

    /// Must be called with the rebuild gate held.
    async fn rebuild_locked(&self) -> LinearResult<Arc<Index>> {
        let pending = self.ledger.lock().in_flight.take();
        let (generation, mut task) = match pending {
            Some(task) if !task.is_finished() => {
                self.ledger.lock().in_flight = Some(task);
                tracing::warn!("previous load is still running, not starting another");
                let generation = self.rebuilds.load(Ordering::SeqCst);
                return self.settle(generation, Err(LinearError::Timeout(self.source_timeout)));
            }
            Some(task) => {
                let generation = self.rebuilds.load(Ordering::SeqCst);
                tracing::info!(generation, "collecting result of a timed-out load");
                (generation, task)
            }
            None => {
                let generation = self.rebuilds.fetch_add(1, Ordering::SeqCst) + 1;
                tracing::info!(generation, "rebuilding index");
                let loader = self.loader.clone();
                (generation, tokio::task::spawn_blocking(move || loader.load()))
            }
        };

        self.ledger.lock().loading = true;
        let waited = tokio::time::timeout(self.source_timeout, &mut task).await;
        let outcome = match waited {
            Ok(Ok(result)) => result,
            Ok(Err(join_err)) => Err(LinearError::SourceUnavailable(format!(
                "rebuild task failed: {}",
                join_err
            ))),
            Err(_) => {
                self.ledger.lock().in_flight = Some(task);
                Err(LinearError::Timeout(self.source_timeout))
            }
        };
        self.settle(generation, outcome)
    }

    /// Record the outcome of a rebuild attempt and publish on success.
    fn settle(&self, generation: u64, outcome: LinearResult<Index>) -> LinearResult<Arc<Index>> {
        let mut ledger = self.ledger.lock();
        ledger.loading = false;
        ledger.attempts += 1;
        match outcome {
            Ok(index) => {
                let index = Arc::new(index);
                self.current.store(Some(Arc::new(Published {
                    index: index.clone(),
                    built_at: self.clock.now(),
                })));
                ledger.last_error = None;
                ledger.retry_after = None;
                Ok(index)
            }
            Err(e) => {
                tracing::warn!(generation, "index rebuild failed: {}", e);
                ledger.last_error = Some(e.clone());
                ledger.retry_after = Some(self.clock.now() + self.retry_backoff);
                drop(ledger);
                self.fallback(Some(e))
            }
        }
    }

    /// The fallback outcome while a recent failure is still backing off.
    fn backing_off(&self) -> Option<LinearResult<Arc<Index>>> {
        let ledger = self.ledger.lock();
        let until = ledger.retry_after?;
        if self.clock.now() >= until {
            return None;
        }
        let last_error = ledger.last_error.clone();
        drop(ledger);
        Some(self.fallback(last_error))
    }

    fn fallback(&self, error: Option<LinearError>) -> LinearResult<Arc<Index>> {
        match self.current.load_full() {
            Some(stale) => {
                tracing::warn!("serving stale index after failed rebuild");
                Ok(stale.index.clone())
            }
            None => {
                let reason = error
                    .map(|e| e.to_string())
                    .unwrap_or_else(|| "index has never been built".to_string());
                Err(LinearError::NoDataAvailable(reason))
            }
        }
    }
}
