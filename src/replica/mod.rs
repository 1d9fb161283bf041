//! Replica facade
//!
//! `Replica` hands out consistent reads of the book while a single spawned
//! task owns ingestion:
//!
//! - start: connect, subscribe, install the initial snapshot, then spawn
//! - LIVE: apply in-order deltas, drop stale ones, resync on a gap
//! - CLOSED: after `shutdown()`, a peer close or a fatal error; queries still
//!   answer from the last good book
//!
//! Applied deltas are published on a broadcast channel (`events()`); resyncs
//! and the one fatal error go out on the signal channel (`errors()`).

mod guard;
mod ingest;
mod loader;

pub use guard::{Classification, SequenceGuard};
pub use loader::SnapshotLoader;

use parking_lot::{Mutex, RwLock};
use rust_decimal::Decimal;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::book::{LevelEntry, OrderBook, Side};
use crate::config::ReplicaConfig;
use crate::error::{ReplicaError, Result};
use crate::feed::{Delta, DeltaStream, RestSnapshotClient, SnapshotSource, WsDeltaStream};
use crate::metrics::{ReplicaMetrics, ReplicaMetricsSummary};
use ingest::Ingestor;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncState {
    Unsynced,
    Live,
    Closed,
}

/// Out-of-band signal from the ingestion task
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplicaSignal {
    /// A gap was repaired from a fresh snapshot
    Resynced {
        expected: u64,
        received: u64,
        snapshot_sequence: u64,
    },
    /// Ingestion stopped; delivered at most once per replica
    Fatal(ReplicaError),
}

impl ReplicaSignal {
    pub fn is_fatal(&self) -> bool {
        matches!(self, ReplicaSignal::Fatal(_))
    }
}

/// State visible to both the facade and the ingestion task
#[derive(Debug)]
pub(crate) struct Shared {
    pub(crate) book: OrderBook,
    pub(crate) metrics: ReplicaMetrics,
    pub(crate) last_applied: AtomicU64,
    state: RwLock<SyncState>,
}

impl Shared {
    pub(crate) fn new() -> Self {
        Self {
            book: OrderBook::new(),
            metrics: ReplicaMetrics::new(),
            last_applied: AtomicU64::new(0),
            state: RwLock::new(SyncState::Unsynced),
        }
    }

    pub(crate) fn state(&self) -> SyncState {
        *self.state.read()
    }

    /// CLOSED is terminal.
    pub(crate) fn set_state(&self, next: SyncState) {
        let mut state = self.state.write();
        if *state != SyncState::Closed {
            *state = next;
        }
    }
}

pub struct Replica {
    symbol: String,
    shared: Arc<Shared>,
    events: Mutex<Option<broadcast::Sender<Delta>>>,
    signal_rx: Mutex<Option<mpsc::Receiver<ReplicaSignal>>>,
    shutdown_tx: watch::Sender<bool>,
    is_shutdown: AtomicBool,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl Replica {
    /// Replicate `symbol` using the environment configuration.
    pub async fn start(symbol: &str) -> Result<Self> {
        Self::start_with_config(ReplicaConfig::from_env().with_symbol(symbol)).await
    }

    /// Connect the WebSocket feed and the REST snapshot client described by
    /// `config`.
    pub async fn start_with_config(config: ReplicaConfig) -> Result<Self> {
        let stream = WsDeltaStream::connect(&config).await?;
        let source = RestSnapshotClient::new(&config)?;
        Self::start_with(config, stream, Arc::new(source)).await
    }

    /// Start over an already subscribed stream. The initial snapshot is
    /// installed before this returns; on failure the stream is closed.
    pub async fn start_with<S>(
        config: ReplicaConfig,
        mut stream: S,
        source: Arc<dyn SnapshotSource>,
    ) -> Result<Self>
    where
        S: DeltaStream + 'static,
    {
        let shared = Arc::new(Shared::new());
        let loader = SnapshotLoader::new(source, config.symbol.clone());

        let seq = match loader.load(&shared.book, &shared.metrics).await {
            Ok(seq) => seq,
            Err(e) => {
                warn!(symbol = %config.symbol, error = %e, "Initial snapshot failed");
                let _ = stream.close().await;
                shared.set_state(SyncState::Closed);
                return Err(e);
            }
        };
        shared.last_applied.store(seq, Ordering::Release);
        shared.set_state(SyncState::Live);

        let (events_tx, _) = broadcast::channel(config.event_buffer.max(1));
        // one slot is reserved for the fatal signal
        let (signal_tx, signal_rx) = mpsc::channel(config.signal_buffer.max(2));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let ingestor = Ingestor {
            shared: shared.clone(),
            stream: Box::new(stream),
            loader,
            guard: SequenceGuard::new(seq),
            events: events_tx.clone(),
            signals: signal_tx,
            shutdown: shutdown_rx,
        };
        let task = tokio::spawn(ingestor.run());

        info!(symbol = %config.symbol, sequence = seq, "Replica live");

        Ok(Self {
            symbol: config.symbol,
            shared,
            events: Mutex::new(Some(events_tx)),
            signal_rx: Mutex::new(Some(signal_rx)),
            shutdown_tx,
            is_shutdown: AtomicBool::new(false),
            task: Mutex::new(Some(task)),
        })
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    /// Top `count` levels of `side`, best first. Never blocks on ingestion
    /// beyond one mutation.
    pub fn entries(&self, side: Side, count: usize) -> Vec<LevelEntry> {
        self.shared.book.entries(side, count)
    }

    pub fn best_bid(&self) -> Option<LevelEntry> {
        self.shared.book.best(Side::Buy)
    }

    pub fn best_ask(&self) -> Option<LevelEntry> {
        self.shared.book.best(Side::Sell)
    }

    pub fn mid_price(&self) -> Option<Decimal> {
        self.shared.book.mid_price()
    }

    pub fn spread(&self) -> Option<Decimal> {
        self.shared.book.spread()
    }

    pub fn state(&self) -> SyncState {
        self.shared.state()
    }

    pub fn last_applied(&self) -> u64 {
        self.shared.last_applied.load(Ordering::Acquire)
    }

    pub fn metrics(&self) -> ReplicaMetricsSummary {
        self.shared.metrics.summary()
    }

    /// Subscribe to applied deltas. A receiver that falls behind by more
    /// than `event_buffer` loses the oldest entries (`RecvError::Lagged`).
    /// The stream ends at shutdown.
    pub fn events(&self) -> broadcast::Receiver<Delta> {
        match self.events.lock().as_ref() {
            Some(tx) => tx.subscribe(),
            None => broadcast::channel(1).1,
        }
    }

    /// Take the signal receiver (can only be called once)
    pub fn errors(&self) -> Option<mpsc::Receiver<ReplicaSignal>> {
        self.signal_rx.lock().take()
    }

    /// Close the feed and wait for ingestion to stop. Safe to call more
    /// than once.
    pub async fn shutdown(&self) {
        if self.is_shutdown.swap(true, Ordering::AcqRel) {
            return;
        }

        let _ = self.shutdown_tx.send(true);

        let task = self.task.lock().take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                warn!(error = %e, "Ingestion task did not exit cleanly");
            }
        }

        self.events.lock().take();
        self.shared.set_state(SyncState::Closed);
        info!(symbol = %self.symbol, last_applied = self.last_applied(), "Replica shut down");
    }
}
