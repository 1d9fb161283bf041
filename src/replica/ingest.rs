//! Single-writer ingestion path
//!
//! Owns the stream, the guard and the loader. Every book write after start
//! happens here, strictly one at a time.

use std::ops::ControlFlow;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, watch};
use tracing::{debug, error, info, trace, warn};

use super::guard::{Classification, SequenceGuard};
use super::loader::SnapshotLoader;
use super::{ReplicaSignal, Shared, SyncState};
use crate::book::MutationOutcome;
use crate::error::{ReplicaError, Result};
use crate::feed::{Delta, DeltaStream, Frame, RawFrame};
use crate::metrics::ReplicaMetrics;

pub(crate) struct Ingestor {
    pub(crate) shared: Arc<Shared>,
    pub(crate) stream: Box<dyn DeltaStream>,
    pub(crate) loader: SnapshotLoader,
    pub(crate) guard: SequenceGuard,
    pub(crate) events: broadcast::Sender<Delta>,
    pub(crate) signals: mpsc::Sender<ReplicaSignal>,
    pub(crate) shutdown: watch::Receiver<bool>,
}

impl Ingestor {
    pub(crate) async fn run(mut self) {
        match self.run_loop().await {
            Ok(()) => info!(last_applied = self.guard.last_applied(), "Ingestion stopped"),
            Err(e) => {
                error!(kind = e.kind(), error = %e, "Ingestion failed");
                self.signal_fatal(e);
            }
        }

        if let Err(e) = self.stream.close().await {
            debug!(error = %e, "Close after ingestion ended failed");
        }
        self.shared.set_state(SyncState::Closed);
    }

    async fn run_loop(&mut self) -> Result<()> {
        loop {
            let frame = tokio::select! {
                biased;

                _ = self.shutdown.changed() => {
                    debug!("Shutdown requested");
                    return Ok(());
                }

                frame = self.stream.next_frame() => frame,
            };

            let Some(text) = frame else {
                info!("Feed closed by peer");
                return Ok(());
            };

            if self.handle_text(&text?).await?.is_break() {
                return Ok(());
            }
        }
    }

    pub(crate) async fn handle_text(&mut self, text: &str) -> Result<ControlFlow<()>> {
        let raw = RawFrame::parse(text)?;

        // a redelivery is dropped on its sequence alone
        if let Some(seq) = raw.sequence() {
            if self.guard.classify(seq) == Classification::Stale {
                self.drop_stale(seq, raw.kind());
                return Ok(ControlFlow::Continue(()));
            }
        }

        match raw.into_frame()? {
            Frame::Subscriptions => {
                ReplicaMetrics::incr(&self.shared.metrics.control_frames);
                debug!("Subscription acknowledged");
                Ok(ControlFlow::Continue(()))
            }
            Frame::Delta(delta) => self.handle_delta(delta).await,
        }
    }

    async fn handle_delta(&mut self, delta: Delta) -> Result<ControlFlow<()>> {
        match self.guard.classify(delta.sequence) {
            Classification::Stale => {
                self.drop_stale(delta.sequence, delta.kind.label());
                Ok(ControlFlow::Continue(()))
            }
            Classification::InOrder => {
                self.apply(delta);
                Ok(ControlFlow::Continue(()))
            }
            Classification::Gapped { expected, received } => {
                ReplicaMetrics::incr(&self.shared.metrics.gaps_detected);
                warn!(expected, received, "Sequence gap, resyncing");
                self.resync(expected, received).await
            }
        }
    }

    fn drop_stale(&self, sequence: u64, kind: &str) {
        ReplicaMetrics::incr(&self.shared.metrics.stale_dropped);
        trace!(
            sequence,
            kind,
            last_applied = self.guard.last_applied(),
            "Dropping stale delta"
        );
    }

    fn apply(&mut self, delta: Delta) {
        let outcome = self.shared.book.apply(&delta);

        match outcome {
            MutationOutcome::Missing => {
                ReplicaMetrics::incr(&self.shared.metrics.missing_orders);
                trace!(
                    sequence = delta.sequence,
                    kind = delta.kind.label(),
                    "Delta references an order not in the book"
                );
            }
            MutationOutcome::Reduced { remaining } if outcome.is_underflow() => {
                ReplicaMetrics::incr(&self.shared.metrics.size_underflows);
                warn!(
                    sequence = delta.sequence,
                    side = %delta.side,
                    remaining = %remaining,
                    "Match left maker with negative size"
                );
            }
            _ => {}
        }

        self.guard.advance(delta.sequence);
        self.shared
            .last_applied
            .store(delta.sequence, Ordering::Release);
        ReplicaMetrics::incr(&self.shared.metrics.deltas_applied);

        if self.events.send(delta).is_err() {
            ReplicaMetrics::incr(&self.shared.metrics.events_unobserved);
        }
    }

    async fn resync(&mut self, expected: u64, received: u64) -> Result<ControlFlow<()>> {
        self.shared.set_state(SyncState::Unsynced);

        let fetched = tokio::select! {
            biased;

            _ = self.shutdown.changed() => {
                debug!("Shutdown requested during resync");
                return Ok(ControlFlow::Break(()));
            }

            fetched = self.loader.fetch() => fetched,
        };

        let snapshot = fetched.map_err(|e| match e {
            ReplicaError::Transport(_) => e,
            other => ReplicaError::transport(format!("resync snapshot: {}", other)),
        })?;

        let seq = self
            .loader
            .install(&self.shared.book, snapshot, &self.shared.metrics);
        self.guard.reset(seq);
        self.shared.last_applied.store(seq, Ordering::Release);
        self.shared.set_state(SyncState::Live);
        ReplicaMetrics::incr(&self.shared.metrics.resyncs);

        info!(expected, received, snapshot_sequence = seq, "Resync complete");

        self.signal_info(ReplicaSignal::Resynced {
            expected,
            received,
            snapshot_sequence: seq,
        });
        Ok(ControlFlow::Continue(()))
    }

    /// Informational signals never take the last free slot, which stays
    /// reserved for the fatal signal.
    fn signal_info(&self, signal: ReplicaSignal) {
        if self.signals.capacity() > 1 {
            let _ = self.signals.try_send(signal);
        } else {
            debug!("Signal buffer full, dropping informational signal");
        }
    }

    fn signal_fatal(&self, err: ReplicaError) {
        if let Err(e) = self.signals.try_send(ReplicaSignal::Fatal(err)) {
            debug!(error = %e, "Fatal signal not delivered");
        }
    }
}
