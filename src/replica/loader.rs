//! Snapshot loader
//!
//! Fetching and installing are separate steps so the ingestion path can race
//! the fetch against shutdown. Fresh stores are built before any lock is
//! taken; the swap itself is the only locked section.

use std::sync::Arc;
use tracing::{debug, info};

use crate::book::{OrderBook, Side, SideStore};
use crate::error::Result;
use crate::feed::{BookSnapshot, SnapshotOrder, SnapshotSource};
use crate::metrics::ReplicaMetrics;

pub struct SnapshotLoader {
    source: Arc<dyn SnapshotSource>,
    symbol: String,
}

impl SnapshotLoader {
    pub fn new(source: Arc<dyn SnapshotSource>, symbol: impl Into<String>) -> Self {
        Self {
            source,
            symbol: symbol.into(),
        }
    }

    pub async fn fetch(&self) -> Result<BookSnapshot> {
        debug!(symbol = %self.symbol, "Fetching snapshot");
        self.source.fetch(&self.symbol).await
    }

    /// Replace both sides of `book` with the snapshot content and return the
    /// sequence the book is now authoritative up to.
    pub fn install(&self, book: &OrderBook, snapshot: BookSnapshot, metrics: &ReplicaMetrics) -> u64 {
        let bids = build_store(Side::Buy, &snapshot.bids);
        let asks = build_store(Side::Sell, &snapshot.asks);

        info!(
            symbol = %self.symbol,
            sequence = snapshot.sequence,
            bid_orders = bids.order_count(),
            ask_orders = asks.order_count(),
            bid_levels = bids.level_count(),
            ask_levels = asks.level_count(),
            "Snapshot installed"
        );

        book.replace(bids, asks);
        ReplicaMetrics::incr(&metrics.snapshots_applied);
        snapshot.sequence
    }

    pub async fn load(&self, book: &OrderBook, metrics: &ReplicaMetrics) -> Result<u64> {
        let snapshot = self.fetch().await?;
        Ok(self.install(book, snapshot, metrics))
    }
}

fn build_store(side: Side, orders: &[SnapshotOrder]) -> SideStore {
    let mut store = SideStore::new(side);
    for order in orders {
        store.upsert_order(order.price, &order.order_id, order.size);
    }
    store
}
