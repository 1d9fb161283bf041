//! Order book replica storage
//!
//! `OrderBook` owns one `SideStore` per side, each behind its own
//! reader/writer lock. The ingestion task is the only writer; readers copy
//! what they need and release the lock immediately.

mod mutation;
mod store;

pub use mutation::{apply, MutationOutcome};
pub use store::{PriceLevel, SideStore};

use parking_lot::RwLock;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::feed::Delta;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    pub fn as_str(&self) -> &'static str {
        match self {
            Side::Buy => "buy",
            Side::Sell => "sell",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "buy" => Some(Side::Buy),
            "sell" => Some(Side::Sell),
            _ => None,
        }
    }
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One resting limit order
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Order {
    pub id: String,
    pub side: Side,
    pub price: Decimal,
    pub remaining_size: Decimal,
}

/// Aggregated view of one price level
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct LevelEntry {
    pub price: Decimal,
    pub size: Decimal,
    pub order_count: usize,
}

#[derive(Debug)]
pub struct OrderBook {
    asks: RwLock<SideStore>,
    bids: RwLock<SideStore>,
}

impl Default for OrderBook {
    fn default() -> Self {
        Self::new()
    }
}

impl OrderBook {
    pub fn new() -> Self {
        Self {
            asks: RwLock::new(SideStore::new(Side::Sell)),
            bids: RwLock::new(SideStore::new(Side::Buy)),
        }
    }

    #[inline]
    fn store(&self, side: Side) -> &RwLock<SideStore> {
        match side {
            Side::Sell => &self.asks,
            Side::Buy => &self.bids,
        }
    }

    /// Top `count` aggregated levels, best first. Holds the side's read lock
    /// only while copying.
    pub fn entries(&self, side: Side, count: usize) -> Vec<LevelEntry> {
        self.store(side).read().top_levels(count)
    }

    pub fn best(&self, side: Side) -> Option<LevelEntry> {
        self.store(side).read().best()
    }

    pub fn mid_price(&self) -> Option<Decimal> {
        match (self.best(Side::Buy), self.best(Side::Sell)) {
            (Some(bid), Some(ask)) => Some((bid.price + ask.price) / Decimal::from(2)),
            _ => None,
        }
    }

    pub fn spread(&self) -> Option<Decimal> {
        match (self.best(Side::Buy), self.best(Side::Sell)) {
            (Some(bid), Some(ask)) => Some(ask.price - bid.price),
            _ => None,
        }
    }

    pub fn level_count(&self, side: Side) -> usize {
        self.store(side).read().level_count()
    }

    pub fn order_count(&self, side: Side) -> usize {
        self.store(side).read().order_count()
    }

    /// Deep copy of one side, for inspection.
    pub fn side_snapshot(&self, side: Side) -> SideStore {
        self.store(side).read().clone()
    }

    /// Apply one delta under the write lock of the side it touches.
    pub fn apply(&self, delta: &Delta) -> MutationOutcome {
        let mut store = self.store(delta.side).write();
        mutation::apply(&mut store, &delta.kind)
    }

    /// Swap in freshly built stores. Each side is replaced under its own
    /// write lock; nothing is built while a lock is held.
    pub fn replace(&self, bids: SideStore, asks: SideStore) {
        debug_assert_eq!(bids.side(), Side::Buy);
        debug_assert_eq!(asks.side(), Side::Sell);

        *self.bids.write() = bids;
        *self.asks.write() = asks;
    }
}
