//! Bounded trade history fed from the replica's event stream

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use std::collections::VecDeque;

use crate::book::Side;
use crate::feed::{Delta, DeltaKind};

pub const DEFAULT_TRADE_CAPACITY: usize = 256;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Trade {
    pub sequence: u64,
    /// Side of the resting maker order
    pub side: Side,
    pub price: Decimal,
    pub size: Decimal,
    pub time: Option<DateTime<Utc>>,
}

/// Keeps the most recent `capacity` matches; the oldest is evicted first.
#[derive(Debug, Clone)]
pub struct TradeHistory {
    trades: VecDeque<Trade>,
    capacity: usize,
}

impl Default for TradeHistory {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_TRADE_CAPACITY)
    }
}

impl TradeHistory {
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            trades: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Record `delta` if it is a match. Returns whether it was kept.
    pub fn record(&mut self, delta: &Delta) -> bool {
        let DeltaKind::Match { price, size, .. } = &delta.kind else {
            return false;
        };

        if self.trades.len() == self.capacity {
            self.trades.pop_front();
        }
        self.trades.push_back(Trade {
            sequence: delta.sequence,
            side: delta.side,
            price: *price,
            size: *size,
            time: delta.time,
        });
        true
    }

    /// Up to `n` trades, newest first.
    pub fn recent(&self, n: usize) -> Vec<Trade> {
        self.trades.iter().rev().take(n).cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.trades.len()
    }

    pub fn is_empty(&self) -> bool {
        self.trades.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
