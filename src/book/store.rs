//! Price-ordered storage for one side of the book
//!
//! Levels live in a `BTreeMap` keyed by exact decimal price. Asks iterate
//! ascending, bids descending, so the first level yielded is always the best.
//! A level is removed the moment its last order leaves.

use rust_decimal::Decimal;
use std::collections::{BTreeMap, HashMap};

use super::{LevelEntry, Order, Side};

// ============================================================================
// PriceLevel
// ============================================================================

/// All resting orders at one exact price on one side
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PriceLevel {
    price: Decimal,
    orders: HashMap<String, Order>,
}

impl PriceLevel {
    fn new(price: Decimal) -> Self {
        Self {
            price,
            orders: HashMap::new(),
        }
    }

    pub fn price(&self) -> Decimal {
        self.price
    }

    /// Sum of remaining sizes across every order at this price
    pub fn total_size(&self) -> Decimal {
        self.orders.values().map(|o| o.remaining_size).sum()
    }

    pub fn order_count(&self) -> usize {
        self.orders.len()
    }

    pub fn get(&self, order_id: &str) -> Option<&Order> {
        self.orders.get(order_id)
    }

    pub fn orders(&self) -> impl Iterator<Item = &Order> {
        self.orders.values()
    }

    fn entry(&self) -> LevelEntry {
        LevelEntry {
            price: self.price,
            size: self.total_size(),
            order_count: self.orders.len(),
        }
    }
}

// ============================================================================
// SideStore
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SideStore {
    side: Side,
    levels: BTreeMap<Decimal, PriceLevel>,
}

impl SideStore {
    pub fn new(side: Side) -> Self {
        Self {
            side,
            levels: BTreeMap::new(),
        }
    }

    pub fn side(&self) -> Side {
        self.side
    }

    /// Insert or replace an order, creating its level if needed.
    pub fn upsert_order(&mut self, price: Decimal, order_id: &str, remaining_size: Decimal) {
        let level = self
            .levels
            .entry(price)
            .or_insert_with(|| PriceLevel::new(price));

        level.orders.insert(
            order_id.to_string(),
            Order {
                id: order_id.to_string(),
                side: self.side,
                price,
                remaining_size,
            },
        );
    }

    /// Remove an order; drops the level when it empties. Missing order or
    /// level is not an error.
    pub fn remove_order(&mut self, price: Decimal, order_id: &str) -> Option<Order> {
        let level = self.levels.get_mut(&price)?;
        let removed = level.orders.remove(order_id);

        if level.orders.is_empty() {
            self.levels.remove(&price);
        }

        removed
    }

    pub fn order(&self, price: Decimal, order_id: &str) -> Option<&Order> {
        self.levels.get(&price).and_then(|level| level.get(order_id))
    }

    pub(crate) fn order_mut(&mut self, price: Decimal, order_id: &str) -> Option<&mut Order> {
        self.levels
            .get_mut(&price)
            .and_then(|level| level.orders.get_mut(order_id))
    }

    pub fn level(&self, price: Decimal) -> Option<&PriceLevel> {
        self.levels.get(&price)
    }

    /// Levels in canonical order, best first
    pub fn levels(&self) -> Box<dyn Iterator<Item = &PriceLevel> + '_> {
        match self.side {
            Side::Sell => Box::new(self.levels.values()),
            Side::Buy => Box::new(self.levels.values().rev()),
        }
    }

    /// Copy out at most `n` aggregated levels, best first.
    pub fn top_levels(&self, n: usize) -> Vec<LevelEntry> {
        self.levels().take(n).map(PriceLevel::entry).collect()
    }

    pub fn best(&self) -> Option<LevelEntry> {
        self.levels().next().map(PriceLevel::entry)
    }

    pub fn level_count(&self) -> usize {
        self.levels.len()
    }

    pub fn order_count(&self) -> usize {
        self.levels.values().map(PriceLevel::order_count).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.levels.is_empty()
    }
}
