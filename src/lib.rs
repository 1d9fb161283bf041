//! Live level-3 order-book replica
//!
//! Combines a REST snapshot with the exchange's sequenced full-channel feed
//! and serves consistent top-of-book reads while ingestion runs.

pub mod book;
pub mod config;
pub mod error;
pub mod feed;
pub mod history;
pub mod metrics;
pub mod reconnect;
pub mod replica;

pub use book::{LevelEntry, Order, OrderBook, Side};
pub use config::ReplicaConfig;
pub use error::{ReplicaError, Result};
pub use feed::{BookSnapshot, Delta, DeltaKind, DeltaStream, SnapshotOrder, SnapshotSource};
pub use history::{Trade, TradeHistory};
pub use metrics::{ReplicaMetrics, ReplicaMetricsSummary};
pub use reconnect::Backoff;
pub use replica::{Replica, ReplicaSignal, SyncState};
