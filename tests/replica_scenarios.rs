//! End-to-end replica scenarios over scripted in-memory transports

use async_trait::async_trait;
use parking_lot::Mutex;
use rust_decimal_macros::dec;
use serde_json::json;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::mpsc;
use tokio::time::{sleep, timeout, Instant};

use spectator::{
    BookSnapshot, DeltaStream, LevelEntry, Replica, ReplicaConfig, ReplicaError, ReplicaSignal,
    Result, Side, SnapshotSource, SyncState,
};

// ============================================================================
// Scripted transports
// ============================================================================

struct ScriptedStream {
    rx: mpsc::UnboundedReceiver<Result<String>>,
    closed: Arc<AtomicBool>,
}

#[async_trait]
impl DeltaStream for ScriptedStream {
    async fn next_frame(&mut self) -> Option<Result<String>> {
        if self.closed.load(Ordering::Acquire) {
            return None;
        }
        self.rx.recv().await
    }

    async fn close(&mut self) -> Result<()> {
        self.closed.store(true, Ordering::Release);
        self.rx.close();
        Ok(())
    }
}

#[derive(Default)]
struct ScriptedSource {
    snapshots: Mutex<VecDeque<Result<BookSnapshot>>>,
    fetches: AtomicUsize,
}

#[async_trait]
impl SnapshotSource for ScriptedSource {
    async fn fetch(&self, _symbol: &str) -> Result<BookSnapshot> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        self.snapshots
            .lock()
            .pop_front()
            .unwrap_or_else(|| Err(ReplicaError::transport("no snapshot scripted")))
    }
}

struct Session {
    replica: Replica,
    feed: mpsc::UnboundedSender<Result<String>>,
    closed: Arc<AtomicBool>,
    source: Arc<ScriptedSource>,
}

impl Session {
    fn push(&self, frame: serde_json::Value) {
        self.feed.send(Ok(frame.to_string())).unwrap();
    }

    fn push_raw(&self, text: &str) {
        self.feed.send(Ok(text.to_string())).unwrap();
    }
}

fn snapshot(body: serde_json::Value) -> Result<BookSnapshot> {
    BookSnapshot::from_json(&body.to_string())
}

async fn start(snapshots: Vec<Result<BookSnapshot>>) -> Result<Session> {
    let (feed, rx) = mpsc::unbounded_channel();
    let closed = Arc::new(AtomicBool::new(false));
    let source = Arc::new(ScriptedSource {
        snapshots: Mutex::new(snapshots.into()),
        fetches: AtomicUsize::new(0),
    });

    let stream = ScriptedStream {
        rx,
        closed: closed.clone(),
    };
    let replica = Replica::start_with(ReplicaConfig::default(), stream, source.clone()).await?;

    Ok(Session {
        replica,
        feed,
        closed,
        source,
    })
}

async fn wait_for(what: &str, mut cond: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !cond() {
        if Instant::now() > deadline {
            panic!("timed out waiting for {}", what);
        }
        sleep(Duration::from_millis(5)).await;
    }
}

fn open(seq: u64, side: &str, id: &str, price: &str, size: &str) -> serde_json::Value {
    json!({
        "type": "open",
        "sequence": seq,
        "side": side,
        "order_id": id,
        "price": price,
        "remaining_size": size,
    })
}

fn level(price: rust_decimal::Decimal, size: rust_decimal::Decimal, orders: usize) -> LevelEntry {
    LevelEntry {
        price,
        size,
        order_count: orders,
    }
}

// ============================================================================
// Scenarios
// ============================================================================

#[tokio::test]
async fn test_match_reduces_resting_ask() {
    let s = start(vec![snapshot(json!({
        "sequence": 1,
        "bids": [],
        "asks": [["100", "2", "a1"]],
    }))])
    .await
    .unwrap();
    let mut events = s.replica.events();

    s.push(json!({
        "type": "match",
        "sequence": 2,
        "side": "sell",
        "price": "100",
        "maker_order_id": "a1",
        "taker_order_id": "t1",
        "size": "0.5",
    }));
    wait_for("match applied", || s.replica.last_applied() == 2).await;

    assert_eq!(
        s.replica.entries(Side::Sell, 1),
        vec![level(dec!(100), dec!(1.5), 1)]
    );

    let delta = timeout(Duration::from_secs(1), events.recv())
        .await
        .unwrap()
        .unwrap();
    assert!(delta.is_match());
    assert_eq!(delta.sequence, 2);

    s.replica.shutdown().await;
}

#[tokio::test]
async fn test_gap_reloads_snapshot() {
    let s = start(vec![
        snapshot(json!({"sequence": 1, "bids": [], "asks": []})),
        snapshot(json!({
            "sequence": 10,
            "bids": [["49", "1", "x1"]],
            "asks": [["51", "2", "y1"]],
        })),
    ])
    .await
    .unwrap();
    let mut signals = s.replica.errors().unwrap();

    s.push(open(2, "buy", "b1", "50", "3"));
    wait_for("open applied", || s.replica.last_applied() == 2).await;
    assert_eq!(s.replica.best_bid(), Some(level(dec!(50), dec!(3), 1)));

    s.push(open(4, "buy", "b2", "52", "1"));
    wait_for("resync", || s.replica.last_applied() == 10).await;

    assert_eq!(
        s.replica.entries(Side::Buy, 10),
        vec![level(dec!(49), dec!(1), 1)]
    );
    assert_eq!(
        s.replica.entries(Side::Sell, 10),
        vec![level(dec!(51), dec!(2), 1)]
    );
    assert_eq!(s.source.fetches.load(Ordering::SeqCst), 2);
    assert_eq!(s.replica.state(), SyncState::Live);

    let signal = timeout(Duration::from_secs(1), signals.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(
        signal,
        ReplicaSignal::Resynced {
            expected: 3,
            received: 4,
            snapshot_sequence: 10
        }
    );

    s.replica.shutdown().await;
}

#[tokio::test]
async fn test_gap_five_to_eight() {
    let s = start(vec![
        snapshot(json!({"sequence": 5, "bids": [["10", "1", "old"]], "asks": []})),
        snapshot(json!({"sequence": 7, "bids": [["11", "2", "new"]], "asks": []})),
    ])
    .await
    .unwrap();

    s.push(open(8, "buy", "gapped", "12", "1"));
    wait_for("resync", || s.replica.metrics().resyncs == 1).await;

    assert_eq!(s.replica.last_applied(), 7);
    assert_eq!(
        s.replica.entries(Side::Buy, 10),
        vec![level(dec!(11), dec!(2), 1)]
    );

    // the gapped delta is not replayed, and the next in-order one applies
    s.push(open(8, "buy", "next", "9", "1"));
    wait_for("in order after resync", || s.replica.last_applied() == 8).await;
    assert_eq!(s.replica.entries(Side::Buy, 10).len(), 2);

    s.replica.shutdown().await;
}

#[tokio::test]
async fn test_stale_redelivery_is_dropped() {
    let s = start(vec![snapshot(json!({
        "sequence": 5,
        "bids": [["10", "1", "b0"]],
        "asks": [],
    }))])
    .await
    .unwrap();

    // buffered before the snapshot, redelivered after it
    s.push(open(3, "buy", "early", "20", "1"));
    s.push(open(5, "buy", "race", "21", "1"));
    s.push(open(6, "buy", "b6", "11", "2"));
    wait_for("in-order delta", || s.replica.last_applied() == 6).await;

    assert_eq!(
        s.replica.entries(Side::Buy, 10),
        vec![level(dec!(11), dec!(2), 1), level(dec!(10), dec!(1), 1)]
    );
    assert_eq!(s.replica.metrics().stale_dropped, 2);

    s.replica.shutdown().await;
}

#[tokio::test]
async fn test_aggregation_and_ordering() {
    let s = start(vec![snapshot(json!({
        "sequence": 1,
        "bids": [["99", "1", "b1"], ["98.5", "1", "b2"], ["99.5", "1", "b3"]],
        "asks": [["101", "1.5", "a1"], ["100.5", "1", "a2"]],
    }))])
    .await
    .unwrap();

    s.push(open(2, "sell", "a3", "101", "2.25"));
    s.push(open(3, "sell", "a4", "101.00", "0.25"));
    wait_for("opens applied", || s.replica.last_applied() == 3).await;

    let asks = s.replica.entries(Side::Sell, 10);
    assert_eq!(
        asks,
        vec![level(dec!(100.5), dec!(1), 1), level(dec!(101), dec!(4.00), 3)]
    );

    let bid_prices: Vec<_> = s
        .replica
        .entries(Side::Buy, 10)
        .iter()
        .map(|l| l.price)
        .collect();
    assert_eq!(bid_prices, vec![dec!(99.5), dec!(99), dec!(98.5)]);

    assert_eq!(s.replica.mid_price(), Some(dec!(100)));
    assert_eq!(s.replica.spread(), Some(dec!(1)));

    s.replica.shutdown().await;
}

#[tokio::test]
async fn test_control_frames_are_skipped() {
    let s = start(vec![snapshot(json!({"sequence": 1, "bids": [], "asks": []}))])
        .await
        .unwrap();

    s.push(json!({"type": "subscriptions", "channels": [{"name": "full", "product_ids": ["ETH-USD"]}]}));
    s.push(json!({"type": "received", "sequence": 2, "side": "buy", "order_id": "r1"}));
    wait_for("received applied", || s.replica.last_applied() == 2).await;

    let m = s.replica.metrics();
    assert_eq!(m.control_frames, 1);
    assert_eq!(m.deltas_applied, 1);
    assert!(s.replica.entries(Side::Buy, 5).is_empty());

    s.replica.shutdown().await;
}

#[tokio::test]
async fn test_decode_error_is_fatal_once() {
    let s = start(vec![snapshot(json!({
        "sequence": 1,
        "bids": [["10", "1", "b1"]],
        "asks": [],
    }))])
    .await
    .unwrap();
    let mut signals = s.replica.errors().unwrap();
    assert!(s.replica.errors().is_none());

    s.push_raw("{not json");

    let signal = timeout(Duration::from_secs(1), signals.recv())
        .await
        .unwrap()
        .unwrap();
    match signal {
        ReplicaSignal::Fatal(ReplicaError::Decode(_)) => {}
        other => panic!("expected fatal decode error, got {:?}", other),
    }

    // the channel closes when ingestion ends; no second fatal follows
    let next = timeout(Duration::from_secs(1), signals.recv()).await.unwrap();
    assert!(next.is_none());

    assert_eq!(s.replica.state(), SyncState::Closed);
    assert!(s.closed.load(Ordering::Acquire));
    assert_eq!(
        s.replica.entries(Side::Buy, 1),
        vec![level(dec!(10), dec!(1), 1)]
    );

    s.replica.shutdown().await;
}

#[tokio::test]
async fn test_exchange_error_frame_is_fatal() {
    let s = start(vec![snapshot(json!({"sequence": 1, "bids": [], "asks": []}))])
        .await
        .unwrap();
    let mut signals = s.replica.errors().unwrap();

    s.push(json!({"type": "error", "message": "Failed to subscribe", "reason": "unknown product"}));

    let signal = timeout(Duration::from_secs(1), signals.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(
        signal,
        ReplicaSignal::Fatal(ReplicaError::Exchange("Failed to subscribe".into()))
    );

    s.replica.shutdown().await;
}

#[tokio::test]
async fn test_transport_error_is_fatal() {
    let s = start(vec![snapshot(json!({"sequence": 1, "bids": [], "asks": []}))])
        .await
        .unwrap();
    let mut signals = s.replica.errors().unwrap();

    s.feed
        .send(Err(ReplicaError::transport("connection reset")))
        .unwrap();

    let signal = timeout(Duration::from_secs(1), signals.recv())
        .await
        .unwrap()
        .unwrap();
    assert!(matches!(signal, ReplicaSignal::Fatal(ReplicaError::Transport(_))));

    s.replica.shutdown().await;
    assert_eq!(s.replica.state(), SyncState::Closed);
}

#[tokio::test]
async fn test_failed_resync_is_fatal() {
    let s = start(vec![snapshot(json!({"sequence": 1, "bids": [], "asks": []}))])
        .await
        .unwrap();
    let mut signals = s.replica.errors().unwrap();

    s.push(open(3, "buy", "gap", "1", "1"));

    let signal = timeout(Duration::from_secs(1), signals.recv())
        .await
        .unwrap()
        .unwrap();
    assert!(matches!(signal, ReplicaSignal::Fatal(ReplicaError::Transport(_))));

    s.replica.shutdown().await;
}

#[tokio::test]
async fn test_peer_close_ends_without_error() {
    let s = start(vec![snapshot(json!({"sequence": 1, "bids": [], "asks": []}))])
        .await
        .unwrap();
    let mut signals = s.replica.errors().unwrap();

    let Session { replica, feed, .. } = s;
    drop(feed);

    let next = timeout(Duration::from_secs(1), signals.recv()).await.unwrap();
    assert!(next.is_none());
    wait_for("closed", || replica.state() == SyncState::Closed).await;

    replica.shutdown().await;
}

#[tokio::test]
async fn test_shutdown_is_idempotent() {
    let s = start(vec![snapshot(json!({"sequence": 1, "bids": [], "asks": []}))])
        .await
        .unwrap();
    let mut events = s.replica.events();

    s.replica.shutdown().await;
    s.replica.shutdown().await;

    assert_eq!(s.replica.state(), SyncState::Closed);
    assert!(s.closed.load(Ordering::Acquire));
    assert!(matches!(events.recv().await, Err(RecvError::Closed)));
    assert!(matches!(
        s.replica.events().recv().await,
        Err(RecvError::Closed)
    ));

    // frames after shutdown are never applied
    let _ = s.feed.send(Ok(open(2, "buy", "late", "1", "1").to_string()));
    sleep(Duration::from_millis(20)).await;
    assert_eq!(s.replica.last_applied(), 1);
}

#[tokio::test]
async fn test_initial_snapshot_failure_closes_stream() {
    let (_feed, rx) = mpsc::unbounded_channel();
    let closed = Arc::new(AtomicBool::new(false));
    let stream = ScriptedStream {
        rx,
        closed: closed.clone(),
    };
    let source = Arc::new(ScriptedSource::default());
    source
        .snapshots
        .lock()
        .push_back(Err(ReplicaError::transport("503 Service Unavailable")));

    let err = Replica::start_with(ReplicaConfig::default(), stream, source)
        .await
        .err()
        .unwrap();

    assert_eq!(err.kind(), "transport");
    assert!(closed.load(Ordering::Acquire));
}

#[tokio::test]
async fn test_readers_never_see_empty_levels() {
    let s = start(vec![snapshot(json!({"sequence": 0, "bids": [], "asks": []}))])
        .await
        .unwrap();
    let replica = Arc::new(s.replica);

    let stop = Arc::new(AtomicBool::new(false));
    let reader = {
        let replica = replica.clone();
        let stop = stop.clone();
        tokio::spawn(async move {
            let mut reads = 0u64;
            while !stop.load(Ordering::Acquire) {
                for side in [Side::Buy, Side::Sell] {
                    for entry in replica.entries(side, 50) {
                        assert!(entry.order_count > 0);
                    }
                }
                reads += 1;
                tokio::task::yield_now().await;
            }
            reads
        })
    };

    let mut seq = 0;
    for i in 0..200u64 {
        let side = if i % 2 == 0 { "buy" } else { "sell" };
        let price = format!("{}", 100 + (i % 7));
        let id = format!("o{}", i);
        seq += 1;
        s.feed
            .send(Ok(open(seq, side, &id, &price, "1").to_string()))
            .unwrap();
        seq += 1;
        s.feed
            .send(Ok(json!({
                "type": "done",
                "sequence": seq,
                "side": side,
                "order_id": id,
                "price": price,
                "reason": "canceled",
            })
            .to_string()))
            .unwrap();
    }

    wait_for("all deltas applied", || replica.last_applied() == seq).await;
    stop.store(true, Ordering::Release);
    assert!(reader.await.unwrap() > 0);

    assert!(replica.entries(Side::Buy, 50).is_empty());
    assert!(replica.entries(Side::Sell, 50).is_empty());
    assert_eq!(replica.metrics().deltas_applied, 400);

    replica.shutdown().await;
}
