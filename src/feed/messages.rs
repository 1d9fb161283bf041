//! Wire formats for the full-channel feed and the level-3 snapshot
//!
//! Frames are decoded in two steps: serde into a loosely-typed wire struct
//! (every field optional except `type`), then validation into a `Delta` whose
//! variant carries exactly the fields that operation needs. All numeric
//! fields arrive as strings and are parsed as exact decimals.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::book::Side;
use crate::error::{ReplicaError, Result};

// ============================================================================
// Outbound
// ============================================================================

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct Subscribe {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub product_ids: Vec<String>,
    pub channels: Vec<&'static str>,
}

impl Subscribe {
    pub fn full_channel(symbol: &str) -> Self {
        Self {
            kind: "subscribe",
            product_ids: vec![symbol.to_string()],
            channels: vec!["full"],
        }
    }
}

// ============================================================================
// Decoded delta
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeltaKind {
    /// Order accepted by the matching engine; not yet on the book
    Received,
    Open {
        order_id: String,
        price: Decimal,
        remaining_size: Decimal,
    },
    Done {
        order_id: String,
        price: Decimal,
        /// False when the order never rested (the done carries no price, or
        /// the zero-price marker); such a done has no book effect.
        resting: bool,
        reason: Option<String>,
    },
    Match {
        maker_order_id: String,
        taker_order_id: Option<String>,
        price: Decimal,
        size: Decimal,
    },
    /// Market-order changes carry `new_funds` instead of a price and a new
    /// size; either field being absent leaves the book untouched.
    Change {
        order_id: String,
        price: Option<Decimal>,
        new_size: Option<Decimal>,
    },
}

impl DeltaKind {
    pub fn label(&self) -> &'static str {
        match self {
            DeltaKind::Received => "received",
            DeltaKind::Open { .. } => "open",
            DeltaKind::Done { .. } => "done",
            DeltaKind::Match { .. } => "match",
            DeltaKind::Change { .. } => "change",
        }
    }
}

/// One sequenced, validated order event
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delta {
    pub sequence: u64,
    pub side: Side,
    pub time: Option<DateTime<Utc>>,
    pub product_id: Option<String>,
    pub order_type: Option<String>,
    pub kind: DeltaKind,
}

impl Delta {
    pub fn is_match(&self) -> bool {
        matches!(self.kind, DeltaKind::Match { .. })
    }
}

/// A decoded inbound frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Delta(Delta),
    /// Subscription acknowledgement; carries no sequence and no book effect
    Subscriptions,
}

#[derive(Debug, Deserialize)]
struct WireMessage {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    sequence: Option<u64>,
    #[serde(default)]
    side: Option<String>,
    #[serde(default)]
    price: Option<String>,
    #[serde(default)]
    size: Option<String>,
    #[serde(default)]
    order_id: Option<String>,
    #[serde(default)]
    maker_order_id: Option<String>,
    #[serde(default)]
    taker_order_id: Option<String>,
    #[serde(default)]
    remaining_size: Option<String>,
    #[serde(default)]
    new_size: Option<String>,
    #[serde(default)]
    order_type: Option<String>,
    #[serde(default)]
    product_id: Option<String>,
    #[serde(default)]
    reason: Option<String>,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    time: Option<DateTime<Utc>>,
}

/// Decode one text frame from the feed.
pub fn decode_frame(text: &str) -> Result<Frame> {
    RawFrame::parse(text)?.into_frame()
}

/// A frame parsed far enough to be sequenced but not yet validated, so a
/// stale redelivery can be dropped without looking at its payload.
#[derive(Debug)]
pub struct RawFrame {
    wire: WireMessage,
}

impl RawFrame {
    pub fn parse(text: &str) -> Result<Self> {
        let wire: WireMessage = serde_json::from_str(text)
            .map_err(|e| ReplicaError::decode(format!("malformed frame: {}", e)))?;
        Ok(Self { wire })
    }

    pub fn kind(&self) -> &str {
        &self.wire.kind
    }

    /// Sequence of a sequenced frame; control frames have none.
    pub fn sequence(&self) -> Option<u64> {
        match self.wire.kind.as_str() {
            "subscriptions" | "error" => None,
            _ => self.wire.sequence,
        }
    }

    pub fn into_frame(self) -> Result<Frame> {
        validate(self.wire)
    }
}

fn validate(wire: WireMessage) -> Result<Frame> {
    match wire.kind.as_str() {
        "subscriptions" => return Ok(Frame::Subscriptions),
        "error" => {
            let detail = wire
                .message
                .or(wire.reason)
                .unwrap_or_else(|| "unspecified".to_string());
            return Err(ReplicaError::Exchange(detail));
        }
        _ => {}
    }

    let sequence = wire
        .sequence
        .ok_or_else(|| field_missing(&wire.kind, "sequence"))?;
    let side = wire
        .side
        .as_deref()
        .ok_or_else(|| field_missing(&wire.kind, "side"))
        .and_then(|s| {
            Side::parse(s).ok_or_else(|| ReplicaError::decode(format!("unknown side {:?}", s)))
        })?;

    let kind = match wire.kind.as_str() {
        "received" => DeltaKind::Received,
        "open" => DeltaKind::Open {
            order_id: required(&wire.kind, "order_id", wire.order_id)?,
            price: required_decimal(&wire.kind, "price", wire.price.as_deref())?,
            remaining_size: required_decimal(
                &wire.kind,
                "remaining_size",
                wire.remaining_size.as_deref(),
            )?,
        },
        "done" => {
            let price = optional_decimal("price", wire.price.as_deref())?;
            let resting = matches!(price, Some(p) if !p.is_zero());
            DeltaKind::Done {
                order_id: required(&wire.kind, "order_id", wire.order_id)?,
                price: price.unwrap_or(Decimal::ZERO),
                resting,
                reason: wire.reason,
            }
        }
        "match" => DeltaKind::Match {
            maker_order_id: required(&wire.kind, "maker_order_id", wire.maker_order_id)?,
            taker_order_id: wire.taker_order_id,
            price: required_decimal(&wire.kind, "price", wire.price.as_deref())?,
            size: required_decimal(&wire.kind, "size", wire.size.as_deref())?,
        },
        "change" => DeltaKind::Change {
            order_id: required(&wire.kind, "order_id", wire.order_id)?,
            price: optional_decimal("price", wire.price.as_deref())?,
            new_size: optional_decimal("new_size", wire.new_size.as_deref())?,
        },
        other => {
            return Err(ReplicaError::decode(format!(
                "unknown message type {:?}",
                other
            )))
        }
    };

    Ok(Frame::Delta(Delta {
        sequence,
        side,
        time: wire.time,
        product_id: wire.product_id,
        order_type: wire.order_type,
        kind,
    }))
}

fn field_missing(kind: &str, field: &str) -> ReplicaError {
    ReplicaError::decode(format!("{} message missing {}", kind, field))
}

fn required(kind: &str, field: &str, value: Option<String>) -> Result<String> {
    value.ok_or_else(|| field_missing(kind, field))
}

fn required_decimal(kind: &str, field: &str, value: Option<&str>) -> Result<Decimal> {
    let raw = value.ok_or_else(|| field_missing(kind, field))?;
    parse_decimal(field, raw)
}

fn optional_decimal(field: &str, value: Option<&str>) -> Result<Option<Decimal>> {
    value.map(|raw| parse_decimal(field, raw)).transpose()
}

pub(crate) fn parse_decimal(field: &str, raw: &str) -> Result<Decimal> {
    Decimal::from_str(raw)
        .map_err(|e| ReplicaError::decode(format!("invalid {} {:?}: {}", field, raw, e)))
}

// ============================================================================
// Level-3 snapshot
// ============================================================================

#[derive(Debug, Deserialize)]
struct WireSnapshot {
    sequence: u64,
    #[serde(default)]
    bids: Vec<Vec<String>>,
    #[serde(default)]
    asks: Vec<Vec<String>>,
}

/// One resting order from a snapshot
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotOrder {
    pub price: Decimal,
    pub size: Decimal,
    pub order_id: String,
}

/// Point-in-time copy of every resting order, authoritative up to `sequence`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BookSnapshot {
    pub sequence: u64,
    pub bids: Vec<SnapshotOrder>,
    pub asks: Vec<SnapshotOrder>,
}

impl BookSnapshot {
    pub fn from_json(body: &str) -> Result<Self> {
        let wire: WireSnapshot = serde_json::from_str(body)
            .map_err(|e| ReplicaError::decode(format!("malformed snapshot: {}", e)))?;

        Ok(Self {
            sequence: wire.sequence,
            bids: decode_entries("bids", wire.bids)?,
            asks: decode_entries("asks", wire.asks)?,
        })
    }
}

fn decode_entries(side: &str, rows: Vec<Vec<String>>) -> Result<Vec<SnapshotOrder>> {
    rows.into_iter()
        .enumerate()
        .map(|(i, row)| {
            let [price, size, order_id] = <[String; 3]>::try_from(row).map_err(|row| {
                ReplicaError::decode(format!(
                    "snapshot {}[{}] has {} fields, expected 3",
                    side,
                    i,
                    row.len()
                ))
            })?;
            Ok(SnapshotOrder {
                price: parse_decimal("price", &price)?,
                size: parse_decimal("size", &size)?,
                order_id,
            })
        })
        .collect()
}
