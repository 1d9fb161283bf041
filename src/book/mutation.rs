//! Per-order mutation of one side store
//!
//! Operations that reference an order or level the store does not hold are
//! no-ops; that is the normal state of affairs right after a resync.

use rust_decimal::Decimal;

use super::SideStore;
use crate::feed::DeltaKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MutationOutcome {
    /// `received`; nothing to do
    Acknowledged,
    Inserted,
    /// `open` for an id that was already resting at that price
    Replaced,
    Removed,
    /// `done` for an order that never rested
    NotResting,
    /// `match` reduced the maker; `remaining` may be zero or negative
    Reduced { remaining: Decimal },
    /// `change` replaced the remaining size
    Resized,
    /// The referenced order or level is not in the book
    Missing,
}

impl MutationOutcome {
    pub fn is_underflow(&self) -> bool {
        matches!(self, MutationOutcome::Reduced { remaining } if *remaining < Decimal::ZERO)
    }
}

/// Apply one operation to the store of the side it belongs to.
pub fn apply(store: &mut SideStore, kind: &DeltaKind) -> MutationOutcome {
    match kind {
        DeltaKind::Received => MutationOutcome::Acknowledged,

        DeltaKind::Open {
            order_id,
            price,
            remaining_size,
        } => {
            let existed = store.order(*price, order_id).is_some();
            store.upsert_order(*price, order_id, *remaining_size);
            if existed {
                MutationOutcome::Replaced
            } else {
                MutationOutcome::Inserted
            }
        }

        DeltaKind::Done {
            order_id,
            price,
            resting,
            ..
        } => {
            if !resting {
                return MutationOutcome::NotResting;
            }
            match store.remove_order(*price, order_id) {
                Some(_) => MutationOutcome::Removed,
                None => MutationOutcome::Missing,
            }
        }

        DeltaKind::Match {
            maker_order_id,
            price,
            size,
            ..
        } => match store.order_mut(*price, maker_order_id) {
            Some(order) => {
                order.remaining_size -= *size;
                MutationOutcome::Reduced {
                    remaining: order.remaining_size,
                }
            }
            None => MutationOutcome::Missing,
        },

        DeltaKind::Change {
            order_id,
            price: Some(price),
            new_size: Some(new_size),
        } => match store.order_mut(*price, order_id) {
            Some(order) => {
                order.remaining_size = *new_size;
                MutationOutcome::Resized
            }
            None => MutationOutcome::Missing,
        },

        // market order: never on the book
        DeltaKind::Change { .. } => MutationOutcome::Missing,
    }
}
