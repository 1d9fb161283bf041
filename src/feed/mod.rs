//! Transports feeding the replica
//!
//! The replica only sees two seams: a `DeltaStream` yielding raw text frames
//! in arrival order, and a `SnapshotSource` returning a full level-3 book.
//! Decoding happens on the ingestion path so that a malformed frame is
//! attributed to the session that received it.

pub mod messages;
pub mod rest;
pub mod ws;

use async_trait::async_trait;

use crate::error::Result;

pub use messages::{
    decode_frame, BookSnapshot, Delta, DeltaKind, Frame, RawFrame, SnapshotOrder, Subscribe,
};
pub use rest::RestSnapshotClient;
pub use ws::WsDeltaStream;

#[async_trait]
pub trait DeltaStream: Send {
    /// Next text frame. `None` once the peer has closed normally, or after a
    /// local `close()` has completed.
    async fn next_frame(&mut self) -> Option<Result<String>>;

    /// Send a normal-closure frame. Calling it again is a no-op.
    async fn close(&mut self) -> Result<()>;
}

#[async_trait]
pub trait SnapshotSource: Send + Sync {
    async fn fetch(&self, symbol: &str) -> Result<BookSnapshot>;
}
