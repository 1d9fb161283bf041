//! Error taxonomy for the replica
//!
//! Every variant is fatal to the current session. Gaps, stale duplicates and
//! operations against missing orders are not errors and never appear here.

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ReplicaError {
    /// The streaming connection could not be established.
    #[error("connection failed: {0}")]
    Connection(String),

    /// A read, write or snapshot fetch failed after the session started.
    #[error("transport error: {0}")]
    Transport(String),

    /// A frame or snapshot body could not be decoded into a valid record.
    #[error("decode error: {0}")]
    Decode(String),

    /// The exchange sent an explicit error frame.
    #[error("exchange error: {0}")]
    Exchange(String),
}

impl ReplicaError {
    pub fn decode(msg: impl Into<String>) -> Self {
        Self::Decode(msg.into())
    }

    pub fn transport(msg: impl Into<String>) -> Self {
        Self::Transport(msg.into())
    }

    /// Short label for logging and metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Connection(_) => "connection",
            Self::Transport(_) => "transport",
            Self::Decode(_) => "decode",
            Self::Exchange(_) => "exchange",
        }
    }
}

pub type Result<T> = std::result::Result<T, ReplicaError>;
