//! Replica configuration
//!
//! Defaults target the public exchange endpoints. Every field can be
//! overridden from the environment (`SPECTATOR_*`).

use std::time::Duration;

/// Capacity of the applied-delta event buffer (oldest dropped when full).
pub const DEFAULT_EVENT_BUFFER: usize = 2048;
/// Capacity of the error/signal channel.
pub const DEFAULT_SIGNAL_BUFFER: usize = 64;

#[derive(Debug, Clone)]
pub struct ReplicaConfig {
    /// Product to replicate, e.g. `ETH-USD`
    pub symbol: String,
    /// Streaming feed URL
    pub ws_url: String,
    /// REST base URL; the snapshot path is appended
    pub rest_url: String,
    /// User agent sent with snapshot requests
    pub user_agent: String,
    /// Timeout for the initial streaming connect (ms)
    pub connect_timeout_ms: u64,
    /// Timeout for one snapshot fetch (ms)
    pub snapshot_timeout_ms: u64,
    /// Applied-delta event buffer capacity
    pub event_buffer: usize,
    /// Signal channel capacity
    pub signal_buffer: usize,
    /// Reconnect base delay (ms)
    pub reconnect_base_delay_ms: u64,
    /// Reconnect max delay (ms)
    pub reconnect_max_delay_ms: u64,
    /// Interval between keepalive pings on the feed (ms)
    pub ping_interval_ms: u64,
    /// The feed is treated as hung when nothing, pongs included, arrives
    /// for this long (ms)
    pub idle_timeout_ms: u64,
}

impl Default for ReplicaConfig {
    fn default() -> Self {
        Self {
            symbol: "ETH-USD".to_string(),
            ws_url: "wss://ws-feed.exchange.coinbase.com".to_string(),
            rest_url: "https://api.exchange.coinbase.com".to_string(),
            user_agent: concat!("spectator/", env!("CARGO_PKG_VERSION")).to_string(),
            connect_timeout_ms: 10_000,
            snapshot_timeout_ms: 30_000,
            event_buffer: DEFAULT_EVENT_BUFFER,
            signal_buffer: DEFAULT_SIGNAL_BUFFER,
            reconnect_base_delay_ms: 500,
            reconnect_max_delay_ms: 30_000,
            ping_interval_ms: 15_000,
            idle_timeout_ms: 45_000,
        }
    }
}

impl ReplicaConfig {
    pub fn from_env() -> Self {
        let mut cfg = Self::default();

        if let Ok(v) = std::env::var("SPECTATOR_SYMBOL") {
            if !v.trim().is_empty() {
                cfg.symbol = v.trim().to_string();
            }
        }
        if let Ok(v) = std::env::var("SPECTATOR_WS_URL") {
            cfg.ws_url = v;
        }
        if let Ok(v) = std::env::var("SPECTATOR_REST_URL") {
            cfg.rest_url = v;
        }
        if let Ok(v) = std::env::var("SPECTATOR_USER_AGENT") {
            if !v.trim().is_empty() {
                cfg.user_agent = v.trim().to_string();
            }
        }
        if let Ok(v) = std::env::var("SPECTATOR_CONNECT_TIMEOUT_MS") {
            cfg.connect_timeout_ms = v.parse().unwrap_or(cfg.connect_timeout_ms);
        }
        if let Ok(v) = std::env::var("SPECTATOR_SNAPSHOT_TIMEOUT_MS") {
            cfg.snapshot_timeout_ms = v.parse().unwrap_or(cfg.snapshot_timeout_ms);
        }
        if let Ok(v) = std::env::var("SPECTATOR_EVENT_BUFFER") {
            if let Ok(n) = v.parse::<usize>() {
                if n > 0 {
                    cfg.event_buffer = n;
                }
            }
        }
        if let Ok(v) = std::env::var("SPECTATOR_SIGNAL_BUFFER") {
            if let Ok(n) = v.parse::<usize>() {
                // one slot stays reserved for the fatal signal
                if n >= 2 {
                    cfg.signal_buffer = n;
                }
            }
        }
        if let Ok(v) = std::env::var("SPECTATOR_RECONNECT_BASE_MS") {
            cfg.reconnect_base_delay_ms = v.parse().unwrap_or(cfg.reconnect_base_delay_ms);
        }
        if let Ok(v) = std::env::var("SPECTATOR_RECONNECT_MAX_MS") {
            cfg.reconnect_max_delay_ms = v.parse().unwrap_or(cfg.reconnect_max_delay_ms);
        }
        if let Ok(v) = std::env::var("SPECTATOR_PING_INTERVAL_MS") {
            cfg.ping_interval_ms = v.parse().unwrap_or(cfg.ping_interval_ms);
        }
        if let Ok(v) = std::env::var("SPECTATOR_IDLE_TIMEOUT_MS") {
            cfg.idle_timeout_ms = v.parse().unwrap_or(cfg.idle_timeout_ms);
        }

        cfg
    }

    pub fn with_symbol(mut self, symbol: impl Into<String>) -> Self {
        self.symbol = symbol.into();
        self
    }

    /// Full level-3 snapshot URL for the configured symbol.
    pub fn snapshot_url(&self) -> String {
        level3_url(&self.rest_url, &self.symbol)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn snapshot_timeout(&self) -> Duration {
        Duration::from_millis(self.snapshot_timeout_ms)
    }

    pub fn ping_interval(&self) -> Duration {
        Duration::from_millis(self.ping_interval_ms.max(1))
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_millis(self.idle_timeout_ms.max(1))
    }
}

pub(crate) fn level3_url(rest_url: &str, symbol: &str) -> String {
    format!(
        "{}/products/{}/book?level=3",
        rest_url.trim_end_matches('/'),
        symbol
    )
}
