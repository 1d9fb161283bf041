//! Full-channel WebSocket feed
//!
//! The stream pings on a fixed interval and reports the feed as hung when
//! nothing at all arrives within the idle timeout.

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::time::{interval_at, sleep_until, timeout, Instant, Interval, MissedTickBehavior};
use tokio_tungstenite::{
    connect_async,
    tungstenite::{
        self,
        protocol::{frame::coding::CloseCode, CloseFrame},
        Message,
    },
    MaybeTlsStream, WebSocketStream,
};
use tracing::{debug, info, trace};

use super::{messages::Subscribe, DeltaStream};
use crate::config::ReplicaConfig;
use crate::error::{ReplicaError, Result};

pub struct WsDeltaStream<S = MaybeTlsStream<TcpStream>> {
    inner: WebSocketStream<S>,
    ping: Interval,
    idle_timeout: Duration,
    last_seen: Instant,
    closing: bool,
}

enum Wake {
    Message(Option<std::result::Result<Message, tungstenite::Error>>),
    Ping,
    Idle,
}

impl WsDeltaStream {
    /// Connect and send the full-channel subscription for the configured
    /// symbol.
    pub async fn connect(config: &ReplicaConfig) -> Result<Self> {
        let url = config.ws_url.as_str();
        let connect_timeout = config.connect_timeout();

        let (mut ws, resp) = timeout(connect_timeout, connect_async(url))
            .await
            .map_err(|_| {
                ReplicaError::Connection(format!(
                    "timed out after {}ms connecting to {}",
                    connect_timeout.as_millis(),
                    url
                ))
            })?
            .map_err(|e| ReplicaError::Connection(format!("{}: {}", url, e)))?;

        info!(url, status = %resp.status(), "Connected to feed");

        let sub = serde_json::to_string(&Subscribe::full_channel(&config.symbol))
            .map_err(|e| ReplicaError::Connection(format!("encode subscribe: {}", e)))?;
        ws.send(Message::Text(sub))
            .await
            .map_err(|e| ReplicaError::Connection(format!("send subscribe: {}", e)))?;

        debug!(symbol = %config.symbol, "Sent full channel subscription");

        Ok(Self::from_socket(
            ws,
            config.ping_interval(),
            config.idle_timeout(),
        ))
    }
}

impl<S> WsDeltaStream<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    /// Wrap an already subscribed socket.
    pub fn from_socket(
        inner: WebSocketStream<S>,
        ping_interval: Duration,
        idle_timeout: Duration,
    ) -> Self {
        let mut ping = interval_at(Instant::now() + ping_interval, ping_interval);
        ping.set_missed_tick_behavior(MissedTickBehavior::Delay);

        Self {
            inner,
            ping,
            idle_timeout,
            last_seen: Instant::now(),
            closing: false,
        }
    }
}

#[async_trait]
impl<S> DeltaStream for WsDeltaStream<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    async fn next_frame(&mut self) -> Option<Result<String>> {
        loop {
            let deadline = self.last_seen + self.idle_timeout;
            let wake = tokio::select! {
                msg = self.inner.next() => Wake::Message(msg),
                _ = self.ping.tick(), if !self.closing => Wake::Ping,
                _ = sleep_until(deadline), if !self.closing => Wake::Idle,
            };

            let msg = match wake {
                Wake::Ping => {
                    if let Err(e) = self.inner.send(Message::Ping(Vec::new())).await {
                        return Some(Err(ReplicaError::transport(format!("send ping: {}", e))));
                    }
                    trace!("Sent keepalive ping");
                    continue;
                }
                Wake::Idle => {
                    return Some(Err(ReplicaError::transport(format!(
                        "feed idle for {}ms",
                        self.idle_timeout.as_millis()
                    ))))
                }
                Wake::Message(msg) => msg,
            };
            self.last_seen = Instant::now();

            let msg = match msg {
                Some(Ok(msg)) => msg,
                Some(Err(tungstenite::Error::ConnectionClosed)) => return None,
                Some(Err(e)) if self.closing => {
                    debug!(error = %e, "Read error after local close");
                    return None;
                }
                Some(Err(e)) => return Some(Err(ReplicaError::transport(e.to_string()))),
                None if self.closing => return None,
                None => {
                    return Some(Err(ReplicaError::transport(
                        "stream ended without a close frame",
                    )))
                }
            };

            match msg {
                Message::Text(text) => return Some(Ok(text)),
                Message::Binary(bytes) => {
                    return Some(String::from_utf8(bytes).map_err(|_| {
                        ReplicaError::decode("binary frame is not valid UTF-8")
                    }))
                }
                Message::Ping(data) => {
                    if let Err(e) = self.inner.send(Message::Pong(data)).await {
                        return Some(Err(ReplicaError::transport(format!("send pong: {}", e))));
                    }
                }
                Message::Close(frame) => {
                    let normal = frame
                        .as_ref()
                        .map(|f| f.code == CloseCode::Normal)
                        .unwrap_or(true);
                    debug!(?frame, "Close frame received");
                    if normal || self.closing {
                        return None;
                    }
                    return Some(Err(ReplicaError::transport(format!(
                        "closed by peer: {:?}",
                        frame
                    ))));
                }
                Message::Pong(_) | Message::Frame(_) => {}
            }
        }
    }

    async fn close(&mut self) -> Result<()> {
        if self.closing {
            return Ok(());
        }
        self.closing = true;

        self.inner
            .close(Some(CloseFrame {
                code: CloseCode::Normal,
                reason: "".into(),
            }))
            .await
            .map_err(|e| ReplicaError::transport(format!("send close: {}", e)))
    }
}
