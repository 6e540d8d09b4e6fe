use crate::config;
use crate::error::FeedError;
use crate::series::Asset;
use anyhow::Result;
use chrono::NaiveDateTime;
use flate2::read::GzDecoder;
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use std::io::Read;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::protocol::Message;
use tracing::{info, warn};

/// Inclusive historical query window, already encoded as epoch seconds.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TimeWindow {
    pub from: i64,
    pub to: i64,
}

impl TimeWindow {
    /// Parses a pair of `YYYY-MM-DD HH:MM:SS` timestamps (interpreted as UTC)
    /// into the epoch-second window the wire protocol wants.
    pub fn parse(start: &str, end: &str) -> Result<Self> {
        let from = NaiveDateTime::parse_from_str(start, "%Y-%m-%d %H:%M:%S")?
            .and_utc()
            .timestamp();
        let to = NaiveDateTime::parse_from_str(end, "%Y-%m-%d %H:%M:%S")?
            .and_utc()
            .timestamp();
        if from > to {
            anyhow::bail!("window start {} is after end {}", start, end);
        }
        let now = chrono::Utc::now().timestamp();
        if to > now {
            anyhow::bail!("window end {} is in the future", end);
        }
        Ok(Self { from, to })
    }
}

#[derive(Serialize, Debug, PartialEq)]
pub struct SubscribeRequest {
    pub req: String,
    pub id: &'static str,
    pub from: i64,
    pub to: i64,
}

#[derive(Serialize, Debug)]
struct HeartbeatReply {
    pong: u64,
}

/// One kline bar as it appears on the wire. Only `close` is consumed
/// downstream; the rest ride along for completeness.
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
pub struct RawCandle {
    /// Bar timestamp in epoch seconds.
    pub id: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    #[serde(default)]
    pub vol: f64,
}

/// Every decoded inbound frame. Unknown shapes are retained, not dropped,
/// so a newer server can add message types without losing data here.
#[derive(Deserialize, Debug, Clone)]
#[serde(untagged)]
pub enum InboundMessage {
    Heartbeat { ping: u64 },
    Data { rep: String, data: Vec<RawCandle> },
    Other(serde_json::Value),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Subscribed,
    Receiving,
    Closed,
}

/// What the transport loop should do after a frame has been handled.
#[derive(Debug, PartialEq)]
pub enum FrameAction {
    /// Keep reading.
    Continue,
    /// Send this payload, then close the connection; the session is done.
    ReplyAndClose(String),
}

/// One subscribe → receive → acknowledge lifecycle for a single asset.
///
/// The heartbeat probe doubles as the end-of-stream signal for this bounded
/// historical query, so the session closes right after echoing the nonce.
/// There is no retry or reconnect; a fresh fetch means a fresh session.
pub struct KlineSession {
    asset: Asset,
    window: TimeWindow,
    state: SessionState,
}

impl KlineSession {
    pub fn new(asset: Asset, window: TimeWindow) -> Self {
        Self {
            asset,
            window,
            state: SessionState::Idle,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn subscribe_request(&self) -> SubscribeRequest {
        SubscribeRequest {
            req: self.asset.channel(),
            id: config::CLIENT_ID,
            from: self.window.from,
            to: self.window.to,
        }
    }

    pub fn mark_subscribed(&mut self) {
        self.state = SessionState::Subscribed;
    }

    /// Single entry point for inbound frames: decompress, decode, buffer.
    ///
    /// Every decoded message is appended to `buffer` in arrival order. A
    /// decode failure is returned as `FeedError::Decode` with the best-effort
    /// raw text; the caller logs it and keeps reading.
    pub fn handle_frame(
        &mut self,
        raw: &[u8],
        buffer: &mut Vec<InboundMessage>,
    ) -> Result<FrameAction, FeedError> {
        let text = gunzip(raw)?;
        let msg: InboundMessage =
            serde_json::from_str(&text).map_err(|e| FeedError::Decode {
                reason: e.to_string(),
                raw: text.clone(),
            })?;

        let action = match &msg {
            InboundMessage::Heartbeat { ping } => {
                let reply = serde_json::to_string(&HeartbeatReply { pong: *ping })
                    .map_err(|e| FeedError::Decode {
                        reason: e.to_string(),
                        raw: text.clone(),
                    })?;
                self.state = SessionState::Closed;
                FrameAction::ReplyAndClose(reply)
            }
            InboundMessage::Data { rep, data } => {
                info!(
                    "{}: received {} candles on {}",
                    self.asset.symbol(),
                    data.len(),
                    rep
                );
                self.state = SessionState::Receiving;
                FrameAction::Continue
            }
            InboundMessage::Other(value) => {
                info!("{}: retained unrecognized message: {}", self.asset.symbol(), value);
                FrameAction::Continue
            }
        };

        buffer.push(msg);
        Ok(action)
    }
}

/// Runs one asset's session to completion against `endpoint`, appending every
/// decoded message to the caller-owned `buffer`.
///
/// The connection is a scoped resource: it is closed on the heartbeat path
/// and dropped (closed) on every error path. A per-read timeout bounds the
/// wait for the terminating heartbeat.
pub async fn run(
    endpoint: &str,
    asset: Asset,
    window: TimeWindow,
    buffer: &mut Vec<InboundMessage>,
) -> Result<(), FeedError> {
    let (ws_stream, _) = connect_async(endpoint).await?;
    let (mut write, mut read) = ws_stream.split();

    let mut session = KlineSession::new(asset, window);
    let request = session.subscribe_request();
    let payload = serde_json::to_string(&request)
        .map_err(|e| FeedError::Transport(format!("subscribe encode failed: {}", e)))?;
    write.send(Message::Text(payload)).await?;
    session.mark_subscribed();
    info!(
        "{}: subscribed on {} (from={}, to={})",
        asset.symbol(),
        request.req,
        request.from,
        request.to
    );

    let read_timeout = std::time::Duration::from_secs(config::SESSION_READ_TIMEOUT_SECS);

    loop {
        let msg = match tokio::time::timeout(read_timeout, read.next()).await {
            Ok(m) => m,
            Err(_) => {
                let _ = write.close().await;
                return Err(FeedError::Transport(format!(
                    "{}: no frame within {}s, giving up on heartbeat",
                    asset.symbol(),
                    config::SESSION_READ_TIMEOUT_SECS
                )));
            }
        };

        match msg {
            Some(Ok(Message::Binary(frame))) => {
                match session.handle_frame(&frame, buffer) {
                    Ok(FrameAction::Continue) => {}
                    Ok(FrameAction::ReplyAndClose(reply)) => {
                        write.send(Message::Text(reply)).await?;
                        let _ = write.close().await;
                        info!("{}: heartbeat answered, connection closed", asset.symbol());
                        return Ok(());
                    }
                    Err(e @ FeedError::Decode { .. }) => {
                        // Surfaced per frame, never fatal to the session.
                        warn!("{}: {}", asset.symbol(), e);
                    }
                    Err(e) => {
                        let _ = write.close().await;
                        return Err(e);
                    }
                }
            }
            Some(Ok(Message::Ping(p))) => {
                write.send(Message::Pong(p)).await?;
            }
            Some(Ok(Message::Text(text))) => {
                warn!("{}: unexpected uncompressed text frame: {}", asset.symbol(), text);
            }
            Some(Ok(Message::Close(_))) | None => {
                return Err(FeedError::Transport(format!(
                    "{}: connection closed before heartbeat",
                    asset.symbol()
                )));
            }
            Some(Err(e)) => {
                let _ = write.close().await;
                return Err(e.into());
            }
            _ => {}
        }
    }
}

fn gunzip(raw: &[u8]) -> Result<String, FeedError> {
    let mut decoder = GzDecoder::new(raw);
    let mut text = String::new();
    decoder
        .read_to_string(&mut text)
        .map_err(|e| FeedError::Decode {
            reason: e.to_string(),
            raw: String::from_utf8_lossy(raw).into_owned(),
        })?;
    Ok(text)
}
