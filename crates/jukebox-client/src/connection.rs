//! One websocket connection to the backend.
//!
//! The I/O task owns the socket.  Outbound frames go through an unbounded
//! queue (`ChannelSender`); inbound text frames are decoded here and forwarded
//! to the session core as `SessionEvent::Channel`.  Frames that fail to decode
//! are logged and dropped.  A channel never reconnects by itself.

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use jukebox_proto::protocol::Message;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use url::Url;

use crate::core::SessionEvent;

#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("channel closed")]
    Closed,
    #[error("failed to encode {kind}: {reason}")]
    Encode { kind: &'static str, reason: String },
}

/// Lifecycle events reported by a channel.
#[derive(Debug)]
pub enum ChannelEvent {
    Open,
    Message(Message),
    /// Closed by the peer, with the close reason if one was given.
    Closed(Option<String>),
    /// Connect, read or write failure.  The channel is dead afterwards.
    Error(String),
}

/// Outbound half of a channel.  Cheap to clone; every clone stops working
/// once the channel's I/O task has exited.
#[derive(Debug, Clone)]
pub struct ChannelSender {
    tx: mpsc::UnboundedSender<String>,
}

impl ChannelSender {
    pub fn new(tx: mpsc::UnboundedSender<String>) -> Self {
        Self { tx }
    }

    pub fn send(&self, message: &Message) -> Result<(), ChannelError> {
        let text = message.encode().map_err(|e| ChannelError::Encode {
            kind: message.kind(),
            reason: e.to_string(),
        })?;
        self.tx.send(text).map_err(|_| ChannelError::Closed)
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

pub struct ConnectionChannel {
    generation: u64,
    sender: ChannelSender,
    cancel: CancellationToken,
}

impl ConnectionChannel {
    /// Start connecting to `url`.  Events are tagged with `generation` so the
    /// core can tell a superseded channel's events apart.  A handshake that
    /// has not finished within `connect_timeout` is reported as `Error`.
    /// Cancelling `parent` closes the channel.
    pub fn open(
        url: Url,
        generation: u64,
        connect_timeout: Duration,
        events: mpsc::Sender<SessionEvent>,
        parent: &CancellationToken,
    ) -> Self {
        let cancel = parent.child_token();
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(run_channel(
            url,
            generation,
            connect_timeout,
            rx,
            events,
            cancel.clone(),
        ));
        Self {
            generation,
            sender: ChannelSender::new(tx),
            cancel,
        }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn sender(&self) -> ChannelSender {
        self.sender.clone()
    }

    /// Token whose cancellation closes this channel.  Tasks scoped to the
    /// channel hang child tokens off it.
    pub fn token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn close(&self) {
        self.cancel.cancel();
    }
}

impl Drop for ConnectionChannel {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Decode one inbound text frame, logging and dropping it on failure.
pub fn decode_frame(text: &str) -> Option<Message> {
    match Message::decode(text) {
        Ok(message) => Some(message),
        Err(e) => {
            warn!("channel: dropping malformed frame ({}): {:.120}", e, text);
            None
        }
    }
}

async fn run_channel(
    url: Url,
    generation: u64,
    connect_timeout: Duration,
    mut outbound: mpsc::UnboundedReceiver<String>,
    events: mpsc::Sender<SessionEvent>,
    cancel: CancellationToken,
) {
    let emit = |event: ChannelEvent| SessionEvent::Channel { generation, event };
    let host = url.host_str().unwrap_or("?").to_string();

    info!("channel {}: connecting to {}", generation, host);
    let connected = tokio::select! {
        _ = cancel.cancelled() => return,
        result = timeout(connect_timeout, tokio_tungstenite::connect_async(url.as_str())) => result,
    };
    let ws_stream = match connected {
        Ok(Ok((ws_stream, _response))) => ws_stream,
        Ok(Err(e)) => {
            warn!("channel {}: connect to {} failed: {}", generation, host, e);
            let _ = events.send(emit(ChannelEvent::Error(e.to_string()))).await;
            return;
        }
        Err(_) => {
            warn!(
                "channel {}: connect to {} timed out after {:?}",
                generation, host, connect_timeout
            );
            let reason = format!("connect timed out after {:?}", connect_timeout);
            let _ = events.send(emit(ChannelEvent::Error(reason))).await;
            return;
        }
    };

    info!("channel {}: open", generation);
    if events.send(emit(ChannelEvent::Open)).await.is_err() {
        return;
    }

    let (mut ws_tx, mut ws_rx) = ws_stream.split();

    loop {
        tokio::select! {
            biased;

            _ = cancel.cancelled() => {
                debug!("channel {}: closing", generation);
                let _ = ws_tx.send(WsMessage::Close(None)).await;
                break;
            }

            frame = outbound.recv() => {
                let Some(text) = frame else { break };
                if let Err(e) = ws_tx.send(WsMessage::Text(text)).await {
                    warn!("channel {}: write failed: {}", generation, e);
                    let _ = events.send(emit(ChannelEvent::Error(e.to_string()))).await;
                    break;
                }
            }

            incoming = ws_rx.next() => {
                match incoming {
                    Some(Ok(WsMessage::Text(text))) => {
                        if let Some(message) = decode_frame(&text) {
                            if events.send(emit(ChannelEvent::Message(message))).await.is_err() {
                                break;
                            }
                        }
                    }
                    Some(Ok(WsMessage::Binary(data))) => {
                        warn!("channel {}: dropping {} byte binary frame", generation, data.len());
                    }
                    Some(Ok(WsMessage::Close(frame))) => {
                        let reason = frame
                            .map(|f| f.reason.to_string())
                            .filter(|r| !r.is_empty());
                        info!("channel {}: closed by server ({:?})", generation, reason);
                        let _ = events.send(emit(ChannelEvent::Closed(reason))).await;
                        break;
                    }
                    // Ping/pong are answered by tungstenite itself.
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        warn!("channel {}: read failed: {}", generation, e);
                        let _ = events.send(emit(ChannelEvent::Error(e.to_string()))).await;
                        break;
                    }
                    None => {
                        info!("channel {}: stream ended", generation);
                        let _ = events.send(emit(ChannelEvent::Closed(None))).await;
                        break;
                    }
                }
            }
        }
    }
}
