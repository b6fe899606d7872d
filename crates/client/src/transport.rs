// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Channel transport seam.
//!
//! [`Connector`] is the injection point between the connection manager and
//! the real network: production code uses [`WsConnector`], tests substitute
//! a scripted connector. A connected [`Channel`] is just an mpsc pair, so
//! the manager never touches socket types directly.

use std::fmt;

use futures_util::future::BoxFuture;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::header::SEC_WEBSOCKET_PROTOCOL;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::Message;

/// Inbound event from an open channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelEvent {
    /// One text frame.
    Message(String),
    /// The channel closed. `code` is the close code when the peer sent one.
    Closed { code: Option<u16>, reason: String },
}

/// An open bidirectional channel.
///
/// Dropping `outbound` asks the pump to close the socket cleanly; `inbound`
/// always terminates with a `Closed` event (or ends when the pump is gone).
#[derive(Debug)]
pub struct Channel {
    pub outbound: mpsc::Sender<String>,
    pub inbound: mpsc::Receiver<ChannelEvent>,
}

/// Why a connect attempt failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectError {
    /// The server rejected the handshake for auth reasons. Retrying with the
    /// same token is pointless; the caller should refresh first.
    Unauthorized,
    Transport(String),
}

impl fmt::Display for ConnectError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unauthorized => f.write_str("channel handshake rejected: unauthorized"),
            Self::Transport(msg) => write!(f, "channel connect failed: {msg}"),
        }
    }
}

impl std::error::Error for ConnectError {}

/// Factory for opening channels. Object-safe so it can be injected.
pub trait Connector: Send + Sync {
    /// Open a channel to `endpoint`, presenting `bearer` as the
    /// connection-level credential.
    fn connect(&self, endpoint: &str, bearer: &str) -> BoxFuture<'static, Result<Channel, ConnectError>>;
}

/// Production connector over tokio-tungstenite.
///
/// The access token is presented as WebSocket subprotocol `bearer.<token>`
/// rather than a query parameter, so it never lands in server access logs.
#[derive(Debug, Default, Clone)]
pub struct WsConnector;

impl WsConnector {
    pub fn new() -> Self {
        Self
    }
}

impl Connector for WsConnector {
    fn connect(&self, endpoint: &str, bearer: &str) -> BoxFuture<'static, Result<Channel, ConnectError>> {
        let endpoint = endpoint.to_owned();
        let protocol = format!("bearer.{bearer}");
        Box::pin(async move {
            let mut request = endpoint
                .as_str()
                .into_client_request()
                .map_err(|e| ConnectError::Transport(e.to_string()))?;
            let value = HeaderValue::from_str(&protocol)
                .map_err(|e| ConnectError::Transport(e.to_string()))?;
            request.headers_mut().insert(SEC_WEBSOCKET_PROTOCOL, value);

            let (ws_stream, _) = tokio_tungstenite::connect_async(request).await.map_err(classify)?;
            tracing::debug!(endpoint = %endpoint, "channel connected");

            Ok(spawn_pump(ws_stream))
        })
    }
}

/// Map a handshake error, classifying HTTP 401/403 as an auth rejection.
fn classify(err: tungstenite::Error) -> ConnectError {
    match err {
        tungstenite::Error::Http(resp) if resp.status().as_u16() == 401 || resp.status().as_u16() == 403 => {
            ConnectError::Unauthorized
        }
        other => ConnectError::Transport(other.to_string()),
    }
}

/// Bridge an accepted socket to the mpsc pair with a single pump task.
fn spawn_pump<S>(ws_stream: tokio_tungstenite::WebSocketStream<S>) -> Channel
where
    S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin + Send + 'static,
{
    let (out_tx, mut out_rx) = mpsc::channel::<String>(64);
    let (in_tx, in_rx) = mpsc::channel::<ChannelEvent>(256);
    let (mut write, mut read) = ws_stream.split();

    tokio::spawn(async move {
        loop {
            tokio::select! {
                msg = read.next() => {
                    match msg {
                        Some(Ok(Message::Text(text))) => {
                            if in_tx.send(ChannelEvent::Message(text.to_string())).await.is_err() {
                                break;
                            }
                        }
                        Some(Ok(Message::Close(frame))) => {
                            let (code, reason) = match frame {
                                Some(f) => (Some(u16::from(f.code)), f.reason.to_string()),
                                None => (None, String::new()),
                            };
                            let _ = in_tx.send(ChannelEvent::Closed { code, reason }).await;
                            break;
                        }
                        // ws-level ping/pong/binary: liveness is handled at
                        // the envelope level, control frames are ignored.
                        Some(Ok(_)) => {}
                        Some(Err(e)) => {
                            let _ = in_tx
                                .send(ChannelEvent::Closed { code: None, reason: e.to_string() })
                                .await;
                            break;
                        }
                        None => {
                            let _ = in_tx
                                .send(ChannelEvent::Closed { code: None, reason: "stream ended".to_owned() })
                                .await;
                            break;
                        }
                    }
                }
                out = out_rx.recv() => {
                    match out {
                        Some(text) => {
                            if let Err(e) = write.send(Message::Text(text.into())).await {
                                let _ = in_tx
                                    .send(ChannelEvent::Closed { code: None, reason: e.to_string() })
                                    .await;
                                break;
                            }
                        }
                        // Sender dropped: deliberate local close.
                        None => {
                            let _ = write.send(Message::Close(None)).await;
                            break;
                        }
                    }
                }
            }
        }
    });

    Channel { outbound: out_tx, inbound: in_rx }
}

#[cfg(test)]
#[path = "transport_tests.rs"]
mod tests;
