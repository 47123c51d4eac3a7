//! Socket transport abstraction.
//!
//! The connection manager never touches a WebSocket directly. It asks a
//! `Transport` to open a connection and gets back a pair of channels:
//! outbound `Frame`s and inbound `TransportEvent`s. The inbound side always
//! ends with exactly one `Closed` event, preceded by `Error` when the
//! socket failed.

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, warn};
use url::Url;

use hc_core::constants::close_codes;
use hc_core::error::{HcError, HcResult};

/// Outbound frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Text(String),
    /// Close the socket; nothing is sent after this.
    Close { code: u16, reason: String },
}

/// Inbound event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    Message(String),
    Error(String),
    Closed { code: u16, reason: String },
}

/// An open socket as a pair of channels.
pub struct SocketConnection {
    pub outbound: mpsc::UnboundedSender<Frame>,
    pub inbound: mpsc::UnboundedReceiver<TransportEvent>,
}

/// Opens socket connections.
///
/// `open` resolves once the handshake completes. Dropping the future
/// before then abandons the attempt.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn open(&self, url: &Url) -> HcResult<SocketConnection>;
}

/// WebSocket transport backed by tokio-tungstenite.
#[derive(Debug, Default, Clone)]
pub struct WsTransport;

impl WsTransport {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Transport for WsTransport {
    async fn open(&self, url: &Url) -> HcResult<SocketConnection> {
        let (stream, _response) = tokio_tungstenite::connect_async(url.as_str())
            .await
            .map_err(|e| HcError::Socket(format!("websocket handshake failed: {e}")))?;
        let (mut sink, mut source) = stream.split();

        let (out_tx, mut out_rx) = mpsc::unbounded_channel::<Frame>();
        let (in_tx, in_rx) = mpsc::unbounded_channel::<TransportEvent>();

        tokio::spawn(async move {
            while let Some(frame) = out_rx.recv().await {
                match frame {
                    Frame::Text(text) => {
                        if let Err(e) = sink.send(Message::Text(text.into())).await {
                            debug!(category = "connection", error = %e, "websocket write failed");
                            break;
                        }
                    }
                    Frame::Close { code, reason } => {
                        // 1005, 1006 and 1015 must never appear on the wire.
                        let code = match CloseCode::from(code) {
                            code if code.is_allowed() => code,
                            _ => CloseCode::Normal,
                        };
                        let frame = CloseFrame {
                            code,
                            reason: reason.into(),
                        };
                        if let Err(e) = sink.send(Message::Close(Some(frame))).await {
                            debug!(category = "connection", error = %e, "websocket close failed");
                        }
                        break;
                    }
                }
            }
            let _ = sink.close().await;
        });

        tokio::spawn(async move {
            let mut closed = None;
            while let Some(next) = source.next().await {
                let event = match next {
                    Ok(Message::Text(text)) => TransportEvent::Message(text.as_str().to_owned()),
                    Ok(Message::Binary(bytes)) => match String::from_utf8(bytes.to_vec()) {
                        Ok(text) => TransportEvent::Message(text),
                        Err(_) => {
                            warn!(category = "connection", "dropping non-UTF-8 binary frame");
                            continue;
                        }
                    },
                    Ok(Message::Close(frame)) => {
                        closed = frame.map(|f| (u16::from(f.code), f.reason.as_str().to_owned()));
                        break;
                    }
                    Ok(_) => continue,
                    Err(e) => {
                        let _ = in_tx.send(TransportEvent::Error(e.to_string()));
                        break;
                    }
                };
                if in_tx.send(event).is_err() {
                    return;
                }
            }
            let (code, reason) = closed.unwrap_or((close_codes::ABNORMAL, String::new()));
            let _ = in_tx.send(TransportEvent::Closed { code, reason });
        });

        Ok(SocketConnection {
            outbound: out_tx,
            inbound: in_rx,
        })
    }
}

/// Server URL with the bearer token attached as a query parameter.
pub fn build_url(address: &str, token: &str) -> HcResult<Url> {
    let mut url = Url::parse(address)
        .map_err(|e| HcError::Config(format!("invalid server address '{address}': {e}")))?;
    match url.scheme() {
        "ws" | "wss" => {}
        other => {
            return Err(HcError::Config(format!(
                "server address must use ws:// or wss://, got {other}://"
            )))
        }
    }
    url.query_pairs_mut()
        .append_pair(hc_core::constants::TOKEN_QUERY_PARAM, token);
    Ok(url)
}

/// URL safe for logging: the query string is stripped.
pub fn redacted(url: &Url) -> String {
    let mut shown = url.clone();
    shown.set_query(None);
    shown.to_string()
}
