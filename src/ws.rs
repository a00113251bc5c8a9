//! WebSocket transport over `tokio-tungstenite`.
//!
//! [`WsTransport`] dials the controller and hands back split
//! [`WsWriter`]/[`WsReader`] halves behind the connection manager's
//! [`Transport`] seam. Nothing else in the crate sees tungstenite types.

// Rust guideline compliant 2026-02

use anyhow::{Context, Result};
use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio_tungstenite::tungstenite::{client::IntoClientRequest, http, Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use crate::connection::transport::{
    OutboundFrame, Transport, TransportPair, TransportReader, TransportWriter,
};

type WsStream = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

/// Close code tungstenite reports for a close frame without a status.
const NO_STATUS_CODE: u16 = 1005;

/// Inbound WebSocket frame, independent of the tungstenite version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WsMessage {
    /// UTF-8 text frame.
    Text(String),
    /// Binary frame.
    Binary(Vec<u8>),
    /// Ping with payload.
    Ping(Vec<u8>),
    /// Pong with payload.
    Pong(Vec<u8>),
    /// Close frame.
    Close {
        /// Status code (1005 when the peer sent none).
        code: u16,
        /// Close reason.
        reason: String,
    },
}

impl WsMessage {
    /// Convert a tungstenite frame; raw frames have no counterpart.
    fn from_tungstenite(msg: Message) -> Option<Self> {
        Some(match msg {
            Message::Text(text) => Self::Text(text),
            Message::Binary(data) => Self::Binary(data),
            Message::Ping(data) => Self::Ping(data),
            Message::Pong(data) => Self::Pong(data),
            Message::Close(frame) => {
                let (code, reason) = frame.map_or((NO_STATUS_CODE, String::new()), |cf| {
                    (cf.code.into(), cf.reason.into_owned())
                });
                Self::Close { code, reason }
            }
            Message::Frame(_) => return None,
        })
    }
}

impl From<OutboundFrame> for Message {
    fn from(frame: OutboundFrame) -> Self {
        match frame {
            OutboundFrame::Text(text) => Message::Text(text),
            OutboundFrame::Binary(data) => Message::Binary(data),
            OutboundFrame::Ping(data) => Message::Ping(data),
            OutboundFrame::Pong(data) => Message::Pong(data),
        }
    }
}

/// Write half of a WebSocket connection.
#[derive(Debug)]
pub struct WsWriter {
    sink: SplitSink<WsStream, Message>,
}

/// Read half of a WebSocket connection.
#[derive(Debug)]
pub struct WsReader {
    stream: SplitStream<WsStream>,
}

#[async_trait]
impl TransportWriter for WsWriter {
    async fn send(&mut self, frame: OutboundFrame) -> Result<()> {
        self.sink
            .send(Message::from(frame))
            .await
            .context("WebSocket send failed")
    }

    async fn close(&mut self) -> Result<()> {
        self.sink.close().await.context("WebSocket close failed")
    }
}

#[async_trait]
impl TransportReader for WsReader {
    async fn recv(&mut self) -> Option<Result<WsMessage>> {
        loop {
            match self.stream.next().await? {
                Ok(msg) => {
                    if let Some(msg) = WsMessage::from_tungstenite(msg) {
                        return Some(Ok(msg));
                    }
                }
                Err(e) => {
                    return Some(Err(anyhow::Error::new(e).context("WebSocket read failed")));
                }
            }
        }
    }
}

/// Perform the WebSocket handshake with extra request headers.
///
/// # Errors
///
/// Fails on an invalid URL or header, or when the handshake fails.
pub async fn connect(url: &str, headers: &[(String, String)]) -> Result<(WsWriter, WsReader)> {
    let mut request = url
        .into_client_request()
        .with_context(|| format!("invalid WebSocket URL: {url}"))?;

    for (name, value) in headers {
        let header_name = http::HeaderName::from_bytes(name.as_bytes())
            .with_context(|| format!("invalid header name: {name}"))?;
        let header_value = http::HeaderValue::from_str(value)
            .with_context(|| format!("invalid header value for {name}"))?;
        request.headers_mut().insert(header_name, header_value);
    }

    let (stream, _response) = tokio_tungstenite::connect_async(request)
        .await
        .with_context(|| format!("WebSocket connect to {url} failed"))?;
    let (sink, stream) = stream.split();
    Ok((WsWriter { sink }, WsReader { stream }))
}

/// [`Transport`] that dials a fixed WebSocket URL on every attempt.
#[derive(Debug, Clone)]
pub struct WsTransport {
    url: String,
    headers: Vec<(String, String)>,
}

impl WsTransport {
    /// Transport for `url`.
    #[must_use]
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            headers: Vec::new(),
        }
    }

    /// Add a header sent with every handshake.
    #[must_use]
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// The URL this transport dials.
    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl Transport for WsTransport {
    async fn connect(&self) -> Result<TransportPair> {
        let (writer, reader) = connect(&self.url, &self.headers).await?;
        Ok((Box::new(writer), Box::new(reader)))
    }
}

/// Rewrite an `http(s)://` URL to `ws(s)://`; other URLs pass through.
#[must_use]
pub fn http_to_ws_scheme(url: &str) -> String {
    if let Some(rest) = url.strip_prefix("https://") {
        format!("wss://{rest}")
    } else if let Some(rest) = url.strip_prefix("http://") {
        format!("ws://{rest}")
    } else {
        url.to_string()
    }
}
