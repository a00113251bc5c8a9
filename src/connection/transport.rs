//! Transport seam between the connection manager and the socket library.
//!
//! A [`Transport`] opens one connection per call and hands back independent
//! writer/reader halves. The production implementation is
//! [`crate::ws::WsTransport`]; tests plug in in-memory pairs.

use anyhow::Result;
use async_trait::async_trait;

use crate::ws::WsMessage;

/// Frame queued for the writer half.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutboundFrame {
    /// UTF-8 text frame (protocol message).
    Text(String),
    /// Binary frame (chunk or thumbnail payload).
    Binary(Vec<u8>),
    /// Keepalive ping.
    Ping(Vec<u8>),
    /// Answer to an inbound ping.
    Pong(Vec<u8>),
}

/// Writer/reader halves returned by [`Transport::connect`].
pub type TransportPair = (Box<dyn TransportWriter>, Box<dyn TransportReader>);

/// Opens connections.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Establish a new connection.
    ///
    /// # Errors
    ///
    /// Returns an error when the connection cannot be opened; the manager
    /// reports it as a `Failure` event and backs off.
    async fn connect(&self) -> Result<TransportPair>;
}

/// Write half of an open connection.
#[async_trait]
pub trait TransportWriter: Send {
    /// Write one frame.
    async fn send(&mut self, frame: OutboundFrame) -> Result<()>;

    /// Close the connection from this side.
    async fn close(&mut self) -> Result<()>;
}

/// Read half of an open connection.
#[async_trait]
pub trait TransportReader: Send {
    /// Next inbound message, `None` once the stream has ended.
    async fn recv(&mut self) -> Option<Result<WsMessage>>;
}
