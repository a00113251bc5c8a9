//! Mediabridge - device-resident media agent.
//!
//! Keeps one WebSocket connection to a remote controller and answers its
//! requests to browse local media, stream byte ranges, produce thumbnails
//! and hash files.
//!
//! # Architecture
//!
//! ```text
//!   transport ──► ConnectionManager ──events──► Dispatcher ──► MediaCatalog
//!                        ▲                          │      └─► TransferEngine
//!                        └──────── Outbound ◄───────┘
//! ```
//!
//! # Modules
//!
//! - [`connection`] - connection lifecycle, reconnection backoff, transport seam
//! - [`protocol`] - wire messages and their JSON codec
//! - [`transfer`] - chunked reads, thumbnails, hashing
//! - [`dispatch`] - event handling and command routing
//! - [`media`] - catalog, byte source and thumbnail collaborators
//! - [`config`] - configuration loading/saving

pub mod config;
pub mod connection;
pub mod dispatch;
pub mod media;
pub mod outbound;
pub mod protocol;
pub mod transfer;
pub mod ws;

#[cfg(test)]
mod testing;

pub use config::Config;
pub use connection::{Connection, ConnectionEvent, ConnectionManager, ConnectionState};
pub use dispatch::{DispatchState, Dispatcher};
pub use outbound::Outbound;
pub use protocol::{Command, DecodeError, MediaItem, MediaKind, Reply};
pub use transfer::{TransferEngine, TransferError};
pub use ws::WsTransport;
