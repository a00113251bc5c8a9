//! Routes connection events to command handlers.
//!
//! ```text
//!   Idle ──Open (send hello)──► Ready ──Failure / Closed──► Idle
//! ```
//!
//! In `Ready`, every text frame is decoded into a [`Command`] and executed on
//! its own tokio task, so a slow thumbnail never holds up a `list`. All
//! replies go through one shared [`Outbound`]; each `Open` starts a new
//! outbound session so late replies meant for a previous connection never
//! precede `hello`.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::connection::{Connection, ConnectionEvent};
use crate::media::MediaCatalog;
use crate::outbound::Outbound;
use crate::protocol::{self, Command, Reply};
use crate::transfer::TransferEngine;

/// Error code for catalog failures.
pub const CATALOG_FAILED: &str = "catalog_failed";

/// Whether the peer has been greeted on the current connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchState {
    /// No open connection.
    Idle,
    /// `hello` was sent; commands are served.
    Ready,
}

/// Consumes [`ConnectionEvent`]s and serves commands.
#[derive(Debug)]
pub struct Dispatcher {
    handlers: Handlers,
    sdk: u32,
    state: DispatchState,
}

/// Everything a command task needs, cheap to clone into each task.
#[derive(Clone)]
struct Handlers {
    catalog: Arc<dyn MediaCatalog>,
    transfer: Arc<TransferEngine>,
    out: Outbound,
}

impl std::fmt::Debug for Handlers {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Handlers").finish_non_exhaustive()
    }
}

impl Dispatcher {
    /// Dispatcher replying over `link` and announcing `sdk` in `hello`.
    #[must_use]
    pub fn new(
        link: Arc<dyn Connection>,
        catalog: Arc<dyn MediaCatalog>,
        transfer: Arc<TransferEngine>,
        sdk: u32,
    ) -> Self {
        Self {
            handlers: Handlers {
                catalog,
                transfer,
                out: Outbound::new(link),
            },
            sdk,
            state: DispatchState::Idle,
        }
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> DispatchState {
        self.state
    }

    /// Serve events until the connection manager is dropped.
    pub async fn run(mut self, mut events: mpsc::UnboundedReceiver<ConnectionEvent>) {
        while let Some(event) = events.recv().await {
            self.handle_event(event);
        }
        log::debug!("[Dispatch] Event stream ended");
    }

    /// Apply one event. Returns the spawned task when a command was started.
    pub fn handle_event(&mut self, event: ConnectionEvent) -> Option<JoinHandle<()>> {
        match event {
            ConnectionEvent::Open => {
                log::info!("[Dispatch] Connected, sending hello (sdk {})", self.sdk);
                self.handlers.out = self.handlers.out.begin_session();
                self.handlers.out.send(&Reply::Hello { sdk: self.sdk });
                self.state = DispatchState::Ready;
                None
            }
            ConnectionEvent::Failure(reason) => {
                log::info!("[Dispatch] Connection failed: {}", reason);
                self.state = DispatchState::Idle;
                None
            }
            ConnectionEvent::Closed { code, reason } => {
                log::info!("[Dispatch] Connection closed ({}): {}", code, reason);
                self.state = DispatchState::Idle;
                None
            }
            ConnectionEvent::Message(text) => self.handle_message(&text),
        }
    }

    fn handle_message(&self, text: &str) -> Option<JoinHandle<()>> {
        if self.state != DispatchState::Ready {
            log::warn!("[Dispatch] Dropping message received before hello");
            return None;
        }

        let command: Command = match protocol::decode(text) {
            Ok(command) => command,
            Err(e) => {
                log::warn!("[Dispatch] Dropping undecodable message: {}", e);
                return None;
            }
        };

        log::debug!("[Dispatch] {:?}", command);
        let handlers = self.handlers.clone();
        Some(tokio::spawn(async move { handlers.execute(command).await }))
    }
}

impl Handlers {
    async fn execute(&self, command: Command) {
        match command {
            Command::ListMedia {
                kind,
                after_modified,
                limit,
            } => match self.catalog.list(kind, after_modified, limit).await {
                Ok(items) => self.out.send(&Reply::ListMediaResult { items }),
                Err(e) => self.catalog_failed("list", &e),
            },
            Command::StatItem { locator } => match self.catalog.stat(&locator).await {
                Ok(item) => self.out.send(&Reply::StatResult { item }),
                Err(e) => self.catalog_failed("stat", &e),
            },
            Command::FindNewSince {
                since_epoch_ms,
                limit,
            } => match self.catalog.find_new_since(since_epoch_ms, limit).await {
                Ok(items) => self.out.send(&Reply::FindNewSinceResult { items }),
                Err(e) => self.catalog_failed("find_new", &e),
            },
            Command::ReadChunk {
                locator,
                offset,
                length,
                req_id,
            } => {
                self.transfer
                    .stream_chunk(&self.out, &locator, offset, length, &req_id)
                    .await;
            }
            Command::Thumb {
                locator,
                max_w,
                max_h,
                req_id,
            } => {
                self.transfer
                    .send_thumbnail(&self.out, &locator, max_w, max_h, &req_id)
                    .await;
            }
            Command::Hash { locator, req_id } => {
                self.transfer.hash_command(&self.out, &locator, &req_id).await;
            }
        }
    }

    fn catalog_failed(&self, command: &str, err: &anyhow::Error) {
        log::warn!("[Dispatch] {} failed: {:#}", command, err);
        self.out
            .send(&Reply::error(None, CATALOG_FAILED, Some(format!("{err:#}"))));
    }
}
