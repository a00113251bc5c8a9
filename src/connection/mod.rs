//! Connection lifecycle with automatic reconnection.
//!
//! [`ConnectionManager`] owns at most one live transport connection and turns
//! everything that happens on it into an ordered stream of
//! [`ConnectionEvent`]s, handed to exactly one consumer at construction.
//!
//! # Architecture
//!
//! ```text
//!   ensure_connected() ──► Connecting ──connect ok──► Open ──► (reader task, writer task)
//!          ▲                    │                      │
//!          │               connect err           close / error
//!          │                    ▼                      ▼
//!          └──── timer ◄──── Backoff { attempt, delay = min(64, 2^attempt) s }
//!
//!   close() ──► Disconnected (cancels the live connection and the timer)
//! ```
//!
//! Every connection attempt gets a generation number. Tasks belonging to an
//! older generation (a connection superseded by `close()` or by a newer
//! attempt) find their generation stale and exit without touching state,
//! so there is never more than one open socket or pending timer.
//!
//! Outbound frames are fire-and-forget: they go into the live connection's
//! writer queue, or are dropped when no connection is open.

// Rust guideline compliant 2026-02

pub mod backoff;
pub mod transport;

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

pub use backoff::{Backoff, MAX_BACKOFF_SECS};
pub use transport::{OutboundFrame, Transport, TransportPair, TransportReader, TransportWriter};

use crate::ws::WsMessage;

/// Close code reported when the agent closes the connection itself.
pub const CLIENT_CLOSE_CODE: u16 = 1000;

/// Close code reported when the stream ends without a close frame.
const ABNORMAL_CLOSE_CODE: u16 = 1006;

/// Something that happened on the connection, in the order it happened.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionEvent {
    /// A connection was established.
    Open,
    /// A text frame arrived.
    Message(String),
    /// The connection attempt or the live connection failed.
    Failure(String),
    /// The connection was closed.
    Closed {
        /// WebSocket close code.
        code: u16,
        /// Close reason.
        reason: String,
    },
}

/// Lifecycle state of the managed connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// No connection and nothing scheduled.
    Disconnected,
    /// A connection attempt is in flight.
    Connecting,
    /// The connection is open.
    Open,
    /// Waiting for the reconnection timer.
    Backoff {
        /// Attempt number the delay was computed from.
        attempt: u32,
        /// Delay before the next attempt.
        delay: Duration,
    },
}

/// Outbound side of a connection, as seen by the dispatcher.
///
/// Implemented by [`ConnectionManager`]; tests substitute a recorder.
pub trait Connection: Send + Sync {
    /// Start connecting unless a connection exists or is being established.
    fn ensure_connected(&self);

    /// Close the connection and cancel any pending reconnection.
    fn close(&self);

    /// Queue a text frame; dropped when not connected.
    fn send_text(&self, text: String);

    /// Queue a binary frame; dropped when not connected.
    fn send_binary(&self, bytes: Vec<u8>);
}

/// Owns the single logical connection to the controller.
///
/// Cloning yields another handle to the same connection.
#[derive(Debug, Clone)]
pub struct ConnectionManager {
    shared: Arc<Shared>,
}

struct Shared {
    transport: Box<dyn Transport>,
    events: mpsc::UnboundedSender<ConnectionEvent>,
    ping_interval: Option<Duration>,
    runtime: tokio::runtime::Handle,
    inner: Mutex<Inner>,
}

impl std::fmt::Debug for Shared {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Shared")
            .field("ping_interval", &self.ping_interval)
            .finish_non_exhaustive()
    }
}

struct Inner {
    state: ConnectionState,
    backoff: Backoff,
    generation: u64,
    outbound: Option<mpsc::UnboundedSender<OutboundFrame>>,
    cancel: Option<CancellationToken>,
    reconnect_timer: Option<JoinHandle<()>>,
}

impl ConnectionManager {
    /// Create a manager and the receiver for its events.
    ///
    /// Nothing is dialed until [`Connection::ensure_connected`] is called.
    /// `ping_interval` enables keepalive pings on open connections.
    ///
    /// # Panics
    ///
    /// Panics when called outside a tokio runtime.
    pub fn new(
        transport: impl Transport,
        ping_interval: Option<Duration>,
    ) -> (Self, mpsc::UnboundedReceiver<ConnectionEvent>) {
        let (events, events_rx) = mpsc::unbounded_channel();
        let shared = Arc::new(Shared {
            transport: Box::new(transport),
            events,
            ping_interval,
            runtime: tokio::runtime::Handle::current(),
            inner: Mutex::new(Inner {
                state: ConnectionState::Disconnected,
                backoff: Backoff::default(),
                generation: 0,
                outbound: None,
                cancel: None,
                reconnect_timer: None,
            }),
        });
        (Self { shared }, events_rx)
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.shared.lock().state
    }

    /// Reconnections scheduled since the last successful open.
    #[must_use]
    pub fn attempt(&self) -> u32 {
        self.shared.lock().backoff.attempt()
    }

    fn send_frame(&self, frame: OutboundFrame) {
        let inner = self.shared.lock();
        match &inner.outbound {
            Some(tx) => {
                if tx.send(frame).is_err() {
                    log::debug!("[Connection] Writer gone, dropping frame");
                }
            }
            None => log::debug!("[Connection] Not connected, dropping frame"),
        }
    }
}

impl Connection for ConnectionManager {
    fn ensure_connected(&self) {
        let mut inner = self.shared.lock();
        match inner.state {
            ConnectionState::Connecting | ConnectionState::Open => return,
            ConnectionState::Backoff { .. } => {
                if let Some(timer) = inner.reconnect_timer.take() {
                    timer.abort();
                }
                log::info!("[Connection] Skipping backoff, connecting now");
            }
            ConnectionState::Disconnected => {}
        }
        self.shared.start_attempt(&mut inner);
    }

    fn close(&self) {
        let mut inner = self.shared.lock();
        inner.generation += 1;
        if let Some(timer) = inner.reconnect_timer.take() {
            timer.abort();
        }
        if let Some(cancel) = inner.cancel.take() {
            cancel.cancel();
        }
        inner.outbound = None;

        let was_open = inner.state == ConnectionState::Open;
        inner.state = ConnectionState::Disconnected;
        if was_open {
            log::info!("[Connection] Closed by client");
            let _ = self.shared.events.send(ConnectionEvent::Closed {
                code: CLIENT_CLOSE_CODE,
                reason: "closed by client".to_string(),
            });
        }
    }

    fn send_text(&self, text: String) {
        self.send_frame(OutboundFrame::Text(text));
    }

    fn send_binary(&self, bytes: Vec<u8>) {
        self.send_frame(OutboundFrame::Binary(bytes));
    }
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Begin a new connection attempt. Caller holds the lock.
    fn start_attempt(self: &Arc<Self>, inner: &mut Inner) {
        inner.generation += 1;
        let generation = inner.generation;
        let cancel = CancellationToken::new();
        inner.cancel = Some(cancel.clone());
        inner.state = ConnectionState::Connecting;

        log::info!("[Connection] Connecting (generation {})", generation);
        self.runtime
            .spawn(run_connection(Arc::clone(self), generation, cancel));
    }

    /// Record a successful open. Returns `false` if the attempt was superseded.
    fn mark_open(&self, generation: u64, outbound: mpsc::UnboundedSender<OutboundFrame>) -> bool {
        let mut inner = self.lock();
        if inner.generation != generation {
            return false;
        }
        inner.state = ConnectionState::Open;
        inner.backoff.reset();
        inner.outbound = Some(outbound);
        log::info!("[Connection] Connected");
        let _ = self.events.send(ConnectionEvent::Open);
        true
    }

    /// Deliver an event for a live connection; stale generations are ignored.
    fn emit_if_current(&self, generation: u64, event: ConnectionEvent) -> bool {
        let inner = self.lock();
        if inner.generation != generation {
            return false;
        }
        self.events.send(event).is_ok()
    }

    /// The connection (or attempt) ended on its own: report and back off.
    fn connection_lost(self: &Arc<Self>, generation: u64, event: ConnectionEvent) {
        let mut inner = self.lock();
        if inner.generation != generation {
            return;
        }
        inner.outbound = None;
        if let Some(cancel) = inner.cancel.take() {
            cancel.cancel();
        }

        match &event {
            ConnectionEvent::Failure(err) => log::warn!("[Connection] Failure: {}", err),
            ConnectionEvent::Closed { code, reason } => {
                log::info!("[Connection] Closed by peer: {} {}", code, reason);
            }
            _ => {}
        }
        let _ = self.events.send(event);

        self.schedule_reconnect(&mut inner);
    }

    /// Arm the single reconnection timer. Caller holds the lock.
    fn schedule_reconnect(self: &Arc<Self>, inner: &mut Inner) {
        if let Some(timer) = inner.reconnect_timer.take() {
            timer.abort();
        }

        let attempt = inner.backoff.attempt();
        let delay = inner.backoff.next_delay();
        inner.state = ConnectionState::Backoff { attempt, delay };
        log::info!(
            "[Connection] Reconnecting in {}s (attempt {})",
            delay.as_secs(),
            attempt + 1
        );

        let generation = inner.generation;
        let shared = Arc::clone(self);
        inner.reconnect_timer = Some(self.runtime.spawn(async move {
            tokio::time::sleep(delay).await;
            let mut inner = shared.lock();
            if inner.generation != generation
                || !matches!(inner.state, ConnectionState::Backoff { .. })
            {
                return;
            }
            inner.reconnect_timer = None;
            shared.start_attempt(&mut inner);
        }));
    }
}

/// Drive one connection attempt from dial to teardown.
async fn run_connection(shared: Arc<Shared>, generation: u64, cancel: CancellationToken) {
    let connected = tokio::select! {
        () = cancel.cancelled() => return,
        result = shared.transport.connect() => result,
    };

    let (mut writer, mut reader) = match connected {
        Ok(pair) => pair,
        Err(e) => {
            shared.connection_lost(generation, ConnectionEvent::Failure(format!("{e:#}")));
            return;
        }
    };

    let (tx, rx) = mpsc::unbounded_channel();
    if !shared.mark_open(generation, tx.clone()) {
        log::debug!("[Connection] Attempt superseded, dropping new connection");
        let _ = writer.close().await;
        return;
    }

    let mut writer_task = tokio::spawn(write_loop(
        writer,
        rx,
        shared.ping_interval,
        cancel.clone(),
    ));

    let ended = tokio::select! {
        () = cancel.cancelled() => None,
        event = read_loop(&shared, generation, reader.as_mut(), &tx) => Some(event),
        _ = &mut writer_task => {
            Some(ConnectionEvent::Failure("connection write side closed".to_string()))
        }
    };

    // Stops the writer (which closes the sink) whichever way we got here.
    cancel.cancel();

    if let Some(event) = ended {
        shared.connection_lost(generation, event);
    }
}

/// Forward inbound frames as events until the connection ends.
async fn read_loop(
    shared: &Shared,
    generation: u64,
    reader: &mut dyn TransportReader,
    outbound: &mpsc::UnboundedSender<OutboundFrame>,
) -> ConnectionEvent {
    loop {
        match reader.recv().await {
            Some(Ok(WsMessage::Text(text))) => {
                shared.emit_if_current(generation, ConnectionEvent::Message(text));
            }
            Some(Ok(WsMessage::Binary(data))) => {
                log::debug!("[Connection] Ignoring inbound binary frame ({} bytes)", data.len());
            }
            Some(Ok(WsMessage::Ping(data))) => {
                let _ = outbound.send(OutboundFrame::Pong(data));
            }
            Some(Ok(WsMessage::Pong(_))) => {}
            Some(Ok(WsMessage::Close { code, reason })) => {
                return ConnectionEvent::Closed { code, reason };
            }
            Some(Err(e)) => return ConnectionEvent::Failure(format!("{e:#}")),
            None => {
                return ConnectionEvent::Closed {
                    code: ABNORMAL_CLOSE_CODE,
                    reason: "stream ended".to_string(),
                };
            }
        }
    }
}

/// Single writer for one connection: drains the queue in order, sends pings.
async fn write_loop(
    mut writer: Box<dyn TransportWriter>,
    mut frames: mpsc::UnboundedReceiver<OutboundFrame>,
    ping_interval: Option<Duration>,
    cancel: CancellationToken,
) {
    let mut ping = ping_interval.map(|period| {
        let mut interval = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        interval
    });

    loop {
        tokio::select! {
            () = cancel.cancelled() => {
                let _ = writer.close().await;
                return;
            }
            frame = frames.recv() => {
                let Some(frame) = frame else { return };
                if let Err(e) = writer.send(frame).await {
                    log::warn!("[Connection] Write failed: {:#}", e);
                    return;
                }
            }
            () = next_ping(&mut ping) => {
                if let Err(e) = writer.send(OutboundFrame::Ping(Vec::new())).await {
                    log::warn!("[Connection] Ping failed: {:#}", e);
                    return;
                }
            }
        }
    }
}

async fn next_ping(interval: &mut Option<tokio::time::Interval>) {
    match interval {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending().await,
    }
}
