//! Send-serialization point for replies.
//!
//! Every handler writes through an [`Outbound`]. Its gate is held while a
//! reply (and, for `read_chunk`/`thumb_meta`, its binary payload) is queued on
//! the connection, so a metadata frame is always immediately followed by its
//! own payload even when many handlers run at once.
//!
//! Handles are bound to a session. The dispatcher starts a new session for
//! every opened connection, and replies from handlers of an earlier session
//! are dropped, so `hello` is always the first frame of a connection.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::connection::Connection;
use crate::protocol::{self, Reply, WireMessage};

/// Serialized writer shared by all command handlers.
///
/// Cloning yields another handle for the same session.
#[derive(Clone)]
pub struct Outbound {
    shared: Arc<Shared>,
    session: u64,
}

struct Shared {
    link: Arc<dyn Connection>,
    /// Current session; also the send gate.
    current: Mutex<u64>,
}

impl std::fmt::Debug for Outbound {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Outbound")
            .field("session", &self.session)
            .finish_non_exhaustive()
    }
}

impl Outbound {
    /// Writer over `link`, in its first session.
    #[must_use]
    pub fn new(link: Arc<dyn Connection>) -> Self {
        Self {
            shared: Arc::new(Shared {
                link,
                current: Mutex::new(0),
            }),
            session: 0,
        }
    }

    /// Start a new session; handles of earlier sessions stop sending.
    #[must_use]
    pub fn begin_session(&self) -> Self {
        let mut current = self.gate();
        *current += 1;
        Self {
            shared: Arc::clone(&self.shared),
            session: *current,
        }
    }

    /// Whether this handle still belongs to the current session.
    #[must_use]
    pub fn is_current(&self) -> bool {
        *self.gate() == self.session
    }

    /// Send a reply with no payload.
    pub fn send(&self, reply: &Reply) {
        let text = protocol::encode(reply);

        let current = self.gate();
        if *current != self.session {
            log::debug!("[Outbound] Dropping stale {}", reply.discriminant());
            return;
        }
        log::trace!("[Outbound] {}", reply.discriminant());
        self.shared.link.send_text(text);
    }

    /// Send a metadata reply followed immediately by its binary payload.
    pub fn send_with_payload(&self, reply: &Reply, payload: Vec<u8>) {
        let text = protocol::encode(reply);

        let current = self.gate();
        if *current != self.session {
            log::debug!("[Outbound] Dropping stale {}", reply.discriminant());
            return;
        }
        log::trace!(
            "[Outbound] {} + {} payload bytes",
            reply.discriminant(),
            payload.len()
        );
        self.shared.link.send_text(text);
        self.shared.link.send_binary(payload);
    }

    fn gate(&self) -> MutexGuard<'_, u64> {
        self.shared
            .current
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}
