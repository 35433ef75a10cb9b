//! Registry of connected viewers.
//!
//! Owned by `DaemonCore`, so registration, removal and fan-out never
//! interleave. Each session is the sending half of a bounded channel; the
//! WebSocket writer task on the other end does the actual I/O, so one slow
//! viewer never holds up the others. A viewer that falls `SESSION_QUEUE`
//! messages behind is dropped like a closed one.

use std::collections::BTreeMap;
use std::fmt;

use slide_proto::protocol::ServerMessage;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, warn};

use crate::error::SessionSendFailure;

pub const SESSION_QUEUE: usize = 64;

pub type SessionSender = mpsc::Sender<ServerMessage>;
pub type SessionReceiver = mpsc::Receiver<ServerMessage>;

/// Channel for one viewer session.
pub fn session_channel() -> (SessionSender, SessionReceiver) {
    mpsc::channel(SESSION_QUEUE)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SessionId(pub u64);

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Default)]
pub struct Broadcaster {
    sessions: BTreeMap<SessionId, SessionSender>,
    next_id: u64,
}

impl Broadcaster {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Queue `snapshot` for the new session, then add it to the set.
    ///
    /// The snapshot goes out before the session can see any broadcast, so a
    /// late joiner always starts from a consistent view.
    pub fn register(
        &mut self,
        sender: SessionSender,
        snapshot: Vec<ServerMessage>,
    ) -> Result<SessionId, SessionSendFailure> {
        self.next_id += 1;
        let id = SessionId(self.next_id);

        for msg in snapshot {
            if sender.try_send(msg).is_err() {
                return Err(SessionSendFailure(id));
            }
        }

        self.sessions.insert(id, sender);
        debug!("Session {} registered ({} connected)", id, self.sessions.len());
        Ok(id)
    }

    /// Remove a session. Unknown or already-removed ids are fine.
    pub fn unregister(&mut self, id: SessionId) -> bool {
        let removed = self.sessions.remove(&id).is_some();
        if removed {
            debug!("Session {} unregistered ({} connected)", id, self.sessions.len());
        }
        removed
    }

    /// Send `msg` to every session, dropping the ones whose channel is closed
    /// or full. Returns how many sessions it reached.
    pub fn broadcast(&mut self, msg: &ServerMessage) -> usize {
        let mut failed = Vec::new();
        for (id, sender) in &self.sessions {
            match sender.try_send(msg.clone()) {
                Ok(()) => {}
                Err(TrySendError::Full(_)) => {
                    warn!("Viewer {} is {} messages behind", id, SESSION_QUEUE);
                    failed.push(SessionSendFailure(*id));
                }
                Err(TrySendError::Closed(_)) => failed.push(SessionSendFailure(*id)),
            }
        }
        for failure in &failed {
            warn!("{}, dropping it", failure);
            self.unregister(failure.0);
        }
        self.sessions.len()
    }

    /// Drop every session. Writer tasks see their channel close and hang up.
    pub fn close_all(&mut self) {
        let count = self.sessions.len();
        self.sessions.clear();
        if count > 0 {
            debug!("Closed {} viewer sessions", count);
        }
    }
}
