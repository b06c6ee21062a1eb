use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, warn};
use uuid::Uuid;

/// Frames queued per session before the session is considered dead.
pub const OUTBOUND_QUEUE_CAPACITY: usize = 256;

/// A serialized frame, shared between all recipients of one broadcast.
pub type Payload = Arc<str>;

/// Identity of one live connection. A user with two sockets has two handles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionHandle(Uuid);

impl SessionHandle {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SessionHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LiveSession {
    pub handle: SessionHandle,
    pub user_id: i64,
    pub conversation_id: i64,
}

impl LiveSession {
    pub fn new(user_id: i64, conversation_id: i64) -> Self {
        Self {
            handle: SessionHandle::new(),
            user_id,
            conversation_id,
        }
    }
}

struct Entry {
    session: LiveSession,
    tx: mpsc::Sender<Payload>,
}

#[derive(Default)]
struct Registry {
    sessions: HashMap<SessionHandle, Entry>,
    /// conversation_id -> handles subscribed to it
    by_conversation: HashMap<i64, HashSet<SessionHandle>>,
}

impl Registry {
    fn insert(&mut self, session: LiveSession, tx: mpsc::Sender<Payload>) {
        self.remove(session.handle);
        self.by_conversation
            .entry(session.conversation_id)
            .or_default()
            .insert(session.handle);
        self.sessions.insert(session.handle, Entry { session, tx });
    }

    fn remove(&mut self, handle: SessionHandle) -> Option<Entry> {
        let entry = self.sessions.remove(&handle)?;
        let conversation_id = entry.session.conversation_id;
        if let Some(handles) = self.by_conversation.get_mut(&conversation_id) {
            handles.remove(&handle);
            if handles.is_empty() {
                self.by_conversation.remove(&conversation_id);
            }
        }
        Some(entry)
    }
}

/// Process-wide registry of live chat sessions. Cheap to clone; every clone
/// shares the same registry.
///
/// All three operations take the one lock, so none of them can observe the
/// session map and the conversation index out of step. The lock is never
/// held across an `.await` or any I/O; delivery only enqueues onto each
/// session's bounded channel.
#[derive(Clone, Default)]
pub struct Hub {
    inner: Arc<HubInner>,
}

#[derive(Default)]
struct HubInner {
    registry: RwLock<Registry>,
}

impl Hub {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, Registry> {
        // Registry updates cannot panic halfway, so a poisoned lock still holds consistent data
        self.inner.registry.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Registry> {
        self.inner.registry.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Adds a session and returns the receiving end of its outbound queue.
    /// The queue closes once the session is unregistered.
    pub fn register(&self, session: LiveSession) -> mpsc::Receiver<Payload> {
        let (tx, rx) = mpsc::channel(OUTBOUND_QUEUE_CAPACITY);
        debug!(
            "Registering session {} (user {}, conversation {})",
            session.handle, session.user_id, session.conversation_id
        );
        self.write().insert(session, tx);
        rx
    }

    /// Removes a session. Returns false if it was already gone.
    pub fn unregister(&self, handle: SessionHandle) -> bool {
        let removed = self.write().remove(handle);
        if let Some(entry) = &removed {
            debug!(
                "Unregistered session {} (user {}, conversation {})",
                handle, entry.session.user_id, entry.session.conversation_id
            );
        }
        removed.is_some()
    }

    /// Queues `payload` for every session subscribed to `conversation_id`,
    /// the sender's own sessions included. Returns how many accepted it.
    ///
    /// A session whose queue is closed or full is dropped from the registry;
    /// that never affects delivery to the others.
    pub fn broadcast(&self, conversation_id: i64, payload: Payload) -> usize {
        let mut delivered = 0;
        let mut failed = Vec::new();

        {
            let registry = self.read();
            let Some(handles) = registry.by_conversation.get(&conversation_id) else {
                return 0;
            };

            for handle in handles {
                let Some(entry) = registry.sessions.get(handle) else {
                    continue;
                };
                match entry.tx.try_send(payload.clone()) {
                    Ok(()) => delivered += 1,
                    Err(TrySendError::Full(_)) => {
                        warn!(
                            "Session {} (user {}) outbound queue full, dropping it",
                            handle, entry.session.user_id
                        );
                        failed.push(*handle);
                    }
                    Err(TrySendError::Closed(_)) => failed.push(*handle),
                }
            }
        }

        for handle in failed {
            self.unregister(handle);
        }

        delivered
    }

    /// Queues `payload` for a single session.
    pub fn send_to(&self, handle: SessionHandle, payload: Payload) -> bool {
        let result = {
            let registry = self.read();
            match registry.sessions.get(&handle) {
                Some(entry) => entry.tx.try_send(payload),
                None => return false,
            }
        };

        match result {
            Ok(()) => true,
            Err(_) => {
                self.unregister(handle);
                false
            }
        }
    }

    pub fn session_count(&self) -> usize {
        self.read().sessions.len()
    }

    pub fn subscriber_count(&self, conversation_id: i64) -> usize {
        self.read()
            .by_conversation
            .get(&conversation_id)
            .map_or(0, HashSet::len)
    }
}
