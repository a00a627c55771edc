use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Live runs keyed by session id, each holding the token that stops it.
///
/// Removal happens exactly once: either the run's own cleanup or a stop
/// request takes the entry, and whichever comes second finds nothing.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: Mutex<HashMap<String, CancellationToken>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn sessions(&self) -> MutexGuard<'_, HashMap<String, CancellationToken>> {
        self.sessions.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn register(&self, session_id: impl Into<String>, token: CancellationToken) {
        self.sessions().insert(session_id.into(), token);
    }

    /// Removes the session and fires its token. Returns `false` when the id
    /// is unknown or already gone.
    pub fn cancel(&self, session_id: &str) -> bool {
        let token = self.sessions().remove(session_id);
        match token {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    pub fn unregister(&self, session_id: &str) -> bool {
        self.sessions().remove(session_id).is_some()
    }

    pub fn contains(&self, session_id: &str) -> bool {
        self.sessions().contains_key(session_id)
    }

    /// Allocates a fresh session id and registers a new token for it.
    pub fn open(self: &Arc<Self>) -> SessionGuard {
        let session_id = Uuid::new_v4().simple().to_string();
        let token = CancellationToken::new();
        self.register(session_id.clone(), token.clone());
        SessionGuard {
            registry: Arc::clone(self),
            session_id,
            token,
        }
    }

    pub fn cancel_all(&self) -> usize {
        let drained: Vec<CancellationToken> = self.sessions().drain().map(|(_, token)| token).collect();
        for token in &drained {
            token.cancel();
        }
        drained.len()
    }

    pub fn len(&self) -> usize {
        self.sessions().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Registration held by a running session. Dropping it unregisters the id,
/// so a client that disconnects mid-stream still gets cleaned up.
#[derive(Debug)]
pub struct SessionGuard {
    registry: Arc<SessionRegistry>,
    session_id: String,
    token: CancellationToken,
}

impl SessionGuard {
    pub fn id(&self) -> &str {
        &self.session_id
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        if self.registry.unregister(&self.session_id) {
            tracing::debug!(session_id = %self.session_id, "session unregistered");
        }
    }
}
