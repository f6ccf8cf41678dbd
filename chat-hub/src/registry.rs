//! Directory of registered sessions keyed by display name.
//!
//! One `RwLock` guards the whole map. Lookups and snapshots share the read
//! lock; register, rename and removal take the write lock, so a rename is
//! never observed half-done. Callers only ever get cloned `Arc<Session>`s
//! back; no I/O happens while the lock is held.

use std::{collections::BTreeMap, net::SocketAddr, sync::Arc};

use tokio::sync::RwLock;
use tracing::debug;

use crate::{
    error::{HubError, HubResult},
    session::Session,
};

#[derive(Default)]
pub struct Registry {
    sessions: RwLock<BTreeMap<String, Arc<Session>>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts `session` under `name` unless the name is already held.
    ///
    /// The session's own name is set to `name` inside the same critical
    /// section.
    pub async fn register(&self, name: &str, session: Arc<Session>) -> HubResult<()> {
        let mut sessions = self.sessions.write().await;
        if sessions.contains_key(name) {
            return Err(HubError::NameTaken(name.to_string()));
        }

        session.set_name(name);
        sessions.insert(name.to_string(), session);
        debug!(name, "registered session");
        Ok(())
    }

    /// Removes whatever is registered under `name`. Absent names are ignored.
    pub async fn unregister(&self, name: &str) -> Option<Arc<Session>> {
        self.sessions.write().await.remove(name)
    }

    /// Removes `session` if, and only if, its current name still maps to it.
    ///
    /// Returns `true` when an entry was removed.
    pub async fn remove_session(&self, session: &Session) -> bool {
        let mut sessions = self.sessions.write().await;
        // Read the name under the write lock so a concurrent rename cannot
        // slip between the read and the removal.
        let name = session.name();
        let owned = sessions
            .get(&name)
            .is_some_and(|registered| registered.id() == session.id());
        if owned {
            sessions.remove(&name);
            debug!(%name, "unregistered session");
        }
        owned
    }

    /// Moves the session registered as `old` to `new`.
    ///
    /// Renaming a session to the name it already holds succeeds without
    /// change. The occupancy check and the move happen under one write lock,
    /// so two concurrent renames to the same free name cannot both win.
    pub async fn rename(&self, old: &str, new: &str) -> HubResult<()> {
        let mut sessions = self.sessions.write().await;
        let session = sessions
            .get(old)
            .cloned()
            .ok_or_else(|| HubError::UserNotFound(old.to_string()))?;

        if let Some(existing) = sessions.get(new) {
            if existing.id() == session.id() {
                return Ok(());
            }
            return Err(HubError::NameTaken(new.to_string()));
        }

        sessions.insert(new.to_string(), Arc::clone(&session));
        sessions.remove(old);
        session.set_name(new);
        debug!(old, new, "renamed session");
        Ok(())
    }

    pub async fn lookup(&self, name: &str) -> Option<Arc<Session>> {
        self.sessions.read().await.get(name).cloned()
    }

    /// Point-in-time copy of every registered session, ordered by name.
    pub async fn snapshot(&self) -> Vec<Arc<Session>> {
        self.sessions.read().await.values().cloned().collect()
    }

    /// Registered names with their peer addresses, ordered by name.
    ///
    /// Names come from the map keys under the read lock, so a rename that
    /// lands right after the call cannot leak into the result.
    pub async fn roster(&self) -> Vec<(String, SocketAddr)> {
        self.sessions
            .read()
            .await
            .iter()
            .map(|(name, session)| (name.clone(), session.addr()))
            .collect()
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }
}
