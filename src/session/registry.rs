//! Live view of the sessions the acceptor is currently running

use crate::session::types::SessionId;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::net::SocketAddr;

#[derive(Debug, Clone)]
pub struct ActiveSession {
    pub peer: SocketAddr,
    pub started_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: DashMap<SessionId, ActiveSession>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, id: SessionId, peer: SocketAddr) {
        self.sessions.insert(
            id,
            ActiveSession {
                peer,
                started_at: Utc::now(),
            },
        );
    }

    pub fn remove(&self, id: &SessionId) -> Option<ActiveSession> {
        self.sessions.remove(id).map(|(_, session)| session)
    }

    pub fn contains(&self, id: &SessionId) -> bool {
        self.sessions.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Snapshot of the running sessions
    pub fn list(&self) -> Vec<(SessionId, ActiveSession)> {
        self.sessions
            .iter()
            .map(|entry| (*entry.key(), entry.value().clone()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_and_remove() {
        let registry = SessionRegistry::new();
        let id = SessionId::new();
        let peer: SocketAddr = "127.0.0.1:5000".parse().unwrap();

        registry.insert(id, peer);
        assert!(registry.contains(&id));
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.list()[0].1.peer, peer);

        let removed = registry.remove(&id).unwrap();
        assert_eq!(removed.peer, peer);
        assert!(registry.is_empty());
        assert!(registry.remove(&id).is_none());
    }
}
