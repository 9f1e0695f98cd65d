//! Connection registry: stable uid to connection lookup.
//!
//! The registry never owns a connection - entries are weak, so a
//! connection disappears from lookup when its last handle is dropped.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, Weak};

use super::connection::Shared;

pub(crate) struct Registry {
    next_uid: AtomicU32,
    connections: Mutex<HashMap<u32, Weak<Shared>>>,
}

impl Registry {
    pub(crate) fn new() -> Self {
        Self {
            next_uid: AtomicU32::new(1),
            connections: Mutex::new(HashMap::new()),
        }
    }

    /// Allocate the next connection uid.
    pub(crate) fn next_uid(&self) -> u32 {
        self.next_uid.fetch_add(1, Ordering::Relaxed)
    }

    /// Register a connection under its uid.
    pub(crate) fn insert(&self, uid: u32, connection: Weak<Shared>) {
        let mut map = self
            .connections
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        map.retain(|_, weak| weak.strong_count() > 0);
        map.insert(uid, connection);
    }

    /// Look up a live connection by uid.
    pub(crate) fn find(&self, uid: u32) -> Option<Arc<Shared>> {
        self.connections
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(&uid)?
            .upgrade()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::DEFAULT_BUFFER_SIZE;
    use crate::crypto::Keypair;

    fn shared(uid: u32) -> Arc<Shared> {
        let (commands, _rx) = tokio::sync::mpsc::unbounded_channel();
        Arc::new(Shared::new(
            uid,
            Keypair::generate(),
            DEFAULT_BUFFER_SIZE,
            commands,
        ))
    }

    #[test]
    fn test_uids_are_unique() {
        let registry = Registry::new();
        let a = registry.next_uid();
        let b = registry.next_uid();
        assert_ne!(a, b);
    }

    #[test]
    fn test_find_registered_connection() {
        let registry = Registry::new();
        let uid = registry.next_uid();
        let conn = shared(uid);
        registry.insert(uid, Arc::downgrade(&conn));

        let found = registry.find(uid).unwrap();
        assert_eq!(found.uid(), uid);
    }

    #[test]
    fn test_dropped_connection_disappears() {
        let registry = Registry::new();
        let uid = registry.next_uid();
        let conn = shared(uid);
        registry.insert(uid, Arc::downgrade(&conn));

        drop(conn);
        assert!(registry.find(uid).is_none());
    }
}
