// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Process-wide registry of live connection sessions. Each connection
//! gets a [`Session`] the moment its
//! `process_connect` request is enqueued; the registry lets a worker
//! task look a session up by connection id without holding a reference
//! across a yield point, backed by a `DashMap`-keyed connection pool.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use tokio::sync::Mutex;

use crate::access::user_cache::Session;
use crate::iproto::connection::ConnWriter;

/// Opaque per-connection identifier, assigned on accept.
pub type ConnId = u64;

/// Registry of reply sinks: lets a worker task write a reply frame for
/// `conn_id` without holding a reference to the owning `Connection`,
/// whose read half is borrowed by the accept loop's own task.
#[derive(Default)]
pub struct ReplyRegistry {
    writers: DashMap<ConnId, Arc<Mutex<ConnWriter>>>,
}

impl ReplyRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, id: ConnId, writer: Arc<Mutex<ConnWriter>>) {
        self.writers.insert(id, writer);
    }

    pub fn forget(&self, id: ConnId) {
        self.writers.remove(&id);
    }

    /// Writes `frame` for `conn_id`, if the connection is still
    /// registered. Silently drops the reply if the connection has
    /// already gone away — matching the source's "output inactive"
    /// handling for a worker finishing after its connection closed.
    /// Goes through the same output slot the connection's own
    /// back-pressure check inspects.
    pub async fn write_reply(&self, conn_id: ConnId, frame: Vec<u8>) {
        let Some(writer) = self.writers.get(&conn_id).map(|e| e.value().clone()) else {
            return;
        };
        let mut w = writer.lock().await;
        let _ = w.flush(&frame).await;
    }
}

pub struct SessionRegistry {
    sessions: DashMap<ConnId, Arc<Session>>,
    next_id: AtomicU64,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self {
            sessions: DashMap::new(),
            next_id: AtomicU64::new(1),
        }
    }

    /// Registers a brand-new connection as guest and returns its id plus
    /// shared session handle.
    pub fn register(&self, fd: i32, peer_cookie: u64) -> (ConnId, Arc<Session>) {
        let id = self.next_id.fetch_add(1, Ordering::AcqRel);
        let session = Arc::new(Session::new(fd, peer_cookie));
        self.sessions.insert(id, session.clone());
        (id, session)
    }

    pub fn get(&self, id: ConnId) -> Option<Arc<Session>> {
        self.sessions.get(&id).map(|e| e.value().clone())
    }

    /// Removes a session once its connection has become idle.
    pub fn forget(&self, id: ConnId) {
        self.sessions.remove(&id);
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_then_forget() {
        let registry = SessionRegistry::new();
        let (id, session) = registry.register(5, 42);
        assert_eq!(session.fd, 5);
        assert_eq!(registry.len(), 1);
        assert!(registry.get(id).is_some());

        registry.forget(id);
        assert!(registry.is_empty());
        assert!(registry.get(id).is_none());
    }
}
