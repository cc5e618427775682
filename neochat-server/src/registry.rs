//! Connection registry mapping identities to their live connections.
//!
//! A user may hold several simultaneous connections (multiple devices); each
//! is bound to exactly one identity at handshake and never reassigned. The
//! registry is process-memory only and is rebuilt empty on restart — every
//! user is offline until they reconnect.

use std::collections::HashMap;

use axum::extract::ws::Message;
use neochat_proto::message::UserId;
use tokio::sync::{RwLock, mpsc};
use uuid::Uuid;

/// Channel sender delivering WebSocket messages to one connection's writer.
pub type FrameSender = mpsc::UnboundedSender<Message>;

/// Opaque handle identifying a single live connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnId(Uuid);

impl ConnId {
    /// Creates a fresh connection handle.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ConnId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ConnId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Both maps live under one lock so membership mutation is linearizable:
/// concurrent register/unregister for the same identity cannot corrupt the
/// membership set.
#[derive(Default)]
struct RegistryInner {
    /// Which identity owns each connection handle.
    owners: HashMap<ConnId, UserId>,
    /// Live connections per identity. An identity with no connections has no
    /// entry; empty sets are removed immediately.
    members: HashMap<UserId, HashMap<ConnId, FrameSender>>,
}

/// Shared table of live connections, keyed by identity.
///
/// Constructed once at process start and passed by reference to every
/// component that needs it; there is no ambient singleton.
#[derive(Default)]
pub struct ConnectionRegistry {
    inner: RwLock<RegistryInner>,
}

impl ConnectionRegistry {
    /// Creates a new, empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a connection handle under an identity's set.
    ///
    /// Idempotent: re-registering an already-present handle replaces its
    /// sender and changes nothing else.
    pub async fn register(&self, identity: &UserId, conn_id: ConnId, sender: FrameSender) {
        let mut inner = self.inner.write().await;
        inner.owners.insert(conn_id, identity.clone());
        inner
            .members
            .entry(identity.clone())
            .or_default()
            .insert(conn_id, sender);
    }

    /// Removes a handle from whatever identity it was registered under.
    ///
    /// Unregistering an unknown handle is a no-op, not a failure. Returns the
    /// identity the handle belonged to, if any.
    pub async fn unregister(&self, conn_id: ConnId) -> Option<UserId> {
        let mut inner = self.inner.write().await;
        let identity = inner.owners.remove(&conn_id)?;
        if let Some(conns) = inner.members.get_mut(&identity) {
            conns.remove(&conn_id);
            if conns.is_empty() {
                inner.members.remove(&identity);
            }
        }
        Some(identity)
    }

    /// Returns a snapshot of the identity's live connections at call time.
    ///
    /// Handles registered after the snapshot is taken are not included; that
    /// is the delivery contract.
    pub async fn connections_for(&self, identity: &UserId) -> Vec<(ConnId, FrameSender)> {
        let inner = self.inner.read().await;
        inner.members.get(identity).map_or_else(Vec::new, |conns| {
            conns.iter().map(|(id, tx)| (*id, tx.clone())).collect()
        })
    }

    /// Number of live connections currently registered for an identity.
    pub async fn connection_count(&self, identity: &UserId) -> usize {
        let inner = self.inner.read().await;
        inner.members.get(identity).map_or(0, HashMap::len)
    }
}
