//! Best-effort fan-out of server events to an identity's live connections.
//!
//! Delivery is at-most-once per currently-registered connection. An identity
//! with no live connections silently drops the event — durability is the
//! message store's job, not this component's.

use std::sync::Arc;

use axum::extract::ws::Message;
use neochat_proto::message::UserId;
use neochat_proto::wire::{self, ServerFrame};

use crate::registry::ConnectionRegistry;

/// Fans one logical event out to every live connection of a target identity.
#[derive(Clone)]
pub struct DeliveryRouter {
    registry: Arc<ConnectionRegistry>,
}

impl DeliveryRouter {
    /// Creates a router over the shared connection registry.
    #[must_use]
    pub fn new(registry: Arc<ConnectionRegistry>) -> Self {
        Self { registry }
    }

    /// Delivers a frame to every connection registered for `identity` at
    /// call time.
    ///
    /// The frame is encoded once; every connection receives identical bytes.
    /// A push to a dead connection unregisters that connection (self-healing)
    /// and never aborts delivery to the remaining connections, nor surfaces
    /// an error to the caller.
    pub async fn deliver(&self, identity: &UserId, frame: &ServerFrame) {
        let conns = self.registry.connections_for(identity).await;
        if conns.is_empty() {
            tracing::debug!(user_id = %identity, "no live connections, event dropped");
            return;
        }

        let bytes = match wire::encode_server(frame) {
            Ok(b) => b,
            Err(e) => {
                tracing::error!(error = %e, "failed to encode frame for delivery");
                return;
            }
        };

        let mut dead = Vec::new();
        for (conn_id, sender) in conns {
            if sender.send(Message::Binary(bytes.clone().into())).is_err() {
                dead.push(conn_id);
            }
        }
        for conn_id in dead {
            tracing::warn!(user_id = %identity, conn_id = %conn_id, "removing dead connection");
            self.registry.unregister(conn_id).await;
        }
    }
}
