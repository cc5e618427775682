//! Chat session operations: the single place where persistence and live
//! notification are sequenced.
//!
//! Every operation persists through the [`MessageStore`] first and only then
//! fans events out through the [`DeliveryRouter`] to both participants.
//! Validation and authorization failures are terminal for the one operation,
//! surface only to the invoking caller, and never trigger a broadcast.

use std::sync::Arc;

use neochat_proto::message::{ChatMessage, MessageId, UserId};
use neochat_proto::wire::{ErrorKind, ServerFrame};

use crate::auth::Identity;
use crate::router::DeliveryRouter;
use crate::store::{MessageStore, StoreError};

/// Failure of a single session operation, reported to the invoking caller.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// A required field is missing or fails validation.
    #[error("invalid message data: {0}")]
    InvalidInput(String),
    /// The referenced message does not exist.
    #[error("message not found")]
    NotFound,
    /// The caller is not authorized for the requested mutation.
    #[error("you can only delete your own messages")]
    Forbidden,
    /// Storage or infrastructure failure. Not retried here; retry policy
    /// belongs to the caller.
    #[error("internal error: {0}")]
    Internal(String),
}

impl SessionError {
    /// Classification used at the protocol boundary.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidInput(_) => ErrorKind::InvalidInput,
            Self::NotFound => ErrorKind::NotFound,
            Self::Forbidden => ErrorKind::Forbidden,
            Self::Internal(_) => ErrorKind::Internal,
        }
    }

    /// Renders the failure as the error frame sent to the caller.
    #[must_use]
    pub fn to_frame(&self) -> ServerFrame {
        ServerFrame::Error {
            kind: self.kind(),
            reason: self.to_string(),
        }
    }
}

impl From<StoreError> for SessionError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound => Self::NotFound,
            StoreError::Forbidden => Self::Forbidden,
            StoreError::InvalidInput(reason) => Self::InvalidInput(reason),
            StoreError::Backend(e) => Self::Internal(e.to_string()),
        }
    }
}

/// Orchestrates send/delete/history for one authenticated caller.
///
/// One session exists per WebSocket connection and one is built per HTTP
/// request; both share the same store and router instances.
#[derive(Clone)]
pub struct ChatSession {
    identity: Identity,
    store: Arc<MessageStore>,
    router: DeliveryRouter,
}

impl ChatSession {
    /// Creates a session bound to an authenticated identity.
    #[must_use]
    pub fn new(identity: Identity, store: Arc<MessageStore>, router: DeliveryRouter) -> Self {
        Self {
            identity,
            store,
            router,
        }
    }

    /// The authenticated caller this session acts for.
    #[must_use]
    pub const fn identity(&self) -> &Identity {
        &self.identity
    }

    /// Persists a message and fans it out to both participants.
    ///
    /// The persisted message is delivered as a `MessageCreated` event to the
    /// recipient and echoed back to the caller's own connections — the echo
    /// doubles as the send confirmation. The returned message is the
    /// caller's synchronous acknowledgment.
    ///
    /// # Errors
    ///
    /// `InvalidInput` for a missing recipient, blank or oversized content,
    /// or a self-message; `Internal` when the store fails. No delivery
    /// occurs on any error.
    pub async fn send(
        &self,
        recipient_id: &UserId,
        content: &str,
    ) -> Result<ChatMessage, SessionError> {
        if recipient_id.is_empty() {
            return Err(SessionError::InvalidInput(
                "recipient is required".to_string(),
            ));
        }
        if content.trim().is_empty() {
            return Err(SessionError::InvalidInput(
                "message content is empty".to_string(),
            ));
        }
        if recipient_id == &self.identity.id {
            return Err(SessionError::InvalidInput(
                "cannot send a message to yourself".to_string(),
            ));
        }

        let message = self.store.insert(&self.identity.id, recipient_id, content)?;
        tracing::debug!(
            message_id = %message.id,
            from = %message.sender_id,
            to = %message.recipient_id,
            "message persisted"
        );

        // Persistence has durably completed; now notify both sides.
        let event = ServerFrame::MessageCreated {
            message: message.clone(),
        };
        self.router.deliver(recipient_id, &event).await;
        self.router.deliver(&self.identity.id, &event).await;

        Ok(message)
    }

    /// Deletes one message the caller sent and notifies both participants.
    ///
    /// # Errors
    ///
    /// `NotFound` / `Forbidden` per store semantics; on failure no delivery
    /// occurs and the error surfaces only to the caller.
    pub async fn delete_message(&self, message_id: &MessageId) -> Result<MessageId, SessionError> {
        let deleted = self.store.delete_by_id(message_id, &self.identity.id)?;
        tracing::debug!(message_id = %deleted.id, "message deleted");

        // Notify the deleted message's sender and recipient, not just the
        // caller, so every UI reflects the deletion.
        let event = ServerFrame::MessageDeleted {
            message_id: deleted.id,
        };
        self.router.deliver(&deleted.sender_id, &event).await;
        self.router.deliver(&deleted.recipient_id, &event).await;

        Ok(deleted.id)
    }

    /// Deletes the whole conversation with a peer and notifies both sides,
    /// one `MessageDeleted` event per deleted id.
    ///
    /// Returns the full list of deleted ids, empty when the conversation had
    /// no messages.
    ///
    /// # Errors
    ///
    /// `Internal` when the store fails; nothing is broadcast in that case.
    pub async fn clear_conversation(
        &self,
        peer_id: &UserId,
    ) -> Result<Vec<MessageId>, SessionError> {
        let deleted = self.store.delete_conversation(&self.identity.id, peer_id)?;
        tracing::debug!(
            peer = %peer_id,
            count = deleted.len(),
            "conversation cleared"
        );

        for id in &deleted {
            let event = ServerFrame::MessageDeleted { message_id: *id };
            self.router.deliver(&self.identity.id, &event).await;
            self.router.deliver(peer_id, &event).await;
        }

        Ok(deleted)
    }

    /// Reads the full ordered conversation with a peer.
    ///
    /// # Errors
    ///
    /// `Internal` when the store fails.
    pub fn history(&self, peer_id: &UserId) -> Result<Vec<ChatMessage>, SessionError> {
        Ok(self.store.conversation(&self.identity.id, peer_id)?)
    }
}
