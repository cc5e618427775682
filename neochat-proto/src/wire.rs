//! Frame types and codec for the `NeoChat` WebSocket protocol.
//!
//! Frames are postcard-encoded and travel as WebSocket binary messages.
//! [`ClientFrame`] carries requests from a connected client; [`ServerFrame`]
//! carries the synchronous result back to the invoking client plus the
//! broadcast events fanned out to both conversation participants. The two
//! channels are distinct variants: a direct response is never a broadcast.

use serde::{Deserialize, Serialize};

use crate::message::{ChatMessage, MessageId, UserId};

/// Error type for frame encode/decode operations.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// Serialization or deserialization failed.
    #[error("serialization error: {0}")]
    Serialization(String),
}

/// Closed taxonomy of failures reported to the invoking caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorKind {
    /// Credential absent, malformed, invalid, or expired.
    Unauthenticated,
    /// A required field is missing or fails validation.
    InvalidInput,
    /// The referenced message does not exist.
    NotFound,
    /// The caller is not authorized for the requested mutation.
    Forbidden,
    /// Storage or infrastructure failure.
    Internal,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Unauthenticated => "unauthenticated",
            Self::InvalidInput => "invalid input",
            Self::NotFound => "not found",
            Self::Forbidden => "forbidden",
            Self::Internal => "internal error",
        };
        write!(f, "{s}")
    }
}

/// Frames sent by a client to the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ClientFrame {
    /// Connection handshake. Must be the first frame after the WebSocket
    /// upgrade; the server answers [`ServerFrame::Welcome`] or an
    /// `Unauthenticated` error followed by a close.
    Hello {
        /// Bearer credential issued at login.
        token: String,
    },

    /// Send a text message to a recipient.
    Send {
        /// Identity of the recipient.
        recipient_id: UserId,
        /// Message text.
        content: String,
    },

    /// Delete a single message the caller sent.
    DeleteMessage {
        /// Identifier of the message to delete.
        message_id: MessageId,
    },

    /// Delete the whole conversation with a peer, in both directions.
    ClearConversation {
        /// The other participant.
        peer_id: UserId,
    },
}

/// Frames sent by the server to a client.
///
/// `Welcome`, `SendOk`, `DeleteOk`, `ClearOk`, and `Error` are direct
/// responses to the invoking connection only. `MessageCreated` and
/// `MessageDeleted` are fan-out events delivered to every live connection of
/// both conversation participants.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ServerFrame {
    /// Handshake accepted; the connection is bound to this identity.
    Welcome {
        /// Authenticated identity.
        user_id: UserId,
        /// Display name from the credential.
        username: String,
    },

    /// Synchronous acknowledgment of a `Send`, carrying the persisted
    /// message. The sender also receives the same message as a
    /// `MessageCreated` event on its live connections.
    SendOk {
        /// The persisted, fully resolved message.
        message: ChatMessage,
    },

    /// Synchronous acknowledgment of a `DeleteMessage`.
    DeleteOk {
        /// Identifier of the deleted message.
        message_id: MessageId,
    },

    /// Synchronous result of a `ClearConversation`; empty list when the
    /// conversation had no messages.
    ClearOk {
        /// Identifiers of every deleted message.
        deleted: Vec<MessageId>,
    },

    /// The operation failed; reported to the invoking caller only.
    Error {
        /// Failure classification.
        kind: ErrorKind,
        /// Human-readable description.
        reason: String,
    },

    /// Broadcast: a new message exists in a conversation the recipient
    /// participates in.
    MessageCreated {
        /// The persisted, fully resolved message.
        message: ChatMessage,
    },

    /// Broadcast: a message was deleted and should disappear from UIs.
    MessageDeleted {
        /// Identifier of the deleted message.
        message_id: MessageId,
    },
}

/// Encodes a [`ClientFrame`] into bytes using postcard.
///
/// # Errors
///
/// Returns `CodecError::Serialization` if the frame cannot be serialized.
pub fn encode_client(frame: &ClientFrame) -> Result<Vec<u8>, CodecError> {
    postcard::to_allocvec(frame).map_err(|e| CodecError::Serialization(e.to_string()))
}

/// Decodes a [`ClientFrame`] from bytes using postcard.
///
/// # Errors
///
/// Returns `CodecError::Serialization` if the bytes cannot be deserialized.
pub fn decode_client(bytes: &[u8]) -> Result<ClientFrame, CodecError> {
    postcard::from_bytes(bytes).map_err(|e| CodecError::Serialization(e.to_string()))
}

/// Encodes a [`ServerFrame`] into bytes using postcard.
///
/// # Errors
///
/// Returns `CodecError::Serialization` if the frame cannot be serialized.
pub fn encode_server(frame: &ServerFrame) -> Result<Vec<u8>, CodecError> {
    postcard::to_allocvec(frame).map_err(|e| CodecError::Serialization(e.to_string()))
}

/// Decodes a [`ServerFrame`] from bytes using postcard.
///
/// # Errors
///
/// Returns `CodecError::Serialization` if the bytes cannot be deserialized.
pub fn decode_server(bytes: &[u8]) -> Result<ServerFrame, CodecError> {
    postcard::from_bytes(bytes).map_err(|e| CodecError::Serialization(e.to_string()))
}
