//! Core message types for the `NeoChat` protocol.
//!
//! A [`ChatMessage`] is the fully resolved value object handed to clients:
//! both participant ids and their display names are filled in by the server's
//! read-side join before the message ever crosses the wire.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Maximum allowed message content size in bytes (64 KB).
pub const MAX_CONTENT_SIZE: usize = 64 * 1024;

/// Opaque reference to a registered user, used for addressing and
/// authorization. Never parsed or interpreted by the server.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UserId(String);

impl UserId {
    /// Wraps an opaque identifier string.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the identifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns `true` if the identifier is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<&str> for UserId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl std::fmt::Display for UserId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Unique identifier for a message, based on UUID v7 for time-ordering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct MessageId(Uuid);

impl MessageId {
    /// Creates a new time-ordered message identifier (UUID v7).
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    /// Creates a `MessageId` from an existing UUID.
    #[must_use]
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Parses a `MessageId` from its string form.
    ///
    /// # Errors
    ///
    /// Returns the underlying [`uuid::Error`] if the string is not a UUID.
    pub fn parse(s: &str) -> Result<Self, uuid::Error> {
        Ok(Self(Uuid::parse_str(s)?))
    }

    /// Returns the inner UUID value.
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for MessageId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for MessageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Millisecond-precision UTC timestamp.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Timestamp(i64);

impl Timestamp {
    /// Creates a timestamp for the current instant.
    #[must_use]
    pub fn now() -> Self {
        let millis = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis();
        Self(i64::try_from(millis).unwrap_or(i64::MAX))
    }

    /// Creates a timestamp from milliseconds since the UNIX epoch.
    #[must_use]
    pub const fn from_millis(millis: i64) -> Self {
        Self(millis)
    }

    /// Returns the timestamp as milliseconds since the UNIX epoch.
    #[must_use]
    pub const fn as_millis(&self) -> i64 {
        self.0
    }
}

impl std::fmt::Display for Timestamp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}ms", self.0)
    }
}

/// A fully resolved chat message as stored and delivered.
///
/// Immutable once created except for the `read` flag. Display names are
/// joined in by the store at read time, never lazily populated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Unique identifier, assigned at creation.
    pub id: MessageId,
    /// Identity of the sender.
    pub sender_id: UserId,
    /// Identity of the recipient.
    pub recipient_id: UserId,
    /// Display name of the sender (falls back to the raw id if unknown).
    pub sender_name: String,
    /// Display name of the recipient (falls back to the raw id if unknown).
    pub recipient_name: String,
    /// Message text, non-empty and whitespace-trimmed.
    pub content: String,
    /// Creation time; defines the total order for history queries.
    pub created_at: Timestamp,
    /// Whether the recipient has read the message.
    pub read: bool,
}
