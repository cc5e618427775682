//! Durable message storage over SQLite.
//!
//! Messages between two identities are persisted ordered by creation time
//! (ties broken by the time-ordered message id). The store also keeps an
//! id → username table filled at handshake, so reads can perform an explicit
//! join and hand back fully resolved [`ChatMessage`] value objects instead of
//! bare foreign keys.
//!
//! The connection is guarded by a [`parking_lot::Mutex`]; critical sections
//! are short and never held across an await point.

use parking_lot::Mutex;
use rusqlite::{Connection, OptionalExtension, params, types::Type};

use neochat_proto::message::{ChatMessage, MAX_CONTENT_SIZE, MessageId, Timestamp, UserId};

/// Errors produced by message store operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// No message with the given id exists.
    #[error("message not found")]
    NotFound,
    /// The requester is not the sender of the message.
    #[error("you can only delete your own messages")]
    Forbidden,
    /// Input failed validation before any mutation.
    #[error("{0}")]
    InvalidInput(String),
    /// The storage engine failed.
    #[error("storage error: {0}")]
    Backend(#[from] rusqlite::Error),
}

/// SQLite-backed store for messages and display names.
pub struct MessageStore {
    conn: Mutex<Connection>,
}

impl MessageStore {
    /// Opens (or creates) the database at the given path.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Backend`] if the database cannot be opened or
    /// the schema cannot be created.
    pub fn open(path: &str) -> Result<Self, StoreError> {
        Self::from_connection(Connection::open(path)?)
    }

    /// Opens an in-memory database, used by tests.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Backend`] if the schema cannot be created.
    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self, StoreError> {
        conn.execute(
            "CREATE TABLE IF NOT EXISTS users (
                id TEXT PRIMARY KEY,
                username TEXT NOT NULL
            )",
            [],
        )?;
        conn.execute(
            "CREATE TABLE IF NOT EXISTS messages (
                id TEXT PRIMARY KEY,
                sender TEXT NOT NULL,
                recipient TEXT NOT NULL,
                content TEXT NOT NULL,
                created_at INTEGER NOT NULL,
                read INTEGER NOT NULL DEFAULT 0
            )",
            [],
        )?;
        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_messages_pair
             ON messages(sender, recipient, created_at)",
            [],
        )?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Records an identity's display name for read-side resolution.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Backend`] on storage failure.
    pub fn upsert_user(&self, id: &UserId, username: &str) -> Result<(), StoreError> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO users (id, username) VALUES (?1, ?2)
             ON CONFLICT(id) DO UPDATE SET username = excluded.username",
            params![id.as_str(), username],
        )?;
        Ok(())
    }

    /// Persists a new message, assigning its id and creation timestamp.
    ///
    /// Content is whitespace-trimmed before validation and storage.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::InvalidInput`] if the trimmed content is empty
    /// or exceeds [`MAX_CONTENT_SIZE`] bytes, or either identity reference
    /// is empty, [`StoreError::Backend`] on storage failure. No row is
    /// written on any error.
    pub fn insert(
        &self,
        sender: &UserId,
        recipient: &UserId,
        content: &str,
    ) -> Result<ChatMessage, StoreError> {
        let content = content.trim();
        if content.is_empty() {
            return Err(StoreError::InvalidInput(
                "message content is empty".to_string(),
            ));
        }
        if content.len() > MAX_CONTENT_SIZE {
            return Err(StoreError::InvalidInput(format!(
                "message content exceeds {MAX_CONTENT_SIZE} bytes"
            )));
        }
        if sender.is_empty() || recipient.is_empty() {
            return Err(StoreError::InvalidInput(
                "sender and recipient are required".to_string(),
            ));
        }

        let id = MessageId::new();
        let created_at = Timestamp::now();

        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO messages (id, sender, recipient, content, created_at, read)
             VALUES (?1, ?2, ?3, ?4, ?5, 0)",
            params![
                id.to_string(),
                sender.as_str(),
                recipient.as_str(),
                content,
                created_at.as_millis(),
            ],
        )?;

        Ok(ChatMessage {
            id,
            sender_id: sender.clone(),
            recipient_id: recipient.clone(),
            sender_name: resolve_name(&conn, sender)?,
            recipient_name: resolve_name(&conn, recipient)?,
            content: content.to_string(),
            created_at,
            read: false,
        })
    }

    /// Returns every message between the two identities, in either direction,
    /// ascending by creation time with ties broken by id.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Backend`] on storage failure.
    pub fn conversation(&self, a: &UserId, b: &UserId) -> Result<Vec<ChatMessage>, StoreError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT m.id, m.sender, m.recipient, m.content, m.created_at, m.read,
                    COALESCE(su.username, m.sender),
                    COALESCE(ru.username, m.recipient)
             FROM messages m
             LEFT JOIN users su ON su.id = m.sender
             LEFT JOIN users ru ON ru.id = m.recipient
             WHERE (m.sender = ?1 AND m.recipient = ?2)
                OR (m.sender = ?2 AND m.recipient = ?1)
             ORDER BY m.created_at ASC, m.id ASC",
        )?;
        let messages = stmt
            .query_map(params![a.as_str(), b.as_str()], row_to_message)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(messages)
    }

    /// Deletes a single message, enforcing that only its sender may do so.
    ///
    /// Returns the deleted message so the caller can notify both
    /// participants.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] if no message has that id,
    /// [`StoreError::Forbidden`] if the requester is not the sender, and
    /// [`StoreError::Backend`] on storage failure.
    pub fn delete_by_id(
        &self,
        id: &MessageId,
        requester: &UserId,
    ) -> Result<ChatMessage, StoreError> {
        let conn = self.conn.lock();
        let message = conn
            .query_row(
                "SELECT m.id, m.sender, m.recipient, m.content, m.created_at, m.read,
                        COALESCE(su.username, m.sender),
                        COALESCE(ru.username, m.recipient)
                 FROM messages m
                 LEFT JOIN users su ON su.id = m.sender
                 LEFT JOIN users ru ON ru.id = m.recipient
                 WHERE m.id = ?1",
                params![id.to_string()],
                row_to_message,
            )
            .optional()?
            .ok_or(StoreError::NotFound)?;

        if &message.sender_id != requester {
            return Err(StoreError::Forbidden);
        }

        conn.execute("DELETE FROM messages WHERE id = ?1", params![id.to_string()])?;
        Ok(message)
    }

    /// Deletes every message between the two identities, in either
    /// direction and regardless of sender, returning the deleted ids in
    /// creation order. An empty conversation yields an empty list, not an
    /// error.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Backend`] on storage failure.
    pub fn delete_conversation(
        &self,
        a: &UserId,
        b: &UserId,
    ) -> Result<Vec<MessageId>, StoreError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT id FROM messages
             WHERE (sender = ?1 AND recipient = ?2)
                OR (sender = ?2 AND recipient = ?1)
             ORDER BY created_at ASC, id ASC",
        )?;
        let ids = stmt
            .query_map(params![a.as_str(), b.as_str()], |row| {
                parse_message_id(row.get::<_, String>(0)?.as_str(), 0)
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        conn.execute(
            "DELETE FROM messages
             WHERE (sender = ?1 AND recipient = ?2)
                OR (sender = ?2 AND recipient = ?1)",
            params![a.as_str(), b.as_str()],
        )?;
        Ok(ids)
    }

    /// Flips the read flag, the one permitted mutation after creation.
    ///
    /// Returns `true` if a message was updated.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Backend`] on storage failure.
    pub fn mark_read(&self, id: &MessageId) -> Result<bool, StoreError> {
        let conn = self.conn.lock();
        let changed = conn.execute(
            "UPDATE messages SET read = 1 WHERE id = ?1",
            params![id.to_string()],
        )?;
        Ok(changed > 0)
    }
}

/// Looks up an identity's display name, falling back to the raw id when the
/// identity never connected.
fn resolve_name(conn: &Connection, user: &UserId) -> Result<String, StoreError> {
    let name = conn
        .query_row(
            "SELECT username FROM users WHERE id = ?1",
            params![user.as_str()],
            |row| row.get::<_, String>(0),
        )
        .optional()?;
    Ok(name.unwrap_or_else(|| user.as_str().to_string()))
}

/// Maps a joined message row to the resolved value object.
fn row_to_message(row: &rusqlite::Row<'_>) -> rusqlite::Result<ChatMessage> {
    Ok(ChatMessage {
        id: parse_message_id(row.get::<_, String>(0)?.as_str(), 0)?,
        sender_id: UserId::new(row.get::<_, String>(1)?),
        recipient_id: UserId::new(row.get::<_, String>(2)?),
        content: row.get(3)?,
        created_at: Timestamp::from_millis(row.get(4)?),
        read: row.get::<_, i64>(5)? != 0,
        sender_name: row.get(6)?,
        recipient_name: row.get(7)?,
    })
}

/// Parses a stored id column back into a [`MessageId`].
fn parse_message_id(s: &str, column: usize) -> rusqlite::Result<MessageId> {
    MessageId::parse(s)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(column, Type::Text, Box::new(e)))
}
