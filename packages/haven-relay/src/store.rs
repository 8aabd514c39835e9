//! Chat message persistence.
//!
//! Two layers:
//!
//! - [`MessageBackend`] stores rows exactly as given. Its `text` column only
//!   ever holds `<hex iv>:<hex ciphertext>`.
//! - [`ChatStore`] is the transparent codec on top: it encrypts on every write
//!   path and decrypts on every read path, so the relay never touches
//!   ciphertext and the backend never touches plaintext.
//!
//! [`SqliteBackend`] is the production backend (in-memory for tests).

use std::sync::Arc;

use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use thiserror::Error;
use uuid::Uuid;

use crate::cipher::TextCipher;
use crate::protocol::ChatMessage;

/// Current schema version.
const SCHEMA_VERSION: i32 = 1;

const CREATE_TABLES: &str = r#"
CREATE TABLE IF NOT EXISTS schema_version (
    version INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS messages (
    id         TEXT PRIMARY KEY,
    sender     TEXT NOT NULL,
    recipient  TEXT NOT NULL,
    text       TEXT NOT NULL,
    timestamp  INTEGER NOT NULL,
    edited     INTEGER NOT NULL DEFAULT 0
);

CREATE INDEX IF NOT EXISTS idx_messages_pair
    ON messages (sender, recipient, timestamp);

CREATE TABLE IF NOT EXISTS message_seen (
    message_id TEXT NOT NULL REFERENCES messages (id) ON DELETE CASCADE,
    user_id    TEXT NOT NULL,
    seen_at    INTEGER NOT NULL,
    PRIMARY KEY (message_id, user_id)
);
"#;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Storage backend error: {0}")]
    Backend(String),
}

/// A message row as persisted. `text` is ciphertext.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredMessage {
    pub id: String,
    pub from: String,
    pub to: String,
    pub text: String,
    pub timestamp: i64,
    pub edited: bool,
    pub seen_by: Vec<String>,
}

/// Raw row storage for chat messages.
///
/// Implementations are expected to serialize concurrent writes themselves.
pub trait MessageBackend: Send + Sync {
    fn insert(&self, message: &StoredMessage) -> Result<(), StoreError>;

    fn get(&self, id: &str) -> Result<Option<StoredMessage>, StoreError>;

    /// Replace the stored text and mark the row edited.
    /// Returns false if no such row exists.
    fn update_text(&self, id: &str, text: &str) -> Result<bool, StoreError>;

    /// Hard delete. Returns false if no such row exists.
    fn delete(&self, id: &str) -> Result<bool, StoreError>;

    /// Record that `user_id` has seen the message.
    /// Returns true only the first time for a given user.
    fn add_seen(&self, id: &str, user_id: &str, seen_at: i64) -> Result<bool, StoreError>;

    /// Both directions of the conversation between `a` and `b`, oldest first.
    fn conversation(&self, a: &str, b: &str) -> Result<Vec<StoredMessage>, StoreError>;

    fn count(&self) -> Result<usize, StoreError>;
}

// ── SQLite Backend ────────────────────────────────────────────────────────────

/// SQLite-backed message rows.
pub struct SqliteBackend {
    conn: Mutex<Connection>,
}

impl SqliteBackend {
    /// Open or create a database file.
    pub fn open(path: &str) -> Result<Self, StoreError> {
        Self::init(Connection::open(path)?)
    }

    /// In-memory database, used when no path is configured and in tests.
    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self, StoreError> {
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        conn.execute_batch(CREATE_TABLES)?;

        let version: Option<i32> = conn
            .query_row("SELECT version FROM schema_version LIMIT 1", [], |row| {
                row.get(0)
            })
            .optional()?;

        match version {
            None => {
                conn.execute(
                    "INSERT INTO schema_version (version) VALUES (?1)",
                    params![SCHEMA_VERSION],
                )?;
                tracing::info!("Chat schema created (version {})", SCHEMA_VERSION);
            }
            Some(v) => {
                tracing::debug!("Chat schema version: {}", v);
            }
        }

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn seen_by(conn: &Connection, id: &str) -> Result<Vec<String>, StoreError> {
        let mut stmt = conn.prepare_cached(
            "SELECT user_id FROM message_seen WHERE message_id = ?1 ORDER BY seen_at, rowid",
        )?;
        let users = stmt
            .query_map(params![id], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(users)
    }

    fn row_to_message(row: &rusqlite::Row<'_>) -> rusqlite::Result<StoredMessage> {
        Ok(StoredMessage {
            id: row.get(0)?,
            from: row.get(1)?,
            to: row.get(2)?,
            text: row.get(3)?,
            timestamp: row.get(4)?,
            edited: row.get::<_, i64>(5)? != 0,
            seen_by: Vec::new(),
        })
    }
}

impl MessageBackend for SqliteBackend {
    fn insert(&self, message: &StoredMessage) -> Result<(), StoreError> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO messages (id, sender, recipient, text, timestamp, edited)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                message.id,
                message.from,
                message.to,
                message.text,
                message.timestamp,
                message.edited,
            ],
        )?;
        Ok(())
    }

    fn get(&self, id: &str) -> Result<Option<StoredMessage>, StoreError> {
        let conn = self.conn.lock();
        let message = conn
            .query_row(
                "SELECT id, sender, recipient, text, timestamp, edited
                 FROM messages WHERE id = ?1",
                params![id],
                Self::row_to_message,
            )
            .optional()?;

        match message {
            Some(mut message) => {
                message.seen_by = Self::seen_by(&conn, id)?;
                Ok(Some(message))
            }
            None => Ok(None),
        }
    }

    fn update_text(&self, id: &str, text: &str) -> Result<bool, StoreError> {
        let conn = self.conn.lock();
        let changed = conn.execute(
            "UPDATE messages SET text = ?1, edited = 1 WHERE id = ?2",
            params![text, id],
        )?;
        Ok(changed > 0)
    }

    fn delete(&self, id: &str) -> Result<bool, StoreError> {
        let conn = self.conn.lock();
        let changed = conn.execute("DELETE FROM messages WHERE id = ?1", params![id])?;
        Ok(changed > 0)
    }

    fn add_seen(&self, id: &str, user_id: &str, seen_at: i64) -> Result<bool, StoreError> {
        let conn = self.conn.lock();
        let changed = conn.execute(
            "INSERT OR IGNORE INTO message_seen (message_id, user_id, seen_at)
             VALUES (?1, ?2, ?3)",
            params![id, user_id, seen_at],
        )?;
        Ok(changed > 0)
    }

    fn conversation(&self, a: &str, b: &str) -> Result<Vec<StoredMessage>, StoreError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare_cached(
            "SELECT id, sender, recipient, text, timestamp, edited
             FROM messages
             WHERE (sender = ?1 AND recipient = ?2) OR (sender = ?2 AND recipient = ?1)
             ORDER BY timestamp, rowid",
        )?;
        let mut messages = stmt
            .query_map(params![a, b], Self::row_to_message)?
            .collect::<Result<Vec<_>, _>>()?;
        drop(stmt);

        for message in &mut messages {
            message.seen_by = Self::seen_by(&conn, &message.id)?;
        }
        Ok(messages)
    }

    fn count(&self) -> Result<usize, StoreError> {
        let conn = self.conn.lock();
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM messages", [], |row| row.get(0))?;
        Ok(count as usize)
    }
}

// ── Ciphered Store ────────────────────────────────────────────────────────────

/// Chat store with transparent text encryption.
#[derive(Clone)]
pub struct ChatStore {
    backend: Arc<dyn MessageBackend>,
    cipher: Arc<TextCipher>,
}

impl ChatStore {
    pub fn new(backend: Arc<dyn MessageBackend>, cipher: TextCipher) -> Self {
        Self {
            backend,
            cipher: Arc::new(cipher),
        }
    }

    fn open(&self, stored: StoredMessage) -> ChatMessage {
        ChatMessage {
            text: self.cipher.decrypt(&stored.text),
            id: stored.id,
            from: stored.from,
            to: stored.to,
            timestamp: stored.timestamp,
            edited: stored.edited,
            seen_by: stored.seen_by,
        }
    }

    /// Persist a new message and return it as clients see it.
    pub fn create(
        &self,
        from: &str,
        to: &str,
        text: &str,
        timestamp: i64,
    ) -> Result<ChatMessage, StoreError> {
        let stored = StoredMessage {
            id: Uuid::new_v4().to_string(),
            from: from.to_string(),
            to: to.to_string(),
            text: self.cipher.encrypt(text),
            timestamp,
            edited: false,
            seen_by: Vec::new(),
        };
        self.backend.insert(&stored)?;

        Ok(ChatMessage {
            id: stored.id,
            from: stored.from,
            to: stored.to,
            text: text.to_string(),
            timestamp,
            edited: false,
            seen_by: stored.seen_by,
        })
    }

    pub fn get(&self, id: &str) -> Result<Option<ChatMessage>, StoreError> {
        Ok(self.backend.get(id)?.map(|stored| self.open(stored)))
    }

    /// Re-encrypt and replace a message's text. Returns the updated message,
    /// or None if it no longer exists.
    pub fn edit(&self, id: &str, text: &str) -> Result<Option<ChatMessage>, StoreError> {
        if !self.backend.update_text(id, &self.cipher.encrypt(text))? {
            return Ok(None);
        }
        self.get(id)
    }

    pub fn delete(&self, id: &str) -> Result<bool, StoreError> {
        self.backend.delete(id)
    }

    /// Returns true only when `user_id` was not already in `seenBy`.
    pub fn mark_seen(&self, id: &str, user_id: &str, seen_at: i64) -> Result<bool, StoreError> {
        self.backend.add_seen(id, user_id, seen_at)
    }

    pub fn conversation(&self, a: &str, b: &str) -> Result<Vec<ChatMessage>, StoreError> {
        Ok(self
            .backend
            .conversation(a, b)?
            .into_iter()
            .map(|stored| self.open(stored))
            .collect())
    }

    pub fn message_count(&self) -> Result<usize, StoreError> {
        self.backend.count()
    }
}
