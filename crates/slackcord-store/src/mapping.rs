//! SQLite-backed mapping tables
//!
//! Four relations: message<->message, thread<->thread, channel<->channel and
//! file->message. Inserts are idempotent (`INSERT OR IGNORE` against the
//! uniqueness constraints) and report whether the row was actually new, so
//! callers can tell "I created this" apart from "someone beat me to it".
//! Rows are never updated or deleted by normal operation; a deletion on the
//! Discord side does not remove the mapping row, since "it existed" must stay
//! knowable for idempotent retries and debugging.

use rusqlite::{params, Connection, OptionalExtension};
use serde::Serialize;
use std::path::Path;
use std::sync::{Arc, Mutex};
use tracing::{debug, info};

/// Sentinel thread id used for messages that are not part of a thread.
pub const MAIN_THREAD: &str = "Main";

/// Errors surfaced by the mapping store
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("store mutex poisoned")]
    Poisoned,
}

type Result<T> = std::result::Result<T, StoreError>;

/// Outcome of an idempotent insert
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    /// The row was new and has been written
    Inserted,
    /// An identical or conflicting row already existed; nothing was written
    AlreadyExists,
}

impl InsertOutcome {
    pub fn is_new(self) -> bool {
        matches!(self, InsertOutcome::Inserted)
    }
}

/// One row of the message mapping table.
///
/// A single Slack message may map to several Discord messages (one text
/// carrier plus one message per attachment/link-preview card). Exactly one
/// row per Slack message carries `purely_text = true`; that row is the target
/// of all future edits.
#[derive(Debug, Clone, Serialize)]
pub struct MessageMapping {
    pub slack_message_id: String,
    pub discord_message_id: String,
    pub slack_thread_id: String,
    pub discord_thread_id: String,
    pub slack_channel_id: String,
    pub discord_channel_id: String,
    pub purely_text: bool,
}

impl MessageMapping {
    /// The Discord channel the mapped message actually lives in: the thread
    /// if there is one, otherwise the parent channel.
    pub fn destination_parent(&self) -> &str {
        if self.discord_thread_id != MAIN_THREAD {
            &self.discord_thread_id
        } else {
            &self.discord_channel_id
        }
    }

    pub fn in_thread(&self) -> bool {
        self.discord_thread_id != MAIN_THREAD
    }
}

/// Row counts per table, for the `status` diagnostic.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct StoreStats {
    pub messages: u64,
    pub threads: u64,
    pub channels: u64,
    pub files: u64,
}

/// SQLite mapping store (thread-safe via Arc<Mutex>)
pub struct MappingStore {
    conn: Arc<Mutex<Connection>>,
}

impl MappingStore {
    /// Open (or create) the store at the given path and initialize the schema.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let conn = Connection::open(path.as_ref())?;
        info!("Opening mapping store at {:?}", path.as_ref());
        Self::from_connection(conn)
    }

    /// In-memory store, used by tests.
    pub fn open_in_memory() -> Result<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        conn.execute(
            "CREATE TABLE IF NOT EXISTS message_map (
                slack_message_id TEXT NOT NULL,
                discord_message_id TEXT NOT NULL UNIQUE,
                slack_thread_id TEXT NOT NULL DEFAULT 'Main',
                discord_thread_id TEXT NOT NULL DEFAULT 'Main',
                slack_channel_id TEXT NOT NULL,
                discord_channel_id TEXT NOT NULL,
                purely_text INTEGER NOT NULL DEFAULT 0
            )",
            [],
        )?;
        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_message_map_slack
             ON message_map(slack_message_id)",
            [],
        )?;
        conn.execute(
            "CREATE TABLE IF NOT EXISTS channel_map (
                slack_channel_id TEXT PRIMARY KEY,
                discord_channel_id TEXT NOT NULL UNIQUE
            )",
            [],
        )?;
        conn.execute(
            "CREATE TABLE IF NOT EXISTS thread_map (
                slack_thread_id TEXT PRIMARY KEY,
                discord_thread_id TEXT NOT NULL UNIQUE
            )",
            [],
        )?;
        conn.execute(
            "CREATE TABLE IF NOT EXISTS file_map (
                slack_file_id TEXT NOT NULL,
                discord_message_id TEXT NOT NULL UNIQUE
            )",
            [],
        )?;
        debug!("Mapping store schema ready");

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| StoreError::Poisoned)
    }

    /// Record a message mapping. Safe to call twice with the same pair: the
    /// second call is a no-op reported as `AlreadyExists`, not an error.
    #[allow(clippy::too_many_arguments)]
    pub fn record_message_mapping(
        &self,
        slack_message_id: &str,
        discord_message_id: &str,
        slack_thread_id: &str,
        discord_thread_id: &str,
        slack_channel_id: &str,
        discord_channel_id: &str,
        purely_text: bool,
    ) -> Result<InsertOutcome> {
        let conn = self.lock()?;
        let changed = conn.execute(
            "INSERT OR IGNORE INTO message_map
             (slack_message_id, discord_message_id, slack_thread_id,
              discord_thread_id, slack_channel_id, discord_channel_id, purely_text)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                slack_message_id,
                discord_message_id,
                slack_thread_id,
                discord_thread_id,
                slack_channel_id,
                discord_channel_id,
                purely_text as i32,
            ],
        )?;

        if changed > 0 {
            debug!(
                "Mapped Slack {} to Discord {}",
                slack_message_id, discord_message_id
            );
            Ok(InsertOutcome::Inserted)
        } else {
            Ok(InsertOutcome::AlreadyExists)
        }
    }

    /// Record a channel mapping, idempotently.
    pub fn record_channel_mapping(
        &self,
        slack_channel_id: &str,
        discord_channel_id: &str,
    ) -> Result<InsertOutcome> {
        let conn = self.lock()?;
        let changed = conn.execute(
            "INSERT OR IGNORE INTO channel_map (slack_channel_id, discord_channel_id)
             VALUES (?1, ?2)",
            params![slack_channel_id, discord_channel_id],
        )?;
        Ok(if changed > 0 {
            InsertOutcome::Inserted
        } else {
            InsertOutcome::AlreadyExists
        })
    }

    /// Record a thread mapping, idempotently.
    pub fn record_thread_mapping(
        &self,
        slack_thread_id: &str,
        discord_thread_id: &str,
    ) -> Result<InsertOutcome> {
        let conn = self.lock()?;
        let changed = conn.execute(
            "INSERT OR IGNORE INTO thread_map (slack_thread_id, discord_thread_id)
             VALUES (?1, ?2)",
            params![slack_thread_id, discord_thread_id],
        )?;
        Ok(if changed > 0 {
            InsertOutcome::Inserted
        } else {
            InsertOutcome::AlreadyExists
        })
    }

    /// Record which Discord message carries a given Slack file.
    pub fn record_file_mapping(
        &self,
        slack_file_id: &str,
        discord_message_id: &str,
    ) -> Result<InsertOutcome> {
        let conn = self.lock()?;
        let changed = conn.execute(
            "INSERT OR IGNORE INTO file_map (slack_file_id, discord_message_id)
             VALUES (?1, ?2)",
            params![slack_file_id, discord_message_id],
        )?;
        Ok(if changed > 0 {
            InsertOutcome::Inserted
        } else {
            InsertOutcome::AlreadyExists
        })
    }

    /// All mappings for a Slack message, in insertion order. An empty list is
    /// a normal outcome (the message was never mirrored), not an error.
    pub fn find_message_mappings(&self, slack_message_id: &str) -> Result<Vec<MessageMapping>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT slack_message_id, discord_message_id, slack_thread_id,
                    discord_thread_id, slack_channel_id, discord_channel_id, purely_text
             FROM message_map WHERE slack_message_id = ?1
             ORDER BY rowid",
        )?;

        let rows = stmt
            .query_map(params![slack_message_id], |row| {
                Ok(MessageMapping {
                    slack_message_id: row.get(0)?,
                    discord_message_id: row.get(1)?,
                    slack_thread_id: row.get(2)?,
                    discord_thread_id: row.get(3)?,
                    slack_channel_id: row.get(4)?,
                    discord_channel_id: row.get(5)?,
                    purely_text: row.get::<_, i32>(6)? != 0,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(rows)
    }

    /// The primary text carrier for a Slack message, if one was mirrored.
    pub fn find_primary_mapping(&self, slack_message_id: &str) -> Result<Option<MessageMapping>> {
        Ok(self
            .find_message_mappings(slack_message_id)?
            .into_iter()
            .find(|m| m.purely_text))
    }

    pub fn find_channel_mapping(&self, slack_channel_id: &str) -> Result<Option<String>> {
        let conn = self.lock()?;
        let id = conn
            .query_row(
                "SELECT discord_channel_id FROM channel_map WHERE slack_channel_id = ?1",
                params![slack_channel_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(id)
    }

    pub fn find_thread_mapping(&self, slack_thread_id: &str) -> Result<Option<String>> {
        let conn = self.lock()?;
        let id = conn
            .query_row(
                "SELECT discord_thread_id FROM thread_map WHERE slack_thread_id = ?1",
                params![slack_thread_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(id)
    }

    pub fn find_file_mapping(&self, slack_file_id: &str) -> Result<Option<String>> {
        let conn = self.lock()?;
        let id = conn
            .query_row(
                "SELECT discord_message_id FROM file_map WHERE slack_file_id = ?1",
                params![slack_file_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(id)
    }

    /// Row counts per table. Surfaced through the CLI `status` view.
    pub fn stats(&self) -> Result<StoreStats> {
        let conn = self.lock()?;
        let count = |table_sql: &str| -> Result<u64> {
            Ok(conn.query_row(table_sql, [], |row| row.get::<_, i64>(0))? as u64)
        };
        Ok(StoreStats {
            messages: count("SELECT COUNT(*) FROM message_map")?,
            threads: count("SELECT COUNT(*) FROM thread_map")?,
            channels: count("SELECT COUNT(*) FROM channel_map")?,
            files: count("SELECT COUNT(*) FROM file_map")?,
        })
    }
}
