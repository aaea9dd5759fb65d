//! SQLite-backed storage of chat records, keyed by an auto-incrementing
//! integer id with a secondary index on the chat name.

use crate::chat::ChatRecord;
use chrono::Utc;
use rusqlite::{params, Connection};
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("SQLite: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("IO: {0}")]
    Io(#[from] std::io::Error),
    #[error("corrupt chat record: {0}")]
    Record(#[from] serde_json::Error),
    #[error("invalid chat key: {0}")]
    Key(String),
}

/// A stored chat as returned by [`Storage::read_all`].
#[derive(Debug)]
pub struct StoredChat {
    pub id: String,
    pub record: ChatRecord,
}

pub struct Storage {
    conn: Connection,
}

impl Storage {
    /// Opens (or creates) the database at `path`. Safe to call on an
    /// already-initialized database.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let path = path.as_ref();
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir)?;
        }
        let conn = Connection::open(path)?;
        Self::migrate(&conn)?;
        tracing::debug!(path = %path.display(), "storage open");
        Ok(Self { conn })
    }

    /// Opens the database under the platform-local data directory.
    pub fn open_default() -> Result<Self, StorageError> {
        Self::open(Self::default_path()?)
    }

    /// `{data_local_dir}/palaver/chats.db`, falling back to the home dir.
    pub fn default_path() -> Result<PathBuf, StorageError> {
        let dir = dirs::data_local_dir().or_else(dirs::home_dir).ok_or_else(|| {
            StorageError::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                "no data directory",
            ))
        })?;
        Ok(dir.join("palaver").join("chats.db"))
    }

    /// Ephemeral in-memory database; nothing survives the handle.
    pub fn open_in_memory() -> Result<Self, StorageError> {
        let conn = Connection::open_in_memory()?;
        Self::migrate(&conn)?;
        Ok(Self { conn })
    }

    fn migrate(conn: &Connection) -> Result<(), StorageError> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS chats (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL,
                record TEXT NOT NULL,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_chats_name ON chats(name);
            "#,
        )?;
        Ok(())
    }

    /// Inserts a new record and returns its key. Keys are monotonic and
    /// never reused.
    pub fn create(&mut self, record: &ChatRecord) -> Result<String, StorageError> {
        let json = serde_json::to_string(record)?;
        let now = Utc::now().timestamp();
        let tx = self.conn.transaction()?;
        tx.execute(
            "INSERT INTO chats (name, record, created_at, updated_at) VALUES (?1, ?2, ?3, ?3)",
            params![record.name, json, now],
        )?;
        let id = tx.last_insert_rowid();
        tx.commit()?;
        Ok(id.to_string())
    }

    /// All stored chats in ascending key order.
    pub fn read_all(&self) -> Result<Vec<StoredChat>, StorageError> {
        let mut stmt = self
            .conn
            .prepare("SELECT id, record FROM chats ORDER BY id ASC")?;
        let rows: Vec<(i64, String)> = stmt
            .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
            .collect::<Result<Vec<_>, _>>()?;
        let mut out = Vec::with_capacity(rows.len());
        for (id, json) in rows {
            out.push(StoredChat {
                id: id.to_string(),
                record: serde_json::from_str(&json)?,
            });
        }
        Ok(out)
    }

    /// Full replace of the record stored under `id`.
    pub fn update(&mut self, record: &ChatRecord, id: &str) -> Result<(), StorageError> {
        let key = parse_key(id)?;
        let json = serde_json::to_string(record)?;
        let now = Utc::now().timestamp();
        let tx = self.conn.transaction()?;
        tx.execute(
            "UPDATE chats SET name = ?1, record = ?2, updated_at = ?3 WHERE id = ?4",
            params![record.name, json, now, key],
        )?;
        tx.commit()?;
        Ok(())
    }

    pub fn delete(&mut self, id: &str) -> Result<(), StorageError> {
        let key = parse_key(id)?;
        let tx = self.conn.transaction()?;
        tx.execute("DELETE FROM chats WHERE id = ?1", params![key])?;
        tx.commit()?;
        Ok(())
    }
}

fn parse_key(id: &str) -> Result<i64, StorageError> {
    id.parse().map_err(|_| StorageError::Key(id.to_string()))
}
