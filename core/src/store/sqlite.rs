//! SQLite persistence layer for local saves and the file-backed remote.

use super::LocalStore;
use crate::error::SaveResult;
use rusqlite::{params, Connection, OptionalExtension};

pub struct SqliteStore {
    conn: Connection,
    path: Option<String>, // None for :memory:, Some(path) for file
}

impl SqliteStore {
    pub fn open(path: &str) -> SaveResult<Self> {
        let conn = Connection::open(path)?;
        // WAL mode only matters for real files; in-memory ignores it.
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        Ok(Self {
            conn,
            path: Some(path.to_string()),
        })
    }

    /// Open an in-memory database (used in tests).
    pub fn in_memory() -> SaveResult<Self> {
        let conn = Connection::open_in_memory()?;
        Ok(Self { conn, path: None })
    }

    pub fn path(&self) -> Option<&str> {
        self.path.as_deref()
    }

    /// Apply all schema migrations in order. Safe to call on every open.
    pub fn migrate(&self) -> SaveResult<()> {
        self.conn
            .execute_batch(include_str!("../../../migrations/001_local_storage.sql"))?;
        self.conn
            .execute_batch(include_str!("../../../migrations/002_remote_saves.sql"))?;
        Ok(())
    }

    // ── Local storage ──────────────────────────────────────────

    pub fn get_item(&self, key: &str) -> SaveResult<Option<String>> {
        let value = self
            .conn
            .query_row(
                "SELECT value FROM local_storage WHERE key = ?1",
                params![key],
                |row| row.get::<_, String>(0),
            )
            .optional()?;
        Ok(value)
    }

    pub fn set_item(&self, key: &str, value: &str) -> SaveResult<()> {
        self.conn.execute(
            "INSERT INTO local_storage (key, value, updated_at) VALUES (?1, ?2, UNIXEPOCH() * 1000)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
            params![key, value],
        )?;
        Ok(())
    }

    // ── Remote documents ───────────────────────────────────────

    pub fn get_remote(&self, path: &str) -> SaveResult<Option<String>> {
        let payload = self
            .conn
            .query_row(
                "SELECT payload FROM remote_save WHERE path = ?1",
                params![path],
                |row| row.get::<_, String>(0),
            )
            .optional()?;
        Ok(payload)
    }

    pub fn set_remote(&self, path: &str, payload: &str) -> SaveResult<()> {
        self.conn.execute(
            "INSERT INTO remote_save (path, payload, updated_at) VALUES (?1, ?2, UNIXEPOCH() * 1000)
             ON CONFLICT(path) DO UPDATE SET payload = excluded.payload, updated_at = excluded.updated_at",
            params![path, payload],
        )?;
        Ok(())
    }
}

impl LocalStore for SqliteStore {
    fn read(&self, key: &str) -> SaveResult<Option<String>> {
        self.get_item(key)
    }

    fn write(&mut self, key: &str, value: &str) -> SaveResult<()> {
        self.set_item(key, value)
    }
}
