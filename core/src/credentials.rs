//! Client-local settings in SQLite.
//!
//! RULE: Only this module talks to the database.
//! The one persisted value is the generative-API credential.

use crate::error::DeskResult;
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};

pub const API_KEY_SETTING: &str = "groq_api_key";

pub struct CredentialStore {
    conn: Connection,
}

impl CredentialStore {
    /// Open (or create) the settings database at `path`.
    pub fn open(path: &str) -> DeskResult<Self> {
        let conn = Connection::open(path)?;
        // WAL only matters for real files; :memory: ignores it.
        let _ = conn.execute_batch("PRAGMA journal_mode=WAL;");
        Ok(Self { conn })
    }

    /// Open an in-memory database (used in tests).
    pub fn in_memory() -> DeskResult<Self> {
        let conn = Connection::open_in_memory()?;
        Ok(Self { conn })
    }

    /// Open and migrate in one step.
    pub fn open_migrated(path: &str) -> DeskResult<Self> {
        let store = if path == ":memory:" { Self::in_memory()? } else { Self::open(path)? };
        store.migrate()?;
        Ok(store)
    }

    /// Apply all schema migrations in order.
    pub fn migrate(&self) -> DeskResult<()> {
        self.conn
            .execute_batch(include_str!("../../migrations/001_settings.sql"))?;
        Ok(())
    }

    // ── Settings ───────────────────────────────────────────────

    pub fn set_setting(&self, key: &str, value: &str) -> DeskResult<()> {
        self.conn.execute(
            "INSERT INTO setting (key, value, updated_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
            params![key, value, Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    pub fn get_setting(&self, key: &str) -> DeskResult<Option<String>> {
        let value = self
            .conn
            .query_row("SELECT value FROM setting WHERE key = ?1", params![key], |row| {
                row.get::<_, String>(0)
            })
            .optional()?;
        Ok(value)
    }

    pub fn delete_setting(&self, key: &str) -> DeskResult<bool> {
        let removed = self
            .conn
            .execute("DELETE FROM setting WHERE key = ?1", params![key])?;
        Ok(removed > 0)
    }

    // ── API key ────────────────────────────────────────────────

    pub fn save_api_key(&self, key: &str) -> DeskResult<()> {
        self.set_setting(API_KEY_SETTING, key.trim())?;
        log::info!("API key saved");
        Ok(())
    }

    /// The saved key, if any. Blank rows count as absent.
    pub fn load_api_key(&self) -> DeskResult<Option<String>> {
        Ok(self
            .get_setting(API_KEY_SETTING)?
            .filter(|k| !k.trim().is_empty()))
    }

    pub fn clear_api_key(&self) -> DeskResult<bool> {
        let removed = self.delete_setting(API_KEY_SETTING)?;
        if removed {
            log::info!("API key cleared");
        }
        Ok(removed)
    }
}
