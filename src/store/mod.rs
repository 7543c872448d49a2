// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! Flat key-value store for persisted client state
//!
//! Every value is a JSON blob under a fixed key. Writes replace the previous
//! value; there is no versioning or migration.

use rusqlite::{params, Connection, OptionalExtension};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fmt;
use std::path::Path;
use std::sync::{Arc, Mutex};

use crate::{MedscanError, Result};

/// Keys the client persists
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StorageKey {
    IsLoggedIn,
    UserToken,
    User,
    Theme,
    HighContrast,
    MedicalInfo,
    Reports,
    Profiles,
    CurrentProfile,
}

impl StorageKey {
    pub const ALL: [StorageKey; 9] = [
        Self::IsLoggedIn,
        Self::UserToken,
        Self::User,
        Self::Theme,
        Self::HighContrast,
        Self::MedicalInfo,
        Self::Reports,
        Self::Profiles,
        Self::CurrentProfile,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::IsLoggedIn => "isLoggedIn",
            Self::UserToken => "userToken",
            Self::User => "user",
            Self::Theme => "theme",
            Self::HighContrast => "highContrast",
            Self::MedicalInfo => "medicalInfo",
            Self::Reports => "reports",
            Self::Profiles => "profiles",
            Self::CurrentProfile => "currentProfile",
        }
    }

    /// Keys that make up a login session
    pub fn session_keys() -> [StorageKey; 4] {
        [Self::IsLoggedIn, Self::UserToken, Self::User, Self::Reports]
    }
}

impl fmt::Display for StorageKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Key-value store (thread-safe wrapper around one SQLite table)
#[derive(Clone)]
pub struct KvStore {
    conn: Arc<Mutex<Connection>>,
}

impl KvStore {
    /// Open or create the store
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let conn = Connection::open(path)?;
        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        store.initialize()?;
        Ok(store)
    }

    /// Open an in-memory store (for testing)
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        store.initialize()?;
        Ok(store)
    }

    fn lock_conn(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| MedscanError::Config("Store lock poisoned".to_string()))
    }

    fn initialize(&self) -> Result<()> {
        let conn = self.lock_conn()?;
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS kv (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            );
        "#,
        )?;
        Ok(())
    }

    /// Raw JSON text stored under `key`
    pub fn get_raw(&self, key: StorageKey) -> Result<Option<String>> {
        let conn = self.lock_conn()?;
        let value = conn
            .query_row("SELECT value FROM kv WHERE key = ?1", params![key.as_str()], |row| row.get(0))
            .optional()?;
        Ok(value)
    }

    /// Decode the blob under `key`
    ///
    /// A blob that no longer matches `T` is an error; callers that prefer to
    /// carry on decide that themselves.
    pub fn get<T: DeserializeOwned>(&self, key: StorageKey) -> Result<Option<T>> {
        match self.get_raw(key)? {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    /// Store `value` under `key`, replacing whatever was there
    pub fn set<T: Serialize + ?Sized>(&self, key: StorageKey, value: &T) -> Result<()> {
        let json = serde_json::to_string(value)?;
        let conn = self.lock_conn()?;
        conn.execute(
            "INSERT OR REPLACE INTO kv (key, value) VALUES (?1, ?2)",
            params![key.as_str(), json],
        )?;
        Ok(())
    }

    pub fn remove(&self, key: StorageKey) -> Result<()> {
        let conn = self.lock_conn()?;
        conn.execute("DELETE FROM kv WHERE key = ?1", params![key.as_str()])?;
        Ok(())
    }

    /// Every stored key with its raw JSON, in key order
    pub fn entries(&self) -> Result<Vec<(String, String)>> {
        let conn = self.lock_conn()?;
        let mut stmt = conn.prepare("SELECT key, value FROM kv ORDER BY key")?;
        let rows = stmt
            .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    /// Wipe everything
    pub fn clear(&self) -> Result<()> {
        let conn = self.lock_conn()?;
        conn.execute("DELETE FROM kv", [])?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{MedicalInfo, Theme};

    #[test]
    fn test_set_get_overwrite() {
        let store = KvStore::in_memory().unwrap();
        store.set(StorageKey::Theme, &Theme::Dark).unwrap();
        store.set(StorageKey::Theme, &Theme::Light).unwrap();

        let theme: Option<Theme> = store.get(StorageKey::Theme).unwrap();
        assert_eq!(theme, Some(Theme::Light));
        assert_eq!(store.get_raw(StorageKey::Theme).unwrap().as_deref(), Some("\"light\""));
    }

    #[test]
    fn test_missing_key_is_none() {
        let store = KvStore::in_memory().unwrap();
        let info: Option<MedicalInfo> = store.get(StorageKey::MedicalInfo).unwrap();
        assert!(info.is_none());
    }

    #[test]
    fn test_remove_and_clear() {
        let store = KvStore::in_memory().unwrap();
        store.set(StorageKey::IsLoggedIn, &true).unwrap();
        store.set(StorageKey::UserToken, "tok").unwrap();

        store.remove(StorageKey::IsLoggedIn).unwrap();
        assert!(store.get_raw(StorageKey::IsLoggedIn).unwrap().is_none());
        assert_eq!(store.entries().unwrap().len(), 1);

        store.clear().unwrap();
        assert!(store.entries().unwrap().is_empty());
    }

    #[test]
    fn test_mismatched_blob_is_error() {
        let store = KvStore::in_memory().unwrap();
        store.set(StorageKey::HighContrast, "yes please").unwrap();
        let parsed: Result<Option<bool>> = store.get(StorageKey::HighContrast);
        assert!(matches!(parsed, Err(MedscanError::Json(_))));
    }

    #[test]
    fn test_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("medscan.db");
        {
            let store = KvStore::open(&path).unwrap();
            store.set(StorageKey::UserToken, "abc").unwrap();
        }
        let store = KvStore::open(&path).unwrap();
        let token: Option<String> = store.get(StorageKey::UserToken).unwrap();
        assert_eq!(token.as_deref(), Some("abc"));
    }
}
