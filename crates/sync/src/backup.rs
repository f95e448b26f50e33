//! Best-effort per-session snapshots of unsent creative input, written
//! when a page is hidden or unloaded.
//!
//! Records older than [`backup_max_age`] are never applied. Every operation
//! swallows storage failures; this is a safety net, not durable storage.

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Duration, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use nino_protocol::UploadedImage;

use crate::error::{SyncError, SyncResult};

/// Records at or beyond this age are stale.
pub const BACKUP_MAX_AGE_SECS: i64 = 60 * 60;

pub fn backup_max_age() -> Duration {
    Duration::seconds(BACKUP_MAX_AGE_SECS)
}

const KEY_PREFIX: &str = "nino_backup_";

/// Storage key for a session's backup record.
pub fn backup_key(session_id: &str) -> String {
    format!("{KEY_PREFIX}{session_id}")
}

/// Synchronous string key-value storage backing the emergency backup.
pub trait BackupStorage: Send + Sync {
    fn get(&self, key: &str) -> SyncResult<Option<String>>;
    fn set(&self, key: &str, value: &str) -> SyncResult<()>;
    fn remove(&self, key: &str) -> SyncResult<()>;
}

/// SQLite-backed storage, one row per key.
pub struct SqliteBackupStorage {
    conn: Mutex<Connection>,
}

impl SqliteBackupStorage {
    pub fn open(path: &Path) -> SyncResult<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA busy_timeout = 5000;
             PRAGMA synchronous = NORMAL;",
        )?;
        Self::from_connection(conn)
    }

    pub fn in_memory() -> SyncResult<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> SyncResult<Self> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS emergency_backups (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL,
                written_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now'))
            )",
        )?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> std::sync::MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl BackupStorage for SqliteBackupStorage {
    fn get(&self, key: &str) -> SyncResult<Option<String>> {
        let value = self
            .conn()
            .query_row(
                "SELECT value FROM emergency_backups WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()?;
        Ok(value)
    }

    fn set(&self, key: &str, value: &str) -> SyncResult<()> {
        self.conn().execute(
            "INSERT INTO emergency_backups (key, value) VALUES (?1, ?2)
             ON CONFLICT(key) DO UPDATE SET
               value = excluded.value,
               written_at = strftime('%Y-%m-%dT%H:%M:%fZ', 'now')",
            params![key, value],
        )?;
        Ok(())
    }

    fn remove(&self, key: &str) -> SyncResult<()> {
        self.conn()
            .execute("DELETE FROM emergency_backups WHERE key = ?1", params![key])?;
        Ok(())
    }
}

/// Process-local storage, mainly for tests and headless use.
#[derive(Default)]
pub struct MemoryBackupStorage {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryBackupStorage {
    pub fn new() -> Self {
        Self::default()
    }

    fn entries(&self) -> std::sync::MutexGuard<'_, HashMap<String, String>> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl BackupStorage for MemoryBackupStorage {
    fn get(&self, key: &str) -> SyncResult<Option<String>> {
        Ok(self.entries().get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> SyncResult<()> {
        self.entries().insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> SyncResult<()> {
        self.entries().remove(key);
        Ok(())
    }
}

/// The transient page state worth saving.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BackupData {
    #[serde(default)]
    pub uploaded_images: Vec<UploadedImage>,
    #[serde(default)]
    pub generated_image_url: Option<String>,
    #[serde(default)]
    pub generated_video_url: Option<String>,
    #[serde(default)]
    pub prompt: Option<String>,
    /// A generation call was in flight when the snapshot was taken.
    #[serde(default)]
    pub was_generating: bool,
}

impl BackupData {
    pub fn is_empty(&self) -> bool {
        self.uploaded_images.is_empty()
            && self.generated_image_url.is_none()
            && self.generated_video_url.is_none()
            && self.prompt.is_none()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct BackupRecord {
    #[serde(flatten)]
    data: BackupData,
    saved_at: DateTime<Utc>,
}

pub struct EmergencyBackup {
    storage: Arc<dyn BackupStorage>,
}

impl EmergencyBackup {
    pub fn new(storage: Arc<dyn BackupStorage>) -> Self {
        Self { storage }
    }

    /// Write a snapshot stamped with the current time.
    pub fn snapshot(&self, session_id: &str, data: BackupData) {
        self.snapshot_at(session_id, data, Utc::now());
    }

    pub fn snapshot_at(&self, session_id: &str, data: BackupData, now: DateTime<Utc>) {
        let record = BackupRecord {
            data,
            saved_at: now,
        };
        let result = serde_json::to_string(&record)
            .map_err(SyncError::from)
            .and_then(|json| self.storage.set(&backup_key(session_id), &json));

        match result {
            Ok(()) => debug!(
                component = "backup",
                event = "backup.snapshot_written",
                session_id = %session_id,
            ),
            Err(e) => warn!(
                component = "backup",
                event = "backup.snapshot_failed",
                session_id = %session_id,
                error = %e,
            ),
        }
    }

    /// Hand off the session's snapshot, if fresh. The record is removed in
    /// every case, so a second call returns `None`.
    pub fn restore(&self, session_id: &str) -> Option<BackupData> {
        self.restore_at(session_id, Utc::now())
    }

    pub fn restore_at(&self, session_id: &str, now: DateTime<Utc>) -> Option<BackupData> {
        let key = backup_key(session_id);
        let raw = match self.storage.get(&key) {
            Ok(Some(raw)) => raw,
            Ok(None) => return None,
            Err(e) => {
                warn!(
                    component = "backup",
                    event = "backup.read_failed",
                    session_id = %session_id,
                    error = %e,
                );
                return None;
            }
        };

        self.discard(session_id);

        let record: BackupRecord = match serde_json::from_str(&raw) {
            Ok(record) => record,
            Err(e) => {
                warn!(
                    component = "backup",
                    event = "backup.corrupt_discarded",
                    session_id = %session_id,
                    error = %e,
                );
                return None;
            }
        };

        let age = now.signed_duration_since(record.saved_at);
        if age >= backup_max_age() {
            info!(
                component = "backup",
                event = "backup.stale_discarded",
                session_id = %session_id,
                age_ms = age.num_milliseconds(),
            );
            return None;
        }

        info!(
            component = "backup",
            event = "backup.restored",
            session_id = %session_id,
            images = record.data.uploaded_images.len(),
        );
        Some(record.data)
    }

    pub fn discard(&self, session_id: &str) {
        if let Err(e) = self.storage.remove(&backup_key(session_id)) {
            warn!(
                component = "backup",
                event = "backup.discard_failed",
                session_id = %session_id,
                error = %e,
            );
        }
    }
}
