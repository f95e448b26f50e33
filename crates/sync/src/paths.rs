//! Central path resolution for local Nino data.
//!
//! Resolved once at startup from: CLI `--data-dir` > `NINO_DATA_DIR` env > `~/.nino`.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

static DATA_DIR: RwLock<Option<PathBuf>> = RwLock::new(None);

/// Resolve a data directory without touching the global.
///
/// Priority: `explicit` arg > `NINO_DATA_DIR` env > `~/.nino` default.
pub fn resolve_data_dir(explicit: Option<&Path>) -> PathBuf {
    if let Some(p) = explicit {
        return p.to_path_buf();
    }
    if let Ok(env_val) = std::env::var("NINO_DATA_DIR") {
        if !env_val.trim().is_empty() {
            return PathBuf::from(env_val);
        }
    }
    dirs::home_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join(".nino")
}

/// Initialize the global data directory. Returns the resolved path.
pub fn init_data_dir(explicit: Option<&Path>) -> PathBuf {
    let dir = resolve_data_dir(explicit);
    let mut guard = DATA_DIR.write().unwrap_or_else(|e| e.into_inner());
    *guard = Some(dir.clone());
    dir
}

/// Return the current data directory, resolving defaults if `init_data_dir`
/// hasn't been called.
pub fn data_dir() -> PathBuf {
    let current = DATA_DIR.read().unwrap_or_else(|e| e.into_inner()).clone();
    current.unwrap_or_else(|| resolve_data_dir(None))
}

pub fn backup_db_path() -> PathBuf {
    data_dir().join("backup.db")
}

pub fn log_dir() -> PathBuf {
    data_dir().join("logs")
}

pub fn token_file_path() -> PathBuf {
    data_dir().join("auth-token")
}

/// Create all required subdirectories under the data dir.
pub fn ensure_dirs() -> io::Result<()> {
    let base = data_dir();
    std::fs::create_dir_all(&base)?;
    std::fs::create_dir_all(base.join("logs"))?;
    Ok(())
}
