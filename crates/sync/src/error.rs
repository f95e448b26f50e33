//! Errors surfaced by the sync core

use thiserror::Error;

/// Errors that can occur while syncing sessions
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("No bearer credential available")]
    AuthUnavailable,

    #[error("Transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("Store responded {status}: {body}")]
    Server { status: u16, body: String },

    #[error("JSON serialization error: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("Local storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Media error: {0}")]
    Media(String),

    #[error("Registry is not bound to an identity")]
    NotBound,

    #[error("Session title cannot be blank")]
    BlankTitle,

    #[error("Session not found: {0}")]
    SessionNotFound(String),
}

impl SyncError {
    /// True for a 404-class response from the store.
    pub fn is_not_found(&self) -> bool {
        matches!(self, SyncError::Server { status: 404, .. })
            || matches!(self, SyncError::SessionNotFound(_))
    }
}

pub type SyncResult<T> = Result<T, SyncError>;
