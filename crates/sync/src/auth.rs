//! Bearer credentials for the remote store.
//!
//! Sign-in itself is handled elsewhere; the sync core only asks for the
//! current token right before each request.

use std::path::PathBuf;
use std::sync::RwLock;

/// Source of the bearer token attached to every store request.
pub trait TokenProvider: Send + Sync {
    /// The current access token, or `None` when nobody is signed in.
    fn bearer_token(&self) -> Option<String>;
}

/// Token held in memory, replaceable on sign-in/sign-out.
#[derive(Default)]
pub struct StaticToken {
    token: RwLock<Option<String>>,
}

impl StaticToken {
    pub fn new(token: Option<String>) -> Self {
        Self {
            token: RwLock::new(token),
        }
    }

    pub fn set(&self, token: Option<String>) {
        *self.token.write().unwrap_or_else(|e| e.into_inner()) = token;
    }
}

impl TokenProvider for StaticToken {
    fn bearer_token(&self) -> Option<String> {
        self.token
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
            .filter(|t| !t.is_empty())
    }
}

/// Token read from a file on every call, so an external sign-in flow can
/// refresh it without restarting the process.
pub struct TokenFile {
    path: PathBuf,
}

impl TokenFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl TokenProvider for TokenFile {
    fn bearer_token(&self) -> Option<String> {
        let raw = std::fs::read_to_string(&self.path).ok()?;
        let token = raw.trim();
        if token.is_empty() {
            None
        } else {
            Some(token.to_string())
        }
    }
}
