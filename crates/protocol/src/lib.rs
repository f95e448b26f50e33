//! Nino Protocol
//!
//! Shared session data model for the Nino sync core, plus the JSON bodies
//! exchanged with the remote session store.

use uuid::Uuid;

// Re-exports
pub mod client;
pub mod server;
pub mod types;

pub use client::*;
pub use server::*;
pub use types::*;

/// Generate a new unique ID
pub fn new_id() -> String {
    Uuid::new_v4().to_string()
}

/// Generate an ID for a record that only exists in local memory.
///
/// Store-assigned IDs never carry the [`LOCAL_ID_PREFIX`].
pub fn new_local_id() -> String {
    format!("{LOCAL_ID_PREFIX}{}", Uuid::new_v4())
}
