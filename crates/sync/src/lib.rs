//! Session state synchronization for Nino.
//!
//! The [`registry::SessionRegistry`] holds every session of the signed-in
//! identity and persists durable changes through [`remote::RemoteSessionClient`].
//! Each workflow page drives an [`binder::ActiveSessionBinder`], which restores
//! and pushes page drafts and falls back to [`backup::EmergencyBackup`].

pub mod auth;
pub mod backup;
pub mod binder;
pub mod config;
pub mod error;
pub mod guard;
pub mod logging;
pub mod media;
pub mod naming;
pub mod paths;
pub mod registry;
pub mod remote;
pub mod store;

pub use auth::{StaticToken, TokenFile, TokenProvider};
pub use backup::{
    BackupData, BackupStorage, EmergencyBackup, MemoryBackupStorage, SqliteBackupStorage,
};
pub use binder::{ActiveSessionBinder, BinderPhase, PageDraft};
pub use error::{SyncError, SyncResult};
pub use guard::{start_new_session, NewSessionOutcome};
pub use media::{MediaPayload, MediaUploader};
pub use registry::{GenerationOutput, RegistryEvent, RegistryPhase, SessionRegistry};
pub use remote::RemoteSessionClient;
pub use store::{HttpSessionStore, SessionStore};
