//! The only path for durable session and message mutations.
//!
//! Wraps a [`SessionStore`] and applies the failure policy callers rely on:
//! list/create/update/delete propagate every error, `save_message` degrades to
//! a locally synthesized message, `load_session_messages` degrades to empty.

use std::sync::Arc;

use chrono::Utc;
use serde_json::{Map, Value};
use tracing::{info, warn};

use nino_protocol::{
    CreateSessionRequest, DurableChanges, Message, NewMessage, SaveMessageRequest, Session,
    SessionType, UpdateSessionRequest,
};

use crate::error::{SyncError, SyncResult};
use crate::media::{persist_media, MediaUploader};
use crate::store::SessionStore;

#[derive(Clone)]
pub struct RemoteSessionClient {
    store: Arc<dyn SessionStore>,
    uploader: Option<Arc<dyn MediaUploader>>,
}

impl RemoteSessionClient {
    pub fn new(store: Arc<dyn SessionStore>, uploader: Option<Arc<dyn MediaUploader>>) -> Self {
        Self { store, uploader }
    }

    pub async fn list_sessions(&self) -> SyncResult<Vec<Session>> {
        self.store.list_sessions().await
    }

    pub async fn create_session(
        &self,
        title: Option<String>,
        session_type: SessionType,
        metadata: Option<Map<String, Value>>,
    ) -> SyncResult<Session> {
        let request = CreateSessionRequest {
            title: title.map(|t| t.trim().to_string()).filter(|t| !t.is_empty()),
            session_type,
            session_metadata: metadata,
        };
        let session = self.store.create_session(request).await?;
        info!(
            component = "remote",
            event = "remote.session_created",
            session_id = %session.id,
            session_type = session_type.as_str(),
        );
        Ok(session)
    }

    /// Send the durable subset of a session update. Only the title is
    /// transmitted, trimmed; a blank title is rejected before any request.
    pub async fn update_session(
        &self,
        session_id: &str,
        changes: &DurableChanges,
    ) -> SyncResult<()> {
        let title = match changes.title.as_deref().map(str::trim) {
            Some("") => return Err(SyncError::BlankTitle),
            title => title.map(str::to_string),
        };
        self.store
            .update_session(UpdateSessionRequest {
                session_id: session_id.to_string(),
                title,
            })
            .await
    }

    pub async fn delete_session(&self, session_id: &str) -> SyncResult<()> {
        self.store.delete_session(session_id).await?;
        info!(
            component = "remote",
            event = "remote.session_deleted",
            session_id = %session_id,
        );
        Ok(())
    }

    /// Persist a message. Never fails: on any error the caller receives a
    /// local-only message carrying a `local-` ID and the current time.
    ///
    /// Transient media is uploaded first. A message is only sent to the store
    /// once every attachment has a durable URL.
    pub async fn save_message(&self, session_id: &str, mut draft: NewMessage) -> Message {
        let has_transient = draft.media().any(|m| m.is_transient());
        if has_transient {
            let uploaded = match &self.uploader {
                Some(uploader) => persist_media(uploader, session_id, &mut draft).await,
                None => Err(SyncError::Media(
                    "no media uploader configured".into(),
                )),
            };
            if let Err(e) = uploaded {
                warn!(
                    component = "remote",
                    event = "remote.media_upload_failed",
                    session_id = %session_id,
                    error = %e,
                    "Keeping message local-only"
                );
                return Message::local(draft, Utc::now());
            }
        }

        let request = SaveMessageRequest::from_new_message(session_id, &draft);
        match self.store.save_message(request).await {
            Ok(message) => message,
            Err(e) => {
                warn!(
                    component = "remote",
                    event = "remote.message_save_failed",
                    session_id = %session_id,
                    error = %e,
                    "Keeping message local-only"
                );
                Message::local(draft, Utc::now())
            }
        }
    }

    /// Load a session's messages, or nothing if the store is unreachable.
    pub async fn load_session_messages(&self, session_id: &str) -> Vec<Message> {
        match self.store.load_session_messages(session_id).await {
            Ok(messages) => messages,
            Err(e) => {
                warn!(
                    component = "remote",
                    event = "remote.messages_load_failed",
                    session_id = %session_id,
                    error = %e,
                );
                Vec::new()
            }
        }
    }
}
