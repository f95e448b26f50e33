//! In-memory source of truth for every session visible to the signed-in
//! identity.
//!
//! Owned by the composition root and shared by reference. Mutations go
//! through [`RemoteSessionClient`] first and are applied locally only on
//! success; message saves are optimistic. The state lock is never held
//! across an `.await`.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Mutex, MutexGuard};

use chrono::Utc;
use serde_json::{Map, Value};
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use nino_protocol::{
    DurableChanges, Message, NewMessage, ProjectionChanges, Session, SessionType, UploadedImage,
    UploadedVideo,
};

use crate::error::{SyncError, SyncResult};
use crate::naming::{is_default_title, title_from_first_prompt};
use crate::remote::RemoteSessionClient;

/// Lifecycle of a registry instance
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistryPhase {
    /// No identity bound
    Uninitialized,
    /// First session list in flight
    Loading,
    Ready,
}

/// Change notifications for re-rendering consumers
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistryEvent {
    SessionsLoaded { count: usize },
    SessionCreated { session_id: String },
    SessionUpdated { session_id: String },
    SessionDeleted { session_id: String },
    CurrentChanged { session_id: Option<String> },
    MessagesChanged { session_id: String },
    Cleared,
}

/// Result of a generation call, saved as an assistant message.
#[derive(Debug, Clone, Default)]
pub struct GenerationOutput {
    pub content: String,
    pub images: Vec<UploadedImage>,
    pub videos: Vec<UploadedVideo>,
    pub metadata: Option<Map<String, Value>>,
}

struct RegistryState {
    phase: RegistryPhase,
    identity: Option<String>,
    /// Bumped on every bind/unbind; responses from an older epoch are dropped.
    epoch: u64,
    sessions: Vec<Session>,
    current: Option<String>,
    /// Epoch of the in-flight session list, if any.
    list_in_flight: Option<u64>,
    /// Latest message-load token issued per session.
    load_tokens: HashMap<String, u64>,
    next_load_token: u64,
}

impl RegistryState {
    fn new() -> Self {
        Self {
            phase: RegistryPhase::Uninitialized,
            identity: None,
            epoch: 0,
            sessions: Vec::new(),
            current: None,
            list_in_flight: None,
            load_tokens: HashMap::new(),
            next_load_token: 0,
        }
    }

    fn reset(&mut self) {
        self.epoch += 1;
        self.sessions.clear();
        self.current = None;
        self.list_in_flight = None;
        self.load_tokens.clear();
    }

    fn session_mut(&mut self, session_id: &str) -> Option<&mut Session> {
        self.sessions.iter_mut().find(|s| s.id == session_id)
    }
}

pub struct SessionRegistry {
    remote: RemoteSessionClient,
    state: Mutex<RegistryState>,
    events: broadcast::Sender<RegistryEvent>,
}

impl SessionRegistry {
    pub fn new(remote: RemoteSessionClient) -> Self {
        let (events, _) = broadcast::channel(256);
        Self {
            remote,
            state: Mutex::new(RegistryState::new()),
            events,
        }
    }

    fn state(&self) -> MutexGuard<'_, RegistryState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn emit(&self, event: RegistryEvent) {
        let _ = self.events.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RegistryEvent> {
        self.events.subscribe()
    }

    // -- Reads ---------------------------------------------------------------

    pub fn phase(&self) -> RegistryPhase {
        self.state().phase
    }

    /// All sessions, most recently created first.
    pub fn sessions(&self) -> Vec<Session> {
        self.state().sessions.clone()
    }

    pub fn session(&self, session_id: &str) -> Option<Session> {
        self.state()
            .sessions
            .iter()
            .find(|s| s.id == session_id)
            .cloned()
    }

    pub fn current_session_id(&self) -> Option<String> {
        self.state().current.clone()
    }

    pub fn current_session(&self) -> Option<Session> {
        let state = self.state();
        let current = state.current.as_deref()?;
        state.sessions.iter().find(|s| s.id == current).cloned()
    }

    // -- Lifecycle -----------------------------------------------------------

    /// Bind the registry to a signed-in identity and load its sessions.
    /// Rebinding the same identity is a no-op.
    pub async fn bind(&self, identity: &str) {
        {
            let mut state = self.state();
            if state.identity.as_deref() == Some(identity)
                && state.phase != RegistryPhase::Uninitialized
            {
                return;
            }
            state.reset();
            state.identity = Some(identity.to_string());
            state.phase = RegistryPhase::Loading;
        }
        info!(
            component = "registry",
            event = "registry.bound",
            identity = %identity,
        );
        self.refresh().await;
    }

    /// Forget the identity, every session and the current selection.
    pub fn unbind(&self) {
        {
            let mut state = self.state();
            state.reset();
            state.identity = None;
            state.phase = RegistryPhase::Uninitialized;
        }
        info!(component = "registry", event = "registry.unbound");
        self.emit(RegistryEvent::Cleared);
    }

    /// Re-fetch the session list. A call while a list is already in flight
    /// for the same identity does nothing. Failures leave an empty (first
    /// load) or unchanged collection and are never propagated.
    pub async fn refresh(&self) {
        let epoch = {
            let mut state = self.state();
            if state.identity.is_none() {
                return;
            }
            if state.list_in_flight == Some(state.epoch) {
                debug!(
                    component = "registry",
                    event = "registry.refresh_suppressed",
                    "Session list already in flight"
                );
                return;
            }
            state.list_in_flight = Some(state.epoch);
            state.epoch
        };

        let result = self.remote.list_sessions().await;

        let count = {
            let mut state = self.state();
            if state.epoch != epoch {
                debug!(
                    component = "registry",
                    event = "registry.stale_list_dropped",
                );
                return;
            }
            state.list_in_flight = None;
            state.phase = RegistryPhase::Ready;

            match result {
                Ok(fetched) => {
                    let mut previous: HashMap<String, Session> = state
                        .sessions
                        .drain(..)
                        .map(|s| (s.id.clone(), s))
                        .collect();
                    state.sessions = fetched
                        .into_iter()
                        .map(|fresh| match previous.remove(&fresh.id) {
                            Some(known) => carry_local_state(fresh, known),
                            None => fresh,
                        })
                        .collect();
                }
                Err(e) => {
                    error!(
                        component = "registry",
                        event = "registry.list_failed",
                        error = %e,
                        "Failed to load sessions"
                    );
                }
            }
            state.sessions.len()
        };

        info!(
            component = "registry",
            event = "registry.sessions_loaded",
            count = count,
        );
        self.emit(RegistryEvent::SessionsLoaded { count });
    }

    // -- Durable operations --------------------------------------------------

    /// Create a session in the store and prepend it. Errors propagate and
    /// leave the collection untouched.
    pub async fn create_session(
        &self,
        title: Option<String>,
        session_type: SessionType,
        metadata: Option<Map<String, Value>>,
    ) -> SyncResult<Session> {
        let epoch = self.bound_epoch()?;
        let session = self
            .remote
            .create_session(title, session_type, metadata)
            .await?;

        {
            let mut state = self.state();
            if state.epoch == epoch {
                state.sessions.retain(|s| s.id != session.id);
                state.sessions.insert(0, session.clone());
            }
        }
        self.emit(RegistryEvent::SessionCreated {
            session_id: session.id.clone(),
        });
        Ok(session)
    }

    /// Persist store-backed fields, then merge them locally.
    pub async fn update_session(
        &self,
        session_id: &str,
        changes: DurableChanges,
    ) -> SyncResult<()> {
        self.bound_epoch()?;
        if changes.is_empty() {
            return Ok(());
        }
        self.remote.update_session(session_id, &changes).await?;

        let updated = {
            let mut state = self.state();
            match state.session_mut(session_id) {
                Some(session) => {
                    session.apply_durable(&changes);
                    session.updated_at = Utc::now();
                    true
                }
                None => false,
            }
        };
        if updated {
            self.emit(RegistryEvent::SessionUpdated {
                session_id: session_id.to_string(),
            });
        }
        Ok(())
    }

    /// Merge client-only fields. Never touches the network.
    pub fn update_projection(
        &self,
        session_id: &str,
        changes: ProjectionChanges,
    ) -> SyncResult<()> {
        {
            let mut state = self.state();
            let session = state
                .session_mut(session_id)
                .ok_or_else(|| SyncError::SessionNotFound(session_id.to_string()))?;
            session.apply_projection(changes);
        }
        self.emit(RegistryEvent::SessionUpdated {
            session_id: session_id.to_string(),
        });
        Ok(())
    }

    /// Delete a session permanently. Clears the selection if it pointed at it.
    pub async fn delete_session(&self, session_id: &str) -> SyncResult<()> {
        self.bound_epoch()?;
        self.remote.delete_session(session_id).await?;

        let cleared_current = {
            let mut state = self.state();
            state.sessions.retain(|s| s.id != session_id);
            state.load_tokens.remove(session_id);
            if state.current.as_deref() == Some(session_id) {
                state.current = None;
                true
            } else {
                false
            }
        };

        self.emit(RegistryEvent::SessionDeleted {
            session_id: session_id.to_string(),
        });
        if cleared_current {
            self.emit(RegistryEvent::CurrentChanged { session_id: None });
        }
        Ok(())
    }

    // -- Selection -----------------------------------------------------------

    /// Mark a session current and re-fetch its messages.
    ///
    /// Ignored while unbound or for an ID the registry does not hold. Every
    /// load carries a token; a response is applied only while its token is
    /// still the latest one issued for that session.
    pub async fn select_session(&self, session_id: Option<&str>) {
        if self.bound_epoch().is_err() {
            return;
        }
        let Some(session_id) = session_id else {
            self.state().current = None;
            self.emit(RegistryEvent::CurrentChanged { session_id: None });
            return;
        };

        let (epoch, token) = {
            let mut state = self.state();
            if !state.sessions.iter().any(|s| s.id == session_id) {
                debug!(
                    component = "registry",
                    event = "registry.unknown_session_selected",
                    session_id = %session_id,
                );
                return;
            }
            state.current = Some(session_id.to_string());
            state.next_load_token += 1;
            let token = state.next_load_token;
            state.load_tokens.insert(session_id.to_string(), token);
            (state.epoch, token)
        };
        self.emit(RegistryEvent::CurrentChanged {
            session_id: Some(session_id.to_string()),
        });

        let fetched = self.remote.load_session_messages(session_id).await;

        {
            let mut state = self.state();
            if state.epoch != epoch || state.load_tokens.get(session_id) != Some(&token) {
                debug!(
                    component = "registry",
                    event = "registry.stale_messages_dropped",
                    session_id = %session_id,
                    token = token,
                );
                return;
            }
            let Some(session) = state.session_mut(session_id) else {
                return;
            };
            session.messages = merge_messages(fetched, &session.messages);
        }
        self.emit(RegistryEvent::MessagesChanged {
            session_id: session_id.to_string(),
        });
    }

    // -- Messages ------------------------------------------------------------

    /// Append a message optimistically, then persist it.
    ///
    /// On success the optimistic entry is replaced by the store's copy
    /// (store ID, durable media URLs). On failure the local-only copy stays.
    pub async fn send_message(&self, session_id: &str, draft: NewMessage) -> SyncResult<Message> {
        let (optimistic_id, derive_title) = {
            let mut state = self.state();
            let session = state
                .session_mut(session_id)
                .ok_or_else(|| SyncError::SessionNotFound(session_id.to_string()))?;

            let derive_title = draft.role == nino_protocol::MessageRole::User
                && is_default_title(&session.title)
                && !session
                    .messages
                    .iter()
                    .any(|m| m.role == nino_protocol::MessageRole::User);

            let optimistic = Message::local(draft.clone(), Utc::now());
            let id = optimistic.id.clone();
            session.messages.push(optimistic);
            (id, derive_title)
        };
        self.emit(RegistryEvent::MessagesChanged {
            session_id: session_id.to_string(),
        });

        let content = draft.content.clone();
        let saved = self.remote.save_message(session_id, draft).await;

        {
            let mut state = self.state();
            if let Some(session) = state.session_mut(session_id) {
                // A load that finished meanwhile may already hold the store's copy.
                let already_loaded = saved.id != optimistic_id
                    && session.messages.iter().any(|m| m.id == saved.id);
                if already_loaded {
                    session.messages.retain(|m| m.id != optimistic_id);
                } else if let Some(entry) =
                    session.messages.iter_mut().find(|m| m.id == optimistic_id)
                {
                    *entry = saved.clone();
                }
            }
        }
        self.emit(RegistryEvent::MessagesChanged {
            session_id: session_id.to_string(),
        });

        if derive_title {
            if let Some(title) = title_from_first_prompt(&content) {
                if let Err(e) = self
                    .update_session(session_id, DurableChanges::title(title))
                    .await
                {
                    warn!(
                        component = "registry",
                        event = "registry.title_update_failed",
                        session_id = %session_id,
                        error = %e,
                    );
                }
            }
        }

        Ok(saved)
    }

    /// Run a generation call with an `is_generating` placeholder shown in the
    /// session. The placeholder is removed however the call ends; on success
    /// the result is saved as an assistant message and its media URLs are
    /// recorded in the session projection.
    pub async fn run_generation<Fut, E>(
        &self,
        session_id: &str,
        generation: Fut,
    ) -> Result<Message, E>
    where
        Fut: Future<Output = Result<GenerationOutput, E>>,
        E: From<SyncError>,
    {
        let placeholder_id = {
            let mut state = self.state();
            let session = state
                .session_mut(session_id)
                .ok_or_else(|| SyncError::SessionNotFound(session_id.to_string()))?;
            let placeholder = Message::generating_placeholder(Utc::now());
            let id = placeholder.id.clone();
            session.messages.push(placeholder);
            id
        };
        self.emit(RegistryEvent::MessagesChanged {
            session_id: session_id.to_string(),
        });

        let guard = PlaceholderGuard {
            registry: self,
            session_id,
            placeholder_id,
        };
        let outcome = generation.await;
        drop(guard);

        let output = outcome?;
        let changes = ProjectionChanges {
            generated_image_url: output.images.first().map(|m| Some(m.url.clone())),
            generated_video_url: output.videos.first().map(|m| Some(m.url.clone())),
            ..Default::default()
        };
        if let Err(e) = self.update_projection(session_id, changes) {
            debug!(
                component = "registry",
                event = "registry.generation_projection_skipped",
                session_id = %session_id,
                error = %e,
            );
        }

        let mut draft = NewMessage::assistant(output.content)
            .with_images(output.images)
            .with_videos(output.videos);
        draft.metadata = output.metadata;
        Ok(self.send_message(session_id, draft).await?)
    }

    fn remove_message(&self, session_id: &str, message_id: &str) {
        let removed = {
            let mut state = self.state();
            match state.session_mut(session_id) {
                Some(session) => {
                    let before = session.messages.len();
                    session.messages.retain(|m| m.id != message_id);
                    session.messages.len() != before
                }
                None => false,
            }
        };
        if removed {
            self.emit(RegistryEvent::MessagesChanged {
                session_id: session_id.to_string(),
            });
        }
    }

    fn bound_epoch(&self) -> SyncResult<u64> {
        let state = self.state();
        if state.identity.is_none() {
            return Err(SyncError::NotBound);
        }
        Ok(state.epoch)
    }
}

/// Removes a generation placeholder when dropped.
struct PlaceholderGuard<'a> {
    registry: &'a SessionRegistry,
    session_id: &'a str,
    placeholder_id: String,
}

impl Drop for PlaceholderGuard<'_> {
    fn drop(&mut self) {
        self.registry
            .remove_message(self.session_id, &self.placeholder_id);
    }
}

/// Keep what only this client knows about a session across a list refresh.
fn carry_local_state(mut fresh: Session, known: Session) -> Session {
    fresh.messages = known.messages;
    fresh.generated_image_url = known.generated_image_url;
    fresh.generated_video_url = known.generated_video_url;
    fresh.prompt = known.prompt;
    fresh.input_text = known.input_text;
    fresh.uploaded_images = known.uploaded_images;
    fresh.video_params = known.video_params;
    fresh
}

/// Fetched messages replace the list; local-only messages and in-flight
/// placeholders the store has never seen are kept at the end.
fn merge_messages(fetched: Vec<Message>, existing: &[Message]) -> Vec<Message> {
    let mut merged = fetched;
    merged.extend(
        existing
            .iter()
            .filter(|m| m.is_local() || m.is_generating)
            .cloned(),
    );
    merged
}
