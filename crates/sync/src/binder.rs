//! Active-session binding for workflow pages
//!
//! Restoration rules live in a pure state machine:
//! `transition(phase, input) -> (phase, effects)`. No IO, no async.
//! [`ActiveSessionBinder`] feeds it inputs and executes the effects against
//! the registry and the emergency backup.

use std::collections::VecDeque;
use std::future::Future;
use std::sync::Arc;

use tracing::{debug, info};

use nino_protocol::{
    Message, MessageRole, NewMessage, ProjectionChanges, Session, SessionType, UploadedImage,
    UploadedVideo, VideoParams,
};

use crate::backup::{BackupData, EmergencyBackup};
use crate::error::{SyncError, SyncResult};
use crate::guard::{self, NewSessionOutcome};
use crate::registry::{GenerationOutput, SessionRegistry};

// ---------------------------------------------------------------------------
// State machine
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BinderPhase {
    /// No session bound
    Idle,
    Restoring {
        session_id: String,
    },
    Ready {
        session_id: String,
    },
    /// A generation call is in flight. Restoration is held back until it
    /// finishes; `deferred` records a selection change seen meanwhile.
    Generating {
        session_id: String,
        restored: bool,
        deferred: Option<Option<String>>,
    },
}

impl BinderPhase {
    pub fn session_id(&self) -> Option<&str> {
        match self {
            BinderPhase::Idle => None,
            BinderPhase::Restoring { session_id }
            | BinderPhase::Ready { session_id }
            | BinderPhase::Generating { session_id, .. } => Some(session_id),
        }
    }

    pub fn is_generating(&self) -> bool {
        matches!(self, BinderPhase::Generating { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BinderInput {
    SessionSelected(Option<String>),
    RestoreFinished { session_id: String },
    GenerationStarted,
    GenerationFinished,
    DraftChanged,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BinderEffect {
    /// Copy the session's projection (or the backup) into the draft.
    Restore { session_id: String },
    ResetDraft,
    /// Write the draft into the session's projection.
    PushDraft { session_id: String },
}

pub fn transition(phase: BinderPhase, input: BinderInput) -> (BinderPhase, Vec<BinderEffect>) {
    use BinderEffect as E;
    use BinderInput as I;
    use BinderPhase as P;

    match (phase, input) {
        // -- Selection -------------------------------------------------------
        (P::Generating { session_id, restored, .. }, I::SessionSelected(selected)) => {
            let deferred = match selected {
                Some(id) if id == session_id => None,
                other => Some(other),
            };
            (
                P::Generating {
                    session_id,
                    restored,
                    deferred,
                },
                vec![],
            )
        }
        (phase, I::SessionSelected(None)) => {
            if phase == P::Idle {
                (P::Idle, vec![])
            } else {
                (P::Idle, vec![E::ResetDraft])
            }
        }
        (phase, I::SessionSelected(Some(id))) => {
            if phase.session_id() == Some(id.as_str()) {
                return (phase, vec![]);
            }
            (
                P::Restoring {
                    session_id: id.clone(),
                },
                vec![E::Restore { session_id: id }],
            )
        }

        // -- Restoration -----------------------------------------------------
        (P::Restoring { session_id }, I::RestoreFinished { session_id: done }) => {
            if done == session_id {
                (P::Ready { session_id }, vec![])
            } else {
                (P::Restoring { session_id }, vec![])
            }
        }
        (
            P::Generating {
                session_id,
                restored,
                deferred,
            },
            I::RestoreFinished { session_id: done },
        ) => {
            let restored = restored || done == session_id;
            (
                P::Generating {
                    session_id,
                    restored,
                    deferred,
                },
                vec![],
            )
        }

        // -- Generation ------------------------------------------------------
        (P::Ready { session_id }, I::GenerationStarted) => (
            P::Generating {
                session_id,
                restored: true,
                deferred: None,
            },
            vec![],
        ),
        (P::Restoring { session_id }, I::GenerationStarted) => (
            P::Generating {
                session_id,
                restored: false,
                deferred: None,
            },
            vec![],
        ),
        (
            P::Generating {
                session_id,
                deferred,
                ..
            },
            I::GenerationFinished,
        ) => match deferred {
            Some(Some(next)) => (
                P::Restoring {
                    session_id: next.clone(),
                },
                vec![E::Restore { session_id: next }],
            ),
            Some(None) => (P::Idle, vec![E::ResetDraft]),
            None => (
                P::Ready {
                    session_id: session_id.clone(),
                },
                vec![E::PushDraft { session_id }],
            ),
        },

        // -- Draft edits -----------------------------------------------------
        (P::Ready { session_id }, I::DraftChanged) => (
            P::Ready {
                session_id: session_id.clone(),
            },
            vec![E::PushDraft { session_id }],
        ),
        (
            P::Generating {
                session_id,
                restored: true,
                deferred: None,
            },
            I::DraftChanged,
        ) => (
            P::Generating {
                session_id: session_id.clone(),
                restored: true,
                deferred: None,
            },
            vec![E::PushDraft { session_id }],
        ),

        (phase, _) => (phase, vec![]),
    }
}

// ---------------------------------------------------------------------------
// Page draft
// ---------------------------------------------------------------------------

/// Page-local creative state mirrored into the session projection.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PageDraft {
    pub uploaded_images: Vec<UploadedImage>,
    /// Page-local only; sent with the next message.
    pub uploaded_videos: Vec<UploadedVideo>,
    pub input_text: String,
    pub prompt: Option<String>,
    pub generated_image_url: Option<String>,
    pub generated_video_url: Option<String>,
    pub video_params: VideoParams,
}

impl PageDraft {
    pub fn from_session(session: &Session) -> Self {
        Self {
            uploaded_images: session.uploaded_images.clone(),
            uploaded_videos: Vec::new(),
            input_text: session.input_text.clone().unwrap_or_default(),
            prompt: session.prompt.clone(),
            generated_image_url: session.generated_image_url.clone(),
            generated_video_url: session.generated_video_url.clone(),
            video_params: session.video_params.clone().unwrap_or_default(),
        }
    }

    /// No uploaded media and no generated result.
    pub fn lacks_media(&self) -> bool {
        self.uploaded_images.is_empty()
            && self.generated_image_url.is_none()
            && self.generated_video_url.is_none()
    }

    pub fn to_projection(&self) -> ProjectionChanges {
        let input_text = Some(self.input_text.clone()).filter(|t| !t.is_empty());
        let video_params = Some(self.video_params.clone()).filter(|p| *p != VideoParams::default());
        ProjectionChanges {
            generated_image_url: Some(self.generated_image_url.clone()),
            generated_video_url: Some(self.generated_video_url.clone()),
            prompt: Some(self.prompt.clone()),
            input_text: Some(input_text),
            uploaded_images: Some(self.uploaded_images.clone()),
            video_params: Some(video_params),
            is_completed: None,
        }
    }

    fn backup_data(&self, was_generating: bool) -> BackupData {
        BackupData {
            uploaded_images: self.uploaded_images.clone(),
            generated_image_url: self.generated_image_url.clone(),
            generated_video_url: self.generated_video_url.clone(),
            prompt: self.prompt.clone(),
            was_generating,
        }
    }

    fn apply_backup(&mut self, data: BackupData) {
        self.uploaded_images = data.uploaded_images;
        self.generated_image_url = data.generated_image_url;
        self.generated_video_url = data.generated_video_url;
        if data.prompt.is_some() {
            self.prompt = data.prompt;
        }
    }

    fn take_generated(&mut self, message: &Message) {
        if let Some(image) = message.images.first() {
            self.generated_image_url = Some(image.url.clone());
        }
        if let Some(video) = message.videos.first() {
            self.generated_video_url = Some(video.url.clone());
        }
    }
}

// ---------------------------------------------------------------------------
// Binder
// ---------------------------------------------------------------------------

type Predicate<'a> = &'a dyn Fn() -> bool;

/// Binds one workflow page to the registry's current session.
pub struct ActiveSessionBinder {
    registry: Arc<SessionRegistry>,
    backup: Arc<EmergencyBackup>,
    session_type: SessionType,
    phase: BinderPhase,
    draft: PageDraft,
}

impl ActiveSessionBinder {
    pub fn new(
        registry: Arc<SessionRegistry>,
        backup: Arc<EmergencyBackup>,
        session_type: SessionType,
    ) -> Self {
        Self {
            registry,
            backup,
            session_type,
            phase: BinderPhase::Idle,
            draft: PageDraft::default(),
        }
    }

    pub fn phase(&self) -> &BinderPhase {
        &self.phase
    }

    pub fn draft(&self) -> &PageDraft {
        &self.draft
    }

    pub fn session_id(&self) -> Option<&str> {
        self.phase.session_id()
    }

    pub fn session_type(&self) -> SessionType {
        self.session_type
    }

    /// Follow a session-identifier change (from navigation or the registry).
    pub async fn bind_session(&mut self, session_id: Option<&str>) {
        if self.registry.current_session_id().as_deref() != session_id {
            self.registry.select_session(session_id).await;
        }
        self.dispatch(BinderInput::SessionSelected(session_id.map(str::to_string)));
    }

    /// Return the bound session, creating and selecting one if there is none.
    /// Anything already in the draft is carried into the new session.
    pub async fn ensure_session(&mut self) -> SyncResult<String> {
        if let Some(id) = self.session_id() {
            return Ok(id.to_string());
        }
        if let Some(current) = self.registry.current_session_id() {
            self.bind_session(Some(&current)).await;
            return Ok(current);
        }

        let session = self
            .registry
            .create_session(None, self.session_type, None)
            .await?;
        if self.draft != PageDraft::default() {
            self.registry
                .update_projection(&session.id, self.draft.to_projection())?;
        }
        self.bind_session(Some(&session.id)).await;
        info!(
            component = "binder",
            event = "binder.session_created",
            session_id = %session.id,
            session_type = self.session_type.as_str(),
        );
        Ok(session.id)
    }

    /// Mutate the draft. The change reaches the registry only once the
    /// bound session has been restored.
    pub fn edit_draft(&mut self, edit: impl FnOnce(&mut PageDraft)) {
        edit(&mut self.draft);
        self.dispatch(BinderInput::DraftChanged);
    }

    /// Send the input text with the draft's media as a user message.
    /// Returns `None` when there is nothing to send.
    pub async fn send(&mut self) -> SyncResult<Option<Message>> {
        let content = self.draft.input_text.trim().to_string();
        if content.is_empty() && self.draft.uploaded_images.is_empty() {
            return Ok(None);
        }
        let session_id = self.ensure_session().await?;

        let message = NewMessage::user(content)
            .with_images(self.draft.uploaded_images.clone())
            .with_videos(self.draft.uploaded_videos.clone());
        let saved = self.registry.send_message(&session_id, message).await?;

        let durable_images =
            !saved.is_local() && saved.images.len() == self.draft.uploaded_images.len();
        self.edit_draft(|draft| {
            draft.input_text.clear();
            draft.uploaded_videos.clear();
            if durable_images {
                draft.uploaded_images = saved.images.clone();
            }
        });
        Ok(Some(saved))
    }

    pub fn begin_generation(&mut self) {
        self.dispatch(BinderInput::GenerationStarted);
    }

    /// Leave the generating state, taking the produced media into the draft
    /// unless the page moved to another session meanwhile.
    pub fn finish_generation(&mut self, produced: Option<&Message>) {
        if let (Some(message), BinderPhase::Generating { deferred: None, .. }) =
            (produced, &self.phase)
        {
            self.draft.take_generated(message);
        }
        self.dispatch(BinderInput::GenerationFinished);
    }

    /// Run a generation for the bound session with `prompt` recorded in the
    /// draft. Restoration is held back while the call is in flight.
    pub async fn generate<Fut, E>(
        &mut self,
        prompt: impl Into<String>,
        generation: Fut,
    ) -> Result<Message, E>
    where
        Fut: Future<Output = Result<GenerationOutput, E>>,
        E: From<SyncError>,
    {
        let session_id = self.ensure_session().await?;
        let prompt = prompt.into();
        self.edit_draft(|draft| draft.prompt = Some(prompt));

        self.begin_generation();
        let result = self.registry.run_generation(&session_id, generation).await;
        self.finish_generation(result.as_ref().ok());
        result
    }

    /// Snapshot unsent work before the page goes away.
    pub fn on_hidden(&self) {
        let Some(session_id) = self.session_id() else {
            return;
        };
        let data = self.draft.backup_data(self.phase.is_generating());
        if data.is_empty() {
            return;
        }
        self.backup.snapshot(session_id, data);
    }

    /// Start a new session unless the bound one is still empty for this
    /// workflow. The draft is cleared in both cases.
    pub async fn start_new_session(&mut self) -> SyncResult<NewSessionOutcome> {
        let session = self.session_id().and_then(|id| self.registry.session(id));
        let draft = &self.draft;

        let has_messages = || {
            session.as_ref().is_some_and(|s| {
                s.messages.len() > 1 || s.messages.iter().any(|m| m.role == MessageRole::User)
            })
        };
        let has_images = || !draft.uploaded_images.is_empty();
        let has_input = || !draft.input_text.trim().is_empty();
        let has_image_result = || draft.generated_image_url.is_some();
        let has_movement = || !draft.video_params.movement_description.trim().is_empty();
        let has_video_result = || draft.generated_video_url.is_some();

        let predicates: Vec<Predicate<'_>> = match self.session_type {
            SessionType::Chat => vec![&has_messages as Predicate, &has_input, &has_image_result],
            SessionType::Enhance => vec![&has_images as Predicate, &has_image_result],
            SessionType::Video => vec![&has_movement as Predicate, &has_images, &has_video_result],
        };

        let mut reset = false;
        let outcome = guard::start_new_session(
            &self.registry,
            self.session_type,
            &predicates,
            || reset = true,
        )
        .await?;

        if reset {
            self.draft = PageDraft::default();
        }
        match &outcome {
            NewSessionOutcome::Reused => self.dispatch(BinderInput::DraftChanged),
            NewSessionOutcome::Created { session_id } => self.bind_session(Some(session_id)).await,
        }
        Ok(outcome)
    }

    fn dispatch(&mut self, input: BinderInput) {
        let mut pending = VecDeque::from([input]);
        while let Some(input) = pending.pop_front() {
            let phase = std::mem::replace(&mut self.phase, BinderPhase::Idle);
            let (next, effects) = transition(phase, input);
            self.phase = next;

            for effect in effects {
                match effect {
                    BinderEffect::Restore { session_id } => {
                        let from_backup = self.restore(&session_id);
                        pending.push_back(BinderInput::RestoreFinished { session_id });
                        if from_backup {
                            pending.push_back(BinderInput::DraftChanged);
                        }
                    }
                    BinderEffect::ResetDraft => self.draft = PageDraft::default(),
                    BinderEffect::PushDraft { session_id } => self.push(&session_id),
                }
            }
        }
    }

    /// Returns true if the draft came from the emergency backup.
    fn restore(&mut self, session_id: &str) -> bool {
        self.draft = match self.registry.session(session_id) {
            Some(session) => PageDraft::from_session(&session),
            None => {
                debug!(
                    component = "binder",
                    event = "binder.restore_missing",
                    session_id = %session_id,
                    "Session not in registry, starting from defaults"
                );
                PageDraft::default()
            }
        };

        if !self.draft.lacks_media() {
            return false;
        }
        let Some(data) = self.backup.restore(session_id) else {
            return false;
        };
        self.draft.apply_backup(data);
        info!(
            component = "binder",
            event = "binder.backup_applied",
            session_id = %session_id,
        );
        true
    }

    fn push(&self, session_id: &str) {
        if let Err(e) = self
            .registry
            .update_projection(session_id, self.draft.to_projection())
        {
            debug!(
                component = "binder",
                event = "binder.push_skipped",
                session_id = %session_id,
                error = %e,
            );
        }
    }
}
