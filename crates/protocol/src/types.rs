//! Core types shared across the protocol

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Title given to sessions created without one.
pub const DEFAULT_SESSION_TITLE: &str = "New Chat";

/// Prefix of IDs synthesized locally (never assigned by the store).
pub const LOCAL_ID_PREFIX: &str = "local-";

/// Workflow a session belongs to
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionType {
    #[default]
    Chat,
    Enhance,
    Video,
}

impl SessionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionType::Chat => "chat",
            SessionType::Enhance => "enhance",
            SessionType::Video => "video",
        }
    }
}

impl std::str::FromStr for SessionType {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "chat" => Ok(SessionType::Chat),
            "enhance" => Ok(SessionType::Enhance),
            "video" => Ok(SessionType::Video),
            other => Err(format!("unknown session type: {other}")),
        }
    }
}

/// Message role
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageRole {
    User,
    Assistant,
}

/// Reference to an image or video, either user supplied or generated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UploadedMedia {
    pub id: String,
    pub name: String,
    /// Either a transient local reference (`blob:`, `data:`, `file:`, bare path)
    /// or a durable remote URL.
    pub url: String,
    /// Raw file backing a transient reference.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub local_path: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub is_generated: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub generation_prompt: Option<String>,
}

pub type UploadedImage = UploadedMedia;
pub type UploadedVideo = UploadedMedia;

impl UploadedMedia {
    /// Reference to a remote URL.
    pub fn remote(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            id: crate::new_id(),
            name: name.into(),
            url: url.into(),
            local_path: None,
            size: None,
            content_type: None,
            is_generated: false,
            generation_prompt: None,
        }
    }

    /// Reference to a file on local disk that has not been uploaded yet.
    pub fn local_file(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "upload".to_string());
        Self {
            id: crate::new_id(),
            url: format!("file://{}", path.display()),
            name,
            local_path: Some(path),
            size: None,
            content_type: None,
            is_generated: false,
            generation_prompt: None,
        }
    }

    /// Reference to media produced by a generation call.
    pub fn generated(url: impl Into<String>, prompt: impl Into<String>) -> Self {
        let url = url.into();
        Self {
            id: crate::new_id(),
            name: url.rsplit('/').next().unwrap_or("generated").to_string(),
            url,
            local_path: None,
            size: None,
            content_type: None,
            is_generated: true,
            generation_prompt: Some(prompt.into()),
        }
    }

    /// True if the URL is only meaningful on this machine and must be
    /// uploaded before the reference can be stored durably.
    pub fn is_transient(&self) -> bool {
        !is_durable_url(&self.url)
    }
}

/// Durable URLs are plain http(s) URLs; everything else is local.
pub fn is_durable_url(url: &str) -> bool {
    let lower = url.trim_start().to_ascii_lowercase();
    lower.starts_with("https://") || lower.starts_with("http://")
}

/// A message in a session's conversation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub content: String,
    pub role: MessageRole,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub images: Vec<UploadedImage>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub videos: Vec<UploadedVideo>,
    /// Placeholder shown while a generation call is in flight. Never persisted.
    #[serde(skip)]
    pub is_generating: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Map<String, Value>>,
}

impl Message {
    /// Build a message that exists only in local memory.
    pub fn local(draft: NewMessage, now: DateTime<Utc>) -> Self {
        Self {
            id: crate::new_local_id(),
            content: draft.content,
            role: draft.role,
            timestamp: now,
            images: draft.images,
            videos: draft.videos,
            is_generating: false,
            metadata: draft.metadata,
        }
    }

    /// Assistant placeholder displayed while generation runs.
    pub fn generating_placeholder(now: DateTime<Utc>) -> Self {
        Self {
            id: crate::new_local_id(),
            content: String::new(),
            role: MessageRole::Assistant,
            timestamp: now,
            images: Vec::new(),
            videos: Vec::new(),
            is_generating: true,
            metadata: None,
        }
    }

    /// True if the ID was synthesized locally rather than by the store.
    pub fn is_local(&self) -> bool {
        self.id.starts_with(LOCAL_ID_PREFIX)
    }
}

/// A message before the store has assigned it an ID and timestamp.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewMessage {
    pub content: String,
    pub role: MessageRole,
    #[serde(default)]
    pub images: Vec<UploadedImage>,
    #[serde(default)]
    pub videos: Vec<UploadedVideo>,
    #[serde(default)]
    pub metadata: Option<Map<String, Value>>,
}

impl NewMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            role: MessageRole::User,
            images: Vec::new(),
            videos: Vec::new(),
            metadata: None,
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::Assistant,
            ..Self::user(content)
        }
    }

    pub fn with_images(mut self, images: Vec<UploadedImage>) -> Self {
        self.images = images;
        self
    }

    pub fn with_videos(mut self, videos: Vec<UploadedVideo>) -> Self {
        self.videos = videos;
        self
    }

    /// All attached media, images first.
    pub fn media(&self) -> impl Iterator<Item = &UploadedMedia> {
        self.images.iter().chain(self.videos.iter())
    }
}

/// Parameters for the video workflow
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VideoParams {
    #[serde(default)]
    pub movement_description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aspect_ratio: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default)]
    pub loop_video: bool,
}

/// One creative workflow thread
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub messages: Vec<Message>,
    #[serde(default)]
    pub is_completed: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub session_type: SessionType,
    #[serde(default)]
    pub metadata: Map<String, Value>,

    // Client-only projection, never sent to the store.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub generated_image_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub generated_video_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_text: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub uploaded_images: Vec<UploadedImage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub video_params: Option<VideoParams>,
}

impl Session {
    /// Apply a client-only projection delta.
    pub fn apply_projection(&mut self, changes: ProjectionChanges) {
        if let Some(url) = changes.generated_image_url {
            self.generated_image_url = url;
        }
        if let Some(url) = changes.generated_video_url {
            self.generated_video_url = url;
        }
        if let Some(prompt) = changes.prompt {
            self.prompt = prompt;
        }
        if let Some(text) = changes.input_text {
            self.input_text = text;
        }
        if let Some(images) = changes.uploaded_images {
            self.uploaded_images = images;
        }
        if let Some(params) = changes.video_params {
            self.video_params = params;
        }
        if let Some(completed) = changes.is_completed {
            self.is_completed = completed;
        }
    }

    /// Apply a delta the store has already confirmed.
    pub fn apply_durable(&mut self, changes: &DurableChanges) {
        if let Some(title) = changes.title.as_deref() {
            let title = title.trim();
            if !title.is_empty() {
                self.title = title.to_string();
            }
        }
    }

    /// True if any workflow-specific transient field carries data.
    pub fn has_projection(&self) -> bool {
        self.generated_image_url.is_some()
            || self.generated_video_url.is_some()
            || self.prompt.is_some()
            || self.input_text.is_some()
            || !self.uploaded_images.is_empty()
            || self.video_params.is_some()
    }
}

/// Fields that round-trip through the remote store.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DurableChanges {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
}

impl DurableChanges {
    pub fn title(title: impl Into<String>) -> Self {
        Self {
            title: Some(title.into()),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.title.is_none()
    }
}

/// Client-only fields layered over a session (delta updates)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProjectionChanges {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub generated_image_url: Option<Option<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub generated_video_url: Option<Option<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prompt: Option<Option<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input_text: Option<Option<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uploaded_images: Option<Vec<UploadedImage>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub video_params: Option<Option<VideoParams>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_completed: Option<bool>,
}
