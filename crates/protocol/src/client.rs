//! Client → Store request bodies

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::types::{MessageRole, NewMessage, SessionType, UploadedMedia};

/// `POST /sessions`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateSessionRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    pub session_type: SessionType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_metadata: Option<Map<String, Value>>,
}

/// `POST /sessions/{id}`. Only the title is accepted for persistence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateSessionRequest {
    pub session_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
}

/// `POST /messages`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SaveMessageRequest {
    pub session_id: String,
    pub message_type: MessageRole,
    pub content: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attachments: Vec<AttachmentInput>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Map<String, Value>>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub images: Vec<String>,
}

impl SaveMessageRequest {
    pub fn from_new_message(session_id: &str, message: &NewMessage) -> Self {
        Self {
            session_id: session_id.to_string(),
            message_type: message.role,
            content: message.content.clone(),
            attachments: message.media().map(AttachmentInput::from_media).collect(),
            metadata: message.metadata.clone(),
            images: message.images.iter().map(|img| img.url.clone()).collect(),
        }
    }
}

/// Attachment metadata sent alongside a message
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttachmentInput {
    pub file_url: String,
    pub file_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_size: Option<u64>,
}

impl AttachmentInput {
    pub fn from_media(media: &UploadedMedia) -> Self {
        Self {
            file_url: media.url.clone(),
            file_name: media.name.clone(),
            file_type: media.content_type.clone(),
            file_size: media.size,
        }
    }
}

/// `POST /upload-media`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadMediaRequest {
    pub session_id: String,
    pub file_name: String,
    pub content_type: String,
    /// Base64 (standard alphabet) file contents
    pub data: String,
}
