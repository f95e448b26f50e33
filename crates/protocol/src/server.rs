//! Store → Client response bodies

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::types::*;

/// A session row as returned by the store (messages omitted)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionRecord {
    pub id: String,
    #[serde(default)]
    pub title: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub session_type: SessionType,
    #[serde(default)]
    pub session_metadata: Option<Map<String, Value>>,
    #[serde(default)]
    pub is_completed: bool,
}

impl From<SessionRecord> for Session {
    fn from(record: SessionRecord) -> Self {
        let title = record
            .title
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
            .unwrap_or_else(|| DEFAULT_SESSION_TITLE.to_string());

        Session {
            id: record.id,
            title,
            messages: Vec::new(),
            is_completed: record.is_completed,
            created_at: record.created_at,
            updated_at: record.updated_at,
            session_type: record.session_type,
            metadata: record.session_metadata.unwrap_or_default(),
            generated_image_url: None,
            generated_video_url: None,
            prompt: None,
            input_text: None,
            uploaded_images: Vec::new(),
            video_params: None,
        }
    }
}

/// `GET /sessions`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListSessionsResponse {
    #[serde(default)]
    pub sessions: Vec<SessionRecord>,
}

/// `POST /sessions`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionResponse {
    pub session: SessionRecord,
}

/// Attachment row linked to a stored message
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttachmentRecord {
    #[serde(default)]
    pub id: Option<String>,
    pub file_url: String,
    #[serde(default)]
    pub file_name: Option<String>,
    #[serde(default)]
    pub file_type: Option<String>,
    #[serde(default)]
    pub file_size: Option<u64>,
}

impl AttachmentRecord {
    pub fn is_video(&self) -> bool {
        if let Some(kind) = self.file_type.as_deref() {
            return kind.starts_with("video/");
        }
        let url = self.file_url.to_ascii_lowercase();
        [".mp4", ".mov", ".webm", ".m4v"]
            .iter()
            .any(|ext| url.ends_with(ext))
    }

    fn into_media(self) -> UploadedMedia {
        let name = self.file_name.unwrap_or_else(|| {
            self.file_url
                .rsplit('/')
                .next()
                .unwrap_or("attachment")
                .to_string()
        });
        UploadedMedia {
            id: self.id.unwrap_or_else(crate::new_id),
            name,
            url: self.file_url,
            local_path: None,
            size: self.file_size,
            content_type: self.file_type,
            is_generated: false,
            generation_prompt: None,
        }
    }
}

/// A message row as returned by the store
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageRecord {
    pub id: String,
    #[serde(default)]
    pub session_id: Option<String>,
    pub message_type: MessageRole,
    #[serde(default)]
    pub content: String,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub metadata: Option<Map<String, Value>>,
    #[serde(default)]
    pub attachments: Vec<AttachmentRecord>,
}

impl MessageRecord {
    /// Convert into a domain message, splitting attachments by media kind.
    pub fn into_message(self, extra_attachments: Vec<AttachmentRecord>) -> Message {
        let mut images = Vec::new();
        let mut videos = Vec::new();
        for attachment in self.attachments.into_iter().chain(extra_attachments) {
            if attachment.is_video() {
                videos.push(attachment.into_media());
            } else {
                images.push(attachment.into_media());
            }
        }

        Message {
            id: self.id,
            content: self.content,
            role: self.message_type,
            timestamp: self.created_at,
            images,
            videos,
            is_generating: false,
            metadata: self.metadata,
        }
    }
}

impl From<MessageRecord> for Message {
    fn from(record: MessageRecord) -> Self {
        record.into_message(Vec::new())
    }
}

/// `GET /sessions/{id}/messages`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListMessagesResponse {
    #[serde(default)]
    pub messages: Vec<MessageRecord>,
}

/// `POST /messages`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SaveMessageResponse {
    pub message: MessageRecord,
    #[serde(default)]
    pub attachments: Vec<AttachmentRecord>,
}

/// `POST /upload-media`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadMediaResponse {
    pub url: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_record_defaults_blank_title() {
        let json = r#"{
          "id":"6f1c",
          "title":"  ",
          "created_at":"2024-05-01T10:00:00Z",
          "updated_at":"2024-05-01T10:05:00Z",
          "session_type":"video"
        }"#;

        let record: SessionRecord = serde_json::from_str(json).expect("parse session record");
        let session = Session::from(record);
        assert_eq!(session.title, DEFAULT_SESSION_TITLE);
        assert_eq!(session.session_type, SessionType::Video);
        assert!(session.metadata.is_empty());
        assert!(session.messages.is_empty());
    }

    #[test]
    fn saved_message_splits_attachments_by_kind() {
        let json = r#"{
          "message": {
            "id":"msg-1",
            "session_id":"sess-1",
            "message_type":"assistant",
            "content":"Here is your video",
            "created_at":"2024-05-01T10:00:00Z"
          },
          "attachments": [
            {"file_url":"https://cdn.example.com/a.png","file_type":"image/png"},
            {"file_url":"https://cdn.example.com/tour.mp4"}
          ]
        }"#;

        let response: SaveMessageResponse = serde_json::from_str(json).expect("parse save");
        let message = response.message.into_message(response.attachments);

        assert_eq!(message.role, MessageRole::Assistant);
        assert_eq!(message.images.len(), 1);
        assert_eq!(message.videos.len(), 1);
        assert_eq!(message.videos[0].name, "tour.mp4");
        assert!(!message.is_local());
    }
}
