//! Uploads transient media references and swaps in durable URLs before a
//! message reaches the store.

use std::sync::Arc;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use reqwest::Method;
use tracing::{debug, warn};

use nino_protocol::{NewMessage, UploadMediaRequest, UploadMediaResponse, UploadedMedia};

use crate::error::{SyncError, SyncResult};
use crate::store::{send_json, HttpSessionStore};

/// Raw bytes of a transient media reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaPayload {
    pub file_name: String,
    pub content_type: String,
    pub bytes: Vec<u8>,
}

/// Uploads media and returns the durable URL it is reachable at.
#[async_trait]
pub trait MediaUploader: Send + Sync {
    async fn upload(&self, session_id: &str, payload: MediaPayload) -> SyncResult<String>;
}

#[async_trait]
impl MediaUploader for HttpSessionStore {
    async fn upload(&self, session_id: &str, payload: MediaPayload) -> SyncResult<String> {
        let body = UploadMediaRequest {
            session_id: session_id.to_string(),
            file_name: payload.file_name,
            content_type: payload.content_type,
            data: STANDARD.encode(&payload.bytes),
        };
        let builder = self.request(Method::POST, "/upload-media")?.json(&body);
        let response: UploadMediaResponse = send_json(builder).await?;
        if !nino_protocol::is_durable_url(&response.url) {
            return Err(SyncError::Media(format!(
                "upload returned non-durable url: {}",
                response.url
            )));
        }
        Ok(response.url)
    }
}

/// Replace every transient reference in `message` with a durable URL.
///
/// Uploads run concurrently. Any failure aborts with the first error and
/// leaves `message` untouched, so it never mixes durable and transient media
/// for a durable save.
pub async fn persist_media(
    uploader: &Arc<dyn MediaUploader>,
    session_id: &str,
    message: &mut NewMessage,
) -> SyncResult<usize> {
    let transient: Vec<UploadedMedia> = message
        .media()
        .filter(|m| m.is_transient())
        .cloned()
        .collect();
    if transient.is_empty() {
        return Ok(0);
    }

    let uploads = transient.iter().map(|media| async move {
        let payload = read_payload(media).await?;
        let size = payload.bytes.len() as u64;
        let content_type = payload.content_type.clone();
        let url = uploader.upload(session_id, payload).await?;
        Ok::<_, SyncError>((media.id.clone(), url, size, content_type))
    });
    let uploaded = futures::future::try_join_all(uploads).await?;

    for (id, url, size, content_type) in &uploaded {
        let target = message
            .images
            .iter_mut()
            .chain(message.videos.iter_mut())
            .find(|m| &m.id == id);
        if let Some(media) = target {
            debug!(
                component = "media",
                event = "media.uploaded",
                session_id = %session_id,
                media_id = %id,
                size = size,
            );
            media.url = url.clone();
            media.local_path = None;
            media.size = media.size.or(Some(*size));
            media.content_type = media.content_type.clone().or(Some(content_type.clone()));
        }
    }

    Ok(uploaded.len())
}

/// Load the bytes behind a transient reference.
pub async fn read_payload(media: &UploadedMedia) -> SyncResult<MediaPayload> {
    if media.url.starts_with("data:") {
        let (content_type, bytes) = decode_data_uri(&media.url)?;
        return Ok(MediaPayload {
            file_name: file_name_for(&media.name, &content_type),
            content_type,
            bytes,
        });
    }

    let path = match &media.local_path {
        Some(path) => path.clone(),
        None => match media.url.strip_prefix("file://") {
            Some(path) => path.into(),
            None if !media.url.contains(':') => media.url.clone().into(),
            None => {
                warn!(
                    component = "media",
                    event = "media.unreadable",
                    media_id = %media.id,
                    url = %media.url,
                    "Transient media has no local file to upload"
                );
                return Err(SyncError::Media(format!(
                    "no local file behind {}",
                    media.url
                )));
            }
        },
    };

    let bytes = tokio::fs::read(&path).await?;
    let content_type = media
        .content_type
        .clone()
        .unwrap_or_else(|| mime_from_path(&path.to_string_lossy()).to_string());
    Ok(MediaPayload {
        file_name: media.name.clone(),
        content_type,
        bytes,
    })
}

/// Parse `data:<mime>;base64,<data>`.
pub fn decode_data_uri(data_uri: &str) -> SyncResult<(String, Vec<u8>)> {
    let without_scheme = data_uri
        .strip_prefix("data:")
        .ok_or_else(|| SyncError::Media("missing data: prefix".into()))?;

    let comma_pos = without_scheme
        .find(',')
        .ok_or_else(|| SyncError::Media("missing comma in data URI".into()))?;

    let meta = &without_scheme[..comma_pos];
    let base64_data = &without_scheme[comma_pos + 1..];

    let mime_type = meta
        .strip_suffix(";base64")
        .ok_or_else(|| SyncError::Media("not a base64 data URI".into()))?;

    let bytes = STANDARD
        .decode(base64_data)
        .map_err(|e| SyncError::Media(format!("base64 decode: {e}")))?;

    let mime_type = if mime_type.is_empty() {
        "application/octet-stream"
    } else {
        mime_type
    };
    Ok((mime_type.to_string(), bytes))
}

fn file_name_for(name: &str, content_type: &str) -> String {
    if name.contains('.') {
        return name.to_string();
    }
    format!("{name}.{}", mime_to_extension(content_type))
}

fn mime_to_extension(mime: &str) -> &str {
    match mime {
        "image/png" => "png",
        "image/jpeg" => "jpg",
        "image/gif" => "gif",
        "image/webp" => "webp",
        "video/mp4" => "mp4",
        "video/quicktime" => "mov",
        "video/webm" => "webm",
        _ => "bin",
    }
}

fn mime_from_path(path: &str) -> &'static str {
    let lower = path.to_ascii_lowercase();
    let ext = lower.rsplit('.').next().unwrap_or_default();
    match ext {
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "mp4" | "m4v" => "video/mp4",
        "mov" => "video/quicktime",
        "webm" => "video/webm",
        _ => "application/octet-stream",
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;

    #[derive(Default)]
    struct RecordingUploader {
        uploads: Mutex<Vec<MediaPayload>>,
        fail: bool,
    }

    #[async_trait]
    impl MediaUploader for RecordingUploader {
        async fn upload(&self, _session_id: &str, payload: MediaPayload) -> SyncResult<String> {
            if self.fail {
                return Err(SyncError::Server {
                    status: 500,
                    body: "storage down".into(),
                });
            }
            let url = format!("https://cdn.example.com/{}", payload.file_name);
            self.uploads.lock().unwrap().push(payload);
            Ok(url)
        }
    }

    fn data_uri_image() -> UploadedMedia {
        let mut media = UploadedMedia::remote("lobby", "data:image/png;base64,iVBORw0KGgo=");
        media.id = "img-1".to_string();
        media
    }

    #[test]
    fn decodes_base64_data_uri() {
        let (mime, bytes) = decode_data_uri("data:image/png;base64,aGVsbG8=").unwrap();
        assert_eq!(mime, "image/png");
        assert_eq!(bytes, b"hello");

        assert!(decode_data_uri("data:text/plain,hello").is_err());
        assert!(decode_data_uri("blob:abc").is_err());
    }

    #[tokio::test]
    async fn replaces_transient_urls_with_durable_ones() {
        let recorder = Arc::new(RecordingUploader::default());
        let uploader: Arc<dyn MediaUploader> = recorder.clone();

        let durable = UploadedMedia::remote("kept.png", "https://cdn.example.com/kept.png");
        let mut message =
            NewMessage::user("make this beautiful").with_images(vec![data_uri_image(), durable]);

        let count = persist_media(&uploader, "sess-1", &mut message).await.unwrap();

        assert_eq!(count, 1);
        assert_eq!(message.images[0].url, "https://cdn.example.com/lobby.png");
        assert_eq!(message.images[0].content_type.as_deref(), Some("image/png"));
        assert_eq!(message.images[1].url, "https://cdn.example.com/kept.png");
        assert_eq!(recorder.uploads.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn reads_local_files_for_file_references() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("terrace.jpg");
        std::fs::write(&path, b"jpeg-bytes").unwrap();

        let payload = read_payload(&UploadedMedia::local_file(&path)).await.unwrap();
        assert_eq!(payload.bytes, b"jpeg-bytes");
        assert_eq!(payload.content_type, "image/jpeg");
        assert_eq!(payload.file_name, "terrace.jpg");
    }

    #[tokio::test]
    async fn failed_upload_leaves_message_untouched() {
        let uploader: Arc<dyn MediaUploader> = Arc::new(RecordingUploader {
            fail: true,
            ..Default::default()
        });
        let mut message = NewMessage::user("hi").with_images(vec![data_uri_image()]);

        let err = persist_media(&uploader, "sess-1", &mut message).await;
        assert!(err.is_err());
        assert!(message.images[0].is_transient());
    }

    #[tokio::test]
    async fn blob_reference_without_file_cannot_be_uploaded() {
        let media = UploadedMedia::remote("x", "blob:https://app/1234");
        assert!(matches!(
            read_payload(&media).await,
            Err(SyncError::Media(_))
        ));
    }
}
