//! Transport to the remote session store.
//!
//! `SessionStore` is the raw seam: every operation returns the store's
//! outcome unchanged. Fallback policy lives in [`crate::remote`].

use std::sync::Arc;

use async_trait::async_trait;
use reqwest::{Method, RequestBuilder};
use serde::de::DeserializeOwned;
use tracing::debug;

use nino_protocol::{
    CreateSessionRequest, ListMessagesResponse, ListSessionsResponse, Message, SaveMessageRequest,
    SaveMessageResponse, Session, SessionResponse, UpdateSessionRequest,
};

use crate::auth::TokenProvider;
use crate::error::{SyncError, SyncResult};

/// Durable session/message operations offered by the remote store.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Session summaries, newest first. Messages are omitted.
    async fn list_sessions(&self) -> SyncResult<Vec<Session>>;

    /// Create a session; the store assigns ID and timestamps.
    async fn create_session(&self, request: CreateSessionRequest) -> SyncResult<Session>;

    /// Persist the whitelisted session fields.
    async fn update_session(&self, request: UpdateSessionRequest) -> SyncResult<()>;

    /// Permanently delete a session. Unknown IDs are an error.
    async fn delete_session(&self, session_id: &str) -> SyncResult<()>;

    /// Append a message; the store assigns ID and timestamp.
    async fn save_message(&self, request: SaveMessageRequest) -> SyncResult<Message>;

    /// All messages of a session in conversation order.
    async fn load_session_messages(&self, session_id: &str) -> SyncResult<Vec<Message>>;
}

/// `SessionStore` over the edge function HTTP/JSON API.
pub struct HttpSessionStore {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    tokens: Arc<dyn TokenProvider>,
}

impl HttpSessionStore {
    pub fn new(
        base_url: impl Into<String>,
        api_key: Option<String>,
        tokens: Arc<dyn TokenProvider>,
    ) -> Self {
        Self::with_client(reqwest::Client::new(), base_url, api_key, tokens)
    }

    pub fn with_client(
        client: reqwest::Client,
        base_url: impl Into<String>,
        api_key: Option<String>,
        tokens: Arc<dyn TokenProvider>,
    ) -> Self {
        Self {
            client,
            base_url: crate::config::normalize_base_url(&base_url.into()),
            api_key,
            tokens,
        }
    }

    /// Build an authenticated request. Fails before any IO without a token.
    pub(crate) fn request(&self, method: Method, path: &str) -> SyncResult<RequestBuilder> {
        let token = self
            .tokens
            .bearer_token()
            .ok_or(SyncError::AuthUnavailable)?;

        let mut builder = self
            .client
            .request(method, format!("{}{}", self.base_url, path))
            .bearer_auth(token);
        if let Some(key) = &self.api_key {
            builder = builder.header("apikey", key);
        }
        Ok(builder)
    }
}

/// Send a request and decode a JSON body from a 2xx response.
pub(crate) async fn send_json<T: DeserializeOwned>(builder: RequestBuilder) -> SyncResult<T> {
    let resp = builder.send().await?;
    let status = resp.status();
    if !status.is_success() {
        let body = resp.text().await.unwrap_or_default();
        return Err(SyncError::Server {
            status: status.as_u16(),
            body,
        });
    }
    let bytes = resp.bytes().await?;
    Ok(serde_json::from_slice(&bytes)?)
}

/// Send a request whose response body is only an acknowledgement.
pub(crate) async fn send_ack(builder: RequestBuilder) -> SyncResult<()> {
    let resp = builder.send().await?;
    let status = resp.status();
    if !status.is_success() {
        let body = resp.text().await.unwrap_or_default();
        return Err(SyncError::Server {
            status: status.as_u16(),
            body,
        });
    }
    Ok(())
}

#[async_trait]
impl SessionStore for HttpSessionStore {
    async fn list_sessions(&self) -> SyncResult<Vec<Session>> {
        let response: ListSessionsResponse =
            send_json(self.request(Method::GET, "/sessions")?).await?;
        debug!(
            component = "store",
            event = "store.sessions_listed",
            count = response.sessions.len(),
        );
        Ok(response.sessions.into_iter().map(Session::from).collect())
    }

    async fn create_session(&self, request: CreateSessionRequest) -> SyncResult<Session> {
        let builder = self.request(Method::POST, "/sessions")?.json(&request);
        let response: SessionResponse = send_json(builder).await?;
        Ok(Session::from(response.session))
    }

    async fn update_session(&self, request: UpdateSessionRequest) -> SyncResult<()> {
        let path = format!("/sessions/{}", request.session_id);
        send_ack(self.request(Method::POST, &path)?.json(&request)).await
    }

    async fn delete_session(&self, session_id: &str) -> SyncResult<()> {
        let path = format!("/sessions/{session_id}");
        send_ack(self.request(Method::DELETE, &path)?).await
    }

    async fn save_message(&self, request: SaveMessageRequest) -> SyncResult<Message> {
        let builder = self.request(Method::POST, "/messages")?.json(&request);
        let response: SaveMessageResponse = send_json(builder).await?;
        Ok(response.message.into_message(response.attachments))
    }

    async fn load_session_messages(&self, session_id: &str) -> SyncResult<Vec<Message>> {
        let path = format!("/sessions/{session_id}/messages");
        let response: ListMessagesResponse = send_json(self.request(Method::GET, &path)?).await?;
        Ok(response.messages.into_iter().map(Message::from).collect())
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::Mutex;

    use axum::extract::{Path, State};
    use axum::http::{HeaderMap, StatusCode};
    use axum::response::{IntoResponse, Response};
    use axum::routing::{get, post};
    use axum::{Json, Router};
    use serde_json::{json, Value};

    use nino_protocol::{MessageRole, NewMessage, SessionType, UploadedMedia};

    use super::*;
    use crate::auth::StaticToken;

    const TOKEN: &str = "test-jwt";

    #[derive(Clone, Default)]
    struct FakeDb {
        sessions: Arc<Mutex<Vec<Value>>>,
        messages: Arc<Mutex<HashMap<String, Vec<Value>>>>,
        updates: Arc<Mutex<Vec<Value>>>,
    }

    fn authorized(headers: &HeaderMap) -> bool {
        headers
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .is_some_and(|v| v == format!("Bearer {TOKEN}"))
    }

    async fn list_sessions(State(db): State<FakeDb>, headers: HeaderMap) -> Response {
        if !authorized(&headers) {
            return StatusCode::UNAUTHORIZED.into_response();
        }
        let sessions = db.sessions.lock().unwrap().clone();
        Json(json!({ "sessions": sessions })).into_response()
    }

    async fn create_session(
        State(db): State<FakeDb>,
        headers: HeaderMap,
        Json(body): Json<Value>,
    ) -> Response {
        if !authorized(&headers) {
            return StatusCode::UNAUTHORIZED.into_response();
        }
        let mut sessions = db.sessions.lock().unwrap();
        let session = json!({
            "id": format!("srv-{}", sessions.len() + 1),
            "title": body.get("title").cloned().unwrap_or(Value::Null),
            "created_at": "2024-05-01T10:00:00Z",
            "updated_at": "2024-05-01T10:00:00Z",
            "session_type": body["session_type"],
            "session_metadata": body.get("session_metadata").cloned().unwrap_or(json!({})),
        });
        sessions.insert(0, session.clone());
        Json(json!({ "session": session })).into_response()
    }

    async fn update_session(
        State(db): State<FakeDb>,
        Path(id): Path<String>,
        Json(body): Json<Value>,
    ) -> Response {
        db.updates.lock().unwrap().push(body);
        let exists = db.sessions.lock().unwrap().iter().any(|s| s["id"] == id);
        if exists {
            Json(json!({ "success": true })).into_response()
        } else {
            StatusCode::NOT_FOUND.into_response()
        }
    }

    async fn delete_session(State(db): State<FakeDb>, Path(id): Path<String>) -> Response {
        let mut sessions = db.sessions.lock().unwrap();
        let before = sessions.len();
        sessions.retain(|s| s["id"] != id);
        if sessions.len() == before {
            (StatusCode::NOT_FOUND, "session not found").into_response()
        } else {
            Json(json!({ "success": true })).into_response()
        }
    }

    async fn list_messages(State(db): State<FakeDb>, Path(id): Path<String>) -> Response {
        let messages = db
            .messages
            .lock()
            .unwrap()
            .get(&id)
            .cloned()
            .unwrap_or_default();
        Json(json!({ "messages": messages })).into_response()
    }

    async fn save_message(State(db): State<FakeDb>, Json(body): Json<Value>) -> Response {
        let session_id = body["session_id"].as_str().unwrap_or_default().to_string();
        let mut messages = db.messages.lock().unwrap();
        let entry = messages.entry(session_id.clone()).or_default();
        let message = json!({
            "id": format!("m-{}", entry.len() + 1),
            "session_id": session_id,
            "message_type": body["message_type"],
            "content": body["content"],
            "created_at": "2024-05-01T10:01:00Z",
        });
        entry.push(message.clone());
        let attachments: Vec<Value> = body
            .get("attachments")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        Json(json!({ "message": message, "attachments": attachments })).into_response()
    }

    async fn spawn_fake_store(db: FakeDb) -> String {
        let app = Router::new()
            .route("/sessions", get(list_sessions).post(create_session))
            .route(
                "/sessions/{id}",
                post(update_session).delete(delete_session),
            )
            .route("/sessions/{id}/messages", get(list_messages))
            .route("/messages", post(save_message))
            .with_state(db);

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}/")
    }

    fn store(base_url: &str, token: Option<&str>) -> HttpSessionStore {
        HttpSessionStore::new(
            base_url,
            Some("anon-key".to_string()),
            Arc::new(StaticToken::new(token.map(str::to_string))),
        )
    }

    #[tokio::test]
    async fn create_then_list_round_trips_through_store() {
        let base = spawn_fake_store(FakeDb::default()).await;
        let store = store(&base, Some(TOKEN));

        let created = store
            .create_session(CreateSessionRequest {
                title: None,
                session_type: SessionType::Enhance,
                session_metadata: None,
            })
            .await
            .unwrap();
        assert_eq!(created.id, "srv-1");
        assert_eq!(created.title, nino_protocol::DEFAULT_SESSION_TITLE);

        let sessions = store.list_sessions().await.unwrap();
        assert_eq!(sessions.len(), 1);
        assert_eq!(sessions[0].session_type, SessionType::Enhance);
    }

    #[tokio::test]
    async fn missing_token_fails_before_any_request() {
        let db = FakeDb::default();
        let base = spawn_fake_store(db.clone()).await;
        let store = store(&base, None);

        let err = store
            .update_session(UpdateSessionRequest {
                session_id: "srv-1".to_string(),
                title: Some("x".to_string()),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::AuthUnavailable));
        assert!(db.updates.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn rejected_token_surfaces_server_status() {
        let base = spawn_fake_store(FakeDb::default()).await;
        let store = store(&base, Some("wrong"));

        let err = store.list_sessions().await.unwrap_err();
        assert!(matches!(err, SyncError::Server { status: 401, .. }));
    }

    #[tokio::test]
    async fn deleting_unknown_session_is_an_error() {
        let base = spawn_fake_store(FakeDb::default()).await;
        let store = store(&base, Some(TOKEN));

        let err = store.delete_session("missing").await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn update_only_transmits_title() {
        let db = FakeDb::default();
        let base = spawn_fake_store(db.clone()).await;
        let store = store(&base, Some(TOKEN));
        let created = store
            .create_session(CreateSessionRequest {
                title: Some("Spa".to_string()),
                session_type: SessionType::Chat,
                session_metadata: None,
            })
            .await
            .unwrap();

        store
            .update_session(UpdateSessionRequest {
                session_id: created.id.clone(),
                title: Some("Spa weekend".to_string()),
            })
            .await
            .unwrap();

        let updates = db.updates.lock().unwrap();
        assert_eq!(
            updates[0],
            json!({ "session_id": created.id, "title": "Spa weekend" })
        );
    }

    #[tokio::test]
    async fn saved_messages_come_back_with_store_ids() {
        let base = spawn_fake_store(FakeDb::default()).await;
        let store = store(&base, Some(TOKEN));

        let image = UploadedMedia::remote("pool.png", "https://cdn.example.com/pool.png");
        let draft = NewMessage::user("brighten the pool").with_images(vec![image]);
        let saved = store
            .save_message(SaveMessageRequest::from_new_message("srv-1", &draft))
            .await
            .unwrap();
        assert_eq!(saved.id, "m-1");
        assert_eq!(saved.role, MessageRole::User);
        assert_eq!(saved.images[0].url, "https://cdn.example.com/pool.png");

        let loaded = store.load_session_messages("srv-1").await.unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].content, "brighten the pool");
    }
}
