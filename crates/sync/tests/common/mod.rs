//! Fake session store served over HTTP for end-to-end tests.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{json, Value};
use tokio::sync::Notify;

use nino_sync::{
    HttpSessionStore, MediaUploader, RemoteSessionClient, SessionRegistry, StaticToken,
};

pub const TOKEN: &str = "scenario-jwt";
pub const CDN: &str = "https://cdn.nino.test";

#[derive(Clone, Default)]
pub struct FakeStore {
    sessions: Arc<Mutex<Vec<Value>>>,
    messages: Arc<Mutex<HashMap<String, Vec<Value>>>>,
    creates: Arc<AtomicUsize>,
    uploads: Arc<AtomicUsize>,
    upload_gate: Arc<Mutex<Option<Arc<Notify>>>>,
}

impl FakeStore {
    pub fn seed_session(&self, id: &str, title: &str, session_type: &str) {
        self.sessions.lock().unwrap().insert(
            0,
            json!({
                "id": id,
                "title": title,
                "created_at": "2024-05-01T10:00:00Z",
                "updated_at": "2024-05-01T10:00:00Z",
                "session_type": session_type,
                "session_metadata": {},
            }),
        );
    }

    pub fn seed_assistant_message(&self, session_id: &str, content: &str) {
        let mut messages = self.messages.lock().unwrap();
        let entry = messages.entry(session_id.to_string()).or_default();
        entry.push(json!({
            "id": format!("greeting-{}", entry.len() + 1),
            "session_id": session_id,
            "message_type": "assistant",
            "content": content,
            "created_at": "2024-05-01T10:00:01Z",
        }));
    }

    pub fn create_count(&self) -> usize {
        self.creates.load(Ordering::SeqCst)
    }

    pub fn upload_count(&self) -> usize {
        self.uploads.load(Ordering::SeqCst)
    }

    /// Hold uploads until the returned gate is notified.
    pub fn gate_uploads(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        *self.upload_gate.lock().unwrap() = Some(gate.clone());
        gate
    }

    pub async fn spawn(&self) -> String {
        let app = Router::new()
            .route("/sessions", get(list_sessions).post(create_session))
            .route("/sessions/{id}", post(update_session).delete(delete_session))
            .route("/sessions/{id}/messages", get(list_messages))
            .route("/messages", post(save_message))
            .route("/upload-media", post(upload_media))
            .with_state(self.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}")
    }
}

/// Registry wired to the fake store over HTTP, bound to `user-1`.
pub async fn connected_registry(store: &FakeStore) -> Arc<SessionRegistry> {
    let base = store.spawn().await;
    let http = Arc::new(HttpSessionStore::new(
        base,
        Some("anon-key".to_string()),
        Arc::new(StaticToken::new(Some(TOKEN.to_string()))),
    ));
    let uploader: Arc<dyn MediaUploader> = http.clone();
    let registry = Arc::new(SessionRegistry::new(RemoteSessionClient::new(
        http,
        Some(uploader),
    )));
    registry.bind("user-1").await;
    registry
}

fn authorized(headers: &HeaderMap) -> bool {
    headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v == format!("Bearer {TOKEN}"))
}

async fn list_sessions(State(db): State<FakeStore>, headers: HeaderMap) -> Response {
    if !authorized(&headers) {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    let sessions = db.sessions.lock().unwrap().clone();
    Json(json!({ "sessions": sessions })).into_response()
}

async fn create_session(
    State(db): State<FakeStore>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    if !authorized(&headers) {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    let n = db.creates.fetch_add(1, Ordering::SeqCst) + 1;
    let session = json!({
        "id": format!("srv-{n}"),
        "title": body.get("title").cloned().unwrap_or(Value::Null),
        "created_at": "2024-05-01T11:00:00Z",
        "updated_at": "2024-05-01T11:00:00Z",
        "session_type": body["session_type"],
        "session_metadata": body.get("session_metadata").cloned().unwrap_or(json!({})),
    });
    db.sessions.lock().unwrap().insert(0, session.clone());
    Json(json!({ "session": session })).into_response()
}

async fn update_session(
    State(db): State<FakeStore>,
    Path(id): Path<String>,
    Json(body): Json<Value>,
) -> Response {
    let mut sessions = db.sessions.lock().unwrap();
    match sessions.iter_mut().find(|s| s["id"] == id) {
        Some(session) => {
            if let Some(title) = body.get("title") {
                session["title"] = title.clone();
            }
            Json(json!({ "success": true })).into_response()
        }
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

async fn delete_session(State(db): State<FakeStore>, Path(id): Path<String>) -> Response {
    let mut sessions = db.sessions.lock().unwrap();
    let before = sessions.len();
    sessions.retain(|s| s["id"] != id);
    if sessions.len() == before {
        StatusCode::NOT_FOUND.into_response()
    } else {
        Json(json!({ "success": true })).into_response()
    }
}

async fn list_messages(State(db): State<FakeStore>, Path(id): Path<String>) -> Response {
    let messages = db
        .messages
        .lock()
        .unwrap()
        .get(&id)
        .cloned()
        .unwrap_or_default();
    Json(json!({ "messages": messages })).into_response()
}

async fn save_message(State(db): State<FakeStore>, Json(body): Json<Value>) -> Response {
    let session_id = body["session_id"].as_str().unwrap_or_default().to_string();
    let mut messages = db.messages.lock().unwrap();
    let entry = messages.entry(session_id.clone()).or_default();
    let message = json!({
        "id": format!("msg-{}", entry.len() + 1),
        "session_id": session_id,
        "message_type": body["message_type"],
        "content": body["content"],
        "created_at": "2024-05-01T11:01:00Z",
    });
    entry.push(message.clone());
    let attachments = body.get("attachments").cloned().unwrap_or(json!([]));
    Json(json!({ "message": message, "attachments": attachments })).into_response()
}

async fn upload_media(State(db): State<FakeStore>, Json(body): Json<Value>) -> Response {
    let gate = db.upload_gate.lock().unwrap().clone();
    if let Some(gate) = gate {
        gate.notified().await;
    }
    db.uploads.fetch_add(1, Ordering::SeqCst);
    let url = format!(
        "{CDN}/{}/{}",
        body["session_id"].as_str().unwrap_or_default(),
        body["file_name"].as_str().unwrap_or_default()
    );
    Json(json!({ "url": url })).into_response()
}
