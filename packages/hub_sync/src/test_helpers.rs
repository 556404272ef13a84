use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Mutex as StdMutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use axum::{
    Json, Router,
    extract::{
        Path, State, WebSocketUpgrade,
        ws::{Message as WsMessage, WebSocket},
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use futures::{SinkExt, StreamExt};
use serde_json::{Value, json};
use tokio::sync::{Mutex, broadcast, mpsc};

use crate::api::HubApi;
use crate::config::StreamConfig;
use crate::connection::ConnectionHandle;
use crate::engine::SyncEngine;
use crate::error::ApiError;
use crate::models::{
    Message, Role, SendChatRequest, SendChatResponse, Session, SessionTokenUsage,
    TokenUsageRecord, TokenUsageStats,
};
use crate::protocol::ClientCommand;

// =============================================================================
// Fake hub: HTTP routes + /ws/chat on 127.0.0.1:0
// =============================================================================

#[derive(Clone, Debug)]
enum HubFrame {
    Text(String),
    Kick,
}

#[derive(Clone)]
struct HubState {
    sent_bodies: Arc<Mutex<Vec<Value>>>,
    commands: Arc<Mutex<Vec<Value>>>,
    frames: broadcast::Sender<HubFrame>,
    connections: Arc<AtomicUsize>,
}

pub struct FakeHub {
    pub port: u16,
    /// JSON bodies posted to `/chat/send`.
    pub sent_bodies: Arc<Mutex<Vec<Value>>>,
    /// Control messages received over the websocket.
    pub commands: Arc<Mutex<Vec<Value>>>,
    frames: broadcast::Sender<HubFrame>,
    connections: Arc<AtomicUsize>,
    _shutdown: tokio::sync::oneshot::Sender<()>,
}

impl FakeHub {
    pub fn ws_url(&self) -> String {
        format!("ws://127.0.0.1:{}/ws/chat", self.port)
    }

    /// Push a text frame to every open socket.
    pub fn broadcast(&self, text: &str) {
        let _ = self.frames.send(HubFrame::Text(text.to_string()));
    }

    /// Close every open socket from the server side.
    pub fn kick(&self) {
        let _ = self.frames.send(HubFrame::Kick);
    }

    pub fn connection_count(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }

    pub async fn wait_for_commands(&self, n: usize) {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        while self.commands.lock().await.len() < n {
            assert!(
                tokio::time::Instant::now() < deadline,
                "timed out waiting for {n} commands"
            );
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }
}

pub fn session(id: i64, title: &str) -> Session {
    Session {
        id,
        title: title.to_string(),
        ..Default::default()
    }
}

fn usage_for(session_id: i64) -> SessionTokenUsage {
    let record = TokenUsageRecord {
        id: 1,
        session_id,
        message_id: 70,
        input_tokens: 12,
        output_tokens: 3,
        ..Default::default()
    };
    let mut stats = TokenUsageStats::default();
    stats.add(&record);
    SessionTokenUsage {
        stats,
        records: vec![record],
    }
}

pub async fn spawn_hub() -> FakeHub {
    let (frames, _) = broadcast::channel(64);
    let state = HubState {
        sent_bodies: Arc::new(Mutex::new(Vec::new())),
        commands: Arc::new(Mutex::new(Vec::new())),
        frames,
        connections: Arc::new(AtomicUsize::new(0)),
    };

    let api = Router::new()
        .route(
            "/sessions",
            get(|| async { Json(vec![session(9, "Older"), session(7, "Newer")]) }),
        )
        .route(
            "/sessions/{id}",
            axum::routing::delete(|| async { StatusCode::NO_CONTENT }).put(
                |Path(id): Path<i64>, Json(body): Json<Value>| async move {
                    let mut s = session(id, "Switched");
                    s.provider_id = body["provider_id"].as_str().unwrap_or_default().to_string();
                    Json(s)
                },
            ),
        )
        .route(
            "/sessions/{id}/messages",
            get(|Path(id): Path<i64>| async move {
                Json(vec![
                    Message::new(id * 10, id, Role::User, "question"),
                    Message::new(id * 10 + 1, id, Role::Assistant, "answer"),
                ])
            }),
        )
        .route(
            "/sessions/{id}/compress",
            post(|| async {
                (
                    StatusCode::CONFLICT,
                    Json(json!({ "error": "session is currently streaming" })),
                )
            }),
        )
        .route("/chat/send", post(chat_send))
        .route(
            "/token-usage/session/{id}",
            get(|Path(id): Path<i64>| async move { Json(usage_for(id)) }),
        );

    let app = Router::new()
        .nest("/api/v1", api)
        .route("/ws/chat", get(ws_chat))
        .with_state(state.clone());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let (tx, rx) = tokio::sync::oneshot::channel::<()>();
    tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async {
                let _ = rx.await;
            })
            .await
            .unwrap();
    });

    FakeHub {
        port,
        sent_bodies: state.sent_bodies,
        commands: state.commands,
        frames: state.frames,
        connections: state.connections,
        _shutdown: tx,
    }
}

async fn chat_send(State(state): State<HubState>, Json(body): Json<Value>) -> Json<Value> {
    let requested = body["session_id"].as_i64().unwrap_or_default();
    state.sent_bodies.lock().await.push(body);
    let session_id = if requested == 0 { 7 } else { requested };
    Json(json!({ "session_id": session_id, "status": "ok" }))
}

async fn ws_chat(State(state): State<HubState>, ws: WebSocketUpgrade) -> Response {
    // Subscribe before the upgrade completes so frames broadcast right after
    // the client sees the open are not lost.
    let frames = state.frames.subscribe();
    state.connections.fetch_add(1, Ordering::SeqCst);
    ws.on_upgrade(move |socket| hub_socket(socket, frames, state.commands))
        .into_response()
}

async fn hub_socket(
    socket: WebSocket,
    mut frames: broadcast::Receiver<HubFrame>,
    commands: Arc<Mutex<Vec<Value>>>,
) {
    let (mut tx, mut rx) = socket.split();
    loop {
        tokio::select! {
            frame = frames.recv() => match frame {
                Ok(HubFrame::Text(text)) => {
                    if tx.send(WsMessage::Text(text.into())).await.is_err() {
                        break;
                    }
                }
                Ok(HubFrame::Kick) => {
                    let _ = tx.send(WsMessage::Close(None)).await;
                    break;
                }
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => break,
            },
            msg = rx.next() => match msg {
                Some(Ok(WsMessage::Text(text))) => {
                    if let Ok(value) = serde_json::from_str::<Value>(text.as_str()) {
                        commands.lock().await.push(value);
                    }
                }
                Some(Ok(WsMessage::Close(_))) | Some(Err(_)) | None => break,
                Some(Ok(_)) => {}
            },
        }
    }
}

// =============================================================================
// In-memory collaborator for engine tests
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApiCall {
    ListSessions,
    ListMessages(i64),
    SendChat {
        session_id: i64,
        content: String,
        work_dir: Option<String>,
        group_name: Option<String>,
    },
    Delete(i64),
    Compress(i64),
    SwitchProvider(i64, String),
    TokenUsage(i64),
}

/// Records every call; answers from canned data.
#[derive(Default)]
pub struct FakeApi {
    pub sessions: StdMutex<Vec<Session>>,
    pub messages: StdMutex<HashMap<i64, Vec<Message>>>,
    pub usage: StdMutex<HashMap<i64, SessionTokenUsage>>,
    /// Id returned when a send creates a session.
    pub created_id: StdMutex<i64>,
    pub fail_sends: AtomicBool,
    pub fail_messages: AtomicBool,
    calls: StdMutex<Vec<ApiCall>>,
}

impl FakeApi {
    pub fn new() -> Self {
        Self {
            created_id: StdMutex::new(7),
            ..Default::default()
        }
    }

    pub fn with_sessions(self, sessions: Vec<Session>) -> Self {
        *self.sessions.lock().unwrap() = sessions;
        self
    }

    pub fn with_messages(self, session_id: i64, messages: Vec<Message>) -> Self {
        self.messages.lock().unwrap().insert(session_id, messages);
        self
    }

    pub fn calls(&self) -> Vec<ApiCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn count(&self, call: &ApiCall) -> usize {
        self.calls.lock().unwrap().iter().filter(|c| *c == call).count()
    }

    fn log(&self, call: ApiCall) {
        self.calls.lock().unwrap().push(call);
    }
}

impl HubApi for FakeApi {
    async fn list_sessions(&self) -> Result<Vec<Session>, ApiError> {
        self.log(ApiCall::ListSessions);
        Ok(self.sessions.lock().unwrap().clone())
    }

    async fn list_messages(&self, session_id: i64) -> Result<Vec<Message>, ApiError> {
        self.log(ApiCall::ListMessages(session_id));
        if self.fail_messages.load(Ordering::SeqCst) {
            return Err(ApiError::Status {
                status: 500,
                message: "database is locked".to_string(),
            });
        }
        Ok(self
            .messages
            .lock()
            .unwrap()
            .get(&session_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn send_chat(&self, req: SendChatRequest<'_>) -> Result<SendChatResponse, ApiError> {
        self.log(ApiCall::SendChat {
            session_id: req.session_id,
            content: req.content.to_string(),
            work_dir: req.work_dir.map(str::to_string),
            group_name: req.group_name.map(str::to_string),
        });
        if self.fail_sends.load(Ordering::SeqCst) {
            return Err(ApiError::Unavailable);
        }
        let session_id = if req.session_id == 0 {
            *self.created_id.lock().unwrap()
        } else {
            req.session_id
        };
        Ok(SendChatResponse {
            session_id,
            status: "ok".to_string(),
        })
    }

    async fn delete_session(&self, session_id: i64) -> Result<(), ApiError> {
        self.log(ApiCall::Delete(session_id));
        self.sessions.lock().unwrap().retain(|s| s.id != session_id);
        Ok(())
    }

    async fn compress_session(&self, session_id: i64) -> Result<(), ApiError> {
        self.log(ApiCall::Compress(session_id));
        Ok(())
    }

    async fn switch_provider(&self, session_id: i64, provider_id: &str) -> Result<Session, ApiError> {
        self.log(ApiCall::SwitchProvider(session_id, provider_id.to_string()));
        let mut sessions = self.sessions.lock().unwrap();
        let entry = sessions.iter_mut().find(|s| s.id == session_id);
        match entry {
            Some(s) => {
                s.provider_id = provider_id.to_string();
                Ok(s.clone())
            }
            None => Err(ApiError::Status {
                status: 404,
                message: "session not found".to_string(),
            }),
        }
    }

    async fn session_token_usage(&self, session_id: i64) -> Result<SessionTokenUsage, ApiError> {
        self.log(ApiCall::TokenUsage(session_id));
        Ok(self
            .usage
            .lock()
            .unwrap()
            .get(&session_id)
            .cloned()
            .unwrap_or_default())
    }
}

/// Engine over a [`FakeApi`], with the outbound side of its connection handle.
pub fn test_engine(api: FakeApi) -> (SyncEngine<FakeApi>, mpsc::UnboundedReceiver<ClientCommand>) {
    let (handle, outbound) = ConnectionHandle::test_pair(true);
    (SyncEngine::new(api, handle, StreamConfig::default()), outbound)
}

/// Drain everything the engine has sent so far.
pub fn drain(outbound: &mut mpsc::UnboundedReceiver<ClientCommand>) -> Vec<ClientCommand> {
    let mut sent = Vec::new();
    while let Ok(cmd) = outbound.try_recv() {
        sent.push(cmd);
    }
    sent
}
