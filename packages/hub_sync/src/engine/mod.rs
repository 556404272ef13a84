//! The client-side synchronization engine.
//!
//! [`SyncEngine`] owns every piece of observable state: the session registry,
//! the turn buffers of the viewed session, the message list, and the usage
//! ledger. It is driven from a single task: user actions call its async
//! methods, and connection events are fed in through
//! [`SyncEngine::handle_connection_event`]. Because every method takes
//! `&mut self`, no two mutations ever interleave.

mod dispatch;

use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::api::HubApi;
use crate::config::StreamConfig;
use crate::connection::{ConnectionEvent, ConnectionHandle};
use crate::error::ApiError;
use crate::ledger::TokenUsageLedger;
use crate::models::{
    Message, PendingCreation, Role, SENTINEL_SESSION_ID, SendChatRequest, Session,
};
use crate::protocol::ClientCommand;
use crate::registry::SessionRegistry;
use crate::stream::StreamState;

/// Change notifications for the presentation layer.
#[derive(Debug, Clone, PartialEq)]
pub enum Notice {
    /// The viewed session changed, including adoption of a created id.
    LocationChanged(i64),
    SessionsChanged,
    /// The message list was replaced wholesale.
    MessagesReloaded,
    MessageAppended(Message),
    StreamChanged,
    UsageChanged,
    Connectivity(bool),
}

pub struct SyncEngine<A> {
    api: A,
    conn: ConnectionHandle,
    config: StreamConfig,
    registry: SessionRegistry,
    stream: StreamState,
    ledger: TokenUsageLedger,
    messages: Vec<Message>,
    current_session_id: i64,
    connected: bool,
    pending: PendingCreation,
    last_local_id: i64,
    notices: broadcast::Sender<Notice>,
}

impl<A: HubApi> SyncEngine<A> {
    pub fn new(api: A, conn: ConnectionHandle, config: StreamConfig) -> Self {
        let (notices, _) = broadcast::channel(config.notice_capacity);
        Self {
            api,
            conn,
            config,
            registry: SessionRegistry::new(),
            stream: StreamState::default(),
            ledger: TokenUsageLedger::new(),
            messages: Vec::new(),
            current_session_id: SENTINEL_SESSION_ID,
            connected: false,
            pending: PendingCreation::default(),
            last_local_id: 0,
            notices,
        }
    }

    pub fn subscribe_notices(&self) -> broadcast::Receiver<Notice> {
        self.notices.subscribe()
    }

    pub fn api(&self) -> &A {
        &self.api
    }

    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    pub fn stream(&self) -> &StreamState {
        &self.stream
    }

    pub fn ledger(&self) -> &TokenUsageLedger {
        &self.ledger
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn current_session_id(&self) -> i64 {
        self.current_session_id
    }

    pub fn current_session(&self) -> Option<&Session> {
        self.registry.get(self.current_session_id)
    }

    pub fn pending_creation(&self) -> &PendingCreation {
        &self.pending
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    pub fn is_streaming(&self) -> bool {
        self.stream.streaming
    }

    // ── Connection lifecycle ────────────────────────────────────────────

    pub async fn handle_connection_event(&mut self, event: ConnectionEvent) {
        match event {
            ConnectionEvent::Opened => {
                self.connected = true;
                self.notify(Notice::Connectivity(true));
                if self.current_session_id != SENTINEL_SESSION_ID {
                    self.subscribe(self.current_session_id);
                }
                // The list may have changed while we were away.
                match self.load_sessions().await {
                    Ok(()) => self.reconcile_viewed_turn().await,
                    Err(e) => warn!(error = %e, "failed to refresh sessions after reconnect"),
                }
            }
            ConnectionEvent::Closed => {
                self.connected = false;
                self.notify(Notice::Connectivity(false));
            }
            ConnectionEvent::Frame(event) => self.handle_server_event(event).await,
        }
    }

    // ── Session registry operations ─────────────────────────────────────

    /// Replace the session list with the server's.
    pub async fn load_sessions(&mut self) -> Result<(), ApiError> {
        let sessions = self.api.list_sessions().await?;
        debug!(count = sessions.len(), "loaded sessions");
        self.registry.replace_all(sessions);
        self.notify(Notice::SessionsChanged);
        Ok(())
    }

    /// View a session: reset the turn buffers, load its messages and usage,
    /// and subscribe to its turn events. Id 0 clears the view.
    ///
    /// The subscription is sent before the history fetch, so a failed fetch
    /// still leaves the view receiving live events.
    pub async fn select_session(&mut self, session_id: i64) -> Result<(), ApiError> {
        self.clear_view(session_id);
        if session_id == SENTINEL_SESSION_ID {
            return Ok(());
        }

        if self.connected {
            self.subscribe(session_id);
        }

        self.messages = self.api.list_messages(session_id).await?;
        self.notify(Notice::MessagesReloaded);

        match self.api.session_token_usage(session_id).await {
            Ok(usage) => {
                self.ledger.load_session(session_id, usage);
                self.notify(Notice::UsageChanged);
            }
            Err(e) => warn!(session_id, error = %e, "failed to load token usage"),
        }
        Ok(())
    }

    /// Switch to the unsaved-session view. The parameters are sent along
    /// with the first message, which creates the session.
    pub fn new_chat(&mut self, work_dir: Option<String>, group_name: Option<String>) {
        self.clear_view(SENTINEL_SESSION_ID);
        self.pending = PendingCreation {
            work_dir,
            group_name,
        };
    }

    pub async fn delete_session(&mut self, session_id: i64) -> Result<(), ApiError> {
        self.api.delete_session(session_id).await?;
        self.registry.remove(session_id);
        self.notify(Notice::SessionsChanged);
        info!(session_id, "deleted session");

        if self.current_session_id == session_id {
            self.clear_view(SENTINEL_SESSION_ID);
        }
        Ok(())
    }

    /// Reset the backend context of a session to a summary, then reload it.
    pub async fn compress(&mut self, session_id: i64) -> Result<(), ApiError> {
        self.api.compress_session(session_id).await?;
        let reselected = if self.current_session_id == session_id {
            self.select_session(session_id).await
        } else {
            Ok(())
        };
        let reloaded = self.load_sessions().await;
        reselected.and(reloaded)
    }

    pub async fn switch_provider(
        &mut self,
        session_id: i64,
        provider_id: &str,
    ) -> Result<Session, ApiError> {
        let session = self.api.switch_provider(session_id, provider_id).await?;
        info!(session_id, provider_id, "switched provider");
        self.load_sessions().await?;
        Ok(session)
    }

    // ── Turns ───────────────────────────────────────────────────────────

    /// Start a turn in the viewed session. Returns false when the text is
    /// blank or a turn is already streaming.
    ///
    /// Collaborator failures do not surface as errors: the turn goes idle and
    /// an assistant message describing the failure is appended.
    pub async fn send(&mut self, text: &str) -> bool {
        if text.trim().is_empty() || self.stream.streaming {
            return false;
        }

        let session_id = self.current_session_id;
        self.push_message(session_id, Role::User, text.to_string(), None);
        self.stream.begin();
        self.notify(Notice::StreamChanged);

        let creating = session_id == SENTINEL_SESSION_ID;
        let req = SendChatRequest {
            session_id,
            content: text,
            work_dir: self.pending.work_dir.as_deref().filter(|_| creating),
            group_name: self.pending.group_name.as_deref().filter(|_| creating),
        };

        match self.api.send_chat(req).await {
            Ok(resp) => {
                debug!(session_id = resp.session_id, status = %resp.status, "turn accepted");
                if resp.session_id == SENTINEL_SESSION_ID {
                    warn!("hub accepted turn without assigning a session id");
                } else {
                    if creating {
                        self.adopt(resp.session_id);
                    }
                    self.subscribe(resp.session_id);
                }
            }
            Err(e) => {
                warn!(session_id, error = %e, "send failed");
                self.stream.reset();
                self.notify(Notice::StreamChanged);
                self.push_message(session_id, Role::Assistant, format!("Error: {e}"), None);
            }
        }
        true
    }

    /// Ask the server to interrupt the running turn. Turn state is left alone
    /// until the server confirms.
    pub fn stop(&self) -> bool {
        if self.current_session_id == SENTINEL_SESSION_ID {
            return false;
        }
        self.conn.send(ClientCommand::Stop {
            session_id: self.current_session_id,
        })
    }

    // ── Internals ───────────────────────────────────────────────────────

    /// Point the view at `session_id` with empty turn buffers, no messages and
    /// no pending-creation params.
    fn clear_view(&mut self, session_id: i64) {
        self.stream.reset();
        self.ledger.clear_latest();
        self.pending = PendingCreation::default();
        self.messages.clear();
        self.current_session_id = session_id;
        self.notify(Notice::StreamChanged);
        self.notify(Notice::LocationChanged(session_id));
        self.notify(Notice::MessagesReloaded);
    }

    /// After a reconnect, finish a turn whose end was missed while offline:
    /// the hub reports the viewed session idle but the local turn is still
    /// streaming.
    async fn reconcile_viewed_turn(&mut self) {
        let session_id = self.current_session_id;
        let hub_idle = self
            .registry
            .get(session_id)
            .is_some_and(|session| !session.streaming);
        if !self.stream.streaming || !hub_idle {
            return;
        }

        info!(session_id, "turn ended while disconnected; reloading history");
        self.stream.reset();
        self.notify(Notice::StreamChanged);
        self.reload_messages(session_id).await;
    }

    /// Bind the sentinel view to a server-assigned id.
    fn adopt(&mut self, session_id: i64) {
        info!(session_id, "adopting created session");
        self.current_session_id = session_id;
        self.pending = PendingCreation::default();
        for message in &mut self.messages {
            if message.session_id == SENTINEL_SESSION_ID {
                message.session_id = session_id;
            }
        }
        self.notify(Notice::LocationChanged(session_id));
    }

    fn subscribe(&self, session_id: i64) {
        if !self.connected {
            debug!(session_id, "not connected; subscription deferred to next open");
            return;
        }
        self.conn.send(ClientCommand::Subscribe { session_id });
    }

    /// Locally synthesized messages get negative ids so they never collide
    /// with persisted ones.
    fn next_local_id(&mut self) -> i64 {
        self.last_local_id -= 1;
        self.last_local_id
    }

    fn push_message(
        &mut self,
        session_id: i64,
        role: Role,
        content: String,
        metadata: Option<String>,
    ) {
        let id = self.next_local_id();
        let message = Message::new(id, session_id, role, content).with_metadata(metadata);
        self.messages.push(message.clone());
        self.notify(Notice::MessageAppended(message));
    }

    async fn reload_messages(&mut self, session_id: i64) {
        match self.api.list_messages(session_id).await {
            Ok(messages) => {
                self.messages = messages;
                self.notify(Notice::MessagesReloaded);
            }
            Err(e) => warn!(session_id, error = %e, "failed to reload messages"),
        }
    }

    fn notify(&self, notice: Notice) {
        // No receivers is fine.
        let _ = self.notices.send(notice);
    }
}
