//! Routing of inbound server events.
//!
//! Global events update the registry and ledger no matter which session is
//! viewed. Turn events only drive the [`StreamState`](crate::stream::StreamState)
//! of the viewed session; events for any other session are dropped here.

use tracing::{debug, trace};

use crate::api::HubApi;
use crate::ledger::TokenUsageLedger;
use crate::models::{Role, SENTINEL_SESSION_ID, Session};
use crate::protocol::{ServerEvent, TurnEvent};
use crate::registry::ProcessStatus;

use super::{Notice, SyncEngine};

impl<A: HubApi> SyncEngine<A> {
    /// Apply one decoded event. Events must be fed in arrival order.
    pub async fn handle_server_event(&mut self, event: ServerEvent) {
        match event {
            ServerEvent::SessionCreated {
                session_id,
                content,
            } => self.on_session_created(session_id, &content),
            ServerEvent::SessionTitleUpdate { session_id, title } => {
                if self.registry.set_title(session_id, &title) {
                    self.notify(Notice::SessionsChanged);
                }
            }
            ServerEvent::SessionUpdate { session_id, status } => {
                self.on_session_update(session_id, &status).await
            }
            ServerEvent::ProcessUpdate { session_id, status } => {
                self.on_process_update(session_id, &status)
            }
            ServerEvent::MessageQueued {
                session_id,
                content,
            } => {
                if session_id == self.current_session_id {
                    self.push_message(session_id, Role::User, content, None);
                }
            }
            ServerEvent::TokenUsage {
                session_id,
                content,
            } => {
                if let Some(record) = TokenUsageLedger::parse(&content, session_id) {
                    self.ledger.record(record, self.current_session_id);
                    self.notify(Notice::UsageChanged);
                }
            }
            ServerEvent::Turn { session_id, event } => {
                let active = self.current_session_id;
                if session_id != active {
                    trace!(session_id, active, "dropping turn event for unviewed session");
                    return;
                }
                self.apply_turn_event(active, event);
            }
        }
    }

    fn on_session_created(&mut self, session_id: i64, content: &str) {
        let mut session: Session = match serde_json::from_str(content) {
            Ok(session) => session,
            Err(e) => {
                debug!(session_id, error = %e, "ignoring malformed session_created payload");
                return;
            }
        };
        if session.id == SENTINEL_SESSION_ID {
            session.id = session_id;
        }

        let id = session.id;
        if self.registry.insert_if_absent(session) {
            self.notify(Notice::SessionsChanged);
        }
        if self.current_session_id == SENTINEL_SESSION_ID && id != SENTINEL_SESSION_ID {
            self.adopt(id);
        }
    }

    async fn on_session_update(&mut self, session_id: i64, status: &str) {
        let streaming = status == "streaming";
        let Some(transition) = self.registry.apply_streaming(session_id, streaming) else {
            debug!(session_id, status, "session_update for unknown session");
            return;
        };
        self.notify(Notice::SessionsChanged);

        if transition.finished() && session_id == self.current_session_id {
            // Persisted history is authoritative once the turn is over.
            self.stream.reset();
            self.notify(Notice::StreamChanged);
            self.reload_messages(session_id).await;
        }
    }

    fn on_process_update(&mut self, session_id: i64, status: &str) {
        let Some(status) = ProcessStatus::parse(status) else {
            debug!(session_id, status, "unrecognized process_update");
            return;
        };
        if self.registry.apply_process(session_id, status) {
            self.notify(Notice::SessionsChanged);
        }
    }

    /// Drive the turn state machine of the viewed session `active`.
    fn apply_turn_event(&mut self, active: i64, event: TurnEvent) {
        match event {
            TurnEvent::StreamingStatus(status) => match status.as_str() {
                "streaming" => self.stream.streaming = true,
                "idle" => self.stream.reset(),
                other => debug!(session_id = active, status = other, "unknown streaming status"),
            },
            TurnEvent::Thinking(text) => self.stream.append_thinking(&text),
            TurnEvent::ToolStart {
                tool_id,
                tool_name,
                content,
            } => {
                let id = self.stream.start_tool(tool_id, tool_name, &content);
                trace!(session_id = active, tool_id = %id, "tool started");
            }
            TurnEvent::ToolInput { tool_id, content } => {
                let known = tool_id
                    .as_deref()
                    .is_some_and(|id| self.stream.append_tool_input(id, &content));
                if !known {
                    debug!(session_id = active, ?tool_id, "tool_input for unknown tool");
                }
            }
            TurnEvent::ToolResult { tool_id, .. } => {
                let known = tool_id
                    .as_deref()
                    .is_some_and(|id| self.stream.finish_tool(id));
                if !known {
                    debug!(session_id = active, ?tool_id, "tool_result for unknown tool");
                }
            }
            TurnEvent::Chunk(text) => self.stream.append_chunk(&text),
            TurnEvent::Done(metadata) => {
                self.finalize_turn(active, &metadata);
                self.stream.reset();
            }
            TurnEvent::Error(message) => {
                self.finalize_turn(active, "");
                self.stream.reset();
                self.push_message(active, Role::Assistant, format!("Error: {message}"), None);
            }
        }
        self.notify(Notice::StreamChanged);
    }

    /// Append the buffered turn as an assistant message, if there is anything
    /// to keep.
    fn finalize_turn(&mut self, active: i64, server_metadata: &str) {
        let preview = self.config.tool_input_preview_chars;
        if let Some(turn) = self.stream.finalize(server_metadata, preview) {
            self.push_message(active, Role::Assistant, turn.content, turn.metadata);
        }
    }
}
