//! Streaming Protocol Types
//!
//! Every frame on the shared connection is the same flat JSON envelope
//! `{type, session_id, content, tool_id?, tool_name?}`. Inbound frames are
//! classified into [`ServerEvent`]; global events carry their own variant while
//! turn-scoped events are grouped under [`ServerEvent::Turn`] so the
//! current-session filter can be applied in one place.

use serde::{Deserialize, Serialize};

/// Wire envelope, identical in both directions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub session_id: i64,
    #[serde(default)]
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_name: Option<String>,
}

impl Envelope {
    fn new(kind: &str, session_id: i64, content: String) -> Self {
        Self {
            kind: kind.to_string(),
            session_id,
            content,
            tool_id: None,
            tool_name: None,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("malformed frame: {0}")]
    Json(#[from] serde_json::Error),

    #[error("unknown message type: {0}")]
    UnknownType(String),

    #[error("client-only message type received from server: {0}")]
    WrongDirection(String),
}

/// Messages sent FROM this client TO the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientCommand {
    /// Part of the wire protocol; this client starts turns over HTTP instead.
    Chat { session_id: i64, content: String },
    /// Advisory: the server confirms with `done`/`error`/`streaming_status`.
    Stop { session_id: i64 },
    Subscribe { session_id: i64 },
}

impl ClientCommand {
    pub fn to_json(&self) -> Result<String, ProtocolError> {
        Ok(serde_json::to_string(&Envelope::from(self.clone()))?)
    }
}

impl From<ClientCommand> for Envelope {
    fn from(cmd: ClientCommand) -> Self {
        match cmd {
            ClientCommand::Chat {
                session_id,
                content,
            } => Envelope::new("chat", session_id, content),
            ClientCommand::Stop { session_id } => Envelope::new("stop", session_id, String::new()),
            ClientCommand::Subscribe { session_id } => {
                Envelope::new("subscribe", session_id, String::new())
            }
        }
    }
}

/// Messages sent FROM the server TO this client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerEvent {
    /// `content` is a serialized session.
    SessionCreated { session_id: i64, content: String },
    SessionTitleUpdate { session_id: i64, title: String },
    /// `status` is `streaming` or anything else (idle).
    SessionUpdate { session_id: i64, status: String },
    /// `status` is `process_exit` or `process_alive:<state>`.
    ProcessUpdate { session_id: i64, status: String },
    MessageQueued { session_id: i64, content: String },
    /// `content` is a serialized usage record.
    TokenUsage { session_id: i64, content: String },
    /// Events that only matter to the session currently being viewed.
    Turn { session_id: i64, event: TurnEvent },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TurnEvent {
    StreamingStatus(String),
    Thinking(String),
    ToolStart {
        tool_id: Option<String>,
        tool_name: Option<String>,
        content: String,
    },
    ToolInput {
        tool_id: Option<String>,
        content: String,
    },
    ToolResult {
        tool_id: Option<String>,
        content: String,
    },
    Chunk(String),
    /// Non-empty content is server-supplied step metadata.
    Done(String),
    Error(String),
}

impl ServerEvent {
    /// Decode one text frame.
    pub fn decode(text: &str) -> Result<Self, ProtocolError> {
        let envelope: Envelope = serde_json::from_str(text)?;
        Self::try_from(envelope)
    }
}

impl TryFrom<Envelope> for ServerEvent {
    type Error = ProtocolError;

    fn try_from(env: Envelope) -> Result<Self, Self::Error> {
        let Envelope {
            kind,
            session_id,
            content,
            tool_id,
            tool_name,
        } = env;

        let turn = |event| ServerEvent::Turn { session_id, event };

        let event = match kind.as_str() {
            "session_created" => ServerEvent::SessionCreated {
                session_id,
                content,
            },
            "session_title_update" => ServerEvent::SessionTitleUpdate {
                session_id,
                title: content,
            },
            "session_update" => ServerEvent::SessionUpdate {
                session_id,
                status: content,
            },
            "process_update" => ServerEvent::ProcessUpdate {
                session_id,
                status: content,
            },
            "message_queued" => ServerEvent::MessageQueued {
                session_id,
                content,
            },
            "token_usage" => ServerEvent::TokenUsage {
                session_id,
                content,
            },
            "streaming_status" => turn(TurnEvent::StreamingStatus(content)),
            "thinking" => turn(TurnEvent::Thinking(content)),
            "tool_start" => turn(TurnEvent::ToolStart {
                tool_id,
                tool_name,
                content,
            }),
            "tool_input" => turn(TurnEvent::ToolInput { tool_id, content }),
            "tool_result" => turn(TurnEvent::ToolResult { tool_id, content }),
            "chunk" => turn(TurnEvent::Chunk(content)),
            "done" => turn(TurnEvent::Done(content)),
            "error" => turn(TurnEvent::Error(content)),
            "chat" | "stop" | "subscribe" => return Err(ProtocolError::WrongDirection(kind)),
            _ => return Err(ProtocolError::UnknownType(kind)),
        };
        Ok(event)
    }
}
