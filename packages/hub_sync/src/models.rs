//! Data model shared by the engine and the HTTP collaborator.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Session id reserved for "no session created yet".
pub const SENTINEL_SESSION_ID: i64 = 0;

/// Content of the assistant message appended when a turn produced steps but no text.
pub const EMPTY_TURN_PLACEHOLDER: &str = "(no text output)";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub id: i64,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub provider_id: String,
    #[serde(default)]
    pub work_dir: String,
    #[serde(default)]
    pub group_name: String,
    #[serde(default)]
    pub streaming: bool,
    #[serde(default)]
    pub process_alive: bool,
    #[serde(default)]
    pub process_state: String,
    #[serde(default)]
    pub has_triggers: bool,
    #[serde(default)]
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: i64,
    pub session_id: i64,
    pub role: Role,
    pub content: String,
    /// Serialized [`StepsMetadata`] for assistant turns that used reasoning or tools.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<String>,
    #[serde(default)]
    pub created_at: DateTime<Utc>,
}

impl Message {
    pub fn new(id: i64, session_id: i64, role: Role, content: impl Into<String>) -> Self {
        Self {
            id,
            session_id,
            role,
            content: content.into(),
            metadata: None,
            created_at: Utc::now(),
        }
    }

    pub fn with_metadata(mut self, metadata: Option<String>) -> Self {
        self.metadata = metadata;
        self
    }

    /// Decode the step metadata, if present and well-formed.
    pub fn steps(&self) -> Option<StepsMetadata> {
        self.metadata
            .as_deref()
            .and_then(|raw| serde_json::from_str(raw).ok())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolStatus {
    Running,
    Done,
}

/// One tool invocation observed during the current turn.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub input: String,
    pub status: ToolStatus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepKind {
    Thinking,
    Tool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepInfo {
    #[serde(rename = "type")]
    pub kind: StepKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<ToolStatus>,
}

/// Persisted summary of a turn's reasoning and tool steps.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepsMetadata {
    pub steps: Vec<StepInfo>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thinking: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsageRecord {
    #[serde(default)]
    pub id: i64,
    #[serde(default)]
    pub session_id: i64,
    #[serde(default)]
    pub message_id: i64,
    #[serde(default)]
    pub input_tokens: i64,
    #[serde(default)]
    pub output_tokens: i64,
    #[serde(default)]
    pub cache_creation_input_tokens: i64,
    #[serde(default)]
    pub cache_read_input_tokens: i64,
}

/// Aggregate usage for one session, as reported by the server or summed locally.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsageStats {
    #[serde(default)]
    pub total_input_tokens: i64,
    #[serde(default)]
    pub total_output_tokens: i64,
    #[serde(default)]
    pub total_cache_creation_tokens: i64,
    #[serde(default)]
    pub total_cache_read_tokens: i64,
    #[serde(default)]
    pub count: i64,
}

impl TokenUsageStats {
    pub fn add(&mut self, record: &TokenUsageRecord) {
        self.total_input_tokens += record.input_tokens;
        self.total_output_tokens += record.output_tokens;
        self.total_cache_creation_tokens += record.cache_creation_input_tokens;
        self.total_cache_read_tokens += record.cache_read_input_tokens;
        self.count += 1;
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionTokenUsage {
    #[serde(default)]
    pub stats: TokenUsageStats,
    #[serde(default)]
    pub records: Vec<TokenUsageRecord>,
}

/// Parameters remembered for the session the next send will create.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PendingCreation {
    pub work_dir: Option<String>,
    pub group_name: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SendChatRequest<'a> {
    pub session_id: i64,
    pub content: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub work_dir: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub group_name: Option<&'a str>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendChatResponse {
    pub session_id: i64,
    #[serde(default)]
    pub status: String,
}
