//! Turn accumulation for the session currently being viewed.
//!
//! [`StreamState`] buffers reasoning text, tool calls, and content chunks
//! until the server ends the turn. Finalizing produces the assistant message
//! body plus the step metadata that is persisted alongside it.

use uuid::Uuid;

use crate::models::{
    EMPTY_TURN_PLACEHOLDER, StepInfo, StepKind, StepsMetadata, ToolCall, ToolStatus,
};

/// Default number of characters of tool input kept in step metadata.
pub const DEFAULT_TOOL_INPUT_PREVIEW_CHARS: usize = 200;

/// Body and metadata of a finalized assistant turn.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FinalizedTurn {
    pub content: String,
    pub metadata: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StreamState {
    pub streaming: bool,
    pub content: String,
    pub thinking: String,
    pub tool_calls: Vec<ToolCall>,
}

impl StreamState {
    /// Drop all buffers and return to idle.
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    /// Clear buffers and enter streaming, as done when a local send starts.
    pub fn begin(&mut self) {
        self.reset();
        self.streaming = true;
    }

    pub fn has_partial(&self) -> bool {
        !self.content.is_empty() || !self.thinking.is_empty() || !self.tool_calls.is_empty()
    }

    pub fn append_thinking(&mut self, text: &str) {
        self.streaming = true;
        self.thinking.push_str(text);
    }

    /// Start a tool call. Returns the id it was recorded under.
    pub fn start_tool(
        &mut self,
        tool_id: Option<String>,
        tool_name: Option<String>,
        content: &str,
    ) -> String {
        self.streaming = true;
        let id = tool_id
            .filter(|id| !id.is_empty())
            .unwrap_or_else(|| format!("local-{}", Uuid::new_v4()));
        let name = tool_name
            .filter(|name| !name.is_empty())
            .unwrap_or_else(|| content.to_string());
        self.tool_calls.push(ToolCall {
            id: id.clone(),
            name,
            input: String::new(),
            status: ToolStatus::Running,
        });
        id
    }

    /// Append input to a known tool call. Unknown ids are ignored.
    pub fn append_tool_input(&mut self, tool_id: &str, text: &str) -> bool {
        match self.tool_mut(tool_id) {
            Some(tool) => {
                tool.input.push_str(text);
                true
            }
            None => false,
        }
    }

    /// Mark a known tool call done. Unknown ids are ignored.
    pub fn finish_tool(&mut self, tool_id: &str) -> bool {
        match self.tool_mut(tool_id) {
            Some(tool) => {
                tool.status = ToolStatus::Done;
                true
            }
            None => false,
        }
    }

    /// Append output content; output means the tool phase is over.
    pub fn append_chunk(&mut self, text: &str) {
        self.streaming = true;
        self.content.push_str(text);
        for tool in &mut self.tool_calls {
            tool.status = ToolStatus::Done;
        }
    }

    /// Build the assistant message for the buffered turn.
    ///
    /// `server_metadata` is used verbatim when non-empty; otherwise metadata is
    /// synthesized from the reasoning and tool buffers. Returns `None` when there
    /// is neither content nor metadata to persist.
    pub fn finalize(&self, server_metadata: &str, preview_chars: usize) -> Option<FinalizedTurn> {
        let metadata = if server_metadata.is_empty() {
            self.synthesize_metadata(preview_chars)
        } else {
            Some(server_metadata.to_string())
        };

        if !self.content.is_empty() {
            return Some(FinalizedTurn {
                content: self.content.clone(),
                metadata,
            });
        }

        metadata.map(|metadata| FinalizedTurn {
            content: EMPTY_TURN_PLACEHOLDER.to_string(),
            metadata: Some(metadata),
        })
    }

    fn synthesize_metadata(&self, preview_chars: usize) -> Option<String> {
        if self.thinking.is_empty() && self.tool_calls.is_empty() {
            return None;
        }

        let mut steps = Vec::with_capacity(self.tool_calls.len() + 1);
        if !self.thinking.is_empty() {
            steps.push(StepInfo {
                kind: StepKind::Thinking,
                name: None,
                input: None,
                status: None,
            });
        }
        for tool in &self.tool_calls {
            steps.push(StepInfo {
                kind: StepKind::Tool,
                name: Some(tool.name.clone()),
                input: Some(preview(&tool.input, preview_chars)),
                status: Some(tool.status),
            });
        }

        let metadata = StepsMetadata {
            steps,
            thinking: (!self.thinking.is_empty()).then(|| self.thinking.clone()),
        };
        serde_json::to_string(&metadata).ok()
    }

    fn tool_mut(&mut self, tool_id: &str) -> Option<&mut ToolCall> {
        self.tool_calls.iter_mut().find(|tool| tool.id == tool_id)
    }
}

fn preview(input: &str, max_chars: usize) -> String {
    match input.char_indices().nth(max_chars) {
        Some((cut, _)) => format!("{}...", &input[..cut]),
        None => input.to_string(),
    }
}
