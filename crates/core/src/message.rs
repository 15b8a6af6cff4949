//! Message domain types.
//!
//! A conversation is an append-only log of [`Message`] values. Besides the
//! four provider roles (`system`, `user`, `assistant`, `tool`) the log holds
//! a few synthetic roles produced by multi-agent features (supervisor turns,
//! delegated task results, collapsed assistant groups, compression
//! summaries). The context pipeline rewrites all synthetic roles into
//! provider roles before a request is sent.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// The role of a message sender in a conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// System instructions
    System,
    /// The end user
    User,
    /// The AI assistant
    Assistant,
    /// Tool execution result
    Tool,
    /// A supervisor agent turn in a group chat
    Supervisor,
    /// The result of a delegated sub-agent task
    Task,
    /// A collapsed multi-step assistant turn (see [`AssistantBlock`])
    AssistantGroup,
    /// A summary standing in for compressed history
    CompressedGroup,
}

impl Role {
    /// Whether a provider accepts this role as-is.
    pub fn is_provider_role(self) -> bool {
        matches!(self, Self::System | Self::User | Self::Assistant | Self::Tool)
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::System => "system",
            Self::User => "user",
            Self::Assistant => "assistant",
            Self::Tool => "tool",
            Self::Supervisor => "supervisor",
            Self::Task => "task",
            Self::AssistantGroup => "assistant_group",
            Self::CompressedGroup => "compressed_group",
        };
        f.write_str(s)
    }
}

/// A tool call embedded in an assistant message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageToolCall {
    /// Unique ID for this tool call
    pub id: String,

    /// Name of the tool to invoke
    pub name: String,

    /// Arguments as JSON string
    pub arguments: String,
}

impl MessageToolCall {
    pub fn new(id: impl Into<String>, name: impl Into<String>, arguments: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            arguments: arguments.into(),
        }
    }

    /// Parse the argument string, falling back to an empty object.
    pub fn parsed_arguments(&self) -> serde_json::Value {
        if self.arguments.trim().is_empty() {
            return serde_json::Value::Object(serde_json::Map::new());
        }
        serde_json::from_str(&self.arguments)
            .unwrap_or_else(|_| serde_json::Value::Object(serde_json::Map::new()))
    }
}

/// Lifecycle of a tool result message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolCallStatus {
    /// Waiting for a human decision
    PendingApproval,
    Succeeded,
    Failed,
    /// A human declined the call
    Rejected,
    /// The run was cancelled or aborted before the call produced a result
    Cancelled,
    /// The step limit was reached before the call ran
    Skipped,
}

/// One step inside an [`Role::AssistantGroup`] message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssistantBlock {
    pub id: String,

    #[serde(default)]
    pub content: String,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<MessageToolCall>,

    /// Results for `tool_calls`, in any order.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_results: Vec<BlockToolResult>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlockToolResult {
    pub tool_call_id: String,
    pub name: String,
    pub content: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttachmentKind {
    Image,
    File,
}

/// A file or image attached to a user message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Attachment {
    pub name: String,
    pub kind: AttachmentKind,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,

    /// Extracted text for file attachments
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
}

/// A human-readable error recorded on a message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageError {
    pub kind: String,
    pub message: String,
}

impl MessageError {
    pub fn new(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            message: message.into(),
        }
    }
}

/// A single message in a conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Unique message ID
    pub id: String,

    /// Who sent this message
    pub role: Role,

    /// The text content
    #[serde(default)]
    pub content: String,

    /// Tool calls requested by the assistant (if any)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<MessageToolCall>,

    /// If this is a tool result, which tool call it responds to
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,

    /// Tool name for tool results
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Parent message; messages form a tree for branching and regeneration
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,

    /// Authoring agent in multi-agent conversations
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<AssistantBlock>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attachments: Vec<Attachment>,

    /// Structured state returned by a tool alongside its content
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plugin_state: Option<serde_json::Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_status: Option<ToolCallStatus>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<MessageError>,

    /// Set once a compression summary covers this message
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub compressed: bool,

    pub created_at: DateTime<Utc>,

    pub updated_at: DateTime<Utc>,

    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub metadata: serde_json::Map<String, serde_json::Value>,

    /// Byte length of the context prefix merged into this message by the
    /// pipeline. Never persisted.
    #[serde(skip)]
    pub injected_prefix_len: usize,
}

impl Message {
    /// Create a message with a fresh id and the current time.
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self::with_id(Uuid::new_v4().to_string(), role, content, Utc::now())
    }

    /// Create a message with an explicit id and timestamp.
    ///
    /// The context pipeline uses this for messages it synthesizes so that
    /// identical inputs produce identical outputs.
    pub fn with_id(
        id: impl Into<String>,
        role: Role,
        content: impl Into<String>,
        at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: id.into(),
            role,
            content: content.into(),
            tool_calls: Vec::new(),
            tool_call_id: None,
            name: None,
            parent_id: None,
            agent_id: None,
            children: Vec::new(),
            attachments: Vec::new(),
            plugin_state: None,
            tool_status: None,
            error: None,
            compressed: false,
            created_at: at,
            updated_at: at,
            metadata: serde_json::Map::new(),
            injected_prefix_len: 0,
        }
    }

    /// Create a new user message.
    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    /// Create a new assistant message.
    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }

    /// Create a new system message.
    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }

    /// Create a tool result message.
    pub fn tool_result(
        tool_call_id: impl Into<String>,
        name: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        let mut msg = Self::new(Role::Tool, content);
        msg.tool_call_id = Some(tool_call_id.into());
        msg.name = Some(name.into());
        msg
    }

    pub fn with_tool_calls(mut self, calls: Vec<MessageToolCall>) -> Self {
        self.tool_calls = calls;
        self
    }

    pub fn with_agent(mut self, agent_id: impl Into<String>) -> Self {
        self.agent_id = Some(agent_id.into());
        self
    }

    pub fn with_parent(mut self, parent_id: impl Into<String>) -> Self {
        self.parent_id = Some(parent_id.into());
        self
    }

    /// Apply a partial update.
    pub fn apply(&mut self, patch: MessagePatch) {
        if let Some(content) = patch.content {
            self.content = content;
        }
        if let Some(tool_calls) = patch.tool_calls {
            self.tool_calls = tool_calls;
        }
        if let Some(error) = patch.error {
            self.error = error;
        }
        if let Some(state) = patch.plugin_state {
            self.plugin_state = Some(state);
        }
        if let Some(status) = patch.tool_status {
            self.tool_status = Some(status);
        }
        if let Some(compressed) = patch.compressed {
            self.compressed = compressed;
        }
        for (k, v) in patch.metadata {
            self.metadata.insert(k, v);
        }
        self.updated_at = Utc::now();
    }
}

/// A partial update applied through [`crate::store::MessageStore::update`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MessagePatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<MessageToolCall>>,

    /// `Some(None)` clears the error
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<Option<MessageError>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plugin_state: Option<serde_json::Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_status: Option<ToolCallStatus>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub compressed: Option<bool>,

    /// Keys merged into the message metadata
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

impl MessagePatch {
    pub fn error(error: MessageError) -> Self {
        Self {
            error: Some(Some(error)),
            ..Self::default()
        }
    }

    pub fn tool_result(
        content: impl Into<String>,
        status: ToolCallStatus,
        state: Option<serde_json::Value>,
    ) -> Self {
        Self {
            content: Some(content.into()),
            tool_status: Some(status),
            plugin_state: state,
            ..Self::default()
        }
    }

    pub fn compressed() -> Self {
        Self {
            compressed: Some(true),
            ..Self::default()
        }
    }
}

/// Tool calls of assistant messages that have no tool result yet, or whose
/// result is still waiting for approval.
pub fn pending_tool_calls(messages: &[Message]) -> Vec<MessageToolCall> {
    let mut pending = Vec::new();
    for msg in messages.iter().filter(|m| m.role == Role::Assistant) {
        for call in &msg.tool_calls {
            let resolved = messages.iter().any(|m| {
                m.role == Role::Tool
                    && m.tool_call_id.as_deref() == Some(call.id.as_str())
                    && m.tool_status != Some(ToolCallStatus::PendingApproval)
            });
            if !resolved {
                pending.push(call.clone());
            }
        }
    }
    pending
}

/// Get the total token count estimate (rough: 4 chars ≈ 1 token).
pub fn estimated_tokens(messages: &[Message]) -> usize {
    messages.iter().map(|m| m.content.len() / 4).sum()
}
