//! Run-level streaming events.
//!
//! Every step returns the events it produced; the runner also forwards them
//! live to an optional channel so a caller can render progress while the
//! run is still going:
//! - `step_start`               — a step is about to execute
//! - `chunk`                    — partial text from the model
//! - `tool_call` / `tool_result` — a tool is invoked / finished
//! - `human_approval_requested` — the run paused for a decision
//! - `task_started` / `task_completed` — delegated sub-agent tasks
//! - `context_compressed`       — older history was summarised
//! - `interrupted`              — cancellation was observed
//! - `done` / `error`           — the run left the loop

use agentloop_core::agent::{CompletionReason, Usage};
use agentloop_core::message::MessageToolCall;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentEvent {
    StepStart {
        step: u32,
        instruction: String,
    },

    /// Partial text token from the model.
    Chunk { content: String },

    ToolCall {
        id: String,
        name: String,
        arguments: serde_json::Value,
    },

    ToolResult {
        id: String,
        name: String,
        content: String,
        success: bool,
    },

    HumanApprovalRequested { tool_calls: Vec<MessageToolCall> },

    TaskStarted {
        operation_id: String,
        title: String,
    },

    TaskCompleted {
        operation_id: String,
        title: String,
        status: String,
    },

    ContextCompressed {
        compressed_count: usize,
        summary_message_id: String,
    },

    Interrupted { step: u32 },

    /// The run is over; final metadata.
    Done {
        operation_id: String,
        status: String,
        reason: Option<CompletionReason>,
        steps: u32,
        usage: Usage,
    },

    Error { message: String },
}

impl AgentEvent {
    /// Wire name of this event.
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::StepStart { .. } => "step_start",
            Self::Chunk { .. } => "chunk",
            Self::ToolCall { .. } => "tool_call",
            Self::ToolResult { .. } => "tool_result",
            Self::HumanApprovalRequested { .. } => "human_approval_requested",
            Self::TaskStarted { .. } => "task_started",
            Self::TaskCompleted { .. } => "task_completed",
            Self::ContextCompressed { .. } => "context_compressed",
            Self::Interrupted { .. } => "interrupted",
            Self::Done { .. } => "done",
            Self::Error { .. } => "error",
        }
    }
}
