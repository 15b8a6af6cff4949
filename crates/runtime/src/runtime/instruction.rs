//! What flows between steps: phases, instructions and step outputs.

use crate::context::config::TodoItem;
use crate::stream_event::AgentEvent;
use agentloop_core::agent::{AgentState, CompletionReason, Cost, Usage};
use agentloop_core::message::{Message, MessageToolCall, Role, ToolCallStatus};
use serde::{Deserialize, Serialize};

/// Outcome of one tool call, as seen by the planner.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallRecord {
    pub tool_call_id: String,
    pub name: String,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<serde_json::Value>,
    pub message_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RejectedCall {
    pub call: MessageToolCall,
    pub reason: Option<String>,
}

/// The tag on [`AgentRuntimeContext`] selecting the next instruction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "phase", rename_all = "snake_case")]
pub enum Phase {
    Init,
    LlmResult {
        message_id: String,
        tool_calls: Vec<MessageToolCall>,
    },
    ToolResult {
        result: ToolCallRecord,
    },
    ToolBatchResult {
        results: Vec<ToolCallRecord>,
    },
    TasksBatchResult {
        task_count: usize,
    },
    CompressionResult {
        summary_message_id: Option<String>,
        compressed_count: usize,
    },
    HumanApprovedTool {
        approved: Vec<MessageToolCall>,
        rejected: Vec<RejectedCall>,
    },
    HumanAbort {
        reason: Option<String>,
        partial_message_id: Option<String>,
        pending: Vec<MessageToolCall>,
    },
}

impl Phase {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Init => "init",
            Self::LlmResult { .. } => "llm_result",
            Self::ToolResult { .. } => "tool_result",
            Self::ToolBatchResult { .. } => "tool_batch_result",
            Self::TasksBatchResult { .. } => "tasks_batch_result",
            Self::CompressionResult { .. } => "compression_result",
            Self::HumanApprovedTool { .. } => "human_approved_tool",
            Self::HumanAbort { .. } => "human_abort",
        }
    }
}

/// A delegated unit of work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskSpec {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub title: String,
    pub instruction: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
}

/// The closed set of things a step can do.
#[derive(Debug, Clone, PartialEq)]
pub enum AgentInstruction {
    CallLlm {
        force_finish: bool,
    },
    CallTool {
        call: MessageToolCall,
    },
    CallToolsBatch {
        calls: Vec<MessageToolCall>,
        rejected: Vec<RejectedCall>,
    },
    RequestHumanApprove {
        pending: Vec<MessageToolCall>,
    },
    ExecTasks {
        parent_call_id: String,
        tasks: Vec<TaskSpec>,
    },
    CompressContext,
    /// Give every unresolved call a synthetic result, then finish.
    ResolveAbortedTools {
        pending: Vec<MessageToolCall>,
        status: ToolCallStatus,
        reason: CompletionReason,
    },
    Finish {
        reason: CompletionReason,
    },
}

impl AgentInstruction {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::CallLlm { .. } => "call_llm",
            Self::CallTool { .. } => "call_tool",
            Self::CallToolsBatch { .. } => "call_tools_batch",
            Self::RequestHumanApprove { .. } => "request_human_approve",
            Self::ExecTasks { .. } => "exec_tasks",
            Self::CompressContext => "compress_context",
            Self::ResolveAbortedTools { .. } => "resolve_aborted_tools",
            Self::Finish { .. } => "finish",
        }
    }
}

/// Facts recomputed from the persisted log before every step.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StepContext {
    /// Latest todo list written by a tool
    #[serde(default)]
    pub todos: Vec<TodoItem>,
    /// Tools activated mid-run by a discovery tool
    #[serde(default)]
    pub activated_tools: Vec<String>,
}

impl StepContext {
    /// Read the newest `todos` and every `activated_tools` entry from tool
    /// message state.
    pub fn from_messages(messages: &[Message]) -> Self {
        let mut ctx = Self::default();
        for state in messages
            .iter()
            .filter(|m| m.role == Role::Tool)
            .filter_map(|m| m.plugin_state.as_ref())
        {
            if let Some(todos) = state.get("todos")
                && let Ok(todos) = serde_json::from_value::<Vec<TodoItem>>(todos.clone())
            {
                ctx.todos = todos;
            }
            if let Some(tools) = state.get("activated_tools").and_then(|v| v.as_array()) {
                for tool in tools.iter().filter_map(|t| t.as_str()) {
                    if !ctx.activated_tools.iter().any(|t| t == tool) {
                        ctx.activated_tools.push(tool.to_string());
                    }
                }
            }
        }
        ctx
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionInfo {
    pub session_id: String,
    pub step_count: u32,
    pub message_count: usize,
}

/// The "next instruction" envelope handed from one step to the next.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentRuntimeContext {
    #[serde(flatten)]
    pub phase: Phase,
    pub session: SessionInfo,
    #[serde(default)]
    pub step_context: StepContext,
}

impl AgentRuntimeContext {
    pub fn new(phase: Phase, state: &AgentState) -> Self {
        Self {
            phase,
            session: SessionInfo {
                session_id: state.session_id.clone(),
                step_count: state.step_count,
                message_count: state.messages.len(),
            },
            step_context: StepContext::default(),
        }
    }

    pub fn init(state: &AgentState) -> Self {
        Self::new(Phase::Init, state)
    }
}

/// What one step hands back to the loop.
#[derive(Debug, Clone)]
pub struct StepOutput {
    pub events: Vec<AgentEvent>,
    pub new_state: AgentState,
    /// `None` ends the loop
    pub next_context: Option<AgentRuntimeContext>,
    pub usage_delta: Usage,
    pub cost_delta: Cost,
}
