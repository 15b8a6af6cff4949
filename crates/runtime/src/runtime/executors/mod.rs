//! One executor per [`AgentInstruction`](super::AgentInstruction) variant.
//!
//! Executors persist through the message store and re-read the log before
//! handing the state back, so the state a step returns always matches what
//! is stored.

mod call_llm;
mod call_tools;
mod compress;
mod finish;
mod human;
mod tasks;

pub(crate) use call_llm::call_llm;
pub(crate) use call_tools::call_tools;
pub(crate) use compress::compress_context;
pub(crate) use finish::{finish, resolve_aborted_tools};
pub(crate) use human::request_human_approve;
pub(crate) use tasks::exec_tasks;

use super::instruction::{AgentRuntimeContext, Phase, StepOutput};
use super::{AgentRuntime, StepEnv};
use crate::stream_event::AgentEvent;
use agentloop_core::agent::{AgentState, Cost, Usage};
use agentloop_core::error::Result;
use agentloop_core::message::{Message, MessagePatch, MessageToolCall, Role, ToolCallStatus};

fn output(state: AgentState, events: Vec<AgentEvent>, next: Option<Phase>) -> StepOutput {
    let next_context = next.map(|phase| AgentRuntimeContext::new(phase, &state));
    StepOutput {
        events,
        new_state: state,
        next_context,
        usage_delta: Usage::default(),
        cost_delta: Cost::default(),
    }
}

/// Write the result of `call`: update its placeholder tool message if one
/// exists, create it otherwise.
async fn upsert_tool_message(
    rt: &AgentRuntime,
    env: &StepEnv,
    messages: &[Message],
    call: &MessageToolCall,
    content: String,
    status: ToolCallStatus,
    state: Option<serde_json::Value>,
) -> Result<Message> {
    let existing = messages
        .iter()
        .find(|m| m.role == Role::Tool && m.tool_call_id.as_deref() == Some(call.id.as_str()));
    if let Some(existing) = existing {
        return Ok(rt
            .store()
            .update(&existing.id, MessagePatch::tool_result(content, status, state))
            .await?);
    }

    let mut message = Message::tool_result(&call.id, &call.name, content)
        .with_agent(env.descriptor.message_owner());
    message.tool_status = Some(status);
    message.plugin_state = state;
    if let Some(parent) = messages
        .iter()
        .rev()
        .find(|m| m.tool_calls.iter().any(|c| c.id == call.id))
    {
        message.parent_id = Some(parent.id.clone());
    }
    Ok(rt.store().create(&env.key, message).await?)
}
