use super::{output, upsert_tool_message};
use crate::runtime::instruction::StepOutput;
use crate::runtime::{AgentRuntime, StepEnv};
use crate::stream_event::AgentEvent;
use agentloop_core::agent::{AgentState, AgentStatus, CompletionReason};
use agentloop_core::error::Result;
use agentloop_core::message::{MessageToolCall, ToolCallStatus};

/// Answer every unresolved call with a synthetic result, then finish.
pub(crate) async fn resolve_aborted_tools(
    rt: &AgentRuntime,
    state: AgentState,
    env: &StepEnv,
    pending: Vec<MessageToolCall>,
    status: ToolCallStatus,
    reason: CompletionReason,
) -> Result<StepOutput> {
    let mut events = Vec::new();
    let content = match status {
        ToolCallStatus::Skipped => "Tool call skipped: the step limit was reached.",
        ToolCallStatus::Rejected => "Tool call rejected.",
        _ => "Tool call cancelled before it ran.",
    };

    for call in &pending {
        upsert_tool_message(rt, env, &state.messages, call, content.to_string(), status, None).await?;
        env.emit(
            &mut events,
            AgentEvent::ToolResult {
                id: call.id.clone(),
                name: call.name.clone(),
                content: content.to_string(),
                success: false,
            },
        )
        .await;
    }
    if !pending.is_empty() {
        tracing::debug!(
            operation_id = %env.operation_id,
            calls = pending.len(),
            ?status,
            "Resolved unfinished tool calls"
        );
    }

    let mut out = finish(rt, state, env, reason).await?;
    events.append(&mut out.events);
    out.events = events;
    Ok(out)
}

pub(crate) async fn finish(
    rt: &AgentRuntime,
    mut state: AgentState,
    env: &StepEnv,
    reason: CompletionReason,
) -> Result<StepOutput> {
    state.status = AgentStatus::Done;
    state.completion_reason = Some(reason);
    state.pending_human = None;
    state.messages = rt.refresh(&env.key).await?;
    Ok(output(state, Vec::new(), None))
}
