use super::output;
use crate::runtime::instruction::StepOutput;
use crate::runtime::{AgentRuntime, StepEnv};
use crate::stream_event::AgentEvent;
use agentloop_core::agent::{AgentState, AgentStatus, PendingHuman};
use agentloop_core::error::Result;
use agentloop_core::message::{Message, MessageToolCall, Role, ToolCallStatus};
use chrono::Utc;

/// Park the run until a human decides on `pending`.
///
/// Each call gets a placeholder tool message in `pending_approval` state so
/// the decision survives a restart; the resumed run fills them in.
pub(crate) async fn request_human_approve(
    rt: &AgentRuntime,
    mut state: AgentState,
    env: &StepEnv,
    pending: Vec<MessageToolCall>,
) -> Result<StepOutput> {
    let mut events = Vec::new();
    let parent_id = state
        .messages
        .iter()
        .rev()
        .find(|m| m.role == Role::Assistant && !m.tool_calls.is_empty())
        .map(|m| m.id.clone());

    for call in &pending {
        let exists = state
            .messages
            .iter()
            .any(|m| m.role == Role::Tool && m.tool_call_id.as_deref() == Some(call.id.as_str()));
        if exists {
            continue;
        }
        let mut placeholder =
            Message::tool_result(&call.id, &call.name, "").with_agent(env.descriptor.message_owner());
        placeholder.tool_status = Some(ToolCallStatus::PendingApproval);
        placeholder.parent_id = parent_id.clone();
        rt.store().create(&env.key, placeholder).await?;
    }

    tracing::info!(
        operation_id = %env.operation_id,
        calls = pending.len(),
        "Waiting for human approval"
    );
    state.status = AgentStatus::WaitingForHuman;
    state.pending_human = Some(PendingHuman {
        tool_calls: pending.clone(),
        requested_at: Utc::now(),
    });
    env.emit(
        &mut events,
        AgentEvent::HumanApprovalRequested {
            tool_calls: pending.clone(),
        },
    )
    .await;

    state.messages = rt.refresh(&env.key).await?;
    let mut out = output(state, events, None);
    out.usage_delta.human.approvals_requested = pending.len() as u32;
    Ok(out)
}

#[cfg(test)]
mod tests {
    use crate::runtime::{AgentRuntimeContext, Phase};
    use crate::stream_event::AgentEvent;
    use crate::test_helpers::{EchoTool, ScriptedProvider, harness, key, make_tool_call, seed};
    use agentloop_core::agent::AgentStatus;
    use agentloop_core::message::{Message, ToolCallStatus, pending_tool_calls};
    use agentloop_core::store::MessageStore;
    use serde_json::json;

    #[tokio::test]
    async fn guarded_call_parks_the_run() {
        let h = harness(
            ScriptedProvider::default(),
            vec![EchoTool::guarded("delete_file")],
        );
        let call = make_tool_call("c1", "delete_file", json!({"path": "/tmp/x"}));
        let mut state = seed(&h, &["clean up"]).await;
        h.store
            .create(&key(), Message::assistant("").with_tool_calls(vec![call.clone()]))
            .await
            .unwrap();
        state.messages = h.store.query(&key()).await.unwrap();
        let ctx = AgentRuntimeContext::new(
            Phase::LlmResult {
                message_id: "m".into(),
                tool_calls: vec![call.clone()],
            },
            &state,
        );

        let out = h.runtime.step(state, ctx, &h.env).await.unwrap();

        assert_eq!(out.new_state.status, AgentStatus::WaitingForHuman);
        assert!(out.next_context.is_none());
        assert_eq!(out.new_state.pending_human.unwrap().tool_calls, vec![call.clone()]);
        assert_eq!(out.new_state.usage.human.approvals_requested, 1);
        let placeholder = out.new_state.messages.last().unwrap();
        assert_eq!(placeholder.tool_status, Some(ToolCallStatus::PendingApproval));
        // Still unresolved until someone decides.
        assert_eq!(pending_tool_calls(&out.new_state.messages), vec![call]);
        assert!(
            out.events
                .iter()
                .any(|e| matches!(e, AgentEvent::HumanApprovalRequested { .. }))
        );
    }
}
