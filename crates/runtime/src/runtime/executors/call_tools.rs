use super::{output, upsert_tool_message};
use crate::runtime::instruction::{Phase, RejectedCall, StepOutput, ToolCallRecord};
use crate::runtime::{AgentRuntime, StepEnv};
use crate::stream_event::AgentEvent;
use agentloop_core::agent::{AgentState, Usage};
use agentloop_core::error::{Result, ToolError};
use agentloop_core::event::DomainEvent;
use agentloop_core::message::{Message, MessageToolCall, ToolCallStatus};
use agentloop_core::tool::ToolInvocation;
use agentloop_telemetry::{Span, SpanKind};
use chrono::Utc;
use futures::future::join_all;
use std::time::Instant;

struct ToolRun {
    record: ToolCallRecord,
    events: Vec<AgentEvent>,
    duration_ms: u64,
}

/// Run `calls` concurrently and write one tool message per call.
///
/// Rejected calls are answered first, without running anything. The log is
/// re-read afterwards so the returned state holds every result.
pub(crate) async fn call_tools(
    rt: &AgentRuntime,
    mut state: AgentState,
    env: &StepEnv,
    calls: Vec<MessageToolCall>,
    rejected: Vec<RejectedCall>,
    batch: bool,
) -> Result<StepOutput> {
    let step = state.step_count + 1;
    let mut events = Vec::new();

    for RejectedCall { call, reason } in &rejected {
        let content = match reason {
            Some(reason) => format!("The user rejected this tool call: {reason}"),
            None => "The user rejected this tool call.".to_string(),
        };
        upsert_tool_message(
            rt,
            env,
            &state.messages,
            call,
            content.clone(),
            ToolCallStatus::Rejected,
            None,
        )
        .await?;
        env.emit(
            &mut events,
            AgentEvent::ToolResult {
                id: call.id.clone(),
                name: call.name.clone(),
                content,
                success: false,
            },
        )
        .await;
    }

    let runs = join_all(
        calls
            .iter()
            .map(|call| run_one(rt, env, &state.messages, call, step)),
    )
    .await;

    let mut usage_delta = Usage::default();
    let mut results = Vec::with_capacity(runs.len());
    for run in runs {
        let run = run?;
        usage_delta.tools.calls += 1;
        if !run.record.success {
            usage_delta.tools.failed += 1;
        }
        usage_delta.tools.total_duration_ms += run.duration_ms;
        events.extend(run.events);
        results.push(run.record);
    }

    state.messages = rt.refresh(&env.key).await?;

    let next = match (batch, results.len()) {
        (false, 1) => Phase::ToolResult {
            result: results.remove(0),
        },
        _ => Phase::ToolBatchResult { results },
    };
    let mut out = output(state, events, Some(next));
    out.usage_delta = usage_delta;
    Ok(out)
}

async fn run_one(
    rt: &AgentRuntime,
    env: &StepEnv,
    messages: &[Message],
    call: &MessageToolCall,
    step: u32,
) -> Result<ToolRun> {
    let mut events = Vec::new();
    let arguments = call.parsed_arguments();
    env.emit(
        &mut events,
        AgentEvent::ToolCall {
            id: call.id.clone(),
            name: call.name.clone(),
            arguments: arguments.clone(),
        },
    )
    .await;

    let mut span = Span::new(SpanKind::ToolExecution, &call.name, step);
    let started = Instant::now();
    let outcome = rt
        .tools()
        .execute(ToolInvocation {
            call_id: call.id.clone(),
            name: call.name.clone(),
            arguments,
            operation_id: env.operation_id.clone(),
            cancel: env.cancel.clone(),
        })
        .await;
    let duration_ms = started.elapsed().as_millis() as u64;

    let status = match &outcome.error {
        None if outcome.success => ToolCallStatus::Succeeded,
        Some(ToolError::Cancelled(_)) => ToolCallStatus::Cancelled,
        _ => ToolCallStatus::Failed,
    };
    tracing::debug!(
        operation_id = %env.operation_id,
        tool = %call.name,
        duration_ms,
        success = outcome.success,
        "Tool call finished"
    );

    let message = upsert_tool_message(
        rt,
        env,
        messages,
        call,
        outcome.content.clone(),
        status,
        outcome.state.clone(),
    )
    .await?;

    span.end(outcome.success);
    if let Some(error) = &outcome.error {
        span.metadata.insert("error_kind".into(), error.kind().into());
    }
    rt.record_span(env, span);
    rt.event_bus().publish(DomainEvent::ToolExecuted {
        operation_id: env.operation_id.clone(),
        tool_name: call.name.clone(),
        success: outcome.success,
        duration_ms,
        timestamp: Utc::now(),
    });
    env.emit(
        &mut events,
        AgentEvent::ToolResult {
            id: call.id.clone(),
            name: call.name.clone(),
            content: outcome.content,
            success: outcome.success,
        },
    )
    .await;

    Ok(ToolRun {
        record: ToolCallRecord {
            tool_call_id: call.id.clone(),
            name: call.name.clone(),
            success: outcome.success,
            state: outcome.state,
            message_id: message.id,
        },
        events,
        duration_ms,
    })
}
