use super::output;
use crate::context::PipelineAssembler;
use crate::context::processors::provider_tool_name;
use crate::runtime::instruction::{AgentRuntimeContext, Phase, StepOutput};
use crate::runtime::{AgentRuntime, StepEnv};
use crate::stream_event::AgentEvent;
use agentloop_core::agent::{AgentState, AgentStatus, CompletionReason, Cost, Usage};
use agentloop_core::error::{ProviderError, Result};
use agentloop_core::event::DomainEvent;
use agentloop_core::message::{Message, MessageError, MessagePatch, MessageToolCall};
use agentloop_core::provider::{
    FinishReason, ProviderRequest, TokenUsage, ToolCallAccumulator, ToolDefinition,
};
use agentloop_telemetry::{Span, SpanKind};
use chrono::Utc;
use std::collections::HashMap;

enum TurnEnd {
    Finished(FinishReason),
    Cancelled,
    Failed(ProviderError),
}

struct Turn {
    content: String,
    tool_calls: Vec<MessageToolCall>,
    usage: Option<TokenUsage>,
    end: TurnEnd,
}

/// Assemble the context, stream one model turn and persist it.
pub(crate) async fn call_llm(
    rt: &AgentRuntime,
    mut state: AgentState,
    ctx: &AgentRuntimeContext,
    env: &StepEnv,
    force_finish: bool,
) -> Result<StepOutput> {
    let config = rt.config();
    let step = state.step_count + 1;
    let mut events = Vec::new();

    let manifests = rt.offered_manifests(&state, &ctx.step_context);
    let pipeline = rt.pipeline_config(&env.descriptor, &ctx.step_context, &manifests, force_finish);
    let assembled = PipelineAssembler::assemble(&pipeline, &state.messages)?;

    let mut name_map = HashMap::new();
    let tools: Vec<ToolDefinition> = if force_finish || !pipeline.function_calling() {
        Vec::new()
    } else {
        manifests
            .iter()
            .map(|m| {
                let name = provider_tool_name(&m.identifier);
                name_map.insert(name.clone(), m.identifier.clone());
                ToolDefinition {
                    name,
                    ..m.to_definition()
                }
            })
            .collect()
    };

    let mut draft = Message::assistant("").with_agent(env.descriptor.message_owner());
    if let Some(last) = state.messages.last() {
        draft.parent_id = Some(last.id.clone());
    }
    let draft = rt.store().create(&env.key, draft).await?;

    tracing::debug!(
        operation_id = %env.operation_id,
        model = %config.model,
        messages = assembled.messages.len(),
        tools = tools.len(),
        force_finish,
        "Calling model"
    );
    let request = ProviderRequest {
        model: config.model.clone(),
        messages: assembled.messages,
        temperature: config.temperature,
        max_tokens: config.max_tokens,
        tools,
        stream: true,
    };

    let mut span = Span::new(SpanKind::LlmCall, &config.model, step);
    let mut turn = stream_turn(rt, env, request, &mut events).await;
    for call in &mut turn.tool_calls {
        if let Some(original) = name_map.get(&call.name) {
            call.name = original.clone();
        }
    }

    let mut usage_delta = Usage::default();
    let mut cost_delta = Cost::default();
    usage_delta.llm.calls = 1;
    if let Some(usage) = &turn.usage {
        usage_delta.llm.prompt_tokens = u64::from(usage.prompt_tokens);
        usage_delta.llm.completion_tokens = u64::from(usage.completion_tokens);
        usage_delta.llm.total_tokens = u64::from(usage.total_tokens);
        let cost = rt
            .telemetry()
            .compute_cost(&config.model, usage.prompt_tokens, usage.completion_tokens);
        cost_delta = Cost::llm(cost);
        span.record_tokens(usage.prompt_tokens, usage.completion_tokens, cost);
    }

    let next = match turn.end {
        TurnEnd::Finished(FinishReason::Stop | FinishReason::ToolCalls) => {
            let message = rt
                .store()
                .update(
                    &draft.id,
                    MessagePatch {
                        content: Some(turn.content),
                        tool_calls: Some(turn.tool_calls.clone()),
                        ..MessagePatch::default()
                    },
                )
                .await?;
            span.end(true);
            rt.event_bus().publish(DomainEvent::ResponseGenerated {
                operation_id: env.operation_id.clone(),
                model: config.model.clone(),
                tokens_used: turn.usage.as_ref().map_or(0, |u| u.total_tokens),
                timestamp: Utc::now(),
            });
            Some(Phase::LlmResult {
                message_id: message.id,
                tool_calls: turn.tool_calls,
            })
        }
        TurnEnd::Finished(FinishReason::Abort) | TurnEnd::Cancelled => {
            // Keep what was generated; it is a partial turn, not a failure.
            rt.store()
                .update(
                    &draft.id,
                    MessagePatch {
                        content: Some(turn.content),
                        tool_calls: Some(turn.tool_calls.clone()),
                        ..MessagePatch::default()
                    },
                )
                .await?;
            span.end(false);
            span.metadata.insert("aborted".into(), true.into());
            tracing::info!(operation_id = %env.operation_id, step, "Model turn aborted");
            Some(Phase::HumanAbort {
                reason: Some("model turn aborted".into()),
                partial_message_id: Some(draft.id.clone()),
                pending: turn.tool_calls,
            })
        }
        end @ (TurnEnd::Finished(FinishReason::Error) | TurnEnd::Failed(_)) => {
            let reason = match end {
                TurnEnd::Failed(e) => e.to_string(),
                _ => "model finished with an error".to_string(),
            };
            tracing::warn!(operation_id = %env.operation_id, step, error = %reason, "Model call failed");
            let error = MessageError::new("provider", reason.clone());
            rt.store()
                .update(
                    &draft.id,
                    MessagePatch {
                        content: Some(turn.content),
                        error: Some(Some(error.clone())),
                        ..MessagePatch::default()
                    },
                )
                .await?;
            span.end(false);
            state.status = AgentStatus::Error;
            state.completion_reason = Some(CompletionReason::Error);
            state.error = Some(error);
            rt.event_bus().publish(DomainEvent::ErrorOccurred {
                context: format!("call_llm:{}", env.operation_id),
                error_message: reason.clone(),
                timestamp: Utc::now(),
            });
            env.emit(&mut events, AgentEvent::Error { message: reason }).await;
            None
        }
    };
    rt.record_span(env, span);

    state.messages = rt.refresh(&env.key).await?;
    let mut out = output(state, events, next);
    out.usage_delta = usage_delta;
    out.cost_delta = cost_delta;
    Ok(out)
}

/// Drain the provider stream, forwarding text as `chunk` events.
async fn stream_turn(
    rt: &AgentRuntime,
    env: &StepEnv,
    request: ProviderRequest,
    events: &mut Vec<AgentEvent>,
) -> Turn {
    let mut turn = Turn {
        content: String::new(),
        tool_calls: Vec::new(),
        usage: None,
        end: TurnEnd::Cancelled,
    };

    let mut rx = tokio::select! {
        biased;
        _ = env.cancel.cancelled() => return turn,
        result = rt.provider().stream(request) => match result {
            Ok(rx) => rx,
            Err(e) => {
                turn.end = TurnEnd::Failed(e);
                return turn;
            }
        },
    };

    let mut calls = ToolCallAccumulator::default();
    turn.end = loop {
        let chunk = tokio::select! {
            biased;
            _ = env.cancel.cancelled() => break TurnEnd::Cancelled,
            chunk = rx.recv() => chunk,
        };
        match chunk {
            // A closed stream without a finish reason still ends the turn.
            None if calls.is_empty() => break TurnEnd::Finished(FinishReason::Stop),
            None => break TurnEnd::Finished(FinishReason::ToolCalls),
            Some(Err(e)) => break TurnEnd::Failed(e),
            Some(Ok(chunk)) => {
                if let Some(text) = chunk.content.filter(|t| !t.is_empty()) {
                    turn.content.push_str(&text);
                    env.emit(events, AgentEvent::Chunk { content: text }).await;
                }
                for delta in &chunk.tool_calls {
                    calls.push(delta);
                }
                if chunk.usage.is_some() {
                    turn.usage = chunk.usage;
                }
                if let Some(reason) = chunk.finish_reason {
                    break TurnEnd::Finished(reason);
                }
            }
        }
    };
    turn.tool_calls = calls.finish();
    turn
}
