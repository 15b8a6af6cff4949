use super::output;
use crate::runtime::instruction::{Phase, StepOutput};
use crate::runtime::planner::uncompressed;
use crate::runtime::{AgentRuntime, StepEnv};
use crate::stream_event::AgentEvent;
use agentloop_core::agent::{AgentState, Cost, Usage};
use agentloop_core::error::Result;
use agentloop_core::message::{Message, MessagePatch, Role};
use agentloop_core::provider::ProviderRequest;
use agentloop_telemetry::{Span, SpanKind};

const SUMMARY_PROMPT: &str = "You compress conversations. Summarise the conversation below so an \
assistant can continue it without the original messages. Keep decisions, facts, open questions \
and tool results that are still relevant. Reply with the summary only.";

/// Summarise older history into one `compressed_group` message.
///
/// The newest `keep_recent` messages stay untouched. A failed summary call
/// leaves history as it was; compression is retried after the next tool
/// step.
pub(crate) async fn compress_context(
    rt: &AgentRuntime,
    mut state: AgentState,
    env: &StepEnv,
) -> Result<StepOutput> {
    let config = rt.config();
    let step = state.step_count + 1;
    let mut events = Vec::new();
    let skipped = Phase::CompressionResult {
        summary_message_id: None,
        compressed_count: 0,
    };

    let live: Vec<&Message> = uncompressed(&state.messages)
        .into_iter()
        .filter(|m| m.role != Role::System)
        .collect();
    let Some(mut split) = live.len().checked_sub(config.compression.keep_recent) else {
        return Ok(output(state, events, Some(skipped)));
    };
    // Tool results stay next to the call that produced them.
    while split > 0 && live.get(split).is_some_and(|m| m.role == Role::Tool) {
        split -= 1;
    }
    if split == 0 {
        return Ok(output(state, events, Some(skipped)));
    }
    let older = &live[..split];

    let previous = state
        .messages
        .iter()
        .rev()
        .find(|m| m.role == Role::CompressedGroup)
        .map(|m| format!("Summary so far:\n{}\n\n", m.content))
        .unwrap_or_default();
    let transcript = older
        .iter()
        .map(|m| format!("{}: {}", m.role, m.content))
        .collect::<Vec<_>>()
        .join("\n");
    let request = ProviderRequest {
        model: config.model.clone(),
        messages: vec![
            Message::system(SUMMARY_PROMPT),
            Message::user(format!("{previous}Conversation:\n{transcript}")),
        ],
        temperature: 0.2,
        max_tokens: config.max_tokens,
        tools: Vec::new(),
        stream: false,
    };

    let mut span = Span::new(SpanKind::Compression, &config.model, step);
    let response = tokio::select! {
        biased;
        _ = env.cancel.cancelled() => {
            return Ok(output(state, events, Some(skipped)));
        }
        response = rt.provider().complete(request) => response,
    };
    let response = match response {
        Ok(response) => response,
        Err(e) => {
            tracing::warn!(operation_id = %env.operation_id, error = %e, "History compression failed");
            span.end(false);
            rt.record_span(env, span);
            let mut out = output(state, events, Some(skipped));
            out.usage_delta.llm.calls = 1;
            return Ok(out);
        }
    };

    let mut usage_delta = Usage::default();
    let mut cost_delta = Cost::default();
    usage_delta.llm.calls = 1;
    if let Some(usage) = &response.usage {
        usage_delta.llm.prompt_tokens = u64::from(usage.prompt_tokens);
        usage_delta.llm.completion_tokens = u64::from(usage.completion_tokens);
        usage_delta.llm.total_tokens = u64::from(usage.total_tokens);
        let cost = rt
            .telemetry()
            .compute_cost(&config.model, usage.prompt_tokens, usage.completion_tokens);
        cost_delta = Cost::llm(cost);
        span.record_tokens(usage.prompt_tokens, usage.completion_tokens, cost);
    }

    let compressed_count = older.len();
    let mut summary = Message::new(Role::CompressedGroup, response.message.content)
        .with_agent(env.descriptor.message_owner());
    summary
        .metadata
        .insert("compressed_count".into(), compressed_count.into());
    let ids: Vec<String> = older.iter().map(|m| m.id.clone()).collect();
    let summary = rt.store().create(&env.key, summary).await?;
    for id in &ids {
        rt.store().update(id, MessagePatch::compressed()).await?;
    }
    span.end(true);
    rt.record_span(env, span);
    tracing::info!(
        operation_id = %env.operation_id,
        compressed_count,
        "Compressed history"
    );

    env.emit(
        &mut events,
        AgentEvent::ContextCompressed {
            compressed_count,
            summary_message_id: summary.id.clone(),
        },
    )
    .await;
    state.messages = rt.refresh(&env.key).await?;
    let mut out = output(
        state,
        events,
        Some(Phase::CompressionResult {
            summary_message_id: Some(summary.id),
            compressed_count,
        }),
    );
    out.usage_delta = usage_delta;
    out.cost_delta = cost_delta;
    Ok(out)
}
