//! `agentloop dry-run`: drive the real run loop without a model backend.
//!
//! The scripted provider asks for the `echo` tool once, then answers with
//! what the tool returned. Every streaming event is printed as a JSON line.

use super::load_config;
use agentloop_core::error::{ProviderError, ToolError};
use agentloop_core::message::{Message, MessageToolCall, Role};
use agentloop_core::provider::{Provider, ProviderRequest, ProviderResponse, TokenUsage};
use agentloop_core::store::{ConversationKey, InMemoryMessageStore};
use agentloop_core::tool::{Tool, ToolInvocation, ToolOutput, ToolRegistry};
use agentloop_runtime::{
    AgentEvent, AgentRunner, AgentRuntime, OperationContext, RunConfig, RunRequest,
};
use agentloop_telemetry::{ModelPricing, PricingTable, TelemetryEngine};
use async_trait::async_trait;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Calls `echo` with the latest user text, then replies with its result.
pub struct EchoProvider;

#[async_trait]
impl Provider for EchoProvider {
    fn name(&self) -> &str {
        "echo"
    }

    async fn complete(&self, request: ProviderRequest) -> Result<ProviderResponse, ProviderError> {
        let last = request
            .messages
            .iter()
            .rev()
            .find(|m| m.role != Role::System);
        let message = match last {
            Some(m) if m.role == Role::Tool => Message::assistant(format!("The tool said: {}", m.content)),
            Some(m) if request.tools.iter().any(|t| t.name == "echo") => {
                let arguments = serde_json::json!({ "text": m.content });
                Message::assistant("").with_tool_calls(vec![MessageToolCall::new(
                    "call_echo",
                    "echo",
                    arguments.to_string(),
                )])
            }
            Some(m) => Message::assistant(format!("You said: {}", m.content)),
            None => Message::assistant("Nothing to answer."),
        };

        let prompt_tokens = request
            .messages
            .iter()
            .map(|m| m.content.len() as u32 / 4)
            .sum::<u32>();
        let completion_tokens = message.content.len() as u32 / 4 + 1;
        Ok(ProviderResponse {
            message,
            usage: Some(TokenUsage {
                prompt_tokens,
                completion_tokens,
                total_tokens: prompt_tokens + completion_tokens,
            }),
            model: request.model,
            finish_reason: None,
        })
    }
}

/// Returns its `text` argument.
pub struct EchoTool;

#[async_trait]
impl Tool for EchoTool {
    fn name(&self) -> &str {
        "echo"
    }

    fn description(&self) -> &str {
        "Repeat the given text back"
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": { "text": { "type": "string" } },
            "required": ["text"]
        })
    }

    async fn execute(&self, invocation: &ToolInvocation) -> Result<ToolOutput, ToolError> {
        let text = invocation.arguments["text"].as_str().ok_or_else(|| {
            ToolError::InvalidArguments("missing string argument `text`".into())
        })?;
        Ok(ToolOutput::text(text))
    }
}

pub async fn run(
    config_path: Option<&Path>,
    instruction: String,
    max_steps: Option<u32>,
) -> anyhow::Result<()> {
    let app = load_config(config_path)?;
    let mut config = RunConfig::from_app_config(&app);
    if let Some(max_steps) = max_steps {
        config = config.with_max_steps(max_steps);
    }
    config.validate()?;

    let pricing = PricingTable::with_defaults();
    for custom in &app.telemetry.pricing {
        pricing.set(
            custom.model.clone(),
            ModelPricing::new(custom.input_per_m, custom.output_per_m),
        );
    }

    let mut tools = ToolRegistry::new();
    tools.register(Arc::new(EchoTool));
    let agent_id = config.agent_id.clone();
    let runtime = AgentRuntime::new(
        Arc::new(EchoProvider),
        Arc::new(tools),
        Arc::new(InMemoryMessageStore::new()),
        config,
    )
    .with_telemetry(Arc::new(TelemetryEngine::with_pricing(pricing)));

    let (tx, mut rx) = mpsc::channel::<AgentEvent>(64);
    let printer = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            match serde_json::to_string(&event) {
                Ok(line) => println!("{line}"),
                Err(e) => tracing::warn!(error = %e, "Failed to render event"),
            }
        }
    });

    let runner = AgentRunner::new(runtime).with_event_sink(tx);
    let request = RunRequest::new(
        ConversationKey::new(format!("dry-run-{}", chrono::Utc::now().timestamp_millis())),
        OperationContext::new(agent_id),
    )
    .with_instruction(instruction);
    let outcome = runner.run(request).await?;
    drop(runner);
    printer.await?;

    let state = &outcome.state;
    eprintln!();
    eprintln!("  Operation:  {}", outcome.operation_id);
    eprintln!("  Status:     {}", state.status);
    eprintln!("  Steps:      {}", state.step_count);
    eprintln!("  Messages:   {}", state.messages.len());
    eprintln!("  Tokens:     {}", state.usage.llm.total_tokens);
    eprintln!("  Cost:       ${:.6}", state.cost.total_usd);
    if let Some(answer) = state
        .messages
        .iter()
        .rev()
        .find(|m| m.role == Role::Assistant && !m.content.is_empty())
    {
        eprintln!();
        eprintln!("  {}", answer.content);
    }
    Ok(())
}
