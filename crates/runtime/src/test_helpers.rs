//! Shared test helpers: a scripted provider, a few tools and a runtime
//! harness wired to an in-memory store.

use crate::config::RunConfig;
use crate::operation::OperationContext;
use crate::runtime::{AgentRuntime, StepEnv};
use agentloop_core::agent::AgentState;
use agentloop_core::error::{ProviderError, ToolError};
use agentloop_core::message::{Message, MessageToolCall};
use agentloop_core::provider::{
    ChunkReceiver, Provider, ProviderRequest, ProviderResponse, StreamChunk, TokenUsage,
    response_to_chunks,
};
use agentloop_core::store::{ConversationKey, InMemoryMessageStore, MessageStore};
use agentloop_core::tool::{HumanIntervention, Tool, ToolInvocation, ToolOutput, ToolRegistry};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;

// ── Provider ──────────────────────────────────────────────────────────────

/// One scripted model turn.
pub enum StreamScript {
    Respond(ProviderResponse),
    /// The stream yields an error chunk
    Fail(String),
    /// Send this text, then never finish
    Hang(String),
}

#[derive(Default)]
struct Script {
    turns: Mutex<VecDeque<StreamScript>>,
    fallback: Mutex<Option<ProviderResponse>>,
    requests: Mutex<Vec<ProviderRequest>>,
    held: Mutex<Vec<mpsc::Sender<Result<StreamChunk, ProviderError>>>>,
}

/// Plays back scripted turns in order.
#[derive(Clone, Default)]
pub struct ScriptedProvider {
    script: Arc<Script>,
}

impl ScriptedProvider {
    pub fn new(responses: Vec<ProviderResponse>) -> Self {
        Self::streaming(responses.into_iter().map(StreamScript::Respond).collect())
    }

    pub fn streaming(turns: Vec<StreamScript>) -> Self {
        let provider = Self::default();
        *provider.script.turns.lock().unwrap() = turns.into();
        provider
    }

    /// Answer every call past the script with `response`.
    pub fn repeating(response: ProviderResponse) -> Self {
        let provider = Self::default();
        *provider.script.fallback.lock().unwrap() = Some(response);
        provider
    }

    pub fn requests(&self) -> Vec<ProviderRequest> {
        self.script.requests.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.script.requests.lock().unwrap().len()
    }

    fn next_turn(&self, request: ProviderRequest) -> StreamScript {
        self.script.requests.lock().unwrap().push(request);
        if let Some(turn) = self.script.turns.lock().unwrap().pop_front() {
            return turn;
        }
        match self.script.fallback.lock().unwrap().clone() {
            Some(response) => StreamScript::Respond(response),
            None => panic!("ScriptedProvider: no more responses"),
        }
    }
}

#[async_trait]
impl Provider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn complete(&self, request: ProviderRequest) -> Result<ProviderResponse, ProviderError> {
        match self.next_turn(request) {
            StreamScript::Respond(response) => Ok(response),
            StreamScript::Fail(message) => Err(ProviderError::Network(message)),
            StreamScript::Hang(_) => std::future::pending().await,
        }
    }

    async fn stream(&self, request: ProviderRequest) -> Result<ChunkReceiver, ProviderError> {
        let (tx, rx) = mpsc::channel(16);
        match self.next_turn(request) {
            StreamScript::Respond(response) => {
                for chunk in response_to_chunks(response) {
                    tx.send(Ok(chunk)).await.unwrap();
                }
            }
            StreamScript::Fail(message) => {
                tx.send(Err(ProviderError::StreamInterrupted(message)))
                    .await
                    .unwrap();
            }
            StreamScript::Hang(text) => {
                tx.send(Ok(StreamChunk {
                    content: Some(text),
                    ..StreamChunk::default()
                }))
                .await
                .unwrap();
                self.script.held.lock().unwrap().push(tx);
            }
        }
        Ok(rx)
    }
}

/// A plain text response (no tool calls).
pub fn make_text_response(text: &str) -> ProviderResponse {
    ProviderResponse {
        message: Message::assistant(text),
        usage: Some(TokenUsage {
            prompt_tokens: 10,
            completion_tokens: 5,
            total_tokens: 15,
        }),
        model: "mock-model".into(),
        finish_reason: None,
    }
}

/// A response requesting `tool_calls`, with optional thought content.
pub fn make_tool_call_response(tool_calls: Vec<MessageToolCall>, thought: &str) -> ProviderResponse {
    ProviderResponse {
        message: Message::assistant(thought).with_tool_calls(tool_calls),
        ..make_text_response(thought)
    }
}

pub fn make_tool_call(id: &str, name: &str, args: serde_json::Value) -> MessageToolCall {
    MessageToolCall::new(id, name, args.to_string())
}

// ── Tools ─────────────────────────────────────────────────────────────────

/// Returns its `text` argument, or a fixed output when configured.
pub struct EchoTool {
    name: String,
    output: Option<ToolOutput>,
    approval: bool,
}

impl EchoTool {
    pub fn named(name: &str) -> Arc<dyn Tool> {
        Arc::new(Self {
            name: name.into(),
            output: None,
            approval: false,
        })
    }

    pub fn with_output(name: &str, output: ToolOutput) -> Arc<dyn Tool> {
        Arc::new(Self {
            name: name.into(),
            output: Some(output),
            approval: false,
        })
    }

    pub fn guarded(name: &str) -> Arc<dyn Tool> {
        Arc::new(Self {
            name: name.into(),
            output: None,
            approval: true,
        })
    }
}

#[async_trait]
impl Tool for EchoTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        "Echoes back the input"
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": { "text": { "type": "string" } }
        })
    }

    fn human_intervention(&self) -> HumanIntervention {
        if self.approval {
            HumanIntervention::Required
        } else {
            HumanIntervention::Never
        }
    }

    async fn execute(&self, invocation: &ToolInvocation) -> Result<ToolOutput, ToolError> {
        if let Some(output) = &self.output {
            return Ok(output.clone());
        }
        let text = invocation.arguments["text"].as_str().unwrap_or("ok");
        Ok(ToolOutput::text(format!("echo: {text}")))
    }
}

/// Sleeps until cancelled.
pub struct SlowTool;

impl SlowTool {
    pub fn shared() -> Arc<dyn Tool> {
        Arc::new(Self)
    }
}

#[async_trait]
impl Tool for SlowTool {
    fn name(&self) -> &str {
        "slow"
    }

    fn description(&self) -> &str {
        "Takes a long time"
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({ "type": "object" })
    }

    async fn execute(&self, invocation: &ToolInvocation) -> Result<ToolOutput, ToolError> {
        tokio::select! {
            _ = invocation.cancel.cancelled() => Err(ToolError::Cancelled("slow".into())),
            _ = tokio::time::sleep(Duration::from_secs(30)) => Ok(ToolOutput::text("finally")),
        }
    }
}

pub struct FailingTool;

impl FailingTool {
    pub fn shared() -> Arc<dyn Tool> {
        Arc::new(Self)
    }
}

#[async_trait]
impl Tool for FailingTool {
    fn name(&self) -> &str {
        "broken"
    }

    fn description(&self) -> &str {
        "Always fails"
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({ "type": "object" })
    }

    async fn execute(&self, _: &ToolInvocation) -> Result<ToolOutput, ToolError> {
        Err(ToolError::ExecutionFailed {
            tool_name: "broken".into(),
            reason: "disk full".into(),
        })
    }
}

// ── Harness ───────────────────────────────────────────────────────────────

pub struct Harness {
    pub runtime: AgentRuntime,
    pub store: InMemoryMessageStore,
    pub env: StepEnv,
}

pub fn key() -> ConversationKey {
    ConversationKey::new("session-1")
}

pub fn harness(provider: ScriptedProvider, tools: Vec<Arc<dyn Tool>>) -> Harness {
    harness_with(provider, tools, RunConfig::new("test-model"))
}

pub fn harness_with(
    provider: ScriptedProvider,
    tools: Vec<Arc<dyn Tool>>,
    config: RunConfig,
) -> Harness {
    let mut registry = ToolRegistry::new();
    for tool in tools {
        registry.register(tool);
    }
    let store = InMemoryMessageStore::new();
    let runtime = AgentRuntime::new(
        Arc::new(provider),
        Arc::new(registry),
        Arc::new(store.clone()),
        config,
    );
    let env = env_for(&runtime);
    Harness {
        runtime,
        store,
        env,
    }
}

/// A fresh operation on the harness runtime.
pub fn env(h: &Harness) -> StepEnv {
    env_for(&h.runtime)
}

fn env_for(runtime: &AgentRuntime) -> StepEnv {
    let descriptor = OperationContext::new("agent-1");
    let id = runtime.registry().start(descriptor.clone());
    let mut env = StepEnv::new(&id, key(), descriptor);
    env.cancel = runtime.registry().token(&id).unwrap();
    env
}

/// Persist user messages and return a fresh state over them.
pub async fn seed(h: &Harness, texts: &[&str]) -> AgentState {
    for text in texts {
        h.store.create(&key(), Message::user(*text)).await.unwrap();
    }
    let mut state = AgentState::new("session-1", 10).with_tools(h.runtime.manifests());
    state.messages = h.store.query(&key()).await.unwrap();
    state
}
