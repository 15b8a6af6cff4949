//! The agent runtime: one `step()` = plan one instruction, execute it.
//!
//! A step takes the state by value and hands back a new one together with
//! the events it produced, the usage it consumed and the context for the
//! next step. The loop around it lives in [`crate::runner`].

mod executors;
pub mod instruction;
pub mod planner;

pub use instruction::{
    AgentInstruction, AgentRuntimeContext, Phase, RejectedCall, SessionInfo, StepContext,
    StepOutput, TaskSpec, ToolCallRecord,
};
pub use planner::Planner;

use crate::config::RunConfig;
use crate::context::config::{PipelineConfig, ToolsConfig};
use crate::operation::{OperationContext, OperationRegistry};
use crate::stream_event::AgentEvent;
use crate::task::TaskRunner;
use agentloop_core::agent::{AgentState, CompletionReason};
use agentloop_core::error::Result;
use agentloop_core::event::EventBus;
use agentloop_core::message::{Message, ToolCallStatus, pending_tool_calls};
use agentloop_core::provider::Provider;
use agentloop_core::store::{ConversationKey, MessageStore};
use agentloop_core::tool::{ToolExecutor, ToolManifest};
use agentloop_telemetry::{Span, TelemetryEngine};
use chrono::Utc;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Per-operation values every executor needs.
#[derive(Debug, Clone)]
pub struct StepEnv {
    pub operation_id: String,
    /// The operation's abort signal
    pub cancel: CancellationToken,
    /// Conversation the run reads and writes
    pub key: ConversationKey,
    pub descriptor: OperationContext,
    pub trace_id: Option<String>,
    /// Live event forwarding
    pub sink: Option<mpsc::Sender<AgentEvent>>,
}

impl StepEnv {
    pub fn new(
        operation_id: impl Into<String>,
        key: ConversationKey,
        descriptor: OperationContext,
    ) -> Self {
        Self {
            operation_id: operation_id.into(),
            cancel: CancellationToken::new(),
            key,
            descriptor,
            trace_id: None,
            sink: None,
        }
    }

    /// Forward an event live and keep it for the step output.
    pub(crate) async fn emit(&self, events: &mut Vec<AgentEvent>, event: AgentEvent) {
        self.forward(&event).await;
        events.push(event);
    }

    pub(crate) async fn forward(&self, event: &AgentEvent) {
        if let Some(sink) = &self.sink {
            // A dropped receiver only means nobody is watching.
            let _ = sink.send(event.clone()).await;
        }
    }
}

/// The step executor set plus its collaborators.
pub struct AgentRuntime {
    provider: Arc<dyn Provider>,
    tools: Arc<dyn ToolExecutor>,
    store: Arc<dyn MessageStore>,
    registry: Arc<OperationRegistry>,
    event_bus: Arc<EventBus>,
    telemetry: Arc<TelemetryEngine>,
    task_runner: Option<Arc<dyn TaskRunner>>,
    config: RunConfig,
}

impl AgentRuntime {
    pub fn new(
        provider: Arc<dyn Provider>,
        tools: Arc<dyn ToolExecutor>,
        store: Arc<dyn MessageStore>,
        config: RunConfig,
    ) -> Self {
        Self {
            provider,
            tools,
            store,
            registry: Arc::new(OperationRegistry::new()),
            event_bus: Arc::new(EventBus::default()),
            telemetry: Arc::new(TelemetryEngine::new()),
            task_runner: None,
            config,
        }
    }

    pub fn with_registry(mut self, registry: Arc<OperationRegistry>) -> Self {
        self.registry = registry;
        self
    }

    pub fn with_event_bus(mut self, event_bus: Arc<EventBus>) -> Self {
        self.event_bus = event_bus;
        self
    }

    pub fn with_telemetry(mut self, telemetry: Arc<TelemetryEngine>) -> Self {
        self.telemetry = telemetry;
        self
    }

    pub fn with_task_runner(mut self, task_runner: Arc<dyn TaskRunner>) -> Self {
        self.task_runner = Some(task_runner);
        self
    }

    pub fn config(&self) -> &RunConfig {
        &self.config
    }

    pub fn provider(&self) -> &Arc<dyn Provider> {
        &self.provider
    }

    pub fn tools(&self) -> &Arc<dyn ToolExecutor> {
        &self.tools
    }

    pub fn store(&self) -> &Arc<dyn MessageStore> {
        &self.store
    }

    pub fn registry(&self) -> &Arc<OperationRegistry> {
        &self.registry
    }

    pub fn event_bus(&self) -> &Arc<EventBus> {
        &self.event_bus
    }

    pub fn telemetry(&self) -> &Arc<TelemetryEngine> {
        &self.telemetry
    }

    /// Executor tools enabled for this run.
    pub fn manifests(&self) -> Vec<ToolManifest> {
        let all = self.tools.manifests();
        match &self.config.enabled_tools {
            Some(enabled) => all
                .into_iter()
                .filter(|m| enabled.iter().any(|e| *e == m.identifier))
                .collect(),
            None => all,
        }
    }

    /// Enabled tools plus tools activated mid-run.
    pub(crate) fn offered_manifests(&self, state: &AgentState, step: &StepContext) -> Vec<ToolManifest> {
        let mut offered: Vec<ToolManifest> = state.tool_manifest_map.values().cloned().collect();
        if !step.activated_tools.is_empty() {
            for manifest in self.tools.manifests() {
                if step.activated_tools.contains(&manifest.identifier)
                    && !offered.iter().any(|m| m.identifier == manifest.identifier)
                {
                    offered.push(manifest);
                }
            }
        }
        offered
    }

    /// The pipeline configuration for one `call_llm` step.
    pub(crate) fn pipeline_config(
        &self,
        descriptor: &OperationContext,
        step: &StepContext,
        manifests: &[ToolManifest],
        force_finish: bool,
    ) -> PipelineConfig {
        let mut config = self.config.pipeline.clone();
        config.model = self.config.model.clone();
        config.provider = self.config.provider.clone();
        config.force_finish = force_finish;
        if !step.todos.is_empty() {
            config.gtd_todos = Some(step.todos.clone());
        }
        config.tools_config = Some(ToolsConfig {
            manifests: manifests.to_vec(),
            function_call_supported: config.function_calling(),
        });
        if let Some(discovery) = config.tool_discovery.as_mut() {
            discovery
                .available
                .retain(|t| !manifests.iter().any(|m| m.identifier == t.identifier));
        }
        if descriptor.is_group() {
            if let Some(group) = config.group_context.as_mut() {
                group.current_agent_id = Some(descriptor.message_owner().to_string());
            }
        } else {
            config.group_context = None;
        }
        config
    }

    pub(crate) async fn refresh(&self, key: &ConversationKey) -> Result<Vec<Message>> {
        Ok(self.store.query(key).await?)
    }

    pub(crate) fn record_span(&self, env: &StepEnv, span: Span) {
        if !self.config.telemetry_enabled {
            return;
        }
        if let Some(trace_id) = &env.trace_id
            && let Err(e) = self.telemetry.record_span(trace_id, span)
        {
            tracing::warn!(error = %e, "Failed to record span");
        }
    }

    /// Plan and execute one instruction.
    pub async fn step(
        &self,
        state: AgentState,
        ctx: AgentRuntimeContext,
        env: &StepEnv,
    ) -> Result<StepOutput> {
        let executor_manifests = self.tools.manifests();
        let planner = Planner {
            compression: &self.config.compression,
            manifests: &executor_manifests,
        };
        let instruction = planner.plan(&state, &ctx);
        let step = state.step_count + 1;

        tracing::debug!(
            operation_id = %env.operation_id,
            step,
            phase = ctx.phase.name(),
            instruction = instruction.kind(),
            "Executing step"
        );
        let start = AgentEvent::StepStart {
            step,
            instruction: instruction.kind().to_string(),
        };
        env.forward(&start).await;

        let mut out = self.execute(instruction, state, &ctx, env).await?;

        out.events.insert(0, start);
        let state = &mut out.new_state;
        state.step_count = step;
        state.usage.accumulate(&out.usage_delta);
        state.cost.accumulate(&out.cost_delta);
        state.updated_at = Utc::now();
        if let Some(next) = out.next_context.as_mut() {
            next.session = SessionInfo {
                session_id: state.session_id.clone(),
                step_count: state.step_count,
                message_count: state.messages.len(),
            };
        }
        Ok(out)
    }

    async fn execute(
        &self,
        instruction: AgentInstruction,
        state: AgentState,
        ctx: &AgentRuntimeContext,
        env: &StepEnv,
    ) -> Result<StepOutput> {
        match instruction {
            AgentInstruction::CallLlm { force_finish } => {
                executors::call_llm(self, state, ctx, env, force_finish).await
            }
            AgentInstruction::CallTool { call } => {
                executors::call_tools(self, state, env, vec![call], Vec::new(), false).await
            }
            AgentInstruction::CallToolsBatch { calls, rejected } => {
                executors::call_tools(self, state, env, calls, rejected, true).await
            }
            AgentInstruction::RequestHumanApprove { pending } => {
                executors::request_human_approve(self, state, env, pending).await
            }
            AgentInstruction::ExecTasks {
                parent_call_id,
                tasks,
            } => executors::exec_tasks(self, state, env, parent_call_id, tasks).await,
            AgentInstruction::CompressContext => executors::compress_context(self, state, env).await,
            AgentInstruction::ResolveAbortedTools {
                pending,
                status,
                reason,
            } => executors::resolve_aborted_tools(self, state, env, pending, status, reason).await,
            AgentInstruction::Finish { reason } => executors::finish(self, state, env, reason).await,
        }
    }

    /// End a run without taking another step.
    ///
    /// Unresolved tool calls get a synthetic `status` result. Used by the
    /// runner when the step limit is reached.
    pub async fn finalize(
        &self,
        state: AgentState,
        env: &StepEnv,
        status: ToolCallStatus,
        reason: CompletionReason,
    ) -> Result<(AgentState, Vec<AgentEvent>)> {
        let pending = pending_tool_calls(&state.messages);
        let out = executors::resolve_aborted_tools(self, state, env, pending, status, reason).await?;
        Ok((out.new_state, out.events))
    }
}

#[cfg(test)]
mod tests;
