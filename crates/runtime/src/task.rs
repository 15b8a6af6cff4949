//! Delegated sub-agent tasks.
//!
//! A tool can hand work off by returning an `exec_tasks` state. Each task
//! runs as a child operation on its own thread of the conversation; its
//! final answer comes back to the parent as a `task` message.

use crate::config::RunConfig;
use crate::operation::{OperationContext, OperationRegistry};
use crate::runner::AgentRunner;
use crate::runtime::{AgentRuntime, TaskSpec};
use agentloop_core::agent::{AgentStatus, CompletionReason};
use agentloop_core::event::EventBus;
use agentloop_core::provider::Provider;
use agentloop_core::store::{ConversationKey, MessageStore};
use agentloop_core::tool::ToolExecutor;
use agentloop_telemetry::TelemetryEngine;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Completed,
    Failed,
    Cancelled,
}

impl TaskStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }
}

/// One task, already registered as a child operation.
#[derive(Debug, Clone)]
pub struct TaskRequest {
    pub operation_id: String,
    pub parent_operation_id: String,
    /// The task's own thread
    pub key: ConversationKey,
    pub context: OperationContext,
    pub task: TaskSpec,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TaskOutcome {
    pub content: String,
    pub status: TaskStatus,
}

impl TaskOutcome {
    pub fn failed(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            status: TaskStatus::Failed,
        }
    }
}

/// Runs delegated tasks. Never fails: problems are reported in the outcome.
#[async_trait]
pub trait TaskRunner: Send + Sync {
    async fn run(&self, request: TaskRequest) -> TaskOutcome;
}

/// Runs each task as a nested agent loop sharing the parent's collaborators.
///
/// Nested runs have no task runner of their own, so tasks cannot delegate
/// further.
pub struct SubAgentTaskRunner {
    provider: Arc<dyn Provider>,
    tools: Arc<dyn ToolExecutor>,
    store: Arc<dyn MessageStore>,
    registry: Arc<OperationRegistry>,
    event_bus: Arc<EventBus>,
    telemetry: Arc<TelemetryEngine>,
    config: RunConfig,
}

impl SubAgentTaskRunner {
    pub fn from_runtime(runtime: &AgentRuntime) -> Self {
        Self {
            provider: runtime.provider().clone(),
            tools: runtime.tools().clone(),
            store: runtime.store().clone(),
            registry: runtime.registry().clone(),
            event_bus: runtime.event_bus().clone(),
            telemetry: runtime.telemetry().clone(),
            config: runtime.config().clone(),
        }
    }

    fn runtime_for(&self, task: &TaskSpec) -> AgentRuntime {
        let mut config = self.config.clone();
        if let Some(model) = &task.model {
            config.model = model.clone();
        }
        if let Some(agent_id) = &task.agent_id {
            config.agent_id = agent_id.clone();
        }
        AgentRuntime::new(
            self.provider.clone(),
            self.tools.clone(),
            self.store.clone(),
            config,
        )
        .with_registry(self.registry.clone())
        .with_event_bus(self.event_bus.clone())
        .with_telemetry(self.telemetry.clone())
    }
}

#[async_trait]
impl TaskRunner for SubAgentTaskRunner {
    async fn run(&self, request: TaskRequest) -> TaskOutcome {
        let runner = AgentRunner::new(self.runtime_for(&request.task));
        let result = runner
            .run_operation(
                request.operation_id.clone(),
                request.key,
                request.context,
                Some(request.task.instruction.clone()),
            )
            .await;

        let outcome = match result {
            Ok(outcome) => outcome,
            Err(e) => return TaskOutcome::failed(format!("Task failed: {e}")),
        };
        let state = outcome.state;
        let answer = state
            .last_assistant()
            .map(|m| m.content.clone())
            .unwrap_or_default();

        match (state.status, state.completion_reason) {
            (AgentStatus::Done, Some(CompletionReason::Interrupted)) => TaskOutcome {
                content: answer,
                status: TaskStatus::Cancelled,
            },
            (AgentStatus::Done, _) => TaskOutcome {
                content: answer,
                status: TaskStatus::Completed,
            },
            (AgentStatus::WaitingForHuman, _) => {
                TaskOutcome::failed("Task stopped: it needs a human approval, which tasks cannot request")
            }
            _ => TaskOutcome::failed(
                state
                    .error
                    .map(|e| e.message)
                    .unwrap_or_else(|| "Task failed".to_string()),
            ),
        }
    }
}
