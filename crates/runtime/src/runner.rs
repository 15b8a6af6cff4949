//! The run loop.
//!
//! [`AgentRunner`] registers an operation, then repeatedly re-reads the
//! conversation, checks for cancellation and the step limit, and calls
//! [`AgentRuntime::step`] until a step leaves a terminal status or hands
//! back no next context. Whatever happens inside, the operation is settled,
//! its after-completion hooks run and a `done` event is emitted.

use crate::operation::{FINISHED_RETENTION, OperationContext};
use crate::runtime::{AgentRuntime, AgentRuntimeContext, Phase, RejectedCall, StepContext, StepEnv};
use crate::stream_event::AgentEvent;
use agentloop_core::agent::{AgentState, AgentStatus, CompletionReason};
use agentloop_core::error::{Error, OperationError, Result};
use agentloop_core::event::DomainEvent;
use agentloop_core::message::{Message, MessageError, MessagePatch, Role, ToolCallStatus};
use agentloop_core::store::ConversationKey;
use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Start a new run.
#[derive(Debug, Clone)]
pub struct RunRequest {
    pub key: ConversationKey,
    pub context: OperationContext,
    /// Appended as a user message before the first step
    pub instruction: Option<String>,
}

impl RunRequest {
    pub fn new(key: ConversationKey, context: OperationContext) -> Self {
        Self {
            key,
            context,
            instruction: None,
        }
    }

    pub fn with_instruction(mut self, instruction: impl Into<String>) -> Self {
        self.instruction = Some(instruction.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rejection {
    pub call_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// A human's answer to a pending approval request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum HumanDecision {
    ApproveAll,
    /// Calls not listed in `approved` are rejected.
    Review {
        approved: Vec<String>,
        #[serde(default)]
        rejected: Vec<Rejection>,
    },
    Abort {
        #[serde(default)]
        reason: Option<String>,
    },
}

/// Everything a finished run produced.
#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub operation_id: String,
    pub state: AgentState,
    pub events: Vec<AgentEvent>,
}

/// Notified once per finished run. Failures are logged and ignored.
#[async_trait]
pub trait RunObserver: Send + Sync {
    async fn on_finished(&self, outcome: &RunOutcome) -> Result<()>;
}

pub struct AgentRunner {
    runtime: Arc<AgentRuntime>,
    observers: Vec<Arc<dyn RunObserver>>,
    sink: Option<mpsc::Sender<AgentEvent>>,
}

impl AgentRunner {
    pub fn new(runtime: AgentRuntime) -> Self {
        Self::from_arc(Arc::new(runtime))
    }

    pub fn from_arc(runtime: Arc<AgentRuntime>) -> Self {
        Self {
            runtime,
            observers: Vec::new(),
            sink: None,
        }
    }

    pub fn with_observer(mut self, observer: Arc<dyn RunObserver>) -> Self {
        self.observers.push(observer);
        self
    }

    /// Forward every event live to `sink` while runs are in progress.
    pub fn with_event_sink(mut self, sink: mpsc::Sender<AgentEvent>) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn runtime(&self) -> &Arc<AgentRuntime> {
        &self.runtime
    }

    /// Register a new operation and drive it to a terminal status.
    pub async fn run(&self, request: RunRequest) -> Result<RunOutcome> {
        self.runtime.config().validate()?;
        let operation_id = self.runtime.registry().start(request.context.clone());
        self.run_operation(operation_id, request.key, request.context, request.instruction)
            .await
    }

    /// Drive an operation that is already registered, e.g. a child task.
    pub async fn run_operation(
        &self,
        operation_id: String,
        key: ConversationKey,
        context: OperationContext,
        instruction: Option<String>,
    ) -> Result<RunOutcome> {
        let rt = &self.runtime;
        rt.config().validate()?;

        if let Some(text) = instruction {
            let mut message = Message::user(text);
            message.parent_id = rt.refresh(&key).await?.last().map(|m| m.id.clone());
            rt.store().create(&key, message).await?;
        }

        let mut state = AgentState::new(key.session_id.clone(), rt.config().max_steps)
            .with_tools(rt.manifests())
            .with_metadata("agent_id", context.message_owner().into());
        if let Some(topic) = &context.topic_id {
            state = state.with_metadata("topic_id", topic.clone().into());
        }
        state.messages = rt.refresh(&key).await?;
        let ctx = AgentRuntimeContext::init(&state);
        self.drive(operation_id, key, context, state, Some(ctx)).await
    }

    /// Continue a run parked in `waiting_for_human` under a new operation.
    pub async fn resume(
        &self,
        key: ConversationKey,
        context: OperationContext,
        mut state: AgentState,
        decision: HumanDecision,
    ) -> Result<RunOutcome> {
        let rt = &self.runtime;
        rt.config().validate()?;
        if state.status != AgentStatus::WaitingForHuman {
            return Err(Error::Internal(format!(
                "cannot resume a run in status {}",
                state.status
            )));
        }
        let Some(pending) = state.pending_human.take() else {
            return Err(Error::Internal("run has no pending approval".into()));
        };

        let waited = (Utc::now() - pending.requested_at).num_milliseconds().max(0) as u64;
        state.usage.human.total_wait_ms += waited;

        let phase = match decision {
            HumanDecision::ApproveAll => {
                state.usage.human.approved += pending.tool_calls.len() as u32;
                Phase::HumanApprovedTool {
                    approved: pending.tool_calls,
                    rejected: Vec::new(),
                }
            }
            HumanDecision::Review { approved, rejected } => {
                let (ok, denied): (Vec<_>, Vec<_>) = pending
                    .tool_calls
                    .into_iter()
                    .partition(|call| approved.contains(&call.id));
                let denied: Vec<RejectedCall> = denied
                    .into_iter()
                    .map(|call| RejectedCall {
                        reason: rejected
                            .iter()
                            .find(|r| r.call_id == call.id)
                            .and_then(|r| r.reason.clone()),
                        call,
                    })
                    .collect();
                state.usage.human.approved += ok.len() as u32;
                state.usage.human.rejected += denied.len() as u32;
                Phase::HumanApprovedTool {
                    approved: ok,
                    rejected: denied,
                }
            }
            HumanDecision::Abort { reason } => {
                state.usage.human.rejected += pending.tool_calls.len() as u32;
                Phase::HumanAbort {
                    reason,
                    partial_message_id: None,
                    pending: pending.tool_calls,
                }
            }
        };
        info!(session_id = %state.session_id, waited_ms = waited, phase = phase.name(), "Resuming run");

        state.status = AgentStatus::Running;
        state.messages = rt.refresh(&key).await?;
        let ctx = AgentRuntimeContext::new(phase, &state);
        let operation_id = rt.registry().start(context.clone());
        self.drive(operation_id, key, context, state, Some(ctx)).await
    }

    /// Cancel a running operation. The loop notices at its next check.
    pub fn cancel(&self, operation_id: &str) -> Result<()> {
        Ok(self.runtime.registry().cancel(operation_id)?)
    }

    async fn drive(
        &self,
        operation_id: String,
        key: ConversationKey,
        descriptor: OperationContext,
        state: AgentState,
        ctx: Option<AgentRuntimeContext>,
    ) -> Result<RunOutcome> {
        let rt = &self.runtime;
        let registry = rt.registry();
        let cancel = registry
            .token(&operation_id)
            .ok_or_else(|| OperationError::NotFound(operation_id.clone()))?;
        let parent_id = registry.get(&operation_id).and_then(|op| op.parent_id);
        let trace_id = rt
            .config()
            .telemetry_enabled
            .then(|| rt.telemetry().start_trace(&operation_id, parent_id.clone()));
        let env = StepEnv {
            operation_id: operation_id.clone(),
            cancel,
            key,
            descriptor,
            trace_id,
            sink: self.sink.clone(),
        };

        rt.event_bus().publish(DomainEvent::OperationStarted {
            operation_id: operation_id.clone(),
            parent_id,
            agent_id: env.descriptor.message_owner().to_string(),
            timestamp: Utc::now(),
        });
        info!(
            operation_id = %operation_id,
            agent_id = %env.descriptor.message_owner(),
            max_steps = state.max_steps,
            "Run started"
        );

        let mut events = Vec::new();
        let state = match self.run_loop(&env, state, ctx, &mut events).await {
            Ok(state) => state,
            Err((state, e)) => self.fail_run(&env, state, e, &mut events).await,
        };

        self.settle(&env, state, events).await
    }

    async fn run_loop(
        &self,
        env: &StepEnv,
        mut state: AgentState,
        mut ctx: Option<AgentRuntimeContext>,
        events: &mut Vec<AgentEvent>,
    ) -> std::result::Result<AgentState, (AgentState, Error)> {
        let rt = &self.runtime;
        loop {
            match rt.refresh(&env.key).await {
                Ok(messages) => state.messages = messages,
                Err(e) => return Err((state, e)),
            }
            self.observe_cancel(env, &mut state, events).await;

            if state.step_count >= state.max_steps {
                let (status, reason) = match (&state.status, ctx.as_ref().map(|c| &c.phase)) {
                    (AgentStatus::Interrupted, _) => {
                        (ToolCallStatus::Cancelled, CompletionReason::Interrupted)
                    }
                    (_, Some(Phase::LlmResult { tool_calls, .. })) if tool_calls.is_empty() => {
                        (ToolCallStatus::Skipped, CompletionReason::Completed)
                    }
                    _ => (ToolCallStatus::Skipped, CompletionReason::MaxStepsExceeded),
                };
                info!(
                    operation_id = %env.operation_id,
                    steps = state.step_count,
                    ?reason,
                    "Step limit reached"
                );
                return match rt.finalize(state.clone(), env, status, reason).await {
                    Ok((state, finalized)) => {
                        events.extend(finalized);
                        Ok(state)
                    }
                    Err(e) => Err((state, e)),
                };
            }

            let mut next = match ctx.take() {
                Some(next) => next,
                // Cancellation after the last step still needs a cleanup step.
                None if state.status == AgentStatus::Interrupted => AgentRuntimeContext::init(&state),
                None => break,
            };
            next.step_context = StepContext::from_messages(&state.messages);

            let snapshot = state.clone();
            let out = match rt.step(state, next, env).await {
                Ok(out) => out,
                Err(e) => return Err((snapshot, e)),
            };
            events.extend(out.events);
            state = out.new_state;
            ctx = out.next_context;

            self.observe_cancel(env, &mut state, events).await;
            if state.status.is_terminal() {
                break;
            }
        }
        Ok(state)
    }

    async fn observe_cancel(&self, env: &StepEnv, state: &mut AgentState, events: &mut Vec<AgentEvent>) {
        if env.cancel.is_cancelled() && state.status == AgentStatus::Running {
            info!(operation_id = %env.operation_id, step = state.step_count, "Run interrupted");
            state.status = AgentStatus::Interrupted;
            env.emit(events, AgentEvent::Interrupted { step: state.step_count })
                .await;
        }
    }

    /// Turn an unexpected error into an `error` state.
    async fn fail_run(
        &self,
        env: &StepEnv,
        mut state: AgentState,
        error: Error,
        events: &mut Vec<AgentEvent>,
    ) -> AgentState {
        let rt = &self.runtime;
        warn!(operation_id = %env.operation_id, error = %error, "Run failed");
        let annotation = MessageError::new(error.kind(), error.to_string());

        if let Ok(messages) = rt.refresh(&env.key).await {
            state.messages = messages;
        }
        let last_assistant = state
            .messages
            .iter()
            .rev()
            .find(|m| m.role == Role::Assistant)
            .map(|m| m.id.clone());
        if let Some(id) = last_assistant {
            match rt.store().update(&id, MessagePatch::error(annotation.clone())).await {
                Ok(updated) => {
                    if let Some(slot) = state.messages.iter_mut().find(|m| m.id == id) {
                        *slot = updated;
                    }
                }
                Err(e) => warn!(message_id = %id, error = %e, "Failed to annotate message"),
            }
        }

        state.status = AgentStatus::Error;
        state.completion_reason = Some(CompletionReason::Error);
        state.error = Some(annotation);
        state.updated_at = Utc::now();
        rt.event_bus().publish(DomainEvent::ErrorOccurred {
            context: format!("run:{}", env.operation_id),
            error_message: error.to_string(),
            timestamp: Utc::now(),
        });
        env.emit(
            events,
            AgentEvent::Error {
                message: error.to_string(),
            },
        )
        .await;
        state
    }

    /// Settle the operation, run hooks and observers, emit `done`.
    async fn settle(&self, env: &StepEnv, state: AgentState, mut events: Vec<AgentEvent>) -> Result<RunOutcome> {
        let rt = &self.runtime;
        let registry = rt.registry();
        let operation_id = env.operation_id.clone();

        let settled = match state.status {
            AgentStatus::Error => registry.fail(
                &operation_id,
                state
                    .error
                    .as_ref()
                    .map(|e| e.message.clone())
                    .unwrap_or_else(|| "run failed".into()),
            ),
            _ if registry.is_cancelled(&operation_id) => Ok(()),
            _ => registry.complete(&operation_id),
        };
        if let Err(e) = settled {
            debug!(operation_id = %operation_id, error = %e, "Operation already settled");
        }

        if let Some(snapshot) = registry.get(&operation_id) {
            for hook in registry.take_after_completion_hooks(&operation_id) {
                if let Err(e) = hook(snapshot.clone()).await {
                    warn!(operation_id = %operation_id, error = %e, "After-completion hook failed");
                }
            }
        }

        registry.prune_finished_before(Utc::now() - FINISHED_RETENTION);

        if let Some(trace_id) = &env.trace_id
            && let Err(e) = rt.telemetry().end_trace(trace_id, &state.status.to_string())
        {
            warn!(operation_id = %operation_id, error = %e, "Failed to close trace");
        }
        rt.event_bus().publish(DomainEvent::OperationFinished {
            operation_id: operation_id.clone(),
            status: state.status.to_string(),
            steps: state.step_count,
            total_tokens: state.usage.llm.total_tokens,
            timestamp: Utc::now(),
        });
        info!(
            operation_id = %operation_id,
            status = %state.status,
            reason = ?state.completion_reason,
            steps = state.step_count,
            tokens = state.usage.llm.total_tokens,
            cost_usd = state.cost.total_usd,
            "Run finished"
        );
        env.emit(
            &mut events,
            AgentEvent::Done {
                operation_id: operation_id.clone(),
                status: state.status.to_string(),
                reason: state.completion_reason,
                steps: state.step_count,
                usage: state.usage.clone(),
            },
        )
        .await;

        let outcome = RunOutcome {
            operation_id,
            state,
            events,
        };
        for observer in &self.observers {
            if let Err(e) = observer.on_finished(&outcome).await {
                warn!(operation_id = %outcome.operation_id, error = %e, "Run observer failed");
            }
        }
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RunConfig;
    use crate::test_helpers::{
        EchoTool, ScriptedProvider, SlowTool, StreamScript, harness, harness_with, key,
        make_text_response, make_tool_call, make_tool_call_response,
    };
    use crate::operation::{OperationSnapshot, OperationStatus};
    use agentloop_core::message::{MessageToolCall, pending_tool_calls};
    use futures::FutureExt;
    use serde_json::json;
    use std::sync::Mutex;

    fn request(text: &str) -> RunRequest {
        RunRequest::new(key(), OperationContext::new("agent-1")).with_instruction(text)
    }

    fn echo_call(id: &str) -> MessageToolCall {
        make_tool_call(id, "echo", json!({"text": id}))
    }

    #[tokio::test]
    async fn simple_question_completes() {
        let h = harness(ScriptedProvider::new(vec![make_text_response("4")]), vec![]);
        let runner = AgentRunner::new(h.runtime);

        let outcome = runner.run(request("2+2?")).await.unwrap();

        assert_eq!(outcome.state.status, AgentStatus::Done);
        assert_eq!(outcome.state.completion_reason, Some(CompletionReason::Completed));
        assert_eq!(outcome.state.step_count, 2);
        assert_eq!(outcome.state.messages.len(), 2);
        assert!(matches!(outcome.events.last(), Some(AgentEvent::Done { .. })));
        let op = runner.runtime().registry().get(&outcome.operation_id).unwrap();
        assert_eq!(op.status, OperationStatus::Completed);
    }

    #[tokio::test]
    async fn tool_round_trip() {
        let provider = ScriptedProvider::new(vec![
            make_tool_call_response(vec![echo_call("c1")], "Let me check."),
            make_text_response("It says c1."),
        ]);
        let h = harness(provider, vec![EchoTool::named("echo")]);
        let runner = AgentRunner::new(h.runtime);

        let outcome = runner.run(request("use the tool")).await.unwrap();

        let roles: Vec<Role> = outcome.state.messages.iter().map(|m| m.role).collect();
        assert_eq!(roles, vec![Role::User, Role::Assistant, Role::Tool, Role::Assistant]);
        assert_eq!(outcome.state.usage.llm.calls, 2);
        assert_eq!(outcome.state.usage.tools.calls, 1);
        assert_eq!(outcome.state.usage.llm.total_tokens, 30);
    }

    #[tokio::test]
    async fn step_limit_resolves_pending_calls() {
        let provider = ScriptedProvider::repeating(make_tool_call_response(vec![echo_call("c1")], ""));
        let h = harness_with(
            provider,
            vec![EchoTool::named("echo")],
            RunConfig::new("test-model").with_max_steps(1),
        );
        let runner = AgentRunner::new(h.runtime);

        let outcome = runner.run(request("loop forever")).await.unwrap();

        assert_eq!(outcome.state.step_count, 1);
        assert_eq!(outcome.state.status, AgentStatus::Done);
        assert_eq!(outcome.state.completion_reason, Some(CompletionReason::MaxStepsExceeded));
        assert!(pending_tool_calls(&outcome.state.messages).is_empty());
        assert_eq!(
            outcome.state.messages.last().unwrap().tool_status,
            Some(ToolCallStatus::Skipped)
        );
    }

    #[tokio::test]
    async fn invalid_config_fails_before_any_step() {
        let provider = ScriptedProvider::default();
        let h = harness_with(provider.clone(), vec![], RunConfig::new(""));
        let runner = AgentRunner::new(h.runtime);

        let err = runner.run(request("hi")).await.unwrap_err();

        assert_eq!(err.kind(), "config");
        assert_eq!(provider.call_count(), 0);
        assert!(h.store.is_empty().await);
    }

    #[tokio::test]
    async fn cancellation_mid_tool_ends_interrupted() {
        let provider = ScriptedProvider::new(vec![make_tool_call_response(
            vec![
                make_tool_call("c1", "slow", json!({})),
                make_tool_call("c2", "slow", json!({})),
            ],
            "",
        )]);
        let h = harness(provider, vec![SlowTool::shared()]);
        let (tx, mut rx) = mpsc::channel(64);
        let runner = Arc::new(AgentRunner::new(h.runtime).with_event_sink(tx));

        let context = OperationContext::new("agent-1");
        let operation_id = runner.runtime().registry().start(context.clone());
        let task = {
            let runner = runner.clone();
            let operation_id = operation_id.clone();
            tokio::spawn(async move {
                runner
                    .run_operation(operation_id, key(), context, Some("slow things".into()))
                    .await
            })
        };
        // Cancel once both tools are running.
        let mut started = 0;
        while let Some(event) = rx.recv().await {
            if let AgentEvent::ToolCall { .. } = event {
                started += 1;
            }
            if started == 2 {
                break;
            }
        }
        drop(rx);
        runner.cancel(&operation_id).unwrap();
        let outcome = task.await.unwrap().unwrap();

        assert_eq!(outcome.state.status, AgentStatus::Done);
        assert_eq!(outcome.state.completion_reason, Some(CompletionReason::Interrupted));
        let tools: Vec<_> = outcome
            .state
            .messages
            .iter()
            .filter(|m| m.role == Role::Tool)
            .collect();
        assert_eq!(tools.len(), 2);
        assert!(outcome.events.iter().any(|e| matches!(e, AgentEvent::Interrupted { .. })));
        let op = runner.runtime().registry().get(&outcome.operation_id).unwrap();
        assert_eq!(op.status, OperationStatus::Cancelled);
    }

    #[tokio::test]
    async fn provider_failure_fails_the_operation() {
        let provider = ScriptedProvider::streaming(vec![StreamScript::Fail("503".into())]);
        let h = harness(provider, vec![]);
        let runner = AgentRunner::new(h.runtime);

        let outcome = runner.run(request("hi")).await.unwrap();

        assert_eq!(outcome.state.status, AgentStatus::Error);
        assert_eq!(outcome.state.completion_reason, Some(CompletionReason::Error));
        let op = runner.runtime().registry().get(&outcome.operation_id).unwrap();
        assert_eq!(op.status, OperationStatus::Failed);
        assert!(matches!(outcome.events.last(), Some(AgentEvent::Done { .. })));
    }

    #[tokio::test]
    async fn hooks_run_once_after_the_run() {
        let h = harness(ScriptedProvider::new(vec![make_text_response("ok")]), vec![]);
        let runner = AgentRunner::new(h.runtime);
        let context = OperationContext::new("agent-1");
        let operation_id = runner.runtime().registry().start(context.clone());
        let seen = Arc::new(Mutex::new(Vec::new()));
        for label in ["first", "second"] {
            let seen = seen.clone();
            runner
                .runtime()
                .registry()
                .register_after_completion(
                    &operation_id,
                    Box::new(move |snapshot: OperationSnapshot| {
                        async move {
                            seen.lock().unwrap().push((label, snapshot.status));
                            Err::<(), _>(Error::Internal("hook failures are only logged".into()))
                        }
                        .boxed()
                    }),
                )
                .unwrap();
        }

        let outcome = runner
            .run_operation(operation_id, key(), context, Some("hi".into()))
            .await
            .unwrap();

        assert_eq!(outcome.state.status, AgentStatus::Done);
        assert_eq!(
            *seen.lock().unwrap(),
            vec![
                ("first", OperationStatus::Completed),
                ("second", OperationStatus::Completed)
            ]
        );
    }

    struct FailingObserver(Arc<Mutex<u32>>);

    #[async_trait]
    impl RunObserver for FailingObserver {
        async fn on_finished(&self, _: &RunOutcome) -> Result<()> {
            *self.0.lock().unwrap() += 1;
            Err(Error::Internal("observer down".into()))
        }
    }

    #[tokio::test]
    async fn observer_failures_are_swallowed() {
        let calls = Arc::new(Mutex::new(0));
        let h = harness(ScriptedProvider::new(vec![make_text_response("ok")]), vec![]);
        let runner =
            AgentRunner::new(h.runtime).with_observer(Arc::new(FailingObserver(calls.clone())));

        let outcome = runner.run(request("hi")).await.unwrap();

        assert_eq!(outcome.state.status, AgentStatus::Done);
        assert_eq!(*calls.lock().unwrap(), 1);
    }

    fn guarded_provider() -> ScriptedProvider {
        ScriptedProvider::new(vec![
            make_tool_call_response(
                vec![make_tool_call("c1", "delete_file", json!({"text": "gone"}))],
                "",
            ),
            make_text_response("Done."),
        ])
    }

    #[tokio::test]
    async fn approval_then_resume_runs_the_tool() {
        let h = harness(guarded_provider(), vec![EchoTool::guarded("delete_file")]);
        let runner = AgentRunner::new(h.runtime);

        let parked = runner.run(request("delete it")).await.unwrap();
        assert_eq!(parked.state.status, AgentStatus::WaitingForHuman);
        let op = runner.runtime().registry().get(&parked.operation_id).unwrap();
        assert_eq!(op.status, OperationStatus::Completed);

        let resumed = runner
            .resume(
                key(),
                OperationContext::new("agent-1"),
                parked.state,
                HumanDecision::ApproveAll,
            )
            .await
            .unwrap();

        assert_ne!(resumed.operation_id, parked.operation_id);
        assert_eq!(resumed.state.status, AgentStatus::Done);
        assert_eq!(resumed.state.usage.human.approved, 1);
        let roles: Vec<Role> = resumed.state.messages.iter().map(|m| m.role).collect();
        assert_eq!(roles, vec![Role::User, Role::Assistant, Role::Tool, Role::Assistant]);
        assert_eq!(resumed.state.messages[2].content, "echo: gone");
        assert_eq!(resumed.state.messages[2].tool_status, Some(ToolCallStatus::Succeeded));
    }

    #[tokio::test]
    async fn review_rejects_unmentioned_calls() {
        let h = harness(guarded_provider(), vec![EchoTool::guarded("delete_file")]);
        let runner = AgentRunner::new(h.runtime);
        let parked = runner.run(request("delete it")).await.unwrap();

        let resumed = runner
            .resume(
                key(),
                OperationContext::new("agent-1"),
                parked.state,
                HumanDecision::Review {
                    approved: vec![],
                    rejected: vec![],
                },
            )
            .await
            .unwrap();

        assert_eq!(resumed.state.usage.human.rejected, 1);
        let tool = &resumed.state.messages[2];
        assert_eq!(tool.tool_status, Some(ToolCallStatus::Rejected));
        assert_eq!(resumed.state.status, AgentStatus::Done);
    }

    #[tokio::test]
    async fn resume_requires_a_parked_run() {
        let h = harness(ScriptedProvider::default(), vec![]);
        let runner = AgentRunner::new(h.runtime);
        let state = AgentState::new("session-1", 5);

        let err = runner
            .resume(key(), OperationContext::new("agent-1"), state, HumanDecision::ApproveAll)
            .await
            .unwrap_err();

        assert_eq!(err.kind(), "internal");
    }
}
