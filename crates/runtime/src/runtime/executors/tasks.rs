use super::output;
use crate::operation::{OperationContext, OperationScope};
use crate::runtime::instruction::{Phase, StepOutput, TaskSpec};
use crate::runtime::{AgentRuntime, StepEnv};
use crate::stream_event::AgentEvent;
use crate::task::{TaskOutcome, TaskRequest, TaskStatus};
use agentloop_core::agent::AgentState;
use agentloop_core::error::Result;
use agentloop_core::message::{Message, Role};
use agentloop_telemetry::{Span, SpanKind};
use futures::future::join_all;

/// Run delegated tasks as child operations and record their answers.
pub(crate) async fn exec_tasks(
    rt: &AgentRuntime,
    mut state: AgentState,
    env: &StepEnv,
    parent_call_id: String,
    tasks: Vec<TaskSpec>,
) -> Result<StepOutput> {
    let step = state.step_count + 1;
    let mut events = Vec::new();

    let mut requests = Vec::with_capacity(tasks.len());
    for task in &tasks {
        let agent_id = task
            .agent_id
            .clone()
            .unwrap_or_else(|| env.descriptor.message_owner().to_string());
        let context = OperationContext {
            agent_id: agent_id.clone(),
            topic_id: env.descriptor.topic_id.clone(),
            group_id: None,
            sub_agent_id: Some(agent_id),
            scope: Some(OperationScope::SubAgent),
            thread_id: Some(task.id.clone()),
        };
        let operation_id = rt.registry().start_child(&env.operation_id, context.clone())?;
        env.emit(
            &mut events,
            AgentEvent::TaskStarted {
                operation_id: operation_id.clone(),
                title: task.title.clone(),
            },
        )
        .await;
        requests.push(TaskRequest {
            operation_id,
            parent_operation_id: env.operation_id.clone(),
            key: env.key.clone().with_thread(task.id.clone()),
            context,
            task: task.clone(),
        });
    }

    let outcomes = match rt.task_runner.clone() {
        Some(runner) => {
            let all = join_all(requests.iter().cloned().map(|request| {
                let runner = runner.clone();
                async move { runner.run(request).await }
            }));
            tokio::pin!(all);
            tokio::select! {
                outcomes = &mut all => outcomes,
                _ = env.cancel.cancelled() => {
                    let cancelled = rt.registry().cancel_children(&env.operation_id);
                    tracing::info!(
                        operation_id = %env.operation_id,
                        children = cancelled.len(),
                        "Cancelling delegated tasks"
                    );
                    all.await
                }
            }
        }
        None => requests
            .iter()
            .map(|_| TaskOutcome::failed("No task runner is configured for this run"))
            .collect(),
    };

    let parent_id = state
        .messages
        .iter()
        .find(|m| m.role == Role::Tool && m.tool_call_id.as_deref() == Some(parent_call_id.as_str()))
        .map(|m| m.id.clone());

    for (request, outcome) in requests.iter().zip(outcomes) {
        let mut message = Message::new(Role::Task, outcome.content)
            .with_agent(request.context.agent_id.clone());
        message.parent_id = parent_id.clone();
        message.metadata.insert("task_id".into(), request.task.id.clone().into());
        message
            .metadata
            .insert("task_title".into(), request.task.title.clone().into());
        message
            .metadata
            .insert("task_status".into(), outcome.status.as_str().into());
        message
            .metadata
            .insert("operation_id".into(), request.operation_id.clone().into());
        message
            .metadata
            .insert("parent_call_id".into(), parent_call_id.clone().into());
        rt.store().create(&env.key, message).await?;

        // A nested runner settles its own operation; this covers the rest.
        let settled = match outcome.status {
            TaskStatus::Completed => rt.registry().complete(&request.operation_id),
            TaskStatus::Failed | TaskStatus::Cancelled => rt
                .registry()
                .fail(&request.operation_id, format!("task {}", outcome.status.as_str())),
        };
        if let Err(e) = settled {
            tracing::debug!(operation_id = %request.operation_id, error = %e, "Task operation already settled");
        }

        let mut span = Span::new(SpanKind::Task, &request.task.title, step);
        span.metadata
            .insert("operation_id".into(), request.operation_id.clone().into());
        span.end(outcome.status == TaskStatus::Completed);
        rt.record_span(env, span);

        env.emit(
            &mut events,
            AgentEvent::TaskCompleted {
                operation_id: request.operation_id.clone(),
                title: request.task.title.clone(),
                status: outcome.status.as_str().to_string(),
            },
        )
        .await;
    }

    state.messages = rt.refresh(&env.key).await?;
    Ok(output(
        state,
        events,
        Some(Phase::TasksBatchResult {
            task_count: tasks.len(),
        }),
    ))
}
