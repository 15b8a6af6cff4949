//! Decides the next instruction from the current phase.
//!
//! The planner is pure: it reads the state and the phase and returns an
//! [`AgentInstruction`]. Every phase is matched exhaustively.

use super::instruction::{AgentInstruction, AgentRuntimeContext, Phase, TaskSpec, ToolCallRecord};
use crate::config::CompressionSettings;
use crate::context::token::estimate_message_tokens;
use agentloop_core::agent::{AgentState, AgentStatus, CompletionReason};
use agentloop_core::message::{Message, MessageToolCall, Role, ToolCallStatus, pending_tool_calls};
use agentloop_core::tool::{HumanIntervention, ToolManifest};

pub struct Planner<'a> {
    pub compression: &'a CompressionSettings,
    /// Manifests of the executor, consulted when the state has none for a tool
    pub manifests: &'a [ToolManifest],
}

impl Planner<'_> {
    pub fn plan(&self, state: &AgentState, ctx: &AgentRuntimeContext) -> AgentInstruction {
        if state.status == AgentStatus::Interrupted {
            return resolve_or_finish(
                pending_tool_calls(&state.messages),
                ToolCallStatus::Cancelled,
                CompletionReason::Interrupted,
            );
        }

        match &ctx.phase {
            Phase::Init | Phase::CompressionResult { .. } | Phase::TasksBatchResult { .. } => {
                call_llm(state)
            }
            Phase::LlmResult { tool_calls, .. } => self.plan_llm_result(state, tool_calls),
            Phase::ToolResult { result } => self.after_tools(state, std::slice::from_ref(result)),
            Phase::ToolBatchResult { results } => self.after_tools(state, results),
            Phase::HumanApprovedTool { approved, rejected } => AgentInstruction::CallToolsBatch {
                calls: approved.clone(),
                rejected: rejected.clone(),
            },
            Phase::HumanAbort { pending, .. } => resolve_or_finish(
                pending.clone(),
                ToolCallStatus::Cancelled,
                CompletionReason::HumanAborted,
            ),
        }
    }

    fn requires_approval(&self, state_manifest: Option<&ToolManifest>, name: &str) -> bool {
        state_manifest
            .or_else(|| self.manifests.iter().find(|m| m.identifier == name))
            .is_some_and(|m| m.human_intervention == HumanIntervention::Required)
    }

    /// Next instruction after a model turn. Manifests on the state take
    /// precedence over the executor's.
    pub fn plan_llm_result(&self, state: &AgentState, calls: &[MessageToolCall]) -> AgentInstruction {
        match calls {
            [] => AgentInstruction::Finish {
                reason: CompletionReason::Completed,
            },
            _ if calls.iter().any(|c| {
                self.requires_approval(state.tool_manifest_map.get(&c.name), &c.name)
            }) =>
            {
                AgentInstruction::RequestHumanApprove {
                    pending: calls.to_vec(),
                }
            }
            [call] => AgentInstruction::CallTool { call: call.clone() },
            _ => AgentInstruction::CallToolsBatch {
                calls: calls.to_vec(),
                rejected: Vec::new(),
            },
        }
    }

    fn after_tools(&self, state: &AgentState, results: &[ToolCallRecord]) -> AgentInstruction {
        if let Some(instruction) = results.iter().find_map(exec_tasks) {
            return instruction;
        }
        if needs_compression(self.compression, &state.messages) {
            return AgentInstruction::CompressContext;
        }
        call_llm(state)
    }
}

fn call_llm(state: &AgentState) -> AgentInstruction {
    AgentInstruction::CallLlm {
        force_finish: state.remaining_steps() <= 1,
    }
}

fn resolve_or_finish(
    pending: Vec<MessageToolCall>,
    status: ToolCallStatus,
    reason: CompletionReason,
) -> AgentInstruction {
    if pending.is_empty() {
        AgentInstruction::Finish { reason }
    } else {
        AgentInstruction::ResolveAbortedTools {
            pending,
            status,
            reason,
        }
    }
}

/// A tool asking for delegation returns `{"type": "exec_tasks", "tasks": [..]}`.
fn exec_tasks(record: &ToolCallRecord) -> Option<AgentInstruction> {
    let state = record.state.as_ref()?;
    if state.get("type")?.as_str()? != "exec_tasks" {
        return None;
    }
    let mut tasks: Vec<TaskSpec> = serde_json::from_value(state.get("tasks")?.clone()).ok()?;
    if tasks.is_empty() {
        return None;
    }
    for (i, task) in tasks.iter_mut().enumerate() {
        if task.id.is_empty() {
            task.id = format!("{}-{}", record.tool_call_id, i + 1);
        }
        if task.title.is_empty() {
            task.title = task.instruction.chars().take(60).collect();
        }
    }
    Some(AgentInstruction::ExecTasks {
        parent_call_id: record.tool_call_id.clone(),
        tasks,
    })
}

pub(crate) fn uncompressed(messages: &[Message]) -> Vec<&Message> {
    messages
        .iter()
        .filter(|m| !m.compressed && m.role != Role::CompressedGroup)
        .collect()
}

pub(crate) fn needs_compression(settings: &CompressionSettings, messages: &[Message]) -> bool {
    if !settings.enabled {
        return false;
    }
    let live = uncompressed(messages);
    let tokens: usize = live.iter().map(|m| estimate_message_tokens(m)).sum();
    live.len() > settings.keep_recent && tokens > settings.threshold_tokens
}

#[cfg(test)]
mod tests {
    use super::*;

    fn planner<'a>(settings: &'a CompressionSettings, manifests: &'a [ToolManifest]) -> Planner<'a> {
        Planner {
            compression: settings,
            manifests,
        }
    }

    fn ctx(phase: Phase, state: &AgentState) -> AgentRuntimeContext {
        AgentRuntimeContext::new(phase, state)
    }

    fn record(state: Option<serde_json::Value>) -> ToolCallRecord {
        ToolCallRecord {
            tool_call_id: "c1".into(),
            name: "delegate".into(),
            success: true,
            state,
            message_id: "m1".into(),
        }
    }

    #[test]
    fn init_calls_llm_and_forces_finish_on_last_step() {
        let settings = CompressionSettings::default();
        let p = planner(&settings, &[]);
        let mut state = AgentState::new("s", 3);
        assert_eq!(
            p.plan(&state, &ctx(Phase::Init, &state)),
            AgentInstruction::CallLlm { force_finish: false }
        );
        state.step_count = 2;
        assert_eq!(
            p.plan(&state, &ctx(Phase::Init, &state)),
            AgentInstruction::CallLlm { force_finish: true }
        );
    }

    #[test]
    fn llm_result_branches_on_tool_calls() {
        let settings = CompressionSettings::default();
        let p = planner(&settings, &[]);
        let state = AgentState::new("s", 10);
        let llm = |calls: Vec<MessageToolCall>| Phase::LlmResult {
            message_id: "m".into(),
            tool_calls: calls,
        };

        assert_eq!(
            p.plan(&state, &ctx(llm(vec![]), &state)),
            AgentInstruction::Finish {
                reason: CompletionReason::Completed
            }
        );
        let one = MessageToolCall::new("a", "search", "{}");
        assert_eq!(
            p.plan(&state, &ctx(llm(vec![one.clone()]), &state)),
            AgentInstruction::CallTool { call: one.clone() }
        );
        let two = MessageToolCall::new("b", "fetch", "{}");
        assert!(matches!(
            p.plan(&state, &ctx(llm(vec![one, two]), &state)),
            AgentInstruction::CallToolsBatch { ref calls, .. } if calls.len() == 2
        ));
    }

    #[test]
    fn guarded_tool_requests_approval() {
        let settings = CompressionSettings::default();
        let manifests = vec![ToolManifest::new("delete_file", "Delete").requiring_approval()];
        let p = planner(&settings, &manifests);
        let state = AgentState::new("s", 10);
        let calls = vec![
            MessageToolCall::new("a", "search", "{}"),
            MessageToolCall::new("b", "delete_file", "{}"),
        ];
        let instruction = p.plan(
            &state,
            &ctx(
                Phase::LlmResult {
                    message_id: "m".into(),
                    tool_calls: calls.clone(),
                },
                &state,
            ),
        );
        assert_eq!(instruction, AgentInstruction::RequestHumanApprove { pending: calls });
    }

    #[test]
    fn state_manifest_overrides_executor_manifest() {
        let settings = CompressionSettings::default();
        let p = planner(&settings, &[]);
        let state = AgentState::new("s", 10)
            .with_tools([ToolManifest::new("shell", "Run").requiring_approval()]);
        let calls = vec![MessageToolCall::new("a", "shell", "{}")];
        assert!(matches!(
            p.plan_llm_result(&state, &calls),
            AgentInstruction::RequestHumanApprove { .. }
        ));
    }

    #[test]
    fn exec_tasks_state_triggers_delegation() {
        let settings = CompressionSettings::default();
        let p = planner(&settings, &[]);
        let state = AgentState::new("s", 10);
        let result = record(Some(serde_json::json!({
            "type": "exec_tasks",
            "tasks": [{"instruction": "Research pricing"}, {"title": "Draft", "instruction": "Write"}]
        })));

        let AgentInstruction::ExecTasks { parent_call_id, tasks } =
            p.plan(&state, &ctx(Phase::ToolResult { result }, &state))
        else {
            panic!("expected exec_tasks");
        };
        assert_eq!(parent_call_id, "c1");
        assert_eq!(tasks[0].id, "c1-1");
        assert_eq!(tasks[0].title, "Research pricing");
        assert_eq!(tasks[1].title, "Draft");
    }

    #[test]
    fn large_history_triggers_compression() {
        let settings = CompressionSettings {
            enabled: true,
            threshold_tokens: 50,
            keep_recent: 2,
        };
        let p = planner(&settings, &[]);
        let mut state = AgentState::new("s", 10);
        state.messages = (0..5).map(|_| Message::user("x".repeat(100))).collect();

        let instruction = p.plan(
            &state,
            &ctx(Phase::ToolBatchResult { results: vec![record(None)] }, &state),
        );
        assert_eq!(instruction, AgentInstruction::CompressContext);
    }

    #[test]
    fn interrupted_with_pending_calls_resolves_them() {
        let settings = CompressionSettings::default();
        let p = planner(&settings, &[]);
        let mut state = AgentState::new("s", 10);
        state.status = AgentStatus::Interrupted;
        state.messages = vec![
            Message::assistant("").with_tool_calls(vec![MessageToolCall::new("a", "search", "{}")]),
        ];

        let instruction = p.plan(&state, &ctx(Phase::Init, &state));
        assert!(matches!(
            instruction,
            AgentInstruction::ResolveAbortedTools {
                status: ToolCallStatus::Cancelled,
                reason: CompletionReason::Interrupted,
                ..
            }
        ));

        state.messages.clear();
        assert_eq!(
            p.plan(&state, &ctx(Phase::Init, &state)),
            AgentInstruction::Finish {
                reason: CompletionReason::Interrupted
            }
        );
    }

    #[test]
    fn human_abort_without_pending_finishes() {
        let settings = CompressionSettings::default();
        let p = planner(&settings, &[]);
        let state = AgentState::new("s", 10);
        let phase = Phase::HumanAbort {
            reason: None,
            partial_message_id: None,
            pending: vec![],
        };
        assert_eq!(
            p.plan(&state, &ctx(phase, &state)),
            AgentInstruction::Finish {
                reason: CompletionReason::HumanAborted
            }
        );
    }
}
