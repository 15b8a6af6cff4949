//! Turn synthetic multi-agent roles back into provider roles.

use crate::context::pipeline::{ContextProcessor, PipelineContext};
use agentloop_core::error::ProcessorError;
use agentloop_core::message::{Message, Role};

/// Expands each `assistant_group` message into its individual steps.
///
/// Every block becomes an assistant message followed by the tool messages
/// answering its calls, in call order. Ids derive from the group and block
/// ids so repeated runs agree.
#[derive(Default)]
pub struct AssistantGroupFlattenProcessor;

impl AssistantGroupFlattenProcessor {
    fn expand(group: Message) -> Vec<Message> {
        if group.children.is_empty() {
            let mut single = group;
            single.role = Role::Assistant;
            return vec![single];
        }
        let mut out = Vec::new();
        for block in &group.children {
            let block_id = format!("{}.{}", group.id, block.id);
            let mut assistant =
                Message::with_id(&block_id, Role::Assistant, &block.content, group.created_at);
            assistant.tool_calls = block.tool_calls.clone();
            assistant.agent_id = group.agent_id.clone();
            assistant.parent_id = group.parent_id.clone();
            out.push(assistant);

            for call in &block.tool_calls {
                let Some(result) = block.tool_results.iter().find(|r| r.tool_call_id == call.id) else {
                    continue;
                };
                let mut tool = Message::with_id(
                    format!("{block_id}.{}", call.id),
                    Role::Tool,
                    &result.content,
                    group.created_at,
                );
                tool.tool_call_id = Some(call.id.clone());
                tool.name = Some(result.name.clone());
                tool.agent_id = group.agent_id.clone();
                out.push(tool);
            }
        }
        out
    }
}

impl ContextProcessor for AssistantGroupFlattenProcessor {
    fn name(&self) -> &'static str {
        "assistant_group_flatten"
    }

    fn process(&self, mut ctx: PipelineContext) -> Result<PipelineContext, ProcessorError> {
        if !ctx.messages.iter().any(|m| m.role == Role::AssistantGroup) {
            return Ok(ctx);
        }
        let mut groups = 0usize;
        let mut out = Vec::with_capacity(ctx.messages.len());
        for message in std::mem::take(&mut ctx.messages) {
            if message.role == Role::AssistantGroup {
                groups += 1;
                out.extend(Self::expand(message));
            } else {
                out.push(message);
            }
        }
        ctx.messages = out;
        ctx.flag("assistant_groups_flattened", groups);
        Ok(ctx)
    }
}

/// Merges each run of consecutive `task` messages into one user message.
#[derive(Default)]
pub struct TasksFlattenProcessor;

fn task_entry(message: &Message) -> String {
    let title = message
        .metadata
        .get("task_title")
        .and_then(|v| v.as_str())
        .unwrap_or("task");
    let status = message
        .metadata
        .get("task_status")
        .and_then(|v| v.as_str())
        .unwrap_or("completed");
    format!(
        "<task title=\"{title}\" status=\"{status}\">\n{}\n</task>",
        message.content.trim()
    )
}

impl ContextProcessor for TasksFlattenProcessor {
    fn name(&self) -> &'static str {
        "tasks_flatten"
    }

    fn process(&self, mut ctx: PipelineContext) -> Result<PipelineContext, ProcessorError> {
        if !ctx.messages.iter().any(|m| m.role == Role::Task) {
            return Ok(ctx);
        }
        let mut out: Vec<Message> = Vec::with_capacity(ctx.messages.len());
        let mut batch: Vec<Message> = Vec::new();
        let mut merged = 0usize;

        let mut flush = |batch: &mut Vec<Message>, out: &mut Vec<Message>| {
            let Some(first) = batch.first() else {
                return;
            };
            let entries: Vec<String> = batch.iter().map(task_entry).collect();
            let mut message = Message::with_id(
                &first.id,
                Role::User,
                format!("<task_results>\n{}\n</task_results>", entries.join("\n")),
                first.created_at,
            );
            message.parent_id = first.parent_id.clone();
            out.push(message);
            merged += batch.len();
            batch.clear();
        };

        for message in std::mem::take(&mut ctx.messages) {
            if message.role == Role::Task {
                batch.push(message);
            } else {
                flush(&mut batch, &mut out);
                out.push(message);
            }
        }
        flush(&mut batch, &mut out);

        ctx.messages = out;
        ctx.flag("tasks_flattened", merged);
        Ok(ctx)
    }
}

/// Supervisor turns are assistant turns as far as the model is concerned.
#[derive(Default)]
pub struct SupervisorRoleRestoreProcessor;

impl ContextProcessor for SupervisorRoleRestoreProcessor {
    fn name(&self) -> &'static str {
        "supervisor_role_restore"
    }

    fn process(&self, mut ctx: PipelineContext) -> Result<PipelineContext, ProcessorError> {
        for message in ctx.messages.iter_mut().filter(|m| m.role == Role::Supervisor) {
            message.role = Role::Assistant;
        }
        Ok(ctx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use agentloop_core::message::{AssistantBlock, BlockToolResult, MessageToolCall};

    fn group_message() -> Message {
        let mut group = Message::new(Role::AssistantGroup, "");
        group.id = "g1".into();
        group.children = vec![
            AssistantBlock {
                id: "b1".into(),
                content: "Looking it up".into(),
                tool_calls: vec![
                    MessageToolCall::new("c1", "search", "{}"),
                    MessageToolCall::new("c2", "fetch", "{}"),
                ],
                tool_results: vec![
                    BlockToolResult {
                        tool_call_id: "c2".into(),
                        name: "fetch".into(),
                        content: "page".into(),
                    },
                    BlockToolResult {
                        tool_call_id: "c1".into(),
                        name: "search".into(),
                        content: "hits".into(),
                    },
                ],
            },
            AssistantBlock {
                id: "b2".into(),
                content: "Done".into(),
                tool_calls: vec![],
                tool_results: vec![],
            },
        ];
        group
    }

    #[test]
    fn group_expands_to_assistant_and_tool_messages() {
        let out = AssistantGroupFlattenProcessor
            .process(PipelineContext::new(vec![Message::user("q"), group_message()]))
            .unwrap();
        let shape: Vec<(Role, &str)> = out.messages.iter().map(|m| (m.role, m.id.as_str())).collect();
        assert_eq!(
            shape,
            vec![
                (Role::User, out.messages[0].id.as_str()),
                (Role::Assistant, "g1.b1"),
                (Role::Tool, "g1.b1.c1"),
                (Role::Tool, "g1.b1.c2"),
                (Role::Assistant, "g1.b2"),
            ]
        );
        assert_eq!(out.messages[2].content, "hits");
    }

    #[test]
    fn consecutive_tasks_merge_into_one_user_message() {
        let mut a = Message::new(Role::Task, "Result A");
        a.metadata.insert("task_title".into(), "Research".into());
        let mut b = Message::new(Role::Task, "Result B");
        b.metadata.insert("task_status".into(), "failed".into());
        let first_id = a.id.clone();

        let out = TasksFlattenProcessor
            .process(PipelineContext::new(vec![Message::user("go"), a, b, Message::assistant("ok")]))
            .unwrap();

        assert_eq!(out.messages.len(), 3);
        assert_eq!(out.messages[1].role, Role::User);
        assert_eq!(out.messages[1].id, first_id);
        assert!(out.messages[1].content.contains("<task title=\"Research\" status=\"completed\">"));
        assert!(out.messages[1].content.contains("status=\"failed\">\nResult B"));
    }

    #[test]
    fn supervisor_becomes_assistant_in_place() {
        let sup = Message::new(Role::Supervisor, "Next speaker: writer").with_agent("host");
        let out = SupervisorRoleRestoreProcessor
            .process(PipelineContext::new(vec![sup]))
            .unwrap();
        assert_eq!(out.messages[0].role, Role::Assistant);
        assert_eq!(out.messages[0].agent_id.as_deref(), Some("host"));
    }
}
