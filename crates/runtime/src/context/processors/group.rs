//! Group chat: hide supervisor coordination and re-attribute other speakers.

use crate::context::config::GroupContext;
use crate::context::pipeline::{ContextProcessor, PipelineContext};
use agentloop_core::error::ProcessorError;
use agentloop_core::message::Role;
use std::collections::HashSet;

/// Removes the supervisor's orchestration tool calls (and their results)
/// from the context of every other group member.
///
/// Must run before [`GroupRoleTransformProcessor`], which erases the
/// attribution this filter relies on.
pub struct GroupOrchestrationFilterProcessor {
    group: GroupContext,
}

impl GroupOrchestrationFilterProcessor {
    pub fn new(group: GroupContext) -> Self {
        Self { group }
    }
}

impl ContextProcessor for GroupOrchestrationFilterProcessor {
    fn name(&self) -> &'static str {
        "group_orchestration_filter"
    }

    fn process(&self, mut ctx: PipelineContext) -> Result<PipelineContext, ProcessorError> {
        if !self.group.is_usable() {
            return Ok(ctx);
        }
        let (Some(current), Some(supervisor)) = (
            self.group.current_agent_id.as_deref(),
            self.group.supervisor_agent_id.as_deref(),
        ) else {
            return Ok(ctx);
        };
        if current == supervisor {
            return Ok(ctx);
        }

        let orchestration: HashSet<&str> =
            self.group.orchestration_tool_names.iter().map(String::as_str).collect();
        let mut removed_calls: HashSet<String> = HashSet::new();
        let mut emptied: HashSet<String> = HashSet::new();

        for message in ctx
            .messages
            .iter_mut()
            .filter(|m| m.agent_id.as_deref() == Some(supervisor) && m.role == Role::Assistant)
        {
            if message.tool_calls.is_empty() {
                continue;
            }
            message.tool_calls.retain(|call| {
                let hide = orchestration.contains(call.name.as_str());
                if hide {
                    removed_calls.insert(call.id.clone());
                }
                !hide
            });
            if message.tool_calls.is_empty() && message.content.trim().is_empty() {
                emptied.insert(message.id.clone());
            }
        }

        let before = ctx.messages.len();
        ctx.messages.retain(|m| {
            let orphaned = m.role == Role::Tool
                && m.tool_call_id.as_ref().is_some_and(|id| removed_calls.contains(id));
            !orphaned && !emptied.contains(&m.id)
        });
        let dropped = before - ctx.messages.len();
        ctx.record_drop(self.name(), dropped, 0, "supervisor orchestration");
        if !removed_calls.is_empty() {
            ctx.flag("orchestration_calls_removed", removed_calls.len());
        }
        Ok(ctx)
    }
}

/// Presents other members' turns as user messages attributed to a speaker.
///
/// Message count and order are preserved.
pub struct GroupRoleTransformProcessor {
    group: GroupContext,
}

impl GroupRoleTransformProcessor {
    pub fn new(group: GroupContext) -> Self {
        Self { group }
    }
}

impl ContextProcessor for GroupRoleTransformProcessor {
    fn name(&self) -> &'static str {
        "group_role_transform"
    }

    fn process(&self, mut ctx: PipelineContext) -> Result<PipelineContext, ProcessorError> {
        if !self.group.is_usable() {
            return Ok(ctx);
        }
        let Some(current) = self.group.current_agent_id.clone() else {
            return Ok(ctx);
        };

        let mut foreign_calls: HashSet<String> = HashSet::new();
        let mut transformed = 0usize;
        for message in ctx.messages.iter_mut() {
            match message.role {
                Role::Assistant => {
                    let Some(author) = message.agent_id.clone().filter(|a| *a != current) else {
                        continue;
                    };
                    let mut content = format!(
                        "<speaker name=\"{}\" />\n{}",
                        self.group.display_name(&author),
                        message.content
                    );
                    for call in message.tool_calls.drain(..) {
                        content.push_str(&format!("\n[called {}({})]", call.name, call.arguments));
                        foreign_calls.insert(call.id);
                    }
                    message.content = content;
                    message.role = Role::User;
                    transformed += 1;
                }
                Role::Tool => {
                    let Some(id) = message.tool_call_id.clone().filter(|id| foreign_calls.contains(id)) else {
                        continue;
                    };
                    let name = message.name.take().unwrap_or_default();
                    message.content = format!(
                        "<tool_result name=\"{name}\" id=\"{id}\">\n{}\n</tool_result>",
                        message.content
                    );
                    message.role = Role::User;
                    message.tool_call_id = None;
                    transformed += 1;
                }
                _ => {}
            }
        }
        if transformed > 0 {
            ctx.flag("group_messages_transformed", transformed);
        }
        Ok(ctx)
    }
}
