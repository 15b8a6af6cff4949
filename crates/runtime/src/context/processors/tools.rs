//! Tool call formatting and tool result ordering.

use crate::context::pipeline::{ContextProcessor, PipelineContext};
use crate::context::token::estimate_messages_tokens;
use agentloop_core::error::ProcessorError;
use agentloop_core::message::{Message, Role};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashMap};

/// Longest function name providers accept.
const MAX_TOOL_NAME_LEN: usize = 64;
const HASH_SUFFIX_LEN: usize = 8;

/// The name a tool is offered under.
///
/// Names over the provider limit are cut and suffixed with a short hash of
/// the full name, so distinct long names stay distinct and every run maps a
/// name the same way.
pub fn provider_tool_name(name: &str) -> String {
    if name.len() <= MAX_TOOL_NAME_LEN {
        return name.to_string();
    }
    let digest = Sha256::digest(name.as_bytes());
    let hash: String = digest
        .iter()
        .take(HASH_SUFFIX_LEN / 2)
        .map(|b| format!("{b:02x}"))
        .collect();
    let keep = MAX_TOOL_NAME_LEN - HASH_SUFFIX_LEN - 1;
    let mut cut = keep;
    while !name.is_char_boundary(cut) {
        cut -= 1;
    }
    format!("{}_{hash}", &name[..cut])
}

/// Formats tool calls for the provider.
///
/// With native function calling, names are normalised with
/// [`provider_tool_name`] and the mapping is published under the
/// `tool_name_map` metadata key. Without it, calls and results are rendered
/// as tagged text.
pub struct ToolCallProcessor {
    function_calling: bool,
}

impl ToolCallProcessor {
    pub fn new(function_calling: bool) -> Self {
        Self { function_calling }
    }

    fn normalise(ctx: &mut PipelineContext) {
        let mut renamed: BTreeMap<String, String> = BTreeMap::new();
        let mut rename = |name: &mut String| {
            let mapped = provider_tool_name(name);
            if mapped != *name {
                renamed.insert(mapped.clone(), std::mem::replace(name, mapped));
            }
        };
        for message in ctx.messages.iter_mut() {
            for call in message.tool_calls.iter_mut() {
                rename(&mut call.name);
            }
            if message.role == Role::Tool
                && let Some(name) = message.name.as_mut()
            {
                rename(name);
            }
        }
        if !renamed.is_empty() {
            let map: serde_json::Map<String, serde_json::Value> = renamed
                .into_iter()
                .map(|(k, v)| (k, serde_json::Value::String(v)))
                .collect();
            ctx.flag("tool_name_map", serde_json::Value::Object(map));
        }
    }

    fn render_as_text(ctx: &mut PipelineContext) {
        let mut rendered = 0usize;
        for message in ctx.messages.iter_mut() {
            match message.role {
                Role::Assistant if !message.tool_calls.is_empty() => {
                    for call in message.tool_calls.drain(..) {
                        if !message.content.is_empty() {
                            message.content.push('\n');
                        }
                        message.content.push_str(&format!(
                            "<tool_call name=\"{}\" id=\"{}\">{}</tool_call>",
                            call.name, call.id, call.arguments
                        ));
                        rendered += 1;
                    }
                }
                Role::Tool => {
                    let name = message.name.take().unwrap_or_default();
                    let id = message.tool_call_id.take().unwrap_or_default();
                    message.content = format!(
                        "<tool_result name=\"{name}\" id=\"{id}\">\n{}\n</tool_result>",
                        message.content
                    );
                    message.role = Role::User;
                }
                _ => {}
            }
        }
        if rendered > 0 {
            ctx.flag("tool_calls_as_text", rendered);
        }
    }
}

impl ContextProcessor for ToolCallProcessor {
    fn name(&self) -> &'static str {
        "tool_call"
    }

    fn process(&self, mut ctx: PipelineContext) -> Result<PipelineContext, ProcessorError> {
        if self.function_calling {
            Self::normalise(&mut ctx);
        } else {
            Self::render_as_text(&mut ctx);
        }
        Ok(ctx)
    }
}

/// Moves every tool result directly behind the assistant message that
/// requested it, in the order of the calls.
///
/// Results with no requesting call are dropped, and so are duplicate
/// results for one call (the first wins).
#[derive(Default)]
pub struct ToolMessageReorder;

impl ContextProcessor for ToolMessageReorder {
    fn name(&self) -> &'static str {
        "tool_message_reorder"
    }

    fn process(&self, mut ctx: PipelineContext) -> Result<PipelineContext, ProcessorError> {
        if !ctx.messages.iter().any(|m| m.role == Role::Tool) {
            return Ok(ctx);
        }
        let (tools, others): (Vec<Message>, Vec<Message>) = std::mem::take(&mut ctx.messages)
            .into_iter()
            .partition(|m| m.role == Role::Tool);

        let mut results: HashMap<String, Message> = HashMap::new();
        let mut dropped = Vec::new();
        for tool in tools {
            match tool.tool_call_id.clone() {
                Some(id) if !results.contains_key(&id) => {
                    results.insert(id, tool);
                }
                _ => dropped.push(tool),
            }
        }

        let mut out = Vec::with_capacity(others.len() + results.len());
        for message in others {
            let call_ids: Vec<String> = if message.role == Role::Assistant {
                message.tool_calls.iter().map(|c| c.id.clone()).collect()
            } else {
                Vec::new()
            };
            out.push(message);
            for id in call_ids {
                if let Some(result) = results.remove(&id) {
                    out.push(result);
                }
            }
        }
        dropped.extend(results.into_values());

        ctx.messages = out;
        ctx.record_drop(
            self.name(),
            dropped.len(),
            estimate_messages_tokens(&dropped),
            "tool result without a matching call",
        );
        Ok(ctx)
    }
}
