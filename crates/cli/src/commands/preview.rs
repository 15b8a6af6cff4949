//! `agentloop preview`: show exactly what the model would receive.

use super::load_config;
use agentloop_core::message::{Message, MessageToolCall, Role};
use agentloop_runtime::RunConfig;
use agentloop_runtime::context::PipelineAssembler;
use agentloop_runtime::context::config::KnowledgeConfig;
use anyhow::Context;
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// A hand-written message; ids and timestamps are generated.
#[derive(Debug, Deserialize)]
struct InputMessage {
    role: Role,
    #[serde(default)]
    content: String,
    #[serde(default)]
    tool_calls: Vec<MessageToolCall>,
    #[serde(default)]
    tool_call_id: Option<String>,
    #[serde(default)]
    name: Option<String>,
}

impl From<InputMessage> for Message {
    fn from(input: InputMessage) -> Self {
        let mut message = Message::new(input.role, input.content).with_tool_calls(input.tool_calls);
        message.tool_call_id = input.tool_call_id;
        message.name = input.name;
        message
    }
}

pub fn run(
    config_path: Option<&Path>,
    messages: &Path,
    system_role: Option<String>,
    knowledge: &[PathBuf],
) -> anyhow::Result<()> {
    let app = load_config(config_path)?;
    let mut pipeline = RunConfig::from_app_config(&app).pipeline;
    if let Some(role) = system_role {
        pipeline.system_role = Some(role);
    }
    if !knowledge.is_empty() {
        let contents = knowledge
            .iter()
            .map(|path| {
                std::fs::read_to_string(path)
                    .with_context(|| format!("failed to read {}", path.display()))
            })
            .collect::<anyhow::Result<Vec<_>>>()?;
        pipeline.knowledge = Some(KnowledgeConfig::files(contents));
    }

    let raw = std::fs::read_to_string(messages)
        .with_context(|| format!("failed to read {}", messages.display()))?;
    let history = parse_messages(&raw)?;
    tracing::debug!(count = history.len(), "Assembling preview");

    let assembled = PipelineAssembler::assemble(&pipeline, &history)?;
    let report = serde_json::json!({
        "messages": assembled.messages,
        "metadata": assembled.metadata,
        "stats": assembled.stats,
    });
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

fn parse_messages(raw: &str) -> anyhow::Result<Vec<Message>> {
    let inputs: Vec<InputMessage> =
        serde_json::from_str(raw).context("messages must be a JSON array of messages")?;
    Ok(inputs.into_iter().map(Message::from).collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_minimal_messages() {
        let raw = r#"[
            {"role": "user", "content": "hello"},
            {"role": "assistant", "tool_calls": [{"id": "c1", "name": "search", "arguments": "{}"}]},
            {"role": "tool", "content": "found", "tool_call_id": "c1", "name": "search"}
        ]"#;

        let messages = parse_messages(raw).unwrap();

        assert_eq!(messages.len(), 3);
        assert_eq!(messages[1].tool_calls[0].name, "search");
        assert_eq!(messages[2].tool_call_id.as_deref(), Some("c1"));
        assert_ne!(messages[0].id, messages[1].id);
    }

    #[test]
    fn rejects_non_array_input() {
        assert!(parse_messages(r#"{"role": "user"}"#).is_err());
    }
}
