//! Per-run configuration consumed by the pipeline assembler.
//!
//! Every optional feature is an `Option`: `None` leaves its processor out of
//! the pipeline. A feature that is present but missing something it needs
//! (a group context without an agent map, an empty knowledge list) stays in
//! the pipeline and degrades to a no-op.

use agentloop_core::tool::ToolManifest;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PipelineConfig {
    #[serde(default)]
    pub model: String,

    #[serde(default)]
    pub provider: String,

    /// Base system prompt
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_role: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub eval_context: Option<EvalContext>,

    #[serde(default)]
    pub system_date: SystemDate,

    /// Summary of earlier conversation, maintained outside the run loop
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub history_summary: Option<String>,

    /// Keep only the most recent N non-system messages
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub history_count: Option<usize>,

    /// Template applied to user messages; `{{text}}` is the original text
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_template: Option<String>,

    /// Values for `{{name}}` placeholders
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub variables: BTreeMap<String, String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_memory: Option<UserMemory>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_builder_context: Option<AgentBuilderContext>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group_context: Option<GroupContext>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gtd_plan: Option<GtdPlan>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gtd_todos: Option<Vec<TodoItem>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub knowledge: Option<KnowledgeConfig>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_discovery: Option<ToolDiscovery>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub skills_config: Option<SkillsConfig>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tools_config: Option<ToolsConfig>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page_editor_context: Option<PageEditorContext>,

    /// Keep image attachments for models that accept them
    #[serde(default)]
    pub vision_supported: bool,

    /// Ask the model to wrap up instead of calling more tools
    #[serde(default)]
    pub force_finish: bool,

    /// Drop the oldest turns once the context exceeds this estimate
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_context_tokens: Option<usize>,
}

impl PipelineConfig {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            ..Self::default()
        }
    }

    pub fn with_system_role(mut self, system_role: impl Into<String>) -> Self {
        self.system_role = Some(system_role.into());
        self
    }

    pub fn with_knowledge(mut self, knowledge: KnowledgeConfig) -> Self {
        self.knowledge = Some(knowledge);
        self
    }

    pub fn with_tools(mut self, tools: ToolsConfig) -> Self {
        self.tools_config = Some(tools);
        self
    }

    pub fn with_group(mut self, group: GroupContext) -> Self {
        self.group_context = Some(group);
        self
    }

    /// Whether tool calls are sent as native function calls.
    pub fn function_calling(&self) -> bool {
        self.tools_config
            .as_ref()
            .is_none_or(|t| t.function_call_supported)
    }
}

/// Where the system date comes from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "mode", content = "value")]
pub enum SystemDate {
    #[default]
    Disabled,
    /// The wall clock at assembly time
    Now,
    Fixed(DateTime<Utc>),
}

/// Notes about the environment an evaluation run executes in.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EvalContext {
    #[serde(default)]
    pub env_prompt: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UserMemory {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub persona: Option<String>,

    #[serde(default)]
    pub memories: Vec<String>,
}

/// The configuration of the agent being edited, for the agent-builder view.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AgentBuilderContext {
    #[serde(default)]
    pub agent_config: serde_json::Value,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instructions: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AgentProfile {
    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// Multi-agent group chat state.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GroupContext {
    #[serde(default)]
    pub enabled: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,

    /// The agent this context is assembled for
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_agent_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub supervisor_agent_id: Option<String>,

    #[serde(default)]
    pub agent_map: BTreeMap<String, AgentProfile>,

    /// Supervisor-only coordination tools hidden from other members
    #[serde(default = "default_orchestration_tools")]
    pub orchestration_tool_names: Vec<String>,
}

fn default_orchestration_tools() -> Vec<String> {
    vec!["broadcast".into(), "speak".into(), "delegate".into()]
}

impl GroupContext {
    /// The group is on and has what the group processors need.
    pub fn is_usable(&self) -> bool {
        self.enabled
            && !self.agent_map.is_empty()
            && self
                .current_agent_id
                .as_ref()
                .is_some_and(|id| self.agent_map.contains_key(id))
    }

    pub fn is_supervisor(&self, agent_id: &str) -> bool {
        self.supervisor_agent_id.as_deref() == Some(agent_id)
    }

    pub fn display_name<'a>(&'a self, agent_id: &'a str) -> &'a str {
        self.agent_map
            .get(agent_id)
            .map(|p| p.name.as_str())
            .unwrap_or(agent_id)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GtdPlan {
    pub title: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    #[serde(default)]
    pub steps: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TodoItem {
    pub text: String,

    #[serde(default)]
    pub done: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct KnowledgeBase {
    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct KnowledgeConfig {
    /// Full text of files attached to the agent
    #[serde(default)]
    pub file_contents: Vec<String>,

    #[serde(default)]
    pub knowledge_bases: Vec<KnowledgeBase>,
}

impl KnowledgeConfig {
    pub fn files(contents: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            file_contents: contents.into_iter().map(Into::into).collect(),
            knowledge_bases: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ToolSummary {
    pub identifier: String,
    pub description: String,
}

/// Tools the model may ask to activate mid-run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ToolDiscovery {
    #[serde(default)]
    pub available: Vec<ToolSummary>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Skill {
    pub name: String,

    #[serde(default)]
    pub content: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SkillsConfig {
    #[serde(default)]
    pub skills: Vec<Skill>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolsConfig {
    /// Tools offered to the model this step
    #[serde(default)]
    pub manifests: Vec<ToolManifest>,

    #[serde(default = "default_true")]
    pub function_call_supported: bool,
}

fn default_true() -> bool {
    true
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            manifests: Vec::new(),
            function_call_supported: true,
        }
    }
}

/// The document open in the page editor.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PageEditorContext {
    #[serde(default)]
    pub title: String,

    #[serde(default)]
    pub content: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selection: Option<String>,
}
