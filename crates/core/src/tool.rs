//! Tool trait — the abstraction over agent capabilities.
//!
//! The run loop never calls a tool directly. It hands a [`ToolInvocation`] to
//! a [`ToolExecutor`] and always gets a [`ToolOutcome`] back: failures are
//! data the model can react to, not errors that unwind the loop.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::error::ToolError;
use crate::provider::ToolDefinition;

/// Whether a tool call must be approved by a human before it runs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HumanIntervention {
    #[default]
    Never,
    Required,
}

/// Static description of a tool, as seen by the context pipeline and planner.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolManifest {
    /// Unique tool name
    pub identifier: String,

    pub description: String,

    /// JSON Schema describing the tool's parameters
    pub parameters: serde_json::Value,

    /// Extra instructions merged into the system message when the tool is enabled
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_role: Option<String>,

    #[serde(default)]
    pub human_intervention: HumanIntervention,
}

impl ToolManifest {
    pub fn new(identifier: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            identifier: identifier.into(),
            description: description.into(),
            parameters: serde_json::json!({ "type": "object", "properties": {} }),
            system_role: None,
            human_intervention: HumanIntervention::Never,
        }
    }

    pub fn with_parameters(mut self, parameters: serde_json::Value) -> Self {
        self.parameters = parameters;
        self
    }

    pub fn with_system_role(mut self, system_role: impl Into<String>) -> Self {
        self.system_role = Some(system_role.into());
        self
    }

    pub fn requiring_approval(mut self) -> Self {
        self.human_intervention = HumanIntervention::Required;
        self
    }

    /// Convert into the definition offered to the model.
    pub fn to_definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.identifier.clone(),
            description: self.description.clone(),
            parameters: self.parameters.clone(),
        }
    }
}

/// One requested tool call, ready to execute.
#[derive(Debug, Clone)]
pub struct ToolInvocation {
    /// Matches the model's tool_call.id
    pub call_id: String,

    pub name: String,

    pub arguments: serde_json::Value,

    /// The operation this call runs under. Tools use it to register
    /// after-completion hooks.
    pub operation_id: String,

    /// Fires when the operation is cancelled
    pub cancel: CancellationToken,
}

/// What a tool returns on success.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ToolOutput {
    pub content: String,

    /// Structured state persisted on the tool message
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<serde_json::Value>,
}

impl ToolOutput {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            state: None,
        }
    }

    pub fn with_state(mut self, state: serde_json::Value) -> Self {
        self.state = Some(state);
        self
    }
}

/// The structured result of any tool call, successful or not.
#[derive(Debug, Clone)]
pub struct ToolOutcome {
    pub content: String,
    pub state: Option<serde_json::Value>,
    pub success: bool,
    pub error: Option<ToolError>,
}

impl ToolOutcome {
    pub fn succeeded(output: ToolOutput) -> Self {
        Self {
            content: output.content,
            state: output.state,
            success: true,
            error: None,
        }
    }

    /// A failure the model sees as ordinary tool content.
    pub fn failed(error: ToolError) -> Self {
        Self {
            content: format!("Error: {error}"),
            state: None,
            success: false,
            error: Some(error),
        }
    }
}

/// The seam between the run loop and tool implementations.
#[async_trait]
pub trait ToolExecutor: Send + Sync {
    /// Execute one call. Never fails: errors are captured in the outcome.
    async fn execute(&self, invocation: ToolInvocation) -> ToolOutcome;

    /// Manifests for every tool this executor can run.
    fn manifests(&self) -> Vec<ToolManifest>;
}

/// A single capability the agent can invoke.
#[async_trait]
pub trait Tool: Send + Sync {
    /// The unique name of this tool (e.g., "web_search").
    fn name(&self) -> &str;

    /// A description of what this tool does (sent to the LLM).
    fn description(&self) -> &str;

    /// JSON Schema describing this tool's parameters.
    fn parameters_schema(&self) -> serde_json::Value;

    /// Instructions added to the system message while the tool is enabled.
    fn system_role(&self) -> Option<&str> {
        None
    }

    fn human_intervention(&self) -> HumanIntervention {
        HumanIntervention::Never
    }

    async fn execute(&self, invocation: &ToolInvocation) -> std::result::Result<ToolOutput, ToolError>;

    fn manifest(&self) -> ToolManifest {
        ToolManifest {
            identifier: self.name().to_string(),
            description: self.description().to_string(),
            parameters: self.parameters_schema(),
            system_role: self.system_role().map(str::to_string),
            human_intervention: self.human_intervention(),
        }
    }
}

/// A registry of available tools.
///
/// The registry is the default [`ToolExecutor`]: it looks the tool up by
/// name and turns every failure into a [`ToolOutcome`].
#[derive(Clone, Default)]
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool. Replaces any existing tool with the same name.
    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        let name = tool.name().to_string();
        self.tools.insert(name, tool);
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn Tool>> {
        self.tools.get(name)
    }

    /// Tool definitions in name order.
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.manifests().iter().map(ToolManifest::to_definition).collect()
    }

    /// List all registered tool names.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.tools.keys().map(|s| s.as_str()).collect();
        names.sort_unstable();
        names
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

#[async_trait]
impl ToolExecutor for ToolRegistry {
    async fn execute(&self, invocation: ToolInvocation) -> ToolOutcome {
        let Some(tool) = self.tools.get(&invocation.name) else {
            return ToolOutcome::failed(ToolError::NotFound(invocation.name));
        };
        if invocation.cancel.is_cancelled() {
            return ToolOutcome::failed(ToolError::Cancelled(invocation.name));
        }

        match tool.execute(&invocation).await {
            Ok(output) => ToolOutcome::succeeded(output),
            Err(e) => {
                tracing::debug!(tool = %invocation.name, error = %e, "Tool call failed");
                ToolOutcome::failed(e)
            }
        }
    }

    fn manifests(&self) -> Vec<ToolManifest> {
        let mut manifests: Vec<ToolManifest> = self.tools.values().map(|t| t.manifest()).collect();
        manifests.sort_by(|a, b| a.identifier.cmp(&b.identifier));
        manifests
    }
}
