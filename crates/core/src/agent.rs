//! Agent run state and usage accounting.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::message::{Message, MessageError, MessageToolCall};
use crate::tool::ToolManifest;

/// Lifecycle status of a run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
    #[default]
    Running,
    WaitingForHuman,
    /// Cancelled; one cleanup step still has to run
    Interrupted,
    Done,
    Error,
}

impl AgentStatus {
    /// Whether the run loop stops after seeing this status.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::WaitingForHuman | Self::Done | Self::Error)
    }
}

impl std::fmt::Display for AgentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Running => "running",
            Self::WaitingForHuman => "waiting_for_human",
            Self::Interrupted => "interrupted",
            Self::Done => "done",
            Self::Error => "error",
        };
        f.write_str(s)
    }
}

/// Why a run reached `done` (or `error`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompletionReason {
    /// The model finished its turn without requesting tools
    Completed,
    MaxStepsExceeded,
    /// External cancellation
    Interrupted,
    /// A human declined to continue
    HumanAborted,
    Error,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LlmUsage {
    pub calls: u32,
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolUsage {
    pub calls: u32,
    pub failed: u32,
    pub total_duration_ms: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HumanUsage {
    pub approvals_requested: u32,
    pub approved: u32,
    pub rejected: u32,
    pub total_wait_ms: u64,
}

/// Counters accumulated over a run. Each step returns a delta.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    pub llm: LlmUsage,
    pub tools: ToolUsage,
    pub human: HumanUsage,
}

impl Usage {
    /// Add a step's delta to the running totals.
    pub fn accumulate(&mut self, delta: &Usage) {
        self.llm.calls += delta.llm.calls;
        self.llm.prompt_tokens += delta.llm.prompt_tokens;
        self.llm.completion_tokens += delta.llm.completion_tokens;
        self.llm.total_tokens += delta.llm.total_tokens;

        self.tools.calls += delta.tools.calls;
        self.tools.failed += delta.tools.failed;
        self.tools.total_duration_ms += delta.tools.total_duration_ms;

        self.human.approvals_requested += delta.human.approvals_requested;
        self.human.approved += delta.human.approved;
        self.human.rejected += delta.human.rejected;
        self.human.total_wait_ms += delta.human.total_wait_ms;
    }
}

/// Cost in USD.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Cost {
    pub llm_usd: f64,
    pub total_usd: f64,
}

impl Cost {
    pub fn llm(usd: f64) -> Self {
        Self {
            llm_usd: usd,
            total_usd: usd,
        }
    }

    pub fn accumulate(&mut self, delta: &Cost) {
        self.llm_usd += delta.llm_usd;
        self.total_usd += delta.total_usd;
    }
}

/// Tool calls parked until a human decides.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingHuman {
    pub tool_calls: Vec<MessageToolCall>,
    pub requested_at: DateTime<Utc>,
}

/// The run loop's persistent state.
///
/// Steps never mutate a state in place; each step returns a new value.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentState {
    pub session_id: String,

    pub status: AgentStatus,

    /// Snapshot of the conversation as of the last refresh
    #[serde(default)]
    pub messages: Vec<Message>,

    #[serde(default)]
    pub usage: Usage,

    #[serde(default)]
    pub cost: Cost,

    pub step_count: u32,

    pub max_steps: u32,

    /// Session, topic and working-directory identifiers
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub metadata: serde_json::Map<String, serde_json::Value>,

    /// Manifests of the tools enabled for this run, by identifier
    #[serde(default)]
    pub tool_manifest_map: BTreeMap<String, ToolManifest>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pending_human: Option<PendingHuman>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completion_reason: Option<CompletionReason>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<MessageError>,

    pub created_at: DateTime<Utc>,

    pub updated_at: DateTime<Utc>,
}

impl AgentState {
    pub fn new(session_id: impl Into<String>, max_steps: u32) -> Self {
        let now = Utc::now();
        Self {
            session_id: session_id.into(),
            status: AgentStatus::Running,
            messages: Vec::new(),
            usage: Usage::default(),
            cost: Cost::default(),
            step_count: 0,
            max_steps,
            metadata: serde_json::Map::new(),
            tool_manifest_map: BTreeMap::new(),
            pending_human: None,
            completion_reason: None,
            error: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_tools(mut self, manifests: impl IntoIterator<Item = ToolManifest>) -> Self {
        for manifest in manifests {
            self.tool_manifest_map.insert(manifest.identifier.clone(), manifest);
        }
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    /// Steps left before the limit.
    pub fn remaining_steps(&self) -> u32 {
        self.max_steps.saturating_sub(self.step_count)
    }

    pub fn last_assistant(&self) -> Option<&Message> {
        self.messages
            .iter()
            .rev()
            .find(|m| m.role == crate::message::Role::Assistant)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_state_is_running() {
        let state = AgentState::new("s1", 10);
        assert_eq!(state.status, AgentStatus::Running);
        assert_eq!(state.remaining_steps(), 10);
        assert!(!state.status.is_terminal());
    }

    #[test]
    fn usage_accumulates_rather_than_replaces() {
        let mut total = Usage::default();
        let mut delta = Usage::default();
        delta.llm.calls = 1;
        delta.llm.total_tokens = 120;
        delta.human.total_wait_ms = 500;

        total.accumulate(&delta);
        total.accumulate(&delta);

        assert_eq!(total.llm.calls, 2);
        assert_eq!(total.llm.total_tokens, 240);
        assert_eq!(total.human.total_wait_ms, 1000);
    }

    #[test]
    fn cost_accumulates() {
        let mut cost = Cost::default();
        cost.accumulate(&Cost::llm(0.25));
        cost.accumulate(&Cost::llm(0.5));
        assert!((cost.total_usd - 0.75).abs() < 1e-9);
    }

    #[test]
    fn status_serializes_snake_case() {
        let json = serde_json::to_string(&AgentStatus::WaitingForHuman).unwrap();
        assert_eq!(json, r#""waiting_for_human""#);
        assert!(AgentStatus::Done.is_terminal());
        assert!(!AgentStatus::Interrupted.is_terminal());
    }

    #[test]
    fn remaining_steps_saturates() {
        let mut state = AgentState::new("s1", 2);
        state.step_count = 5;
        assert_eq!(state.remaining_steps(), 0);
    }
}
