//! Data model for operation traces and spans.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ── Span ──────────────────────────────────────────────────────────────────

/// The kind of work a span represents.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SpanKind {
    /// One model call inside a `call_llm` step.
    LlmCall,
    /// One tool invocation.
    ToolExecution,
    /// A delegated sub-agent task.
    Task,
    /// A history compression pass.
    Compression,
}

impl std::fmt::Display for SpanKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::LlmCall => "llm_call",
            Self::ToolExecution => "tool_execution",
            Self::Task => "task",
            Self::Compression => "compression",
        };
        f.write_str(s)
    }
}

/// A single traced unit of work.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Span {
    pub id: String,
    pub kind: SpanKind,
    /// Model name or tool name
    pub label: String,
    /// Step number the span belongs to
    pub step: u32,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub duration_ms: Option<u64>,
    pub input_tokens: Option<u32>,
    pub output_tokens: Option<u32>,
    pub cost_usd: Option<f64>,
    pub success: Option<bool>,
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

impl Span {
    pub fn new(kind: SpanKind, label: impl Into<String>, step: u32) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            kind,
            label: label.into(),
            step,
            started_at: Utc::now(),
            ended_at: None,
            duration_ms: None,
            input_tokens: None,
            output_tokens: None,
            cost_usd: None,
            success: None,
            metadata: serde_json::Map::new(),
        }
    }

    /// Close the span.
    pub fn end(&mut self, success: bool) {
        let now = Utc::now();
        self.ended_at = Some(now);
        self.duration_ms = Some(
            now.signed_duration_since(self.started_at)
                .num_milliseconds()
                .max(0) as u64,
        );
        self.success = Some(success);
    }

    pub fn record_tokens(&mut self, input: u32, output: u32, cost: f64) {
        self.input_tokens = Some(input);
        self.output_tokens = Some(output);
        self.cost_usd = Some(cost);
    }

    pub fn total_tokens(&self) -> u32 {
        self.input_tokens.unwrap_or(0) + self.output_tokens.unwrap_or(0)
    }
}

// ── Trace ─────────────────────────────────────────────────────────────────

/// All spans recorded for one operation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trace {
    pub id: String,
    pub operation_id: String,
    /// Trace of the parent operation for delegated runs
    pub parent_operation_id: Option<String>,
    pub spans: Vec<Span>,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    /// Final run status, set when the trace ends
    pub status: Option<String>,
}

impl Trace {
    pub fn new(operation_id: impl Into<String>, parent_operation_id: Option<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            operation_id: operation_id.into(),
            parent_operation_id,
            spans: Vec::new(),
            started_at: Utc::now(),
            ended_at: None,
            status: None,
        }
    }

    pub fn end(&mut self, status: impl Into<String>) {
        self.ended_at = Some(Utc::now());
        self.status = Some(status.into());
    }

    pub fn total_cost(&self) -> f64 {
        self.spans.iter().filter_map(|s| s.cost_usd).sum()
    }

    pub fn total_tokens(&self) -> u32 {
        self.spans.iter().map(Span::total_tokens).sum()
    }

    pub fn count(&self, kind: SpanKind) -> usize {
        self.spans.iter().filter(|s| s.kind == kind).count()
    }
}

// ── Summary ───────────────────────────────────────────────────────────────

/// Totals across every recorded trace.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TelemetrySummary {
    pub traces: usize,
    pub llm_calls: u64,
    pub tool_executions: u64,
    pub failed_tool_executions: u64,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cost_usd: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn span_lifecycle() {
        let mut span = Span::new(SpanKind::LlmCall, "gpt-4o", 1);
        assert!(span.ended_at.is_none());
        span.record_tokens(100, 50, 0.001);
        span.end(true);
        assert_eq!(span.success, Some(true));
        assert_eq!(span.total_tokens(), 150);
        assert!(span.duration_ms.is_some());
    }

    #[test]
    fn trace_aggregates() {
        let mut trace = Trace::new("op_1", None);
        let mut llm = Span::new(SpanKind::LlmCall, "gpt-4o", 1);
        llm.record_tokens(1000, 500, 0.01);
        trace.spans.push(llm);
        trace.spans.push(Span::new(SpanKind::ToolExecution, "search", 2));
        trace.end("done");

        assert_eq!(trace.total_tokens(), 1500);
        assert!((trace.total_cost() - 0.01).abs() < 1e-10);
        assert_eq!(trace.count(SpanKind::ToolExecution), 1);
        assert_eq!(trace.status.as_deref(), Some("done"));
    }

    #[test]
    fn span_kind_display() {
        assert_eq!(SpanKind::ToolExecution.to_string(), "tool_execution");
    }
}
