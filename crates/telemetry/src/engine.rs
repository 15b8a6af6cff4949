//! Thread-safe telemetry engine — one trace per operation, spans per
//! model call and tool execution, costs from the pricing table.

use crate::TelemetryError;
use crate::model::{Span, SpanKind, TelemetrySummary, Trace};
use crate::pricing::PricingTable;
use std::sync::{PoisonError, RwLock};

/// Completed traces kept before the oldest are pruned.
const MAX_TRACES: usize = 5_000;

pub struct TelemetryEngine {
    pricing: PricingTable,
    traces: RwLock<Vec<Trace>>,
}

impl TelemetryEngine {
    /// An engine with the built-in pricing table.
    pub fn new() -> Self {
        Self::with_pricing(PricingTable::with_defaults())
    }

    pub fn with_pricing(pricing: PricingTable) -> Self {
        Self {
            pricing,
            traces: RwLock::new(Vec::new()),
        }
    }

    pub fn pricing(&self) -> &PricingTable {
        &self.pricing
    }

    /// Cost of an LLM call in USD.
    pub fn compute_cost(&self, model: &str, input_tokens: u32, output_tokens: u32) -> f64 {
        self.pricing.compute_cost(model, input_tokens, output_tokens)
    }

    // ── Traces ────────────────────────────────────────────────────────

    /// Open a trace for an operation. Returns the trace id.
    pub fn start_trace(
        &self,
        operation_id: impl Into<String>,
        parent_operation_id: Option<String>,
    ) -> String {
        let trace = Trace::new(operation_id, parent_operation_id);
        let id = trace.id.clone();
        let mut traces = self.traces.write().unwrap_or_else(PoisonError::into_inner);

        if traces.len() >= MAX_TRACES {
            let mut to_drop = MAX_TRACES / 10;
            traces.retain(|t| {
                if to_drop > 0 && t.ended_at.is_some() {
                    to_drop -= 1;
                    return false;
                }
                true
            });
        }

        traces.push(trace);
        id
    }

    /// Attach a finished span to a trace.
    pub fn record_span(&self, trace_id: &str, span: Span) -> Result<(), TelemetryError> {
        let mut traces = self.traces.write().unwrap_or_else(PoisonError::into_inner);
        let trace = traces
            .iter_mut()
            .find(|t| t.id == trace_id)
            .ok_or_else(|| TelemetryError::UnknownTrace(trace_id.to_string()))?;
        tracing::trace!(trace = %trace_id, kind = %span.kind, label = %span.label, "span recorded");
        trace.spans.push(span);
        Ok(())
    }

    /// Close a trace with the run's final status.
    pub fn end_trace(&self, trace_id: &str, status: &str) -> Result<(), TelemetryError> {
        let mut traces = self.traces.write().unwrap_or_else(PoisonError::into_inner);
        let trace = traces
            .iter_mut()
            .find(|t| t.id == trace_id)
            .ok_or_else(|| TelemetryError::UnknownTrace(trace_id.to_string()))?;
        trace.end(status);
        Ok(())
    }

    // ── Queries ───────────────────────────────────────────────────────

    pub fn get_trace(&self, trace_id: &str) -> Option<Trace> {
        let traces = self.traces.read().unwrap_or_else(PoisonError::into_inner);
        traces.iter().find(|t| t.id == trace_id).cloned()
    }

    pub fn trace_for_operation(&self, operation_id: &str) -> Option<Trace> {
        let traces = self.traces.read().unwrap_or_else(PoisonError::into_inner);
        traces
            .iter()
            .rev()
            .find(|t| t.operation_id == operation_id)
            .cloned()
    }

    /// Traces of operations delegated by `operation_id`.
    pub fn child_traces(&self, operation_id: &str) -> Vec<Trace> {
        let traces = self.traces.read().unwrap_or_else(PoisonError::into_inner);
        traces
            .iter()
            .filter(|t| t.parent_operation_id.as_deref() == Some(operation_id))
            .cloned()
            .collect()
    }

    pub fn trace_count(&self) -> usize {
        self.traces.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn summary(&self) -> TelemetrySummary {
        let traces = self.traces.read().unwrap_or_else(PoisonError::into_inner);
        let mut summary = TelemetrySummary {
            traces: traces.len(),
            ..TelemetrySummary::default()
        };
        for span in traces.iter().flat_map(|t| t.spans.iter()) {
            match span.kind {
                SpanKind::LlmCall => summary.llm_calls += 1,
                SpanKind::ToolExecution => {
                    summary.tool_executions += 1;
                    if span.success == Some(false) {
                        summary.failed_tool_executions += 1;
                    }
                }
                SpanKind::Task | SpanKind::Compression => {}
            }
            summary.input_tokens += u64::from(span.input_tokens.unwrap_or(0));
            summary.output_tokens += u64::from(span.output_tokens.unwrap_or(0));
            summary.cost_usd += span.cost_usd.unwrap_or(0.0);
        }
        summary
    }
}

impl Default for TelemetryEngine {
    fn default() -> Self {
        Self::new()
    }
}
