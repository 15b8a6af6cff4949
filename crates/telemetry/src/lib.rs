//! Execution tracing and cost tracking for agentloop runs.
//!
//! Every operation gets a trace. Model calls and tool executions are
//! recorded as spans, and model calls are priced from a per-model table.

pub mod engine;
pub mod model;
pub mod pricing;

pub use engine::TelemetryEngine;
pub use model::{Span, SpanKind, TelemetrySummary, Trace};
pub use pricing::{ModelPricing, PricingTable};

/// Errors from the telemetry subsystem.
#[derive(Debug, thiserror::Error)]
pub enum TelemetryError {
    #[error("unknown trace id: {0}")]
    UnknownTrace(String),

    #[error("serialization error: {0}")]
    SerdeError(#[from] serde_json::Error),
}
