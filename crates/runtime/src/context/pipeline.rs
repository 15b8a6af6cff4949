//! The context pipeline: an ordered chain of processors that turns the
//! persisted conversation into the exact message list sent to the model.
//!
//! Processors take the [`PipelineContext`] by value and hand back a new one.
//! Ownership moves down the chain, so no stage can alias or mutate the list
//! another stage is holding. The runner never catches processor errors;
//! they surface to the run loop as a step failure.

use agentloop_core::error::ProcessorError;
use agentloop_core::message::Message;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

// ── Types ─────────────────────────────────────────────────────────────────

/// Per-processor bookkeeping collected by the runner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessorStat {
    pub name: String,
    pub messages_in: usize,
    pub messages_out: usize,
}

/// Information about messages a processor removed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DropInfo {
    /// Which processor dropped them.
    pub processor: String,
    pub items_dropped: usize,
    /// Estimated tokens of dropped content.
    pub tokens_dropped: usize,
    pub reason: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineStats {
    pub processors: Vec<ProcessorStat>,
    pub drops: Vec<DropInfo>,
}

/// The envelope passed from one processor to the next.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PipelineContext {
    pub messages: Vec<Message>,
    /// Provenance flags such as `knowledge_injected`
    pub metadata: BTreeMap<String, serde_json::Value>,
    pub stats: PipelineStats,
}

impl PipelineContext {
    pub fn new(messages: Vec<Message>) -> Self {
        Self {
            messages,
            ..Self::default()
        }
    }

    /// Record that a processor did something worth knowing about.
    pub fn flag(&mut self, key: &str, value: impl Into<serde_json::Value>) {
        self.metadata.insert(key.to_string(), value.into());
    }

    pub fn is_flagged(&self, key: &str) -> bool {
        matches!(self.metadata.get(key), Some(v) if !v.is_null() && *v != serde_json::Value::Bool(false))
    }

    pub fn record_drop(
        &mut self,
        processor: &str,
        items_dropped: usize,
        tokens_dropped: usize,
        reason: impl Into<String>,
    ) {
        if items_dropped == 0 {
            return;
        }
        self.stats.drops.push(DropInfo {
            processor: processor.to_string(),
            items_dropped,
            tokens_dropped,
            reason: reason.into(),
        });
    }
}

// ── Processor ─────────────────────────────────────────────────────────────

/// One stage of the pipeline.
///
/// A processor may read its own configuration but never global state. A
/// missing optional input makes it a no-op; malformed but well-typed input
/// is never an error.
pub trait ContextProcessor: Send + Sync {
    /// Stable snake_case name, used in stats and error messages.
    fn name(&self) -> &'static str;

    fn process(&self, ctx: PipelineContext) -> Result<PipelineContext, ProcessorError>;
}

// ── Runner ────────────────────────────────────────────────────────────────

/// An ordered list of processors, executed strictly in sequence.
pub struct ContextPipeline {
    processors: Vec<Box<dyn ContextProcessor>>,
}

impl ContextPipeline {
    pub fn new(processors: Vec<Box<dyn ContextProcessor>>) -> Self {
        Self { processors }
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.processors.iter().map(|p| p.name()).collect()
    }

    pub fn len(&self) -> usize {
        self.processors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.processors.is_empty()
    }

    /// Run every processor over a copy of `initial`.
    pub fn run(&self, initial: &[Message]) -> Result<PipelineContext, ProcessorError> {
        let mut ctx = PipelineContext::new(initial.to_vec());
        for processor in &self.processors {
            let messages_in = ctx.messages.len();
            ctx = processor.process(ctx)?;
            let messages_out = ctx.messages.len();
            ctx.stats.processors.push(ProcessorStat {
                name: processor.name().to_string(),
                messages_in,
                messages_out,
            });
        }
        tracing::debug!(
            processors = self.processors.len(),
            messages_in = initial.len(),
            messages_out = ctx.messages.len(),
            "Context assembled"
        );
        Ok(ctx)
    }
}
