//! # agentloop runtime
//!
//! A step-driven agent loop. Each step the runtime plans one instruction
//! from the phase left by the previous step, executes it and persists what
//! it produced:
//!
//! 1. **Assemble** the model context from the persisted conversation
//! 2. **Call the model** and stream its reply
//! 3. **Run tools**, or park the run for a human decision
//! 4. **Delegate** tasks to sub-agents, **compress** long histories
//! 5. **Finish** when the model stops calling tools, the step limit is hit
//!    or the run is cancelled
//!
//! [`AgentRunner`] drives the loop; [`OperationRegistry`] tracks every run
//! and its cancellation signal.

pub mod config;
pub mod context;
pub mod operation;
pub mod runner;
pub mod runtime;
pub mod stream_event;
pub mod task;

#[cfg(test)]
mod test_helpers;

pub use config::{CompressionSettings, RunConfig};
pub use context::{ContextPipeline, ContextProcessor, PipelineAssembler, PipelineConfig, PipelineContext};
pub use operation::{
    AfterCompletionHook, FINISHED_RETENTION, OperationContext, OperationRegistry, OperationScope,
    OperationSnapshot, OperationStatus,
};
pub use runner::{AgentRunner, HumanDecision, Rejection, RunObserver, RunOutcome, RunRequest};
pub use runtime::{AgentInstruction, AgentRuntime, AgentRuntimeContext, Phase, StepEnv, StepOutput};
pub use stream_event::AgentEvent;
pub use task::{SubAgentTaskRunner, TaskOutcome, TaskRequest, TaskRunner, TaskStatus};
