//! Context assembly — turns the persisted conversation into the message
//! list sent to the model on every `call_llm` step.

pub mod assembler;
pub mod config;
pub mod pipeline;
pub mod processors;
pub mod token;

pub use assembler::PipelineAssembler;
pub use config::PipelineConfig;
pub use pipeline::{ContextPipeline, ContextProcessor, DropInfo, PipelineContext, PipelineStats};
