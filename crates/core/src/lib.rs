//! # agentloop core
//!
//! Domain types, collaborator traits and error definitions for the agentloop
//! run loop. Everything the runtime talks to (model providers, tools, the
//! message store) is a trait here so tests can supply fakes and hosts can
//! supply real implementations.

pub mod agent;
pub mod error;
pub mod event;
pub mod message;
pub mod provider;
pub mod store;
pub mod tool;

// Re-export key types at crate root for ergonomics
pub use agent::{AgentState, AgentStatus, CompletionReason, Cost, PendingHuman, Usage};
pub use error::{Error, Result};
pub use event::{DomainEvent, EventBus};
pub use message::{Message, MessagePatch, MessageToolCall, Role, ToolCallStatus};
pub use provider::{
    FinishReason, Provider, ProviderRequest, ProviderResponse, StreamChunk, TokenUsage,
    ToolDefinition,
};
pub use store::{ConversationKey, InMemoryMessageStore, MessageStore};
pub use tool::{
    HumanIntervention, Tool, ToolExecutor, ToolInvocation, ToolManifest, ToolOutcome, ToolOutput,
    ToolRegistry,
};
