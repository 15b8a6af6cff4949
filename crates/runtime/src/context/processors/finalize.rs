use crate::context::pipeline::{ContextProcessor, PipelineContext};
use agentloop_core::error::ProcessorError;
use agentloop_core::message::{Message, Role};
use chrono::{DateTime, Utc};

pub(crate) const FORCE_FINISH_ID: &str = "ctx-force-finish";

const FORCE_FINISH_PROMPT: &str = "You have reached the maximum number of steps for this task. \
Do not call any more tools. Summarize what you have done so far and give your final answer.";

/// Asks the model for a final answer on the last permitted step.
#[derive(Default)]
pub struct ForceFinishSummaryInjector;

impl ContextProcessor for ForceFinishSummaryInjector {
    fn name(&self) -> &'static str {
        "force_finish"
    }

    fn process(&self, mut ctx: PipelineContext) -> Result<PipelineContext, ProcessorError> {
        let at = ctx
            .messages
            .last()
            .map(|m| m.created_at)
            .unwrap_or(DateTime::<Utc>::UNIX_EPOCH);
        ctx.messages
            .push(Message::with_id(FORCE_FINISH_ID, Role::User, FORCE_FINISH_PROMPT, at));
        ctx.flag("force_finish_injected", true);
        Ok(ctx)
    }
}

/// Strips fields that only matter inside the runtime.
///
/// Runs last. Applying it to an already cleaned list changes nothing.
#[derive(Default)]
pub struct MessageCleanupProcessor;

impl ContextProcessor for MessageCleanupProcessor {
    fn name(&self) -> &'static str {
        "message_cleanup"
    }

    fn process(&self, mut ctx: PipelineContext) -> Result<PipelineContext, ProcessorError> {
        for message in ctx.messages.iter_mut() {
            message.metadata.clear();
            message.plugin_state = None;
            message.tool_status = None;
            message.error = None;
            message.compressed = false;
            message.children.clear();
            message.parent_id = None;
            message.agent_id = None;
            message.injected_prefix_len = 0;
        }
        Ok(ctx)
    }
}
