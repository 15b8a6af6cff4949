//! History shaping: compression summaries, count limits and token budgets.

use super::append_to_system;
use crate::context::pipeline::{ContextProcessor, PipelineContext};
use crate::context::token::{estimate_message_tokens, estimate_messages_tokens};
use agentloop_core::error::ProcessorError;
use agentloop_core::message::{Message, Role};

/// Replaces compressed history with the latest compression summary.
///
/// Messages flagged `compressed` and every `compressed_group` message leave
/// the list; the newest summary is appended to the system message.
#[derive(Default)]
pub struct CompressedHistoryProcessor;

impl ContextProcessor for CompressedHistoryProcessor {
    fn name(&self) -> &'static str {
        "compressed_history"
    }

    fn process(&self, mut ctx: PipelineContext) -> Result<PipelineContext, ProcessorError> {
        let summary = ctx
            .messages
            .iter()
            .rev()
            .find(|m| m.role == Role::CompressedGroup)
            .map(|m| m.content.clone());

        let (dropped, kept): (Vec<Message>, Vec<Message>) = std::mem::take(&mut ctx.messages)
            .into_iter()
            .partition(|m| m.compressed || m.role == Role::CompressedGroup);
        ctx.messages = kept;

        let summarized = dropped.iter().filter(|m| m.role != Role::CompressedGroup).count();
        ctx.record_drop(
            self.name(),
            summarized,
            estimate_messages_tokens(&dropped),
            "covered by compression summary",
        );

        if let Some(summary) = summary.filter(|s| !s.trim().is_empty()) {
            let block = format!("<compressed_history>\n{}\n</compressed_history>", summary.trim());
            if append_to_system(&mut ctx.messages, &block) {
                ctx.flag("compressed_history_injected", true);
            }
        }
        Ok(ctx)
    }
}

/// Keeps system messages plus the most recent `count` others.
pub struct HistoryTruncateProcessor {
    count: usize,
}

impl HistoryTruncateProcessor {
    pub fn new(count: usize) -> Self {
        Self { count }
    }
}

impl ContextProcessor for HistoryTruncateProcessor {
    fn name(&self) -> &'static str {
        "history_truncate"
    }

    fn process(&self, mut ctx: PipelineContext) -> Result<PipelineContext, ProcessorError> {
        let total = ctx.messages.iter().filter(|m| m.role != Role::System).count();
        if total <= self.count {
            return Ok(ctx);
        }
        let mut skip = total - self.count;
        let mut dropped = Vec::new();
        let mut kept = Vec::with_capacity(ctx.messages.len());
        for message in std::mem::take(&mut ctx.messages) {
            if message.role == Role::System {
                kept.push(message);
            } else if skip > 0 {
                skip -= 1;
                dropped.push(message);
            } else {
                kept.push(message);
            }
        }

        // A window starting on tool results would have lost their call.
        while let Some(pos) = kept.iter().position(|m| m.role != Role::System) {
            if kept[pos].role != Role::Tool {
                break;
            }
            dropped.push(kept.remove(pos));
        }

        ctx.messages = kept;
        ctx.record_drop(
            self.name(),
            dropped.len(),
            estimate_messages_tokens(&dropped),
            format!("history limited to {} messages", self.count),
        );
        Ok(ctx)
    }
}

/// Drops the oldest whole turns until the estimate fits `max_tokens`.
///
/// A turn starts at a user message. System messages and the latest turn are
/// never dropped, so the result may still exceed the budget.
pub struct TokenBudgetTruncator {
    max_tokens: usize,
}

impl TokenBudgetTruncator {
    pub fn new(max_tokens: usize) -> Self {
        Self { max_tokens }
    }
}

impl ContextProcessor for TokenBudgetTruncator {
    fn name(&self) -> &'static str {
        "token_budget"
    }

    fn process(&self, mut ctx: PipelineContext) -> Result<PipelineContext, ProcessorError> {
        let mut total = estimate_messages_tokens(&ctx.messages);
        if total <= self.max_tokens {
            return Ok(ctx);
        }

        let (system, rest): (Vec<Message>, Vec<Message>) = std::mem::take(&mut ctx.messages)
            .into_iter()
            .partition(|m| m.role == Role::System);

        let mut turns: Vec<Vec<Message>> = Vec::new();
        for message in rest {
            match turns.last_mut() {
                Some(turn) if message.role != Role::User => turn.push(message),
                _ => turns.push(vec![message]),
            }
        }

        let mut dropped_items = 0;
        let mut dropped_tokens = 0;
        let mut start = 0;
        while total > self.max_tokens && turns.len() - start > 1 {
            let turn_tokens: usize = turns[start].iter().map(estimate_message_tokens).sum();
            total -= turn_tokens;
            dropped_tokens += turn_tokens;
            dropped_items += turns[start].len();
            start += 1;
        }

        ctx.messages = system;
        ctx.messages.extend(turns.into_iter().skip(start).flatten());
        ctx.record_drop(
            self.name(),
            dropped_items,
            dropped_tokens,
            format!("context over {} token budget", self.max_tokens),
        );
        Ok(ctx)
    }
}
