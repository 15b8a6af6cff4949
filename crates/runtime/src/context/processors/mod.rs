//! The individual pipeline stages.
//!
//! Two shapes recur. *Injectors* add a block of text to an anchor message
//! (the system message, or the first user message) and do nothing when the
//! anchor is missing. *Transformers* rewrite roles or splice messages.

mod content;
mod finalize;
mod first_user;
mod flatten;
mod group;
mod history;
mod system;
mod template;
mod tools;

pub use content::MessageContentProcessor;
pub use finalize::{ForceFinishSummaryInjector, MessageCleanupProcessor};
pub use first_user::{
    GroupContextInjector, GtdPlanInjector, GtdTodoInjector, KnowledgeInjector,
    ToolDiscoveryInjector, UserMemoryInjector,
};
pub use flatten::{AssistantGroupFlattenProcessor, SupervisorRoleRestoreProcessor, TasksFlattenProcessor};
pub use group::{GroupOrchestrationFilterProcessor, GroupRoleTransformProcessor};
pub use history::{CompressedHistoryProcessor, HistoryTruncateProcessor, TokenBudgetTruncator};
pub use system::{
    AgentBuilderContextInjector, EvalContextInjector, HistorySummaryInjector,
    PageEditorContextInjector, SkillContextInjector, SystemDateInjector, SystemRoleInjector,
    ToolSystemRoleInjector,
};
pub use template::{InputTemplateProcessor, PlaceholderVariablesProcessor};
pub use tools::{ToolCallProcessor, ToolMessageReorder, provider_tool_name};

use agentloop_core::message::{Message, Role};
use chrono::{DateTime, Utc};

/// Id of the system message the pipeline creates when none exists.
pub(crate) const SYNTHETIC_SYSTEM_ID: &str = "ctx-system";

fn anchor_time(messages: &[Message]) -> DateTime<Utc> {
    messages
        .first()
        .map(|m| m.created_at)
        .unwrap_or(DateTime::<Utc>::UNIX_EPOCH)
}

/// Append `block` to the leading system message, creating it if needed.
///
/// Returns `false` (and leaves the list alone) when the list is empty or
/// the block is blank.
pub(crate) fn append_to_system(messages: &mut Vec<Message>, block: &str) -> bool {
    if messages.is_empty() || block.trim().is_empty() {
        return false;
    }
    match messages.first_mut() {
        Some(first) if first.role == Role::System => {
            if first.content.is_empty() {
                first.content = block.to_string();
            } else {
                first.content.push_str("\n\n");
                first.content.push_str(block);
            }
        }
        _ => {
            let at = anchor_time(messages);
            messages.insert(0, Message::with_id(SYNTHETIC_SYSTEM_ID, Role::System, block, at));
        }
    }
    true
}

/// Merge `block` into the first user message, after any blocks merged by
/// earlier injectors and ahead of the original text.
///
/// Returns `false` when there is no user message.
pub(crate) fn inject_into_first_user(messages: &mut [Message], block: &str) -> bool {
    if block.trim().is_empty() {
        return false;
    }
    let Some(first_user) = messages.iter_mut().find(|m| m.role == Role::User) else {
        return false;
    };
    let insert = format!("{block}\n\n");
    let at = first_user.injected_prefix_len.min(first_user.content.len());
    let at = if first_user.content.is_char_boundary(at) { at } else { 0 };
    first_user.content.insert_str(at, &insert);
    first_user.injected_prefix_len = at + insert.len();
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn system_block_creates_message_with_stable_id() {
        let mut messages = vec![Message::user("hi")];
        assert!(append_to_system(&mut messages, "rules"));
        assert_eq!(messages[0].id, SYNTHETIC_SYSTEM_ID);
        assert_eq!(messages[0].created_at, messages[1].created_at);

        append_to_system(&mut messages, "more rules");
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].content, "rules\n\nmore rules");
    }

    #[test]
    fn system_block_on_empty_list_is_noop() {
        let mut messages = Vec::new();
        assert!(!append_to_system(&mut messages, "rules"));
        assert!(messages.is_empty());
    }

    #[test]
    fn first_user_blocks_keep_injection_order() {
        let mut messages = vec![Message::system("sys"), Message::user("hi"), Message::user("later")];
        inject_into_first_user(&mut messages, "<a>");
        inject_into_first_user(&mut messages, "<b>");
        assert_eq!(messages[1].content, "<a>\n\n<b>\n\nhi");
        assert_eq!(messages[2].content, "later");
    }

    #[test]
    fn first_user_without_user_is_noop() {
        let mut messages = vec![Message::system("sys")];
        assert!(!inject_into_first_user(&mut messages, "<a>"));
        assert_eq!(messages[0].content, "sys");
    }
}
