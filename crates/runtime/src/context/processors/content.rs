use crate::context::pipeline::{ContextProcessor, PipelineContext};
use crate::context::token::estimate_messages_tokens;
use agentloop_core::error::ProcessorError;
use agentloop_core::message::{AttachmentKind, Message, Role};

/// Renders attachments as text the model can read and drops assistant
/// turns that only carry an error.
///
/// Images survive as attachments when the model has vision; otherwise they
/// become a `[image: name]` marker.
pub struct MessageContentProcessor {
    vision_supported: bool,
}

impl MessageContentProcessor {
    pub fn new(vision_supported: bool) -> Self {
        Self { vision_supported }
    }

    fn render_attachments(&self, message: &mut Message) {
        let mut kept = Vec::new();
        for attachment in std::mem::take(&mut message.attachments) {
            let rendered = match attachment.kind {
                AttachmentKind::Image if self.vision_supported => {
                    kept.push(attachment);
                    continue;
                }
                AttachmentKind::Image => format!("[image: {}]", attachment.name),
                AttachmentKind::File => match attachment.text.as_deref() {
                    Some(text) => format!("<file name=\"{}\">\n{text}\n</file>", attachment.name),
                    None => format!("[file: {}]", attachment.name),
                },
            };
            if !message.content.is_empty() {
                message.content.push_str("\n\n");
            }
            message.content.push_str(&rendered);
        }
        message.attachments = kept;
    }
}

fn is_error_only(message: &Message) -> bool {
    message.role == Role::Assistant
        && message.error.is_some()
        && message.content.trim().is_empty()
        && message.tool_calls.is_empty()
}

impl ContextProcessor for MessageContentProcessor {
    fn name(&self) -> &'static str {
        "message_content"
    }

    fn process(&self, mut ctx: PipelineContext) -> Result<PipelineContext, ProcessorError> {
        let (dropped, mut kept): (Vec<Message>, Vec<Message>) = std::mem::take(&mut ctx.messages)
            .into_iter()
            .partition(is_error_only);
        for message in kept.iter_mut().filter(|m| !m.attachments.is_empty()) {
            self.render_attachments(message);
        }
        ctx.messages = kept;
        ctx.record_drop(
            self.name(),
            dropped.len(),
            estimate_messages_tokens(&dropped),
            "assistant turn with only an error",
        );
        Ok(ctx)
    }
}
