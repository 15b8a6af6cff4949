//! Text templating over user and system messages.

use crate::context::pipeline::{ContextProcessor, PipelineContext};
use agentloop_core::error::ProcessorError;
use agentloop_core::message::Role;
use std::collections::BTreeMap;

const TEXT_PLACEHOLDER: &str = "{{text}}";

/// Wraps every user message in the agent's input template.
pub struct InputTemplateProcessor {
    template: String,
}

impl InputTemplateProcessor {
    pub fn new(template: impl Into<String>) -> Self {
        Self {
            template: template.into(),
        }
    }
}

impl ContextProcessor for InputTemplateProcessor {
    fn name(&self) -> &'static str {
        "input_template"
    }

    fn process(&self, mut ctx: PipelineContext) -> Result<PipelineContext, ProcessorError> {
        if !self.template.contains(TEXT_PLACEHOLDER) {
            return Ok(ctx);
        }
        let mut applied = 0usize;
        for message in ctx.messages.iter_mut().filter(|m| m.role == Role::User) {
            message.content = self.template.replace(TEXT_PLACEHOLDER, &message.content);
            applied += 1;
        }
        if applied > 0 {
            ctx.flag("input_template_applied", applied);
        }
        Ok(ctx)
    }
}

/// Substitutes `{{name}}` placeholders with known variable values.
///
/// Unknown placeholders are left untouched.
pub struct PlaceholderVariablesProcessor {
    variables: BTreeMap<String, String>,
}

impl PlaceholderVariablesProcessor {
    pub fn new(variables: BTreeMap<String, String>) -> Self {
        Self { variables }
    }
}

impl ContextProcessor for PlaceholderVariablesProcessor {
    fn name(&self) -> &'static str {
        "placeholder_variables"
    }

    fn process(&self, mut ctx: PipelineContext) -> Result<PipelineContext, ProcessorError> {
        if self.variables.is_empty() {
            return Ok(ctx);
        }
        let mut replaced = 0usize;
        for message in ctx
            .messages
            .iter_mut()
            .filter(|m| matches!(m.role, Role::User | Role::System))
        {
            for (name, value) in &self.variables {
                let placeholder = format!("{{{{{name}}}}}");
                if message.content.contains(&placeholder) {
                    message.content = message.content.replace(&placeholder, value);
                    replaced += 1;
                }
            }
        }
        if replaced > 0 {
            ctx.flag("placeholders_replaced", replaced);
        }
        Ok(ctx)
    }
}
