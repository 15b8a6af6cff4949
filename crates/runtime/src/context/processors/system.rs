//! Injectors that write into the system message.

use super::{SYNTHETIC_SYSTEM_ID, anchor_time, append_to_system};
use crate::context::config::{
    AgentBuilderContext, EvalContext, PageEditorContext, Skill, SystemDate,
};
use crate::context::pipeline::{ContextProcessor, PipelineContext};
use agentloop_core::error::ProcessorError;
use agentloop_core::message::{Message, Role};
use agentloop_core::tool::ToolManifest;
use chrono::Utc;

/// Places the agent's base prompt at the very top of the system message.
pub struct SystemRoleInjector {
    system_role: Option<String>,
}

impl SystemRoleInjector {
    pub fn new(system_role: Option<String>) -> Self {
        Self { system_role }
    }
}

impl ContextProcessor for SystemRoleInjector {
    fn name(&self) -> &'static str {
        "system_role"
    }

    fn process(&self, mut ctx: PipelineContext) -> Result<PipelineContext, ProcessorError> {
        let Some(role) = self.system_role.as_deref().filter(|r| !r.trim().is_empty()) else {
            return Ok(ctx);
        };
        if ctx.messages.is_empty() {
            return Ok(ctx);
        }
        match ctx.messages.first_mut() {
            Some(first) if first.role == Role::System => {
                if first.content.is_empty() {
                    first.content = role.to_string();
                } else {
                    first.content = format!("{role}\n\n{}", first.content);
                }
            }
            _ => {
                let at = anchor_time(&ctx.messages);
                ctx.messages
                    .insert(0, Message::with_id(SYNTHETIC_SYSTEM_ID, Role::System, role, at));
            }
        }
        ctx.flag("system_role_injected", true);
        Ok(ctx)
    }
}

pub struct EvalContextInjector {
    eval: Option<EvalContext>,
}

impl EvalContextInjector {
    pub fn new(eval: Option<EvalContext>) -> Self {
        Self { eval }
    }
}

impl ContextProcessor for EvalContextInjector {
    fn name(&self) -> &'static str {
        "eval_context"
    }

    fn process(&self, mut ctx: PipelineContext) -> Result<PipelineContext, ProcessorError> {
        let Some(eval) = &self.eval else {
            return Ok(ctx);
        };
        let block = format!("<eval_context>\n{}\n</eval_context>", eval.env_prompt.trim());
        if !eval.env_prompt.trim().is_empty() && append_to_system(&mut ctx.messages, &block) {
            ctx.flag("eval_context_injected", true);
        }
        Ok(ctx)
    }
}

/// The only processor allowed to read the clock, and only in
/// [`SystemDate::Now`] mode.
pub struct SystemDateInjector {
    date: SystemDate,
}

impl SystemDateInjector {
    pub fn new(date: SystemDate) -> Self {
        Self { date }
    }
}

impl ContextProcessor for SystemDateInjector {
    fn name(&self) -> &'static str {
        "system_date"
    }

    fn process(&self, mut ctx: PipelineContext) -> Result<PipelineContext, ProcessorError> {
        let date = match self.date {
            SystemDate::Disabled => return Ok(ctx),
            SystemDate::Now => Utc::now(),
            SystemDate::Fixed(at) => at,
        };
        let line = format!("Current date: {}", date.format("%Y-%m-%d"));
        if append_to_system(&mut ctx.messages, &line) {
            ctx.flag("system_date_injected", true);
        }
        Ok(ctx)
    }
}

/// Adds the usage instructions of enabled tools.
pub struct ToolSystemRoleInjector {
    manifests: Vec<ToolManifest>,
}

impl ToolSystemRoleInjector {
    pub fn new(manifests: Vec<ToolManifest>) -> Self {
        Self { manifests }
    }
}

impl ContextProcessor for ToolSystemRoleInjector {
    fn name(&self) -> &'static str {
        "tool_system_role"
    }

    fn process(&self, mut ctx: PipelineContext) -> Result<PipelineContext, ProcessorError> {
        let entries: Vec<String> = self
            .manifests
            .iter()
            .filter_map(|m| {
                let role = m.system_role.as_deref()?.trim();
                (!role.is_empty())
                    .then(|| format!("<plugin identifier=\"{}\">\n{role}\n</plugin>", m.identifier))
            })
            .collect();
        if entries.is_empty() {
            return Ok(ctx);
        }
        let block = format!("<plugins>\n{}\n</plugins>", entries.join("\n"));
        if append_to_system(&mut ctx.messages, &block) {
            ctx.flag("tool_system_role_injected", entries.len());
        }
        Ok(ctx)
    }
}

pub struct SkillContextInjector {
    skills: Vec<Skill>,
}

impl SkillContextInjector {
    pub fn new(skills: Vec<Skill>) -> Self {
        Self { skills }
    }
}

impl ContextProcessor for SkillContextInjector {
    fn name(&self) -> &'static str {
        "skill_context"
    }

    fn process(&self, mut ctx: PipelineContext) -> Result<PipelineContext, ProcessorError> {
        if self.skills.is_empty() {
            return Ok(ctx);
        }
        let body: Vec<String> = self
            .skills
            .iter()
            .map(|s| format!("<skill name=\"{}\">\n{}\n</skill>", s.name, s.content.trim()))
            .collect();
        let block = format!("<skills>\n{}\n</skills>", body.join("\n"));
        if append_to_system(&mut ctx.messages, &block) {
            ctx.flag("skills_injected", self.skills.len());
        }
        Ok(ctx)
    }
}

pub struct HistorySummaryInjector {
    summary: String,
}

impl HistorySummaryInjector {
    pub fn new(summary: impl Into<String>) -> Self {
        Self {
            summary: summary.into(),
        }
    }
}

impl ContextProcessor for HistorySummaryInjector {
    fn name(&self) -> &'static str {
        "history_summary"
    }

    fn process(&self, mut ctx: PipelineContext) -> Result<PipelineContext, ProcessorError> {
        let summary = self.summary.trim();
        if summary.is_empty() {
            return Ok(ctx);
        }
        let block = format!("<chat_history_summary>\n{summary}\n</chat_history_summary>");
        if append_to_system(&mut ctx.messages, &block) {
            ctx.flag("history_summary_injected", true);
        }
        Ok(ctx)
    }
}

pub struct AgentBuilderContextInjector {
    context: AgentBuilderContext,
}

impl AgentBuilderContextInjector {
    pub fn new(context: AgentBuilderContext) -> Self {
        Self { context }
    }
}

impl ContextProcessor for AgentBuilderContextInjector {
    fn name(&self) -> &'static str {
        "agent_builder_context"
    }

    fn process(&self, mut ctx: PipelineContext) -> Result<PipelineContext, ProcessorError> {
        let mut block = String::from("<agent_builder>\n");
        if !self.context.agent_config.is_null() {
            let config = serde_json::to_string_pretty(&self.context.agent_config)
                .unwrap_or_else(|_| self.context.agent_config.to_string());
            block.push_str(&format!("<current_config>\n{config}\n</current_config>\n"));
        }
        if let Some(instructions) = self.context.instructions.as_deref().filter(|s| !s.trim().is_empty()) {
            block.push_str(&format!("<instructions>\n{}\n</instructions>\n", instructions.trim()));
        }
        if block.len() == "<agent_builder>\n".len() {
            return Ok(ctx);
        }
        block.push_str("</agent_builder>");
        if append_to_system(&mut ctx.messages, &block) {
            ctx.flag("agent_builder_injected", true);
        }
        Ok(ctx)
    }
}

pub struct PageEditorContextInjector {
    page: PageEditorContext,
}

impl PageEditorContextInjector {
    pub fn new(page: PageEditorContext) -> Self {
        Self { page }
    }
}

impl ContextProcessor for PageEditorContextInjector {
    fn name(&self) -> &'static str {
        "page_editor_context"
    }

    fn process(&self, mut ctx: PipelineContext) -> Result<PipelineContext, ProcessorError> {
        if self.page.title.is_empty() && self.page.content.is_empty() {
            return Ok(ctx);
        }
        let mut block = format!(
            "<current_page title=\"{}\">\n{}\n</current_page>",
            self.page.title, self.page.content
        );
        if let Some(selection) = self.page.selection.as_deref().filter(|s| !s.is_empty()) {
            block.push_str(&format!("\n<selection>\n{selection}\n</selection>"));
        }
        if append_to_system(&mut ctx.messages, &block) {
            ctx.flag("page_editor_injected", true);
        }
        Ok(ctx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn run(p: &dyn ContextProcessor, messages: Vec<Message>) -> PipelineContext {
        p.process(PipelineContext::new(messages)).unwrap()
    }

    #[test]
    fn system_role_goes_before_existing_system_text() {
        let out = run(
            &SystemRoleInjector::new(Some("You are helpful".into())),
            vec![Message::system("Be brief"), Message::user("hi")],
        );
        assert_eq!(out.messages[0].content, "You are helpful\n\nBe brief");
        assert!(out.is_flagged("system_role_injected"));
    }

    #[test]
    fn blank_system_role_is_noop() {
        let input = vec![Message::user("hi")];
        let out = run(&SystemRoleInjector::new(Some("  ".into())), input.clone());
        assert_eq!(out.messages, input);
    }

    #[test]
    fn fixed_date_is_rendered() {
        let at = Utc.with_ymd_and_hms(2025, 3, 14, 9, 0, 0).unwrap();
        let out = run(&SystemDateInjector::new(SystemDate::Fixed(at)), vec![Message::user("hi")]);
        assert_eq!(out.messages[0].role, Role::System);
        assert_eq!(out.messages[0].content, "Current date: 2025-03-14");
    }

    #[test]
    fn disabled_date_is_noop() {
        let input = vec![Message::user("hi")];
        let out = run(&SystemDateInjector::new(SystemDate::Disabled), input.clone());
        assert_eq!(out.messages, input);
    }

    #[test]
    fn only_tools_with_instructions_are_listed() {
        let manifests = vec![
            ToolManifest::new("search", "Search").with_system_role("Cite your sources."),
            ToolManifest::new("clock", "Time"),
        ];
        let out = run(
            &ToolSystemRoleInjector::new(manifests),
            vec![Message::system("sys"), Message::user("hi")],
        );
        let system = &out.messages[0].content;
        assert!(system.contains("<plugin identifier=\"search\">\nCite your sources."));
        assert!(!system.contains("clock"));
    }

    #[test]
    fn page_editor_includes_selection() {
        let page = PageEditorContext {
            title: "Draft".into(),
            content: "Body".into(),
            selection: Some("Bo".into()),
        };
        let out = run(&PageEditorContextInjector::new(page), vec![Message::user("edit")]);
        assert!(out.messages[0].content.contains("<current_page title=\"Draft\">"));
        assert!(out.messages[0].content.contains("<selection>\nBo\n</selection>"));
    }

    #[test]
    fn empty_agent_builder_context_is_noop() {
        let input = vec![Message::user("hi")];
        let out = run(
            &AgentBuilderContextInjector::new(AgentBuilderContext::default()),
            input.clone(),
        );
        assert_eq!(out.messages, input);
    }
}
