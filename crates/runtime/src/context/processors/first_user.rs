//! Injectors anchored on the first user message.
//!
//! Each block is merged into the first user message ahead of the original
//! text. With no user message there is no audience and the list is left
//! exactly as it was.

use super::inject_into_first_user;
use crate::context::config::{GroupContext, GtdPlan, KnowledgeConfig, TodoItem, ToolDiscovery, UserMemory};
use crate::context::pipeline::{ContextProcessor, PipelineContext};
use agentloop_core::error::ProcessorError;

fn inject(mut ctx: PipelineContext, block: Option<String>, flag: &str) -> PipelineContext {
    if let Some(block) = block
        && inject_into_first_user(&mut ctx.messages, &block)
    {
        ctx.flag(flag, true);
    }
    ctx
}

pub struct UserMemoryInjector {
    memory: UserMemory,
}

impl UserMemoryInjector {
    pub fn new(memory: UserMemory) -> Self {
        Self { memory }
    }

    fn block(&self) -> Option<String> {
        let persona = self.memory.persona.as_deref().filter(|p| !p.trim().is_empty());
        if persona.is_none() && self.memory.memories.is_empty() {
            return None;
        }
        let mut block = String::from("<user_memory>\n");
        if let Some(persona) = persona {
            block.push_str(&format!("<persona>{}</persona>\n", persona.trim()));
        }
        for memory in &self.memory.memories {
            block.push_str(&format!("<memory>{memory}</memory>\n"));
        }
        block.push_str("</user_memory>");
        Some(block)
    }
}

impl ContextProcessor for UserMemoryInjector {
    fn name(&self) -> &'static str {
        "user_memory"
    }

    fn process(&self, ctx: PipelineContext) -> Result<PipelineContext, ProcessorError> {
        Ok(inject(ctx, self.block(), "user_memory_injected"))
    }
}

/// Tells a group member who it is and who else is in the room.
pub struct GroupContextInjector {
    group: GroupContext,
}

impl GroupContextInjector {
    pub fn new(group: GroupContext) -> Self {
        Self { group }
    }

    fn block(&self) -> Option<String> {
        if !self.group.is_usable() {
            return None;
        }
        let current = self.group.current_agent_id.as_deref()?;
        let mut block = String::from("<group_context>\n");
        if let Some(title) = &self.group.title {
            block.push_str(&format!("<title>{title}</title>\n"));
        }
        block.push_str(&format!(
            "<you id=\"{current}\">{}</you>\n<members>\n",
            self.group.display_name(current)
        ));
        for (id, profile) in &self.group.agent_map {
            let role = if self.group.is_supervisor(id) { " role=\"supervisor\"" } else { "" };
            match &profile.description {
                Some(desc) => block.push_str(&format!(
                    "<member id=\"{id}\"{role}>{}: {desc}</member>\n",
                    profile.name
                )),
                None => block.push_str(&format!("<member id=\"{id}\"{role}>{}</member>\n", profile.name)),
            }
        }
        block.push_str("</members>\n</group_context>");
        Some(block)
    }
}

impl ContextProcessor for GroupContextInjector {
    fn name(&self) -> &'static str {
        "group_context"
    }

    fn process(&self, ctx: PipelineContext) -> Result<PipelineContext, ProcessorError> {
        Ok(inject(ctx, self.block(), "group_context_injected"))
    }
}

pub struct GtdPlanInjector {
    plan: GtdPlan,
}

impl GtdPlanInjector {
    pub fn new(plan: GtdPlan) -> Self {
        Self { plan }
    }

    fn block(&self) -> Option<String> {
        if self.plan.title.trim().is_empty() && self.plan.steps.is_empty() {
            return None;
        }
        let mut block = format!("<plan title=\"{}\">\n", self.plan.title);
        if let Some(desc) = self.plan.description.as_deref().filter(|d| !d.is_empty()) {
            block.push_str(desc);
            block.push('\n');
        }
        if !self.plan.steps.is_empty() {
            block.push_str("<steps>\n");
            for (i, step) in self.plan.steps.iter().enumerate() {
                block.push_str(&format!("{}. {step}\n", i + 1));
            }
            block.push_str("</steps>\n");
        }
        block.push_str("</plan>");
        Some(block)
    }
}

impl ContextProcessor for GtdPlanInjector {
    fn name(&self) -> &'static str {
        "gtd_plan"
    }

    fn process(&self, ctx: PipelineContext) -> Result<PipelineContext, ProcessorError> {
        Ok(inject(ctx, self.block(), "gtd_plan_injected"))
    }
}

pub struct GtdTodoInjector {
    todos: Vec<TodoItem>,
}

impl GtdTodoInjector {
    pub fn new(todos: Vec<TodoItem>) -> Self {
        Self { todos }
    }

    fn block(&self) -> Option<String> {
        if self.todos.is_empty() {
            return None;
        }
        let lines: Vec<String> = self
            .todos
            .iter()
            .map(|t| format!("- [{}] {}", if t.done { "x" } else { " " }, t.text))
            .collect();
        Some(format!("<todos>\n{}\n</todos>", lines.join("\n")))
    }
}

impl ContextProcessor for GtdTodoInjector {
    fn name(&self) -> &'static str {
        "gtd_todo"
    }

    fn process(&self, ctx: PipelineContext) -> Result<PipelineContext, ProcessorError> {
        Ok(inject(ctx, self.block(), "gtd_todos_injected"))
    }
}

/// Inlines agent files and lists searchable knowledge bases.
pub struct KnowledgeInjector {
    knowledge: KnowledgeConfig,
}

impl KnowledgeInjector {
    pub fn new(knowledge: KnowledgeConfig) -> Self {
        Self { knowledge }
    }

    fn block(&self) -> Option<String> {
        let files: Vec<&String> = self
            .knowledge
            .file_contents
            .iter()
            .filter(|f| !f.trim().is_empty())
            .collect();
        if files.is_empty() && self.knowledge.knowledge_bases.is_empty() {
            return None;
        }
        let mut block = String::from("<knowledge>\n");
        for file in files {
            block.push_str(&format!("<file>\n{}\n</file>\n", file.trim()));
        }
        for kb in &self.knowledge.knowledge_bases {
            match &kb.description {
                Some(desc) => block.push_str(&format!(
                    "<knowledge_base name=\"{}\">{desc}</knowledge_base>\n",
                    kb.name
                )),
                None => block.push_str(&format!("<knowledge_base name=\"{}\" />\n", kb.name)),
            }
        }
        block.push_str("</knowledge>");
        Some(block)
    }
}

impl ContextProcessor for KnowledgeInjector {
    fn name(&self) -> &'static str {
        "knowledge"
    }

    fn process(&self, ctx: PipelineContext) -> Result<PipelineContext, ProcessorError> {
        Ok(inject(ctx, self.block(), "knowledge_injected"))
    }
}

pub struct ToolDiscoveryInjector {
    discovery: ToolDiscovery,
}

impl ToolDiscoveryInjector {
    pub fn new(discovery: ToolDiscovery) -> Self {
        Self { discovery }
    }

    fn block(&self) -> Option<String> {
        if self.discovery.available.is_empty() {
            return None;
        }
        let lines: Vec<String> = self
            .discovery
            .available
            .iter()
            .map(|t| format!("- {}: {}", t.identifier, t.description))
            .collect();
        Some(format!(
            "<available_tools>\nThese tools can be activated on request:\n{}\n</available_tools>",
            lines.join("\n")
        ))
    }
}

impl ContextProcessor for ToolDiscoveryInjector {
    fn name(&self) -> &'static str {
        "tool_discovery"
    }

    fn process(&self, ctx: PipelineContext) -> Result<PipelineContext, ProcessorError> {
        Ok(inject(ctx, self.block(), "tool_discovery_injected"))
    }
}
