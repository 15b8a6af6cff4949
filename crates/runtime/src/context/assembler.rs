//! Pipeline assembly: which processors run, and in what order.
//!
//! # Ordering
//!
//! The order below is fixed. Later stages assume earlier ones ran:
//!
//! 1. System-message injectors, then history shaping. The token budget is
//!    applied while shaping history, so first-user injections land on a
//!    message that survives and the force-finish prompt is never what the
//!    budget keeps in place of the live turn.
//! 2. Every first-user-message injector runs before any shape transformer,
//!    because transformers may move or delete the original first user
//!    message.
//! 3. Group orchestration filtering runs before the group role transform,
//!    which erases the agent attribution the filter reads.
//! 4. Tool call formatting runs after all role and content transforms and
//!    before tool result reordering.
//! 5. Cleanup is always last.

use super::config::PipelineConfig;
use super::pipeline::{ContextPipeline, ContextProcessor, PipelineContext};
use super::processors::*;
use agentloop_core::error::ProcessorError;
use agentloop_core::message::Message;

/// Builds a [`ContextPipeline`] from a [`PipelineConfig`].
pub struct PipelineAssembler;

impl PipelineAssembler {
    pub fn build(config: &PipelineConfig) -> ContextPipeline {
        let mut stages: Vec<Box<dyn ContextProcessor>> = Vec::new();

        // ── Mandatory ──
        stages.push(Box::new(SystemRoleInjector::new(config.system_role.clone())));
        stages.push(Box::new(EvalContextInjector::new(config.eval_context.clone())));
        stages.push(Box::new(SystemDateInjector::new(config.system_date)));

        // ── System message ──
        if let Some(tools) = &config.tools_config {
            stages.push(Box::new(ToolSystemRoleInjector::new(tools.manifests.clone())));
        }
        if let Some(skills) = &config.skills_config {
            stages.push(Box::new(SkillContextInjector::new(skills.skills.clone())));
        }
        if let Some(summary) = &config.history_summary {
            stages.push(Box::new(HistorySummaryInjector::new(summary.clone())));
        }
        if let Some(builder) = &config.agent_builder_context {
            stages.push(Box::new(AgentBuilderContextInjector::new(builder.clone())));
        }
        if let Some(page) = &config.page_editor_context {
            stages.push(Box::new(PageEditorContextInjector::new(page.clone())));
        }

        // ── History ──
        stages.push(Box::new(CompressedHistoryProcessor));
        if let Some(count) = config.history_count {
            stages.push(Box::new(HistoryTruncateProcessor::new(count)));
        }
        if let Some(max_tokens) = config.max_context_tokens {
            stages.push(Box::new(TokenBudgetTruncator::new(max_tokens)));
        }
        if let Some(template) = &config.input_template {
            stages.push(Box::new(InputTemplateProcessor::new(template.clone())));
        }
        if !config.variables.is_empty() {
            stages.push(Box::new(PlaceholderVariablesProcessor::new(config.variables.clone())));
        }

        // ── First user message ──
        if let Some(memory) = &config.user_memory {
            stages.push(Box::new(UserMemoryInjector::new(memory.clone())));
        }
        let group = config.group_context.as_ref().filter(|g| g.enabled);
        if let Some(group) = group {
            stages.push(Box::new(GroupContextInjector::new(group.clone())));
        }
        if let Some(plan) = &config.gtd_plan {
            stages.push(Box::new(GtdPlanInjector::new(plan.clone())));
        }
        if let Some(todos) = config.gtd_todos.as_ref().filter(|t| !t.is_empty()) {
            stages.push(Box::new(GtdTodoInjector::new(todos.clone())));
        }
        if let Some(knowledge) = &config.knowledge {
            stages.push(Box::new(KnowledgeInjector::new(knowledge.clone())));
        }
        if let Some(discovery) = &config.tool_discovery {
            stages.push(Box::new(ToolDiscoveryInjector::new(discovery.clone())));
        }

        // ── Shape ──
        stages.push(Box::new(AssistantGroupFlattenProcessor));
        stages.push(Box::new(TasksFlattenProcessor));
        stages.push(Box::new(SupervisorRoleRestoreProcessor));
        if let Some(group) = group {
            stages.push(Box::new(GroupOrchestrationFilterProcessor::new(group.clone())));
            stages.push(Box::new(GroupRoleTransformProcessor::new(group.clone())));
        }

        // ── Provider format ──
        stages.push(Box::new(MessageContentProcessor::new(config.vision_supported)));
        stages.push(Box::new(ToolCallProcessor::new(config.function_calling())));
        stages.push(Box::new(ToolMessageReorder));
        if config.force_finish {
            stages.push(Box::new(ForceFinishSummaryInjector));
        }
        stages.push(Box::new(MessageCleanupProcessor));

        ContextPipeline::new(stages)
    }

    /// Build the pipeline for `config` and run it over `messages`.
    pub fn assemble(
        config: &PipelineConfig,
        messages: &[Message],
    ) -> Result<PipelineContext, ProcessorError> {
        Self::build(config).run(messages)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::config::*;
    use agentloop_core::message::{MessageToolCall, Role};
    use agentloop_core::tool::ToolManifest;
    use std::collections::BTreeMap;

    fn full_config() -> PipelineConfig {
        PipelineConfig {
            model: "gpt-4o".into(),
            provider: "openai".into(),
            system_role: Some("You are helpful".into()),
            eval_context: Some(EvalContext {
                env_prompt: "sandbox".into(),
            }),
            history_summary: Some("Earlier we discussed Rust.".into()),
            history_count: Some(20),
            input_template: Some("{{text}}".into()),
            variables: BTreeMap::from([("name".to_string(), "Ada".to_string())]),
            user_memory: Some(UserMemory {
                persona: Some("Engineer".into()),
                memories: vec!["Likes tea".into()],
            }),
            gtd_plan: Some(GtdPlan {
                title: "Release".into(),
                description: None,
                steps: vec!["Tag".into()],
            }),
            gtd_todos: Some(vec![TodoItem {
                text: "Changelog".into(),
                done: true,
            }]),
            knowledge: Some(KnowledgeConfig::files(["doc text"])),
            skills_config: Some(SkillsConfig {
                skills: vec![Skill {
                    name: "review".into(),
                    content: "Be thorough".into(),
                }],
            }),
            tools_config: Some(ToolsConfig {
                manifests: vec![ToolManifest::new("search", "Search").with_system_role("Cite.")],
                function_call_supported: true,
            }),
            max_context_tokens: Some(100_000),
            ..PipelineConfig::default()
        }
    }

    fn conversation() -> Vec<Message> {
        vec![
            Message::user("Hello {{name}}"),
            Message::assistant("").with_tool_calls(vec![MessageToolCall::new("c1", "search", "{}")]),
            Message::user("unrelated"),
            Message::tool_result("c1", "search", "hits"),
        ]
    }

    #[test]
    fn scenario_system_role_and_knowledge() {
        let config = PipelineConfig {
            system_role: Some("You are helpful".into()),
            knowledge: Some(KnowledgeConfig::files(["doc text"])),
            ..PipelineConfig::default()
        };
        let out = PipelineAssembler::assemble(&config, &[Message::user("hi")]).unwrap();

        assert_eq!(out.messages.len(), 2);
        assert_eq!(out.messages[0].role, Role::System);
        assert!(out.messages[0].content.contains("You are helpful"));
        assert_eq!(out.messages[1].role, Role::User);
        let user = &out.messages[1].content;
        assert!(user.contains("doc text"));
        assert!(user.ends_with("hi"));
        assert!(user.find("doc text") < user.find("hi"));
        assert!(out.is_flagged("knowledge_injected"));
    }

    #[test]
    fn assembly_is_deterministic() {
        let config = full_config();
        let input = conversation();
        let first = PipelineAssembler::assemble(&config, &input).unwrap();
        let second = PipelineAssembler::assemble(&config, &input).unwrap();
        assert_eq!(
            serde_json::to_string(&first.messages).unwrap(),
            serde_json::to_string(&second.messages).unwrap()
        );
        assert_eq!(first.metadata, second.metadata);
    }

    #[test]
    fn minimal_config_has_only_fixed_stages() {
        let names = PipelineAssembler::build(&PipelineConfig::default()).names();
        assert_eq!(
            names,
            vec![
                "system_role",
                "eval_context",
                "system_date",
                "compressed_history",
                "assistant_group_flatten",
                "tasks_flatten",
                "supervisor_role_restore",
                "message_content",
                "tool_call",
                "tool_message_reorder",
                "message_cleanup",
            ]
        );
    }

    #[test]
    fn injectors_run_before_transformers_and_cleanup_is_last() {
        let mut config = full_config();
        config.force_finish = true;
        config.group_context = Some(GroupContext {
            enabled: true,
            ..GroupContext::default()
        });
        let names = PipelineAssembler::build(&config).names();
        let pos = |n: &str| names.iter().position(|x| *x == n).unwrap();

        for injector in ["user_memory", "group_context", "gtd_plan", "gtd_todo", "knowledge"] {
            assert!(pos(injector) < pos("assistant_group_flatten"), "{injector}");
        }
        assert!(pos("group_orchestration_filter") < pos("group_role_transform"));
        assert!(pos("group_role_transform") < pos("tool_call"));
        assert!(pos("tool_call") < pos("tool_message_reorder"));
        assert_eq!(names.last(), Some(&"message_cleanup"));
    }

    #[test]
    fn full_pipeline_keeps_tool_results_next_to_calls() {
        let out = PipelineAssembler::assemble(&full_config(), &conversation()).unwrap();
        let roles: Vec<Role> = out.messages.iter().map(|m| m.role).collect();
        assert_eq!(
            roles,
            vec![Role::System, Role::User, Role::Assistant, Role::Tool, Role::User]
        );
        assert!(out.messages[1].content.ends_with("Hello Ada"));
        assert!(out.messages[0].content.starts_with("You are helpful"));
        assert!(out.messages.iter().all(|m| m.metadata.is_empty()));
    }

    #[test]
    fn group_without_agent_map_degrades_to_noop() {
        let mut config = PipelineConfig::new("gpt-4o");
        config.group_context = Some(GroupContext {
            enabled: true,
            current_agent_id: Some("writer".into()),
            ..GroupContext::default()
        });
        let input = vec![Message::user("hi"), Message::assistant("hey").with_agent("other")];
        let out = PipelineAssembler::assemble(&config, &input).unwrap();
        assert_eq!(out.messages.len(), 2);
        assert_eq!(out.messages[1].role, Role::Assistant);
        assert_eq!(out.messages[0].content, "hi");
    }

    #[test]
    fn force_finish_prompt_is_the_last_message() {
        let mut config = PipelineConfig::new("gpt-4o");
        config.force_finish = true;
        let out = PipelineAssembler::assemble(&config, &[Message::user("hi")]).unwrap();
        assert_eq!(out.messages.last().map(|m| m.role), Some(Role::User));
        assert!(out.messages[1].content.contains("Do not call any more tools"));
    }

    #[test]
    fn knowledge_lands_on_the_turn_the_budget_keeps() {
        let config = PipelineConfig {
            system_role: Some("You are helpful".into()),
            knowledge: Some(KnowledgeConfig::files(["doc text"])),
            max_context_tokens: Some(200),
            ..PipelineConfig::default()
        };
        let input = vec![
            Message::user("first question"),
            Message::assistant("x".repeat(2000)),
            Message::user("follow up"),
        ];

        let out = PipelineAssembler::assemble(&config, &input).unwrap();

        assert_eq!(out.messages.len(), 2);
        let user = &out.messages[1].content;
        assert!(user.contains("doc text"));
        assert!(user.ends_with("follow up"));
        assert!(out.is_flagged("knowledge_injected"));
        assert!(out.stats.drops.iter().any(|d| d.items_dropped == 2));
    }

    #[test]
    fn force_finish_over_budget_keeps_the_live_turn() {
        let mut config = PipelineConfig::new("gpt-4o");
        config.force_finish = true;
        config.max_context_tokens = Some(200);
        let input = vec![
            Message::user("weather in Oslo?"),
            Message::assistant("").with_tool_calls(vec![MessageToolCall::new("c1", "weather", "{}")]),
            Message::tool_result("c1", "weather", "y".repeat(2000)),
        ];

        let out = PipelineAssembler::assemble(&config, &input).unwrap();

        let roles: Vec<Role> = out.messages.iter().map(|m| m.role).collect();
        assert_eq!(
            roles,
            vec![Role::User, Role::Assistant, Role::Tool, Role::User]
        );
        assert_eq!(out.messages[0].content, "weather in Oslo?");
        assert!(out.messages[3].content.contains("Do not call any more tools"));
    }

    #[test]
    fn budget_runs_before_first_user_injectors() {
        let mut config = full_config();
        config.force_finish = true;
        let names = PipelineAssembler::build(&config).names();
        let pos = |n: &str| names.iter().position(|x| *x == n).unwrap();
        assert!(pos("history_truncate") < pos("token_budget"));
        assert!(pos("token_budget") < pos("user_memory"));
        assert!(pos("token_budget") < pos("force_finish"));
    }
}
