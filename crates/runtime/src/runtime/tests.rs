use super::*;
use crate::context::config::{AgentProfile, GroupContext, ToolDiscovery, ToolSummary};
use crate::operation::OperationScope;
use crate::test_helpers::{
    EchoTool, Harness, ScriptedProvider, harness, harness_with, key, make_text_response,
    make_tool_call, seed,
};
use agentloop_core::message::{Message, MessageToolCall, Role};
use agentloop_core::store::MessageStore;
use agentloop_core::tool::ToolOutput;
use serde_json::json;

async fn push_assistant(h: &Harness, calls: Vec<MessageToolCall>) -> Vec<Message> {
    h.store
        .create(&key(), Message::assistant("").with_tool_calls(calls))
        .await
        .unwrap();
    h.store.query(&key()).await.unwrap()
}

#[tokio::test]
async fn sequential_tool_steps_each_append_one_message() {
    let h = harness(ScriptedProvider::default(), vec![EchoTool::named("echo")]);
    let mut state = seed(&h, &["two lookups"]).await;
    let first = make_tool_call("c1", "echo", json!({"text": "one"}));
    let second = make_tool_call("c2", "echo", json!({"text": "two"}));
    state.messages = push_assistant(&h, vec![first.clone(), second.clone()]).await;
    let initial = state.messages.len();

    let ctx = AgentRuntimeContext::new(
        Phase::HumanApprovedTool {
            approved: vec![first],
            rejected: vec![],
        },
        &state,
    );
    let out = h.runtime.step(state, ctx, &h.env).await.unwrap();
    assert_eq!(out.new_state.messages.len(), initial + 1);

    let ctx = AgentRuntimeContext::new(
        Phase::HumanApprovedTool {
            approved: vec![second],
            rejected: vec![],
        },
        &out.new_state,
    );
    let out = h.runtime.step(out.new_state, ctx, &h.env).await.unwrap();

    assert_eq!(out.new_state.messages.len(), initial + 2);
    assert_eq!(out.new_state.step_count, 2);
    assert_eq!(out.new_state.usage.tools.calls, 2);
}

#[tokio::test]
async fn step_start_leads_the_events() {
    let h = harness(ScriptedProvider::default(), vec![]);
    let state = seed(&h, &["hi"]).await;
    let ctx = AgentRuntimeContext::new(
        Phase::LlmResult {
            message_id: "m".into(),
            tool_calls: vec![],
        },
        &state,
    );

    let out = h.runtime.step(state, ctx, &h.env).await.unwrap();

    assert_eq!(
        out.events[0],
        AgentEvent::StepStart {
            step: 1,
            instruction: "finish".into()
        }
    );
}

#[tokio::test]
async fn next_context_reports_session_progress() {
    let h = harness(ScriptedProvider::default(), vec![EchoTool::named("echo")]);
    let mut state = seed(&h, &["go"]).await;
    let call = make_tool_call("c1", "echo", json!({}));
    state.messages = push_assistant(&h, vec![call.clone()]).await;
    let ctx = AgentRuntimeContext::new(
        Phase::LlmResult {
            message_id: "m".into(),
            tool_calls: vec![call],
        },
        &state,
    );

    let out = h.runtime.step(state, ctx, &h.env).await.unwrap();

    let next = out.next_context.unwrap();
    assert_eq!(next.session.step_count, 1);
    assert_eq!(next.session.message_count, 3);
    assert_eq!(next.session.session_id, "session-1");
}

#[test]
fn enabled_tools_filter_the_executor() {
    let h = harness_with(
        ScriptedProvider::default(),
        vec![EchoTool::named("echo"), EchoTool::named("search")],
        RunConfig::new("test-model").with_enabled_tools(vec!["search".into()]),
    );
    let names: Vec<String> = h.runtime.manifests().into_iter().map(|m| m.identifier).collect();
    assert_eq!(names, vec!["search"]);
}

#[tokio::test]
async fn activated_tools_are_offered_and_leave_discovery() {
    let h = harness_with(
        ScriptedProvider::default(),
        vec![
            EchoTool::named("search"),
            EchoTool::with_output(
                "discover",
                ToolOutput::text("activated").with_state(json!({"activated_tools": ["fetch"]})),
            ),
            EchoTool::named("fetch"),
        ],
        RunConfig::new("test-model")
            .with_enabled_tools(vec!["search".into(), "discover".into()])
            .with_pipeline(crate::context::PipelineConfig {
                tool_discovery: Some(ToolDiscovery {
                    available: vec![ToolSummary {
                        identifier: "fetch".into(),
                        description: "Fetch a page".into(),
                    }],
                }),
                ..crate::context::PipelineConfig::new("test-model")
            }),
    );
    let state = seed(&h, &["hi"]).await;
    let step = StepContext {
        activated_tools: vec!["fetch".into()],
        ..StepContext::default()
    };

    let offered = h.runtime.offered_manifests(&state, &step);
    let config = h.runtime.pipeline_config(&h.env.descriptor, &step, &offered, false);

    let ids: Vec<&str> = offered.iter().map(|m| m.identifier.as_str()).collect();
    assert!(ids.contains(&"fetch"));
    assert!(config.tool_discovery.unwrap().available.is_empty());
}

#[test]
fn group_context_applies_only_to_group_runs() {
    let mut agent_map = std::collections::BTreeMap::new();
    agent_map.insert(
        "writer".to_string(),
        AgentProfile {
            name: "Writer".into(),
            description: None,
        },
    );
    let group = GroupContext {
        enabled: true,
        supervisor_agent_id: Some("sup".into()),
        agent_map,
        ..GroupContext::default()
    };
    let h = harness_with(
        ScriptedProvider::default(),
        vec![],
        RunConfig::new("test-model")
            .with_pipeline(crate::context::PipelineConfig::new("test-model").with_group(group)),
    );
    let step = StepContext::default();

    let solo = OperationContext::new("writer");
    assert!(h.runtime.pipeline_config(&solo, &step, &[], false).group_context.is_none());

    let member = OperationContext::new("sup")
        .in_group("g1", OperationScope::GroupAgent)
        .with_sub_agent("writer");
    let config = h.runtime.pipeline_config(&member, &step, &[], false);
    assert_eq!(
        config.group_context.unwrap().current_agent_id.as_deref(),
        Some("writer")
    );
}

#[tokio::test]
async fn group_member_owns_generated_messages() {
    let provider = ScriptedProvider::new(vec![make_text_response("Draft ready.")]);
    let h = harness(provider, vec![]);
    let state = seed(&h, &["write it"]).await;
    let descriptor = OperationContext::new("sup")
        .in_group("g1", OperationScope::GroupAgent)
        .with_sub_agent("writer");
    let env = StepEnv::new("op_group", key(), descriptor);
    let ctx = AgentRuntimeContext::init(&state);

    let out = h.runtime.step(state, ctx, &env).await.unwrap();

    let last = out.new_state.messages.last().unwrap();
    assert_eq!(last.role, Role::Assistant);
    assert_eq!(last.agent_id.as_deref(), Some("writer"));
}
