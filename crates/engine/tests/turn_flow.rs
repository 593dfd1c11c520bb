//! End-to-end turn flows against in-test collaborators.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Value};
use tokio::sync::mpsc;

use pv_domain::capability::{Chunk, KnowledgeSearch, SearchFilter, Snippet, SnippetRef, SnippetStore};
use pv_domain::config::Config;
use pv_domain::error::{Error, Result};
use pv_domain::provenance::Source;
use pv_domain::stream::{BoxStream, StreamEvent, Usage};
use pv_domain::tool::Role;
use pv_engine::bootstrap::{build_engine, Collaborators};
use pv_engine::runtime::{
    poll_progress, run_turn, run_turn_streaming, TemplateMessage, TurnEvent, TurnOptions,
};
use pv_engine::Engine;
use pv_providers::{ChatRequest, EchoProvider, LlmProvider};
use pv_sessions::ChatRole;
use pv_tools::{Tool, ToolContext, ToolErrorPolicy};

// ── Test doubles ─────────────────────────────────────────────────────

type Script = Box<dyn Fn(&ChatRequest) -> Vec<StreamEvent> + Send>;

fn script(f: impl Fn(&ChatRequest) -> Vec<StreamEvent> + Send + 'static) -> Script {
    Box::new(f)
}

/// Plays one script per step and records every request it receives.
struct ScriptedProvider {
    scripts: Mutex<VecDeque<Script>>,
    requests: Mutex<Vec<ChatRequest>>,
}

impl ScriptedProvider {
    fn new(scripts: Vec<Script>) -> Arc<Self> {
        Arc::new(Self {
            scripts: Mutex::new(scripts.into()),
            requests: Mutex::new(Vec::new()),
        })
    }
}

#[async_trait]
impl LlmProvider for ScriptedProvider {
    async fn chat_stream(&self, req: ChatRequest) -> Result<BoxStream<'static, Result<StreamEvent>>> {
        let events = match self.scripts.lock().pop_front() {
            Some(script) => script(&req),
            None => vec![token("(script exhausted)"), done(1, 1, "stop")],
        };
        self.requests.lock().push(req);

        let stream = async_stream::stream! {
            for event in events {
                yield Ok(event);
            }
        };
        Ok(Box::pin(stream))
    }

    fn provider_id(&self) -> &str {
        "scripted"
    }

    fn default_model(&self) -> &str {
        "scripted-1"
    }
}

fn token(text: &str) -> StreamEvent {
    StreamEvent::Token { text: text.into() }
}

fn done(prompt: u32, completion: u32, finish: &str) -> StreamEvent {
    StreamEvent::Done {
        usage: Some(Usage {
            prompt_tokens: prompt,
            completion_tokens: completion,
            total_tokens: prompt + completion,
        }),
        finish_reason: Some(finish.into()),
    }
}

fn call(call_id: &str, tool_name: &str, args: Value) -> Vec<StreamEvent> {
    vec![
        StreamEvent::ToolCallStarted {
            call_id: call_id.into(),
            tool_name: tool_name.into(),
        },
        StreamEvent::ToolCallDelta {
            call_id: call_id.into(),
            delta: args.to_string(),
        },
    ]
}

/// Records a fixed set of sources and returns "looked up".
struct LookupTool {
    sources: Vec<Source>,
}

#[async_trait]
impl Tool for LookupTool {
    fn description(&self) -> String {
        "Look something up".into()
    }
    fn parameters(&self) -> Value {
        json!({ "type": "object", "properties": { "q": { "type": "string" } } })
    }
    async fn execute(&self, _args: Value, ctx: &ToolContext) -> Result<String> {
        ctx.memory.record(
            &ctx.conversation_id,
            &ctx.tool_name,
            self.sources.clone(),
            Vec::new(),
        );
        Ok("looked up".into())
    }
}

struct FailingTool(ToolErrorPolicy);

#[async_trait]
impl Tool for FailingTool {
    fn description(&self) -> String {
        "Always fails".into()
    }
    fn parameters(&self) -> Value {
        json!({ "type": "object", "properties": {} })
    }
    fn error_policy(&self) -> ToolErrorPolicy {
        self.0
    }
    async fn execute(&self, _args: Value, _ctx: &ToolContext) -> Result<String> {
        Err(Error::Http("upstream unavailable".into()))
    }
}

struct FakeSearch;

#[async_trait]
impl KnowledgeSearch for FakeSearch {
    async fn search(&self, _query: &str, filter: &SearchFilter) -> Result<Vec<Chunk>> {
        Ok(filter
            .source_ids
            .iter()
            .map(|id| Chunk {
                id: format!("{id}-1"),
                source_id: id.clone(),
                source_label: format!("Source {id}"),
                content: "Relevant passage.".into(),
                score: 0.9,
                url: None,
            })
            .collect())
    }
}

struct Snippets;

#[async_trait]
impl SnippetStore for Snippets {
    async fn fetch_snippet(&self, reference: &SnippetRef, _org: Option<&str>) -> Result<Snippet> {
        match reference {
            SnippetRef::Name(name) if name == "greeting" => Ok(Snippet {
                id: "s1".into(),
                name: name.clone(),
                content: "Greet {{person}} warmly.".into(),
            }),
            other => Err(Error::not_found("snippet", format!("{other:?}"))),
        }
    }
}

fn engine_with(provider: Arc<dyn LlmProvider>, collaborators: Collaborators) -> Engine {
    engine_with_config(Config::default(), provider, collaborators)
}

fn engine_with_config(
    config: Config,
    provider: Arc<dyn LlmProvider>,
    mut collaborators: Collaborators,
) -> Engine {
    collaborators.providers.push(provider);
    build_engine(Arc::new(config), collaborators).unwrap()
}

fn echo_engine() -> Engine {
    engine_with(Arc::new(EchoProvider::new("echo")), Collaborators::default())
}

// ── Conversation lifecycle ───────────────────────────────────────────

#[tokio::test]
async fn new_conversation_then_follow_up() {
    let engine = echo_engine();

    let first = run_turn(&engine, TurnOptions::text("Hello there")).await.unwrap();
    assert_eq!(first.messages.len(), 3);
    assert_eq!(first.messages[0].role, ChatRole::System);
    assert_eq!(first.messages[1].role, ChatRole::User);
    assert_eq!(first.message.role, ChatRole::Assistant);
    assert_eq!(first.message.content, "Hello there");
    assert_eq!(first.message.meta.model.as_deref(), Some("echo/echo-1"));

    let mut follow_up = TurnOptions::text("And again");
    follow_up.conversation_id = Some(first.conversation_id.clone());
    let second = run_turn(&engine, follow_up).await.unwrap();
    assert_eq!(second.conversation_id, first.conversation_id);
    assert_eq!(second.messages.len(), 5);
    assert_eq!(second.message.content, "And again");

    // Earlier messages keep their ids.
    let first_ids: Vec<_> = first.messages.iter().map(|m| m.id().to_owned()).collect();
    let kept: Vec<_> = second.messages[..3].iter().map(|m| m.id().to_owned()).collect();
    assert_eq!(first_ids, kept);
}

#[tokio::test]
async fn unknown_conversation_id_starts_that_conversation() {
    let engine = echo_engine();
    let mut options = TurnOptions::text("hi");
    options.conversation_id = Some("conv-42".into());
    let outcome = run_turn(&engine, options).await.unwrap();
    assert_eq!(outcome.conversation_id, "conv-42");
    assert!(engine.sessions.get("conv-42").is_some());
}

#[tokio::test]
async fn template_variables_are_resolved_and_remembered() {
    let engine = echo_engine();
    let mut options = TurnOptions::template(vec![
        TemplateMessage {
            role: ChatRole::System,
            content: "You help {{name}}.".into(),
        },
        TemplateMessage {
            role: ChatRole::User,
            content: "Hi, I am {{name}}".into(),
        },
    ]);
    options.variables.insert("name".into(), "Alice".into());
    let first = run_turn(&engine, options).await.unwrap();
    assert_eq!(first.messages[0].content, "You help Alice.");
    assert_eq!(first.message.content, "Hi, I am Alice");

    // Stored variables apply to the follow-up.
    let mut follow_up = TurnOptions::text("Bye {{name}}");
    follow_up.conversation_id = Some(first.conversation_id.clone());
    let second = run_turn(&engine, follow_up).await.unwrap();
    assert_eq!(second.message.content, "Bye Alice");
}

// ── Tools and provenance ─────────────────────────────────────────────

#[tokio::test]
async fn tool_step_folds_citations_and_tool_memory() {
    let provider = ScriptedProvider::new(vec![
        script(|_| {
            let mut events = call("call-1", "lookup", json!({ "q": "leave" }));
            events.push(done(10, 5, "tool_calls"));
            events
        }),
        script(|_| {
            vec![
                StreamEvent::Source {
                    source: Source::new("knowledge", "Handbook").with_id("provider"),
                },
                token("Leave is "),
                token("25 days."),
                done(20, 7, "stop"),
            ]
        }),
    ]);
    let lookup: Arc<dyn Tool> = Arc::new(LookupTool {
        sources: vec![
            Source::new("knowledge", "Handbook").with_id("tool"),
            Source::new("knowledge", "Wiki"),
        ],
    });
    let engine = engine_with(
        provider.clone(),
        Collaborators {
            static_tools: vec![("lookup".into(), lookup)],
            ..Default::default()
        },
    );

    let mut options = TurnOptions::text("How much leave?");
    options.tools = vec!["lookup".into()];
    let (tx, mut rx) = mpsc::channel(64);
    let outcome = run_turn_streaming(&engine, options, tx).await.unwrap();

    assert_eq!(outcome.message.content, "Leave is 25 days.");
    assert_eq!(outcome.meta.steps, 2);
    assert_eq!(outcome.meta.tools_used, vec!["lookup"]);

    // Provider citation wins the label collision.
    let labels: Vec<_> = outcome.meta.sources.iter().map(|s| s.label.as_str()).collect();
    assert_eq!(labels, vec!["Handbook", "Wiki"]);
    assert_eq!(outcome.meta.sources[0].id.as_deref(), Some("provider"));
    assert_eq!(
        outcome.message.meta.knowledge_sources.as_ref().map(Vec::len),
        Some(2)
    );

    // Usage is the last step's, not a sum.
    assert_eq!(outcome.meta.prompt_tokens, 20);
    assert_eq!(outcome.meta.completion_tokens, 7);
    assert_eq!(outcome.meta.used_tokens, 27);

    // The second step saw the tool result.
    let requests = provider.requests.lock();
    assert_eq!(requests.len(), 2);
    assert_eq!(requests[0].tools.len(), 1);
    assert_eq!(requests[1].messages.last().map(|m| m.role), Some(Role::Tool));
    drop(requests);

    let mut saw_call = false;
    let mut saw_result = false;
    while let Ok(event) = rx.try_recv() {
        match event {
            TurnEvent::ToolCall { arguments, .. } => {
                assert_eq!(arguments, json!({ "q": "leave" }));
                saw_call = true;
            }
            TurnEvent::ToolResult {
                content, is_error, ..
            } => {
                assert_eq!(content, "looked up");
                assert!(!is_error);
                saw_result = true;
            }
            _ => {}
        }
    }
    assert!(saw_call && saw_result);
}

fn lookup_tool(label: &str) -> Arc<dyn Tool> {
    Arc::new(LookupTool {
        sources: vec![Source::new("knowledge", label)],
    })
}

#[tokio::test]
async fn several_tools_over_several_steps_keep_first_seen_order() {
    let provider = ScriptedProvider::new(vec![
        script(|_| {
            let mut events = call("call-1", "beta", json!({}));
            events.extend(call("call-2", "alpha", json!({})));
            events.push(done(5, 1, "tool_calls"));
            events
        }),
        script(|_| {
            let mut events = call("call-3", "alpha", json!({}));
            events.extend(call("call-4", "gamma", json!({})));
            events.push(done(8, 1, "tool_calls"));
            events
        }),
        script(|_| vec![token("All checked."), done(12, 3, "stop")]),
    ]);
    let engine = engine_with(
        provider,
        Collaborators {
            static_tools: vec![
                ("alpha".into(), lookup_tool("Alpha doc")),
                ("beta".into(), lookup_tool("Beta doc")),
                ("gamma".into(), lookup_tool("Gamma doc")),
            ],
            ..Default::default()
        },
    );

    let mut options = TurnOptions::text("check everything");
    options.conversation_id = Some("c1".into());
    options.tools = vec!["alpha".into(), "beta".into(), "gamma".into()];
    let outcome = run_turn(&engine, options).await.unwrap();

    assert_eq!(outcome.meta.steps, 3);
    assert_eq!(outcome.meta.tools_used, vec!["beta", "alpha", "gamma"]);
    let labels: Vec<_> = outcome.meta.sources.iter().map(|s| s.label.as_str()).collect();
    assert_eq!(labels, vec!["Beta doc", "Alpha doc", "Gamma doc"]);
    assert_eq!(outcome.meta.prompt_tokens, 12);

    let progress = poll_progress(&engine, "c1").unwrap();
    assert_eq!(progress.meta.tools_used, vec!["beta", "alpha", "gamma"]);
}

#[tokio::test]
async fn finished_turn_releases_tool_memory() {
    let provider = ScriptedProvider::new(vec![
        script(|_| {
            let mut events = call("call-1", "lookup", json!({}));
            events.push(done(1, 1, "tool_calls"));
            events
        }),
        script(|_| vec![token("ok"), done(1, 1, "stop")]),
    ]);
    let engine = engine_with(
        provider,
        Collaborators {
            static_tools: vec![("lookup".into(), lookup_tool("Handbook"))],
            ..Default::default()
        },
    );

    let mut options = TurnOptions::text("look it up");
    options.conversation_id = Some("c9".into());
    options.tools = vec!["lookup".into()];
    let outcome = run_turn(&engine, options).await.unwrap();

    assert_eq!(outcome.meta.sources.len(), 1);
    assert!(engine.tool_memory.read("c9").is_empty());
    assert!(engine.tool_memory.is_empty());
}

#[tokio::test]
async fn reported_tool_failure_reaches_the_model() {
    let provider = ScriptedProvider::new(vec![
        script(|_| {
            let mut events = call("call-1", "flaky", json!({}));
            events.push(done(1, 1, "tool_calls"));
            events
        }),
        script(|_| vec![token("Sorry, that failed."), done(2, 2, "stop")]),
    ]);
    let engine = engine_with(
        provider.clone(),
        Collaborators {
            static_tools: vec![(
                "flaky".into(),
                Arc::new(FailingTool(ToolErrorPolicy::ReportToModel)) as Arc<dyn Tool>,
            )],
            ..Default::default()
        },
    );

    let mut options = TurnOptions::text("try it");
    options.tools = vec!["flaky".into()];
    let outcome = run_turn(&engine, options).await.unwrap();
    assert_eq!(outcome.message.content, "Sorry, that failed.");

    let requests = provider.requests.lock();
    let tool_message = serde_json::to_value(requests[1].messages.last().unwrap()).unwrap();
    let part = &tool_message["content"][0];
    assert_eq!(part["is_error"], true);
    assert!(part["content"].as_str().unwrap().starts_with("Error: "));
}

#[tokio::test]
async fn propagating_tool_failure_aborts_the_turn() {
    let provider = ScriptedProvider::new(vec![script(|_| {
        let mut events = call("call-1", "strict", json!({}));
        events.push(done(1, 1, "tool_calls"));
        events
    })]);
    let engine = engine_with(
        provider,
        Collaborators {
            static_tools: vec![(
                "strict".into(),
                Arc::new(FailingTool(ToolErrorPolicy::Propagate)) as Arc<dyn Tool>,
            )],
            ..Default::default()
        },
    );

    let mut options = TurnOptions::text("try it");
    options.tools = vec!["strict".into()];
    let err = run_turn(&engine, options).await.unwrap_err();
    assert!(matches!(err, Error::ToolExecution { ref tool, .. } if tool == "strict"));
}

#[tokio::test]
async fn unknown_enabled_tool_is_rejected_before_any_write() {
    let engine = echo_engine();
    let mut options = TurnOptions::text("hi");
    options.conversation_id = Some("c1".into());
    options.tools = vec!["does_not_exist".into()];
    let err = run_turn(&engine, options).await.unwrap_err();
    assert!(matches!(err, Error::NotFound { kind: "tool", .. }));
    assert!(engine.sessions.get("c1").is_none());
}

#[tokio::test]
async fn knowledge_sources_add_a_dynamic_search_tool() {
    let provider = ScriptedProvider::new(vec![
        script(|req| {
            let name = req
                .tools
                .iter()
                .find(|t| t.name.starts_with("search_knowledge_"))
                .map(|t| t.name.clone())
                .unwrap_or_default();
            let mut events = call("call-1", &name, json!({ "query": "policy" }));
            events.push(done(3, 1, "tool_calls"));
            events
        }),
        script(|_| vec![token("Found it."), done(4, 2, "stop")]),
    ]);
    let engine = engine_with(
        provider,
        Collaborators {
            knowledge: Some(Arc::new(FakeSearch)),
            ..Default::default()
        },
    );

    let mut options = TurnOptions::text("What is the policy?");
    options.conversation_id = Some("c1".into());
    options.knowledge_sources = vec!["hr".into()];
    let outcome = run_turn(&engine, options).await.unwrap();

    assert_eq!(outcome.meta.tools_used.len(), 1);
    assert!(outcome.meta.tools_used[0].starts_with("search_knowledge_"));
    assert_eq!(outcome.meta.sources.len(), 1);
    assert_eq!(outcome.meta.sources[0].label, "Source hr");
    assert_eq!(engine.tools.dynamic_names("c1").len(), 1);
}

#[tokio::test]
async fn step_limit_finalizes_with_text_so_far() {
    let looping: Vec<Script> = (0..5)
        .map(|i| {
            script(move |_| {
                let mut events = vec![token(&format!("step{i} "))];
                events.extend(call(&format!("call-{i}"), "lookup", json!({})));
                events.push(done(1, 1, "tool_calls"));
                events
            })
        })
        .collect();
    let mut config = Config::default();
    config.engine.max_steps = 2;
    let engine = engine_with_config(
        config,
        ScriptedProvider::new(looping),
        Collaborators {
            static_tools: vec![(
                "lookup".into(),
                Arc::new(LookupTool { sources: vec![] }) as Arc<dyn Tool>,
            )],
            ..Default::default()
        },
    );

    let mut options = TurnOptions::text("loop");
    options.tools = vec!["lookup".into()];
    let outcome = run_turn(&engine, options).await.unwrap();
    assert_eq!(outcome.meta.steps, 2);
    assert_eq!(outcome.message.content, "step0 step1 ");
}

#[tokio::test]
async fn embedded_media_is_stripped_from_final_text() {
    let provider = ScriptedProvider::new(vec![script(|_| {
        vec![
            token("Here: ![chart](https://img.example/c.png) "),
            token("done"),
            done(1, 1, "stop"),
        ]
    })]);
    let engine = engine_with(provider, Collaborators::default());
    let outcome = run_turn(&engine, TurnOptions::text("chart please")).await.unwrap();
    assert_eq!(outcome.message.content, "Here:  done");
}

// ── Rejections ───────────────────────────────────────────────────────

#[tokio::test]
async fn cross_tenant_turn_is_a_security_violation() {
    let engine = echo_engine();
    let mut options = TurnOptions::text("mine");
    options.organisation_id = Some("org-a".into());
    let first = run_turn(&engine, options).await.unwrap();

    let mut intruder = TurnOptions::text("let me in");
    intruder.conversation_id = Some(first.conversation_id.clone());
    intruder.organisation_id = Some("org-b".into());
    let err = run_turn(&engine, intruder).await.unwrap_err();
    assert!(err.is_fatal());

    let session = engine.sessions.get(&first.conversation_id).unwrap();
    assert_eq!(session.messages.len(), 3);
}

#[tokio::test]
async fn strict_directive_failure_leaves_no_session() {
    let engine = engine_with(
        Arc::new(EchoProvider::new("echo")),
        Collaborators {
            snippets: Some(Arc::new(Snippets)),
            ..Default::default()
        },
    );

    let mut options = TurnOptions::text("{{#snippet}} please");
    options.conversation_id = Some("c1".into());
    let err = run_turn(&engine, options).await.unwrap_err();
    assert!(matches!(err, Error::Validation(_)));
    assert!(engine.sessions.get("c1").is_none());

    let mut options = TurnOptions::text("{{#snippet name=greeting}}");
    options.variables.insert("person".into(), "Bo".into());
    let outcome = run_turn(&engine, options).await.unwrap();
    assert_eq!(outcome.messages[1].content, "Greet Bo warmly.");
}

#[tokio::test]
async fn provider_error_keeps_published_progress() {
    let provider = ScriptedProvider::new(vec![script(|_| {
        vec![
            token("partial"),
            StreamEvent::Error {
                message: "overloaded".into(),
            },
        ]
    })]);
    let engine = engine_with(provider, Collaborators::default());

    let mut options = TurnOptions::text("hi");
    options.conversation_id = Some("c1".into());
    let err = run_turn(&engine, options).await.unwrap_err();
    assert!(matches!(err, Error::Provider { ref provider, .. } if provider == "scripted"));

    let progress = poll_progress(&engine, "c1").unwrap();
    assert_eq!(progress.text, "partial");
    assert!(!progress.complete);
}

#[tokio::test]
async fn failed_turn_keeps_its_user_message() {
    let provider = ScriptedProvider::new(vec![
        script(|_| {
            vec![StreamEvent::Error {
                message: "overloaded".into(),
            }]
        }),
        script(|_| vec![token("Back again."), done(1, 1, "stop")]),
    ]);
    let engine = engine_with(provider, Collaborators::default());

    let mut options = TurnOptions::text("hello?");
    options.conversation_id = Some("c1".into());
    run_turn(&engine, options).await.unwrap_err();

    // History is append-only: the rejected turn's input stays recorded.
    let session = engine.sessions.get("c1").unwrap();
    assert_eq!(session.messages.len(), 2);
    assert_eq!(session.messages[1].content, "hello?");

    let mut retry = TurnOptions::text("hello?");
    retry.conversation_id = Some("c1".into());
    let outcome = run_turn(&engine, retry).await.unwrap();
    assert_eq!(outcome.messages.len(), 4);
    assert_eq!(outcome.message.content, "Back again.");
}

// ── Live progress ────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn progress_completes_then_clears_after_grace_delay() {
    let engine = echo_engine();
    let mut options = TurnOptions::text("watch me");
    options.conversation_id = Some("c1".into());
    run_turn(&engine, options).await.unwrap();

    let progress = poll_progress(&engine, "c1").unwrap();
    assert!(progress.complete);
    assert_eq!(progress.text, "watch me");

    let delay = engine.config.engine.progress_clear_delay_ms;
    tokio::time::sleep(Duration::from_millis(delay + 1)).await;
    assert!(poll_progress(&engine, "c1").is_none());
}

#[tokio::test(start_paused = true)]
async fn new_turn_is_not_cleared_by_previous_grace_delay() {
    let engine = echo_engine();
    let mut options = TurnOptions::text("first");
    options.conversation_id = Some("c1".into());
    run_turn(&engine, options).await.unwrap();

    tokio::time::sleep(Duration::from_millis(1000)).await;
    engine.progress.start_turn("c1", "later-turn");

    tokio::time::sleep(Duration::from_millis(engine.config.engine.progress_clear_delay_ms)).await;
    assert!(poll_progress(&engine, "c1").is_some());
}

// ── Persistence ──────────────────────────────────────────────────────

#[tokio::test]
async fn conversation_survives_restart_via_flush() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = Config::default();
    config.sessions.state_path = Some(dir.path().to_path_buf());

    let engine = engine_with_config(
        config.clone(),
        Arc::new(EchoProvider::new("echo")),
        Collaborators::default(),
    );
    let first = run_turn(&engine, TurnOptions::text("remember me")).await.unwrap();
    engine.sessions.flush().await.unwrap();

    let restarted = engine_with_config(
        config,
        Arc::new(EchoProvider::new("echo")),
        Collaborators::default(),
    );
    let mut follow_up = TurnOptions::text("still there?");
    follow_up.conversation_id = Some(first.conversation_id.clone());
    let second = run_turn(&restarted, follow_up).await.unwrap();
    assert_eq!(second.messages.len(), 5);
    assert_eq!(second.messages[1].content, "remember me");
}
