//! Turn execution: the completion orchestrator.
//!
//! One turn runs `Started -> Streaming -> StepBoundary* -> Finalizing`.
//! Each provider stream is one step; tool calls emitted by a step are
//! dispatched and their results fed into the next step.  Entry points are
//! [`run_turn`] and [`run_turn_streaming`]; [`poll_progress`] reads the
//! partial result of an in-flight turn.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures_util::StreamExt;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::Instrument;

use pv_domain::error::{Error, Result};
use pv_domain::provenance::{dedup_sources_by_label, merge_artifacts, Artifact, Source};
use pv_domain::stream::{StreamEvent, Usage};
use pv_domain::tool::{Message, ToolCall, ToolDefinition, ToolResult};
use pv_domain::trace::TraceEvent;
use pv_placeholders::ResolveContext;
use pv_providers::{ChatRequest, LlmProvider, ResolvedModel};
use pv_sessions::{ChatMessage, ChatRole, Session, SessionContext, SessionPatch, SessionState};
use pv_tools::knowledge::KNOWLEDGE_TOOL_PREFIX;
use pv_tools::{
    tool_definitions, KnowledgeSearchTool, Tool, ToolContext, ToolErrorPolicy, ToolRegistry,
};

use crate::state::Engine;

use super::media::strip_media;
use super::progress::{LiveProgress, ProgressMeta, ProgressUpdate};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Turn parameters
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// One message of a caller-supplied prompt template.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TemplateMessage {
    pub role: ChatRole,
    pub content: String,
}

#[derive(Debug, Clone)]
pub enum TurnInput {
    /// Raw user text.  A new conversation gets the configured system
    /// prompt in front of it.
    Text(String),
    /// Messages to resolve and append.  On a new conversation they form
    /// the whole initial history; on a follow-up they may not contain a
    /// system message.
    Template(Vec<TemplateMessage>),
}

#[derive(Debug, Clone)]
pub struct TurnOptions {
    /// Existing conversation to continue.  Unknown ids start a new
    /// conversation under that id; `None` mints one.
    pub conversation_id: Option<String>,
    pub input: TurnInput,
    /// Template variables, layered over those stored in the session.
    pub variables: HashMap<String, String>,
    /// Tools enabled for this turn.  Empty means no tools.
    pub tools: Vec<String>,
    /// Pre-selected knowledge sources; non-empty adds a dynamic
    /// knowledge-search tool scoped to them.
    pub knowledge_sources: Vec<String>,
    /// `provider/model` override.
    pub model: Option<String>,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
    pub user_id: Option<String>,
    pub organisation_id: Option<String>,
}

impl TurnOptions {
    pub fn text(text: impl Into<String>) -> Self {
        Self::with_input(TurnInput::Text(text.into()))
    }

    pub fn template(messages: Vec<TemplateMessage>) -> Self {
        Self::with_input(TurnInput::Template(messages))
    }

    fn with_input(input: TurnInput) -> Self {
        Self {
            conversation_id: None,
            input,
            variables: HashMap::new(),
            tools: Vec::new(),
            knowledge_sources: Vec::new(),
            model: None,
            temperature: None,
            max_tokens: None,
            user_id: None,
            organisation_id: None,
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Turn events and outcome
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Events streamed to the caller of [`run_turn_streaming`].
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
pub enum TurnEvent {
    /// Incremental text from the assistant.
    #[serde(rename = "assistant_delta")]
    AssistantDelta { text: String },

    /// The model is invoking a tool.
    #[serde(rename = "tool_call")]
    ToolCall {
        call_id: String,
        tool_name: String,
        arguments: Value,
    },

    /// Tool execution result.
    #[serde(rename = "tool_result")]
    ToolResult {
        call_id: String,
        tool_name: String,
        content: String,
        #[serde(skip_serializing_if = "std::ops::Not::not")]
        is_error: bool,
    },

    /// A model step finished.
    #[serde(rename = "step")]
    Step {
        index: usize,
        finish_reason: Option<String>,
    },
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TurnMeta {
    /// Token figures are those of the last step.
    pub used_tokens: u32,
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub tools_used: Vec<String>,
    pub sources: Vec<Source>,
    pub artifacts: Vec<Artifact>,
    pub steps: usize,
    pub model: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TurnOutcome {
    pub conversation_id: String,
    /// The assistant message appended by this turn.
    pub message: ChatMessage,
    /// Full history after the turn.
    pub messages: Vec<ChatMessage>,
    pub meta: TurnMeta,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Entry points
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Run one turn to completion.
pub async fn run_turn(engine: &Engine, options: TurnOptions) -> Result<TurnOutcome> {
    run_instrumented(engine, options, EventSink(None)).await
}

/// Run one turn, forwarding deltas, tool activity and step boundaries to
/// `events` as they happen.  A dropped receiver does not stop the turn.
pub async fn run_turn_streaming(
    engine: &Engine,
    options: TurnOptions,
    events: mpsc::Sender<TurnEvent>,
) -> Result<TurnOutcome> {
    run_instrumented(engine, options, EventSink(Some(events))).await
}

/// Partial result of the conversation's current or just-finished turn.
pub fn poll_progress(engine: &Engine, conversation_id: &str) -> Option<LiveProgress> {
    engine.progress.read(conversation_id)
}

async fn run_instrumented(
    engine: &Engine,
    mut options: TurnOptions,
    events: EventSink,
) -> Result<TurnOutcome> {
    let conversation_id = options
        .conversation_id
        .take()
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
    let turn_id = uuid::Uuid::new_v4().to_string();

    let turn_span = tracing::info_span!(
        "turn",
        conversation_id = %conversation_id,
        turn_id = %turn_id,
        "otel.kind" = "SERVER",
    );
    let result = run_turn_inner(engine, conversation_id, turn_id, options, &events)
        .instrument(turn_span)
        .await;

    if let Err(e) = &result {
        if e.is_fatal() {
            tracing::error!(error = %e, "turn rejected");
        } else {
            tracing::warn!(error = %e, "turn failed");
        }
    }
    result
}

struct EventSink(Option<mpsc::Sender<TurnEvent>>);

impl EventSink {
    async fn send(&self, event: TurnEvent) {
        if let Some(tx) = &self.0 {
            let _ = tx.send(event).await;
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Turn loop
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Everything the step loop needs, built before the first model call.
struct TurnContext {
    conversation_id: String,
    turn_id: String,
    model: ResolvedModel,
    tools: HashMap<String, Arc<dyn Tool>>,
    tool_defs: Vec<ToolDefinition>,
    messages: Vec<Message>,
    is_new_session: bool,
    temperature: Option<f32>,
    max_tokens: Option<u32>,
    user_id: Option<String>,
    organisation_id: Option<String>,
}

/// Accumulators carried across steps.
#[derive(Default)]
struct TurnAccumulator {
    text: String,
    citations: Vec<Source>,
    tools_used: Vec<String>,
    usage: Option<Usage>,
    steps: usize,
}

async fn run_turn_inner(
    engine: &Engine,
    conversation_id: String,
    turn_id: String,
    options: TurnOptions,
    events: &EventSink,
) -> Result<TurnOutcome> {
    let started = Instant::now();

    // ── Phase 1: prepare (no side effects on failure) ───────────────
    let ctx = prepare_turn(engine, conversation_id, turn_id, options).await?;

    // ── Phase 2: Started ────────────────────────────────────────────
    engine.progress.start_turn(&ctx.conversation_id, &ctx.turn_id);
    engine.tool_memory.clear(&ctx.conversation_id);

    TraceEvent::TurnStarted {
        conversation_id: ctx.conversation_id.clone(),
        turn_id: ctx.turn_id.clone(),
        model: ctx.model.spec(),
        tools: ctx.tools.len(),
        is_new_session: ctx.is_new_session,
    }
    .emit();

    let result = run_steps(engine, &ctx, events, started).await;
    if result.is_err() {
        engine.tool_memory.clear(&ctx.conversation_id);
    }
    result
}

/// Phases 3 and 4: the model step loop, then finalization.
async fn run_steps(
    engine: &Engine,
    ctx: &TurnContext,
    events: &EventSink,
    started: Instant,
) -> Result<TurnOutcome> {
    // ── Phase 3: step loop ──────────────────────────────────────────
    let mut acc = TurnAccumulator::default();
    let mut messages = ctx.messages.clone();
    let max_steps = engine.config.engine.max_steps.max(1);

    for step in 0..max_steps {
        acc.steps = step + 1;
        let req = ChatRequest {
            messages: messages.clone(),
            tools: ctx.tool_defs.clone(),
            temperature: ctx.temperature,
            max_tokens: ctx.max_tokens,
            model: Some(ctx.model.model.clone()),
        };

        let llm_span = tracing::info_span!(
            "llm.step",
            "otel.kind" = "CLIENT",
            step,
            model = %ctx.model.model,
            input_tokens = tracing::field::Empty,
            output_tokens = tracing::field::Empty,
        );
        let output = stream_step(engine, ctx, req, &mut acc, events)
            .instrument(llm_span.clone())
            .await?;
        if let Some(u) = &output.usage {
            llm_span.record("input_tokens", u.prompt_tokens);
            llm_span.record("output_tokens", u.completion_tokens);
            acc.usage = Some(*u);
        }

        // ── StepBoundary ────────────────────────────────────────────
        for call in &output.tool_calls {
            if !acc.tools_used.contains(&call.tool_name) {
                acc.tools_used.push(call.tool_name.clone());
            }
        }
        engine.progress.update(
            &ctx.conversation_id,
            ProgressUpdate {
                complete: Some(false),
                meta: Some(ProgressMeta {
                    tools_used: acc.tools_used.clone(),
                    ..Default::default()
                }),
                ..Default::default()
            },
        );
        TraceEvent::TurnStep {
            conversation_id: ctx.conversation_id.clone(),
            step,
            tool_calls: output.tool_calls.len(),
            finish_reason: output.finish_reason.clone(),
        }
        .emit();
        events
            .send(TurnEvent::Step {
                index: step,
                finish_reason: output.finish_reason.clone(),
            })
            .await;

        if output.tool_calls.is_empty() {
            break;
        }
        if step + 1 == max_steps {
            tracing::warn!(
                max_steps,
                pending_calls = output.tool_calls.len(),
                "step limit reached; finalizing with text so far"
            );
            break;
        }

        // ── Tool dispatch ───────────────────────────────────────────
        messages.push(Message::assistant_tool_calls(&output.text, &output.tool_calls));
        for result in dispatch_tools(engine, ctx, &output.tool_calls, events).await? {
            messages.push(Message::tool_result(&result));
        }
    }

    // ── Phase 4: Finalizing ─────────────────────────────────────────
    finalize_turn(engine, ctx, acc, started).await
}

/// Validate input, check tenancy, resolve tools, model and placeholders,
/// then write the new messages to the session.  Any error before the
/// session write leaves the session untouched.
async fn prepare_turn(
    engine: &Engine,
    conversation_id: String,
    turn_id: String,
    options: TurnOptions,
) -> Result<TurnContext> {
    let existing = engine.sessions.get(&conversation_id);
    let is_new_session = existing.is_none();

    if let Some(session) = &existing {
        ensure_same_tenant(session, options.organisation_id.as_deref())?;
    }

    let template = build_template(
        &engine.config.engine.system_prompt,
        options.input,
        is_new_session,
    )?;

    let mut tools = engine
        .tools
        .resolve(Some(conversation_id.as_str()), &options.tools)?;

    let model = engine.providers.resolve(
        options.model.as_deref(),
        engine.config.engine.default_model.as_deref(),
    )?;

    let mut variables = existing
        .as_ref()
        .map(|s| s.state.variables.clone())
        .unwrap_or_default();
    variables.extend(options.variables);

    let resolve_ctx = ResolveContext {
        variables: variables.clone(),
        conversation_id: Some(conversation_id.clone()),
        user_id: options.user_id.clone(),
        organisation_id: options.organisation_id.clone(),
    };
    let mut new_messages = Vec::with_capacity(template.len());
    for item in template {
        let resolved = engine
            .placeholders
            .resolve_text(&item.content, &resolve_ctx)
            .await?;
        let mut message = match item.role {
            ChatRole::User => ChatMessage::user(resolved.content),
            role => ChatMessage::new(role, resolved.content),
        };
        if !resolved.sources.is_empty() {
            message.meta.knowledge_sources = Some(dedup_sources_by_label(resolved.sources));
        }
        new_messages.push(message);
    }

    if !options.knowledge_sources.is_empty() {
        if let Some(search) = &engine.knowledge {
            let name = ToolRegistry::dynamic_name(KNOWLEDGE_TOOL_PREFIX);
            let tool: Arc<dyn Tool> = Arc::new(KnowledgeSearchTool::new(
                Arc::clone(search),
                options.knowledge_sources.clone(),
                engine.config.placeholders.knowledge_limit,
                engine.config.placeholders.knowledge_threshold,
            ));
            engine
                .tools
                .register_dynamic(&conversation_id, name.clone(), Arc::clone(&tool));
            tools.insert(name, tool);
        } else {
            tracing::warn!("knowledge sources selected but no knowledge search is configured");
        }
    }

    // ── Session write ────────────────────────────────────────────────
    let state = SessionState {
        variables: variables.clone(),
        model: Some(model.spec()),
    };
    let session = match existing {
        None => {
            engine.sessions.create(
                Some(conversation_id.as_str()),
                variables,
                SessionContext {
                    user_id: options.user_id.clone(),
                    organisation_id: options.organisation_id.clone(),
                },
                new_messages,
            )?;
            engine.sessions.set(
                &conversation_id,
                SessionPatch {
                    state: Some(state),
                    ..Default::default()
                },
            )?
        }
        Some(session) => {
            let mut history = session.messages;
            history.extend(new_messages);
            engine.sessions.set(
                &conversation_id,
                SessionPatch {
                    messages: Some(history),
                    state: Some(state),
                    ..Default::default()
                },
            )?
        }
    };

    let tool_defs = tool_definitions(&tools);
    Ok(TurnContext {
        conversation_id,
        turn_id,
        messages: session.messages.iter().map(to_provider_message).collect(),
        model,
        tools,
        tool_defs,
        is_new_session,
        temperature: options.temperature.or(engine.config.engine.temperature),
        max_tokens: options.max_tokens.or(engine.config.engine.max_tokens),
        user_id: options.user_id,
        organisation_id: options.organisation_id,
    })
}

fn ensure_same_tenant(session: &Session, organisation_id: Option<&str>) -> Result<()> {
    if session.organisation_id.as_deref() == organisation_id {
        return Ok(());
    }
    Err(Error::SecurityViolation(format!(
        "conversation {} belongs to another organisation",
        session.id
    )))
}

fn build_template(
    system_prompt: &str,
    input: TurnInput,
    is_new_session: bool,
) -> Result<Vec<TemplateMessage>> {
    match input {
        TurnInput::Text(text) => {
            if text.trim().is_empty() {
                return Err(Error::Validation("turn input text is empty".into()));
            }
            let user = TemplateMessage {
                role: ChatRole::User,
                content: text,
            };
            if is_new_session {
                Ok(vec![
                    TemplateMessage {
                        role: ChatRole::System,
                        content: system_prompt.to_owned(),
                    },
                    user,
                ])
            } else {
                Ok(vec![user])
            }
        }
        TurnInput::Template(messages) => {
            if messages.is_empty() {
                return Err(Error::Validation("turn template has no messages".into()));
            }
            if !is_new_session && messages.iter().any(|m| m.role == ChatRole::System) {
                return Err(Error::Validation(
                    "system messages are only accepted when starting a conversation".into(),
                ));
            }
            Ok(messages)
        }
    }
}

fn to_provider_message(message: &ChatMessage) -> Message {
    match message.role {
        ChatRole::System => Message::system(message.content.clone()),
        ChatRole::User => Message::user(message.content.clone()),
        ChatRole::Assistant => Message::assistant(message.content.clone()),
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Streaming
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// What one model step produced.
struct StepOutput {
    text: String,
    tool_calls: Vec<ToolCall>,
    usage: Option<Usage>,
    finish_reason: Option<String>,
}

async fn stream_step(
    engine: &Engine,
    ctx: &TurnContext,
    req: ChatRequest,
    acc: &mut TurnAccumulator,
    events: &EventSink,
) -> Result<StepOutput> {
    let provider: &Arc<dyn LlmProvider> = &ctx.model.provider;
    let provider_id = provider.provider_id().to_owned();
    let provider_error = |message: String| Error::Provider {
        provider: provider_id.clone(),
        message,
    };

    let mut stream = provider.chat_stream(req).await.map_err(|e| match e {
        Error::Provider { .. } => e,
        other => provider_error(other.to_string()),
    })?;

    let mut output = StepOutput {
        text: String::new(),
        tool_calls: Vec::new(),
        usage: None,
        finish_reason: None,
    };
    // call_id -> (name, args_json)
    let mut tc_bufs: HashMap<String, (String, String)> = HashMap::new();

    while let Some(event) = stream.next().await {
        let event = event.map_err(|e| match e {
            Error::Provider { .. } => e,
            other => provider_error(other.to_string()),
        })?;
        match event {
            StreamEvent::Token { text } => {
                output.text.push_str(&text);
                acc.text.push_str(&text);
                engine.progress.update(
                    &ctx.conversation_id,
                    ProgressUpdate {
                        text: Some(acc.text.clone()),
                        complete: Some(false),
                        meta: None,
                    },
                );
                events.send(TurnEvent::AssistantDelta { text }).await;
            }
            StreamEvent::ToolCallStarted { call_id, tool_name } => {
                tc_bufs.insert(call_id, (tool_name, String::new()));
            }
            StreamEvent::ToolCallDelta { call_id, delta } => {
                if let Some((_, args)) = tc_bufs.get_mut(&call_id) {
                    args.push_str(&delta);
                }
            }
            StreamEvent::ToolCallFinished {
                call_id,
                tool_name,
                arguments,
            } => {
                tc_bufs.remove(&call_id);
                output.tool_calls.push(ToolCall {
                    call_id,
                    tool_name,
                    arguments,
                });
            }
            StreamEvent::Source { source } => acc.citations.push(source),
            StreamEvent::Done {
                usage,
                finish_reason,
            } => {
                output.usage = usage;
                output.finish_reason = finish_reason;
            }
            StreamEvent::Error { message } => return Err(provider_error(message)),
        }
    }

    // Providers that only send start + delta leave their calls buffered.
    let mut leftovers: Vec<_> = tc_bufs.into_iter().collect();
    leftovers.sort_by(|a, b| a.0.cmp(&b.0));
    for (call_id, (tool_name, args)) in leftovers {
        let arguments = parse_tool_arguments(&call_id, &tool_name, &args);
        output.tool_calls.push(ToolCall {
            call_id,
            tool_name,
            arguments,
        });
    }

    Ok(output)
}

fn parse_tool_arguments(call_id: &str, tool_name: &str, raw: &str) -> Value {
    if raw.trim().is_empty() {
        return Value::Object(Default::default());
    }
    match serde_json::from_str(raw) {
        Ok(v) => v,
        Err(e) => {
            tracing::warn!(
                call_id = %call_id,
                tool = %tool_name,
                error = %e,
                "tool call arguments are not valid JSON; defaulting to empty object"
            );
            Value::Object(Default::default())
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tool dispatch
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Run a step's tool calls concurrently.  Results come back in call order.
async fn dispatch_tools(
    engine: &Engine,
    ctx: &TurnContext,
    calls: &[ToolCall],
    events: &EventSink,
) -> Result<Vec<ToolResult>> {
    for call in calls {
        events
            .send(TurnEvent::ToolCall {
                call_id: call.call_id.clone(),
                tool_name: call.tool_name.clone(),
                arguments: call.arguments.clone(),
            })
            .await;
    }

    let futures: Vec<_> = calls
        .iter()
        .map(|call| {
            let tool_span = tracing::info_span!(
                "tool.call",
                tool_name = %call.tool_name,
                call_id = %call.call_id,
            );
            execute_tool(engine, ctx, call).instrument(tool_span)
        })
        .collect();
    let results = futures_util::future::join_all(futures).await;

    let mut out = Vec::with_capacity(results.len());
    for result in results {
        let result = result?;
        events
            .send(TurnEvent::ToolResult {
                call_id: result.call_id.clone(),
                tool_name: result.tool_name.clone(),
                content: result.content.clone(),
                is_error: result.is_error,
            })
            .await;
        out.push(result);
    }
    Ok(out)
}

async fn execute_tool(engine: &Engine, ctx: &TurnContext, call: &ToolCall) -> Result<ToolResult> {
    let result = |content: String, is_error: bool| ToolResult {
        call_id: call.call_id.clone(),
        tool_name: call.tool_name.clone(),
        content,
        is_error,
    };

    let Some(tool) = ctx.tools.get(&call.tool_name) else {
        tracing::warn!(tool = %call.tool_name, "model called a tool that is not enabled");
        return Ok(result(
            format!("Error: unknown tool `{}`", call.tool_name),
            true,
        ));
    };

    let tool_ctx = ToolContext {
        conversation_id: ctx.conversation_id.clone(),
        tool_name: call.tool_name.clone(),
        organisation_id: ctx.organisation_id.clone(),
        user_id: ctx.user_id.clone(),
        memory: Arc::clone(&engine.tool_memory),
    };

    match tool.execute(call.arguments.clone(), &tool_ctx).await {
        Ok(content) => Ok(result(content, false)),
        Err(e) => match tool.error_policy() {
            ToolErrorPolicy::ReportToModel => {
                tracing::debug!(error = %e, "tool failed; reporting to model");
                Ok(result(format!("Error: {e}"), true))
            }
            ToolErrorPolicy::Propagate => Err(Error::ToolExecution {
                tool: call.tool_name.clone(),
                message: e.to_string(),
            }),
        },
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Finalization
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

async fn finalize_turn(
    engine: &Engine,
    ctx: &TurnContext,
    acc: TurnAccumulator,
    started: Instant,
) -> Result<TurnOutcome> {
    // Provider citations first, then tool memory in tools-used order.
    let mut sources = acc.citations;
    let mut artifacts = Vec::new();
    let mut memory = engine.tool_memory.take(&ctx.conversation_id);
    let mut ordered = Vec::with_capacity(memory.len());
    for name in &acc.tools_used {
        if let Some(entry) = memory.remove(name) {
            ordered.push(entry);
        }
    }
    ordered.extend(memory.into_values());
    for entry in ordered {
        sources.extend(entry.used_sources);
        merge_artifacts(&mut artifacts, entry.used_artifacts);
    }
    let sources = dedup_sources_by_label(sources);
    let text = strip_media(&acc.text);

    engine.progress.update(
        &ctx.conversation_id,
        ProgressUpdate {
            text: Some(text.clone()),
            complete: Some(true),
            meta: Some(ProgressMeta {
                tools_used: acc.tools_used.clone(),
                sources: sources.clone(),
                artifacts: artifacts.clone(),
            }),
        },
    );
    engine.progress.schedule_clear(
        &ctx.conversation_id,
        &ctx.turn_id,
        Duration::from_millis(engine.config.engine.progress_clear_delay_ms),
    );

    let mut message = ChatMessage::assistant(text, ctx.model.spec());
    if !artifacts.is_empty() {
        message.meta.artifacts = Some(artifacts.clone());
    }
    if !sources.is_empty() {
        message.meta.knowledge_sources = Some(sources.clone());
    }
    let session = engine
        .sessions
        .append_messages(&ctx.conversation_id, vec![message.clone()])?;

    let usage = acc.usage.unwrap_or_default();
    TraceEvent::TurnCompleted {
        conversation_id: ctx.conversation_id.clone(),
        turn_id: ctx.turn_id.clone(),
        steps: acc.steps,
        text_chars: message.content.len(),
        sources: sources.len(),
        artifacts: artifacts.len(),
        duration_ms: started.elapsed().as_millis() as u64,
    }
    .emit();

    Ok(TurnOutcome {
        conversation_id: ctx.conversation_id.clone(),
        message,
        messages: session.messages,
        meta: TurnMeta {
            used_tokens: usage.total_tokens,
            prompt_tokens: usage.prompt_tokens,
            completion_tokens: usage.completion_tokens,
            tools_used: acc.tools_used,
            sources,
            artifacts,
            steps: acc.steps,
            model: ctx.model.spec(),
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_text_conversation_gets_system_prompt() {
        let template = build_template("Be brief.", TurnInput::Text("hi".into()), true).unwrap();
        assert_eq!(template.len(), 2);
        assert_eq!(template[0].role, ChatRole::System);
        assert_eq!(template[0].content, "Be brief.");
        assert_eq!(template[1].role, ChatRole::User);
    }

    #[test]
    fn follow_up_text_is_a_single_user_message() {
        let template = build_template("Be brief.", TurnInput::Text("again".into()), false).unwrap();
        assert_eq!(template.len(), 1);
        assert_eq!(template[0].content, "again");
    }

    #[test]
    fn blank_input_is_rejected() {
        let err = build_template("p", TurnInput::Text("   ".into()), true).unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
        let err = build_template("p", TurnInput::Template(vec![]), true).unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[test]
    fn follow_up_template_cannot_carry_system_message() {
        let template = vec![TemplateMessage {
            role: ChatRole::System,
            content: "override".into(),
        }];
        assert!(build_template("p", TurnInput::Template(template.clone()), true).is_ok());
        assert!(build_template("p", TurnInput::Template(template), false).is_err());
    }

    #[test]
    fn malformed_tool_arguments_default_to_empty_object() {
        assert_eq!(parse_tool_arguments("c", "t", ""), serde_json::json!({}));
        assert_eq!(parse_tool_arguments("c", "t", "{not json"), serde_json::json!({}));
        assert_eq!(
            parse_tool_arguments("c", "t", r#"{"q":"x"}"#),
            serde_json::json!({ "q": "x" })
        );
    }

    #[test]
    fn turn_event_serializes_tagged() {
        let json = serde_json::to_value(TurnEvent::ToolResult {
            call_id: "1".into(),
            tool_name: "t".into(),
            content: "ok".into(),
            is_error: false,
        })
        .unwrap();
        assert_eq!(json["type"], "tool_result");
        assert!(json.get("is_error").is_none());
    }
}
