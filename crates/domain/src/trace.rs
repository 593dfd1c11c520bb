use serde::Serialize;

/// Structured trace events emitted across all Palaver crates.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event")]
pub enum TraceEvent {
    SessionCreated {
        session_id: String,
        organisation_id: Option<String>,
        messages: usize,
    },
    SessionDropped {
        session_id: String,
    },
    SessionsSwept {
        removed: usize,
        remaining: usize,
    },
    DirectiveResolved {
        directive: String,
        content_chars: usize,
        sources: usize,
        skip_rest: bool,
    },
    DirectiveDegraded {
        directive: String,
        error: String,
    },
    DynamicToolRegistered {
        conversation_id: String,
        tool_name: String,
    },
    DynamicToolsSwept {
        removed: usize,
    },
    TurnStarted {
        conversation_id: String,
        turn_id: String,
        model: String,
        tools: usize,
        is_new_session: bool,
    },
    TurnStep {
        conversation_id: String,
        step: usize,
        tool_calls: usize,
        finish_reason: Option<String>,
    },
    TurnCompleted {
        conversation_id: String,
        turn_id: String,
        steps: usize,
        text_chars: usize,
        sources: usize,
        artifacts: usize,
        duration_ms: u64,
    },
}

impl TraceEvent {
    pub fn emit(&self) {
        let json = serde_json::to_string(self).unwrap_or_default();
        tracing::info!(trace_event = %json, "pv_event");
    }
}
