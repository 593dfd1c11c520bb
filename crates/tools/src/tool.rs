use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use pv_domain::error::{Error, Result};

use crate::memory::ToolMemory;

/// What happens when [`Tool::execute`] fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolErrorPolicy {
    /// Feed `"Error: ..."` back to the model so it can react in-context.
    ReportToModel,
    /// Abort the turn with a `ToolExecution` error.
    Propagate,
}

/// Context passed to every tool invocation.
#[derive(Clone)]
pub struct ToolContext {
    pub conversation_id: String,
    /// Name the tool was invoked under (dynamic tools carry a suffix).
    pub tool_name: String,
    pub organisation_id: Option<String>,
    pub user_id: Option<String>,
    pub memory: Arc<ToolMemory>,
}

#[async_trait]
pub trait Tool: Send + Sync {
    fn description(&self) -> String;

    /// JSON schema of the arguments object.
    fn parameters(&self) -> Value;

    fn error_policy(&self) -> ToolErrorPolicy {
        ToolErrorPolicy::ReportToModel
    }

    async fn execute(&self, args: Value, ctx: &ToolContext) -> Result<String>;
}

/// Extract a required string argument.
pub fn required_str<'a>(args: &'a Value, tool: &str, key: &str) -> Result<&'a str> {
    args.get(key)
        .and_then(Value::as_str)
        .filter(|v| !v.trim().is_empty())
        .ok_or_else(|| Error::Validation(format!("{tool}: missing `{key}` argument")))
}

/// Cap a tool result at `max_chars` characters.
pub fn truncate_result(text: String, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text;
    }
    let mut out: String = text.chars().take(max_chars).collect();
    out.push_str("\n[TRUNCATED]");
    out
}
