use serde::{Deserialize, Serialize};
use std::collections::HashMap;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Placeholder directives
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// How a directive reacts when it fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorPolicy {
    /// Propagate the error; resolution of the message is aborted.
    Strict,
    /// Replace the block with empty content and skip the rest of the message.
    DegradeToEmpty,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlaceholdersConfig {
    /// Default chunk count for `{{#knowledge}}` when `limit` is not given.
    #[serde(default = "d_5")]
    pub knowledge_limit: u32,

    /// Default similarity threshold for `{{#knowledge}}`.
    #[serde(default = "d_threshold")]
    pub knowledge_threshold: f64,

    /// Bucket used by `{{#file}}` when `bucket` is not given.
    #[serde(default = "d_bucket")]
    pub file_bucket: String,

    /// Fetched file/URL content longer than this is truncated.
    #[serde(default = "d_50000")]
    pub max_inline_chars: usize,

    /// Per-directive error policy overrides, keyed by directive name.
    #[serde(default)]
    pub policy_overrides: HashMap<String, ErrorPolicy>,
}

impl Default for PlaceholdersConfig {
    fn default() -> Self {
        Self {
            knowledge_limit: d_5(),
            knowledge_threshold: d_threshold(),
            file_bucket: d_bucket(),
            max_inline_chars: d_50000(),
            policy_overrides: HashMap::new(),
        }
    }
}

fn d_5() -> u32 {
    5
}

fn d_threshold() -> f64 {
    0.3
}

fn d_bucket() -> String {
    "files".into()
}

fn d_50000() -> usize {
    50_000
}
