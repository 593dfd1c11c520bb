use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// URL fetching
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Limits for the HTTP URL-to-markdown fetcher.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebConfig {
    #[serde(default = "d_20")]
    pub timeout_secs: u64,

    /// Responses larger than this are rejected.
    #[serde(default = "d_max_bytes")]
    pub max_bytes: usize,

    #[serde(default = "d_max_text_chars")]
    pub max_text_chars: usize,

    #[serde(default = "d_user_agent")]
    pub user_agent: String,
}

impl Default for WebConfig {
    fn default() -> Self {
        Self {
            timeout_secs: d_20(),
            max_bytes: d_max_bytes(),
            max_text_chars: d_max_text_chars(),
            user_agent: d_user_agent(),
        }
    }
}

fn d_20() -> u64 {
    20
}

fn d_max_bytes() -> usize {
    5 * 1024 * 1024
}

fn d_max_text_chars() -> usize {
    250_000
}

fn d_user_agent() -> String {
    concat!("Palaver/", env!("CARGO_PKG_VERSION")).into()
}
