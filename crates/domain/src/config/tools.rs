use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tool registry
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolsConfig {
    /// Lifetime of per-conversation dynamic tools.
    #[serde(default = "d_3600")]
    pub dynamic_ttl_secs: u64,

    /// How often expired dynamic tools are swept.
    #[serde(default = "d_300")]
    pub sweep_interval_secs: u64,

    /// Register the built-in `fetch_url` static tool.
    #[serde(default = "d_true")]
    pub enable_fetch_url: bool,

    /// Tool output longer than this is truncated before reaching the model.
    #[serde(default = "d_20000")]
    pub max_result_chars: usize,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            dynamic_ttl_secs: d_3600(),
            sweep_interval_secs: d_300(),
            enable_fetch_url: true,
            max_result_chars: d_20000(),
        }
    }
}

fn d_3600() -> u64 {
    3600
}

fn d_300() -> u64 {
    300
}

fn d_true() -> bool {
    true
}

fn d_20000() -> usize {
    20_000
}
