use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Completion orchestrator
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Model used when a turn does not name one (`"provider/model"`).
    #[serde(default)]
    pub default_model: Option<String>,

    /// System prompt for new conversations started without a template.
    #[serde(default = "d_system_prompt")]
    pub system_prompt: String,

    /// Upper bound on model steps (tool round-trips) per turn.
    #[serde(default = "d_8")]
    pub max_steps: usize,

    #[serde(default)]
    pub temperature: Option<f32>,

    #[serde(default)]
    pub max_tokens: Option<u32>,

    /// Grace delay before a finished turn's live progress is cleared.
    #[serde(default = "d_5000")]
    pub progress_clear_delay_ms: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            default_model: None,
            system_prompt: d_system_prompt(),
            max_steps: d_8(),
            temperature: None,
            max_tokens: None,
            progress_clear_delay_ms: d_5000(),
        }
    }
}

fn d_system_prompt() -> String {
    "You are a helpful assistant. Answer accurately and cite the sources you were given.".into()
}

fn d_8() -> usize {
    8
}

fn d_5000() -> u64 {
    5000
}
