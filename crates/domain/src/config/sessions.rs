use serde::{Deserialize, Serialize};
use std::path::PathBuf;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Session store
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionsConfig {
    /// Directory holding `sessions/sessions.json`.  `None` keeps sessions
    /// in memory only.
    #[serde(default)]
    pub state_path: Option<PathBuf>,

    /// Sessions not updated for this long are removed by the cleanup task.
    #[serde(default = "d_week")]
    pub max_age_secs: u64,

    /// `expiresAt` is set this far past the latest write.
    #[serde(default = "d_week")]
    pub ttl_secs: u64,

    #[serde(default = "d_3600")]
    pub cleanup_interval_secs: u64,

    #[serde(default = "d_30")]
    pub flush_interval_secs: u64,
}

impl Default for SessionsConfig {
    fn default() -> Self {
        Self {
            state_path: None,
            max_age_secs: d_week(),
            ttl_secs: d_week(),
            cleanup_interval_secs: d_3600(),
            flush_interval_secs: d_30(),
        }
    }
}

fn d_week() -> u64 {
    7 * 24 * 3600
}

fn d_3600() -> u64 {
    3600
}

fn d_30() -> u64 {
    30
}
