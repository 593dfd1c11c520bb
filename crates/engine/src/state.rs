use std::sync::Arc;

use pv_domain::capability::KnowledgeSearch;
use pv_domain::config::Config;
use pv_placeholders::PlaceholderResolver;
use pv_providers::ProviderRegistry;
use pv_sessions::SessionStore;
use pv_tools::{ToolMemory, ToolRegistry};

use crate::runtime::progress::LiveProgressCache;

/// Shared engine state, constructed once per process and cloned into
/// every turn.
///
/// Fields are grouped by concern:
/// - **Core services**: config, LLM providers
/// - **Conversation state**: sessions, live progress
/// - **Templating & tools**: placeholder resolver, tool registry, tool memory
#[derive(Clone)]
pub struct Engine {
    // ── Core services ─────────────────────────────────────────────────
    pub config: Arc<Config>,
    pub providers: Arc<ProviderRegistry>,

    // ── Conversation state ────────────────────────────────────────────
    pub sessions: Arc<SessionStore>,
    pub progress: Arc<LiveProgressCache>,

    // ── Templating & tools ────────────────────────────────────────────
    pub placeholders: Arc<PlaceholderResolver>,
    pub tools: Arc<ToolRegistry>,
    pub tool_memory: Arc<ToolMemory>,
    /// Backs the per-turn dynamic knowledge tool. `None` disables it.
    pub knowledge: Option<Arc<dyn KnowledgeSearch>>,
}
