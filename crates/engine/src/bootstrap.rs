//! Engine construction and background-task spawning.
//!
//! [`build_engine`] wires configuration and externally supplied
//! collaborators into an [`Engine`]; [`spawn_background_tasks`] starts the
//! periodic maintenance loops and hands back a handle that stops them.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use pv_domain::capability::{FileStore, KnowledgeSearch, SnippetStore, Transcriber, UrlFetcher};
use pv_domain::config::{Config, ConfigSeverity};
use pv_placeholders::directives::{FileDirective, KnowledgeDirective, SnippetDirective, UrlDirective};
use pv_placeholders::{Directive, PlaceholderResolver};
use pv_providers::{LlmProvider, ProviderRegistry};
use pv_sessions::{seconds_saturating, SessionStore};
use pv_tools::web_fetch::FETCH_URL_TOOL;
use pv_tools::{FetchUrlTool, HttpUrlFetcher, Tool, ToolMemory, ToolRegistry};

use crate::runtime::progress::LiveProgressCache;
use crate::state::Engine;

/// External capabilities the engine consumes.  Anything left `None`
/// disables the directives and tools that depend on it.
#[derive(Default)]
pub struct Collaborators {
    pub providers: Vec<Arc<dyn LlmProvider>>,
    pub knowledge: Option<Arc<dyn KnowledgeSearch>>,
    pub files: Option<Arc<dyn FileStore>>,
    pub transcriber: Option<Arc<dyn Transcriber>>,
    pub snippets: Option<Arc<dyn SnippetStore>>,
    /// Overrides the HTTP fetcher built from `[web]`.
    pub url_fetcher: Option<Arc<dyn UrlFetcher>>,
    /// Extra static tools, registered after the built-ins.
    pub static_tools: Vec<(String, Arc<dyn Tool>)>,
}

/// Validate config, initialize every subsystem and return a fully-wired
/// [`Engine`].
pub fn build_engine(config: Arc<Config>, collaborators: Collaborators) -> anyhow::Result<Engine> {
    // ── Config validation ────────────────────────────────────────────
    let issues = config.validate();
    for issue in &issues {
        match issue.severity {
            ConfigSeverity::Warning => tracing::warn!("config: {issue}"),
            ConfigSeverity::Error => tracing::error!("config: {issue}"),
        }
    }
    let errors = issues
        .iter()
        .filter(|i| i.severity == ConfigSeverity::Error)
        .count();
    if errors > 0 {
        anyhow::bail!("config validation failed with {errors} error(s)");
    }

    // ── LLM providers ────────────────────────────────────────────────
    let mut providers = ProviderRegistry::new();
    for provider in collaborators.providers {
        providers.register(provider);
    }
    if providers.is_empty() {
        tracing::warn!("no LLM providers registered; every turn will fail");
    } else {
        tracing::info!(providers = ?providers.list_providers(), "LLM provider registry ready");
    }

    // ── Session store ────────────────────────────────────────────────
    let sessions = Arc::new(
        SessionStore::new(&config.sessions).context("initializing session store")?,
    );
    tracing::info!(sessions = sessions.len(), "session store ready");

    // ── URL fetcher (shared by the url directive and fetch_url) ──────
    let url_fetcher: Arc<dyn UrlFetcher> = match collaborators.url_fetcher {
        Some(fetcher) => fetcher,
        None => Arc::new(HttpUrlFetcher::new(&config.web).context("building URL fetcher")?),
    };

    // ── Placeholder directives (fixed order) ─────────────────────────
    let placeholders_cfg = &config.placeholders;
    let mut directives: Vec<Arc<dyn Directive>> = Vec::new();
    if let Some(snippets) = collaborators.snippets {
        directives.push(Arc::new(SnippetDirective::new(snippets)));
    }
    if let Some(search) = &collaborators.knowledge {
        directives.push(Arc::new(KnowledgeDirective::new(
            Arc::clone(search),
            placeholders_cfg.knowledge_limit,
            placeholders_cfg.knowledge_threshold,
        )));
    }
    if let Some(files) = collaborators.files {
        directives.push(Arc::new(FileDirective::new(
            files,
            collaborators.transcriber,
            placeholders_cfg.file_bucket.clone(),
            placeholders_cfg.max_inline_chars,
        )));
    }
    directives.push(Arc::new(UrlDirective::new(
        Arc::clone(&url_fetcher),
        placeholders_cfg.max_inline_chars,
    )));

    let mut placeholders = PlaceholderResolver::new();
    for directive in directives {
        let policy = placeholders_cfg.policy_overrides.get(directive.name()).copied();
        placeholders
            .register(directive, policy)
            .context("registering placeholder directive")?;
    }
    for name in placeholders_cfg.policy_overrides.keys() {
        if placeholders.policy_of(name).is_none() {
            tracing::warn!(directive = %name, "policy override for a directive that is not registered");
        }
    }
    tracing::info!(directives = ?placeholders.names(), "placeholder resolver ready");

    // ── Tools ────────────────────────────────────────────────────────
    let tools = Arc::new(ToolRegistry::new(seconds_saturating(
        config.tools.dynamic_ttl_secs,
    )));
    if config.tools.enable_fetch_url {
        tools.register_static(
            FETCH_URL_TOOL,
            Arc::new(FetchUrlTool::new(
                Arc::clone(&url_fetcher),
                config.tools.max_result_chars,
            )),
        );
    }
    for (name, tool) in collaborators.static_tools {
        tools.register_static(name, tool);
    }
    tracing::info!(static_tools = ?tools.static_names(), "tool registry ready");

    Ok(Engine {
        config,
        providers: Arc::new(providers),
        sessions,
        progress: Arc::new(LiveProgressCache::new()),
        placeholders: Arc::new(placeholders),
        tools,
        tool_memory: Arc::new(ToolMemory::new()),
        knowledge: collaborators.knowledge,
    })
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Background tasks
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Handle to the maintenance loops started by [`spawn_background_tasks`].
pub struct BackgroundTasks {
    cancel: CancellationToken,
    handles: Vec<JoinHandle<()>>,
}

impl BackgroundTasks {
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Stop every loop and wait for it to exit.  The session flush loop
    /// writes one last time before returning.
    pub async fn shutdown(self) {
        self.cancel.cancel();
        for handle in self.handles {
            if let Err(e) = handle.await {
                tracing::warn!(error = %e, "background task ended abnormally");
            }
        }
        tracing::info!("background tasks stopped");
    }
}

/// Spawn session cleanup, session flush and dynamic tool sweep loops.
pub fn spawn_background_tasks(engine: &Engine) -> BackgroundTasks {
    let cancel = CancellationToken::new();
    let mut handles = Vec::with_capacity(3);
    let cfg = &engine.config;

    // ── Periodic session cleanup ─────────────────────────────────────
    {
        let sessions = engine.sessions.clone();
        let cancel = cancel.clone();
        let period = Duration::from_secs(cfg.sessions.cleanup_interval_secs.max(1));
        let max_age = seconds_saturating(cfg.sessions.max_age_secs);
        handles.push(tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = interval.tick() => {
                        let removed = sessions.cleanup(max_age);
                        if removed > 0 {
                            tracing::info!(removed, "expired sessions removed");
                        }
                    }
                }
            }
        }));
    }

    // ── Periodic session flush ───────────────────────────────────────
    {
        let sessions = engine.sessions.clone();
        let cancel = cancel.clone();
        let period = Duration::from_secs(cfg.sessions.flush_interval_secs.max(1));
        handles.push(tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = interval.tick() => {
                        if let Err(e) = sessions.flush().await {
                            tracing::warn!(error = %e, "session store flush failed");
                        }
                    }
                }
            }
            if let Err(e) = sessions.flush().await {
                tracing::warn!(error = %e, "final session store flush failed");
            }
        }));
    }

    // ── Periodic dynamic tool sweep ──────────────────────────────────
    {
        let tools = engine.tools.clone();
        let cancel = cancel.clone();
        let period = Duration::from_secs(cfg.tools.sweep_interval_secs.max(1));
        handles.push(tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = interval.tick() => {
                        tools.sweep_expired();
                    }
                }
            }
        }));
    }

    tracing::info!("background tasks spawned");
    BackgroundTasks { cancel, handles }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pv_providers::EchoProvider;

    fn echo() -> Collaborators {
        Collaborators {
            providers: vec![Arc::new(EchoProvider::new("echo"))],
            ..Default::default()
        }
    }

    #[test]
    fn default_engine_has_url_directive_and_fetch_tool() {
        let engine = build_engine(Arc::new(Config::default()), echo()).unwrap();
        assert_eq!(engine.placeholders.names(), vec!["url"]);
        assert_eq!(engine.tools.static_names(), vec![FETCH_URL_TOOL]);
        assert!(engine.knowledge.is_none());
    }

    #[test]
    fn fetch_url_can_be_disabled() {
        let mut config = Config::default();
        config.tools.enable_fetch_url = false;
        let engine = build_engine(Arc::new(config), echo()).unwrap();
        assert!(engine.tools.static_names().is_empty());
    }

    #[test]
    fn invalid_config_is_rejected() {
        let mut config = Config::default();
        config.engine.max_steps = 0;
        assert!(build_engine(Arc::new(config), echo()).is_err());
    }

    #[test]
    fn oversized_ttl_is_rejected() {
        let mut config = Config::default();
        config.sessions.ttl_secs = 100_000_000_000_000;
        assert!(build_engine(Arc::new(config), echo()).is_err());
    }

    #[tokio::test]
    async fn background_tasks_shut_down_cleanly() {
        let engine = build_engine(Arc::new(Config::default()), echo()).unwrap();
        let tasks = spawn_background_tasks(&engine);
        let token = tasks.cancel_token();
        tasks.shutdown().await;
        assert!(token.is_cancelled());
    }
}
