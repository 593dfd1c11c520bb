//! Provider registry.
//!
//! Holds the streaming providers the host registered at startup and turns
//! `"provider/model"` specs into a provider instance plus model name.

use std::collections::HashMap;
use std::sync::Arc;

use pv_domain::error::{Error, Result};

use crate::traits::LlmProvider;

/// Outcome of [`ProviderRegistry::resolve`].
#[derive(Clone)]
pub struct ResolvedModel {
    pub provider: Arc<dyn LlmProvider>,
    pub model: String,
}

impl ResolvedModel {
    /// Canonical `"provider/model"` form.
    pub fn spec(&self) -> String {
        format!("{}/{}", self.provider.provider_id(), self.model)
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// ProviderRegistry
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Default)]
pub struct ProviderRegistry {
    providers: HashMap<String, Arc<dyn LlmProvider>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, provider: Arc<dyn LlmProvider>) {
        let id = provider.provider_id().to_owned();
        tracing::info!(provider_id = %id, "registered LLM provider");
        self.providers.insert(id, provider);
    }

    /// Look up a provider by its id.
    pub fn get(&self, provider_id: &str) -> Option<Arc<dyn LlmProvider>> {
        self.providers.get(provider_id).cloned()
    }

    /// Resolve the model for a turn.
    ///
    /// Precedence: the requested spec, then `default_spec`, then the only
    /// registered provider with its default model.  A spec is either
    /// `"provider/model"` or a bare provider id.
    pub fn resolve(&self, requested: Option<&str>, default_spec: Option<&str>) -> Result<ResolvedModel> {
        if let Some(spec) = requested.or(default_spec).filter(|s| !s.trim().is_empty()) {
            return self.resolve_spec(spec);
        }

        match self.providers.values().next() {
            Some(provider) if self.providers.len() == 1 => Ok(ResolvedModel {
                model: provider.default_model().to_owned(),
                provider: Arc::clone(provider),
            }),
            _ => Err(Error::Config(format!(
                "no model requested and no default configured ({} providers registered)",
                self.providers.len()
            ))),
        }
    }

    fn resolve_spec(&self, spec: &str) -> Result<ResolvedModel> {
        let (provider_id, model) = match spec.split_once('/') {
            Some((provider, model)) => (provider, Some(model)),
            None => (spec, None),
        };
        let provider = self
            .get(provider_id)
            .ok_or_else(|| Error::not_found("provider", provider_id))?;
        let model = model
            .filter(|m| !m.is_empty())
            .unwrap_or_else(|| provider.default_model())
            .to_owned();
        Ok(ResolvedModel { provider, model })
    }

    /// Number of registered providers.
    pub fn len(&self) -> usize {
        self.providers.len()
    }

    /// Whether the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }

    /// List all registered provider IDs (sorted).
    pub fn list_providers(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.providers.keys().cloned().collect();
        ids.sort();
        ids
    }
}
