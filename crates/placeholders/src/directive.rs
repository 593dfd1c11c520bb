use std::collections::HashMap;

use async_trait::async_trait;

use pv_domain::config::ErrorPolicy;
use pv_domain::error::{Error, Result};
use pv_domain::provenance::Source;

use crate::args::{ArgMap, ArgValue};

/// Everything a directive may consult besides its own arguments.
#[derive(Debug, Clone, Default)]
pub struct ResolveContext {
    /// Template variables of the turn, before substitution.
    pub variables: HashMap<String, String>,
    pub conversation_id: Option<String>,
    pub user_id: Option<String>,
    pub organisation_id: Option<String>,
}

/// Replacement produced for one directive occurrence.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DirectiveOutput {
    pub content: String,
    /// Stop processing further directives in the same message.
    pub skip_rest_of_message: bool,
    pub sources: Vec<Source>,
}

impl DirectiveOutput {
    pub fn content(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            ..Default::default()
        }
    }

    pub fn with_sources(mut self, sources: Vec<Source>) -> Self {
        self.sources = sources;
        self
    }

    /// Empty content that also ends resolution of the current message.
    pub fn skip() -> Self {
        Self {
            skip_rest_of_message: true,
            ..Default::default()
        }
    }
}

/// A `{{#name ...}}` block handler.
#[async_trait]
pub trait Directive: Send + Sync {
    /// Name matched after `{{#`.
    fn name(&self) -> &str;

    /// Policy applied when [`Directive::resolve`] fails and no override is
    /// configured.
    fn default_policy(&self) -> ErrorPolicy;

    async fn resolve(
        &self,
        raw: &str,
        args: &ArgMap,
        ctx: &ResolveContext,
    ) -> Result<DirectiveOutput>;
}

/// Fetch a required argument as text.
pub fn required(args: &ArgMap, directive: &str, key: &str) -> Result<String> {
    optional(args, key).ok_or_else(|| {
        Error::Validation(format!("{{{{#{directive}}}}} requires a `{key}` argument"))
    })
}

/// Fetch an argument as text; empty strings count as absent.
pub fn optional(args: &ArgMap, key: &str) -> Option<String> {
    args.get(key)
        .map(ArgValue::to_text)
        .filter(|v| !v.trim().is_empty())
}
