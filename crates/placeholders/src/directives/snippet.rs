use std::sync::Arc;

use async_trait::async_trait;

use pv_domain::capability::{SnippetRef, SnippetStore};
use pv_domain::config::ErrorPolicy;
use pv_domain::error::{Error, Result};

use crate::args::ArgMap;
use crate::directive::{optional, Directive, DirectiveOutput, ResolveContext};
use crate::variables::substitute;

/// `{{#snippet name="greeting"}}` or `{{#snippet id=...}}`: inline a stored
/// prompt snippet with the turn's variables substituted into it.
pub struct SnippetDirective {
    store: Arc<dyn SnippetStore>,
}

impl SnippetDirective {
    pub fn new(store: Arc<dyn SnippetStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl Directive for SnippetDirective {
    fn name(&self) -> &str {
        "snippet"
    }

    fn default_policy(&self) -> ErrorPolicy {
        ErrorPolicy::Strict
    }

    async fn resolve(
        &self,
        _raw: &str,
        args: &ArgMap,
        ctx: &ResolveContext,
    ) -> Result<DirectiveOutput> {
        let reference = match (optional(args, "id"), optional(args, "name")) {
            (Some(id), _) => SnippetRef::Id(id),
            (None, Some(name)) => SnippetRef::Name(name),
            (None, None) => {
                return Err(Error::Validation(
                    "{{#snippet}} requires a `name` or `id` argument".into(),
                ))
            }
        };

        let snippet = self
            .store
            .fetch_snippet(&reference, ctx.organisation_id.as_deref())
            .await?;

        Ok(DirectiveOutput::content(substitute(
            &snippet.content,
            &ctx.variables,
        )))
    }
}
