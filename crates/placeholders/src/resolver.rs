//! Directive dispatch table.
//!
//! Directives are registered once at startup and run in registration
//! order.  Within one message each directive's occurrences are resolved
//! left to right; a `skip_rest_of_message` output ends resolution of that
//! message only.

use std::sync::Arc;

use regex::Regex;

use pv_domain::config::ErrorPolicy;
use pv_domain::error::{Error, Result};
use pv_domain::provenance::Source;
use pv_domain::trace::TraceEvent;

use crate::args::parse_arg_body;
use crate::directive::{Directive, DirectiveOutput, ResolveContext};
use crate::variables::substitute;

/// A message after both templating passes.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResolvedText {
    pub content: String,
    /// Provenance attached by directives, in resolution order.
    pub sources: Vec<Source>,
}

struct RegisteredDirective {
    directive: Arc<dyn Directive>,
    pattern: Regex,
    policy: ErrorPolicy,
}

/// One occurrence of a directive in the current text.
struct Occurrence {
    start: usize,
    end: usize,
    raw: String,
    body: String,
}

#[derive(Default)]
pub struct PlaceholderResolver {
    directives: Vec<RegisteredDirective>,
}

impl PlaceholderResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a directive.  `policy_override` replaces the directive's
    /// default error policy.
    pub fn register(
        &mut self,
        directive: Arc<dyn Directive>,
        policy_override: Option<ErrorPolicy>,
    ) -> Result<()> {
        let name = directive.name().to_owned();
        if self.directives.iter().any(|d| d.directive.name() == name) {
            return Err(Error::Config(format!(
                "directive `{name}` is already registered"
            )));
        }

        // Bodies never contain a literal `}}`, so the lazy body stops at the
        // first closing pair.
        let pattern = Regex::new(&format!(
            r"(?s)\{{\{{#{}(\s.*?)?\}}\}}",
            regex::escape(&name)
        ))
        .map_err(|e| Error::Config(format!("directive `{name}` pattern: {e}")))?;

        let policy = policy_override.unwrap_or_else(|| directive.default_policy());
        tracing::debug!(directive = %name, ?policy, "directive registered");

        self.directives.push(RegisteredDirective {
            directive,
            pattern,
            policy,
        });
        Ok(())
    }

    /// Registered directive names, in dispatch order.
    pub fn names(&self) -> Vec<&str> {
        self.directives.iter().map(|d| d.directive.name()).collect()
    }

    pub fn policy_of(&self, name: &str) -> Option<ErrorPolicy> {
        self.directives
            .iter()
            .find(|d| d.directive.name() == name)
            .map(|d| d.policy)
    }

    /// Substitute variables, then resolve every registered directive.
    ///
    /// A `Strict` directive failure aborts resolution of this message with
    /// the directive's error.
    pub async fn resolve_text(&self, text: &str, ctx: &ResolveContext) -> Result<ResolvedText> {
        let mut content = substitute(text, &ctx.variables);
        let mut sources = Vec::new();

        for entry in &self.directives {
            let occurrences: Vec<Occurrence> = entry
                .pattern
                .captures_iter(&content)
                .filter_map(|caps| {
                    let whole = caps.get(0)?;
                    Some(Occurrence {
                        start: whole.start(),
                        end: whole.end(),
                        raw: whole.as_str().to_owned(),
                        body: caps.get(1).map(|b| b.as_str().to_owned()).unwrap_or_default(),
                    })
                })
                .collect();
            if occurrences.is_empty() {
                continue;
            }

            let mut out = String::with_capacity(content.len());
            let mut cursor = 0;
            let mut skip = false;
            for occurrence in occurrences {
                out.push_str(&content[cursor..occurrence.start]);
                let output = run_directive(entry, &occurrence, ctx).await?;
                out.push_str(&output.content);
                sources.extend(output.sources);
                cursor = occurrence.end;
                if output.skip_rest_of_message {
                    skip = true;
                    break;
                }
            }
            out.push_str(&content[cursor..]);
            content = out;

            if skip {
                break;
            }
        }

        Ok(ResolvedText { content, sources })
    }
}

async fn run_directive(
    entry: &RegisteredDirective,
    occurrence: &Occurrence,
    ctx: &ResolveContext,
) -> Result<DirectiveOutput> {
    let name = entry.directive.name();
    let args = parse_arg_body(&occurrence.body);

    match entry.directive.resolve(&occurrence.raw, &args, ctx).await {
        Ok(output) => {
            TraceEvent::DirectiveResolved {
                directive: name.to_owned(),
                content_chars: output.content.len(),
                sources: output.sources.len(),
                skip_rest: output.skip_rest_of_message,
            }
            .emit();
            Ok(output)
        }
        Err(e) => match entry.policy {
            ErrorPolicy::Strict => {
                tracing::warn!(directive = %name, error = %e, "directive failed");
                Err(e)
            }
            ErrorPolicy::DegradeToEmpty => {
                TraceEvent::DirectiveDegraded {
                    directive: name.to_owned(),
                    error: e.to_string(),
                }
                .emit();
                Ok(DirectiveOutput::skip())
            }
        },
    }
}
