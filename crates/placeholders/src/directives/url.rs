use std::sync::Arc;

use async_trait::async_trait;

use pv_domain::capability::UrlFetcher;
use pv_domain::config::ErrorPolicy;
use pv_domain::error::Result;
use pv_domain::provenance::Source;

use crate::args::ArgMap;
use crate::directive::{required, Directive, DirectiveOutput, ResolveContext};
use crate::injection::format_url_section;
use crate::truncation::truncate_inline;

/// `{{#url url="https://..."}}`: inline the markdown rendition of a page.
pub struct UrlDirective {
    fetcher: Arc<dyn UrlFetcher>,
    max_inline_chars: usize,
}

impl UrlDirective {
    pub fn new(fetcher: Arc<dyn UrlFetcher>, max_inline_chars: usize) -> Self {
        Self {
            fetcher,
            max_inline_chars,
        }
    }
}

#[async_trait]
impl Directive for UrlDirective {
    fn name(&self) -> &str {
        "url"
    }

    fn default_policy(&self) -> ErrorPolicy {
        ErrorPolicy::DegradeToEmpty
    }

    async fn resolve(
        &self,
        _raw: &str,
        args: &ArgMap,
        _ctx: &ResolveContext,
    ) -> Result<DirectiveOutput> {
        let url = required(args, "url", "url")?;
        let markdown = self.fetcher.fetch_markdown(&url).await?;
        let (content, truncated) = truncate_inline(&markdown, self.max_inline_chars);

        Ok(
            DirectiveOutput::content(format_url_section(&url, &content, markdown.len(), truncated))
                .with_sources(vec![Source::new("url", &url).with_url(&url).external()]),
        )
    }
}
