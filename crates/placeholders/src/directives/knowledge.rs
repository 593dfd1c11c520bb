use std::sync::Arc;

use async_trait::async_trait;

use pv_domain::capability::{Chunk, KnowledgeSearch, SearchFilter};
use pv_domain::config::ErrorPolicy;
use pv_domain::error::Result;
use pv_domain::provenance::{dedup_sources_by_label, Source};

use crate::args::{parse_list, ArgMap};
use crate::directive::{optional, required, Directive, DirectiveOutput, ResolveContext};
use crate::injection::format_knowledge_section;

/// `{{#knowledge query="..." sources="a, b" limit=5 threshold=0.4}}`:
/// embed-and-search the organisation's knowledge and inline the hits.
pub struct KnowledgeDirective {
    search: Arc<dyn KnowledgeSearch>,
    default_limit: u32,
    default_threshold: f64,
}

impl KnowledgeDirective {
    pub fn new(search: Arc<dyn KnowledgeSearch>, default_limit: u32, default_threshold: f64) -> Self {
        Self {
            search,
            default_limit,
            default_threshold,
        }
    }
}

#[async_trait]
impl Directive for KnowledgeDirective {
    fn name(&self) -> &str {
        "knowledge"
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
        let query = required(args, "knowledge", "query")?;
        let filter = SearchFilter {
            organisation_id: ctx.organisation_id.clone(),
            source_ids: optional(args, "sources")
                .map(|raw| parse_list(&raw))
                .unwrap_or_default(),
            limit: Some(
                args.get("limit")
                    .and_then(|v| v.as_f64())
                    .filter(|n| *n >= 1.0)
                    .map(|n| n as u32)
                    .unwrap_or(self.default_limit),
            ),
            threshold: Some(
                args.get("threshold")
                    .and_then(|v| v.as_f64())
                    .unwrap_or(self.default_threshold),
            ),
        };

        let chunks = self.search.search(&query, &filter).await?;
        tracing::debug!(
            query = %query,
            hits = chunks.len(),
            source_filter = filter.source_ids.len(),
            "knowledge search"
        );

        Ok(
            DirectiveOutput::content(format_knowledge_section(&query, &chunks))
                .with_sources(chunk_sources(&chunks)),
        )
    }
}

/// One `knowledge` source per distinct chunk origin.
fn chunk_sources(chunks: &[Chunk]) -> Vec<Source> {
    dedup_sources_by_label(chunks.iter().map(Chunk::to_source).collect())
}
