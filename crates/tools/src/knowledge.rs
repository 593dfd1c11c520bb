//! Dynamic knowledge-search tool.
//!
//! Created per turn when the caller pre-selects knowledge sources; the
//! source filter is baked into the tool so the model only supplies a query.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};

use pv_domain::capability::{Chunk, KnowledgeSearch, SearchFilter};
use pv_domain::error::Result;
use pv_domain::provenance::dedup_sources_by_label;

use crate::tool::{required_str, Tool, ToolContext};

/// Name prefix for registered instances; the registry appends a suffix.
pub const KNOWLEDGE_TOOL_PREFIX: &str = "search_knowledge";

pub struct KnowledgeSearchTool {
    search: Arc<dyn KnowledgeSearch>,
    source_ids: Vec<String>,
    limit: u32,
    threshold: f64,
}

impl KnowledgeSearchTool {
    pub fn new(
        search: Arc<dyn KnowledgeSearch>,
        source_ids: Vec<String>,
        limit: u32,
        threshold: f64,
    ) -> Self {
        Self {
            search,
            source_ids,
            limit,
            threshold,
        }
    }
}

#[async_trait]
impl Tool for KnowledgeSearchTool {
    fn description(&self) -> String {
        if self.source_ids.is_empty() {
            "Search the organisation's knowledge base. Returns the most relevant passages.".into()
        } else {
            format!(
                "Search the {} knowledge source(s) selected for this conversation. \
                 Returns the most relevant passages.",
                self.source_ids.len()
            )
        }
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "required": ["query"],
            "properties": {
                "query": { "type": "string", "description": "What to look for" }
            }
        })
    }

    async fn execute(&self, args: Value, ctx: &ToolContext) -> Result<String> {
        let query = required_str(&args, &ctx.tool_name, "query")?;
        let filter = SearchFilter {
            organisation_id: ctx.organisation_id.clone(),
            source_ids: self.source_ids.clone(),
            limit: Some(self.limit),
            threshold: Some(self.threshold),
        };

        let chunks = self.search.search(query, &filter).await?;
        tracing::debug!(
            conversation_id = %ctx.conversation_id,
            tool = %ctx.tool_name,
            hits = chunks.len(),
            "knowledge tool search"
        );

        let sources = dedup_sources_by_label(chunks.iter().map(Chunk::to_source).collect());
        ctx.memory
            .record(&ctx.conversation_id, &ctx.tool_name, sources, Vec::new());

        Ok(render_chunks(&chunks))
    }
}

fn render_chunks(chunks: &[Chunk]) -> String {
    if chunks.is_empty() {
        return "No matching passages found.".into();
    }
    chunks
        .iter()
        .enumerate()
        .map(|(i, c)| format!("[{}] {}\n{}", i + 1, c.source_label, c.content))
        .collect::<Vec<_>>()
        .join("\n\n")
}

#[cfg(test)]
mod tests {
    use parking_lot::Mutex;

    use super::*;
    use crate::memory::ToolMemory;

    #[derive(Default)]
    struct FakeSearch {
        seen: Mutex<Option<SearchFilter>>,
    }

    #[async_trait]
    impl KnowledgeSearch for FakeSearch {
        async fn search(&self, _query: &str, filter: &SearchFilter) -> Result<Vec<Chunk>> {
            *self.seen.lock() = Some(filter.clone());
            Ok(vec![
                Chunk {
                    id: "1".into(),
                    source_id: "s1".into(),
                    source_label: "Policies".into(),
                    content: "Leave is 25 days.".into(),
                    score: 0.9,
                    url: None,
                },
                Chunk {
                    id: "2".into(),
                    source_id: "s1".into(),
                    source_label: "Policies".into(),
                    content: "Carry-over is 5 days.".into(),
                    score: 0.8,
                    url: None,
                },
            ])
        }
    }

    fn ctx(memory: Arc<ToolMemory>) -> ToolContext {
        ToolContext {
            conversation_id: "c1".into(),
            tool_name: "search_knowledge_abcd1234".into(),
            organisation_id: Some("org-a".into()),
            user_id: None,
            memory,
        }
    }

    #[tokio::test]
    async fn searches_selected_sources_and_records_provenance() {
        let search = Arc::new(FakeSearch::default());
        let tool = KnowledgeSearchTool::new(search.clone(), vec!["s1".into()], 4, 0.5);
        let memory = Arc::new(ToolMemory::new());

        let out = tool
            .execute(json!({ "query": "leave" }), &ctx(memory.clone()))
            .await
            .unwrap();
        assert!(out.starts_with("[1] Policies\nLeave is 25 days."));

        let filter = search.seen.lock().clone().unwrap();
        assert_eq!(filter.source_ids, vec!["s1"]);
        assert_eq!(filter.organisation_id.as_deref(), Some("org-a"));
        assert_eq!(filter.limit, Some(4));

        let recorded = memory.read("c1");
        let entry = &recorded["search_knowledge_abcd1234"];
        assert_eq!(entry.used_sources.len(), 1);
        assert_eq!(entry.used_sources[0].label, "Policies");
    }

    #[tokio::test]
    async fn missing_query_fails() {
        let tool = KnowledgeSearchTool::new(Arc::new(FakeSearch::default()), vec![], 4, 0.5);
        let memory = Arc::new(ToolMemory::new());
        assert!(tool.execute(json!({}), &ctx(memory)).await.is_err());
    }
}
