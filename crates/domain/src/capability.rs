//! Capabilities consumed from external collaborators.
//!
//! The engine never talks to vector stores, object storage, the web or
//! transcription services directly; it goes through these traits so the
//! hosting application can plug in real backends and tests can plug in
//! doubles.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::provenance::Source;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Knowledge search
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Filters applied to an embed-and-search call.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchFilter {
    /// Tenant scope. Backends must never return chunks outside it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub organisation_id: Option<String>,
    /// Restrict the search to these knowledge sources. Empty = all.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub source_ids: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<u32>,
    /// Minimum similarity (0.0-1.0).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub threshold: Option<f64>,
}

/// A retrievable unit of previously-ingested knowledge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Chunk {
    pub id: String,
    pub source_id: String,
    pub source_label: String,
    pub content: String,
    #[serde(default)]
    pub score: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

impl Chunk {
    /// The `knowledge` source this chunk cites.
    pub fn to_source(&self) -> Source {
        let source = Source::new("knowledge", &self.source_label).with_id(&self.source_id);
        match &self.url {
            Some(url) => source.with_url(url),
            None => source,
        }
    }
}

#[async_trait]
pub trait KnowledgeSearch: Send + Sync {
    async fn search(&self, query: &str, filter: &SearchFilter) -> Result<Vec<Chunk>>;
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Files
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone)]
pub struct StoredFile {
    pub id: String,
    pub name: String,
    pub mime_type: String,
    pub bytes: Vec<u8>,
    pub url: Option<String>,
}

impl StoredFile {
    pub fn is_audio(&self) -> bool {
        self.mime_type.starts_with("audio/")
    }
}

#[async_trait]
pub trait FileStore: Send + Sync {
    /// Fetch a file. Implementations must reject files that do not belong
    /// to `organisation_id` with a `NotFound` error.
    async fn fetch_file(
        &self,
        id: &str,
        bucket: &str,
        organisation_id: Option<&str>,
    ) -> Result<StoredFile>;
}

#[async_trait]
pub trait Transcriber: Send + Sync {
    async fn transcribe(&self, file: &StoredFile) -> Result<String>;
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Web
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[async_trait]
pub trait UrlFetcher: Send + Sync {
    /// Fetch a page and return a markdown rendition of its readable text.
    async fn fetch_markdown(&self, url: &str) -> Result<String>;
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Prompt snippets
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snippet {
    pub id: String,
    pub name: String,
    pub content: String,
}

/// How a snippet is addressed from a template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SnippetRef {
    Id(String),
    Name(String),
}

#[async_trait]
pub trait SnippetStore: Send + Sync {
    async fn fetch_snippet(
        &self,
        reference: &SnippetRef,
        organisation_id: Option<&str>,
    ) -> Result<Snippet>;
}
