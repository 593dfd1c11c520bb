//! Provenance records attached to generated turns.
//!
//! A [`Source`] identifies where cited content came from (a knowledge
//! chunk, a file, a web page); an [`Artifact`] identifies media produced
//! during the turn.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Source {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub label: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external: Option<bool>,
}

impl Source {
    pub fn new(kind: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            id: None,
            label: label.into(),
            url: None,
            external: None,
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    pub fn external(mut self) -> Self {
        self.external = Some(true);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Artifact {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external: Option<bool>,
}

/// Collapse sources sharing a `label`, keeping the first occurrence and
/// the original relative order.
pub fn dedup_sources_by_label(sources: Vec<Source>) -> Vec<Source> {
    let mut seen = HashSet::new();
    sources
        .into_iter()
        .filter(|s| seen.insert(s.label.clone()))
        .collect()
}

/// Append `incoming` to `acc`, skipping labels already present.
pub fn merge_sources(acc: &mut Vec<Source>, incoming: impl IntoIterator<Item = Source>) {
    for source in incoming {
        if !acc.iter().any(|s| s.label == source.label) {
            acc.push(source);
        }
    }
}

/// Append `incoming` to `acc`, skipping exact duplicates.
pub fn merge_artifacts(acc: &mut Vec<Artifact>, incoming: impl IntoIterator<Item = Artifact>) {
    for artifact in incoming {
        if !acc.contains(&artifact) {
            acc.push(artifact);
        }
    }
}
