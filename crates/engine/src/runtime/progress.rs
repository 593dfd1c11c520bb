//! Live progress cache: the pollable partial result of a conversation's
//! in-flight turn.
//!
//! Entries are keyed by conversation and each sits behind its own lock, so
//! turns of unrelated conversations never contend.  Every entry remembers
//! the turn that started it; the delayed clear scheduled at finalization
//! only fires if that turn still owns the entry.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use serde::Serialize;

use pv_domain::provenance::{merge_artifacts, merge_sources, Artifact, Source};

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressMeta {
    pub tools_used: Vec<String>,
    pub sources: Vec<Source>,
    pub artifacts: Vec<Artifact>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LiveProgress {
    pub text: String,
    pub complete: bool,
    pub meta: ProgressMeta,
}

/// Partial update.  `text` and `complete` replace the stored values;
/// `meta` is merged into the stored meta.
#[derive(Debug, Clone, Default)]
pub struct ProgressUpdate {
    pub text: Option<String>,
    pub complete: Option<bool>,
    pub meta: Option<ProgressMeta>,
}

struct Entry {
    turn_id: Option<String>,
    progress: LiveProgress,
}

type Slot = Arc<Mutex<Entry>>;

#[derive(Default)]
pub struct LiveProgressCache {
    entries: RwLock<HashMap<String, Slot>>,
}

impl LiveProgressCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(&self, conversation_id: &str, update: ProgressUpdate) {
        let slot = self.slot(conversation_id);
        let mut entry = slot.lock();
        let progress = &mut entry.progress;

        if let Some(text) = update.text {
            progress.text = text;
        }
        if let Some(complete) = update.complete {
            progress.complete = complete;
        }
        if let Some(meta) = update.meta {
            for tool in meta.tools_used {
                if !progress.meta.tools_used.contains(&tool) {
                    progress.meta.tools_used.push(tool);
                }
            }
            merge_sources(&mut progress.meta.sources, meta.sources);
            merge_artifacts(&mut progress.meta.artifacts, meta.artifacts);
        }
    }

    pub fn read(&self, conversation_id: &str) -> Option<LiveProgress> {
        let slot = self.entries.read().get(conversation_id).cloned()?;
        let entry = slot.lock();
        Some(entry.progress.clone())
    }

    pub fn clear(&self, conversation_id: &str) {
        self.entries.write().remove(conversation_id);
    }

    /// Replace any previous entry with an empty, incomplete one.
    pub fn clear_and_start(&self, conversation_id: &str) {
        self.install(conversation_id, None);
    }

    /// Like [`clear_and_start`](Self::clear_and_start), tagging the entry
    /// with the turn that owns it.
    pub fn start_turn(&self, conversation_id: &str, turn_id: &str) {
        self.install(conversation_id, Some(turn_id.to_owned()));
    }

    /// Remove the entry only if `turn_id` still owns it.
    pub fn clear_if_turn(&self, conversation_id: &str, turn_id: &str) -> bool {
        let mut entries = self.entries.write();
        let owned = entries
            .get(conversation_id)
            .is_some_and(|slot| slot.lock().turn_id.as_deref() == Some(turn_id));
        if owned {
            entries.remove(conversation_id);
        }
        owned
    }

    /// Clear the entry after `delay` unless a newer turn took it over.
    pub fn schedule_clear(self: &Arc<Self>, conversation_id: &str, turn_id: &str, delay: Duration) {
        let cache = Arc::clone(self);
        let conversation_id = conversation_id.to_owned();
        let turn_id = turn_id.to_owned();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if cache.clear_if_turn(&conversation_id, &turn_id) {
                tracing::debug!(conversation_id = %conversation_id, "live progress cleared");
            }
        });
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    fn install(&self, conversation_id: &str, turn_id: Option<String>) {
        let entry = Entry {
            turn_id,
            progress: LiveProgress::default(),
        };
        self.entries
            .write()
            .insert(conversation_id.to_owned(), Arc::new(Mutex::new(entry)));
    }

    fn slot(&self, conversation_id: &str) -> Slot {
        if let Some(slot) = self.entries.read().get(conversation_id) {
            return Arc::clone(slot);
        }
        let mut entries = self.entries.write();
        Arc::clone(entries.entry(conversation_id.to_owned()).or_insert_with(|| {
            Arc::new(Mutex::new(Entry {
                turn_id: None,
                progress: LiveProgress::default(),
            }))
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meta(tools: &[&str], sources: &[&str]) -> ProgressMeta {
        ProgressMeta {
            tools_used: tools.iter().map(|t| t.to_string()).collect(),
            sources: sources.iter().map(|s| Source::new("knowledge", *s)).collect(),
            artifacts: Vec::new(),
        }
    }

    #[test]
    fn clear_and_start_yields_empty_incomplete_entry() {
        let cache = LiveProgressCache::new();
        cache.update(
            "c1",
            ProgressUpdate {
                text: Some("stale".into()),
                complete: Some(true),
                meta: Some(meta(&["t"], &[])),
            },
        );
        cache.clear_and_start("c1");
        assert_eq!(cache.read("c1"), Some(LiveProgress::default()));
    }

    #[test]
    fn text_replaces_and_meta_accumulates() {
        let cache = LiveProgressCache::new();
        cache.update(
            "c1",
            ProgressUpdate {
                text: Some("Hel".into()),
                meta: Some(meta(&["search"], &["Handbook"])),
                ..Default::default()
            },
        );
        cache.update(
            "c1",
            ProgressUpdate {
                text: Some("Hello".into()),
                meta: Some(meta(&["search", "fetch_url"], &["Handbook", "Wiki"])),
                ..Default::default()
            },
        );

        let progress = cache.read("c1").unwrap();
        assert_eq!(progress.text, "Hello");
        assert!(!progress.complete);
        assert_eq!(progress.meta.tools_used, vec!["search", "fetch_url"]);
        assert_eq!(progress.meta.sources.len(), 2);
    }

    #[test]
    fn update_without_text_keeps_text() {
        let cache = LiveProgressCache::new();
        cache.update(
            "c1",
            ProgressUpdate {
                text: Some("partial".into()),
                ..Default::default()
            },
        );
        cache.update(
            "c1",
            ProgressUpdate {
                complete: Some(true),
                ..Default::default()
            },
        );
        let progress = cache.read("c1").unwrap();
        assert_eq!(progress.text, "partial");
        assert!(progress.complete);
    }

    #[test]
    fn clear_if_turn_respects_ownership() {
        let cache = LiveProgressCache::new();
        cache.start_turn("c1", "turn-1");
        cache.start_turn("c1", "turn-2");
        assert!(!cache.clear_if_turn("c1", "turn-1"));
        assert!(cache.read("c1").is_some());
        assert!(cache.clear_if_turn("c1", "turn-2"));
        assert!(cache.read("c1").is_none());
    }

    #[test]
    fn serializes_camel_case() {
        let json = serde_json::to_value(LiveProgress::default()).unwrap();
        assert_eq!(json["complete"], false);
        assert!(json["meta"].get("toolsUsed").is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn scheduled_clear_fires_after_delay() {
        let cache = Arc::new(LiveProgressCache::new());
        cache.start_turn("c1", "turn-1");
        cache.schedule_clear("c1", "turn-1", Duration::from_secs(5));

        tokio::time::sleep(Duration::from_secs(4)).await;
        assert!(cache.read("c1").is_some());

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(cache.read("c1").is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn scheduled_clear_spares_newer_turn() {
        let cache = Arc::new(LiveProgressCache::new());
        cache.start_turn("c1", "turn-1");
        cache.schedule_clear("c1", "turn-1", Duration::from_secs(5));
        cache.start_turn("c1", "turn-2");

        tokio::time::sleep(Duration::from_secs(6)).await;
        assert!(cache.read("c1").is_some());
    }
}
