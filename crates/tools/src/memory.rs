//! Per-conversation provenance recorded by tool executions.
//!
//! Writes are additive; several tool calls in one step may record
//! concurrently, so each conversation has its own lock.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use serde::Serialize;

use pv_domain::provenance::{Artifact, Source};

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolMemoryEntry {
    pub used_sources: Vec<Source>,
    pub used_artifacts: Vec<Artifact>,
}

type Bucket = Arc<Mutex<BTreeMap<String, ToolMemoryEntry>>>;

#[derive(Default)]
pub struct ToolMemory {
    conversations: RwLock<HashMap<String, Bucket>>,
}

impl ToolMemory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append provenance for `tool_name`, creating the bucket if needed.
    pub fn record(
        &self,
        conversation_id: &str,
        tool_name: &str,
        sources: Vec<Source>,
        artifacts: Vec<Artifact>,
    ) {
        let bucket = self.bucket(conversation_id);
        let mut entries = bucket.lock();
        let entry = entries.entry(tool_name.to_owned()).or_default();
        entry.used_sources.extend(sources);
        entry.used_artifacts.extend(artifacts);
    }

    /// Snapshot of everything recorded for a conversation, keyed by tool.
    pub fn read(&self, conversation_id: &str) -> BTreeMap<String, ToolMemoryEntry> {
        let bucket = self.conversations.read().get(conversation_id).cloned();
        match bucket {
            Some(bucket) => bucket.lock().clone(),
            None => BTreeMap::new(),
        }
    }

    /// Forget a conversation's records.  Called at turn start so provenance
    /// never leaks into a later turn.
    pub fn clear(&self, conversation_id: &str) {
        self.conversations.write().remove(conversation_id);
    }

    /// Remove and return a conversation's records.  Called when a turn
    /// finalizes so finished conversations hold no memory.
    pub fn take(&self, conversation_id: &str) -> BTreeMap<String, ToolMemoryEntry> {
        let bucket = self.conversations.write().remove(conversation_id);
        match bucket {
            Some(bucket) => std::mem::take(&mut *bucket.lock()),
            None => BTreeMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.conversations.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.conversations.read().is_empty()
    }

    fn bucket(&self, conversation_id: &str) -> Bucket {
        if let Some(bucket) = self.conversations.read().get(conversation_id) {
            return Arc::clone(bucket);
        }
        let mut conversations = self.conversations.write();
        Arc::clone(conversations.entry(conversation_id.to_owned()).or_default())
    }
}
