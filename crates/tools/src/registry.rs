//! Tool registry.
//!
//! Static tools are registered at startup and live for the whole process.
//! Dynamic tools belong to one conversation, are stamped when registered,
//! and are purged by [`ToolRegistry::sweep_expired`] once older than the TTL
//! whether or not the conversation is still active.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use parking_lot::RwLock;

use pv_domain::error::{Error, Result};
use pv_domain::tool::ToolDefinition;
use pv_domain::trace::TraceEvent;

use crate::tool::Tool;

struct DynamicEntry {
    tool: Arc<dyn Tool>,
    registered_at: DateTime<Utc>,
}

type ConversationTools = Arc<RwLock<HashMap<String, DynamicEntry>>>;

pub struct ToolRegistry {
    static_tools: RwLock<HashMap<String, Arc<dyn Tool>>>,
    dynamic: RwLock<HashMap<String, ConversationTools>>,
    ttl: Duration,
}

impl ToolRegistry {
    pub fn new(dynamic_ttl: Duration) -> Self {
        Self {
            static_tools: RwLock::new(HashMap::new()),
            dynamic: RwLock::new(HashMap::new()),
            ttl: dynamic_ttl,
        }
    }

    /// A collision-resistant name for a dynamic tool: `prefix_<8 hex>`.
    pub fn dynamic_name(prefix: &str) -> String {
        let suffix = uuid::Uuid::new_v4().simple().to_string();
        format!("{prefix}_{}", &suffix[..8])
    }

    pub fn register_static(&self, name: impl Into<String>, tool: Arc<dyn Tool>) {
        let name = name.into();
        tracing::debug!(tool = %name, "static tool registered");
        self.static_tools.write().insert(name, tool);
    }

    pub fn register_dynamic(&self, conversation_id: &str, name: impl Into<String>, tool: Arc<dyn Tool>) {
        self.register_dynamic_at(conversation_id, name, tool, Utc::now());
    }

    pub fn register_dynamic_at(
        &self,
        conversation_id: &str,
        name: impl Into<String>,
        tool: Arc<dyn Tool>,
        registered_at: DateTime<Utc>,
    ) {
        let name = name.into();
        let tools = self.conversation(conversation_id);
        tools.write().insert(
            name.clone(),
            DynamicEntry {
                tool,
                registered_at,
            },
        );

        TraceEvent::DynamicToolRegistered {
            conversation_id: conversation_id.to_owned(),
            tool_name: name,
        }
        .emit();
    }

    /// Remove a dynamic tool (`conversation_id` given) or a static one.
    /// Returns `true` if something was removed.
    pub fn unregister(&self, conversation_id: Option<&str>, name: &str) -> bool {
        match conversation_id {
            Some(conv) => {
                let tools = self.dynamic.read().get(conv).cloned();
                tools.is_some_and(|t| t.write().remove(name).is_some())
            }
            None => self.static_tools.write().remove(name).is_some(),
        }
    }

    /// Resolve tool names for a turn.  Dynamic tools of `conversation_id`
    /// shadow static tools of the same name.  An empty list yields an empty
    /// map; an unknown or expired name is `NotFound`.
    pub fn resolve(
        &self,
        conversation_id: Option<&str>,
        names: &[String],
    ) -> Result<HashMap<String, Arc<dyn Tool>>> {
        self.resolve_at(conversation_id, names, Utc::now())
    }

    pub fn resolve_at(
        &self,
        conversation_id: Option<&str>,
        names: &[String],
        now: DateTime<Utc>,
    ) -> Result<HashMap<String, Arc<dyn Tool>>> {
        let mut resolved = HashMap::with_capacity(names.len());
        if names.is_empty() {
            return Ok(resolved);
        }

        let conversation_tools = conversation_id.and_then(|c| self.dynamic.read().get(c).cloned());
        let static_tools = self.static_tools.read();

        for name in names {
            let dynamic = conversation_tools.as_ref().and_then(|tools| {
                tools
                    .read()
                    .get(name)
                    .filter(|e| now - e.registered_at <= self.ttl)
                    .map(|e| Arc::clone(&e.tool))
            });
            let tool = dynamic
                .or_else(|| static_tools.get(name).cloned())
                .ok_or_else(|| Error::not_found("tool", name))?;
            resolved.insert(name.clone(), tool);
        }

        Ok(resolved)
    }

    /// Remove every dynamic tool older than the TTL, across all conversations.
    pub fn sweep_expired(&self) -> usize {
        self.sweep_expired_at(Utc::now())
    }

    pub fn sweep_expired_at(&self, now: DateTime<Utc>) -> usize {
        let mut removed = 0;
        let mut dynamic = self.dynamic.write();
        dynamic.retain(|_, tools| {
            let mut tools = tools.write();
            let before = tools.len();
            tools.retain(|_, e| now - e.registered_at <= self.ttl);
            removed += before - tools.len();
            !tools.is_empty()
        });
        drop(dynamic);

        if removed > 0 {
            TraceEvent::DynamicToolsSwept { removed }.emit();
        }
        removed
    }

    pub fn static_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.static_tools.read().keys().cloned().collect();
        names.sort();
        names
    }

    pub fn dynamic_names(&self, conversation_id: &str) -> Vec<String> {
        let Some(tools) = self.dynamic.read().get(conversation_id).cloned() else {
            return Vec::new();
        };
        let mut names: Vec<String> = tools.read().keys().cloned().collect();
        names.sort();
        names
    }

    fn conversation(&self, conversation_id: &str) -> ConversationTools {
        if let Some(tools) = self.dynamic.read().get(conversation_id) {
            return Arc::clone(tools);
        }
        let mut dynamic = self.dynamic.write();
        Arc::clone(dynamic.entry(conversation_id.to_owned()).or_default())
    }
}

/// Definitions exposed to the model for a resolved tool set, sorted by name.
pub fn tool_definitions(tools: &HashMap<String, Arc<dyn Tool>>) -> Vec<ToolDefinition> {
    let mut defs: Vec<ToolDefinition> = tools
        .iter()
        .map(|(name, tool)| ToolDefinition {
            name: name.clone(),
            description: tool.description(),
            parameters: tool.parameters(),
        })
        .collect();
    defs.sort_by(|a, b| a.name.cmp(&b.name));
    defs
}
