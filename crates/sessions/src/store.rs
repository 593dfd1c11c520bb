//! Chat session store.
//!
//! Sessions live in memory behind a `RwLock` and are optionally persisted
//! to `sessions.json` under the configured state path by [`SessionStore::flush`].
//! Message history is append-only; the only in-place mutation is
//! [`SessionStore::update_message`], which never touches system messages.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Duration, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use pv_domain::config::SessionsConfig;
use pv_domain::error::{Error, Result};
use pv_domain::provenance::{Artifact, Source};
use pv_domain::trace::TraceEvent;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Messages
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageMeta {
    /// Message-local id; messages are addressed by id, never by index.
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub visible: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub human: Option<bool>,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artifacts: Option<Vec<Artifact>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub knowledge_sources: Option<Vec<Source>>,
}

impl MessageMeta {
    fn fresh() -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            visible: None,
            model: None,
            human: None,
            timestamp: Utc::now(),
            artifacts: None,
            knowledge_sources: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
    pub meta: MessageMeta,
}

impl ChatMessage {
    pub fn new(role: ChatRole, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            meta: MessageMeta::fresh(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(ChatRole::System, content)
    }

    /// A user message typed by a human.
    pub fn user(content: impl Into<String>) -> Self {
        let mut msg = Self::new(ChatRole::User, content);
        msg.meta.human = Some(true);
        msg
    }

    pub fn assistant(content: impl Into<String>, model: impl Into<String>) -> Self {
        let mut msg = Self::new(ChatRole::Assistant, content);
        msg.meta.model = Some(model.into());
        msg
    }

    pub fn id(&self) -> &str {
        &self.meta.id
    }
}

/// Partial update applied by [`SessionStore::update_message`].
#[derive(Debug, Clone, Default)]
pub struct MessagePatch {
    pub content: Option<String>,
    pub visible: Option<bool>,
    pub artifacts: Option<Vec<Artifact>>,
    pub knowledge_sources: Option<Vec<Source>>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Sessions
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Template state carried between turns.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionState {
    #[serde(default)]
    pub variables: HashMap<String, String>,
    /// Model used by the most recent turn.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
}

/// Caller identity captured when a session is created.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionContext {
    pub user_id: Option<String>,
    pub organisation_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub id: String,
    #[serde(default)]
    pub user_id: Option<String>,
    /// Immutable after creation.
    #[serde(default)]
    pub organisation_id: Option<String>,
    pub messages: Vec<ChatMessage>,
    #[serde(default)]
    pub state: SessionState,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub last_used_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

/// Partial update applied by [`SessionStore::set`].
#[derive(Debug, Clone, Default)]
pub struct SessionPatch {
    pub user_id: Option<String>,
    /// Must equal the stored value; any other value is a security violation.
    pub organisation_id: Option<String>,
    /// Must extend the stored history (existing ids kept, in order).
    pub messages: Option<Vec<ChatMessage>>,
    pub state: Option<SessionState>,
    pub expires_at: Option<DateTime<Utc>>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Session store
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct SessionStore {
    sessions_path: Option<PathBuf>,
    sessions: RwLock<HashMap<String, Session>>,
    ttl: Duration,
}

impl SessionStore {
    /// Build the store from config, loading `state_path/sessions/sessions.json`
    /// when a state path is configured.
    pub fn new(config: &SessionsConfig) -> Result<Self> {
        let ttl = seconds_saturating(config.ttl_secs);
        match &config.state_path {
            Some(state_path) => Self::load(state_path, ttl),
            None => Ok(Self::in_memory(ttl)),
        }
    }

    pub fn in_memory(ttl: Duration) -> Self {
        Self {
            sessions_path: None,
            sessions: RwLock::new(HashMap::new()),
            ttl,
        }
    }

    fn load(state_path: &Path, ttl: Duration) -> Result<Self> {
        let dir = state_path.join("sessions");
        std::fs::create_dir_all(&dir).map_err(Error::Io)?;

        let sessions_path = dir.join("sessions.json");
        let sessions: HashMap<String, Session> = if sessions_path.exists() {
            let raw = std::fs::read_to_string(&sessions_path).map_err(Error::Io)?;
            serde_json::from_str(&raw).unwrap_or_else(|e| {
                tracing::warn!(error = %e, "sessions.json unreadable, starting empty");
                HashMap::new()
            })
        } else {
            HashMap::new()
        };

        tracing::info!(
            sessions = sessions.len(),
            path = %sessions_path.display(),
            "session store loaded"
        );

        Ok(Self {
            sessions_path: Some(sessions_path),
            sessions: RwLock::new(sessions),
            ttl,
        })
    }

    /// Create a session.  A fresh UUID is minted when `id` is `None`.
    pub fn create(
        &self,
        id: Option<&str>,
        variables: HashMap<String, String>,
        context: SessionContext,
        messages: Vec<ChatMessage>,
    ) -> Result<Session> {
        let id = id
            .map(str::to_owned)
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        let now = Utc::now();
        let session = Session {
            id: id.clone(),
            user_id: context.user_id,
            organisation_id: context.organisation_id,
            messages,
            state: SessionState {
                variables,
                model: None,
            },
            created_at: now,
            updated_at: now,
            last_used_at: now,
            expires_at: self.expiry_from(now),
        };

        {
            let mut sessions = self.sessions.write();
            if sessions.contains_key(&id) {
                return Err(Error::Validation(format!("session {id} already exists")));
            }
            sessions.insert(id.clone(), session.clone());
        }

        TraceEvent::SessionCreated {
            session_id: id,
            organisation_id: session.organisation_id.clone(),
            messages: session.messages.len(),
        }
        .emit();

        Ok(session)
    }

    /// Look up a session and refresh its `last_used_at`.  A missing session
    /// is an expected outcome, not an error.
    pub fn get(&self, id: &str) -> Option<Session> {
        let mut sessions = self.sessions.write();
        let session = sessions.get_mut(id)?;
        session.last_used_at = Utc::now();
        Some(session.clone())
    }

    /// Apply a partial update.
    pub fn set(&self, id: &str, patch: SessionPatch) -> Result<Session> {
        let mut sessions = self.sessions.write();
        let session = sessions
            .get_mut(id)
            .ok_or_else(|| Error::not_found("session", id))?;

        if let Some(org) = &patch.organisation_id {
            if session.organisation_id.as_deref() != Some(org.as_str()) {
                tracing::error!(
                    session_id = %id,
                    "rejected attempt to change session organisation"
                );
                return Err(Error::SecurityViolation(format!(
                    "organisation of session {id} cannot be changed"
                )));
            }
        }

        if let Some(messages) = &patch.messages {
            ensure_extends(&session.messages, messages)?;
        }

        if let Some(user_id) = patch.user_id {
            session.user_id = Some(user_id);
        }
        if let Some(messages) = patch.messages {
            session.messages = messages;
        }
        if let Some(state) = patch.state {
            session.state = state;
        }
        self.touch(session);
        if let Some(expires_at) = patch.expires_at {
            session.expires_at = expires_at;
        }

        Ok(session.clone())
    }

    /// Append messages to a session's history.
    pub fn append_messages(&self, id: &str, messages: Vec<ChatMessage>) -> Result<Session> {
        let mut sessions = self.sessions.write();
        let session = sessions
            .get_mut(id)
            .ok_or_else(|| Error::not_found("session", id))?;
        session.messages.extend(messages);
        self.touch(session);
        Ok(session.clone())
    }

    /// Remove a session.  Returns `true` if it existed.
    pub fn drop_session(&self, id: &str) -> bool {
        let removed = self.sessions.write().remove(id).is_some();
        if removed {
            TraceEvent::SessionDropped {
                session_id: id.to_owned(),
            }
            .emit();
        }
        removed
    }

    /// Replace fields of one message, addressed by its id.
    ///
    /// When `expected_organisation_id` is given it must match the session's
    /// organisation.  System messages are immutable.
    pub fn update_message(
        &self,
        id: &str,
        message_id: &str,
        patch: MessagePatch,
        expected_organisation_id: Option<&str>,
    ) -> Result<Session> {
        let mut sessions = self.sessions.write();
        let session = sessions
            .get_mut(id)
            .ok_or_else(|| Error::not_found("session", id))?;

        if let Some(expected) = expected_organisation_id {
            if session.organisation_id.as_deref() != Some(expected) {
                return Err(Error::SecurityViolation(format!(
                    "session {id} does not belong to the caller's organisation"
                )));
            }
        }

        let message = session
            .messages
            .iter_mut()
            .find(|m| m.meta.id == message_id)
            .ok_or_else(|| Error::not_found("message", message_id))?;

        if message.role == ChatRole::System {
            return Err(Error::Validation(format!(
                "system message {message_id} cannot be updated"
            )));
        }

        if let Some(content) = patch.content {
            message.content = content;
        }
        if let Some(visible) = patch.visible {
            message.meta.visible = Some(visible);
        }
        if let Some(artifacts) = patch.artifacts {
            message.meta.artifacts = Some(artifacts);
        }
        if let Some(sources) = patch.knowledge_sources {
            message.meta.knowledge_sources = Some(sources);
        }
        self.touch(session);

        Ok(session.clone())
    }

    /// Remove sessions idle for longer than `max_age` or past `expires_at`.
    /// Every write pushes `expires_at` forward, so only idle sessions go.
    pub fn cleanup(&self, max_age: Duration) -> usize {
        self.cleanup_at(Utc::now(), max_age)
    }

    pub fn cleanup_at(&self, now: DateTime<Utc>, max_age: Duration) -> usize {
        let cutoff = now
            .checked_sub_signed(max_age)
            .unwrap_or(DateTime::<Utc>::MIN_UTC);
        let (removed, remaining) = {
            let mut sessions = self.sessions.write();
            let before = sessions.len();
            sessions.retain(|_, s| s.updated_at >= cutoff && s.expires_at > now);
            (before - sessions.len(), sessions.len())
        };

        if removed > 0 {
            TraceEvent::SessionsSwept { removed, remaining }.emit();
        }
        removed
    }

    /// Record a write: bump `updated_at` and slide `expires_at`.
    fn touch(&self, session: &mut Session) {
        let now = Utc::now();
        session.updated_at = now;
        session.expires_at = self.expiry_from(now);
    }

    fn expiry_from(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        now.checked_add_signed(self.ttl)
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }

    pub fn len(&self) -> usize {
        self.sessions.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.read().is_empty()
    }

    /// Persist the current session state to disk.  No-op for in-memory stores.
    pub async fn flush(&self) -> Result<()> {
        let Some(path) = &self.sessions_path else {
            return Ok(());
        };
        let json = {
            let sessions = self.sessions.read();
            serde_json::to_string_pretty(&*sessions)
                .map_err(|e| Error::Other(format!("serializing sessions: {e}")))?
        };
        tokio::fs::write(path, json).await.map_err(Error::Io)?;
        Ok(())
    }
}

/// Seconds from config as a chrono duration, clamped instead of overflowing.
pub fn seconds_saturating(secs: u64) -> Duration {
    i64::try_from(secs)
        .ok()
        .and_then(Duration::try_seconds)
        .unwrap_or(Duration::MAX)
}

/// Reject histories that drop or reorder existing messages.
fn ensure_extends(existing: &[ChatMessage], proposed: &[ChatMessage]) -> Result<()> {
    let keeps_prefix = proposed.len() >= existing.len()
        && existing
            .iter()
            .zip(proposed)
            .all(|(old, new)| old.meta.id == new.meta.id);
    if keeps_prefix {
        Ok(())
    } else {
        Err(Error::Validation(
            "message history is append-only; existing messages must be kept in order".into(),
        ))
    }
}
