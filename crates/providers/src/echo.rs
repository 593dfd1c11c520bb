//! Local provider that streams the last user message back.
//!
//! Used by `palaver run` when no vendor provider is registered, so the
//! whole turn pipeline can be exercised offline.

use pv_domain::error::Result;
use pv_domain::stream::{BoxStream, StreamEvent, Usage};
use pv_domain::tool::Role;

use crate::traits::{ChatRequest, LlmProvider};

pub struct EchoProvider {
    id: String,
}

impl EchoProvider {
    pub const DEFAULT_MODEL: &'static str = "echo-1";

    pub fn new(id: impl Into<String>) -> Self {
        Self { id: id.into() }
    }
}

#[async_trait::async_trait]
impl LlmProvider for EchoProvider {
    async fn chat_stream(
        &self,
        req: ChatRequest,
    ) -> Result<BoxStream<'static, Result<StreamEvent>>> {
        let prompt_tokens: usize = req
            .messages
            .iter()
            .map(|m| m.content.text().unwrap_or_default().split_whitespace().count())
            .sum();
        let reply = req
            .messages
            .iter()
            .rev()
            .find(|m| m.role == Role::User)
            .and_then(|m| m.content.text())
            .unwrap_or_default()
            .to_string();
        let reply = if reply.trim().is_empty() {
            "(nothing to echo)".to_string()
        } else {
            reply
        };

        let stream = async_stream::stream! {
            let mut completion_tokens = 0u32;
            for word in reply.split_inclusive(' ') {
                completion_tokens += 1;
                yield Ok(StreamEvent::Token { text: word.to_string() });
            }
            let prompt_tokens = prompt_tokens as u32;
            yield Ok(StreamEvent::Done {
                usage: Some(Usage {
                    prompt_tokens,
                    completion_tokens,
                    total_tokens: prompt_tokens + completion_tokens,
                }),
                finish_reason: Some("stop".into()),
            });
        };

        Ok(Box::pin(stream))
    }

    fn provider_id(&self) -> &str {
        &self.id
    }

    fn default_model(&self) -> &str {
        Self::DEFAULT_MODEL
    }
}
