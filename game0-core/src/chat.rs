use futures_util::StreamExt;
use secrecy::{ExposeSecret, SecretString};

use crate::config::Config;
use crate::error::{CoreResult, Game0Error};
use crate::http_client::{HttpClient, RequestCtx};
use crate::model::{AssistantTurn, Conversation, GenerationRequest};
use crate::normalizer::normalize_conversation;
use crate::stream::FragmentStream;

/// Streams planning turns from the chat endpoint.
#[derive(Debug, Clone)]
pub struct ChatClient {
    http: HttpClient,
    url: String,
    api_key: Option<SecretString>,
    chat_id: String,
}

impl ChatClient {
    pub fn new(http: HttpClient, url: impl Into<String>, api_key: Option<SecretString>) -> Self {
        Self {
            http,
            url: url.into(),
            api_key,
            chat_id: uuid::Uuid::new_v4().to_string(),
        }
    }

    pub fn from_config(cfg: &Config, http: HttpClient) -> Self {
        let key = cfg
            .endpoints
            .api_key_env
            .as_deref()
            .and_then(|var| std::env::var(var).ok())
            .map(SecretString::from);
        Self::new(http, cfg.endpoints.chat_url.clone(), key)
    }

    pub fn chat_id(&self) -> &str {
        &self.chat_id
    }

    /// Send the conversation and stream the assistant reply, calling `on_delta`
    /// for each fragment. The returned turn carries a fresh id.
    pub async fn complete_turn<F>(
        &self,
        conversation: Conversation,
        system: Option<String>,
        mut on_delta: F,
    ) -> CoreResult<AssistantTurn>
    where
        F: FnMut(&str) + Send,
    {
        let turn_id = uuid::Uuid::new_v4().to_string();
        let request = GenerationRequest {
            messages: normalize_conversation(conversation),
            system,
            chat_id: Some(self.chat_id.clone()),
        };
        if request.messages.is_empty() {
            return Err(Game0Error::Validation("conversation has no messages".into()));
        }

        let auth = self
            .api_key
            .as_ref()
            .map(|k| format!("Bearer {}", k.expose_secret()));
        let headers: Vec<(&str, &str)> = auth
            .as_deref()
            .map(|v| vec![("Authorization", v)])
            .unwrap_or_default();
        let ctx = RequestCtx {
            request_id: Some(&turn_id),
            turn_id: Some(&turn_id),
            idempotency_key: None,
        };

        let response = self.http.post_stream(&self.url, &request, &headers, &ctx).await?;
        let mut fragments = FragmentStream::from_response(response);
        let mut text = String::new();
        while let Some(fragment) = fragments.next().await {
            let fragment = fragment?;
            on_delta(&fragment);
            text.push_str(&fragment);
        }

        if text.trim().is_empty() {
            return Err(Game0Error::Validation("assistant reply was empty".into()));
        }
        tracing::debug!(turn.id = %turn_id, bytes = text.len(), "planning turn completed");
        Ok(AssistantTurn { id: turn_id, text })
    }
}
