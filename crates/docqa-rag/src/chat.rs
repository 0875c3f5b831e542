//! Chat model implementations.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::json;
use tokio_util::sync::CancellationToken;

use docqa_core::chunker::count_tokens;
use docqa_core::config::{GenerationConfig, GenerationProviderKind};
use docqa_core::error::{Error, Result};
use docqa_core::retry::RetryPolicy;
use docqa_core::traits::{ChatMessage, ChatModel, Completion, Role};
use docqa_core::types::{TokenUsage, REFUSAL_TEXT};

use crate::prompt::unescape;

pub fn get_chat_model(cfg: &GenerationConfig, retry: RetryPolicy) -> Result<Arc<dyn ChatModel>> {
    match cfg.provider {
        GenerationProviderKind::Offline => {
            tracing::info!("using offline extractive chat model");
            Ok(Arc::new(OfflineChatModel::new()))
        }
        GenerationProviderKind::Http => {
            tracing::info!(model = %cfg.model, base_url = %cfg.base_url, "using HTTP chat model");
            Ok(Arc::new(HttpChatModel::from_config(cfg, retry)?))
        }
    }
}

/// OpenAI-compatible `/chat/completions` client in JSON-object mode.
pub struct HttpChatModel {
    client: Client,
    url: String,
    model: String,
    api_key: Option<String>,
    temperature: f32,
    max_output_tokens: u32,
    retry: RetryPolicy,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
    #[serde(default)]
    usage: Option<ChatUsage>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Deserialize)]
struct ChatUsage {
    #[serde(default)]
    prompt_tokens: u64,
    #[serde(default)]
    completion_tokens: u64,
}

impl HttpChatModel {
    pub fn from_config(cfg: &GenerationConfig, retry: RetryPolicy) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(cfg.timeout_secs))
            .build()
            .map_err(|e| Error::InvalidConfig(format!("http client: {e}")))?;
        let api_key = std::env::var(&cfg.api_key_env).ok().filter(|k| !k.trim().is_empty());
        if api_key.is_none() {
            tracing::warn!(env = %cfg.api_key_env, "chat API key not set; sending unauthenticated requests");
        }
        Ok(Self {
            client,
            url: format!("{}/chat/completions", cfg.base_url.trim_end_matches('/')),
            model: cfg.model.clone(),
            api_key,
            temperature: cfg.temperature,
            max_output_tokens: cfg.max_output_tokens,
            retry,
        })
    }

    async fn request(&self, messages: &[ChatMessage], attempt: u32) -> Result<Completion> {
        let body = json!({
            "model": self.model,
            "messages": messages,
            "temperature": self.temperature,
            "max_tokens": self.max_output_tokens,
            "response_format": { "type": "json_object" },
        });
        let mut req = self.client.post(&self.url).json(&body);
        if let Some(key) = &self.api_key {
            req = req.bearer_auth(key);
        }
        tracing::debug!(url = %self.url, model = %self.model, attempt, "chat request");

        let response = req.send().await.map_err(|e| {
            Error::generation(format!("chat request failed: {e}"), e.is_timeout() || e.is_connect() || e.is_request())
        })?;
        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| Error::generation(format!("failed to read chat response: {e}"), true))?;
        if !status.is_success() {
            let transient = status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error();
            let snippet: String = text.chars().take(200).collect();
            return Err(Error::generation(format!("chat service returned {status}: {snippet}"), transient));
        }
        let parsed: ChatResponse = serde_json::from_str(&text)
            .map_err(|e| Error::generation(format!("malformed chat response: {e}"), false))?;
        let content = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .unwrap_or_default();
        let usage = parsed.usage.map_or_else(TokenUsage::default, |u| TokenUsage::new(u.prompt_tokens, u.completion_tokens));
        Ok(Completion { text: content, usage })
    }
}

#[async_trait]
impl ChatModel for HttpChatModel {
    fn model_id(&self) -> &str { &self.model }

    async fn complete(&self, messages: &[ChatMessage], cancel: &CancellationToken) -> Result<Completion> {
        self.retry.run("chat", cancel, |attempt| self.request(messages, attempt)).await
    }
}

/// Deterministic extractive model: answers with the first sentence of the
/// first context block and cites that block. With no context it refuses.
#[derive(Default)]
pub struct OfflineChatModel;

impl OfflineChatModel {
    pub fn new() -> Self { Self }

    fn first_block(user: &str) -> Option<(String, String)> {
        let start = user.find("<context id=\"")? + "<context id=\"".len();
        let id_end = start + user[start..].find('"')?;
        let body_start = id_end + user[id_end..].find(">\n")? + 2;
        let body_end = body_start + user[body_start..].find("\n</context>")?;
        Some((unescape(&user[start..id_end]), unescape(&user[body_start..body_end])))
    }

    fn first_sentence(text: &str) -> String {
        let flat = text.split_whitespace().collect::<Vec<_>>().join(" ");
        let end = flat.find(". ").map_or(flat.len(), |i| i + 1);
        flat[..end].chars().take(300).collect()
    }
}

#[async_trait]
impl ChatModel for OfflineChatModel {
    fn model_id(&self) -> &str { "offline-extractive" }

    async fn complete(&self, messages: &[ChatMessage], cancel: &CancellationToken) -> Result<Completion> {
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        let block = messages.iter().filter(|m| m.role == Role::User).find_map(|m| Self::first_block(&m.content));
        let reply = match block {
            Some((id, body)) => json!({ "answer": Self::first_sentence(&body), "sources": [id] }),
            None => json!({ "answer": REFUSAL_TEXT, "sources": [] }),
        };
        let text = reply.to_string();
        let input: usize = messages.iter().map(|m| count_tokens(&m.content)).sum();
        let usage = TokenUsage::new(input as u64, count_tokens(&text) as u64);
        Ok(Completion { text, usage })
    }
}
