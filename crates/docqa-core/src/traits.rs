use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::error::Result;
use crate::types::TokenUsage;

/// Text to fixed-dimension vectors. Output order matches input order.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Stable identifier for the model/version; scores are only comparable
    /// between vectors produced under the same id.
    fn embedder_id(&self) -> &str;
    fn dim(&self) -> usize;
    async fn embed(&self, texts: &[String], cancel: &CancellationToken) -> Result<Embeddings>;
}

#[derive(Debug, Clone, Default)]
pub struct Embeddings {
    pub vectors: Vec<Vec<f32>>,
    pub usage: TokenUsage,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self { Self { role: Role::System, content: content.into() } }
    pub fn user(content: impl Into<String>) -> Self { Self { role: Role::User, content: content.into() } }
}

#[derive(Debug, Clone, Default)]
pub struct Completion {
    pub text: String,
    pub usage: TokenUsage,
}

/// Chat model constrained to reply with a single JSON object.
#[async_trait]
pub trait ChatModel: Send + Sync {
    fn model_id(&self) -> &str;
    async fn complete(&self, messages: &[ChatMessage], cancel: &CancellationToken) -> Result<Completion>;
}
