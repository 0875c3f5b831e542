//! Retrieval, grounding decision, prompt construction and generation.

pub mod chat;
pub mod decider;
pub mod generator;
pub mod pipeline;
pub mod prompt;
pub mod retriever;

pub use chat::{get_chat_model, HttpChatModel, OfflineChatModel};
pub use decider::{decide, Decider};
pub use generator::{Generation, Generator};
pub use pipeline::{AskOutcome, Pipeline, Pricing, UsageBreakdown};
pub use prompt::{Prompt, PromptBuilder};
pub use retriever::{Retrieval, Retriever};
