use std::collections::HashSet;
use std::sync::Arc;

use serde::Deserialize;
use tokio_util::sync::CancellationToken;

use docqa_core::error::{Error, Result};
use docqa_core::traits::{ChatMessage, ChatModel};
use docqa_core::types::{Answer, RetrievalResult, TokenUsage, REFUSAL_TEXT};

use crate::prompt::Prompt;

/// Appended after a reply that failed validation.
pub const CORRECTIVE_INSTRUCTION: &str = "IMPORTANT: your previous reply was rejected. Return ONLY a valid JSON object \
     with exactly two keys: \"answer\" (non-empty string) and \"sources\" (array of context ids). \
     No markdown, no prose, no code fences, no extra keys.";

const MAX_ATTEMPTS: u32 = 2;

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ModelAnswer {
    answer: String,
    sources: Vec<String>,
}

/// Validate a raw model reply against the answer schema.
fn parse_reply(text: &str) -> std::result::Result<ModelAnswer, String> {
    let parsed: ModelAnswer = serde_json::from_str(text.trim()).map_err(|e| e.to_string())?;
    if parsed.answer.trim().is_empty() {
        return Err("\"answer\" is empty".to_string());
    }
    Ok(parsed)
}

#[derive(Debug, Clone)]
pub struct Generation {
    pub answer: Answer,
    pub usage: TokenUsage,
    pub attempts: u32,
    /// Cited ids that did not match any prompt block.
    pub dropped_citations: Vec<String>,
}

pub struct Generator {
    model: Arc<dyn ChatModel>,
}

impl Generator {
    pub fn new(model: Arc<dyn ChatModel>) -> Self { Self { model } }

    pub fn model_id(&self) -> &str { self.model.model_id() }

    /// Ask the model, validating its JSON reply. One corrective retry is made
    /// on a schema failure; a second failure is `Error::GenerationFormat`.
    pub async fn generate(&self, prompt: &Prompt, cancel: &CancellationToken) -> Result<Generation> {
        let mut messages = prompt.messages();
        let mut usage = TokenUsage::default();
        let mut last_reason = String::new();

        for attempt in 1..=MAX_ATTEMPTS {
            let completion = self.model.complete(&messages, cancel).await?;
            usage.add(completion.usage);
            match parse_reply(&completion.text) {
                Ok(reply) => {
                    let (answer, dropped) = resolve(prompt, reply);
                    return Ok(Generation { answer, usage, attempts: attempt, dropped_citations: dropped });
                }
                Err(reason) => {
                    tracing::warn!(attempt, model = %self.model.model_id(), %reason, "model reply failed validation");
                    last_reason = reason;
                    messages.push(ChatMessage::user(CORRECTIVE_INSTRUCTION));
                }
            }
        }
        Err(Error::GenerationFormat { attempts: MAX_ATTEMPTS, reason: last_reason })
    }
}

/// Map a validated reply onto the prompt's blocks. Unknown citations are
/// dropped; an answer left with no valid citation is treated as a refusal.
fn resolve(prompt: &Prompt, reply: ModelAnswer) -> (Answer, Vec<String>) {
    let text = reply.answer.trim().to_string();
    if text == REFUSAL_TEXT {
        return (Answer::refusal(), Vec::new());
    }
    let mut seen = HashSet::new();
    let mut sources: Vec<RetrievalResult> = Vec::new();
    let mut dropped = Vec::new();
    for id in reply.sources {
        let id = id.trim().to_string();
        if !seen.insert(id.clone()) {
            continue;
        }
        match prompt.find_block(&id) {
            Some(block) => sources.push(block.clone()),
            None => dropped.push(id),
        }
    }
    if !dropped.is_empty() {
        tracing::warn!(?dropped, "dropped citations not present in the prompt");
    }
    if sources.is_empty() {
        tracing::warn!("answer cites no prompt context; refusing");
        return (Answer::refusal(), dropped);
    }
    (Answer { text, sources, refused: false }, dropped)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_reply_is_strict() {
        assert!(parse_reply(r#"{"answer":"x","sources":[]}"#).is_ok());
        assert!(parse_reply("  {\"answer\":\"x\",\"sources\":[\"a:0\"]}\n").is_ok());
        assert!(parse_reply(r#"{"answer":"x","sources":[],"confidence":1}"#).is_err(), "extra key");
        assert!(parse_reply(r#"{"answer":"x"}"#).is_err(), "missing key");
        assert!(parse_reply(r#"{"answer":"  ","sources":[]}"#).is_err(), "empty answer");
        assert!(parse_reply("```json\n{\"answer\":\"x\",\"sources\":[]}\n```").is_err(), "fenced");
        assert!(parse_reply(r#"{"answer":"x","sources":"a:0"}"#).is_err(), "sources not an array");
    }
}
