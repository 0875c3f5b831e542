use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;
use tokio_util::sync::CancellationToken;

use docqa_core::config::{AppConfig, PromptConfig};
use docqa_core::error::{Error, Result};
use docqa_core::traits::{ChatModel, Embedder};
use docqa_core::types::{elapsed_ms, token_cost, Answer, DecisionOutcome, RetrievalResult, StageTimings, TokenUsage};
use docqa_vector::IndexSnapshot;

use crate::decider::Decider;
use crate::generator::Generator;
use crate::prompt::PromptBuilder;
use crate::retriever::Retriever;

#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct Pricing {
    pub embed_input_per_1m: f64,
    pub gen_input_per_1m: f64,
    pub gen_output_per_1m: f64,
}

impl Pricing {
    pub fn from_config(cfg: &AppConfig) -> Self {
        Self {
            embed_input_per_1m: cfg.embedding.price_input_per_1m,
            gen_input_per_1m: cfg.generation.price_input_per_1m,
            gen_output_per_1m: cfg.generation.price_output_per_1m,
        }
    }

    pub fn cost(&self, embed: TokenUsage, generation: TokenUsage) -> f64 {
        token_cost(embed.input_tokens, self.embed_input_per_1m)
            + token_cost(generation.input_tokens, self.gen_input_per_1m)
            + token_cost(generation.output_tokens, self.gen_output_per_1m)
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct UsageBreakdown {
    pub embedding: TokenUsage,
    pub generation: TokenUsage,
}

impl UsageBreakdown {
    pub fn total(&self) -> TokenUsage {
        let mut t = self.embedding;
        t.add(self.generation);
        t
    }
}

/// Everything observed while answering one question.
#[derive(Debug, Clone)]
pub struct AskOutcome {
    pub answer: Answer,
    /// Post-threshold results in rank order.
    pub retrieval: Vec<RetrievalResult>,
    pub decision: DecisionOutcome,
    pub timings: StageTimings,
    pub usage: UsageBreakdown,
    pub cost_usd: f64,
    /// 0 when the generator was not called.
    pub generation_attempts: u32,
    pub index_version: String,
}

pub struct Pipeline {
    retriever: Retriever,
    decider: Decider,
    prompt_builder: PromptBuilder,
    generator: Generator,
    top_k: usize,
    limits: PromptConfig,
    pricing: Pricing,
}

impl Pipeline {
    pub fn new(cfg: &AppConfig, embedder: Arc<dyn Embedder>, model: Arc<dyn ChatModel>) -> Self {
        Self {
            retriever: Retriever::new(embedder),
            decider: Decider::from(&cfg.retrieval),
            prompt_builder: PromptBuilder::new(cfg.prompt.max_prompt_chars),
            generator: Generator::new(model),
            top_k: cfg.retrieval.top_k,
            limits: cfg.prompt,
            pricing: Pricing::from_config(cfg),
        }
    }

    pub fn retriever(&self) -> &Retriever { &self.retriever }

    pub fn top_k(&self) -> usize { self.top_k }

    /// Trimmed question, or `Error::Validation` when empty or out of bounds.
    pub fn validate_question(&self, question: &str) -> Result<String> {
        let q = question.trim();
        let len = q.chars().count();
        if len == 0 {
            return Err(Error::validation("question must not be empty"));
        }
        if len < self.limits.min_question_chars {
            return Err(Error::validation(format!(
                "question must be at least {} characters",
                self.limits.min_question_chars
            )));
        }
        if len > self.limits.max_question_chars {
            return Err(Error::validation(format!(
                "question must be at most {} characters",
                self.limits.max_question_chars
            )));
        }
        Ok(q.to_string())
    }

    /// One retrieve-then-generate pass against `snapshot`. The generator is
    /// only called when the decision is grounded and context survives the
    /// prompt budget; otherwise the refusal answer is returned.
    pub async fn ask(&self, snapshot: &IndexSnapshot, question: &str, cancel: &CancellationToken) -> Result<AskOutcome> {
        let total = Instant::now();
        let question = self.validate_question(question)?;
        let mut timings = StageTimings::default();

        let retrieval = self
            .retriever
            .retrieve(snapshot, &question, self.top_k, self.decider.min_score, cancel)
            .await?;
        timings.embed_ms = retrieval.metrics.embed_ms;
        timings.search_ms = retrieval.metrics.search_ms;

        let start = Instant::now();
        let decision = self.decider.decide(&retrieval.candidates);
        timings.decide_ms = elapsed_ms(start);

        let usage = UsageBreakdown { embedding: retrieval.metrics.usage, generation: TokenUsage::default() };
        let mut outcome = AskOutcome {
            answer: Answer::refusal(),
            retrieval: retrieval.results,
            decision,
            timings,
            usage,
            cost_usd: 0.0,
            generation_attempts: 0,
            index_version: snapshot.version.clone(),
        };

        if outcome.decision.is_grounded() {
            let start = Instant::now();
            let prompt = self.prompt_builder.build(&question, &outcome.decision.retained);
            outcome.timings.prompt_ms = elapsed_ms(start);

            if prompt.blocks.is_empty() {
                tracing::warn!("no context fits the prompt budget; refusing");
            } else {
                let start = Instant::now();
                let generation = self.generator.generate(&prompt, cancel).await?;
                outcome.timings.generate_ms = elapsed_ms(start);
                outcome.usage.generation = generation.usage;
                outcome.generation_attempts = generation.attempts;
                outcome.answer = generation.answer;
            }
        }

        outcome.cost_usd = self.pricing.cost(outcome.usage.embedding, outcome.usage.generation);
        outcome.timings.total_ms = elapsed_ms(total);
        tracing::info!(
            version = %outcome.index_version,
            grounding = ?outcome.decision.grounding,
            reason = ?outcome.decision.reason,
            refused = outcome.answer.refused,
            sources = outcome.answer.sources.len(),
            latency_ms = outcome.timings.total_ms,
            "answered question"
        );
        Ok(outcome)
    }
}
