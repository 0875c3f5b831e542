//! Application configuration and path helpers.
//!
//! Figment merges built-in defaults, `config.toml`, `config.<env>.toml` and
//! `APP_*` env vars (`__` separates nesting: `APP_RETRIEVAL__TOP_K=8`).

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

pub struct Config {
    figment: Figment,
    base_dir: PathBuf,
}

impl Config {
    /// Load configuration relative to the current working directory.
    pub fn load() -> Result<Self> {
        let cwd = env::current_dir().map_err(|e| Error::io(".", e))?;
        Self::load_from(&cwd)
    }

    pub fn load_from(base_dir: &Path) -> Result<Self> {
        let env_name = env_name();
        let mut figment = Figment::from(Serialized::defaults(AppConfig::default()))
            .merge(Toml::file(base_dir.join("config.toml")));
        match env_name.as_str() {
            "dev" | "development" => figment = figment.merge(Toml::file(base_dir.join("config.dev.toml"))),
            "prod" | "production" => figment = figment.merge(Toml::file(base_dir.join("config.prod.toml"))),
            "test" | "testing" => figment = figment.merge(Toml::file(base_dir.join("config.test.toml"))),
            _ => {}
        }
        figment = figment.merge(Env::prefixed("APP_").split("__"));

        Ok(Self { figment, base_dir: base_dir.to_path_buf() })
    }

    pub fn get<T>(&self, key: &str) -> Result<T>
    where
        T: serde::de::DeserializeOwned,
    {
        self.figment
            .extract_inner(key)
            .map_err(|e| Error::InvalidConfig(format!("Failed to get '{key}': {e}")))
    }

    /// Extract, resolve paths and validate the full application config.
    pub fn settings(&self) -> Result<AppConfig> {
        let mut cfg: AppConfig = self
            .figment
            .extract()
            .map_err(|e| Error::InvalidConfig(e.to_string()))?;
        cfg.data.docs_dir = resolve_with_base(&self.base_dir, cfg.data.docs_dir.to_string_lossy());
        cfg.data.index_dir = resolve_with_base(&self.base_dir, cfg.data.index_dir.to_string_lossy());
        cfg.validate()?;
        Ok(cfg)
    }
}

fn env_name() -> String { env::var("RUST_ENV").unwrap_or_else(|_| "dev".to_string()) }

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub data: DataConfig,
    pub chunking: ChunkingConfig,
    pub retrieval: RetrievalConfig,
    pub prompt: PromptConfig,
    pub embedding: EmbeddingConfig,
    pub generation: GenerationConfig,
    pub retry: RetryConfig,
    pub server: ServerConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DataConfig {
    pub docs_dir: PathBuf,
    pub index_dir: PathBuf,
}

impl Default for DataConfig {
    fn default() -> Self {
        Self { docs_dir: PathBuf::from("data/docs"), index_dir: PathBuf::from("data/index") }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChunkingConfig {
    pub chunk_size_chars: usize,
    pub overlap_chars: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self { Self { chunk_size_chars: 1000, overlap_chars: 160 } }
}

impl ChunkingConfig {
    pub const MIN_CHUNK_SIZE: usize = 50;

    pub fn validate(&self) -> Result<()> {
        if self.chunk_size_chars < Self::MIN_CHUNK_SIZE {
            return Err(Error::InvalidConfig(format!(
                "chunking.chunk_size_chars must be >= {}, got {}",
                Self::MIN_CHUNK_SIZE,
                self.chunk_size_chars
            )));
        }
        if self.overlap_chars >= self.chunk_size_chars {
            return Err(Error::InvalidConfig(format!(
                "chunking.overlap_chars ({}) must be smaller than chunk_size_chars ({})",
                self.overlap_chars, self.chunk_size_chars
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrievalConfig {
    pub top_k: usize,
    pub min_score: f32,
    pub min_hits: usize,
    /// Upper bound on results handed to the prompt builder.
    pub max_context_hits: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self { Self { top_k: 5, min_score: 0.40, min_hits: 1, max_context_hits: 5 } }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct PromptConfig {
    pub max_prompt_chars: usize,
    pub min_question_chars: usize,
    pub max_question_chars: usize,
}

impl Default for PromptConfig {
    fn default() -> Self { Self { max_prompt_chars: 12_000, min_question_chars: 3, max_question_chars: 2_000 } }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingProviderKind {
    Http,
    Hash,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    pub provider: EmbeddingProviderKind,
    pub base_url: String,
    pub model: String,
    pub api_key_env: String,
    /// Vector size; HTTP responses of any other size are rejected.
    pub dim: usize,
    pub batch_size: usize,
    pub timeout_secs: u64,
    pub price_input_per_1m: f64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: EmbeddingProviderKind::Http,
            base_url: "https://api.openai.com/v1".to_string(),
            model: "text-embedding-3-small".to_string(),
            api_key_env: "OPENAI_API_KEY".to_string(),
            dim: 1536,
            batch_size: 64,
            timeout_secs: 60,
            price_input_per_1m: 0.02,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GenerationProviderKind {
    Http,
    Offline,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationConfig {
    pub provider: GenerationProviderKind,
    pub base_url: String,
    pub model: String,
    pub api_key_env: String,
    pub temperature: f32,
    pub max_output_tokens: u32,
    pub timeout_secs: u64,
    pub price_input_per_1m: f64,
    pub price_output_per_1m: f64,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            provider: GenerationProviderKind::Http,
            base_url: "https://api.openai.com/v1".to_string(),
            model: "gpt-4o-mini".to_string(),
            api_key_env: "OPENAI_API_KEY".to_string(),
            temperature: 0.2,
            max_output_tokens: 400,
            timeout_secs: 30,
            price_input_per_1m: 0.15,
            price_output_per_1m: 0.60,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self { Self { max_retries: 2, base_delay_ms: 500, max_delay_ms: 8_000 } }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub reload_interval_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self { Self { host: "127.0.0.1".to_string(), port: 8000, reload_interval_secs: 5 } }
}

impl AppConfig {
    pub fn validate(&self) -> Result<()> {
        fn bad(msg: String) -> Result<()> { Err(Error::InvalidConfig(msg)) }

        self.chunking.validate()?;

        let r = &self.retrieval;
        if r.top_k == 0 {
            return bad("retrieval.top_k must be >= 1".into());
        }
        if !r.min_score.is_finite() || !(-1.0..=1.0).contains(&r.min_score) {
            return bad(format!("retrieval.min_score must be within [-1, 1], got {}", r.min_score));
        }
        if r.min_hits == 0 {
            return bad("retrieval.min_hits must be >= 1".into());
        }
        if r.max_context_hits < r.min_hits {
            return bad(format!(
                "retrieval.max_context_hits ({}) must be >= min_hits ({})",
                r.max_context_hits, r.min_hits
            ));
        }

        let p = &self.prompt;
        if p.max_prompt_chars == 0 {
            return bad("prompt.max_prompt_chars must be >= 1".into());
        }
        if p.min_question_chars > p.max_question_chars {
            return bad("prompt.min_question_chars must not exceed max_question_chars".into());
        }

        let e = &self.embedding;
        if e.batch_size == 0 || e.dim == 0 || e.timeout_secs == 0 {
            return bad("embedding.batch_size, dim and timeout_secs must be >= 1".into());
        }

        let g = &self.generation;
        if !(0.0..=2.0).contains(&g.temperature) {
            return bad(format!("generation.temperature must be within [0, 2], got {}", g.temperature));
        }
        if g.max_output_tokens == 0 || g.timeout_secs == 0 {
            return bad("generation.max_output_tokens and timeout_secs must be >= 1".into());
        }

        if self.retry.base_delay_ms > self.retry.max_delay_ms {
            return bad("retry.base_delay_ms must not exceed max_delay_ms".into());
        }
        if self.server.reload_interval_secs == 0 {
            return bad("server.reload_interval_secs must be >= 1".into());
        }
        Ok(())
    }
}

/// Expand a user-provided path string:
/// - Expands leading '~' to the user's home directory
/// - Expands ${VAR} and $VAR environment variables
/// - Returns a PathBuf without attempting to canonicalize
pub fn expand_path<S: AsRef<str>>(input: S) -> PathBuf {
    let s = input.as_ref();
    let expanded_env = shellexpand::env(s).unwrap_or(std::borrow::Cow::Borrowed(s));
    let expanded = shellexpand::tilde(&expanded_env);
    PathBuf::from(expanded.as_ref())
}

/// Resolve a possibly relative path against a given base directory after expansion.
/// If `p` is absolute, it's returned as-is; otherwise `base.join(p)` is returned.
pub fn resolve_with_base<S: AsRef<str>>(base: &Path, p: S) -> PathBuf {
    let p = expand_path(p);
    if p.is_absolute() { p } else { base.join(p) }
}
