use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    /// Malformed caller input. Never retried.
    #[error("Validation failed: {0}")]
    Validation(String),

    /// Embedding service or index unreachable.
    #[error("Retrieval infrastructure failure: {message}")]
    RetrievalInfra { message: String, transient: bool },

    /// Persisted index is missing pieces or internally incoherent.
    #[error("Index corrupted: {0}")]
    IndexCorruption(String),

    #[error("Dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    /// Generation service unreachable or failing after retries.
    #[error("Generation infrastructure failure: {message}")]
    GenerationInfra { message: String, transient: bool },

    /// Model output failed schema validation on every attempt.
    #[error("Generation output invalid after {attempts} attempt(s): {reason}")]
    GenerationFormat { attempts: u32, reason: String },

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("I/O error at {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    pub fn validation(msg: impl Into<String>) -> Self { Self::Validation(msg.into()) }

    pub fn corruption(msg: impl Into<String>) -> Self { Self::IndexCorruption(msg.into()) }

    pub fn retrieval(message: impl Into<String>, transient: bool) -> Self {
        Self::RetrievalInfra { message: message.into(), transient }
    }

    pub fn generation(message: impl Into<String>, transient: bool) -> Self {
        Self::GenerationInfra { message: message.into(), transient }
    }

    pub fn io(path: impl AsRef<std::path::Path>, source: std::io::Error) -> Self {
        Self::Io { path: path.as_ref().display().to_string(), source }
    }

    /// Whether a retry of the same call may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::RetrievalInfra { transient: true, .. } | Self::GenerationInfra { transient: true, .. }
        )
    }

    /// Errors caused by the request itself rather than by the system.
    pub fn is_client_error(&self) -> bool { matches!(self, Self::Validation(_)) }
}

pub type Result<T> = std::result::Result<T, Error>;
