//! # Errors
//!
//! Typed failures for every seam of the crate. The split mirrors how each
//! failure is treated at runtime:
//!
//! - [`EmbeddingError`] and [`IndexError`] bubble out of `append` as
//!   [`MemoryError`], but are swallowed into an empty result by `search`.
//! - [`GenerationError`] ends a chat stream with an explicit error event.
//! - [`PersistenceError`] is always surfaced to the caller.
//! - [`ConfigError`] only happens at start-up.

use thiserror::Error;

/// The embedding function failed or produced a vector of the wrong shape.
#[derive(Debug, Error)]
pub enum EmbeddingError {
    /// Model loading, tokenization or inference failed.
    #[error("embedding model error: {0}")]
    Model(String),
    /// The model returned a vector whose length differs from its declared dimension.
    #[error("embedding dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },
}

/// The vector index rejected an insert or a query.
#[derive(Debug, Error)]
pub enum IndexError {
    #[error("index dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },
    #[error("index backend error: {0}")]
    Backend(String),
}

/// Failures of the per-project memory store.
#[derive(Debug, Error)]
pub enum MemoryError {
    /// `append` was called with text that is empty after trimming.
    #[error("memory text is empty")]
    EmptyText,
    #[error("embedding failure: {0}")]
    Embedding(#[from] EmbeddingError),
    #[error("retrieval failure: {0}")]
    Retrieval(#[from] IndexError),
    /// The durable record log could not be read or written.
    #[error("memory storage error: {0}")]
    Storage(#[from] diesel::result::Error),
    /// A vector or metadata payload could not be encoded or decoded.
    #[error("memory encoding error: {0}")]
    Encoding(String),
}

/// The completion provider failed to produce output.
#[derive(Debug, Error)]
pub enum GenerationError {
    /// Connection, TLS or timeout failure talking to the provider.
    #[error("completion transport error: {0}")]
    Transport(String),
    /// The provider answered with a non-success status.
    #[error("completion request rejected: {0}")]
    Api(String),
    /// The response stream could not be parsed or ended abnormally.
    #[error("malformed completion stream: {0}")]
    Stream(String),
    /// The request could not be built.
    #[error("invalid completion request: {0}")]
    Request(String),
}

impl From<async_openai::error::OpenAIError> for GenerationError {
    fn from(err: async_openai::error::OpenAIError) -> Self {
        use async_openai::error::OpenAIError;

        match &err {
            OpenAIError::Reqwest(_) => Self::Transport(err.to_string()),
            OpenAIError::ApiError(api) => Self::Api(api.message.clone()),
            OpenAIError::InvalidArgument(message) => Self::Request(message.clone()),
            _ => Self::Stream(err.to_string()),
        }
    }
}

/// The transcript sink could not record a chat turn.
#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("transcript database error: {0}")]
    Database(#[from] diesel::result::Error),
    #[error("transcript sink unavailable: {0}")]
    Unavailable(String),
}

/// Failures of a single chat turn that are returned to the caller.
///
/// Generation failures that happen after streaming started are reported on the
/// event stream instead; see [`crate::chat::TurnOutcome`].
#[derive(Debug, Error)]
pub enum ChatError {
    #[error(transparent)]
    Persistence(#[from] PersistenceError),
    #[error(transparent)]
    Generation(#[from] GenerationError),
}

/// Start-up failures: config files, config directory and database.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("config format error: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("unable to determine config directory")]
    NoConfigDir,
    #[error("database connection error: {0}")]
    Connection(#[from] diesel::ConnectionError),
    #[error("database schema error: {0}")]
    Schema(#[from] diesel::result::Error),
}
