use thiserror::Error;

#[derive(Debug, Error)]
pub enum InferenceError {
    #[error("inference binary '{name}' not found (searched: {searched:?})")]
    BinaryNotFound { name: String, searched: Vec<String> },

    #[error("security violation: {0}")]
    SecurityViolation(String),

    #[error("embedding subprocess not ready")]
    NotReady,

    #[error("embedding subprocess failed to become ready within timeout")]
    HealthCheckTimedOut,

    #[error("embedding request failed: {0}")]
    Transport(String),

    #[error("embedding server returned {status}: {body}")]
    NonSuccessStatus { status: u16, body: String },

    #[error("embedding response contained an empty vector")]
    EmptyEmbedding,

    #[error("chat subprocess failed: {0}")]
    ChatFailed(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
