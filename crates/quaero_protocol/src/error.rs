use thiserror::Error;

/// Canonical error taxonomy shared by every crate that sits on top of the
/// job-orchestration core. Specific subsystems (dispatcher, inference,
/// sentinel) wrap these variants or add their own via `#[from]`.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("config invalid: {0}")]
    ConfigInvalid(String),

    #[error("resource missing: {0}")]
    ResourceMissing(String),

    #[error("provider transient error: {0}")]
    ProviderTransient(String),

    #[error("provider rate limited: {0}")]
    ProviderRateLimited(String),

    #[error("provider quota exhausted: {0}")]
    ProviderQuotaExhausted(String),

    #[error("validation failed: {0}")]
    ValidationFailed(String),

    #[error("schema parse failed: {0}")]
    SchemaParse(String),

    #[error("dependency timed out: {0}")]
    DependencyTimeout(String),

    #[error("cancelled: {0}")]
    Cancelled(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, ProtocolError>;
