//! Pure retry-policy functions plus a small async wrapper that applies
//! them around a fallible, cancellable operation. Every provider call in
//! `quaero_dispatcher` and `quaero_inference` goes through `with_retry`.

mod cancel;

pub use cancel::CancellationToken;

use std::future::Future;
use std::time::Duration;

use regex::Regex;
use std::sync::OnceLock;

/// Tunables for the backoff curve. Defaults mirror the dominant remote
/// provider's per-minute rate-limit window.
#[derive(Debug, Clone, Copy)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    pub multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: quaero_protocol::defaults::DEFAULT_MAX_RETRIES,
            initial_backoff: Duration::from_secs(quaero_protocol::defaults::DEFAULT_INITIAL_BACKOFF_SECS),
            max_backoff: Duration::from_secs(quaero_protocol::defaults::DEFAULT_MAX_BACKOFF_SECS),
            multiplier: quaero_protocol::defaults::DEFAULT_BACKOFF_MULTIPLIER,
        }
    }
}

fn retry_delay_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)(?:please retry in|retrydelay[:\s]+)\s*(\d+(?:\.\d+)?)s").unwrap()
    })
}

/// True when the error text indicates the caller has been rate limited
/// rather than having hit a hard failure.
pub fn is_rate_limit(error: &str) -> bool {
    let lower = error.to_lowercase();
    lower.contains("429") || lower.contains("resource_exhausted") || lower.contains("quota")
}

/// Parses a server-advised retry delay out of an error message. Returns
/// `Duration::ZERO` when no hint is present.
pub fn extract_retry_delay(error: &str) -> Duration {
    retry_delay_regex()
        .captures(error)
        .and_then(|caps| caps.get(1))
        .and_then(|m| m.as_str().parse::<f64>().ok())
        .map(Duration::from_secs_f64)
        .unwrap_or(Duration::ZERO)
}

/// True when the error indicates an unrecoverable, zero-quota condition
/// that retrying will never resolve.
pub fn is_quota_exhausted(error: &str) -> bool {
    let lower = error.to_lowercase();
    is_rate_limit(error)
        && (lower.contains("limit: 0") || lower.contains("quota exceeded") && lower.contains("daily"))
}

/// `base = api_hint + 5s` when a server hint is present, else
/// `initial_backoff`; scaled by `multiplier^attempt` and capped at
/// `max_backoff`.
pub fn calculate_backoff(attempt: u32, api_hint: Duration, config: &RetryConfig) -> Duration {
    let base = if api_hint > Duration::ZERO {
        api_hint + Duration::from_secs(5)
    } else {
        config.initial_backoff
    };
    let scaled = base.mul_f64(config.multiplier.powi(attempt as i32));
    scaled.min(config.max_backoff)
}

#[derive(Debug, thiserror::Error)]
pub enum RetryError<E> {
    #[error("cancelled before operation completed")]
    Cancelled,
    #[error(transparent)]
    Inner(#[from] E),
}

/// Runs `operation` up to `config.max_retries + 1` times. The closure is
/// handed the zero-based attempt index and must return an error whose
/// `Display` form is inspected by `is_rate_limit`/`is_quota_exhausted`.
///
/// A quota-exhausted error fails immediately without consuming a retry.
/// Cancellation is observed both before starting an attempt and during
/// the backoff sleep.
pub async fn with_retry<T, E, F, Fut>(
    config: &RetryConfig,
    cancel: &CancellationToken,
    mut operation: F,
) -> Result<T, RetryError<E>>
where
    E: std::fmt::Display,
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let mut attempt = 0u32;
    loop {
        if cancel.is_cancelled() {
            return Err(RetryError::Cancelled);
        }

        match operation(attempt).await {
            Ok(value) => return Ok(value),
            Err(err) => {
                let message = err.to_string();

                if is_quota_exhausted(&message) {
                    return Err(RetryError::Inner(err));
                }

                if attempt >= config.max_retries {
                    return Err(RetryError::Inner(err));
                }

                let backoff = if is_rate_limit(&message) {
                    calculate_backoff(attempt, extract_retry_delay(&message), config)
                } else {
                    Duration::from_secs(2 * (attempt as u64 + 1))
                };

                tracing::warn!(attempt, backoff_secs = backoff.as_secs(), error = %message, "retrying after transient failure");

                tokio::select! {
                    _ = tokio::time::sleep(backoff) => {}
                    _ = cancel.cancelled() => return Err(RetryError::Cancelled),
                }

                attempt += 1;
            }
        }
    }
}
