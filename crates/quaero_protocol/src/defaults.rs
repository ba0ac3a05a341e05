//! Canonical default values shared across the orchestration core.

pub const DEFAULT_MAX_RETRIES: u32 = 5;
pub const DEFAULT_INITIAL_BACKOFF_SECS: u64 = 45;
pub const DEFAULT_MAX_BACKOFF_SECS: u64 = 90;
pub const DEFAULT_BACKOFF_MULTIPLIER: f64 = 1.5;

pub const DEFAULT_EMBED_PORT: u16 = 8086;
pub const DEFAULT_EMBED_HOST: &str = "127.0.0.1";
pub const HEALTH_POLL_INTERVAL_MS: u64 = 500;
pub const HEALTH_POLL_TIMEOUT_SECS: u64 = 30;
pub const SUBPROCESS_SHUTDOWN_GRACE_SECS: u64 = 5;
pub const EMBED_PHYSICAL_BATCH_SIZE: u32 = 2048;

pub const STEP_MONITOR_POLL_INTERVAL_SECS: u64 = 5;
pub const STEP_MONITOR_GRACE_PERIOD_SECS: u64 = 30;
pub const STEP_MONITOR_TIMEOUT_SECS: u64 = 30 * 60;

pub const DEFAULT_FILTER_LIMIT: u32 = 1000;
pub const DEFAULT_MAX_ITERATIONS: u32 = 0;
pub const MAX_VALIDATION_ATTEMPTS: u32 = 3;
pub const GENERATION_TEMPERATURE: f32 = 0.3;
pub const CRITIQUE_TEMPERATURE: f32 = 0.1;
pub const GENERATION_TIMEOUT_SECS: u64 = 10 * 60;
pub const CRITIQUE_TIMEOUT_SECS: u64 = 3 * 60;
pub const DOCUMENT_CONTENT_TRUNCATE_CHARS: usize = 50_000;

pub const DEFAULT_WEB_SEARCH_CACHE_HOURS: i64 = 24;
pub const DEFAULT_WEB_SEARCH_DEPTH: u32 = 1;
pub const DEFAULT_WEB_SEARCH_BREADTH: u32 = 1;

pub const CONFIG_ENV_PREFIX: &str = "QUAERO_";
pub const CONFIG_FILE_NAME: &str = "quaero.toml";

fn default_model_fn(provider: &str) -> &'static str {
    match provider {
        "claude" | "anthropic" => "claude-sonnet-4-20250514",
        "gemini" | "google" => "gemini-2.0-flash",
        _ => "claude-sonnet-4-20250514",
    }
}

/// Default model name for a detected provider, used whenever the caller
/// supplies an empty model string.
pub fn default_model(provider: &str) -> &'static str {
    default_model_fn(provider)
}
