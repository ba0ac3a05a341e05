//! TOML configuration loading, with `QUAERO_`-prefixed environment
//! variable overrides layered on top. Mirrors the home-directory
//! config file convention the rest of the toolchain already uses.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::defaults::CONFIG_FILE_NAME;
use crate::error::{ProtocolError, Result};

/// `$QUAERO_HOME`, falling back to `~/.quaero`.
pub fn quaero_home() -> PathBuf {
    if let Ok(dir) = std::env::var("QUAERO_HOME") {
        return PathBuf::from(dir);
    }
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".quaero")
}

pub fn default_config_path() -> PathBuf {
    quaero_home().join(CONFIG_FILE_NAME)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LlmMode {
    #[default]
    Offline,
    Cloud,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(deny_unknown_fields, default)]
pub struct OfflineConfig {
    pub model_dir: Option<PathBuf>,
    pub embed_model: Option<String>,
    pub chat_model: Option<String>,
    pub context_size: Option<u32>,
    pub thread_count: Option<u32>,
    pub gpu_layers: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(deny_unknown_fields, default)]
pub struct AuditConfig {
    pub log_queries: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(deny_unknown_fields, default)]
pub struct LlmSettings {
    pub mode: LlmMode,
    pub offline: OfflineConfig,
    pub audit: AuditConfig,
    pub default_provider: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(deny_unknown_fields, default)]
pub struct ClaudeConfig {
    pub api_key: Option<String>,
    pub model: Option<String>,
    pub timeout: Option<u64>,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(deny_unknown_fields, default)]
pub struct GeminiConfig {
    pub api_key: Option<String>,
    pub model: Option<String>,
    pub temperature: Option<f32>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(deny_unknown_fields, default)]
pub struct LogSettings {
    pub verbose: bool,
    pub dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(deny_unknown_fields, default)]
pub struct RuntimeConfig {
    pub llm: LlmSettings,
    pub claude: ClaudeConfig,
    pub gemini: GeminiConfig,
    pub log: LogSettings,
}

/// Load configuration from an explicit path, then apply `QUAERO_*`
/// environment overrides. A missing file is not an error — it is
/// treated as an all-defaults configuration, matching the behavior
/// operators expect from a first run with no `quaero.toml` present.
pub fn load_config(path: &Path) -> Result<RuntimeConfig> {
    let mut config = if path.exists() {
        let text = std::fs::read_to_string(path)
            .map_err(|e| ProtocolError::ConfigInvalid(format!("reading {}: {e}", path.display())))?;
        toml::from_str(&text)
            .map_err(|e| ProtocolError::ConfigInvalid(format!("parsing {}: {e}", path.display())))?
    } else {
        RuntimeConfig::default()
    };
    apply_env_overrides(&mut config);
    Ok(config)
}

pub fn load_default_config() -> Result<RuntimeConfig> {
    load_config(&default_config_path())
}

fn apply_env_overrides(config: &mut RuntimeConfig) {
    if let Ok(v) = std::env::var("QUAERO_LLM_MODE") {
        config.llm.mode = match v.to_lowercase().as_str() {
            "cloud" => LlmMode::Cloud,
            _ => LlmMode::Offline,
        };
    }
    if let Ok(v) = std::env::var("QUAERO_LLM_DEFAULT_PROVIDER") {
        config.llm.default_provider = Some(v);
    }
    if let Ok(v) = std::env::var("QUAERO_CLAUDE_API_KEY") {
        config.claude.api_key = Some(v);
    }
    if let Ok(v) = std::env::var("QUAERO_CLAUDE_MODEL") {
        config.claude.model = Some(v);
    }
    if let Ok(v) = std::env::var("QUAERO_GEMINI_API_KEY") {
        config.gemini.api_key = Some(v);
    }
    if let Ok(v) = std::env::var("QUAERO_GEMINI_MODEL") {
        config.gemini.model = Some(v);
    }
    if let Ok(v) = std::env::var("QUAERO_LOG_VERBOSE") {
        config.log.verbose = v == "1" || v.eq_ignore_ascii_case("true");
    }
    if let Ok(v) = std::env::var("QUAERO_LOG_DIR") {
        config.log.dir = Some(PathBuf::from(v));
    }
}
