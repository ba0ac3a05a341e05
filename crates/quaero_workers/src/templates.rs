//! Resolves a named `template` into its `prompt` and `schema_ref`, and
//! loads a named schema reference into a `ConfigMap`.
//!
//! Lookup order: a user-override directory first (one TOML file per
//! template, `<name>.toml`), then an embedded set baked into the
//! binary. A template's `type` field must be `"prompt"` — other
//! template kinds are reserved for future worker types and rejected
//! here.

use std::path::{Path, PathBuf};

use quaero_protocol::error::{ProtocolError, Result};
use quaero_protocol::types::{ConfigMap, ConfigValue};
use serde::Deserialize;

pub struct ResolvedTemplate {
    pub prompt: String,
    pub schema_ref: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TemplateFile {
    #[serde(rename = "type")]
    template_type: String,
    prompt: String,
    #[serde(default)]
    schema_ref: Option<String>,
}

struct EmbeddedTemplate {
    name: &'static str,
    prompt: &'static str,
    schema_ref: Option<&'static str>,
}

const EMBEDDED_TEMPLATES: &[EmbeddedTemplate] = &[
    EmbeddedTemplate {
        name: "stock-analysis",
        prompt: "Analyze the attached portfolio holdings using the provided documents. \
            For each ticker, cover recent performance, key risks, and a recommendation.",
        schema_ref: Some("stock-analysis"),
    },
    EmbeddedTemplate {
        name: "announcement-analysis",
        prompt: "Review the attached ASX announcements. Classify each as signal or noise \
            and summarize the market-relevant content.",
        schema_ref: Some("announcement-analysis"),
    },
];

const EMBEDDED_SCHEMAS: &[(&str, &str)] = &[
    (
        "stock-analysis",
        r#"{
            "type": "object",
            "properties": {
                "stocks": {
                    "type": "array",
                    "items": {
                        "type": "object",
                        "properties": {
                            "ticker": { "type": "string" },
                            "recommendation": { "type": "string" },
                            "notes": { "type": "string" }
                        }
                    }
                }
            },
            "required": ["stocks"]
        }"#,
    ),
    (
        "announcement-analysis",
        r#"{
            "type": "object",
            "properties": {
                "title": { "type": "string" },
                "signal_noise_assessment": { "type": "string" },
                "summary": { "type": "string" }
            },
            "required": ["title", "signal_noise_assessment"]
        }"#,
    ),
];

pub struct TemplateResolver {
    override_dir: Option<PathBuf>,
}

impl TemplateResolver {
    pub fn new(override_dir: Option<PathBuf>) -> Self {
        Self { override_dir }
    }

    pub fn resolve(&self, name: &str) -> Result<ResolvedTemplate> {
        if let Some(dir) = &self.override_dir {
            let path = dir.join(format!("{name}.toml"));
            if path.exists() {
                return Self::load_override(&path);
            }
        }

        EMBEDDED_TEMPLATES
            .iter()
            .find(|t| t.name == name)
            .map(|t| ResolvedTemplate {
                prompt: t.prompt.to_string(),
                schema_ref: t.schema_ref.map(str::to_string),
            })
            .ok_or_else(|| ProtocolError::ConfigInvalid(format!("unknown template '{name}'")))
    }

    fn load_override(path: &Path) -> Result<ResolvedTemplate> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| ProtocolError::ConfigInvalid(format!("reading template {}: {e}", path.display())))?;
        let file: TemplateFile = toml::from_str(&text)
            .map_err(|e| ProtocolError::ConfigInvalid(format!("parsing template {}: {e}", path.display())))?;
        if file.template_type != "prompt" {
            return Err(ProtocolError::ConfigInvalid(format!(
                "template {} has unsupported type '{}', expected 'prompt'",
                path.display(),
                file.template_type
            )));
        }
        Ok(ResolvedTemplate { prompt: file.prompt, schema_ref: file.schema_ref })
    }

    pub fn load_schema(&self, schema_ref: &str) -> Result<ConfigMap> {
        if let Some(dir) = &self.override_dir {
            let path = dir.join(format!("{schema_ref}.schema.json"));
            if path.exists() {
                let text = std::fs::read_to_string(&path)
                    .map_err(|e| ProtocolError::ConfigInvalid(format!("reading schema {}: {e}", path.display())))?;
                return parse_schema_json(&text);
            }
        }

        EMBEDDED_SCHEMAS
            .iter()
            .find(|(name, _)| *name == schema_ref)
            .map(|(_, json)| parse_schema_json(json))
            .ok_or_else(|| ProtocolError::ConfigInvalid(format!("unknown schema reference '{schema_ref}'")))?
    }
}

fn parse_schema_json(text: &str) -> Result<ConfigMap> {
    let value: serde_json::Value = serde_json::from_str(text)?;
    json_to_config_map(value).ok_or_else(|| ProtocolError::SchemaParse("schema document must be a JSON object".to_string()))
}

fn json_to_config_map(value: serde_json::Value) -> Option<ConfigMap> {
    match json_to_config_value(value) {
        ConfigValue::Map(map) => Some(map),
        _ => None,
    }
}

fn json_to_config_value(value: serde_json::Value) -> ConfigValue {
    match value {
        serde_json::Value::Null => ConfigValue::Null,
        serde_json::Value::Bool(b) => ConfigValue::Bool(b),
        serde_json::Value::Number(n) => ConfigValue::Number(n.as_f64().unwrap_or_default()),
        serde_json::Value::String(s) => ConfigValue::String(s),
        serde_json::Value::Array(items) => ConfigValue::Array(items.into_iter().map(json_to_config_value).collect()),
        serde_json::Value::Object(obj) => {
            ConfigValue::Map(obj.into_iter().map(|(k, v)| (k, json_to_config_value(v))).collect())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn resolves_embedded_template_by_name() {
        let resolver = TemplateResolver::new(None);
        let resolved = resolver.resolve("stock-analysis").unwrap();
        assert!(resolved.prompt.contains("portfolio"));
        assert_eq!(resolved.schema_ref.as_deref(), Some("stock-analysis"));
    }

    #[test]
    fn unknown_template_is_config_invalid() {
        let resolver = TemplateResolver::new(None);
        let err = resolver.resolve("does-not-exist").unwrap_err();
        assert!(matches!(err, ProtocolError::ConfigInvalid(_)));
    }

    #[test]
    fn override_directory_wins_over_embedded() {
        let dir = tempdir().unwrap();
        std::fs::write(
            dir.path().join("stock-analysis.toml"),
            "type = \"prompt\"\nprompt = \"custom override prompt\"\n",
        )
        .unwrap();
        let resolver = TemplateResolver::new(Some(dir.path().to_path_buf()));
        let resolved = resolver.resolve("stock-analysis").unwrap();
        assert_eq!(resolved.prompt, "custom override prompt");
    }

    #[test]
    fn override_with_wrong_type_is_rejected() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("bad.toml"), "type = \"tool\"\nprompt = \"x\"\n").unwrap();
        let resolver = TemplateResolver::new(Some(dir.path().to_path_buf()));
        assert!(resolver.resolve("bad").is_err());
    }

    #[test]
    fn loads_embedded_schema_as_config_map() {
        let resolver = TemplateResolver::new(None);
        let schema = resolver.load_schema("announcement-analysis").unwrap();
        assert!(schema.contains_key("properties"));
    }
}
