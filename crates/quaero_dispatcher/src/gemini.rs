//! Provider B (Gemini-family) backend: message conversion, schema
//! translation for structured output, and the HTTP call.

use quaero_protocol::{ChatMessage, ConfigMap, ConfigValue, ContentRequest, ContentResponse, Provider, Role, ThinkingLevel};
use serde::Deserialize;
use serde_json::{json, Value};

const API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta/models";

#[derive(serde::Serialize)]
struct GeminiPart {
    text: String,
}

#[derive(serde::Serialize)]
struct GeminiTurn {
    role: String,
    parts: Vec<GeminiPart>,
}

/// Maps `system` to a dedicated instruction and preserves ordering of
/// the remaining turns, mapping `assistant` to Gemini's `model` role.
/// Unknown or empty roles default to `user`. Fails when the message
/// list is empty or has no user role.
fn convert_messages(messages: &[ChatMessage]) -> Result<(Option<String>, Vec<GeminiTurn>), String> {
    if messages.is_empty() {
        return Err("messages cannot be empty".to_string());
    }
    if !messages.iter().any(|m| m.role == Role::User) {
        return Err("at least one message must have role 'user'".to_string());
    }

    let mut system = None;
    let mut turns = Vec::new();

    for message in messages {
        match message.role {
            Role::System if system.is_none() => system = Some(message.content.clone()),
            Role::Assistant => turns.push(GeminiTurn { role: "model".to_string(), parts: vec![GeminiPart { text: message.content.clone() }] }),
            _ => turns.push(GeminiTurn { role: "user".to_string(), parts: vec![GeminiPart { text: message.content.clone() }] }),
        }
    }

    Ok((system, turns))
}

/// Recursively translates a generic JSON-schema-shaped `ConfigMap` into
/// Gemini's schema object. Only the fields Gemini actually accepts are
/// carried over: type, description, enum, required, minimum, maximum,
/// items, properties.
pub fn translate_schema(schema: &ConfigMap) -> Value {
    let mut out = serde_json::Map::new();

    if let Some(t) = schema.get("type").and_then(ConfigValue::as_str) {
        out.insert("type".to_string(), json!(t.to_uppercase()));
    }
    if let Some(d) = schema.get("description").and_then(ConfigValue::as_str) {
        out.insert("description".to_string(), json!(d));
    }
    if let Some(ConfigValue::Array(values)) = schema.get("enum") {
        let items: Vec<Value> = values.iter().filter_map(config_value_to_json).collect();
        out.insert("enum".to_string(), Value::Array(items));
    }
    if let Some(required) = schema.get("required").and_then(ConfigValue::as_str_list) {
        out.insert("required".to_string(), json!(required));
    }
    if let Some(min) = schema.get("minimum").and_then(ConfigValue::as_f64) {
        out.insert("minimum".to_string(), json!(min));
    }
    if let Some(max) = schema.get("maximum").and_then(ConfigValue::as_f64) {
        out.insert("maximum".to_string(), json!(max));
    }
    if let Some(ConfigValue::Map(items)) = schema.get("items") {
        out.insert("items".to_string(), translate_schema(items));
    }
    if let Some(ConfigValue::Map(properties)) = schema.get("properties") {
        let mut props = serde_json::Map::new();
        for (key, value) in properties {
            if let ConfigValue::Map(prop_schema) = value {
                props.insert(key.clone(), translate_schema(prop_schema));
            }
        }
        out.insert("properties".to_string(), Value::Object(props));
    }

    Value::Object(out)
}

fn config_value_to_json(value: &ConfigValue) -> Option<Value> {
    match value {
        ConfigValue::String(s) => Some(json!(s)),
        ConfigValue::Number(n) => Some(json!(n)),
        ConfigValue::Bool(b) => Some(json!(b)),
        _ => None,
    }
}

fn thinking_budget(level: ThinkingLevel) -> u32 {
    match level {
        ThinkingLevel::Minimal => 0,
        ThinkingLevel::Low => 1024,
        ThinkingLevel::Medium => 8192,
        ThinkingLevel::High => 24576,
    }
}

#[derive(Deserialize)]
struct GeminiResponse {
    candidates: Vec<GeminiCandidate>,
}

#[derive(Deserialize)]
struct GeminiCandidate {
    content: GeminiContent,
}

#[derive(Deserialize)]
struct GeminiContent {
    #[serde(default)]
    parts: Vec<GeminiResponsePart>,
}

#[derive(Deserialize)]
struct GeminiResponsePart {
    #[serde(default)]
    text: String,
}

pub async fn call(
    client: &reqwest::Client,
    api_key: &str,
    request: &ContentRequest,
) -> Result<ContentResponse, String> {
    let (system, turns) = convert_messages(&request.messages)?;

    let mut generation_config = serde_json::Map::new();
    if let Some(temperature) = request.temperature {
        generation_config.insert("temperature".to_string(), json!(temperature));
    }
    if let Some(max_tokens) = request.max_tokens {
        generation_config.insert("maxOutputTokens".to_string(), json!(max_tokens));
    }
    if let Some(schema) = &request.output_schema {
        generation_config.insert("responseMimeType".to_string(), json!("application/json"));
        generation_config.insert("responseSchema".to_string(), translate_schema(schema));
    }

    let mut body = json!({
        "contents": turns,
        "generationConfig": generation_config,
    });
    if let Some(system) = system.or_else(|| request.system_instruction.clone()) {
        body["systemInstruction"] = json!({ "parts": [{ "text": system }] });
    }
    if let Some(level) = request.thinking_level {
        body["generationConfig"]["thinkingConfig"] = json!({ "thinkingBudget": thinking_budget(level) });
    }

    let url = format!("{API_BASE}/{}:generateContent?key={api_key}", request.model);
    let response = client.post(&url).json(&body).send().await.map_err(|e| e.to_string())?;

    let status = response.status();
    let text = response.text().await.map_err(|e| e.to_string())?;
    if !status.is_success() {
        return Err(format!("HTTP {status}: {text}"));
    }

    let parsed: GeminiResponse = serde_json::from_str(&text).map_err(|e| e.to_string())?;
    let combined: String = parsed
        .candidates
        .first()
        .map(|c| c.content.parts.iter().map(|p| p.text.as_str()).collect::<Vec<_>>().join(""))
        .unwrap_or_default();

    if combined.is_empty() {
        return Err("empty response text".to_string());
    }

    Ok(ContentResponse {
        text: combined,
        provider: Provider::Gemini,
        model: request.model.clone(),
    })
}
