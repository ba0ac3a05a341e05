//! Provider A (Claude-family) backend: message conversion and the HTTP
//! call itself. Only this module knows the wire shape; everything else
//! in the crate speaks `ContentRequest`/`ContentResponse`.

use quaero_protocol::{ChatMessage, ContentRequest, ContentResponse, Provider, Role};
use serde::{Deserialize, Serialize};
use serde_json::json;

const API_BASE: &str = "https://api.anthropic.com/v1/messages";
const API_VERSION: &str = "2023-06-01";

#[derive(Serialize)]
struct ClaudeTurn<'a> {
    role: &'a str,
    content: &'a str,
}

/// Extracts the first system message into a dedicated field and
/// converts the remainder into user/assistant turns. Unknown roles are
/// treated as user. Fails when there is no user-role message.
fn convert_messages(messages: &[ChatMessage]) -> Result<(Option<String>, Vec<ClaudeTurn<'_>>), String> {
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
            Role::System if system.is_none() => {
                system = Some(message.content.clone());
            }
            Role::Assistant => turns.push(ClaudeTurn { role: "assistant", content: &message.content }),
            _ => turns.push(ClaudeTurn { role: "user", content: &message.content }),
        }
    }

    Ok((system, turns))
}

#[derive(Deserialize)]
struct ClaudeResponse {
    content: Vec<ClaudeBlock>,
}

#[derive(Deserialize)]
struct ClaudeBlock {
    #[serde(rename = "type")]
    block_type: String,
    #[serde(default)]
    text: String,
}

pub async fn call(
    client: &reqwest::Client,
    api_key: &str,
    request: &ContentRequest,
) -> Result<ContentResponse, String> {
    let (system, turns) = convert_messages(&request.messages)?;

    let mut body = json!({
        "model": request.model,
        "max_tokens": request.max_tokens.unwrap_or(4096),
        "messages": turns,
    });
    if let Some(system) = system.or_else(|| request.system_instruction.clone()) {
        body["system"] = json!(system);
    }
    if let Some(temperature) = request.temperature {
        body["temperature"] = json!(temperature);
    }

    let response = client
        .post(API_BASE)
        .header("x-api-key", api_key)
        .header("anthropic-version", API_VERSION)
        .json(&body)
        .send()
        .await
        .map_err(|e| e.to_string())?;

    let status = response.status();
    let text = response.text().await.map_err(|e| e.to_string())?;
    if !status.is_success() {
        return Err(format!("HTTP {status}: {text}"));
    }

    let parsed: ClaudeResponse = serde_json::from_str(&text).map_err(|e| e.to_string())?;
    let combined: String = parsed
        .content
        .iter()
        .filter(|b| b.block_type == "text")
        .map(|b| b.text.as_str())
        .collect::<Vec<_>>()
        .join("");

    if combined.is_empty() {
        return Err("empty response text".to_string());
    }

    Ok(ContentResponse {
        text: combined,
        provider: Provider::Claude,
        model: request.model.clone(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn convert_messages_hoists_first_system_message() {
        let messages = vec![
            ChatMessage::system("be terse"),
            ChatMessage::user("hello"),
            ChatMessage::assistant("hi"),
        ];
        let (system, turns) = convert_messages(&messages).unwrap();
        assert_eq!(system.as_deref(), Some("be terse"));
        assert_eq!(turns.len(), 2);
        assert_eq!(turns[0].role, "user");
        assert_eq!(turns[1].role, "assistant");
    }

    #[test]
    fn convert_messages_rejects_empty_list() {
        assert!(convert_messages(&[]).is_err());
    }

    #[test]
    fn convert_messages_requires_a_user_role() {
        let messages = vec![ChatMessage::system("sys"), ChatMessage::assistant("hi")];
        assert!(convert_messages(&messages).is_err());
    }
}
