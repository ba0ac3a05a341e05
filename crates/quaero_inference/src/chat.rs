//! One-shot chat completion via the local inference binary. Unlike the
//! embedding server, chat does not run as a long-lived process: each
//! call spawns the binary, feeds it a single rendered prompt, and
//! collects the assistant's reply from its combined stdout/stderr.

use std::path::Path;
use std::process::Stdio;

use tokio::io::AsyncReadExt;
use tokio::process::Command;

use crate::InferenceError;
use quaero_protocol::{ChatMessage, Role};

/// Renders a message list using the `<|im_start|>`/`<|im_end|>` chat
/// template, ending with a priming header for the assistant turn so the
/// model continues directly into its reply.
pub fn render_chat_template(messages: &[ChatMessage]) -> String {
    let mut out = String::new();
    for message in messages {
        let role = match message.role {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
        };
        out.push_str("<|im_start|>");
        out.push_str(role);
        out.push('\n');
        out.push_str(&message.content);
        out.push_str("<|im_end|>\n");
    }
    out.push_str("<|im_start|>assistant\n");
    out
}

const DIAGNOSTIC_PREFIXES: &[&str] = &["llama_", "ggml_"];
const DIAGNOSTIC_MARKERS: &[&str] = &["perplexity:", "tokens per second"];

/// Drops subprocess diagnostic chatter (llama.cpp-style logging lines)
/// from the captured output, leaving only the assistant's text.
pub fn strip_binary_diagnostics(raw: &str) -> String {
    raw.lines()
        .filter(|line| {
            let trimmed = line.trim_start();
            !DIAGNOSTIC_PREFIXES.iter().any(|p| trimmed.starts_with(p))
                && !DIAGNOSTIC_MARKERS.iter().any(|m| trimmed.contains(m))
        })
        .collect::<Vec<_>>()
        .join("\n")
        .trim()
        .to_string()
}

pub async fn chat_once(
    binary_path: &Path,
    messages: &[ChatMessage],
    model_path: &Path,
) -> Result<String, InferenceError> {
    let prompt = render_chat_template(messages);

    let mut child = Command::new(binary_path)
        .arg("--model")
        .arg(model_path)
        .arg("--prompt")
        .arg(&prompt)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()?;

    let mut stdout = String::new();
    if let Some(mut out) = child.stdout.take() {
        out.read_to_string(&mut stdout).await.ok();
    }
    let mut stderr = String::new();
    if let Some(mut err) = child.stderr.take() {
        err.read_to_string(&mut stderr).await.ok();
    }

    let status = child.wait().await?;
    if !status.success() {
        return Err(InferenceError::ChatFailed(format!(
            "exit status {status}: {stderr}"
        )));
    }

    let combined = format!("{stdout}\n{stderr}");
    Ok(strip_binary_diagnostics(&combined))
}

/// Deterministic fake used in mock mode.
pub fn mock_chat(messages: &[ChatMessage]) -> String {
    let last = messages
        .iter()
        .rev()
        .find(|m| m.role == Role::User)
        .map(|m| m.content.as_str())
        .unwrap_or("");
    format!("Mock response to: {last}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn template_frames_each_message_and_primes_assistant_turn() {
        let messages = vec![ChatMessage::system("be helpful"), ChatMessage::user("hi")];
        let rendered = render_chat_template(&messages);
        assert!(rendered.starts_with("<|im_start|>system\n"));
        assert!(rendered.contains("<|im_start|>user\nhi<|im_end|>\n"));
        assert!(rendered.ends_with("<|im_start|>assistant\n"));
    }

    #[test]
    fn strip_binary_diagnostics_drops_known_noise() {
        let raw = "llama_model_loader: loading\nHello there\nggml_init: ok\ntokens per second: 12.3\nGoodbye";
        let cleaned = strip_binary_diagnostics(raw);
        assert_eq!(cleaned, "Hello there\nGoodbye");
    }

    #[test]
    fn mock_chat_echoes_last_user_message() {
        let messages = vec![ChatMessage::system("sys"), ChatMessage::user("what time is it")];
        assert_eq!(mock_chat(&messages), "Mock response to: what time is it");
    }
}
