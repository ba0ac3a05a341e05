//! Provider detection and model-name normalization.

use quaero_protocol::Provider;

/// Detects the target provider from a model identifier. Case-insensitive,
/// first match wins. An empty model falls back to `default_provider`.
pub fn detect_provider(model: &str, default_provider: Provider) -> Provider {
    if model.is_empty() {
        return default_provider;
    }
    let lower = model.to_lowercase();

    if lower.starts_with("claude/") || lower.starts_with("anthropic/") || lower.starts_with("claude-") {
        return Provider::Claude;
    }
    if lower.starts_with("gemini/") || lower.starts_with("google/") || lower.starts_with("gemini-") {
        return Provider::Gemini;
    }

    default_provider
}

/// Strips a recognized provider prefix (`claude/`, `anthropic/`,
/// `gemini/`, `google/`) from a model identifier, leaving the bare
/// model name intact otherwise.
pub fn normalize_model(model: &str) -> &str {
    for prefix in ["claude/", "anthropic/", "gemini/", "google/"] {
        if let Some(stripped) = strip_prefix_case_insensitive(model, prefix) {
            return stripped;
        }
    }
    model
}

fn strip_prefix_case_insensitive<'a>(s: &'a str, prefix: &str) -> Option<&'a str> {
    if s.len() >= prefix.len() && s[..prefix.len()].eq_ignore_ascii_case(prefix) {
        Some(&s[prefix.len()..])
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_claude_from_any_recognized_prefix() {
        assert_eq!(detect_provider("claude/sonnet-4", Provider::Gemini), Provider::Claude);
        assert_eq!(detect_provider("anthropic/sonnet-4", Provider::Gemini), Provider::Claude);
        assert_eq!(detect_provider("claude-sonnet-4", Provider::Gemini), Provider::Claude);
    }

    #[test]
    fn detects_gemini_from_any_recognized_prefix() {
        assert_eq!(detect_provider("gemini/2.0-flash", Provider::Claude), Provider::Gemini);
        assert_eq!(detect_provider("google/2.0-flash", Provider::Claude), Provider::Gemini);
        assert_eq!(detect_provider("gemini-2.0-flash", Provider::Claude), Provider::Gemini);
    }

    #[test]
    fn empty_model_falls_back_to_default() {
        assert_eq!(detect_provider("", Provider::Gemini), Provider::Gemini);
    }

    #[test]
    fn normalize_model_strips_prefix_only_when_present() {
        assert_eq!(normalize_model("claude/sonnet-4"), "sonnet-4");
        assert_eq!(normalize_model("gemini-2.0-flash"), "gemini-2.0-flash");
    }
}
