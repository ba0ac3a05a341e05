//! Grounded-search calls: a generation request augmented with Gemini's
//! Google Search retrieval tool, returning both the generated text and
//! the sources that grounded it. Kept separate from `quaero_dispatcher`
//! because `ContentRequest`/`ContentResponse` carry no notion of
//! grounding sources or follow-up queries.

use quaero_protocol::error::{ProtocolError, Result};
use serde::Deserialize;
use serde_json::json;

const API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta/models";

#[derive(Debug, Clone)]
pub struct SearchSource {
    pub url: String,
    pub title: String,
}

#[derive(Debug, Clone, Default)]
pub struct GroundedSearchResult {
    pub text: String,
    pub queries: Vec<String>,
    pub sources: Vec<SearchSource>,
}

#[derive(Deserialize)]
struct GroundedResponse {
    candidates: Vec<GroundedCandidate>,
}

#[derive(Deserialize)]
struct GroundedCandidate {
    content: GroundedContent,
    #[serde(default, rename = "groundingMetadata")]
    grounding_metadata: Option<GroundingMetadata>,
}

#[derive(Deserialize)]
struct GroundedContent {
    #[serde(default)]
    parts: Vec<GroundedPart>,
}

#[derive(Deserialize)]
struct GroundedPart {
    #[serde(default)]
    text: String,
}

#[derive(Deserialize, Default)]
struct GroundingMetadata {
    #[serde(default, rename = "webSearchQueries")]
    web_search_queries: Vec<String>,
    #[serde(default, rename = "groundingChunks")]
    grounding_chunks: Vec<GroundingChunk>,
}

#[derive(Deserialize)]
struct GroundingChunk {
    #[serde(default)]
    web: Option<GroundingChunkWeb>,
}

#[derive(Deserialize)]
struct GroundingChunkWeb {
    #[serde(default)]
    uri: String,
    #[serde(default)]
    title: String,
}

/// Issues a single grounded-search call. `system_prompt` carries the
/// search-framing instructions (today's date, depth/breadth context);
/// `query` is the user-facing search question.
pub async fn search(
    client: &reqwest::Client,
    api_key: &str,
    model: &str,
    system_prompt: &str,
    query: &str,
) -> Result<GroundedSearchResult> {
    let body = json!({
        "contents": [{ "role": "user", "parts": [{ "text": query }] }],
        "systemInstruction": { "parts": [{ "text": system_prompt }] },
        "tools": [{ "google_search": {} }],
    });

    let url = format!("{API_BASE}/{model}:generateContent?key={api_key}");
    let response = client
        .post(&url)
        .json(&body)
        .send()
        .await
        .map_err(|e| ProtocolError::ProviderTransient(e.to_string()))?;

    let status = response.status();
    let text = response.text().await.map_err(|e| ProtocolError::ProviderTransient(e.to_string()))?;
    if !status.is_success() {
        return Err(classify(status.as_u16(), text));
    }

    let parsed: GroundedResponse = serde_json::from_str(&text).map_err(|e| ProtocolError::SchemaParse(e.to_string()))?;
    let candidate = parsed
        .candidates
        .into_iter()
        .next()
        .ok_or_else(|| ProtocolError::ProviderTransient("grounded search returned no candidates".to_string()))?;

    let combined = candidate.content.parts.iter().map(|p| p.text.as_str()).collect::<Vec<_>>().join("");
    let metadata = candidate.grounding_metadata.unwrap_or_default();
    let sources = metadata
        .grounding_chunks
        .into_iter()
        .filter_map(|chunk| chunk.web)
        .filter(|web| !web.uri.is_empty())
        .map(|web| SearchSource { url: web.uri, title: web.title })
        .collect();

    Ok(GroundedSearchResult { text: combined, queries: metadata.web_search_queries, sources })
}

fn classify(status: u16, body: String) -> ProtocolError {
    let message = format!("HTTP {status}: {body}");
    if quaero_retry::is_quota_exhausted(&message) {
        ProtocolError::ProviderQuotaExhausted(message)
    } else if status == 429 || quaero_retry::is_rate_limit(&message) {
        ProtocolError::ProviderRateLimited(message)
    } else {
        ProtocolError::ProviderTransient(message)
    }
}

/// Deduplicates sources by URL, keeping the first title seen for each.
pub fn dedup_sources(sources: Vec<SearchSource>) -> Vec<SearchSource> {
    let mut seen = std::collections::HashSet::new();
    sources.into_iter().filter(|s| seen.insert(s.url.clone())).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dedup_sources_keeps_first_occurrence_per_url() {
        let sources = vec![
            SearchSource { url: "https://a.example".to_string(), title: "First".to_string() },
            SearchSource { url: "https://a.example".to_string(), title: "Duplicate".to_string() },
            SearchSource { url: "https://b.example".to_string(), title: "Other".to_string() },
        ];
        let deduped = dedup_sources(sources);
        assert_eq!(deduped.len(), 2);
        assert_eq!(deduped[0].title, "First");
    }

    #[test]
    fn classify_maps_429_to_rate_limited() {
        let err = classify(429, "Please retry in 2s, RESOURCE_EXHAUSTED".to_string());
        assert!(matches!(err, ProtocolError::ProviderRateLimited(_)));
    }

    #[test]
    fn classify_maps_zero_quota_to_quota_exhausted() {
        let err = classify(429, "RESOURCE_EXHAUSTED: limit: 0 quota exceeded daily".to_string());
        assert!(matches!(err, ProtocolError::ProviderQuotaExhausted(_)));
    }
}
