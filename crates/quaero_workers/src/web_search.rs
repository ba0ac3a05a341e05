//! Web-Search worker: a single grounded-search call, cached by query,
//! persisted as one new document with its grounding sources folded
//! into the markdown body.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use sha2::{Digest, Sha256};

use quaero_protocol::defaults::{DEFAULT_WEB_SEARCH_BREADTH, DEFAULT_WEB_SEARCH_CACHE_HOURS, DEFAULT_WEB_SEARCH_DEPTH};
use quaero_protocol::error::{ProtocolError, Result};
use quaero_protocol::store::{DocumentStore, KvStore};
use quaero_protocol::types::{ConfigLookup, Document, JobDefinition, JobId, JobStep, StepId, WorkerInitResult, WorkerType, WorkStrategy};
use quaero_protocol::worker::Worker;
use quaero_retry::{with_retry, CancellationToken, RetryConfig};

use crate::grounded_search::{dedup_sources, search, SearchSource};

struct WebSearchConfig {
    query: String,
    depth: u32,
    breadth: u32,
    cache_hours: i64,
    force_refresh: bool,
    output_tags: Vec<String>,
}

fn resolve_config(step: &JobStep) -> Result<WebSearchConfig> {
    let query = step
        .config_str("query")
        .map(str::trim)
        .filter(|q| !q.is_empty())
        .ok_or_else(|| ProtocolError::ConfigInvalid("web_search step requires a non-empty 'query'".to_string()))?
        .to_string();

    let depth = step.config_u32_or("depth", DEFAULT_WEB_SEARCH_DEPTH);
    let breadth = step.config_u32_or("breadth", DEFAULT_WEB_SEARCH_BREADTH);
    if depth == 0 || depth > 10 {
        return Err(ProtocolError::ConfigInvalid(format!("depth must be 1-10, got {depth}")));
    }
    if breadth == 0 || breadth > 5 {
        return Err(ProtocolError::ConfigInvalid(format!("breadth must be 1-5, got {breadth}")));
    }

    let cache_hours = step
        .config_get("cache_hours")
        .and_then(|v| v.as_i64())
        .unwrap_or(DEFAULT_WEB_SEARCH_CACHE_HOURS);
    let force_refresh = step.config_bool_or("force_refresh", false);
    let output_tags = step.config_str_list("output_tags").unwrap_or_default();

    Ok(WebSearchConfig { query, depth, breadth, cache_hours, force_refresh, output_tags })
}

/// Stable cache key: `web_search:` + first 16 hex chars of
/// `sha256(lowercased, trimmed query)`. Case and surrounding whitespace
/// never change the key.
pub fn source_id(query: &str) -> String {
    let normalized = query.trim().to_lowercase();
    let digest = Sha256::digest(normalized.as_bytes());
    let hex = format!("{digest:x}");
    format!("web_search:{}", &hex[..16])
}

pub struct WebSearchWorker {
    document_store: Arc<dyn DocumentStore>,
    kv: Arc<dyn KvStore>,
    client: reqwest::Client,
    model: String,
    retry: RetryConfig,
}

impl WebSearchWorker {
    pub fn new(document_store: Arc<dyn DocumentStore>, kv: Arc<dyn KvStore>, model: Option<String>) -> Self {
        Self {
            document_store,
            kv,
            client: reqwest::Client::new(),
            model: model.unwrap_or_else(|| quaero_protocol::defaults::default_model("gemini").to_string()),
            retry: RetryConfig::default(),
        }
    }

    async fn resolve_api_key(&self) -> Result<String> {
        match self.kv.get("gemini_api_key").await? {
            Some(key) if !key.is_empty() => Ok(key),
            _ => Err(ProtocolError::ConfigInvalid("no API key available for provider 'gemini'".to_string())),
        }
    }

    fn system_prompt(&self, depth: u32, breadth: u32) -> String {
        let today = Utc::now().format("%Y-%m-%d");
        format!(
            "Today's date is {today}. Perform a grounded web search and report factual, \
            current findings with sources. Search depth {depth}, follow-up breadth {breadth}."
        )
    }

    async fn run_search(&self, api_key: &str, system_prompt: &str, query: &str) -> Result<crate::grounded_search::GroundedSearchResult> {
        let cancel = CancellationToken::new();
        let client = self.client.clone();
        let api_key = api_key.to_string();
        let model = self.model.clone();
        let system_prompt = system_prompt.to_string();
        let query = query.to_string();

        let result = with_retry(&self.retry, &cancel, |_attempt| {
            let client = client.clone();
            let api_key = api_key.clone();
            let model = model.clone();
            let system_prompt = system_prompt.clone();
            let query = query.clone();
            async move { search(&client, &api_key, &model, &system_prompt, &query).await.map_err(|e| e.to_string()) }
        })
        .await;

        match result {
            Ok(value) => Ok(value),
            Err(quaero_retry::RetryError::Cancelled) => Err(ProtocolError::Cancelled("web search cancelled".to_string())),
            Err(quaero_retry::RetryError::Inner(message)) => {
                if quaero_retry::is_quota_exhausted(&message) {
                    Err(ProtocolError::ProviderQuotaExhausted(message))
                } else if quaero_retry::is_rate_limit(&message) {
                    Err(ProtocolError::ProviderRateLimited(message))
                } else {
                    Err(ProtocolError::ProviderTransient(message))
                }
            }
        }
    }

    fn render_content(&self, primary: &str, follow_ups: &[(String, String)]) -> String {
        let mut content = primary.to_string();
        for (query, text) in follow_ups {
            content.push_str(&format!("\n\n## Follow-up: {query}\n\n{text}"));
        }
        content
    }

    fn render_sources_section(&self, sources: &[SearchSource]) -> String {
        if sources.is_empty() {
            return String::new();
        }
        let mut section = String::from("\n\n## Sources\n\n");
        for source in sources {
            section.push_str(&format!("- [{}]({})\n", source.title, source.url));
        }
        section
    }
}

#[async_trait]
impl Worker for WebSearchWorker {
    fn worker_type(&self) -> WorkerType {
        WorkerType::WebSearch
    }

    fn validate_config(&self, step: &JobStep) -> Result<()> {
        resolve_config(step).map(|_| ())
    }

    async fn init(&self, step: &JobStep, _job_def: &JobDefinition) -> Result<WorkerInitResult> {
        let config = resolve_config(step)?;
        let id = source_id(&config.query);
        Ok(WorkerInitResult {
            work_items: vec![],
            total_count: 1,
            strategy: WorkStrategy::Inline,
            suggested_concurrency: 1,
            content_hash: id,
            metadata: Default::default(),
        })
    }

    async fn create_jobs(
        &self,
        step: &JobStep,
        _job_def: &JobDefinition,
        step_id: StepId,
        manager_id: JobId,
        _init_result: Option<WorkerInitResult>,
    ) -> Result<StepId> {
        let config = resolve_config(step)?;
        let id = source_id(&config.query);

        let cached = self.document_store.get_document_by_source("web_search", &id).await?;
        if let Some(doc) = &cached {
            if !config.force_refresh {
                if let Some(last_synced) = doc.last_synced {
                    let age_hours = (Utc::now() - last_synced).num_hours();
                    if age_hours < config.cache_hours {
                        tracing::info!(query = %config.query, age_hours, "web search cache hit, skipping provider call");
                        return Ok(step_id);
                    }
                }
            }
        }

        let api_key = self.resolve_api_key().await?;
        let system_prompt = self.system_prompt(config.depth, config.breadth);

        let primary = self.run_search(&api_key, &system_prompt, &config.query).await?;
        let mut all_sources = primary.sources.clone();
        let mut follow_ups = Vec::new();

        if config.depth > 1 {
            for query in primary.queries.iter().take(config.breadth as usize) {
                let follow_up = self.run_search(&api_key, &system_prompt, query).await?;
                all_sources.extend(follow_up.sources.clone());
                follow_ups.push((query.clone(), follow_up.text));
            }
        }

        let deduped_sources = dedup_sources(all_sources);
        let mut content = self.render_content(&primary.text, &follow_ups);
        content.push_str(&self.render_sources_section(&deduped_sources));

        let today = Utc::now().format("%Y-%m-%d").to_string();
        let mut tags = vec!["web-search".to_string(), format!("date:{today}")];
        tags.extend(config.output_tags.clone());
        tags.push(format!("cache:{id}"));

        let mut doc = Document::new("web_search", &id, config.query.clone(), content).with_tags(tags);
        if let Some(existing) = cached {
            doc.id = existing.id;
            doc.created_at = existing.created_at;
        }
        doc.jobs.insert(manager_id);

        self.document_store.save_document(&doc).await?;
        Ok(step_id)
    }

    fn returns_child_jobs(&self) -> bool {
        false
    }
}
