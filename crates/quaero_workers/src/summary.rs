//! Summary worker: synthesizes one new document from every document
//! matching a set of filter tags, via the Provider Dispatcher, with an
//! optional critique loop and an output-validation/regeneration loop.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;

use quaero_dispatcher::Dispatcher;
use quaero_protocol::defaults::{
    CRITIQUE_TEMPERATURE, CRITIQUE_TIMEOUT_SECS, DEFAULT_FILTER_LIMIT, DEFAULT_MAX_ITERATIONS,
    DOCUMENT_CONTENT_TRUNCATE_CHARS, GENERATION_TEMPERATURE, GENERATION_TIMEOUT_SECS, MAX_VALIDATION_ATTEMPTS,
};
use quaero_protocol::error::{ProtocolError, Result};
use quaero_protocol::store::{DocumentStore, SearchOptions};
use quaero_protocol::types::{
    ChatMessage, ConfigLookup, ConfigMap, ConfigValue, ContentRequest, Document, JobDefinition, JobId, JobStep,
    StepId, ThinkingLevel, ValidationResult, WorkStrategy, WorkerInitResult, WorkerType,
};
use quaero_protocol::worker::Worker;
use quaero_retry::CancellationToken;

use crate::config_helpers::{portfolio_table_markdown, propagate_ticker_tags, required_tickers_from_variables, resolve_filter_tags};
use crate::content_hash::content_hash;
use crate::json_repair::parse_with_repair;
use crate::personality::strip_personality_echo;
use crate::render::render;
use crate::templates::TemplateResolver;
use crate::validation;

struct SummaryContext {
    prompt: String,
    critique_prompt: Option<String>,
    filter_tags: Vec<String>,
    max_iterations: u32,
    thinking_level: Option<ThinkingLevel>,
    model: String,
    output_validation: Vec<String>,
    required_tickers: Vec<String>,
    benchmark_codes: Vec<String>,
    output_schema: Option<ConfigMap>,
    docs: Vec<Document>,
    content_hash: String,
    output_tags: Vec<String>,
    portfolio_table: Option<String>,
}

pub struct SummaryWorker {
    document_store: Arc<dyn DocumentStore>,
    dispatcher: Arc<Dispatcher>,
    templates: TemplateResolver,
}

impl SummaryWorker {
    pub fn new(document_store: Arc<dyn DocumentStore>, dispatcher: Arc<Dispatcher>, template_override_dir: Option<PathBuf>) -> Self {
        Self { document_store, dispatcher, templates: TemplateResolver::new(template_override_dir) }
    }

    async fn resolve_context(&self, step: &JobStep, job_def: &JobDefinition) -> Result<SummaryContext> {
        let (prompt, schema_ref) = match step.config_str("template") {
            Some(name) => {
                let resolved = self.templates.resolve(name)?;
                (resolved.prompt, resolved.schema_ref)
            }
            None => {
                let prompt = step
                    .config_str("prompt")
                    .filter(|p| !p.trim().is_empty())
                    .ok_or_else(|| ProtocolError::ConfigInvalid("summary step requires either 'template' or 'prompt'".to_string()))?
                    .to_string();
                (prompt, step.config_str("schema_ref").map(str::to_string))
            }
        };
        let schema_ref = step.config_str("output_schema_ref").map(str::to_string).or(schema_ref);

        let filter_tags = resolve_filter_tags(step);
        let filter_limit = step.config_u32_or("filter_limit", DEFAULT_FILTER_LIMIT);
        let max_iterations = step.config_u32_or("max_iterations", DEFAULT_MAX_ITERATIONS);
        let thinking_level = step.config_str("thinking_level").and_then(|s| s.parse().ok());
        let model = step.config_str_or("model", "").to_string();

        let output_validation = step.config_str_list("output_validation").unwrap_or_default();
        let required_tickers = step
            .config_str_list("required_tickers")
            .filter(|t| !t.is_empty())
            .unwrap_or_else(|| required_tickers_from_variables(job_def));
        let benchmark_codes = step.config_str_list("benchmark_codes").unwrap_or_default();

        let output_schema = match step.config_get("output_schema").and_then(ConfigValue::as_map) {
            Some(map) => Some(map.clone()),
            None => match &schema_ref {
                Some(reference) => Some(self.templates.load_schema(reference)?),
                None => None,
            },
        };

        let mut metadata_filters = std::collections::HashMap::new();
        if let Some(category) = step.config_str("rule_classifier_category") {
            metadata_filters.insert("rule_classifier.category".to_string(), category.to_string());
        }
        let options = SearchOptions { tags: filter_tags.clone(), limit: Some(filter_limit), metadata_filters };
        let docs = self.document_store.search(None, &options).await?;

        let doc_ids: Vec<String> = docs.iter().map(|d| d.id.to_string()).collect();
        let hash = content_hash(&prompt, &doc_ids);

        Ok(SummaryContext {
            prompt,
            critique_prompt: step.config_str("critique_prompt").map(str::to_string),
            filter_tags,
            max_iterations,
            thinking_level,
            model,
            output_validation,
            required_tickers,
            benchmark_codes,
            output_schema,
            docs,
            content_hash: hash,
            output_tags: step.config_str_list("output_tags").unwrap_or_default(),
            portfolio_table: portfolio_table_markdown(job_def),
        })
    }

    async fn generate(&self, ctx: &SummaryContext, current_prompt: &str, temperature: f32, timeout_secs: u64, with_schema: bool, cancel: &CancellationToken) -> Result<String> {
        let system_prompt = build_system_prompt(ctx, current_prompt);
        let mut request = ContentRequest::new(ctx.model.clone(), vec![ChatMessage::user("Generate the requested output now.")]);
        request.temperature = Some(temperature);
        request.system_instruction = Some(system_prompt);
        request.thinking_level = ctx.thinking_level;
        if with_schema {
            request.output_schema = ctx.output_schema.clone();
        }
        let response = self.dispatcher.generate_with_timeout(request, cancel, Duration::from_secs(timeout_secs)).await?;
        Ok(response.text)
    }

    async fn critique(&self, ctx: &SummaryContext, draft: &str, cancel: &CancellationToken) -> Result<String> {
        let instruction = build_critique_instruction(ctx.critique_prompt.as_deref().unwrap_or_default(), draft);
        let request = ContentRequest { temperature: Some(CRITIQUE_TEMPERATURE), ..ContentRequest::new(ctx.model.clone(), vec![ChatMessage::user(instruction)]) };
        let response = self.dispatcher.generate_with_timeout(request, cancel, Duration::from_secs(CRITIQUE_TIMEOUT_SECS)).await?;
        Ok(response.text)
    }
}

fn build_system_prompt(ctx: &SummaryContext, current_prompt: &str) -> String {
    let today = Utc::now().format("%Y-%m-%d");
    let mut prompt = format!("Today's date is {today}.\n\n");
    if let Some(table) = &ctx.portfolio_table {
        prompt.push_str(table);
        prompt.push_str("\n\n");
    }
    prompt.push_str(current_prompt);
    prompt.push_str("\n\n");
    for doc in &ctx.docs {
        prompt.push_str(&render_document_block(doc));
    }
    prompt
}

fn render_document_block(doc: &Document) -> String {
    let mut block = format!("### {}\n\nSource type: {}\n", doc.title, doc.source_type);
    if let Some(url) = doc.metadata.get("url").and_then(ConfigValue::as_str) {
        block.push_str(&format!("URL: {url}\n"));
    }
    block.push('\n');
    let content: String = if doc.content.chars().count() > DOCUMENT_CONTENT_TRUNCATE_CHARS {
        let truncated: String = doc.content.chars().take(DOCUMENT_CONTENT_TRUNCATE_CHARS).collect();
        format!("{truncated}\u{2026} [content truncated]")
    } else {
        doc.content.clone()
    };
    block.push_str(&content);
    block.push_str("\n\n");
    block
}

fn build_critique_instruction(critique_prompt: &str, draft: &str) -> String {
    format!(
        "{critique_prompt}\n\n---\nDRAFT TO CRITIQUE:\n\n{draft}\n\nIf the draft fully satisfies the brief, \
        respond with exactly NO_CHANGES_NEEDED. Otherwise enumerate the issues to fix."
    )
}

fn build_output_tags(job_def: &JobDefinition, ctx: &SummaryContext) -> Vec<String> {
    let mut tags = vec!["summary".to_string()];
    tags.push(job_def.name.to_lowercase().replace(' ', "-"));
    tags.extend(job_def.tags.clone());
    tags.extend(ctx.output_tags.clone());
    tags.push(format!("cache:{}", ctx.content_hash));
    for tag in propagate_ticker_tags(&ctx.docs) {
        if !tags.contains(&tag) {
            tags.push(tag);
        }
    }
    tags
}

fn build_metadata(job_def: &JobDefinition, manager_id: JobId, ctx: &SummaryContext, validation_result: &ValidationResult) -> ConfigMap {
    let mut metadata = ConfigMap::new();
    metadata.insert("prompt".to_string(), ConfigValue::String(ctx.prompt.clone()));
    metadata.insert(
        "source_document_ids".to_string(),
        ConfigValue::Array(ctx.docs.iter().map(|d| ConfigValue::String(d.id.to_string())).collect()),
    );
    metadata.insert("source_count".to_string(), ConfigValue::Number(ctx.docs.len() as f64));
    metadata.insert("manager_id".to_string(), ConfigValue::String(manager_id.to_string()));
    metadata.insert("generated_at".to_string(), ConfigValue::String(Utc::now().to_rfc3339()));
    metadata.insert("job_name".to_string(), ConfigValue::String(job_def.name.clone()));
    metadata.insert("job_id".to_string(), ConfigValue::String(job_def.id.clone()));

    let mut validation_meta = ConfigMap::new();
    validation_meta.insert("validation_passed".to_string(), ConfigValue::Bool(validation_result.valid));
    validation_meta.insert("iteration_count".to_string(), ConfigValue::Number(validation_result.iteration_count as f64));
    validation_meta.insert("max_iterations".to_string(), ConfigValue::Number(MAX_VALIDATION_ATTEMPTS as f64));
    validation_meta.insert(
        "tickers_validated".to_string(),
        ConfigValue::Array(ctx.required_tickers.iter().map(|t| ConfigValue::String(t.clone())).collect()),
    );
    validation_meta.insert("benchmark_check_passed".to_string(), ConfigValue::Bool(validation_result.benchmark_issues.is_empty()));
    metadata.insert("output_validation".to_string(), ConfigValue::Map(validation_meta));

    metadata
}

#[async_trait]
impl Worker for SummaryWorker {
    fn worker_type(&self) -> WorkerType {
        WorkerType::Summary
    }

    fn validate_config(&self, step: &JobStep) -> Result<()> {
        match step.config_str("template") {
            Some(name) => self.templates.resolve(name).map(|_| ()),
            None => {
                if step.config_str("prompt").map(str::trim).unwrap_or("").is_empty() {
                    Err(ProtocolError::ConfigInvalid("summary step requires either 'template' or 'prompt'".to_string()))
                } else {
                    Ok(())
                }
            }
        }
    }

    async fn init(&self, step: &JobStep, job_def: &JobDefinition) -> Result<WorkerInitResult> {
        let ctx = self.resolve_context(step, job_def).await?;
        let mut metadata = ConfigMap::new();
        metadata.insert("filter_tags".to_string(), ConfigValue::Array(ctx.filter_tags.iter().map(|t| ConfigValue::String(t.clone())).collect()));
        Ok(WorkerInitResult {
            work_items: vec![],
            total_count: ctx.docs.len() as u32,
            strategy: WorkStrategy::Inline,
            suggested_concurrency: 1,
            content_hash: ctx.content_hash,
            metadata,
        })
    }

    async fn create_jobs(&self, step: &JobStep, job_def: &JobDefinition, step_id: StepId, manager_id: JobId, _init_result: Option<WorkerInitResult>) -> Result<StepId> {
        let ctx = self.resolve_context(step, job_def).await?;
        let cancel = CancellationToken::new();
        let mut current_prompt = ctx.prompt.clone();

        let mut draft = if ctx.max_iterations > 0 && ctx.critique_prompt.is_some() {
            let mut draft = String::new();
            for iteration in 0..=ctx.max_iterations {
                draft = self.generate(&ctx, &current_prompt, GENERATION_TEMPERATURE, GENERATION_TIMEOUT_SECS, ctx.output_schema.is_some(), &cancel).await?;
                if iteration == ctx.max_iterations {
                    break;
                }
                let critique_text = self.critique(&ctx, &draft, &cancel).await?;
                if critique_text.to_uppercase().contains("NO_CHANGES_NEEDED") {
                    break;
                }
                current_prompt = format!("{current_prompt}\n\n---\nPREVIOUS DRAFT CRITIQUE (MUST ADDRESS):\n\n{critique_text}");
            }
            draft
        } else {
            self.generate(&ctx, &current_prompt, GENERATION_TEMPERATURE, GENERATION_TIMEOUT_SECS, ctx.output_schema.is_some(), &cancel).await?
        };

        let needs_validation = !ctx.required_tickers.is_empty() || !ctx.benchmark_codes.is_empty() || !ctx.output_validation.is_empty();
        let mut final_validation = ValidationResult::passed(0);
        if needs_validation {
            let mut attempt = 1u32;
            loop {
                let result = validation::validate(&draft, &ctx.required_tickers, &ctx.benchmark_codes, &ctx.output_validation, attempt);
                if result.valid {
                    final_validation = result;
                    break;
                }
                if attempt >= MAX_VALIDATION_ATTEMPTS {
                    return Err(ProtocolError::ValidationFailed(validation::failure_message(&result)));
                }
                current_prompt.push_str(&validation::feedback_section(&result));
                draft = self.generate(&ctx, &current_prompt, GENERATION_TEMPERATURE, GENERATION_TIMEOUT_SECS, ctx.output_schema.is_some(), &cancel).await?;
                attempt += 1;
            }
        }

        let rendered = if ctx.output_schema.is_some() {
            match parse_with_repair(&draft) {
                Ok(value) => render(&value),
                Err(_) => strip_personality_echo(&draft),
            }
        } else {
            strip_personality_echo(&draft)
        };

        let tags = build_output_tags(job_def, &ctx);
        let metadata = build_metadata(job_def, manager_id, &ctx, &final_validation);

        let title = format!("{} summary", job_def.name);
        let source_id = format!("{}:{}", job_def.id, step.name);
        let mut doc = Document::new("summary", source_id, title, rendered).with_tags(tags);
        doc.metadata = metadata;
        doc.jobs.insert(manager_id);

        self.document_store.save_document(&doc).await?;
        Ok(step_id)
    }

    fn returns_child_jobs(&self) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait as async_trait_attr;
    use quaero_dispatcher::DispatcherConfig;
    use quaero_protocol::store::KvStore;
    use quaero_protocol::types::DocumentId;

    struct NullKv;
    #[async_trait_attr]
    impl KvStore for NullKv {
        async fn get(&self, _key: &str) -> Result<Option<String>> {
            Ok(None)
        }
        async fn set(&self, _key: &str, _value: &str) -> Result<()> {
            Ok(())
        }
    }

    #[derive(Default)]
    struct FakeDocumentStore {
        docs: Vec<Document>,
    }

    #[async_trait_attr]
    impl DocumentStore for FakeDocumentStore {
        async fn save_document(&self, _doc: &Document) -> Result<()> {
            Ok(())
        }
        async fn get_document_by_source(&self, _source_type: &str, _source_id: &str) -> Result<Option<Document>> {
            Ok(None)
        }
        async fn search(&self, _text: Option<&str>, _options: &SearchOptions) -> Result<Vec<Document>> {
            Ok(self.docs.clone())
        }
        async fn get_document(&self, _id: DocumentId) -> Result<Option<Document>> {
            Ok(None)
        }
    }

    fn worker(docs: Vec<Document>) -> SummaryWorker {
        let store = Arc::new(FakeDocumentStore { docs });
        let dispatcher = Arc::new(Dispatcher::new(DispatcherConfig::default(), Arc::new(NullKv)));
        SummaryWorker::new(store, dispatcher, None)
    }

    fn step_with(config: ConfigMap) -> JobStep {
        JobStep { name: "weekly-digest".to_string(), worker_type: WorkerType::Summary, config }
    }

    fn job_def() -> JobDefinition {
        JobDefinition { id: "job-1".to_string(), name: "Weekly Digest".to_string(), steps: vec![], tags: vec!["portfolio".to_string()], config: ConfigMap::new() }
    }

    #[test]
    fn validate_config_requires_template_or_prompt() {
        let worker = worker(vec![]);
        let step = step_with(ConfigMap::new());
        assert!(worker.validate_config(&step).is_err());
    }

    #[test]
    fn validate_config_accepts_inline_prompt() {
        let worker = worker(vec![]);
        let mut config = ConfigMap::new();
        config.insert("prompt".to_string(), ConfigValue::String("Summarize".to_string()));
        let step = step_with(config);
        assert!(worker.validate_config(&step).is_ok());
    }

    #[tokio::test]
    async fn resolve_context_computes_content_hash_from_prompt_and_docs() {
        let doc = Document::new("rss", "s1", "Doc One", "content").with_tags(vec!["docs".to_string()]);
        let worker = worker(vec![doc]);
        let mut config = ConfigMap::new();
        config.insert("prompt".to_string(), ConfigValue::String("Summarize".to_string()));
        config.insert("filter_tags".to_string(), ConfigValue::Array(vec![ConfigValue::String("docs".to_string())]));
        let step = step_with(config);

        let ctx = worker.resolve_context(&step, &job_def()).await.unwrap();
        assert_eq!(ctx.docs.len(), 1);
        assert_eq!(ctx.content_hash.len(), 8);
    }

    #[test]
    fn build_output_tags_includes_summary_job_name_and_cache_tag() {
        let ctx = SummaryContext {
            prompt: "p".to_string(),
            critique_prompt: None,
            filter_tags: vec![],
            max_iterations: 0,
            thinking_level: None,
            model: String::new(),
            output_validation: vec![],
            required_tickers: vec![],
            benchmark_codes: vec![],
            output_schema: None,
            docs: vec![],
            content_hash: "abcd1234".to_string(),
            output_tags: vec!["finance".to_string()],
            portfolio_table: None,
        };
        let tags = build_output_tags(&job_def(), &ctx);
        assert!(tags.contains(&"summary".to_string()));
        assert!(tags.contains(&"weekly-digest".to_string()));
        assert!(tags.contains(&"portfolio".to_string()));
        assert!(tags.contains(&"finance".to_string()));
        assert!(tags.contains(&"cache:abcd1234".to_string()));
    }

    #[test]
    fn build_system_prompt_includes_date_prompt_and_docs() {
        let doc = Document::new("rss", "s1", "Doc One", "body text");
        let ctx = SummaryContext {
            prompt: "Summarize the docs".to_string(),
            critique_prompt: None,
            filter_tags: vec![],
            max_iterations: 0,
            thinking_level: None,
            model: String::new(),
            output_validation: vec![],
            required_tickers: vec![],
            benchmark_codes: vec![],
            output_schema: None,
            docs: vec![doc],
            content_hash: "x".to_string(),
            output_tags: vec![],
            portfolio_table: None,
        };
        let system_prompt = build_system_prompt(&ctx, &ctx.prompt);
        assert!(system_prompt.contains("Summarize the docs"));
        assert!(system_prompt.contains("Doc One"));
        assert!(system_prompt.contains("body text"));
    }
}
