//! Canonical data model for the job-orchestration core.
//!
//! Every other crate in the workspace builds on the types defined here:
//! the scheduler, the step monitor, the provider dispatcher, and the
//! worker implementations all speak these types rather than their own
//! ad hoc structs.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ============================================================================
// Identifiers
// ============================================================================

macro_rules! uuid_id {
    ($name:ident) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(Uuid);

        impl $name {
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }

            pub fn from_uuid(id: Uuid) -> Self {
                Self(id)
            }

            pub fn as_uuid(&self) -> Uuid {
                self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl FromStr for $name {
            type Err = uuid::Error;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Ok(Self(Uuid::parse_str(s)?))
            }
        }
    };
}

uuid_id!(JobId);
uuid_id!(StepId);
uuid_id!(DocumentId);

// ============================================================================
// Job status (canonical definition — use this everywhere)
// ============================================================================

/// Lifecycle status of a `QueueJob`. The terminal set is
/// `{Completed, Failed, Cancelled}`; once a job reaches one of these its
/// status does not change again except via an explicit cancel of a job
/// that was still running.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    #[default]
    Pending,
    Queued,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub const ALL: &'static [JobStatus] = &[
        JobStatus::Pending,
        JobStatus::Queued,
        JobStatus::Running,
        JobStatus::Completed,
        JobStatus::Failed,
        JobStatus::Cancelled,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "PENDING",
            JobStatus::Queued => "QUEUED",
            JobStatus::Running => "RUNNING",
            JobStatus::Completed => "COMPLETED",
            JobStatus::Failed => "FAILED",
            JobStatus::Cancelled => "CANCELLED",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled
        )
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "PENDING" => Ok(JobStatus::Pending),
            "QUEUED" => Ok(JobStatus::Queued),
            "RUNNING" => Ok(JobStatus::Running),
            "COMPLETED" => Ok(JobStatus::Completed),
            "FAILED" => Ok(JobStatus::Failed),
            "CANCELLED" | "CANCELED" => Ok(JobStatus::Cancelled),
            _ => Err(format!("invalid job status: '{s}'")),
        }
    }
}

/// Which tier of the job hierarchy a `QueueJob` occupies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    /// Top-level job representing a whole pipeline run.
    Manager,
    /// One per step in a job definition, owned by a manager job.
    Step,
    /// One per work item a worker chose to fan out, owned by a step job.
    Worker,
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            JobKind::Manager => "manager",
            JobKind::Step => "step",
            JobKind::Worker => "worker",
        };
        write!(f, "{s}")
    }
}

/// `StepId` and `JobId` share the underlying UUID space: the step-kind
/// `QueueJob` that owns a step's worker-job children always carries the
/// `JobId` built from that step's UUID. Workers set `parent_id` to this
/// value when they spawn, and monitors use it to query child aggregates
/// without a separate step-to-job lookup table.
pub fn step_job_id(step_id: StepId) -> JobId {
    JobId::from_uuid(step_id.as_uuid())
}

/// A single row in the in-process job queue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueJob {
    pub id: JobId,
    pub kind: JobKind,
    pub name: String,
    pub parent_id: Option<JobId>,
    pub manager_id: JobId,
    pub status: JobStatus,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
}

impl QueueJob {
    pub fn new_manager(name: impl Into<String>) -> Self {
        let id = JobId::new();
        Self {
            id,
            kind: JobKind::Manager,
            name: name.into(),
            parent_id: None,
            manager_id: id,
            status: JobStatus::Pending,
            started_at: None,
            finished_at: None,
            error: None,
        }
    }

    pub fn new_child(kind: JobKind, name: impl Into<String>, parent_id: JobId, manager_id: JobId) -> Self {
        Self {
            id: JobId::new(),
            kind,
            name: name.into(),
            parent_id: Some(parent_id),
            manager_id,
            status: JobStatus::Pending,
            started_at: None,
            finished_at: None,
            error: None,
        }
    }
}

/// Aggregate counts of a step job's worker-job children, recomputed on
/// every monitor poll. `total == pending + running + completed + failed +
/// cancelled` always holds.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct ChildJobStats {
    pub total: u32,
    pub pending: u32,
    pub running: u32,
    pub completed: u32,
    pub failed: u32,
    pub cancelled: u32,
}

impl ChildJobStats {
    pub fn settled(&self) -> u32 {
        self.completed + self.failed + self.cancelled
    }

    pub fn all_settled(&self) -> bool {
        self.total > 0 && self.settled() == self.total
    }

    pub fn progress_text(&self) -> String {
        format!(
            "{}/{} done ({} ok, {} failed, {} cancelled)",
            self.settled(),
            self.total,
            self.completed,
            self.failed,
            self.cancelled
        )
    }
}

// ============================================================================
// Typed configuration accessor layer (design note: dynamically-typed
// configuration maps). Config values arrive as untyped maps decoded from
// TOML or JSON where a given field may surface as an integer, a 64-bit
// integer, or a float depending on the decoder; `ConfigValue` normalizes
// over all of that so callers never inspect the raw representation.
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ConfigValue {
    Null,
    Bool(bool),
    Number(f64),
    String(String),
    Array(Vec<ConfigValue>),
    Map(ConfigMap),
}

pub type ConfigMap = BTreeMap<String, ConfigValue>;

impl ConfigValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            ConfigValue::String(s) => Some(s.as_str()),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            ConfigValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_u32(&self) -> Option<u32> {
        match self {
            ConfigValue::Number(n) if *n >= 0.0 => Some(*n as u32),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            ConfigValue::Number(n) => Some(*n as i64),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            ConfigValue::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_str_list(&self) -> Option<Vec<String>> {
        match self {
            ConfigValue::Array(items) => Some(
                items
                    .iter()
                    .filter_map(|v| v.as_str().map(str::to_string))
                    .collect(),
            ),
            ConfigValue::String(s) => Some(vec![s.clone()]),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&ConfigMap> {
        match self {
            ConfigValue::Map(m) => Some(m),
            _ => None,
        }
    }
}

impl From<&str> for ConfigValue {
    fn from(s: &str) -> Self {
        ConfigValue::String(s.to_string())
    }
}

impl From<String> for ConfigValue {
    fn from(s: String) -> Self {
        ConfigValue::String(s)
    }
}

impl From<i64> for ConfigValue {
    fn from(n: i64) -> Self {
        ConfigValue::Number(n as f64)
    }
}

impl From<u32> for ConfigValue {
    fn from(n: u32) -> Self {
        ConfigValue::Number(n as f64)
    }
}

impl From<bool> for ConfigValue {
    fn from(b: bool) -> Self {
        ConfigValue::Bool(b)
    }
}

/// Lookup helper implemented by both `JobStep::config` and
/// `JobDefinition::config`, so workers can read either without caring
/// which map backs a given value.
pub trait ConfigLookup {
    fn config_get(&self, key: &str) -> Option<&ConfigValue>;

    fn config_str(&self, key: &str) -> Option<&str> {
        self.config_get(key).and_then(ConfigValue::as_str)
    }

    fn config_str_or<'a>(&'a self, key: &str, default: &'a str) -> &'a str {
        self.config_str(key).unwrap_or(default)
    }

    fn config_u32(&self, key: &str) -> Option<u32> {
        self.config_get(key).and_then(ConfigValue::as_u32)
    }

    fn config_u32_or(&self, key: &str, default: u32) -> u32 {
        self.config_u32(key).unwrap_or(default)
    }

    fn config_bool_or(&self, key: &str, default: bool) -> bool {
        self.config_get(key)
            .and_then(ConfigValue::as_bool)
            .unwrap_or(default)
    }

    fn config_str_list(&self, key: &str) -> Option<Vec<String>> {
        self.config_get(key).and_then(ConfigValue::as_str_list)
    }
}

// ============================================================================
// Job definitions and steps
// ============================================================================

/// Identifies which `Worker` implementation a step binds to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerType {
    Summary,
    WebSearch,
}

impl fmt::Display for WorkerType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            WorkerType::Summary => "summary",
            WorkerType::WebSearch => "web_search",
        };
        write!(f, "{s}")
    }
}

impl FromStr for WorkerType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "summary" => Ok(WorkerType::Summary),
            "web_search" => Ok(WorkerType::WebSearch),
            other => Err(format!("unrecognized worker type: '{other}'")),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobStep {
    pub name: String,
    pub worker_type: WorkerType,
    #[serde(default)]
    pub config: ConfigMap,
}

impl ConfigLookup for JobStep {
    fn config_get(&self, key: &str) -> Option<&ConfigValue> {
        self.config.get(key)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobDefinition {
    pub id: String,
    pub name: String,
    pub steps: Vec<JobStep>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub config: ConfigMap,
}

impl ConfigLookup for JobDefinition {
    fn config_get(&self, key: &str) -> Option<&ConfigValue> {
        self.config.get(key)
    }
}

impl JobDefinition {
    /// The `variables` sub-map, used by the summary worker for portfolio
    /// tables and required-ticker inference.
    pub fn variables(&self) -> Option<&ConfigMap> {
        self.config.get("variables").and_then(ConfigValue::as_map)
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.steps.is_empty() {
            return Err("job definition must declare at least one step".to_string());
        }
        let mut seen = BTreeSet::new();
        for step in &self.steps {
            if step.name.is_empty() {
                return Err("step name must not be empty".to_string());
            }
            if !seen.insert(step.name.as_str()) {
                return Err(format!("duplicate step name: '{}'", step.name));
            }
        }
        Ok(())
    }
}

// ============================================================================
// Documents
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    pub id: DocumentId,
    pub source_type: String,
    pub source_id: String,
    pub title: String,
    pub content: String,
    #[serde(default)]
    pub detail_level: Option<String>,
    #[serde(default)]
    pub metadata: ConfigMap,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub jobs: BTreeSet<JobId>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub last_synced: Option<DateTime<Utc>>,
}

impl Document {
    pub fn new(source_type: impl Into<String>, source_id: impl Into<String>, title: impl Into<String>, content: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: DocumentId::new(),
            source_type: source_type.into(),
            source_id: source_id.into(),
            title: title.into(),
            content: content.into(),
            detail_level: None,
            metadata: ConfigMap::new(),
            tags: Vec::new(),
            jobs: BTreeSet::new(),
            created_at: now,
            updated_at: now,
            last_synced: Some(now),
        }
    }

    pub fn with_tags(mut self, tags: impl IntoIterator<Item = String>) -> Self {
        for tag in tags {
            let tag = tag.to_lowercase();
            if !self.tags.contains(&tag) {
                self.tags.push(tag);
            }
        }
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkStrategy {
    Inline,
    Spawn,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerInitResult {
    pub work_items: Vec<ConfigMap>,
    pub total_count: u32,
    pub strategy: WorkStrategy,
    pub suggested_concurrency: u32,
    pub content_hash: String,
    #[serde(default)]
    pub metadata: ConfigMap,
}

// ============================================================================
// Provider-agnostic content model
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self { role: Role::System, content: content.into() }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self { role: Role::User, content: content.into() }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self { role: Role::Assistant, content: content.into() }
    }
}

/// Remote or local text-generation backend, identified by model-name
/// prefix at dispatch time (see `quaero_dispatcher::detect_provider`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    Claude,
    Gemini,
    Local,
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Provider::Claude => "claude",
            Provider::Gemini => "gemini",
            Provider::Local => "local",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ThinkingLevel {
    Minimal,
    Low,
    Medium,
    High,
}

impl FromStr for ThinkingLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "MINIMAL" => Ok(ThinkingLevel::Minimal),
            "LOW" => Ok(ThinkingLevel::Low),
            "MEDIUM" => Ok(ThinkingLevel::Medium),
            "HIGH" => Ok(ThinkingLevel::High),
            other => Err(format!("unrecognized thinking level: '{other}'")),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContentRequest {
    pub messages: Vec<ChatMessage>,
    pub model: String,
    #[serde(default)]
    pub temperature: Option<f32>,
    #[serde(default)]
    pub max_tokens: Option<u32>,
    #[serde(default)]
    pub system_instruction: Option<String>,
    #[serde(default)]
    pub thinking_level: Option<ThinkingLevel>,
    #[serde(default)]
    pub output_schema: Option<ConfigMap>,
}

impl ContentRequest {
    pub fn new(model: impl Into<String>, messages: Vec<ChatMessage>) -> Self {
        Self {
            messages,
            model: model.into(),
            temperature: None,
            max_tokens: None,
            system_instruction: None,
            thinking_level: None,
            output_schema: None,
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.messages.is_empty() {
            return Err("messages cannot be empty".to_string());
        }
        if !self.messages.iter().any(|m| m.role == Role::User) {
            return Err("at least one message must have role 'user'".to_string());
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContentResponse {
    pub text: String,
    pub provider: Provider,
    pub model: String,
}

// ============================================================================
// Audit log
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuditOperation {
    Embed,
    Chat,
}

impl fmt::Display for AuditOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AuditOperation::Embed => "embed",
            AuditOperation::Chat => "chat",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditLogEntry {
    pub id: Option<i64>,
    pub timestamp: DateTime<Utc>,
    pub mode: String,
    pub operation: AuditOperation,
    pub success: bool,
    pub error: Option<String>,
    pub duration_ms: i64,
    pub query_text: Option<String>,
}

impl AuditLogEntry {
    pub fn new(mode: impl Into<String>, operation: AuditOperation) -> Self {
        Self {
            id: None,
            timestamp: Utc::now(),
            mode: mode.into(),
            operation,
            success: true,
            error: None,
            duration_ms: 0,
            query_text: None,
        }
    }

    pub fn with_duration(mut self, duration_ms: i64) -> Self {
        self.duration_ms = duration_ms;
        self
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.success = false;
        self.error = Some(error.into());
        self
    }

    pub fn with_query_text(mut self, query_text: Option<String>) -> Self {
        self.query_text = query_text;
        self
    }
}

// ============================================================================
// Validation
// ============================================================================

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ValidationResult {
    pub valid: bool,
    pub missing_tickers: Vec<String>,
    pub benchmark_issues: Vec<String>,
    pub pattern_issues: Vec<String>,
    pub iteration_count: u32,
}

impl ValidationResult {
    pub fn passed(iteration_count: u32) -> Self {
        Self {
            valid: true,
            missing_tickers: Vec::new(),
            benchmark_issues: Vec::new(),
            pattern_issues: Vec::new(),
            iteration_count,
        }
    }

    pub fn recompute_valid(&mut self) {
        self.valid = self.missing_tickers.is_empty()
            && self.benchmark_issues.is_empty()
            && self.pattern_issues.is_empty();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn job_status_roundtrips_through_str() {
        for status in JobStatus::ALL {
            let parsed: JobStatus = status.as_str().parse().unwrap();
            assert_eq!(parsed, *status);
        }
    }

    #[test]
    fn terminal_set_is_exactly_completed_failed_cancelled() {
        assert!(JobStatus::Completed.is_terminal());
        assert!(JobStatus::Failed.is_terminal());
        assert!(JobStatus::Cancelled.is_terminal());
        assert!(!JobStatus::Pending.is_terminal());
        assert!(!JobStatus::Queued.is_terminal());
        assert!(!JobStatus::Running.is_terminal());
    }

    #[test]
    fn child_job_stats_settled_matches_sum() {
        let stats = ChildJobStats {
            total: 5,
            pending: 1,
            running: 1,
            completed: 2,
            failed: 1,
            cancelled: 0,
        };
        assert_eq!(stats.settled(), 3);
        assert!(!stats.all_settled());
    }

    #[test]
    fn config_value_numeric_accessors_accept_any_numeric_form() {
        let v = ConfigValue::Number(42.0);
        assert_eq!(v.as_u32(), Some(42));
        assert_eq!(v.as_i64(), Some(42));
        assert_eq!(v.as_f64(), Some(42.0));
    }

    #[test]
    fn job_definition_validate_rejects_empty_and_duplicate_steps() {
        let mut def = JobDefinition {
            id: "d1".into(),
            name: "d".into(),
            steps: vec![],
            tags: vec![],
            config: ConfigMap::new(),
        };
        assert!(def.validate().is_err());

        def.steps.push(JobStep {
            name: "s1".into(),
            worker_type: WorkerType::Summary,
            config: ConfigMap::new(),
        });
        def.steps.push(JobStep {
            name: "s1".into(),
            worker_type: WorkerType::WebSearch,
            config: ConfigMap::new(),
        });
        assert!(def.validate().is_err());
    }

    #[test]
    fn content_request_validate_requires_user_message() {
        let req = ContentRequest::new("claude-sonnet-4-20250514", vec![ChatMessage::system("hi")]);
        assert!(req.validate().is_err());

        let req = ContentRequest::new("claude-sonnet-4-20250514", vec![ChatMessage::user("hi")]);
        assert!(req.validate().is_ok());
    }

    #[test]
    fn worker_type_display_and_parse_roundtrip() {
        assert_eq!("summary".parse::<WorkerType>().unwrap(), WorkerType::Summary);
        assert_eq!(WorkerType::WebSearch.to_string(), "web_search");
    }
}
