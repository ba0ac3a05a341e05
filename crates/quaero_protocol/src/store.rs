//! Trait contracts for the engine's external collaborators: document
//! storage, job status tracking, a small key-value store for API keys,
//! event publication, and audit logging. Concrete implementations live
//! in `quaero_store`; this crate only defines the seams so that every
//! other crate can depend on an `Arc<dyn Trait>` without depending on
//! any particular backend.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::types::{AuditLogEntry, ChildJobStats, Document, DocumentId, JobId, JobStatus, StepId};

#[derive(Debug, Clone, Default)]
pub struct SearchOptions {
    pub tags: Vec<String>,
    pub limit: Option<u32>,
    pub metadata_filters: HashMap<String, String>,
}

#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn save_document(&self, doc: &Document) -> Result<()>;

    async fn get_document_by_source(&self, source_type: &str, source_id: &str) -> Result<Option<Document>>;

    async fn search(&self, text: Option<&str>, options: &SearchOptions) -> Result<Vec<Document>>;

    async fn get_document(&self, id: DocumentId) -> Result<Option<Document>>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

#[async_trait]
pub trait JobStatusManager: Send + Sync {
    async fn get_job(&self, id: JobId) -> Result<Option<crate::types::QueueJob>>;

    async fn update_job_status(&self, id: JobId, status: JobStatus) -> Result<()>;

    async fn set_job_error(&self, id: JobId, error: &str) -> Result<()>;

    async fn set_job_finished(&self, id: JobId, status: JobStatus) -> Result<()>;

    async fn get_job_child_stats(&self, step_ids: &[StepId]) -> Result<HashMap<StepId, ChildJobStats>>;

    async fn add_job_log(&self, job_id: JobId, level: LogLevel, message: &str) -> Result<()>;

    async fn add_job_log_with_context(
        &self,
        job_id: JobId,
        level: LogLevel,
        message: &str,
        step_name: Option<&str>,
        originator: Option<&str>,
    ) -> Result<()>;
}

#[async_trait]
pub trait KvStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>>;

    async fn set(&self, key: &str, value: &str) -> Result<()>;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub event_type: String,
    pub payload: serde_json::Value,
    pub timestamp: DateTime<Utc>,
}

impl Event {
    pub fn new(event_type: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            event_type: event_type.into(),
            payload,
            timestamp: Utc::now(),
        }
    }
}

#[async_trait]
pub trait EventService: Send + Sync {
    async fn publish(&self, event: Event) -> Result<()>;
}

#[async_trait]
pub trait AuditLog: Send + Sync {
    async fn record(&self, entry: AuditLogEntry) -> Result<i64>;

    async fn recent(&self, limit: u32) -> Result<Vec<AuditLogEntry>>;

    async fn count_by_success(&self, success: bool) -> Result<i64>;
}
