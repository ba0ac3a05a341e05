//! In-memory reference implementations of the engine's storage contracts.
//!
//! These back local operation and the test suite. They are intentionally
//! simple: a `Mutex`-guarded `HashMap`/`Vec` per concern, no persistence
//! across restarts, no secondary indexes beyond what `search` needs.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use quaero_protocol::error::Result;
use quaero_protocol::store::{DocumentStore, Event, EventService, JobStatusManager, KvStore, LogLevel, SearchOptions};
use quaero_protocol::types::{step_job_id, ChildJobStats, Document, DocumentId, JobId, JobStatus, QueueJob, StepId};

#[derive(Default)]
pub struct InMemoryDocumentStore {
    by_id: Mutex<HashMap<DocumentId, Document>>,
}

impl InMemoryDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DocumentStore for InMemoryDocumentStore {
    async fn save_document(&self, doc: &Document) -> Result<()> {
        self.by_id.lock().unwrap().insert(doc.id, doc.clone());
        Ok(())
    }

    async fn get_document_by_source(&self, source_type: &str, source_id: &str) -> Result<Option<Document>> {
        let docs = self.by_id.lock().unwrap();
        Ok(docs
            .values()
            .find(|d| d.source_type == source_type && d.source_id == source_id)
            .cloned())
    }

    async fn search(&self, text: Option<&str>, options: &SearchOptions) -> Result<Vec<Document>> {
        let docs = self.by_id.lock().unwrap();
        let needle = text.map(str::to_lowercase);

        let mut matches: Vec<Document> = docs
            .values()
            .filter(|d| {
                if !options.tags.is_empty() && !options.tags.iter().all(|tag| d.tags.contains(tag)) {
                    return false;
                }
                for (key, value) in &options.metadata_filters {
                    let matches = d
                        .metadata
                        .get(key)
                        .and_then(|v| v.as_str())
                        .is_some_and(|found| found == value);
                    if !matches {
                        return false;
                    }
                }
                if let Some(needle) = &needle {
                    let haystack = format!("{} {}", d.title, d.content).to_lowercase();
                    if !haystack.contains(needle.as_str()) {
                        return false;
                    }
                }
                true
            })
            .cloned()
            .collect();

        matches.sort_by_key(|d| std::cmp::Reverse(d.updated_at));
        if let Some(limit) = options.limit {
            matches.truncate(limit as usize);
        }
        Ok(matches)
    }

    async fn get_document(&self, id: DocumentId) -> Result<Option<Document>> {
        Ok(self.by_id.lock().unwrap().get(&id).cloned())
    }
}

struct JobLogLine {
    level: LogLevel,
    message: String,
    step_name: Option<String>,
    originator: Option<String>,
}

#[derive(Default)]
pub struct InMemoryJobStatusManager {
    jobs: Mutex<HashMap<JobId, QueueJob>>,
    logs: Mutex<HashMap<JobId, Vec<JobLogLine>>>,
}

impl InMemoryJobStatusManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a job the manager should track. Used by the scheduler and
    /// by tests that need a job to exist before exercising the trait.
    pub fn insert(&self, job: QueueJob) {
        self.jobs.lock().unwrap().insert(job.id, job);
    }
}

#[async_trait]
impl JobStatusManager for InMemoryJobStatusManager {
    async fn get_job(&self, id: JobId) -> Result<Option<QueueJob>> {
        Ok(self.jobs.lock().unwrap().get(&id).cloned())
    }

    async fn update_job_status(&self, id: JobId, status: JobStatus) -> Result<()> {
        let mut jobs = self.jobs.lock().unwrap();
        if let Some(job) = jobs.get_mut(&id) {
            job.status = status;
            if status == JobStatus::Running && job.started_at.is_none() {
                job.started_at = Some(chrono::Utc::now());
            }
        }
        Ok(())
    }

    async fn set_job_error(&self, id: JobId, error: &str) -> Result<()> {
        let mut jobs = self.jobs.lock().unwrap();
        if let Some(job) = jobs.get_mut(&id) {
            job.error = Some(error.to_string());
        }
        Ok(())
    }

    async fn set_job_finished(&self, id: JobId, status: JobStatus) -> Result<()> {
        let mut jobs = self.jobs.lock().unwrap();
        if let Some(job) = jobs.get_mut(&id) {
            job.status = status;
            job.finished_at = Some(chrono::Utc::now());
        }
        Ok(())
    }

    async fn get_job_child_stats(&self, step_ids: &[StepId]) -> Result<HashMap<StepId, ChildJobStats>> {
        let jobs = self.jobs.lock().unwrap();
        let mut out = HashMap::with_capacity(step_ids.len());

        for &step_id in step_ids {
            let parent = step_job_id(step_id);
            let mut stats = ChildJobStats::default();
            for job in jobs.values().filter(|j| j.parent_id == Some(parent)) {
                stats.total += 1;
                match job.status {
                    JobStatus::Pending | JobStatus::Queued => stats.pending += 1,
                    JobStatus::Running => stats.running += 1,
                    JobStatus::Completed => stats.completed += 1,
                    JobStatus::Failed => stats.failed += 1,
                    JobStatus::Cancelled => stats.cancelled += 1,
                }
            }
            out.insert(step_id, stats);
        }
        Ok(out)
    }

    async fn add_job_log(&self, job_id: JobId, level: LogLevel, message: &str) -> Result<()> {
        self.add_job_log_with_context(job_id, level, message, None, None).await
    }

    async fn add_job_log_with_context(
        &self,
        job_id: JobId,
        level: LogLevel,
        message: &str,
        step_name: Option<&str>,
        originator: Option<&str>,
    ) -> Result<()> {
        self.logs.lock().unwrap().entry(job_id).or_default().push(JobLogLine {
            level,
            message: message.to_string(),
            step_name: step_name.map(str::to_string),
            originator: originator.map(str::to_string),
        });
        Ok(())
    }
}

#[derive(Default)]
pub struct InMemoryKvStore {
    entries: Mutex<HashMap<String, String>>,
}

impl InMemoryKvStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KvStore for InMemoryKvStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.entries.lock().unwrap().get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        self.entries.lock().unwrap().insert(key.to_string(), value.to_string());
        Ok(())
    }
}

/// Publishes events into an in-process buffer. Tests assert on `drain()`;
/// the bin crate can swap this out for a real event bus without touching
/// callers, since they only ever see `Arc<dyn EventService>`.
#[derive(Default)]
pub struct InMemoryEventService {
    events: Mutex<Vec<Event>>,
}

impl InMemoryEventService {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn drain(&self) -> Vec<Event> {
        std::mem::take(&mut self.events.lock().unwrap())
    }
}

#[async_trait]
impl EventService for InMemoryEventService {
    async fn publish(&self, event: Event) -> Result<()> {
        self.events.lock().unwrap().push(event);
        Ok(())
    }
}
