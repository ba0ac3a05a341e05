//! Drives one `JobDefinition` end to end: resolves each step's worker,
//! runs it, and records the outcome on the job-status manager. A worker
//! that enqueues child jobs (`returns_child_jobs() == true`) hands off
//! to an independently spawned Step Monitor task, which owns writing
//! the step's terminal status from then on; a worker that finishes its
//! whole unit of work inline (both worker types implemented so far,
//! `Summary` and `WebSearch`, do this) is recorded directly here.

use std::collections::HashMap;
use std::sync::Arc;

use quaero_protocol::error::Result;
use quaero_protocol::store::{Event, EventService, JobStatusManager, LogLevel};
use quaero_protocol::types::{step_job_id, JobDefinition, JobId, JobKind, JobStatus, QueueJob, StepId, WorkerType};
use quaero_protocol::worker::Worker;
use quaero_retry::CancellationToken;
use quaero_sentinel::{supervise_step, MonitorConfig, StepMonitorContext};
use quaero_store::InMemoryJobStatusManager;

/// Job-status backing store. The scheduler needs to both create a
/// `QueueJob` row per step (an operation outside the `JobStatusManager`
/// trait, which only exposes updates against jobs that already exist)
/// and drive it through that trait afterwards, so it holds the concrete
/// reference implementation rather than `Arc<dyn JobStatusManager>`.
pub struct Scheduler {
    workers: HashMap<WorkerType, Arc<dyn Worker>>,
    job_status: Arc<InMemoryJobStatusManager>,
    events: Arc<dyn EventService>,
}

pub struct JobRunSummary {
    pub manager_id: JobId,
    pub status: JobStatus,
    pub step_results: Vec<(String, JobStatus, Option<String>)>,
}

impl Scheduler {
    pub fn new(workers: HashMap<WorkerType, Arc<dyn Worker>>, job_status: Arc<InMemoryJobStatusManager>, events: Arc<dyn EventService>) -> Self {
        Self { workers, job_status, events }
    }

    fn worker_for(&self, worker_type: WorkerType) -> Result<Arc<dyn Worker>> {
        self.workers
            .get(&worker_type)
            .cloned()
            .ok_or_else(|| quaero_protocol::ProtocolError::ConfigInvalid(format!("no worker registered for {worker_type:?}")))
    }

    /// Validates every step's config against its worker before running
    /// any of them — a malformed step should never start earlier steps.
    pub fn validate(&self, job_def: &JobDefinition) -> Result<()> {
        for step in &job_def.steps {
            self.worker_for(step.worker_type)?.validate_config(step)?;
        }
        Ok(())
    }

    pub async fn run(&self, job_def: &JobDefinition) -> Result<JobRunSummary> {
        self.validate(job_def)?;

        let manager_id = JobId::new();
        let mut step_results = Vec::new();
        let mut manager_status = JobStatus::Completed;

        for step in &job_def.steps {
            let step_id = StepId::new();
            let step_job = step_job_id(step_id);
            let mut job = QueueJob::new_child(JobKind::Step, &step.name, manager_id, manager_id);
            job.id = step_job;
            job.status = JobStatus::Running;
            self.job_status.insert(job);
            self.job_status.update_job_status(step_job, JobStatus::Running).await?;

            let worker = self.worker_for(step.worker_type)?;
            let returns_children = worker.returns_child_jobs();
            let outcome: Result<JobStatus> = async {
                let init_result = worker.init(step, job_def).await?;
                worker.create_jobs(step, job_def, step_id, manager_id, Some(init_result)).await?;

                if !returns_children {
                    return Ok(JobStatus::Completed);
                }

                // The worker only enqueued child jobs; a dedicated monitor
                // task (mirroring the concurrency model's one-task-per-step
                // rule) polls them to terminal classification.
                let monitor_ctx = StepMonitorContext {
                    job_status: self.job_status.clone(),
                    events: self.events.clone(),
                    manager_id,
                    step_id,
                    step_name: step.name.clone(),
                    config: MonitorConfig::default(),
                };
                supervise_step(monitor_ctx, CancellationToken::new()).await
            }
            .await;

            let (status, error) = match outcome {
                Ok(status) => (status, None),
                Err(err) => (JobStatus::Failed, Some(err.to_string())),
            };

            // A fan-out worker's monitor task already wrote the terminal
            // status, error, log line, and progress event itself; writing
            // them again here would just duplicate that record. We still
            // do it ourselves when the failure happened before the monitor
            // ever got to run (worker init/create_jobs error, or the
            // monitor task itself panicking).
            let monitor_already_recorded = returns_children && error.is_none();
            if !monitor_already_recorded {
                if let Some(message) = &error {
                    self.job_status.set_job_error(step_job, message).await?;
                }
                self.job_status.set_job_finished(step_job, status).await?;
                self.job_status
                    .add_job_log_with_context(
                        manager_id,
                        if status == JobStatus::Failed { LogLevel::Error } else { LogLevel::Info },
                        error.as_deref().unwrap_or("step completed"),
                        Some(&step.name),
                        Some("scheduler"),
                    )
                    .await?;
                self.publish_progress(&step.name, step_id, manager_id, status).await;
            }

            if status == JobStatus::Failed {
                manager_status = JobStatus::Failed;
            }
            step_results.push((step.name.clone(), status, error));
        }

        Ok(JobRunSummary { manager_id, status: manager_status, step_results })
    }

    async fn publish_progress(&self, step_name: &str, step_id: StepId, manager_id: JobId, status: JobStatus) {
        let payload = serde_json::json!({
            "step_id": step_id.to_string(),
            "manager_id": manager_id.to_string(),
            "step_name": step_name,
            "status": status.as_str(),
        });
        if let Err(err) = self.events.publish(Event::new("step_progress", payload)).await {
            tracing::warn!(step = step_name, %err, "failed to publish step_progress event");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use quaero_protocol::error::ProtocolError;
    use quaero_protocol::types::{ConfigMap, JobStep, WorkStrategy, WorkerInitResult};
    use quaero_store::InMemoryEventService;

    struct AlwaysOkWorker;
    #[async_trait]
    impl Worker for AlwaysOkWorker {
        fn worker_type(&self) -> WorkerType {
            WorkerType::Summary
        }
        fn validate_config(&self, _step: &JobStep) -> Result<()> {
            Ok(())
        }
        async fn init(&self, _step: &JobStep, _job_def: &JobDefinition) -> Result<WorkerInitResult> {
            Ok(WorkerInitResult { work_items: vec![], total_count: 0, strategy: WorkStrategy::Inline, suggested_concurrency: 1, content_hash: "h".to_string(), metadata: ConfigMap::new() })
        }
        async fn create_jobs(&self, _step: &JobStep, _job_def: &JobDefinition, step_id: StepId, _manager_id: JobId, _init_result: Option<WorkerInitResult>) -> Result<StepId> {
            Ok(step_id)
        }
        fn returns_child_jobs(&self) -> bool {
            false
        }
    }

    struct AlwaysFailsWorker;
    #[async_trait]
    impl Worker for AlwaysFailsWorker {
        fn worker_type(&self) -> WorkerType {
            WorkerType::WebSearch
        }
        fn validate_config(&self, _step: &JobStep) -> Result<()> {
            Ok(())
        }
        async fn init(&self, _step: &JobStep, _job_def: &JobDefinition) -> Result<WorkerInitResult> {
            Ok(WorkerInitResult { work_items: vec![], total_count: 0, strategy: WorkStrategy::Inline, suggested_concurrency: 1, content_hash: "h".to_string(), metadata: ConfigMap::new() })
        }
        async fn create_jobs(&self, _step: &JobStep, _job_def: &JobDefinition, _step_id: StepId, _manager_id: JobId, _init_result: Option<WorkerInitResult>) -> Result<StepId> {
            Err(ProtocolError::ProviderTransient("boom".to_string()))
        }
        fn returns_child_jobs(&self) -> bool {
            false
        }
    }

    /// A worker that enqueues two already-completed child jobs and leaves
    /// the rest to the step monitor, exercising the `returns_child_jobs`
    /// branch of `Scheduler::run`.
    struct FanOutWorker {
        job_status: Arc<InMemoryJobStatusManager>,
    }
    #[async_trait]
    impl Worker for FanOutWorker {
        fn worker_type(&self) -> WorkerType {
            WorkerType::WebSearch
        }
        fn validate_config(&self, _step: &JobStep) -> Result<()> {
            Ok(())
        }
        async fn init(&self, _step: &JobStep, _job_def: &JobDefinition) -> Result<WorkerInitResult> {
            Ok(WorkerInitResult { work_items: vec![], total_count: 2, strategy: WorkStrategy::Spawn, suggested_concurrency: 2, content_hash: "h".to_string(), metadata: ConfigMap::new() })
        }
        async fn create_jobs(&self, step: &JobStep, _job_def: &JobDefinition, step_id: StepId, _manager_id: JobId, _init_result: Option<WorkerInitResult>) -> Result<StepId> {
            let step_job = step_job_id(step_id);
            for _ in 0..2 {
                let mut child = QueueJob::new_child(JobKind::Worker, &step.name, step_job, step_job);
                child.status = JobStatus::Completed;
                self.job_status.insert(child);
            }
            Ok(step_id)
        }
        fn returns_child_jobs(&self) -> bool {
            true
        }
    }

    fn job_def(steps: Vec<JobStep>) -> JobDefinition {
        JobDefinition { id: "job-1".to_string(), name: "test job".to_string(), steps, tags: vec![], config: ConfigMap::new() }
    }

    fn step(name: &str, worker_type: WorkerType) -> JobStep {
        JobStep { name: name.to_string(), worker_type, config: ConfigMap::new() }
    }

    #[tokio::test]
    async fn all_steps_succeed_yields_completed_manager_status() {
        let mut workers: HashMap<WorkerType, Arc<dyn Worker>> = HashMap::new();
        workers.insert(WorkerType::Summary, Arc::new(AlwaysOkWorker));
        let scheduler = Scheduler::new(workers, Arc::new(InMemoryJobStatusManager::new()), Arc::new(InMemoryEventService::new()));

        let summary = scheduler.run(&job_def(vec![step("s1", WorkerType::Summary)])).await.unwrap();
        assert_eq!(summary.status, JobStatus::Completed);
        assert_eq!(summary.step_results[0].1, JobStatus::Completed);
    }

    #[tokio::test]
    async fn one_failed_step_fails_the_manager() {
        let mut workers: HashMap<WorkerType, Arc<dyn Worker>> = HashMap::new();
        workers.insert(WorkerType::Summary, Arc::new(AlwaysOkWorker));
        workers.insert(WorkerType::WebSearch, Arc::new(AlwaysFailsWorker));
        let scheduler = Scheduler::new(workers, Arc::new(InMemoryJobStatusManager::new()), Arc::new(InMemoryEventService::new()));

        let summary = scheduler
            .run(&job_def(vec![step("s1", WorkerType::Summary), step("s2", WorkerType::WebSearch)]))
            .await
            .unwrap();
        assert_eq!(summary.status, JobStatus::Failed);
        assert_eq!(summary.step_results[0].1, JobStatus::Completed);
        assert_eq!(summary.step_results[1].1, JobStatus::Failed);
    }

    #[tokio::test(start_paused = true)]
    async fn fan_out_worker_is_monitored_to_completion() {
        let job_status = Arc::new(InMemoryJobStatusManager::new());
        let mut workers: HashMap<WorkerType, Arc<dyn Worker>> = HashMap::new();
        workers.insert(WorkerType::WebSearch, Arc::new(FanOutWorker { job_status: job_status.clone() }));
        let scheduler = Scheduler::new(workers, job_status, Arc::new(InMemoryEventService::new()));

        let summary = scheduler.run(&job_def(vec![step("s1", WorkerType::WebSearch)])).await.unwrap();
        assert_eq!(summary.status, JobStatus::Completed);
        assert_eq!(summary.step_results[0].1, JobStatus::Completed);
    }

    #[tokio::test]
    async fn unregistered_worker_type_rejects_before_running_any_step() {
        let workers: HashMap<WorkerType, Arc<dyn Worker>> = HashMap::new();
        let scheduler = Scheduler::new(workers, Arc::new(InMemoryJobStatusManager::new()), Arc::new(InMemoryEventService::new()));
        let result = scheduler.run(&job_def(vec![step("s1", WorkerType::Summary)])).await;
        assert!(result.is_err());
    }
}
