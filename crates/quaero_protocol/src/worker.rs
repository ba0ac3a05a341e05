//! The `Worker` contract consumed by the scheduler. Each worker type
//! (`Summary`, `WebSearch`, …) implements this trait; the scheduler
//! only ever holds an `Arc<dyn Worker>`.

use async_trait::async_trait;

use crate::error::Result;
use crate::types::{JobDefinition, JobId, JobStep, StepId, WorkerInitResult, WorkerType};

#[async_trait]
pub trait Worker: Send + Sync {
    fn worker_type(&self) -> WorkerType;

    /// Validates the step's config before it is ever enqueued. Called at
    /// job-definition load time, not at step-execution time.
    fn validate_config(&self, step: &JobStep) -> Result<()>;

    /// Resolves inputs and decides whether the step's work should run
    /// inline or be fanned out into child jobs.
    async fn init(&self, step: &JobStep, job_def: &JobDefinition) -> Result<WorkerInitResult>;

    /// Executes the step's work. When `init_result` is `None` the worker
    /// re-derives it by calling `init` itself. `manager_id` identifies the
    /// pipeline run this step belongs to, distinct from `step_id` itself —
    /// any document the worker persists records `manager_id`, not the
    /// step's own job id, in its `jobs` set.
    async fn create_jobs(
        &self,
        step: &JobStep,
        job_def: &JobDefinition,
        step_id: StepId,
        manager_id: JobId,
        init_result: Option<WorkerInitResult>,
    ) -> Result<StepId>;

    /// Whether this worker type fans out into worker-kind child jobs
    /// (`true`) or completes entirely within `create_jobs` (`false`).
    fn returns_child_jobs(&self) -> bool;
}
