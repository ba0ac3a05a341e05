//! Wraps `monitor_step` in a `tokio::spawn` and converts a join error
//! (including a panic) into a fatal-level log and a `failed` step status,
//! so one step's monitor can never crash the process.

use quaero_protocol::error::Result;
use quaero_protocol::types::{step_job_id, JobStatus};
use quaero_retry::CancellationToken;
use tracing::error;

use crate::monitor::{monitor_step, StepMonitorContext};

pub async fn supervise_step(ctx: StepMonitorContext, cancel: CancellationToken) -> Result<JobStatus> {
    let step_job = step_job_id(ctx.step_id);
    let step_name = ctx.step_name.clone();
    let job_status = ctx.job_status.clone();

    let handle = tokio::spawn(async move { monitor_step(ctx, &cancel).await });

    match handle.await {
        Ok(result) => result,
        Err(join_err) => {
            let message = format!("step monitor task for '{step_name}' terminated abnormally: {join_err}");
            error!("{message}");
            job_status.set_job_error(step_job, &message).await?;
            job_status.set_job_finished(step_job, JobStatus::Failed).await?;
            Ok(JobStatus::Failed)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use quaero_protocol::store::{ChildJobStats, Event, EventService, JobStatusManager, LogLevel};
    use quaero_protocol::types::{JobId, QueueJob, StepId};
    use std::collections::HashMap;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    #[derive(Default)]
    struct PanicOnPollJobStatus {
        step_job: Mutex<Option<QueueJob>>,
    }

    #[async_trait]
    impl JobStatusManager for PanicOnPollJobStatus {
        async fn get_job(&self, _id: JobId) -> Result<Option<QueueJob>> {
            panic!("simulated panic inside monitor task");
        }
        async fn update_job_status(&self, _id: JobId, _status: JobStatus) -> Result<()> {
            Ok(())
        }
        async fn set_job_error(&self, _id: JobId, _error: &str) -> Result<()> {
            Ok(())
        }
        async fn set_job_finished(&self, _id: JobId, status: JobStatus) -> Result<()> {
            if let Some(job) = self.step_job.lock().unwrap().as_mut() {
                job.status = status;
            }
            Ok(())
        }
        async fn get_job_child_stats(&self, _step_ids: &[StepId]) -> Result<HashMap<StepId, ChildJobStats>> {
            Ok(HashMap::new())
        }
        async fn add_job_log(&self, _job_id: JobId, _level: LogLevel, _message: &str) -> Result<()> {
            Ok(())
        }
        async fn add_job_log_with_context(
            &self,
            _job_id: JobId,
            _level: LogLevel,
            _message: &str,
            _step_name: Option<&str>,
            _originator: Option<&str>,
        ) -> Result<()> {
            Ok(())
        }
    }

    #[derive(Default)]
    struct NullEvents;

    #[async_trait]
    impl EventService for NullEvents {
        async fn publish(&self, _event: Event) -> Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn panic_in_monitor_task_is_contained_as_failed() {
        let job_status: Arc<dyn JobStatusManager> = Arc::new(PanicOnPollJobStatus::default());
        let ctx = StepMonitorContext {
            job_status: job_status.clone(),
            events: Arc::new(NullEvents),
            manager_id: JobId::new(),
            step_id: StepId::new(),
            step_name: "flaky".to_string(),
            config: crate::monitor::MonitorConfig {
                poll_interval: Duration::from_millis(1),
                ..Default::default()
            },
        };

        let status = supervise_step(ctx, CancellationToken::new()).await.unwrap();
        assert_eq!(status, JobStatus::Failed);
    }
}
