//! Step Monitor: one task per running step, polling its worker-job
//! children to terminal classification.

use std::sync::Arc;
use std::time::Duration;

use quaero_protocol::error::Result;
use quaero_protocol::store::{Event, EventService, JobStatusManager, LogLevel};
use quaero_protocol::types::{step_job_id, ChildJobStats, JobId, JobStatus, StepId};
use quaero_retry::CancellationToken;
use tokio::time::Instant;
use tracing::{info, warn};

/// Poll cadence, grace period before declaring "no children ever showed
/// up", and the absolute ceiling on how long a step may run.
#[derive(Debug, Clone, Copy)]
pub struct MonitorConfig {
    pub poll_interval: Duration,
    pub grace_period: Duration,
    pub global_timeout: Duration,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(5),
            grace_period: Duration::from_secs(30),
            global_timeout: Duration::from_secs(30 * 60),
        }
    }
}

pub struct StepMonitorContext {
    pub job_status: Arc<dyn JobStatusManager>,
    pub events: Arc<dyn EventService>,
    pub manager_id: JobId,
    pub step_id: StepId,
    pub step_name: String,
    pub config: MonitorConfig,
}

/// Runs the monitor loop for a single step until it reaches a terminal
/// `JobStatus`. Only returns early (without a store write) if `cancel`
/// fires — that is a process-level shutdown signal, distinct from the
/// step being cancelled through the store, which this loop observes and
/// handles itself.
pub async fn monitor_step(ctx: StepMonitorContext, cancel: &CancellationToken) -> Result<JobStatus> {
    let step_job = step_job_id(ctx.step_id);
    let start = Instant::now();

    loop {
        tokio::select! {
            _ = tokio::time::sleep(ctx.config.poll_interval) => {}
            _ = cancel.cancelled() => {
                ctx.job_status.set_job_finished(step_job, JobStatus::Cancelled).await?;
                return Ok(JobStatus::Cancelled);
            }
        }

        if let Some(job) = ctx.job_status.get_job(step_job).await? {
            if job.status == JobStatus::Cancelled {
                ctx.job_status.set_job_finished(step_job, JobStatus::Cancelled).await?;
                publish_progress(&ctx, JobStatus::Cancelled, None).await;
                return Ok(JobStatus::Cancelled);
            }
        }

        let stats_by_step = ctx.job_status.get_job_child_stats(&[ctx.step_id]).await?;
        let stats = stats_by_step.get(&ctx.step_id).copied().unwrap_or_default();

        if stats.total == 0 {
            if start.elapsed() >= ctx.config.grace_period {
                return finish(&ctx, step_job, JobStatus::Completed, None, None).await;
            }
            if start.elapsed() >= ctx.config.global_timeout {
                let msg = "step timed out before any child job appeared".to_string();
                return finish(&ctx, step_job, JobStatus::Failed, Some(msg.clone()), Some(stats)).await;
            }
            publish_progress(&ctx, JobStatus::Pending, None).await;
            continue;
        }

        if start.elapsed() >= ctx.config.global_timeout && !stats.all_settled() {
            let msg = format!(
                "step exceeded global timeout of {:?} with {} of {} children still unsettled",
                ctx.config.global_timeout,
                stats.total - stats.settled(),
                stats.total
            );
            return finish(&ctx, step_job, JobStatus::Failed, Some(msg), Some(stats)).await;
        }

        if stats.all_settled() {
            let (status, warning) = classify_terminal(&stats);
            return finish(&ctx, step_job, status, warning, Some(stats)).await;
        }

        publish_progress(&ctx, JobStatus::Running, Some(stats)).await;
    }
}

/// Terminal classification from a fully-settled `ChildJobStats`, plus an
/// optional warn-level summary for the "partial success" case.
fn classify_terminal(stats: &ChildJobStats) -> (JobStatus, Option<String>) {
    if stats.failed == stats.total {
        return (JobStatus::Failed, None);
    }
    if stats.cancelled == stats.total {
        return (JobStatus::Cancelled, None);
    }
    if stats.failed > 0 && stats.completed > 0 {
        let warning = format!(
            "step completed with {} of {} children failed: {}",
            stats.failed,
            stats.total,
            stats.progress_text()
        );
        return (JobStatus::Completed, Some(warning));
    }
    (JobStatus::Completed, None)
}

async fn finish(
    ctx: &StepMonitorContext,
    step_job: JobId,
    status: JobStatus,
    warning_or_error: Option<String>,
    stats: Option<ChildJobStats>,
) -> Result<JobStatus> {
    if status == JobStatus::Failed {
        if let Some(error) = &warning_or_error {
            ctx.job_status.set_job_error(step_job, error).await?;
        }
    }
    ctx.job_status.set_job_finished(step_job, status).await?;

    let level = match (status, &warning_or_error) {
        (JobStatus::Failed, _) => LogLevel::Error,
        (_, Some(_)) => LogLevel::Warn,
        _ => LogLevel::Info,
    };
    let message = warning_or_error
        .clone()
        .unwrap_or_else(|| format!("step '{}' finished: {status}", ctx.step_name));
    ctx.job_status
        .add_job_log_with_context(ctx.manager_id, level, &message, Some(&ctx.step_name), Some("step_monitor"))
        .await?;

    match level {
        LogLevel::Error => tracing::error!(step = %ctx.step_name, %status, "{message}"),
        LogLevel::Warn => warn!(step = %ctx.step_name, %status, "{message}"),
        LogLevel::Info => info!(step = %ctx.step_name, %status, "{message}"),
    }

    publish_progress(ctx, status, stats).await;
    Ok(status)
}

async fn publish_progress(ctx: &StepMonitorContext, status: JobStatus, stats: Option<ChildJobStats>) {
    let mut payload = serde_json::json!({
        "step_id": ctx.step_id.to_string(),
        "manager_id": ctx.manager_id.to_string(),
        "step_name": ctx.step_name,
        "status": status.as_str(),
    });
    if let Some(stats) = stats {
        payload["total"] = stats.total.into();
        payload["pending"] = stats.pending.into();
        payload["running"] = stats.running.into();
        payload["completed"] = stats.completed.into();
        payload["failed"] = stats.failed.into();
        payload["cancelled"] = stats.cancelled.into();
        payload["progress_text"] = stats.progress_text().into();
    }
    if let Err(err) = ctx.events.publish(Event::new("step_progress", payload)).await {
        warn!(step = %ctx.step_name, %err, "failed to publish step_progress event");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use quaero_protocol::types::{JobKind, QueueJob};
    use std::collections::HashMap;
    use std::sync::Mutex;

    #[derive(Default)]
    struct FakeJobStatus {
        jobs: Mutex<HashMap<JobId, QueueJob>>,
        children: Mutex<Vec<QueueJob>>,
    }

    impl FakeJobStatus {
        fn with_step(step_id: StepId, manager_id: JobId) -> Arc<Self> {
            let fake = Arc::new(Self::default());
            let mut step_job = QueueJob::new_child(JobKind::Step, "step", manager_id, manager_id);
            step_job.id = step_job_id(step_id);
            step_job.status = JobStatus::Running;
            fake.jobs.lock().unwrap().insert(step_job.id, step_job);
            fake
        }

        fn add_child(&self, step_job: JobId, manager_id: JobId, status: JobStatus) {
            let mut job = QueueJob::new_child(JobKind::Worker, "child", step_job, manager_id);
            job.status = status;
            self.children.lock().unwrap().push(job);
        }
    }

    #[async_trait]
    impl JobStatusManager for FakeJobStatus {
        async fn get_job(&self, id: JobId) -> Result<Option<QueueJob>> {
            Ok(self.jobs.lock().unwrap().get(&id).cloned())
        }
        async fn update_job_status(&self, id: JobId, status: JobStatus) -> Result<()> {
            if let Some(job) = self.jobs.lock().unwrap().get_mut(&id) {
                job.status = status;
            }
            Ok(())
        }
        async fn set_job_error(&self, id: JobId, error: &str) -> Result<()> {
            if let Some(job) = self.jobs.lock().unwrap().get_mut(&id) {
                job.error = Some(error.to_string());
            }
            Ok(())
        }
        async fn set_job_finished(&self, id: JobId, status: JobStatus) -> Result<()> {
            if let Some(job) = self.jobs.lock().unwrap().get_mut(&id) {
                job.status = status;
                job.finished_at = Some(chrono::Utc::now());
            }
            Ok(())
        }
        async fn get_job_child_stats(&self, step_ids: &[StepId]) -> Result<HashMap<StepId, ChildJobStats>> {
            let children = self.children.lock().unwrap();
            let mut out = HashMap::new();
            for &step_id in step_ids {
                let parent = step_job_id(step_id);
                let mut stats = ChildJobStats::default();
                for job in children.iter().filter(|j| j.parent_id == Some(parent)) {
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

    fn ctx(job_status: Arc<dyn JobStatusManager>, step_id: StepId, manager_id: JobId, config: MonitorConfig) -> StepMonitorContext {
        StepMonitorContext {
            job_status,
            events: Arc::new(NullEvents),
            manager_id,
            step_id,
            step_name: "summarize".to_string(),
            config,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn all_children_completed_yields_completed() {
        let manager_id = JobId::new();
        let step_id = StepId::new();
        let fake = FakeJobStatus::with_step(step_id, manager_id);
        fake.add_child(step_job_id(step_id), manager_id, JobStatus::Completed);
        fake.add_child(step_job_id(step_id), manager_id, JobStatus::Completed);

        let config = MonitorConfig { poll_interval: Duration::from_millis(1), ..Default::default() };
        let cancel = CancellationToken::new();
        let status = monitor_step(ctx(fake, step_id, manager_id, config), &cancel).await.unwrap();
        assert_eq!(status, JobStatus::Completed);
    }

    #[tokio::test(start_paused = true)]
    async fn all_failed_yields_failed() {
        let manager_id = JobId::new();
        let step_id = StepId::new();
        let fake = FakeJobStatus::with_step(step_id, manager_id);
        fake.add_child(step_job_id(step_id), manager_id, JobStatus::Failed);

        let config = MonitorConfig { poll_interval: Duration::from_millis(1), ..Default::default() };
        let cancel = CancellationToken::new();
        let status = monitor_step(ctx(fake, step_id, manager_id, config), &cancel).await.unwrap();
        assert_eq!(status, JobStatus::Failed);
    }

    #[tokio::test(start_paused = true)]
    async fn partial_failure_with_some_completed_yields_completed() {
        let manager_id = JobId::new();
        let step_id = StepId::new();
        let fake = FakeJobStatus::with_step(step_id, manager_id);
        fake.add_child(step_job_id(step_id), manager_id, JobStatus::Completed);
        fake.add_child(step_job_id(step_id), manager_id, JobStatus::Failed);

        let config = MonitorConfig { poll_interval: Duration::from_millis(1), ..Default::default() };
        let cancel = CancellationToken::new();
        let status = monitor_step(ctx(fake, step_id, manager_id, config), &cancel).await.unwrap();
        assert_eq!(status, JobStatus::Completed);
    }

    #[tokio::test(start_paused = true)]
    async fn no_children_after_grace_period_yields_completed() {
        let manager_id = JobId::new();
        let step_id = StepId::new();
        let fake = FakeJobStatus::with_step(step_id, manager_id);

        let config = MonitorConfig {
            poll_interval: Duration::from_millis(1),
            grace_period: Duration::from_millis(5),
            global_timeout: Duration::from_secs(30 * 60),
        };
        let cancel = CancellationToken::new();
        let status = monitor_step(ctx(fake, step_id, manager_id, config), &cancel).await.unwrap();
        assert_eq!(status, JobStatus::Completed);
    }

    #[tokio::test(start_paused = true)]
    async fn external_cancellation_is_observed_at_next_tick() {
        let manager_id = JobId::new();
        let step_id = StepId::new();
        let fake = FakeJobStatus::with_step(step_id, manager_id);
        fake.jobs.lock().unwrap().get_mut(&step_job_id(step_id)).unwrap().status = JobStatus::Cancelled;

        let config = MonitorConfig { poll_interval: Duration::from_millis(1), ..Default::default() };
        let cancel = CancellationToken::new();
        let status = monitor_step(ctx(fake, step_id, manager_id, config), &cancel).await.unwrap();
        assert_eq!(status, JobStatus::Cancelled);
    }
}
