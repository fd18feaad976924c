use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;
use time::OffsetDateTime;
use tokio::sync::Mutex;
use tracing::debug;

use super::{JobFilter, JobParams, JobRunner, RunnerError, RunnerResult};
use crate::modules::jobs::model::{Job, JobStatus};

#[derive(Default)]
struct Inner {
    jobs: BTreeMap<String, Job>,
    planned_outputs: HashMap<String, String>,
    next_id: u64,
    submit_failures: VecDeque<RunnerError>,
    get_failures: HashMap<String, RunnerError>,
    submit_calls: u32,
    cancel_calls: u32,
}

/// In-process runner. Jobs stay where they are until driven with
/// [`MemoryRunner::set_status`], which makes it useful for local runs and
/// for scripting runner behaviour in tests.
#[derive(Clone, Default)]
pub struct MemoryRunner {
    inner: Arc<Mutex<Inner>>,
}

impl MemoryRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues errors returned by the next submits, in order.
    pub async fn fail_next_submits(&self, errors: impl IntoIterator<Item = RunnerError>) {
        self.inner.lock().await.submit_failures.extend(errors);
    }

    pub async fn fail_gets_of(&self, id: &str, error: RunnerError) {
        self.inner.lock().await.get_failures.insert(id.to_string(), error);
    }

    /// Moves a job to `status`. Completed jobs report their planned output.
    pub async fn set_status(&self, id: &str, status: JobStatus) -> RunnerResult<()> {
        let mut inner = self.inner.lock().await;
        let output = inner.planned_outputs.get(id).cloned();
        let job = inner
            .jobs
            .get_mut(id)
            .ok_or_else(|| RunnerError::NotFound(id.to_string()))?;
        job.status = status;
        job.output_key = if status == JobStatus::Complete { output } else { None };
        Ok(())
    }

    /// Drops a job as if the runner purged it.
    pub async fn forget(&self, id: &str) {
        let mut inner = self.inner.lock().await;
        inner.jobs.remove(id);
        inner.planned_outputs.remove(id);
    }

    pub async fn submit_calls(&self) -> u32 {
        self.inner.lock().await.submit_calls
    }

    pub async fn cancel_calls(&self) -> u32 {
        self.inner.lock().await.cancel_calls
    }
}

#[async_trait]
impl JobRunner for MemoryRunner {
    async fn submit(&self, params: &JobParams) -> RunnerResult<Job> {
        let mut inner = self.inner.lock().await;
        inner.submit_calls += 1;
        params.check()?;

        if let Some(error) = inner.submit_failures.pop_front() {
            return Err(error);
        }

        inner.next_id += 1;
        let job = Job {
            id: format!("j-{}", inner.next_id),
            source_key: params.source_key.clone(),
            status: JobStatus::Submitted,
            created_at: OffsetDateTime::now_utc(),
            output_key: None,
        };
        inner
            .planned_outputs
            .insert(job.id.clone(), params.output_key.clone());
        inner.jobs.insert(job.id.clone(), job.clone());
        debug!(job_id = %job.id, source_key = %job.source_key, "Memory runner accepted job");
        Ok(job)
    }

    async fn get(&self, id: &str) -> RunnerResult<Job> {
        let inner = self.inner.lock().await;
        if let Some(error) = inner.get_failures.get(id) {
            return Err(error.clone());
        }
        inner
            .jobs
            .get(id)
            .cloned()
            .ok_or_else(|| RunnerError::NotFound(id.to_string()))
    }

    async fn list(&self, filter: &JobFilter) -> RunnerResult<Vec<Job>> {
        let inner = self.inner.lock().await;
        let mut jobs: Vec<Job> = inner
            .jobs
            .values()
            .filter(|job| filter.status.is_none_or(|status| job.status == status))
            .cloned()
            .collect();
        jobs.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| b.id.cmp(&a.id)));
        if let Some(limit) = filter.limit {
            jobs.truncate(limit);
        }
        Ok(jobs)
    }

    async fn cancel(&self, id: &str) -> RunnerResult<()> {
        let mut inner = self.inner.lock().await;
        inner.cancel_calls += 1;
        let job = inner
            .jobs
            .get_mut(id)
            .ok_or_else(|| RunnerError::NotFound(id.to_string()))?;
        if !job.status.is_terminal() {
            job.status = JobStatus::Canceled;
        }
        Ok(())
    }
}
