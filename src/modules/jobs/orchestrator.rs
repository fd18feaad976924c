use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use super::model::{Job, JobTemplate};
use super::registry::{JobRegistry, SourceGuard};
use crate::common::error::AppError;
use crate::common::keys::MediaKeys;
use crate::common::retry::Backoff;
use crate::infrastructure::runner::{JobParams, JobRunner, RunnerError};
use crate::infrastructure::storage::{MediaObject, MediaStore};

/// Turns stored uploads into runner jobs, at most one active job per source.
#[derive(Clone)]
pub struct SubmissionOrchestrator {
    store: Arc<dyn MediaStore>,
    runner: Arc<dyn JobRunner>,
    registry: JobRegistry,
    keys: MediaKeys,
    backoff: Backoff,
}

impl SubmissionOrchestrator {
    pub fn new(
        store: Arc<dyn MediaStore>,
        runner: Arc<dyn JobRunner>,
        registry: JobRegistry,
        keys: MediaKeys,
        backoff: Backoff,
    ) -> Self {
        Self {
            store,
            runner,
            registry,
            keys,
            backoff,
        }
    }

    fn params(&self, source_key: &str, template: &JobTemplate) -> JobParams {
        let mut user_metadata = BTreeMap::new();
        user_metadata.insert("Customer".to_string(), template.customer.clone());

        JobParams {
            source_key: source_key.to_string(),
            input_uri: self.store.uri(&self.keys.source_location(source_key)),
            destination_uri: self.store.uri(self.keys.output_prefix()),
            role: template.role.clone(),
            preset: template.preset.clone(),
            name_modifier: template.name_modifier.clone(),
            output_key: self.keys.output_name(
                source_key,
                &template.name_modifier,
                &template.output_extension,
            ),
            user_metadata,
        }
    }

    pub async fn submit_from_upload(
        &self,
        object: &MediaObject,
        template: &JobTemplate,
        cancel: &CancellationToken,
    ) -> Result<Job, AppError> {
        let source_key = self.keys.parse_source(&object.key)?;
        let guard = self.registry.lock_source(&source_key).await;
        self.submit_locked(&guard, object, template, cancel).await
    }

    /// Submits while the caller already holds the source guard, so the
    /// upload and the submission run as one step for that source.
    pub async fn submit_locked(
        &self,
        guard: &SourceGuard,
        object: &MediaObject,
        template: &JobTemplate,
        cancel: &CancellationToken,
    ) -> Result<Job, AppError> {
        let source_key = self.keys.parse_source(&object.key)?;
        if source_key != guard.source_key() {
            return Err(AppError::Validation(format!(
                "object '{}' does not belong to locked source '{}'",
                object.key,
                guard.source_key()
            )));
        }
        if self.store.head(&object.key).await?.is_none() {
            return Err(AppError::NotFound(format!("object '{}'", object.key)));
        }

        if let Some(active) = guard.active_job().await? {
            return Err(AppError::Conflict(format!(
                "source '{}' already has active job {} ({})",
                source_key, active.job.id, active.job.status
            )));
        }

        let params = self.params(&source_key, template);
        let job = self.submit_with_retry(&params, cancel).await?;
        guard.upsert(job.clone()).await?;

        info!(job_id = %job.id, source_key = %source_key, "Transcode job submitted");
        Ok(job)
    }

    async fn submit_with_retry(&self, params: &JobParams, cancel: &CancellationToken) -> Result<Job, AppError> {
        let mut attempts = 0u32;
        let mut waited = Duration::ZERO;

        loop {
            if cancel.is_cancelled() {
                return Err(self.canceled(params, attempts));
            }

            attempts += 1;
            let last_error = match self.runner.submit(params).await {
                Ok(job) => return Ok(job),
                Err(RunnerError::Transport(msg)) => msg,
                Err(other) => return Err(other.into()),
            };

            let Some(delay) = self.backoff.next_delay(attempts, waited) else {
                error!(source_key = %params.source_key, attempts, error = %last_error, "Submission retries exhausted");
                return Err(AppError::SubmissionFailed {
                    source_key: params.source_key.clone(),
                    attempts,
                    last_error,
                });
            };

            warn!(
                source_key = %params.source_key,
                attempt = attempts,
                delay_ms = delay.as_millis() as u64,
                error = %last_error,
                "Runner unavailable, retrying submission"
            );

            tokio::select! {
                _ = cancel.cancelled() => return Err(self.canceled(params, attempts)),
                _ = tokio::time::sleep(delay) => {}
            }
            waited += delay;
        }
    }

    fn canceled(&self, params: &JobParams, attempts: u32) -> AppError {
        warn!(source_key = %params.source_key, attempts, "Submission canceled");
        AppError::Canceled(format!(
            "submission for '{}' canceled after {} attempt(s)",
            params.source_key, attempts
        ))
    }
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;
    use futures_util::future::join_all;
    use tokio::time::Instant;

    use super::*;
    use crate::infrastructure::runner::MemoryRunner;
    use crate::infrastructure::storage::MemoryStore;
    use crate::modules::jobs::model::JobStatus;
    use crate::modules::jobs::repository::MemoryJobRepository;

    struct Fixture {
        store: MemoryStore,
        runner: MemoryRunner,
        registry: JobRegistry,
        orchestrator: SubmissionOrchestrator,
    }

    fn backoff() -> Backoff {
        Backoff {
            max_attempts: 4,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(8),
            max_total_wait: Duration::from_secs(30),
        }
    }

    fn fixture() -> Fixture {
        let store = MemoryStore::new("media");
        let runner = MemoryRunner::new();
        let registry = JobRegistry::new(Arc::new(MemoryJobRepository::new()));
        let orchestrator = SubmissionOrchestrator::new(
            Arc::new(store.clone()),
            Arc::new(runner.clone()),
            registry.clone(),
            MediaKeys::new("uploads/", "outputs/").unwrap(),
            backoff(),
        );
        Fixture {
            store,
            runner,
            registry,
            orchestrator,
        }
    }

    fn template() -> JobTemplate {
        JobTemplate {
            role: "arn:aws:iam::123:role/MediaConvert".into(),
            preset: "Generic".into(),
            name_modifier: "_cli".into(),
            output_extension: "mp4".into(),
            customer: "Amazon".into(),
        }
    }

    async fn upload(fx: &Fixture, key: &str) -> MediaObject {
        fx.store.insert(key, Bytes::from_static(b"frames")).await;
        fx.store.head(key).await.unwrap().unwrap()
    }

    #[tokio::test]
    async fn submits_and_registers_the_job() {
        let fx = fixture();
        let object = upload(&fx, "uploads/clip.mp4").await;

        let job = fx
            .orchestrator
            .submit_from_upload(&object, &template(), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(job.source_key, "clip.mp4");
        assert_eq!(job.status, JobStatus::Submitted);
        let active = fx.registry.find_active_by_source_key("clip.mp4").await.unwrap().unwrap();
        assert_eq!(active.job.id, job.id);
    }

    #[tokio::test]
    async fn duplicate_submission_conflicts_without_calling_the_runner() {
        let fx = fixture();
        let object = upload(&fx, "uploads/clip.mp4").await;
        let cancel = CancellationToken::new();

        fx.orchestrator.submit_from_upload(&object, &template(), &cancel).await.unwrap();
        let err = fx
            .orchestrator
            .submit_from_upload(&object, &template(), &cancel)
            .await
            .unwrap_err();

        assert!(matches!(err, AppError::Conflict(_)));
        assert_eq!(fx.runner.submit_calls().await, 1);
    }

    #[tokio::test]
    async fn resubmission_is_allowed_once_the_job_finished() {
        let fx = fixture();
        let object = upload(&fx, "uploads/clip.mp4").await;
        let cancel = CancellationToken::new();

        let first = fx.orchestrator.submit_from_upload(&object, &template(), &cancel).await.unwrap();
        fx.registry
            .upsert(Job {
                status: JobStatus::Error,
                ..first.clone()
            })
            .await
            .unwrap();

        let second = fx.orchestrator.submit_from_upload(&object, &template(), &cancel).await.unwrap();
        assert_ne!(first.id, second.id);
    }

    #[tokio::test]
    async fn concurrent_uploads_of_one_source_yield_a_single_active_job() {
        let fx = fixture();
        let object = upload(&fx, "uploads/clip.mp4").await;
        let cancel = CancellationToken::new();
        let template = template();

        let results = join_all(
            (0..8).map(|_| fx.orchestrator.submit_from_upload(&object, &template, &cancel)),
        )
        .await;

        let accepted = results.iter().filter(|r| r.is_ok()).count();
        let conflicts = results
            .iter()
            .filter(|r| matches!(r, Err(AppError::Conflict(_))))
            .count();
        assert_eq!(accepted, 1);
        assert_eq!(conflicts, 7);
        assert_eq!(fx.runner.submit_calls().await, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn transport_failures_are_retried_on_the_backoff_schedule() {
        let fx = fixture();
        let object = upload(&fx, "uploads/clip.mp4").await;
        fx.runner
            .fail_next_submits([
                RunnerError::Transport("timeout".into()),
                RunnerError::Transport("timeout".into()),
            ])
            .await;

        let started = Instant::now();
        let job = fx
            .orchestrator
            .submit_from_upload(&object, &template(), &CancellationToken::new())
            .await
            .unwrap();

        // 500ms after the first failure, 1s after the second.
        assert_eq!(started.elapsed(), Duration::from_millis(1500));
        assert_eq!(fx.runner.submit_calls().await, 3);
        assert!(fx.registry.get(&job.id).await.unwrap().is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_retries_report_the_last_error() {
        let fx = fixture();
        let object = upload(&fx, "uploads/clip.mp4").await;
        fx.runner
            .fail_next_submits((0..4).map(|i| RunnerError::Transport(format!("outage {}", i))))
            .await;

        let err = fx
            .orchestrator
            .submit_from_upload(&object, &template(), &CancellationToken::new())
            .await
            .unwrap_err();

        match err {
            AppError::SubmissionFailed {
                source_key,
                attempts,
                last_error,
            } => {
                assert_eq!(source_key, "clip.mp4");
                assert_eq!(attempts, 4);
                assert_eq!(last_error, "outage 3");
            }
            other => panic!("expected SubmissionFailed, got {:?}", other),
        }
        assert!(fx.store.contains("uploads/clip.mp4").await);
        assert!(fx.registry.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn quota_and_validation_errors_are_not_retried() {
        let fx = fixture();
        let object = upload(&fx, "uploads/clip.mp4").await;
        fx.runner
            .fail_next_submits([RunnerError::Quota("account limit".into())])
            .await;

        let err = fx
            .orchestrator
            .submit_from_upload(&object, &template(), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Quota(_)));
        assert_eq!(fx.runner.submit_calls().await, 1);

        let no_role = JobTemplate {
            role: String::new(),
            ..template()
        };
        let err = fx
            .orchestrator
            .submit_from_upload(&object, &no_role, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
        assert_eq!(fx.runner.submit_calls().await, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_interrupts_the_backoff_sleep() {
        let fx = fixture();
        let object = upload(&fx, "uploads/clip.mp4").await;
        fx.runner
            .fail_next_submits([RunnerError::Transport("timeout".into())])
            .await;

        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            trigger.cancel();
        });

        let err = fx
            .orchestrator
            .submit_from_upload(&object, &template(), &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Canceled(_)));
        assert_eq!(fx.runner.submit_calls().await, 1);
    }

    #[tokio::test]
    async fn missing_or_foreign_objects_are_refused() {
        let fx = fixture();
        let cancel = CancellationToken::new();

        let ghost = MediaObject {
            key: "uploads/ghost.mp4".into(),
            size: 0,
            last_modified: time::OffsetDateTime::now_utc(),
            storage_class: None,
        };
        let err = fx.orchestrator.submit_from_upload(&ghost, &template(), &cancel).await.unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));

        let foreign = upload(&fx, "outputs/clip_cli.mp4").await;
        let err = fx.orchestrator.submit_from_upload(&foreign, &template(), &cancel).await.unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
        assert_eq!(fx.runner.submit_calls().await, 0);
    }

    #[tokio::test]
    async fn held_guard_serializes_upload_and_submission() {
        let fx = fixture();
        let cancel = CancellationToken::new();
        let object = upload(&fx, "uploads/clip.mp4").await;

        let guard = fx.registry.lock_source("clip.mp4").await;
        let contender = tokio::spawn({
            let orchestrator = fx.orchestrator.clone();
            let object = object.clone();
            let cancel = cancel.clone();
            async move { orchestrator.submit_from_upload(&object, &template(), &cancel).await }
        });

        let job = fx.orchestrator.submit_locked(&guard, &object, &template(), &cancel).await.unwrap();
        assert!(!contender.is_finished());
        drop(guard);

        let err = contender.await.unwrap().unwrap_err();
        assert!(matches!(err, AppError::Conflict(_)));
        assert_eq!(fx.runner.submit_calls().await, 1);
        assert_eq!(
            fx.registry.find_active_by_source_key("clip.mp4").await.unwrap().unwrap().job.id,
            job.id
        );

        let other = fx.registry.lock_source("other.mp4").await;
        let err = fx.orchestrator.submit_locked(&other, &object, &template(), &cancel).await.unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
    }
}
