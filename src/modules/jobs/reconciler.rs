use std::collections::BTreeSet;
use std::sync::Arc;

use futures_util::stream::{self, StreamExt, TryStreamExt};
use serde::Serialize;
use tracing::{debug, info, warn};
use utoipa::ToSchema;

use super::model::{Anomaly, JobStatus, RegistryEntry};
use super::registry::{JobRegistry, UpsertOutcome};
use crate::common::error::AppError;
use crate::common::keys::MediaKeys;
use crate::infrastructure::runner::{JobRunner, RunnerError};
use crate::infrastructure::storage::MediaStore;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
pub struct EntrySummary {
    pub id: String,
    pub source_key: String,
    pub status: JobStatus,
    pub output_key: Option<String>,
    pub runner_missing: bool,
}

impl From<&RegistryEntry> for EntrySummary {
    fn from(entry: &RegistryEntry) -> Self {
        Self {
            id: entry.job.id.clone(),
            source_key: entry.job.source_key.clone(),
            status: entry.job.status,
            output_key: entry.job.output_key.clone(),
            runner_missing: entry.runner_missing,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "kebab-case")]
pub enum ObjectClass {
    /// The newest job for the object is known to the runner.
    Linked,
    /// No job was ever registered for the object.
    OrphanedUnsubmitted,
    /// The newest job for the object vanished from the runner.
    OrphanedJobMissing,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
pub struct ObjectSummary {
    pub key: String,
    pub source_key: String,
    pub classification: ObjectClass,
    pub job_id: Option<String>,
}

/// State of the registry and the input prefix after one pass. Every list is
/// sorted, so passes over unchanged state produce equal reports.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, ToSchema)]
pub struct ReconciliationReport {
    pub entries: Vec<EntrySummary>,
    pub objects: Vec<ObjectSummary>,
    pub anomalies: Vec<Anomaly>,
}

#[derive(Clone)]
pub struct StatusReconciler {
    store: Arc<dyn MediaStore>,
    runner: Arc<dyn JobRunner>,
    registry: JobRegistry,
    keys: MediaKeys,
    concurrency: usize,
}

impl StatusReconciler {
    pub fn new(
        store: Arc<dyn MediaStore>,
        runner: Arc<dyn JobRunner>,
        registry: JobRegistry,
        keys: MediaKeys,
        concurrency: usize,
    ) -> Self {
        Self {
            store,
            runner,
            registry,
            keys,
            concurrency: concurrency.max(1),
        }
    }

    pub async fn reconcile(&self) -> Result<ReconciliationReport, AppError> {
        let mut anomalies = Vec::new();
        let (mut advanced, mut vanished) = (0usize, 0usize);

        let pending = self.registry.list_non_terminal().await?;
        let synced = pending.len();
        let runner = &self.runner;
        let results: Vec<_> = stream::iter(pending)
            .map(|entry| async move {
                let result = runner.get(&entry.job.id).await;
                (entry, result)
            })
            .buffer_unordered(self.concurrency)
            .collect()
            .await;

        for (entry, result) in results {
            let id = entry.job.id;
            match result {
                Ok(job) => match self.registry.upsert(job).await {
                    Ok(UpsertOutcome::Advanced { .. }) => advanced += 1,
                    Ok(UpsertOutcome::Rejected(anomaly)) => anomalies.push(anomaly),
                    Ok(_) => {}
                    Err(e) => anomalies.push(Anomaly::SyncFailed {
                        job_id: id,
                        error: e.to_string(),
                    }),
                },
                Err(RunnerError::NotFound(_)) => match self.registry.mark_missing(&id).await {
                    Ok(_) => vanished += 1,
                    Err(e) => anomalies.push(Anomaly::SyncFailed {
                        job_id: id,
                        error: e.to_string(),
                    }),
                },
                Err(e) => {
                    warn!(job_id = %id, error = %e, "Could not sync job");
                    anomalies.push(Anomaly::SyncFailed {
                        job_id: id,
                        error: e.to_string(),
                    });
                }
            }
        }

        // Newest first, so the first match per source is its latest job.
        let entries = self.registry.list().await?;
        for entry in entries.iter().filter(|e| e.runner_missing) {
            anomalies.push(Anomaly::JobMissing {
                job_id: entry.job.id.clone(),
                source_key: entry.job.source_key.clone(),
            });
        }

        let listed: Vec<_> = self
            .store
            .list(self.keys.input_prefix())
            .try_collect()
            .await?;

        let mut objects = Vec::new();
        let mut present = BTreeSet::new();
        for object in listed {
            let source_key = match self.keys.parse_source(&object.key) {
                Ok(source_key) => source_key,
                Err(e) => {
                    anomalies.push(Anomaly::MalformedKey {
                        key: object.key,
                        error: e.to_string(),
                    });
                    continue;
                }
            };

            let newest = entries.iter().find(|e| e.job.source_key == source_key);
            let classification = match newest {
                None => ObjectClass::OrphanedUnsubmitted,
                Some(entry) if entry.runner_missing => ObjectClass::OrphanedJobMissing,
                Some(_) => ObjectClass::Linked,
            };
            present.insert(source_key.clone());
            objects.push(ObjectSummary {
                key: object.key,
                source_key,
                classification,
                job_id: newest.map(|e| e.job.id.clone()),
            });
        }

        for entry in entries.iter().filter(|e| e.is_active()) {
            if !present.contains(&entry.job.source_key) {
                anomalies.push(Anomaly::SourceMissing {
                    job_id: entry.job.id.clone(),
                    source_key: entry.job.source_key.clone(),
                });
            }
        }

        let mut entries: Vec<EntrySummary> = entries.iter().map(EntrySummary::from).collect();
        entries.sort_by(|a, b| a.id.cmp(&b.id));
        objects.sort_by(|a, b| a.key.cmp(&b.key));
        anomalies.sort();
        anomalies.dedup();

        info!(
            synced,
            advanced,
            vanished,
            objects = objects.len(),
            anomalies = anomalies.len(),
            "Reconciliation finished"
        );
        Ok(ReconciliationReport {
            entries,
            objects,
            anomalies,
        })
    }

    /// Syncs one entry with the runner and returns its resulting state.
    pub async fn refresh(&self, id: &str) -> Result<RegistryEntry, AppError> {
        self.registry.require(id).await?;
        match self.runner.get(id).await {
            Ok(job) => {
                if let UpsertOutcome::Rejected(anomaly) = self.registry.upsert(job).await? {
                    debug!(job_id = %id, ?anomaly, "Refresh kept the registry state");
                }
            }
            Err(RunnerError::NotFound(_)) => {
                self.registry.mark_missing(id).await?;
            }
            Err(e) => return Err(e.into()),
        }
        self.registry.require(id).await
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use bytes::Bytes;
    use tokio_util::sync::CancellationToken;

    use super::*;
    use crate::common::retry::Backoff;
    use crate::infrastructure::runner::MemoryRunner;
    use crate::infrastructure::storage::MemoryStore;
    use crate::modules::jobs::model::{Job, JobTemplate};
    use crate::modules::jobs::orchestrator::SubmissionOrchestrator;
    use crate::modules::jobs::repository::MemoryJobRepository;

    struct Fixture {
        store: MemoryStore,
        runner: MemoryRunner,
        registry: JobRegistry,
        orchestrator: SubmissionOrchestrator,
        reconciler: StatusReconciler,
    }

    fn fixture() -> Fixture {
        let store = MemoryStore::new("media");
        let runner = MemoryRunner::new();
        let registry = JobRegistry::new(Arc::new(MemoryJobRepository::new()));
        let keys = MediaKeys::new("uploads/", "outputs/").unwrap();
        let orchestrator = SubmissionOrchestrator::new(
            Arc::new(store.clone()),
            Arc::new(runner.clone()),
            registry.clone(),
            keys.clone(),
            Backoff {
                max_attempts: 1,
                base_delay: Duration::from_millis(10),
                max_delay: Duration::from_millis(10),
                max_total_wait: Duration::from_millis(10),
            },
        );
        let reconciler = StatusReconciler::new(
            Arc::new(store.clone()),
            Arc::new(runner.clone()),
            registry.clone(),
            keys,
            4,
        );
        Fixture {
            store,
            runner,
            registry,
            orchestrator,
            reconciler,
        }
    }

    async fn submit(fx: &Fixture, name: &str) -> Job {
        let key = format!("uploads/{}", name);
        fx.store.insert(&key, Bytes::from_static(b"frames")).await;
        let object = fx.store.head(&key).await.unwrap().unwrap();
        let template = JobTemplate {
            role: "role".into(),
            preset: "preset".into(),
            name_modifier: "_cli".into(),
            output_extension: "mp4".into(),
            customer: "Amazon".into(),
        };
        fx.orchestrator
            .submit_from_upload(&object, &template, &CancellationToken::new())
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn completed_job_is_linked_to_its_upload() {
        let fx = fixture();
        let job = submit(&fx, "clip.mp4").await;
        fx.runner.set_status(&job.id, JobStatus::Complete).await.unwrap();

        let report = fx.reconciler.reconcile().await.unwrap();

        assert_eq!(
            report.entries,
            vec![EntrySummary {
                id: job.id.clone(),
                source_key: "clip.mp4".into(),
                status: JobStatus::Complete,
                output_key: Some("clip_cli.mp4".into()),
                runner_missing: false,
            }]
        );
        assert_eq!(
            report.objects,
            vec![ObjectSummary {
                key: "uploads/clip.mp4".into(),
                source_key: "clip.mp4".into(),
                classification: ObjectClass::Linked,
                job_id: Some(job.id),
            }]
        );
        assert!(report.anomalies.is_empty());
    }

    #[tokio::test]
    async fn unsubmitted_and_malformed_uploads_are_reported() {
        let fx = fixture();
        fx.store.insert("uploads/orphan.mp4", Bytes::from_static(b"x")).await;
        fx.store.insert("uploads/nested/deep.mp4", Bytes::from_static(b"x")).await;
        // Outside the input prefix, never looked at.
        fx.store.insert("outputs/old_cli.mp4", Bytes::from_static(b"x")).await;

        let report = fx.reconciler.reconcile().await.unwrap();

        assert!(report.entries.is_empty());
        assert_eq!(report.objects.len(), 1);
        assert_eq!(report.objects[0].source_key, "orphan.mp4");
        assert_eq!(report.objects[0].classification, ObjectClass::OrphanedUnsubmitted);
        assert_eq!(report.objects[0].job_id, None);
        assert!(matches!(
            report.anomalies.as_slice(),
            [Anomaly::MalformedKey { key, .. }] if key == "uploads/nested/deep.mp4"
        ));
    }

    #[tokio::test]
    async fn repeated_passes_produce_identical_reports() {
        let fx = fixture();
        let done = submit(&fx, "a.mp4").await;
        let gone = submit(&fx, "b.mp4").await;
        submit(&fx, "c.mp4").await;
        fx.store.insert("uploads/d.mp4", Bytes::from_static(b"x")).await;
        fx.runner.set_status(&done.id, JobStatus::Complete).await.unwrap();
        fx.runner.forget(&gone.id).await;

        let first = fx.reconciler.reconcile().await.unwrap();
        let second = fx.reconciler.reconcile().await.unwrap();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn vanished_jobs_end_in_error_and_orphan_their_upload() {
        let fx = fixture();
        let job = submit(&fx, "clip.mp4").await;
        fx.runner.forget(&job.id).await;

        let report = fx.reconciler.reconcile().await.unwrap();

        assert_eq!(report.entries[0].status, JobStatus::Error);
        assert!(report.entries[0].runner_missing);
        assert_eq!(report.objects[0].classification, ObjectClass::OrphanedJobMissing);
        assert_eq!(
            report.anomalies,
            vec![Anomaly::JobMissing {
                job_id: job.id,
                source_key: "clip.mp4".into(),
            }]
        );
    }

    #[tokio::test]
    async fn backward_reports_surface_as_anomalies() {
        let fx = fixture();
        let job = submit(&fx, "clip.mp4").await;
        fx.registry
            .upsert(Job {
                status: JobStatus::Progressing,
                ..job.clone()
            })
            .await
            .unwrap();

        // The runner still says SUBMITTED.
        let report = fx.reconciler.reconcile().await.unwrap();

        assert_eq!(report.entries[0].status, JobStatus::Progressing);
        assert_eq!(
            report.anomalies,
            vec![Anomaly::BackwardTransition {
                job_id: job.id,
                current: JobStatus::Progressing,
                reported: JobStatus::Submitted,
            }]
        );
    }

    #[tokio::test]
    async fn sync_failures_and_missing_sources_leave_entries_untouched() {
        let fx = fixture();
        let flaky = submit(&fx, "flaky.mp4").await;
        let lost = submit(&fx, "lost.mp4").await;
        fx.runner
            .fail_gets_of(&flaky.id, RunnerError::Transport("timeout".into()))
            .await;
        fx.store.delete("uploads/lost.mp4").await.unwrap();

        let report = fx.reconciler.reconcile().await.unwrap();

        assert!(report.entries.iter().all(|e| e.status == JobStatus::Submitted));
        assert!(report.anomalies.contains(&Anomaly::SourceMissing {
            job_id: lost.id,
            source_key: "lost.mp4".into(),
        }));
        assert!(report
            .anomalies
            .iter()
            .any(|a| matches!(a, Anomaly::SyncFailed { job_id, .. } if *job_id == flaky.id)));
    }

    #[tokio::test]
    async fn refresh_syncs_a_single_entry() {
        let fx = fixture();
        let job = submit(&fx, "clip.mp4").await;
        fx.runner.cancel(&job.id).await.unwrap();

        let entry = fx.reconciler.refresh(&job.id).await.unwrap();
        assert_eq!(entry.job.status, JobStatus::Canceled);

        assert!(matches!(
            fx.reconciler.refresh("j-404").await,
            Err(AppError::NotFound(_))
        ));
    }
}
