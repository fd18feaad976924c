use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use time::OffsetDateTime;
use tokio::sync::{Mutex as SlotMutex, OwnedMutexGuard};
use tracing::{info, warn};

use super::model::{Anomaly, Job, JobStatus, RegistryEntry};
use super::repository::JobRepository;
use crate::common::error::AppError;

/// Result of merging one runner report into the registry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpsertOutcome {
    Inserted,
    Advanced { from: JobStatus, to: JobStatus },
    Unchanged,
    Rejected(Anomaly),
}

struct Slot {
    lock: Arc<SlotMutex<()>>,
    users: usize,
}

type LockTable = Mutex<HashMap<String, Slot>>;

/// Record of one holder or waiter in the lock table. Dropping it, including
/// when a pending acquire is abandoned, releases the slot once unused.
struct SlotClaim {
    locks: Arc<LockTable>,
    source_key: String,
}

impl SlotClaim {
    fn register(locks: &Arc<LockTable>, source_key: &str) -> (Self, Arc<SlotMutex<()>>) {
        let mut table = locks.lock().unwrap_or_else(PoisonError::into_inner);
        let slot = table.entry(source_key.to_string()).or_insert_with(|| Slot {
            lock: Arc::new(SlotMutex::new(())),
            users: 0,
        });
        slot.users += 1;
        let lock = slot.lock.clone();
        drop(table);

        let claim = Self {
            locks: locks.clone(),
            source_key: source_key.to_string(),
        };
        (claim, lock)
    }
}

impl Drop for SlotClaim {
    fn drop(&mut self) {
        let mut table = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(slot) = table.get_mut(&self.source_key) {
            slot.users = slot.users.saturating_sub(1);
            if slot.users == 0 {
                table.remove(&self.source_key);
            }
        }
    }
}

/// Authoritative record of known jobs. Writes for one source key are
/// serialized through [`SourceGuard`]; distinct keys never contend.
#[derive(Clone)]
pub struct JobRegistry {
    repo: Arc<dyn JobRepository>,
    locks: Arc<LockTable>,
}

/// Exclusive hold on one source key. The slot is evicted from the lock
/// table when the last holder or waiter lets go.
pub struct SourceGuard {
    registry: JobRegistry,
    source_key: String,
    // Released before the claim so a new holder never sees a fresh slot
    // while this one is still locked.
    _guard: OwnedMutexGuard<()>,
    _claim: SlotClaim,
}

impl SourceGuard {
    pub fn source_key(&self) -> &str {
        &self.source_key
    }

    pub async fn active_job(&self) -> Result<Option<RegistryEntry>, AppError> {
        self.registry.repo.find_active_by_source(&self.source_key).await
    }

    /// Every entry of the held source, newest first.
    pub async fn entries(&self) -> Result<Vec<RegistryEntry>, AppError> {
        self.registry.repo.list_by_source(&self.source_key).await
    }

    pub async fn upsert(&self, job: Job) -> Result<UpsertOutcome, AppError> {
        if job.source_key != self.source_key {
            return Err(AppError::Validation(format!(
                "job {} belongs to '{}', not '{}'",
                job.id, job.source_key, self.source_key
            )));
        }
        self.registry.upsert_locked(job).await
    }

    /// Purges a finished entry of the held source.
    pub async fn remove(&self, id: &str) -> Result<RegistryEntry, AppError> {
        let entry = self.registry.require(id).await?;
        if entry.job.source_key != self.source_key {
            return Err(AppError::Validation(format!(
                "job {} belongs to '{}', not '{}'",
                id, entry.job.source_key, self.source_key
            )));
        }
        if entry.is_active() {
            return Err(AppError::Conflict(format!(
                "job {} is still {}",
                id, entry.job.status
            )));
        }
        self.registry.repo.delete(id).await?;
        info!(job_id = %id, "Job removed from registry");
        Ok(entry)
    }
}

impl JobRegistry {
    pub fn new(repo: Arc<dyn JobRepository>) -> Self {
        Self {
            repo,
            locks: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub async fn lock_source(&self, source_key: &str) -> SourceGuard {
        let (claim, lock) = SlotClaim::register(&self.locks, source_key);
        let guard = lock.lock_owned().await;
        SourceGuard {
            registry: self.clone(),
            source_key: source_key.to_string(),
            _guard: guard,
            _claim: claim,
        }
    }

    /// Number of source keys currently locked or awaited.
    pub fn locked_sources(&self) -> usize {
        self.locks.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub async fn upsert(&self, job: Job) -> Result<UpsertOutcome, AppError> {
        let guard = self.lock_source(&job.source_key).await;
        guard.upsert(job).await
    }

    async fn upsert_locked(&self, job: Job) -> Result<UpsertOutcome, AppError> {
        let Some(mut entry) = self.repo.get(&job.id).await? else {
            if !job.status.is_terminal() {
                if let Some(active) = self.repo.find_active_by_source(&job.source_key).await? {
                    return Err(AppError::Conflict(format!(
                        "source '{}' already has active job {}",
                        job.source_key, active.job.id
                    )));
                }
            }
            info!(job_id = %job.id, source_key = %job.source_key, status = %job.status, "Job registered");
            self.repo.save(&RegistryEntry::new(job)).await?;
            return Ok(UpsertOutcome::Inserted);
        };

        if entry.job.source_key != job.source_key {
            let anomaly = Anomaly::SourceMismatch {
                job_id: job.id.clone(),
                expected: entry.job.source_key.clone(),
                reported: job.source_key,
            };
            warn!(job_id = %job.id, ?anomaly, "Rejected runner report");
            return Ok(UpsertOutcome::Rejected(anomaly));
        }

        let from = entry.job.status;
        let outcome = if from == job.status {
            UpsertOutcome::Unchanged
        } else if from.can_transition_to(job.status) {
            UpsertOutcome::Advanced {
                from,
                to: job.status,
            }
        } else {
            let anomaly = Anomaly::BackwardTransition {
                job_id: job.id.clone(),
                current: from,
                reported: job.status,
            };
            warn!(job_id = %job.id, ?anomaly, "Rejected runner report");
            return Ok(UpsertOutcome::Rejected(anomaly));
        };

        entry.job.status = job.status;
        if job.output_key.is_some() {
            entry.job.output_key = job.output_key;
        }
        entry.last_synced_at = OffsetDateTime::now_utc();
        entry.runner_missing = false;
        self.repo.save(&entry).await?;

        if let UpsertOutcome::Advanced { from, to } = &outcome {
            info!(job_id = %entry.job.id, %from, %to, "Job status advanced");
        }
        Ok(outcome)
    }

    pub async fn find_active_by_source_key(&self, source_key: &str) -> Result<Option<RegistryEntry>, AppError> {
        self.repo.find_active_by_source(source_key).await
    }

    pub async fn get(&self, id: &str) -> Result<Option<RegistryEntry>, AppError> {
        self.repo.get(id).await
    }

    pub async fn require(&self, id: &str) -> Result<RegistryEntry, AppError> {
        self.repo
            .get(id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("job '{}'", id)))
    }

    /// All entries, newest first.
    pub async fn list(&self) -> Result<Vec<RegistryEntry>, AppError> {
        self.repo.list().await
    }

    pub async fn list_non_terminal(&self) -> Result<Vec<RegistryEntry>, AppError> {
        self.repo.list_non_terminal().await
    }

    /// Records that the runner no longer knows the job. Active entries end in
    /// ERROR; finished ones keep their status and only gain the flag.
    pub async fn mark_missing(&self, id: &str) -> Result<RegistryEntry, AppError> {
        let source_key = self.require(id).await?.job.source_key;
        let _guard = self.lock_source(&source_key).await;

        let mut entry = self.require(id).await?;
        if entry.runner_missing {
            return Ok(entry);
        }
        if entry.is_active() {
            entry.job.status = JobStatus::Error;
        }
        entry.runner_missing = true;
        entry.last_synced_at = OffsetDateTime::now_utc();
        self.repo.save(&entry).await?;

        warn!(job_id = %id, source_key = %entry.job.source_key, "Job vanished from the runner");
        Ok(entry)
    }

    /// Purges a finished entry.
    pub async fn remove(&self, id: &str) -> Result<RegistryEntry, AppError> {
        let source_key = self.require(id).await?.job.source_key;
        self.lock_source(&source_key).await.remove(id).await
    }
}
