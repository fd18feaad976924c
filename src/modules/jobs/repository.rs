use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use sqlx::{FromRow, PgPool};
use time::OffsetDateTime;
use tokio::sync::RwLock;

use super::model::{Job, JobStatus, RegistryEntry};
use crate::common::error::AppError;

/// Durable storage behind the job registry. Entries are keyed by job id with
/// a lookup by source key for the one active job a source may have.
#[async_trait]
pub trait JobRepository: Send + Sync {
    async fn get(&self, id: &str) -> Result<Option<RegistryEntry>, AppError>;

    async fn find_active_by_source(&self, source_key: &str) -> Result<Option<RegistryEntry>, AppError>;

    /// Inserts or replaces the entry with the same job id.
    async fn save(&self, entry: &RegistryEntry) -> Result<(), AppError>;

    async fn delete(&self, id: &str) -> Result<(), AppError>;

    async fn list(&self) -> Result<Vec<RegistryEntry>, AppError>;

    /// Every entry of one source, newest first.
    async fn list_by_source(&self, source_key: &str) -> Result<Vec<RegistryEntry>, AppError>;

    async fn list_non_terminal(&self) -> Result<Vec<RegistryEntry>, AppError>;
}

#[derive(Debug, FromRow)]
struct JobRow {
    id: String,
    source_key: String,
    status: String,
    created_at: OffsetDateTime,
    output_key: Option<String>,
    last_synced_at: OffsetDateTime,
    runner_missing: bool,
}

impl TryFrom<JobRow> for RegistryEntry {
    type Error = AppError;

    fn try_from(row: JobRow) -> Result<Self, Self::Error> {
        let status = row
            .status
            .parse::<JobStatus>()
            .map_err(|e| AppError::Persistence(format!("job {}: {}", row.id, e)))?;

        Ok(RegistryEntry {
            job: Job {
                id: row.id,
                source_key: row.source_key,
                status,
                created_at: row.created_at,
                output_key: row.output_key,
            },
            last_synced_at: row.last_synced_at,
            runner_missing: row.runner_missing,
        })
    }
}

fn into_entries(rows: Vec<JobRow>) -> Result<Vec<RegistryEntry>, AppError> {
    rows.into_iter().map(RegistryEntry::try_from).collect()
}

const SELECT_COLUMNS: &str =
    "SELECT id, source_key, status, created_at, output_key, last_synced_at, runner_missing FROM transcode_jobs";

#[derive(Clone)]
pub struct PgJobRepository {
    pool: PgPool,
}

impl PgJobRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl JobRepository for PgJobRepository {
    async fn get(&self, id: &str) -> Result<Option<RegistryEntry>, AppError> {
        let row = sqlx::query_as::<_, JobRow>(&format!("{} WHERE id = $1", SELECT_COLUMNS))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(RegistryEntry::try_from).transpose()
    }

    async fn find_active_by_source(&self, source_key: &str) -> Result<Option<RegistryEntry>, AppError> {
        let row = sqlx::query_as::<_, JobRow>(&format!(
            "{} WHERE source_key = $1 AND status IN ('SUBMITTED', 'PROGRESSING')",
            SELECT_COLUMNS
        ))
        .bind(source_key)
        .fetch_optional(&self.pool)
        .await?;
        row.map(RegistryEntry::try_from).transpose()
    }

    async fn save(&self, entry: &RegistryEntry) -> Result<(), AppError> {
        sqlx::query(
            r#"
            INSERT INTO transcode_jobs (id, source_key, status, created_at, output_key, last_synced_at, runner_missing)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (id) DO UPDATE SET
                status = EXCLUDED.status,
                output_key = EXCLUDED.output_key,
                last_synced_at = EXCLUDED.last_synced_at,
                runner_missing = EXCLUDED.runner_missing
            "#,
        )
        .bind(&entry.job.id)
        .bind(&entry.job.source_key)
        .bind(entry.job.status.as_str())
        .bind(entry.job.created_at)
        .bind(&entry.job.output_key)
        .bind(entry.last_synced_at)
        .bind(entry.runner_missing)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn delete(&self, id: &str) -> Result<(), AppError> {
        sqlx::query("DELETE FROM transcode_jobs WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn list(&self) -> Result<Vec<RegistryEntry>, AppError> {
        let rows = sqlx::query_as::<_, JobRow>(&format!("{} ORDER BY created_at DESC, id", SELECT_COLUMNS))
            .fetch_all(&self.pool)
            .await?;
        into_entries(rows)
    }

    async fn list_by_source(&self, source_key: &str) -> Result<Vec<RegistryEntry>, AppError> {
        let rows = sqlx::query_as::<_, JobRow>(&format!(
            "{} WHERE source_key = $1 ORDER BY created_at DESC, id",
            SELECT_COLUMNS
        ))
        .bind(source_key)
        .fetch_all(&self.pool)
        .await?;
        into_entries(rows)
    }

    async fn list_non_terminal(&self) -> Result<Vec<RegistryEntry>, AppError> {
        let rows = sqlx::query_as::<_, JobRow>(&format!(
            "{} WHERE status IN ('SUBMITTED', 'PROGRESSING') ORDER BY created_at, id",
            SELECT_COLUMNS
        ))
        .fetch_all(&self.pool)
        .await?;
        into_entries(rows)
    }
}

/// Repository kept in process memory. Mirrors the unique active-job
/// constraint of the Postgres schema.
#[derive(Clone, Default)]
pub struct MemoryJobRepository {
    entries: Arc<RwLock<BTreeMap<String, RegistryEntry>>>,
}

impl MemoryJobRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

fn newest_first(entries: &mut [RegistryEntry]) {
    entries.sort_by(|a, b| {
        b.job
            .created_at
            .cmp(&a.job.created_at)
            .then_with(|| a.job.id.cmp(&b.job.id))
    });
}

#[async_trait]
impl JobRepository for MemoryJobRepository {
    async fn get(&self, id: &str) -> Result<Option<RegistryEntry>, AppError> {
        Ok(self.entries.read().await.get(id).cloned())
    }

    async fn find_active_by_source(&self, source_key: &str) -> Result<Option<RegistryEntry>, AppError> {
        Ok(self
            .entries
            .read()
            .await
            .values()
            .find(|entry| entry.job.source_key == source_key && entry.is_active())
            .cloned())
    }

    async fn save(&self, entry: &RegistryEntry) -> Result<(), AppError> {
        let mut entries = self.entries.write().await;
        if entry.is_active() {
            let clash = entries.values().any(|other| {
                other.job.id != entry.job.id
                    && other.job.source_key == entry.job.source_key
                    && other.is_active()
            });
            if clash {
                return Err(AppError::Conflict(format!(
                    "source '{}' already has an active job",
                    entry.job.source_key
                )));
            }
        }
        entries.insert(entry.job.id.clone(), entry.clone());
        Ok(())
    }

    async fn delete(&self, id: &str) -> Result<(), AppError> {
        self.entries.write().await.remove(id);
        Ok(())
    }

    async fn list(&self) -> Result<Vec<RegistryEntry>, AppError> {
        let mut entries: Vec<_> = self.entries.read().await.values().cloned().collect();
        newest_first(&mut entries);
        Ok(entries)
    }

    async fn list_by_source(&self, source_key: &str) -> Result<Vec<RegistryEntry>, AppError> {
        let mut entries: Vec<_> = self
            .entries
            .read()
            .await
            .values()
            .filter(|entry| entry.job.source_key == source_key)
            .cloned()
            .collect();
        newest_first(&mut entries);
        Ok(entries)
    }

    async fn list_non_terminal(&self) -> Result<Vec<RegistryEntry>, AppError> {
        let mut entries: Vec<_> = self
            .entries
            .read()
            .await
            .values()
            .filter(|entry| entry.is_active())
            .cloned()
            .collect();
        entries.sort_by(|a, b| {
            a.job
                .created_at
                .cmp(&b.job.created_at)
                .then_with(|| a.job.id.cmp(&b.job.id))
        });
        Ok(entries)
    }
}
