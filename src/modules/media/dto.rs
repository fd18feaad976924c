use serde::Serialize;
use time::OffsetDateTime;
use utoipa::ToSchema;

use crate::modules::jobs::model::{Job, JobStatus, RegistryEntry};

#[derive(Debug, Serialize, ToSchema)]
pub struct UploadResponse {
    pub job_id: String,
    pub source_key: String,
    pub status: JobStatus,
}

impl From<Job> for UploadResponse {
    fn from(job: Job) -> Self {
        Self {
            job_id: job.id,
            source_key: job.source_key,
            status: job.status,
        }
    }
}

/// Job status, or `UNSUBMITTED` for uploads no job was ever created for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MediaItemStatus {
    Submitted,
    Progressing,
    Complete,
    Canceled,
    Error,
    Unsubmitted,
}

impl From<JobStatus> for MediaItemStatus {
    fn from(status: JobStatus) -> Self {
        match status {
            JobStatus::Submitted => MediaItemStatus::Submitted,
            JobStatus::Progressing => MediaItemStatus::Progressing,
            JobStatus::Complete => MediaItemStatus::Complete,
            JobStatus::Canceled => MediaItemStatus::Canceled,
            JobStatus::Error => MediaItemStatus::Error,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
pub struct MediaItem {
    pub source_key: String,
    pub job_id: Option<String>,
    pub status: MediaItemStatus,
    #[serde(with = "time::serde::rfc3339")]
    #[schema(value_type = String, format = DateTime)]
    pub created_at: OffsetDateTime,
    pub output_key: Option<String>,
    pub storage_class: Option<String>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct MediaResponse {
    pub id: String,
    pub source_key: String,
    pub status: JobStatus,
    #[serde(with = "time::serde::rfc3339")]
    #[schema(value_type = String, format = DateTime)]
    pub created_at: OffsetDateTime,
    pub output_key: Option<String>,
    #[serde(with = "time::serde::rfc3339")]
    #[schema(value_type = String, format = DateTime)]
    pub last_synced_at: OffsetDateTime,
    pub runner_missing: bool,
}

impl From<RegistryEntry> for MediaResponse {
    fn from(entry: RegistryEntry) -> Self {
        Self {
            id: entry.job.id,
            source_key: entry.job.source_key,
            status: entry.job.status,
            created_at: entry.job.created_at,
            output_key: entry.job.output_key,
            last_synced_at: entry.last_synced_at,
            runner_missing: entry.runner_missing,
        }
    }
}

#[derive(Debug, Serialize, ToSchema)]
pub struct DownloadUrlResponse {
    pub url: String,
    pub expires_in_secs: u64,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct DeleteResponse {
    pub job_id: String,
    pub status: JobStatus,
    pub canceled: bool,
    /// Storage keys removed along with the job.
    pub deleted: Vec<String>,
}
