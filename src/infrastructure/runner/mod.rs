//! Job runner adapter.
//!
//! The runner is the remote service that actually transcodes. Adapters
//! translate between its API and [`Job`], and report transport failures
//! separately from domain rejections so callers can decide what to retry.

use std::collections::BTreeMap;

use async_trait::async_trait;
use thiserror::Error;
use validator::Validate;

use crate::modules::jobs::model::{Job, JobStatus};

pub mod mediaconvert;
pub mod memory;

pub use mediaconvert::MediaConvertRunner;
pub use memory::MemoryRunner;

/// User metadata key carrying the job's source key.
pub const SOURCE_KEY_META: &str = "SourceKey";
/// User metadata key carrying the planned output name.
pub const OUTPUT_KEY_META: &str = "OutputKey";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RunnerError {
    #[error("invalid job parameters: {0}")]
    Validation(String),

    #[error("runner refused the job: {0}")]
    Quota(String),

    #[error("job {0} is unknown to the runner")]
    NotFound(String),

    /// Timeout, dispatch or service failure; safe to retry.
    #[error("runner transport error: {0}")]
    Transport(String),
}

pub type RunnerResult<T> = Result<T, RunnerError>;

/// Everything the runner needs to start one transcode.
#[derive(Debug, Clone, PartialEq, Eq, Validate)]
pub struct JobParams {
    #[validate(length(min = 1, message = "source reference is required"))]
    pub source_key: String,
    #[validate(length(min = 1, message = "input location is required"))]
    pub input_uri: String,
    #[validate(length(min = 1, message = "output destination is required"))]
    pub destination_uri: String,
    #[validate(length(min = 1, message = "role reference is required"))]
    pub role: String,
    #[validate(length(min = 1, message = "output preset is required"))]
    pub preset: String,
    pub name_modifier: String,
    /// Rendition name relative to the output prefix.
    pub output_key: String,
    pub user_metadata: BTreeMap<String, String>,
}

impl JobParams {
    pub fn check(&self) -> RunnerResult<()> {
        self.validate()
            .map_err(|e| RunnerError::Validation(e.to_string()))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JobFilter {
    pub status: Option<JobStatus>,
    pub limit: Option<usize>,
}

#[async_trait]
pub trait JobRunner: Send + Sync {
    async fn submit(&self, params: &JobParams) -> RunnerResult<Job>;

    async fn get(&self, id: &str) -> RunnerResult<Job>;

    /// Jobs this service submitted, newest first.
    async fn list(&self, filter: &JobFilter) -> RunnerResult<Vec<Job>>;

    /// Canceling a job that already finished succeeds without effect.
    async fn cancel(&self, id: &str) -> RunnerResult<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params() -> JobParams {
        JobParams {
            source_key: "clip.mp4".into(),
            input_uri: "s3://media/uploads/clip.mp4".into(),
            destination_uri: "s3://media/outputs/".into(),
            role: "arn:aws:iam::123:role/MediaConvert".into(),
            preset: "Generic".into(),
            name_modifier: "_cli".into(),
            output_key: "clip_cli.mp4".into(),
            user_metadata: BTreeMap::new(),
        }
    }

    #[test]
    fn complete_params_pass() {
        assert!(params().check().is_ok());
    }

    #[test]
    fn missing_role_is_a_validation_error() {
        let params = JobParams {
            role: String::new(),
            ..params()
        };
        match params.check() {
            Err(RunnerError::Validation(msg)) => assert!(msg.contains("role")),
            other => panic!("expected validation error, got {:?}", other),
        }
    }
}
