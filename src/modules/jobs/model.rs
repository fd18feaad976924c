use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use utoipa::ToSchema;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    Submitted,
    Progressing,
    Complete,
    Canceled,
    Error,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Submitted => "SUBMITTED",
            JobStatus::Progressing => "PROGRESSING",
            JobStatus::Complete => "COMPLETE",
            JobStatus::Canceled => "CANCELED",
            JobStatus::Error => "ERROR",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Complete | JobStatus::Canceled | JobStatus::Error)
    }

    /// Whether an entry in `self` may move to `next`. Staying put is not a
    /// transition.
    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        match (self, next) {
            (JobStatus::Submitted, JobStatus::Progressing) => true,
            (JobStatus::Submitted | JobStatus::Progressing, next) => next.is_terminal(),
            _ => false,
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "SUBMITTED" => Ok(JobStatus::Submitted),
            "PROGRESSING" => Ok(JobStatus::Progressing),
            "COMPLETE" => Ok(JobStatus::Complete),
            "CANCELED" => Ok(JobStatus::Canceled),
            "ERROR" => Ok(JobStatus::Error),
            other => Err(format!("unknown job status '{}'", other)),
        }
    }
}

/// A transcode job as last reported by the runner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct Job {
    pub id: String,
    pub source_key: String,
    pub status: JobStatus,
    #[serde(with = "time::serde::rfc3339")]
    #[schema(value_type = String, format = DateTime)]
    pub created_at: OffsetDateTime,
    pub output_key: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct RegistryEntry {
    pub job: Job,
    #[serde(with = "time::serde::rfc3339")]
    #[schema(value_type = String, format = DateTime)]
    pub last_synced_at: OffsetDateTime,
    /// The runner stopped knowing about this job.
    pub runner_missing: bool,
}

impl RegistryEntry {
    pub fn new(job: Job) -> Self {
        Self {
            job,
            last_synced_at: OffsetDateTime::now_utc(),
            runner_missing: false,
        }
    }

    pub fn is_active(&self) -> bool {
        !self.job.status.is_terminal()
    }
}

/// Per-submission defaults merged with the uploaded object's location.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobTemplate {
    pub role: String,
    pub preset: String,
    pub name_modifier: String,
    pub output_extension: String,
    pub customer: String,
}

/// Something reconciliation noticed but refused to apply or could not resolve.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, ToSchema)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Anomaly {
    BackwardTransition {
        job_id: String,
        current: JobStatus,
        reported: JobStatus,
    },
    SourceMismatch {
        job_id: String,
        expected: String,
        reported: String,
    },
    JobMissing {
        job_id: String,
        source_key: String,
    },
    SyncFailed {
        job_id: String,
        error: String,
    },
    MalformedKey {
        key: String,
        error: String,
    },
    SourceMissing {
        job_id: String,
        source_key: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn forward_transitions_are_allowed() {
        use JobStatus::*;
        assert!(Submitted.can_transition_to(Progressing));
        assert!(Submitted.can_transition_to(Complete));
        assert!(Submitted.can_transition_to(Canceled));
        assert!(Progressing.can_transition_to(Complete));
        assert!(Progressing.can_transition_to(Error));
        assert!(Progressing.can_transition_to(Canceled));
    }

    #[test]
    fn backward_and_terminal_transitions_are_rejected() {
        use JobStatus::*;
        assert!(!Progressing.can_transition_to(Submitted));
        assert!(!Complete.can_transition_to(Progressing));
        assert!(!Canceled.can_transition_to(Complete));
        assert!(!Error.can_transition_to(Submitted));
        assert!(!Submitted.can_transition_to(Submitted));
    }

    #[test]
    fn status_round_trips_through_runner_strings() {
        for status in ["SUBMITTED", "PROGRESSING", "COMPLETE", "CANCELED", "ERROR"] {
            assert_eq!(status.parse::<JobStatus>().unwrap().as_str(), status);
        }
        assert!("PAUSED".parse::<JobStatus>().is_err());
    }
}
