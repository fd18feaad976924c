use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;

use crate::common::keys::{KeyError, MediaKeys};
use crate::common::retry::Backoff;
use crate::config::env::{self, EnvKey};
use crate::modules::jobs::model::JobTemplate;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid MEDIA_BACKEND '{0}', expected 'aws' or 'memory'")]
    Backend(String),

    #[error("invalid media prefixes: {0}")]
    Prefix(#[from] KeyError),
}

/// Which adapter implementations back the object store and the job runner.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MediaBackend {
    Aws,
    Memory,
}

impl FromStr for MediaBackend {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "aws" | "s3" => Ok(MediaBackend::Aws),
            "memory" => Ok(MediaBackend::Memory),
            other => Err(ConfigError::Backend(other.to_string())),
        }
    }
}

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub server_port: u16,
    pub database_url: Option<String>,
    pub media_backend: MediaBackend,
    pub aws_region: String,
    pub s3_bucket: String,
    pub s3_endpoint: Option<String>,
    pub mediaconvert_endpoint: Option<String>,
    pub mediaconvert_role: String,
    pub mediaconvert_preset: String,
    pub mediaconvert_customer: String,
    pub output_name_modifier: String,
    pub output_extension: String,
    pub keys: MediaKeys,
    pub reconcile_interval: Duration,
    pub reconcile_concurrency: usize,
    pub submit_backoff: Backoff,
    pub download_url_ttl: Duration,
    pub max_upload_bytes: usize,
}

impl AppConfig {
    pub fn new() -> Result<Self, ConfigError> {
        let keys = MediaKeys::new(
            &env::get_or(EnvKey::InputPrefix, "uploads/"),
            &env::get_or(EnvKey::OutputPrefix, "outputs/"),
        )?;

        Ok(Self {
            server_port: env::get_parsed(EnvKey::ServerPort, 3000),
            database_url: env::get_opt(EnvKey::DatabaseUrl),
            media_backend: env::get_or(EnvKey::MediaBackend, "aws").parse()?,
            aws_region: env::get_or(EnvKey::AwsRegion, "sa-east-1"),
            s3_bucket: env::get_or(EnvKey::S3Bucket, "media"),
            s3_endpoint: env::get_opt(EnvKey::S3Endpoint),
            mediaconvert_endpoint: env::get_opt(EnvKey::MediaConvertEndpoint),
            mediaconvert_role: env::get_or(EnvKey::MediaConvertRole, ""),
            mediaconvert_preset: env::get_or(EnvKey::MediaConvertPreset, ""),
            mediaconvert_customer: env::get_or(EnvKey::MediaConvertCustomer, "Amazon"),
            output_name_modifier: env::get_or(EnvKey::OutputNameModifier, "_cli"),
            output_extension: env::get_or(EnvKey::OutputExtension, "mp4"),
            keys,
            reconcile_interval: Duration::from_secs(
                env::get_parsed(EnvKey::ReconcileIntervalSecs, 30u64).max(1),
            ),
            reconcile_concurrency: env::get_parsed(EnvKey::ReconcileConcurrency, 8usize).max(1),
            submit_backoff: Backoff {
                max_attempts: env::get_parsed(EnvKey::SubmitMaxAttempts, 4u32).max(1),
                base_delay: Duration::from_millis(env::get_parsed(EnvKey::SubmitBaseBackoffMs, 500)),
                max_delay: Duration::from_millis(env::get_parsed(EnvKey::SubmitMaxBackoffMs, 8_000)),
                max_total_wait: Duration::from_secs(env::get_parsed(EnvKey::SubmitMaxTotalWaitSecs, 30)),
            },
            download_url_ttl: Duration::from_secs(env::get_parsed(EnvKey::DownloadUrlTtlSecs, 600)),
            max_upload_bytes: env::get_parsed(EnvKey::MaxUploadBytes, 209_715_200),
        })
    }

    /// Defaults merged into every submission.
    pub fn job_template(&self) -> JobTemplate {
        JobTemplate {
            role: self.mediaconvert_role.clone(),
            preset: self.mediaconvert_preset.clone(),
            name_modifier: self.output_name_modifier.clone(),
            output_extension: self.output_extension.clone(),
            customer: self.mediaconvert_customer.clone(),
        }
    }
}
