use std::env;
use std::str::FromStr;

pub enum EnvKey {
    ServerPort,
    DatabaseUrl,
    MediaBackend,
    AwsRegion,
    S3Bucket,
    S3Endpoint,
    MediaConvertEndpoint,
    MediaConvertRole,
    MediaConvertPreset,
    MediaConvertCustomer,
    OutputNameModifier,
    OutputExtension,
    InputPrefix,
    OutputPrefix,
    ReconcileIntervalSecs,
    ReconcileConcurrency,
    SubmitMaxAttempts,
    SubmitBaseBackoffMs,
    SubmitMaxBackoffMs,
    SubmitMaxTotalWaitSecs,
    DownloadUrlTtlSecs,
    MaxUploadBytes,
}

impl EnvKey {
    pub fn as_str(&self) -> &'static str {
        match self {
            EnvKey::ServerPort => "APP_PORT",
            EnvKey::DatabaseUrl => "DATABASE_URL",
            EnvKey::MediaBackend => "MEDIA_BACKEND",
            EnvKey::AwsRegion => "AWS_REGION",
            EnvKey::S3Bucket => "S3_BUCKET",
            EnvKey::S3Endpoint => "S3_ENDPOINT",
            EnvKey::MediaConvertEndpoint => "MEDIACONVERT_ENDPOINT",
            EnvKey::MediaConvertRole => "MEDIACONVERT_ROLE_ARN",
            EnvKey::MediaConvertPreset => "MEDIACONVERT_PRESET",
            EnvKey::MediaConvertCustomer => "MEDIACONVERT_CUSTOMER",
            EnvKey::OutputNameModifier => "OUTPUT_NAME_MODIFIER",
            EnvKey::OutputExtension => "OUTPUT_EXTENSION",
            EnvKey::InputPrefix => "MEDIA_INPUT_PREFIX",
            EnvKey::OutputPrefix => "MEDIA_OUTPUT_PREFIX",
            EnvKey::ReconcileIntervalSecs => "RECONCILE_INTERVAL_SECS",
            EnvKey::ReconcileConcurrency => "RECONCILE_CONCURRENCY",
            EnvKey::SubmitMaxAttempts => "SUBMIT_MAX_ATTEMPTS",
            EnvKey::SubmitBaseBackoffMs => "SUBMIT_BASE_BACKOFF_MS",
            EnvKey::SubmitMaxBackoffMs => "SUBMIT_MAX_BACKOFF_MS",
            EnvKey::SubmitMaxTotalWaitSecs => "SUBMIT_MAX_TOTAL_WAIT_SECS",
            EnvKey::DownloadUrlTtlSecs => "DOWNLOAD_URL_TTL_SECS",
            EnvKey::MaxUploadBytes => "MAX_UPLOAD_BYTES",
        }
    }
}

pub fn get(key: EnvKey) -> Result<String, env::VarError> {
    env::var(key.as_str())
}

/// Returns `None` for unset or blank variables.
pub fn get_opt(key: EnvKey) -> Option<String> {
    env::var(key.as_str())
        .ok()
        .filter(|value| !value.trim().is_empty())
}

pub fn get_or(key: EnvKey, default: &str) -> String {
    env::var(key.as_str()).unwrap_or_else(|_| default.to_string())
}

pub fn get_parsed<T: FromStr>(key: EnvKey, default: T) -> T {
    match get(key) {
        Ok(val) => val.parse::<T>().unwrap_or(default),
        Err(_) => default,
    }
}
