use std::collections::HashMap;

use async_trait::async_trait;
use aws_sdk_mediaconvert::config::{BehaviorVersion, Builder, Region};
use aws_sdk_mediaconvert::error::{DisplayErrorContext, ProvideErrorMetadata, SdkError};
use aws_sdk_mediaconvert::types::{
    self as mc, AudioDefaultSelection, AudioSelector, FileGroupSettings, Input,
    InputTimecodeSource, JobSettings, Output, OutputGroup, OutputGroupSettings, OutputGroupType,
    TimecodeConfig, TimecodeSource,
};
use aws_sdk_mediaconvert::Client;
use time::OffsetDateTime;
use tracing::{debug, info, warn};

use super::{JobFilter, JobParams, JobRunner, RunnerError, RunnerResult, OUTPUT_KEY_META, SOURCE_KEY_META};
use crate::modules::jobs::model::{Job, JobStatus};

const LIST_PAGE_SIZE: i32 = 20;

/// Maps SDK failures onto the runner taxonomy. Anything that is not a
/// recognised service rejection counts as transport.
fn classify<E>(operation: &str, err: SdkError<E>) -> RunnerError
where
    E: ProvideErrorMetadata + std::error::Error + 'static,
{
    let code = err.as_service_error().and_then(|e| e.code()).map(str::to_owned);
    let detail = format!("{}: {}", operation, DisplayErrorContext(&err));
    match code.as_deref() {
        Some("TooManyRequestsException") => RunnerError::Quota(detail),
        Some("NotFoundException") => RunnerError::NotFound(detail),
        Some("BadRequestException") | Some("ForbiddenException") | Some("ConflictException") => {
            RunnerError::Validation(detail)
        }
        _ => RunnerError::Transport(detail),
    }
}

/// Converts a MediaConvert job into the pipeline view. Jobs without our
/// source metadata were not submitted by this service.
fn to_job(remote: &mc::Job) -> Option<Job> {
    let metadata = remote.user_metadata();
    let id = remote.id()?.to_string();
    let source_key = metadata?.get(SOURCE_KEY_META)?.clone();

    let status = match remote.status().map(|s| s.as_str().parse::<JobStatus>()) {
        Some(Ok(status)) => status,
        Some(Err(e)) => {
            warn!(job_id = %id, error = %e, "Runner reported an unrecognised status");
            return None;
        }
        None => JobStatus::Submitted,
    };

    let created_at = remote
        .created_at()
        .and_then(|dt| OffsetDateTime::from_unix_timestamp_nanos(dt.as_nanos()).ok())
        .unwrap_or_else(OffsetDateTime::now_utc);

    let output_key = if status == JobStatus::Complete {
        metadata.and_then(|m| m.get(OUTPUT_KEY_META)).cloned()
    } else {
        None
    };

    Some(Job {
        id,
        source_key,
        status,
        created_at,
        output_key,
    })
}

fn build_settings(params: &JobParams) -> JobSettings {
    let input = Input::builder()
        .file_input(&params.input_uri)
        .audio_selectors(
            "Audio Selector 1",
            AudioSelector::builder()
                .offset(0)
                .default_selection(AudioDefaultSelection::Default)
                .program_selection(1)
                .build(),
        )
        .timecode_source(InputTimecodeSource::Embedded)
        .build();

    let output_group = OutputGroup::builder()
        .name("File Group")
        .output_group_settings(
            OutputGroupSettings::builder()
                .r#type(OutputGroupType::FileGroupSettings)
                .file_group_settings(
                    FileGroupSettings::builder()
                        .destination(&params.destination_uri)
                        .build(),
                )
                .build(),
        )
        .outputs(
            Output::builder()
                .preset(&params.preset)
                .name_modifier(&params.name_modifier)
                .build(),
        )
        .build();

    JobSettings::builder()
        .ad_avail_offset(0)
        .timecode_config(
            TimecodeConfig::builder()
                .source(TimecodeSource::Embedded)
                .build(),
        )
        .inputs(input)
        .output_groups(output_group)
        .build()
}

pub struct MediaConvertRunner {
    client: Client,
}

impl MediaConvertRunner {
    /// `endpoint` overrides the account specific MediaConvert endpoint.
    pub async fn new(region: &str, endpoint: Option<&str>) -> Self {
        let shared = aws_config::defaults(BehaviorVersion::latest())
            .region(Region::new(region.to_string()))
            .load()
            .await;

        let mut builder = Builder::from(&shared);
        if let Some(endpoint) = endpoint {
            builder = builder.endpoint_url(endpoint);
        }

        info!(region, "✅ MediaConvert runner configured");
        Self {
            client: Client::from_conf(builder.build()),
        }
    }
}

#[async_trait]
impl JobRunner for MediaConvertRunner {
    async fn submit(&self, params: &JobParams) -> RunnerResult<Job> {
        params.check()?;

        let mut metadata: HashMap<String, String> = params
            .user_metadata
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        metadata.insert(SOURCE_KEY_META.to_string(), params.source_key.clone());
        metadata.insert(OUTPUT_KEY_META.to_string(), params.output_key.clone());

        let response = self
            .client
            .create_job()
            .role(&params.role)
            .settings(build_settings(params))
            .set_user_metadata(Some(metadata))
            .send()
            .await
            .map_err(|e| classify("create_job", e))?;

        let job = response
            .job()
            .and_then(to_job)
            .ok_or_else(|| RunnerError::Transport("create_job returned no usable job".to_string()))?;

        info!(job_id = %job.id, source_key = %job.source_key, "MediaConvert job created");
        Ok(job)
    }

    async fn get(&self, id: &str) -> RunnerResult<Job> {
        let response = self
            .client
            .get_job()
            .id(id)
            .send()
            .await
            .map_err(|e| match classify("get_job", e) {
                RunnerError::NotFound(_) => RunnerError::NotFound(id.to_string()),
                other => other,
            })?;

        response
            .job()
            .and_then(to_job)
            .ok_or_else(|| RunnerError::NotFound(id.to_string()))
    }

    async fn list(&self, filter: &JobFilter) -> RunnerResult<Vec<Job>> {
        let mut jobs = Vec::new();
        let mut next_token: Option<String> = None;

        loop {
            let page = self
                .client
                .list_jobs()
                .set_status(filter.status.map(|s| mc::JobStatus::from(s.as_str())))
                .max_results(LIST_PAGE_SIZE)
                .set_next_token(next_token.take())
                .send()
                .await
                .map_err(|e| classify("list_jobs", e))?;

            for remote in page.jobs() {
                match to_job(remote) {
                    Some(job) => jobs.push(job),
                    None => debug!(job_id = ?remote.id(), "Skipping job without pipeline metadata"),
                }
            }

            let reached_limit = filter.limit.is_some_and(|limit| jobs.len() >= limit);
            match page.next_token() {
                Some(token) if !reached_limit => next_token = Some(token.to_string()),
                _ => break,
            }
        }

        if let Some(limit) = filter.limit {
            jobs.truncate(limit);
        }
        Ok(jobs)
    }

    async fn cancel(&self, id: &str) -> RunnerResult<()> {
        let current = self.get(id).await?;
        if current.status.is_terminal() {
            debug!(job_id = %id, status = %current.status, "Cancel skipped, job already finished");
            return Ok(());
        }

        match self.client.cancel_job().id(id).send().await {
            Ok(_) => {
                info!(job_id = %id, "MediaConvert job canceled");
                Ok(())
            }
            Err(e) => {
                let err = classify("cancel_job", e);
                // The job may have finished between the lookup and the cancel.
                match self.get(id).await {
                    Ok(job) if job.status.is_terminal() => Ok(()),
                    _ => Err(err),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use aws_sdk_mediaconvert::config::http::HttpResponse;
    use aws_sdk_mediaconvert::error::ErrorMetadata;
    use aws_sdk_mediaconvert::operation::get_job::GetJobError;
    use aws_sdk_mediaconvert::primitives::DateTime;
    use aws_sdk_s3::primitives::SdkBody;

    use super::*;

    fn service_error(code: &str, status: u16) -> SdkError<GetJobError> {
        let meta = ErrorMetadata::builder().code(code).message("rejected").build();
        let raw = HttpResponse::new(status.try_into().unwrap(), SdkBody::empty());
        SdkError::service_error(GetJobError::generic(meta), raw)
    }

    fn remote(status: Option<&str>, metadata: &[(&str, &str)]) -> mc::Job {
        let mut builder = mc::Job::builder()
            .id("1700000000000-abc123")
            .role("arn:aws:iam::123:role/MediaConvert")
            .created_at(DateTime::from_secs(1_700_000_000))
            .set_status(status.map(mc::JobStatus::from));
        for (key, value) in metadata {
            builder = builder.user_metadata(*key, *value);
        }
        builder.build()
    }

    #[test]
    fn service_codes_map_onto_runner_errors() {
        assert!(matches!(
            classify("get_job", service_error("TooManyRequestsException", 429)),
            RunnerError::Quota(_)
        ));
        assert!(matches!(
            classify("get_job", service_error("NotFoundException", 404)),
            RunnerError::NotFound(_)
        ));
        for code in ["BadRequestException", "ForbiddenException", "ConflictException"] {
            assert!(matches!(
                classify("get_job", service_error(code, 400)),
                RunnerError::Validation(_)
            ));
        }
    }

    #[test]
    fn unrecognised_failures_are_retryable_transport() {
        assert!(matches!(
            classify("get_job", service_error("InternalServerErrorException", 500)),
            RunnerError::Transport(_)
        ));
        let timeout: SdkError<GetJobError> = SdkError::timeout_error("connect timed out");
        match classify("create_job", timeout) {
            RunnerError::Transport(detail) => assert!(detail.starts_with("create_job")),
            other => panic!("expected transport error, got {:?}", other),
        }
    }

    #[test]
    fn completed_jobs_carry_their_output_key() {
        let job = to_job(&remote(
            Some("COMPLETE"),
            &[("Customer", "Amazon"), (SOURCE_KEY_META, "clip.mp4"), (OUTPUT_KEY_META, "clip_cli.mp4")],
        ))
        .unwrap();

        assert_eq!(job.id, "1700000000000-abc123");
        assert_eq!(job.source_key, "clip.mp4");
        assert_eq!(job.status, JobStatus::Complete);
        assert_eq!(job.output_key.as_deref(), Some("clip_cli.mp4"));
        assert_eq!(job.created_at.unix_timestamp(), 1_700_000_000);
    }

    #[test]
    fn unfinished_jobs_have_no_output_key() {
        let meta = [(SOURCE_KEY_META, "clip.mp4"), (OUTPUT_KEY_META, "clip_cli.mp4")];
        for (reported, expected) in [
            ("SUBMITTED", JobStatus::Submitted),
            ("PROGRESSING", JobStatus::Progressing),
            ("CANCELED", JobStatus::Canceled),
            ("ERROR", JobStatus::Error),
        ] {
            let job = to_job(&remote(Some(reported), &meta)).unwrap();
            assert_eq!(job.status, expected);
            assert_eq!(job.output_key, None);
        }

        let job = to_job(&remote(None, &meta)).unwrap();
        assert_eq!(job.status, JobStatus::Submitted);
    }

    #[test]
    fn foreign_or_unreadable_jobs_are_skipped() {
        assert!(to_job(&remote(Some("COMPLETE"), &[])).is_none());
        assert!(to_job(&remote(Some("COMPLETE"), &[("Customer", "Amazon")])).is_none());
        assert!(to_job(&remote(Some("PAUSED"), &[(SOURCE_KEY_META, "clip.mp4")])).is_none());
    }
}
