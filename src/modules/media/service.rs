use std::collections::{BTreeMap, HashSet};

use axum::extract::Multipart;
use futures_util::TryStreamExt;
use tracing::{debug, info, warn};

use super::dto::{DeleteResponse, MediaItem, MediaItemStatus};
use crate::common::error::AppError;
use crate::common::upload::stream_to_store;
use crate::infrastructure::runner::RunnerError;
use crate::infrastructure::storage::{ChunkStream, MediaObject};
use crate::modules::jobs::model::{Job, RegistryEntry};
use crate::state::AppState;

const UPLOAD_FIELD: &str = "file";

pub struct MediaService;

impl MediaService {
    /// Stores the `file` field under the input prefix and submits it.
    pub async fn upload(state: &AppState, mut multipart: Multipart) -> Result<Job, AppError> {
        while let Some(field) = multipart
            .next_field()
            .await
            .map_err(|e| AppError::Validation(format!("malformed multipart body: {}", e)))?
        {
            if field.name() != Some(UPLOAD_FIELD) {
                continue;
            }

            let file_name = field
                .file_name()
                .ok_or_else(|| AppError::Validation("file field has no file name".to_string()))?
                .to_string();
            let source_key = state.config.keys.source_from_upload(&file_name)?;

            // Held until the job is registered so no other upload can replace
            // the bytes in between.
            let guard = state.registry.lock_source(&source_key).await;
            if let Some(active) = guard.active_job().await? {
                return Err(AppError::Conflict(format!(
                    "source '{}' already has active job {} ({})",
                    source_key, active.job.id, active.job.status
                )));
            }

            let key = state.config.keys.source_location(&source_key);
            info!(key = %key, "Starting upload");
            stream_to_store(state.store.as_ref(), field, &key).await?;

            let object = state
                .store
                .head(&key)
                .await?
                .ok_or_else(|| AppError::NotFound(format!("object '{}'", key)))?;

            return state
                .orchestrator
                .submit_locked(&guard, &object, &state.config.job_template(), &state.shutdown)
                .await;
        }

        Err(AppError::Validation(format!(
            "no '{}' field found in multipart request",
            UPLOAD_FIELD
        )))
    }

    /// Registry entries of every status, plus uploads with no job.
    pub async fn list(state: &AppState) -> Result<Vec<MediaItem>, AppError> {
        let keys = &state.config.keys;
        let entries = state.registry.list().await?;
        let objects: Vec<MediaObject> = state.store.list(keys.input_prefix()).try_collect().await?;

        let mut by_source = BTreeMap::new();
        for object in objects {
            match keys.parse_source(&object.key) {
                Ok(source_key) => {
                    by_source.insert(source_key, object);
                }
                Err(e) => debug!(key = %object.key, error = %e, "Skipping unmanaged key"),
            }
        }

        let mut known = HashSet::new();
        let mut items: Vec<MediaItem> = entries
            .into_iter()
            .map(|entry| {
                known.insert(entry.job.source_key.clone());
                MediaItem {
                    storage_class: by_source
                        .get(&entry.job.source_key)
                        .and_then(|o| o.storage_class.clone()),
                    source_key: entry.job.source_key,
                    job_id: Some(entry.job.id),
                    status: entry.job.status.into(),
                    created_at: entry.job.created_at,
                    output_key: entry.job.output_key,
                }
            })
            .collect();

        items.extend(
            by_source
                .into_iter()
                .filter(|(source_key, _)| !known.contains(source_key))
                .map(|(source_key, object)| MediaItem {
                    source_key,
                    job_id: None,
                    status: MediaItemStatus::Unsubmitted,
                    created_at: object.last_modified,
                    output_key: None,
                    storage_class: object.storage_class,
                }),
        );

        items.sort_by(|a, b| {
            b.created_at
                .cmp(&a.created_at)
                .then_with(|| a.source_key.cmp(&b.source_key))
        });
        Ok(items)
    }

    pub async fn get(state: &AppState, id: &str) -> Result<RegistryEntry, AppError> {
        state.registry.require(id).await
    }

    async fn output_object(state: &AppState, id: &str) -> Result<MediaObject, AppError> {
        let entry = state.registry.require(id).await?;
        let output_key = entry
            .job
            .output_key
            .ok_or_else(|| AppError::NotFound(format!("job {} has no output yet", id)))?;
        let key = state.config.keys.output_location(&output_key);

        state
            .store
            .head(&key)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("output '{}' of job {}", key, id)))
    }

    pub async fn download_url(state: &AppState, id: &str) -> Result<String, AppError> {
        let object = Self::output_object(state, id).await?;
        let url = state
            .store
            .presign_get(&object.key, state.config.download_url_ttl)
            .await?;
        info!(job_id = %id, key = %object.key, "Download URL issued");
        Ok(url)
    }

    pub async fn download(
        state: &AppState,
        id: &str,
    ) -> Result<(MediaObject, ChunkStream<'static>), AppError> {
        let object = Self::output_object(state, id).await?;
        let body = state.store.get(&object.key).await?;
        Ok((object, body))
    }

    /// Cancels the job, removes its objects and purges the entry. Objects
    /// still referenced by another job of the same source are kept. Steps
    /// keep going after a failure; what did succeed is reported back.
    pub async fn delete(state: &AppState, id: &str) -> Result<DeleteResponse, AppError> {
        let keys = &state.config.keys;
        let mut entry = state.registry.require(id).await?;
        let mut failures: Vec<AppError> = Vec::new();

        let canceled = match state.runner.cancel(id).await {
            Ok(()) => true,
            Err(RunnerError::NotFound(_)) => {
                debug!(job_id = %id, "Runner no longer knows the job, nothing to cancel");
                true
            }
            Err(e) => {
                failures.push(e.into());
                false
            }
        };

        match state.reconciler.refresh(id).await {
            Ok(current) => entry = current,
            Err(e) => failures.push(e),
        }

        let guard = state.registry.lock_source(&entry.job.source_key).await;
        let siblings: Vec<RegistryEntry> = guard
            .entries()
            .await?
            .into_iter()
            .filter(|other| other.job.id != id)
            .collect();

        let mut targets = Vec::new();
        if siblings.is_empty() {
            targets.push(keys.source_location(&entry.job.source_key));
        } else {
            debug!(job_id = %id, source_key = %entry.job.source_key, "Source kept for other jobs");
        }

        let output_key = match entry.job.output_key.clone() {
            Some(reported) => Some(reported),
            // A canceled job may have left a partial rendition under the
            // planned name; it is only ours when no other job shares it.
            None if siblings.is_empty() => {
                let template = state.config.job_template();
                Some(keys.output_name(
                    &entry.job.source_key,
                    &template.name_modifier,
                    &template.output_extension,
                ))
            }
            None => None,
        };
        if let Some(output_key) = output_key {
            let shared = siblings.iter().any(|other| {
                other.is_active() || other.job.output_key.as_deref() == Some(output_key.as_str())
            });
            if shared {
                debug!(job_id = %id, %output_key, "Output kept for other jobs");
            } else {
                targets.push(keys.output_location(&output_key));
            }
        }

        let mut deleted = Vec::new();
        for key in targets {
            match state.store.delete(&key).await {
                Ok(()) => deleted.push(key),
                Err(e) => failures.push(e.into()),
            }
        }

        let mut purged = false;
        if entry.is_active() {
            failures.push(AppError::Conflict(format!(
                "job {} is still {}",
                id, entry.job.status
            )));
        } else {
            match guard.remove(id).await {
                Ok(_) => purged = true,
                Err(e) => failures.push(e),
            }
        }
        drop(guard);

        if failures.is_empty() {
            info!(job_id = %id, "Media deleted");
            return Ok(DeleteResponse {
                job_id: id.to_string(),
                status: entry.job.status,
                canceled,
                deleted,
            });
        }

        if !canceled && deleted.is_empty() && !purged {
            return Err(failures.remove(0));
        }

        let detail = failures
            .iter()
            .map(|e| e.to_string())
            .collect::<Vec<_>>()
            .join("; ");
        warn!(job_id = %id, %detail, "Media only partially deleted");
        Err(AppError::PartialFailure {
            job_id: id.to_string(),
            canceled,
            deleted,
            detail,
        })
    }
}
