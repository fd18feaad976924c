use utoipa::OpenApi;

use crate::common::error::ErrorDetail;
use crate::modules::jobs::model::{Anomaly, Job, JobStatus};
use crate::modules::jobs::reconciler::{EntrySummary, ObjectClass, ObjectSummary, ReconciliationReport};
use crate::modules::media::dto::*;

#[derive(OpenApi)]
#[openapi(
    paths(
        crate::modules::media::handler::upload_media,
        crate::modules::media::handler::list_media,
        crate::modules::media::handler::get_media,
        crate::modules::media::handler::download_url,
        crate::modules::media::handler::download_media,
        crate::modules::media::handler::delete_media,
        crate::modules::jobs::handler::list_jobs,
        crate::modules::jobs::handler::reconcile,
    ),
    components(
        schemas(
            UploadResponse, MediaItem, MediaItemStatus, MediaResponse,
            DownloadUrlResponse, DeleteResponse,
            Job, JobStatus, Anomaly, ErrorDetail,
            ReconciliationReport, EntrySummary, ObjectSummary, ObjectClass,
        )
    ),
    tags(
        (name = "Media", description = "Uploads, downloads and their transcode jobs"),
        (name = "Jobs", description = "Runner listing and reconciliation")
    )
)]
pub struct ApiDoc;
