use axum::{
    body::Body,
    extract::{Multipart, Path, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
};

use super::dto::{DeleteResponse, DownloadUrlResponse, MediaItem, MediaResponse, UploadResponse};
use super::service::MediaService;
use crate::common::response::{ApiError, ApiResponse, ApiSuccess};
use crate::state::AppState;

/// Upload a source file and submit it for transcoding
/// The body is streamed straight into the object store
#[utoipa::path(
    post,
    path = "/api/v1/media",
    request_body(content = String, content_type = "multipart/form-data"),
    responses(
        (status = 201, description = "Upload stored and job submitted", body = ApiResponse<UploadResponse>),
        (status = 400, description = "Bad Request"),
        (status = 409, description = "Source already has an active job"),
        (status = 429, description = "Runner quota exceeded"),
        (status = 502, description = "Submission failed")
    ),
    tag = "Media"
)]
pub async fn upload_media(State(state): State<AppState>, multipart: Multipart) -> impl IntoResponse {
    match MediaService::upload(&state, multipart).await {
        Ok(job) => ApiSuccess(
            ApiResponse::success(UploadResponse::from(job), "Upload submitted for transcoding"),
            StatusCode::CREATED,
        )
        .into_response(),
        Err(e) => ApiError(e).into_response(),
    }
}

/// List registered jobs and unsubmitted uploads
#[utoipa::path(
    get,
    path = "/api/v1/media",
    responses(
        (status = 200, description = "Media items, newest first", body = ApiResponse<Vec<MediaItem>>),
        (status = 503, description = "Store unavailable")
    ),
    tag = "Media"
)]
pub async fn list_media(State(state): State<AppState>) -> impl IntoResponse {
    match MediaService::list(&state).await {
        Ok(items) => ApiSuccess(
            ApiResponse::success(items, "Media retrieved successfully"),
            StatusCode::OK,
        )
        .into_response(),
        Err(e) => ApiError(e).into_response(),
    }
}

#[utoipa::path(
    get,
    path = "/api/v1/media/{id}",
    params(
        ("id" = String, Path, description = "Job ID")
    ),
    responses(
        (status = 200, description = "Registry entry", body = ApiResponse<MediaResponse>),
        (status = 404, description = "Job not found")
    ),
    tag = "Media"
)]
pub async fn get_media(State(state): State<AppState>, Path(id): Path<String>) -> impl IntoResponse {
    match MediaService::get(&state, &id).await {
        Ok(entry) => ApiSuccess(
            ApiResponse::success(MediaResponse::from(entry), "Media retrieved successfully"),
            StatusCode::OK,
        )
        .into_response(),
        Err(e) => ApiError(e).into_response(),
    }
}

/// Time-boxed signed URL for the transcoded output
#[utoipa::path(
    get,
    path = "/api/v1/media/{id}/download-url",
    params(
        ("id" = String, Path, description = "Job ID")
    ),
    responses(
        (status = 200, description = "Signed URL", body = ApiResponse<DownloadUrlResponse>),
        (status = 404, description = "Job or output not found")
    ),
    tag = "Media"
)]
pub async fn download_url(State(state): State<AppState>, Path(id): Path<String>) -> impl IntoResponse {
    match MediaService::download_url(&state, &id).await {
        Ok(url) => ApiSuccess(
            ApiResponse::success(
                DownloadUrlResponse {
                    url,
                    expires_in_secs: state.config.download_url_ttl.as_secs(),
                },
                "Download URL generated",
            ),
            StatusCode::OK,
        )
        .into_response(),
        Err(e) => ApiError(e).into_response(),
    }
}

/// Stream the transcoded output as an attachment
#[utoipa::path(
    get,
    path = "/api/v1/media/{id}/download",
    params(
        ("id" = String, Path, description = "Job ID")
    ),
    responses(
        (status = 200, description = "Output file"),
        (status = 404, description = "Job or output not found")
    ),
    tag = "Media"
)]
pub async fn download_media(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    let (object, body) = match MediaService::download(&state, &id).await {
        Ok(found) => found,
        Err(e) => return ApiError(e).into_response(),
    };

    let file_name = object.key.rsplit('/').next().unwrap_or(&object.key).to_string();
    let content_type = mime_guess::from_path(&file_name).first_or_octet_stream();

    let headers = [
        (header::CONTENT_TYPE, content_type.to_string()),
        (header::CONTENT_LENGTH, object.size.to_string()),
        (
            header::CONTENT_DISPOSITION,
            format!("attachment; filename=\"{}\"", file_name.replace('"', "")),
        ),
    ];
    (headers, Body::from_stream(body)).into_response()
}

/// Cancel the job and remove its files and registry entry
#[utoipa::path(
    delete,
    path = "/api/v1/media/{id}",
    params(
        ("id" = String, Path, description = "Job ID")
    ),
    responses(
        (status = 200, description = "Media deleted", body = ApiResponse<DeleteResponse>),
        (status = 404, description = "Job not found"),
        (status = 502, description = "Only some steps succeeded")
    ),
    tag = "Media"
)]
pub async fn delete_media(State(state): State<AppState>, Path(id): Path<String>) -> impl IntoResponse {
    match MediaService::delete(&state, &id).await {
        Ok(deleted) => ApiSuccess(
            ApiResponse::success(deleted, "Media deleted successfully"),
            StatusCode::OK,
        )
        .into_response(),
        Err(e) => ApiError(e).into_response(),
    }
}
