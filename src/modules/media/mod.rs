use axum::Router;
use axum::routing::get;

use crate::state::AppState;

pub mod dto;
pub mod handler;
pub mod service;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(handler::list_media).post(handler::upload_media))
        .route("/{id}", get(handler::get_media).delete(handler::delete_media))
        .route("/{id}/download-url", get(handler::download_url))
        .route("/{id}/download", get(handler::download_media))
}
