use axum::Router;
use axum::routing::{get, post};

use crate::state::AppState;

pub mod dto;
pub mod handler;
pub mod model;
pub mod orchestrator;
pub mod reconciler;
pub mod registry;
pub mod repository;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/jobs", get(handler::list_jobs))
        .route("/reconcile", post(handler::reconcile))
}
