use axum::{
    routing::{get, post},
    Router,
};

pub mod clear;
pub mod filters;
pub mod jobs;
pub mod preview;
pub mod process;
pub mod system;
pub mod uploads;

/// Router for all tenant-scoped endpoints.
pub fn router() -> Router {
    Router::new()
        .route("/uploads", post(uploads::upload_files))
        .route("/uploads/:id", get(uploads::get_upload))
        .route("/process", post(process::submit))
        .route("/jobs", get(jobs::list_jobs))
        .route("/jobs/:id", get(jobs::get_job))
        .route("/jobs/:id/requeue", post(jobs::requeue_job))
        .route("/preview", get(preview::preview))
        .route("/filters", get(filters::list_filters))
        .route("/clear-settlement", post(clear::clear_settlement))
}
