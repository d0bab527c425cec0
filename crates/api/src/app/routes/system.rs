use std::sync::Arc;

use axum::{extract::Extension, response::IntoResponse, Json};

use crate::app::services::AppServices;

pub async fn health(Extension(services): Extension<Arc<AppServices>>) -> impl IntoResponse {
    let queue_depth = services.queue.len().await.ok();
    Json(serde_json::json!({
        "status": "ok",
        "queue_depth": queue_depth,
        "worker": services.worker_stats(),
    }))
}
