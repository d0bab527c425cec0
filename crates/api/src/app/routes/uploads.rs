use std::sync::Arc;

use axum::{
    extract::{Extension, Multipart, Path},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use bytes::Bytes;

use settlekit_core::{FileRole, Platform, UploadId};

use crate::app::{dto, errors};
use crate::app::services::AppServices;
use crate::context::TenantContext;

struct FilePart {
    role: FileRole,
    filename: String,
    content: Bytes,
}

/// Multipart form: `platform`, `settlement`, and `orders` where the
/// platform needs it (accepted and registered for any platform).
pub async fn upload_files(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    mut multipart: Multipart,
) -> axum::response::Response {
    let mut platform: Option<String> = None;
    let mut parts: Vec<FilePart> = Vec::new();

    loop {
        let field = match multipart.next_field().await {
            Ok(Some(field)) => field,
            Ok(None) => break,
            Err(e) => return errors::json_error(StatusCode::BAD_REQUEST, "invalid_params", e.to_string()),
        };
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "platform" => match field.text().await {
                Ok(text) => platform = Some(text),
                Err(e) => return errors::json_error(StatusCode::BAD_REQUEST, "invalid_params", e.to_string()),
            },
            "settlement" | "orders" => {
                let role = if name == "settlement" {
                    FileRole::Settlement
                } else {
                    FileRole::Orders
                };
                let filename = field
                    .file_name()
                    .map(str::to_string)
                    .unwrap_or_else(|| format!("{role}-{}", chrono::Utc::now().timestamp_millis()));
                match field.bytes().await {
                    Ok(content) => parts.push(FilePart { role, filename, content }),
                    Err(e) => {
                        return errors::json_error(StatusCode::BAD_REQUEST, "invalid_params", e.to_string());
                    }
                }
            }
            _ => {}
        }
    }

    let platform = match platform.as_deref().map(str::parse::<Platform>) {
        Some(Ok(p)) => p,
        Some(Err(e)) => return errors::json_error(StatusCode::BAD_REQUEST, "invalid_params", e.to_string()),
        None => return errors::json_error(StatusCode::BAD_REQUEST, "invalid_params", "platform is required"),
    };

    let mut required = vec![FileRole::Settlement];
    if platform.requires_orders() {
        required.push(FileRole::Orders);
    }
    for role in required {
        if !parts.iter().any(|p| p.role == role) {
            return errors::json_error(
                StatusCode::BAD_REQUEST,
                "invalid_params",
                format!("{platform} requires a {role} file"),
            );
        }
    }

    let mut files = Vec::with_capacity(parts.len());
    for part in parts {
        match services
            .registry
            .register(tenant.tenant_id(), platform, part.role, part.content, &part.filename)
            .await
        {
            Ok(reg) => files.push(dto::UploadedFile::from_record(reg.record, reg.reused)),
            Err(e) => return errors::registry_error_to_response(e),
        }
    }

    (
        StatusCode::CREATED,
        Json(serde_json::json!({
            "platform": platform,
            "files": files,
        })),
    )
        .into_response()
}

pub async fn get_upload(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let upload_id: UploadId = match id.parse() {
        Ok(id) => id,
        Err(_) => return errors::json_error(StatusCode::BAD_REQUEST, "invalid_params", "invalid upload id"),
    };

    let record = match services.registry.lookup(tenant.tenant_id(), upload_id).await {
        Ok(r) => r,
        Err(e) => return errors::registry_error_to_response(e),
    };
    let stored = match services.registry.storage_key_resolves(&record).await {
        Ok(found) => found,
        Err(e) => return errors::registry_error_to_response(e),
    };

    Json(serde_json::json!({
        "upload": record,
        "content_available": stored,
    }))
    .into_response()
}
