use std::path::PathBuf;

use axum::{
    extract::{Path, State},
    http::header,
    response::{IntoResponse, Response},
};

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;
use crate::uploads::store;

/// Read a file from disk into a response with a content type derived from
/// its name. `download_name` switches to an attachment disposition.
pub async fn file_response(path: PathBuf, download_name: Option<&str>) -> ApiResult<Response> {
    let name = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or_default()
        .to_string();

    match tokio::fs::metadata(&path).await {
        Ok(meta) if meta.is_file() => {}
        _ => return Err(ApiError::not_found("File not found")),
    }
    let data = tokio::fs::read(&path).await?;

    let content_type = store::content_type_for(&name);
    Ok(match download_name {
        Some(download) => (
            [
                (header::CONTENT_TYPE, content_type.to_string()),
                (
                    header::CONTENT_DISPOSITION,
                    format!("attachment; filename=\"{}\"", download),
                ),
            ],
            data,
        )
            .into_response(),
        None => ([(header::CONTENT_TYPE, content_type.to_string())], data).into_response(),
    })
}

/// GET /uploads/{name}: serve a public upload (entry media, board images, avatars).
pub async fn serve_upload(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> ApiResult<Response> {
    if !store::is_safe_name(&name) {
        return Err(ApiError::not_found("File not found"));
    }
    file_response(state.upload_dir.join(name), None).await
}
