use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::header::CONTENT_TYPE;
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;

use crate::commands::auth::Caller;
use crate::engine::blob::StoredBlob;
use crate::error::AppError;
use crate::validation;
use crate::AppState;

const FILENAME_HEADER: &str = "x-filename";

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok()).map(str::trim)
}

/// `PUT /api/blobs`. Raw body; name and type come from headers.
pub async fn upload(
    State(state): State<Arc<AppState>>,
    Caller(caller): Caller,
    headers: HeaderMap,
    body: Bytes,
) -> Result<(StatusCode, Json<StoredBlob>), AppError> {
    let filename = header_str(&headers, FILENAME_HEADER).unwrap_or_default();
    validation::require_non_empty("x-filename", filename)?;
    let mime_type = header_str(&headers, CONTENT_TYPE.as_str()).unwrap_or("application/octet-stream");
    validation::require_mime_type("content-type", mime_type)?;
    if body.is_empty() {
        return Err(AppError::Validation("upload body is empty".into()));
    }

    let stored = state.blobs.put(body.to_vec(), filename, mime_type).await?;
    tracing::info!(
        locator = %stored.locator,
        size_bytes = stored.size_bytes,
        uploader = %caller.principal_id,
        "Blob uploaded",
    );
    Ok((StatusCode::CREATED, Json(stored)))
}

pub async fn download(
    State(state): State<Arc<AppState>>,
    Caller(_caller): Caller,
    Path(locator): Path<String>,
) -> Result<Response, AppError> {
    let blob = state.blobs.get(&locator).await?;
    let mut headers = HeaderMap::new();
    let mime_type = blob.mime_type.as_deref().unwrap_or("application/octet-stream");
    if let Ok(value) = HeaderValue::from_str(mime_type) {
        headers.insert(CONTENT_TYPE, value);
    }
    if let Some(value) = blob.filename.as_deref().and_then(|f| HeaderValue::from_str(f).ok()) {
        headers.insert(FILENAME_HEADER, value);
    }
    Ok((headers, blob.bytes).into_response())
}
