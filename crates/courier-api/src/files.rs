use axum::{
    Extension, Json,
    body::{Body, Bytes},
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode, header},
    response::IntoResponse,
};
use tokio_util::io::ReaderStream;
use tracing::info;

use courier_storage::validate_key;
use courier_types::api::{DownloadUrlResponse, PresignedQuery, UploadQuery, UploadResponse};
use courier_types::models::User;

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

/// POST /files: raw body upload. The `Content-Type` header is recorded with
/// the object; `?filename=` becomes part of the key.
pub async fn upload_file(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    Query(query): Query<UploadQuery>,
    headers: HeaderMap,
    bytes: Bytes,
) -> ApiResult<impl IntoResponse> {
    if bytes.is_empty() {
        return Err(ApiError::BadRequest("Empty upload".into()));
    }
    if bytes.len() > state.max_upload_bytes {
        return Err(ApiError::PayloadTooLarge);
    }

    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();

    let key = state
        .store
        .put_object(&bytes, content_type, query.filename.as_deref())
        .await?;

    info!("User {} uploaded {} ({} bytes)", user.user_name, key, bytes.len());
    Ok((
        StatusCode::CREATED,
        Json(UploadResponse {
            key,
            size: bytes.len() as u64,
        }),
    ))
}

/// GET /download/{key}: hand out a time-limited URL for an attachment.
pub async fn get_download_url(
    State(state): State<AppState>,
    Path(key): Path<String>,
    Extension(_user): Extension<User>,
) -> ApiResult<Json<DownloadUrlResponse>> {
    validate_key(&key)?;
    let download_url = state.store.presign_download_url(&key, state.download_ttl)?;

    Ok(Json(DownloadUrlResponse {
        download_url,
        expires_in: state.download_ttl.as_secs(),
    }))
}

/// GET /files/{key}?expires=..&signature=..: the target of a presigned URL.
/// Authorised by the signature alone.
pub async fn serve_file(
    State(state): State<AppState>,
    Path(key): Path<String>,
    Query(query): Query<PresignedQuery>,
) -> ApiResult<impl IntoResponse> {
    state
        .store
        .verify_download(&key, query.expires, &query.signature, chrono::Utc::now().timestamp())?;

    let object = state
        .store
        .open_object(&key)
        .await?
        .ok_or_else(|| ApiError::NotFound("File not found".into()))?;

    let body = Body::from_stream(ReaderStream::new(object.file));
    Ok((
        [
            (header::CONTENT_TYPE, object.content_type),
            (header::CONTENT_LENGTH, object.size.to_string()),
        ],
        body,
    ))
}
