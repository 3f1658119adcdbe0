//! Single-shot object endpoints: one storage call each.

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;
use axum::Json;
use axum::body::Body;
use axum::extract::{Multipart, Query, State};
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use chunkyard_core::{validate_bucket_name, validate_object_name};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use time::OffsetDateTime;
use time::macros::format_description;
use uuid::Uuid;

/// Longest lifetime accepted for a presigned URL (7 days, the S3 limit).
const MAX_PRESIGN_SECS: u64 = 7 * 24 * 60 * 60;

/// Stored object location.
#[derive(Debug, Serialize, Deserialize)]
pub struct ObjectLocation {
    pub bucket: String,
    pub object: String,
}

#[derive(Debug, Deserialize)]
pub struct UploadQuery {
    #[serde(default)]
    pub rename: bool,
    pub bucket: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileQuery {
    pub bucket: Option<String>,
    pub file_name: String,
}

#[derive(Debug, Deserialize)]
pub struct BucketQuery {
    pub bucket: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectQuery {
    pub bucket: Option<String>,
    pub object_name: String,
    /// Presigned URL lifetime in seconds.
    pub expires: Option<u64>,
}

/// Object metadata response.
#[derive(Debug, Serialize, Deserialize)]
pub struct ObjectStat {
    pub bucket: String,
    pub object: String,
    pub size: u64,
    #[serde(with = "time::serde::rfc3339::option")]
    pub last_modified: Option<OffsetDateTime>,
    pub content_type: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PresignedResponse {
    pub url: String,
}

/// Key for an uploaded file: `<YYYY-MM-DD>/<name>`, or a random name that
/// keeps the extension when `rename` is set.
pub fn dated_object_name(file_name: &str, rename: bool, now: OffsetDateTime) -> ApiResult<String> {
    let date = now
        .format(format_description!("[year]-[month]-[day]"))
        .map_err(|e| ApiError::Internal(format!("failed to format date: {e}")))?;

    // Browsers may send a full client path.
    let base = file_name
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or_default()
        .trim();
    if base.is_empty() {
        return Err(ApiError::BadRequest("uploaded file has no name".to_string()));
    }

    let name = if rename {
        let id = Uuid::new_v4().simple();
        match base.rsplit_once('.') {
            Some((stem, ext)) if !stem.is_empty() && !ext.is_empty() => format!("{id}.{ext}"),
            _ => id.to_string(),
        }
    } else {
        base.to_string()
    };

    let key = format!("{date}/{name}");
    validate_object_name(&key)?;
    Ok(key)
}

/// POST /objects - Upload a whole file in one request.
#[tracing::instrument(skip(state, multipart))]
pub async fn upload_object(
    State(state): State<AppState>,
    Query(query): Query<UploadQuery>,
    mut multipart: Multipart,
) -> ApiResult<(StatusCode, Json<ObjectLocation>)> {
    let bucket = state.object_bucket(query.bucket.as_deref())?;
    validate_bucket_name(&bucket)?;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::BadRequest(format!("invalid multipart body: {e}")))?
    {
        if field.name() != Some(chunkyard_core::wire::fields::FILE) {
            continue;
        }
        let file_name = field.file_name().unwrap_or_default().to_string();
        let object = dated_object_name(&file_name, query.rename, OffsetDateTime::now_utc())?;
        let data = field
            .bytes()
            .await
            .map_err(|e| ApiError::BadRequest(format!("failed to read file: {e}")))?;

        state.storage.ensure_bucket(&bucket).await?;
        state.storage.put(&bucket, &object, data).await?;
        tracing::info!(bucket = %bucket, object = %object, "Object uploaded");
        return Ok((StatusCode::CREATED, Json(ObjectLocation { bucket, object })));
    }

    Err(ApiError::BadRequest("missing form field file".to_string()))
}

/// GET /objects/download - Stream an object as an attachment.
#[tracing::instrument(skip(state))]
pub async fn download_object(
    State(state): State<AppState>,
    Query(query): Query<FileQuery>,
) -> ApiResult<Response> {
    let bucket = state.object_bucket(query.bucket.as_deref())?;
    let stream = state.storage.get_stream(&bucket, &query.file_name).await?;

    let download_name = query
        .file_name
        .rsplit('/')
        .next()
        .unwrap_or(&query.file_name)
        .replace('"', "");
    Ok((
        [
            (header::CONTENT_TYPE, "application/octet-stream".to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{download_name}\""),
            ),
        ],
        Body::from_stream(stream),
    )
        .into_response())
}

/// GET /objects - List every key in a bucket.
#[tracing::instrument(skip(state))]
pub async fn list_objects(
    State(state): State<AppState>,
    Query(query): Query<BucketQuery>,
) -> ApiResult<Json<Vec<String>>> {
    let bucket = state.object_bucket(query.bucket.as_deref())?;
    Ok(Json(state.storage.list(&bucket, "").await?))
}

/// DELETE /objects - Delete one object.
#[tracing::instrument(skip(state))]
pub async fn delete_object(
    State(state): State<AppState>,
    Query(query): Query<FileQuery>,
) -> ApiResult<StatusCode> {
    let bucket = state.object_bucket(query.bucket.as_deref())?;
    state.storage.delete(&bucket, &query.file_name).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// GET /objects/stat - Object metadata.
#[tracing::instrument(skip(state))]
pub async fn stat_object(
    State(state): State<AppState>,
    Query(query): Query<ObjectQuery>,
) -> ApiResult<Json<ObjectStat>> {
    let bucket = state.object_bucket(query.bucket.as_deref())?;
    let meta = state.storage.head(&bucket, &query.object_name).await?;
    Ok(Json(ObjectStat {
        bucket,
        object: query.object_name,
        size: meta.size,
        last_modified: meta.last_modified,
        content_type: meta.content_type,
    }))
}

/// GET /objects/presigned - Time-limited download URL.
#[tracing::instrument(skip(state))]
pub async fn presigned_url(
    State(state): State<AppState>,
    Query(query): Query<ObjectQuery>,
) -> ApiResult<Json<PresignedResponse>> {
    let bucket = state.object_bucket(query.bucket.as_deref())?;
    let expires = query.expires.unwrap_or(3600);
    if expires == 0 || expires > MAX_PRESIGN_SECS {
        return Err(ApiError::BadRequest(format!(
            "expires must be between 1 and {MAX_PRESIGN_SECS} seconds"
        )));
    }
    let url = state
        .storage
        .presigned_get_url(&bucket, &query.object_name, Duration::from_secs(expires))
        .await?;
    Ok(Json(PresignedResponse { url }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    const NOW: OffsetDateTime = datetime!(2024-03-09 12:00 UTC);

    #[test]
    fn dated_name_keeps_original() {
        assert_eq!(
            dated_object_name("report.pdf", false, NOW).unwrap(),
            "2024-03-09/report.pdf"
        );
        assert_eq!(
            dated_object_name("C:\\Users\\me\\report.pdf", false, NOW).unwrap(),
            "2024-03-09/report.pdf"
        );
    }

    #[test]
    fn dated_name_renamed_keeps_extension() {
        let name = dated_object_name("photo.JPG", true, NOW).unwrap();
        let (dir, file) = name.split_once('/').unwrap();
        assert_eq!(dir, "2024-03-09");
        let (stem, ext) = file.split_once('.').unwrap();
        assert_eq!(stem.len(), 32);
        assert_eq!(ext, "JPG");

        let bare = dated_object_name("README", true, NOW).unwrap();
        assert!(!bare.contains('.'));
    }

    #[test]
    fn dated_name_rejects_empty() {
        assert!(dated_object_name("", false, NOW).is_err());
        assert!(dated_object_name("dir/", false, NOW).is_err());
        assert!(dated_object_name("..", false, NOW).is_err());
    }
}
