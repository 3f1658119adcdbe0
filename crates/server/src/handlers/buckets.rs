//! Bucket management endpoints.

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;
use axum::Json;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use chunkyard_core::validate_bucket_name;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

#[derive(Debug, Deserialize)]
pub struct BucketParam {
    pub bucket: String,
}

/// One entry of `GET /buckets`.
#[derive(Debug, Serialize, Deserialize)]
pub struct BucketEntry {
    pub name: String,
    #[serde(with = "time::serde::rfc3339::option")]
    pub created: Option<OffsetDateTime>,
}

/// GET /buckets - List buckets.
#[tracing::instrument(skip(state))]
pub async fn list_buckets(State(state): State<AppState>) -> ApiResult<Json<Vec<BucketEntry>>> {
    let buckets = state
        .storage
        .list_buckets()
        .await?
        .into_iter()
        .map(|b| BucketEntry {
            name: b.name,
            created: b.created,
        })
        .collect();
    Ok(Json(buckets))
}

/// POST /buckets - Create a bucket if it does not exist.
#[tracing::instrument(skip(state))]
pub async fn create_bucket(
    State(state): State<AppState>,
    Query(param): Query<BucketParam>,
) -> ApiResult<StatusCode> {
    validate_bucket_name(&param.bucket)?;
    state.storage.ensure_bucket(&param.bucket).await?;
    tracing::info!(bucket = %param.bucket, "Bucket created");
    Ok(StatusCode::CREATED)
}

/// DELETE /buckets - Delete an empty bucket.
///
/// The staging bucket cannot be removed while the server runs.
#[tracing::instrument(skip(state))]
pub async fn delete_bucket(
    State(state): State<AppState>,
    Query(param): Query<BucketParam>,
) -> ApiResult<StatusCode> {
    if param.bucket == state.config.upload.staging_bucket {
        return Err(ApiError::BadRequest(format!(
            "bucket {} holds upload staging and cannot be deleted",
            param.bucket
        )));
    }
    state.storage.delete_bucket(&param.bucket).await?;
    tracing::info!(bucket = %param.bucket, "Bucket deleted");
    Ok(StatusCode::NO_CONTENT)
}
