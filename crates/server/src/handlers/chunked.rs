//! Chunked upload endpoint.

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;
use axum::extract::{Multipart, State};
use bytes::Bytes;
use chunkyard_core::wire::{self, fields};
use chunkyard_upload::ChunkSubmission;

/// Form fields of one chunk request, before validation.
#[derive(Default)]
struct ChunkForm {
    file: Option<Bytes>,
    slice_index: Option<i64>,
    total_pieces: Option<i64>,
    file_name: Option<String>,
    fingerprint: Option<String>,
    bucket: Option<String>,
}

impl ChunkForm {
    async fn read(mut multipart: Multipart) -> ApiResult<Self> {
        let mut form = Self::default();
        while let Some(field) = multipart
            .next_field()
            .await
            .map_err(|e| ApiError::BadRequest(format!("invalid multipart body: {e}")))?
        {
            let Some(name) = field.name().map(str::to_string) else {
                continue;
            };
            let read_err = |e: axum::extract::multipart::MultipartError| {
                ApiError::BadRequest(format!("failed to read field {name}: {e}"))
            };
            match name.as_str() {
                fields::FILE => form.file = Some(field.bytes().await.map_err(read_err)?),
                fields::SLICE_INDEX => {
                    form.slice_index = Some(parse_int(&name, &field.text().await.map_err(read_err)?)?)
                }
                fields::TOTAL_PIECES => {
                    form.total_pieces = Some(parse_int(&name, &field.text().await.map_err(read_err)?)?)
                }
                fields::FILE_NAME => form.file_name = Some(field.text().await.map_err(read_err)?),
                fields::FINGERPRINT => form.fingerprint = Some(field.text().await.map_err(read_err)?),
                fields::BUCKET => form.bucket = Some(field.text().await.map_err(read_err)?),
                _ => tracing::debug!(field = %name, "Ignoring unknown form field"),
            }
        }
        Ok(form)
    }

    fn into_submission(self) -> ApiResult<ChunkSubmission> {
        Ok(ChunkSubmission {
            bytes: required(self.file, fields::FILE)?,
            index: required(self.slice_index, fields::SLICE_INDEX)?,
            total_chunks: required(self.total_pieces, fields::TOTAL_PIECES)?,
            object: required(self.file_name, fields::FILE_NAME)?,
            fingerprint: required(self.fingerprint, fields::FINGERPRINT)?,
            bucket: self.bucket,
        })
    }
}

fn required<T>(value: Option<T>, field: &str) -> ApiResult<T> {
    value.ok_or_else(|| ApiError::BadRequest(format!("missing form field {field}")))
}

fn parse_int(field: &str, value: &str) -> ApiResult<i64> {
    value
        .trim()
        .parse()
        .map_err(|_| ApiError::BadRequest(format!("form field {field} is not an integer: {value:?}")))
}

/// POST /objects/chunked - Submit one chunk of a resumable upload.
///
/// Answers with the next index to send, `-1` once the object is merged and
/// verified, or `-2` when verification failed.
#[tracing::instrument(skip(state, multipart))]
pub async fn upload_chunk(
    State(state): State<AppState>,
    multipart: Multipart,
) -> ApiResult<String> {
    let submission = ChunkForm::read(multipart).await?.into_submission()?;
    tracing::debug!(
        fingerprint = %submission.fingerprint,
        index = submission.index,
        total = submission.total_chunks,
        "Chunk received"
    );
    let outcome = state.coordinator.accept_chunk(submission).await?;
    Ok(wire::encode_outcome(outcome))
}
