use std::sync::Arc;

use axum::{
    Json, Router,
    body::Bytes,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post, put},
};
use chrono::Utc;
use tracing::{info, warn};
use uuid::Uuid;

use super::projects::{run_pipeline, upload_response};
use crate::auth::RequireTenant;
use crate::error::Error;
use crate::pipeline::UploadRequest;
use crate::server::AppState;
use crate::server::dto::{CreateUploadSessionRequest, UploadSessionResponse};
use crate::server::response::{ApiError, ApiResponse, ErrorDetail, StoreOptionExt, StoreResultExt};
use crate::types::UploadSession;
use crate::validation::validate_slug;

const MAX_CHUNKS: u32 = 10_000;

pub fn upload_router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/uploads", post(create_session))
        .route("/uploads/{id}", get(get_session).delete(cancel_session))
        .route("/uploads/{id}/chunks/{index}", put(put_chunk))
        .route("/uploads/{id}/finalize", post(finalize_session))
}

fn load_session(state: &AppState, auth: &RequireTenant, id: &str) -> Result<UploadSession, ApiError> {
    if Uuid::parse_str(id).is_err() {
        return Err(ApiError::not_found("Upload session not found"));
    }
    state
        .store
        .get_upload_session(id)
        .api_err("Failed to get upload session")?
        .filter(|s| s.tenant_id == auth.tenant.id)
        .or_not_found("Upload session not found")
}

fn chunk_error(e: Error) -> ApiError {
    match e {
        Error::Validation(msg) => ApiError::bad_request(msg),
        other => {
            tracing::error!("Chunk storage failed: {other}");
            ApiError::internal("Failed to store upload chunk")
        }
    }
}

async fn create_session(
    auth: RequireTenant,
    State(state): State<Arc<AppState>>,
    Json(req): Json<CreateUploadSessionRequest>,
) -> impl IntoResponse {
    validate_slug(&req.slug).map_err(ApiError::bad_request)?;
    if req.filename.trim().is_empty() {
        return Err(ApiError::bad_request("Filename is required"));
    }
    if req.total_chunks == 0 || req.total_chunks > MAX_CHUNKS {
        return Err(ApiError::bad_request(format!(
            "total_chunks must be between 1 and {MAX_CHUNKS}"
        )));
    }

    let session = UploadSession {
        id: Uuid::new_v4().to_string(),
        tenant_id: auth.tenant.id.clone(),
        slug: req.slug,
        filename: req.filename.trim().to_string(),
        total_chunks: req.total_chunks,
        display_name: req.display_name,
        description: req.description,
        created_at: Utc::now(),
    };
    state
        .store
        .create_upload_session(&session)
        .api_err("Failed to create upload session")?;
    info!(
        tenant = %auth.tenant.name,
        slug = %session.slug,
        session = %session.id,
        chunks = session.total_chunks,
        "Upload session created"
    );

    Ok::<_, ApiError>((
        StatusCode::CREATED,
        Json(ApiResponse::success(UploadSessionResponse {
            session,
            received_chunks: Vec::new(),
        })),
    ))
}

async fn get_session(
    auth: RequireTenant,
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    let session = load_session(&state, &auth, &id)?;
    let received_chunks = state.chunks.received(&id).await.map_err(chunk_error)?;

    Ok::<_, ApiError>(Json(ApiResponse::success(UploadSessionResponse {
        session,
        received_chunks,
    })))
}

/// PUT /uploads/{id}/chunks/{index} - raw chunk bytes; re-sending an index replaces it
async fn put_chunk(
    auth: RequireTenant,
    State(state): State<Arc<AppState>>,
    Path((id, index)): Path<(String, u32)>,
    body: Bytes,
) -> impl IntoResponse {
    let session = load_session(&state, &auth, &id)?;
    if index >= session.total_chunks {
        return Err(ApiError::bad_request(format!(
            "Chunk index {index} is out of range (total {})",
            session.total_chunks
        )));
    }
    if body.len() as u64 > state.settings.max_upload_bytes {
        return Err(ApiError::payload_too_large("Chunk exceeds the upload limit"));
    }

    state
        .chunks
        .write_chunk(&id, index, &body)
        .await
        .map_err(chunk_error)?;

    Ok::<_, ApiError>(StatusCode::NO_CONTENT)
}

/// POST /uploads/{id}/finalize - reassembles the chunks and runs the upload pipeline
async fn finalize_session(
    auth: RequireTenant,
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let session = load_session(&state, &auth, &id)?;

    let tmp_dir = state.data_dir.join("tmp");
    tokio::fs::create_dir_all(&tmp_dir)
        .await
        .map_err(|_| ApiError::internal("Failed to prepare upload"))?;
    let archive = tempfile::Builder::new()
        .prefix("assembled-")
        .suffix(".zip")
        .tempfile_in(&tmp_dir)
        .map_err(|_| ApiError::internal("Failed to prepare upload"))?;

    let size = state
        .chunks
        .assemble(
            &id,
            session.total_chunks,
            archive.path(),
            state.settings.max_upload_bytes,
        )
        .await
        .map_err(|e| match e {
            Error::Validation(msg) if msg.contains("exceeds") => ApiError::payload_too_large(msg),
            other => chunk_error(other),
        })?;
    info!(session = %id, bytes = size, "Upload reassembled");

    let request = UploadRequest {
        tenant: auth.tenant.clone(),
        slug: session.slug.clone(),
        display_name: session.display_name.clone(),
        description: session.description.clone(),
        archive_path: archive.path().to_path_buf(),
    };
    let outcome = run_pipeline(&state, request, ErrorDetail::for_caller(auth.is_admin())).await;
    drop(archive);

    // The chunks are consumed either way; a rejected archive is re-sent in full.
    discard_session(&state, &id).await;

    Ok(upload_response(outcome?))
}

async fn cancel_session(
    auth: RequireTenant,
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    load_session(&state, &auth, &id)?;
    discard_session(&state, &id).await;
    Ok::<_, ApiError>(StatusCode::NO_CONTENT)
}

async fn discard_session(state: &AppState, id: &str) {
    if let Err(e) = state.chunks.cancel(id).await {
        warn!(session = id, "Failed to remove upload chunks: {e}");
    }
    if let Err(e) = state.store.delete_upload_session(id) {
        warn!(session = id, "Failed to delete upload session: {e}");
    }
}
