//! HTTP handlers for the multipart upload pipeline: session init,
//! completion, and the part relay.

use crate::errors::AppError;
use crate::models::file::FileKind;
use crate::models::upload::{
    CompleteUploadRequest, CompleteUploadResponse, InitUploadRequest, InitUploadResponse,
};
use crate::models::user::Actor;
use crate::services::policy::{self, Operation};
use crate::services::relay_service::RelayOutcome;
use crate::state::AppState;
use axum::{
    Json,
    body::Bytes,
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;

/// POST `/projects/{project_id}/assets/uploads`
pub async fn init_asset_upload(
    State(state): State<AppState>,
    actor: Actor,
    Path(project_id): Path<Uuid>,
    Json(req): Json<InitUploadRequest>,
) -> Result<Json<InitUploadResponse>, AppError> {
    policy::require_project_access(&state.db, &actor, project_id, Operation::InitAssetUpload)
        .await?;
    let plan = state
        .uploads
        .init(&actor, project_id, FileKind::Asset, &req)
        .await?;
    Ok(Json(plan))
}

/// POST `/projects/{project_id}/deliveries/uploads`
pub async fn init_delivery_upload(
    State(state): State<AppState>,
    actor: Actor,
    Path(project_id): Path<Uuid>,
    Json(req): Json<InitUploadRequest>,
) -> Result<Json<InitUploadResponse>, AppError> {
    policy::require_project_access(&state.db, &actor, project_id, Operation::InitDeliveryUpload)
        .await?;
    let plan = state
        .uploads
        .init(&actor, project_id, FileKind::Delivery, &req)
        .await?;
    Ok(Json(plan))
}

/// POST `/projects/{project_id}/assets/uploads/complete`
pub async fn complete_asset_upload(
    State(state): State<AppState>,
    actor: Actor,
    Path(project_id): Path<Uuid>,
    Json(req): Json<CompleteUploadRequest>,
) -> Result<Json<CompleteUploadResponse>, AppError> {
    policy::require_project_access(&state.db, &actor, project_id, Operation::CompleteAssetUpload)
        .await?;
    let done = state
        .uploads
        .complete(&actor, project_id, FileKind::Asset, &req)
        .await?;
    Ok(Json(done))
}

/// POST `/projects/{project_id}/deliveries/uploads/complete`
pub async fn complete_delivery_upload(
    State(state): State<AppState>,
    actor: Actor,
    Path(project_id): Path<Uuid>,
    Json(req): Json<CompleteUploadRequest>,
) -> Result<Json<CompleteUploadResponse>, AppError> {
    policy::require_project_access(
        &state.db,
        &actor,
        project_id,
        Operation::CompleteDeliveryUpload,
    )
    .await?;
    let done = state
        .uploads
        .complete(&actor, project_id, FileKind::Delivery, &req)
        .await?;
    Ok(Json(done))
}

/// Query params for the relay: the encoded presigned target URL.
#[derive(Debug, Deserialize)]
pub struct RelayQuery {
    pub url: String,
}

/// PUT `/upload-relay?url=...` — forward one raw part body upstream.
///
/// Authenticated but not project-scoped: the presigned URL itself is the
/// authorization to touch the key. Success answers `{etag}`; upstream
/// rejections are passed through with their original status and body.
pub async fn relay_part(
    State(state): State<AppState>,
    _actor: Actor,
    Query(query): Query<RelayQuery>,
    body: Bytes,
) -> Result<Response, AppError> {
    match state.relay.forward(&query.url, body).await? {
        RelayOutcome::Success { etag } => {
            Ok((StatusCode::OK, Json(json!({ "etag": etag }))).into_response())
        }
        RelayOutcome::Upstream { status, body } => {
            let status =
                StatusCode::from_u16(status).unwrap_or(StatusCode::BAD_GATEWAY);
            Ok((status, body).into_response())
        }
    }
}
