//! HTTP handlers for stored files: presigned downloads and deletion.

use crate::errors::AppError;
use crate::models::file::FileKind;
use crate::models::user::Actor;
use crate::services::policy::{self, Operation};
use crate::state::AppState;
use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use serde_json::json;
use uuid::Uuid;

/// GET `/projects/{project_id}/files/{kind}/{file_id}/url`
pub async fn get_download_url(
    State(state): State<AppState>,
    actor: Actor,
    Path((project_id, kind, file_id)): Path<(Uuid, FileKind, Uuid)>,
) -> Result<impl IntoResponse, AppError> {
    let op = match kind {
        FileKind::Asset => Operation::ReadAsset,
        FileKind::Delivery => Operation::ReadDelivery,
    };
    policy::require_project_access(&state.db, &actor, project_id, op).await?;
    let url = state.files.download_url(project_id, kind, file_id).await?;
    Ok(Json(json!({ "url": url })))
}

/// DELETE `/projects/{project_id}/files/{kind}/{file_id}`
pub async fn delete_file(
    State(state): State<AppState>,
    actor: Actor,
    Path((project_id, kind, file_id)): Path<(Uuid, FileKind, Uuid)>,
) -> Result<impl IntoResponse, AppError> {
    let op = match kind {
        FileKind::Asset => Operation::DeleteAsset,
        FileKind::Delivery => Operation::DeleteDelivery,
    };
    policy::require_project_access(&state.db, &actor, project_id, op).await?;
    state.files.delete(project_id, kind, file_id).await?;
    Ok(StatusCode::NO_CONTENT)
}
