//! HTTP handlers for the folder tree.
//!
//! Every mutation resolves the owning project and runs the authorization
//! guard before touching the tree; type constraints and cycle prevention
//! live in `FolderService`.

use crate::errors::AppError;
use crate::models::folder::{Folder, FolderType};
use crate::models::user::Actor;
use crate::services::folder_service::FolderNode;
use crate::services::policy::{self, Operation};
use crate::state::AppState;
use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use serde::{Deserialize, Deserializer};
use uuid::Uuid;

/// Body for `POST /projects/{id}/folders`. `type` defaults to PROJECT; the
/// system types are rejected regardless of who asks.
#[derive(Debug, Deserialize)]
pub struct CreateFolderRequest {
    pub name: String,
    #[serde(rename = "type", default)]
    pub folder_type: Option<FolderType>,
    #[serde(rename = "parentId", default)]
    pub parent_id: Option<Uuid>,
}

/// Body for `PATCH /folders/{id}`. `parentId: null` moves the folder to the
/// project root; an absent `parentId` leaves it in place.
#[derive(Debug, Deserialize)]
pub struct UpdateFolderRequest {
    pub name: Option<String>,
    #[serde(rename = "parentId", default, deserialize_with = "double_option")]
    pub parent_id: Option<Option<Uuid>>,
}

fn double_option<'de, D>(deserializer: D) -> Result<Option<Option<Uuid>>, D::Error>
where
    D: Deserializer<'de>,
{
    Option::<Uuid>::deserialize(deserializer).map(Some)
}

/// GET `/projects/{project_id}/folders` — the forest with badge counts.
pub async fn list_folders(
    State(state): State<AppState>,
    actor: Actor,
    Path(project_id): Path<Uuid>,
) -> Result<Json<Vec<FolderNode>>, AppError> {
    policy::require_project_access(&state.db, &actor, project_id, Operation::ListFolders).await?;
    Ok(Json(state.folders.list_with_counts(project_id).await?))
}

/// POST `/projects/{project_id}/folders` — create a user folder.
pub async fn create_folder(
    State(state): State<AppState>,
    actor: Actor,
    Path(project_id): Path<Uuid>,
    Json(req): Json<CreateFolderRequest>,
) -> Result<(StatusCode, Json<Folder>), AppError> {
    policy::require_project_access(&state.db, &actor, project_id, Operation::CreateFolder).await?;
    let folder = state
        .folders
        .create(
            project_id,
            &req.name,
            req.folder_type.unwrap_or(FolderType::Project),
            req.parent_id,
        )
        .await?;
    Ok((StatusCode::CREATED, Json(folder)))
}

/// PATCH `/folders/{folder_id}` — rename and/or reparent.
pub async fn update_folder(
    State(state): State<AppState>,
    actor: Actor,
    Path(folder_id): Path<Uuid>,
    Json(req): Json<UpdateFolderRequest>,
) -> Result<Json<Folder>, AppError> {
    let folder = state.folders.fetch_folder(folder_id).await?;
    policy::require_project_access(&state.db, &actor, folder.project_id, Operation::UpdateFolder)
        .await?;

    if req.name.is_none() && req.parent_id.is_none() {
        return Err(AppError::Validation(
            "nothing to update: provide name and/or parentId".into(),
        ));
    }

    let updated = state
        .folders
        .update(folder_id, req.name.as_deref(), req.parent_id)
        .await?;
    Ok(Json(updated))
}

/// DELETE `/folders/{folder_id}` — remove the folder, detaching children.
pub async fn delete_folder(
    State(state): State<AppState>,
    actor: Actor,
    Path(folder_id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    let folder = state.folders.fetch_folder(folder_id).await?;
    policy::require_project_access(&state.db, &actor, folder.project_id, Operation::DeleteFolder)
        .await?;
    state.folders.delete(folder_id).await?;
    Ok(StatusCode::NO_CONTENT)
}
