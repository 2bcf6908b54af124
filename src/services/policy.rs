//! Authorization guard and folder-type compatibility rules.
//!
//! Every mutating or folder-scoped endpoint funnels through the single
//! `authorize` predicate and, where a folder is involved, the single
//! `folder_type_allowed` table. Neither is re-implemented per endpoint.

use crate::errors::AppError;
use crate::models::folder::FolderType;
use crate::models::project::Project;
use crate::models::user::{Actor, Role};
use sqlx::SqlitePool;
use std::collections::HashSet;
use uuid::Uuid;

/// Project-scoped operations the guard distinguishes. Only the delivery
/// pipeline is role-restricted beyond project membership.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Operation {
    InitAssetUpload,
    CompleteAssetUpload,
    InitDeliveryUpload,
    CompleteDeliveryUpload,
    CreateFolder,
    UpdateFolder,
    DeleteFolder,
    ListFolders,
    ReadAsset,
    ReadDelivery,
    DeleteAsset,
    DeleteDelivery,
}

impl Operation {
    /// Writes into the delivery pipeline are staff work; clients only
    /// consume deliveries.
    fn is_delivery_write(self) -> bool {
        matches!(
            self,
            Operation::InitDeliveryUpload
                | Operation::CompleteDeliveryUpload
                | Operation::DeleteDelivery
        )
    }
}

/// The single access predicate: ADMIN unrestricted; STAFF when assigned to
/// the project or its creator; CLIENT only on a project they own (and never
/// for delivery writes).
pub fn authorize(
    actor: &Actor,
    project: &Project,
    staff: &HashSet<Uuid>,
    op: Operation,
) -> Result<(), AppError> {
    match actor.role {
        Role::Admin => Ok(()),
        Role::Staff => {
            if staff.contains(&actor.user_id) || project.created_by == actor.user_id {
                Ok(())
            } else {
                Err(AppError::Forbidden(
                    "staff member is not assigned to this project".into(),
                ))
            }
        }
        Role::Client => {
            if project.client_id != actor.user_id {
                return Err(AppError::Forbidden("project belongs to another client".into()));
            }
            if op.is_delivery_write() {
                return Err(AppError::Forbidden(
                    "clients cannot upload or remove deliveries".into(),
                ));
            }
            Ok(())
        }
    }
}

/// Folder-scoped operation kinds for the compatibility table.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FolderOperation {
    /// Attach an asset to the folder.
    AttachAsset,
    /// Attach a delivery to the folder.
    AttachDelivery,
    /// Create a folder of the given type through the API.
    CreateUserFolder,
}

/// The declarative `(operation, folder type) -> allowed` table. Assets land
/// only in ASSETS folders; deliveries in PROJECT or DELIVERABLES folders;
/// only PROJECT folders are user-creatable.
pub fn folder_type_allowed(op: FolderOperation, folder_type: FolderType) -> bool {
    matches!(
        (op, folder_type),
        (FolderOperation::AttachAsset, FolderType::Assets)
            | (FolderOperation::AttachDelivery, FolderType::Project)
            | (FolderOperation::AttachDelivery, FolderType::Deliverables)
            | (FolderOperation::CreateUserFolder, FolderType::Project)
    )
}

/// Load a project and its staff-assignment set, then run the guard.
///
/// Returns 404 when the project does not exist, 403 when the actor fails
/// the predicate.
pub async fn require_project_access(
    db: &SqlitePool,
    actor: &Actor,
    project_id: Uuid,
    op: Operation,
) -> Result<Project, AppError> {
    let project = sqlx::query_as::<_, Project>(
        "SELECT id, name, status, client_id, created_by, created_at
         FROM projects WHERE id = ?",
    )
    .bind(project_id)
    .fetch_optional(db)
    .await?
    .ok_or_else(|| AppError::not_found(format!("project `{}` not found", project_id)))?;

    let staff: Vec<Uuid> =
        sqlx::query_scalar("SELECT user_id FROM project_staff WHERE project_id = ?")
            .bind(project_id)
            .fetch_all(db)
            .await?;

    authorize(actor, &project, &staff.into_iter().collect(), op)?;
    Ok(project)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::project::ProjectStatus;
    use chrono::Utc;

    fn project(client_id: Uuid, created_by: Uuid) -> Project {
        Project {
            id: Uuid::new_v4(),
            name: "site refresh".into(),
            status: ProjectStatus::InProgress,
            client_id,
            created_by,
            created_at: Utc::now(),
        }
    }

    fn actor(role: Role) -> Actor {
        Actor {
            user_id: Uuid::new_v4(),
            role,
        }
    }

    #[test]
    fn admin_is_always_allowed() {
        let p = project(Uuid::new_v4(), Uuid::new_v4());
        let admin = actor(Role::Admin);
        for op in [
            Operation::InitAssetUpload,
            Operation::InitDeliveryUpload,
            Operation::DeleteFolder,
        ] {
            assert!(authorize(&admin, &p, &HashSet::new(), op).is_ok());
        }
    }

    #[test]
    fn assigned_staff_is_allowed() {
        let staff = actor(Role::Staff);
        let p = project(Uuid::new_v4(), Uuid::new_v4());
        let assignments: HashSet<Uuid> = [staff.user_id].into_iter().collect();
        assert!(authorize(&staff, &p, &assignments, Operation::InitDeliveryUpload).is_ok());
    }

    #[test]
    fn creator_staff_is_allowed_without_assignment() {
        let staff = actor(Role::Staff);
        let p = project(Uuid::new_v4(), staff.user_id);
        assert!(authorize(&staff, &p, &HashSet::new(), Operation::CreateFolder).is_ok());
    }

    #[test]
    fn unrelated_staff_is_rejected_for_every_operation() {
        let stranger = actor(Role::Staff);
        let p = project(Uuid::new_v4(), Uuid::new_v4());
        for op in [
            Operation::InitAssetUpload,
            Operation::InitDeliveryUpload,
            Operation::CreateFolder,
            Operation::UpdateFolder,
            Operation::DeleteFolder,
        ] {
            let err = authorize(&stranger, &p, &HashSet::new(), op).unwrap_err();
            assert!(matches!(err, AppError::Forbidden(_)), "{:?}", op);
        }
    }

    #[test]
    fn owning_client_is_allowed_for_asset_work() {
        let client = actor(Role::Client);
        let p = project(client.user_id, Uuid::new_v4());
        assert!(authorize(&client, &p, &HashSet::new(), Operation::InitAssetUpload).is_ok());
        assert!(authorize(&client, &p, &HashSet::new(), Operation::CreateFolder).is_ok());
    }

    #[test]
    fn client_is_rejected_for_delivery_writes_even_on_own_project() {
        let client = actor(Role::Client);
        let p = project(client.user_id, Uuid::new_v4());
        let err =
            authorize(&client, &p, &HashSet::new(), Operation::InitDeliveryUpload).unwrap_err();
        assert!(matches!(err, AppError::Forbidden(_)));
    }

    #[test]
    fn non_owning_client_is_rejected() {
        let client = actor(Role::Client);
        let p = project(Uuid::new_v4(), Uuid::new_v4());
        let err = authorize(&client, &p, &HashSet::new(), Operation::ListFolders).unwrap_err();
        assert!(matches!(err, AppError::Forbidden(_)));
    }

    #[test]
    fn folder_type_table_matches_attachment_rules() {
        use FolderOperation::*;
        assert!(folder_type_allowed(AttachAsset, FolderType::Assets));
        assert!(!folder_type_allowed(AttachAsset, FolderType::Project));
        assert!(!folder_type_allowed(AttachAsset, FolderType::Deliverables));

        assert!(folder_type_allowed(AttachDelivery, FolderType::Project));
        assert!(folder_type_allowed(AttachDelivery, FolderType::Deliverables));
        assert!(!folder_type_allowed(AttachDelivery, FolderType::Assets));

        assert!(folder_type_allowed(CreateUserFolder, FolderType::Project));
        assert!(!folder_type_allowed(CreateUserFolder, FolderType::Assets));
        assert!(!folder_type_allowed(CreateUserFolder, FolderType::Deliverables));
    }
}
