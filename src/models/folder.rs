//! Typed folders forming a cycle-free forest per project.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Folder type. `Assets` and `Deliverables` are system-provisioned exactly
/// once per project and cannot be created, reparented, or deleted through
/// the API; `Project` folders are user-created and freely nestable.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash, sqlx::Type)]
#[sqlx(rename_all = "UPPERCASE")]
#[serde(rename_all = "UPPERCASE")]
pub enum FolderType {
    Project,
    Assets,
    Deliverables,
}

impl FolderType {
    /// Whether this type is one of the two system-provisioned folders.
    pub fn is_system(self) -> bool {
        matches!(self, FolderType::Assets | FolderType::Deliverables)
    }
}

/// A folder node. `parent_id = None` means the folder sits at the project
/// root. Aggregate asset/delivery counts are derived from the live tree,
/// never stored here.
#[derive(Serialize, Deserialize, Clone, FromRow, Debug)]
pub struct Folder {
    pub id: Uuid,
    pub project_id: Uuid,
    pub name: String,
    pub folder_type: FolderType,
    pub parent_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}
