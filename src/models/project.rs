//! Projects — the unit of ownership for folders, assets, and deliveries.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Workflow state of a project. The transition to `Completed` happens
/// atomically with the persistence of a finished delivery.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, sqlx::Type)]
#[sqlx(rename_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProjectStatus {
    Pending,
    InProgress,
    Completed,
}

/// A client engagement. Exclusively owned by its client; assigned staff and
/// admins get shared read/write access through the authorization guard.
#[derive(Serialize, Deserialize, Clone, FromRow, Debug)]
pub struct Project {
    pub id: Uuid,

    pub name: String,

    pub status: ProjectStatus,

    /// The client who owns this project.
    pub client_id: Uuid,

    /// The user (staff or admin) who created the project.
    pub created_by: Uuid,

    pub created_at: DateTime<Utc>,
}
