//! Portal users and their roles.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// The three portal roles. Everything the authorization guard decides is a
/// function of this role plus the actor's relationship to a project.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, sqlx::Type)]
#[sqlx(rename_all = "UPPERCASE")]
#[serde(rename_all = "UPPERCASE")]
pub enum Role {
    /// Unrestricted access to every project.
    Admin,
    /// Access to projects they are assigned to or created.
    Staff,
    /// Access only to projects they own.
    Client,
}

/// A registered portal user.
#[derive(Serialize, Deserialize, Clone, FromRow, Debug)]
pub struct User {
    pub id: Uuid,
    pub name: String,
    pub role: Role,
    pub created_at: DateTime<Utc>,
}

/// The authenticated identity attached to a request, resolved from a bearer
/// token by the `auth` extractor.
#[derive(Clone, Copy, Debug)]
pub struct Actor {
    pub user_id: Uuid,
    pub role: Role,
}
