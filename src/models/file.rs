//! Stored files: client-origin assets and staff-origin deliveries.
//!
//! Both kinds share one row shape; the `FileKind` discriminant selects the
//! table and the folder types the file may be attached to.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Which of the two file tables a record lives in.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, sqlx::Type)]
#[sqlx(rename_all = "UPPERCASE")]
#[serde(rename_all = "lowercase")]
pub enum FileKind {
    Asset,
    Delivery,
}

impl FileKind {
    pub fn table(self) -> &'static str {
        match self {
            FileKind::Asset => "assets",
            FileKind::Delivery => "deliveries",
        }
    }
}

/// A stored file record. The payload itself lives in the object store under
/// `key`; this row is only metadata.
///
/// Invariant: an asset's `folder_id`, if set, references a folder of type
/// ASSETS; a delivery's references a folder of type PROJECT or DELIVERABLES.
#[derive(Serialize, Deserialize, Clone, FromRow, Debug)]
pub struct StoredFile {
    pub id: Uuid,

    pub project_id: Uuid,

    /// Object-store path of the payload.
    pub key: String,

    /// Original filename as uploaded.
    pub filename: String,

    /// Content type (MIME type).
    pub content_type: Option<String>,

    pub size_bytes: i64,

    /// Containing folder, or `None` for the project root.
    pub folder_id: Option<Uuid>,

    pub uploaded_by: Uuid,

    pub uploaded_at: DateTime<Utc>,
}
