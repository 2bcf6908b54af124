//! Multipart upload sessions and their wire types.

use crate::models::file::FileKind;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Lifecycle of an upload session. The remote multipart upload exists from
/// init until it is finalized or aborted; this row mirrors that lifecycle so
/// abandoned sessions can be swept instead of leaking in the object store.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, sqlx::Type)]
#[sqlx(rename_all = "UPPERCASE")]
#[serde(rename_all = "UPPERCASE")]
pub enum UploadStatus {
    Initiated,
    Completed,
    Aborted,
    Expired,
}

/// One multipart upload in flight (or finished) against the object store.
#[derive(Serialize, Deserialize, Clone, FromRow, Debug)]
pub struct UploadSession {
    pub id: Uuid,
    pub project_id: Uuid,
    pub kind: FileKind,

    /// Object key the parts are assembling into.
    pub key: String,

    /// Remote multipart upload id issued by the object store.
    pub upload_id: String,

    pub filename: String,
    pub content_type: Option<String>,
    pub size_bytes: i64,
    pub part_size: i64,
    pub part_count: i64,

    /// Target folder validated at init time; re-validated at completion.
    pub folder_id: Option<Uuid>,

    pub status: UploadStatus,
    pub created_by: Uuid,
    pub created_at: DateTime<Utc>,

    /// Past this instant an INITIATED session is fair game for the sweeper.
    pub expires_at: DateTime<Utc>,
}

/// Init request body: `{filename, contentType, sizeBytes, folderId?}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitUploadRequest {
    pub filename: String,
    pub content_type: String,
    pub size_bytes: i64,
    #[serde(default)]
    pub folder_id: Option<Uuid>,
}

/// Init response body: the part plan the client drives.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitUploadResponse {
    pub upload_id: String,
    pub key: String,
    pub part_size: i64,
    pub presigned_part_urls: Vec<String>,
    pub complete_url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub folder_id: Option<Uuid>,
}

/// One uploaded part as reported back by the client. Field names follow the
/// object-store convention (`ETag` / `PartNumber`).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CompletedPart {
    #[serde(rename = "ETag")]
    pub etag: String,
    #[serde(rename = "PartNumber")]
    pub part_number: u32,
}

/// Completion request body posted to the `completeUrl` returned by init.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompleteUploadRequest {
    pub key: String,
    pub upload_id: String,
    pub parts: Vec<CompletedPart>,
    pub filename: String,
    pub content_type: String,
    pub size_bytes: i64,
    #[serde(default)]
    pub folder_id: Option<Uuid>,
}

/// Completion response body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompleteUploadResponse {
    pub ok: bool,
    pub location: String,
}
