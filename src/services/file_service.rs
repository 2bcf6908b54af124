//! FileService — read/delete operations on stored assets and deliveries.

use crate::errors::AppError;
use crate::models::file::{FileKind, StoredFile};
use crate::services::object_store::ObjectStoreClient;
use sqlx::SqlitePool;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

#[derive(Clone)]
pub struct FileService {
    db: Arc<SqlitePool>,
    store: ObjectStoreClient,
}

impl FileService {
    pub fn new(db: Arc<SqlitePool>, store: ObjectStoreClient) -> Self {
        Self { db, store }
    }

    pub async fn fetch(
        &self,
        project_id: Uuid,
        kind: FileKind,
        file_id: Uuid,
    ) -> Result<StoredFile, AppError> {
        let sql = format!(
            "SELECT id, project_id, key, filename, content_type, size_bytes,
                    folder_id, uploaded_by, uploaded_at
             FROM {} WHERE id = ? AND project_id = ?",
            kind.table()
        );
        sqlx::query_as::<_, StoredFile>(&sql)
            .bind(file_id)
            .bind(project_id)
            .fetch_optional(&*self.db)
            .await?
            .ok_or_else(|| AppError::not_found(format!("file `{}` not found", file_id)))
    }

    /// Presigned GET URL for a stored file.
    pub async fn download_url(
        &self,
        project_id: Uuid,
        kind: FileKind,
        file_id: Uuid,
    ) -> Result<String, AppError> {
        let file = self.fetch(project_id, kind, file_id).await?;
        self.store.presign_download(&file.key).await
    }

    /// Remove the metadata row and best-effort delete the remote object.
    pub async fn delete(
        &self,
        project_id: Uuid,
        kind: FileKind,
        file_id: Uuid,
    ) -> Result<(), AppError> {
        let file = self.fetch(project_id, kind, file_id).await?;

        let sql = format!("DELETE FROM {} WHERE id = ?", kind.table());
        sqlx::query(&sql).bind(file.id).execute(&*self.db).await?;

        if let Err(err) = self.store.delete_object(&file.key).await {
            warn!(key = %file.key, error = %err, "failed to delete remote object");
        }

        info!(file_id = %file.id, kind = ?kind, "deleted file");
        Ok(())
    }
}
