//! UploadService — multipart upload sessions against the object store.
//!
//! Init opens the remote multipart upload, presigns one PUT URL per part,
//! and records an `upload_sessions` row so abandoned uploads can be swept.
//! Completion re-validates the target folder, normalizes the part list, and
//! finalizes remote object and metadata row together (deliveries atomically
//! flip the project to COMPLETED).

use crate::errors::AppError;
use crate::models::file::FileKind;
use crate::models::folder::Folder;
use crate::models::upload::{
    CompleteUploadRequest, CompleteUploadResponse, CompletedPart, InitUploadRequest,
    InitUploadResponse, UploadSession, UploadStatus,
};
use crate::models::user::Actor;
use crate::services::folder_service::FolderService;
use crate::services::object_store::ObjectStoreClient;
use crate::services::policy::{self, FolderOperation};
use chrono::{Duration, Utc};
use sqlx::SqlitePool;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

#[derive(Clone)]
pub struct UploadService {
    db: Arc<SqlitePool>,
    store: ObjectStoreClient,
    folders: FolderService,
    part_size: i64,
    session_ttl_secs: i64,
}

impl UploadService {
    pub fn new(
        db: Arc<SqlitePool>,
        store: ObjectStoreClient,
        folders: FolderService,
        part_size: i64,
        session_ttl_secs: i64,
    ) -> Self {
        Self {
            db,
            store,
            folders,
            part_size,
            session_ttl_secs,
        }
    }

    /// Initiate a multipart upload session and return the part plan.
    pub async fn init(
        &self,
        actor: &Actor,
        project_id: Uuid,
        kind: FileKind,
        req: &InitUploadRequest,
    ) -> Result<InitUploadResponse, AppError> {
        if req.size_bytes <= 0 {
            return Err(AppError::Validation(
                "sizeBytes must be greater than zero".into(),
            ));
        }
        if req.filename.trim().is_empty() {
            return Err(AppError::Validation("filename cannot be empty".into()));
        }

        if let Some(folder_id) = req.folder_id {
            let folder = self
                .folders
                .fetch_folder_in_project(folder_id, project_id)
                .await?;
            check_target_folder(kind, &folder)?;
        }

        let key = make_object_key(
            project_id,
            req.folder_id,
            Utc::now().timestamp_millis(),
            &req.filename,
        );
        let upload_id = self.store.initiate_multipart(&key, &req.content_type).await?;
        let part_count = part_count(req.size_bytes, self.part_size);

        let mut presigned_part_urls = Vec::with_capacity(part_count as usize);
        for part_number in 1..=part_count as u32 {
            presigned_part_urls.push(self.store.presign_part(&key, &upload_id, part_number).await?);
        }

        let now = Utc::now();
        sqlx::query(
            "INSERT INTO upload_sessions (
                id, project_id, kind, key, upload_id, filename, content_type,
                size_bytes, part_size, part_count, folder_id, status,
                created_by, created_at, expires_at
             ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, 'INITIATED', ?, ?, ?)",
        )
        .bind(Uuid::new_v4())
        .bind(project_id)
        .bind(kind)
        .bind(&key)
        .bind(&upload_id)
        .bind(&req.filename)
        .bind(&req.content_type)
        .bind(req.size_bytes)
        .bind(self.part_size)
        .bind(part_count)
        .bind(req.folder_id)
        .bind(actor.user_id)
        .bind(now)
        .bind(now + Duration::seconds(self.session_ttl_secs))
        .execute(&*self.db)
        .await?;

        info!(
            project_id = %project_id,
            key = %key,
            upload_id = %upload_id,
            part_count,
            "initiated upload session"
        );

        Ok(InitUploadResponse {
            upload_id,
            key,
            part_size: self.part_size,
            presigned_part_urls,
            complete_url: complete_url(project_id, kind),
            folder_id: req.folder_id,
        })
    }

    /// Finalize a multipart upload and persist the file row.
    pub async fn complete(
        &self,
        actor: &Actor,
        project_id: Uuid,
        kind: FileKind,
        req: &CompleteUploadRequest,
    ) -> Result<CompleteUploadResponse, AppError> {
        let session = sqlx::query_as::<_, UploadSession>(
            "SELECT id, project_id, kind, key, upload_id, filename, content_type,
                    size_bytes, part_size, part_count, folder_id, status,
                    created_by, created_at, expires_at
             FROM upload_sessions
             WHERE upload_id = ? AND key = ? AND project_id = ? AND kind = ?",
        )
        .bind(&req.upload_id)
        .bind(&req.key)
        .bind(project_id)
        .bind(kind)
        .fetch_optional(&*self.db)
        .await?
        .ok_or_else(|| AppError::not_found("upload session not found".to_string()))?;

        if session.status != UploadStatus::Initiated {
            return Err(AppError::not_found(
                "upload session is no longer open".to_string(),
            ));
        }

        // A session past its TTL is dead even if the sweeper has not
        // visited it yet; completing it would resurrect an upload the
        // client was told to treat as abandoned.
        if session.expires_at <= Utc::now() {
            self.abort_session(&session, UploadStatus::Expired).await;
            return Err(AppError::not_found(
                "upload session has expired".to_string(),
            ));
        }

        // Re-validate the target folder; it may have been deleted between
        // init and completion. Failing here abandons the remote upload, so
        // abort it rather than leaking the parts.
        if let Err(err) = self.validate_completion(kind, project_id, req, &session).await {
            self.abort_session(&session, UploadStatus::Aborted).await;
            return Err(err);
        }

        let mut parts = req.parts.clone();
        normalize_parts(&mut parts);
        self.store
            .complete_multipart(&session.key, &session.upload_id, &parts)
            .await?;

        let location = self.store.object_url(&session.key);
        let file_id = Uuid::new_v4();
        let now = Utc::now();

        let mut tx = self.db.begin().await?;
        let insert = format!(
            "INSERT INTO {} (id, project_id, key, filename, content_type, size_bytes,
                             folder_id, uploaded_by, uploaded_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
            kind.table()
        );
        sqlx::query(&insert)
            .bind(file_id)
            .bind(project_id)
            .bind(&session.key)
            .bind(&req.filename)
            .bind(&req.content_type)
            .bind(req.size_bytes)
            .bind(req.folder_id)
            .bind(actor.user_id)
            .bind(now)
            .execute(&mut *tx)
            .await?;

        // Delivery completion is coupled to workflow state: the record and
        // the status transition commit together or not at all.
        if kind == FileKind::Delivery {
            sqlx::query("UPDATE projects SET status = 'COMPLETED' WHERE id = ?")
                .bind(project_id)
                .execute(&mut *tx)
                .await?;
        }

        sqlx::query("UPDATE upload_sessions SET status = 'COMPLETED' WHERE id = ?")
            .bind(session.id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        info!(
            project_id = %project_id,
            key = %session.key,
            file_id = %file_id,
            kind = ?kind,
            "completed upload"
        );

        Ok(CompleteUploadResponse { ok: true, location })
    }

    /// Abort INITIATED sessions past their TTL, discarding remote parts.
    /// Sessions whose remote abort fails stay INITIATED for the next pass.
    pub async fn sweep_expired(&self) -> Result<usize, AppError> {
        let stale = sqlx::query_as::<_, UploadSession>(
            "SELECT id, project_id, kind, key, upload_id, filename, content_type,
                    size_bytes, part_size, part_count, folder_id, status,
                    created_by, created_at, expires_at
             FROM upload_sessions
             WHERE status = 'INITIATED' AND expires_at < ?",
        )
        .bind(Utc::now())
        .fetch_all(&*self.db)
        .await?;

        let mut swept = 0;
        for session in stale {
            match self
                .store
                .abort_multipart(&session.key, &session.upload_id)
                .await
            {
                Ok(()) => {
                    sqlx::query("UPDATE upload_sessions SET status = 'EXPIRED' WHERE id = ?")
                        .bind(session.id)
                        .execute(&*self.db)
                        .await?;
                    swept += 1;
                }
                Err(err) => {
                    warn!(
                        upload_id = %session.upload_id,
                        key = %session.key,
                        error = %err,
                        "failed to abort expired upload session"
                    );
                }
            }
        }
        if swept > 0 {
            info!(swept, "swept expired upload sessions");
        }
        Ok(swept)
    }

    async fn validate_completion(
        &self,
        kind: FileKind,
        project_id: Uuid,
        req: &CompleteUploadRequest,
        session: &UploadSession,
    ) -> Result<(), AppError> {
        if let Some(folder_id) = req.folder_id {
            let folder = self
                .folders
                .fetch_folder_in_project(folder_id, project_id)
                .await?;
            check_target_folder(kind, &folder)?;
        }
        validate_parts(&req.parts, session.part_count)
    }

    /// Best-effort abort of a session that can no longer complete. The row
    /// keeps INITIATED when the remote abort fails, leaving it to the
    /// sweeper.
    async fn abort_session(&self, session: &UploadSession, status: UploadStatus) {
        if let Err(err) = self
            .store
            .abort_multipart(&session.key, &session.upload_id)
            .await
        {
            warn!(
                upload_id = %session.upload_id,
                error = %err,
                "failed to abort rejected upload session"
            );
            return;
        }
        if let Err(err) = sqlx::query("UPDATE upload_sessions SET status = ? WHERE id = ?")
            .bind(status)
            .bind(session.id)
            .execute(&*self.db)
            .await
        {
            warn!(session_id = %session.id, error = %err, "failed to mark session closed");
        }
    }
}

/// Folder-type gate shared by init and completion: violation is an error,
/// never silently corrected.
fn check_target_folder(kind: FileKind, folder: &Folder) -> Result<(), AppError> {
    let op = match kind {
        FileKind::Asset => FolderOperation::AttachAsset,
        FileKind::Delivery => FolderOperation::AttachDelivery,
    };
    if !policy::folder_type_allowed(op, folder.folder_type) {
        return Err(AppError::Validation(format!(
            "{:?} folders cannot hold {}s",
            folder.folder_type,
            match kind {
                FileKind::Asset => "asset",
                FileKind::Delivery => "delivery",
            }
        )));
    }
    Ok(())
}

/// `ceil(size / part_size)` — the number of parts the client must upload.
pub fn part_count(size_bytes: i64, part_size: i64) -> i64 {
    (size_bytes + part_size - 1) / part_size
}

/// Object keys encode project, optional folder, a millisecond timestamp, and
/// the sanitized original filename so concurrent uploads never collide.
pub fn make_object_key(
    project_id: Uuid,
    folder_id: Option<Uuid>,
    timestamp_ms: i64,
    filename: &str,
) -> String {
    let filename = sanitize_filename(filename);
    match folder_id {
        Some(folder) => format!(
            "projects/{}/folders/{}/{}-{}",
            project_id, folder, timestamp_ms, filename
        ),
        None => format!("projects/{}/{}-{}", project_id, timestamp_ms, filename),
    }
}

/// Keep object keys flat and free of traversal vectors: path separators and
/// control characters collapse to underscores.
fn sanitize_filename(filename: &str) -> String {
    let cleaned: String = filename
        .trim()
        .chars()
        .map(|c| {
            if c == '/' || c == '\\' || c.is_control() {
                '_'
            } else {
                c
            }
        })
        .collect();
    if cleaned.is_empty() {
        "unnamed".to_string()
    } else {
        cleaned
    }
}

/// The part list must be exactly the set {1..part_count}: right length, no
/// duplicates, nothing out of range.
pub fn validate_parts(parts: &[CompletedPart], part_count: i64) -> Result<(), AppError> {
    if parts.len() as i64 != part_count {
        return Err(AppError::Validation(format!(
            "expected {} parts, got {}",
            part_count,
            parts.len()
        )));
    }
    let mut seen = HashSet::new();
    for part in parts {
        let n = part.part_number as i64;
        if n < 1 || n > part_count {
            return Err(AppError::Validation(format!(
                "part number {} outside 1..={}",
                n, part_count
            )));
        }
        if !seen.insert(n) {
            return Err(AppError::Validation(format!("duplicate part number {}", n)));
        }
    }
    Ok(())
}

/// The object store requires strictly ascending part numbers; clients may
/// report them in any order, so completion sorts rather than assumes.
pub fn normalize_parts(parts: &mut [CompletedPart]) {
    parts.sort_by_key(|p| p.part_number);
}

/// Relative completion endpoint handed back by init.
fn complete_url(project_id: Uuid, kind: FileKind) -> String {
    let segment = match kind {
        FileKind::Asset => "assets",
        FileKind::Delivery => "deliveries",
    };
    format!("/projects/{}/{}/uploads/complete", project_id, segment)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn part(n: u32) -> CompletedPart {
        CompletedPart {
            etag: format!("etag-{}", n),
            part_number: n,
        }
    }

    #[test]
    fn part_count_is_ceiling_division() {
        let mib = 1024 * 1024;
        assert_eq!(part_count(25 * mib, 10 * mib), 3);
        assert_eq!(part_count(20 * mib, 10 * mib), 2);
        assert_eq!(part_count(1, 10 * mib), 1);
        assert_eq!(part_count(10 * mib, 10 * mib), 1);
        assert_eq!(part_count(10 * mib + 1, 10 * mib), 2);
    }

    #[test]
    fn parts_must_form_the_exact_set() {
        assert!(validate_parts(&[part(1), part(2), part(3)], 3).is_ok());
        // wrong count
        assert!(validate_parts(&[part(1), part(2)], 3).is_err());
        // duplicate
        assert!(validate_parts(&[part(1), part(1), part(2)], 3).is_err());
        // out of range
        assert!(validate_parts(&[part(1), part(2), part(4)], 3).is_err());
        assert!(validate_parts(&[part(0), part(1), part(2)], 3).is_err());
    }

    #[test]
    fn normalization_sorts_out_of_order_parts() {
        let mut parts = vec![part(2), part(1), part(3)];
        normalize_parts(&mut parts);
        assert_eq!(
            parts.iter().map(|p| p.part_number).collect::<Vec<_>>(),
            vec![1, 2, 3]
        );

        // sorting pre-sorted input is a no-op
        let mut sorted = vec![part(1), part(2), part(3)];
        normalize_parts(&mut sorted);
        assert_eq!(sorted, vec![part(1), part(2), part(3)]);
    }

    #[test]
    fn object_keys_embed_project_folder_and_timestamp() {
        let project = Uuid::new_v4();
        let folder = Uuid::new_v4();
        let key = make_object_key(project, Some(folder), 1700000000000, "brief.pdf");
        assert_eq!(
            key,
            format!(
                "projects/{}/folders/{}/1700000000000-brief.pdf",
                project, folder
            )
        );

        let rootless = make_object_key(project, None, 1700000000000, "brief.pdf");
        assert_eq!(rootless, format!("projects/{}/1700000000000-brief.pdf", project));
    }

    #[test]
    fn filenames_are_sanitized_into_keys() {
        let project = Uuid::new_v4();
        let key = make_object_key(project, None, 1, "../etc/passwd");
        assert!(key.ends_with("1-.._etc_passwd"));
        let key = make_object_key(project, None, 1, "  ");
        assert!(key.ends_with("1-unnamed"));
    }

    async fn test_service() -> (UploadService, Uuid, Actor) {
        use sqlx::sqlite::SqlitePoolOptions;

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        for stmt in include_str!("../../migrations/0001_init.sql")
            .split(';')
            .map(str::trim)
            .filter(|s| !s.is_empty())
        {
            sqlx::query(stmt).execute(&pool).await.unwrap();
        }

        let user_id = Uuid::new_v4();
        let project_id = Uuid::new_v4();
        sqlx::query("INSERT INTO users (id, name, role, created_at) VALUES (?, 'pat', 'ADMIN', ?)")
            .bind(user_id)
            .bind(Utc::now())
            .execute(&pool)
            .await
            .unwrap();
        sqlx::query(
            "INSERT INTO projects (id, name, status, client_id, created_by, created_at)
             VALUES (?, 'p', 'IN_PROGRESS', ?, ?, ?)",
        )
        .bind(project_id)
        .bind(user_id)
        .bind(user_id)
        .bind(Utc::now())
        .execute(&pool)
        .await
        .unwrap();

        // Nothing listens here; remote calls fail fast instead of hanging.
        let cfg = crate::config::AppConfig {
            host: "127.0.0.1".into(),
            port: 0,
            database_url: "sqlite::memory:".into(),
            s3_endpoint: "http://127.0.0.1:9".into(),
            s3_region: "local".into(),
            s3_bucket: "portal".into(),
            s3_access_key: "ak".into(),
            s3_secret_key: "sk".into(),
            part_size_bytes: 10 * 1024 * 1024,
            presign_expiry_secs: 3600,
            session_ttl_secs: 3600,
            sweep_interval_secs: 900,
        };
        let db = Arc::new(pool);
        let store = ObjectStoreClient::new(&cfg).unwrap();
        let folders = FolderService::new(db.clone());
        let svc = UploadService::new(db, store, folders, cfg.part_size_bytes, cfg.session_ttl_secs);
        let actor = Actor {
            user_id,
            role: crate::models::user::Role::Admin,
        };
        (svc, project_id, actor)
    }

    async fn insert_session(
        svc: &UploadService,
        project_id: Uuid,
        actor: &Actor,
        expires_at: chrono::DateTime<Utc>,
    ) -> CompleteUploadRequest {
        let key = format!("projects/{}/1-probe.bin", project_id);
        sqlx::query(
            "INSERT INTO upload_sessions (
                id, project_id, kind, key, upload_id, filename, content_type,
                size_bytes, part_size, part_count, folder_id, status,
                created_by, created_at, expires_at
             ) VALUES (?, ?, 'ASSET', ?, 'remote-upload-id', 'probe.bin', 'application/octet-stream',
                       5, 10485760, 1, NULL, 'INITIATED', ?, ?, ?)",
        )
        .bind(Uuid::new_v4())
        .bind(project_id)
        .bind(&key)
        .bind(actor.user_id)
        .bind(Utc::now())
        .bind(expires_at)
        .execute(&*svc.db)
        .await
        .unwrap();

        CompleteUploadRequest {
            key,
            upload_id: "remote-upload-id".into(),
            parts: vec![part(1)],
            filename: "probe.bin".into(),
            content_type: "application/octet-stream".into(),
            size_bytes: 5,
            folder_id: None,
        }
    }

    #[tokio::test]
    async fn expired_sessions_are_never_completable() {
        let (svc, project_id, actor) = test_service().await;
        let req = insert_session(
            &svc,
            project_id,
            &actor,
            Utc::now() - Duration::seconds(60),
        )
        .await;

        let err = svc
            .complete(&actor, project_id, FileKind::Asset, &req)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)), "{err}");
        assert!(err.to_string().contains("expired"));

        // no asset row was created
        let assets: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM assets")
            .fetch_one(&*svc.db)
            .await
            .unwrap();
        assert_eq!(assets, 0);
    }

    #[tokio::test]
    async fn open_sessions_pass_the_expiry_gate() {
        let (svc, project_id, actor) = test_service().await;
        let req = insert_session(
            &svc,
            project_id,
            &actor,
            Utc::now() + Duration::seconds(3600),
        )
        .await;

        // The session clears the expiry gate; failure comes from the dead
        // object-store endpoint at the finalize step instead.
        let err = svc
            .complete(&actor, project_id, FileKind::Asset, &req)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Upstream { .. }), "{err}");
    }

    #[test]
    fn complete_urls_follow_the_kind_segment() {
        let project = Uuid::new_v4();
        assert_eq!(
            complete_url(project, FileKind::Asset),
            format!("/projects/{}/assets/uploads/complete", project)
        );
        assert_eq!(
            complete_url(project, FileKind::Delivery),
            format!("/projects/{}/deliveries/uploads/complete", project)
        );
    }
}
