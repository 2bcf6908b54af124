//! Defines routes for the portal's upload pipeline and folder tree.
//!
//! ## Structure
//! - **Upload pipeline**
//!   - `POST /projects/{project_id}/assets/uploads` — initiate asset upload
//!   - `POST /projects/{project_id}/assets/uploads/complete` — finalize
//!   - `POST /projects/{project_id}/deliveries/uploads` — initiate delivery upload
//!   - `POST /projects/{project_id}/deliveries/uploads/complete` — finalize
//!   - `PUT  /upload-relay?url=...` — forward one part to a presigned URL
//!
//! - **Folder tree**
//!   - `GET    /projects/{project_id}/folders` — list with aggregate counts
//!   - `POST   /projects/{project_id}/folders` — create (PROJECT type only)
//!   - `PATCH  /folders/{folder_id}` — rename / reparent
//!   - `DELETE /folders/{folder_id}` — delete, detaching children
//!
//! - **Stored files**
//!   - `GET    /projects/{project_id}/files/{kind}/{file_id}/url` — presigned GET
//!   - `DELETE /projects/{project_id}/files/{kind}/{file_id}` — remove

use crate::{
    handlers::{
        file_handlers::{delete_file, get_download_url},
        folder_handlers::{create_folder, delete_folder, list_folders, update_folder},
        health_handlers::{healthz, readyz},
        upload_handlers::{
            complete_asset_upload, complete_delivery_upload, init_asset_upload,
            init_delivery_upload, relay_part,
        },
    },
    state::AppState,
};
use axum::{
    Router,
    extract::DefaultBodyLimit,
    routing::{delete, get, patch, post, put},
};

/// Build and return the router for all portal routes.
///
/// The router carries shared state (`AppState`) to all handlers.
/// `max_part_bytes` raises the relay's body limit above axum's 2 MB
/// default, which would otherwise reject full-size upload parts with 413
/// before the handler runs.
pub fn routes(max_part_bytes: usize) -> Router<AppState> {
    Router::new()
        // health endpoints (mounted at root)
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        // upload pipeline
        .route(
            "/upload-relay",
            put(relay_part).layer(DefaultBodyLimit::max(max_part_bytes)),
        )
        .route("/projects/{project_id}/assets/uploads", post(init_asset_upload))
        .route(
            "/projects/{project_id}/assets/uploads/complete",
            post(complete_asset_upload),
        )
        .route(
            "/projects/{project_id}/deliveries/uploads",
            post(init_delivery_upload),
        )
        .route(
            "/projects/{project_id}/deliveries/uploads/complete",
            post(complete_delivery_upload),
        )
        // folder tree
        .route(
            "/projects/{project_id}/folders",
            get(list_folders).post(create_folder),
        )
        .route(
            "/folders/{folder_id}",
            patch(update_folder).delete(delete_folder),
        )
        // stored files
        .route(
            "/projects/{project_id}/files/{kind}/{file_id}/url",
            get(get_download_url),
        )
        .route(
            "/projects/{project_id}/files/{kind}/{file_id}",
            delete(delete_file),
        )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use crate::services::{
        file_service::FileService, folder_service::FolderService,
        object_store::ObjectStoreClient, relay_service::RelayClient,
        upload_service::UploadService,
    };
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use sqlx::sqlite::SqlitePoolOptions;
    use std::sync::Arc;
    use tower::util::ServiceExt;
    use uuid::Uuid;

    const MIB: usize = 1024 * 1024;

    // Nothing listens on the discard port, so a relayed part that clears the
    // body limit fails with a transport error rather than 413.
    const DEAD_ENDPOINT: &str = "http://127.0.0.1:9";

    async fn test_app() -> Router {
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
        sqlx::query("INSERT INTO users (id, name, role, created_at) VALUES (?, 'pat', 'ADMIN', ?)")
            .bind(user_id)
            .bind(chrono::Utc::now())
            .execute(&pool)
            .await
            .unwrap();
        sqlx::query("INSERT INTO auth_tokens (token, user_id) VALUES ('test-token', ?)")
            .bind(user_id)
            .execute(&pool)
            .await
            .unwrap();

        let cfg = AppConfig {
            host: "127.0.0.1".into(),
            port: 0,
            database_url: "sqlite::memory:".into(),
            s3_endpoint: DEAD_ENDPOINT.into(),
            s3_region: "local".into(),
            s3_bucket: "portal".into(),
            s3_access_key: "ak".into(),
            s3_secret_key: "sk".into(),
            part_size_bytes: 10 * MIB as i64,
            presign_expiry_secs: 3600,
            session_ttl_secs: 3600,
            sweep_interval_secs: 900,
        };

        let db = Arc::new(pool);
        let store = ObjectStoreClient::new(&cfg).unwrap();
        let folders = FolderService::new(db.clone());
        let uploads = UploadService::new(
            db.clone(),
            store.clone(),
            folders.clone(),
            cfg.part_size_bytes,
            cfg.session_ttl_secs,
        );
        let files = FileService::new(db.clone(), store.clone());
        let relay = RelayClient::new(store.endpoint()).unwrap();

        let state = AppState {
            db,
            folders,
            uploads,
            files,
            relay,
        };
        routes(cfg.part_size_bytes as usize + MIB).with_state(state)
    }

    #[tokio::test]
    async fn relay_accepts_a_full_size_part_body() {
        let app = test_app().await;

        let request = Request::builder()
            .method("PUT")
            .uri(format!("/upload-relay?url={}/portal/some-key", DEAD_ENDPOINT))
            .header("authorization", "Bearer test-token")
            .body(Body::from(vec![0u8; 3 * MIB]))
            .unwrap();
        let response = app.oneshot(request).await.unwrap();

        // The body cleared the limit and reached the relay; the dead
        // upstream turns it into a transport error, not a 413.
        assert_ne!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn relay_still_bounds_oversized_bodies() {
        let app = test_app().await;

        let request = Request::builder()
            .method("PUT")
            .uri(format!("/upload-relay?url={}/portal/some-key", DEAD_ENDPOINT))
            .header("authorization", "Bearer test-token")
            .body(Body::from(vec![0u8; 12 * MIB]))
            .unwrap();
        let response = app.oneshot(request).await.unwrap();

        assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
    }
}
