//! Shared application state carried by the router.

use crate::services::{
    file_service::FileService, folder_service::FolderService, relay_service::RelayClient,
    upload_service::UploadService,
};
use sqlx::SqlitePool;
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub db: Arc<SqlitePool>,
    pub folders: FolderService,
    pub uploads: UploadService,
    pub files: FileService,
    pub relay: RelayClient,
}
