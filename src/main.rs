use anyhow::Result;
use axum::Router;
use sqlx::sqlite::SqlitePoolOptions;
use std::{fs, io::ErrorKind, path::Path, sync::Arc, time::Duration};
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

mod auth;
mod config;
mod errors;
mod handlers;
mod models;
mod routes;
mod services;
mod state;
mod uploader;

use config::{AppConfig, Command, UploadArgs};
use models::file::FileKind;
use services::{
    file_service::FileService, folder_service::FolderService, object_store::ObjectStoreClient,
    relay_service::RelayClient, upload_service::UploadService,
};
use state::AppState;

#[tokio::main]
async fn main() -> Result<()> {
    // --- Logging setup ---
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let (cfg, command) = AppConfig::from_env_and_args()?;

    match command {
        Command::Serve => serve(cfg).await,
        Command::Migrate => {
            let db = connect(&cfg).await?;
            run_migrations(&db).await?;
            provision_system_folders(&db).await?;
            tracing::info!("Database migration complete.");
            Ok(())
        }
        Command::Upload(args) => upload(args).await,
    }
}

async fn serve(cfg: AppConfig) -> Result<()> {
    tracing::info!("Starting delivery-portal on {}", cfg.addr());

    let db = connect(&cfg).await?;

    // --- Initialize core services ---
    let store = ObjectStoreClient::new(&cfg)?;
    let folders = FolderService::new(db.clone());
    let uploads = UploadService::new(
        db.clone(),
        store.clone(),
        folders.clone(),
        cfg.part_size_bytes,
        cfg.session_ttl_secs,
    );
    let files = FileService::new(db.clone(), store.clone());
    let relay = RelayClient::new(store.endpoint())?;

    let state = AppState {
        db: db.clone(),
        folders,
        uploads,
        files,
        relay,
    };

    // --- Background sweep of expired upload sessions ---
    let sweeper = state.uploads.clone();
    let sweep_interval = Duration::from_secs(cfg.sweep_interval_secs);
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(sweep_interval);
        loop {
            ticker.tick().await;
            if let Err(err) = sweeper.sweep_expired().await {
                tracing::warn!("Upload session sweep failed: {}", err);
            }
        }
    });

    // --- Build router ---
    // Relay bodies carry whole upload parts, so the limit sits above the
    // part size rather than at axum's 2 MB default.
    let max_part_bytes = cfg.part_size_bytes as usize + 1024 * 1024;
    let app: Router = routes::routes::routes(max_part_bytes).with_state(state);

    // --- Start server ---
    let addr = cfg.addr();
    let listener = match TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(err)
            if err.kind() == ErrorKind::PermissionDenied
                && matches!(cfg.host.as_str(), "0.0.0.0" | "::") =>
        {
            let fallback_addr = format!("127.0.0.1:{}", cfg.port);
            tracing::warn!(
                "Permission denied binding to {} ({}). Falling back to {}",
                addr,
                err,
                fallback_addr
            );
            TcpListener::bind(&fallback_addr).await?
        }
        Err(err) => return Err(err.into()),
    };

    tracing::info!("Server listening on http://{}", listener.local_addr()?);
    axum::serve(listener, app).await?;

    Ok(())
}

/// Run the client-side upload queue against a running portal.
async fn upload(args: UploadArgs) -> Result<()> {
    let portal_url = args
        .portal_url
        .or_else(|| std::env::var("PORTAL_URL").ok())
        .unwrap_or_else(|| "http://localhost:3000".into());
    let token = args
        .token
        .or_else(|| std::env::var("PORTAL_TOKEN").ok())
        .ok_or_else(|| anyhow::anyhow!("no bearer token: pass --token or set PORTAL_TOKEN"))?;

    let kind = if args.delivery {
        FileKind::Delivery
    } else {
        FileKind::Asset
    };

    let client = uploader::Uploader::new(portal_url, token);
    let results = client
        .upload_queue(args.project, kind, args.folder, &args.files, |pct| {
            tracing::info!("Progress: {:.1}%", pct);
        })
        .await?;

    for done in &results {
        tracing::info!("Uploaded => {}", done.location);
    }
    Ok(())
}

async fn connect(cfg: &AppConfig) -> Result<Arc<sqlx::Pool<sqlx::Sqlite>>> {
    let db_url = &cfg.database_url;
    tracing::debug!("Connecting using raw URL => {}", db_url);

    // Extract the local file path SQLx will use
    let db_path = db_url
        .trim_start_matches("sqlite://")
        .trim_start_matches("file:");

    // Create parent directory if needed
    let db_path_obj = Path::new(db_path);
    if let Some(parent) = db_path_obj.parent() {
        if !parent.exists() {
            fs::create_dir_all(parent)?;
            tracing::info!("Created missing directory {:?}", parent);
        }
    }

    // Try opening manually before SQLx
    match fs::OpenOptions::new().create(true).write(true).open(db_path) {
        Ok(_) => tracing::debug!("File can be created/opened successfully."),
        Err(e) => tracing::warn!("Failed to open file manually: {}", e),
    }

    Ok(Arc::new(
        SqlitePoolOptions::new()
            .max_connections(5)
            .connect(db_url)
            .await?,
    ))
}

/// Backfill the per-project system folders for projects that predate them.
async fn provision_system_folders(db: &Arc<sqlx::Pool<sqlx::Sqlite>>) -> Result<()> {
    let folders = FolderService::new(db.clone());
    let projects: Vec<uuid::Uuid> = sqlx::query_scalar("SELECT id FROM projects")
        .fetch_all(&**db)
        .await?;
    for project_id in projects {
        folders.provision_system_folders(project_id).await?;
    }
    Ok(())
}

/// Run SQLite migrations from the embedded SQL file.
async fn run_migrations(db: &Arc<sqlx::Pool<sqlx::Sqlite>>) -> Result<()> {
    let sql = include_str!("../migrations/0001_init.sql");
    let statements = sql
        .split(';')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>();

    tracing::info!("Running {} migration statements...", statements.len());

    for stmt in statements {
        tracing::debug!("Executing migration SQL: {}", stmt);
        sqlx::query(stmt).execute(&**db).await?;
    }

    Ok(())
}
