use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::env;
use std::path::PathBuf;
use uuid::Uuid;

/// Default part size handed to clients at init time: 10 MiB.
pub const DEFAULT_PART_SIZE: i64 = 10 * 1024 * 1024;

/// Presigned part URLs are valid for one hour.
pub const DEFAULT_PRESIGN_EXPIRY_SECS: u32 = 3600;

/// Centralized application configuration.
/// Combines environment variables and CLI arguments.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub database_url: String,

    /// S3-compatible endpoint, e.g. `http://localhost:9000` for MinIO.
    pub s3_endpoint: String,
    pub s3_region: String,
    pub s3_bucket: String,
    pub s3_access_key: String,
    pub s3_secret_key: String,

    /// Fixed server-side part size returned by upload init.
    pub part_size_bytes: i64,

    /// Lifetime of presigned part/get URLs.
    pub presign_expiry_secs: u32,

    /// How long an INITIATED upload session may sit before the sweeper
    /// aborts the remote multipart upload.
    pub session_ttl_secs: i64,

    /// Interval between sweeper passes.
    pub sweep_interval_secs: u64,
}

/// Command-line + environment configuration.
#[derive(Parser, Debug)]
#[command(author, version, about = "Role-scoped content delivery portal")]
pub struct Args {
    /// Host to bind to (overrides PORTAL_HOST)
    #[arg(long)]
    pub host: Option<String>,

    /// Port to bind to (overrides PORTAL_PORT)
    #[arg(long)]
    pub port: Option<u16>,

    /// Database URL (overrides PORTAL_DATABASE_URL)
    #[arg(long)]
    pub database_url: Option<String>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the HTTP server (default)
    Serve,

    /// Run migrations and exit
    Migrate,

    /// Upload a queue of files through a running portal
    Upload(UploadArgs),
}

/// Arguments for the client-side upload orchestrator.
#[derive(Parser, Debug)]
pub struct UploadArgs {
    /// Base URL of the portal (overrides PORTAL_URL)
    #[arg(long)]
    pub portal_url: Option<String>,

    /// Bearer token identifying the acting user (overrides PORTAL_TOKEN)
    #[arg(long)]
    pub token: Option<String>,

    /// Target project id
    #[arg(long)]
    pub project: Uuid,

    /// Upload deliveries instead of assets
    #[arg(long)]
    pub delivery: bool,

    /// Target folder id (project root when omitted)
    #[arg(long)]
    pub folder: Option<Uuid>,

    /// Files to upload, processed strictly in order
    #[arg(required = true)]
    pub files: Vec<PathBuf>,
}

impl AppConfig {
    /// Parse environment variables + CLI args into AppConfig and the
    /// selected command.
    pub fn from_env_and_args() -> Result<(Self, Command)> {
        // Parse CLI once
        let args = Args::parse();

        // --- Environment fallback ---
        let env_host = env::var("PORTAL_HOST").unwrap_or_else(|_| "0.0.0.0".into());
        let env_port = match env::var("PORTAL_PORT") {
            Ok(value) => value
                .parse::<u16>()
                .with_context(|| format!("parsing PORTAL_PORT value `{}`", value))?,
            Err(env::VarError::NotPresent) => 3000,
            Err(err) => return Err(err).context("reading PORTAL_PORT"),
        };
        let env_db = env::var("PORTAL_DATABASE_URL")
            .unwrap_or_else(|_| "sqlite://./data/portal.db".into());

        let cfg = Self {
            host: args.host.unwrap_or(env_host),
            port: args.port.unwrap_or(env_port),
            database_url: args.database_url.unwrap_or(env_db),
            s3_endpoint: env::var("PORTAL_S3_ENDPOINT")
                .unwrap_or_else(|_| "http://localhost:9000".into()),
            s3_region: env::var("PORTAL_S3_REGION").unwrap_or_else(|_| "local".into()),
            s3_bucket: env::var("PORTAL_S3_BUCKET").unwrap_or_else(|_| "portal".into()),
            s3_access_key: env::var("PORTAL_S3_ACCESS_KEY").unwrap_or_default(),
            s3_secret_key: env::var("PORTAL_S3_SECRET_KEY").unwrap_or_default(),
            part_size_bytes: validate_part_size(parse_env_i64(
                "PORTAL_PART_SIZE_BYTES",
                DEFAULT_PART_SIZE,
            )?)?,
            presign_expiry_secs: parse_env_i64(
                "PORTAL_PRESIGN_EXPIRY_SECS",
                DEFAULT_PRESIGN_EXPIRY_SECS as i64,
            )? as u32,
            session_ttl_secs: parse_env_i64("PORTAL_SESSION_TTL_SECS", 24 * 3600)?,
            sweep_interval_secs: parse_env_i64("PORTAL_SWEEP_INTERVAL_SECS", 900)? as u64,
        };

        Ok((cfg, args.command.unwrap_or(Command::Serve)))
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn parse_env_i64(name: &str, default: i64) -> Result<i64> {
    match env::var(name) {
        Ok(value) => value
            .parse::<i64>()
            .with_context(|| format!("parsing {} value `{}`", name, value)),
        Err(env::VarError::NotPresent) => Ok(default),
        Err(err) => Err(err).context(format!("reading {}", name)),
    }
}

/// The part size divides upload sizes at init time, so zero or negative
/// values are refused at startup instead of panicking on the first upload.
fn validate_part_size(part_size: i64) -> Result<i64> {
    anyhow::ensure!(
        part_size > 0,
        "PORTAL_PART_SIZE_BYTES must be positive, got {}",
        part_size
    );
    Ok(part_size)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn part_size_must_be_positive() {
        assert!(validate_part_size(0).is_err());
        assert!(validate_part_size(-1).is_err());
        assert_eq!(validate_part_size(DEFAULT_PART_SIZE).unwrap(), DEFAULT_PART_SIZE);
    }
}
