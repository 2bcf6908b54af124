//! RelayClient — forwards one upload part to a presigned object-store URL.
//!
//! The browser cannot PUT to the bucket directly (no CORS policy there), so
//! parts pass through this relay. Chunking stays client-side; the relay only
//! ever holds one part in memory.

use crate::errors::AppError;
use bytes::Bytes;
use reqwest::header::{CONTENT_LENGTH, ETAG};
use std::time::Duration;
use tracing::{debug, warn};

const MIB: u64 = 1024 * 1024;

/// Assumed worst-case link speed for the timeout estimate: 100 KiB/s.
const WORST_CASE_BYTES_PER_SEC: u64 = 100 * 1024;

/// Outcome of a relayed part PUT.
#[derive(Debug)]
pub enum RelayOutcome {
    /// Upstream accepted the part; ETag with surrounding quotes stripped.
    Success { etag: String },
    /// Upstream answered non-2xx; status and body are propagated verbatim.
    Upstream { status: u16, body: String },
}

#[derive(Clone)]
pub struct RelayClient {
    http: reqwest::Client,
    /// Presigned URLs must sit under this endpoint to be forwarded.
    allowed_prefix: String,
}

impl RelayClient {
    pub fn new(endpoint: &str) -> Result<Self, AppError> {
        let http = reqwest::Client::builder()
            .tcp_keepalive(Duration::from_secs(60))
            .build()
            .map_err(|e| AppError::internal(format!("relay http client: {}", e)))?;
        Ok(Self {
            http,
            allowed_prefix: endpoint.trim_end_matches('/').to_string(),
        })
    }

    /// Forward one part body to `url` with the size-adaptive timeout.
    pub async fn forward(&self, url: &str, body: Bytes) -> Result<RelayOutcome, AppError> {
        // The prefix must be followed by a path separator so a hostname
        // that merely extends the endpoint's does not slip through.
        let under_endpoint = url
            .strip_prefix(&self.allowed_prefix)
            .is_some_and(|rest| rest.starts_with('/'));
        if !under_endpoint {
            return Err(AppError::Validation(
                "relay target must be a presigned object-store URL".into(),
            ));
        }

        let size_bytes = body.len() as u64;
        let timeout = relay_timeout(size_bytes);
        debug!(
            size_bytes,
            timeout_secs = timeout.as_secs(),
            "relaying part upstream"
        );

        let response = self
            .http
            .put(url)
            .header(CONTENT_LENGTH, size_bytes)
            .timeout(timeout)
            .body(body)
            .send()
            .await
            .map_err(|err| {
                if err.is_timeout() {
                    AppError::UpstreamTimeout {
                        size_bytes,
                        timeout_secs: timeout.as_secs(),
                    }
                } else {
                    AppError::Upstream {
                        status: Some(500),
                        message: format!("relay transport error: {}", err),
                    }
                }
            })?;

        let status = response.status();
        if status.is_success() {
            let etag = response
                .headers()
                .get(ETAG)
                .and_then(|v| v.to_str().ok())
                .map(strip_etag_quotes)
                .ok_or_else(|| AppError::Upstream {
                    status: None,
                    message: "upstream response carried no ETag".into(),
                })?;
            Ok(RelayOutcome::Success { etag })
        } else {
            let body = response.text().await.unwrap_or_default();
            warn!(status = status.as_u16(), "upstream rejected relayed part");
            Ok(RelayOutcome::Upstream {
                status: status.as_u16(),
                body,
            })
        }
    }
}

/// Timeout for a relayed part of `size_bytes`:
/// under 1 MiB a flat 2 minutes; otherwise twice the worst-case transfer
/// estimate at 100 KiB/s, with a 10 minute floor.
pub fn relay_timeout(size_bytes: u64) -> Duration {
    if size_bytes < MIB {
        Duration::from_secs(120)
    } else {
        let estimate = 2 * size_bytes / WORST_CASE_BYTES_PER_SEC;
        Duration::from_secs(estimate.max(600))
    }
}

/// Object stores return ETags wrapped in double quotes; clients want the
/// bare value.
pub fn strip_etag_quotes(etag: &str) -> String {
    etag.trim_matches('"').to_string()
}
