//! Thin client over the S3-compatible object store.
//!
//! Wraps `rust-s3` with the handful of operations the upload pipeline needs:
//! multipart init/complete/abort, presigned part PUT URLs, presigned GET
//! URLs, and object deletion. Uses path-style addressing so MinIO and
//! similar providers work out of the box.

use crate::config::AppConfig;
use crate::errors::AppError;
use crate::models::upload::CompletedPart;
use s3::creds::Credentials;
use s3::serde_types::Part;
use s3::{Bucket, Region};
use std::collections::HashMap;
use tracing::{debug, info};

#[derive(Clone)]
pub struct ObjectStoreClient {
    bucket: Box<Bucket>,
    endpoint: String,
    presign_expiry_secs: u32,
}

impl ObjectStoreClient {
    pub fn new(cfg: &AppConfig) -> Result<Self, AppError> {
        let credentials = Credentials::new(
            Some(&cfg.s3_access_key),
            Some(&cfg.s3_secret_key),
            None,
            None,
            None,
        )
        .map_err(|e| AppError::internal(format!("object store credentials: {}", e)))?;

        let region = Region::Custom {
            region: cfg.s3_region.clone(),
            endpoint: cfg.s3_endpoint.clone(),
        };

        let mut bucket = Bucket::new(&cfg.s3_bucket, region, credentials)
            .map_err(|e| AppError::internal(format!("object store bucket: {}", e)))?;
        bucket.set_path_style();

        info!(
            endpoint = %cfg.s3_endpoint,
            bucket = %cfg.s3_bucket,
            "object store client initialized"
        );

        Ok(Self {
            bucket,
            endpoint: cfg.s3_endpoint.trim_end_matches('/').to_string(),
            presign_expiry_secs: cfg.presign_expiry_secs,
        })
    }

    /// The endpoint presigned URLs point at; the relay only forwards to
    /// URLs underneath it.
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Public (path-style) URL of a finalized object.
    pub fn object_url(&self, key: &str) -> String {
        format!("{}/{}/{}", self.endpoint, self.bucket.name(), key)
    }

    /// Open a multipart upload, returning the remote upload id.
    pub async fn initiate_multipart(
        &self,
        key: &str,
        content_type: &str,
    ) -> Result<String, AppError> {
        let response = self
            .bucket
            .initiate_multipart_upload(key, content_type)
            .await?;
        debug!(key = %key, upload_id = %response.upload_id, "initiated multipart upload");
        Ok(response.upload_id)
    }

    /// Presign one part PUT. The part number and upload id ride along as
    /// query parameters, as the UploadPart API requires.
    pub async fn presign_part(
        &self,
        key: &str,
        upload_id: &str,
        part_number: u32,
    ) -> Result<String, AppError> {
        let queries = HashMap::from([
            ("partNumber".to_string(), part_number.to_string()),
            ("uploadId".to_string(), upload_id.to_string()),
        ]);
        Ok(self
            .bucket
            .presign_put(key, self.presign_expiry_secs, None, Some(queries))
            .await?)
    }

    /// Finalize a multipart upload. `parts` must already be sorted in
    /// ascending part-number order.
    pub async fn complete_multipart(
        &self,
        key: &str,
        upload_id: &str,
        parts: &[CompletedPart],
    ) -> Result<(), AppError> {
        let parts: Vec<Part> = parts
            .iter()
            .map(|p| Part {
                part_number: p.part_number,
                etag: p.etag.clone(),
            })
            .collect();

        let response = self
            .bucket
            .complete_multipart_upload(key, upload_id, parts)
            .await?;
        if response.status_code() >= 300 {
            return Err(AppError::Upstream {
                status: Some(response.status_code()),
                message: format!(
                    "completing multipart upload failed: {}",
                    response.as_str().unwrap_or("<non-utf8 body>")
                ),
            });
        }
        info!(key = %key, upload_id = %upload_id, "completed multipart upload");
        Ok(())
    }

    /// Abort a multipart upload, discarding any parts uploaded so far.
    pub async fn abort_multipart(&self, key: &str, upload_id: &str) -> Result<(), AppError> {
        self.bucket.abort_upload(key, upload_id).await?;
        info!(key = %key, upload_id = %upload_id, "aborted multipart upload");
        Ok(())
    }

    /// Presigned GET URL for downloading an object.
    pub async fn presign_download(&self, key: &str) -> Result<String, AppError> {
        Ok(self
            .bucket
            .presign_get(key, self.presign_expiry_secs, None)
            .await?)
    }

    pub async fn delete_object(&self, key: &str) -> Result<(), AppError> {
        self.bucket.delete_object(key).await?;
        debug!(key = %key, "deleted object");
        Ok(())
    }
}
