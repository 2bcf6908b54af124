//! Client-side upload orchestrator.
//!
//! Drives a queue of files through the portal one at a time: init a session,
//! slice the file into the server's part plan, PUT each part through the
//! relay, then post the collected ETags to the completion endpoint. Parts
//! within a file are uploaded sequentially; a part gets a bounded number of
//! attempts with backoff, and a file that still fails aborts the remaining
//! queue.

use crate::models::file::FileKind;
use crate::models::upload::{
    CompleteUploadRequest, CompleteUploadResponse, CompletedPart, InitUploadRequest,
    InitUploadResponse,
};
use reqwest::header::CONTENT_TYPE;
use std::io::SeekFrom;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tracing::{info, warn};
use uuid::Uuid;

/// Attempts per part before the file is declared failed.
pub const MAX_PART_ATTEMPTS: u32 = 3;

const RETRY_BASE_DELAY: Duration = Duration::from_millis(500);

/// Explicit lifecycle of one part within a file upload.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PartState {
    Pending,
    Uploading,
    Succeeded,
    Failed,
}

#[derive(Debug, Error)]
pub enum UploaderError {
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Http(#[from] reqwest::Error),

    #[error("portal rejected request ({status}): {body}")]
    Rejected { status: u16, body: String },

    #[error("part {part_number} failed after {attempts} attempts: {reason}")]
    PartFailed {
        part_number: u32,
        attempts: u32,
        reason: String,
    },
}

/// Wire shape of a successful relay response.
#[derive(serde::Deserialize)]
struct RelayResponse {
    etag: String,
}

pub struct Uploader {
    http: reqwest::Client,
    base_url: String,
    token: String,
}

impl Uploader {
    pub fn new(base_url: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token: token.into(),
        }
    }

    /// Upload `files` in order. `progress` receives the overall percentage
    /// after every part and every completed file; it is clamped to 99 until
    /// the final completion call succeeds.
    ///
    /// The first file that fails aborts the remaining queue.
    pub async fn upload_queue(
        &self,
        project_id: Uuid,
        kind: FileKind,
        folder_id: Option<Uuid>,
        files: &[impl AsRef<Path>],
        mut progress: impl FnMut(f64),
    ) -> Result<Vec<CompleteUploadResponse>, UploaderError> {
        let total_files = files.len();
        let mut results = Vec::with_capacity(total_files);

        for (file_index, path) in files.iter().enumerate() {
            let done = self
                .upload_file(project_id, kind, folder_id, path.as_ref(), |parts_done, total_parts| {
                    progress(overall_progress(
                        file_index,
                        total_files,
                        parts_done,
                        total_parts,
                    ));
                })
                .await?;
            progress(file_completed_progress(file_index, total_files));
            results.push(done);
        }
        Ok(results)
    }

    async fn upload_file(
        &self,
        project_id: Uuid,
        kind: FileKind,
        folder_id: Option<Uuid>,
        path: &Path,
        mut on_part: impl FnMut(usize, usize),
    ) -> Result<CompleteUploadResponse, UploaderError> {
        let size_bytes = tokio::fs::metadata(path).await?.len() as i64;
        let filename = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "unnamed".to_string());

        let plan = self
            .init_session(project_id, kind, folder_id, &filename, size_bytes)
            .await?;
        let ranges = part_ranges(size_bytes as u64, plan.part_size as u64);
        let total_parts = ranges.len();

        info!(
            file = %path.display(),
            size_bytes,
            parts = total_parts,
            key = %plan.key,
            "starting upload"
        );

        let mut states = vec![PartState::Pending; total_parts];
        let mut parts: Vec<CompletedPart> = Vec::with_capacity(total_parts);
        for (index, &(offset, len)) in ranges.iter().enumerate() {
            let part_number = index as u32 + 1;
            states[index] = PartState::Uploading;
            let body = read_part(path, offset, len).await?;
            let etag = self
                .put_part_with_retry(&plan.presigned_part_urls[index], body, part_number)
                .await
                .inspect_err(|_| states[index] = PartState::Failed)?;
            states[index] = PartState::Succeeded;
            parts.push(CompletedPart { etag, part_number });
            on_part(parts.len(), total_parts);
        }
        debug_assert!(states.iter().all(|s| *s == PartState::Succeeded));

        self.complete_session(&plan, parts, &filename, size_bytes, folder_id)
            .await
    }

    async fn init_session(
        &self,
        project_id: Uuid,
        kind: FileKind,
        folder_id: Option<Uuid>,
        filename: &str,
        size_bytes: i64,
    ) -> Result<InitUploadResponse, UploaderError> {
        let url = format!(
            "{}/projects/{}/{}/uploads",
            self.base_url,
            project_id,
            kind_segment(kind)
        );
        let response = self
            .http
            .post(&url)
            .bearer_auth(&self.token)
            .json(&InitUploadRequest {
                filename: filename.to_string(),
                content_type: "application/octet-stream".to_string(),
                size_bytes,
                folder_id,
            })
            .send()
            .await?;
        parse_json(response).await
    }

    /// One part, up to [`MAX_PART_ATTEMPTS`] tries with doubling backoff.
    async fn put_part_with_retry(
        &self,
        presigned_url: &str,
        body: Vec<u8>,
        part_number: u32,
    ) -> Result<String, UploaderError> {
        let relay_url = format!(
            "{}/upload-relay?url={}",
            self.base_url,
            urlencoding::encode(presigned_url)
        );

        let mut last_reason = String::new();
        for attempt in 1..=MAX_PART_ATTEMPTS {
            if attempt > 1 {
                tokio::time::sleep(RETRY_BASE_DELAY * 2u32.pow(attempt - 2)).await;
            }
            match self.put_part(&relay_url, body.clone()).await {
                Ok(etag) => return Ok(etag),
                Err(err) => {
                    warn!(part_number, attempt, error = %err, "part upload attempt failed");
                    last_reason = err.to_string();
                }
            }
        }
        Err(UploaderError::PartFailed {
            part_number,
            attempts: MAX_PART_ATTEMPTS,
            reason: last_reason,
        })
    }

    async fn put_part(&self, relay_url: &str, body: Vec<u8>) -> Result<String, UploaderError> {
        let response = self
            .http
            .put(relay_url)
            .bearer_auth(&self.token)
            .header(CONTENT_TYPE, "application/octet-stream")
            .body(body)
            .send()
            .await?;
        let relay: RelayResponse = parse_json(response).await?;
        Ok(relay.etag)
    }

    async fn complete_session(
        &self,
        plan: &InitUploadResponse,
        parts: Vec<CompletedPart>,
        filename: &str,
        size_bytes: i64,
        folder_id: Option<Uuid>,
    ) -> Result<CompleteUploadResponse, UploaderError> {
        let url = format!("{}{}", self.base_url, plan.complete_url);
        let response = self
            .http
            .post(&url)
            .bearer_auth(&self.token)
            .json(&CompleteUploadRequest {
                key: plan.key.clone(),
                upload_id: plan.upload_id.clone(),
                parts,
                filename: filename.to_string(),
                content_type: "application/octet-stream".to_string(),
                size_bytes,
                folder_id,
            })
            .send()
            .await?;
        parse_json(response).await
    }
}

fn kind_segment(kind: FileKind) -> &'static str {
    match kind {
        FileKind::Asset => "assets",
        FileKind::Delivery => "deliveries",
    }
}

async fn parse_json<T: serde::de::DeserializeOwned>(
    response: reqwest::Response,
) -> Result<T, UploaderError> {
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(UploaderError::Rejected {
            status: status.as_u16(),
            body,
        });
    }
    Ok(response.json().await?)
}

/// Byte ranges `(offset, len)` covering a file of `size` in `part_size`
/// slices; the final slice carries the remainder.
pub fn part_ranges(size: u64, part_size: u64) -> Vec<(u64, u64)> {
    if size == 0 || part_size == 0 {
        return Vec::new();
    }
    let mut ranges = Vec::new();
    let mut offset = 0;
    while offset < size {
        let len = part_size.min(size - offset);
        ranges.push((offset, len));
        offset += len;
    }
    ranges
}

/// Overall queue progress:
/// `((file_index + parts_done/total_parts) / total_files) × 100`, clamped to
/// 99 so only a confirmed completion reports 100.
pub fn overall_progress(
    file_index: usize,
    total_files: usize,
    parts_done: usize,
    total_parts: usize,
) -> f64 {
    if total_files == 0 {
        return 0.0;
    }
    let part_fraction = if total_parts == 0 {
        0.0
    } else {
        parts_done as f64 / total_parts as f64
    };
    let pct = ((file_index as f64 + part_fraction) / total_files as f64) * 100.0;
    pct.min(99.0)
}

/// Progress after a file's completion call succeeded; hits 100 only on the
/// final file.
pub fn file_completed_progress(file_index: usize, total_files: usize) -> f64 {
    if total_files == 0 {
        return 0.0;
    }
    ((file_index + 1) as f64 / total_files as f64) * 100.0
}

async fn read_part(path: &Path, offset: u64, len: u64) -> Result<Vec<u8>, std::io::Error> {
    let mut file = File::open(path).await?;
    file.seek(SeekFrom::Start(offset)).await?;
    let mut buf = vec![0u8; len as usize];
    file.read_exact(&mut buf).await?;
    Ok(buf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn ranges_cover_the_file_with_a_short_tail() {
        let mib = 1024 * 1024;
        let ranges = part_ranges(25 * mib, 10 * mib);
        assert_eq!(
            ranges,
            vec![(0, 10 * mib), (10 * mib, 10 * mib), (20 * mib, 5 * mib)]
        );

        // exact multiple: no tail
        assert_eq!(part_ranges(20 * mib, 10 * mib), vec![(0, 10 * mib), (10 * mib, 10 * mib)]);
        // single short part
        assert_eq!(part_ranges(1, 10 * mib), vec![(0, 1)]);
        // empty file has no parts
        assert!(part_ranges(0, 10 * mib).is_empty());
    }

    #[test]
    fn range_count_matches_ceiling_division() {
        for (size, part_size, expected) in [(25u64, 10u64, 3usize), (30, 10, 3), (9, 10, 1)] {
            assert_eq!(part_ranges(size, part_size).len(), expected);
        }
    }

    #[test]
    fn progress_interpolates_within_the_queue() {
        // first file of two, one of three parts done
        let pct = overall_progress(0, 2, 1, 3);
        assert!((pct - 16.666).abs() < 0.01, "{pct}");

        // second file of two, all parts done but not yet completed: clamped
        assert_eq!(overall_progress(1, 2, 3, 3), 99.0);
        assert_eq!(overall_progress(0, 1, 5, 5), 99.0);

        // completion reports the true percentage
        assert_eq!(file_completed_progress(0, 2), 50.0);
        assert_eq!(file_completed_progress(1, 2), 100.0);
    }

    #[tokio::test]
    async fn parts_reassemble_into_the_original_file() {
        let mut tmp = tempfile::NamedTempFile::new().unwrap();
        let payload: Vec<u8> = (0..25u8).collect();
        tmp.write_all(&payload).unwrap();
        tmp.flush().unwrap();

        let ranges = part_ranges(payload.len() as u64, 10);
        assert_eq!(ranges.len(), 3);

        let mut reassembled = Vec::new();
        for (offset, len) in ranges {
            reassembled.extend(read_part(tmp.path(), offset, len).await.unwrap());
        }
        assert_eq!(reassembled, payload);
    }
}
