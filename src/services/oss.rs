//! OssClient: the object-store calls the uploader needs.
//!
//! Every method builds a new request from the immutable base URL and the
//! credential it is given; nothing is cached between calls. Object keys are
//! percent-encoded as single path segments, so `a/b.rvt` is one object.

use crate::errors::{TransferError, TransferResult};
use crate::models::{
    credential::Credential,
    object::StoredObject,
    upload::{ChunkDescriptor, UploadSession},
};
use crate::services::transport::{HttpRequest, HttpResponse, Transport};
use bytes::Bytes;
use reqwest::{
    StatusCode, Url,
    header::{CONTENT_RANGE, CONTENT_TYPE, HeaderName},
};
use std::sync::Arc;
use tracing::debug;

/// Header correlating the chunks of one resumable upload.
pub const SESSION_ID_HEADER: HeaderName = HeaderName::from_static("session-id");

const MAX_OBJECT_KEY_LEN: usize = 1024;
const BUCKET_KEY_MIN_LEN: usize = 3;
const BUCKET_KEY_MAX_LEN: usize = 128;

/// What the store has received so far for a resumable session.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SessionStatus {
    /// The object is finalized.
    Complete,
    /// Inclusive byte ranges received so far.
    Partial(Vec<(u64, u64)>),
}

#[derive(Clone)]
pub struct OssClient {
    transport: Arc<dyn Transport>,
    base_url: Url,
}

impl OssClient {
    pub fn new(transport: Arc<dyn Transport>, base_url: Url) -> Self {
        Self {
            transport,
            base_url,
        }
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// `…/oss/v2/buckets/{bucket}/objects/{key}` followed by `extra` segments.
    fn object_url(&self, bucket: &str, key: &str, extra: &[&str]) -> TransferResult<Url> {
        ensure_bucket_key_safe(bucket)?;
        ensure_key_safe(key)?;
        let mut segments = vec!["oss", "v2", "buckets", bucket, "objects", key];
        segments.extend_from_slice(extra);
        endpoint(&self.base_url, &segments)
    }

    /// Look up an object. `Ok(None)` when the store answers 404.
    pub async fn object_details(
        &self,
        credential: &Credential,
        bucket: &str,
        key: &str,
    ) -> TransferResult<Option<StoredObject>> {
        let url = self.object_url(bucket, key, &["details"])?;
        let response = self
            .transport
            .execute(HttpRequest::get(url).authorized(credential)?)
            .await?;

        if response.status == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let object = response.error_for_status()?.json::<StoredObject>()?;
        Ok(Some(object))
    }

    /// Delete an object. A 404 means it is already gone and counts as success.
    pub async fn delete_object(
        &self,
        credential: &Credential,
        bucket: &str,
        key: &str,
    ) -> TransferResult<()> {
        let url = self.object_url(bucket, key, &[])?;
        let response = self
            .transport
            .execute(HttpRequest::delete(url).authorized(credential)?)
            .await?;

        if response.status == StatusCode::NOT_FOUND {
            debug!(bucket, key, "object already missing on delete");
            return Ok(());
        }
        response.error_for_status()?;
        Ok(())
    }

    /// Single whole-body PUT. The raw response is returned so the caller decides
    /// what a non-success status means.
    pub async fn put_object(
        &self,
        credential: &Credential,
        bucket: &str,
        key: &str,
        body: Bytes,
    ) -> TransferResult<HttpResponse> {
        let url = self.object_url(bucket, key, &[])?;
        let request = HttpRequest::put(url)
            .authorized(credential)?
            .header(CONTENT_TYPE, "application/octet-stream")?
            .body(body);
        self.transport.execute(request).await
    }

    /// One resumable chunk: `Content-Range: bytes {start}-{end}/{total}` and the
    /// session id header, raw bytes as the body. Returns the raw response.
    pub async fn put_chunk(
        &self,
        credential: &Credential,
        bucket: &str,
        session: &UploadSession,
        chunk: &ChunkDescriptor,
        body: Bytes,
    ) -> TransferResult<HttpResponse> {
        let url = self.object_url(bucket, &session.object_key, &["resumable"])?;
        let request = HttpRequest::put(url)
            .authorized(credential)?
            .header(CONTENT_TYPE, "application/octet-stream")?
            .header(CONTENT_RANGE, &chunk.content_range(session.total_size))?
            .header(SESSION_ID_HEADER, &session.session_id)?
            .body(body);
        self.transport.execute(request).await
    }

    /// Ask the store which ranges of a resumable session it holds.
    pub async fn session_status(
        &self,
        credential: &Credential,
        bucket: &str,
        key: &str,
        session_id: &str,
    ) -> TransferResult<SessionStatus> {
        let url = self.object_url(bucket, key, &["status", session_id])?;
        let response = self
            .transport
            .execute(HttpRequest::get(url).authorized(credential)?)
            .await?
            .error_for_status()?;

        if response.status == StatusCode::OK {
            return Ok(SessionStatus::Complete);
        }
        let ranges = response
            .header_str("range")
            .map(parse_ranges)
            .transpose()?
            .unwrap_or_default();
        Ok(SessionStatus::Partial(ranges))
    }
}

/// Append percent-encoded path segments to `base`.
pub(crate) fn endpoint(base: &Url, segments: &[&str]) -> TransferResult<Url> {
    let mut url = base.clone();
    {
        let mut path = url
            .path_segments_mut()
            .map_err(|_| TransferError::config(format!("`{}` cannot be used as a base URL", base)))?;
        path.pop_if_empty();
        path.extend(segments);
    }
    Ok(url)
}

/// Parse `bytes=0-99,200-299` (the `bytes ` form is accepted too).
fn parse_ranges(raw: &str) -> TransferResult<Vec<(u64, u64)>> {
    let list = raw
        .trim()
        .strip_prefix("bytes=")
        .or_else(|| raw.trim().strip_prefix("bytes "))
        .unwrap_or(raw.trim());

    list.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|range| {
            let (start, end) = range
                .split_once('-')
                .ok_or_else(|| TransferError::protocol(format!("malformed range `{}`", range)))?;
            let start = start
                .trim()
                .parse::<u64>()
                .map_err(|_| TransferError::protocol(format!("malformed range `{}`", range)))?;
            let end = end
                .trim()
                .parse::<u64>()
                .map_err(|_| TransferError::protocol(format!("malformed range `{}`", range)))?;
            Ok((start, end))
        })
        .collect()
}

/// Reject keys the store would refuse or that would not survive as one path segment.
fn ensure_key_safe(key: &str) -> TransferResult<()> {
    if key.is_empty() || key.len() > MAX_OBJECT_KEY_LEN {
        return Err(TransferError::config(format!(
            "object key must be 1-{} bytes",
            MAX_OBJECT_KEY_LEN
        )));
    }
    if key == "." || key == ".." {
        return Err(TransferError::config("object key cannot be `.` or `..`"));
    }
    if key.bytes().any(|b| b.is_ascii_control()) {
        return Err(TransferError::config(
            "object key cannot contain control characters",
        ));
    }
    Ok(())
}

/// Bucket keys: 3-128 characters of `[-_.a-z0-9]`.
fn ensure_bucket_key_safe(bucket: &str) -> TransferResult<()> {
    let len = bucket.len();
    if !(BUCKET_KEY_MIN_LEN..=BUCKET_KEY_MAX_LEN).contains(&len) {
        return Err(TransferError::config(format!(
            "bucket key `{}` must be between {} and {} characters",
            bucket, BUCKET_KEY_MIN_LEN, BUCKET_KEY_MAX_LEN
        )));
    }
    if !bucket
        .chars()
        .all(|c| matches!(c, 'a'..='z' | '0'..='9' | '.' | '-' | '_'))
    {
        return Err(TransferError::config(format!(
            "bucket key `{}` may only contain lowercase letters, digits, dots, hyphens and underscores",
            bucket
        )));
    }
    Ok(())
}
