//! ChunkUploader: pushes a local payload into the object store.
//!
//! Two paths, deliberately with different failure policies:
//!
//! - **Chunked** ([`ChunkUploader::upload`]): the payload is split into 5 MiB
//!   byte ranges sent strictly in order under one session id. `202` means more
//!   chunks are expected, `200` means the store finalized the object (even if
//!   chunks remain), anything else aborts the upload at that chunk. No retries.
//! - **Whole body** ([`ChunkUploader::upload_whole`]): one PUT of the entire
//!   payload, re-issued until the store answers with a success status and a
//!   readable object. Permanent errors such as 401/403 are re-issued too unless
//!   [`UploadConfig::whole_body_max_attempts`] is set.
//!
//! The credential is fetched before every request; an absent or expired one
//! ends either path with a configuration error.
//!
//! [`ChunkUploader::upload_file`] picks the path from the file size.

use crate::errors::{TransferError, TransferResult, describe_status};
use crate::models::{
    credential::Credential,
    object::StoredObject,
    upload::{CHUNKING_THRESHOLD, UploadProgress, UploadSession},
};
use crate::services::{
    credentials::{CredentialProvider, usable_credential},
    oss::OssClient,
};
use bytes::Bytes;
use reqwest::StatusCode;
use std::{io::ErrorKind, path::Path, sync::Arc, time::Duration};
use tokio::{
    fs::File,
    io::{AsyncRead, AsyncReadExt},
    sync::mpsc,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[derive(Clone, Debug)]
pub struct UploadConfig {
    /// Upper bound on whole-body attempts. `None` re-issues until success.
    pub whole_body_max_attempts: Option<u32>,

    /// Pause between whole-body attempts.
    pub whole_body_retry_delay: Duration,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            whole_body_max_attempts: None,
            whole_body_retry_delay: Duration::from_millis(500),
        }
    }
}

/// Uploads objects into one bucket.
///
/// Holds no per-upload state, so one instance can drive many uploads
/// concurrently; each call owns its session and byte cursor.
#[derive(Clone)]
pub struct ChunkUploader {
    oss: OssClient,
    credentials: Arc<dyn CredentialProvider>,
    bucket: String,
    config: UploadConfig,
    progress: Option<mpsc::UnboundedSender<UploadProgress>>,
    cancel: CancellationToken,
}

impl ChunkUploader {
    pub fn new(
        oss: OssClient,
        credentials: Arc<dyn CredentialProvider>,
        bucket: impl Into<String>,
    ) -> Self {
        Self {
            oss,
            credentials,
            bucket: bucket.into(),
            config: UploadConfig::default(),
            progress: None,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_config(mut self, config: UploadConfig) -> Self {
        self.config = config;
        self
    }

    /// Send progress events to `sender`. The last event of a successful upload
    /// has `finished` set and is the only one at 100%.
    pub fn with_progress(mut self, sender: mpsc::UnboundedSender<UploadProgress>) -> Self {
        self.progress = Some(sender);
        self
    }

    /// Checked between requests; an in-flight request is never interrupted.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    /// Upload a local file, named after its file name. Files of at least
    /// [`CHUNKING_THRESHOLD`] bytes use the chunked path, smaller ones the
    /// whole-body path.
    pub async fn upload_file(&self, path: &Path) -> TransferResult<StoredObject> {
        let object_key = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| {
                TransferError::config(format!("`{}` has no usable file name", path.display()))
            })?
            .to_string();

        let mut file = File::open(path).await?;
        let total_size = file.metadata().await?.len();

        if total_size >= CHUNKING_THRESHOLD {
            self.upload(&object_key, file, total_size).await
        } else {
            let mut buffer = Vec::with_capacity(total_size as usize);
            file.read_to_end(&mut buffer).await?;
            drop(file);
            self.upload_whole(&object_key, Bytes::from(buffer)).await
        }
    }

    /// Chunked upload of `total_size` bytes read sequentially from `source`.
    ///
    /// An existing object with the same key is deleted before the first chunk.
    /// `source` is consumed and dropped on every exit path.
    pub async fn upload<R>(
        &self,
        object_key: &str,
        mut source: R,
        total_size: u64,
    ) -> TransferResult<StoredObject>
    where
        R: AsyncRead + Unpin + Send,
    {
        if total_size == 0 {
            return Err(TransferError::config("cannot upload an empty payload"));
        }
        let credential = usable_credential(self.credentials.as_ref()).await?;
        let session = UploadSession::new(object_key, total_size);

        info!(
            bucket = %self.bucket,
            object_key,
            total_size,
            session_id = %session.session_id,
            chunks = session.chunk_count(),
            "starting chunked upload"
        );

        self.remove_existing(&credential, object_key).await?;

        let mut bytes_sent: u64 = 0;
        for chunk in session.chunks() {
            self.ensure_not_cancelled()?;

            let mut buffer = vec![0u8; chunk.byte_length() as usize];
            source.read_exact(&mut buffer).await.map_err(|err| {
                if err.kind() == ErrorKind::UnexpectedEof {
                    TransferError::ShortRead {
                        index: chunk.index,
                        expected: chunk.byte_length(),
                    }
                } else {
                    TransferError::Io(err)
                }
            })?;

            let credential = usable_credential(self.credentials.as_ref()).await?;
            let response = self
                .oss
                .put_chunk(
                    &credential,
                    &self.bucket,
                    &session,
                    &chunk,
                    Bytes::from(buffer),
                )
                .await
                .map_err(|err| {
                    warn!(index = chunk.index, error = %err, "chunk request failed; aborting upload");
                    TransferError::ChunkFailed {
                        index: chunk.index,
                        source: Box::new(err),
                    }
                })?;
            bytes_sent += chunk.byte_length();

            match response.status {
                StatusCode::ACCEPTED => {
                    if bytes_sent >= total_size {
                        break;
                    }
                    let progress = UploadProgress::new(bytes_sent, total_size);
                    debug!(
                        index = chunk.index,
                        range = %chunk.content_range(total_size),
                        percent = progress.percent(),
                        "chunk accepted"
                    );
                    self.emit(progress);
                }
                StatusCode::OK => {
                    let object = response.json::<StoredObject>()?;
                    info!(
                        object_key,
                        object_id = %object.object_id,
                        chunks_sent = chunk.index + 1,
                        "chunked upload finalized"
                    );
                    self.emit(UploadProgress::finished(total_size));
                    return Ok(object);
                }
                status => {
                    warn!(index = chunk.index, %status, "chunk rejected; aborting upload");
                    return Err(TransferError::ChunkRejected {
                        index: chunk.index,
                        status,
                        message: describe_status(status).to_string(),
                    });
                }
            }
        }

        warn!(object_key, session_id = %session.session_id, "store never finalized the upload");
        Err(TransferError::NotFinalized {
            session_id: session.session_id,
            total_size,
        })
    }

    /// Single-request upload, re-issued until a success status is observed.
    pub async fn upload_whole(&self, object_key: &str, body: Bytes) -> TransferResult<StoredObject> {
        let total_size = body.len() as u64;
        if total_size == 0 {
            return Err(TransferError::config("cannot upload an empty payload"));
        }

        let mut attempt: u32 = 0;
        loop {
            self.ensure_not_cancelled()?;
            let credential = usable_credential(self.credentials.as_ref()).await?;
            attempt += 1;
            if attempt == 1 {
                info!(bucket = %self.bucket, object_key, total_size, "starting whole-body upload");
                self.emit(UploadProgress::new(0, total_size));
            }

            let last_error = match self
                .oss
                .put_object(&credential, &self.bucket, object_key, body.clone())
                .await
            {
                Ok(response) if response.is_success() => match response.json::<StoredObject>() {
                    Ok(object) => {
                        info!(object_key, attempt, object_id = %object.object_id, "whole-body upload stored");
                        self.emit(UploadProgress::finished(total_size));
                        return Ok(object);
                    }
                    Err(err) => {
                        warn!(object_key, attempt, error = %err, "whole-body upload answered with an unreadable object; re-issuing");
                        err
                    }
                },
                Ok(response) => {
                    warn!(object_key, attempt, status = %response.status, "whole-body upload not accepted; re-issuing");
                    TransferError::status(response.status, &response.text())
                }
                Err(err @ TransferError::Config(_)) => return Err(err),
                Err(err) => {
                    warn!(object_key, attempt, error = %err, "whole-body upload failed; re-issuing");
                    err
                }
            };

            if let Some(max) = self.config.whole_body_max_attempts {
                if attempt >= max {
                    return Err(last_error);
                }
            }

            tokio::select! {
                _ = self.cancel.cancelled() => return Err(TransferError::Cancelled),
                _ = tokio::time::sleep(self.config.whole_body_retry_delay) => {}
            }
        }
    }

    /// Delete `object_key` if the store already holds it.
    async fn remove_existing(&self, credential: &Credential, object_key: &str) -> TransferResult<()> {
        self.ensure_not_cancelled()?;
        let existing = self
            .oss
            .object_details(credential, &self.bucket, object_key)
            .await?;

        if let Some(existing) = existing {
            self.ensure_not_cancelled()?;
            debug!(object_key, size = existing.size, "deleting existing object before upload");
            self.oss
                .delete_object(credential, &self.bucket, object_key)
                .await?;
        }
        Ok(())
    }

    fn ensure_not_cancelled(&self) -> TransferResult<()> {
        if self.cancel.is_cancelled() {
            Err(TransferError::Cancelled)
        } else {
            Ok(())
        }
    }

    fn emit(&self, progress: UploadProgress) {
        if let Some(sender) = &self.progress {
            // A dropped receiver only means nobody is watching.
            let _ = sender.send(progress);
        }
    }
}
