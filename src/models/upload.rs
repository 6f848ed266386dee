//! Resumable upload sessions and the byte-range chunks they are split into.

use serde::Serialize;

/// Fixed chunk size of the resumable protocol: 5 MiB.
pub const CHUNK_SIZE: u64 = 5 * 1024 * 1024;

/// Files of at least this many bytes go through the chunked protocol; smaller
/// ones are sent as a single body.
pub const CHUNKING_THRESHOLD: u64 = CHUNK_SIZE;

/// One resumable upload attempt.
///
/// `session_id` is derived from `(object_key, total_size)` only, so a retried
/// upload of an identical file reuses the same session identity. A session never
/// outlives the upload call that created it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct UploadSession {
    pub object_key: String,
    pub total_size: u64,
    pub chunk_size: u64,
    pub session_id: String,
}

impl UploadSession {
    pub fn new(object_key: impl Into<String>, total_size: u64) -> Self {
        Self::with_chunk_size(object_key, total_size, CHUNK_SIZE)
    }

    pub(crate) fn with_chunk_size(
        object_key: impl Into<String>,
        total_size: u64,
        chunk_size: u64,
    ) -> Self {
        let object_key = object_key.into();
        let session_id = session_id_for(&object_key, total_size);
        Self {
            object_key,
            total_size,
            chunk_size,
            session_id,
        }
    }

    /// `ceil(total_size / chunk_size)`.
    pub fn chunk_count(&self) -> u64 {
        self.total_size.div_ceil(self.chunk_size)
    }

    pub fn chunks(&self) -> impl Iterator<Item = ChunkDescriptor> + '_ {
        plan_chunks(self.total_size, self.chunk_size)
    }
}

/// Deterministic session id: `SI` followed by the MD5 of `{object_key}/{total_size}`.
pub fn session_id_for(object_key: &str, total_size: u64) -> String {
    let digest = md5::compute(format!("{}/{}", object_key, total_size));
    format!("SI{:x}", digest)
}

/// One contiguous byte range of an upload. `end_byte` is inclusive.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct ChunkDescriptor {
    pub index: u64,
    pub start_byte: u64,
    pub end_byte: u64,
}

impl ChunkDescriptor {
    pub fn byte_length(&self) -> u64 {
        self.end_byte - self.start_byte + 1
    }

    /// Value of the `Content-Range` header: `bytes {start}-{end}/{total}`.
    pub fn content_range(&self, total_size: u64) -> String {
        format!("bytes {}-{}/{}", self.start_byte, self.end_byte, total_size)
    }
}

/// Splits `[0, total_size - 1]` into contiguous, non-overlapping ranges of
/// `chunk_size` bytes. The last range always ends at `total_size - 1`.
pub fn plan_chunks(total_size: u64, chunk_size: u64) -> impl Iterator<Item = ChunkDescriptor> {
    assert!(chunk_size > 0, "chunk size must be positive");
    let count = total_size.div_ceil(chunk_size);
    (0..count).map(move |index| {
        let start_byte = index * chunk_size;
        let end_byte = (start_byte + chunk_size).min(total_size) - 1;
        ChunkDescriptor {
            index,
            start_byte,
            end_byte,
        }
    })
}

/// Cumulative progress of one upload.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct UploadProgress {
    pub bytes_sent: u64,
    pub total_size: u64,
    /// Set only on the terminal success event.
    pub finished: bool,
}

impl UploadProgress {
    pub fn new(bytes_sent: u64, total_size: u64) -> Self {
        Self {
            bytes_sent,
            total_size,
            finished: false,
        }
    }

    pub fn finished(total_size: u64) -> Self {
        Self {
            bytes_sent: total_size,
            total_size,
            finished: true,
        }
    }

    /// `floor(100 * bytes_sent / total_size)`.
    pub fn percent(&self) -> u8 {
        if self.total_size == 0 {
            return if self.finished { 100 } else { 0 };
        }
        let pct = (self.bytes_sent as u128 * 100) / self.total_size as u128;
        pct.min(100) as u8
    }
}
