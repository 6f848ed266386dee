//! Error taxonomy shared by the uploader and the translation runner.

use reqwest::StatusCode;
use std::io;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TransferError {
    /// Missing or expired credential, malformed endpoint, bad arguments.
    #[error("configuration error: {0}")]
    Config(String),

    /// The remote answered with a status the operation does not accept.
    #[error("HTTP {status}: {message}")]
    Status { status: StatusCode, message: String },

    /// The request never produced a response.
    #[error("transport failure: {0}")]
    Transport(String),

    /// A response body was missing a field or could not be parsed.
    #[error("unexpected response: {0}")]
    Protocol(String),

    /// A chunk was answered with something other than accepted-partial or accepted-final.
    #[error("chunk {index} rejected with HTTP {status}: {message}")]
    ChunkRejected {
        index: u64,
        status: StatusCode,
        message: String,
    },

    /// A chunk request never produced an answer the uploader could read.
    #[error("chunk {index} failed: {source}")]
    ChunkFailed {
        index: u64,
        #[source]
        source: Box<TransferError>,
    },

    #[error("source ended early while reading chunk {index}: expected {expected} bytes")]
    ShortRead { index: u64, expected: u64 },

    #[error("all {total_size} bytes of session `{session_id}` were sent but the object was not finalized")]
    NotFinalized { session_id: String, total_size: u64 },

    #[error("operation cancelled")]
    Cancelled,

    #[error(transparent)]
    Io(#[from] io::Error),
}

pub type TransferResult<T> = Result<T, TransferError>;

impl TransferError {
    /// Build a `Status` error, filling the message from the status table when the
    /// remote body is empty.
    pub fn status(status: StatusCode, body: &str) -> Self {
        let message = if body.trim().is_empty() {
            describe_status(status).to_string()
        } else {
            format!("{} ({})", describe_status(status), body.trim())
        };
        Self::Status { status, message }
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn protocol(msg: impl Into<String>) -> Self {
        Self::Protocol(msg.into())
    }

    /// Errors about *asking* the remote, as opposed to the remote's answer about a job.
    /// The polling loop retries these; configuration errors and cancellation are final.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Status { .. } | Self::Transport(_) | Self::Protocol(_)
        )
    }

    pub fn status_code(&self) -> Option<StatusCode> {
        match self {
            Self::Status { status, .. } | Self::ChunkRejected { status, .. } => Some(*status),
            Self::ChunkFailed { source, .. } => source.status_code(),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for TransferError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_builder() {
            TransferError::Config(err.to_string())
        } else if err.is_decode() {
            TransferError::Protocol(err.to_string())
        } else {
            TransferError::Transport(err.to_string())
        }
    }
}

impl From<serde_json::Error> for TransferError {
    fn from(err: serde_json::Error) -> Self {
        TransferError::Protocol(err.to_string())
    }
}

/// Human description of the statuses the object store and translation service document.
pub fn describe_status(status: StatusCode) -> &'static str {
    match status {
        StatusCode::BAD_REQUEST => {
            "the request could not be understood by the server due to malformed syntax or missing request headers"
        }
        StatusCode::UNAUTHORIZED => {
            "the supplied authorization header was not valid or the token scope was not acceptable"
        }
        StatusCode::FORBIDDEN => {
            "the authorization was validated but permission is not granted"
        }
        StatusCode::NOT_FOUND => "the requested resource does not exist",
        StatusCode::CONFLICT => "the request conflicts with the current state of the resource",
        StatusCode::INTERNAL_SERVER_ERROR => "internal failure while processing the request",
        _ => "unknown error occurred",
    }
}
