//! Upload large assets to a remote object store in resumable chunks, then
//! drive the remote translation of the stored object to a terminal status.

pub mod config;
pub mod errors;
pub mod models;
pub mod services;

pub use errors::{TransferError, TransferResult};
pub use models::{
    credential::Credential,
    job::{JobFailure, JobOutcome, OutputFormat, TranslationStatus},
    object::StoredObject,
    upload::{ChunkDescriptor, UploadProgress, UploadSession},
};
pub use services::{
    chunk_uploader::{ChunkUploader, UploadConfig},
    credentials::{CredentialProvider, StaticCredentials},
    oss::{OssClient, SessionStatus},
    translation::{PollConfig, TranslationJobRunner},
    transport::{HttpRequest, HttpResponse, ReqwestTransport, Transport},
};
