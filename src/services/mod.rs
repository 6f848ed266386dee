//! Remote-facing services: the transport seam, credential lookup, the object
//! store client, and the two long-running operations built on them.

pub mod chunk_uploader;
pub mod credentials;
pub mod oss;
pub mod translation;
pub mod transport;
