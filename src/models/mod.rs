//! Core data models for uploads and translation jobs.
//!
//! These types describe what travels over the wire (camelCase JSON from the
//! store, lowercase status names from the translation service) and the local
//! bookkeeping of one upload or one job.

pub mod credential;
pub mod job;
pub mod object;
pub mod upload;
