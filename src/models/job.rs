//! Translation jobs and the payloads exchanged with the translation service.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr, time::Duration};

/// Status of a remote translation job.
///
/// The wire names are exactly those the manifest endpoint emits. `Submitted` is a
/// local state for a job whose submission was accepted but not yet observed.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum TranslationStatus {
    #[serde(skip)]
    Submitted,
    Created,
    Pending,
    InProgress,
    Success,
    Failed,
    #[serde(rename = "timeout")]
    TimedOut,
}

impl TranslationStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Success | Self::Failed | Self::TimedOut)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Submitted => "submitted",
            Self::Created => "created",
            Self::Pending => "pending",
            Self::InProgress => "inprogress",
            Self::Success => "success",
            Self::Failed => "failed",
            Self::TimedOut => "timeout",
        }
    }
}

impl fmt::Display for TranslationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownStatus(pub String);

impl fmt::Display for UnknownStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unrecognized translation status `{}`", self.0)
    }
}

impl std::error::Error for UnknownStatus {}

impl FromStr for TranslationStatus {
    type Err = UnknownStatus;

    /// Case-sensitive: only the names the remote emits are accepted.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "created" => Ok(Self::Created),
            "pending" => Ok(Self::Pending),
            "inprogress" => Ok(Self::InProgress),
            "success" => Ok(Self::Success),
            "failed" => Ok(Self::Failed),
            "timeout" => Ok(Self::TimedOut),
            other => Err(UnknownStatus(other.to_string())),
        }
    }
}

/// One remote conversion, owned by the runner that drives it.
#[derive(Clone, Debug)]
pub struct TranslationJob {
    pub source_urn: String,
    pub result_urn: String,
    pub status: TranslationStatus,
    pub created_at: DateTime<Utc>,
}

impl TranslationJob {
    pub fn new(source_urn: impl Into<String>, result_urn: impl Into<String>) -> Self {
        Self {
            source_urn: source_urn.into(),
            result_urn: result_urn.into(),
            status: TranslationStatus::Submitted,
            created_at: Utc::now(),
        }
    }

    /// Moves to `next` unless the job already reached a terminal status.
    /// Returns whether the status changed.
    pub fn transition(&mut self, next: TranslationStatus) -> bool {
        if self.status.is_terminal() || next == TranslationStatus::Submitted || next == self.status
        {
            return false;
        }
        self.status = next;
        true
    }
}

/// Why a job ended without a result.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum JobFailure {
    /// The remote reported `failed` or `timeout`.
    Remote(TranslationStatus),
    /// The manifest could not be fetched, even after retries.
    Unreachable(String),
}

impl fmt::Display for JobFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Remote(status) => write!(f, "remote job ended with status `{}`", status),
            Self::Unreachable(reason) => write!(f, "could not query job status: {}", reason),
        }
    }
}

/// Terminal outcome of a translation run.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum JobOutcome {
    Completed { urn: String },
    Failed { urn: String, cause: JobFailure },
    /// The caller's wall-clock bound elapsed before the remote reached a terminal status.
    TimedOut { urn: String, elapsed: Duration },
}

impl JobOutcome {
    pub fn is_completed(&self) -> bool {
        matches!(self, Self::Completed { .. })
    }

    pub fn urn(&self) -> &str {
        match self {
            Self::Completed { urn } | Self::Failed { urn, .. } | Self::TimedOut { urn, .. } => urn,
        }
    }
}

/// A requested derivative: `type` plus the views to generate.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct OutputFormat {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub views: Vec<String>,
}

impl Default for OutputFormat {
    /// SVF with both 2D and 3D views.
    fn default() -> Self {
        Self {
            kind: "svf".into(),
            views: vec!["2d".into(), "3d".into()],
        }
    }
}

#[derive(Serialize, Debug)]
pub struct JobPayload {
    pub input: JobInput,
    pub output: JobOutput,
}

#[derive(Serialize, Debug)]
pub struct JobInput {
    pub urn: String,
}

#[derive(Serialize, Debug)]
pub struct JobOutput {
    pub formats: Vec<OutputFormat>,
}

impl JobPayload {
    pub fn new(source_urn: impl Into<String>, formats: Vec<OutputFormat>) -> Self {
        Self {
            input: JobInput {
                urn: source_urn.into(),
            },
            output: JobOutput { formats },
        }
    }
}

/// Body of an accepted submission.
#[derive(Deserialize, Debug)]
pub struct SubmitJobResponse {
    /// Initial status as a raw string (`created`, `success`, ...).
    #[serde(default)]
    pub result: Option<String>,
    pub urn: String,
}

/// The subset of the manifest document the runner reads.
#[derive(Deserialize, Debug)]
pub struct Manifest {
    pub status: TranslationStatus,
    #[serde(default)]
    pub progress: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn manifest_status_names_are_exact() {
        for (raw, want) in [
            ("created", TranslationStatus::Created),
            ("pending", TranslationStatus::Pending),
            ("inprogress", TranslationStatus::InProgress),
            ("success", TranslationStatus::Success),
            ("failed", TranslationStatus::Failed),
            ("timeout", TranslationStatus::TimedOut),
        ] {
            let body = format!(r#"{{"status":"{}","progress":"10% complete"}}"#, raw);
            let manifest: Manifest = serde_json::from_str(&body).unwrap();
            assert_eq!(manifest.status, want);
            assert_eq!(raw.parse::<TranslationStatus>().unwrap(), want);
            assert_eq!(want.as_str(), raw);
        }
    }

    #[test]
    fn unknown_or_miscased_status_is_an_error() {
        assert!(serde_json::from_str::<Manifest>(r#"{"status":"Success"}"#).is_err());
        assert!(serde_json::from_str::<Manifest>(r#"{"status":"submitted"}"#).is_err());
        assert!(serde_json::from_str::<Manifest>(r#"{"progress":"1%"}"#).is_err());
        assert_eq!(
            "queued".parse::<TranslationStatus>(),
            Err(UnknownStatus("queued".into()))
        );
    }

    #[test]
    fn terminal_status_is_sticky() {
        let mut job = TranslationJob::new("src", "res");
        assert!(job.transition(TranslationStatus::Pending));
        assert!(job.transition(TranslationStatus::InProgress));
        assert!(job.transition(TranslationStatus::Failed));
        assert!(!job.transition(TranslationStatus::Success));
        assert_eq!(job.status, TranslationStatus::Failed);
    }

    #[test]
    fn default_payload_shape() {
        let payload = JobPayload::new("dXJu", vec![OutputFormat::default()]);
        let value = serde_json::to_value(&payload).unwrap();
        assert_eq!(
            value,
            serde_json::json!({
                "input": {"urn": "dXJu"},
                "output": {"formats": [{"type": "svf", "views": ["2d", "3d"]}]}
            })
        );
    }
}
