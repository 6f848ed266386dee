//! TranslationJobRunner: submits a conversion job and polls its manifest until
//! the job reaches a terminal status.
//!
//! Polling sleeps on a bounded exponential schedule between requests. A failed
//! *request* (network error, non-2xx, unreadable manifest) is retried up to
//! [`PollConfig::max_transport_retries`] consecutive times before the run ends as
//! [`JobFailure::Unreachable`]; a `failed`/`timeout` status from the remote ends
//! it immediately as [`JobFailure::Remote`]. The optional wall-clock deadline is
//! reported separately as [`JobOutcome::TimedOut`].

use crate::errors::{TransferError, TransferResult};
use crate::models::{
    credential::Credential,
    job::{
        JobFailure, JobOutcome, JobPayload, Manifest, OutputFormat, SubmitJobResponse,
        TranslationJob, TranslationStatus,
    },
    object::StoredObject,
};
use crate::services::{
    credentials::{CredentialProvider, usable_credential},
    oss::endpoint,
    transport::{HttpRequest, Transport},
};
use reqwest::{Url, header::HeaderName};
use std::{sync::Arc, time::Duration};
use tokio::{task::JoinHandle, time::Instant};
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, info, info_span, warn};
use uuid::Uuid;

/// Asks the service to regenerate derivatives that already exist.
const FORCE_HEADER: HeaderName = HeaderName::from_static("x-ads-force");

/// Floor for every delay between manifest requests.
const MIN_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Polling schedule and safety nets.
///
/// Both intervals are raised to at least 100 ms, so a zero setting still waits
/// between requests.
#[derive(Clone, Debug)]
pub struct PollConfig {
    /// Delay before the first manifest request.
    pub initial_interval: Duration,

    /// Cap for the growing delay.
    pub max_interval: Duration,

    /// Growth factor applied after every poll.
    pub multiplier: u32,

    /// Wall-clock bound for the whole run. `None` polls until the remote answers.
    pub deadline: Option<Duration>,

    /// Consecutive failed manifest requests tolerated before giving up.
    pub max_transport_retries: u32,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            initial_interval: Duration::from_secs(2),
            max_interval: Duration::from_secs(30),
            multiplier: 2,
            deadline: Some(Duration::from_secs(30 * 60)),
            max_transport_retries: 5,
        }
    }
}

/// Exponential delay, capped at `max_interval`.
#[derive(Debug)]
struct Backoff {
    next: Duration,
    max: Duration,
    multiplier: u32,
}

impl Backoff {
    fn new(config: &PollConfig) -> Self {
        let max = config.max_interval.max(MIN_POLL_INTERVAL);
        Self {
            next: config.initial_interval.clamp(MIN_POLL_INTERVAL, max),
            max,
            multiplier: config.multiplier.max(1),
        }
    }

    fn next_delay(&mut self) -> Duration {
        let current = self.next;
        self.next = current
            .checked_mul(self.multiplier)
            .unwrap_or(self.max)
            .min(self.max);
        current
    }
}

/// Drives one translation at a time per [`run`](Self::run) call; the runner
/// itself holds no job state and may be shared.
#[derive(Clone)]
pub struct TranslationJobRunner {
    transport: Arc<dyn Transport>,
    credentials: Arc<dyn CredentialProvider>,
    base_url: Url,
    formats: Vec<OutputFormat>,
    force: bool,
    config: PollConfig,
    cancel: CancellationToken,
}

impl TranslationJobRunner {
    pub fn new(
        transport: Arc<dyn Transport>,
        credentials: Arc<dyn CredentialProvider>,
        base_url: Url,
    ) -> Self {
        Self {
            transport,
            credentials,
            base_url,
            formats: vec![OutputFormat::default()],
            force: false,
            config: PollConfig::default(),
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_config(mut self, config: PollConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_formats(mut self, formats: Vec<OutputFormat>) -> Self {
        self.formats = formats;
        self
    }

    pub fn with_force(mut self, force: bool) -> Self {
        self.force = force;
        self
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// Translate an uploaded object.
    pub async fn run_for(&self, object: &StoredObject) -> TransferResult<JobOutcome> {
        self.run(&object.urn()).await
    }

    /// Submit a job for `source_urn` and poll until it is terminal.
    ///
    /// `Err` is returned only when the job could not be submitted, the
    /// credential is or becomes unusable, or the run was cancelled. The
    /// credential is fetched again before every request. Everything after a
    /// successful submission resolves to a [`JobOutcome`].
    pub async fn run(&self, source_urn: &str) -> TransferResult<JobOutcome> {
        let run_id = Uuid::new_v4();
        self.drive(source_urn)
            .instrument(info_span!("translation", %run_id, source_urn))
            .await
    }

    /// Run on a background task; the handle resolves once with the outcome.
    pub fn spawn(self, source_urn: String) -> JoinHandle<TransferResult<JobOutcome>> {
        tokio::spawn(async move { self.run(&source_urn).await })
    }

    async fn drive(&self, source_urn: &str) -> TransferResult<JobOutcome> {
        let credential = usable_credential(self.credentials.as_ref()).await?;
        self.ensure_not_cancelled()?;

        let submitted = self.submit(&credential, source_urn).await?;
        let mut job = TranslationJob::new(source_urn, submitted.urn);
        if let Some(result) = submitted.result.as_deref() {
            match result.parse::<TranslationStatus>() {
                Ok(initial) => {
                    job.transition(initial);
                }
                Err(err) => debug!(%err, "ignoring submission result"),
            }
        }
        info!(result_urn = %job.result_urn, status = %job.status, "translation submitted");

        let started = Instant::now();
        let mut backoff = Backoff::new(&self.config);
        let mut consecutive_failures: u32 = 0;

        while !job.status.is_terminal() {
            let mut delay = backoff.next_delay();
            if let Some(deadline) = self.config.deadline {
                delay = delay.min(deadline.saturating_sub(started.elapsed()));
            }
            tokio::select! {
                _ = self.cancel.cancelled() => return Err(TransferError::Cancelled),
                _ = tokio::time::sleep(delay) => {}
            }

            if let Some(deadline) = self.config.deadline {
                let elapsed = started.elapsed();
                if elapsed >= deadline {
                    warn!(result_urn = %job.result_urn, status = %job.status, ?elapsed, "translation deadline reached");
                    return Ok(JobOutcome::TimedOut {
                        urn: job.result_urn,
                        elapsed,
                    });
                }
            }

            let credential = usable_credential(self.credentials.as_ref())
                .await
                .inspect_err(|err| warn!(error = %err, "credential unusable; stopping translation"))?;
            match self.fetch_manifest(&credential, &job.result_urn).await {
                Ok(manifest) => {
                    consecutive_failures = 0;
                    if job.transition(manifest.status) {
                        debug!(status = %job.status, progress = ?manifest.progress, "translation status changed");
                    }
                }
                Err(err) if err.is_retryable() => {
                    consecutive_failures += 1;
                    if consecutive_failures > self.config.max_transport_retries {
                        warn!(error = %err, attempts = consecutive_failures, "giving up on manifest polling");
                        return Ok(JobOutcome::Failed {
                            urn: job.result_urn,
                            cause: JobFailure::Unreachable(err.to_string()),
                        });
                    }
                    warn!(error = %err, attempt = consecutive_failures, "manifest request failed; retrying");
                }
                Err(err) => return Err(err),
            }
        }

        let outcome = match job.status {
            TranslationStatus::Success => JobOutcome::Completed {
                urn: job.result_urn,
            },
            status => JobOutcome::Failed {
                urn: job.result_urn,
                cause: JobFailure::Remote(status),
            },
        };
        info!(?outcome, "translation finished");
        Ok(outcome)
    }

    async fn submit(
        &self,
        credential: &Credential,
        source_urn: &str,
    ) -> TransferResult<SubmitJobResponse> {
        let url = endpoint(
            &self.base_url,
            &["modelderivative", "v2", "designdata", "job"],
        )?;
        let payload = JobPayload::new(source_urn, self.formats.clone());
        let mut request = HttpRequest::post(url).authorized(credential)?.json(&payload)?;
        if self.force {
            request = request.header(FORCE_HEADER, "true")?;
        }

        let response = self.transport.execute(request).await?.error_for_status()?;
        response.json::<SubmitJobResponse>()
    }

    async fn fetch_manifest(&self, credential: &Credential, urn: &str) -> TransferResult<Manifest> {
        let url = endpoint(
            &self.base_url,
            &["modelderivative", "v2", "designdata", urn, "manifest"],
        )?;
        let response = self
            .transport
            .execute(HttpRequest::get(url).authorized(credential)?)
            .await?
            .error_for_status()?;
        response.json::<Manifest>()
    }

    fn ensure_not_cancelled(&self) -> TransferResult<()> {
        if self.cancel.is_cancelled() {
            Err(TransferError::Cancelled)
        } else {
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::credentials::{StaticCredentials, scripted::RotatingCredentials};
    use crate::services::transport::{
        HttpResponse,
        scripted::{ScriptedTransport, empty, json},
    };
    use chrono::Duration as ChronoDuration;
    use reqwest::{Method, StatusCode};
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// One scripted manifest reply.
    #[derive(Clone, Copy)]
    enum Step {
        Status(&'static str),
        Http(StatusCode),
        Garbage,
        Unreachable,
    }

    fn reply(step: Step) -> TransferResult<HttpResponse> {
        match step {
            Step::Status(status) => manifest(status),
            Step::Http(code) => empty(code),
            Step::Garbage => Ok(HttpResponse::new(StatusCode::OK, "not json")),
            Step::Unreachable => Err(TransferError::Transport("connection reset".into())),
        }
    }

    fn manifest(status: &str) -> TransferResult<HttpResponse> {
        json(
            StatusCode::OK,
            serde_json::json!({"status": status, "progress": "0% complete"}),
        )
    }

    /// Submission accepted as `created` with `result-urn`; manifest replies
    /// follow `script`, repeating the last step.
    fn scripted(script: Vec<Step>) -> Arc<ScriptedTransport> {
        let polls = AtomicUsize::new(0);
        Arc::new(ScriptedTransport::new(move |req| {
            if req.method == Method::POST {
                return json(
                    StatusCode::OK,
                    serde_json::json!({"result": "created", "urn": "result-urn"}),
                );
            }
            let n = polls.fetch_add(1, Ordering::SeqCst);
            reply(script[n.min(script.len() - 1)])
        }))
    }

    fn runner(transport: Arc<ScriptedTransport>) -> TranslationJobRunner {
        let creds = StaticCredentials::new(Credential::bearer("tok", ChronoDuration::hours(1)));
        runner_with_credentials(transport, Arc::new(creds))
    }

    fn runner_with_credentials(
        transport: Arc<ScriptedTransport>,
        credentials: Arc<dyn CredentialProvider>,
    ) -> TranslationJobRunner {
        TranslationJobRunner::new(
            transport,
            credentials,
            Url::parse("https://forge.test/").unwrap(),
        )
        .with_config(PollConfig {
            initial_interval: Duration::from_secs(1),
            max_interval: Duration::from_secs(8),
            multiplier: 2,
            deadline: Some(Duration::from_secs(120)),
            max_transport_retries: 2,
        })
    }

    fn polls(transport: &ScriptedTransport) -> usize {
        transport.count(&Method::GET, "/manifest")
    }

    #[test]
    fn backoff_grows_to_cap() {
        let mut backoff = Backoff::new(&PollConfig {
            initial_interval: Duration::from_secs(1),
            max_interval: Duration::from_secs(5),
            multiplier: 2,
            deadline: None,
            max_transport_retries: 0,
        });
        let delays: Vec<u64> = (0..5).map(|_| backoff.next_delay().as_secs()).collect();
        assert_eq!(delays, vec![1, 2, 4, 5, 5]);
    }

    #[test]
    fn zero_intervals_are_raised_to_the_floor() {
        let mut backoff = Backoff::new(&PollConfig {
            initial_interval: Duration::ZERO,
            max_interval: Duration::ZERO,
            multiplier: 2,
            deadline: None,
            max_transport_retries: 0,
        });
        assert_eq!(backoff.next_delay(), MIN_POLL_INTERVAL);
        assert_eq!(backoff.next_delay(), MIN_POLL_INTERVAL);
    }

    #[tokio::test(start_paused = true)]
    async fn zero_interval_config_still_waits_between_polls() {
        let transport = scripted(vec![Step::Status("inprogress")]);
        let outcome = runner(transport.clone())
            .with_config(PollConfig {
                initial_interval: Duration::ZERO,
                max_interval: Duration::ZERO,
                multiplier: 2,
                deadline: Some(Duration::from_secs(2)),
                max_transport_retries: 2,
            })
            .run("src")
            .await
            .unwrap();

        assert!(matches!(outcome, JobOutcome::TimedOut { .. }));
        let n = polls(&transport);
        assert!(n <= 20, "polled {n} times in two seconds");
    }

    #[tokio::test(start_paused = true)]
    async fn completes_after_in_progress_polls() {
        let transport = scripted(vec![
            Step::Status("inprogress"),
            Step::Status("inprogress"),
            Step::Status("success"),
        ]);
        let outcome = runner(transport.clone()).run("c291cmNl").await.unwrap();

        assert_eq!(
            outcome,
            JobOutcome::Completed {
                urn: "result-urn".into()
            }
        );
        assert_eq!(polls(&transport), 3);

        let requests = transport.requests();
        assert_eq!(requests[0].url.path(), "/modelderivative/v2/designdata/job");
        let body: serde_json::Value =
            serde_json::from_slice(requests[0].body.as_ref().unwrap()).unwrap();
        assert_eq!(body["input"]["urn"], "c291cmNl");
        assert_eq!(body["output"]["formats"][0]["type"], "svf");
        assert!(requests[0].header_str("x-ads-force").is_none());
        assert_eq!(
            requests[1].url.path(),
            "/modelderivative/v2/designdata/result-urn/manifest"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn remote_failure_is_terminal() {
        let transport = scripted(vec![Step::Status("pending"), Step::Status("failed")]);
        let outcome = runner(transport.clone()).run("src").await.unwrap();
        assert_eq!(
            outcome,
            JobOutcome::Failed {
                urn: "result-urn".into(),
                cause: JobFailure::Remote(TranslationStatus::Failed),
            }
        );
        assert_eq!(polls(&transport), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn remote_timeout_status_is_a_failure() {
        let transport = scripted(vec![Step::Status("timeout")]);
        let outcome = runner(transport).run("src").await.unwrap();
        assert!(matches!(
            outcome,
            JobOutcome::Failed {
                cause: JobFailure::Remote(TranslationStatus::TimedOut),
                ..
            }
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn endless_progress_hits_the_deadline() {
        let transport = scripted(vec![Step::Status("inprogress")]);
        let outcome = runner(transport.clone()).run("src").await.unwrap();

        match outcome {
            JobOutcome::TimedOut { urn, elapsed } => {
                assert_eq!(urn, "result-urn");
                assert!(elapsed >= Duration::from_secs(120));
                assert!(elapsed < Duration::from_secs(130));
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
        // 1 + 2 + 4 + 8 * n seconds until 120s: bounded, not a spin.
        let n = polls(&transport);
        assert!(n > 3 && n < 20, "polled {n} times");
    }

    #[tokio::test(start_paused = true)]
    async fn transient_request_errors_are_retried() {
        let transport = scripted(vec![
            Step::Unreachable,
            Step::Http(StatusCode::BAD_GATEWAY),
            Step::Status("inprogress"),
            Step::Garbage,
            Step::Status("success"),
        ]);
        let outcome = runner(transport.clone()).run("src").await.unwrap();
        assert!(outcome.is_completed());
        assert_eq!(polls(&transport), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn persistent_request_errors_resolve_to_failed() {
        let transport = scripted(vec![Step::Http(StatusCode::SERVICE_UNAVAILABLE)]);
        let outcome = runner(transport.clone()).run("src").await.unwrap();
        match outcome {
            JobOutcome::Failed {
                cause: JobFailure::Unreachable(reason),
                ..
            } => assert!(reason.contains("503")),
            other => panic!("unexpected outcome: {other:?}"),
        }
        // initial attempt plus two retries
        assert_eq!(polls(&transport), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn unknown_status_is_treated_as_request_error() {
        let transport = scripted(vec![Step::Status("queued")]);
        let outcome = runner(transport).run("src").await.unwrap();
        assert!(matches!(
            outcome,
            JobOutcome::Failed {
                cause: JobFailure::Unreachable(_),
                ..
            }
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn already_translated_skips_polling() {
        let transport = Arc::new(ScriptedTransport::new(|_| {
            json(
                StatusCode::CREATED,
                serde_json::json!({"result": "success", "urn": "done-urn"}),
            )
        }));
        let outcome = runner(transport.clone())
            .with_force(true)
            .run("src")
            .await
            .unwrap();
        assert_eq!(
            outcome,
            JobOutcome::Completed {
                urn: "done-urn".into()
            }
        );
        let requests = transport.requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].header_str("x-ads-force"), Some("true"));
    }

    #[tokio::test(start_paused = true)]
    async fn rejected_submission_is_an_error() {
        let transport = Arc::new(ScriptedTransport::new(|_| empty(StatusCode::UNAUTHORIZED)));
        let err = runner(transport.clone()).run("src").await.unwrap_err();
        assert_eq!(err.status_code(), Some(StatusCode::UNAUTHORIZED));
        assert_eq!(transport.requests().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_interrupts_polling() {
        let token = CancellationToken::new();
        let trigger = token.clone();
        let polls_seen = AtomicUsize::new(0);
        let transport = Arc::new(ScriptedTransport::new(move |req| {
            if req.method == Method::POST {
                return json(StatusCode::OK, serde_json::json!({"urn": "result-urn"}));
            }
            if polls_seen.fetch_add(1, Ordering::SeqCst) == 1 {
                trigger.cancel();
            }
            manifest("inprogress")
        }));
        let err = runner(transport.clone())
            .with_cancellation(token)
            .run("src")
            .await
            .unwrap_err();
        assert!(matches!(err, TransferError::Cancelled));
        assert_eq!(polls(&transport), 2);
    }

    #[tokio::test]
    async fn expired_credential_fails_fast() {
        let transport = Arc::new(ScriptedTransport::new(|_| empty(StatusCode::OK)));
        let expired = StaticCredentials::new(Credential::bearer("tok", ChronoDuration::seconds(-5)));
        let err = TranslationJobRunner::new(
            transport.clone(),
            Arc::new(expired),
            Url::parse("https://forge.test/").unwrap(),
        )
        .run("src")
        .await
        .unwrap_err();
        assert!(matches!(err, TransferError::Config(_)));
        assert!(transport.requests().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn credential_expiring_mid_poll_stops_the_run() {
        let transport = scripted(vec![Step::Status("inprogress")]);
        // submission and two polls
        let creds = Arc::new(RotatingCredentials::valid_for(3));
        let err = runner_with_credentials(transport.clone(), creds.clone())
            .run("src")
            .await
            .unwrap_err();

        assert!(matches!(err, TransferError::Config(_)));
        assert_eq!(polls(&transport), 2);
        assert_eq!(creds.lookups(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn every_request_uses_the_current_credential() {
        let transport = scripted(vec![Step::Status("inprogress"), Step::Status("success")]);
        let creds = Arc::new(RotatingCredentials::valid_for(usize::MAX));
        runner_with_credentials(transport.clone(), creds)
            .run("src")
            .await
            .unwrap();

        let auth: Vec<String> = transport
            .requests()
            .iter()
            .map(|r| r.header_str("authorization").unwrap_or_default().to_string())
            .collect();
        assert_eq!(auth, vec!["Bearer tok-0", "Bearer tok-1", "Bearer tok-2"]);
    }

    #[tokio::test(start_paused = true)]
    async fn spawned_run_resolves_once() {
        let transport = scripted(vec![Step::Status("success")]);
        let handle = runner(transport).spawn("src".into());
        let outcome = handle.await.unwrap().unwrap();
        assert_eq!(outcome.urn(), "result-urn");
    }
}
