use crate::models::credential::Credential;
use crate::services::{chunk_uploader::UploadConfig, translation::PollConfig};
use anyhow::{Context, Result, bail};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use clap::Parser;
use reqwest::Url;
use std::{env, path::PathBuf, str::FromStr, time::Duration};

const DEFAULT_BASE_URL: &str = "https://developer.api.autodesk.com";

/// Centralized application configuration.
/// Combines environment variables and CLI arguments.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub base_url: Url,
    pub bucket: String,
    pub credential: Credential,
    pub file: PathBuf,
    pub translate: bool,
    pub force: bool,
    pub request_timeout: Duration,
    pub poll: PollConfig,
    pub upload: UploadConfig,
}

/// Command-line + environment configuration.
#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "Upload a model to the object store and translate it"
)]
pub struct Args {
    /// File to upload
    pub file: PathBuf,

    /// API base URL (overrides FORGE_BASE_URL)
    #[arg(long)]
    pub base_url: Option<String>,

    /// Destination bucket key (overrides FORGE_BUCKET)
    #[arg(long)]
    pub bucket: Option<String>,

    /// Access token (overrides FORGE_ACCESS_TOKEN)
    #[arg(long)]
    pub token: Option<String>,

    /// Token type used in the Authorization header (overrides FORGE_TOKEN_TYPE)
    #[arg(long)]
    pub token_type: Option<String>,

    /// RFC 3339 expiry of the token (overrides FORGE_TOKEN_EXPIRES_AT)
    #[arg(long)]
    pub token_expires_at: Option<String>,

    /// First delay between manifest polls, in milliseconds
    #[arg(long)]
    pub poll_interval_ms: Option<u64>,

    /// Largest delay between manifest polls, in milliseconds
    #[arg(long)]
    pub poll_max_interval_ms: Option<u64>,

    /// Give up waiting for the translation after this many seconds (0 = never)
    #[arg(long)]
    pub deadline_secs: Option<u64>,

    /// Consecutive failed manifest requests tolerated
    #[arg(long)]
    pub poll_retries: Option<u32>,

    /// Bound the whole-body upload retries (unbounded when unset)
    #[arg(long)]
    pub whole_body_max_attempts: Option<u32>,

    /// Per-request timeout in seconds
    #[arg(long)]
    pub timeout_secs: Option<u64>,

    /// Regenerate derivatives even if they already exist
    #[arg(long)]
    pub force: bool,

    /// Upload only
    #[arg(long)]
    pub no_translate: bool,
}

impl AppConfig {
    /// Parse environment variables + CLI args into AppConfig.
    pub fn from_env_and_args() -> Result<Self> {
        Self::resolve(Args::parse(), |key| env::var(key).ok())
    }

    /// Merge `args` over the variables returned by `lookup`.
    pub fn resolve(args: Args, lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let base_url = args
            .base_url
            .or_else(|| lookup("FORGE_BASE_URL"))
            .unwrap_or_else(|| DEFAULT_BASE_URL.into());
        let base_url =
            Url::parse(&base_url).with_context(|| format!("parsing base URL `{}`", base_url))?;

        let Some(bucket) = args.bucket.or_else(|| lookup("FORGE_BUCKET")) else {
            bail!("no bucket given; pass --bucket or set FORGE_BUCKET");
        };

        let Some(token) = args.token.or_else(|| lookup("FORGE_ACCESS_TOKEN")) else {
            bail!("no access token given; pass --token or set FORGE_ACCESS_TOKEN");
        };
        let token_type = args
            .token_type
            .or_else(|| lookup("FORGE_TOKEN_TYPE"))
            .unwrap_or_else(|| "Bearer".into());
        let expires_at = match args
            .token_expires_at
            .or_else(|| lookup("FORGE_TOKEN_EXPIRES_AT"))
        {
            Some(raw) => DateTime::parse_from_rfc3339(raw.trim())
                .with_context(|| format!("parsing token expiry `{}`", raw))?
                .with_timezone(&Utc),
            None => Utc::now() + ChronoDuration::hours(1),
        };

        let defaults = PollConfig::default();
        let poll_interval_ms = pick(args.poll_interval_ms, &lookup, "FORGE_POLL_INTERVAL_MS")?;
        let poll_max_interval_ms =
            pick(args.poll_max_interval_ms, &lookup, "FORGE_POLL_MAX_INTERVAL_MS")?;
        let deadline_secs = pick(args.deadline_secs, &lookup, "FORGE_DEADLINE_SECS")?;
        let poll_retries = pick(args.poll_retries, &lookup, "FORGE_POLL_RETRIES")?;
        let poll = PollConfig {
            initial_interval: poll_interval_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.initial_interval),
            max_interval: poll_max_interval_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.max_interval),
            multiplier: defaults.multiplier,
            deadline: match deadline_secs {
                Some(0) => None,
                Some(secs) => Some(Duration::from_secs(secs)),
                None => defaults.deadline,
            },
            max_transport_retries: poll_retries.unwrap_or(defaults.max_transport_retries),
        };

        let upload = UploadConfig {
            whole_body_max_attempts: pick(
                args.whole_body_max_attempts,
                &lookup,
                "FORGE_WHOLE_BODY_MAX_ATTEMPTS",
            )?,
            ..UploadConfig::default()
        };

        let timeout_secs = pick(args.timeout_secs, &lookup, "FORGE_TIMEOUT_SECS")?.unwrap_or(120);

        Ok(Self {
            base_url,
            bucket,
            credential: Credential::new(token_type, token, expires_at),
            file: args.file,
            translate: !args.no_translate,
            force: args.force,
            request_timeout: Duration::from_secs(timeout_secs),
            poll,
            upload,
        })
    }
}

/// CLI value if given, otherwise the parsed environment variable.
fn pick<T>(
    arg: Option<T>,
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    if arg.is_some() {
        return Ok(arg);
    }
    match lookup(key) {
        Some(value) => value
            .trim()
            .parse::<T>()
            .map(Some)
            .with_context(|| format!("parsing {} value `{}`", key, value)),
        None => Ok(None),
    }
}
