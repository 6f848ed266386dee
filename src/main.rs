use anyhow::{Result, bail};
use forge_relay::{
    ChunkUploader, JobOutcome, OssClient, ReqwestTransport, StaticCredentials,
    TranslationJobRunner, Transport, UploadProgress, config::AppConfig,
};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    // --- Logging setup ---
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    // --- Parse config ---
    let cfg = AppConfig::from_env_and_args()?;
    tracing::info!("Starting forge-relay with config: {:?}", cfg);

    if !cfg.file.is_file() {
        bail!("{} is not a readable file", cfg.file.display());
    }

    // --- Shared collaborators ---
    let transport: Arc<dyn Transport> = Arc::new(ReqwestTransport::new(cfg.request_timeout)?);
    let credentials = Arc::new(StaticCredentials::new(cfg.credential.clone()));

    // Ctrl-C stops both operations at the next request boundary.
    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::warn!("Interrupted; stopping after the current request");
                cancel.cancel();
            }
        });
    }

    // --- Upload ---
    let (progress_tx, mut progress_rx) = mpsc::unbounded_channel::<UploadProgress>();
    let reporter = tokio::spawn(async move {
        while let Some(progress) = progress_rx.recv().await {
            tracing::info!(
                "Uploaded {} / {} bytes ({}%)",
                progress.bytes_sent,
                progress.total_size,
                progress.percent()
            );
        }
    });

    let oss = OssClient::new(transport.clone(), cfg.base_url.clone());
    let uploader = ChunkUploader::new(oss, credentials.clone(), cfg.bucket.clone())
        .with_config(cfg.upload.clone())
        .with_progress(progress_tx)
        .with_cancellation(cancel.clone());

    let stored = uploader.upload_file(&cfg.file).await;
    drop(uploader);
    let _ = reporter.await;
    let stored = stored?;
    tracing::info!("Stored {} as {}", stored.object_key, stored.object_id);

    if !cfg.translate {
        return Ok(());
    }

    // --- Translate ---
    let runner = TranslationJobRunner::new(transport, credentials, cfg.base_url.clone())
        .with_config(cfg.poll.clone())
        .with_force(cfg.force)
        .with_cancellation(cancel);

    match runner.run_for(&stored).await? {
        JobOutcome::Completed { urn } => {
            tracing::info!("Translation complete: {}", urn);
            println!("{}", urn);
            Ok(())
        }
        JobOutcome::Failed { urn, cause } => bail!("translation of {} failed: {}", urn, cause),
        JobOutcome::TimedOut { urn, elapsed } => {
            bail!("translation of {} still running after {:?}", urn, elapsed)
        }
    }
}
