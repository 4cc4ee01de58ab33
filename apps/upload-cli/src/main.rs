//! Chunkline command-line uploader.
//!
//! Ctrl-C stops the transfer and removes the partial upload on the server.

mod args;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use chunkline_client::{
    FileSource, TransferDriver, TransferEvent, UploadTarget, WsConnection,
};

use args::Args;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let config = args.client_config()?;
    let name = args
        .target_name()
        .ok_or_else(|| anyhow::anyhow!("cannot derive a name from {}", args.file.display()))?;

    let source = FileSource::open(&args.file).await?;
    let target = UploadTarget::from_file(&args.file, name).await?;
    let conn = WsConnection::new(&args.server).with_request_timeout(config.request_timeout());

    let mut driver = match args.resume {
        Some(session_id) => {
            tracing::info!(session = %session_id, "resuming session");
            TransferDriver::resume_session(conn, source, target, &config, session_id)
        }
        None => TransferDriver::new(conn, source, target, &config),
    }
    .with_overwrite(args.overwrite);

    let handle = driver.handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("interrupt received, stopping transfer");
            handle.stop();
        }
    });

    if let Some(mut events) = driver.take_events() {
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                log_event(&event);
            }
        });
    }

    let outcome = driver.start().await?;
    if outcome.stopped {
        tracing::info!("upload stopped, partial data removed");
    } else {
        tracing::info!(size = outcome.final_size, "upload complete");
    }
    Ok(())
}

fn log_event(event: &TransferEvent) {
    match event {
        TransferEvent::Opened { session_id, resumed } => {
            tracing::info!(session = %session_id, resumed, "session opened");
        }
        TransferEvent::Progress(status) => {
            tracing::info!(
                offset = status.offset,
                total = status.declared_size,
                chunk = status.chunk_size,
                speed = %format!("{:.0} B/s", status.speed),
                eta = ?status.estimate_remaining,
                "{:.1}%",
                status.fraction() * 100.0
            );
        }
        TransferEvent::Paused => tracing::info!("paused"),
        TransferEvent::Resumed => tracing::info!("resumed"),
        TransferEvent::Retrying { attempt, delay } => {
            tracing::warn!(attempt, ?delay, "request failed, retrying");
        }
        TransferEvent::Warning { message } => tracing::warn!("{message}"),
        TransferEvent::Completed { .. }
        | TransferEvent::Stopped
        | TransferEvent::Failed { .. } => {}
    }
}
