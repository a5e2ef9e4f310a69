//! Headless host for the eve core.
//!
//! Runs the worker supervisor, the status bridge and the config hot-reload
//! engine, and writes every broadcast as one JSON object per line on stdout.
//! Diagnostics go to stderr and to `backend.log` in the logs directory so
//! that stdout remains a clean protocol channel.

use eve::app::EveCore;
use eve::config::CoreConfig;
use eve::fanout::{JsonLineSink, SinkRef};
use std::sync::Arc;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, fmt};

fn init_tracing() -> anyhow::Result<WorkerGuard> {
    let logs_dir = eve::eve_dirs::logs_dir();
    std::fs::create_dir_all(&logs_dir)?;
    let (file_writer, guard) =
        tracing_appender::non_blocking(tracing_appender::rolling::never(&logs_dir, "backend.log"));

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(fmt::layer().with_ansi(false).with_writer(file_writer))
        .try_init()?;
    Ok(guard)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _log_guard = init_tracing()?;

    let settings = eve::eve_dirs::settings_file();
    let config = CoreConfig::load(&settings)?;
    tracing::info!(settings = %settings.display(), "eve-host starting");

    let stdout: SinkRef = Arc::new(JsonLineSink::stdout());
    let core = EveCore::new(config, Arc::new(move || vec![Arc::clone(&stdout)]))?;
    core.events().on_backend_issue(|issue| {
        if issue {
            tracing::warn!("backend issue raised; restart services to recover");
        }
    });

    core.start().await.map_err(|e| {
        tracing::error!(error = %e, "eve-host failed to start");
        anyhow::anyhow!("eve-host failed to start: {e}")
    })?;

    tokio::signal::ctrl_c().await?;
    tracing::info!("ctrl-c received");
    core.shutdown().await;

    tracing::info!("eve-host shut down cleanly");
    Ok(())
}
