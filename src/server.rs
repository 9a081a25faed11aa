//! Server initialization and startup logic for clockwork.

use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info};
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use clockwork_api::{ApiConfig, ApiServer, ApiState};
use clockwork_config::{Config, ConfigValidator, PersistenceKind};
use clockwork_core::{JobStore, MemoryStore, Scheduler, SchedulerOptions, SystemClock};
use clockwork_store::{FileStore, PostgresStore};

/// Initialize tracing with console and file output.
///
/// Log files are written to ./logs/ with daily rotation.
pub(crate) fn init_tracing() -> Result<(), Box<dyn std::error::Error>> {
    let log_dir = std::path::Path::new("logs");
    std::fs::create_dir_all(log_dir)?;

    let file_appender = RollingFileAppender::builder()
        .rotation(Rotation::DAILY)
        .filename_prefix("clockwork")
        .filename_suffix("log")
        .max_log_files(14)
        .build(log_dir)?;

    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    // Keep the writer guard alive for the program duration.
    static GUARD: std::sync::OnceLock<tracing_appender::non_blocking::WorkerGuard> =
        std::sync::OnceLock::new();
    let _ = GUARD.set(guard);

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().with_target(true).with_ansi(true))
        .with(fmt::layer().with_writer(non_blocking).with_ansi(false))
        .init();

    Ok(())
}

/// Validate the configuration and report findings.
pub(crate) fn check_config(config: Config) -> Result<(), Box<dyn std::error::Error>> {
    let result = ConfigValidator::validate(&config);
    for warning in &result.warnings {
        info!("warning: {}: {}", warning.path, warning.message);
    }
    for err in &result.errors {
        error!("error: {}: {}", err.path, err.message);
    }
    if result.is_valid() {
        info!("configuration is valid");
        Ok(())
    } else {
        Err("configuration is invalid".into())
    }
}

async fn build_store(config: &Config) -> Result<Arc<dyn JobStore>, Box<dyn std::error::Error>> {
    let store: Arc<dyn JobStore> = match config.persistence.kind {
        PersistenceKind::Memory => {
            info!("using in-memory persistence (jobs are lost on restart)");
            Arc::new(MemoryStore::new())
        }
        PersistenceKind::File => {
            let path = &config.persistence.path;
            info!("using file persistence at {:?}", path);
            Arc::new(FileStore::new(path.clone()).await?)
        }
        PersistenceKind::Postgres => {
            info!("using postgres persistence");
            Arc::new(PostgresStore::connect(&config.persistence.url).await?)
        }
    };
    Ok(store)
}

/// Run the scheduler and its control plane until SIGTERM/SIGINT.
pub(crate) async fn run_server(config: Config) -> Result<(), Box<dyn std::error::Error>> {
    info!("starting clockwork v{}", env!("CARGO_PKG_VERSION"));

    let validation = ConfigValidator::validate(&config);
    if !validation.is_valid() {
        for err in &validation.errors {
            error!("config error: {}: {}", err.path, err.message);
        }
        return Err("configuration is invalid".into());
    }

    let store = build_store(&config).await?;
    let scheduler = Arc::new(Scheduler::new(
        store,
        Arc::new(SystemClock),
        SchedulerOptions {
            retry_delay: Duration::from_millis(config.jobs.retry_delay_ms),
            grace: Duration::from_millis(config.shutdown.grace_ms),
        },
    ));
    scheduler.start().await?;

    let api_config = ApiConfig {
        default_owner: config.default_owner.clone(),
        disable_local_jobs: config.jobs.disable_local_jobs,
        disable_delete_all: config.jobs.disable_delete_all,
        forward_headers: config.remote.headers.clone(),
        auth_token: config.auth.token.clone(),
        profile: config.profile,
    };
    let state = Arc::new(ApiState::new(scheduler.clone(), api_config));
    let server = ApiServer::new(config.server.host.clone(), config.server.port, state);

    server.run(shutdown_signal()).await?;

    // The listener has drained; now stop timers and in-flight attempts.
    scheduler.shutdown().await;
    info!("clockwork stopped");
    Ok(())
}

/// Resolve on SIGTERM or SIGINT.
async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = match signal(SignalKind::terminate()) {
            Ok(s) => s,
            Err(e) => {
                error!("failed to install SIGTERM handler: {e}");
                std::future::pending::<()>().await;
                return;
            }
        };
        tokio::select! {
            _ = sigterm.recv() => info!("received SIGTERM"),
            _ = tokio::signal::ctrl_c() => info!("received SIGINT"),
        }
    }
    #[cfg(not(unix))]
    {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("received Ctrl+C");
        }
    }
}
