use std::future::pending;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use container_janitor::{
    config::Config,
    docker::DockerGateway,
    handlers,
    health::HealthRegistry,
    janitor::{CleanupOutcome, Janitor, RunSummary},
    metrics::setup_metrics_routes,
};
use envconfig::Envconfig;
use eyre::{eyre, Result, WrapErr};
use tokio::signal::unix::{signal, SignalKind};
use tokio::task::JoinError;
use tokio_util::sync::CancellationToken;
use tracing::level_filters::LevelFilter;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

async fn listen(app: Router, bind: String) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(bind).await?;

    axum::serve(listener, app).await?;

    Ok(())
}

async fn wait_for_signal() -> Result<()> {
    let mut sigterm = signal(SignalKind::terminate())?;

    tokio::select! {
        res = tokio::signal::ctrl_c() => {
            res?;
            info!("received SIGINT");
        }
        _ = sigterm.recv() => info!("received SIGTERM"),
    }

    Ok(())
}

/// Resolves on SIGINT/SIGTERM, or once the configured lifetime is over.
async fn wait_for_shutdown(max_lifetime: Option<Duration>) {
    let signals = async {
        if let Err(e) = wait_for_signal().await {
            error!("failed to listen for shutdown signals: {}", e);
            pending::<()>().await
        }
    };
    let lifetime = async {
        match max_lifetime {
            Some(lifetime) => tokio::time::sleep(lifetime).await,
            None => pending::<()>().await,
        }
    };

    tokio::select! {
        _ = signals => {}
        _ = lifetime => info!("max lifetime reached"),
    }
}

fn log_outcome(phase: &str, outcome: &CleanupOutcome) {
    match outcome {
        CleanupOutcome::Skipped => info!(phase, "cleanup skipped"),
        CleanupOutcome::Completed(report) => {
            info!(phase, removed = report.removed.len(), "cleanup completed")
        }
        CleanupOutcome::Failed(e) => warn!(phase, error = %e, "cleanup failed"),
    }
}

fn report(result: std::result::Result<RunSummary, JoinError>) -> Result<()> {
    let summary = result.map_err(|e| eyre!("janitor task failed: {}", e))?;

    if !summary.connected {
        warn!("ran without an engine connection");
    }
    log_outcome("startup", &summary.startup);
    log_outcome("shutdown", &summary.shutdown);

    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let log_layer = tracing_subscriber::fmt::layer().with_filter(
        EnvFilter::builder()
            .with_default_directive(LevelFilter::INFO.into())
            .from_env_lossy(),
    );
    tracing_subscriber::registry().with(log_layer).init();

    let config = Config::init_from_env().wrap_err("failed to load configuration from env")?;
    let settings = config
        .get_janitor_settings()
        .wrap_err("invalid janitor configuration")?;

    let liveness = HealthRegistry::new("liveness");
    let janitor_liveness = liveness.register("janitor", config.liveness_deadline());

    let janitor = Arc::new(Janitor::new(
        DockerGateway::new(config.engine_timeout_secs),
        settings,
        janitor_liveness,
    ));

    let app = setup_metrics_routes(handlers::app(liveness, janitor.phase()));
    let bind = config.bind();
    tokio::spawn(async move {
        if let Err(e) = listen(app, bind).await {
            error!("http server failed: {}", e);
        }
    });

    let shutdown = CancellationToken::new();
    let worker = tokio::spawn({
        let janitor = janitor.clone();
        let shutdown = shutdown.clone();
        async move { janitor.run(shutdown).await }
    });
    tokio::pin!(worker);

    tokio::select! {
        res = &mut worker => {
            error!("janitor exited before shutdown was requested");
            return report(res);
        }
        _ = wait_for_shutdown(config.max_lifetime()) => {
            info!("shutting down");
            shutdown.cancel();
        }
    }

    let timeout = config.shutdown_timeout();
    match tokio::time::timeout(timeout, worker).await {
        Ok(res) => report(res),
        Err(_) => Err(eyre!(
            "graceful shutdown did not finish within {}s",
            timeout.as_secs()
        )),
    }
}
