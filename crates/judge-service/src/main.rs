//! Process entry point: loads configuration, wires up the shared
//! [`judge_core::JudgeEngine`], and spawns the three long-lived tasks —
//! the gRPC ingest server, the rule-catalog fetcher, and the stale-series
//! reaper — bringing them all down together on SIGTERM/SIGINT.

mod catalog;
mod config;
mod error;
mod queue;
mod reaper;
mod server;

use std::sync::Arc;

use judge_core::{EngineConfig, JudgeEngine};
use tokio::sync::Notify;
use tonic::transport::Server;

use catalog::CatalogFetcher;
use error::ServiceError;
use queue::AlertQueue;
use reaper::Reaper;
use server::JudgeIngestService;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let settings = config::settings();
    tracing::info!(env = config::app_env().as_str(), "starting judge-service");

    let engine = Arc::new(JudgeEngine::new(EngineConfig {
        retain: settings.retain,
        min_interval: settings.alarm.min_interval,
    }));

    let queue = Arc::new(AlertQueue::new(&settings.redis_url, settings.alarm.queue_pattern.clone())?);
    let catalog = CatalogFetcher::new(settings.hbs.servers.clone(), settings.hbs.timeout_ms);
    let reaper = Reaper::new(settings.reap.interval_secs, settings.reap.horizon_secs);

    let shutdown = Arc::new(Notify::new());

    let grpc_task = {
        let engine = engine.clone();
        let queue = queue.clone();
        let addr = settings.grpc.listen_addr.parse().map_err(|err| ServiceError::Bind {
            addr: settings.grpc.listen_addr.clone(),
            source: std::io::Error::new(std::io::ErrorKind::InvalidInput, err),
        })?;
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            let service = JudgeIngestService::new(engine, queue);
            let result = Server::builder()
                .add_service(judge_proto::judge_ingest_server::JudgeIngestServer::new(service))
                .serve_with_shutdown(addr, shutdown.notified())
                .await;
            if let Err(err) = result {
                tracing::error!(%err, "gRPC server exited with an error");
            }
        })
    };

    let catalog_task = {
        let engine = engine.clone();
        let shutdown = shutdown.clone();
        tokio::spawn(async move { catalog.run(engine, shutdown.notified()).await })
    };

    let reaper_task = {
        let engine = engine.clone();
        let shutdown = shutdown.clone();
        tokio::spawn(async move { reaper.run(engine, shutdown.notified()).await })
    };

    wait_for_shutdown_signal().await;
    tracing::info!("shutdown signal received, stopping tasks");
    shutdown.notify_waiters();

    let _ = tokio::join!(grpc_task, catalog_task, reaper_task);
    tracing::info!("judge-service stopped");

    Ok(())
}

#[cfg(unix)]
async fn wait_for_shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
    let mut sigint = signal(SignalKind::interrupt()).expect("failed to install SIGINT handler");

    tokio::select! {
        _ = sigterm.recv() => {}
        _ = sigint.recv() => {}
    }
}

#[cfg(not(unix))]
async fn wait_for_shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}

fn init_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt().with_env_filter(filter).with_target(true).json().init();
}
