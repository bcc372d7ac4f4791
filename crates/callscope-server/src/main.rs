use std::net::SocketAddr;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tokio::sync::watch;
use tracing::{info, warn};

mod app;
mod error;
mod http;
mod reconcile;

use callscope_core::config::CallscopeConfig;
use callscope_pipeline::ProcessingEngine;
use callscope_scheduler::{MetricsSampler, SchedulerEngine};
use callscope_secrets::SecretStore;
use callscope_store::CallStore;

#[derive(Parser)]
#[command(name = "callscope-server", about = "Call recording analysis service")]
struct Cli {
    /// Path to callscope.toml (default: ~/.callscope/callscope.toml).
    #[arg(long)]
    config: Option<String>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Shift historical external timestamps by a fixed offset (repair tool
    /// for rows imported from naive local clocks). Dry run by default.
    ReconcileTimestamps {
        /// Minutes to add to every external_created_at (may be negative).
        #[arg(long)]
        offset_minutes: i64,
        /// Restrict to one tenant id.
        #[arg(long)]
        tenant: Option<String>,
        /// Write the shift instead of only counting affected rows.
        #[arg(long)]
        apply: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = CallscopeConfig::load(cli.config.as_deref()).unwrap_or_else(|e| {
        eprintln!("config load failed ({e}), using defaults");
        CallscopeConfig::default()
    });

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.server.log_filter)),
        )
        .init();

    let secret_key = config
        .secrets
        .key_hex
        .clone()
        .ok_or_else(|| anyhow::anyhow!("secrets.key_hex is required (32 bytes of hex)"))?;
    let secrets = SecretStore::from_hex_key(&secret_key)?;
    let store = Arc::new(CallStore::open(
        &config.database.path,
        secrets,
        config.secrets.super_email.clone(),
    )?);

    if let Some(Command::ReconcileTimestamps {
        offset_minutes,
        tenant,
        apply,
    }) = cli.command
    {
        return reconcile::run(&store, tenant.as_deref(), offset_minutes, apply);
    }

    let pipeline = Arc::new(ProcessingEngine::new(
        store.clone(),
        config.engine.effective_concurrency(),
    ));
    let (scheduler, scheduler_handle) =
        SchedulerEngine::new(store.clone(), pipeline.clone(), config.engine.clone());
    let sampler = MetricsSampler::new(
        store.clone(),
        config.engine.metrics_sample_minutes,
        config.engine.metrics_retention_days,
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let scheduler_task = tokio::spawn(scheduler.run(shutdown_rx.clone()));
    let sampler_task = tokio::spawn(sampler.run(shutdown_rx.clone()));

    let state = Arc::new(app::AppState {
        store,
        config: config.clone(),
        scheduler: scheduler_handle,
    });
    let router = app::build_router(state);

    let addr: SocketAddr = format!("{}:{}", config.server.bind, config.server.port).parse()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("callscope listening on {addr}");

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // Stop accepting ticks, then wait for in-flight processing to reach a
    // persisted state before the store goes away.
    info!("shutting down background services");
    let _ = shutdown_tx.send(true);
    if let Err(e) = scheduler_task.await {
        warn!(error = %e, "scheduler task join failed");
    }
    if let Err(e) = sampler_task.await {
        warn!(error = %e, "sampler task join failed");
    }
    info!("shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    info!("shutdown signal received");
}
