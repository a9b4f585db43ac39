//! warmpoold — the warm pool controller daemon.
//!
//! Single binary that assembles the pool subsystems:
//! - Coordination store (Redis, or in-process for local runs)
//! - Kubernetes orchestrator + pod lifecycle controller
//! - Reconciler (demand-driven), trimmer (periodic), pod watcher
//! - HTTP API: call dispatch, pod callbacks, status, metrics
//!
//! # Usage
//!
//! ```text
//! warmpoold serve --image registry.example/voice-agent:latest --min-idle 3
//! warmpoold render-pod --image registry.example/voice-agent:latest
//! ```

mod config;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tokio::signal;
use tokio::sync::watch;
use tracing::info;
use tracing_subscriber::EnvFilter;

use warmpool_api::{ApiState, Dispatcher, build_router};
use warmpool_metrics::PoolMetrics;
use warmpool_orchestrator::{BackgroundTasks, KubeOrchestrator, LifecycleController, SharedOrchestrator};
use warmpool_reconcile::{Reconciler, Trimmer};
use warmpool_state::open_store;
use warmpool_watch::PodWatcher;

use crate::config::{LogFormat, PoolArgs};

const DEFAULT_LOG_FILTER: &str = "info,warmpoold=debug,warmpool=debug";

#[derive(Parser)]
#[command(name = "warmpoold", about = "Warm pod pool controller for voice agents")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the controller: HTTP API plus pool maintenance loops.
    Serve(PoolArgs),

    /// Print the pod object the controller would create, as JSON.
    RenderPod {
        #[command(flatten)]
        args: PoolArgs,

        /// Pod id used in the rendered name.
        #[arg(long, default_value_t = 1)]
        id: u64,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Command::Serve(args) => {
            init_tracing(args.log_format);
            run_controller(args).await
        }
        Command::RenderPod { args, id } => render_pod(&args, id),
    }
}

fn init_tracing(format: LogFormat) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    match format {
        LogFormat::Text => tracing_subscriber::fmt().with_env_filter(filter).init(),
        LogFormat::Json => tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .init(),
    }
}

fn render_pod(args: &PoolArgs, id: u64) -> anyhow::Result<()> {
    args.validate()?;
    let template = args.pod_template(|key| std::env::var(key).ok());
    let pod = template.to_pod(&template.pod_name(id));
    println!("{}", serde_json::to_string_pretty(&pod)?);
    Ok(())
}

async fn run_controller(args: PoolArgs) -> anyhow::Result<()> {
    args.validate()?;
    let limits = args.limits();
    let addr = args.listen_addr()?;

    info!(
        min_idle = limits.min_idle,
        max_pods = limits.max_pods,
        namespace = %args.namespace,
        image = %args.image,
        "warm pool controller starting"
    );

    // ── Initialize subsystems ──────────────────────────────────

    let store = open_store(&args.store_url, args.queue_keys(), args.store_timeout())
        .context("opening coordination store")?;
    info!(url = %args.store_url, "coordination store configured");

    let template = args.pod_template(|key| std::env::var(key).ok());
    let orchestrator: SharedOrchestrator = Arc::new(
        KubeOrchestrator::connect(&args.namespace, template.label_selector())
            .await
            .context("connecting to kubernetes")?,
    );

    let metrics = Arc::new(PoolMetrics::new());
    let tasks = BackgroundTasks::new(args.max_background_tasks);
    let lifecycle = LifecycleController::new(
        store.clone(),
        orchestrator.clone(),
        template,
        args.counter_key.as_str(),
        tasks.clone(),
    )
    .with_metrics(metrics.clone());

    let reconciler = Arc::new(Reconciler::new(lifecycle.clone(), limits));
    let trigger = reconciler.trigger();
    let trimmer = Trimmer::new(lifecycle.clone(), limits.min_idle);
    let watcher = PodWatcher::new(store.clone(), orchestrator.clone(), trigger.clone())
        .with_metrics(metrics.clone())
        .with_agent_port(args.agent_port)
        .with_retry_delay(Duration::from_secs(args.watch_retry_secs));
    let dispatcher = Dispatcher::new(lifecycle.clone(), trigger.clone())
        .with_handoff_timeout(args.handoff_timeout());

    // ── Shutdown signal ────────────────────────────────────────

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let reconcile_shutdown = shutdown_rx.clone();
    let trim_shutdown = shutdown_rx.clone();
    let watch_shutdown = shutdown_rx;

    // ── Start background tasks ─────────────────────────────────

    let reconcile_handle = {
        let reconciler = Arc::clone(&reconciler);
        tokio::spawn(async move { reconciler.run(reconcile_shutdown).await })
    };

    let trim_interval = Duration::from_secs(args.trim_interval_secs);
    let trim_handle = tokio::spawn(async move {
        trimmer.run(trim_interval, trim_shutdown).await;
    });

    let watch_handle = tokio::spawn(async move {
        watcher.run(watch_shutdown).await;
    });

    // Fill the pool before the first call arrives.
    trigger.trigger();

    // ── Start API server ───────────────────────────────────────

    let router = build_router(ApiState::new(lifecycle, dispatcher, limits));
    info!(%addr, "API server starting");
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding {addr}"))?;

    axum::serve(listener, router)
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            info!("shutdown signal received");
            let _ = shutdown_tx.send(true);
        })
        .await?;

    let _ = reconcile_handle.await;
    let _ = trim_handle.await;
    let _ = watch_handle.await;

    let grace = Duration::from_secs(args.shutdown_grace_secs);
    if tasks.shutdown(grace).await {
        info!("background pod operations finished");
    }

    info!("warm pool controller stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
