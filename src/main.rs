//! # Waveformer - Main Application Entry Point
//!
//! Accepts waveform jobs over HTTP and turns audio files into peaks artifacts in the background.
//!
//! ## Application Architecture:
//! - **config**: Layered configuration (defaults, `config.toml`, environment variables)
//! - **state**: Shared state handed to HTTP handlers (config, validator, queue, metrics)
//! - **job**: Request schema and the fetch → probe → generate → upload → notify pipeline
//! - **queue**: Durable directory-backed job queue with a bounded worker pool
//! - **health**: Health and metrics endpoints
//! - **middleware**: Request logging and per-endpoint metrics
//! - **handlers**: HTTP request handlers for job submission and configuration
//! - **error**: HTTP error types and their JSON responses

mod config;
mod error;
mod handlers;
mod health;
mod job;
mod middleware;
mod queue;
mod state;

use actix_cors::Cors;
use actix_web::{web, App, HttpServer};
use anyhow::{Context, Result};
use config::AppConfig;
use job::{
    build_http_client, AudiowaveformGenerator, FfprobeProber, HttpTransferer, JobPipeline, Validator,
    WebhookNotifier,
};
use queue::{JobQueue, JobStore, LogEvents};
use state::{AppState, JobCounters};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{error, info};
use tracing_actix_web::TracingLogger;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Set once SIGINT or SIGTERM arrives.
static SHUTDOWN_SIGNAL: AtomicBool = AtomicBool::new(false);

/// The main application entry point.
///
/// ## What this function does:
/// 1. **Loads configuration** from files and environment variables
/// 2. **Sets up logging**
/// 3. **Wires the job pipeline** into the durable queue and redelivers leftover jobs
/// 4. **Configures the HTTP server** with middleware and routes
/// 5. **Handles graceful shutdown** when receiving system signals
///
/// Jobs still running at shutdown are not cancelled here; their records stay in the queue
/// directory and run again on the next start.
#[actix_web::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();

    init_tracing()?;

    let config = AppConfig::load()?;
    config.validate()?;

    info!("Starting waveformer v{}", env!("CARGO_PKG_VERSION"));
    info!("Configuration loaded: {}:{}", config.server.host, config.server.port);
    info!(
        allowed_domains = ?config.security.allowed_domains,
        concurrency = config.queue.concurrency,
        state_dir = %config.queue.state_dir.display(),
        "Job settings"
    );

    let validator = Validator::new(config.domain_matcher()?);
    let client = build_http_client(config.http_timeout()).context("Failed to build HTTP client")?;

    let pipeline = JobPipeline::new(
        validator.clone(),
        Arc::new(HttpTransferer::new(client.clone())),
        Arc::new(FfprobeProber::new(&config.tools.ffprobe_bin)),
        Arc::new(AudiowaveformGenerator::new(&config.tools.audiowaveform_bin)),
        Arc::new(WebhookNotifier::new(client)),
    )
    .with_scratch_dir(config.tools.scratch_dir.clone());

    let store = JobStore::open(&config.queue.state_dir)
        .await
        .context("Failed to open queue state directory")?;
    let queue = JobQueue::new(store, config.queue.concurrency);
    let jobs = Arc::new(JobCounters::default());

    queue.define(&config.queue.job_name, Arc::new(pipeline)).await;
    queue.on_events(Arc::new(LogEvents)).await;
    queue.on_events(jobs.clone()).await;
    let redelivered = queue.start().await.context("Failed to redeliver queued jobs")?;
    info!(redelivered, "Job queue started");

    let app_state = AppState::new(config.clone(), validator, queue, jobs);
    let bind_addr = format!("{}:{}", config.server.host, config.server.port);

    setup_signal_handlers();

    info!("Starting HTTP server on {}", bind_addr);

    let server = HttpServer::new(move || {
        let cors = Cors::default()
            .allow_any_origin()
            .allow_any_method()
            .allow_any_header()
            .max_age(3600);

        App::new()
            .app_data(web::Data::new(app_state.clone()))
            // Middleware runs in reverse registration order for requests
            .wrap(cors)
            .wrap(TracingLogger::default())
            .wrap(middleware::MetricsMiddleware)
            .wrap(middleware::RequestLogging)
            .route("/v1/create", web::post().to(handlers::create_job))
            .service(
                web::scope("/api/v1")
                    .route("/health", web::get().to(health::health_check))
                    .route("/metrics", web::get().to(health::detailed_metrics))
                    .route("/config", web::get().to(handlers::get_config)),
            )
            .route("/health", web::get().to(health::health_check))
            .default_service(web::to(handlers::not_found))
    })
    .bind(&bind_addr)?
    .run();

    let server_handle = server.handle();
    let server_task = tokio::spawn(server);

    tokio::select! {
        result = server_task => {
            match result {
                Ok(server_result) => {
                    if let Err(e) = server_result {
                        error!("Server error: {}", e);
                    }
                }
                Err(e) => {
                    error!("Server task error: {}", e);
                }
            }
        }
        _ = wait_for_shutdown() => {
            info!("Shutdown signal received, stopping server...");
            server_handle.stop(true).await;
        }
    }

    info!("Server stopped gracefully");
    Ok(())
}

/// Initialize tracing.
///
/// ## Environment Variables:
/// - `RUST_LOG`: Controls what gets logged (e.g., "debug", "waveformer=trace")
/// - If not set, defaults to "waveformer=debug,actix_web=info"
fn init_tracing() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "waveformer=debug,actix_web=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .try_init()
        .context("Failed to initialize tracing")?;

    Ok(())
}

/// Listen for SIGTERM and SIGINT and raise the shutdown flag on the first one.
fn setup_signal_handlers() {
    tokio::spawn(async {
        #[cfg(unix)]
        {
            use tokio::signal::unix::{signal, SignalKind};

            let (mut sigterm, mut sigint) = match (signal(SignalKind::terminate()), signal(SignalKind::interrupt())) {
                (Ok(sigterm), Ok(sigint)) => (sigterm, sigint),
                (Err(e), _) | (_, Err(e)) => {
                    error!("Failed to install signal handlers: {}", e);
                    return;
                }
            };

            tokio::select! {
                _ = sigterm.recv() => {
                    info!("Received SIGTERM");
                }
                _ = sigint.recv() => {
                    info!("Received SIGINT");
                }
            }
        }

        #[cfg(not(unix))]
        {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!("Failed to listen for Ctrl+C: {}", e);
                return;
            }
            info!("Received Ctrl+C");
        }

        SHUTDOWN_SIGNAL.store(true, Ordering::SeqCst);
    });
}

/// Resolves once the shutdown flag is raised. Polls every 100ms.
async fn wait_for_shutdown() {
    while !SHUTDOWN_SIGNAL.load(Ordering::SeqCst) {
        tokio::time::sleep(tokio::time::Duration::from_millis(100)).await;
    }
}
