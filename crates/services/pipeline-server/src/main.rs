//! Pipeline Server Binary
//!
//! Entry point for the object tail SSE server.

use anyhow::Result;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use pipeline_core::{
    Broadcaster, Downloader, Heartbeat, MessageProcessor, ObjectStoreBlobStore, PipelineMetrics,
    PipelineRunner, QueueIterator, SqsQueueClient, SubscriberRegistry,
};
use pipeline_server::{
    api::{build_router, AppState},
    config::Config,
};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting pipeline server...");

    // Load configuration
    let config_path = std::env::var("PIPELINE_CONFIG").ok();
    let config = Config::load(config_path.as_deref())?;
    config.validate()?;
    let config = Arc::new(config);

    tracing::info!(
        "Configuration: HTTP port={}, queue={}, region={}",
        config.server.http_port,
        config.aws.queue_url,
        config.aws.region
    );

    // Queue and storage clients
    let sdk_config = aws_config::defaults(aws_config::BehaviorVersion::latest())
        .region(aws_config::Region::new(config.aws.region.clone()))
        .load()
        .await;
    let mut sqs_config = aws_sdk_sqs::config::Builder::from(&sdk_config);
    if let Some(endpoint) = &config.aws.endpoint {
        sqs_config = sqs_config.endpoint_url(endpoint);
    }
    let sqs = aws_sdk_sqs::Client::from_conf(sqs_config.build());
    let queue_client = Arc::new(SqsQueueClient::new(sqs, config.aws.queue_url.clone()));
    let store = Arc::new(ObjectStoreBlobStore::s3(
        config.aws.region.clone(),
        config.aws.endpoint.clone(),
    ));

    // Broadcast side
    let metrics = Arc::new(PipelineMetrics::with_default_registry()?);
    let registry = Arc::new(
        SubscriberRegistry::new(metrics.clone()).with_limit(config.server.max_subscribers),
    );
    let broadcaster = Arc::new(Broadcaster::new(registry.clone(), metrics.clone()));
    let heartbeat = Heartbeat::new(
        registry.clone(),
        metrics.clone(),
        config.pipeline.heartbeat_interval(),
    );

    // Cancelled once on SIGTERM/SIGINT; stops the runner, heartbeat and open streams
    let shutdown = CancellationToken::new();

    let queue = Arc::new(
        QueueIterator::new(
            queue_client,
            config.pipeline.receive_settings(),
            metrics.clone(),
        )
        .with_shutdown(shutdown.clone()),
    );
    let processor = Arc::new(MessageProcessor::new(
        Downloader::new(store),
        broadcaster.clone(),
        metrics.clone(),
    ));
    let runner = PipelineRunner::new(
        queue,
        processor,
        broadcaster,
        heartbeat.clone(),
        config.pipeline.runner_settings(),
        metrics.clone(),
    );

    let heartbeat_handle = tokio::spawn(heartbeat.run(shutdown.clone()));
    let runner_handle = tokio::spawn(runner.run());

    // Create app state
    let state = AppState::new(registry, metrics, config.clone(), shutdown.clone());

    // Build HTTP router
    let router = build_router(state);

    // Start HTTP server
    let bind_addr = format!("{}:{}", config.server.host, config.server.http_port);
    let listener = TcpListener::bind(&bind_addr).await?;
    tracing::info!("HTTP server listening on {}", bind_addr);

    // Run the HTTP server with graceful shutdown on SIGTERM/SIGINT
    let server_shutdown = shutdown.clone();
    axum::serve(listener, router)
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            tracing::info!("Shutdown signal received, initiating graceful shutdown...");
            server_shutdown.cancel();
        })
        .await?;

    // Signal shutdown to all background tasks
    shutdown.cancel();

    // Wait for background tasks to complete
    let _ = runner_handle.await;
    let _ = heartbeat_handle.await;

    tracing::info!("Pipeline server shutdown complete");
    Ok(())
}

/// Wait for shutdown signal (SIGTERM or SIGINT)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
