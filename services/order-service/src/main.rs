//! Order Service
//!
//! HTTP service that places book orders.
//!
//! This binary:
//! - Resolves books against the catalog (book service)
//! - Records orders in the in-memory ledger
//! - Publishes `order_events` to Redpanda, queueing failed publishes for retry
//! - Serves `/order`, `/orders`, `/orders/all` and health routes
//!
//! # Usage
//!
//! ```bash
//! BOOK_SERVICE_URL=http://localhost:8082 BROKER_BROKERS=localhost:9092 \
//!     cargo run -p order-service
//! ```

mod config;

use anyhow::Context;
use config::Config;
use order_pipeline_catalog::HttpCatalogClient;
use order_pipeline_core::broker::QueueBinding;
use order_pipeline_core::environment::{SystemClock, TimestampIds};
use order_pipeline_redpanda::RedpandaConnector;
use order_pipeline_runtime::metrics::MetricsServer;
use order_pipeline_runtime::{
    EventPublisher, InMemoryLedger, OrderOrchestrator, RepublishQueue, Republisher,
};
use order_pipeline_web::{AppState, metrics_routes, order_routes};
use std::sync::Arc;
use tokio::sync::watch;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file
    let _ = dotenvy::dotenv();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "order_service=info,order_pipeline=info,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env()?;
    tracing::info!(
        addr = %config.bind_addr(),
        catalog = %config.catalog_base_url(),
        brokers = %config.broker.brokers,
        queue = %config.broker.queue,
        "Configuration loaded"
    );

    let metrics = match config.metrics_addr() {
        Some(addr) => {
            let mut server = MetricsServer::new(addr);
            server.start()?;
            Some(Arc::new(server))
        },
        None => None,
    };

    let catalog = HttpCatalogClient::new(&config.catalog_base_url(), config.catalog.timeout)?;
    let connector = RedpandaConnector::builder()
        .brokers(&config.broker.brokers)
        .timeout(config.broker.publish_timeout)
        .build()?;
    let publisher = Arc::new(
        EventPublisher::new(
            Arc::new(connector),
            QueueBinding::durable(&config.broker.queue),
        )
        .with_timeout(config.broker.publish_timeout),
    );
    let republish = Arc::new(RepublishQueue::new(config.republish.capacity));

    let orchestrator = Arc::new(OrderOrchestrator::new(
        Arc::new(catalog),
        Arc::new(InMemoryLedger::new()),
        Arc::clone(&publisher),
        Arc::clone(&republish),
        Arc::new(SystemClock),
        Arc::new(TimestampIds::new()),
    ));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let republisher = Republisher::new(republish, publisher)
        .with_interval(config.republish.interval)
        .with_max_attempts(config.republish.max_attempts);
    let republish_task = tokio::spawn(republisher.run(shutdown_requested(shutdown_rx.clone())));

    let mut state = AppState::new(orchestrator);
    if let Some(server) = &metrics {
        state = state.with_metrics(Arc::clone(server));
        let metrics_app = metrics_routes(state.clone());
        let listener = tokio::net::TcpListener::bind(server.addr())
            .await
            .with_context(|| format!("binding metrics listener on {}", server.addr()))?;
        let shutdown = shutdown_requested(shutdown_rx.clone());
        tokio::spawn(async move {
            if let Err(error) = axum::serve(listener, metrics_app)
                .with_graceful_shutdown(shutdown)
                .await
            {
                tracing::error!(%error, "Metrics listener failed");
            }
        });
    }

    let listener = tokio::net::TcpListener::bind(config.bind_addr())
        .await
        .with_context(|| format!("binding {}", config.bind_addr()))?;
    tracing::info!(addr = %config.bind_addr(), "Order service listening");

    axum::serve(listener, order_routes(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Shutting down gracefully...");
    let _ = shutdown_tx.send(true);
    republish_task.await?;
    Ok(())
}

/// Resolves once `true` is sent on the shutdown channel (or it closes).
async fn shutdown_requested(mut rx: watch::Receiver<bool>) {
    let _ = rx.wait_for(|stop| *stop).await;
}

async fn shutdown_signal() {
    use tokio::signal;

    let ctrl_c = async {
        if let Err(error) = signal::ctrl_c().await {
            tracing::error!(%error, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            },
            Err(error) => {
                tracing::error!(%error, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            },
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => tracing::info!("Received Ctrl+C signal"),
        () = terminate => tracing::info!("Received SIGTERM signal"),
    }
}
