//! Notification Service
//!
//! Background worker that consumes `order_events` from Redpanda and sends a
//! notification per order.
//!
//! This binary:
//! - Connects to the broker with a fixed retry budget, exiting non-zero when
//!   the budget runs out
//! - Acknowledges deliveries only after the notification succeeds (manual mode)
//! - Dead-letters orders whose notification keeps failing
//! - Serves a `/health` endpoint reporting the worker state and dead-letter count
//!
//! # Usage
//!
//! ```bash
//! BROKER_BROKERS=localhost:9092 cargo run -p notification-service
//! ```

mod config;

use anyhow::Context;
use axum::{
    Json, Router,
    extract::State,
    http::{StatusCode, header},
    response::{IntoResponse, Response},
    routing::get,
};
use config::Config;
use order_pipeline_core::broker::QueueBinding;
use order_pipeline_redpanda::RedpandaConnector;
use order_pipeline_runtime::metrics::MetricsServer;
use order_pipeline_runtime::{
    DeadLetterQueue, LogNotifier, NotificationWorker, RetryPolicy, WorkerConfig, WorkerState,
};
use serde_json::json;
use std::sync::Arc;
use tokio::sync::watch;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Clone)]
struct HealthState {
    worker: watch::Receiver<WorkerState>,
    dead_letters: Arc<DeadLetterQueue>,
    metrics: Option<Arc<MetricsServer>>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file
    let _ = dotenvy::dotenv();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "notification_service=info,order_pipeline=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env()?;
    tracing::info!(
        brokers = %config.brokers,
        queue = %config.queue,
        group = %config.consumer_group,
        ack_mode = %config.ack_mode,
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

    let connector = RedpandaConnector::builder()
        .brokers(&config.brokers)
        .consumer_group(&config.consumer_group)
        .build()?;

    let dead_letters = Arc::new(DeadLetterQueue::new(config.dead_letter_capacity));
    let worker = NotificationWorker::new(
        Arc::new(connector),
        Arc::new(LogNotifier),
        WorkerConfig {
            binding: QueueBinding::durable(&config.queue),
            ack_mode: config.ack_mode,
            connect_policy: RetryPolicy::fixed(config.connect_attempts, config.connect_delay),
            notify_timeout: config.notify_timeout,
            max_deliveries: config.max_deliveries,
            requeue_backoff: config.requeue_backoff,
            max_requeue_backoff: config.max_requeue_backoff,
            ..WorkerConfig::default()
        },
    )
    .with_dead_letters(Arc::clone(&dead_letters));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let state = HealthState {
        worker: worker.state(),
        dead_letters,
        metrics,
    };
    let mut app = Router::new().route("/health", get(health));
    if state.metrics.is_some() {
        app = app.route("/metrics", get(metrics_endpoint));
    }
    let app = app.with_state(state);

    let listener = tokio::net::TcpListener::bind(config.health_addr())
        .await
        .with_context(|| format!("binding {}", config.health_addr()))?;
    tracing::info!(addr = %config.health_addr(), "Health endpoint listening");

    let health_shutdown = shutdown_requested(shutdown_rx);
    let health_task = tokio::spawn(async move {
        if let Err(error) = axum::serve(listener, app)
            .with_graceful_shutdown(health_shutdown)
            .await
        {
            tracing::error!(%error, "Health listener failed");
        }
    });

    let result = worker.run(shutdown_signal()).await;

    let _ = shutdown_tx.send(true);
    health_task.await?;

    match result {
        Ok(()) => {
            tracing::info!("Shut down gracefully");
            Ok(())
        },
        Err(error) => {
            tracing::error!(%error, "Notification worker stopped");
            Err(error.into())
        },
    }
}

/// Worker liveness: 503 once the worker has given up on the broker.
#[allow(clippy::unused_async)]
async fn health(State(state): State<HealthState>) -> (StatusCode, Json<serde_json::Value>) {
    let worker = state.worker.borrow().clone();
    let status = if matches!(worker, WorkerState::Fatal(_)) {
        StatusCode::SERVICE_UNAVAILABLE
    } else {
        StatusCode::OK
    };
    let label = if status.is_success() { "ok" } else { "fatal" };
    (
        status,
        Json(json!({
            "status": label,
            "worker": format!("{worker:?}"),
            "dead_letters": state.dead_letters.len(),
        })),
    )
}

#[allow(clippy::unused_async)]
async fn metrics_endpoint(State(state): State<HealthState>) -> Response {
    match state.metrics.as_deref().and_then(MetricsServer::render) {
        Some(body) => (
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            body,
        )
            .into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
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
