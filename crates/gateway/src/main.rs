//! PaperDuel API Gateway
//!
//! The HTTP entry point for the comparison arena.
//! Handles:
//! - Pair dealing, voting and the leaderboard
//! - Rate limiting
//! - Request routing
//! - Observability (logging, metrics)

mod handlers;
mod middleware;

use anyhow::Context;
use axum::{
    middleware::{from_fn, from_fn_with_state},
    routing::{get, post},
    Router,
};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder};
use paperduel_common::{
    config::{AppConfig, ObservabilityConfig, StoreBackend},
    create_source,
    db::DbPool,
    metrics, Arena, InMemoryPaperStore, PaperStore, Repository,
};
use std::future::IntoFuture;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::{signal, sync::Notify};
use tower_http::{
    compression::CompressionLayer,
    cors::{Any, CorsLayer},
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub arena: Arc<Arena>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    // Load configuration
    let config = AppConfig::load().context("Failed to load configuration")?;

    init_tracing(&config.observability);
    info!("Starting PaperDuel API Gateway v{}", paperduel_common::VERSION);

    let config = Arc::new(config);

    // Initialize metrics
    install_metrics_exporter(config.observability.metrics_port)?;
    metrics::register_metrics();

    let store = create_store(&config).await?;
    let source = create_source(&config.source)?;
    info!(source = source.name(), topic = %config.source.topic_query, "Paper source ready");

    let arena = Arena::new(store, source, &config.pool, &config.source);

    // Create app state
    let state = AppState {
        config: config.clone(),
        arena: Arc::new(arena),
    };

    // Build the router
    let app = create_router(state);

    // Start the server
    let listener = tokio::net::TcpListener::bind((config.server.host.as_str(), config.server.port))
        .await
        .with_context(|| format!("Failed to bind {}:{}", config.server.host, config.server.port))?;
    info!("Listening on {}", listener.local_addr()?);

    // Stop waiting on open connections once the shutdown timeout elapses
    let signalled = Arc::new(Notify::new());
    let notifier = signalled.clone();
    let server = axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            notifier.notify_one();
        })
        .into_future();
    let shutdown_timeout = config.shutdown_timeout();

    tokio::select! {
        result = server => result?,
        _ = async {
            signalled.notified().await;
            tokio::time::sleep(shutdown_timeout).await;
        } => warn!(?shutdown_timeout, "Graceful shutdown timed out, dropping open connections"),
    }

    info!("Server shutdown complete");
    Ok(())
}

/// Structured logging; `RUST_LOG` wins over the configured level
fn init_tracing(config: &ObservabilityConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true);

    if config.json_logging {
        builder.json().init();
    } else {
        builder.init();
    }
}

/// Serve Prometheus metrics on their own port; port 0 disables the exporter
fn install_metrics_exporter(port: u16) -> anyhow::Result<()> {
    if port == 0 {
        info!("Metrics exporter disabled");
        return Ok(());
    }

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    PrometheusBuilder::new()
        .with_http_listener(addr)
        .set_buckets_for_metric(
            Matcher::Suffix("request_duration_seconds".to_string()),
            metrics::LATENCY_BUCKETS,
        )?
        .set_buckets_for_metric(
            Matcher::Suffix("refresh_duration_seconds".to_string()),
            metrics::REFRESH_BUCKETS,
        )?
        .set_buckets_for_metric(
            Matcher::Suffix("source_fetch_duration_seconds".to_string()),
            metrics::REFRESH_BUCKETS,
        )?
        .install()
        .context("Failed to install Prometheus exporter")?;

    info!("Metrics exporter listening on {}", addr);
    Ok(())
}

async fn create_store(config: &AppConfig) -> anyhow::Result<Arc<dyn PaperStore>> {
    match config.store.backend {
        StoreBackend::Postgres => {
            info!("Connecting to database...");
            let db = DbPool::new(&config.database).await?;
            if config.database.run_migrations {
                db.migrate().await?;
            }
            Ok(Arc::new(Repository::new(db)))
        }
        StoreBackend::Memory => {
            warn!("Using in-memory paper store; ratings are lost on restart");
            Ok(Arc::new(InMemoryPaperStore::new()))
        }
    }
}

/// Create the main application router
fn create_router(state: AppState) -> Router {
    // CORS configuration
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    // Request ID propagation
    let request_id = SetRequestIdLayer::x_request_id(MakeRequestUuid);
    let propagate_id = PropagateRequestIdLayer::x_request_id();

    // API routes
    let api_routes = Router::new()
        // Health endpoints
        .route("/health", get(handlers::health::health))
        .route("/ready", get(handlers::health::ready))

        // Arena endpoints
        .route("/papers/random", get(handlers::papers::random_pair))
        .route("/papers/elo", post(handlers::papers::record_vote))
        .route("/papers/top", get(handlers::papers::top_papers))
        .route("/papers/feed", get(handlers::papers::preview_feed))
        .route("/papers/refresh", post(handlers::papers::refresh_pool))
        .route("/papers/{id}", get(handlers::papers::get_paper))
        .route_layer(from_fn(middleware::metrics::track_metrics));

    let mut app = Router::new().nest("/api", api_routes);

    let rate_limit = &state.config.rate_limit;
    if rate_limit.enabled {
        let limiter = middleware::rate_limit::create_rate_limiter(
            rate_limit.requests_per_second,
            rate_limit.burst,
        );
        app = app.layer(from_fn_with_state(
            limiter,
            middleware::rate_limit::rate_limit_middleware,
        ));
    }

    // Compose the app
    app.layer(TimeoutLayer::new(state.config.request_timeout()))
        .layer(CompressionLayer::new())
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .layer(request_id)
        .layer(propagate_id)
        .with_state(state)
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
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
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, starting shutdown..."),
        _ = terminate => info!("Received SIGTERM, starting shutdown..."),
    }
}
