mod chain;
mod config;
mod deadline;
mod enrich;
mod error;
mod middleware;
mod routes;
mod scheduler;
mod services;
mod store;
mod types;

use axum::{
    extract::State,
    http::{Method, StatusCode},
    middleware::from_fn,
    routing::get,
    Router,
};
use chain::{ChainAdapter, HttpChainAdapter};
use config::AppConfig;
use services::aggregator::AggregatorService;
use services::ingest::IngestService;
use services::query::QueryService;
use services::realtime::RealtimeBus;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use store::Store;
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::{
    compression::CompressionLayer,
    cors::{Any, CorsLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};
use tracing::{info, warn};

/// Shared handles every route handler and background job reaches through.
/// Cheap to clone -- every field is an `Arc` or wraps a connection pool that
/// is itself `Arc`-backed internally.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub store: Store,
    pub chain: Arc<dyn ChainAdapter>,
    pub realtime: Arc<RealtimeBus>,
    pub ingest: IngestService,
    pub query: QueryService,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let config = AppConfig::from_env().unwrap_or_else(|err| {
        warn!(error = %err, "failed to load config from environment, using defaults");
        AppConfig::default()
    });

    if config.observability.metrics_enabled {
        let metrics_addr = SocketAddr::from(([0, 0, 0, 0], config.observability.prometheus_port));
        metrics_exporter_prometheus::PrometheusBuilder::new()
            .with_http_listener(metrics_addr)
            .install()?;
        info!(addr = %metrics_addr, "prometheus exporter installed");
    }

    let store = Store::connect(&config.store.url, config.store.max_connections).await?;
    info!("store connected and schema verified");

    let chain: Arc<dyn ChainAdapter> = Arc::new(HttpChainAdapter::new(
        config.chain.base_url.clone(),
        Duration::from_secs(config.chain.timeout_secs),
    )?);
    let realtime = Arc::new(RealtimeBus::new(&config.realtime));
    let service_deadline = Duration::from_secs(config.server.request_timeout_secs);
    let ingest = IngestService::new(store.clone(), realtime.clone(), chain.clone(), &config.analytics, service_deadline);
    let query = QueryService::new(store.clone(), config.analytics.cache_ttl_secs, service_deadline);

    let aggregator = AggregatorService::new(store.clone());
    let retention =
        services::retention::RetentionService::new(store.clone(), config.retention.clone(), realtime.clone());
    scheduler::spawn_all(aggregator, retention);
    info!("background schedule started");

    let config = Arc::new(config);
    let state = AppState {
        config: config.clone(),
        store,
        chain,
        realtime,
        ingest,
        query,
    };

    let app = build_router(state, &config);

    let addr = SocketAddr::from((config.server.host.parse::<std::net::IpAddr>()?, config.server.port));
    let listener = TcpListener::bind(addr).await?;
    info!(%addr, "analytics service listening");

    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

fn build_router(state: AppState, config: &AppConfig) -> Router {
    let cors = if config.server.cors_origins.iter().any(|o| o == "*") {
        CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any)
    } else {
        let origins: Vec<_> = config
            .server
            .cors_origins
            .iter()
            .filter_map(|o| o.parse().ok())
            .collect();
        CorsLayer::new()
            .allow_origin(origins)
            .allow_methods([Method::GET, Method::POST])
            .allow_headers(Any)
    };

    Router::new()
        .route("/health", get(health_check))
        .route("/ready", get(readiness_check))
        .nest("/api", routes::create_routes())
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CompressionLayer::new())
                .layer(TimeoutLayer::new(Duration::from_secs(config.server.request_timeout_secs)))
                .layer(cors)
                .layer(from_fn(middleware::request_id_middleware))
                .layer(from_fn(middleware::timing_middleware))
                .layer(from_fn(middleware::metrics_middleware)),
        )
        .with_state(state)
}

async fn health_check() -> &'static str {
    "OK"
}

/// Unlike `/health`, this one actually round-trips the store -- a listener
/// that can't reach Postgres should drop out of rotation.
async fn readiness_check(State(state): State<AppState>) -> Result<&'static str, StatusCode> {
    match state.store.pool.get().await {
        Ok(client) => match client.query_one("SELECT 1", &[]).await {
            Ok(_) => Ok("READY"),
            Err(_) => Err(StatusCode::SERVICE_UNAVAILABLE),
        },
        Err(_) => Err(StatusCode::SERVICE_UNAVAILABLE),
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.expect("failed to install ctrl-c handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install sigterm handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }

    info!("shutdown signal received, draining connections");
}
