//! DocResearch API Gateway
//!
//! The HTTP entry point for the answering pipeline.
//! Handles:
//! - Question answering and evaluation statistics
//! - Rate limiting
//! - Observability (logging, metrics, request ids)

mod handlers;
mod middleware;

use anyhow::Context;
use axum::{
    routing::{get, post},
    Router,
};
use docresearch_agent::{EvaluationTracker, Orchestrator, PipelineDeps};
use docresearch_common::{
    config::{AppConfig, ObservabilityConfig},
    db::DbPool,
    embeddings::create_embedder,
    llm::create_llm_clients,
    logging::init_tracing,
    metrics::{self, LATENCY_BUCKETS, METRICS_PREFIX, UPSTREAM_BUCKETS},
    websearch::create_web_search,
};
use docresearch_search::{PgVectorSearch, Tokenizer};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tower_http::{
    cors::{Any, CorsLayer},
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};
use tracing::{error, info, warn};

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub db: DbPool,
    pub orchestrator: Arc<Orchestrator>,
    pub evaluations: Arc<EvaluationTracker>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    let config = match AppConfig::load() {
        Ok(config) => config,
        Err(e) => {
            init_tracing(&ObservabilityConfig::default());
            error!(error = %e, "Failed to load configuration");
            return Err(e.into());
        }
    };

    init_tracing(&config.observability);
    config.validate().context("Invalid configuration")?;

    info!(
        version = docresearch_common::VERSION,
        service = %config.observability.service_name,
        "Starting DocResearch gateway"
    );

    let config = Arc::new(config);

    // Initialize metrics
    install_metrics_exporter(&config.observability)?;
    metrics::register_metrics();

    // Vector index
    let db = DbPool::new(&config.database).await?;
    let embedder = create_embedder(&config.embedding, config.embedding_api_key())?;
    let vector_search = PgVectorSearch::new(db.clone(), embedder, config.database.chunks_table.clone())?;

    // Model and search collaborators
    let llm = create_llm_clients(&config.llm)?;
    let web_search = create_web_search(&config.web_search)?;
    let tokenizer = Tokenizer::from_config(&config.tokenizer)?;

    let deps = PipelineDeps {
        judge: llm.judge,
        generator: llm.generator,
        vector_search: Arc::new(vector_search),
        web_search,
        tokenizer: Arc::new(tokenizer),
    };
    let orchestrator = Orchestrator::new(deps, &config.pipeline);

    info!(
        top_k = config.pipeline.top_k,
        alpha = config.pipeline.alpha,
        max_retrieval_attempts = config.pipeline.max_retrieval_attempts,
        max_generation_attempts = config.pipeline.max_generation_attempts,
        llm_provider = %config.llm.provider,
        web_search_provider = %config.web_search.provider,
        "Pipeline ready"
    );

    let state = AppState {
        config: config.clone(),
        db,
        orchestrator: Arc::new(orchestrator),
        evaluations: Arc::new(EvaluationTracker::new()),
    };

    let app = create_router(state);

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port)
        .parse()
        .context("Invalid server address")?;
    info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(config.shutdown_timeout()))
        .await?;

    info!("Server shutdown complete");
    Ok(())
}

/// Serve Prometheus metrics on their own port; port 0 disables the exporter
fn install_metrics_exporter(config: &ObservabilityConfig) -> anyhow::Result<()> {
    if config.metrics_port == 0 {
        warn!("Metrics exporter disabled");
        return Ok(());
    }

    let addr = SocketAddr::from(([0, 0, 0, 0], config.metrics_port));
    PrometheusBuilder::new()
        .with_http_listener(addr)
        .set_buckets_for_metric(
            Matcher::Full(format!("{}_request_duration_seconds", METRICS_PREFIX)),
            LATENCY_BUCKETS,
        )?
        .set_buckets_for_metric(
            Matcher::Full(format!("{}_pipeline_duration_seconds", METRICS_PREFIX)),
            LATENCY_BUCKETS,
        )?
        .set_buckets_for_metric(
            Matcher::Full(format!("{}_llm_duration_seconds", METRICS_PREFIX)),
            UPSTREAM_BUCKETS,
        )?
        .set_buckets_for_metric(
            Matcher::Full(format!("{}_embedding_duration_seconds", METRICS_PREFIX)),
            UPSTREAM_BUCKETS,
        )?
        .install()
        .context("Failed to install Prometheus exporter")?;

    info!(port = config.metrics_port, "Metrics exporter listening");
    Ok(())
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

    let mut api_routes = Router::new()
        .route("/query", post(handlers::query::query))
        .route("/evaluation/stats", get(handlers::query::evaluation_stats));

    let rate_limit = &state.config.rate_limit;
    if rate_limit.enabled {
        let limit = rate_limit.requests_per_second;
        let limiter = middleware::rate_limit::create_rate_limiter(limit, rate_limit.burst);
        api_routes = api_routes.layer(axum::middleware::from_fn(move |request, next| {
            middleware::rate_limit::rate_limit_middleware(request, next, limiter.clone(), limit)
        }));
    }

    // Dropping a timed-out request cancels its pipeline run
    let timeout = TimeoutLayer::new(state.config.request_timeout());

    Router::new()
        .route("/health", get(handlers::health::health))
        .route("/ready", get(handlers::health::ready))
        .nest("/v1", api_routes)
        .route_layer(axum::middleware::from_fn(middleware::metrics::track_metrics))
        .layer(timeout)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .layer(request_id)
        .layer(propagate_id)
        .with_state(state)
}

/// Graceful shutdown signal handler
async fn shutdown_signal(grace: Duration) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
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

    // In-flight pipeline runs get `grace` to finish
    tokio::spawn(async move {
        tokio::time::sleep(grace).await;
        warn!(grace_secs = grace.as_secs(), "Graceful shutdown timed out, exiting");
        std::process::exit(1);
    });
}
