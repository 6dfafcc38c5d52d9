use aduana_utils::{init_logging, AppConfig, RowNormalizer};
use anyhow::Result;
use axum::{
    extract::DefaultBodyLimit,
    http::{header, Method},
    routing::get,
    serve, Router,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::{
    compression::CompressionLayer,
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::info;

mod classifier;
mod extraction;
mod handlers;
mod metrics;
mod middleware;
mod publisher;
mod routes;
mod script_runner;
mod session;
mod vlm_client;

#[cfg(test)]
mod property_tests;

use classifier::{Classifier, VlmClassifier};
use extraction::{IntakeService, ScriptImageExtractor, TableProformaExtractor, VlmProformaExtractor};
use handlers::{health_check, metrics_handler};
use metrics::ServiceMetrics;
use middleware::*;
use publisher::{Publisher, ScriptPublisher};
use script_runner::ScriptRunner;
use session::SessionRegistry;
use vlm_client::VlmClient;

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let config = AppConfig::load().unwrap_or_else(|e| {
        eprintln!("Failed to load configuration ({}), using defaults", e);
        AppConfig::default()
    });

    // Initialize logging
    init_logging(&config.logging)?;
    info!("Starting Aduana liquidation service");

    let state = build_state(config.clone())?;
    info!(
        model = %config.vlm.model,
        scripts_dir = %config.scripts.scripts_dir,
        "Collaborators configured"
    );

    let app = create_app(state);

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port).parse()?;
    let listener = TcpListener::bind(&addr).await?;
    info!("Liquidation service listening on {}", addr);

    serve(listener, app).await?;

    Ok(())
}

/// Wire the script and VLM backed collaborators.
fn build_state(config: AppConfig) -> Result<AppState> {
    let runner = ScriptRunner::new(&config.scripts)
        .with_env("OPENAI_API_KEY", config.vlm.api_key.clone())
        .with_env("OPENAI_MODEL", config.vlm.model.clone());
    let vlm = Arc::new(VlmClient::new(&config.vlm)?);

    let intake = IntakeService::new(
        Arc::new(ScriptImageExtractor::new(runner.clone(), &config.scripts)),
        Arc::new(TableProformaExtractor::new(runner.clone(), &config.scripts)),
        Arc::new(VlmProformaExtractor::new(vlm.clone(), runner.clone(), &config.scripts)),
        RowNormalizer::new(config.normalization.clone()),
    );

    Ok(AppState {
        sessions: SessionRegistry::new(),
        intake,
        classifier: Arc::new(VlmClassifier::new(vlm)),
        publisher: Arc::new(ScriptPublisher::new(runner, &config.scripts)),
        metrics: ServiceMetrics::new()?,
        config,
    })
}

fn create_app(state: AppState) -> Router {
    let max_request_size = state.config.server.max_request_size;

    Router::new()
        // Health check endpoint
        .route("/health", get(health_check))
        .route("/metrics", get(metrics_handler))

        // API routes
        .nest("/api/v1", routes::create_api_routes())

        // Middleware stack
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CompressionLayer::new())
                .layer(
                    CorsLayer::new()
                        .allow_origin(Any)
                        .allow_methods([Method::GET, Method::POST, Method::PATCH, Method::DELETE])
                        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION]),
                )
                .layer(DefaultBodyLimit::max(max_request_size))
                .layer(axum::middleware::from_fn(request_id_middleware)),
        )

        // Application state
        .with_state(state)
}

#[derive(Clone)]
pub struct AppState {
    pub config: AppConfig,
    pub sessions: SessionRegistry,
    pub intake: IntakeService,
    pub classifier: Arc<dyn Classifier>,
    pub publisher: Arc<dyn Publisher>,
    pub metrics: ServiceMetrics,
}
