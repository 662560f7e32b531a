//! HTTP surface for Lookout: the GitHub webhook receiver plus a small JSON
//! API over stored reviews.

pub mod error;
pub mod routes;
pub mod webhook;

use std::sync::Arc;

use axum::http::HeaderValue;
use axum::routing::{get, post};
use axum::Router;
use lookout_core::{LookoutConfig, LookoutError};
use lookout_review::pipeline::{Collaborators, ReviewOrchestrator};
use lookout_review::store::ReviewStore;
use lookout_review::worker::{self, ReviewQueue};
use tokio::net::TcpListener;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;

#[derive(Clone)]
pub struct AppState {
    pub store: ReviewStore,
    pub queue: ReviewQueue,
    /// Shared webhook secret; empty means every delivery is rejected.
    pub webhook_secret: Arc<str>,
}

impl AppState {
    /// Wire a store and collaborators into a running worker queue.
    ///
    /// Must be called inside a Tokio runtime.
    pub fn start(config: &LookoutConfig, store: ReviewStore, services: Collaborators) -> Self {
        let orchestrator = Arc::new(ReviewOrchestrator::new(
            store.clone(),
            services,
            config.github.max_files,
        ));
        let (queue, _dispatcher) = ReviewQueue::start(orchestrator, &config.worker);
        Self {
            store,
            queue,
            webhook_secret: config
                .github
                .webhook_secret
                .as_deref()
                .unwrap_or_default()
                .into(),
        }
    }
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    let allow_origin = if origins.iter().any(|o| o == "*") {
        AllowOrigin::any()
    } else {
        let values: Vec<HeaderValue> = origins
            .iter()
            .filter_map(|o| match HeaderValue::from_str(o) {
                Ok(value) => Some(value),
                Err(_) => {
                    tracing::warn!(origin = %o, "ignoring invalid CORS origin");
                    None
                }
            })
            .collect();
        AllowOrigin::list(values)
    };
    CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_methods(Any)
        .allow_headers(Any)
}

pub fn app(state: AppState, cors_origins: &[String]) -> Router {
    Router::new()
        .route("/webhook/github", post(webhook::github_webhook))
        .route("/api/health", get(routes::health))
        .route(
            "/api/reviews",
            get(routes::list_reviews).post(routes::create_review),
        )
        .route("/api/reviews/seed", post(routes::seed_review))
        .route("/api/reviews/{id}", get(routes::get_review))
        .layer(cors_layer(cors_origins))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Open the store, fail reviews interrupted by a previous shutdown, start
/// the worker queue and serve until Ctrl-C.
///
/// # Errors
///
/// Returns [`LookoutError::Database`] if the store cannot be opened,
/// [`LookoutError::Config`] if a client cannot be built or the bind
/// address is unusable, and [`LookoutError::Io`] on server failures.
pub async fn serve(config: LookoutConfig) -> Result<(), LookoutError> {
    let store = ReviewStore::open(&config.store.database_path)?;
    worker::reconcile_interrupted(&store).await?;

    if config.github.webhook_secret.as_deref().unwrap_or_default().is_empty() {
        tracing::warn!("GITHUB_WEBHOOK_SECRET is not set; all webhook deliveries will be rejected");
    }

    let services = Collaborators::from_config(&config)?;
    let state = AppState::start(&config, store, services);

    let listener = TcpListener::bind(&config.server.bind)
        .await
        .map_err(|e| LookoutError::Config(format!("cannot bind {}: {e}", config.server.bind)))?;
    tracing::info!(addr = %config.server.bind, "listening");

    axum::serve(listener, app(state, &config.server.cors_origins))
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutting down");
}
