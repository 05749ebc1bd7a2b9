//! # Mixer HTTP API
//!
//! JSON-over-HTTP front end of the orchestrator.
//!
//! ## Endpoints
//!
//! - `GET /health` - Liveness
//! - `GET /status` - Origin row counts and warm cache size
//! - `POST /v1/property-values` - Neighbors over one predicate
//! - `POST /v1/triples` - All triples touching each entity
//! - `POST /v1/property-labels` - In/out predicate names
//! - `POST /v1/places-in` - Contained places of a type
//! - `POST /v1/place-stat-vars` - Stat vars with data for a place
//! - `POST /v1/stat-all` - Observation series per place and stat var
//! - `POST /v1/stat-value` - One observation value
//! - `POST /v1/recon/resolve-ids` - Id reconciliation via the query engine
//!
//! ## Environment
//!
//! - `MIXER_CORS_ORIGINS`: comma-separated origins, or "*" (default: localhost only)
//! - `MIXER_RATE_LIMIT`: requests per second (default: 100, 0 to disable)
//! - `MIXER_API_KEY`: if set, requires Bearer token authentication

mod auth;
mod handlers;
mod middleware;
mod types;

pub use auth::get_api_key_from_env;
pub use handlers::status_for;
pub use middleware::{create_rate_limiter, get_rate_limit_from_env};
pub use types::{
    DcidsRequest, HealthResponse, MixerResponse, PlacesInRequest, PropertyValuesRequest,
    ResolveIdsRequest, StatAllRequest, StatValueRequest, StatusResponse, TriplesRequest,
};

use crate::orchestrator::Orchestrator;
use axum::{
    Router,
    extract::DefaultBodyLimit,
    http::{HeaderValue, Method, header},
    middleware as axum_middleware,
    routing::{get, post},
};
use mixer_core::MixerError;
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

const MAX_BODY_BYTES: usize = 2 * 1024 * 1024;

// =============================================================================
// SERVER STATE
// =============================================================================

#[derive(Clone, Debug)]
pub struct AppState {
    pub orchestrator: Orchestrator,
}

impl AppState {
    #[must_use]
    pub fn new(orchestrator: Orchestrator) -> Self {
        Self { orchestrator }
    }
}

// =============================================================================
// CORS CONFIGURATION
// =============================================================================

/// CORS from `MIXER_CORS_ORIGINS`; localhost only when unset or unusable.
fn build_cors_layer() -> CorsLayer {
    match std::env::var("MIXER_CORS_ORIGINS").ok().as_deref() {
        Some("*") => {
            tracing::warn!("CORS: allowing ALL origins (MIXER_CORS_ORIGINS=*)");
            CorsLayer::permissive()
        }
        Some(origins) => {
            let allowed: Vec<HeaderValue> = origins
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .filter_map(|s| match s.parse::<HeaderValue>() {
                    Ok(hv) => Some(hv),
                    Err(e) => {
                        tracing::warn!("CORS: invalid origin '{}': {}", s, e);
                        None
                    }
                })
                .collect();

            if allowed.is_empty() {
                tracing::warn!("CORS: no valid origins in MIXER_CORS_ORIGINS, using localhost");
                localhost_cors()
            } else {
                tracing::info!("CORS: allowing {} configured origins", allowed.len());
                restricted_cors(allowed)
            }
        }
        None => localhost_cors(),
    }
}

fn localhost_cors() -> CorsLayer {
    let origins = [
        "http://localhost:3000",
        "http://localhost:8080",
        "http://127.0.0.1:3000",
        "http://127.0.0.1:8080",
    ]
    .into_iter()
    .filter_map(|o| o.parse::<HeaderValue>().ok())
    .collect();
    restricted_cors(origins)
}

fn restricted_cors(origins: Vec<HeaderValue>) -> CorsLayer {
    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION])
}

// =============================================================================
// ROUTER CREATION
// =============================================================================

/// Build the router.
///
/// Middleware, outer to inner: tracing, CORS, body limit, rate limit,
/// authentication.
pub fn create_router(state: AppState) -> Router {
    let rate_limit = get_rate_limit_from_env();
    let has_auth = get_api_key_from_env().is_some();
    if !has_auth {
        tracing::warn!("API key authentication disabled; set MIXER_API_KEY to enable it");
    }

    let v1 = Router::new()
        .route("/property-values", post(handlers::property_values_handler))
        .route("/triples", post(handlers::triples_handler))
        .route("/property-labels", post(handlers::property_labels_handler))
        .route("/places-in", post(handlers::places_in_handler))
        .route("/place-stat-vars", post(handlers::place_stat_vars_handler))
        .route("/stat-all", post(handlers::stat_all_handler))
        .route("/stat-value", post(handlers::stat_value_handler))
        .route("/recon/resolve-ids", post(handlers::resolve_ids_handler));

    let mut router = Router::new()
        .route("/health", get(handlers::health_handler))
        .route("/status", get(handlers::status_handler))
        .nest("/v1", v1);

    if has_auth {
        router = router.layer(axum_middleware::from_fn(auth::api_key_auth_middleware));
    }

    if rate_limit > 0 {
        tracing::info!("rate limiting enabled: {} requests/second", rate_limit);
        router = router.layer(axum_middleware::from_fn_with_state(
            create_rate_limiter(rate_limit),
            middleware::rate_limit_middleware,
        ));
    }

    router
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(build_cors_layer())
                .layer(DefaultBodyLimit::max(MAX_BODY_BYTES)),
        )
        .with_state(state)
}

// =============================================================================
// SERVER STARTUP
// =============================================================================

/// Serve until Ctrl-C.
pub async fn run_server(addr: &str, orchestrator: Orchestrator) -> Result<(), MixerError> {
    let router = create_router(AppState::new(orchestrator));

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| MixerError::Io(format!("bind {} failed: {}", addr, e)))?;

    tracing::info!("mixer HTTP server listening on {}", addr);

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|e| MixerError::Io(format!("server error: {}", e)))
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!("cannot listen for Ctrl-C: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("shutting down");
}
