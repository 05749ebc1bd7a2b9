//! # API Endpoint Handlers
//!
//! Each `/v1` handler validates its body, runs one orchestrator operation
//! and wraps the result in a [`MixerResponse`].

use super::{
    AppState,
    types::{
        DcidsRequest, HealthResponse, MixerResponse, PlacesInRequest, PropertyValuesRequest,
        ResolveIdsRequest, StatAllRequest, StatValueRequest, StatusResponse, TriplesRequest,
    },
};
use crate::orchestrator::Merged;
use axum::{Json, extract::State, http::StatusCode, response::IntoResponse};
use mixer_core::MixerError;
use serde::Serialize;

/// HTTP status for a request-level error.
pub fn status_for(error: &MixerError) -> StatusCode {
    match error {
        MixerError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
        // Origin-scoped errors only surface here under strict override.
        MixerError::AllOriginsFailed(_)
        | MixerError::StoreUnavailable { .. }
        | MixerError::QueryEngineTimeout { .. } => StatusCode::SERVICE_UNAVAILABLE,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn respond<T: Serialize>(
    operation: &'static str,
    result: Result<Merged<T>, MixerError>,
) -> (StatusCode, Json<MixerResponse<T>>) {
    match result {
        Ok(merged) => {
            if merged.partial {
                tracing::info!(operation, "served partial response");
            }
            (StatusCode::OK, Json(MixerResponse::success(merged)))
        }
        Err(e) => {
            let status = status_for(&e);
            if status.is_server_error() {
                tracing::warn!(operation, error = %e, "request failed");
            }
            (status, Json(MixerResponse::error(e.to_string())))
        }
    }
}

// =============================================================================
// HEALTH / STATUS
// =============================================================================

/// Health check endpoint.
pub async fn health_handler() -> impl IntoResponse {
    Json(HealthResponse::default())
}

/// Origin row counts and warm cache size.
pub async fn status_handler(State(state): State<AppState>) -> impl IntoResponse {
    let report = state.orchestrator.status().await;
    let response = StatusResponse {
        version: env!("CARGO_PKG_VERSION").to_string(),
        report,
    };
    (StatusCode::OK, Json(response))
}

// =============================================================================
// MIXER HANDLERS
// =============================================================================

pub async fn property_values_handler(
    State(state): State<AppState>,
    Json(request): Json<PropertyValuesRequest>,
) -> impl IntoResponse {
    let direction = match request.direction() {
        Ok(d) => d,
        Err(e) => return respond("property_values", Err(e)),
    };
    let result = state
        .orchestrator
        .property_values(
            &request.dcids,
            &request.property,
            direction,
            request.value_type.as_deref(),
            request.limit,
        )
        .await;
    respond("property_values", result)
}

pub async fn triples_handler(
    State(state): State<AppState>,
    Json(request): Json<TriplesRequest>,
) -> impl IntoResponse {
    let result = state.orchestrator.triples(&request.dcids, request.limit).await;
    respond("triples", result)
}

pub async fn property_labels_handler(
    State(state): State<AppState>,
    Json(request): Json<DcidsRequest>,
) -> impl IntoResponse {
    let result = state.orchestrator.property_labels(&request.dcids).await;
    respond("property_labels", result)
}

pub async fn places_in_handler(
    State(state): State<AppState>,
    Json(request): Json<PlacesInRequest>,
) -> impl IntoResponse {
    let result = state
        .orchestrator
        .places_in(&request.dcids, &request.place_type)
        .await;
    respond("places_in", result)
}

pub async fn place_stat_vars_handler(
    State(state): State<AppState>,
    Json(request): Json<DcidsRequest>,
) -> impl IntoResponse {
    let result = state.orchestrator.place_stat_vars(&request.dcids).await;
    respond("place_stat_vars", result)
}

pub async fn stat_all_handler(
    State(state): State<AppState>,
    Json(request): Json<StatAllRequest>,
) -> impl IntoResponse {
    let result = state
        .orchestrator
        .stat_all(
            &request.places,
            &request.stat_vars,
            request.measurement_method.as_deref(),
        )
        .await;
    respond("stat_all", result)
}

pub async fn stat_value_handler(
    State(state): State<AppState>,
    Json(request): Json<StatValueRequest>,
) -> impl IntoResponse {
    let result = state
        .orchestrator
        .stat_value(
            &request.place,
            &request.stat_var,
            request.date.as_deref(),
            request.measurement_method.as_deref(),
        )
        .await;
    respond("stat_value", result)
}

// =============================================================================
// RECONCILIATION HANDLER
// =============================================================================

pub async fn resolve_ids_handler(
    State(state): State<AppState>,
    Json(request): Json<ResolveIdsRequest>,
) -> impl IntoResponse {
    let result = state
        .orchestrator
        .resolve_ids(&request.in_property, &request.out_property, &request.ids)
        .await;
    respond("resolve_ids", result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use mixer_core::Origin;

    #[test]
    fn error_status_mapping() {
        assert_eq!(
            status_for(&MixerError::InvalidRequest("x".into())),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            status_for(&MixerError::AllOriginsFailed("x".into())),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            status_for(&MixerError::unavailable(Origin::Override, "down")),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            status_for(&MixerError::Io("disk".into())),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
