//! # API Request/Response Types
//!
//! JSON bodies of the HTTP API. Requests use camelCase field names.

use crate::orchestrator::{Merged, StatusReport};
use mixer_core::{Direction, MixerError};
use serde::{Deserialize, Serialize};

// =============================================================================
// HEALTH / STATUS
// =============================================================================

/// Health check response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

impl Default for HealthResponse {
    fn default() -> Self {
        Self {
            status: "ok".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

/// Origin and warm cache status.
#[derive(Debug, Clone, Serialize)]
pub struct StatusResponse {
    pub version: String,
    #[serde(flatten)]
    pub report: StatusReport,
}

// =============================================================================
// ENVELOPE
// =============================================================================

/// Envelope of every `/v1` response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MixerResponse<T> {
    pub success: bool,
    pub partial: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl<T> MixerResponse<T> {
    pub fn success(merged: Merged<T>) -> Self {
        Self {
            success: true,
            partial: merged.partial,
            payload: Some(merged.payload),
            error: None,
        }
    }

    pub fn error(msg: impl Into<String>) -> Self {
        Self {
            success: false,
            partial: false,
            payload: None,
            error: Some(msg.into()),
        }
    }
}

// =============================================================================
// REQUESTS
// =============================================================================

/// `POST /v1/property-values`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PropertyValuesRequest {
    pub dcids: Vec<String>,
    pub property: String,
    /// `in` or `out`; empty or absent means `out`.
    #[serde(default)]
    pub direction: String,
    #[serde(default)]
    pub value_type: Option<String>,
    #[serde(default)]
    pub limit: usize,
}

impl PropertyValuesRequest {
    pub fn direction(&self) -> Result<Direction, MixerError> {
        Direction::parse(&self.direction)
    }
}

/// `POST /v1/triples`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TriplesRequest {
    pub dcids: Vec<String>,
    #[serde(default)]
    pub limit: usize,
}

/// `POST /v1/property-labels` and `POST /v1/place-stat-vars`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DcidsRequest {
    pub dcids: Vec<String>,
}

/// `POST /v1/places-in`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlacesInRequest {
    pub dcids: Vec<String>,
    pub place_type: String,
}

/// `POST /v1/stat-all`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatAllRequest {
    pub places: Vec<String>,
    pub stat_vars: Vec<String>,
    #[serde(default)]
    pub measurement_method: Option<String>,
}

/// `POST /v1/stat-value`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatValueRequest {
    pub place: String,
    pub stat_var: String,
    #[serde(default)]
    pub date: Option<String>,
    #[serde(default)]
    pub measurement_method: Option<String>,
}

/// `POST /v1/recon/resolve-ids`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolveIdsRequest {
    pub in_property: String,
    pub out_property: String,
    pub ids: Vec<String>,
}
