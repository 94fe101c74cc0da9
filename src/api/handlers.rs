//! HTTP handlers for the operational endpoints.

use std::sync::Arc;

use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use serde::Serialize;

use crate::pricing::{AdapterHealth, Aggregator};

/// Application state shared with handlers.
#[derive(Clone)]
pub struct AppState {
    /// The pricing aggregator backing readiness and status.
    pub aggregator: Arc<Aggregator>,
}

impl AppState {
    /// Create new app state over an aggregator.
    pub fn new(aggregator: Arc<Aggregator>) -> Self {
        Self { aggregator }
    }
}

/// Health check response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// Status: "ok".
    pub status: &'static str,
}

/// Readiness check response.
#[derive(Debug, Serialize)]
pub struct ReadyResponse {
    /// Whether a pricing table has been published.
    pub ready: bool,
    /// Current pricing generation.
    pub generation: u64,
}

/// Status response.
#[derive(Debug, Serialize)]
pub struct StatusResponse {
    /// Service status.
    pub status: &'static str,
    /// Current pricing generation.
    pub generation: u64,
    /// Lines in the current table.
    pub table_len: usize,
    /// When the table was built (RFC 3339).
    pub built_at: String,
    /// Per-adapter health.
    pub adapters: Vec<AdapterHealth>,
}

/// Health check handler - always returns 200.
pub async fn health() -> impl IntoResponse {
    Json(HealthResponse { status: "ok" })
}

/// Readiness handler - 200 once the first table is published, 503 before.
pub async fn ready(State(state): State<AppState>) -> impl IntoResponse {
    let (table, generation) = state.aggregator.snapshot();
    let is_ready = generation >= 1 && !table.is_empty();

    let response = ReadyResponse {
        ready: is_ready,
        generation,
    };

    if is_ready {
        (StatusCode::OK, Json(response))
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, Json(response))
    }
}

/// Status handler - table shape and adapter health.
pub async fn status(State(state): State<AppState>) -> impl IntoResponse {
    let (table, generation) = state.aggregator.snapshot();
    let adapters = state.aggregator.adapter_health().await;

    let status = if generation >= 1 { "running" } else { "starting" };

    Json(StatusResponse {
        status,
        generation,
        table_len: table.len(),
        built_at: table
            .built_at
            .format(&time::format_description::well_known::Rfc3339)
            .unwrap_or_default(),
        adapters,
    })
}
