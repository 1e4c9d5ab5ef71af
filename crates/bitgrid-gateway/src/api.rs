//! HTTP endpoints: grid snapshot/toggle and operator introspection.

use std::sync::Arc;

use axum::{
    extract::{rejection::FormRejection, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Form, Json,
};
use serde::Deserialize;
use tracing::{error, info};

use bitgrid_core::error::GridError;
use bitgrid_core::grid::encode_snapshot;
use bitgrid_core::protocol::{parse_cell, Outbound};

use crate::state::GatewayState;

/// Plain-text error body with a status code.
#[derive(Debug)]
pub struct ApiError(StatusCode, &'static str);

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.0, self.1).into_response()
    }
}

impl ApiError {
    fn from_grid(e: &GridError, server_msg: &'static str) -> Self {
        if e.is_client_error() {
            ApiError(StatusCode::BAD_REQUEST, "Invalid cell index")
        } else {
            error!(%e, "{server_msg}");
            ApiError(StatusCode::INTERNAL_SERVER_ERROR, server_msg)
        }
    }
}

pub async fn ping() -> &'static str {
    "pong"
}

pub async fn get_grid(State(state): State<Arc<GatewayState>>) -> Result<String, ApiError> {
    let bits = state
        .grid
        .state()
        .await
        .map_err(|e| ApiError::from_grid(&e, "Failed to get grid state"))?;
    Ok(encode_snapshot(&bits, state.config.snapshot_encoding()))
}

#[derive(Debug, Deserialize)]
pub struct SetForm {
    cell: Option<String>,
}

pub async fn set_cell(
    State(state): State<Arc<GatewayState>>,
    form: Result<Form<SetForm>, FormRejection>,
) -> Result<String, ApiError> {
    let Form(form) = form.map_err(|_| ApiError(StatusCode::BAD_REQUEST, "Invalid form data"))?;
    let cell = form
        .cell
        .filter(|c| !c.is_empty())
        .ok_or(ApiError(StatusCode::BAD_REQUEST, "Cell parameter is missing"))?;

    let index = parse_cell(&cell).map_err(|e| ApiError::from_grid(&e, "Invalid cell index"))?;
    let bit = state
        .grid
        .toggle(index)
        .await
        .map_err(|e| ApiError::from_grid(&e, "Failed to toggle grid cell"))?;

    #[cfg(feature = "metrics")]
    crate::metrics::record_toggle();

    state.hub.broadcast(&Outbound::Toggled { index, bit }).await;
    Ok(format!("{index}:{bit}"))
}

pub async fn count(State(state): State<Arc<GatewayState>>) -> impl IntoResponse {
    Json(state.hub.count().await)
}

pub async fn clients(State(state): State<Arc<GatewayState>>) -> impl IntoResponse {
    Json(state.hub.clients().await)
}

#[derive(Debug, Deserialize)]
pub struct KickParams {
    #[serde(rename = "clientId")]
    client_id: Option<String>,
    duration: Option<String>,
}

pub async fn kick(
    State(state): State<Arc<GatewayState>>,
    Query(params): Query<KickParams>,
) -> Result<(StatusCode, &'static str), ApiError> {
    let client_id = params
        .client_id
        .filter(|id| !id.is_empty())
        .ok_or(ApiError(StatusCode::BAD_REQUEST, "Missing clientId"))?;
    // Missing or unparseable durations mean "no ban"
    let duration = params
        .duration
        .and_then(|d| d.parse::<i64>().ok())
        .unwrap_or(0);

    if !state.hub.kick(&client_id, duration).await {
        return Err(ApiError(StatusCode::BAD_REQUEST, "Client not found"));
    }
    info!(client_id = %client_id, duration, "Kick requested over HTTP");
    Ok((StatusCode::OK, "Client kicked"))
}

#[cfg(feature = "metrics")]
pub async fn metrics(State(state): State<Arc<GatewayState>>) -> Response {
    match &state.metrics {
        Some(handle) => handle.render().into_response(),
        None => (StatusCode::NOT_FOUND, "Metrics recorder not installed").into_response(),
    }
}
