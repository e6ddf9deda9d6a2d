//! Pull and submit endpoints for the launch snapshot.

use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use launchsync_common::LaunchAggregate;
use serde::Serialize;
use utoipa::ToSchema;

use crate::auth::middleware::AuthUser;
use crate::error::{ApiError, ApiErrorBody};
use crate::gateway::session::SessionInfo;
use crate::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/sync", get(get_sync).post(post_sync))
        .route("/sync/devices", get(list_devices))
}

// ---------------------------------------------------------------------------
// GET /api/v1/sync
// ---------------------------------------------------------------------------

#[utoipa::path(
    get,
    path = "/api/v1/sync",
    tag = "Sync",
    responses(
        (status = 200, description = "Current snapshot", body = LaunchAggregate),
        (status = 401, description = "Missing or invalid token", body = ApiErrorBody),
    ),
    security(("bearer" = [])),
)]
pub async fn get_sync(
    State(state): State<AppState>,
    auth: AuthUser,
) -> Result<Json<LaunchAggregate>, ApiError> {
    let snapshot = state.aggregates.load_or_create(auth.user_id).await?;
    Ok(Json(snapshot))
}

// ---------------------------------------------------------------------------
// POST /api/v1/sync
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize, ToSchema)]
pub struct SyncResponse {
    pub message: String,
    /// Live sessions that accepted the pushed snapshot.
    pub delivered: usize,
}

#[utoipa::path(
    post,
    path = "/api/v1/sync",
    tag = "Sync",
    request_body = LaunchAggregate,
    responses(
        (status = 200, description = "Snapshot stored and pushed to live devices", body = SyncResponse),
        (status = 400, description = "Malformed snapshot", body = ApiErrorBody),
        (status = 401, description = "Missing or invalid token", body = ApiErrorBody),
        (status = 500, description = "Snapshot could not be stored", body = ApiErrorBody),
    ),
    security(("bearer" = [])),
)]
pub async fn post_sync(
    State(state): State<AppState>,
    auth: AuthUser,
    body: Result<Json<LaunchAggregate>, JsonRejection>,
) -> Result<Json<SyncResponse>, ApiError> {
    let Json(mut snapshot) = body.map_err(|e| {
        tracing::debug!(error = %e, user_id = auth.user_id, "rejected sync body");
        ApiError::bad_request("Invalid snapshot")
    })?;

    if snapshot.last_launch.is_none() {
        return Err(ApiError::bad_request("last_launch must be an RFC 3339 timestamp"));
    }

    // The credential, not the body, decides whose counters these are.
    if snapshot.user_id != auth.user_id {
        tracing::debug!(claimed = snapshot.user_id, user_id = auth.user_id, "overriding snapshot user_id");
        snapshot.user_id = auth.user_id;
    }

    if !snapshot.is_consistent() {
        tracing::warn!(user_id = auth.user_id, total = snapshot.total, "snapshot totals disagree with granularity maps");
    }

    state.aggregates.save(&snapshot).await?;

    let report = state.dispatcher.dispatch(auth.user_id, snapshot);
    tracing::info!(
        user_id = auth.user_id,
        delivered = report.delivered,
        dropped = report.dropped,
        "snapshot synced"
    );

    Ok(Json(SyncResponse {
        message: "synced".to_string(),
        delivered: report.delivered,
    }))
}

// ---------------------------------------------------------------------------
// GET /api/v1/sync/devices
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize, ToSchema)]
pub struct DevicesResponse {
    pub devices: Vec<SessionInfo>,
}

#[utoipa::path(
    get,
    path = "/api/v1/sync/devices",
    tag = "Sync",
    responses(
        (status = 200, description = "The caller's connected devices", body = DevicesResponse),
        (status = 401, description = "Missing or invalid token", body = ApiErrorBody),
    ),
    security(("bearer" = [])),
)]
pub async fn list_devices(State(state): State<AppState>, auth: AuthUser) -> Json<DevicesResponse> {
    Json(DevicesResponse {
        devices: state.registry.sessions_for(auth.user_id),
    })
}
