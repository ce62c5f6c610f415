//! # Connection Handlers
//!
//! Linking a Moodle site to the caller and inspecting or re-verifying the
//! caller's stored connections.

use axum::{
    extract::{Path, State, rejection::JsonRejection},
    response::Json,
};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::auth::AuthUser;
use crate::connections::{ConnectRequest, ConnectionSummary, SiteIdentity};
use crate::error::ApiError;
use crate::server::AppState;

/// Response wrapper for connection listing
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ConnectionsResponse {
    pub connections: Vec<ConnectionSummary>,
}

/// Connect a Moodle site with an existing token or with username and password
#[utoipa::path(
    post,
    path = "/moodle/connect",
    security(("bearer_auth" = [])),
    request_body = ConnectRequest,
    responses(
        (status = 200, description = "Connection stored and verified", body = ConnectionSummary),
        (status = 400, description = "Validation error", body = ApiError),
        (status = 401, description = "Unauthorized", body = ApiError),
        (status = 422, description = "Moodle rejected the credentials or token", body = ApiError),
        (status = 502, description = "Moodle unreachable or failing", body = ApiError)
    ),
    tag = "connections"
)]
pub async fn connect(
    State(state): State<AppState>,
    user: AuthUser,
    payload: Result<Json<ConnectRequest>, JsonRejection>,
) -> Result<Json<ConnectionSummary>, ApiError> {
    let Json(request) = payload?;
    let summary = state
        .connection_service()
        .connect(&user.user_id, request)
        .await?;
    Ok(Json(summary))
}

/// List the caller's connections, oldest first
#[utoipa::path(
    get,
    path = "/moodle/connections",
    security(("bearer_auth" = [])),
    responses(
        (status = 200, description = "Caller's connections", body = ConnectionsResponse),
        (status = 401, description = "Unauthorized", body = ApiError)
    ),
    tag = "connections"
)]
pub async fn list_connections(
    State(state): State<AppState>,
    user: AuthUser,
) -> Result<Json<ConnectionsResponse>, ApiError> {
    let connections = state.connection_service().list(&user.user_id).await?;
    Ok(Json(ConnectionsResponse { connections }))
}

/// The caller's earliest-created active connection
#[utoipa::path(
    get,
    path = "/moodle/connections/primary",
    security(("bearer_auth" = [])),
    responses(
        (status = 200, description = "Primary connection", body = ConnectionSummary),
        (status = 401, description = "Unauthorized", body = ApiError),
        (status = 404, description = "No active connection", body = ApiError)
    ),
    tag = "connections"
)]
pub async fn primary_connection(
    State(state): State<AppState>,
    user: AuthUser,
) -> Result<Json<ConnectionSummary>, ApiError> {
    let summary = state.connection_service().primary(&user.user_id).await?;
    Ok(Json(summary))
}

/// Re-verify a stored token and rotate its ciphertext
#[utoipa::path(
    post,
    path = "/moodle/connections/{id}/verify",
    security(("bearer_auth" = [])),
    params(("id" = Uuid, Path, description = "Connection id")),
    responses(
        (status = 200, description = "Token is valid", body = SiteIdentity),
        (status = 401, description = "Unauthorized", body = ApiError),
        (status = 404, description = "Connection not found", body = ApiError),
        (status = 422, description = "Moodle rejected the token; connection marked invalid", body = ApiError),
        (status = 500, description = "Stored token could not be decrypted", body = ApiError)
    ),
    tag = "connections"
)]
pub async fn verify_connection(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<Uuid>,
) -> Result<Json<SiteIdentity>, ApiError> {
    let identity = state
        .connection_service()
        .verify(&user.user_id, id)
        .await?;
    Ok(Json(identity))
}
