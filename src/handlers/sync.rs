//! # Sync Handlers
//!
//! User-triggered and operator-triggered sync passes. Both run inline under
//! the configured sync timeout; rows written before a timeout stay stored.

use std::future::Future;

use axum::{
    extract::{
        Path, Query, State,
        rejection::{JsonRejection, QueryRejection},
    },
    response::Json,
};
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;

use crate::auth::{AuthUser, OperatorAuth};
use crate::error::{ApiError, ServiceError};
use crate::server::AppState;
use crate::sync_executor::{SyncReport, SyncTarget};

/// Which connection to sync. With neither field set, the primary connection is used.
#[derive(Debug, Default, Serialize, Deserialize, ToSchema)]
pub struct SyncRequest {
    #[serde(default)]
    pub connection_id: Option<Uuid>,
    #[serde(default)]
    pub base_url: Option<String>,
    /// Re-verify the token before syncing
    #[serde(default)]
    pub verify: bool,
}

impl SyncRequest {
    fn target(&self) -> SyncTarget {
        match (&self.connection_id, &self.base_url) {
            (Some(id), _) => SyncTarget::Connection(*id),
            (None, Some(url)) if !url.trim().is_empty() => SyncTarget::BaseUrl(url.clone()),
            _ => SyncTarget::Primary,
        }
    }
}

#[derive(Debug, Default, Deserialize, IntoParams)]
pub struct OperatorSyncQuery {
    /// Re-verify the token before syncing (default: false)
    pub verify: Option<bool>,
}

/// Sync one of the caller's connections
#[utoipa::path(
    post,
    path = "/moodle/sync",
    security(("bearer_auth" = [])),
    request_body = SyncRequest,
    responses(
        (status = 200, description = "Sync finished, possibly with failed courses", body = SyncReport),
        (status = 401, description = "Unauthorized", body = ApiError),
        (status = 404, description = "Connection not found", body = ApiError),
        (status = 422, description = "Moodle rejected the token; connection marked invalid", body = ApiError),
        (status = 500, description = "Stored token could not be decrypted", body = ApiError),
        (status = 502, description = "Moodle unreachable or failing", body = ApiError),
        (status = 504, description = "Sync exceeded the configured timeout", body = ApiError)
    ),
    tag = "sync"
)]
pub async fn sync(
    State(state): State<AppState>,
    user: AuthUser,
    payload: Result<Option<Json<SyncRequest>>, JsonRejection>,
) -> Result<Json<SyncReport>, ApiError> {
    // No body at all means the primary connection
    let request = payload?.map(|Json(request)| request).unwrap_or_default();
    let executor = state.sync_executor();

    let report = with_sync_timeout(
        &state,
        executor.run(&user.user_id, request.target(), request.verify),
    )
    .await?;
    Ok(Json(report))
}

/// Sync any connection by id, on behalf of its owner
#[utoipa::path(
    post,
    path = "/operator/connections/{id}/sync",
    security(("operator_auth" = [])),
    params(("id" = Uuid, Path, description = "Connection id"), OperatorSyncQuery),
    responses(
        (status = 200, description = "Sync finished", body = SyncReport),
        (status = 401, description = "Unauthorized", body = ApiError),
        (status = 404, description = "Connection not found", body = ApiError),
        (status = 422, description = "Moodle rejected the token; connection marked invalid", body = ApiError),
        (status = 504, description = "Sync exceeded the configured timeout", body = ApiError)
    ),
    tag = "operators"
)]
pub async fn operator_sync(
    State(state): State<AppState>,
    _operator: OperatorAuth,
    Path(id): Path<Uuid>,
    query: Result<Query<OperatorSyncQuery>, QueryRejection>,
) -> Result<Json<SyncReport>, ApiError> {
    let Query(query) = query?;
    tracing::info!(connection_id = %id, "operator sync requested");
    let executor = state.sync_executor();

    let report = with_sync_timeout(
        &state,
        executor.run_privileged(id, query.verify.unwrap_or(false)),
    )
    .await?;
    Ok(Json(report))
}

async fn with_sync_timeout<F>(state: &AppState, pass: F) -> Result<SyncReport, ServiceError>
where
    F: Future<Output = Result<SyncReport, ServiceError>>,
{
    let limit = state.config.moodle.sync_timeout();
    match tokio::time::timeout(limit, pass).await {
        Ok(result) => result,
        Err(_) => {
            tracing::warn!(timeout_secs = limit.as_secs(), "sync pass timed out");
            Err(ServiceError::Timeout(limit.as_secs()))
        }
    }
}
