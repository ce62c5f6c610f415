//! # File Proxy Handler

use axum::{
    body::Body,
    extract::{Path, Query, State, rejection::QueryRejection},
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use serde::Deserialize;
use utoipa::IntoParams;

use crate::auth::AuthUser;
use crate::error::ApiError;
use crate::file_proxy::{FileAction, FileRequest, ProxiedFile};
use crate::server::AppState;

#[derive(Debug, Default, Deserialize, IntoParams)]
pub struct FileQuery {
    /// `open` (default) renders viewable types inline, `download` forces an attachment
    pub action: Option<FileAction>,
    /// Position in the module's file list (default: 0)
    pub index: Option<usize>,
}

/// Stream a module file from Moodle using the caller's stored token
#[utoipa::path(
    get,
    path = "/moodle/files/{module_id}",
    security(("bearer_auth" = [])),
    params(("module_id" = i64, Path, description = "Moodle course module id"), FileQuery),
    responses(
        (status = 200, description = "File body streamed from Moodle", content_type = "application/octet-stream"),
        (status = 400, description = "Module has no usable file URL", body = ApiError),
        (status = 401, description = "Unauthorized", body = ApiError),
        (status = 403, description = "Module belongs to another user", body = ApiError),
        (status = 404, description = "Module not found", body = ApiError),
        (status = 502, description = "Moodle refused the download", body = ApiError)
    ),
    tag = "files"
)]
pub async fn fetch_file(
    State(state): State<AppState>,
    user: AuthUser,
    Path(module_id): Path<i64>,
    query: Result<Query<FileQuery>, QueryRejection>,
) -> Result<Response, ApiError> {
    let Query(query) = query?;
    let request = FileRequest {
        module_id,
        action: query.action.unwrap_or_default(),
        index: query.index.unwrap_or(0),
    };

    let file = state.file_proxy().fetch(&user.user_id, request).await?;
    Ok(stream_response(file))
}

fn stream_response(file: ProxiedFile) -> Response {
    let content_type = HeaderValue::from_str(&file.content_type)
        .unwrap_or_else(|_| HeaderValue::from_static("application/octet-stream"));
    let disposition = HeaderValue::from_str(&file.content_disposition)
        .unwrap_or_else(|_| HeaderValue::from_static("attachment"));

    let mut response = (
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, content_type),
            (header::CONTENT_DISPOSITION, disposition),
            (header::CACHE_CONTROL, HeaderValue::from_static("private, no-store")),
        ],
        Body::from_stream(file.upstream.bytes_stream()),
    )
        .into_response();

    if let Some(length) = file.content_length {
        response
            .headers_mut()
            .insert(header::CONTENT_LENGTH, HeaderValue::from(length));
    }

    response
}
