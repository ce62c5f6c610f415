//! # Mirror Read Handlers
//!
//! Views over the caller's synced courses, course contents and assignments,
//! plus the per-module read flag. Nothing here talks to Moodle.

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    response::Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::auth::AuthUser;
use crate::error::{ApiError, ServiceError};
use crate::models::{assignment, course, course_content};
use crate::moodle::FileDescriptor;
use crate::normalization::group_assignments;
use crate::repositories::{AssignmentRepository, CourseContentRepository, CourseRepository};
use crate::server::AppState;

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct CourseView {
    pub course_id: i64,
    pub connection_id: Uuid,
    pub fullname: String,
    pub shortname: Option<String>,
    pub summary: Option<String>,
    pub visible: Option<bool>,
    pub progress: Option<f64>,
    pub start_date: Option<DateTime<Utc>>,
    pub end_date: Option<DateTime<Utc>>,
    pub category_id: Option<i64>,
}

impl From<course::Model> for CourseView {
    fn from(model: course::Model) -> Self {
        Self {
            course_id: model.course_id,
            connection_id: model.connection_id,
            fullname: model.fullname,
            shortname: model.shortname,
            summary: model.summary,
            visible: model.visible,
            progress: model.progress,
            start_date: model.start_date.map(|d| d.with_timezone(&Utc)),
            end_date: model.end_date.map(|d| d.with_timezone(&Utc)),
            category_id: model.category_id,
        }
    }
}

/// A downloadable file of a module, addressed by its `index`
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct FileView {
    pub index: usize,
    pub filename: Option<String>,
    pub mimetype: Option<String>,
    pub filesize: Option<i64>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ContentView {
    pub module_id: i64,
    pub section_id: Option<i64>,
    pub section_name: Option<String>,
    pub module_name: String,
    pub modname: Option<String>,
    pub read: bool,
    /// Files available through `/moodle/files/{module_id}`
    pub files: Vec<FileView>,
}

impl From<course_content::Model> for ContentView {
    fn from(model: course_content::Model) -> Self {
        let files = FileDescriptor::list_from_module(&model.raw)
            .into_iter()
            .enumerate()
            .filter(|(_, d)| d.download_url().is_some())
            .map(|(index, d)| FileView {
                index,
                filename: d.filename,
                mimetype: d.mimetype,
                filesize: d.filesize,
            })
            .collect();

        Self {
            module_id: model.module_id,
            section_id: model.section_id,
            section_name: model.section_name,
            module_name: model.module_name,
            modname: model.modname,
            read: model.read,
            files,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct AssignmentView {
    pub assignment_id: i64,
    pub course_id: i64,
    pub name: String,
    pub due_date: Option<DateTime<Utc>>,
    pub allow_submissions_from: Option<DateTime<Utc>>,
    pub cutoff_date: Option<DateTime<Utc>>,
    pub grade: Option<f64>,
    /// `visible` or `hidden`
    pub status: Option<String>,
    pub submission_status: Option<String>,
    pub completed: bool,
}

impl From<assignment::Model> for AssignmentView {
    fn from(model: assignment::Model) -> Self {
        Self {
            assignment_id: model.assignment_id,
            course_id: model.course_id,
            name: model.name,
            due_date: model.due_date.map(|d| d.with_timezone(&Utc)),
            allow_submissions_from: model.allow_submissions_from.map(|d| d.with_timezone(&Utc)),
            cutoff_date: model.cutoff_date.map(|d| d.with_timezone(&Utc)),
            grade: model.grade,
            status: model.status,
            submission_status: model.submission_status,
            completed: model.completed,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct CoursesResponse {
    pub courses: Vec<CourseView>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ContentsResponse {
    pub course_id: i64,
    pub modules: Vec<ContentView>,
}

/// Assignments bucketed relative to the time of the request, each sorted by due date
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct AssignmentsResponse {
    pub completed: Vec<AssignmentView>,
    pub overdue: Vec<AssignmentView>,
    /// Due before the end of the current UTC day
    pub due_today: Vec<AssignmentView>,
    pub due_soon: Vec<AssignmentView>,
    pub upcoming: Vec<AssignmentView>,
}

/// One assignment with the full upstream record (intro, attachments, config)
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct AssignmentDetail {
    pub assignment: AssignmentView,
    #[schema(value_type = Object)]
    pub raw: serde_json::Value,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ReadReceipt {
    pub module_id: i64,
    pub read: bool,
}

fn views<M, V: From<M>>(rows: Vec<M>) -> Vec<V> {
    rows.into_iter().map(V::from).collect()
}

#[utoipa::path(
    get,
    path = "/moodle/courses",
    security(("bearer_auth" = [])),
    responses(
        (status = 200, description = "Caller's synced courses", body = CoursesResponse),
        (status = 401, description = "Unauthorized", body = ApiError)
    ),
    tag = "mirror"
)]
pub async fn list_courses(
    State(state): State<AppState>,
    user: AuthUser,
) -> Result<Json<CoursesResponse>, ApiError> {
    let repo = CourseRepository::new(Arc::new(state.db.clone()));
    let rows = repo.list_for_user(&user.user_id).await?;
    Ok(Json(CoursesResponse {
        courses: views(rows),
    }))
}

#[utoipa::path(
    get,
    path = "/moodle/courses/{course_id}/contents",
    security(("bearer_auth" = [])),
    params(("course_id" = i64, Path, description = "Moodle course id")),
    responses(
        (status = 200, description = "Synced modules of the course", body = ContentsResponse),
        (status = 401, description = "Unauthorized", body = ApiError)
    ),
    tag = "mirror"
)]
pub async fn list_course_contents(
    State(state): State<AppState>,
    user: AuthUser,
    Path(course_id): Path<i64>,
) -> Result<Json<ContentsResponse>, ApiError> {
    let repo = CourseContentRepository::new(Arc::new(state.db.clone()));
    let rows = repo.list_for_course(&user.user_id, course_id).await?;
    Ok(Json(ContentsResponse {
        course_id,
        modules: views(rows),
    }))
}

#[utoipa::path(
    get,
    path = "/moodle/assignments",
    security(("bearer_auth" = [])),
    responses(
        (status = 200, description = "Caller's assignments grouped by urgency", body = AssignmentsResponse),
        (status = 401, description = "Unauthorized", body = ApiError)
    ),
    tag = "mirror"
)]
pub async fn list_assignments(
    State(state): State<AppState>,
    user: AuthUser,
) -> Result<Json<AssignmentsResponse>, ApiError> {
    let repo = AssignmentRepository::new(Arc::new(state.db.clone()));
    let rows = repo.list_for_user(&user.user_id).await?;
    let groups = group_assignments(rows, Utc::now(), state.config.moodle.due_soon_window());

    Ok(Json(AssignmentsResponse {
        completed: views(groups.completed),
        overdue: views(groups.overdue),
        due_today: views(groups.due_today),
        due_soon: views(groups.due_soon),
        upcoming: views(groups.upcoming),
    }))
}

#[utoipa::path(
    get,
    path = "/moodle/assignments/{assignment_id}",
    security(("bearer_auth" = [])),
    params(("assignment_id" = i64, Path, description = "Moodle assignment id")),
    responses(
        (status = 200, description = "The caller's stored assignment", body = AssignmentDetail),
        (status = 401, description = "Unauthorized", body = ApiError),
        (status = 404, description = "Not synced for this user", body = ApiError)
    ),
    tag = "mirror"
)]
pub async fn get_assignment(
    State(state): State<AppState>,
    user: AuthUser,
    Path(assignment_id): Path<i64>,
) -> Result<Json<AssignmentDetail>, ApiError> {
    let repo = AssignmentRepository::new(Arc::new(state.db.clone()));
    let row = repo
        .find_for_user(&user.user_id, assignment_id)
        .await?
        .ok_or(ServiceError::AssignmentNotFound(assignment_id))?;

    let raw = row.raw.clone();
    Ok(Json(AssignmentDetail {
        assignment: row.into(),
        raw,
    }))
}

/// Mark a synced module as read. The flag survives later syncs.
#[utoipa::path(
    post,
    path = "/moodle/contents/{module_id}/read",
    security(("bearer_auth" = [])),
    params(("module_id" = i64, Path, description = "Moodle course module id")),
    responses(
        (status = 200, description = "Module marked read", body = ReadReceipt),
        (status = 401, description = "Unauthorized", body = ApiError),
        (status = 404, description = "Not synced for this user", body = ApiError)
    ),
    tag = "mirror"
)]
pub async fn mark_content_read(
    State(state): State<AppState>,
    user: AuthUser,
    Path(module_id): Path<i64>,
) -> Result<Json<ReadReceipt>, ApiError> {
    let repo = CourseContentRepository::new(Arc::new(state.db.clone()));
    if repo.mark_read(&user.user_id, module_id).await? == 0 {
        return Err(ServiceError::ModuleNotFound(module_id).into());
    }

    tracing::debug!(module_id, "module marked read");
    Ok(Json(ReadReceipt {
        module_id,
        read: true,
    }))
}
