//! Sync Executor
//!
//! Pulls courses, assignments and course contents for one connection and
//! mirrors them into the store. A pass is a single request-scoped task:
//! content fetches run in parallel under a semaphore, and every write is an
//! idempotent upsert so reruns converge on the same rows.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use chrono::Utc;
use metrics::counter;
use sea_orm::DatabaseConnection;
use sea_orm::prelude::DateTimeWithTimeZone;
use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info, instrument, warn};
use utoipa::ToSchema;
use uuid::Uuid;
use zeroize::Zeroizing;

use crate::connections::mark_invalid_best_effort;
use crate::crypto::TokenCipher;
use crate::error::ServiceError;
use crate::models::connection;
use crate::moodle::{MoodleApi, normalize_base_url};
use crate::normalization::{self, dedupe_last_wins};
use crate::repositories::{
    AssignmentRepository, ConnectionRepository, CourseContentRepository, CourseRepository,
};

/// Which of the caller's connections to sync.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncTarget {
    Connection(Uuid),
    BaseUrl(String),
    /// Earliest-created active connection
    Primary,
}

/// Counts written by a completed pass.
#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema, PartialEq, Eq)]
pub struct SyncReport {
    pub connection_id: Uuid,
    pub upstream_user_id: i64,
    pub courses: usize,
    pub assignments: usize,
    pub contents: usize,
    /// Courses whose contents could not be fetched or stored this pass
    pub failed_course_ids: Vec<i64>,
}

/// Result of [`SyncExecutor::execute`]. No status writes have happened yet.
#[derive(Debug)]
pub enum SyncOutcome {
    Success(SyncReport),
    /// Moodle rejected the token; the connection should be marked invalid
    TokenInvalidated {
        connection_id: Uuid,
        error: ServiceError,
    },
    Failure(ServiceError),
}

impl SyncOutcome {
    fn label(&self) -> &'static str {
        match self {
            SyncOutcome::Success(report) if report.failed_course_ids.is_empty() => "success",
            SyncOutcome::Success(_) => "partial",
            SyncOutcome::TokenInvalidated { .. } => "token_invalidated",
            SyncOutcome::Failure(_) => "failure",
        }
    }
}

#[derive(Clone)]
pub struct SyncExecutor {
    connections: ConnectionRepository,
    courses: CourseRepository,
    assignments: AssignmentRepository,
    contents: CourseContentRepository,
    cipher: Arc<TokenCipher>,
    moodle: Arc<dyn MoodleApi>,
    content_concurrency: usize,
}

impl SyncExecutor {
    pub fn new(
        db: Arc<DatabaseConnection>,
        cipher: Arc<TokenCipher>,
        moodle: Arc<dyn MoodleApi>,
        content_concurrency: usize,
    ) -> Self {
        Self {
            connections: ConnectionRepository::new(db.clone()),
            courses: CourseRepository::new(db.clone()),
            assignments: AssignmentRepository::new(db.clone()),
            contents: CourseContentRepository::new(db),
            cipher,
            moodle,
            content_concurrency: content_concurrency.max(1),
        }
    }

    /// Sync one of `owner`'s connections, marking it invalid if Moodle rejects the token.
    pub async fn run(
        &self,
        owner: &str,
        target: SyncTarget,
        verify: bool,
    ) -> Result<SyncReport, ServiceError> {
        let outcome = self.execute(owner, target, verify).await;
        self.settle(outcome).await
    }

    /// Sync a connection by id on behalf of its owner, without caller scoping.
    pub async fn run_privileged(
        &self,
        connection_id: Uuid,
        verify: bool,
    ) -> Result<SyncReport, ServiceError> {
        let outcome = match self.connections.find_by_id(&connection_id).await {
            Ok(Some(connection)) => self.execute_connection(connection, verify).await,
            Ok(None) => SyncOutcome::Failure(ServiceError::ConnectionNotFound),
            Err(err) => SyncOutcome::Failure(err.into()),
        };
        self.settle(outcome).await
    }

    /// Resolve `target` for `owner` and run one pass.
    pub async fn execute(&self, owner: &str, target: SyncTarget, verify: bool) -> SyncOutcome {
        match self.resolve(owner, target).await {
            Ok(connection) => self.execute_connection(connection, verify).await,
            Err(err) => {
                counter!("moodle_sync_runs_total", "outcome" => "failure").increment(1);
                SyncOutcome::Failure(err)
            }
        }
    }

    async fn settle(&self, outcome: SyncOutcome) -> Result<SyncReport, ServiceError> {
        match outcome {
            SyncOutcome::Success(report) => Ok(report),
            SyncOutcome::TokenInvalidated {
                connection_id,
                error,
            } => {
                mark_invalid_best_effort(&self.connections, &connection_id).await;
                Err(error)
            }
            SyncOutcome::Failure(error) => Err(error),
        }
    }

    async fn resolve(
        &self,
        owner: &str,
        target: SyncTarget,
    ) -> Result<connection::Model, ServiceError> {
        let found = match target {
            SyncTarget::Connection(id) => self.connections.find_for_user(owner, &id).await?,
            SyncTarget::BaseUrl(url) => {
                let base_url = normalize_base_url(&url).map_err(ServiceError::Validation)?;
                self.connections.find_by_base_url(owner, &base_url).await?
            }
            SyncTarget::Primary => self.connections.find_primary(owner).await?,
        };

        found.ok_or(ServiceError::ConnectionNotFound)
    }

    #[instrument(
        skip_all,
        fields(connection_id = %connection.id, user_id = %connection.user_id, verify)
    )]
    async fn execute_connection(&self, connection: connection::Model, verify: bool) -> SyncOutcome {
        let connection_id = connection.id;
        let outcome = match self.sync_connection(connection, verify).await {
            Ok(report) => SyncOutcome::Success(report),
            Err(error) if error.is_token_rejection() => SyncOutcome::TokenInvalidated {
                connection_id,
                error,
            },
            Err(error) => SyncOutcome::Failure(error),
        };

        counter!("moodle_sync_runs_total", "outcome" => outcome.label()).increment(1);
        match &outcome {
            SyncOutcome::Success(report) => info!(
                courses = report.courses,
                assignments = report.assignments,
                contents = report.contents,
                failed_courses = report.failed_course_ids.len(),
                "Moodle sync finished"
            ),
            SyncOutcome::TokenInvalidated { error, .. } => {
                warn!(error.kind = error.code(), "Moodle rejected the stored token")
            }
            SyncOutcome::Failure(ServiceError::TokenDecryptionFailed(cause)) => warn!(
                error.kind = "token_decryption_failed",
                cause = cause.kind(),
                "stored token could not be decrypted"
            ),
            SyncOutcome::Failure(error) => {
                warn!(error.kind = error.code(), error = %error, "Moodle sync failed")
            }
        }

        outcome
    }

    async fn sync_connection(
        &self,
        connection: connection::Model,
        verify: bool,
    ) -> Result<SyncReport, ServiceError> {
        let token = self
            .cipher
            .open(&connection.token_ciphertext)
            .map_err(ServiceError::TokenDecryptionFailed)?;

        let base_url = connection.base_url.clone();
        let user_id = connection.user_id.clone();
        let connection_id = connection.id;

        let upstream_user_id = match connection.upstream_user_id {
            Some(cached) if !verify => cached,
            _ => self.verify_and_record(connection, &token).await?,
        };

        let now: DateTimeWithTimeZone = Utc::now().into();

        let courses = self
            .moodle
            .list_user_courses(&base_url, &token, upstream_user_id)
            .await
            .map_err(ServiceError::from_stored_token_call)?;
        let course_ids: Vec<i64> = courses.iter().map(|c| c.id).collect();

        let course_rows = dedupe_last_wins(
            courses
                .iter()
                .map(|c| (c.id, normalization::course_row(&user_id, connection_id, c, now)))
                .collect(),
        );
        let course_count = self.courses.upsert_many(course_rows).await?;
        counter!("moodle_sync_rows_total", "entity" => "course").increment(course_count as u64);
        debug!(courses = course_count, "courses stored");

        let mut report = SyncReport {
            connection_id,
            upstream_user_id,
            courses: course_count,
            ..SyncReport::default()
        };

        if course_ids.is_empty() {
            return Ok(report);
        }

        let grouped = self
            .moodle
            .list_assignments(&base_url, &token, &course_ids)
            .await
            .map_err(ServiceError::from_stored_token_call)?;
        let assignment_rows = dedupe_last_wins(flatten_assignments(
            &grouped,
            |course_id, assignment| {
                normalization::assignment_row(&user_id, connection_id, course_id, assignment, now)
            },
        ));
        report.assignments = self.assignments.upsert_many(assignment_rows).await?;
        counter!("moodle_sync_rows_total", "entity" => "assignment")
            .increment(report.assignments as u64);
        debug!(assignments = report.assignments, "assignments stored");

        let token = Arc::new(token);
        let (contents, failed) = self
            .sync_contents(&course_ids, &base_url, &user_id, connection_id, token, now)
            .await?;
        report.contents = contents;
        report.failed_course_ids = failed;
        counter!("moodle_sync_rows_total", "entity" => "content").increment(contents as u64);

        Ok(report)
    }

    /// Verify the token, persist the refreshed identity with a re-sealed
    /// ciphertext, and return the upstream user id.
    async fn verify_and_record(
        &self,
        connection: connection::Model,
        token: &str,
    ) -> Result<i64, ServiceError> {
        let site = self
            .moodle
            .verify(&connection.base_url, token)
            .await
            .map_err(ServiceError::from_stored_token_call)?;

        let resealed = self.cipher.seal(token).map_err(ServiceError::Encryption)?;
        self.connections
            .record_verification(connection, site.userid, resealed)
            .await?;

        debug!(upstream_user_id = site.userid, "token verified");
        Ok(site.userid)
    }

    /// Fetch and store contents per course with bounded parallelism.
    ///
    /// Returns the stored row count and the ids of courses that failed. A
    /// token rejection from any course aborts the remaining fetches.
    async fn sync_contents(
        &self,
        course_ids: &[i64],
        base_url: &str,
        user_id: &str,
        connection_id: Uuid,
        token: Arc<Zeroizing<String>>,
        now: DateTimeWithTimeZone,
    ) -> Result<(usize, Vec<i64>), ServiceError> {
        let semaphore = Arc::new(Semaphore::new(self.content_concurrency));
        let mut tasks = JoinSet::new();

        for &course_id in course_ids {
            let semaphore = semaphore.clone();
            let moodle = self.moodle.clone();
            let repo = self.contents.clone();
            let token = token.clone();
            let base_url = base_url.to_string();
            let user_id = user_id.to_string();

            tasks.spawn(async move {
                let result = async {
                    let _permit = semaphore
                        .acquire_owned()
                        .await
                        .map_err(|_| ServiceError::Validation("sync cancelled".to_string()))?;

                    let sections = moodle
                        .list_course_contents(&base_url, &token, course_id)
                        .await
                        .map_err(ServiceError::from_stored_token_call)?;
                    let rows =
                        normalization::content_rows(&user_id, connection_id, course_id, &sections, now);
                    Ok::<usize, ServiceError>(repo.upsert_many(rows).await?)
                }
                .await;
                (course_id, result)
            });
        }

        // Courses without a joined result; whatever remains at the end panicked
        let mut pending: BTreeSet<i64> = course_ids.iter().copied().collect();
        let mut stored = 0;
        let mut failed = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            let (course_id, result) = match joined {
                Ok(pair) => pair,
                Err(join_err) => {
                    warn!(error = %join_err, "content task did not complete");
                    continue;
                }
            };
            pending.remove(&course_id);

            match result {
                Ok(count) => stored += count,
                Err(err) if err.is_token_rejection() => {
                    tasks.abort_all();
                    return Err(err);
                }
                Err(err) => {
                    counter!("moodle_sync_content_failures_total").increment(1);
                    warn!(course_id, error.kind = err.code(), error = %err, "course contents failed");
                    failed.push(course_id);
                }
            }
        }

        for course_id in pending {
            counter!("moodle_sync_content_failures_total").increment(1);
            warn!(course_id, "course contents task panicked");
            failed.push(course_id);
        }

        failed.sort_unstable();
        Ok((stored, failed))
    }
}

/// Pair each assignment with its key, in course order.
fn flatten_assignments<T>(
    grouped: &BTreeMap<i64, Vec<crate::moodle::Assignment>>,
    build: impl Fn(i64, &crate::moodle::Assignment) -> T,
) -> Vec<(i64, T)> {
    grouped
        .iter()
        .flat_map(|(course_id, assignments)| {
            assignments
                .iter()
                .map(|assignment| (assignment.id, build(*course_id, assignment)))
                .collect::<Vec<_>>()
        })
        .collect()
}
