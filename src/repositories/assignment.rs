use std::sync::Arc;

use sea_orm::sea_query::OnConflict;
use sea_orm::{ColumnTrait, DatabaseConnection, DbErr, EntityTrait, QueryFilter, QueryOrder};

use super::upsert_all;
use crate::models::assignment::{self, Entity as Assignment};

#[derive(Debug, Clone)]
pub struct AssignmentRepository {
    pub db: Arc<DatabaseConnection>,
}

impl AssignmentRepository {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    /// Upsert keyed by (user_id, assignment_id).
    pub async fn upsert_many(&self, rows: Vec<assignment::ActiveModel>) -> Result<usize, DbErr> {
        let on_conflict =
            OnConflict::columns([assignment::Column::UserId, assignment::Column::AssignmentId])
                .update_columns([
                    assignment::Column::ConnectionId,
                    assignment::Column::CourseId,
                    assignment::Column::Name,
                    assignment::Column::DueDate,
                    assignment::Column::AllowSubmissionsFrom,
                    assignment::Column::CutoffDate,
                    assignment::Column::Grade,
                    assignment::Column::Status,
                    assignment::Column::SubmissionStatus,
                    assignment::Column::Completed,
                    assignment::Column::Raw,
                    assignment::Column::UpdatedAt,
                ])
                .to_owned();

        upsert_all::<Assignment, _>(&*self.db, rows, on_conflict).await
    }

    pub async fn list_for_user(&self, user_id: &str) -> Result<Vec<assignment::Model>, DbErr> {
        Assignment::find()
            .filter(assignment::Column::UserId.eq(user_id))
            .order_by_asc(assignment::Column::DueDate)
            .order_by_asc(assignment::Column::AssignmentId)
            .all(&*self.db)
            .await
    }

    pub async fn find_for_user(
        &self,
        user_id: &str,
        assignment_id: i64,
    ) -> Result<Option<assignment::Model>, DbErr> {
        Assignment::find_by_id((user_id.to_string(), assignment_id))
            .one(&*self.db)
            .await
    }
}
