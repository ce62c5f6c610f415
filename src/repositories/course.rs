use std::sync::Arc;

use sea_orm::sea_query::OnConflict;
use sea_orm::{ColumnTrait, DatabaseConnection, DbErr, EntityTrait, QueryFilter, QueryOrder};

use super::upsert_all;
use crate::models::course::{self, Entity as Course};

#[derive(Debug, Clone)]
pub struct CourseRepository {
    pub db: Arc<DatabaseConnection>,
}

impl CourseRepository {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    /// Upsert keyed by (user_id, course_id). Last write wins; `created_at` is kept.
    pub async fn upsert_many(&self, rows: Vec<course::ActiveModel>) -> Result<usize, DbErr> {
        let on_conflict = OnConflict::columns([course::Column::UserId, course::Column::CourseId])
            .update_columns([
                course::Column::ConnectionId,
                course::Column::Fullname,
                course::Column::Shortname,
                course::Column::Summary,
                course::Column::Visible,
                course::Column::Progress,
                course::Column::StartDate,
                course::Column::EndDate,
                course::Column::CategoryId,
                course::Column::Raw,
                course::Column::UpdatedAt,
            ])
            .to_owned();

        upsert_all::<Course, _>(&*self.db, rows, on_conflict).await
    }

    pub async fn list_for_user(&self, user_id: &str) -> Result<Vec<course::Model>, DbErr> {
        Course::find()
            .filter(course::Column::UserId.eq(user_id))
            .order_by_asc(course::Column::Fullname)
            .order_by_asc(course::Column::CourseId)
            .all(&*self.db)
            .await
    }
}
