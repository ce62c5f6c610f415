use std::sync::Arc;

use sea_orm::sea_query::OnConflict;
use sea_orm::sea_query::Expr;
use sea_orm::{ColumnTrait, DatabaseConnection, DbErr, EntityTrait, QueryFilter, QueryOrder};

use super::upsert_all;
use crate::models::course_content::{self, Entity as CourseContent};

#[derive(Debug, Clone)]
pub struct CourseContentRepository {
    pub db: Arc<DatabaseConnection>,
}

impl CourseContentRepository {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    /// Upsert one course's modules keyed by (user_id, course_id, module_id).
    ///
    /// The rows are written in a single transaction, so a course's contents
    /// land together or not at all.
    pub async fn upsert_many(
        &self,
        rows: Vec<course_content::ActiveModel>,
    ) -> Result<usize, DbErr> {
        let on_conflict = OnConflict::columns([
            course_content::Column::UserId,
            course_content::Column::CourseId,
            course_content::Column::ModuleId,
        ])
        .update_columns([
            course_content::Column::ConnectionId,
            course_content::Column::SectionId,
            course_content::Column::SectionName,
            course_content::Column::ModuleName,
            course_content::Column::Modname,
            course_content::Column::Url,
            course_content::Column::Raw,
            course_content::Column::UpdatedAt,
        ])
        .to_owned();

        upsert_all::<CourseContent, _>(&*self.db, rows, on_conflict).await
    }

    pub async fn list_for_course(
        &self,
        user_id: &str,
        course_id: i64,
    ) -> Result<Vec<course_content::Model>, DbErr> {
        CourseContent::find()
            .filter(course_content::Column::UserId.eq(user_id))
            .filter(course_content::Column::CourseId.eq(course_id))
            .order_by_asc(course_content::Column::SectionId)
            .order_by_asc(course_content::Column::ModuleId)
            .all(&*self.db)
            .await
    }

    /// Every stored row for `module_id`, across owners. Callers must authorize.
    pub async fn find_by_module(
        &self,
        module_id: i64,
    ) -> Result<Vec<course_content::Model>, DbErr> {
        CourseContent::find()
            .filter(course_content::Column::ModuleId.eq(module_id))
            .order_by_asc(course_content::Column::UserId)
            .all(&*self.db)
            .await
    }

    /// Flag `user_id`'s rows for `module_id` as read. Returns the rows touched.
    pub async fn mark_read(&self, user_id: &str, module_id: i64) -> Result<u64, DbErr> {
        let result = CourseContent::update_many()
            .col_expr(course_content::Column::Read, Expr::value(true))
            .filter(course_content::Column::UserId.eq(user_id))
            .filter(course_content::Column::ModuleId.eq(module_id))
            .exec(&*self.db)
            .await?;
        Ok(result.rows_affected)
    }
}
