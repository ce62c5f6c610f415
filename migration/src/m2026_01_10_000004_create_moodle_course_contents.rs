//! Migration to create the moodle_course_contents table.
//!
//! One row per course module, keyed by (user_id, course_id, module_id). The
//! `raw` column keeps the module payload including its file descriptors.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(MoodleCourseContents::Table)
                    .if_not_exists()
                    .col(ColumnDef::new(MoodleCourseContents::UserId).text().not_null())
                    .col(
                        ColumnDef::new(MoodleCourseContents::CourseId)
                            .big_integer()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(MoodleCourseContents::ModuleId)
                            .big_integer()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(MoodleCourseContents::ConnectionId)
                            .uuid()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(MoodleCourseContents::SectionId)
                            .big_integer()
                            .null(),
                    )
                    .col(ColumnDef::new(MoodleCourseContents::SectionName).text().null())
                    .col(
                        ColumnDef::new(MoodleCourseContents::ModuleName)
                            .text()
                            .not_null(),
                    )
                    .col(ColumnDef::new(MoodleCourseContents::Modname).text().null())
                    .col(ColumnDef::new(MoodleCourseContents::Url).text().null())
                    .col(
                        ColumnDef::new(MoodleCourseContents::Raw)
                            .json_binary()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(MoodleCourseContents::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(MoodleCourseContents::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .primary_key(
                        Index::create()
                            .col(MoodleCourseContents::UserId)
                            .col(MoodleCourseContents::CourseId)
                            .col(MoodleCourseContents::ModuleId),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_moodle_course_contents_connection_id")
                            .from(
                                MoodleCourseContents::Table,
                                MoodleCourseContents::ConnectionId,
                            )
                            .to(MoodleConnections::Table, MoodleConnections::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        // File proxy resolves rows by module id alone
        manager
            .create_index(
                Index::create()
                    .name("idx_moodle_course_contents_module_id")
                    .table(MoodleCourseContents::Table)
                    .col(MoodleCourseContents::ModuleId)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_index(
                Index::drop()
                    .name("idx_moodle_course_contents_module_id")
                    .to_owned(),
            )
            .await?;

        manager
            .drop_table(Table::drop().table(MoodleCourseContents::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum MoodleCourseContents {
    Table,
    UserId,
    CourseId,
    ModuleId,
    ConnectionId,
    SectionId,
    SectionName,
    ModuleName,
    Modname,
    Url,
    Raw,
    CreatedAt,
    UpdatedAt,
}

#[derive(DeriveIden)]
enum MoodleConnections {
    Table,
    Id,
}
