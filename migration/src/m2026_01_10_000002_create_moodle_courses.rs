//! Migration to create the moodle_courses table, keyed by (user_id, course_id).

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(MoodleCourses::Table)
                    .if_not_exists()
                    .col(ColumnDef::new(MoodleCourses::UserId).text().not_null())
                    .col(
                        ColumnDef::new(MoodleCourses::CourseId)
                            .big_integer()
                            .not_null(),
                    )
                    .col(ColumnDef::new(MoodleCourses::ConnectionId).uuid().not_null())
                    .col(
                        ColumnDef::new(MoodleCourses::Fullname)
                            .text()
                            .not_null()
                            .default(""),
                    )
                    .col(ColumnDef::new(MoodleCourses::Shortname).text().null())
                    .col(ColumnDef::new(MoodleCourses::Summary).text().null())
                    .col(ColumnDef::new(MoodleCourses::Visible).boolean().null())
                    .col(ColumnDef::new(MoodleCourses::Progress).double().null())
                    .col(
                        ColumnDef::new(MoodleCourses::StartDate)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(MoodleCourses::EndDate)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(ColumnDef::new(MoodleCourses::CategoryId).big_integer().null())
                    .col(ColumnDef::new(MoodleCourses::Raw).json_binary().not_null())
                    .col(
                        ColumnDef::new(MoodleCourses::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(MoodleCourses::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .primary_key(
                        Index::create()
                            .col(MoodleCourses::UserId)
                            .col(MoodleCourses::CourseId),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_moodle_courses_connection_id")
                            .from(MoodleCourses::Table, MoodleCourses::ConnectionId)
                            .to(MoodleConnections::Table, MoodleConnections::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_moodle_courses_connection_id")
                    .table(MoodleCourses::Table)
                    .col(MoodleCourses::ConnectionId)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_index(
                Index::drop()
                    .name("idx_moodle_courses_connection_id")
                    .to_owned(),
            )
            .await?;

        manager
            .drop_table(Table::drop().table(MoodleCourses::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum MoodleCourses {
    Table,
    UserId,
    CourseId,
    ConnectionId,
    Fullname,
    Shortname,
    Summary,
    Visible,
    Progress,
    StartDate,
    EndDate,
    CategoryId,
    Raw,
    CreatedAt,
    UpdatedAt,
}

#[derive(DeriveIden)]
enum MoodleConnections {
    Table,
    Id,
}
