//! Migration to create the moodle_assignments table, keyed by (user_id, assignment_id).

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(MoodleAssignments::Table)
                    .if_not_exists()
                    .col(ColumnDef::new(MoodleAssignments::UserId).text().not_null())
                    .col(
                        ColumnDef::new(MoodleAssignments::AssignmentId)
                            .big_integer()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(MoodleAssignments::ConnectionId)
                            .uuid()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(MoodleAssignments::CourseId)
                            .big_integer()
                            .not_null(),
                    )
                    .col(ColumnDef::new(MoodleAssignments::Name).text().not_null())
                    .col(
                        ColumnDef::new(MoodleAssignments::DueDate)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(MoodleAssignments::AllowSubmissionsFrom)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(MoodleAssignments::CutoffDate)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(ColumnDef::new(MoodleAssignments::Grade).double().null())
                    .col(ColumnDef::new(MoodleAssignments::Status).text().null())
                    .col(
                        ColumnDef::new(MoodleAssignments::SubmissionStatus)
                            .text()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(MoodleAssignments::Completed)
                            .boolean()
                            .not_null()
                            .default(false),
                    )
                    .col(ColumnDef::new(MoodleAssignments::Raw).json_binary().not_null())
                    .col(
                        ColumnDef::new(MoodleAssignments::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(MoodleAssignments::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .primary_key(
                        Index::create()
                            .col(MoodleAssignments::UserId)
                            .col(MoodleAssignments::AssignmentId),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_moodle_assignments_connection_id")
                            .from(MoodleAssignments::Table, MoodleAssignments::ConnectionId)
                            .to(MoodleConnections::Table, MoodleConnections::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        // Dashboard reads filter by owner and sort by due date
        manager
            .create_index(
                Index::create()
                    .name("idx_moodle_assignments_user_due_date")
                    .table(MoodleAssignments::Table)
                    .col(MoodleAssignments::UserId)
                    .col(MoodleAssignments::DueDate)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_index(
                Index::drop()
                    .name("idx_moodle_assignments_user_due_date")
                    .to_owned(),
            )
            .await?;

        manager
            .drop_table(Table::drop().table(MoodleAssignments::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum MoodleAssignments {
    Table,
    UserId,
    AssignmentId,
    ConnectionId,
    CourseId,
    Name,
    DueDate,
    AllowSubmissionsFrom,
    CutoffDate,
    Grade,
    Status,
    SubmissionStatus,
    Completed,
    Raw,
    CreatedAt,
    UpdatedAt,
}

#[derive(DeriveIden)]
enum MoodleConnections {
    Table,
    Id,
}
