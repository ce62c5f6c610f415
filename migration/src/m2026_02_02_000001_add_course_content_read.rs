//! Adds the per-user `read` flag to moodle_course_contents.
//!
//! Sync upserts never touch the column, so a module stays read across passes.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .alter_table(
                Table::alter()
                    .table(MoodleCourseContents::Table)
                    .add_column(
                        ColumnDef::new(MoodleCourseContents::Read)
                            .boolean()
                            .not_null()
                            .default(false),
                    )
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .alter_table(
                Table::alter()
                    .table(MoodleCourseContents::Table)
                    .drop_column(MoodleCourseContents::Read)
                    .to_owned(),
            )
            .await
    }
}

#[derive(DeriveIden)]
enum MoodleCourseContents {
    Table,
    Read,
}
