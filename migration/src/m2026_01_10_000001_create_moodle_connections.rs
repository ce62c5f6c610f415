//! Migration to create the moodle_connections table.
//!
//! One row links an owning user to one Moodle site. Token columns only ever
//! hold sealed ciphertext.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(MoodleConnections::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(MoodleConnections::Id)
                            .uuid()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(MoodleConnections::UserId).text().not_null())
                    .col(ColumnDef::new(MoodleConnections::BaseUrl).text().not_null())
                    .col(
                        ColumnDef::new(MoodleConnections::UpstreamUserId)
                            .big_integer()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(MoodleConnections::TokenCiphertext)
                            .text()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(MoodleConnections::PrivateTokenCiphertext)
                            .text()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(MoodleConnections::Status)
                            .text()
                            .not_null()
                            .default("active"),
                    )
                    .col(
                        ColumnDef::new(MoodleConnections::LastVerifiedAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(MoodleConnections::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(MoodleConnections::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_moodle_connections_user_base_url")
                    .table(MoodleConnections::Table)
                    .col(MoodleConnections::UserId)
                    .col(MoodleConnections::BaseUrl)
                    .unique()
                    .to_owned(),
            )
            .await?;

        // Primary connection lookup: earliest active row per user
        manager
            .create_index(
                Index::create()
                    .name("idx_moodle_connections_user_status_created")
                    .table(MoodleConnections::Table)
                    .col(MoodleConnections::UserId)
                    .col(MoodleConnections::Status)
                    .col(MoodleConnections::CreatedAt)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_index(
                Index::drop()
                    .name("idx_moodle_connections_user_status_created")
                    .to_owned(),
            )
            .await?;

        manager
            .drop_index(
                Index::drop()
                    .name("idx_moodle_connections_user_base_url")
                    .to_owned(),
            )
            .await?;

        manager
            .drop_table(Table::drop().table(MoodleConnections::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum MoodleConnections {
    Table,
    Id,
    UserId,
    BaseUrl,
    UpstreamUserId,
    TokenCiphertext,
    PrivateTokenCiphertext,
    Status,
    LastVerifiedAt,
    CreatedAt,
    UpdatedAt,
}
