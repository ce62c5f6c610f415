//! Connection store adapter.
//!
//! Typed access to `moodle_connections`. Rows are unique per (user, base
//! URL); a user's "primary" connection is the earliest-created active one.
//! Only ciphertext passes through here and none of it is logged.

use std::sync::Arc;

use chrono::Utc;
use sea_orm::prelude::DateTimeWithTimeZone;
use sea_orm::sea_query::OnConflict;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, DbErr, EntityTrait, QueryFilter,
    QueryOrder, Set, sea_query::Expr,
};
use uuid::Uuid;

use crate::models::connection::{self, ConnectionStatus, Entity as Connection};

/// Values written by a successful connect.
#[derive(Debug, Clone)]
pub struct NewConnection {
    pub user_id: String,
    pub base_url: String,
    pub upstream_user_id: i64,
    pub token_ciphertext: String,
    pub private_token_ciphertext: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ConnectionRepository {
    pub db: Arc<DatabaseConnection>,
}

impl ConnectionRepository {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    /// Unscoped lookup, for privileged callers only.
    pub async fn find_by_id(&self, id: &Uuid) -> Result<Option<connection::Model>, DbErr> {
        Connection::find_by_id(*id).one(&*self.db).await
    }

    /// Lookup scoped to the owning user.
    pub async fn find_for_user(
        &self,
        user_id: &str,
        id: &Uuid,
    ) -> Result<Option<connection::Model>, DbErr> {
        Connection::find_by_id(*id)
            .filter(connection::Column::UserId.eq(user_id))
            .one(&*self.db)
            .await
    }

    pub async fn find_by_base_url(
        &self,
        user_id: &str,
        base_url: &str,
    ) -> Result<Option<connection::Model>, DbErr> {
        Connection::find()
            .filter(connection::Column::UserId.eq(user_id))
            .filter(connection::Column::BaseUrl.eq(base_url))
            .one(&*self.db)
            .await
    }

    /// The user's earliest-created active connection.
    pub async fn find_primary(&self, user_id: &str) -> Result<Option<connection::Model>, DbErr> {
        Connection::find()
            .filter(connection::Column::UserId.eq(user_id))
            .filter(connection::Column::Status.eq(ConnectionStatus::Active.as_str()))
            .order_by_asc(connection::Column::CreatedAt)
            .order_by_asc(connection::Column::Id)
            .one(&*self.db)
            .await
    }

    /// All of the user's connections ordered by creation time then ID
    pub async fn list_for_user(&self, user_id: &str) -> Result<Vec<connection::Model>, DbErr> {
        Connection::find()
            .filter(connection::Column::UserId.eq(user_id))
            .order_by_asc(connection::Column::CreatedAt)
            .order_by_asc(connection::Column::Id)
            .all(&*self.db)
            .await
    }

    pub async fn list_all(&self) -> Result<Vec<connection::Model>, DbErr> {
        Connection::find()
            .order_by_asc(connection::Column::CreatedAt)
            .all(&*self.db)
            .await
    }

    /// Create or refresh the (user, base URL) row as active and verified.
    ///
    /// An existing row keeps its id and `created_at`.
    pub async fn upsert_verified(&self, new: NewConnection) -> Result<connection::Model, DbErr> {
        let now: DateTimeWithTimeZone = Utc::now().into();
        let user_id = new.user_id.clone();
        let base_url = new.base_url.clone();

        let active = connection::ActiveModel {
            id: Set(Uuid::new_v4()),
            user_id: Set(new.user_id),
            base_url: Set(new.base_url),
            upstream_user_id: Set(Some(new.upstream_user_id)),
            token_ciphertext: Set(new.token_ciphertext),
            private_token_ciphertext: Set(new.private_token_ciphertext),
            status: Set(ConnectionStatus::Active.as_str().to_string()),
            last_verified_at: Set(Some(now)),
            created_at: Set(now),
            updated_at: Set(now),
        };

        Connection::insert(active)
            .on_conflict(
                OnConflict::columns([connection::Column::UserId, connection::Column::BaseUrl])
                    .update_columns([
                        connection::Column::UpstreamUserId,
                        connection::Column::TokenCiphertext,
                        connection::Column::PrivateTokenCiphertext,
                        connection::Column::Status,
                        connection::Column::LastVerifiedAt,
                        connection::Column::UpdatedAt,
                    ])
                    .to_owned(),
            )
            .exec_without_returning(&*self.db)
            .await?;

        self.find_by_base_url(&user_id, &base_url)
            .await?
            .ok_or_else(|| DbErr::RecordNotFound(format!("connection for {base_url}")))
    }

    /// Persist a successful verification: active, refreshed identity, rotated ciphertext.
    pub async fn record_verification(
        &self,
        existing: connection::Model,
        upstream_user_id: i64,
        token_ciphertext: String,
    ) -> Result<connection::Model, DbErr> {
        let now: DateTimeWithTimeZone = Utc::now().into();
        let mut model: connection::ActiveModel = existing.into();
        model.upstream_user_id = Set(Some(upstream_user_id));
        model.token_ciphertext = Set(token_ciphertext);
        model.status = Set(ConnectionStatus::Active.as_str().to_string());
        model.last_verified_at = Set(Some(now));
        model.updated_at = Set(now);

        model.update(&*self.db).await
    }

    /// Flip a connection to `invalid`.
    pub async fn mark_invalid(&self, id: &Uuid) -> Result<(), DbErr> {
        let now: DateTimeWithTimeZone = Utc::now().into();
        let result = Connection::update_many()
            .col_expr(
                connection::Column::Status,
                Expr::value(ConnectionStatus::Invalid.as_str()),
            )
            .col_expr(connection::Column::UpdatedAt, Expr::value(now))
            .filter(connection::Column::Id.eq(*id))
            .exec(&*self.db)
            .await?;

        if result.rows_affected == 0 {
            return Err(DbErr::RecordNotFound(format!("connection {id}")));
        }

        tracing::info!(connection_id = %id, "connection marked invalid");
        Ok(())
    }

    /// Replace both ciphertext columns, leaving status untouched.
    pub async fn update_ciphertexts(
        &self,
        existing: connection::Model,
        token_ciphertext: String,
        private_token_ciphertext: Option<String>,
    ) -> Result<connection::Model, DbErr> {
        let mut model: connection::ActiveModel = existing.into();
        model.token_ciphertext = Set(token_ciphertext);
        model.private_token_ciphertext = Set(private_token_ciphertext);
        model.updated_at = Set(Utc::now().into());

        model.update(&*self.db).await
    }
}
