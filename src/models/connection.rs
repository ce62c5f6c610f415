//! Moodle connection entity.
//!
//! One row per (owning user, Moodle site). Token columns hold sealed
//! ciphertext produced by [`crate::crypto::TokenCipher`].

use std::{fmt, str::FromStr};

use sea_orm::ActiveModelBehavior;
use sea_orm::entity::prelude::*;
use sea_orm::prelude::DateTimeWithTimeZone;
use uuid::Uuid;

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "moodle_connections")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    /// Opaque owner id from the identity provider
    pub user_id: String,

    /// Normalized site URL, no trailing slash
    pub base_url: String,

    /// Moodle user id, unknown until the first verification
    pub upstream_user_id: Option<i64>,

    pub token_ciphertext: String,

    pub private_token_ciphertext: Option<String>,

    /// `active` or `invalid`, see [`ConnectionStatus`]
    pub status: String,

    pub last_verified_at: Option<DateTimeWithTimeZone>,

    pub created_at: DateTimeWithTimeZone,

    pub updated_at: DateTimeWithTimeZone,
}

impl Model {
    pub fn status(&self) -> Option<ConnectionStatus> {
        self.status.parse().ok()
    }

    pub fn is_active(&self) -> bool {
        self.status() == Some(ConnectionStatus::Active)
    }
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::course::Entity")]
    Course,
    #[sea_orm(has_many = "super::assignment::Entity")]
    Assignment,
    #[sea_orm(has_many = "super::course_content::Entity")]
    CourseContent,
}

impl Related<super::course::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Course.def()
    }
}

impl Related<super::assignment::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Assignment.def()
    }
}

impl Related<super::course_content::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::CourseContent.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

/// Lifecycle state of a connection.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ConnectionStatus {
    Active,
    /// Moodle rejected the token; a reconnect or successful verify reactivates it
    Invalid,
}

impl ConnectionStatus {
    pub const fn as_str(self) -> &'static str {
        match self {
            ConnectionStatus::Active => "active",
            ConnectionStatus::Invalid => "invalid",
        }
    }
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ConnectionStatus {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "active" => Ok(ConnectionStatus::Active),
            "invalid" => Ok(ConnectionStatus::Invalid),
            other => Err(format!("unknown connection status '{other}'")),
        }
    }
}
