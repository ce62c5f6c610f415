//! Mirrored Moodle assignment, keyed by (user_id, assignment_id).
//!
//! `status` is the visibility label and `completed` the classification from
//! [`crate::normalization::assignment_completed`]; neither is upstream truth.

use sea_orm::ActiveModelBehavior;
use sea_orm::entity::prelude::*;
use sea_orm::prelude::DateTimeWithTimeZone;
use uuid::Uuid;

#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "moodle_assignments")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub user_id: String,
    #[sea_orm(primary_key, auto_increment = false)]
    pub assignment_id: i64,
    pub connection_id: Uuid,
    pub course_id: i64,
    pub name: String,
    pub due_date: Option<DateTimeWithTimeZone>,
    pub allow_submissions_from: Option<DateTimeWithTimeZone>,
    pub cutoff_date: Option<DateTimeWithTimeZone>,
    pub grade: Option<f64>,
    pub status: Option<String>,
    pub submission_status: Option<String>,
    pub completed: bool,
    #[sea_orm(column_type = "JsonBinary")]
    pub raw: Json,
    pub created_at: DateTimeWithTimeZone,
    pub updated_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::connection::Entity",
        from = "Column::ConnectionId",
        to = "super::connection::Column::Id",
        on_delete = "Cascade"
    )]
    Connection,
}

impl Related<super::connection::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Connection.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
