//! # Repository Layer
//!
//! SeaORM access for the Moodle mirror. Every query that reads user data is
//! filtered by the owning user id.

use sea_orm::sea_query::OnConflict;
use sea_orm::{ActiveModelTrait, DbErr, EntityTrait, IntoActiveModel, TransactionTrait};

pub mod assignment;
pub mod connection;
pub mod course;
pub mod course_content;

pub use assignment::AssignmentRepository;
pub use connection::{ConnectionRepository, NewConnection};
pub use course::CourseRepository;
pub use course_content::CourseContentRepository;

/// Rows per INSERT statement, well under SQLite's bound-parameter limit.
const UPSERT_CHUNK: usize = 200;

/// Insert-or-update `rows` in one transaction, so a batch lands entirely or not at all.
///
/// Returns the number of rows written.
pub(crate) async fn upsert_all<E, C>(
    db: &C,
    rows: Vec<E::ActiveModel>,
    on_conflict: OnConflict,
) -> Result<usize, DbErr>
where
    E: EntityTrait,
    E::Model: IntoActiveModel<E::ActiveModel>,
    E::ActiveModel: ActiveModelTrait<Entity = E> + Send,
    C: TransactionTrait,
{
    if rows.is_empty() {
        return Ok(0);
    }

    let total = rows.len();
    let txn = db.begin().await?;
    for chunk in rows.chunks(UPSERT_CHUNK) {
        E::insert_many(chunk.to_vec())
            .on_conflict(on_conflict.clone())
            .exec_without_returning(&txn)
            .await?;
    }
    txn.commit().await?;

    Ok(total)
}
