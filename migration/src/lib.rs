//! Database migrations for studydesk.
//!
//! Creates the Moodle connection table and the three mirrored entity tables,
//! then adds the content read flag.

pub use sea_orm_migration::prelude::*;

mod m2026_01_10_000001_create_moodle_connections;
mod m2026_01_10_000002_create_moodle_courses;
mod m2026_01_10_000003_create_moodle_assignments;
mod m2026_01_10_000004_create_moodle_course_contents;
mod m2026_02_02_000001_add_course_content_read;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m2026_01_10_000001_create_moodle_connections::Migration),
            Box::new(m2026_01_10_000002_create_moodle_courses::Migration),
            Box::new(m2026_01_10_000003_create_moodle_assignments::Migration),
            Box::new(m2026_01_10_000004_create_moodle_course_contents::Migration),
            Box::new(m2026_02_02_000001_add_course_content_read::Migration),
        ]
    }
}
