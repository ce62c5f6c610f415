//! # Data Models
//!
//! SeaORM entities for the Moodle mirror plus small shared API types.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

pub mod assignment;
pub mod connection;
pub mod course;
pub mod course_content;

pub use assignment::Entity as Assignment;
pub use connection::Entity as Connection;
pub use course::Entity as Course;
pub use course_content::Entity as CourseContent;

/// Basic service information response
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ServiceInfo {
    /// The name of the service
    pub service: String,
    /// The version of the service
    pub version: String,
}

impl Default for ServiceInfo {
    fn default() -> Self {
        Self {
            service: "studydesk".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}
