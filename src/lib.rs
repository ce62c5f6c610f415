//! # studydesk
//!
//! Moodle connections, a per-user mirror of courses, assignments and course
//! contents, and an authenticated file proxy, served over HTTP.

pub mod auth;
pub mod config;
pub mod connections;
pub mod crypto;
pub mod db;
pub mod error;
pub mod file_proxy;
pub mod handlers;
pub mod models;
pub mod moodle;
pub mod normalization;
pub mod repositories;
pub mod server;
pub mod sync_executor;
pub mod telemetry;
pub use migration;
