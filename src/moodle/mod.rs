//! Moodle web service protocol client.
//!
//! A thin typed wrapper over Moodle's single-endpoint REST convention
//! (`webservice/rest/server.php` with `wstoken` and `wsfunction`). Epoch
//! conversion and persistence live elsewhere.

pub mod client;
pub mod error;
pub mod types;

use url::Url;

pub use client::{MoodleApi, MoodleClient, WsParams};
pub use error::MoodleError;
pub use types::{AcquiredToken, Assignment, Course, FileDescriptor, Module, Section, SiteInfo};

/// Canonical form of a site URL: trimmed, http(s) only, no trailing slash,
/// no query or fragment.
pub fn normalize_base_url(input: &str) -> Result<String, String> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Err("base URL is required".to_string());
    }

    let mut url = Url::parse(trimmed).map_err(|e| format!("invalid base URL: {e}"))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err("base URL must use http or https".to_string());
    }
    if url.host_str().is_none() {
        return Err("base URL must include a host".to_string());
    }
    url.set_query(None);
    url.set_fragment(None);

    Ok(url.as_str().trim_end_matches('/').to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_base_url_strips_trailing_slashes() {
        assert_eq!(
            normalize_base_url(" https://lms.example.edu/ ").unwrap(),
            "https://lms.example.edu"
        );
        assert_eq!(
            normalize_base_url("https://lms.example.edu/moodle//").unwrap(),
            "https://lms.example.edu/moodle"
        );
        assert_eq!(
            normalize_base_url("http://127.0.0.1:8080").unwrap(),
            "http://127.0.0.1:8080"
        );
    }

    #[test]
    fn test_normalize_base_url_rejects_bad_input() {
        assert!(normalize_base_url("").is_err());
        assert!(normalize_base_url("ftp://lms.example.edu").is_err());
        assert!(normalize_base_url("not a url").is_err());
    }
}
