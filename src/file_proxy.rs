//! Authenticated file proxy.
//!
//! Streams a module's file from Moodle using the owner's stored token. The
//! token is appended server-side, is only ever sent to the connection's own
//! site, and is scrubbed from any upstream error body we echo back.

use std::sync::Arc;

use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, info, instrument, warn};
use url::Url;
use utoipa::ToSchema;

use crate::crypto::TokenCipher;
use crate::error::ServiceError;
pub use crate::moodle::error::redact_snippet;
use crate::moodle::{FileDescriptor, MoodleApi};
use crate::repositories::{ConnectionRepository, CourseContentRepository};

const TOKEN_PARAM: &str = "token";
const FALLBACK_CONTENT_TYPE: &str = "application/octet-stream";
const FALLBACK_FILENAME: &str = "file";
const INLINE_TYPE_PREFIXES: &[&str] = &["image/", "text/", "audio/", "video/"];

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum FileAction {
    /// Display in the browser when the type allows it
    #[default]
    Open,
    Download,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileRequest {
    pub module_id: i64,
    pub action: FileAction,
    /// Position in the module's file list; out of range falls back to the first
    pub index: usize,
}

/// A successful upstream response, ready to stream to the caller.
#[derive(Debug)]
pub struct ProxiedFile {
    pub content_type: String,
    pub content_length: Option<u64>,
    pub content_disposition: String,
    pub upstream: reqwest::Response,
}

#[derive(Clone)]
pub struct FileProxy {
    contents: CourseContentRepository,
    connections: ConnectionRepository,
    cipher: Arc<TokenCipher>,
    moodle: Arc<dyn MoodleApi>,
}

impl FileProxy {
    pub fn new(
        contents: CourseContentRepository,
        connections: ConnectionRepository,
        cipher: Arc<TokenCipher>,
        moodle: Arc<dyn MoodleApi>,
    ) -> Self {
        Self {
            contents,
            connections,
            cipher,
            moodle,
        }
    }

    #[instrument(skip_all, fields(user_id = %owner, module_id = request.module_id))]
    pub async fn fetch(
        &self,
        owner: &str,
        request: FileRequest,
    ) -> Result<ProxiedFile, ServiceError> {
        let rows = self.contents.find_by_module(request.module_id).await?;
        let row = rows
            .iter()
            .find(|r| r.user_id == owner)
            .or_else(|| rows.first())
            .ok_or(ServiceError::ModuleNotFound(request.module_id))?;

        let connection = self
            .connections
            .find_by_id(&row.connection_id)
            .await?
            .ok_or(ServiceError::ConnectionNotFound)?;

        // Ownership is settled before the token is touched
        if row.user_id != owner || connection.user_id != owner {
            warn!(connection_id = %connection.id, "file request for another user's module");
            return Err(ServiceError::Forbidden);
        }

        let token = self
            .cipher
            .open(&connection.token_ciphertext)
            .map_err(ServiceError::TokenDecryptionFailed)?;

        let descriptors = FileDescriptor::list_from_module(&row.raw);
        let descriptor = descriptors.get(request.index).or_else(|| descriptors.first());

        let raw_url = descriptor
            .and_then(FileDescriptor::download_url)
            .or_else(|| non_blank(row.raw.get("url").and_then(Value::as_str)))
            .or_else(|| non_blank(row.url.as_deref()))
            .ok_or(ServiceError::NoFileUrl)?;

        let target = resolve_target_url(raw_url, &connection.base_url)?;
        let target = with_token(target, &token);

        debug!(host = target.host_str().unwrap_or_default(), "fetching module file");
        let upstream = self
            .moodle
            .fetch_file(target)
            .await
            .map_err(ServiceError::Upstream)?;

        let status = upstream.status();
        if !status.is_success() {
            let body = upstream.text().await.unwrap_or_default();
            let snippet = redact_snippet(&body, &token);
            warn!(status = status.as_u16(), "upstream file fetch failed");
            return Err(ServiceError::UpstreamFetchFailed {
                status: status.as_u16(),
                body_snippet: (!snippet.is_empty()).then_some(snippet),
            });
        }

        let content_type = descriptor
            .and_then(|d| non_blank(d.mimetype.as_deref()))
            .map(str::to_string)
            .or_else(|| {
                upstream
                    .headers()
                    .get(reqwest::header::CONTENT_TYPE)
                    .and_then(|v| v.to_str().ok())
                    .map(str::to_string)
            })
            .unwrap_or_else(|| FALLBACK_CONTENT_TYPE.to_string());

        let descriptor_filename = descriptor.and_then(|d| d.filename.as_deref());
        let name = non_blank(Some(row.module_name.as_str())).or(descriptor_filename);
        let filename = download_filename(name, descriptor_filename);
        let content_disposition = content_disposition(request.action, &content_type, &filename);

        info!(
            content_type = %content_type,
            content_length = upstream.content_length(),
            "streaming module file"
        );

        Ok(ProxiedFile {
            content_type,
            content_length: upstream.content_length(),
            content_disposition,
            upstream,
        })
    }
}

/// Parse `raw` (absolute, or relative to the site) and require it to share
/// scheme, host and port with `base_url`.
pub fn resolve_target_url(raw: &str, base_url: &str) -> Result<Url, ServiceError> {
    let base = Url::parse(base_url)
        .map_err(|e| ServiceError::Validation(format!("stored base URL is invalid: {e}")))?;
    let target = Url::parse(raw)
        .or_else(|_| base.join(raw))
        .map_err(|e| ServiceError::Validation(format!("module file URL is invalid: {e}")))?;

    if target.origin() != base.origin() {
        return Err(ServiceError::Validation(
            "module file URL is not on the connected Moodle site".to_string(),
        ));
    }

    Ok(target)
}

/// Append `token=<token>` unless the URL already carries one.
pub fn with_token(mut url: Url, token: &str) -> Url {
    if !url.query_pairs().any(|(key, _)| key == TOKEN_PARAM) {
        url.query_pairs_mut().append_pair(TOKEN_PARAM, token);
    }
    url
}

pub fn is_inline_type(content_type: &str) -> bool {
    let essence = content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase();

    essence == "application/pdf" || INLINE_TYPE_PREFIXES.iter().any(|p| essence.starts_with(p))
}

pub fn content_disposition(action: FileAction, content_type: &str, filename: &str) -> String {
    let kind = match action {
        FileAction::Open if is_inline_type(content_type) => "inline",
        _ => "attachment",
    };
    format!("{kind}; filename=\"{filename}\"")
}

/// Collapse each run of characters outside `[A-Za-z0-9._-]` into `_`.
pub fn sanitize_filename(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut in_run = false;

    for ch in name.chars() {
        if ch.is_ascii_alphanumeric() || matches!(ch, '.' | '_' | '-') {
            out.push(ch);
            in_run = false;
        } else if !in_run {
            out.push('_');
            in_run = true;
        }
    }

    if out.is_empty() {
        FALLBACK_FILENAME.to_string()
    } else {
        out
    }
}

/// Sanitized name, with the source file's extension appended when the name has none.
pub fn download_filename(name: Option<&str>, source_filename: Option<&str>) -> String {
    let mut filename = sanitize_filename(name.unwrap_or_default());

    let has_extension = filename
        .rsplit_once('.')
        .is_some_and(|(stem, ext)| !stem.is_empty() && !ext.is_empty());
    if !has_extension
        && let Some(ext) = source_filename.and_then(extension_of)
    {
        filename.push('.');
        filename.push_str(&ext);
    }

    filename
}

fn extension_of(filename: &str) -> Option<String> {
    let (stem, ext) = filename.rsplit_once('.')?;
    if stem.is_empty() || ext.is_empty() {
        return None;
    }
    Some(sanitize_filename(ext))
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.filter(|v| !v.trim().is_empty())
}
