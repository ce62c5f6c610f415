//! reqwest-backed Moodle web service client.

use std::collections::BTreeMap;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde_json::Value;
use tracing::{debug, instrument, warn};
use url::Url;
use zeroize::Zeroizing;

use super::error::{MoodleError, redact_snippet};
use super::types::{AcquiredToken, Assignment, Course, RawRecord, Section, SiteInfo};
use crate::config::MoodleConfig;

const REST_PATH: &str = "webservice/rest/server.php";
const TOKEN_PATH: &str = "login/token.php";
const RESPONSE_FORMAT: &str = "json";

const FN_SITE_INFO: &str = "core_webservice_get_site_info";
const FN_USER_COURSES: &str = "core_enrol_get_users_courses";
const FN_ASSIGNMENTS: &str = "mod_assign_get_assignments";
const FN_COURSE_CONTENTS: &str = "core_course_get_contents";

/// Operations the sync and proxy layers need from a Moodle site.
///
/// Implemented by [`MoodleClient`]; tests substitute their own.
#[async_trait]
pub trait MoodleApi: Send + Sync {
    /// Exchange username and password for a web service token.
    async fn acquire_token(
        &self,
        base_url: &str,
        username: &str,
        password: &str,
    ) -> Result<AcquiredToken, MoodleError>;

    /// Confirm the token is live and return the identity behind it.
    async fn verify(&self, base_url: &str, token: &str) -> Result<SiteInfo, MoodleError>;

    async fn list_user_courses(
        &self,
        base_url: &str,
        token: &str,
        upstream_user_id: i64,
    ) -> Result<Vec<Course>, MoodleError>;

    /// Assignments for all `course_ids` in one call, grouped by course id.
    async fn list_assignments(
        &self,
        base_url: &str,
        token: &str,
        course_ids: &[i64],
    ) -> Result<BTreeMap<i64, Vec<Assignment>>, MoodleError>;

    async fn list_course_contents(
        &self,
        base_url: &str,
        token: &str,
        course_id: i64,
    ) -> Result<Vec<Section>, MoodleError>;

    /// GET an already-authorized file URL. Non-2xx responses are returned, not mapped.
    async fn fetch_file(&self, url: Url) -> Result<reqwest::Response, MoodleError>;
}

/// Function-specific form fields, with Moodle's indexed array encoding.
#[derive(Debug, Default)]
pub struct WsParams(Vec<(String, String)>);

impl WsParams {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn param(mut self, key: &str, value: impl ToString) -> Self {
        self.0.push((key.to_string(), value.to_string()));
        self
    }

    /// Encode `values` as `key[0]=..&key[1]=..`.
    pub fn array<T: ToString>(mut self, key: &str, values: &[T]) -> Self {
        for (idx, value) in values.iter().enumerate() {
            self.0.push((format!("{key}[{idx}]"), value.to_string()));
        }
        self
    }

    pub fn into_pairs(self) -> Vec<(String, String)> {
        self.0
    }
}

#[derive(Clone, Debug)]
pub struct MoodleClient {
    http: reqwest::Client,
    token_service: String,
}

impl MoodleClient {
    pub fn new(config: &MoodleConfig) -> Result<Self, MoodleError> {
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .user_agent(concat!("studydesk/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            http,
            token_service: config.token_service.clone(),
        })
    }

    fn endpoint(base_url: &str, path: &str) -> Result<Url, MoodleError> {
        let joined = format!("{}/{}", base_url.trim_end_matches('/'), path);
        Url::parse(&joined)
            .map_err(|e| MoodleError::MalformedResponse(format!("invalid site URL: {e}")))
    }

    /// Invoke one web service function and return the decoded JSON body.
    async fn call(
        &self,
        base_url: &str,
        token: &str,
        function: &str,
        params: WsParams,
    ) -> Result<Value, MoodleError> {
        let url = Self::endpoint(base_url, REST_PATH)?;

        let mut form: Vec<(String, String)> = vec![
            ("wstoken".to_string(), token.to_string()),
            ("wsfunction".to_string(), function.to_string()),
            ("moodlewsrestformat".to_string(), RESPONSE_FORMAT.to_string()),
        ];
        form.extend(params.into_pairs());

        debug!(function, "calling Moodle web service");
        let response = self.http.post(url).form(&form).send().await?;
        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            warn!(function, status = status.as_u16(), "Moodle web service HTTP error");
            return Err(MoodleError::Http {
                status: status.as_u16(),
                body: Some(redact_snippet(&body, token)),
            });
        }

        let value: Value = serde_json::from_str(&body).map_err(|e| {
            MoodleError::MalformedResponse(format!("{function} returned non-JSON body: {e}"))
        })?;

        if let Some(exception) = exception_of(&value) {
            debug!(function, kind = exception.kind(), "Moodle web service exception");
            return Err(exception);
        }

        Ok(value)
    }
}

/// Moodle reports failures with HTTP 200 and an `exception` (or `error`) body.
fn exception_of(value: &Value) -> Option<MoodleError> {
    let object = value.as_object()?;
    if !object.contains_key("exception") && !object.contains_key("error") {
        return None;
    }

    let errorcode = object
        .get("errorcode")
        .and_then(Value::as_str)
        .unwrap_or("unknown")
        .to_string();
    let message = object
        .get("message")
        .or_else(|| object.get("error"))
        .and_then(Value::as_str)
        .unwrap_or("Moodle returned an exception")
        .to_string();

    Some(MoodleError::Exception { errorcode, message })
}

fn decode_list<T: RawRecord>(value: Value, what: &str) -> Result<Vec<T>, MoodleError> {
    let Value::Array(items) = value else {
        return Err(MoodleError::MalformedResponse(format!(
            "expected a list of {what}"
        )));
    };

    items
        .into_iter()
        .map(|item| {
            T::from_raw(item)
                .map_err(|e| MoodleError::MalformedResponse(format!("invalid {what} entry: {e}")))
        })
        .collect()
}

#[async_trait]
impl MoodleApi for MoodleClient {
    #[instrument(skip_all, fields(base_url = %base_url))]
    async fn acquire_token(
        &self,
        base_url: &str,
        username: &str,
        password: &str,
    ) -> Result<AcquiredToken, MoodleError> {
        let url = Self::endpoint(base_url, TOKEN_PATH)?;
        let form = [
            ("username", username),
            ("password", password),
            ("service", self.token_service.as_str()),
        ];

        let response = self.http.post(url).form(&form).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(MoodleError::CredentialsRejected(format!(
                "token endpoint returned HTTP {}",
                status.as_u16()
            )));
        }

        let body: Value = response.json().await?;
        if let Some(error) = body.get("error").and_then(Value::as_str) {
            return Err(MoodleError::CredentialsRejected(error.to_string()));
        }

        let token = body
            .get("token")
            .and_then(Value::as_str)
            .filter(|t| !t.is_empty())
            .ok_or_else(|| {
                MoodleError::CredentialsRejected("token endpoint returned no token".to_string())
            })?;
        let private_token = body
            .get("privatetoken")
            .and_then(Value::as_str)
            .filter(|t| !t.is_empty())
            .map(|t| Zeroizing::new(t.to_string()));

        Ok(AcquiredToken {
            token: Zeroizing::new(token.to_string()),
            private_token,
        })
    }

    #[instrument(skip_all, fields(base_url = %base_url))]
    async fn verify(&self, base_url: &str, token: &str) -> Result<SiteInfo, MoodleError> {
        let value = match self.call(base_url, token, FN_SITE_INFO, WsParams::new()).await {
            Ok(value) => value,
            Err(MoodleError::Exception { errorcode, message }) => {
                return Err(MoodleError::InvalidToken(format!("{errorcode}: {message}")));
            }
            Err(MoodleError::Http { status, .. })
                if status == StatusCode::UNAUTHORIZED.as_u16()
                    || status == StatusCode::FORBIDDEN.as_u16() =>
            {
                return Err(MoodleError::InvalidToken(format!("HTTP {status}")));
            }
            Err(other) => return Err(other),
        };

        SiteInfo::from_raw(value)
            .map_err(|e| MoodleError::MalformedResponse(format!("invalid site info: {e}")))
    }

    #[instrument(skip_all, fields(base_url = %base_url))]
    async fn list_user_courses(
        &self,
        base_url: &str,
        token: &str,
        upstream_user_id: i64,
    ) -> Result<Vec<Course>, MoodleError> {
        let params = WsParams::new().param("userid", upstream_user_id);
        let value = self.call(base_url, token, FN_USER_COURSES, params).await?;
        decode_list(value, "courses")
    }

    #[instrument(skip_all, fields(base_url = %base_url, courses = course_ids.len()))]
    async fn list_assignments(
        &self,
        base_url: &str,
        token: &str,
        course_ids: &[i64],
    ) -> Result<BTreeMap<i64, Vec<Assignment>>, MoodleError> {
        if course_ids.is_empty() {
            return Ok(BTreeMap::new());
        }

        let params = WsParams::new().array("courseids", course_ids);
        let value = self.call(base_url, token, FN_ASSIGNMENTS, params).await?;

        let courses = value
            .get("courses")
            .and_then(Value::as_array)
            .ok_or_else(|| {
                MoodleError::MalformedResponse("assignments response has no courses".to_string())
            })?;

        let mut grouped = BTreeMap::new();
        for course in courses {
            let Some(course_id) = course.get("id").and_then(Value::as_i64) else {
                continue;
            };
            let assignments = course
                .get("assignments")
                .cloned()
                .unwrap_or_else(|| Value::Array(Vec::new()));
            let mut assignments: Vec<Assignment> = decode_list(assignments, "assignments")?;
            for assignment in &mut assignments {
                assignment.course.get_or_insert(course_id);
            }
            grouped
                .entry(course_id)
                .or_insert_with(Vec::new)
                .extend(assignments);
        }

        Ok(grouped)
    }

    #[instrument(skip_all, fields(base_url = %base_url))]
    async fn list_course_contents(
        &self,
        base_url: &str,
        token: &str,
        course_id: i64,
    ) -> Result<Vec<Section>, MoodleError> {
        let params = WsParams::new().param("courseid", course_id);
        let value = self.call(base_url, token, FN_COURSE_CONTENTS, params).await?;
        decode_list(value, "sections")
    }

    async fn fetch_file(&self, url: Url) -> Result<reqwest::Response, MoodleError> {
        Ok(self.http.get(url).send().await?)
    }
}
