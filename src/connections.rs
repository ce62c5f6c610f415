//! Connecting and re-verifying Moodle sites.
//!
//! Tokens are verified before anything is stored, sealed before they reach
//! the repository, and never returned to callers.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};
use utoipa::ToSchema;
use uuid::Uuid;
use zeroize::Zeroizing;

use crate::crypto::TokenCipher;
use crate::error::ServiceError;
use crate::models::connection;
use crate::moodle::{MoodleApi, SiteInfo, normalize_base_url};
use crate::repositories::{ConnectionRepository, NewConnection};

/// Body of `POST /moodle/connect`. Either `token` or `username` + `password`.
#[derive(Clone, Deserialize, ToSchema)]
pub struct ConnectRequest {
    /// Moodle site root, e.g. `https://lms.example.edu`
    pub base_url: String,
    /// Existing web service token
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default)]
    pub private_token: Option<String>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
}

impl fmt::Debug for ConnectRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectRequest")
            .field("base_url", &self.base_url)
            .field("token", &self.token.as_ref().map(|_| "[REDACTED]"))
            .field("private_token", &self.private_token.as_ref().map(|_| "[REDACTED]"))
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}

/// Public view of a stored connection. Never carries ciphertext.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, PartialEq)]
pub struct ConnectionSummary {
    pub id: Uuid,
    pub base_url: String,
    pub upstream_user_id: Option<i64>,
    /// `active` or `invalid`
    pub status: String,
    pub last_verified_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<&connection::Model> for ConnectionSummary {
    fn from(model: &connection::Model) -> Self {
        Self {
            id: model.id,
            base_url: model.base_url.clone(),
            upstream_user_id: model.upstream_user_id,
            status: model.status.clone(),
            last_verified_at: model.last_verified_at.map(|t| t.with_timezone(&Utc)),
            created_at: model.created_at.with_timezone(&Utc),
            updated_at: model.updated_at.with_timezone(&Utc),
        }
    }
}

/// Identity reported by the site for a verified token.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, PartialEq)]
pub struct SiteIdentity {
    pub connection_id: Uuid,
    pub upstream_user_id: i64,
    pub username: Option<String>,
    pub fullname: Option<String>,
    pub sitename: Option<String>,
    pub release: Option<String>,
}

impl SiteIdentity {
    fn new(connection_id: Uuid, site: &SiteInfo) -> Self {
        Self {
            connection_id,
            upstream_user_id: site.userid,
            username: site.username.clone(),
            fullname: site.fullname.clone(),
            sitename: site.sitename.clone(),
            release: site.release.clone(),
        }
    }
}

#[derive(Clone)]
pub struct ConnectionService {
    repo: ConnectionRepository,
    cipher: Arc<TokenCipher>,
    moodle: Arc<dyn MoodleApi>,
}

impl ConnectionService {
    pub fn new(
        repo: ConnectionRepository,
        cipher: Arc<TokenCipher>,
        moodle: Arc<dyn MoodleApi>,
    ) -> Self {
        Self {
            repo,
            cipher,
            moodle,
        }
    }

    /// Link a Moodle site to `owner`, replacing any earlier token for the same site.
    #[instrument(skip_all, fields(user_id = %owner))]
    pub async fn connect(
        &self,
        owner: &str,
        request: ConnectRequest,
    ) -> Result<ConnectionSummary, ServiceError> {
        let base_url = normalize_base_url(&request.base_url).map_err(ServiceError::Validation)?;

        let (token, private_token) = match non_empty(request.token) {
            Some(token) => (
                Zeroizing::new(token),
                non_empty(request.private_token).map(Zeroizing::new),
            ),
            None => {
                let (Some(username), Some(password)) =
                    (non_empty(request.username), request.password.map(Zeroizing::new))
                else {
                    return Err(ServiceError::Validation(
                        "either token or username and password is required".to_string(),
                    ));
                };
                let acquired = self
                    .moodle
                    .acquire_token(&base_url, &username, &password)
                    .await?;
                (acquired.token, acquired.private_token)
            }
        };

        let site = self.moodle.verify(&base_url, &token).await?;

        let token_ciphertext = self.cipher.seal(&token).map_err(ServiceError::Encryption)?;
        let private_token_ciphertext = private_token
            .as_deref()
            .map(|t| self.cipher.seal(t))
            .transpose()
            .map_err(ServiceError::Encryption)?;

        let stored = self
            .repo
            .upsert_verified(NewConnection {
                user_id: owner.to_string(),
                base_url,
                upstream_user_id: site.userid,
                token_ciphertext,
                private_token_ciphertext,
            })
            .await?;

        info!(
            connection_id = %stored.id,
            base_url = %stored.base_url,
            upstream_user_id = site.userid,
            "Moodle connection stored"
        );
        Ok(ConnectionSummary::from(&stored))
    }

    /// Re-check a stored token and rotate its ciphertext.
    #[instrument(skip_all, fields(user_id = %owner, connection_id = %connection_id))]
    pub async fn verify(
        &self,
        owner: &str,
        connection_id: Uuid,
    ) -> Result<SiteIdentity, ServiceError> {
        let existing = self
            .repo
            .find_for_user(owner, &connection_id)
            .await?
            .ok_or(ServiceError::ConnectionNotFound)?;

        let token = self
            .cipher
            .open(&existing.token_ciphertext)
            .map_err(ServiceError::TokenDecryptionFailed)?;

        let site = match self.moodle.verify(&existing.base_url, &token).await {
            Ok(site) => site,
            Err(err) => {
                let err = ServiceError::from_stored_token_call(err);
                if err.is_token_rejection() {
                    mark_invalid_best_effort(&self.repo, &existing.id).await;
                }
                return Err(err);
            }
        };

        let resealed = self.cipher.seal(&token).map_err(ServiceError::Encryption)?;
        let updated = self
            .repo
            .record_verification(existing, site.userid, resealed)
            .await?;

        info!(upstream_user_id = site.userid, "Moodle connection verified");
        Ok(SiteIdentity::new(updated.id, &site))
    }

    pub async fn list(&self, owner: &str) -> Result<Vec<ConnectionSummary>, ServiceError> {
        let rows = self.repo.list_for_user(owner).await?;
        Ok(rows.iter().map(ConnectionSummary::from).collect())
    }

    /// The earliest-created active connection.
    pub async fn primary(&self, owner: &str) -> Result<ConnectionSummary, ServiceError> {
        self.repo
            .find_primary(owner)
            .await?
            .map(|row| ConnectionSummary::from(&row))
            .ok_or(ServiceError::ConnectionNotFound)
    }
}

/// Flip a connection to `invalid`, logging rather than returning a failure.
pub(crate) async fn mark_invalid_best_effort(repo: &ConnectionRepository, id: &Uuid) {
    if let Err(err) = repo.mark_invalid(id).await {
        warn!(connection_id = %id, error = %err, "failed to mark connection invalid");
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connect_request_debug_hides_secrets() {
        let request = ConnectRequest {
            base_url: "https://lms.example.edu".into(),
            token: Some("abc123".into()),
            private_token: None,
            username: Some("student".into()),
            password: Some("hunter2".into()),
        };

        let rendered = format!("{request:?}");
        assert!(!rendered.contains("abc123"));
        assert!(!rendered.contains("hunter2"));
        assert!(rendered.contains("student"));
    }

    #[test]
    fn test_non_empty_filters_blank_values() {
        assert_eq!(non_empty(Some("  ".into())), None);
        assert_eq!(non_empty(None), None);
        assert_eq!(non_empty(Some("x".into())), Some("x".into()));
    }
}
