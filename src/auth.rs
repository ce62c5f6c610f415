//! # Authentication and Authorization
//!
//! Two bearer schemes guard the API:
//!
//! * user routes carry an HS256 JWT whose `sub` claim is the owner id every
//!   query is scoped to;
//! * operator routes carry one of the configured operator tokens, compared
//!   in constant time.

use std::sync::Arc;

use axum::{
    extract::{FromRef, FromRequestParts, Request, State},
    http::{HeaderMap, header::AUTHORIZATION, request::Parts},
    middleware::Next,
    response::Response,
};
use jsonwebtoken::{Algorithm, DecodingKey, Validation, decode};
use serde::{Deserialize, Serialize};
use subtle::ConstantTimeEq;

use crate::config::AppConfig;
use crate::error::{ApiError, unauthorized};
use crate::server::AppState;

/// The authenticated end user, by identity-provider subject
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthUser {
    pub user_id: String,
}

/// Marker type for authenticated operator requests
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OperatorAuth;

/// JWT claims accepted on user routes
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub exp: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aud: Option<String>,
}

impl FromRef<AppState> for Arc<AppConfig> {
    fn from_ref(app_state: &AppState) -> Self {
        Arc::clone(&app_state.config)
    }
}

/// Validates the user JWT and stores an [`AuthUser`] in request extensions
pub async fn user_auth_middleware(
    State(config): State<Arc<AppConfig>>,
    mut request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let token = extract_bearer_token(request.headers())?;
    let user = decode_user(&config, token)?;
    tracing::debug!(user_id = %user.user_id, "Authenticated user request");

    request.extensions_mut().insert(user);
    Ok(next.run(request).await)
}

/// Validates an operator bearer token
pub async fn operator_auth_middleware(
    State(config): State<Arc<AppConfig>>,
    mut request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let token = extract_bearer_token(request.headers())?;
    validate_operator_token(&config, token)?;
    tracing::info!("Authenticated operator request");

    request.extensions_mut().insert(OperatorAuth);
    Ok(next.run(request).await)
}

fn extract_bearer_token(headers: &HeaderMap) -> Result<&str, ApiError> {
    headers
        .get(AUTHORIZATION)
        .ok_or_else(|| unauthorized(Some("Missing Authorization header")))?
        .to_str()
        .map_err(|_| unauthorized(Some("Invalid Authorization header")))?
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|token| !token.is_empty())
        .ok_or_else(|| unauthorized(Some("Authorization header must use Bearer scheme")))
}

fn decode_user(config: &AppConfig, token: &str) -> Result<AuthUser, ApiError> {
    let secret = config
        .auth_jwt_secret
        .as_deref()
        .filter(|s| !s.is_empty())
        .ok_or_else(|| {
            tracing::error!("user authentication attempted without a configured JWT secret");
            unauthorized(Some("Authentication is not configured"))
        })?;

    let mut validation = Validation::new(Algorithm::HS256);
    match config.auth_jwt_audience.as_deref() {
        Some(audience) if !audience.is_empty() => validation.set_audience(&[audience]),
        _ => validation.validate_aud = false,
    }

    let data = decode::<Claims>(token, &DecodingKey::from_secret(secret.as_bytes()), &validation)
        .map_err(|err| {
            tracing::debug!(reason = ?err.kind(), "rejected user token");
            unauthorized(Some("Invalid or expired token"))
        })?;

    let user_id = data.claims.sub.trim();
    if user_id.is_empty() {
        return Err(unauthorized(Some("Token has no subject")));
    }

    Ok(AuthUser {
        user_id: user_id.to_string(),
    })
}

fn validate_operator_token(config: &AppConfig, token: &str) -> Result<(), ApiError> {
    let is_valid = config
        .operator_tokens
        .iter()
        .any(|configured| ConstantTimeEq::ct_eq(token.as_bytes(), configured.as_bytes()).into());

    if is_valid {
        Ok(())
    } else {
        Err(unauthorized(Some("Invalid bearer token")))
    }
}

impl<S> FromRequestParts<S> for AuthUser
where
    S: Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<AuthUser>()
            .cloned()
            .ok_or_else(|| unauthorized(Some("Authentication required")))
    }
}

impl<S> FromRequestParts<S> for OperatorAuth
where
    S: Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<OperatorAuth>()
            .copied()
            .ok_or_else(|| unauthorized(Some("Operator authentication required")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{
        Router,
        body::Body,
        http::{Request, StatusCode},
        routing::get,
    };
    use jsonwebtoken::{EncodingKey, Header, encode};
    use tower::ServiceExt;

    const SECRET: &str = "unit-test-secret-unit-test-secret";

    fn create_test_config(audience: Option<&str>) -> Arc<AppConfig> {
        Arc::new(AppConfig {
            operator_tokens: vec!["test-token-123".to_string()],
            auth_jwt_secret: Some(SECRET.to_string()),
            auth_jwt_audience: audience.map(str::to_string),
            ..Default::default()
        })
    }

    fn mint(sub: &str, aud: Option<&str>, exp_offset: i64) -> String {
        let claims = Claims {
            sub: sub.to_string(),
            exp: (chrono::Utc::now().timestamp() + exp_offset) as u64,
            aud: aud.map(str::to_string),
        };
        encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(SECRET.as_bytes()),
        )
        .unwrap()
    }

    async fn whoami(user: AuthUser) -> String {
        user.user_id
    }

    async fn call_user_route(config: Arc<AppConfig>, auth: Option<String>) -> (StatusCode, String) {
        let app = Router::new()
            .route("/me", get(whoami))
            .layer(axum::middleware::from_fn_with_state(
                config,
                user_auth_middleware,
            ));

        let mut builder = Request::builder().uri("/me");
        if let Some(auth) = auth {
            builder = builder.header("Authorization", auth);
        }
        let response = app.oneshot(builder.body(Body::empty()).unwrap()).await.unwrap();
        let status = response.status();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, String::from_utf8_lossy(&body).into_owned())
    }

    async fn call_operator_route(config: Arc<AppConfig>, auth: &str) -> StatusCode {
        async fn handler(_: OperatorAuth) -> &'static str {
            "OK"
        }

        Router::new()
            .route("/op", get(handler))
            .layer(axum::middleware::from_fn_with_state(
                config,
                operator_auth_middleware,
            ))
            .oneshot(
                Request::builder()
                    .uri("/op")
                    .header("Authorization", auth)
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap()
            .status()
    }

    #[tokio::test]
    async fn missing_auth_header_returns_401() {
        let (status, _) = call_user_route(create_test_config(None), None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn valid_jwt_exposes_subject() {
        let token = mint("user-42", None, 3600);
        let (status, body) =
            call_user_route(create_test_config(None), Some(format!("Bearer {token}"))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "user-42");
    }

    #[tokio::test]
    async fn expired_or_foreign_jwt_returns_401() {
        let expired = mint("user-42", None, -3600);
        let (status, _) =
            call_user_route(create_test_config(None), Some(format!("Bearer {expired}"))).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let (status, _) = call_user_route(
            create_test_config(None),
            Some("Bearer not.a.jwt".to_string()),
        )
        .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn audience_is_enforced_when_configured() {
        let config = create_test_config(Some("studydesk"));

        let good = mint("user-42", Some("studydesk"), 3600);
        let (status, _) = call_user_route(config.clone(), Some(format!("Bearer {good}"))).await;
        assert_eq!(status, StatusCode::OK);

        let wrong = mint("user-42", Some("other-app"), 3600);
        let (status, _) = call_user_route(config, Some(format!("Bearer {wrong}"))).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn operator_tokens_compared_exactly() {
        let config = create_test_config(None);
        assert_eq!(
            call_operator_route(config.clone(), "Bearer test-token-123").await,
            StatusCode::OK
        );
        assert_eq!(
            call_operator_route(config.clone(), "Bearer test-token-12").await,
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            call_operator_route(config, "Basic dGVzdDoxMjM=").await,
            StatusCode::UNAUTHORIZED
        );
    }
}
