//! Test utilities for integration tests.
//!
//! In-memory SQLite with migrations applied, a fixed-key cipher, JWT
//! minting, and wiremock stubs for the Moodle web service endpoint.

use std::sync::Arc;

use anyhow::Result;
use jsonwebtoken::{EncodingKey, Header, encode};
use sea_orm::DatabaseConnection;
use serde_json::Value;
use studydesk::{
    auth::Claims,
    config::{AppConfig, MoodleConfig},
    crypto::TokenCipher,
    db,
    models::connection,
    moodle::MoodleClient,
    repositories::{ConnectionRepository, NewConnection},
    server::AppState,
};
use wiremock::{
    Mock, MockServer, ResponseTemplate,
    matchers::{body_string_contains, method, path},
};

pub const TEST_JWT_SECRET: &str = "integration-test-secret-0123456789abcdef";
#[allow(dead_code)]
pub const OPERATOR_TOKEN: &str = "operator-test-token";
pub const TEST_KEY: [u8; 32] = [42u8; 32];
#[allow(dead_code)]
pub const REST_PATH: &str = "/webservice/rest/server.php";

/// Configuration for a test process: SQLite in memory on a single pooled connection.
pub fn test_config() -> AppConfig {
    AppConfig {
        profile: "test".to_string(),
        database_url: "sqlite::memory:".to_string(),
        db_max_connections: 1,
        crypto_key: Some(TEST_KEY.to_vec()),
        auth_jwt_secret: Some(TEST_JWT_SECRET.to_string()),
        operator_tokens: vec![OPERATOR_TOKEN.to_string()],
        moodle: MoodleConfig {
            request_timeout_ms: 5_000,
            sync_timeout_seconds: 30,
            ..MoodleConfig::default()
        },
        ..AppConfig::default()
    }
}

/// Sets up an in-memory SQLite database with all migrations applied.
pub async fn setup_test_db() -> Result<DatabaseConnection> {
    let db = db::init_pool(&test_config()).await?;
    db::run_migrations(&db).await?;
    Ok(db)
}

pub fn test_cipher() -> TokenCipher {
    TokenCipher::from_bytes(TEST_KEY.to_vec()).expect("test key is 32 bytes")
}

#[allow(dead_code)]
pub fn test_client() -> MoodleClient {
    MoodleClient::new(&test_config().moodle).expect("client builds")
}

/// Application state over `db`, talking to real HTTP through [`MoodleClient`].
#[allow(dead_code)]
pub fn test_state(db: DatabaseConnection) -> AppState {
    AppState::new(
        Arc::new(test_config()),
        db,
        test_cipher(),
        Arc::new(test_client()),
    )
}

/// Inserts an active, verified connection holding `token` sealed under the test key.
#[allow(dead_code)]
pub async fn insert_connection(
    db: &DatabaseConnection,
    user_id: &str,
    base_url: &str,
    token: &str,
) -> Result<connection::Model> {
    let cipher = test_cipher();
    let repo = ConnectionRepository::new(Arc::new(db.clone()));
    let model = repo
        .upsert_verified(NewConnection {
            user_id: user_id.to_string(),
            base_url: base_url.to_string(),
            upstream_user_id: 7,
            token_ciphertext: cipher.seal(token)?,
            private_token_ciphertext: None,
        })
        .await?;
    Ok(model)
}

/// HS256 bearer token for `sub`, valid for an hour.
#[allow(dead_code)]
pub fn mint_jwt(sub: &str) -> String {
    let claims = Claims {
        sub: sub.to_string(),
        exp: (chrono::Utc::now().timestamp() + 3600) as u64,
        aud: None,
    };
    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(TEST_JWT_SECRET.as_bytes()),
    )
    .expect("jwt encodes")
}

/// Answers one web service function with `body`.
#[allow(dead_code)]
pub async fn mock_ws(server: &MockServer, function: &str, body: Value) {
    Mock::given(method("POST"))
        .and(path(REST_PATH))
        .and(body_string_contains(format!("wsfunction={function}")))
        .respond_with(ResponseTemplate::new(200).set_body_json(body))
        .mount(server)
        .await;
}

/// Answers `core_course_get_contents` for one course.
#[allow(dead_code)]
pub async fn mock_course_contents(server: &MockServer, course_id: i64, response: ResponseTemplate) {
    Mock::given(method("POST"))
        .and(path(REST_PATH))
        .and(body_string_contains("wsfunction=core_course_get_contents"))
        .and(body_string_contains(format!("courseid={course_id}")))
        .respond_with(response)
        .mount(server)
        .await;
}

#[allow(dead_code)]
pub async fn mock_site_info(server: &MockServer, userid: i64) {
    mock_ws(
        server,
        "core_webservice_get_site_info",
        serde_json::json!({
            "userid": userid,
            "username": "student",
            "fullname": "Sam Student",
            "sitename": "Test Moodle",
            "release": "4.3"
        }),
    )
    .await;
}

/// Moodle's answer to a revoked or unknown token.
#[allow(dead_code)]
pub fn invalid_token_body() -> Value {
    serde_json::json!({
        "exception": "moodle_exception",
        "errorcode": "invalidtoken",
        "message": "Invalid token - token not found"
    })
}

/// Form-encoded request bodies received for `function`.
#[allow(dead_code)]
pub async fn ws_calls(server: &MockServer, function: &str) -> Vec<String> {
    let needle = format!("wsfunction={function}");
    server
        .received_requests()
        .await
        .unwrap_or_default()
        .into_iter()
        .map(|req| String::from_utf8_lossy(&req.body).into_owned())
        .filter(|body| body.contains(&needle))
        .collect()
}
