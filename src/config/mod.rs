//! Configuration loading for studydesk.
//!
//! Loads layered `.env` files and environment variables prefixed with
//! `STUDYDESK_`, producing a typed [`AppConfig`].

use std::{collections::BTreeMap, env, net::SocketAddr, path::PathBuf, time::Duration};

use serde::{Deserialize, Serialize};
use thiserror::Error;

const ENV_PREFIX: &str = "STUDYDESK_";

/// Application configuration derived from `STUDYDESK_*` environment variables.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct AppConfig {
    #[serde(default = "default_profile")]
    pub profile: String,
    #[serde(default = "default_api_bind_addr")]
    pub api_bind_addr: String,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default = "default_log_format")]
    pub log_format: String,
    #[serde(default = "default_database_url")]
    pub database_url: String,
    #[serde(default = "default_db_max_connections")]
    pub db_max_connections: u32,
    #[serde(default = "default_db_acquire_timeout_ms")]
    pub db_acquire_timeout_ms: u64,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub operator_tokens: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub crypto_key: Option<Vec<u8>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth_jwt_secret: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth_jwt_audience: Option<String>,
    #[serde(default)]
    pub moodle: MoodleConfig,
}

/// Upstream Moodle client and sync tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct MoodleConfig {
    /// Per-request timeout for upstream calls (default: 30000)
    ///
    /// Environment variable: `STUDYDESK_MOODLE_REQUEST_TIMEOUT_MS`
    #[serde(default = "default_moodle_request_timeout_ms")]
    pub request_timeout_ms: u64,

    /// Web service name sent to `login/token.php` (default: moodle_mobile_app)
    ///
    /// Environment variable: `STUDYDESK_MOODLE_TOKEN_SERVICE`
    #[serde(default = "default_moodle_token_service")]
    pub token_service: String,

    /// Maximum number of course content fetches in flight during one sync (default: 4)
    ///
    /// Environment variable: `STUDYDESK_MOODLE_CONTENT_CONCURRENCY`
    #[serde(default = "default_moodle_content_concurrency")]
    pub content_concurrency: usize,

    /// Caller-side timeout for a whole sync pass (default: 300)
    ///
    /// Environment variable: `STUDYDESK_MOODLE_SYNC_TIMEOUT_SECONDS`
    #[serde(default = "default_moodle_sync_timeout_seconds")]
    pub sync_timeout_seconds: u64,

    /// Window used for the "due soon" assignment bucket (default: 7)
    ///
    /// Environment variable: `STUDYDESK_MOODLE_DUE_SOON_DAYS`
    #[serde(default = "default_moodle_due_soon_days")]
    pub due_soon_days: u32,
}

impl Default for MoodleConfig {
    fn default() -> Self {
        Self {
            request_timeout_ms: default_moodle_request_timeout_ms(),
            token_service: default_moodle_token_service(),
            content_concurrency: default_moodle_content_concurrency(),
            sync_timeout_seconds: default_moodle_sync_timeout_seconds(),
            due_soon_days: default_moodle_due_soon_days(),
        }
    }
}

impl MoodleConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn sync_timeout(&self) -> Duration {
        Duration::from_secs(self.sync_timeout_seconds)
    }

    pub fn due_soon_window(&self) -> chrono::Duration {
        chrono::Duration::days(i64::from(self.due_soon_days))
    }

    /// Validate upstream tuning bounds
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.request_timeout_ms < 100 || self.request_timeout_ms > 300_000 {
            return Err(ConfigError::InvalidMoodleRequestTimeout {
                value: self.request_timeout_ms,
            });
        }

        if self.content_concurrency == 0 || self.content_concurrency > 16 {
            return Err(ConfigError::InvalidMoodleContentConcurrency {
                value: self.content_concurrency,
            });
        }

        if self.sync_timeout_seconds < 5 || self.sync_timeout_seconds > 3600 {
            return Err(ConfigError::InvalidMoodleSyncTimeout {
                value: self.sync_timeout_seconds,
            });
        }

        if self.token_service.trim().is_empty() {
            return Err(ConfigError::MissingMoodleTokenService);
        }

        Ok(())
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            profile: default_profile(),
            api_bind_addr: default_api_bind_addr(),
            log_level: default_log_level(),
            log_format: default_log_format(),
            database_url: default_database_url(),
            db_max_connections: default_db_max_connections(),
            db_acquire_timeout_ms: default_db_acquire_timeout_ms(),
            operator_tokens: Vec::new(),
            crypto_key: None,
            auth_jwt_secret: None,
            auth_jwt_audience: None,
            moodle: MoodleConfig::default(),
        }
    }
}

impl AppConfig {
    pub fn bind_addr(&self) -> Result<SocketAddr, std::net::AddrParseError> {
        self.api_bind_addr.parse()
    }

    pub fn redacted_json(&self) -> serde_json::Result<String> {
        let mut config = self.clone();
        if !config.operator_tokens.is_empty() {
            config.operator_tokens = vec!["[REDACTED]".to_string()];
        }
        if config.crypto_key.is_some() {
            config.crypto_key = Some(b"[REDACTED]".to_vec());
        }
        if config.auth_jwt_secret.is_some() {
            config.auth_jwt_secret = Some("[REDACTED]".to_string());
        }
        if let Some(at) = config.database_url.find('@') {
            // Keep the scheme so operators can tell backends apart
            let scheme_end = config.database_url.find("://").map_or(0, |i| i + 3);
            if scheme_end < at {
                config
                    .database_url
                    .replace_range(scheme_end..at, "[REDACTED]");
            }
        }
        serde_json::to_string_pretty(&config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if let Some(ref key) = self.crypto_key {
            if key.len() != 32 {
                return Err(ConfigError::InvalidCryptoKeyLength { length: key.len() });
            }
        } else {
            return Err(ConfigError::MissingCryptoKey);
        }

        match self.auth_jwt_secret.as_deref() {
            None | Some("") => return Err(ConfigError::MissingJwtSecret),
            Some(secret) if secret.len() < 32 && !self.is_local_profile() => {
                return Err(ConfigError::WeakJwtSecret {
                    length: secret.len(),
                });
            }
            Some(_) => {}
        }

        if !self.is_local_profile() && self.operator_tokens.is_empty() {
            return Err(ConfigError::MissingOperatorTokens);
        }

        self.moodle.validate()?;

        Ok(())
    }

    fn is_local_profile(&self) -> bool {
        matches!(self.profile.as_str(), "local" | "test")
    }
}

fn default_profile() -> String {
    "local".to_string()
}

fn default_api_bind_addr() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "json".to_string()
}

fn default_database_url() -> String {
    "postgresql://localhost:5432/studydesk".to_string()
}

fn default_db_max_connections() -> u32 {
    10
}

fn default_db_acquire_timeout_ms() -> u64 {
    5000
}

fn default_moodle_request_timeout_ms() -> u64 {
    30_000
}

fn default_moodle_token_service() -> String {
    "moodle_mobile_app".to_string()
}

fn default_moodle_content_concurrency() -> usize {
    4
}

fn default_moodle_sync_timeout_seconds() -> u64 {
    300 // 5 minutes
}

fn default_moodle_due_soon_days() -> u32 {
    7
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load environment file {path}: {source}")]
    EnvFile {
        path: PathBuf,
        source: dotenvy::Error,
    },
    #[error("invalid api bind address '{value}': {source}")]
    InvalidBindAddr {
        value: String,
        source: std::net::AddrParseError,
    },
    #[error(
        "no operator tokens configured; set STUDYDESK_OPERATOR_TOKEN or STUDYDESK_OPERATOR_TOKENS"
    )]
    MissingOperatorTokens,
    #[error("crypto key is missing; set STUDYDESK_CRYPTO_KEY environment variable")]
    MissingCryptoKey,
    #[error("crypto key is invalid base64: {error}")]
    InvalidCryptoKeyBase64 { error: String },
    #[error("crypto key must decode to exactly 32 bytes, got {length} bytes")]
    InvalidCryptoKeyLength { length: usize },
    #[error("JWT secret is missing; set STUDYDESK_AUTH_JWT_SECRET environment variable")]
    MissingJwtSecret,
    #[error("JWT secret must be at least 32 bytes outside local profiles, got {length}")]
    WeakJwtSecret { length: usize },
    #[error("moodle request timeout must be between 100 and 300000 ms, got {value}")]
    InvalidMoodleRequestTimeout { value: u64 },
    #[error("moodle content concurrency must be between 1 and 16, got {value}")]
    InvalidMoodleContentConcurrency { value: usize },
    #[error("moodle sync timeout must be between 5 and 3600 seconds, got {value}")]
    InvalidMoodleSyncTimeout { value: u64 },
    #[error("moodle token service must not be empty")]
    MissingMoodleTokenService,
}

pub struct ConfigLoader {
    base_dir: PathBuf,
}

impl ConfigLoader {
    pub fn new() -> Self {
        Self {
            base_dir: env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
        }
    }

    pub fn with_base_dir(base_dir: PathBuf) -> Self {
        Self { base_dir }
    }

    pub fn load(&self) -> Result<AppConfig, ConfigError> {
        let (mut layered, profile_hint) = self.collect_layered_env()?;

        for (key, value) in env::vars() {
            if let Some(stripped) = key.strip_prefix(ENV_PREFIX) {
                layered.insert(stripped.to_string(), value);
            }
        }

        let profile = take_non_empty(&mut layered, "PROFILE").unwrap_or(profile_hint);
        let api_bind_addr =
            take_non_empty(&mut layered, "API_BIND_ADDR").unwrap_or_else(default_api_bind_addr);
        let log_level = take_non_empty(&mut layered, "LOG_LEVEL").unwrap_or_else(default_log_level);
        let log_format =
            take_non_empty(&mut layered, "LOG_FORMAT").unwrap_or_else(default_log_format);
        let database_url =
            take_non_empty(&mut layered, "DATABASE_URL").unwrap_or_else(default_database_url);
        let db_max_connections = take_parsed(&mut layered, "DB_MAX_CONNECTIONS")
            .unwrap_or_else(default_db_max_connections);
        let db_acquire_timeout_ms = take_parsed(&mut layered, "DB_ACQUIRE_TIMEOUT_MS")
            .unwrap_or_else(default_db_acquire_timeout_ms);

        let operator_tokens = if let Some(tokens) = layered.remove("OPERATOR_TOKENS") {
            split_list(&tokens)
        } else if let Some(token) = take_non_empty(&mut layered, "OPERATOR_TOKEN") {
            vec![token]
        } else {
            Vec::new()
        };

        let crypto_key = match take_non_empty(&mut layered, "CRYPTO_KEY") {
            Some(key_str) => {
                use base64::{Engine as _, engine::general_purpose};
                Some(
                    general_purpose::STANDARD
                        .decode(key_str.trim())
                        .map_err(|e| ConfigError::InvalidCryptoKeyBase64 {
                            error: e.to_string(),
                        })?,
                )
            }
            None => None,
        };

        let auth_jwt_secret = take_non_empty(&mut layered, "AUTH_JWT_SECRET");
        let auth_jwt_audience = take_non_empty(&mut layered, "AUTH_JWT_AUDIENCE");

        let moodle = MoodleConfig {
            request_timeout_ms: take_parsed(&mut layered, "MOODLE_REQUEST_TIMEOUT_MS")
                .unwrap_or_else(default_moodle_request_timeout_ms),
            token_service: take_non_empty(&mut layered, "MOODLE_TOKEN_SERVICE")
                .unwrap_or_else(default_moodle_token_service),
            content_concurrency: take_parsed(&mut layered, "MOODLE_CONTENT_CONCURRENCY")
                .unwrap_or_else(default_moodle_content_concurrency),
            sync_timeout_seconds: take_parsed(&mut layered, "MOODLE_SYNC_TIMEOUT_SECONDS")
                .unwrap_or_else(default_moodle_sync_timeout_seconds),
            due_soon_days: take_parsed(&mut layered, "MOODLE_DUE_SOON_DAYS")
                .unwrap_or_else(default_moodle_due_soon_days),
        };

        let config = AppConfig {
            profile,
            api_bind_addr,
            log_level,
            log_format,
            database_url,
            db_max_connections,
            db_acquire_timeout_ms,
            operator_tokens,
            crypto_key,
            auth_jwt_secret,
            auth_jwt_audience,
            moodle,
        };

        config.validate()?;

        match config.bind_addr() {
            Ok(_) => Ok(config),
            Err(source) => Err(ConfigError::InvalidBindAddr {
                value: config.api_bind_addr.clone(),
                source,
            }),
        }
    }

    fn collect_layered_env(&self) -> Result<(BTreeMap<String, String>, String), ConfigError> {
        let mut values = BTreeMap::new();

        self.merge_dotenv(self.base_dir.join(".env"), &mut values)?;
        self.merge_dotenv(self.base_dir.join(".env.local"), &mut values)?;

        let profile = env::var(format!("{ENV_PREFIX}PROFILE"))
            .ok()
            .filter(|v| !v.is_empty())
            .or_else(|| values.get("PROFILE").cloned())
            .unwrap_or_else(default_profile);

        self.merge_dotenv(
            self.base_dir.join(format!(".env.{}", &profile)),
            &mut values,
        )?;
        self.merge_dotenv(
            self.base_dir.join(format!(".env.{}.local", &profile)),
            &mut values,
        )?;

        Ok((values, profile))
    }

    fn merge_dotenv(
        &self,
        path: PathBuf,
        values: &mut BTreeMap<String, String>,
    ) -> Result<(), ConfigError> {
        match dotenvy::from_path_iter(&path) {
            Ok(iter) => {
                for item in iter {
                    let (key, value) = item.map_err(|source| ConfigError::EnvFile {
                        path: path.clone(),
                        source,
                    })?;
                    if let Some(stripped) = key.strip_prefix(ENV_PREFIX) {
                        values.insert(stripped.to_string(), value);
                    }
                }
                Ok(())
            }
            Err(dotenvy::Error::Io(ref io_err))
                if io_err.kind() == std::io::ErrorKind::NotFound =>
            {
                Ok(())
            }
            Err(err) => Err(ConfigError::EnvFile { path, source: err }),
        }
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

fn take_non_empty(values: &mut BTreeMap<String, String>, key: &str) -> Option<String> {
    values
        .remove(key)
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn take_parsed<T: std::str::FromStr>(values: &mut BTreeMap<String, String>, key: &str) -> Option<T> {
    values.remove(key).and_then(|v| v.trim().parse().ok())
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}
