//! # studydesk service entry point

use std::sync::Arc;

use anyhow::{Context, Result};
use studydesk::{
    config::ConfigLoader,
    crypto::TokenCipher,
    db,
    moodle::MoodleClient,
    server::{AppState, run_server},
    telemetry,
};

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration from layered env files and variables
    let config = ConfigLoader::new()
        .load()
        .context("loading configuration")?;

    telemetry::init_tracing(&config).context("initializing tracing")?;
    tracing::info!(profile = %config.profile, "configuration loaded");
    if let Ok(redacted_json) = config.redacted_json() {
        tracing::debug!(config = %redacted_json, "effective configuration");
    }

    let key_bytes = config
        .crypto_key
        .clone()
        .context("crypto key not present in configuration")?;
    let cipher = TokenCipher::from_bytes(key_bytes).context("initializing token cipher")?;

    let db = db::init_pool(&config)
        .await
        .context("initializing database connection pool")?;
    db::run_migrations(&db).await.context("running migrations")?;

    let moodle = MoodleClient::new(&config.moodle).context("building Moodle client")?;

    let state = AppState::new(Arc::new(config), db, cipher, Arc::new(moodle));
    run_server(state).await
}
