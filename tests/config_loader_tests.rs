use std::{
    env, fs,
    path::PathBuf,
    sync::{Mutex, MutexGuard, OnceLock},
};

use studydesk::config::ConfigLoader;
use tempfile::TempDir;

// base64 of 32 ASCII 'a' bytes
const TEST_KEY_B64: &str = "YWFhYWFhYWFhYWFhYWFhYWFhYWFhYWFhYWFhYWFhYWE=";

const MANAGED_VARS: &[&str] = &[
    "STUDYDESK_PROFILE",
    "STUDYDESK_API_BIND_ADDR",
    "STUDYDESK_LOG_LEVEL",
    "STUDYDESK_CRYPTO_KEY",
    "STUDYDESK_AUTH_JWT_SECRET",
    "STUDYDESK_OPERATOR_TOKEN",
    "STUDYDESK_OPERATOR_TOKENS",
    "STUDYDESK_MOODLE_CONTENT_CONCURRENCY",
    "STUDYDESK_MOODLE_SYNC_TIMEOUT_SECONDS",
];

fn env_lock() -> &'static Mutex<()> {
    static LOCK: OnceLock<Mutex<()>> = OnceLock::new();
    LOCK.get_or_init(|| Mutex::new(()))
}

fn env_guard() -> MutexGuard<'static, ()> {
    env_lock()
        .lock()
        .unwrap_or_else(|poison| poison.into_inner())
}

fn clear_env() {
    for var in MANAGED_VARS {
        unsafe {
            env::remove_var(var);
        }
    }
}

fn set_required_secrets() {
    unsafe {
        env::set_var("STUDYDESK_CRYPTO_KEY", TEST_KEY_B64);
        env::set_var("STUDYDESK_AUTH_JWT_SECRET", "test-jwt-secret");
    }
}

fn write_env_file(dir: &TempDir, name: &str, contents: &str) {
    let path = dir.path().join(name);
    fs::write(path, contents).unwrap();
}

#[test]
fn loads_defaults_when_no_env_files_present() {
    let _guard = env_guard();
    clear_env();
    set_required_secrets();

    let temp_dir = TempDir::new().unwrap();
    let loader = ConfigLoader::with_base_dir(PathBuf::from(temp_dir.path()));
    let cfg = loader.load().expect("config loads with defaults");

    assert_eq!(cfg.profile, "local");
    assert_eq!(cfg.api_bind_addr, "0.0.0.0:8080");
    assert_eq!(cfg.log_level, "info");
    assert_eq!(cfg.crypto_key.as_deref(), Some(&[b'a'; 32][..]));
    assert_eq!(cfg.moodle.content_concurrency, 4);
    assert_eq!(cfg.moodle.token_service, "moodle_mobile_app");
    cfg.bind_addr().expect("default bind addr parses");
    clear_env();
}

#[test]
fn layered_env_files_apply_in_order() {
    let _guard = env_guard();
    clear_env();

    let temp_dir = TempDir::new().unwrap();
    write_env_file(&temp_dir, ".env", "STUDYDESK_API_BIND_ADDR=127.0.0.1:3000\n");
    write_env_file(
        &temp_dir,
        ".env.test",
        "STUDYDESK_API_BIND_ADDR=192.168.0.10:5000\nSTUDYDESK_MOODLE_CONTENT_CONCURRENCY=2\n",
    );
    write_env_file(
        &temp_dir,
        ".env.test.local",
        "STUDYDESK_API_BIND_ADDR=10.0.0.5:6000\n",
    );

    // Profile comes from .env.local before the profile-specific files load
    write_env_file(
        &temp_dir,
        ".env.local",
        &format!(
            "STUDYDESK_PROFILE=test\nSTUDYDESK_API_BIND_ADDR=127.0.0.1:4000\nSTUDYDESK_CRYPTO_KEY={TEST_KEY_B64}\nSTUDYDESK_AUTH_JWT_SECRET=layered-secret\n"
        ),
    );

    let loader = ConfigLoader::with_base_dir(PathBuf::from(temp_dir.path()));
    let cfg = loader.load().expect("config loads with layered env files");

    assert_eq!(cfg.profile, "test");
    assert_eq!(cfg.api_bind_addr, "10.0.0.5:6000");
    assert_eq!(cfg.moodle.content_concurrency, 2);
    assert_eq!(cfg.auth_jwt_secret.as_deref(), Some("layered-secret"));
    clear_env();
}

#[test]
fn os_environment_has_highest_precedence() {
    let _guard = env_guard();
    clear_env();

    let temp_dir = TempDir::new().unwrap();
    write_env_file(
        &temp_dir,
        ".env",
        "STUDYDESK_API_BIND_ADDR=127.0.0.1:3000\nSTUDYDESK_OPERATOR_TOKENS=\"one, two ,,\"\n",
    );

    set_required_secrets();
    unsafe {
        env::set_var("STUDYDESK_API_BIND_ADDR", "0.0.0.0:9090");
    }

    let loader = ConfigLoader::with_base_dir(PathBuf::from(temp_dir.path()));
    let cfg = loader.load().expect("config loads with env override");
    assert_eq!(cfg.api_bind_addr, "0.0.0.0:9090");
    assert_eq!(cfg.operator_tokens, vec!["one", "two"]);

    clear_env();
}

#[test]
fn missing_crypto_key_fails_fast() {
    let _guard = env_guard();
    clear_env();
    unsafe {
        env::set_var("STUDYDESK_AUTH_JWT_SECRET", "test-jwt-secret");
    }

    let temp_dir = TempDir::new().unwrap();
    let err = ConfigLoader::with_base_dir(PathBuf::from(temp_dir.path()))
        .load()
        .expect_err("missing key should fail");
    assert!(err.to_string().contains("crypto key is missing"));

    clear_env();
}

#[test]
fn short_crypto_key_fails_fast() {
    let _guard = env_guard();
    clear_env();
    set_required_secrets();
    unsafe {
        // 16 bytes
        env::set_var("STUDYDESK_CRYPTO_KEY", "YWFhYWFhYWFhYWFhYWFhYQ==");
    }

    let temp_dir = TempDir::new().unwrap();
    let err = ConfigLoader::with_base_dir(PathBuf::from(temp_dir.path()))
        .load()
        .expect_err("short key should fail");
    assert!(err.to_string().contains("exactly 32 bytes"));

    clear_env();
}

#[test]
fn invalid_bind_addr_returns_error() {
    let _guard = env_guard();
    clear_env();
    set_required_secrets();
    unsafe {
        env::set_var("STUDYDESK_API_BIND_ADDR", "not-an-addr");
    }

    let temp_dir = TempDir::new().unwrap();
    let err = ConfigLoader::with_base_dir(PathBuf::from(temp_dir.path()))
        .load()
        .expect_err("invalid bind addr should fail");
    assert!(format!("{}", err).contains("invalid api bind address"));

    clear_env();
}
