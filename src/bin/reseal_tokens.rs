//! # Token Reseal Tool
//!
//! Re-seals every stored Moodle token under the current `STUDYDESK_CRYPTO_KEY`
//! with a fresh nonce.
//!
//! ```bash
//! # After rotating the key, migrate rows sealed under the old one
//! cargo run --bin reseal_tokens -- --previous-key <base64>
//!
//! # Report what would change
//! cargo run --bin reseal_tokens -- --previous-key <base64> --dry-run
//! ```
//!
//! Values that are not in sealed form (rows written before encryption was
//! enforced) are sealed as-is. Values no key can open are reported and left
//! untouched.

use anyhow::{Context, Result, anyhow};
use base64::{Engine as _, engine::general_purpose::STANDARD};
use clap::Parser;
use studydesk::{
    config::ConfigLoader,
    crypto::{TokenCipher, looks_sealed},
    db,
    repositories::ConnectionRepository,
};
use std::sync::Arc;

#[derive(Parser)]
#[command(
    name = "reseal_tokens",
    about = "Re-encrypt stored Moodle tokens under the current key"
)]
struct Args {
    /// Base64 key the tokens were previously sealed with
    #[arg(long)]
    previous_key: Option<String>,

    /// Report what would change without writing
    #[arg(long)]
    dry_run: bool,
}

enum Resealed {
    /// Opened with the current key and sealed again under a fresh nonce
    Rotated(String),
    /// Opened with the previous key, or stored unsealed, and sealed under the current key
    Migrated(String),
    Unreadable,
}

impl Resealed {
    fn into_sealed(self) -> Option<(String, bool)> {
        match self {
            Resealed::Rotated(sealed) => Some((sealed, false)),
            Resealed::Migrated(sealed) => Some((sealed, true)),
            Resealed::Unreadable => None,
        }
    }
}

#[derive(Default)]
struct Tally {
    rotated: usize,
    migrated: usize,
    unreadable: usize,
}

fn reseal_value(current: &TokenCipher, previous: Option<&TokenCipher>, value: &str) -> Resealed {
    if let Ok(sealed) = current.reseal(value) {
        return Resealed::Rotated(sealed);
    }

    if let Some(previous) = previous
        && let Ok(plaintext) = previous.open(value)
    {
        return match current.seal(&plaintext) {
            Ok(sealed) => Resealed::Migrated(sealed),
            Err(_) => Resealed::Unreadable,
        };
    }

    if !looks_sealed(value) && !value.is_empty() {
        return match current.seal(value) {
            Ok(sealed) => Resealed::Migrated(sealed),
            Err(_) => Resealed::Unreadable,
        };
    }

    Resealed::Unreadable
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config = ConfigLoader::new()
        .load()
        .context("loading configuration")?;
    let key_bytes = config
        .crypto_key
        .clone()
        .context("crypto key not present in configuration")?;
    let current = TokenCipher::from_bytes(key_bytes).context("initializing current key")?;

    let previous = args
        .previous_key
        .as_deref()
        .map(|encoded| {
            let bytes = STANDARD
                .decode(encoded.trim())
                .map_err(|e| anyhow!("previous key is not valid base64: {e}"))?;
            TokenCipher::from_bytes(bytes).context("initializing previous key")
        })
        .transpose()?;

    let db = db::init_pool(&config)
        .await
        .context("initializing database connection pool")?;
    let repo = ConnectionRepository::new(Arc::new(db));

    let connections = repo.list_all().await.context("querying connections")?;
    let mut tally = Tally::default();

    for conn in connections {
        let connection_id = conn.id;

        let Some((token, token_migrated)) =
            reseal_value(&current, previous.as_ref(), &conn.token_ciphertext).into_sealed()
        else {
            eprintln!("connection {connection_id}: token cannot be opened with any key");
            tally.unreadable += 1;
            continue;
        };

        let (private_token, private_migrated) = match conn.private_token_ciphertext.as_deref() {
            None | Some("") => (None, false),
            Some(value) => match reseal_value(&current, previous.as_ref(), value).into_sealed() {
                Some((sealed, migrated)) => (Some(sealed), migrated),
                None => {
                    eprintln!(
                        "connection {connection_id}: private token cannot be opened with any key"
                    );
                    tally.unreadable += 1;
                    continue;
                }
            },
        };

        if token_migrated || private_migrated {
            tally.migrated += 1;
        } else {
            tally.rotated += 1;
        }

        if args.dry_run {
            continue;
        }

        repo.update_ciphertexts(conn, token, private_token)
            .await
            .with_context(|| format!("updating connection {connection_id}"))?;
    }

    let verb = if args.dry_run { "would be" } else { "were" };
    println!(
        "{} connection(s) {verb} migrated to the current key, {} {verb} rotated, {} unreadable.",
        tally.migrated, tally.rotated, tally.unreadable
    );

    if tally.unreadable > 0 {
        return Err(anyhow!(
            "{} connection(s) hold tokens no configured key can open",
            tally.unreadable
        ));
    }

    Ok(())
}
