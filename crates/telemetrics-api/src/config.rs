// Service configuration loaded from environment variables.
// Decision: no cached settings singleton — Settings is built once in main
// and injected into the router state.

use anyhow::{Context, Result};
use sha2::{Digest, Sha256};

use crate::rate_limit::RatePolicy;

/// Bundled development key, hex-obfuscated at rest. Appended to the key set
/// when API_KEYS is unset so the service runs out of the box; operators must
/// configure real keys in production.
const DEFAULT_DEV_KEY_HEX: &str =
    "492d616d2d616e2d756e7365637572652d6465762d6b65792d5245504c4143455f4d45";

#[derive(Debug, Clone)]
pub struct Settings {
    pub sqlite_file_path: String,
    pub api_keys: Vec<String>,
    pub rate_limit: RatePolicy,
    pub bind_addr: String,
}

impl Settings {
    pub fn from_env() -> Result<Self> {
        let sqlite_file_path = std::env::var("SQLITE_FILE_PATH")
            .unwrap_or_else(|_| "databases/fallback.db".to_string());

        let mut api_keys: Vec<String> = std::env::var("API_KEYS")
            .map(|s| {
                s.split(',')
                    .map(|k| k.trim().to_string())
                    .filter(|k| !k.is_empty())
                    .collect()
            })
            .unwrap_or_default();

        if api_keys.is_empty() {
            tracing::warn!("API_KEYS not set, falling back to the bundled development key");
            api_keys.push(default_dev_key()?);
        }

        let rate_limit: RatePolicy = std::env::var("RATE_LIMIT")
            .unwrap_or_else(|_| "60/minute".to_string())
            .parse()
            .map_err(|e: anyhow::Error| e.context("Invalid RATE_LIMIT"))?;

        let bind_addr =
            std::env::var("BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:8000".to_string());

        Ok(Self {
            sqlite_file_path,
            api_keys,
            rate_limit,
            bind_addr,
        })
    }

    /// Compare `candidate` against every configured key. Both sides are
    /// hashed first so the comparison never early-exits on key bytes, and
    /// every configured key is checked even after a match.
    pub fn is_valid_key(&self, candidate: &str) -> bool {
        let candidate = Sha256::digest(candidate.as_bytes());
        let mut found = false;
        for key in &self.api_keys {
            found |= Sha256::digest(key.as_bytes()) == candidate;
        }
        found
    }
}

fn default_dev_key() -> Result<String> {
    let bytes = hex::decode(DEFAULT_DEV_KEY_HEX).context("Malformed bundled dev key")?;
    String::from_utf8(bytes).context("Bundled dev key is not valid UTF-8")
}
