//! Configuration loading from `.env` files.

use std::env;

use anyhow::{Context, Result};

use crate::rank::RankConfig;

/// Runtime settings derived from environment variables.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Relays queried for feeds, threads and vote/zap aggregates.
    pub relays: Vec<String>,
    /// Extra endpoints added to the broadcast set for replaceable lists.
    pub extra_broadcast_relays: Vec<String>,
    /// Hex-encoded secret key; absent means read-only operation.
    pub secret_key: Option<String>,
    /// Per-relay request timeout in milliseconds.
    pub timeout_ms: u64,
    /// Optional Tor SOCKS proxy (host:port).
    pub tor_socks: Option<String>,
    /// How long feed pages stay cached, in seconds.
    pub cache_ttl_secs: u64,
    /// Hot-ranking constants.
    pub rank: RankConfig,
}

impl Settings {
    /// Load settings from the specified `.env` file.
    pub fn from_env(path: &str) -> Result<Self> {
        dotenvy::from_filename(path).context("reading env file")?;
        let relays = csv_strings(env::var("RELAYS").context("RELAYS is required")?);
        if relays.is_empty() {
            anyhow::bail!("RELAYS must name at least one endpoint");
        }
        let extra_broadcast_relays =
            csv_strings(env::var("EXTRA_BROADCAST_RELAYS").unwrap_or_default());
        let secret_key = env::var("SECRET_KEY").ok().filter(|s| !s.is_empty());
        let timeout_ms = env_u64("TIMEOUT_MS", 5000);
        let tor_socks = env::var("TOR_SOCKS").ok().filter(|s| !s.is_empty());
        let cache_ttl_secs = env_u64("CACHE_TTL_SECS", 60);
        let defaults = RankConfig::default();
        let rank = RankConfig {
            gravity: env_f64("HOT_GRAVITY", defaults.gravity),
            age_offset_hours: env_f64("HOT_AGE_OFFSET_HOURS", defaults.age_offset_hours),
            reply_weight: env_f64("HOT_REPLY_WEIGHT", defaults.reply_weight),
            zap_weight: env_f64("HOT_ZAP_WEIGHT", defaults.zap_weight),
        };
        Ok(Self {
            relays,
            extra_broadcast_relays,
            secret_key,
            timeout_ms,
            tor_socks,
            cache_ttl_secs,
            rank,
        })
    }
}

/// Split a comma-separated string into trimmed string values.
pub fn csv_strings(input: impl AsRef<str>) -> Vec<String> {
    let s = input.as_ref();
    s.split(',')
        .filter_map(|s| {
            let t = s.trim();
            if t.is_empty() {
                None
            } else {
                Some(t.to_string())
            }
        })
        .collect()
}

fn env_u64(name: &str, default: u64) -> u64 {
    env::var(name)
        .ok()
        .and_then(|s| s.trim().parse().ok())
        .unwrap_or(default)
}

fn env_f64(name: &str, default: f64) -> f64 {
    env::var(name)
        .ok()
        .and_then(|s| s.trim().parse().ok())
        .unwrap_or(default)
}
