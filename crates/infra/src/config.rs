//! Configuration loading and representation.

use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result, bail};

pub const ENV_LOCK_TIMEOUT_MS: &str = "GRNRECON_LOCK_TIMEOUT_MS";
pub const ENV_BUSY_RETRIES: &str = "GRNRECON_BUSY_RETRIES";
pub const ENV_RETRY_BACKOFF_MS: &str = "GRNRECON_RETRY_BACKOFF_MS";
pub const ENV_GRN_PREFIX: &str = "GRNRECON_GRN_PREFIX";

/// Runtime settings for the receiving core.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReceivingConfig {
    /// Longest wait for a per-PO or per-GRN lock before `Busy` is returned.
    pub lock_timeout: Duration,
    /// How many times orchestration retries an operation that hit `Busy`/`Timeout`.
    pub busy_retries: u32,
    /// Base backoff between retries (multiplied by the attempt number).
    pub retry_backoff: Duration,
    /// Prefix of generated GRN numbers (`<prefix>-000001`).
    pub grn_prefix: String,
}

impl Default for ReceivingConfig {
    fn default() -> Self {
        Self {
            lock_timeout: Duration::from_millis(2_000),
            busy_retries: 3,
            retry_backoff: Duration::from_millis(25),
            grn_prefix: "GRN".to_string(),
        }
    }
}

impl ReceivingConfig {
    /// Load from process environment, falling back to defaults for unset variables.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load using an arbitrary variable source (tests, config files mapped to env names).
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let defaults = Self::default();

        let lock_timeout_ms: u64 = parse_var(&lookup, ENV_LOCK_TIMEOUT_MS)?
            .unwrap_or(defaults.lock_timeout.as_millis() as u64);
        if lock_timeout_ms == 0 {
            bail!("{ENV_LOCK_TIMEOUT_MS} must be greater than zero");
        }
        let busy_retries = parse_var(&lookup, ENV_BUSY_RETRIES)?.unwrap_or(defaults.busy_retries);
        let retry_backoff_ms: u64 = parse_var(&lookup, ENV_RETRY_BACKOFF_MS)?
            .unwrap_or(defaults.retry_backoff.as_millis() as u64);

        let grn_prefix = match lookup(ENV_GRN_PREFIX) {
            Some(raw) => {
                let prefix = raw.trim().to_string();
                if prefix.is_empty() || !prefix.chars().all(|c| c.is_ascii_alphanumeric()) {
                    bail!("{ENV_GRN_PREFIX} must be a non-empty alphanumeric string, got {raw:?}");
                }
                prefix
            }
            None => defaults.grn_prefix,
        };

        Ok(Self {
            lock_timeout: Duration::from_millis(lock_timeout_ms),
            busy_retries,
            retry_backoff: Duration::from_millis(retry_backoff_ms),
            grn_prefix,
        })
    }
}

fn parse_var<T>(lookup: &impl Fn(&str) -> Option<String>, name: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    lookup(name)
        .map(|raw| {
            raw.trim()
                .parse::<T>()
                .with_context(|| format!("{name} has an invalid value {raw:?}"))
        })
        .transpose()
}
