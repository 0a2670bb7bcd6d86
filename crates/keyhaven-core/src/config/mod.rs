//! Keyhaven configuration
//!
//! Configuration is layered: compiled defaults, then an optional TOML file, then
//! `KEYHAVEN_<SECTION>_<KEY>` environment overrides. [`KeyhavenConfig::validate`] runs
//! after every layer has been applied.
//!
//! ```toml
//! [recovery]
//! shamir_session_ttl_ms = 86400000
//! min_recovery_delay_ms = 3600000
//!
//! [storage]
//! min_replicas = 3
//! max_replicas = 10
//! ```

use crate::errors::{KeyhavenError, KeyhavenResult};
use crate::{DAY_MS, HOUR_MS};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Environment variable prefix for overrides
pub const ENV_PREFIX: &str = "KEYHAVEN_";

/// Settings for the recovery session state machines
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecoverySettings {
    /// Lifetime of a Shamir recovery session
    pub shamir_session_ttl_ms: u64,
    /// Lower bound for a vault's social recovery delay
    pub min_recovery_delay_ms: u64,
}

impl Default for RecoverySettings {
    fn default() -> Self {
        Self {
            shamir_session_ttl_ms: DAY_MS,
            min_recovery_delay_ms: HOUR_MS,
        }
    }
}

/// Settings for the storage distribution coordinator
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageSettings {
    /// Minimum live replicas for a distribution to succeed
    pub min_replicas: usize,
    /// Maximum assignments in one distribution
    pub max_replicas: usize,
    /// Deals ending within this window are renewal candidates
    pub renewal_window_ms: u64,
    /// How far a renewal extends a deal
    pub renewal_extension_ms: u64,
    /// Budget for a single provider upload or renewal
    pub upload_timeout_ms: u64,
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            min_replicas: 3,
            max_replicas: 10,
            renewal_window_ms: 7 * DAY_MS,
            renewal_extension_ms: 180 * DAY_MS,
            upload_timeout_ms: 30_000,
        }
    }
}

/// Top-level configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct KeyhavenConfig {
    /// `[recovery]` section
    pub recovery: RecoverySettings,
    /// `[storage]` section
    pub storage: StorageSettings,
}

impl KeyhavenConfig {
    /// Parse from TOML text; missing keys take their defaults
    pub fn from_toml_str(text: &str) -> KeyhavenResult<Self> {
        Ok(toml::from_str(text)?)
    }

    /// Load from a TOML file
    pub fn load_from_file(path: &Path) -> KeyhavenResult<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            KeyhavenError::config(format!("Failed to read {}: {e}", path.display()))
        })?;
        Self::from_toml_str(&text)
    }

    /// Apply `KEYHAVEN_<SECTION>_<KEY>` overrides from the process environment
    pub fn merge_with_env(&mut self) -> KeyhavenResult<()> {
        self.merge_with_vars(std::env::vars())
    }

    /// Apply overrides from `(name, value)` pairs; names without the prefix are ignored
    pub fn merge_with_vars<I, K, V>(&mut self, vars: I) -> KeyhavenResult<()>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        for (name, value) in vars {
            if let Some(rest) = name.as_ref().strip_prefix(ENV_PREFIX) {
                let rest = rest.to_lowercase();
                if let Some((section, key)) = rest.split_once('_') {
                    self.set_from_string(&format!("{section}.{key}"), value.as_ref())?;
                    tracing::debug!(section, key, "configuration override from environment");
                }
            }
        }
        Ok(())
    }

    /// Set one value by dotted key, e.g. `storage.min_replicas`
    pub fn set_from_string(&mut self, key: &str, value: &str) -> KeyhavenResult<()> {
        fn parse<T: std::str::FromStr>(key: &str, value: &str) -> KeyhavenResult<T> {
            value
                .trim()
                .parse()
                .map_err(|_| KeyhavenError::config(format!("{key}: invalid value {value:?}")))
        }

        match key {
            "recovery.shamir_session_ttl_ms" => {
                self.recovery.shamir_session_ttl_ms = parse(key, value)?;
            }
            "recovery.min_recovery_delay_ms" => {
                self.recovery.min_recovery_delay_ms = parse(key, value)?;
            }
            "storage.min_replicas" => self.storage.min_replicas = parse(key, value)?,
            "storage.max_replicas" => self.storage.max_replicas = parse(key, value)?,
            "storage.renewal_window_ms" => self.storage.renewal_window_ms = parse(key, value)?,
            "storage.renewal_extension_ms" => {
                self.storage.renewal_extension_ms = parse(key, value)?;
            }
            "storage.upload_timeout_ms" => self.storage.upload_timeout_ms = parse(key, value)?,
            other => return Err(KeyhavenError::config(format!("unknown key {other}"))),
        }
        Ok(())
    }

    /// Reject configurations the services cannot run with
    pub fn validate(&self) -> KeyhavenResult<()> {
        if self.recovery.shamir_session_ttl_ms == 0 {
            return Err(KeyhavenError::config(
                "recovery.shamir_session_ttl_ms must be positive",
            ));
        }
        if self.recovery.min_recovery_delay_ms < HOUR_MS {
            return Err(KeyhavenError::config(
                "recovery.min_recovery_delay_ms must be at least one hour",
            ));
        }
        if self.storage.min_replicas == 0 {
            return Err(KeyhavenError::config("storage.min_replicas must be positive"));
        }
        if self.storage.min_replicas > self.storage.max_replicas {
            return Err(KeyhavenError::config(format!(
                "storage.min_replicas ({}) exceeds storage.max_replicas ({})",
                self.storage.min_replicas, self.storage.max_replicas
            )));
        }
        if self.storage.upload_timeout_ms == 0 || self.storage.renewal_extension_ms == 0 {
            return Err(KeyhavenError::config(
                "storage timeouts and renewal extension must be positive",
            ));
        }
        Ok(())
    }
}
