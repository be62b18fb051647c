#![forbid(unsafe_code)]

use super::StoreError;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Advisory-lock namespace for tree locks ("tree" in ASCII).
pub const TREE_LOCK_NAMESPACE: i64 = 0x7472_6565;

pub const DEFAULT_BATCH_SIZE: usize = 100;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Subtrees narrower than this interval width are copied in one bulk insert.
    pub batch_size: usize,
    pub busy_timeout_ms: u64,
    pub lock_wait_timeout_ms: u64,
    pub lock_namespace: i64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            busy_timeout_ms: 5_000,
            lock_wait_timeout_ms: 30_000,
            lock_namespace: TREE_LOCK_NAMESPACE,
        }
    }
}

impl EngineConfig {
    pub fn from_json_str(raw: &str) -> Result<Self, StoreError> {
        let config: Self = serde_json::from_str(raw)?;
        config.validate()
    }

    pub fn from_env() -> Result<Self, StoreError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from `CT_*` variables resolved through `lookup`; unset keys keep defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, StoreError> {
        let mut config = Self::default();
        if let Some(raw) = lookup("CT_BATCH_SIZE") {
            config.batch_size = raw
                .trim()
                .parse()
                .map_err(|_| StoreError::InvalidInput("CT_BATCH_SIZE must be a positive integer"))?;
        }
        if let Some(raw) = lookup("CT_BUSY_TIMEOUT_MS") {
            config.busy_timeout_ms = raw
                .trim()
                .parse()
                .map_err(|_| StoreError::InvalidInput("CT_BUSY_TIMEOUT_MS must be an integer"))?;
        }
        if let Some(raw) = lookup("CT_LOCK_WAIT_TIMEOUT_MS") {
            config.lock_wait_timeout_ms = raw.trim().parse().map_err(|_| {
                StoreError::InvalidInput("CT_LOCK_WAIT_TIMEOUT_MS must be an integer")
            })?;
        }
        config.validate()
    }

    fn validate(self) -> Result<Self, StoreError> {
        if self.batch_size == 0 {
            return Err(StoreError::InvalidInput("batch_size must be at least 1"));
        }
        Ok(self)
    }

    pub fn busy_timeout(&self) -> Duration {
        Duration::from_millis(self.busy_timeout_ms)
    }

    pub fn lock_wait_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_wait_timeout_ms)
    }
}
