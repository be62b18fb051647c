#![forbid(unsafe_code)]

use super::StoreError;
use std::collections::HashMap;
use std::sync::{Condvar, Mutex, PoisonError};
use std::time::{Duration, Instant};
use tracing::trace;

/// Advisory lock address: an application namespace plus a key within it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct LockKey {
    pub namespace: i64,
    pub key: i64,
}

impl LockKey {
    pub fn new(namespace: i64, key: i64) -> Self {
        Self { namespace, key }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LockMode {
    Shared,
    Exclusive,
}

/// Capability to take blocking advisory locks.
///
/// Implementations must release the lock when the returned guard drops.
pub trait LockManager: Send + Sync {
    fn acquire(
        &self,
        key: LockKey,
        mode: LockMode,
        wait: Duration,
    ) -> Result<LockGuard<'_>, StoreError>;
}

pub struct LockGuard<'a> {
    key: LockKey,
    mode: LockMode,
    release: Option<Box<dyn FnOnce() + Send + 'a>>,
}

impl<'a> LockGuard<'a> {
    pub fn new(key: LockKey, mode: LockMode, release: impl FnOnce() + Send + 'a) -> Self {
        Self {
            key,
            mode,
            release: Some(Box::new(release)),
        }
    }

    pub fn key(&self) -> LockKey {
        self.key
    }

    pub fn mode(&self) -> LockMode {
        self.mode
    }
}

impl Drop for LockGuard<'_> {
    fn drop(&mut self) {
        if let Some(release) = self.release.take() {
            release();
        }
    }
}

impl std::fmt::Debug for LockGuard<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LockGuard")
            .field("key", &self.key)
            .field("mode", &self.mode)
            .finish()
    }
}

#[derive(Clone, Copy, Debug, Default)]
struct Holders {
    exclusive: bool,
    shared: usize,
}

impl Holders {
    fn admits(&self, mode: LockMode) -> bool {
        match mode {
            LockMode::Shared => !self.exclusive,
            LockMode::Exclusive => !self.exclusive && self.shared == 0,
        }
    }

    fn is_free(&self) -> bool {
        !self.exclusive && self.shared == 0
    }
}

/// Reader/writer lock table living in this process.
///
/// Share one instance (via `Arc`) between every store that should exclude each other.
#[derive(Debug, Default)]
pub struct LocalLockManager {
    table: Mutex<HashMap<LockKey, Holders>>,
    released: Condvar,
}

impl LocalLockManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of keys currently held in any mode.
    pub fn held_count(&self) -> usize {
        self.table
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    fn release(&self, key: LockKey, mode: LockMode) {
        let mut table = self.table.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(holders) = table.get_mut(&key) {
            match mode {
                LockMode::Exclusive => holders.exclusive = false,
                LockMode::Shared => holders.shared = holders.shared.saturating_sub(1),
            }
            if holders.is_free() {
                table.remove(&key);
            }
        }
        drop(table);
        trace!(namespace = key.namespace, key = key.key, ?mode, "tree lock released");
        self.released.notify_all();
    }
}

impl LockManager for LocalLockManager {
    fn acquire(
        &self,
        key: LockKey,
        mode: LockMode,
        wait: Duration,
    ) -> Result<LockGuard<'_>, StoreError> {
        let deadline = Instant::now() + wait;
        let mut table = self.table.lock().unwrap_or_else(PoisonError::into_inner);
        loop {
            let holders = table.entry(key).or_default();
            if holders.admits(mode) {
                match mode {
                    LockMode::Exclusive => holders.exclusive = true,
                    LockMode::Shared => holders.shared += 1,
                }
                break;
            }
            if holders.is_free() {
                table.remove(&key);
            }
            let now = Instant::now();
            if now >= deadline {
                return Err(StoreError::LockTimeout {
                    namespace: key.namespace,
                    key: key.key,
                });
            }
            table = self
                .released
                .wait_timeout(table, deadline - now)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
        drop(table);
        trace!(namespace = key.namespace, key = key.key, ?mode, "tree lock acquired");
        Ok(LockGuard::new(key, mode, move || self.release(key, mode)))
    }
}
