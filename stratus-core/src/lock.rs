//! Named lock registry
//!
//! Serializes read-modify-write sequences against a shared parent resource
//! (e.g. the list of security groups embedded in a network interface).
//! A registry is owned by a provider instance; mutexes are created lazily
//! per key and live as long as the registry.

use std::fmt;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// Lock key: the parent resource's type and name
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LockKey {
    pub resource_type: String,
    pub name: String,
}

impl LockKey {
    pub fn new(resource_type: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            resource_type: resource_type.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for LockKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.resource_type, self.name)
    }
}

#[derive(Debug, Clone, Default)]
pub struct NamedLocks {
    locks: Arc<DashMap<LockKey, Arc<Mutex<()>>>>,
}

impl NamedLocks {
    pub fn new() -> Self {
        Self::default()
    }

    fn mutex_for(&self, key: &LockKey) -> Arc<Mutex<()>> {
        // Clone out so the shard guard is released before awaiting
        self.locks
            .entry(key.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Wait until `key` is free and hold it until the guard is dropped
    pub async fn acquire(&self, key: LockKey) -> NamedLockGuard {
        log::debug!("Acquiring lock {}", key);
        let guard = self.mutex_for(&key).lock_owned().await;
        log::debug!("Acquired lock {}", key);
        NamedLockGuard { key, _guard: guard }
    }

    /// Take the lock only if nobody holds it
    pub fn try_acquire(&self, key: LockKey) -> Option<NamedLockGuard> {
        let guard = self.mutex_for(&key).try_lock_owned().ok()?;
        Some(NamedLockGuard { key, _guard: guard })
    }

    /// Number of keys ever locked through this registry
    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}

/// Held lock; released on drop, including early returns and cancellation
pub struct NamedLockGuard {
    key: LockKey,
    _guard: OwnedMutexGuard<()>,
}

impl NamedLockGuard {
    pub fn key(&self) -> &LockKey {
        &self.key
    }

    pub fn release(self) {
        drop(self);
    }
}

impl Drop for NamedLockGuard {
    fn drop(&mut self) {
        log::debug!("Released lock {}", self.key);
    }
}

impl fmt::Debug for NamedLockGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NamedLockGuard").field("key", &self.key).finish()
    }
}
