//! Per-organization locks serializing tenant lookup-and-create.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// Keyed async locks, one per organization name.
///
/// Entries are removed again once the last holder or waiter is gone, so the
/// map only grows with the number of organizations being resolved right now.
#[derive(Default)]
pub struct TenantLocks {
    locks: Arc<DashMap<String, Arc<Mutex<()>>>>,
}

impl TenantLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to `name`.
    pub async fn lock(&self, name: &str) -> TenantLockGuard {
        let mutex = self
            .locks
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        // Registered before waiting, so a cancelled waiter still cleans up.
        let entry = LockEntry {
            name: name.to_string(),
            locks: self.locks.clone(),
        };

        TenantLockGuard {
            _guard: mutex.lock_owned().await,
            _entry: entry,
        }
    }

    /// Number of names currently locked or awaited.
    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}

/// Held while one request resolves or creates a tenant.
pub struct TenantLockGuard {
    // Field order matters: the mutex guard releases its reference first.
    _guard: OwnedMutexGuard<()>,
    _entry: LockEntry,
}

/// Removes the map entry once nobody holds or awaits it any more.
struct LockEntry {
    name: String,
    locks: Arc<DashMap<String, Arc<Mutex<()>>>>,
}

impl Drop for LockEntry {
    fn drop(&mut self) {
        // Only the map's own reference left.
        self.locks
            .remove_if(&self.name, |_, mutex| Arc::strong_count(mutex) <= 1);
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[tokio::test]
    async fn test_same_name_is_exclusive() {
        let locks = Arc::new(TenantLocks::new());
        let guard = locks.lock("Acme U").await;

        let waiter = {
            let locks = locks.clone();
            tokio::spawn(async move {
                let _guard = locks.lock("Acme U").await;
            })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        drop(guard);
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
        assert!(locks.is_empty());
    }

    #[tokio::test]
    async fn test_different_names_do_not_block() {
        let locks = TenantLocks::new();
        let _acme = locks.lock("Acme U").await;

        let other = tokio::time::timeout(Duration::from_secs(1), locks.lock("New Org")).await;
        assert!(other.is_ok());
        assert_eq!(locks.len(), 2);
    }

    #[tokio::test]
    async fn test_entry_removed_after_release() {
        let locks = TenantLocks::new();
        {
            let _guard = locks.lock("Acme U").await;
            assert_eq!(locks.len(), 1);
        }
        assert!(locks.is_empty());
    }

    #[tokio::test]
    async fn test_cancelled_waiter_does_not_leak_entry() {
        let locks = TenantLocks::new();
        let guard = locks.lock("Acme U").await;

        let waited = tokio::time::timeout(Duration::from_millis(10), locks.lock("Acme U")).await;
        assert!(waited.is_err());
        assert_eq!(locks.len(), 1);

        drop(guard);
        assert!(locks.is_empty());
    }

    #[tokio::test]
    async fn test_entry_kept_while_waiter_pending() {
        let locks = Arc::new(TenantLocks::new());
        let guard = locks.lock("Acme U").await;

        let waiter = {
            let locks = locks.clone();
            tokio::spawn(async move {
                let _guard = locks.lock("Acme U").await;
                locks.len()
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;

        drop(guard);
        assert_eq!(locks.len(), 1);
        let held_len = tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(held_len, 1);
        assert!(locks.is_empty());
    }
}
