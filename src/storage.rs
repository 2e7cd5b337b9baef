//! In-memory storage module with lazy expiration.
//!
//! Provides a thread-safe key-value store with:
//! - Optional per-entry expiration in milliseconds
//! - Lazy removal of expired entries on read
//! - A sweep for expired entries, driven by the server's cleanup task

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::{Duration, Instant};
use tracing::{info, trace};

/// A single stored value
#[derive(Debug, Clone)]
pub struct Entry {
    /// The stored value, never interpreted
    pub value: String,
    /// Absolute expiration time (None = never expires)
    pub expires_at: Option<Instant>,
}

impl Entry {
    /// Check if this entry has expired as of `now`
    pub fn is_expired_at(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|expires_at| now >= expires_at)
    }
}

/// Thread-safe in-memory key-value storage.
///
/// One lock guards the whole map: readers share it, every mutation
/// (including the delete of an expired entry) takes it exclusively.
pub struct Storage {
    data: RwLock<HashMap<String, Entry>>,
}

impl Storage {
    /// Create a new storage instance
    pub fn new() -> Arc<Self> {
        info!("Initializing storage");
        Arc::new(Self {
            data: RwLock::new(HashMap::new()),
        })
    }

    // Entries are always replaced whole, so a poisoned lock still guards a
    // consistent map.
    fn read(&self) -> RwLockReadGuard<'_, HashMap<String, Entry>> {
        self.data.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<String, Entry>> {
        self.data.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Calculate expiration time from a TTL in milliseconds
    fn calculate_expiry(ttl_millis: i64) -> Option<Instant> {
        if ttl_millis <= 0 {
            return None;
        }
        // A TTL too large to represent behaves like no TTL at all
        Instant::now().checked_add(Duration::from_millis(ttl_millis as u64))
    }

    /// Insert or overwrite `key`.
    ///
    /// A positive `ttl_millis` makes the entry expire that many milliseconds
    /// from now; zero or negative stores it without expiration. Any previous
    /// entry is replaced entirely, including its expiration.
    pub fn set(&self, key: &str, value: String, ttl_millis: i64) {
        let entry = Entry {
            value,
            expires_at: Self::calculate_expiry(ttl_millis),
        };

        self.write().insert(key.to_string(), entry);
        trace!(key, ttl_millis, "Entry stored");
    }

    /// Get the value stored under `key`, if present and not expired.
    ///
    /// An expired entry seen here is removed, but only if it has not been
    /// replaced or removed since it was observed.
    pub fn get(&self, key: &str) -> Option<String> {
        let observed = {
            let data = self.read();
            let entry = data.get(key)?;
            if !entry.is_expired_at(Instant::now()) {
                return Some(entry.value.clone());
            }
            entry.expires_at
        };

        trace!(key, "Entry expired on access");
        self.remove_if_expires_at(key, observed);
        None
    }

    /// Compare-and-delete: remove `key` only while its expiration still
    /// equals `expected`. Returns whether an entry was removed.
    fn remove_if_expires_at(&self, key: &str, expected: Option<Instant>) -> bool {
        let mut data = self.write();
        match data.get(key) {
            Some(entry) if entry.expires_at == expected => {
                data.remove(key);
                trace!(key, "Expired entry removed");
                true
            }
            _ => false,
        }
    }

    /// Remove all expired entries from storage
    pub fn cleanup_expired(&self) -> usize {
        let now = Instant::now();
        let mut data = self.write();
        let before = data.len();
        data.retain(|_, entry| !entry.is_expired_at(now));
        let count = before - data.len();

        if count > 0 {
            info!(count, "Cleaned up expired entries");
        }

        count
    }

    /// Get statistics about the storage
    pub fn stats(&self) -> StorageStats {
        StorageStats {
            item_count: self.read().len(),
        }
    }
}

/// Storage statistics
#[derive(Debug)]
pub struct StorageStats {
    /// Entries physically held, including expired ones not yet reaped
    pub item_count: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_get_nonexistent() {
        let storage = Storage::new();
        assert_eq!(storage.get("nonexistent"), None);
    }

    #[test]
    fn test_basic_set_get() {
        let storage = Storage::new();

        storage.set("key1", "value1".to_string(), 0);
        assert_eq!(storage.get("key1").as_deref(), Some("value1"));

        // Still there on the next read
        assert_eq!(storage.get("key1").as_deref(), Some("value1"));
    }

    #[test]
    fn test_set_overwrites_value() {
        let storage = Storage::new();

        storage.set("key1", "a".to_string(), 0);
        storage.set("key1", "b".to_string(), 0);

        assert_eq!(storage.get("key1").as_deref(), Some("b"));
        assert_eq!(storage.stats().item_count, 1);
    }

    #[test]
    fn test_set_without_ttl_clears_previous_expiration() {
        let storage = Storage::new();

        storage.set("key1", "a".to_string(), 20);
        storage.set("key1", "b".to_string(), 0);

        thread::sleep(Duration::from_millis(50));
        assert_eq!(storage.get("key1").as_deref(), Some("b"));
    }

    #[test]
    fn test_negative_ttl_never_expires() {
        let storage = Storage::new();

        storage.set("key1", "value1".to_string(), -5);

        thread::sleep(Duration::from_millis(20));
        assert_eq!(storage.get("key1").as_deref(), Some("value1"));
    }

    #[test]
    fn test_huge_ttl_does_not_panic() {
        let storage = Storage::new();

        storage.set("key1", "value1".to_string(), i64::MAX);
        assert_eq!(storage.get("key1").as_deref(), Some("value1"));
    }

    #[test]
    fn test_expiration() {
        let storage = Storage::new();

        storage.set("key1", "value1".to_string(), 100);

        // Should exist immediately
        assert_eq!(storage.get("key1").as_deref(), Some("value1"));

        // Wait for expiration
        thread::sleep(Duration::from_millis(150));

        // Should be expired now
        assert_eq!(storage.get("key1"), None);
    }

    #[test]
    fn test_expired_entry_removed_on_first_read() {
        let storage = Storage::new();

        storage.set("key1", "value1".to_string(), 10);
        thread::sleep(Duration::from_millis(30));

        // Still physically present until someone looks at it
        assert_eq!(storage.stats().item_count, 1);

        assert_eq!(storage.get("key1"), None);
        assert_eq!(storage.stats().item_count, 0);

        // Repeated reads stay absent
        assert_eq!(storage.get("key1"), None);
        assert_eq!(storage.get("key1"), None);
    }

    #[test]
    fn test_stale_observation_does_not_delete_newer_entry() {
        let storage = Storage::new();

        storage.set("key1", "old".to_string(), 10);
        let observed = storage.read().get("key1").and_then(|e| e.expires_at);
        thread::sleep(Duration::from_millis(30));

        // A concurrent writer replaced the entry after the observation
        storage.set("key1", "new".to_string(), 0);

        assert!(!storage.remove_if_expires_at("key1", observed));
        assert_eq!(storage.get("key1").as_deref(), Some("new"));
    }

    #[test]
    fn test_stale_observation_after_removal_is_noop() {
        let storage = Storage::new();

        storage.set("key1", "value1".to_string(), 10);
        let observed = storage.read().get("key1").and_then(|e| e.expires_at);
        thread::sleep(Duration::from_millis(30));

        assert!(storage.remove_if_expires_at("key1", observed));
        assert!(!storage.remove_if_expires_at("key1", observed));
    }

    #[test]
    fn test_cleanup_expired() {
        let storage = Storage::new();

        storage.set("short1", "v".to_string(), 10);
        storage.set("short2", "v".to_string(), 10);
        storage.set("long", "v".to_string(), 60_000);
        storage.set("forever", "v".to_string(), 0);

        thread::sleep(Duration::from_millis(30));

        assert_eq!(storage.cleanup_expired(), 2);
        assert_eq!(storage.stats().item_count, 2);
        assert_eq!(storage.get("long").as_deref(), Some("v"));
        assert_eq!(storage.get("forever").as_deref(), Some("v"));
    }

    #[test]
    fn test_concurrent_readers_and_writers() {
        let storage = Storage::new();

        let handles: Vec<_> = (0..8)
            .map(|t| {
                let storage = Arc::clone(&storage);
                thread::spawn(move || {
                    for i in 0..200 {
                        let key = format!("key{}", i % 10);
                        storage.set(&key, format!("{t}-{i}"), if i % 2 == 0 { 1 } else { 0 });
                        let _ = storage.get(&key);
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        assert!(storage.stats().item_count <= 10);
    }
}
