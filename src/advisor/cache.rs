//! Filter-result cache used when saving filtered views as reports.

use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use lru::LruCache;

use crate::advisor::Advisor;
use crate::advisor::filter::FilterKey;

/// LRU of full result sets keyed by [`FilterKey`].
///
/// Every invalidation bumps an epoch. A fetch records the epoch before it
/// starts and inserts with [`FilterCache::insert_if_current`], so results
/// computed against data that changed mid-flight are dropped.
pub struct FilterCache {
    entries: Mutex<LruCache<FilterKey, Arc<Vec<Advisor>>>>,
    epoch: AtomicU64,
}

impl FilterCache {
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: Mutex::new(LruCache::new(capacity)),
            epoch: AtomicU64::new(0),
        }
    }

    pub fn epoch(&self) -> u64 {
        self.epoch.load(Ordering::Acquire)
    }

    pub fn get(&self, key: &FilterKey) -> Option<Arc<Vec<Advisor>>> {
        match self.entries.lock() {
            Ok(mut entries) => entries.get(key).cloned(),
            Err(e) => {
                tracing::warn!("Filter cache lock poisoned: {}", e);
                None
            }
        }
    }

    /// Insert unless the cache was invalidated after `epoch` was read.
    /// Returns whether the entry was stored.
    pub fn insert_if_current(&self, epoch: u64, key: FilterKey, rows: Arc<Vec<Advisor>>) -> bool {
        let Ok(mut entries) = self.entries.lock() else {
            return false;
        };
        // Checked under the lock so a concurrent clear() cannot slip between.
        if self.epoch.load(Ordering::Acquire) != epoch {
            return false;
        }
        entries.put(key, rows);
        true
    }

    pub fn invalidate(&self, key: &FilterKey) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.pop(key);
        }
    }

    /// Drop every entry. Called after any advisor write.
    pub fn clear(&self) {
        if let Ok(mut entries) = self.entries.lock() {
            self.epoch.fetch_add(1, Ordering::AcqRel);
            entries.clear();
        }
    }

    pub fn len(&self) -> usize {
        self.entries.lock().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::advisor::filter::FilterState;
    use crate::advisor::sample_advisor;

    fn rows(n: usize) -> Arc<Vec<Advisor>> {
        Arc::new(
            (0..n)
                .map(|i| sample_advisor("A", &format!("Row{i}"), None))
                .collect(),
        )
    }

    #[test]
    fn stale_insert_after_clear_is_dropped() {
        let cache = FilterCache::new(4);
        let key = FilterState::default().key();

        let epoch = cache.epoch();
        cache.clear();
        assert!(!cache.insert_if_current(epoch, key.clone(), rows(2)));
        assert!(cache.get(&key).is_none());

        let epoch = cache.epoch();
        assert!(cache.insert_if_current(epoch, key.clone(), rows(2)));
        assert_eq!(cache.get(&key).map(|r| r.len()), Some(2));
    }

    #[test]
    fn least_recently_used_entry_is_evicted() {
        let cache = FilterCache::new(2);
        let key_for = |search: &str| {
            FilterState {
                search: search.to_string(),
                ..Default::default()
            }
            .key()
        };
        let epoch = cache.epoch();
        cache.insert_if_current(epoch, key_for("a"), rows(1));
        cache.insert_if_current(epoch, key_for("b"), rows(1));
        assert!(cache.get(&key_for("a")).is_some());
        cache.insert_if_current(epoch, key_for("c"), rows(1));

        assert!(cache.get(&key_for("a")).is_some());
        assert!(cache.get(&key_for("b")).is_none());
        assert_eq!(cache.len(), 2);

        cache.invalidate(&key_for("a"));
        assert!(cache.get(&key_for("a")).is_none());
    }
}
