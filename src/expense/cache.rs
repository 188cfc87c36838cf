use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use crate::date_util::YearMonth;

pub const DEFAULT_CAPACITY: usize = 1024;
pub const DEFAULT_TTL_SECS: u64 = 600;

/// Remembers `(store, month)` pairs known to have no baseline so repeat
/// lookups skip the database. Bounded and short-lived; cloning shares state.
#[derive(Clone)]
pub struct BaselineCache {
    entries: Arc<RwLock<HashMap<(String, YearMonth), Instant>>>,
    ttl: Duration,
    capacity: usize,
}

impl Default for BaselineCache {
    fn default() -> Self {
        Self::new(Duration::from_secs(DEFAULT_TTL_SECS), DEFAULT_CAPACITY)
    }
}

impl BaselineCache {
    pub fn new(ttl: Duration, capacity: usize) -> Self {
        Self {
            entries: Arc::new(RwLock::new(HashMap::new())),
            ttl,
            capacity: capacity.max(1),
        }
    }

    /// True if a live "absent" entry exists for the key.
    pub fn is_known_absent(&self, store_id: &str, month: YearMonth) -> bool {
        let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
        entries
            .get(&(store_id.to_string(), month))
            .is_some_and(|expires_at| *expires_at > Instant::now())
    }

    pub fn mark_absent(&self, store_id: &str, month: YearMonth) {
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        let now = Instant::now();
        if entries.len() >= self.capacity {
            entries.retain(|_, expires_at| *expires_at > now);
        }
        if entries.len() >= self.capacity {
            // Still full of live entries: drop the one closest to expiry.
            if let Some(oldest) = entries
                .iter()
                .min_by_key(|(_, expires_at)| **expires_at)
                .map(|(k, _)| k.clone())
            {
                entries.remove(&oldest);
            }
        }
        entries.insert((store_id.to_string(), month), now + self.ttl);
    }

    /// Forget a key, e.g. after a baseline is written for it.
    pub fn invalidate(&self, store_id: &str, month: YearMonth) {
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        entries.remove(&(store_id.to_string(), month));
    }

    pub fn clear(&self) {
        self.entries
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .clear();
    }

    pub fn len(&self) -> usize {
        self.entries.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ym(m: u32) -> YearMonth {
        YearMonth::new(2025, m).unwrap()
    }

    #[test]
    fn test_mark_and_lookup() {
        let cache = BaselineCache::default();
        assert!(!cache.is_known_absent("s1", ym(1)));
        cache.mark_absent("s1", ym(1));
        assert!(cache.is_known_absent("s1", ym(1)));
        assert!(!cache.is_known_absent("s1", ym(2)));
        assert!(!cache.is_known_absent("s2", ym(1)));
    }

    #[test]
    fn test_clones_share_entries() {
        let cache = BaselineCache::default();
        let other = cache.clone();
        other.mark_absent("s1", ym(3));
        assert!(cache.is_known_absent("s1", ym(3)));
        cache.invalidate("s1", ym(3));
        assert!(!other.is_known_absent("s1", ym(3)));
    }

    #[test]
    fn test_expired_entries_are_ignored() {
        let cache = BaselineCache::new(Duration::ZERO, 8);
        cache.mark_absent("s1", ym(1));
        assert!(!cache.is_known_absent("s1", ym(1)));
    }

    #[test]
    fn test_capacity_is_bounded() {
        let cache = BaselineCache::new(Duration::from_secs(60), 3);
        for m in 1..=6 {
            cache.mark_absent("s1", ym(m));
        }
        assert_eq!(cache.len(), 3);
        assert!(cache.is_known_absent("s1", ym(6)));
        cache.clear();
        assert!(cache.is_empty());
    }
}
