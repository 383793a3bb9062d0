//! Fast/slow verdict cache
//!
//! Verdicts are keyed by query text plus the canonical sort rendering. The
//! cache also remembers the index set it was computed against; when a
//! refresh observes a different set (compared unordered), every verdict is
//! dropped at once.

use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

use crate::store::IndexInfo;

/// Cache key: query text and optional sort rendering
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub text: String,
    pub sort: Option<String>,
}

impl CacheKey {
    pub fn new(text: impl Into<String>, sort: Option<&str>) -> Self {
        Self {
            text: text.into(),
            sort: sort.map(str::to_string),
        }
    }
}

#[derive(Debug, Default)]
struct CacheState {
    verdicts: HashMap<CacheKey, bool>,
    indexes: Vec<IndexInfo>,
    refreshed_at: Option<Instant>,
}

/// Per-collection verdict cache
#[derive(Debug)]
pub struct FastQueryCache {
    state: Mutex<CacheState>,
    refresh_interval: Duration,
}

impl FastQueryCache {
    pub fn new(refresh_interval: Duration) -> Self {
        Self {
            state: Mutex::new(CacheState::default()),
            refresh_interval,
        }
    }

    fn state(&self) -> MutexGuard<'_, CacheState> {
        // Every operation leaves the state consistent, so a poisoned lock
        // is still usable.
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn lookup(&self, key: &CacheKey) -> Option<bool> {
        self.state().verdicts.get(key).copied()
    }

    pub fn insert(&self, key: CacheKey, fast: bool) {
        self.state().verdicts.insert(key, fast);
    }

    /// Whether index metadata is older than the refresh interval.
    pub fn needs_refresh(&self, now: Instant) -> bool {
        match self.state().refreshed_at {
            None => true,
            Some(at) => now.saturating_duration_since(at) >= self.refresh_interval,
        }
    }

    /// Records a freshly read index list. Returns `true` when the set
    /// differs from the known one, in which case all verdicts are evicted.
    pub fn apply_indexes(&self, indexes: Vec<IndexInfo>, now: Instant) -> bool {
        let mut state = self.state();
        state.refreshed_at = Some(now);
        if signatures(&state.indexes) == signatures(&indexes) {
            return false;
        }
        state.indexes = indexes;
        state.verdicts.clear();
        true
    }

    /// Last known index list
    pub fn indexes(&self) -> Vec<IndexInfo> {
        self.state().indexes.clone()
    }

    pub fn len(&self) -> usize {
        self.state().verdicts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn signatures(indexes: &[IndexInfo]) -> HashSet<String> {
    indexes.iter().map(IndexInfo::signature).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cache_with_entries() -> FastQueryCache {
        let cache = FastQueryCache::new(Duration::from_secs(60));
        cache.apply_indexes(
            vec![IndexInfo::new(["acc_type"]), IndexInfo::new(["balance"])],
            Instant::now(),
        );
        cache.insert(CacheKey::new("q1", None), true);
        cache.insert(CacheKey::new("q1", Some("doc.balance ASC")), false);
        cache
    }

    #[test]
    fn test_sort_is_part_of_key() {
        let cache = cache_with_entries();
        assert_eq!(cache.lookup(&CacheKey::new("q1", None)), Some(true));
        assert_eq!(
            cache.lookup(&CacheKey::new("q1", Some("doc.balance ASC"))),
            Some(false)
        );
        assert_eq!(cache.lookup(&CacheKey::new("q2", None)), None);
    }

    #[test]
    fn test_reorder_does_not_evict() {
        let cache = cache_with_entries();
        let changed = cache.apply_indexes(
            vec![IndexInfo::new(["balance"]), IndexInfo::new(["acc_type"])],
            Instant::now(),
        );
        assert!(!changed);
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn test_changed_set_evicts_everything() {
        let cache = cache_with_entries();
        assert!(cache.apply_indexes(vec![IndexInfo::new(["acc_type"])], Instant::now()));
        assert!(cache.is_empty());
        assert_eq!(cache.indexes(), vec![IndexInfo::new(["acc_type"])]);

        let cache = cache_with_entries();
        assert!(cache.apply_indexes(
            vec![IndexInfo::new(["balance", "acc_type"])],
            Instant::now()
        ));
        assert!(cache.is_empty());
    }

    #[test]
    fn test_refresh_interval() {
        let cache = FastQueryCache::new(Duration::from_secs(60));
        let start = Instant::now();
        assert!(cache.needs_refresh(start));
        cache.apply_indexes(Vec::new(), start);
        assert!(!cache.needs_refresh(start + Duration::from_secs(59)));
        assert!(cache.needs_refresh(start + Duration::from_secs(60)));
    }
}
