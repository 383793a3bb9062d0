//! Metrics registry for the query service
//!
//! - Counters are monotonic and reset only on process start
//! - Two gauges track live sessions and subscriptions
//! - Thread-safe but lock-free

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

use crate::realtime::WaitReason;

/// Metrics registry containing all operational counters
///
/// All counters use Relaxed ordering; readers only need eventually
/// consistent values.
#[derive(Debug, Default)]
pub struct MetricsRegistry {
    /// Queries that reached a store connection and succeeded
    queries_executed: AtomicU64,
    /// Queries the store rejected or timed out
    queries_failed: AtomicU64,
    /// Queries answered empty without a store round-trip
    queries_short_circuited: AtomicU64,
    /// Queries routed to the fast connection
    fast_queries: AtomicU64,
    /// Queries routed to the slow connection
    slow_queries: AtomicU64,
    cache_hits: AtomicU64,
    cache_misses: AtomicU64,
    /// Mass evictions of the classifier cache
    cache_evictions: AtomicU64,
    index_refreshes: AtomicU64,
    /// Documents announced on the change bus
    documents_ingested: AtomicU64,
    resolved_query: AtomicU64,
    resolved_listener: AtomicU64,
    resolved_timeout: AtomicU64,
    resolved_close: AtomicU64,
    /// Gauge: wait-for sessions currently racing
    active_wait_for: AtomicU64,
    /// Gauge: subscriptions currently registered
    active_subscriptions: AtomicU64,
}

impl MetricsRegistry {
    /// Create a new metrics registry with all counters at zero
    pub fn new() -> Self {
        Self::default()
    }

    // Query metrics

    pub fn increment_queries_executed(&self) {
        self.queries_executed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_queries_failed(&self) {
        self.queries_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_short_circuited(&self) {
        self.queries_short_circuited.fetch_add(1, Ordering::Relaxed);
    }

    /// Record which connection a query was routed to
    pub fn record_route(&self, fast: bool) {
        if fast {
            self.fast_queries.fetch_add(1, Ordering::Relaxed);
        } else {
            self.slow_queries.fetch_add(1, Ordering::Relaxed);
        }
    }

    // Classifier metrics

    pub fn increment_cache_hits(&self) {
        self.cache_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_cache_misses(&self) {
        self.cache_misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_cache_evictions(&self) {
        self.cache_evictions.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_index_refreshes(&self) {
        self.index_refreshes.fetch_add(1, Ordering::Relaxed);
    }

    // Ingest metrics

    pub fn increment_documents_ingested(&self) {
        self.documents_ingested.fetch_add(1, Ordering::Relaxed);
    }

    // Live-query metrics

    /// Record the reason a wait-for session latched
    pub fn record_resolution(&self, reason: WaitReason) {
        let counter = match reason {
            WaitReason::Query => &self.resolved_query,
            WaitReason::Listener => &self.resolved_listener,
            WaitReason::Timeout => &self.resolved_timeout,
            WaitReason::Close => &self.resolved_close,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn wait_for_started(&self) {
        self.active_wait_for.fetch_add(1, Ordering::Relaxed);
    }

    pub fn wait_for_finished(&self) {
        decrement(&self.active_wait_for);
    }

    pub fn subscription_started(&self) {
        self.active_subscriptions.fetch_add(1, Ordering::Relaxed);
    }

    pub fn subscription_stopped(&self) {
        decrement(&self.active_subscriptions);
    }

    /// Get all metrics as a snapshot
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            queries_executed: self.queries_executed.load(Ordering::Relaxed),
            queries_failed: self.queries_failed.load(Ordering::Relaxed),
            queries_short_circuited: self.queries_short_circuited.load(Ordering::Relaxed),
            fast_queries: self.fast_queries.load(Ordering::Relaxed),
            slow_queries: self.slow_queries.load(Ordering::Relaxed),
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            cache_misses: self.cache_misses.load(Ordering::Relaxed),
            cache_evictions: self.cache_evictions.load(Ordering::Relaxed),
            index_refreshes: self.index_refreshes.load(Ordering::Relaxed),
            documents_ingested: self.documents_ingested.load(Ordering::Relaxed),
            resolved_query: self.resolved_query.load(Ordering::Relaxed),
            resolved_listener: self.resolved_listener.load(Ordering::Relaxed),
            resolved_timeout: self.resolved_timeout.load(Ordering::Relaxed),
            resolved_close: self.resolved_close.load(Ordering::Relaxed),
            active_wait_for: self.active_wait_for.load(Ordering::Relaxed),
            active_subscriptions: self.active_subscriptions.load(Ordering::Relaxed),
        }
    }

    /// Current snapshot rendered as JSON
    pub fn to_json(&self) -> String {
        serde_json::to_string(&self.snapshot()).unwrap_or_else(|_| "{}".to_string())
    }
}

/// Saturating gauge decrement
fn decrement(gauge: &AtomicU64) {
    let _ = gauge.fetch_update(Ordering::Relaxed, Ordering::Relaxed, |v| v.checked_sub(1));
}

/// A point-in-time snapshot of all metrics
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub queries_executed: u64,
    pub queries_failed: u64,
    pub queries_short_circuited: u64,
    pub fast_queries: u64,
    pub slow_queries: u64,
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub cache_evictions: u64,
    pub index_refreshes: u64,
    pub documents_ingested: u64,
    pub resolved_query: u64,
    pub resolved_listener: u64,
    pub resolved_timeout: u64,
    pub resolved_close: u64,
    pub active_wait_for: u64,
    pub active_subscriptions: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_registry_is_zero() {
        let metrics = MetricsRegistry::new();
        assert_eq!(metrics.snapshot(), MetricsSnapshot::default());
    }

    #[test]
    fn test_route_and_resolution_counters() {
        let metrics = MetricsRegistry::new();
        metrics.record_route(true);
        metrics.record_route(false);
        metrics.record_route(false);
        metrics.record_resolution(WaitReason::Listener);
        metrics.record_resolution(WaitReason::Timeout);

        let snap = metrics.snapshot();
        assert_eq!(snap.fast_queries, 1);
        assert_eq!(snap.slow_queries, 2);
        assert_eq!(snap.resolved_listener, 1);
        assert_eq!(snap.resolved_timeout, 1);
        assert_eq!(snap.resolved_query, 0);
    }

    #[test]
    fn test_gauges_saturate_at_zero() {
        let metrics = MetricsRegistry::new();
        metrics.subscription_stopped();
        assert_eq!(metrics.snapshot().active_subscriptions, 0);

        metrics.wait_for_started();
        metrics.wait_for_started();
        metrics.wait_for_finished();
        assert_eq!(metrics.snapshot().active_wait_for, 1);
    }

    #[test]
    fn test_to_json() {
        let metrics = MetricsRegistry::new();
        metrics.increment_queries_failed();
        let json: serde_json::Value = serde_json::from_str(&metrics.to_json()).unwrap();
        assert_eq!(json["queries_failed"], 1);
    }

    #[test]
    fn test_concurrent_increments() {
        use std::sync::Arc;
        use std::thread;

        let metrics = Arc::new(MetricsRegistry::new());
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let m = Arc::clone(&metrics);
                thread::spawn(move || {
                    for _ in 0..100 {
                        m.increment_documents_ingested();
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(metrics.snapshot().documents_ingested, 400);
    }
}
