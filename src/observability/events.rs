//! Observable lifecycle events
//!
//! Every structured log line carries one of these names in its `event`
//! field so that log consumers can match on a closed vocabulary.

use std::fmt;

/// Observable events of the query service
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    // Start-up
    /// Schema table built
    SchemaLoaded,
    /// Configuration loaded
    ConfigLoaded,

    // Query processing
    /// Filter compiled into a query program
    QueryCompiled,
    /// Query sent to a store connection
    QueryExecuted,
    /// Store rejected a query
    QueryFailed,
    /// Filter compiled to `false`, no store round-trip
    QueryShortCircuited,

    // Fast/slow classification
    /// Verdict served from the cache
    ClassifierCacheHit,
    /// Verdict computed by the detector
    ClassifierCacheMiss,
    /// Index set changed, every cached verdict dropped
    ClassifierCacheEvicted,
    /// Index metadata re-read from the store
    IndexInfoRefreshed,

    // Live queries
    /// Wait-for session started racing
    WaitForStarted,
    /// Wait-for session latched a reason
    WaitForResolved,
    /// Subscription registered
    SubscriptionStarted,
    /// Subscription deregistered
    SubscriptionStopped,

    // Ingest
    /// Document announced on the change bus
    DocumentIngested,
}

impl Event {
    /// Returns the canonical event name
    pub fn as_str(&self) -> &'static str {
        match self {
            Event::SchemaLoaded => "SCHEMA_LOADED",
            Event::ConfigLoaded => "CONFIG_LOADED",
            Event::QueryCompiled => "QUERY_COMPILED",
            Event::QueryExecuted => "QUERY_EXECUTED",
            Event::QueryFailed => "QUERY_FAILED",
            Event::QueryShortCircuited => "QUERY_SHORT_CIRCUITED",
            Event::ClassifierCacheHit => "CLASSIFIER_CACHE_HIT",
            Event::ClassifierCacheMiss => "CLASSIFIER_CACHE_MISS",
            Event::ClassifierCacheEvicted => "CLASSIFIER_CACHE_EVICTED",
            Event::IndexInfoRefreshed => "INDEX_INFO_REFRESHED",
            Event::WaitForStarted => "WAIT_FOR_STARTED",
            Event::WaitForResolved => "WAIT_FOR_RESOLVED",
            Event::SubscriptionStarted => "SUBSCRIPTION_STARTED",
            Event::SubscriptionStopped => "SUBSCRIPTION_STOPPED",
            Event::DocumentIngested => "DOCUMENT_INGESTED",
        }
    }

    /// Whether this event reports a failure
    pub fn is_failure(&self) -> bool {
        matches!(self, Event::QueryFailed)
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
