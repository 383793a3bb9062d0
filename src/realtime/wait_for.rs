//! # Wait-for sessions
//!
//! A session races four arms and resolves exactly once:
//!
//! | arm      | latches    | with                         |
//! |----------|------------|------------------------------|
//! | poll     | `query`    | rows of the first non-empty poll |
//! | listener | `listener` | the first matching announced document |
//! | timeout  | `timeout`  | nothing                      |
//! | close    | `close`    | nothing                      |
//!
//! A store failure on the poll arm latches the error instead. Whatever
//! wins, every arm is stopped and the change-bus listener is dropped before
//! `run` returns. A zero timeout polls once and returns.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use tokio::task::JoinSet;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};

use crate::query::{QueryError, QueryResult};

use super::bus::{BusListener, ChangeBus};
use super::latch::ResolutionLatch;

const DEFAULT_RETRY_DELAY: Duration = Duration::from_millis(5000);

/// Why a session resolved
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum WaitReason {
    Query,
    Listener,
    Timeout,
    Close,
}

impl WaitReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            WaitReason::Query => "query",
            WaitReason::Listener => "listener",
            WaitReason::Timeout => "timeout",
            WaitReason::Close => "close",
        }
    }
}

impl fmt::Display for WaitReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WaitOutcome {
    pub reason: WaitReason,
    pub rows: Vec<Value>,
}

impl WaitOutcome {
    pub fn new(reason: WaitReason, rows: Vec<Value>) -> Self {
        Self { reason, rows }
    }

    pub fn empty(reason: WaitReason) -> Self {
        Self::new(reason, Vec::new())
    }
}

/// Executes the compiled query once
#[async_trait]
pub trait PollSource: Send + Sync {
    async fn poll(&self) -> QueryResult<Vec<Value>>;
}

/// Turns an announced document into a result row, or `None` when the
/// caller may not see it or it does not match
pub trait LiveMatcher: Send + Sync {
    fn evaluate(&self, doc: &Value) -> QueryResult<Option<Value>>;
}

type Latch = Arc<ResolutionLatch<QueryResult<WaitOutcome>>>;

/// One wait-for session
pub struct WaitFor {
    poll: Arc<dyn PollSource>,
    matcher: Arc<dyn LiveMatcher>,
    bus: ChangeBus,
    retry_delay: Duration,
    timeout: Duration,
    close: CancellationToken,
    operation_id: String,
}

impl WaitFor {
    pub fn new(poll: Arc<dyn PollSource>, matcher: Arc<dyn LiveMatcher>, bus: ChangeBus) -> Self {
        Self {
            poll,
            matcher,
            bus,
            retry_delay: DEFAULT_RETRY_DELAY,
            timeout: Duration::ZERO,
            close: CancellationToken::new(),
            operation_id: String::new(),
        }
    }

    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Request cancellation signal driving the close arm
    pub fn with_close(mut self, close: CancellationToken) -> Self {
        self.close = close;
        self
    }

    pub fn with_operation_id(mut self, operation_id: impl Into<String>) -> Self {
        self.operation_id = operation_id.into();
        self
    }

    #[instrument(name = "wait_for", skip_all, fields(operation_id = %self.operation_id, timeout_ms = self.timeout.as_millis() as u64))]
    pub async fn run(self) -> QueryResult<WaitOutcome> {
        if self.timeout.is_zero() {
            let rows = self.poll.poll().await?;
            return Ok(WaitOutcome::new(WaitReason::Query, rows));
        }

        let latch: Latch = Arc::new(ResolutionLatch::new());
        let listener = self.bus.listen();
        let mut arms = JoinSet::new();
        arms.spawn(poll_arm(Arc::clone(&latch), self.poll, self.retry_delay));
        arms.spawn(listener_arm(Arc::clone(&latch), listener, self.matcher));
        arms.spawn(timeout_arm(Arc::clone(&latch), self.timeout));
        arms.spawn(close_arm(Arc::clone(&latch), self.close));

        latch.cancelled().await;
        arms.shutdown().await;

        let outcome = latch
            .take()
            .unwrap_or_else(|| Err(QueryError::Internal("Wait-for latch set without a value".into())));
        if let Ok(outcome) = &outcome {
            debug!(reason = %outcome.reason, rows = outcome.rows.len(), "wait-for latched");
        }
        outcome
    }
}

async fn poll_arm(latch: Latch, poll: Arc<dyn PollSource>, retry_delay: Duration) {
    loop {
        let attempt = tokio::select! {
            _ = latch.cancelled() => return,
            attempt = poll.poll() => attempt,
        };
        match attempt {
            Ok(rows) if !rows.is_empty() => {
                latch.try_set(Ok(WaitOutcome::new(WaitReason::Query, rows)));
                return;
            }
            Ok(_) => {}
            Err(e) => {
                latch.try_set(Err(e));
                return;
            }
        }
        tokio::select! {
            _ = latch.cancelled() => return,
            _ = sleep(retry_delay) => {}
        }
    }
}

async fn listener_arm(latch: Latch, mut listener: BusListener, matcher: Arc<dyn LiveMatcher>) {
    loop {
        let doc = tokio::select! {
            _ = latch.cancelled() => return,
            doc = listener.recv() => doc,
        };
        let Some(doc) = doc else {
            return;
        };
        match matcher.evaluate(&doc) {
            Ok(Some(row)) => {
                latch.try_set(Ok(WaitOutcome::new(WaitReason::Listener, vec![row])));
                return;
            }
            Ok(None) => {}
            Err(e) => warn!(error = %e, "announced document could not be evaluated"),
        }
    }
}

async fn timeout_arm(latch: Latch, timeout: Duration) {
    tokio::select! {
        _ = latch.cancelled() => {}
        _ = sleep(timeout) => {
            latch.try_set(Ok(WaitOutcome::empty(WaitReason::Timeout)));
        }
    }
}

async fn close_arm(latch: Latch, close: CancellationToken) {
    tokio::select! {
        _ = latch.cancelled() => {}
        _ = close.cancelled() => {
            latch.try_set(Ok(WaitOutcome::empty(WaitReason::Close)));
        }
    }
}
