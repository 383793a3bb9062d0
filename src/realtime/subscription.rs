//! # Subscriptions
//!
//! A subscription is a long-lived change-bus listener. Each announced
//! document goes through the same `LiveMatcher` a wait-for session uses, and
//! every match is handed to a `PushDelivery`. Stopping the handle (or
//! dropping it) ends the task and deregisters the listener.

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use async_trait::async_trait;
use futures_util::Stream;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use super::bus::BusListener;
use super::wait_for::LiveMatcher;

/// Receives matching documents of an active subscription
#[async_trait]
pub trait PushDelivery: Send + Sync {
    /// Delivers one document; `false` means the receiver is gone and the
    /// subscription should end.
    async fn deliver(&self, doc: Value) -> bool;
}

/// Delivery into an unbounded channel read through `DocumentStream`
#[derive(Debug, Clone)]
pub struct ChannelDelivery {
    tx: mpsc::UnboundedSender<Value>,
}

impl ChannelDelivery {
    pub fn new() -> (Self, DocumentStream) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, DocumentStream { rx })
    }
}

#[async_trait]
impl PushDelivery for ChannelDelivery {
    async fn deliver(&self, doc: Value) -> bool {
        self.tx.send(doc).is_ok()
    }
}

/// Stream of documents pushed to a subscription
#[derive(Debug)]
pub struct DocumentStream {
    rx: mpsc::UnboundedReceiver<Value>,
}

impl Stream for DocumentStream {
    type Item = Value;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Value>> {
        self.rx.poll_recv(cx)
    }
}

/// Runs `on_stop` when dropped, whichever way the task ends
struct StopGuard(Option<Box<dyn FnOnce() + Send>>);

impl Drop for StopGuard {
    fn drop(&mut self) {
        if let Some(on_stop) = self.0.take() {
            on_stop();
        }
    }
}

/// Handle of a running subscription
#[derive(Debug)]
pub struct SubscriptionHandle {
    stop: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl SubscriptionHandle {
    /// Starts forwarding matches from `listener` to `delivery`. `on_stop`
    /// runs once the task has ended.
    pub fn spawn(
        mut listener: BusListener,
        matcher: Arc<dyn LiveMatcher>,
        delivery: Arc<dyn PushDelivery>,
        on_stop: impl FnOnce() + Send + 'static,
    ) -> Self {
        let stop = CancellationToken::new();
        let token = stop.clone();
        let task = tokio::spawn(async move {
            let _guard = StopGuard(Some(Box::new(on_stop)));
            loop {
                let doc = tokio::select! {
                    _ = token.cancelled() => return,
                    doc = listener.recv() => doc,
                };
                let Some(doc) = doc else {
                    return;
                };
                match matcher.evaluate(&doc) {
                    Ok(Some(row)) => {
                        if !delivery.deliver(row).await {
                            return;
                        }
                    }
                    Ok(None) => {}
                    Err(e) => warn!(error = %e, "announced document could not be evaluated"),
                }
            }
        });
        Self {
            stop,
            task: Some(task),
        }
    }

    pub fn is_finished(&self) -> bool {
        self.task.as_ref().map_or(true, |t| t.is_finished())
    }

    /// Stops the subscription and waits for its task to end.
    pub async fn stop(mut self) {
        self.stop.cancel();
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

impl Drop for SubscriptionHandle {
    fn drop(&mut self) {
        self.stop.cancel();
    }
}
