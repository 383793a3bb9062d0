//! # Change bus
//!
//! In-process fan-out of ingested documents. `publish` is synchronous: it
//! bumps the counter hook and hands the document to every registered
//! listener before returning, so announcements reach each listener in
//! publish order. A listener sees only documents published after it was
//! registered. Dropping a `BusListener` deregisters it.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock, Weak};

use serde_json::Value;
use tokio::sync::mpsc;

/// Called once per published document, before any listener
pub type CounterHook = Arc<dyn Fn(&Value) + Send + Sync>;

type ChangeSender = mpsc::UnboundedSender<Arc<Value>>;

#[derive(Default)]
struct BusInner {
    listeners: RwLock<BTreeMap<u64, ChangeSender>>,
    next_id: AtomicU64,
    hook: Option<CounterHook>,
}

/// Shared handle to one collection's change bus
#[derive(Clone, Default)]
pub struct ChangeBus {
    inner: Arc<BusInner>,
}

impl std::fmt::Debug for ChangeBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChangeBus")
            .field("listeners", &self.listener_count())
            .finish()
    }
}

impl ChangeBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_hook(hook: CounterHook) -> Self {
        Self {
            inner: Arc::new(BusInner {
                hook: Some(hook),
                ..BusInner::default()
            }),
        }
    }

    /// Registers a listener for documents published from now on.
    pub fn listen(&self) -> BusListener {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        if let Ok(mut listeners) = self.inner.listeners.write() {
            listeners.insert(id, tx);
        }
        BusListener {
            id,
            rx,
            bus: Arc::downgrade(&self.inner),
        }
    }

    /// Announces a document; returns the number of listeners reached.
    pub fn publish(&self, doc: Value) -> usize {
        if let Some(hook) = &self.inner.hook {
            hook(&doc);
        }
        let doc = Arc::new(doc);
        let Ok(listeners) = self.inner.listeners.read() else {
            return 0;
        };
        listeners
            .values()
            .filter(|tx| tx.send(Arc::clone(&doc)).is_ok())
            .count()
    }

    pub fn listener_count(&self) -> usize {
        self.inner.listeners.read().map(|l| l.len()).unwrap_or(0)
    }
}

/// Registration on a `ChangeBus`
#[derive(Debug)]
pub struct BusListener {
    id: u64,
    rx: mpsc::UnboundedReceiver<Arc<Value>>,
    bus: Weak<BusInner>,
}

impl BusListener {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Next announced document; `None` once the bus is gone.
    pub async fn recv(&mut self) -> Option<Arc<Value>> {
        self.rx.recv().await
    }
}

impl Drop for BusListener {
    fn drop(&mut self) {
        if let Some(bus) = self.bus.upgrade() {
            if let Ok(mut listeners) = bus.listeners.write() {
                listeners.remove(&self.id);
            }
        }
    }
}
