//! The reactive graph: owns the root node, the subscription channel, and
//! the microtask-like batched flush.

use crate::value::{Op, PathSegment, ReactiveArray, ReactiveObject};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;

/// Shared state every node in the graph holds a weak reference to.
///
/// A JS reactive proxy library gets "all synchronous mutations in this
/// microtask land in one flush" for free from the microtask queue; Tokio
/// has no implicit equivalent, so it's modeled explicitly here with an
/// atomic "flush already scheduled" guard plus a `tokio::spawn` + one
/// `yield_now` to land the flush after the current batch of synchronous
/// calls returns control to the runtime.
pub(crate) struct GraphShared {
    tx: broadcast::Sender<Vec<Op>>,
    batch: Mutex<Vec<Op>>,
    flush_scheduled: AtomicBool,
}

impl GraphShared {
    pub(crate) fn push_op(self: &Arc<Self>, op: Op) {
        self.batch.lock().push(op);
        self.schedule_flush();
    }

    fn schedule_flush(self: &Arc<Self>) {
        if self.flush_scheduled.swap(true, Ordering::SeqCst) {
            return;
        }
        let shared = Arc::clone(self);
        tokio::spawn(async move {
            tokio::task::yield_now().await;
            shared.flush_scheduled.store(false, Ordering::SeqCst);
            shared.flush_now();
        });
    }

    fn flush_now(&self) {
        let batch = std::mem::take(&mut *self.batch.lock());
        if !batch.is_empty() {
            let _ = self.tx.send(batch);
        }
    }
}

/// The reactive proxy graph: one root object, plus the batching/
/// subscription machinery every node under it shares.
pub struct ReactiveGraph {
    shared: Arc<GraphShared>,
    root: ReactiveObject,
}

impl ReactiveGraph {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(1024);
        let shared = Arc::new(GraphShared {
            tx,
            batch: Mutex::new(Vec::new()),
            flush_scheduled: AtomicBool::new(false),
        });
        let root = ReactiveObject::new(Arc::downgrade(&shared), Vec::new());
        Self { shared, root }
    }

    pub fn root(&self) -> &ReactiveObject {
        &self.root
    }

    /// Subscribe to batches of ops as they flush. One receive = one flush.
    pub fn subscribe(&self) -> broadcast::Receiver<Vec<Op>> {
        self.shared.tx.subscribe()
    }

    /// Run `f`, then flush immediately rather than waiting on the
    /// scheduled microtask-like flush. Intended for tests and for callers
    /// (like the bridge's write pipeline) that want deterministic batching
    /// of an explicit synchronous mutation region.
    pub fn mutate_scope<F: FnOnce()>(&self, f: F) {
        f();
        self.shared.flush_scheduled.store(true, Ordering::SeqCst);
        self.shared.flush_now();
        self.shared.flush_scheduled.store(false, Ordering::SeqCst);
    }

    /// Create a detached object node bound to this graph, for callers that
    /// build a subtree before attaching it under a parent.
    pub fn new_object(&self, path: Vec<PathSegment>) -> ReactiveObject {
        ReactiveObject::new(Arc::downgrade(&self.shared), path)
    }

    /// Create a detached array node bound to this graph.
    pub fn new_array(&self, path: Vec<PathSegment>) -> ReactiveArray {
        ReactiveArray::new(Arc::downgrade(&self.shared), path)
    }
}

impl Default for ReactiveGraph {
    fn default() -> Self {
        Self::new()
    }
}
