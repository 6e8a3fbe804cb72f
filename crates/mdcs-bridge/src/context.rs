//! Module B — Synchronization Context.
//!
//! The per-bridge holder of the bidirectional CRDT-node <-> reactive-node
//! identity map, the reconciliation lock, the logger facade, and the
//! scheduler the write pipeline enqueues into.

use crate::scheduler::Scheduler;
use mdcs_crdt::ContainerRef;
use mdcs_reactive::{ReactiveArray, ReactiveObject};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

/// Either side of a materialized container, held generically so the
/// identity maps need only one entry type instead of two parallel ones.
#[derive(Clone, Debug)]
pub enum ReactiveNode {
    Object(ReactiveObject),
    Array(ReactiveArray),
}

impl ReactiveNode {
    pub fn node_id(&self) -> usize {
        match self {
            ReactiveNode::Object(o) => o.node_id(),
            ReactiveNode::Array(a) => a.node_id(),
        }
    }

    pub fn as_object(&self) -> Option<&ReactiveObject> {
        match self {
            ReactiveNode::Object(o) => Some(o),
            ReactiveNode::Array(_) => None,
        }
    }

    pub fn as_array(&self) -> Option<&ReactiveArray> {
        match self {
            ReactiveNode::Array(a) => Some(a),
            ReactiveNode::Object(_) => None,
        }
    }
}

struct Maps {
    crdt_to_reactive: HashMap<ContainerRef, ReactiveNode>,
    reactive_to_crdt: HashMap<usize, ContainerRef>,
}

/// A nesting-safe cooperative guard. While held, the outbound subscription
/// handler short-circuits instead of re-entering the write pipeline with
/// changes the reconciler itself just applied to the reactive graph.
///
/// Modeled as a depth counter rather than a bare bool so nested
/// `with_lock` calls (the reconciler calling into bridge materialization,
/// which itself touches the reactive graph under lock) restore the prior
/// state correctly on every exit path, matching the "nesting is permitted"
/// rule. An `AtomicU32` rather than a `Cell` so `SyncContext` stays `Sync`
/// — the outbound/inbound drivers and `schedule_flush` all capture an
/// `Arc<SyncContext>` inside a `tokio::spawn`ed future, which requires it.
#[derive(Default)]
pub struct ReconciliationLock {
    depth: AtomicU32,
}

impl ReconciliationLock {
    pub fn is_locked(&self) -> bool {
        self.depth.load(Ordering::SeqCst) > 0
    }

    pub fn with_lock<R>(&self, f: impl FnOnce() -> R) -> R {
        self.depth.fetch_add(1, Ordering::SeqCst);
        let result = f();
        self.depth.fetch_sub(1, Ordering::SeqCst);
        result
    }
}

/// Thin wrapper over `tracing`, gated by a per-instance debug flag rather
/// than a global filter, since two bridges in one process may run at
/// different verbosity.
pub struct Logger {
    debug_enabled: bool,
}

impl Logger {
    pub fn new(debug_enabled: bool) -> Self {
        Self { debug_enabled }
    }

    pub fn debug(&self, message: impl std::fmt::Display) {
        if self.debug_enabled {
            tracing::debug!(target: "mdcs_bridge", "{message}");
        }
    }

    pub fn warn(&self, message: impl std::fmt::Display) {
        tracing::warn!(target: "mdcs_bridge", "{message}");
    }

    pub fn error(&self, message: impl std::fmt::Display) {
        tracing::error!(target: "mdcs_bridge", "{message}");
    }
}

/// Per-bridge-instance synchronization context.
pub struct SyncContext {
    maps: Mutex<Maps>,
    disposed: AtomicBool,
    pub lock: ReconciliationLock,
    pub logger: Logger,
    pub scheduler: Scheduler,
}

impl SyncContext {
    pub fn new(debug: bool) -> Self {
        Self {
            maps: Mutex::new(Maps {
                crdt_to_reactive: HashMap::new(),
                reactive_to_crdt: HashMap::new(),
            }),
            disposed: AtomicBool::new(false),
            lock: ReconciliationLock::default(),
            logger: Logger::new(debug),
            scheduler: Scheduler::new(),
        }
    }

    /// Record that `container` and `node` mirror each other.
    pub fn bind(&self, container: ContainerRef, node: ReactiveNode) {
        let mut maps = self.maps.lock();
        maps.reactive_to_crdt
            .insert(node.node_id(), container.clone());
        maps.crdt_to_reactive.insert(container, node);
    }

    pub fn reactive_for(&self, container: &ContainerRef) -> Option<ReactiveNode> {
        self.maps.lock().crdt_to_reactive.get(container).cloned()
    }

    pub fn container_for_node_id(&self, node_id: usize) -> Option<ContainerRef> {
        self.maps.lock().reactive_to_crdt.get(&node_id).cloned()
    }

    pub fn is_materialized(&self, container: &ContainerRef) -> bool {
        self.maps.lock().crdt_to_reactive.contains_key(container)
    }

    pub fn unbind(&self, container: &ContainerRef) {
        let mut maps = self.maps.lock();
        if let Some(node) = maps.crdt_to_reactive.remove(container) {
            maps.reactive_to_crdt.remove(&node.node_id());
        }
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::SeqCst)
    }

    /// Tear down every tracked association and mark the context disposed,
    /// so any background task still holding an `Arc` to it stops acting on
    /// further events. Called once, from `dispose`.
    pub fn dispose(&self) {
        self.disposed.store(true, Ordering::SeqCst);
        let mut maps = self.maps.lock();
        maps.crdt_to_reactive.clear();
        maps.reactive_to_crdt.clear();
    }
}
