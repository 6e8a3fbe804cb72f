//! Module C — Bridge / Router.
//!
//! Wires a [`Document`] to a [`ReactiveGraph`], materializing the root and
//! driving both subscriptions: outbound (reactive mutation -> planner ->
//! scheduler) and inbound (CRDT event -> reconciler).
//!
//! **Materialization is eager, not lazy.** The original on-first-access
//! model assumes a proxy `get` trap that can build a child the moment
//! application code reaches for it; `ReactiveObject::get` is a plain
//! method with no such hook, so there's no place to hang a "materialize
//! now" step on the read path. Instead, [`create_bridge`] recursively
//! mirrors the whole existing CRDT tree into reactive nodes up front via
//! [`reconciler::reconcile_map`]. Functionally this is the same fixed
//! point the lazy model converges to after enough reads; it just gets
//! there in one pass at construction instead of incrementally.
//!
//! **Grouping by container id replaces path-depth filtering.** The
//! original router filters an incoming op batch to ops whose path is a
//! direct child of the subscribing node, because one flat op stream can
//! mix ops from many proxies at different depths. Here every [`Op`]
//! already carries the id of the exact node whose method produced it
//! (`container_id`), so grouping the batch by that id *is* the filter —
//! there's no depth arithmetic left to do.

use crate::context::{ReactiveNode, SyncContext};
use crate::error::{BridgeError, Result};
use crate::{applier, planner, reconciler, scheduler, value};
use mdcs_crdt::{ContainerRef, Document, ObjectId, Origin};
use mdcs_reactive::{Op, OpKind, PathSegment, ReactiveGraph, ReactiveObject, ReactiveValue};
use parking_lot::Mutex as SyncMutex;
use std::sync::Arc;
use tokio::sync::broadcast;

/// Construction-time knobs for a bridge instance.
#[derive(Clone, Copy, Debug, Default)]
pub struct BridgeOptions {
    pub debug: bool,
}

/// A live bridge between one [`Document`] and one [`ReactiveGraph`].
///
/// Dropping a `Bridge` does not tear anything down by itself — the
/// background subscription tasks hold their own `Arc` clones and keep
/// running until [`Bridge::dispose`] is called or the process exits.
pub struct Bridge {
    ctx: Arc<SyncContext>,
    doc: Arc<SyncMutex<Document>>,
    graph: Arc<ReactiveGraph>,
    sentinel: Origin,
}

impl Bridge {
    /// The reactive root mirroring the document's root map. Ordinary
    /// mutation syntax — `.set()`, `.remove()`, `.get()` — is the contract;
    /// every mutation eventually lands in the document within one flush.
    pub fn proxy(&self) -> ReactiveObject {
        self.graph.root().clone()
    }

    /// One-shot initial-data helper. Aborts without touching the document
    /// if the root already has any keys.
    ///
    /// Bypasses the planner/scheduler entirely — bootstrap is a single
    /// bulk write, not an incremental mutation to classify and batch — and
    /// reconciles the root explicitly afterward, since the reconciler's
    /// inbound driver ignores sentinel-origin events by design and would
    /// otherwise never see this write.
    pub fn bootstrap(&self, data: Vec<(String, ReactiveValue)>) -> Result<()> {
        if self.ctx.is_disposed() {
            return Err(BridgeError::AlreadyDisposed);
        }
        let root_id = ObjectId::root();

        if !self.doc.lock().object_keys(&root_id).is_empty() {
            self.ctx.logger.warn("bootstrap called on a non-empty root; aborting");
            return Err(BridgeError::BootstrapOnNonEmptyRoot);
        }

        let is_attached = |v: &ReactiveValue| match v {
            ReactiveValue::Object(o) => self.ctx.container_for_node_id(o.node_id()).is_some(),
            ReactiveValue::Array(a) => self.ctx.container_for_node_id(a.node_id()).is_some(),
            _ => false,
        };
        for (key, value) in &data {
            value::validate_subtree(key, value, &is_attached)?;
        }

        {
            let mut doc = self.doc.lock();
            doc.transact(self.sentinel, |tx| {
                for (key, value) in &data {
                    let crdt_value = match applier::write_value(tx, &self.ctx, value) {
                        Ok(v) => v,
                        Err(err) => {
                            self.ctx.logger.error(format!("bootstrap write failed for {key}: {err}"));
                            continue;
                        }
                    };
                    if let Err(err) = tx.map_set(&root_id, key, crdt_value) {
                        self.ctx.logger.error(format!("bootstrap write failed for {key}: {err}"));
                    }
                }
            });
        }

        let doc = self.doc.lock();
        reconciler::reconcile_map(&self.ctx, &doc, &self.graph, &root_id);
        Ok(())
    }

    /// Snapshot the document's current state as plain JSON. Useful for
    /// logging and for tests that want to assert on the CRDT side without
    /// reaching into the bridge's internals.
    pub fn document_snapshot(&self) -> serde_json::Value {
        self.doc.lock().to_json()
    }

    /// Tear down subscriptions and release every cached identity mapping.
    /// After this call, reactive mutations no longer reach the document
    /// and document events no longer reach the reactive graph.
    pub fn dispose(&self) {
        self.ctx.dispose();
    }
}

/// Build a bridge over `doc`, mirroring its current root and wiring both
/// subscription directions.
pub fn create_bridge(doc: Document, options: BridgeOptions) -> Bridge {
    let ctx = Arc::new(SyncContext::new(options.debug));
    let doc = Arc::new(SyncMutex::new(doc));
    let graph = Arc::new(ReactiveGraph::new());
    let sentinel = Origin::new();
    let root_id = ObjectId::root();

    ctx.bind(
        ContainerRef::Object(root_id.clone()),
        ReactiveNode::Object(graph.root().clone()),
    );
    {
        let locked = doc.lock();
        reconciler::reconcile_map(&ctx, &locked, &graph, &root_id);
    }

    spawn_outbound_driver(Arc::clone(&ctx), Arc::clone(&doc), Arc::clone(&graph), sentinel);
    reconciler::spawn_inbound_driver(Arc::clone(&ctx), Arc::clone(&doc), Arc::clone(&graph), sentinel);

    Bridge {
        ctx,
        doc,
        graph,
        sentinel,
    }
}

fn spawn_outbound_driver(ctx: Arc<SyncContext>, doc: Arc<SyncMutex<Document>>, graph: Arc<ReactiveGraph>, sentinel: Origin) {
    let mut ops_rx = graph.subscribe();
    tokio::spawn(async move {
        loop {
            match ops_rx.recv().await {
                Ok(batch) => {
                    if ctx.is_disposed() {
                        break;
                    }
                    if ctx.lock.is_locked() {
                        continue;
                    }
                    handle_outbound_batch(&ctx, &doc, &graph, sentinel, batch);
                }
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    });
}

fn group_by_container(batch: Vec<Op>) -> Vec<(usize, Vec<Op>)> {
    let mut groups: Vec<(usize, Vec<Op>)> = Vec::new();
    for op in batch {
        if let Some((_, ops)) = groups.iter_mut().find(|(id, _)| *id == op.container_id) {
            ops.push(op);
        } else {
            groups.push((op.container_id, vec![op]));
        }
    }
    groups
}

fn validate_batch(ctx: &Arc<SyncContext>, ops: &[Op]) -> Result<()> {
    let is_attached = |v: &ReactiveValue| match v {
        ReactiveValue::Object(o) => ctx.container_for_node_id(o.node_id()).is_some(),
        ReactiveValue::Array(a) => ctx.container_for_node_id(a.node_id()).is_some(),
        _ => false,
    };
    for op in ops {
        match &op.kind {
            OpKind::Set { value } => value::validate_subtree("value", value, &is_attached)?,
            OpKind::Insert { values, .. } => {
                for v in values {
                    value::validate_subtree("value", v, &is_attached)?;
                }
            }
            OpKind::Delete | OpKind::Remove { .. } => {}
        }
    }
    Ok(())
}

/// Resync a container's proxy from the document's current (pre-flush)
/// state, undoing whatever the rejected batch did to it. The document
/// hasn't been touched yet at this point, so its state for this container
/// is exactly the pre-batch state the rollback symmetry invariant asks
/// for.
fn rollback(ctx: &Arc<SyncContext>, doc: &Arc<SyncMutex<Document>>, graph: &Arc<ReactiveGraph>, container_ref: &ContainerRef) {
    let doc = doc.lock();
    match container_ref {
        ContainerRef::Object(object_id) => reconciler::reconcile_map(ctx, &doc, graph, object_id),
        ContainerRef::Array(array_id) => reconciler::reconcile_list(ctx, &doc, graph, array_id),
    }
}

fn handle_outbound_batch(
    ctx: &Arc<SyncContext>,
    doc: &Arc<SyncMutex<Document>>,
    graph: &Arc<ReactiveGraph>,
    sentinel: Origin,
    batch: Vec<Op>,
) {
    for (container_id, ops) in group_by_container(batch) {
        let Some(container_ref) = ctx.container_for_node_id(container_id) else {
            // A brand-new child (e.g. just created via `set_object`) that
            // hasn't been bound to a CRDT container yet. Its fields will be
            // picked up recursively once its parent's own intent for it is
            // applied, so there's nothing to route here.
            continue;
        };

        if let Err(err) = validate_batch(ctx, &ops) {
            ctx.logger
                .error(format!("outbound batch for {container_ref:?} rejected: {err}"));
            rollback(ctx, doc, graph, &container_ref);
            continue;
        }

        match &container_ref {
            ContainerRef::Object(object_id) => {
                let map_ops: Vec<(String, OpKind)> = ops
                    .into_iter()
                    .filter_map(|op| match op.path.last() {
                        Some(PathSegment::Key(key)) => Some((key.clone(), op.kind)),
                        _ => None,
                    })
                    .collect();
                let intents = planner::plan_map(&map_ops);
                ctx.scheduler.enqueue_map(object_id.clone(), intents.by_key);
            }
            ContainerRef::Array(array_id) => {
                let length_at_start = doc.lock().array_len(array_id);
                // Unlike a map `Set`/`Delete`, an array op's index lives in
                // the `OpKind` itself (`Insert`/`Remove` carry it directly)
                // rather than as a trailing path segment — the array's own
                // path never changes from one element mutation to the next.
                let list_ops: Vec<(usize, OpKind)> = ops
                    .into_iter()
                    .filter_map(|op| match &op.kind {
                        OpKind::Insert { index, .. } | OpKind::Remove { index, .. } => {
                            Some((*index, op.kind))
                        }
                        _ => None,
                    })
                    .collect();
                let intents = planner::plan_list(&list_ops, length_at_start);
                ctx.scheduler.enqueue_list(array_id.clone(), intents.by_index);
            }
        }
    }

    scheduler::schedule_flush(Arc::clone(ctx), Arc::clone(doc), sentinel);
}

#[cfg(test)]
mod tests {
    use super::*;
    use mdcs_crdt::JsonValue;

    #[tokio::test]
    async fn a_root_set_eventually_reaches_the_document() {
        let doc = Document::new("replica-a");
        let bridge = create_bridge(doc, BridgeOptions::default());

        bridge.proxy().set("name", ReactiveValue::String("Ada".into()));
        // Three hops of cooperative scheduling separate the mutation from
        // the commit: the graph's own scheduled flush, the outbound
        // driver's handling of that batch, and the scheduler's own
        // scheduled flush. A few extra yields keep this from being brittle
        // against scheduling order.
        for _ in 0..8 {
            tokio::task::yield_now().await;
        }

        let value = bridge.doc.lock().object_get(&ObjectId::root(), "name").cloned();
        assert_eq!(value, Some(JsonValue::String("Ada".into())));
    }

    #[test]
    fn bootstrap_rejects_a_non_empty_root() {
        let mut doc = Document::new("replica-b");
        let root_id = ObjectId::root();
        doc.transact(Origin::new(), |tx| {
            tx.map_set(&root_id, "existing", JsonValue::Bool(true)).unwrap();
        });
        let bridge = create_bridge(doc, BridgeOptions::default());

        let result = bridge.bootstrap(vec![("name".to_string(), ReactiveValue::String("Ada".into()))]);
        assert!(matches!(result, Err(BridgeError::BootstrapOnNonEmptyRoot)));
    }

    #[test]
    fn bootstrap_seeds_an_empty_root_and_reconciles_the_proxy() {
        let doc = Document::new("replica-c");
        let bridge = create_bridge(doc, BridgeOptions::default());

        bridge
            .bootstrap(vec![("name".to_string(), ReactiveValue::String("Ada".into()))])
            .unwrap();

        assert_eq!(bridge.proxy().get("name"), Some(ReactiveValue::String("Ada".into())));
        assert_eq!(
            bridge.doc.lock().object_get(&ObjectId::root(), "name"),
            Some(&JsonValue::String("Ada".into()))
        );
    }
}
