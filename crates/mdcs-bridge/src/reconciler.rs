//! Module E — Reconciler.
//!
//! Applies inbound CRDT events back onto the reactive graph, preferring a
//! granular list delta over a wholesale structural rebuild, without
//! re-emitting writes the outbound pipeline would otherwise pick back up.
//! Every write here goes through the `_silent` family on `ReactiveObject`/
//! `ReactiveArray` and runs under the reconciliation lock for exactly that
//! reason.

use crate::context::{ReactiveNode, SyncContext};
use crate::value::crdt_scalar_to_reactive;
use mdcs_crdt::{
    ArrayId, Change, ContainerRef, Document, JsonValue, ObjectId, Origin,
};
use mdcs_reactive::{OpaqueRef, PathSegment, ReactiveGraph, ReactiveValue};
use parking_lot::Mutex as SyncMutex;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::broadcast;

/// Subscribe to the document's deep-observe stream and drive the
/// reconciler from it, skipping every event tagged with `sentinel` — the
/// bridge's own outbound writes, already reflected in the reactive graph
/// by the post-integration hook that ran when they were made.
pub fn spawn_inbound_driver(
    ctx: Arc<SyncContext>,
    doc: Arc<SyncMutex<Document>>,
    graph: Arc<ReactiveGraph>,
    sentinel: Origin,
) {
    let mut events = doc.lock().observe();
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => {
                    if ctx.is_disposed() {
                        break;
                    }
                    if event.origin == sentinel {
                        continue;
                    }
                    let doc = doc.lock();
                    match &event.container {
                        ContainerRef::Object(object_id) => {
                            reconcile_map(&ctx, &doc, &graph, object_id);
                        }
                        ContainerRef::Array(array_id) => match &event.change {
                            Change::List { delta } => {
                                reconcile_list_delta(&ctx, &doc, &graph, array_id, delta);
                            }
                            Change::Map { .. } => {
                                reconcile_list(&ctx, &doc, &graph, array_id);
                            }
                        },
                    }
                }
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    });
}

/// Key-diff a materialized map proxy against its CRDT node. No-op if `M`
/// hasn't been materialized.
pub fn reconcile_map(ctx: &Arc<SyncContext>, doc: &Document, graph: &ReactiveGraph, object_id: &ObjectId) {
    let Some(ReactiveNode::Object(proxy)) = ctx.reactive_for(&ContainerRef::Object(object_id.clone())) else {
        return;
    };

    ctx.lock.with_lock(|| {
        let parent_path = proxy.path();
        let crdt_keys: HashSet<String> = doc.object_keys(object_id).into_iter().collect();
        let proxy_keys: HashSet<String> = proxy.keys().into_iter().collect();

        for key in proxy_keys.difference(&crdt_keys) {
            proxy.remove_silent(key);
        }

        for key in &crdt_keys {
            let Some(crdt_value) = doc.object_get(object_id, key) else {
                continue;
            };

            match (crdt_value, proxy.get(key)) {
                (JsonValue::Object(child_id), Some(ReactiveValue::Object(existing)))
                    if ctx.container_for_node_id(existing.node_id()).as_ref()
                        == Some(&ContainerRef::Object(child_id.clone())) =>
                {
                    reconcile_map(ctx, doc, graph, child_id);
                }
                (JsonValue::Array(child_id), Some(ReactiveValue::Array(existing)))
                    if ctx.container_for_node_id(existing.node_id()).as_ref()
                        == Some(&ContainerRef::Array(child_id.clone())) =>
                {
                    reconcile_list(ctx, doc, graph, child_id);
                }
                (JsonValue::Object(_), _) | (JsonValue::Array(_), _) => {
                    let mut child_path = parent_path.clone();
                    child_path.push(PathSegment::Key(key.clone()));
                    let converted = convert_for_reconcile(ctx, doc, graph, child_path, crdt_value);
                    proxy.set_silent(key.clone(), converted);
                }
                (JsonValue::Text(text_id), Some(ReactiveValue::Opaque(existing)))
                    if existing.id() == text_id.to_string().as_str() => {}
                (JsonValue::Text(text_id), _) => {
                    proxy.set_silent(key.clone(), ReactiveValue::Opaque(OpaqueRef::new(text_id.to_string())));
                }
                (scalar, existing) => {
                    if let Some(converted) = crdt_scalar_to_reactive(scalar) {
                        if existing.as_ref() != Some(&converted) {
                            proxy.set_silent(key.clone(), converted);
                        }
                    }
                }
            }
        }
    });
}

/// Rebuild a materialized list proxy's whole sequence from the CRDT node.
/// Used as the structural fallback when no delta is available (and, via
/// the post-hook path, for a bootstrap's explicit root reconcile).
pub fn reconcile_list(ctx: &Arc<SyncContext>, doc: &Document, graph: &ReactiveGraph, array_id: &ArrayId) {
    let Some(ReactiveNode::Array(proxy)) = ctx.reactive_for(&ContainerRef::Array(array_id.clone())) else {
        return;
    };

    ctx.lock.with_lock(|| {
        let parent_path = proxy.path();
        let values = doc.array_to_vec(array_id);
        let mut new_items = Vec::with_capacity(values.len());
        for (index, value) in values.iter().enumerate() {
            let mut child_path = parent_path.clone();
            child_path.push(PathSegment::Index(index));
            new_items.push(convert_for_reconcile(ctx, doc, graph, child_path, value));
        }
        proxy.splice_silent(new_items);
    });
}

/// Walk a retain/delete/insert delta against a materialized list proxy,
/// maintaining a write cursor. Builds the new sequence in a plain local
/// `Vec` and splices it in once at the end rather than issuing the
/// reactive graph's own insert/remove per step, since those would each
/// emit an `Op` the outbound pipeline would have to filter back out.
///
/// The idempotency guard compares each insert's converted items against
/// the slice already sitting at the cursor before touching anything, so
/// a delta reconcile that runs after a structural reconcile already
/// caught up is a no-op.
pub fn reconcile_list_delta(
    ctx: &Arc<SyncContext>,
    doc: &Document,
    graph: &ReactiveGraph,
    array_id: &ArrayId,
    delta: &[mdcs_crdt::ListDeltaOp],
) {
    use mdcs_crdt::ListDeltaOp;

    let Some(ReactiveNode::Array(proxy)) = ctx.reactive_for(&ContainerRef::Array(array_id.clone())) else {
        return;
    };

    ctx.lock.with_lock(|| {
        let parent_path = proxy.path();
        let mut working = proxy.to_vec();
        let mut cursor = 0usize;
        let mut dirty = false;

        for op in delta {
            match op {
                ListDeltaOp::Retain(n) => cursor += n,
                ListDeltaOp::Delete(n) => {
                    let end = (cursor + n).min(working.len());
                    if end > cursor {
                        working.drain(cursor..end);
                        dirty = true;
                    }
                }
                ListDeltaOp::Insert(items) => {
                    let converted: Vec<ReactiveValue> = items
                        .iter()
                        .enumerate()
                        .map(|(offset, value)| {
                            let mut child_path = parent_path.clone();
                            child_path.push(PathSegment::Index(cursor + offset));
                            convert_for_reconcile(ctx, doc, graph, child_path, value)
                        })
                        .collect();

                    let already_present = cursor + converted.len() <= working.len()
                        && working[cursor..cursor + converted.len()] == converted[..];
                    if !already_present {
                        for (offset, value) in converted.into_iter().enumerate() {
                            working.insert(cursor + offset, value);
                        }
                        dirty = true;
                    }
                    cursor += items.len();
                }
            }
        }

        if dirty {
            proxy.splice_silent(working);
        }
    });
}

/// Convert one CRDT value into its reactive counterpart for reconciliation,
/// materializing and recursively reconciling a fresh proxy for containers
/// not already bound in `ctx`.
fn convert_for_reconcile(
    ctx: &Arc<SyncContext>,
    doc: &Document,
    graph: &ReactiveGraph,
    path: Vec<PathSegment>,
    value: &JsonValue,
) -> ReactiveValue {
    if let Some(scalar) = crdt_scalar_to_reactive(value) {
        return scalar;
    }
    match value {
        JsonValue::Text(text_id) => ReactiveValue::Opaque(OpaqueRef::new(text_id.to_string())),
        JsonValue::Object(object_id) => {
            ReactiveValue::Object(materialize_reactive_object(ctx, doc, graph, path, object_id))
        }
        JsonValue::Array(array_id) => {
            ReactiveValue::Array(materialize_reactive_array(ctx, doc, graph, path, array_id))
        }
        JsonValue::Null | JsonValue::Bool(_) | JsonValue::Int(_) | JsonValue::Float(_) | JsonValue::String(_) => {
            unreachable!("scalar already handled above")
        }
    }
}

fn materialize_reactive_object(
    ctx: &Arc<SyncContext>,
    doc: &Document,
    graph: &ReactiveGraph,
    path: Vec<PathSegment>,
    object_id: &ObjectId,
) -> mdcs_reactive::ReactiveObject {
    if let Some(ReactiveNode::Object(existing)) = ctx.reactive_for(&ContainerRef::Object(object_id.clone())) {
        return existing;
    }
    let node = graph.new_object(path);
    ctx.bind(
        ContainerRef::Object(object_id.clone()),
        ReactiveNode::Object(node.clone()),
    );
    reconcile_map(ctx, doc, graph, object_id);
    node
}

fn materialize_reactive_array(
    ctx: &Arc<SyncContext>,
    doc: &Document,
    graph: &ReactiveGraph,
    path: Vec<PathSegment>,
    array_id: &ArrayId,
) -> mdcs_reactive::ReactiveArray {
    if let Some(ReactiveNode::Array(existing)) = ctx.reactive_for(&ContainerRef::Array(array_id.clone())) {
        return existing;
    }
    let node = graph.new_array(path);
    ctx.bind(
        ContainerRef::Array(array_id.clone()),
        ReactiveNode::Array(node.clone()),
    );
    reconcile_list(ctx, doc, graph, array_id);
    node
}

#[cfg(test)]
mod tests {
    use super::*;
    use mdcs_crdt::Document;

    #[test]
    fn reconcile_map_picks_up_a_new_scalar_key() {
        let mut doc = Document::new("replica-a");
        let ctx = Arc::new(SyncContext::new(false));
        let graph = ReactiveGraph::new();
        let root_id = ObjectId::root();

        ctx.bind(
            ContainerRef::Object(root_id.clone()),
            ReactiveNode::Object(graph.root().clone()),
        );

        doc.transact(Origin::new(), |tx| {
            tx.map_set(&root_id, "name", JsonValue::String("Ada".into())).unwrap();
        });

        reconcile_map(&ctx, &doc, &graph, &root_id);

        assert_eq!(
            graph.root().get("name"),
            Some(ReactiveValue::String("Ada".into()))
        );
    }

    #[test]
    fn reconcile_map_drops_a_key_removed_from_the_crdt() {
        let mut doc = Document::new("replica-b");
        let ctx = Arc::new(SyncContext::new(false));
        let graph = ReactiveGraph::new();
        let root_id = ObjectId::root();

        ctx.bind(
            ContainerRef::Object(root_id.clone()),
            ReactiveNode::Object(graph.root().clone()),
        );
        graph.root().set_silent("ghost", ReactiveValue::Int(1));

        reconcile_map(&ctx, &doc, &graph, &root_id);

        assert_eq!(graph.root().get("ghost"), None);
    }

    #[test]
    fn reconcile_list_delta_inserts_at_the_cursor() {
        let mut doc = Document::new("replica-c");
        let ctx = Arc::new(SyncContext::new(false));
        let graph = ReactiveGraph::new();
        let array_id = ArrayId::new();
        let array_node = graph.new_array(vec![]);

        ctx.bind(
            ContainerRef::Array(array_id.clone()),
            ReactiveNode::Array(array_node.clone()),
        );
        array_node.splice_silent(vec![ReactiveValue::Int(1), ReactiveValue::Int(3)]);

        doc.transact(Origin::new(), |tx| {
            tx.list_insert(&array_id, 0, JsonValue::Int(1)).unwrap();
            tx.list_insert(&array_id, 1, JsonValue::Int(2)).unwrap();
            tx.list_insert(&array_id, 2, JsonValue::Int(3)).unwrap();
        });

        let delta = vec![
            mdcs_crdt::ListDeltaOp::Retain(1),
            mdcs_crdt::ListDeltaOp::Insert(vec![JsonValue::Int(2)]),
        ];
        reconcile_list_delta(&ctx, &doc, &graph, &array_id, &delta);

        assert_eq!(
            array_node.to_vec(),
            vec![ReactiveValue::Int(1), ReactiveValue::Int(2), ReactiveValue::Int(3)]
        );
    }

    #[test]
    fn reconcile_list_delta_is_idempotent() {
        let doc = Document::new("replica-d");
        let ctx = Arc::new(SyncContext::new(false));
        let graph = ReactiveGraph::new();
        let array_id = ArrayId::new();
        let array_node = graph.new_array(vec![]);

        ctx.bind(
            ContainerRef::Array(array_id.clone()),
            ReactiveNode::Array(array_node.clone()),
        );
        array_node.splice_silent(vec![ReactiveValue::Int(1), ReactiveValue::Int(2)]);

        let delta = vec![mdcs_crdt::ListDeltaOp::Insert(vec![JsonValue::Int(1), JsonValue::Int(2)])];
        reconcile_list_delta(&ctx, &doc, &graph, &array_id, &delta);

        assert_eq!(
            array_node.to_vec(),
            vec![ReactiveValue::Int(1), ReactiveValue::Int(2)]
        );
    }
}
