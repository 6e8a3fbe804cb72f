//! Module D.3 — Applier.
//!
//! Takes one flush's pending-maps snapshot and writes it into an open
//! [`Transaction`], recursively materializing any newly attached
//! object/array subtrees into fresh CRDT containers and binding each one
//! into the synchronization context as it's created — since a
//! `ReactiveObject`/`ReactiveArray` is already a stable, identity-bearing
//! handle the moment it's constructed, there's no separate "swap the plain
//! value for a proxy" step the way a JS implementation would need; binding
//! is just recording the pairing.
//!
//! Within one target list, writes land in the order the ordering invariant
//! requires: replaces (descending index), deletes (descending index), then
//! inserts (ascending index, clamped to the list's current length so a
//! stale index becomes an append rather than an error).

use crate::context::{ReactiveNode, SyncContext};
use crate::error::{BridgeError, Result};
use crate::scheduler::PendingState;
use crate::value::reactive_scalar_to_crdt;
use mdcs_crdt::{ArrayId, ContainerRef, Document, JsonValue, ObjectId, TextRef, Transaction};
use mdcs_reactive::{ReactiveArray, ReactiveObject, ReactiveValue};
use std::sync::Arc;

/// Apply one flush's snapshot into the open transaction. Bails out on the
/// first write failure — an internal-invariant violation this deep in the
/// pipeline means the rest of the snapshot can no longer be trusted to
/// apply against consistent state, so the remainder of the batch is
/// dropped rather than attempted.
pub(crate) fn apply(tx: &mut Transaction, ctx: &Arc<SyncContext>, snapshot: PendingState) -> Result<()> {
    for (object_id, deletes) in &snapshot.map_deletes {
        for key in deletes {
            tx.map_delete(object_id, key)
                .map_err(|err| BridgeError::WriteFailed(format!("map_delete {object_id:?}.{key}: {err}")))?;
        }
    }

    for (object_id, sets) in &snapshot.map_sets {
        for (key, value) in sets {
            let crdt_value = write_value(tx, ctx, value)?;
            tx.map_set(object_id, key, crdt_value)
                .map_err(|err| BridgeError::WriteFailed(format!("map_set {object_id:?}.{key}: {err}")))?;
        }
    }

    for (array_id, replaces) in &snapshot.list_replaces {
        let mut indices: Vec<usize> = replaces.keys().copied().collect();
        indices.sort_unstable_by(|a, b| b.cmp(a));
        for index in indices {
            let value = &replaces[&index];
            let crdt_value = write_value(tx, ctx, value)?;
            tx.list_replace(array_id, index, crdt_value)
                .map_err(|err| BridgeError::WriteFailed(format!("list_replace {array_id:?}[{index}]: {err}")))?;
        }
    }

    for (array_id, deletes) in &snapshot.list_deletes {
        let mut indices: Vec<usize> = deletes.keys().copied().collect();
        indices.sort_unstable_by(|a, b| b.cmp(a));
        for index in indices {
            tx.list_delete(array_id, index)
                .map_err(|err| BridgeError::WriteFailed(format!("list_delete {array_id:?}[{index}]: {err}")))?;
        }
    }

    for (array_id, sets) in &snapshot.list_sets {
        let mut indices: Vec<usize> = sets.keys().copied().collect();
        indices.sort_unstable();
        for index in indices {
            let values = &sets[&index];
            let clamped = index.min(tx.array_len(array_id));
            for (offset, value) in values.iter().enumerate() {
                let crdt_value = write_value(tx, ctx, value)?;
                tx.list_insert(array_id, clamped + offset, crdt_value)
                    .map_err(|err| BridgeError::WriteFailed(format!("list_insert {array_id:?}[{}]: {err}", clamped + offset)))?;
            }
        }
    }

    Ok(())
}

/// Convert a reactive value into a value the transaction can write,
/// recursively creating CRDT containers for object/array subtrees that
/// aren't already materialized.
pub(crate) fn write_value(tx: &mut Transaction, ctx: &Arc<SyncContext>, value: &ReactiveValue) -> Result<JsonValue> {
    if let Some(scalar) = reactive_scalar_to_crdt(value) {
        return Ok(scalar);
    }
    Ok(match value {
        ReactiveValue::Opaque(opaque) => JsonValue::Text(TextRef::from_raw(opaque.id())),
        ReactiveValue::Object(obj) => JsonValue::Object(materialize_object(tx, ctx, obj)?),
        ReactiveValue::Array(arr) => JsonValue::Array(materialize_array(tx, ctx, arr)?),
        ReactiveValue::Null
        | ReactiveValue::Bool(_)
        | ReactiveValue::Int(_)
        | ReactiveValue::Float(_)
        | ReactiveValue::String(_) => unreachable!("scalar already handled above"),
    })
}

/// Materialize a reactive object into a CRDT map container, reusing an
/// existing binding if this exact node was already materialized (a
/// redundant re-assignment of an already-attached container back to the
/// same slot — re-parenting elsewhere is rejected upstream, before the
/// write pipeline ever sees it).
fn materialize_object(tx: &mut Transaction, ctx: &Arc<SyncContext>, obj: &ReactiveObject) -> Result<ObjectId> {
    if let Some(ContainerRef::Object(existing)) = ctx.container_for_node_id(obj.node_id()) {
        return Ok(existing);
    }
    let object_id = tx.create_object();
    ctx.bind(
        ContainerRef::Object(object_id.clone()),
        ReactiveNode::Object(obj.clone()),
    );
    for key in obj.keys() {
        if let Some(child) = obj.get(&key) {
            let crdt_value = write_value(tx, ctx, &child)?;
            tx.map_set(&object_id, &key, crdt_value)
                .map_err(|err| BridgeError::WriteFailed(format!("child map_set {object_id:?}.{key}: {err}")))?;
        }
    }
    Ok(object_id)
}

fn materialize_array(tx: &mut Transaction, ctx: &Arc<SyncContext>, arr: &ReactiveArray) -> Result<ArrayId> {
    if let Some(ContainerRef::Array(existing)) = ctx.container_for_node_id(arr.node_id()) {
        return Ok(existing);
    }
    let array_id = tx.create_array();
    ctx.bind(
        ContainerRef::Array(array_id.clone()),
        ReactiveNode::Array(arr.clone()),
    );
    for (index, item) in arr.to_vec().into_iter().enumerate() {
        let crdt_value = write_value(tx, ctx, &item)?;
        tx.list_insert(&array_id, index, crdt_value)
            .map_err(|err| BridgeError::WriteFailed(format!("child list_insert {array_id:?}[{index}]: {err}")))?;
    }
    Ok(array_id)
}

/// Walk a CRDT value's children (if it's a container) and collect every
/// descendant container reference, depth-first. Used by the scheduler to
/// purge pending writes targeting a subtree that's about to be deleted or
/// replaced out from under them.
pub(crate) fn collect_descendants(doc: &Document, value: &JsonValue) -> Vec<ContainerRef> {
    let mut out = Vec::new();
    collect_descendants_into(doc, value, &mut out);
    out
}

fn collect_descendants_into(doc: &Document, value: &JsonValue, out: &mut Vec<ContainerRef>) {
    match value {
        JsonValue::Object(object_id) => {
            out.push(ContainerRef::Object(object_id.clone()));
            for key in doc.object_keys(object_id) {
                if let Some(child) = doc.object_get(object_id, &key) {
                    collect_descendants_into(doc, child, out);
                }
            }
        }
        JsonValue::Array(array_id) => {
            out.push(ContainerRef::Array(array_id.clone()));
            for child in doc.array_to_vec(array_id) {
                collect_descendants_into(doc, &child, out);
            }
        }
        JsonValue::Null
        | JsonValue::Bool(_)
        | JsonValue::Int(_)
        | JsonValue::Float(_)
        | JsonValue::String(_)
        | JsonValue::Text(_) => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mdcs_crdt::{Document, Origin};
    use mdcs_reactive::ReactiveGraph;

    #[test]
    fn apply_materializes_a_nested_object_and_binds_it() {
        let mut doc = Document::new("replica-a");
        let ctx = Arc::new(SyncContext::new(false));
        let graph = ReactiveGraph::new();

        let child = graph.root().set_object("profile");
        child.set("name", ReactiveValue::String("Ada".into()));

        let mut sets = std::collections::HashMap::new();
        sets.insert("profile".to_string(), ReactiveValue::Object(child.clone()));
        let mut map_sets = std::collections::HashMap::new();
        map_sets.insert(ObjectId::root(), sets);

        let snapshot = PendingState {
            map_sets,
            ..PendingState::default()
        };

        doc.transact(Origin::new(), |tx| {
            apply(tx, &ctx, snapshot).unwrap();
        });

        let profile = doc.object_get(&ObjectId::root(), "profile").cloned();
        let profile_id = match profile {
            Some(JsonValue::Object(id)) => id,
            other => panic!("expected a materialized object, got {other:?}"),
        };
        assert_eq!(
            doc.object_get(&profile_id, "name"),
            Some(&JsonValue::String("Ada".into()))
        );
        assert!(ctx.is_materialized(&ContainerRef::Object(profile_id)));
    }

    #[test]
    fn collect_descendants_walks_nested_containers() {
        let mut doc = Document::new("replica-b");
        let root = ObjectId::root();
        let (profile_id, tags_id) = doc.transact(Origin::new(), |tx| {
            let profile_id = tx.create_object();
            tx.map_set(&root, "profile", JsonValue::Object(profile_id.clone()))
                .unwrap();
            let tags_id = tx.create_array();
            tx.map_set(&profile_id, "tags", JsonValue::Array(tags_id.clone()))
                .unwrap();
            tx.list_insert(&tags_id, 0, JsonValue::String("a".into()))
                .unwrap();
            (profile_id, tags_id)
        });

        let descendants = collect_descendants(&doc, &JsonValue::Object(profile_id.clone()));
        assert!(descendants.contains(&ContainerRef::Object(profile_id)));
        assert!(descendants.contains(&ContainerRef::Array(tags_id)));
    }
}
