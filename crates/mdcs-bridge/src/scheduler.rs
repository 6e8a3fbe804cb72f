//! Module D.2 — Scheduler.
//!
//! Accumulates planner intents into five per-target maps (mirroring the
//! spec's naming: map-sets, map-deletes, list-sets, list-deletes,
//! list-replaces, each keyed by target container) and flushes them into
//! one CRDT transaction per microtask.
//!
//! The scheduler itself only holds the pending maps and the
//! flush-scheduled guard; it has no reference to the document, the
//! context, or the reactive graph. [`schedule_flush`] is a free function
//! that ties those together, the same separation `mdcs-reactive`'s own
//! `GraphShared` keeps between "what changed" and "who flushes it" — this
//! avoids a reference cycle between the scheduler (owned by the context)
//! and the context/document the flush needs to touch.

use crate::applier;
use crate::context::SyncContext;
use crate::planner::{MapIntent, ListIntent};
use mdcs_crdt::{ArrayId, Document, ObjectId, Origin};
use mdcs_reactive::ReactiveValue;
use parking_lot::Mutex as SyncMutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

#[derive(Default)]
pub(crate) struct PendingState {
    pub map_sets: HashMap<ObjectId, HashMap<String, ReactiveValue>>,
    pub map_deletes: HashMap<ObjectId, Vec<String>>,
    pub list_sets: HashMap<ArrayId, HashMap<usize, Vec<ReactiveValue>>>,
    pub list_deletes: HashMap<ArrayId, HashMap<usize, usize>>,
    pub list_replaces: HashMap<ArrayId, HashMap<usize, ReactiveValue>>,
}

impl PendingState {
    fn is_empty(&self) -> bool {
        self.map_sets.is_empty()
            && self.map_deletes.is_empty()
            && self.list_sets.is_empty()
            && self.list_deletes.is_empty()
            && self.list_replaces.is_empty()
    }
}

pub struct Scheduler {
    state: SyncMutex<PendingState>,
    flush_scheduled: AtomicBool,
}

impl Scheduler {
    pub fn new() -> Self {
        Self {
            state: SyncMutex::new(PendingState::default()),
            flush_scheduled: AtomicBool::new(false),
        }
    }

    /// Fold a map container's planned intents into the pending maps,
    /// applying the dedup-on-enqueue rule: a set clears any pending delete
    /// for the same key and vice versa.
    pub fn enqueue_map(&self, object_id: ObjectId, intents: HashMap<String, MapIntent>) {
        let mut state = self.state.lock();
        for (key, intent) in intents {
            match intent {
                MapIntent::Set(value) => {
                    state
                        .map_deletes
                        .get_mut(&object_id)
                        .map(|d| d.retain(|k| k != &key));
                    state
                        .map_sets
                        .entry(object_id.clone())
                        .or_default()
                        .insert(key, value);
                }
                MapIntent::Delete => {
                    state
                        .map_sets
                        .get_mut(&object_id)
                        .map(|s| s.remove(&key));
                    let deletes = state.map_deletes.entry(object_id.clone()).or_default();
                    if !deletes.contains(&key) {
                        deletes.push(key);
                    }
                }
            }
        }
    }

    /// Fold a list container's planned intents into the pending maps.
    pub fn enqueue_list(&self, array_id: ArrayId, intents: HashMap<usize, ListIntent>) {
        let mut state = self.state.lock();
        for (index, intent) in intents {
            match intent {
                ListIntent::Insert(values) => {
                    state
                        .list_sets
                        .entry(array_id.clone())
                        .or_default()
                        .insert(index, values);
                }
                ListIntent::Delete(count) => {
                    state
                        .list_deletes
                        .entry(array_id.clone())
                        .or_default()
                        .insert(index, count);
                }
                ListIntent::Replace(value) => {
                    state
                        .list_replaces
                        .entry(array_id.clone())
                        .or_default()
                        .insert(index, value);
                }
            }
        }
    }

    fn take_snapshot(&self) -> PendingState {
        std::mem::take(&mut *self.state.lock())
    }

    fn has_pending(&self) -> bool {
        !self.state.lock().is_empty()
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

/// Schedule a flush on the Tokio cooperative scheduler, the same
/// AtomicBool-guarded `tokio::spawn` + `yield_now` pattern
/// `mdcs-reactive`'s `GraphShared` uses, so every mutation made within one
/// synchronous execution region lands in a single flush.
pub fn schedule_flush(ctx: Arc<SyncContext>, doc: Arc<SyncMutex<Document>>, origin: Origin) {
    if ctx.scheduler.flush_scheduled.swap(true, Ordering::SeqCst) {
        return;
    }
    tokio::spawn(async move {
        tokio::task::yield_now().await;
        ctx.scheduler.flush_scheduled.store(false, Ordering::SeqCst);
        flush(&ctx, &doc, origin);
    });
}

/// Run one flush: snapshot the pending maps, purge stale descendant
/// writes, open one sentinel-tagged transaction, and apply everything
/// through the applier.
///
/// Re-entrant enqueues (a post-bind hook mutating the reactive graph)
/// land in the *next* batch because the snapshot is taken up front and the
/// scheduler's maps are free again before the transaction's post-apply
/// work runs.
pub fn flush(ctx: &Arc<SyncContext>, doc: &Arc<SyncMutex<Document>>, origin: Origin) {
    if !ctx.scheduler.has_pending() {
        return;
    }
    let mut snapshot = ctx.scheduler.take_snapshot();

    let mut doc = doc.lock();
    merge_conservative_pass(&mut snapshot);
    purge_descendants(&mut snapshot, &doc);

    doc.transact(origin, |tx| {
        if let Err(err) = applier::apply(tx, ctx, snapshot) {
            ctx.logger.error(format!("flush aborted: {err}"));
        }
    });
}

/// Upgrade same-index delete+set pairs left over in the snapshot (from ops
/// enqueued across separate batches within the same microtask, rather than
/// already folded by the planner) into a replace, and resolve any
/// remaining delete/set vs. replace collisions at the same index by
/// dropping the delete or set — a replace always wins.
fn merge_conservative_pass(state: &mut PendingState) {
    let array_ids: Vec<ArrayId> = state
        .list_sets
        .keys()
        .chain(state.list_deletes.keys())
        .cloned()
        .collect::<std::collections::HashSet<_>>()
        .into_iter()
        .collect();

    for array_id in array_ids {
        let shared_indices: Vec<usize> = match (
            state.list_sets.get(&array_id),
            state.list_deletes.get(&array_id),
        ) {
            (Some(sets), Some(deletes)) => sets
                .keys()
                .filter(|i| deletes.contains_key(i))
                .cloned()
                .collect(),
            _ => Vec::new(),
        };
        for index in shared_indices {
            let values = state
                .list_sets
                .get_mut(&array_id)
                .and_then(|sets| sets.remove(&index));
            if let Some(mut values) = values {
                state
                    .list_deletes
                    .get_mut(&array_id)
                    .map(|deletes| deletes.remove(&index));
                if values.len() == 1 {
                    state
                        .list_replaces
                        .entry(array_id.clone())
                        .or_default()
                        .insert(index, values.remove(0));
                } else {
                    state
                        .list_sets
                        .entry(array_id.clone())
                        .or_default()
                        .insert(index, values);
                }
            }
        }
    }

    let replace_indices: Vec<(ArrayId, usize)> = state
        .list_replaces
        .iter()
        .flat_map(|(id, by_index)| by_index.keys().map(move |i| (id.clone(), *i)))
        .collect();
    for (array_id, index) in replace_indices {
        if let Some(deletes) = state.list_deletes.get_mut(&array_id) {
            deletes.remove(&index);
        }
        if let Some(sets) = state.list_sets.get_mut(&array_id) {
            sets.remove(&index);
        }
    }
}

/// For each scheduled delete, replace, or container-overwriting set at
/// (container, i), if the current value at that slot is itself a
/// container, purge every pending write targeting one of its descendants
/// from the snapshot. Preserves the invariant that a subtree about to
/// disappear — whether deleted outright or overwritten by a plain
/// `map_set`/`list_replace` targeting the same slot — never contributes
/// writes to the transaction that removes it.
fn purge_descendants(state: &mut PendingState, doc: &Document) {
    let mut victims: Vec<(ArrayId, usize)> = state
        .list_deletes
        .iter()
        .flat_map(|(id, by_index)| by_index.keys().map(move |i| (id.clone(), *i)))
        .collect();
    victims.extend(
        state
            .list_replaces
            .iter()
            .flat_map(|(id, by_index)| by_index.keys().map(move |i| (id.clone(), *i))),
    );

    let mut map_victims: Vec<(ObjectId, String)> = state
        .map_deletes
        .iter()
        .flat_map(|(id, keys)| keys.iter().map(move |k| (id.clone(), k.clone())))
        .collect();

    // A `map_set` that overwrites a key currently holding a container is a
    // replace, not an in-place update — the container it displaces is
    // orphaned exactly as if the key had been deleted, so its descendants'
    // pending writes must be purged the same way.
    map_victims.extend(state.map_sets.iter().flat_map(|(id, sets)| {
        sets.keys()
            .filter(|key| {
                matches!(
                    doc.object_get(id, key),
                    Some(mdcs_crdt::JsonValue::Object(_)) | Some(mdcs_crdt::JsonValue::Array(_))
                )
            })
            .map(move |key| (id.clone(), key.clone()))
    }));

    let mut purge_one = |state: &mut PendingState, value: &mdcs_crdt::JsonValue| {
        for descendant in crate::applier::collect_descendants(doc, value) {
            match descendant {
                mdcs_crdt::ContainerRef::Object(id) => {
                    state.map_sets.remove(&id);
                    state.map_deletes.remove(&id);
                }
                mdcs_crdt::ContainerRef::Array(id) => {
                    state.list_sets.remove(&id);
                    state.list_deletes.remove(&id);
                    state.list_replaces.remove(&id);
                }
            }
        }
    };

    for (object_id, key) in map_victims {
        if let Some(value) = doc.object_get(&object_id, &key) {
            purge_one(state, value);
        }
    }

    for (array_id, index) in victims {
        let Some(value) = doc.array_get(&array_id, index) else {
            continue;
        };
        purge_one(state, value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::planner::{ListIntent, MapIntent};

    #[test]
    fn map_set_clears_pending_delete_for_same_key() {
        let scheduler = Scheduler::new();
        let object_id = ObjectId::root();
        let mut deletes = HashMap::new();
        deletes.insert("a".to_string(), MapIntent::Delete);
        scheduler.enqueue_map(object_id.clone(), deletes);

        let mut sets = HashMap::new();
        sets.insert("a".to_string(), MapIntent::Set(ReactiveValue::Int(1)));
        scheduler.enqueue_map(object_id.clone(), sets);

        let snapshot = scheduler.take_snapshot();
        assert!(snapshot.map_deletes.get(&object_id).map(|d| d.is_empty()).unwrap_or(true));
        assert_eq!(
            snapshot.map_sets.get(&object_id).and_then(|s| s.get("a")),
            Some(&ReactiveValue::Int(1))
        );
    }

    #[test]
    fn list_intents_accumulate_per_index() {
        let scheduler = Scheduler::new();
        let array_id = ArrayId::new();
        let mut intents = HashMap::new();
        intents.insert(0, ListIntent::Insert(vec![ReactiveValue::Int(1)]));
        intents.insert(1, ListIntent::Delete(1));
        scheduler.enqueue_list(array_id.clone(), intents);

        let snapshot = scheduler.take_snapshot();
        assert!(snapshot.list_sets.contains_key(&array_id));
        assert!(snapshot.list_deletes.contains_key(&array_id));
    }

    #[test]
    fn a_map_set_overwriting_a_container_key_purges_the_old_subtrees_pending_writes() {
        use mdcs_crdt::{JsonValue, Origin};

        let mut doc = Document::new("replica-purge");
        let root = ObjectId::root();
        let (team_id, members_id) = doc.transact(Origin::new(), |tx| {
            let team_id = tx.create_object();
            tx.map_set(&root, "team", JsonValue::Object(team_id.clone())).unwrap();
            let members_id = tx.create_array();
            tx.map_set(&team_id, "members", JsonValue::Array(members_id.clone()))
                .unwrap();
            (team_id, members_id)
        });

        // A push into `team.members` lands as a pending list_set...
        let mut state = PendingState::default();
        state
            .list_sets
            .entry(members_id.clone())
            .or_default()
            .insert(0, vec![ReactiveValue::String("m2".into())]);
        // ...and in the same microtask, `root.team` is overwritten outright.
        state
            .map_sets
            .entry(root.clone())
            .or_default()
            .insert("team".to_string(), ReactiveValue::Null);

        purge_descendants(&mut state, &doc);

        assert!(
            !state.list_sets.contains_key(&members_id),
            "the old team's members array must not receive the pending push"
        );
        // The overwriting set itself survives — only the orphaned subtree's
        // writes are dropped.
        assert!(state.map_sets.get(&root).unwrap().contains_key("team"));
        let _ = team_id;
    }
}
