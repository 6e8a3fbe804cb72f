//! Module D.1 — Planner.
//!
//! Classifies a single container's batch of direct-child ops into explicit
//! map/list intents, folding a same-index delete+insert pair into a
//! replace.
//!
//! The reactive collaborator exposes unambiguous method calls (`set`,
//! `remove`, `insert`, `replace`) rather than generic JS-proxy traps, so
//! most of the classification work the traps-based model needs is already
//! done by the caller: an `Insert` is always a genuine insertion and a
//! `Remove` is always a genuine deletion. The one case that still needs
//! folding is `ReactiveArray::replace`, which is implemented as a `remove`
//! immediately followed by an `insert` at the same index — recognizing
//! that pair and turning it into one replace intent is this module's only
//! real job for lists.

use mdcs_reactive::{OpKind, ReactiveValue};
use std::collections::HashMap;

#[derive(Clone, Debug, PartialEq)]
pub enum MapIntent {
    Set(ReactiveValue),
    Delete,
}

#[derive(Default, Debug)]
pub struct MapIntents {
    pub by_key: HashMap<String, MapIntent>,
}

/// Classify a map container's batch of (key, op) pairs. Later ops at the
/// same key override earlier ones, per the spec's map classification rule.
pub fn plan_map(ops: &[(String, OpKind)]) -> MapIntents {
    let mut out = MapIntents::default();
    for (key, kind) in ops {
        match kind {
            OpKind::Set { value } => {
                out.by_key.insert(key.clone(), MapIntent::Set(value.clone()));
            }
            OpKind::Delete => {
                out.by_key.insert(key.clone(), MapIntent::Delete);
            }
            OpKind::Insert { .. } | OpKind::Remove { .. } => {
                // Not applicable to a map target; ignored defensively.
            }
        }
    }
    out
}

#[derive(Clone, Debug, PartialEq)]
pub enum ListIntent {
    Insert(Vec<ReactiveValue>),
    Delete(usize),
    Replace(ReactiveValue),
}

#[derive(Default, Debug)]
pub struct ListIntents {
    pub by_index: HashMap<usize, ListIntent>,
}

/// Classify a list container's batch of (index, op) pairs, given the
/// container's length at the start of the batch (unused directly by this
/// folding rule but threaded through for parity with the spec's signature
/// and for future refinement of the merge threshold — see DESIGN.md).
pub fn plan_list(ops: &[(usize, OpKind)], _length_at_start: usize) -> ListIntents {
    let mut deletes: HashMap<usize, usize> = HashMap::new();
    let mut inserts: HashMap<usize, Vec<ReactiveValue>> = HashMap::new();
    let mut order: Vec<usize> = Vec::new();

    for (index, kind) in ops {
        match kind {
            OpKind::Remove { index: i, count } => {
                *deletes.entry(*i).or_insert(0) += count;
                if !order.contains(i) {
                    order.push(*i);
                }
            }
            OpKind::Insert { index: i, values } => {
                inserts.entry(*i).or_default().extend(values.iter().cloned());
                if !order.contains(i) {
                    order.push(*i);
                }
            }
            OpKind::Set { .. } | OpKind::Delete => {
                // Not applicable to a list target; ignored defensively.
                let _ = index;
            }
        }
    }

    let mut out = ListIntents::default();
    for index in order {
        let delete = deletes.remove(&index);
        let insert = inserts.remove(&index);
        match (delete, insert) {
            (Some(_), Some(mut values)) => {
                // `ReactiveArray::replace` is the only call site that pairs
                // a remove with an insert at the same index, and it always
                // inserts exactly one value — a delete paired with a
                // genuine multi-value insert at the same index can't arise
                // from this crate's write surface (`ReactiveArray` has no
                // public method that emits one), so there's only ever one
                // value here to fold into the replace.
                debug_assert_eq!(
                    values.len(),
                    1,
                    "a delete+insert pair at one index should only come from ReactiveArray::replace"
                );
                out.by_index
                    .insert(index, ListIntent::Replace(values.remove(0)));
            }
            (Some(count), None) => {
                out.by_index.insert(index, ListIntent::Delete(count));
            }
            (None, Some(values)) => {
                out.by_index.insert(index, ListIntent::Insert(values));
            }
            (None, None) => unreachable!("index was recorded without a delete or insert"),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn map_set_then_delete_same_key_collapses_to_delete() {
        let ops = vec![
            ("a".to_string(), OpKind::Set { value: ReactiveValue::Int(1) }),
            ("a".to_string(), OpKind::Delete),
        ];
        let intents = plan_map(&ops);
        assert_eq!(intents.by_key.get("a"), Some(&MapIntent::Delete));
    }

    #[test]
    fn same_index_remove_then_insert_folds_to_replace() {
        let ops = vec![
            (1, OpKind::Remove { index: 1, count: 1 }),
            (1, OpKind::Insert { index: 1, values: vec![ReactiveValue::Int(20)] }),
        ];
        let intents = plan_list(&ops, 3);
        assert_eq!(
            intents.by_index.get(&1),
            Some(&ListIntent::Replace(ReactiveValue::Int(20)))
        );
    }

    #[test]
    fn lone_insert_stays_an_insert() {
        let ops = vec![(1, OpKind::Insert { index: 1, values: vec![ReactiveValue::String("b".into())] })];
        let intents = plan_list(&ops, 2);
        assert_eq!(
            intents.by_index.get(&1),
            Some(&ListIntent::Insert(vec![ReactiveValue::String("b".into())]))
        );
    }
}
