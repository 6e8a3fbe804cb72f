//! Document - the CRDT collaborator consumed by the bridge.
//!
//! Wraps a [`JsonCrdt`] with the two things a bridge needs that a bare
//! lattice doesn't give you: a single atomic `transact` entry point tagged
//! with an [`Origin`], and a deep-observe broadcast stream of the changes
//! each transaction produced.

use crate::error::DbError;
use crate::json_crdt::{ArrayId, JsonCrdt, JsonPath, JsonValue, ObjectId, TextRef};
use mdcs_core::lattice::Lattice;
use std::collections::HashMap;
use tokio::sync::broadcast;
use uuid::Uuid;

/// Opaque token tagging the writer of a transaction.
///
/// Two transactions tagged with the same `Origin` are understood to come
/// from the same writer; a bridge keeps one sentinel `Origin` for every
/// transaction it issues so its own deep-observe handler can recognize and
/// skip its own echo.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Origin(Uuid);

impl Origin {
    /// Mint a fresh, process-unique origin token.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for Origin {
    fn default() -> Self {
        Self::new()
    }
}

/// Reference to a map or list container inside the document.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum ContainerRef {
    Object(ObjectId),
    Array(ArrayId),
}

/// One step of a list's retain/insert/delete delta, in the shape a
/// reconciler consumes directly against a reactive array.
#[derive(Clone, Debug, PartialEq)]
pub enum ListDeltaOp {
    Retain(usize),
    Delete(usize),
    Insert(Vec<JsonValue>),
}

/// The shape of a change to one container, carried by a [`DeepEvent`].
#[derive(Clone, Debug, PartialEq)]
pub enum Change {
    Map {
        updated: Vec<String>,
        removed: Vec<String>,
    },
    List {
        delta: Vec<ListDeltaOp>,
    },
}

/// One container's worth of change, emitted after a transaction commits.
#[derive(Clone, Debug)]
pub struct DeepEvent {
    pub origin: Origin,
    pub container: ContainerRef,
    pub change: Change,
}

/// A live handle into an in-flight transaction.
///
/// Every mutating call both performs the operation against the underlying
/// [`JsonCrdt`] and records the high-level change so the transaction can
/// emit a matching [`DeepEvent`] once it commits. Operations are recorded
/// directly from the call shape rather than reverse-engineered from the
/// CRDT's own replication delta, since the replication delta encodes
/// operations in CRDT-internal terms (origin pointers, tombstone ids) that
/// don't line up 1:1 with the retain/insert/delete shape a reconciler
/// needs.
pub struct Transaction<'a> {
    crdt: &'a mut JsonCrdt,
    touched: Vec<(ContainerRef, Change)>,
    touched_texts: Vec<TextRef>,
}

impl<'a> Transaction<'a> {
    fn new(crdt: &'a mut JsonCrdt) -> Self {
        Self {
            crdt,
            touched: Vec::new(),
            touched_texts: Vec::new(),
        }
    }

    fn note_map_update(&mut self, object_id: ObjectId, key: String) {
        match self
            .touched
            .iter_mut()
            .find(|(c, _)| *c == ContainerRef::Object(object_id.clone()))
        {
            Some((_, Change::Map { updated, .. })) => {
                if !updated.contains(&key) {
                    updated.push(key);
                }
            }
            _ => self.touched.push((
                ContainerRef::Object(object_id),
                Change::Map {
                    updated: vec![key],
                    removed: Vec::new(),
                },
            )),
        }
    }

    fn note_map_remove(&mut self, object_id: ObjectId, key: String) {
        match self
            .touched
            .iter_mut()
            .find(|(c, _)| *c == ContainerRef::Object(object_id.clone()))
        {
            Some((_, Change::Map { removed, .. })) => {
                if !removed.contains(&key) {
                    removed.push(key);
                }
            }
            _ => self.touched.push((
                ContainerRef::Object(object_id),
                Change::Map {
                    updated: Vec::new(),
                    removed: vec![key],
                },
            )),
        }
    }

    fn note_list_op(&mut self, array_id: ArrayId, op: ListDeltaOp) {
        match self
            .touched
            .iter_mut()
            .find(|(c, _)| *c == ContainerRef::Array(array_id.clone()))
        {
            Some((_, Change::List { delta })) => delta.push(op),
            _ => self.touched.push((
                ContainerRef::Array(array_id),
                Change::List { delta: vec![op] },
            )),
        }
    }

    /// Set a field on a map container by key.
    pub fn map_set(
        &mut self,
        object_id: &ObjectId,
        key: &str,
        value: JsonValue,
    ) -> Result<(), DbError> {
        self.crdt.set_in_object(object_id, key, value)?;
        self.note_map_update(object_id.clone(), key.to_string());
        Ok(())
    }

    /// Delete a field on a map container by key.
    pub fn map_delete(&mut self, object_id: &ObjectId, key: &str) -> Result<(), DbError> {
        self.crdt.delete_in_object(object_id, key)?;
        self.note_map_remove(object_id.clone(), key.to_string());
        Ok(())
    }

    /// Insert a value into a list container at `index`.
    pub fn list_insert(
        &mut self,
        array_id: &ArrayId,
        index: usize,
        value: JsonValue,
    ) -> Result<(), DbError> {
        self.crdt.array_insert(array_id, index, value.clone())?;
        let mut ops = Vec::new();
        if index > 0 {
            ops.push(ListDeltaOp::Retain(index));
        }
        ops.push(ListDeltaOp::Insert(vec![value]));
        for op in ops {
            self.note_list_op(array_id.clone(), op);
        }
        Ok(())
    }

    /// Delete the value at `index` in a list container.
    pub fn list_delete(&mut self, array_id: &ArrayId, index: usize) -> Result<(), DbError> {
        self.crdt.array_remove(array_id, index)?;
        if index > 0 {
            self.note_list_op(array_id.clone(), ListDeltaOp::Retain(index));
        }
        self.note_list_op(array_id.clone(), ListDeltaOp::Delete(1));
        Ok(())
    }

    /// Replace the value at `index` in a list container (delete then insert).
    pub fn list_replace(
        &mut self,
        array_id: &ArrayId,
        index: usize,
        value: JsonValue,
    ) -> Result<(), DbError> {
        self.list_delete(array_id, index)?;
        self.list_insert(array_id, index, value)
    }

    /// Create a fresh, empty map container.
    pub fn create_object(&mut self) -> ObjectId {
        self.crdt.create_object()
    }

    /// Create a fresh, empty list container.
    pub fn create_array(&mut self) -> ArrayId {
        self.crdt.create_array()
    }

    /// Create a fresh, empty collaborative text leaf.
    pub fn create_text(&mut self) -> TextRef {
        self.crdt.create_text()
    }

    /// Insert into a collaborative text leaf.
    pub fn text_insert(
        &mut self,
        text_id: &TextRef,
        position: usize,
        text: &str,
    ) -> Result<(), DbError> {
        self.crdt.text_insert(text_id, position, text)?;
        if !self.touched_texts.contains(text_id) {
            self.touched_texts.push(text_id.clone());
        }
        Ok(())
    }

    /// Delete a range from a collaborative text leaf.
    pub fn text_delete(
        &mut self,
        text_id: &TextRef,
        position: usize,
        length: usize,
    ) -> Result<(), DbError> {
        self.crdt.text_delete(text_id, position, length)?;
        if !self.touched_texts.contains(text_id) {
            self.touched_texts.push(text_id.clone());
        }
        Ok(())
    }

    /// Read the document rooted at `path` as plain JSON.
    pub fn get(&self, path: &JsonPath) -> Option<&JsonValue> {
        self.crdt.get(path)
    }

    /// Current length of a list container, as seen mid-transaction.
    pub fn array_len(&self, array_id: &ArrayId) -> usize {
        self.crdt.array_len(array_id).unwrap_or(0)
    }

    /// Value at `index` in a list container, as seen mid-transaction.
    pub fn array_get(&self, array_id: &ArrayId, index: usize) -> Option<&JsonValue> {
        self.crdt.array_get(array_id, index)
    }

    /// Materialize a list container's contents, as seen mid-transaction.
    pub fn array_to_vec(&self, array_id: &ArrayId) -> Vec<JsonValue> {
        self.crdt.array_to_vec(array_id)
    }

    /// Keys of a map container, as seen mid-transaction.
    pub fn object_keys(&self, object_id: &ObjectId) -> Vec<String> {
        self.crdt.object_keys(object_id)
    }

    /// A field's value on a map container, as seen mid-transaction.
    pub fn object_get(&self, object_id: &ObjectId, key: &str) -> Option<&JsonValue> {
        self.crdt.object_get(object_id, key)
    }
}

/// The root CRDT document consumed by the bridge.
pub struct Document {
    crdt: JsonCrdt,
    event_tx: broadcast::Sender<DeepEvent>,
    text_observers: HashMap<TextRef, broadcast::Sender<()>>,
}

impl Document {
    /// Create a new, empty document for the given replica.
    pub fn new(replica_id: impl Into<String>) -> Self {
        let (event_tx, _) = broadcast::channel(1024);
        Self {
            crdt: JsonCrdt::new(replica_id),
            event_tx,
            text_observers: HashMap::new(),
        }
    }

    /// The object id of the document's root map.
    pub fn root(&self) -> ObjectId {
        ObjectId::root()
    }

    /// Run one atomic transaction against the document, tagged with `origin`.
    ///
    /// The closure sees a [`Transaction`] through which every mutation is
    /// routed; once it returns, one [`DeepEvent`] per touched container is
    /// broadcast to subscribers (including, for every touched text leaf, a
    /// matching notification on that leaf's own observer channel).
    pub fn transact<F, R>(&mut self, origin: Origin, f: F) -> R
    where
        F: FnOnce(&mut Transaction) -> R,
    {
        let mut tx = Transaction::new(&mut self.crdt);
        let result = f(&mut tx);
        let touched = std::mem::take(&mut tx.touched);
        let touched_texts = std::mem::take(&mut tx.touched_texts);
        drop(tx);

        for (container, change) in touched {
            let _ = self.event_tx.send(DeepEvent {
                origin,
                container,
                change,
            });
        }
        for text_id in touched_texts {
            if let Some(tx) = self.text_observers.get(&text_id) {
                let _ = tx.send(());
            }
        }

        result
    }

    /// Subscribe to the document's deep-observe event stream.
    pub fn observe(&self) -> broadcast::Receiver<DeepEvent> {
        self.event_tx.subscribe()
    }

    /// Subscribe to mutation notifications for a single collaborative text
    /// leaf. Fires once per transaction that touched the leaf's content.
    pub fn observe_text(&mut self, id: &TextRef) -> broadcast::Receiver<()> {
        self.text_observers
            .entry(id.clone())
            .or_insert_with(|| broadcast::channel(64).0)
            .subscribe()
    }

    /// Read the document rooted at `path` as plain JSON.
    pub fn get(&self, path: &JsonPath) -> Option<&JsonValue> {
        self.crdt.get(path)
    }

    /// Read the current string content of a collaborative text leaf.
    pub fn text_content(&self, id: &TextRef) -> Option<String> {
        self.crdt.text_content(id)
    }

    /// Keys currently present on the root map.
    pub fn keys(&self) -> Vec<String> {
        self.crdt.keys()
    }

    /// Keys currently present on an arbitrary map container.
    pub fn object_keys(&self, object_id: &ObjectId) -> Vec<String> {
        self.crdt.object_keys(object_id)
    }

    /// Read a field's current value on an arbitrary map container.
    pub fn object_get(&self, object_id: &ObjectId, key: &str) -> Option<&JsonValue> {
        self.crdt.object_get(object_id, key)
    }

    /// Whether a field is present on an arbitrary map container.
    pub fn object_has(&self, object_id: &ObjectId, key: &str) -> bool {
        self.crdt.object_has(object_id, key)
    }

    /// Current length of a list container.
    pub fn array_len(&self, array_id: &ArrayId) -> usize {
        self.crdt.array_len(array_id).unwrap_or(0)
    }

    /// Value at `index` in a list container.
    pub fn array_get(&self, array_id: &ArrayId, index: usize) -> Option<&JsonValue> {
        self.crdt.array_get(array_id, index)
    }

    /// Materialize a list container's current contents in order.
    pub fn array_to_vec(&self, array_id: &ArrayId) -> Vec<JsonValue> {
        self.crdt.array_to_vec(array_id)
    }

    /// Render the whole document as a `serde_json::Value` snapshot.
    pub fn to_json(&self) -> serde_json::Value {
        self.crdt.to_json()
    }

    /// Merge another replica's document state into this one (CRDT join).
    /// Remote changes merged this way are not tagged with any particular
    /// transaction's origin, so callers that need echo suppression should
    /// route them through [`Document::transact`] instead.
    pub fn merge(&mut self, other: &Document) {
        self.crdt = self.crdt.join(&other.crdt);
    }
}

/// Applier-facing helpers kept on [`JsonCrdt`] itself would require every
/// caller to resolve a key's parent path; since the bridge always already
/// holds the parent `ObjectId`, these extension methods operate directly
/// against an object id instead of a dotted path.
impl JsonCrdt {
    fn set_in_object(&mut self, object_id: &ObjectId, key: &str, value: JsonValue) -> Result<(), DbError> {
        self.set_field(object_id, key, value)
    }

    fn delete_in_object(&mut self, object_id: &ObjectId, key: &str) -> Result<(), DbError> {
        self.delete_field(object_id, key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::json_crdt::JsonValue;

    #[test]
    fn transact_emits_map_change() {
        let mut doc = Document::new("r1");
        let origin = Origin::new();
        let mut events = doc.observe();

        doc.transact(origin, |tx| {
            let root = ObjectId::root();
            tx.map_set(&root, "name", JsonValue::String("Ada".into()))
                .unwrap();
        });

        let event = events.try_recv().unwrap();
        assert_eq!(event.origin, origin);
        match event.change {
            Change::Map { updated, removed } => {
                assert_eq!(updated, vec!["name".to_string()]);
                assert!(removed.is_empty());
            }
            _ => panic!("expected a map change"),
        }
    }

    #[test]
    fn transact_emits_list_insert_delta() {
        let mut doc = Document::new("r1");
        let origin = Origin::new();
        let array_id = doc.transact(origin, |tx| tx.create_array());

        let mut events = doc.observe();
        doc.transact(origin, |tx| {
            tx.list_insert(&array_id, 0, JsonValue::Int(1)).unwrap();
        });

        let event = events.try_recv().unwrap();
        match event.change {
            Change::List { delta } => {
                assert_eq!(delta, vec![ListDeltaOp::Insert(vec![JsonValue::Int(1)])]);
            }
            _ => panic!("expected a list change"),
        }
    }

    #[test]
    fn text_observer_is_independent_of_deep_observe() {
        let mut doc = Document::new("r1");
        let origin = Origin::new();
        let text_id = doc.transact(origin, |tx| tx.create_text());
        let mut text_events = doc.observe_text(&text_id);

        doc.transact(origin, |tx| {
            tx.text_insert(&text_id, 0, "hi").unwrap();
        });

        assert_eq!(doc.text_content(&text_id), Some("hi".to_string()));
        assert!(text_events.try_recv().is_ok());
    }
}
