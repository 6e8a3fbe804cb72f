//! Reactive value types: the plain object/array/leaf graph a mutation
//! op operates against.

use crate::error::{ReactiveError, Result};
use crate::graph::GraphShared;
use parking_lot::RwLock;
use std::sync::{Arc, Weak};

/// A segment in a path from the graph's root to a mutated container.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum PathSegment {
    Key(String),
    Index(usize),
}

/// An opaque leaf handle, e.g. a materialized collaborative-text reference.
/// The reactive graph never inspects its contents; it only stores and
/// forwards the handle.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct OpaqueRef(String);

impl OpaqueRef {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn id(&self) -> &str {
        &self.0
    }
}

/// A value held by a reactive object field or array slot.
#[derive(Clone, Debug, PartialEq)]
pub enum ReactiveValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    Opaque(OpaqueRef),
    Object(ReactiveObject),
    Array(ReactiveArray),
}

/// What changed at one path.
#[derive(Clone, Debug, PartialEq)]
pub enum OpKind {
    Set { value: ReactiveValue },
    Delete,
    Insert { index: usize, values: Vec<ReactiveValue> },
    Remove { index: usize, count: usize },
}

/// One mutation, tagged with the path (from the graph root) and the
/// identity of the container it happened in.
///
/// `container_id` lets a consumer (like a bridge) group a batch by which
/// node was mutated without re-deriving it from `path`, which matters for
/// a node that hasn't been bound to anything external yet — its identity
/// still exists (it's a real node in this graph) even before any path
/// lookup could find it.
#[derive(Clone, Debug, PartialEq)]
pub struct Op {
    pub container_id: usize,
    pub path: Vec<PathSegment>,
    pub kind: OpKind,
}

struct ObjectInner {
    path: Vec<PathSegment>,
    fields: Vec<(String, ReactiveValue)>,
    graph: Weak<GraphShared>,
}

/// An ordinary mutable map node in the reactive graph.
///
/// Mutations are ordinary method calls — `set`/`remove` — not a special
/// proxy-trap API; Rust has no implicit property-assignment hook, so the
/// ergonomic surface the spec's reactive proxy gives JS callers is
/// approximated here with plain methods instead.
#[derive(Clone)]
pub struct ReactiveObject(Arc<RwLock<ObjectInner>>);

impl PartialEq for ReactiveObject {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl std::fmt::Debug for ReactiveObject {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ReactiveObject(path={:?})", self.0.read().path)
    }
}

impl ReactiveObject {
    pub(crate) fn new(graph: Weak<GraphShared>, path: Vec<PathSegment>) -> Self {
        Self(Arc::new(RwLock::new(ObjectInner {
            path,
            fields: Vec::new(),
            graph,
        })))
    }

    pub fn path(&self) -> Vec<PathSegment> {
        self.0.read().path.clone()
    }

    /// A stable identity for this node, suitable as a hash map key for
    /// callers (like a bridge) that need to associate external state with
    /// a specific object instance rather than its current contents.
    pub fn node_id(&self) -> usize {
        Arc::as_ptr(&self.0) as *const () as usize
    }

    pub fn get(&self, key: &str) -> Option<ReactiveValue> {
        self.0
            .read()
            .fields
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.clone())
    }

    pub fn keys(&self) -> Vec<String> {
        self.0.read().fields.iter().map(|(k, _)| k.clone()).collect()
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.0.read().fields.iter().any(|(k, _)| k == key)
    }

    /// Set a field, returning whatever value previously occupied `key` (if
    /// any) so a caller that needs to undo this exact call — the bridge's
    /// validation-rollback path is the motivating case — doesn't have to
    /// read the field back out under a race with a concurrent mutation.
    pub fn set(&self, key: impl Into<String>, value: ReactiveValue) -> Option<ReactiveValue> {
        let key = key.into();
        let (previous, path, graph) = {
            let mut inner = self.0.write();
            let previous = if let Some(existing) = inner.fields.iter_mut().find(|(k, _)| *k == key) {
                Some(std::mem::replace(&mut existing.1, value.clone()))
            } else {
                inner.fields.push((key.clone(), value.clone()));
                None
            };
            (previous, inner.path.clone(), inner.graph.clone())
        };
        if let Some(g) = graph.upgrade() {
            let mut p = path;
            p.push(PathSegment::Key(key));
            g.push_op(Op {
                container_id: self.node_id(),
                path: p,
                kind: OpKind::Set { value },
            });
        }
        previous
    }

    pub fn remove(&self, key: &str) -> Option<ReactiveValue> {
        let (removed, path, graph) = {
            let mut inner = self.0.write();
            let pos = inner.fields.iter().position(|(k, _)| k == key);
            let removed = pos.map(|i| inner.fields.remove(i).1);
            (removed, inner.path.clone(), inner.graph.clone())
        };
        if removed.is_some() {
            if let Some(g) = graph.upgrade() {
                let mut p = path;
                p.push(PathSegment::Key(key.to_string()));
                g.push_op(Op {
                    container_id: self.node_id(),
                    path: p,
                    kind: OpKind::Delete,
                });
            }
        }
        removed
    }

    /// Set a field without emitting an `Op`.
    ///
    /// For trusted internal callers — a bridge's validation-rollback path
    /// is the motivating case — that need to undo a mutation already made
    /// through `set`/`remove` without re-entering the normal op-emission
    /// pipeline a second time.
    pub fn set_silent(&self, key: impl Into<String>, value: ReactiveValue) {
        let key = key.into();
        let mut inner = self.0.write();
        if let Some(existing) = inner.fields.iter_mut().find(|(k, _)| *k == key) {
            existing.1 = value;
        } else {
            inner.fields.push((key, value));
        }
    }

    /// Remove a field without emitting an `Op`. See [`Self::set_silent`].
    pub fn remove_silent(&self, key: &str) {
        let mut inner = self.0.write();
        if let Some(pos) = inner.fields.iter().position(|(k, _)| k == key) {
            inner.fields.remove(pos);
        }
    }

    /// Create and attach a fresh child map under `key`.
    pub fn set_object(&self, key: impl Into<String>) -> ReactiveObject {
        let key = key.into();
        let (parent_path, graph) = {
            let inner = self.0.read();
            (inner.path.clone(), inner.graph.clone())
        };
        let mut child_path = parent_path;
        child_path.push(PathSegment::Key(key.clone()));
        let child = ReactiveObject::new(graph, child_path);
        self.set(key, ReactiveValue::Object(child.clone()));
        child
    }

    /// Create and attach a fresh child array under `key`.
    pub fn set_array(&self, key: impl Into<String>) -> ReactiveArray {
        let key = key.into();
        let (parent_path, graph) = {
            let inner = self.0.read();
            (inner.path.clone(), inner.graph.clone())
        };
        let mut child_path = parent_path;
        child_path.push(PathSegment::Key(key.clone()));
        let child = ReactiveArray::new(graph, child_path);
        self.set(key, ReactiveValue::Array(child.clone()));
        child
    }
}

struct ArrayInner {
    path: Vec<PathSegment>,
    items: Vec<ReactiveValue>,
    graph: Weak<GraphShared>,
}

/// An ordinary mutable list node in the reactive graph.
#[derive(Clone)]
pub struct ReactiveArray(Arc<RwLock<ArrayInner>>);

impl PartialEq for ReactiveArray {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl std::fmt::Debug for ReactiveArray {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ReactiveArray(path={:?})", self.0.read().path)
    }
}

impl ReactiveArray {
    pub(crate) fn new(graph: Weak<GraphShared>, path: Vec<PathSegment>) -> Self {
        Self(Arc::new(RwLock::new(ArrayInner {
            path,
            items: Vec::new(),
            graph,
        })))
    }

    pub fn path(&self) -> Vec<PathSegment> {
        self.0.read().path.clone()
    }

    /// A stable identity for this node; see [`ReactiveObject::node_id`].
    pub fn node_id(&self) -> usize {
        Arc::as_ptr(&self.0) as *const () as usize
    }

    pub fn len(&self) -> usize {
        self.0.read().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get(&self, index: usize) -> Option<ReactiveValue> {
        self.0.read().items.get(index).cloned()
    }

    pub fn to_vec(&self) -> Vec<ReactiveValue> {
        self.0.read().items.clone()
    }

    pub fn push(&self, value: ReactiveValue) {
        let len = self.len();
        let _ = self.insert(len, value);
    }

    pub fn insert(&self, index: usize, value: ReactiveValue) -> Result<()> {
        let (path, graph) = {
            let mut inner = self.0.write();
            if index > inner.items.len() {
                return Err(ReactiveError::IndexOutOfBounds {
                    index,
                    length: inner.items.len(),
                });
            }
            inner.items.insert(index, value.clone());
            (inner.path.clone(), inner.graph.clone())
        };
        if let Some(g) = graph.upgrade() {
            g.push_op(Op {
                container_id: self.node_id(),
                path,
                kind: OpKind::Insert {
                    index,
                    values: vec![value],
                },
            });
        }
        Ok(())
    }

    pub fn remove(&self, index: usize) -> Result<ReactiveValue> {
        let (removed, path, graph) = {
            let mut inner = self.0.write();
            if index >= inner.items.len() {
                return Err(ReactiveError::IndexOutOfBounds {
                    index,
                    length: inner.items.len(),
                });
            }
            let removed = inner.items.remove(index);
            (removed, inner.path.clone(), inner.graph.clone())
        };
        if let Some(g) = graph.upgrade() {
            g.push_op(Op {
                container_id: self.node_id(),
                path,
                kind: OpKind::Remove { index, count: 1 },
            });
        }
        Ok(removed)
    }

    pub fn replace(&self, index: usize, value: ReactiveValue) -> Result<ReactiveValue> {
        let old = self.remove(index)?;
        self.insert(index, value)?;
        Ok(old)
    }

    /// Replace the entire contents without emitting an `Op`. See
    /// [`ReactiveObject::set_silent`].
    pub fn splice_silent(&self, new_items: Vec<ReactiveValue>) {
        self.0.write().items = new_items;
    }
}
