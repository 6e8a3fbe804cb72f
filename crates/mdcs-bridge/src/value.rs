//! Module A — Type guards and the value converter.
//!
//! Classifies a value on either side of the bridge and converts scalars
//! between the CRDT's `JsonValue` and the reactive graph's `ReactiveValue`.
//! Containers (maps, lists) and collaborative text are never converted by
//! value — they're materialized lazily by Component C and referenced by
//! identity from then on.

use crate::error::{BridgeError, Result};
use mdcs_crdt::JsonValue;
use mdcs_reactive::ReactiveValue;

/// What kind of thing a value is, for dispatch purposes shared by both
/// sides of the bridge.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ValueKind {
    Scalar,
    Container,
    Opaque,
}

pub fn classify_reactive(value: &ReactiveValue) -> ValueKind {
    match value {
        ReactiveValue::Null
        | ReactiveValue::Bool(_)
        | ReactiveValue::Int(_)
        | ReactiveValue::Float(_)
        | ReactiveValue::String(_) => ValueKind::Scalar,
        ReactiveValue::Opaque(_) => ValueKind::Opaque,
        ReactiveValue::Object(_) | ReactiveValue::Array(_) => ValueKind::Container,
    }
}

pub fn classify_crdt(value: &JsonValue) -> ValueKind {
    match value {
        JsonValue::Null
        | JsonValue::Bool(_)
        | JsonValue::Int(_)
        | JsonValue::Float(_)
        | JsonValue::String(_) => ValueKind::Scalar,
        JsonValue::Text(_) => ValueKind::Opaque,
        JsonValue::Object(_) | JsonValue::Array(_) => ValueKind::Container,
    }
}

/// Convert a scalar reactive value into its CRDT counterpart.
///
/// Returns `None` for containers and opaque references, which the write
/// pipeline (Component D) must route through container materialization
/// instead of a plain value write.
pub fn reactive_scalar_to_crdt(value: &ReactiveValue) -> Option<JsonValue> {
    match value {
        ReactiveValue::Null => Some(JsonValue::Null),
        ReactiveValue::Bool(b) => Some(JsonValue::Bool(*b)),
        ReactiveValue::Int(i) => Some(JsonValue::Int(*i)),
        ReactiveValue::Float(f) => Some(JsonValue::Float(*f)),
        ReactiveValue::String(s) => Some(JsonValue::String(s.clone())),
        ReactiveValue::Object(_) | ReactiveValue::Array(_) | ReactiveValue::Opaque(_) => None,
    }
}

/// Convert a scalar CRDT value into its reactive counterpart.
pub fn crdt_scalar_to_reactive(value: &JsonValue) -> Option<ReactiveValue> {
    match value {
        JsonValue::Null => Some(ReactiveValue::Null),
        JsonValue::Bool(b) => Some(ReactiveValue::Bool(*b)),
        JsonValue::Int(i) => Some(ReactiveValue::Int(*i)),
        JsonValue::Float(f) => Some(ReactiveValue::Float(*f)),
        JsonValue::String(s) => Some(ReactiveValue::String(s.clone())),
        JsonValue::Object(_) | JsonValue::Array(_) | JsonValue::Text(_) => None,
    }
}

/// Validate that a reactive value about to be written into the document at
/// `path` isn't a container that is already attached elsewhere in this same
/// document — the document's CRDT collaborator has no concept of moving a
/// container, only of creating one, so re-parenting an already-attached
/// container must be rejected synchronously rather than silently
/// duplicating or corrupting state.
pub fn reject_if_already_attached(
    path: &str,
    value: &ReactiveValue,
    is_attached: impl FnOnce(&ReactiveValue) -> bool,
) -> Result<()> {
    if matches!(value, ReactiveValue::Object(_) | ReactiveValue::Array(_)) && is_attached(value) {
        return Err(BridgeError::ReparentRejected {
            path: path.to_string(),
        });
    }
    Ok(())
}

/// Deep-validate a whole subtree before any part of it is written, so a
/// write either fully succeeds or touches nothing. Containers already
/// attached elsewhere fail the same way `reject_if_already_attached` does;
/// scalars and opaque references always pass.
pub fn validate_subtree(
    path: &str,
    value: &ReactiveValue,
    is_attached: &impl Fn(&ReactiveValue) -> bool,
) -> Result<()> {
    match value {
        ReactiveValue::Object(obj) => {
            reject_if_already_attached(path, value, |v| is_attached(v))?;
            for key in obj.keys() {
                if let Some(child) = obj.get(&key) {
                    validate_subtree(&format!("{path}.{key}"), &child, is_attached)?;
                }
            }
            Ok(())
        }
        ReactiveValue::Array(arr) => {
            reject_if_already_attached(path, value, |v| is_attached(v))?;
            for (i, child) in arr.to_vec().into_iter().enumerate() {
                validate_subtree(&format!("{path}.{i}"), &child, is_attached)?;
            }
            Ok(())
        }
        ReactiveValue::Float(f) if !f.is_finite() => Err(BridgeError::UnconvertibleValue {
            path: path.to_string(),
            reason: format!("{f} is not a finite number"),
        }),
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scalar_round_trip() {
        let v = ReactiveValue::Int(42);
        let crdt = reactive_scalar_to_crdt(&v).unwrap();
        assert_eq!(crdt, JsonValue::Int(42));
        assert_eq!(crdt_scalar_to_reactive(&crdt).unwrap(), v);
    }

    #[test]
    fn containers_are_not_scalar_convertible() {
        let graph = mdcs_reactive::ReactiveGraph::new();
        let obj = graph.root().set_object("child");
        assert!(reactive_scalar_to_crdt(&ReactiveValue::Object(obj)).is_none());
    }

    #[test]
    fn reparenting_an_attached_container_is_rejected() {
        let graph = mdcs_reactive::ReactiveGraph::new();
        let obj = graph.root().set_object("child");
        let value = ReactiveValue::Object(obj);

        let result = reject_if_already_attached("other.path", &value, |_| true);
        assert!(matches!(result, Err(BridgeError::ReparentRejected { .. })));
    }

    #[test]
    fn nan_and_infinite_floats_are_rejected() {
        for f in [f64::NAN, f64::INFINITY, f64::NEG_INFINITY] {
            let result = validate_subtree("x", &ReactiveValue::Float(f), &|_| false);
            assert!(matches!(result, Err(BridgeError::UnconvertibleValue { .. })), "{f} should be rejected");
        }
    }

    #[test]
    fn finite_floats_pass_validation() {
        let result = validate_subtree("x", &ReactiveValue::Float(1.5), &|_| false);
        assert!(result.is_ok());
    }

    #[test]
    fn a_non_finite_float_nested_in_a_container_is_rejected() {
        let graph = mdcs_reactive::ReactiveGraph::new();
        let obj = graph.root().set_object("child");
        obj.set("bad", ReactiveValue::Float(f64::NAN));

        let result = validate_subtree("root", &ReactiveValue::Object(obj), &|_| false);
        assert!(matches!(result, Err(BridgeError::UnconvertibleValue { .. })));
    }
}
