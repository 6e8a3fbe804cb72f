//! # mdcs-reactive
//!
//! A minimal reactive proxy graph: ordinary object/array mutation methods
//! that notify subscribers of what changed, batched the way a microtask
//! queue would batch synchronous JS proxy mutations.
//!
//! ## Example
//!
//! ```rust
//! use mdcs_reactive::{ReactiveGraph, ReactiveValue};
//!
//! let graph = ReactiveGraph::new();
//! let mut ops = graph.subscribe();
//!
//! graph.mutate_scope(|| {
//!     graph.root().set("name", ReactiveValue::String("Ada".into()));
//! });
//!
//! let batch = ops.try_recv().unwrap();
//! assert_eq!(batch.len(), 1);
//! ```

mod error;
mod graph;
mod value;

pub use error::{ReactiveError, Result};
pub use graph::ReactiveGraph;
pub use value::{OpKind, OpaqueRef, Op, PathSegment, ReactiveArray, ReactiveObject, ReactiveValue};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_and_remove_batch_together() {
        let graph = ReactiveGraph::new();
        let mut ops = graph.subscribe();

        graph.mutate_scope(|| {
            graph.root().set("a", ReactiveValue::Int(1));
            graph.root().set("b", ReactiveValue::Int(2));
            graph.root().remove("a");
        });

        let batch = ops.try_recv().unwrap();
        assert_eq!(batch.len(), 3);
        assert_eq!(graph.root().get("a"), None);
        assert_eq!(graph.root().get("b"), Some(ReactiveValue::Int(2)));
    }

    #[test]
    fn nested_object_path_is_recorded() {
        let graph = ReactiveGraph::new();
        let mut ops = graph.subscribe();

        graph.mutate_scope(|| {
            let child = graph.root().set_object("profile");
            child.set("name", ReactiveValue::String("Bob".into()));
        });

        let batch = ops.try_recv().unwrap();
        let last = batch.last().unwrap();
        assert_eq!(
            last.path,
            vec![
                PathSegment::Key("profile".into()),
                PathSegment::Key("name".into())
            ]
        );
    }

    #[test]
    fn array_insert_and_remove() {
        let graph = ReactiveGraph::new();
        let mut ops = graph.subscribe();

        graph.mutate_scope(|| {
            let items = graph.root().set_array("items");
            items.push(ReactiveValue::String("one".into()));
            items.push(ReactiveValue::String("two".into()));
            items.remove(0).unwrap();
        });

        let batch = ops.try_recv().unwrap();
        assert_eq!(batch.len(), 4); // set_array + 2 pushes + 1 remove

        let items = match graph.root().get("items") {
            Some(ReactiveValue::Array(a)) => a,
            _ => panic!("expected array"),
        };
        assert_eq!(items.len(), 1);
        assert_eq!(items.get(0), Some(ReactiveValue::String("two".into())));
    }

    #[tokio::test]
    async fn scheduled_flush_coalesces_multiple_synchronous_mutations() {
        let graph = ReactiveGraph::new();
        let mut ops = graph.subscribe();

        graph.root().set("a", ReactiveValue::Int(1));
        graph.root().set("b", ReactiveValue::Int(2));

        // Both mutations land in a single flush even though no explicit
        // mutate_scope was used, because the scheduled flush only runs
        // after the runtime gets a chance to poll it.
        let batch = ops.recv().await.unwrap();
        assert_eq!(batch.len(), 2);
    }
}
