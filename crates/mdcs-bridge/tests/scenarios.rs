//! End-to-end scenarios driving a live [`Bridge`] through its public
//! surface and asserting on the document it lands in, rather than on any
//! of the pipeline's internal stages directly.

use mdcs_bridge::{create_bridge, BridgeOptions};
use mdcs_crdt::{Document, JsonValue, Origin};
use mdcs_reactive::ReactiveValue;

/// Flushing is cooperative-scheduler-driven (graph flush, outbound
/// handler, scheduler flush); a handful of yields reliably drains it
/// without pinning to an exact hop count.
async fn settle() {
    for _ in 0..12 {
        tokio::task::yield_now().await;
    }
}

#[tokio::test]
async fn map_set_and_nested_edit_reach_the_document() {
    let bridge = create_bridge(Document::new("replica-1"), BridgeOptions::default());
    let root = bridge.proxy();

    root.set("title", ReactiveValue::String("Notes".into()));
    let profile = root.set_object("profile");
    profile.set("name", ReactiveValue::String("Ada".into()));

    settle().await;

    let snapshot = bridge.document_snapshot();
    assert_eq!(snapshot["title"], "Notes");
    assert_eq!(snapshot["profile"]["name"], "Ada");
}

#[tokio::test]
async fn a_splice_in_the_middle_of_a_list_reaches_the_document() {
    let bridge = create_bridge(Document::new("replica-2"), BridgeOptions::default());
    let items = bridge.proxy().set_array("items");
    for i in 1..=5 {
        items.push(ReactiveValue::Int(i));
    }
    settle().await;

    // Splice out the single middle element and splice two in its place.
    items.remove(2).unwrap();
    items.insert(2, ReactiveValue::Int(97)).unwrap();
    items.insert(3, ReactiveValue::Int(98)).unwrap();
    settle().await;

    let snapshot = bridge.document_snapshot();
    let values: Vec<i64> = snapshot["items"]
        .as_array()
        .unwrap()
        .iter()
        .map(|v| v.as_i64().unwrap())
        .collect();
    assert_eq!(values, vec![1, 2, 97, 98, 4, 5]);
}

#[tokio::test]
async fn a_same_index_replace_lands_as_one_value_swap() {
    let bridge = create_bridge(Document::new("replica-3"), BridgeOptions::default());
    let items = bridge.proxy().set_array("items");
    items.push(ReactiveValue::String("a".into()));
    items.push(ReactiveValue::String("b".into()));
    items.push(ReactiveValue::String("c".into()));
    settle().await;

    items.replace(1, ReactiveValue::String("B".into())).unwrap();
    settle().await;

    let snapshot = bridge.document_snapshot();
    let values: Vec<String> = snapshot["items"]
        .as_array()
        .unwrap()
        .iter()
        .map(|v| v.as_str().unwrap().to_string())
        .collect();
    assert_eq!(values, vec!["a", "B", "c"]);
}

#[tokio::test]
async fn deleting_a_subtree_drops_pending_writes_to_its_descendants() {
    let bridge = create_bridge(Document::new("replica-4"), BridgeOptions::default());
    let root = bridge.proxy();
    let child = root.set_object("doomed");
    settle().await;

    // Both of these land in the same microtask: a field write into the
    // child, and the root deleting the child outright. The field write
    // must not resurrect a tombstoned container.
    child.set("value", ReactiveValue::Int(1));
    root.remove("doomed");
    settle().await;

    let snapshot = bridge.document_snapshot();
    assert!(snapshot.get("doomed").is_none() || snapshot["doomed"].is_null());
}

#[tokio::test]
async fn overwriting_a_container_key_drops_pending_writes_to_the_old_subtree() {
    let bridge = create_bridge(Document::new("replica-4b"), BridgeOptions::default());
    let root = bridge.proxy();
    let team = root.set_object("team");
    let members = team.set_array("members");
    members.push(ReactiveValue::String("m1".into()));
    settle().await;

    // A push into the existing team's members list, and in the same
    // microtask, `team` itself gets overwritten outright (here with a
    // scalar, the simplest possible overwrite). The push targets a subtree
    // that's about to be orphaned wholesale — it must not survive into the
    // transaction that replaces `team`, nor silently resurrect the old
    // `team` object.
    members.push(ReactiveValue::String("m2".into()));
    root.set("team", ReactiveValue::Bool(false));
    settle().await;

    let snapshot = bridge.document_snapshot();
    assert_eq!(snapshot["team"], false);
}

#[tokio::test]
async fn reparenting_an_already_attached_container_is_rejected_and_rolled_back() {
    let bridge = create_bridge(Document::new("replica-5"), BridgeOptions::default());
    let root = bridge.proxy();
    let child = root.set_object("a");
    settle().await;
    assert_eq!(bridge.document_snapshot().get("a").map(|_| ()), Some(()));

    // Attempting to attach the same already-materialized container under a
    // second key is a re-parent, not a copy; it must be rejected and the
    // proxy resynced to the document's actual (pre-batch) state.
    root.set("b", ReactiveValue::Object(child));
    settle().await;

    let snapshot = bridge.document_snapshot();
    assert!(snapshot.get("b").is_none() || snapshot["b"].is_null());
    assert_eq!(bridge.proxy().get("b"), None);
}

#[test]
fn bootstrap_aborts_without_touching_a_non_empty_root() {
    let mut doc = Document::new("replica-6");
    let root_id = doc.root();
    doc.transact(Origin::new(), |tx| {
        tx.map_set(&root_id, "already-here", JsonValue::Bool(true)).unwrap();
    });
    let bridge = create_bridge(doc, BridgeOptions::default());

    let result = bridge.bootstrap(vec![("name".to_string(), ReactiveValue::String("Ada".into()))]);

    assert!(result.is_err());
    assert_eq!(bridge.proxy().get("name"), None);
    assert_eq!(bridge.document_snapshot()["already-here"], true);
}
