//! # mdcs-bridge
//!
//! Bidirectional bridge between a CRDT document (an insertion-ordered
//! map/list/leaf-opaque-text tree, see [`mdcs_crdt`]) and a reactive
//! observable state graph (see [`mdcs_reactive`]) that exposes ordinary
//! object/array mutation syntax.
//!
//! ## Quick start
//!
//! ```rust,ignore
//! use mdcs_bridge::{create_bridge, BridgeOptions};
//! use mdcs_crdt::Document;
//! use mdcs_reactive::ReactiveValue;
//!
//! let doc = Document::new("replica-1");
//! let bridge = create_bridge(doc, BridgeOptions::default());
//!
//! bridge.proxy().set("title", ReactiveValue::String("Notes".into()));
//! // after one flush, the document's root holds { "title": "Notes" }
//! ```
//!
//! ## Architecture
//!
//! - [`value`] — type guards and the scalar value converter.
//! - [`context`] — the per-bridge identity caches, reconciliation lock, and logger.
//! - [`planner`] — classifies a batch of reactive ops into map/list intents.
//! - [`scheduler`] — accumulates intents per microtask and flushes them into one transaction.
//! - [`applier`] — executes a flush's intents inside an open transaction.
//! - [`reconciler`] — applies inbound document events back onto the reactive graph.
//! - [`bridge`] — wires everything together: materialization and both subscriptions.

pub mod applier;
pub mod bridge;
pub mod context;
pub mod error;
pub mod planner;
pub mod reconciler;
pub mod scheduler;
pub mod value;

pub use bridge::{create_bridge, Bridge, BridgeOptions};
pub use context::{ReactiveNode, SyncContext};
pub use error::{BridgeError, Result};
pub use planner::{plan_list, plan_map, ListIntent, ListIntents, MapIntent, MapIntents};
pub use value::{classify_crdt, classify_reactive, ValueKind};
