//! # mdcs-crdt
//!
//! The CRDT document model consumed by the bridge: an insertion-ordered
//! map/list/leaf-opaque-text node tree, joined under the
//! [`mdcs_core::lattice::Lattice`] semilattice, with a `transact`/
//! deep-observe surface layered on top for the bridge to drive and listen
//! to.
//!
//! ## Example
//!
//! ```rust,ignore
//! use mdcs_crdt::{Document, Origin, JsonValue};
//!
//! let mut doc = Document::new("replica-1");
//! let origin = Origin::new();
//! let mut events = doc.observe();
//!
//! doc.transact(origin, |tx| {
//!     let root = doc_root();
//!     tx.map_set(&root, "name", JsonValue::String("Ada".into()))
//! });
//! ```

pub mod document;
pub mod error;
pub mod json_crdt;
pub mod rga_list;
pub mod rga_text;

// RGA List exports
pub use rga_list::{ListId, ListNode, RGAList, RGAListDelta};

// RGA Text exports
pub use rga_text::{RGAText, RGATextDelta, TextId};

// JSON CRDT exports
pub use json_crdt::{
    ArrayChange, ArrayId, JsonCrdt, JsonCrdtDelta, JsonPath, JsonValue, ObjectChange, ObjectId,
    PathSegment, TextChange, TextRef,
};

// Document exports
pub use document::{Change, ContainerRef, DeepEvent, Document, ListDeltaOp, Origin, Transaction};

// Error exports
pub use error::DbError;
