//! Error types for the bridge.

use thiserror::Error;

/// Errors surfaced by the bridge's public operations.
#[derive(Error, Debug)]
pub enum BridgeError {
    #[error("value at {path} cannot be represented in the CRDT document: {reason}")]
    UnconvertibleValue { path: String, reason: String },

    #[error("value at {path} is already attached elsewhere in the document; re-parenting a CRDT container is not supported")]
    ReparentRejected { path: String },

    #[error("bootstrap was called on a non-empty root; bootstrap only seeds an empty document")]
    BootstrapOnNonEmptyRoot,

    #[error("bridge has already been disposed")]
    AlreadyDisposed,

    #[error("write pipeline failed to apply: {0}")]
    WriteFailed(String),

    #[error(transparent)]
    Crdt(#[from] mdcs_crdt::DbError),

    #[error(transparent)]
    Reactive(#[from] mdcs_reactive::ReactiveError),
}

pub type Result<T> = std::result::Result<T, BridgeError>;
