//! Error types for the reactive proxy graph.

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ReactiveError {
    #[error("index {index} out of bounds (length {length})")]
    IndexOutOfBounds { index: usize, length: usize },

    #[error("key not found: {0}")]
    KeyNotFound(String),
}

pub type Result<T> = std::result::Result<T, ReactiveError>;
