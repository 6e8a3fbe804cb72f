// File: `crates/mdcs-core/src/lib.rs`
pub mod lattice;
