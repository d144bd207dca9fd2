//! pkgstore-lib: content addressing for a reproducible package store
//!
//! This crate provides the core a package store builds identities on:
//! - `value`: the runtime value graph, held in a handle-addressed `Heap`
//! - `hash`: a memoized, cycle-safe structural hash over that graph
//! - `deps`: direct dependency extraction from a package's builder
//! - `pkg`: the `Package` entity, its one-shot `freeze` and persisted record

pub mod config;
pub mod deps;
pub mod hash;
pub mod pkg;
pub mod util;
pub mod value;
