//! Packages: the content-addressed unit of the store.
//!
//! A package is a builder closure plus declared metadata and dependency
//! edges. It lives in the value heap as an opaque object, so packages can
//! reference packages and a parent's hash can splice in its dependencies'
//! hashes.
//!
//! # Lifecycle
//!
//! 1. [`Package::create`] validates caller-supplied fields
//! 2. [`freeze`] hashes `(store root, name, builder)`, derives the store
//!    path and marks the package frozen; it refuses to run twice
//! 3. [`persist`] / [`restore`] move a package across a process boundary,
//!    dropping hash-irrelevant fields once frozen
//!
//! # Submodules
//!
//! - `types` - the package entity, validation and field access
//! - `freeze` - hashing and store path derivation
//! - `record` - the persisted record and its restore-time validation

mod freeze;
mod record;
mod types;

pub use freeze::*;
pub use record::*;
pub use types::*;
