//! Structural hashing of value graphs.
//!
//! A value graph is serialized into a running SHA-1 digest using a compact
//! tagged wire format (see [`wire`]). Shared and cyclic substructure is
//! encoded once and then referred to by back-reference, and well-known
//! built-ins registered in [`NamedRoots`] are encoded by name instead of by
//! structure.
//!
//! # Submodules
//!
//! - [`wire`] - lead bytes and the variable-length integer encoder
//! - [`roots`] - the named-root table
//! - [`engine`] - the memoized, cycle-safe traversal

pub mod engine;
pub mod roots;
pub mod wire;

pub use engine::{HashCtx, HashError, hash};
pub use roots::NamedRoots;

/// Written first into every digest so hashes from incompatible engine
/// revisions never coincide.
pub const ENGINE_VERSION: &str = "pkgstore-hash/1";
