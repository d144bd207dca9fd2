//! Runtime value model.
//!
//! Recipes arrive here already evaluated: a builder closure plus whatever
//! data it captured. This module models that value graph so the hash engine
//! and the dependency extractor can walk it without depending on any
//! particular execution engine.
//!
//! # Layout
//!
//! - [`Value`] is a small `Copy` tagged handle. Immediates (`nil`, booleans,
//!   numbers) are stored inline; everything else points into a [`Heap`].
//! - [`Heap`] is an arena addressed by stable [`ObjId`] handles. Identity
//!   comparisons are handle comparisons, never pointer comparisons.
//! - Immutable objects (strings, tuples, structs) are allocated from
//!   children that already exist, so they cannot refer to themselves.
//!   Mutable objects (arrays, tables, buffers) can be grown after
//!   allocation and may form cycles.

mod heap;
mod types;

pub use heap::*;
pub use types::*;
