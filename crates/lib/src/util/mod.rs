//! Shared utilities.
//!
//! Common utilities used across the crate, currently the package digest type.

pub mod hash;
