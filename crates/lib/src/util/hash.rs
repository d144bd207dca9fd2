//! Digest types for content-addressed package identity.
//!
//! This module provides:
//! - `PkgHash`: the 40-character hex rendering of a package digest
//! - `DIGEST_LEN` / `HEX_LEN`: the fixed digest sizes used by the store

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Length in bytes of a raw package digest.
pub const DIGEST_LEN: usize = 20;

/// Length in characters of a hex-encoded package digest.
pub const HEX_LEN: usize = DIGEST_LEN * 2;

/// A content-addressed hash identifying a frozen package.
///
/// # Format
///
/// The hash is a lowercase hexadecimal string of exactly [`HEX_LEN`]
/// characters, e.g. `"0a4d55a8d778e5022fab701977c5d840bbc486d0"`.
///
/// Deserializing checks the format, so a tampered snapshot cannot carry a
/// malformed hash.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String")]
pub struct PkgHash(pub String);

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("hash must be 40 lowercase hex characters, got {0:?}")]
pub struct InvalidHash(pub String);

impl PkgHash {
  /// Render a raw digest as a hash.
  pub fn from_digest(digest: &[u8; DIGEST_LEN]) -> Self {
    PkgHash(hex::encode(digest))
  }

  /// Parse an already-rendered hash, rejecting anything that is not
  /// exactly [`HEX_LEN`] lowercase hex characters.
  pub fn parse(s: &str) -> Option<Self> {
    Self::is_valid(s).then(|| PkgHash(s.to_string()))
  }

  pub fn is_valid(s: &str) -> bool {
    s.len() == HEX_LEN && s.bytes().all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b))
  }

  pub fn as_str(&self) -> &str {
    &self.0
  }

  pub fn as_bytes(&self) -> &[u8] {
    self.0.as_bytes()
  }
}

impl TryFrom<String> for PkgHash {
  type Error = InvalidHash;

  fn try_from(s: String) -> Result<Self, Self::Error> {
    if Self::is_valid(&s) { Ok(PkgHash(s)) } else { Err(InvalidHash(s)) }
  }
}

impl std::fmt::Display for PkgHash {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    write!(f, "{}", self.0)
  }
}
