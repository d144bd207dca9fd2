//! Store and hashing configuration.
//!
//! Defaults can be overridden from the environment:
//!
//! - `PKGSTORE_ROOT` - the store root prefixed to every package path
//! - `PKGSTORE_HASH_DEPTH` - the recursion ceiling for hashing and
//!   dependency extraction

use tracing::warn;

pub const STORE_ROOT_ENV: &str = "PKGSTORE_ROOT";
pub const HASH_DEPTH_ENV: &str = "PKGSTORE_HASH_DEPTH";

pub const DEFAULT_STORE_ROOT: &str = "/pkgstore";
/// Each level costs a few native frames; the ceiling must stay within a
/// 2 MiB thread stack in unoptimized builds.
pub const DEFAULT_RECURSION_LIMIT: usize = 200;

/// Limits applied while walking a value graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HashConfig {
  /// Deepest nesting of values, defs, environments and frames accepted
  /// before the walk is refused.
  pub recursion_limit: usize,
}

impl Default for HashConfig {
  fn default() -> Self {
    Self {
      recursion_limit: DEFAULT_RECURSION_LIMIT,
    }
  }
}

impl HashConfig {
  pub fn with_recursion_limit(recursion_limit: usize) -> Self {
    Self { recursion_limit }
  }

  /// Read the recursion ceiling from `PKGSTORE_HASH_DEPTH`, falling back to
  /// the default when it is unset or not a positive integer.
  pub fn from_env() -> Self {
    match std::env::var(HASH_DEPTH_ENV) {
      Ok(raw) => match raw.trim().parse::<usize>() {
        Ok(limit) if limit > 0 => Self::with_recursion_limit(limit),
        _ => {
          warn!(value = %raw, "Ignoring invalid {}", HASH_DEPTH_ENV);
          Self::default()
        }
      },
      Err(_) => Self::default(),
    }
  }
}

/// Everything `freeze` needs besides the package itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreConfig {
  pub store_root: String,
  pub hash: HashConfig,
}

impl StoreConfig {
  pub fn new(store_root: impl Into<String>) -> Self {
    Self {
      store_root: store_root.into(),
      hash: HashConfig::default(),
    }
  }

  /// Configuration from the environment, with defaults for anything unset.
  pub fn current() -> Self {
    let store_root = std::env::var(STORE_ROOT_ENV)
      .map(|root| root.trim_end_matches('/').to_string())
      .unwrap_or_else(|_| DEFAULT_STORE_ROOT.to_string());
    Self {
      store_root,
      hash: HashConfig::from_env(),
    }
  }
}
