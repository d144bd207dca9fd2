//! Well-known values hashed by name.
//!
//! Recipes commonly capture built-ins of the scripting runtime (the standard
//! library environment, core functions). Hashing those structurally would
//! make every package hash depend on the runtime's internals, so callers
//! register them here and the engine writes `(registry, len, name)` instead.

use crate::value::Value;

#[derive(Debug, Clone, Default)]
pub struct NamedRoots {
  entries: Vec<(Value, String)>,
}

impl NamedRoots {
  pub fn new() -> Self {
    Self::default()
  }

  /// Register `value` under `name`. Registering the same value again
  /// replaces its name.
  pub fn insert(&mut self, value: Value, name: impl Into<String>) {
    let name = name.into();
    match self.entries.iter_mut().find(|(v, _)| *v == value) {
      Some(entry) => entry.1 = name,
      None => self.entries.push((value, name)),
    }
  }

  pub fn len(&self) -> usize {
    self.entries.len()
  }

  pub fn is_empty(&self) -> bool {
    self.entries.is_empty()
  }

  pub fn iter(&self) -> impl Iterator<Item = (Value, &str)> {
    self.entries.iter().map(|(v, n)| (*v, n.as_str()))
  }
}
