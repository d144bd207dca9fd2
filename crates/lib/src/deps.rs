//! Direct dependency extraction.
//!
//! Walks a package's builder closure (constants, nested defs, captured
//! environments) and its three ref lists, collecting every package it
//! reaches. Discovered packages are recorded but never entered, so the
//! result is the package's direct dependencies, not the transitive closure.
//!
//! The walk keeps its own visited set keyed by object handle. Shared
//! substructure is visited once, which keeps diamond-shaped graphs linear.

use std::collections::HashSet;

use thiserror::Error;
use tracing::trace;

use crate::config::HashConfig;
use crate::pkg::RefKind;
use crate::value::{FuncEnv, Heap, ObjId, Opaque, Value, ValueError};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DepsError {
  #[error("recursion limit of {limit} exceeded while collecting dependencies")]
  RecursionLimit { limit: usize },

  #[error("cannot collect dependencies of closure referencing a stack environment")]
  StackEnvironment,

  #[error("closure captures {got} environments but its def declares {expected}")]
  EnvironmentCount { expected: usize, got: usize },

  #[error("cannot collect dependencies through value of type {kind}")]
  Unsupported { kind: &'static str },

  #[error("cannot collect dependencies through abstract value of kind {kind}")]
  UnsupportedOpaque { kind: String },

  #[error("expected a package, got {got}")]
  NotAPackage { got: &'static str },

  #[error("{field}[{index}] is not a package")]
  RefEntry { field: &'static str, index: usize },

  #[error(transparent)]
  Value(#[from] ValueError),
}

/// Packages in first-discovery order, without duplicates.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PackageSet {
  order: Vec<ObjId>,
  members: HashSet<ObjId>,
}

impl PackageSet {
  pub fn new() -> Self {
    Self::default()
  }

  /// Returns `false` if `id` was already present.
  pub fn insert(&mut self, id: ObjId) -> bool {
    if !self.members.insert(id) {
      return false;
    }
    self.order.push(id);
    true
  }

  pub fn contains(&self, id: ObjId) -> bool {
    self.members.contains(&id)
  }

  pub fn len(&self) -> usize {
    self.order.len()
  }

  pub fn is_empty(&self) -> bool {
    self.order.is_empty()
  }

  pub fn iter(&self) -> impl Iterator<Item = ObjId> + '_ {
    self.order.iter().copied()
  }

  /// The members as package values.
  pub fn values(&self) -> impl Iterator<Item = Value> + '_ {
    self.iter().map(Value::Opaque)
  }
}

/// Direct dependencies of `pkg`, with the default recursion ceiling.
pub fn dependencies(heap: &Heap, pkg: Value) -> Result<PackageSet, DepsError> {
  dependencies_with_config(heap, HashConfig::default(), pkg)
}

pub fn dependencies_with_config(heap: &Heap, config: HashConfig, pkg: Value) -> Result<PackageSet, DepsError> {
  let id = match pkg {
    Value::Opaque(id) if heap.package(id).is_ok() => id,
    other => return Err(DepsError::NotAPackage { got: other.type_name() }),
  };
  let package = heap.package(id)?;

  let mut walker = Walker {
    heap,
    limit: config.recursion_limit,
    visited: HashSet::from([id]),
    found: PackageSet::new(),
  };

  if let Some(builder) = package.builder() {
    walker.walk_value(builder, 0)?;
  }
  for kind in RefKind::ALL {
    for (index, dep) in package.refs(kind).into_iter().flatten().enumerate() {
      if heap.package(*dep).is_err() {
        return Err(DepsError::RefEntry {
          field: kind.field(),
          index,
        });
      }
      walker.record(*dep);
    }
  }

  Ok(walker.found)
}

struct Walker<'h> {
  heap: &'h Heap,
  limit: usize,
  visited: HashSet<ObjId>,
  found: PackageSet,
}

impl Walker<'_> {
  fn enter(&self, depth: usize) -> Result<(), DepsError> {
    if depth > self.limit {
      return Err(DepsError::RecursionLimit { limit: self.limit });
    }
    Ok(())
  }

  fn record(&mut self, id: ObjId) {
    if self.found.insert(id) {
      let name = self.heap.package(id).ok().and_then(|pkg| pkg.name());
      trace!(package = %id, name = ?name, "found dependency");
    }
  }

  fn walk_value(&mut self, value: Value, depth: usize) -> Result<(), DepsError> {
    self.enter(depth)?;
    let Some(id) = value.object_id() else {
      return Ok(());
    };
    if !self.visited.insert(id) {
      return Ok(());
    }

    let heap = self.heap;
    match value {
      Value::Nil
      | Value::Boolean(_)
      | Value::Number(_)
      | Value::String(_)
      | Value::Symbol(_)
      | Value::Keyword(_)
      | Value::Buffer(_) => {}
      Value::Array(id) => {
        for item in heap.array(id)? {
          self.walk_value(*item, depth + 1)?;
        }
      }
      Value::Tuple(id) => {
        for item in &heap.tuple(id)?.items {
          self.walk_value(*item, depth + 1)?;
        }
      }
      Value::Table(id) => {
        let table = heap.table(id)?;
        self.walk_entries(&table.entries, depth)?;
        if let Some(proto) = table.proto {
          self.walk_value(Value::Table(proto), depth + 1)?;
        }
      }
      Value::Struct(id) => {
        self.walk_entries(&heap.structure(id)?.entries, depth)?;
      }
      Value::Closure(id) => {
        let closure = heap.closure(id)?;
        let expected = heap.funcdef(closure.def)?.environments.as_ref().map_or(0, Vec::len);
        if closure.envs.len() != expected {
          return Err(DepsError::EnvironmentCount {
            expected,
            got: closure.envs.len(),
          });
        }
        self.walk_def(closure.def, depth + 1)?;
        for env in &closure.envs {
          self.walk_env(*env, depth + 1)?;
        }
      }
      Value::Fiber(_) => return Err(DepsError::Unsupported { kind: "fiber" }),
      Value::Opaque(id) => self.walk_opaque(id, depth)?,
    }
    Ok(())
  }

  fn walk_entries(&mut self, entries: &[(Value, Value)], depth: usize) -> Result<(), DepsError> {
    for (key, value) in entries {
      self.walk_value(*key, depth + 1)?;
      self.walk_value(*value, depth + 1)?;
    }
    Ok(())
  }

  fn walk_def(&mut self, id: ObjId, depth: usize) -> Result<(), DepsError> {
    self.enter(depth)?;
    if !self.visited.insert(id) {
      return Ok(());
    }
    let def = self.heap.funcdef(id)?;
    for constant in &def.constants {
      self.walk_value(*constant, depth + 1)?;
    }
    for nested in def.defs.iter().flatten() {
      self.walk_def(*nested, depth + 1)?;
    }
    Ok(())
  }

  fn walk_env(&mut self, id: ObjId, depth: usize) -> Result<(), DepsError> {
    self.enter(depth)?;
    if !self.visited.insert(id) {
      return Ok(());
    }
    match self.heap.env(id)? {
      FuncEnv::Detached(values) => {
        for value in values {
          self.walk_value(*value, depth + 1)?;
        }
        Ok(())
      }
      FuncEnv::OnStack { .. } => Err(DepsError::StackEnvironment),
    }
  }

  fn walk_opaque(&mut self, id: ObjId, depth: usize) -> Result<(), DepsError> {
    match self.heap.opaque(id)? {
      Opaque::Package(_) => self.record(id),
      Opaque::Pattern(pattern) => {
        for constant in &pattern.constants {
          self.walk_value(*constant, depth + 1)?;
        }
      }
      Opaque::Stream(_) => {}
      Opaque::Foreign { kind } => return Err(DepsError::UnsupportedOpaque { kind: kind.clone() }),
    }
    Ok(())
  }
}
