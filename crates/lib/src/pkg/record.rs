//! Persisted package records.
//!
//! A record is the package as eight plain values, in a fixed order. Once a
//! package is frozen its content and ref lists no longer matter and are
//! written as nil. Restoring validates every field again; a record that
//! fails is reported and never half-applied.
//!
//! A [`PackageBundle`] carries its own heap, so restoring one also checks
//! every package object in that heap, not only the recorded one.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use super::freeze::store_path;
use super::types::{Package, PackageSpec, PkgError, RefKind, ValidationError, package_id, refs_or_nil, string_or_nil};
use crate::util::hash::PkgHash;
use crate::value::{Heap, Object, Opaque, Value};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RecordError {
  #[error("cannot restore corrupt package record: {0}")]
  Invalid(#[from] ValidationError),

  #[error("cannot restore corrupt package record: hash must be nil or 40 hex digits, got {got}")]
  BadHash { got: String },

  #[error("cannot restore corrupt package record: path must be nil or a string, got {got}")]
  BadPath { got: &'static str },

  #[error("cannot restore corrupt package record: path without hash")]
  PathWithoutHash,

  #[error("cannot restore corrupt package record: hash without path")]
  HashWithoutPath,

  #[error("cannot restore corrupt package record: path {path:?} does not end with {expected:?}")]
  PathMismatch { path: String, expected: String },

  #[error("cannot restore corrupt package record: frozen record carries {field}")]
  FrozenWithPayload { field: &'static str },

  #[error("cannot restore corrupt package record: frozen flag {frozen} disagrees with hash presence")]
  FrozenMismatch { frozen: bool },
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PackageRecord {
  pub builder: Value,
  pub name: Value,
  pub hash: Value,
  pub path: Value,
  pub content: Value,
  pub forced_refs: Value,
  pub extra_refs: Value,
  pub weak_refs: Value,
}

impl PackageRecord {
  /// The fields in persisted order.
  pub fn fields(&self) -> [Value; 8] {
    [
      self.builder,
      self.name,
      self.hash,
      self.path,
      self.content,
      self.forced_refs,
      self.extra_refs,
      self.weak_refs,
    ]
  }
}

/// Flatten a package into a record, allocating its strings and ref lists
/// in `heap`.
pub fn persist(heap: &mut Heap, pkg: Value) -> Result<PackageRecord, PkgError> {
  let id = package_id(heap, pkg)?;
  let package = heap.package(id)?.clone();

  let builder = package.builder().unwrap_or(Value::Nil);
  let name = string_or_nil(heap, package.name());
  let hash = string_or_nil(heap, package.hash().map(PkgHash::as_str));
  let path = string_or_nil(heap, package.path());

  let record = if package.is_frozen() {
    PackageRecord {
      builder,
      name,
      hash,
      path,
      content: Value::Nil,
      forced_refs: Value::Nil,
      extra_refs: Value::Nil,
      weak_refs: Value::Nil,
    }
  } else {
    PackageRecord {
      builder,
      name,
      hash,
      path,
      content: package.content().unwrap_or(Value::Nil),
      forced_refs: refs_or_nil(heap, package.refs(RefKind::Forced)),
      extra_refs: refs_or_nil(heap, package.refs(RefKind::Extra)),
      weak_refs: refs_or_nil(heap, package.refs(RefKind::Weak)),
    }
  };
  Ok(record)
}

/// Rebuild a package from a record. The package is frozen exactly when the
/// record carries a hash, and a frozen record must have nil content and
/// refs and a path matching its hash and name.
pub fn restore(heap: &mut Heap, record: &PackageRecord) -> Result<Value, PkgError> {
  let spec = PackageSpec {
    builder: record.builder,
    name: record.name,
    content: record.content,
    forced_refs: record.forced_refs,
    extra_refs: record.extra_refs,
    weak_refs: record.weak_refs,
  };
  let mut package = Package::from_spec(heap, &spec).map_err(RecordError::from)?;

  let hash = match record.hash {
    Value::Nil => None,
    value => Some(parse_hash(heap, value)?),
  };
  let path = match record.path {
    Value::Nil => None,
    value => Some(
      heap
        .as_str(value)
        .ok_or(RecordError::BadPath { got: value.type_name() })?
        .to_string(),
    ),
  };
  check_identity(package.name(), hash.as_ref(), path.as_deref())?;
  if hash.is_some() {
    let payload = [
      ("content", record.content),
      (RefKind::Forced.field(), record.forced_refs),
      (RefKind::Extra.field(), record.extra_refs),
      (RefKind::Weak.field(), record.weak_refs),
    ];
    if let Some((field, _)) = payload.into_iter().find(|(_, value)| !value.is_nil()) {
      return Err(RecordError::FrozenWithPayload { field }.into());
    }
  }

  package.frozen = hash.is_some();
  package.hash = hash;
  package.path = path;
  debug!(name = ?package.name(), frozen = package.frozen, "package restored");
  Ok(heap.new_opaque(Opaque::Package(package)))
}

/// Hash and path are both present or both absent, and a path ends in the
/// store layout for its hash and name.
fn check_identity(name: Option<&str>, hash: Option<&PkgHash>, path: Option<&str>) -> Result<(), RecordError> {
  match (hash, path) {
    (None, None) => Ok(()),
    (None, Some(_)) => Err(RecordError::PathWithoutHash),
    (Some(_), None) => Err(RecordError::HashWithoutPath),
    (Some(hash), Some(path)) => {
      let expected = store_path("", hash, name);
      if path.ends_with(&expected) {
        Ok(())
      } else {
        Err(RecordError::PathMismatch {
          path: path.to_string(),
          expected,
        })
      }
    }
  }
}

/// Validate a package object that was deserialized rather than created.
fn check_package(heap: &Heap, package: &Package) -> Result<(), RecordError> {
  package.check_fields(heap)?;
  check_identity(package.name(), package.hash(), package.path())?;
  if package.is_frozen() != package.hash().is_some() {
    return Err(RecordError::FrozenMismatch {
      frozen: package.is_frozen(),
    });
  }
  Ok(())
}

fn parse_hash(heap: &Heap, value: Value) -> Result<PkgHash, RecordError> {
  match value {
    Value::String(_) => {
      let s = heap.as_str(value).unwrap_or_default();
      PkgHash::parse(s).ok_or_else(|| RecordError::BadHash { got: format!("{s:?}") })
    }
    other => Err(RecordError::BadHash {
      got: other.type_name().to_string(),
    }),
  }
}

/// A record together with the heap its values live in, for handing a
/// package to another process.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PackageBundle {
  pub heap: Heap,
  pub record: PackageRecord,
}

impl PackageBundle {
  /// Persist `pkg` and snapshot the heap.
  pub fn capture(heap: &mut Heap, pkg: Value) -> Result<Self, PkgError> {
    let record = persist(heap, pkg)?;
    Ok(Self {
      heap: heap.clone(),
      record,
    })
  }

  /// Restore the package into the bundled heap. Every package object in
  /// the heap is validated first.
  pub fn restore(mut self) -> Result<(Heap, Value), PkgError> {
    for (_, object) in self.heap.iter() {
      if let Object::Opaque(Opaque::Package(package)) = object {
        check_package(&self.heap, package)?;
      }
    }
    let pkg = restore(&mut self.heap, &self.record)?;
    Ok((self.heap, pkg))
  }

  pub fn to_json(&self) -> Result<String, serde_json::Error> {
    serde_json::to_string(self)
  }

  pub fn from_json(s: &str) -> Result<Self, serde_json::Error> {
    serde_json::from_str(s)
  }
}
