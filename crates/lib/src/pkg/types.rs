use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::record::RecordError;
use crate::deps::DepsError;
use crate::hash::HashError;
use crate::util::hash::PkgHash;
use crate::value::{Heap, ObjId, Object, Opaque, Value, ValueError};

/// Longest package name accepted, in bytes.
pub const MAX_NAME_LEN: usize = 64;

/// Malformed package fields. Reported at construction or restore time,
/// never coerced.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
  #[error("builder must be a function or nil, got {got}")]
  Builder { got: &'static str },

  #[error("name must be a string or nil, got {got}")]
  NameType { got: &'static str },

  #[error("name must be valid UTF-8")]
  NameEncoding,

  #[error("name {name:?} is too long, must be at most 64 chars")]
  NameTooLong { name: String },

  #[error("name {name:?} contains path separator")]
  NameSeparator { name: String },

  #[error("content must be a string, nil or a struct, got {got}")]
  Content { got: &'static str },

  #[error("{field} must be a tuple, array or nil, got {got}")]
  RefList { field: &'static str, got: &'static str },

  #[error("{field}[{index}] must be a package, got {got}")]
  RefEntry {
    field: &'static str,
    index: usize,
    got: &'static str,
  },

  #[error(transparent)]
  Value(#[from] ValueError),
}

/// Any failure of a package operation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PkgError {
  #[error(transparent)]
  Validation(#[from] ValidationError),

  #[error(transparent)]
  Hash(#[from] HashError),

  #[error(transparent)]
  Deps(#[from] DepsError),

  #[error(transparent)]
  Record(#[from] RecordError),

  #[error("package is already frozen")]
  AlreadyFrozen { hash: Option<PkgHash> },

  #[error("expected a package, got {0}")]
  NotAPackage(&'static str),

  #[error(transparent)]
  Value(#[from] ValueError),
}

/// One of the three dependency-edge lists.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefKind {
  Forced,
  Extra,
  Weak,
}

impl RefKind {
  pub const ALL: [RefKind; 3] = [RefKind::Forced, RefKind::Extra, RefKind::Weak];

  /// The field name used in errors and by [`Package::get`].
  pub fn field(self) -> &'static str {
    match self {
      RefKind::Forced => "force-refs",
      RefKind::Extra => "extra-refs",
      RefKind::Weak => "weak-refs",
    }
  }
}

/// Caller-supplied package fields, as runtime values.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PackageSpec {
  pub builder: Value,
  pub name: Value,
  pub content: Value,
  pub forced_refs: Value,
  pub extra_refs: Value,
  pub weak_refs: Value,
}

impl Default for PackageSpec {
  fn default() -> Self {
    Self {
      builder: Value::Nil,
      name: Value::Nil,
      content: Value::Nil,
      forced_refs: Value::Nil,
      extra_refs: Value::Nil,
      weak_refs: Value::Nil,
    }
  }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Package {
  pub(crate) builder: Option<ObjId>,
  pub(crate) name: Option<String>,
  pub(crate) content: Option<Value>,
  pub(crate) forced_refs: Option<Vec<ObjId>>,
  pub(crate) extra_refs: Option<Vec<ObjId>>,
  pub(crate) weak_refs: Option<Vec<ObjId>>,
  pub(crate) hash: Option<PkgHash>,
  pub(crate) path: Option<String>,
  pub(crate) frozen: bool,
}

impl Package {
  /// Validate `spec` and allocate an unfrozen package in the heap.
  pub fn create(heap: &mut Heap, spec: PackageSpec) -> Result<Value, ValidationError> {
    let package = Self::from_spec(heap, &spec)?;
    Ok(heap.new_opaque(Opaque::Package(package)))
  }

  pub(crate) fn from_spec(heap: &Heap, spec: &PackageSpec) -> Result<Self, ValidationError> {
    Ok(Self {
      builder: check_builder(heap, spec.builder)?,
      name: check_name(heap, spec.name)?,
      content: check_content(spec.content)?,
      forced_refs: check_refs(heap, RefKind::Forced, spec.forced_refs)?,
      extra_refs: check_refs(heap, RefKind::Extra, spec.extra_refs)?,
      weak_refs: check_refs(heap, RefKind::Weak, spec.weak_refs)?,
      hash: None,
      path: None,
      frozen: false,
    })
  }

  /// Check the fields of a package that did not come through
  /// [`Package::create`], such as one deserialized with a heap snapshot.
  pub(crate) fn check_fields(&self, heap: &Heap) -> Result<(), ValidationError> {
    if let Some(id) = self.builder {
      heap.closure(id)?;
    }
    if let Some(name) = &self.name {
      validate_name(name)?;
    }
    match self.content {
      None => {}
      Some(Value::String(id)) => {
        heap.bytes(id)?;
      }
      Some(Value::Struct(id)) => {
        heap.structure(id)?;
      }
      Some(other) => return Err(ValidationError::Content { got: other.type_name() }),
    }
    for kind in RefKind::ALL {
      for (index, id) in self.refs(kind).unwrap_or_default().iter().enumerate() {
        if heap.package(*id).is_err() {
          return Err(ValidationError::RefEntry {
            field: kind.field(),
            index,
            got: heap.object(*id).map_or("dangling handle", Object::kind_name),
          });
        }
      }
    }
    Ok(())
  }

  pub fn builder(&self) -> Option<Value> {
    self.builder.map(Value::Closure)
  }

  pub fn name(&self) -> Option<&str> {
    self.name.as_deref()
  }

  pub fn content(&self) -> Option<Value> {
    self.content
  }

  pub fn refs(&self, kind: RefKind) -> Option<&[ObjId]> {
    match kind {
      RefKind::Forced => self.forced_refs.as_deref(),
      RefKind::Extra => self.extra_refs.as_deref(),
      RefKind::Weak => self.weak_refs.as_deref(),
    }
  }

  pub fn hash(&self) -> Option<&PkgHash> {
    self.hash.as_ref()
  }

  pub fn path(&self) -> Option<&str> {
    self.path.as_deref()
  }

  pub fn is_frozen(&self) -> bool {
    self.frozen
  }

  /// Read a field by its script-facing key, materializing strings and ref
  /// lists as heap values. Unknown keys yield `None`.
  pub fn get(heap: &mut Heap, pkg: Value, key: &str) -> Result<Option<Value>, PkgError> {
    let id = package_id(heap, pkg)?;
    let package = heap.package(id)?.clone();
    let value = match key {
      "hash" => string_or_nil(heap, package.hash().map(PkgHash::as_str)),
      "path" => string_or_nil(heap, package.path()),
      "builder" => package.builder().unwrap_or(Value::Nil),
      "name" => string_or_nil(heap, package.name()),
      "content" => package.content().unwrap_or(Value::Nil),
      "force-refs" => refs_or_nil(heap, package.refs(RefKind::Forced)),
      "extra-refs" => refs_or_nil(heap, package.refs(RefKind::Extra)),
      "weak-refs" => refs_or_nil(heap, package.refs(RefKind::Weak)),
      _ => return Ok(None),
    };
    Ok(Some(value))
  }
}

/// The handle of `value` if it is a package.
pub fn package_id(heap: &Heap, value: Value) -> Result<ObjId, PkgError> {
  match value {
    Value::Opaque(id) if heap.package(id).is_ok() => Ok(id),
    other => Err(PkgError::NotAPackage(other.type_name())),
  }
}

/// Check a package name: at most [`MAX_NAME_LEN`] bytes, no `/`.
pub fn validate_name(name: &str) -> Result<(), ValidationError> {
  if name.len() > MAX_NAME_LEN {
    return Err(ValidationError::NameTooLong { name: name.to_string() });
  }
  if name.contains('/') {
    return Err(ValidationError::NameSeparator { name: name.to_string() });
  }
  Ok(())
}

fn check_builder(heap: &Heap, value: Value) -> Result<Option<ObjId>, ValidationError> {
  match value {
    Value::Nil => Ok(None),
    Value::Closure(id) => {
      heap.closure(id)?;
      Ok(Some(id))
    }
    other => Err(ValidationError::Builder { got: other.type_name() }),
  }
}

fn check_name(heap: &Heap, value: Value) -> Result<Option<String>, ValidationError> {
  match value {
    Value::Nil => Ok(None),
    Value::String(id) => {
      let name = std::str::from_utf8(heap.bytes(id)?).map_err(|_| ValidationError::NameEncoding)?;
      validate_name(name)?;
      Ok(Some(name.to_string()))
    }
    other => Err(ValidationError::NameType { got: other.type_name() }),
  }
}

fn check_content(value: Value) -> Result<Option<Value>, ValidationError> {
  match value {
    Value::Nil => Ok(None),
    Value::String(_) | Value::Struct(_) => Ok(Some(value)),
    other => Err(ValidationError::Content { got: other.type_name() }),
  }
}

fn check_refs(heap: &Heap, kind: RefKind, value: Value) -> Result<Option<Vec<ObjId>>, ValidationError> {
  let items = match value {
    Value::Nil => return Ok(None),
    Value::Tuple(id) => heap.tuple(id)?.items.as_slice(),
    Value::Array(id) => heap.array(id)?,
    other => {
      return Err(ValidationError::RefList {
        field: kind.field(),
        got: other.type_name(),
      });
    }
  };
  items
    .iter()
    .enumerate()
    .map(|(index, item)| match item {
      Value::Opaque(id) if heap.package(*id).is_ok() => Ok(*id),
      other => Err(ValidationError::RefEntry {
        field: kind.field(),
        index,
        got: other.type_name(),
      }),
    })
    .collect::<Result<Vec<_>, _>>()
    .map(Some)
}

pub(crate) fn string_or_nil(heap: &mut Heap, s: Option<&str>) -> Value {
  match s {
    Some(s) => heap.new_string(s),
    None => Value::Nil,
  }
}

pub(crate) fn refs_or_nil(heap: &mut Heap, refs: Option<&[ObjId]>) -> Value {
  match refs {
    Some(refs) => heap.new_tuple(refs.iter().map(|id| Value::Opaque(*id)).collect()),
    None => Value::Nil,
  }
}
