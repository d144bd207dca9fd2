use serde::{Deserialize, Serialize};

use crate::pkg::Package;

/// Stable handle to an object in a [`Heap`](super::Heap).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ObjId(pub u32);

impl std::fmt::Display for ObjId {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    write!(f, "#{}", self.0)
  }
}

/// A runtime value reachable from a recipe.
///
/// Reference variants carry the [`ObjId`] of their heap object. `String`,
/// `Symbol` and `Keyword` share the same immutable byte storage and differ
/// only in their tag.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum Value {
  Nil,
  Boolean(bool),
  Number(f64),
  String(ObjId),
  Symbol(ObjId),
  Keyword(ObjId),
  Buffer(ObjId),
  Array(ObjId),
  Tuple(ObjId),
  Table(ObjId),
  Struct(ObjId),
  Closure(ObjId),
  Fiber(ObjId),
  Opaque(ObjId),
}

impl Value {
  pub fn type_name(&self) -> &'static str {
    match self {
      Value::Nil => "nil",
      Value::Boolean(_) => "boolean",
      Value::Number(_) => "number",
      Value::String(_) => "string",
      Value::Symbol(_) => "symbol",
      Value::Keyword(_) => "keyword",
      Value::Buffer(_) => "buffer",
      Value::Array(_) => "array",
      Value::Tuple(_) => "tuple",
      Value::Table(_) => "table",
      Value::Struct(_) => "struct",
      Value::Closure(_) => "function",
      Value::Fiber(_) => "fiber",
      Value::Opaque(_) => "abstract",
    }
  }

  /// The heap handle behind a reference value, `None` for immediates.
  pub fn object_id(&self) -> Option<ObjId> {
    match *self {
      Value::Nil | Value::Boolean(_) | Value::Number(_) => None,
      Value::String(id)
      | Value::Symbol(id)
      | Value::Keyword(id)
      | Value::Buffer(id)
      | Value::Array(id)
      | Value::Tuple(id)
      | Value::Table(id)
      | Value::Struct(id)
      | Value::Closure(id)
      | Value::Fiber(id)
      | Value::Opaque(id) => Some(id),
    }
  }

  pub fn is_nil(&self) -> bool {
    matches!(self, Value::Nil)
  }
}

/// Which tag an immutable byte string carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BytesKind {
  String,
  Symbol,
  Keyword,
}

impl BytesKind {
  pub fn wrap(self, id: ObjId) -> Value {
    match self {
      BytesKind::String => Value::String(id),
      BytesKind::Symbol => Value::Symbol(id),
      BytesKind::Keyword => Value::Keyword(id),
    }
  }
}

/// Immutable ordered sequence with a 16-bit metadata flag (e.g. bracket
/// versus paren syntax in the source language).
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Tuple {
  pub items: Vec<Value>,
  pub flag: u16,
}

/// Mutable key/value mapping with an optional prototype for inherited lookup.
///
/// Entries keep insertion order. Nil keys and nil values are never stored.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Table {
  pub entries: Vec<(Value, Value)>,
  pub proto: Option<ObjId>,
}

/// Immutable key/value mapping.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Struct {
  pub entries: Vec<(Value, Value)>,
}

/// Source position attached to one instruction word.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceMapping {
  pub line: i32,
  pub column: i32,
}

pub const FUNCDEF_FLAG_HASNAME: i32 = 0x80000;
pub const FUNCDEF_FLAG_HASSOURCE: i32 = 0x100000;
pub const FUNCDEF_FLAG_HASDEFS: i32 = 0x200000;
pub const FUNCDEF_FLAG_HASENVS: i32 = 0x400000;
pub const FUNCDEF_FLAG_HASSOURCEMAP: i32 = 0x800000;

/// A compiled code unit. Defs are shared between every closure created from
/// them and may nest other defs.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct FuncDef {
  pub flags: i32,
  pub slot_count: i32,
  pub arity: i32,
  pub min_arity: i32,
  pub max_arity: i32,
  pub constants: Vec<Value>,
  pub bytecode: Vec<u32>,
  /// For each captured environment, the index of the enclosing frame's
  /// environment it comes from.
  pub environments: Option<Vec<i32>>,
  pub defs: Option<Vec<ObjId>>,
  pub name: Option<String>,
  pub source: Option<String>,
  pub sourcemap: Option<Vec<SourceMapping>>,
}

impl FuncDef {
  /// `flags` with one bit set for each optional field that is present.
  pub fn presence_flags(&self) -> i32 {
    let mut flags = self.flags;
    if self.name.is_some() {
      flags |= FUNCDEF_FLAG_HASNAME;
    }
    if self.source.is_some() {
      flags |= FUNCDEF_FLAG_HASSOURCE;
    }
    if self.defs.is_some() {
      flags |= FUNCDEF_FLAG_HASDEFS;
    }
    if self.environments.is_some() {
      flags |= FUNCDEF_FLAG_HASENVS;
    }
    if self.sourcemap.is_some() {
      flags |= FUNCDEF_FLAG_HASSOURCEMAP;
    }
    flags
  }
}

/// Captured variables of a closure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FuncEnv {
  /// Values copied off the stack into their own storage.
  Detached(Vec<Value>),
  /// Values still living in a frame of `fiber`, starting at stack `offset`.
  OnStack { fiber: ObjId, offset: i32, length: i32 },
}

/// A closure: a shared def plus its captured environments.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Closure {
  pub def: ObjId,
  pub envs: Vec<ObjId>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FiberStatus {
  New,
  Pending,
  Alive,
  Dead,
  Error,
}

pub const FIBER_FLAG_HASCHILD: i32 = 1 << 29;
pub const FIBER_FLAG_HASENV: i32 = 1 << 28;
pub const FRAME_FLAG_HASENV: i32 = 1 << 30;

/// One call frame of a suspended computation.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Frame {
  pub flags: i32,
  /// The closure executing in this frame, `None` for a native frame.
  pub func: Option<ObjId>,
  /// Offset of the current instruction within the closure's bytecode.
  pub pc: u32,
  pub env: Option<ObjId>,
  /// Live stack slots owned by this frame.
  pub slots: Vec<Value>,
}

/// A suspended computation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fiber {
  pub flags: i32,
  pub status: FiberStatus,
  /// Call frames, outermost first.
  pub frames: Vec<Frame>,
  /// Fiber-local environment table.
  pub env: Option<ObjId>,
  pub child: Option<ObjId>,
}

impl Fiber {
  pub fn new(status: FiberStatus, frames: Vec<Frame>) -> Self {
    Self {
      flags: 0,
      status,
      frames,
      env: None,
      child: None,
    }
  }
}

/// A compiled pattern matcher. Only its constant pool is visible here.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Pattern {
  pub bytecode: Vec<u32>,
  pub constants: Vec<Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StdStream {
  Stdin,
  Stdout,
  Stderr,
}

pub const PACKAGE_KIND: &str = "pkgstore/pkg";
pub const PATTERN_KIND: &str = "core/peg";
pub const STREAM_KIND: &str = "core/file";

/// A foreign object identified by a registered kind name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Opaque {
  Package(Package),
  Pattern(Pattern),
  Stream(StdStream),
  Foreign { kind: String },
}

impl Opaque {
  pub fn kind_name(&self) -> &str {
    match self {
      Opaque::Package(_) => PACKAGE_KIND,
      Opaque::Pattern(_) => PATTERN_KIND,
      Opaque::Stream(_) => STREAM_KIND,
      Opaque::Foreign { kind } => kind,
    }
  }
}

/// Storage for every reference kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Object {
  Bytes(Vec<u8>),
  Buffer(Vec<u8>),
  Array(Vec<Value>),
  Tuple(Tuple),
  Table(Table),
  Struct(Struct),
  Closure(Closure),
  FuncDef(FuncDef),
  FuncEnv(FuncEnv),
  Fiber(Fiber),
  Opaque(Opaque),
}

impl Object {
  pub fn kind_name(&self) -> &'static str {
    match self {
      Object::Bytes(_) => "string",
      Object::Buffer(_) => "buffer",
      Object::Array(_) => "array",
      Object::Tuple(_) => "tuple",
      Object::Table(_) => "table",
      Object::Struct(_) => "struct",
      Object::Closure(_) => "function",
      Object::FuncDef(_) => "funcdef",
      Object::FuncEnv(_) => "funcenv",
      Object::Fiber(_) => "fiber",
      Object::Opaque(_) => "abstract",
    }
  }
}
