//! The memoized, cycle-safe structural hasher.
//!
//! One [`HashCtx`] lives for one top-level hash. It owns three memo tables:
//!
//! - values: every reference-kind value gets a sequential id the first
//!   time it is serialized; later visits write `(reference, id)`
//! - function defs: keyed by def handle, `(def-ref, index)`
//! - environments: keyed by env handle, `(env-ref, index)`
//!
//! Strings, tuples and structs are memoized by content (through an interned
//! shape id), everything else by identity. Integral numbers are written
//! inline and never memoized.
//!
//! # Ordering
//!
//! - mutable containers (arrays, tables, buffers, fibers) are registered
//!   before their children, which is what lets cycles terminate
//! - tuples and structs are registered after their children
//! - closures write their def, then register, then write their envs
//! - table and struct entries are written in canonical key order

use std::collections::HashMap;
use std::collections::hash_map::Entry;

use sha1::{Digest, Sha1};
use thiserror::Error;

use super::ENGINE_VERSION;
use super::roots::NamedRoots;
use super::wire::{Encoder, Lead};
use crate::config::HashConfig;
use crate::util::hash::{DIGEST_LEN, PkgHash};
use crate::value::{
  BytesKind, FIBER_FLAG_HASCHILD, FIBER_FLAG_HASENV, FRAME_FLAG_HASENV, FiberStatus, FuncEnv, Heap, ObjId, Opaque,
  Value, ValueError,
};

/// Reasons a value graph cannot be hashed. None of these are retried: the
/// same graph always fails the same way.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HashError {
  #[error("recursion limit of {limit} exceeded while hashing")]
  RecursionLimit { limit: usize },

  #[error("cannot hash closure referencing current fiber frame")]
  LiveStackEnvironment,

  #[error("stack environment offset {offset} must be positive")]
  MalformedEnvironment { offset: i32 },

  #[error("closure captures {got} environments but its def declares {expected}")]
  EnvironmentCount { expected: usize, got: usize },

  #[error("cannot hash alive fiber")]
  AliveFiber,

  #[error("cannot hash fiber with native stack frame")]
  NativeFrame,

  #[error("frame pc {pc} is outside its function's {len} instructions")]
  PcOutOfRange { pc: u32, len: usize },

  #[error("unable to hash abstract value of kind {kind}")]
  UnsupportedOpaque { kind: String },

  #[error("package {name} does not have computed hash")]
  UnhashedPackage { name: String },

  #[error("length {0} does not fit the hash wire format")]
  LengthOverflow(usize),

  #[error(transparent)]
  Value(#[from] ValueError),
}

/// Identity of a value for memoization and named-root lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum MemoKey {
  Nil,
  Boolean(bool),
  Int(i32),
  Real(u64),
  Shape(u32),
  Object(ObjId),
}

impl MemoKey {
  /// Immediates are written inline and never enter the memo.
  fn is_reference(self) -> bool {
    matches!(self, MemoKey::Real(_) | MemoKey::Shape(_) | MemoKey::Object(_))
  }
}

/// Content of an immutable value, with children reduced to their keys.
#[derive(Debug, PartialEq, Eq, Hash)]
enum Shape {
  Bytes(BytesKind, Vec<u8>),
  Tuple(u16, Vec<MemoKey>),
  Struct(Vec<(MemoKey, MemoKey)>),
}

/// The number as an `i32` if it round-trips exactly.
fn exact_i32(x: f64) -> Option<i32> {
  if x >= i32::MIN as f64 && x <= i32::MAX as f64 && x == (x as i32) as f64 {
    Some(x as i32)
  } else {
    None
  }
}

fn bytes_lead(kind: BytesKind) -> Lead {
  match kind {
    BytesKind::String => Lead::String,
    BytesKind::Symbol => Lead::Symbol,
    BytesKind::Keyword => Lead::Keyword,
  }
}

/// Traversal state for one top-level hash.
pub struct HashCtx<'h> {
  heap: &'h Heap,
  out: Encoder<Sha1>,
  limit: usize,
  roots: HashMap<MemoKey, String>,
  seen: HashMap<MemoKey, i32>,
  next_id: i32,
  seen_defs: HashMap<ObjId, i32>,
  seen_envs: HashMap<ObjId, i32>,
  shapes: HashMap<Shape, u32>,
  composite_shapes: HashMap<ObjId, u32>,
}

impl<'h> HashCtx<'h> {
  pub fn new(heap: &'h Heap, roots: &NamedRoots, config: HashConfig) -> Result<Self, HashError> {
    let mut ctx = Self {
      heap,
      out: Encoder::new(Sha1::new()),
      limit: config.recursion_limit,
      roots: HashMap::new(),
      seen: HashMap::new(),
      next_id: 0,
      seen_defs: HashMap::new(),
      seen_envs: HashMap::new(),
      shapes: HashMap::new(),
      composite_shapes: HashMap::new(),
    };
    ctx.out.bytes(ENGINE_VERSION.as_bytes());
    for (value, name) in roots.iter() {
      let key = ctx.memo_key(value, 0)?;
      if key.is_reference() {
        ctx.roots.insert(key, name.to_string());
      }
    }
    Ok(ctx)
  }

  /// Append one value graph to the digest.
  pub fn update(&mut self, value: Value) -> Result<(), HashError> {
    self.hash_value(value, 0)
  }

  /// Append a string that does not live in the heap, encoded exactly as a
  /// heap string with the same content would be.
  pub fn update_str(&mut self, s: &str) -> Result<(), HashError> {
    self.hash_bytes(BytesKind::String, s.as_bytes(), 0)
  }

  pub fn finish(self) -> PkgHash {
    let digest = self.out.into_inner().finalize();
    let mut bytes = [0u8; DIGEST_LEN];
    bytes.copy_from_slice(&digest);
    PkgHash::from_digest(&bytes)
  }

  fn enter(&self, depth: usize) -> Result<(), HashError> {
    if depth > self.limit {
      return Err(HashError::RecursionLimit { limit: self.limit });
    }
    Ok(())
  }

  // Memoization

  fn intern(&mut self, shape: Shape) -> u32 {
    let next = self.shapes.len() as u32;
    *self.shapes.entry(shape).or_insert(next)
  }

  fn memo_key(&mut self, value: Value, depth: usize) -> Result<MemoKey, HashError> {
    Ok(match value {
      Value::Nil => MemoKey::Nil,
      Value::Boolean(b) => MemoKey::Boolean(b),
      Value::Number(x) => match exact_i32(x) {
        Some(i) => MemoKey::Int(i),
        None => MemoKey::Real(x.to_bits()),
      },
      Value::String(id) => self.bytes_key(BytesKind::String, id)?,
      Value::Symbol(id) => self.bytes_key(BytesKind::Symbol, id)?,
      Value::Keyword(id) => self.bytes_key(BytesKind::Keyword, id)?,
      Value::Tuple(id) => self.tuple_key(id, depth)?,
      Value::Struct(id) => self.struct_key(id, depth)?,
      Value::Buffer(id)
      | Value::Array(id)
      | Value::Table(id)
      | Value::Closure(id)
      | Value::Fiber(id)
      | Value::Opaque(id) => MemoKey::Object(id),
    })
  }

  fn bytes_key(&mut self, kind: BytesKind, id: ObjId) -> Result<MemoKey, HashError> {
    let bytes = self.heap.bytes(id)?.to_vec();
    Ok(MemoKey::Shape(self.intern(Shape::Bytes(kind, bytes))))
  }

  fn tuple_key(&mut self, id: ObjId, depth: usize) -> Result<MemoKey, HashError> {
    if let Some(&shape) = self.composite_shapes.get(&id) {
      return Ok(MemoKey::Shape(shape));
    }
    self.enter(depth)?;
    let heap = self.heap;
    let tuple = heap.tuple(id)?;
    let mut items = Vec::with_capacity(tuple.items.len());
    for item in &tuple.items {
      items.push(self.memo_key(*item, depth + 1)?);
    }
    let shape = self.intern(Shape::Tuple(tuple.flag, items));
    self.composite_shapes.insert(id, shape);
    Ok(MemoKey::Shape(shape))
  }

  fn struct_key(&mut self, id: ObjId, depth: usize) -> Result<MemoKey, HashError> {
    if let Some(&shape) = self.composite_shapes.get(&id) {
      return Ok(MemoKey::Shape(shape));
    }
    self.enter(depth)?;
    let heap = self.heap;
    let entries = heap.sorted_entries(&heap.structure(id)?.entries);
    let mut keys = Vec::with_capacity(entries.len());
    for (k, v) in entries {
      keys.push((self.memo_key(k, depth + 1)?, self.memo_key(v, depth + 1)?));
    }
    let shape = self.intern(Shape::Struct(keys));
    self.composite_shapes.insert(id, shape);
    Ok(MemoKey::Shape(shape))
  }

  /// Register `key` under the next sequential id unless it already has one.
  fn mark(&mut self, key: MemoKey) {
    if !key.is_reference() {
      return;
    }
    if let Entry::Vacant(slot) = self.seen.entry(key) {
      slot.insert(self.next_id);
      self.next_id += 1;
    }
  }

  /// Write the compact form of a named root or an already-seen value.
  /// Returns false when the value still has to be serialized.
  fn emit_memoized(&mut self, key: MemoKey) -> Result<bool, HashError> {
    if !key.is_reference() {
      return Ok(false);
    }
    if self.roots.contains_key(&key) {
      self.mark(key);
      let name = &self.roots[&key];
      self.out.lead(Lead::Registry);
      self.out.len(name.len())?;
      self.out.bytes(name.as_bytes());
      return Ok(true);
    }
    if let Some(&id) = self.seen.get(&key) {
      self.out.lead(Lead::Reference);
      self.out.int(id);
      return Ok(true);
    }
    Ok(false)
  }

  // Serialization

  fn hash_value(&mut self, value: Value, depth: usize) -> Result<(), HashError> {
    self.enter(depth)?;
    let key = self.memo_key(value, depth)?;
    if self.emit_memoized(key)? {
      return Ok(());
    }

    let heap = self.heap;
    match value {
      Value::Nil => self.out.lead(Lead::Nil),
      Value::Boolean(true) => self.out.lead(Lead::True),
      Value::Boolean(false) => self.out.lead(Lead::False),
      Value::Number(x) => match key {
        MemoKey::Int(i) => self.out.int(i),
        _ => {
          self.out.lead(Lead::Real);
          self.out.bytes(&x.to_le_bytes());
          self.mark(key);
        }
      },
      Value::String(id) => self.write_bytes(Lead::String, heap.bytes(id)?, key)?,
      Value::Symbol(id) => self.write_bytes(Lead::Symbol, heap.bytes(id)?, key)?,
      Value::Keyword(id) => self.write_bytes(Lead::Keyword, heap.bytes(id)?, key)?,
      Value::Buffer(id) => self.write_bytes(Lead::Buffer, heap.buffer(id)?, key)?,
      Value::Array(id) => {
        let items = heap.array(id)?;
        self.mark(key);
        self.out.lead(Lead::Array);
        self.out.len(items.len())?;
        for item in items {
          self.hash_value(*item, depth + 1)?;
        }
      }
      Value::Tuple(id) => {
        let tuple = heap.tuple(id)?;
        self.out.lead(Lead::Tuple);
        self.out.len(tuple.items.len())?;
        self.out.int(i32::from(tuple.flag));
        for item in &tuple.items {
          self.hash_value(*item, depth + 1)?;
        }
        self.mark(key);
      }
      Value::Table(id) => {
        let table = heap.table(id)?;
        self.mark(key);
        self.out.lead(if table.proto.is_some() { Lead::TableProto } else { Lead::Table });
        self.out.len(table.entries.len())?;
        if let Some(proto) = table.proto {
          self.hash_value(Value::Table(proto), depth + 1)?;
        }
        self.hash_entries(&heap.sorted_entries(&table.entries), depth)?;
      }
      Value::Struct(id) => {
        let entries = heap.sorted_entries(&heap.structure(id)?.entries);
        self.out.lead(Lead::Struct);
        self.out.len(entries.len())?;
        self.hash_entries(&entries, depth)?;
        self.mark(key);
      }
      Value::Closure(id) => {
        let closure = heap.closure(id)?;
        let expected = heap.funcdef(closure.def)?.environments.as_ref().map_or(0, Vec::len);
        if closure.envs.len() != expected {
          return Err(HashError::EnvironmentCount {
            expected,
            got: closure.envs.len(),
          });
        }
        self.out.lead(Lead::Function);
        self.hash_def(closure.def, depth + 1)?;
        self.mark(key);
        for env in &closure.envs {
          self.hash_env(*env, depth + 1)?;
        }
      }
      Value::Fiber(id) => {
        self.mark(key);
        self.out.lead(Lead::Fiber);
        self.hash_fiber(id, depth + 1)?;
      }
      Value::Opaque(id) => self.hash_opaque(id, depth)?,
    }
    Ok(())
  }

  fn hash_entries(&mut self, entries: &[(Value, Value)], depth: usize) -> Result<(), HashError> {
    for (k, v) in entries {
      self.hash_value(*k, depth + 1)?;
      self.hash_value(*v, depth + 1)?;
    }
    Ok(())
  }

  fn write_bytes(&mut self, lead: Lead, bytes: &[u8], key: MemoKey) -> Result<(), HashError> {
    self.mark(key);
    self.out.lead(lead);
    self.out.len(bytes.len())?;
    self.out.bytes(bytes);
    Ok(())
  }

  fn hash_bytes(&mut self, kind: BytesKind, bytes: &[u8], depth: usize) -> Result<(), HashError> {
    self.enter(depth)?;
    let key = MemoKey::Shape(self.intern(Shape::Bytes(kind, bytes.to_vec())));
    if self.emit_memoized(key)? {
      return Ok(());
    }
    self.write_bytes(bytes_lead(kind), bytes, key)
  }

  /// Defs are written as: presence-augmented flags, scalar header, optional
  /// counts, name, constants, bytecode (each word least significant byte
  /// first), captured-slot indices, nested defs.
  fn hash_def(&mut self, id: ObjId, depth: usize) -> Result<(), HashError> {
    self.enter(depth)?;
    if let Some(&index) = self.seen_defs.get(&id) {
      self.out.lead(Lead::FuncDefRef);
      self.out.int(index);
      return Ok(());
    }
    let def = self.heap.funcdef(id)?;
    self.seen_defs.insert(id, self.seen_defs.len() as i32);

    self.out.int(def.presence_flags());
    self.out.int(def.slot_count);
    self.out.int(def.arity);
    self.out.int(def.min_arity);
    self.out.int(def.max_arity);
    self.out.len(def.constants.len())?;
    self.out.len(def.bytecode.len())?;
    if let Some(envs) = &def.environments {
      self.out.len(envs.len())?;
    }
    if let Some(defs) = &def.defs {
      self.out.len(defs.len())?;
    }
    if let Some(name) = &def.name {
      self.hash_bytes(BytesKind::String, name.as_bytes(), depth + 1)?;
    }

    for constant in &def.constants {
      self.hash_value(*constant, depth + 1)?;
    }
    for word in &def.bytecode {
      self.out.bytes(&word.to_le_bytes());
    }
    for env_index in def.environments.iter().flatten() {
      self.out.int(*env_index);
    }
    for nested in def.defs.iter().flatten() {
      self.hash_def(*nested, depth + 1)?;
    }
    Ok(())
  }

  fn hash_env(&mut self, id: ObjId, depth: usize) -> Result<(), HashError> {
    self.enter(depth)?;
    if let Some(&index) = self.seen_envs.get(&id) {
      self.out.lead(Lead::FuncEnvRef);
      self.out.int(index);
      return Ok(());
    }
    let heap = self.heap;
    let env = heap.env(id)?;
    self.seen_envs.insert(id, self.seen_envs.len() as i32);

    match env {
      FuncEnv::Detached(values) => {
        self.out.int(0);
        self.out.len(values.len())?;
        for value in values {
          self.hash_value(*value, depth + 1)?;
        }
      }
      // Offset 0 is the detached encoding, so a stack environment needs a
      // positive one.
      FuncEnv::OnStack { fiber, offset, length } => {
        if *offset <= 0 {
          return Err(HashError::MalformedEnvironment { offset: *offset });
        }
        if heap.fiber(*fiber)?.status == FiberStatus::Alive {
          return Err(HashError::LiveStackEnvironment);
        }
        self.out.int(*offset);
        self.out.int(*length);
        self.hash_value(Value::Fiber(*fiber), depth + 1)?;
      }
    }
    Ok(())
  }

  /// Frames are written innermost first. Each frame's previous-frame link
  /// is the number of frames below it, and its program counter is the
  /// instruction offset within its own def.
  fn hash_fiber(&mut self, id: ObjId, depth: usize) -> Result<(), HashError> {
    self.enter(depth)?;
    let heap = self.heap;
    let fiber = heap.fiber(id)?;
    if fiber.status == FiberStatus::Alive {
      return Err(HashError::AliveFiber);
    }

    let mut flags = fiber.flags;
    if fiber.child.is_some() {
      flags |= FIBER_FLAG_HASCHILD;
    }
    if fiber.env.is_some() {
      flags |= FIBER_FLAG_HASENV;
    }
    self.out.int(flags);
    self.out.len(fiber.frames.len())?;
    self.out.len(fiber.frames.iter().map(|f| f.slots.len()).sum())?;

    for (index, frame) in fiber.frames.iter().enumerate().rev() {
      let func = frame.func.ok_or(HashError::NativeFrame)?;
      let def = heap.funcdef(heap.closure(func)?.def)?;
      if frame.pc as usize > def.bytecode.len() {
        return Err(HashError::PcOutOfRange {
          pc: frame.pc,
          len: def.bytecode.len(),
        });
      }

      let mut frame_flags = frame.flags;
      if frame.env.is_some() {
        frame_flags |= FRAME_FLAG_HASENV;
      }
      self.out.int(frame_flags);
      self.out.len(index)?;
      self.out.len(frame.pc as usize)?;
      self.hash_value(Value::Closure(func), depth + 1)?;
      if let Some(env) = frame.env {
        self.hash_env(env, depth + 1)?;
      }
      for slot in &frame.slots {
        self.hash_value(*slot, depth + 1)?;
      }
    }

    if let Some(env) = fiber.env {
      self.hash_value(Value::Table(env), depth + 1)?;
    }
    if let Some(child) = fiber.child {
      self.hash_value(Value::Fiber(child), depth + 1)?;
    }
    Ok(())
  }

  /// Packages contribute their already-computed hash, which is how a
  /// parent's digest comes to depend on its dependencies' digests.
  fn hash_opaque(&mut self, id: ObjId, depth: usize) -> Result<(), HashError> {
    let opaque = self.heap.opaque(id)?;
    let Opaque::Package(pkg) = opaque else {
      return Err(HashError::UnsupportedOpaque {
        kind: opaque.kind_name().to_string(),
      });
    };
    let hash = pkg.hash().ok_or_else(|| HashError::UnhashedPackage {
      name: pkg.name().unwrap_or("<unnamed>").to_string(),
    })?;

    self.out.lead(Lead::Abstract);
    self.hash_bytes(BytesKind::Symbol, opaque.kind_name().as_bytes(), depth + 1)?;
    self.out.bytes(hash.as_bytes());
    Ok(())
  }
}

/// Hash a single value graph with the default recursion ceiling.
pub fn hash(heap: &Heap, roots: &NamedRoots, value: Value) -> Result<PkgHash, HashError> {
  let mut ctx = HashCtx::new(heap, roots, HashConfig::default())?;
  ctx.update(value)?;
  Ok(ctx.finish())
}
