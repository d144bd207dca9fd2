use std::cmp::Ordering;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::types::*;
use crate::pkg::Package;

/// Maximum number of prototype links followed by [`Heap::get`].
pub const MAX_PROTO_DEPTH: usize = 200;

/// Errors from looking up or mutating heap objects.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValueError {
  #[error("dangling object handle {0}")]
  Dangling(ObjId),

  #[error("expected {expected}, got {got}")]
  TypeMismatch { expected: &'static str, got: &'static str },

  #[error("prototype chain deeper than 200 links")]
  ProtoChainTooDeep,
}

/// Arena owning every reference-kind object of a value graph.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Heap {
  objects: Vec<Object>,
}

fn mismatch(expected: &'static str, got: &Object) -> ValueError {
  ValueError::TypeMismatch {
    expected,
    got: got.kind_name(),
  }
}

impl Heap {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn len(&self) -> usize {
    self.objects.len()
  }

  pub fn is_empty(&self) -> bool {
    self.objects.is_empty()
  }

  /// Every object with its handle, in allocation order.
  pub fn iter(&self) -> impl Iterator<Item = (ObjId, &Object)> {
    self.objects.iter().enumerate().map(|(i, object)| (ObjId(i as u32), object))
  }

  fn alloc(&mut self, object: Object) -> ObjId {
    let id = ObjId(self.objects.len() as u32);
    self.objects.push(object);
    id
  }

  pub fn object(&self, id: ObjId) -> Result<&Object, ValueError> {
    self.objects.get(id.0 as usize).ok_or(ValueError::Dangling(id))
  }

  fn object_mut(&mut self, id: ObjId) -> Result<&mut Object, ValueError> {
    self.objects.get_mut(id.0 as usize).ok_or(ValueError::Dangling(id))
  }

  // Allocation

  pub fn new_bytes(&mut self, kind: BytesKind, bytes: impl Into<Vec<u8>>) -> Value {
    kind.wrap(self.alloc(Object::Bytes(bytes.into())))
  }

  pub fn new_string(&mut self, s: &str) -> Value {
    self.new_bytes(BytesKind::String, s)
  }

  pub fn new_symbol(&mut self, s: &str) -> Value {
    self.new_bytes(BytesKind::Symbol, s)
  }

  pub fn new_keyword(&mut self, s: &str) -> Value {
    self.new_bytes(BytesKind::Keyword, s)
  }

  pub fn new_buffer(&mut self, bytes: impl Into<Vec<u8>>) -> Value {
    Value::Buffer(self.alloc(Object::Buffer(bytes.into())))
  }

  pub fn new_array(&mut self, items: Vec<Value>) -> Value {
    Value::Array(self.alloc(Object::Array(items)))
  }

  pub fn new_tuple(&mut self, items: Vec<Value>) -> Value {
    self.new_tuple_flagged(items, 0)
  }

  pub fn new_tuple_flagged(&mut self, items: Vec<Value>, flag: u16) -> Value {
    Value::Tuple(self.alloc(Object::Tuple(Tuple { items, flag })))
  }

  /// Allocate a table. Entries with a nil key or value are dropped and a
  /// repeated key keeps its last value.
  pub fn new_table(&mut self, entries: Vec<(Value, Value)>) -> Value {
    let entries = self.normalize_entries(entries);
    Value::Table(self.alloc(Object::Table(Table { entries, proto: None })))
  }

  /// Allocate a struct, normalizing entries the same way as [`Heap::new_table`].
  pub fn new_struct(&mut self, entries: Vec<(Value, Value)>) -> Value {
    let entries = self.normalize_entries(entries);
    Value::Struct(self.alloc(Object::Struct(Struct { entries })))
  }

  pub fn new_funcdef(&mut self, def: FuncDef) -> ObjId {
    self.alloc(Object::FuncDef(def))
  }

  pub fn new_env(&mut self, env: FuncEnv) -> ObjId {
    self.alloc(Object::FuncEnv(env))
  }

  pub fn new_closure(&mut self, def: ObjId, envs: Vec<ObjId>) -> Value {
    Value::Closure(self.alloc(Object::Closure(Closure { def, envs })))
  }

  pub fn new_fiber(&mut self, fiber: Fiber) -> Value {
    Value::Fiber(self.alloc(Object::Fiber(fiber)))
  }

  pub fn new_opaque(&mut self, opaque: Opaque) -> Value {
    Value::Opaque(self.alloc(Object::Opaque(opaque)))
  }

  fn normalize_entries(&self, entries: Vec<(Value, Value)>) -> Vec<(Value, Value)> {
    let mut out: Vec<(Value, Value)> = Vec::with_capacity(entries.len());
    for (key, value) in entries {
      if key.is_nil() || value.is_nil() {
        continue;
      }
      match out.iter_mut().find(|(k, _)| self.values_equal(*k, key)) {
        Some(slot) => slot.1 = value,
        None => out.push((key, value)),
      }
    }
    out
  }

  // Typed access

  pub fn bytes(&self, id: ObjId) -> Result<&[u8], ValueError> {
    match self.object(id)? {
      Object::Bytes(bytes) => Ok(bytes),
      other => Err(mismatch("string", other)),
    }
  }

  pub fn buffer(&self, id: ObjId) -> Result<&[u8], ValueError> {
    match self.object(id)? {
      Object::Buffer(bytes) => Ok(bytes),
      other => Err(mismatch("buffer", other)),
    }
  }

  pub fn array(&self, id: ObjId) -> Result<&[Value], ValueError> {
    match self.object(id)? {
      Object::Array(items) => Ok(items),
      other => Err(mismatch("array", other)),
    }
  }

  pub fn tuple(&self, id: ObjId) -> Result<&Tuple, ValueError> {
    match self.object(id)? {
      Object::Tuple(tuple) => Ok(tuple),
      other => Err(mismatch("tuple", other)),
    }
  }

  pub fn table(&self, id: ObjId) -> Result<&Table, ValueError> {
    match self.object(id)? {
      Object::Table(table) => Ok(table),
      other => Err(mismatch("table", other)),
    }
  }

  pub fn structure(&self, id: ObjId) -> Result<&Struct, ValueError> {
    match self.object(id)? {
      Object::Struct(st) => Ok(st),
      other => Err(mismatch("struct", other)),
    }
  }

  pub fn closure(&self, id: ObjId) -> Result<&Closure, ValueError> {
    match self.object(id)? {
      Object::Closure(closure) => Ok(closure),
      other => Err(mismatch("function", other)),
    }
  }

  pub fn funcdef(&self, id: ObjId) -> Result<&FuncDef, ValueError> {
    match self.object(id)? {
      Object::FuncDef(def) => Ok(def),
      other => Err(mismatch("funcdef", other)),
    }
  }

  pub fn env(&self, id: ObjId) -> Result<&FuncEnv, ValueError> {
    match self.object(id)? {
      Object::FuncEnv(env) => Ok(env),
      other => Err(mismatch("funcenv", other)),
    }
  }

  pub fn fiber(&self, id: ObjId) -> Result<&Fiber, ValueError> {
    match self.object(id)? {
      Object::Fiber(fiber) => Ok(fiber),
      other => Err(mismatch("fiber", other)),
    }
  }

  pub fn fiber_mut(&mut self, id: ObjId) -> Result<&mut Fiber, ValueError> {
    match self.object_mut(id)? {
      Object::Fiber(fiber) => Ok(fiber),
      other => Err(mismatch("fiber", other)),
    }
  }

  pub fn opaque(&self, id: ObjId) -> Result<&Opaque, ValueError> {
    match self.object(id)? {
      Object::Opaque(opaque) => Ok(opaque),
      other => Err(mismatch("abstract", other)),
    }
  }

  pub fn package(&self, id: ObjId) -> Result<&Package, ValueError> {
    match self.opaque(id)? {
      Opaque::Package(pkg) => Ok(pkg),
      _ => Err(ValueError::TypeMismatch {
        expected: "package",
        got: "abstract",
      }),
    }
  }

  pub fn package_mut(&mut self, id: ObjId) -> Result<&mut Package, ValueError> {
    match self.object_mut(id)? {
      Object::Opaque(Opaque::Package(pkg)) => Ok(pkg),
      other => Err(mismatch("package", other)),
    }
  }

  /// The text of a `String` value, if it is one and holds valid UTF-8.
  pub fn as_str(&self, value: Value) -> Option<&str> {
    match value {
      Value::String(id) => self.bytes(id).ok().and_then(|b| std::str::from_utf8(b).ok()),
      _ => None,
    }
  }

  // Mutation

  pub fn push(&mut self, array: Value, item: Value) -> Result<(), ValueError> {
    let Value::Array(id) = array else {
      return Err(ValueError::TypeMismatch {
        expected: "array",
        got: array.type_name(),
      });
    };
    match self.object_mut(id)? {
      Object::Array(items) => {
        items.push(item);
        Ok(())
      }
      other => Err(mismatch("array", other)),
    }
  }

  pub fn buffer_extend(&mut self, buffer: Value, bytes: &[u8]) -> Result<(), ValueError> {
    let Value::Buffer(id) = buffer else {
      return Err(ValueError::TypeMismatch {
        expected: "buffer",
        got: buffer.type_name(),
      });
    };
    match self.object_mut(id)? {
      Object::Buffer(data) => {
        data.extend_from_slice(bytes);
        Ok(())
      }
      other => Err(mismatch("buffer", other)),
    }
  }

  /// Insert or replace `key` in a table. A nil key is ignored and a nil
  /// value removes the entry.
  pub fn put(&mut self, table: Value, key: Value, value: Value) -> Result<(), ValueError> {
    let Value::Table(id) = table else {
      return Err(ValueError::TypeMismatch {
        expected: "table",
        got: table.type_name(),
      });
    };
    if key.is_nil() {
      return Ok(());
    }
    let position = self.table(id)?.entries.iter().position(|(k, _)| self.values_equal(*k, key));
    let Object::Table(t) = self.object_mut(id)? else {
      return Err(ValueError::Dangling(id));
    };
    match (position, value.is_nil()) {
      (Some(i), true) => {
        t.entries.remove(i);
      }
      (Some(i), false) => t.entries[i].1 = value,
      (None, true) => {}
      (None, false) => t.entries.push((key, value)),
    }
    Ok(())
  }

  pub fn set_proto(&mut self, table: Value, proto: Option<Value>) -> Result<(), ValueError> {
    let proto = match proto {
      None => None,
      Some(Value::Table(p)) => Some(p),
      Some(other) => {
        return Err(ValueError::TypeMismatch {
          expected: "table",
          got: other.type_name(),
        });
      }
    };
    let Value::Table(id) = table else {
      return Err(ValueError::TypeMismatch {
        expected: "table",
        got: table.type_name(),
      });
    };
    match self.object_mut(id)? {
      Object::Table(t) => {
        t.proto = proto;
        Ok(())
      }
      other => Err(mismatch("table", other)),
    }
  }

  /// Look up `key` in a table (following prototypes) or a struct.
  /// Missing keys yield nil.
  pub fn get(&self, container: Value, key: Value) -> Result<Value, ValueError> {
    match container {
      Value::Table(id) => {
        let mut current = Some(id);
        let mut depth = 0;
        while let Some(table_id) = current {
          if depth > MAX_PROTO_DEPTH {
            return Err(ValueError::ProtoChainTooDeep);
          }
          let table = self.table(table_id)?;
          if let Some((_, v)) = table.entries.iter().find(|(k, _)| self.values_equal(*k, key)) {
            return Ok(*v);
          }
          current = table.proto;
          depth += 1;
        }
        Ok(Value::Nil)
      }
      Value::Struct(id) => Ok(
        self
          .structure(id)?
          .entries
          .iter()
          .find(|(k, _)| self.values_equal(*k, key))
          .map(|(_, v)| *v)
          .unwrap_or(Value::Nil),
      ),
      other => Err(ValueError::TypeMismatch {
        expected: "table or struct",
        got: other.type_name(),
      }),
    }
  }

  // Comparison

  /// Value equality: immediates by value, strings/tuples/structs by
  /// content, every other kind by identity.
  pub fn values_equal(&self, a: Value, b: Value) -> bool {
    match (a, b) {
      (Value::Nil, Value::Nil) => true,
      (Value::Boolean(x), Value::Boolean(y)) => x == y,
      (Value::Number(x), Value::Number(y)) => x == y,
      (Value::String(x), Value::String(y))
      | (Value::Symbol(x), Value::Symbol(y))
      | (Value::Keyword(x), Value::Keyword(y)) => x == y || matches!((self.bytes(x), self.bytes(y)), (Ok(p), Ok(q)) if p == q),
      (Value::Tuple(x), Value::Tuple(y)) => {
        if x == y {
          return true;
        }
        match (self.tuple(x), self.tuple(y)) {
          (Ok(p), Ok(q)) => {
            p.flag == q.flag
              && p.items.len() == q.items.len()
              && p.items.iter().zip(&q.items).all(|(l, r)| self.values_equal(*l, *r))
          }
          _ => false,
        }
      }
      (Value::Struct(x), Value::Struct(y)) => {
        if x == y {
          return true;
        }
        match (self.structure(x), self.structure(y)) {
          (Ok(p), Ok(q)) => {
            p.entries.len() == q.entries.len()
              && p.entries.iter().all(|(k, v)| {
                q.entries
                  .iter()
                  .any(|(k2, v2)| self.values_equal(*k, *k2) && self.values_equal(*v, *v2))
              })
          }
          _ => false,
        }
      }
      (a, b) => std::mem::discriminant(&a) == std::mem::discriminant(&b) && a.object_id() == b.object_id(),
    }
  }

  /// Canonical ordering for mapping keys: by kind, then by content for
  /// booleans, numbers, byte strings, tuples and structs. Mutable and opaque
  /// kinds compare equal so a stable sort keeps their insertion order.
  pub fn canonical_cmp(&self, a: Value, b: Value) -> Ordering {
    rank(a).cmp(&rank(b)).then_with(|| match (a, b) {
      (Value::Boolean(x), Value::Boolean(y)) => x.cmp(&y),
      (Value::Number(x), Value::Number(y)) => x.total_cmp(&y),
      (Value::String(x), Value::String(y))
      | (Value::Symbol(x), Value::Symbol(y))
      | (Value::Keyword(x), Value::Keyword(y)) => self.bytes(x).ok().cmp(&self.bytes(y).ok()),
      (Value::Tuple(x), Value::Tuple(y)) if x != y => match (self.tuple(x), self.tuple(y)) {
        (Ok(p), Ok(q)) => p.flag.cmp(&q.flag).then_with(|| self.cmp_seq(&p.items, &q.items)),
        _ => Ordering::Equal,
      },
      (Value::Struct(x), Value::Struct(y)) if x != y => match (self.structure(x), self.structure(y)) {
        (Ok(p), Ok(q)) => {
          let flatten = |entries: &[(Value, Value)]| -> Vec<Value> {
            self.sorted_entries(entries).into_iter().flat_map(|(k, v)| [k, v]).collect()
          };
          self.cmp_seq(&flatten(&p.entries), &flatten(&q.entries))
        }
        _ => Ordering::Equal,
      },
      _ => Ordering::Equal,
    })
  }

  /// Lexicographic [`Heap::canonical_cmp`] over two sequences.
  fn cmp_seq(&self, a: &[Value], b: &[Value]) -> Ordering {
    a.iter()
      .zip(b)
      .map(|(x, y)| self.canonical_cmp(*x, *y))
      .find(|o| o.is_ne())
      .unwrap_or_else(|| a.len().cmp(&b.len()))
  }

  /// Mapping entries in canonical key order.
  pub fn sorted_entries(&self, entries: &[(Value, Value)]) -> Vec<(Value, Value)> {
    let mut sorted = entries.to_vec();
    sorted.sort_by(|(a, _), (b, _)| self.canonical_cmp(*a, *b));
    sorted
  }
}

fn rank(v: Value) -> u8 {
  match v {
    Value::Nil => 0,
    Value::Boolean(_) => 1,
    Value::Number(_) => 2,
    Value::String(_) => 3,
    Value::Symbol(_) => 4,
    Value::Keyword(_) => 5,
    Value::Buffer(_) => 6,
    Value::Array(_) => 7,
    Value::Tuple(_) => 8,
    Value::Table(_) => 9,
    Value::Struct(_) => 10,
    Value::Closure(_) => 11,
    Value::Fiber(_) => 12,
    Value::Opaque(_) => 13,
  }
}
