//! Shared helpers for library integration tests.

use pkgstore_lib::pkg::{Package, PackageSpec};
use pkgstore_lib::value::{FuncDef, Heap, Value};

pub const STORE_ROOT: &str = "/pkgstore";

/// A closure over a fresh def holding `constants`.
pub fn builder(heap: &mut Heap, constants: Vec<Value>) -> Value {
  let def = heap.new_funcdef(FuncDef {
    slot_count: 2,
    arity: 1,
    min_arity: 1,
    max_arity: 1,
    constants,
    bytecode: vec![0x0000_0102, 0x0000_0003],
    ..Default::default()
  });
  heap.new_closure(def, vec![])
}

/// An unfrozen package whose builder holds `constants`.
pub fn package(heap: &mut Heap, name: Option<&str>, constants: Vec<Value>) -> Value {
  let builder = builder(heap, constants);
  let name = match name {
    Some(name) => heap.new_string(name),
    None => Value::Nil,
  };
  Package::create(
    heap,
    PackageSpec {
      builder,
      name,
      ..Default::default()
    },
  )
  .unwrap()
}

pub fn get(heap: &Heap, pkg: Value) -> &Package {
  let Value::Opaque(id) = pkg else {
    panic!("expected a package, got {}", pkg.type_name())
  };
  heap.package(id).unwrap()
}
