//! Tests for dependency extraction alongside freezing.

use pkgstore_lib::deps::{DepsError, dependencies};
use pkgstore_lib::hash::NamedRoots;
use pkgstore_lib::pkg::{Package, PackageSpec, freeze};
use pkgstore_lib::value::{Fiber, FiberStatus, FuncDef, FuncEnv, Heap, Value};

use super::common::{STORE_ROOT, get, package};

/// Freeze `pkg` after its direct dependencies, depth first.
fn freeze_all(heap: &mut Heap, roots: &NamedRoots, pkg: Value) {
  if get(heap, pkg).is_frozen() {
    return;
  }
  let deps: Vec<Value> = dependencies(heap, pkg).unwrap().values().collect();
  for dep in deps {
    freeze_all(heap, roots, dep);
  }
  freeze(heap, STORE_ROOT, roots, pkg).unwrap();
}

#[test]
fn direct_dependencies_only() {
  let mut heap = Heap::new();
  let c = package(&mut heap, Some("c"), vec![]);
  let a = package(&mut heap, Some("a"), vec![c]);
  let b = package(&mut heap, Some("b"), vec![]);
  let p = package(&mut heap, Some("p"), vec![a, b]);

  let deps: Vec<Value> = dependencies(&heap, p).unwrap().values().collect();
  assert_eq!(deps, vec![a, b]);
}

#[test]
fn dependencies_freeze_before_dependents() {
  let mut heap = Heap::new();
  let zlib = package(&mut heap, Some("zlib"), vec![]);
  let openssl = package(&mut heap, Some("openssl"), vec![zlib]);
  let curl = package(&mut heap, Some("curl"), vec![openssl, zlib]);
  let roots = NamedRoots::new();

  freeze_all(&mut heap, &roots, curl);

  for pkg in [zlib, openssl, curl] {
    assert!(get(&heap, pkg).is_frozen());
  }
}

#[test]
fn unfrozen_dependencies_are_still_listed() {
  let mut heap = Heap::new();
  let a = package(&mut heap, Some("a"), vec![]);
  let extra_refs = heap.new_tuple(vec![a]);
  let p = Package::create(
    &mut heap,
    PackageSpec {
      extra_refs,
      ..Default::default()
    },
  )
  .unwrap();

  let deps = dependencies(&heap, p).unwrap();
  assert_eq!(deps.len(), 1);
  assert!(!get(&heap, a).is_frozen());
}

#[test]
fn stack_environment_is_refused() {
  let mut heap = Heap::new();
  let fiber = heap.new_fiber(Fiber::new(FiberStatus::Pending, vec![]));
  let env = heap.new_env(FuncEnv::OnStack {
    fiber: fiber.object_id().unwrap(),
    offset: 1,
    length: 0,
  });
  let def = heap.new_funcdef(FuncDef {
    environments: Some(vec![0]),
    ..Default::default()
  });
  let builder = heap.new_closure(def, vec![env]);
  let p = Package::create(
    &mut heap,
    PackageSpec {
      builder,
      ..Default::default()
    },
  )
  .unwrap();

  assert_eq!(dependencies(&heap, p).unwrap_err(), DepsError::StackEnvironment);
}
