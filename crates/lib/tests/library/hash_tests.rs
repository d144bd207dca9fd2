//! Tests for the structural hash through the public API.

use pkgstore_lib::hash::{HashError, NamedRoots, hash};
use pkgstore_lib::pkg::{Package, PackageSpec, PkgError, freeze};
use pkgstore_lib::value::{Fiber, FiberStatus, FuncDef, FuncEnv, Heap, Value};

use super::common::{STORE_ROOT, builder};

fn digest(heap: &Heap, value: Value) -> String {
  hash(heap, &NamedRoots::new(), value).unwrap().to_string()
}

mod properties {
  use super::*;

  #[test]
  fn sharing_does_not_change_the_hash() {
    let mut heap = Heap::new();
    let s1 = heap.new_string("abc");
    let s2 = heap.new_string("abc");
    let t1 = heap.new_tuple(vec![s1, Value::Number(1.0)]);
    let t2 = heap.new_tuple(vec![s2, Value::Number(1.0)]);
    let separate = heap.new_tuple(vec![t1, t2]);
    let shared = heap.new_tuple(vec![t1, t1]);

    assert_eq!(digest(&heap, separate), digest(&heap, shared));
  }

  #[test]
  fn any_scalar_difference_changes_the_hash() {
    let mut heap = Heap::new();
    let a = heap.new_array(vec![Value::Number(1.0), Value::Boolean(true)]);
    let b = heap.new_array(vec![Value::Number(1.0), Value::Boolean(false)]);
    let c = heap.new_array(vec![Value::Number(1.5), Value::Boolean(true)]);

    let digests = [digest(&heap, a), digest(&heap, b), digest(&heap, c)];
    assert_ne!(digests[0], digests[1]);
    assert_ne!(digests[0], digests[2]);
    assert_ne!(digests[1], digests[2]);
  }

  #[test]
  fn string_symbol_and_keyword_differ() {
    let mut heap = Heap::new();
    let s = heap.new_string("x");
    let y = heap.new_symbol("x");
    let k = heap.new_keyword("x");

    assert_ne!(digest(&heap, s), digest(&heap, y));
    assert_ne!(digest(&heap, y), digest(&heap, k));
  }

  #[test]
  fn self_containing_array_hashes_deterministically() {
    let build = || {
      let mut heap = Heap::new();
      let arr = heap.new_array(vec![Value::Number(7.0)]);
      heap.push(arr, arr).unwrap();
      digest(&heap, arr)
    };
    assert_eq!(build(), build());
  }

  #[test]
  fn table_insertion_order_is_irrelevant() {
    let mut heap = Heap::new();
    let a = heap.new_keyword("a");
    let b = heap.new_keyword("b");
    let t1 = heap.new_table(vec![(a, Value::Number(1.0)), (b, Value::Number(2.0))]);
    let t2 = heap.new_table(vec![(b, Value::Number(2.0)), (a, Value::Number(1.0))]);

    assert_eq!(digest(&heap, t1), digest(&heap, t2));
  }

  #[test]
  fn digest_is_forty_hex_chars() {
    let mut heap = Heap::new();
    let b = builder(&mut heap, vec![]);
    let d = digest(&heap, b);
    assert_eq!(d.len(), 40);
    assert!(d.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
  }
}

mod refusals {
  use super::*;

  #[test]
  fn live_stack_environment_in_builder() {
    let mut heap = Heap::new();
    let fiber = heap.new_fiber(Fiber::new(FiberStatus::Alive, vec![]));
    let env = heap.new_env(FuncEnv::OnStack {
      fiber: fiber.object_id().unwrap(),
      offset: 1,
      length: 2,
    });
    let def = heap.new_funcdef(FuncDef {
      environments: Some(vec![0]),
      ..Default::default()
    });
    let builder = heap.new_closure(def, vec![env]);
    let pkg = Package::create(
      &mut heap,
      PackageSpec {
        builder,
        ..Default::default()
      },
    )
    .unwrap();

    let err = freeze(&mut heap, STORE_ROOT, &NamedRoots::new(), pkg).unwrap_err();
    assert_eq!(err, PkgError::Hash(HashError::LiveStackEnvironment));
  }

  #[test]
  fn alive_fiber_constant() {
    let mut heap = Heap::new();
    let fiber = heap.new_fiber(Fiber::new(FiberStatus::Alive, vec![]));
    let b = builder(&mut heap, vec![fiber]);

    assert_eq!(
      hash(&heap, &NamedRoots::new(), b).unwrap_err(),
      HashError::AliveFiber
    );
  }
}
