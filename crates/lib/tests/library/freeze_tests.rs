//! Tests for package freezing and store paths.

use pkgstore_lib::config::{HASH_DEPTH_ENV, STORE_ROOT_ENV, StoreConfig};
use pkgstore_lib::hash::{HashError, NamedRoots};
use pkgstore_lib::pkg::{Package, PackageSpec, PkgError, ValidationError, freeze, freeze_with_config};
use pkgstore_lib::util::hash::PkgHash;
use pkgstore_lib::value::{Heap, Value};
use serial_test::serial;
use temp_env::with_vars;

use super::common::{STORE_ROOT, get, package};

mod paths {
  use super::*;

  #[test]
  fn named_package_path() {
    let mut heap = Heap::new();
    let pkg = package(&mut heap, Some("foo"), vec![]);
    let hash = freeze(&mut heap, STORE_ROOT, &NamedRoots::new(), pkg).unwrap();

    assert!(PkgHash::is_valid(hash.as_str()));
    assert_eq!(get(&heap, pkg).path(), Some(format!("/pkgstore/pkg/{hash}-foo").as_str()));
  }

  #[test]
  fn unnamed_package_path_has_no_hyphen() {
    let mut heap = Heap::new();
    let pkg = package(&mut heap, None, vec![]);
    let hash = freeze(&mut heap, STORE_ROOT, &NamedRoots::new(), pkg).unwrap();

    let path = get(&heap, pkg).path().unwrap();
    assert_eq!(path, format!("/pkgstore/pkg/{hash}"));
    assert!(!path.ends_with('-'));
  }

  #[test]
  fn freeze_is_deterministic_across_heaps() {
    let freeze_fresh = || {
      let mut heap = Heap::new();
      let pkg = package(&mut heap, Some("foo"), vec![Value::Number(2.5)]);
      freeze(&mut heap, STORE_ROOT, &NamedRoots::new(), pkg).unwrap()
    };
    assert_eq!(freeze_fresh(), freeze_fresh());
  }

  #[test]
  fn store_root_changes_the_hash() {
    let mut heap = Heap::new();
    let a = package(&mut heap, Some("foo"), vec![]);
    let b = package(&mut heap, Some("foo"), vec![]);

    let ha = freeze(&mut heap, "/pkgstore", &NamedRoots::new(), a).unwrap();
    let hb = freeze(&mut heap, "/opt/store", &NamedRoots::new(), b).unwrap();
    assert_ne!(ha, hb);
  }
}

mod merkle {
  use super::*;

  fn parent_hash(dep_payload: &str) -> PkgHash {
    let mut heap = Heap::new();
    let payload = heap.new_string(dep_payload);
    let dep = package(&mut heap, Some("dep"), vec![payload]);
    freeze(&mut heap, STORE_ROOT, &NamedRoots::new(), dep).unwrap();
    let parent = package(&mut heap, Some("parent"), vec![dep]);
    freeze(&mut heap, STORE_ROOT, &NamedRoots::new(), parent).unwrap()
  }

  #[test]
  fn parent_tracks_dependency_hash() {
    assert_eq!(parent_hash("v1"), parent_hash("v1"));
    assert_ne!(parent_hash("v1"), parent_hash("v2"));
  }

  #[test]
  fn unfrozen_dependency_is_refused() {
    let mut heap = Heap::new();
    let dep = package(&mut heap, Some("dep"), vec![]);
    let parent = package(&mut heap, Some("parent"), vec![dep]);

    let err = freeze(&mut heap, STORE_ROOT, &NamedRoots::new(), parent).unwrap_err();
    assert!(matches!(err, PkgError::Hash(HashError::UnhashedPackage { .. })));
    assert!(!get(&heap, parent).is_frozen());
  }

  #[test]
  fn named_root_keeps_builtin_out_of_the_hash() {
    let hash_with = |builtin_len: usize| {
      let mut heap = Heap::new();
      let builtin = heap.new_table(vec![]);
      for i in 0..builtin_len {
        let key = heap.new_keyword(&format!("f{i}"));
        heap.put(builtin, key, Value::Boolean(true)).unwrap();
      }
      let mut roots = NamedRoots::new();
      roots.insert(builtin, "core");
      let pkg = package(&mut heap, Some("uses-core"), vec![builtin]);
      freeze(&mut heap, STORE_ROOT, &roots, pkg).unwrap()
    };
    assert_eq!(hash_with(1), hash_with(5));
  }
}

mod refreeze {
  use super::*;

  #[test]
  fn second_freeze_keeps_first_hash() {
    let mut heap = Heap::new();
    let pkg = package(&mut heap, Some("foo"), vec![]);
    let first = freeze(&mut heap, "/a", &NamedRoots::new(), pkg).unwrap();

    let err = freeze(&mut heap, "/b", &NamedRoots::new(), pkg).unwrap_err();
    assert!(matches!(err, PkgError::AlreadyFrozen { .. }));
    assert_eq!(get(&heap, pkg).hash(), Some(&first));
    assert_eq!(get(&heap, pkg).path(), Some(format!("/a/pkg/{first}-foo").as_str()));
  }
}

mod names {
  use super::*;

  fn create_named(name: &str) -> Result<Value, ValidationError> {
    let mut heap = Heap::new();
    let name = heap.new_string(name);
    Package::create(
      &mut heap,
      PackageSpec {
        name,
        ..Default::default()
      },
    )
  }

  #[test]
  fn sixty_four_chars_accepted() {
    assert!(create_named(&"x".repeat(64)).is_ok());
  }

  #[test]
  fn sixty_five_chars_rejected() {
    assert!(matches!(
      create_named(&"x".repeat(65)),
      Err(ValidationError::NameTooLong { .. })
    ));
  }

  #[test]
  fn separator_rejected() {
    assert!(matches!(
      create_named("a/b"),
      Err(ValidationError::NameSeparator { .. })
    ));
  }
}

mod config {
  use super::*;

  #[test]
  #[serial]
  fn env_store_root_reaches_the_path() {
    with_vars([(STORE_ROOT_ENV, Some("/tmp/store/")), (HASH_DEPTH_ENV, None)], || {
      let config = StoreConfig::current();
      let mut heap = Heap::new();
      let pkg = package(&mut heap, Some("env"), vec![]);
      let hash = freeze_with_config(&mut heap, &config, &NamedRoots::new(), pkg).unwrap();

      assert_eq!(get(&heap, pkg).path(), Some(format!("/tmp/store/pkg/{hash}-env").as_str()));
    });
  }

  #[test]
  #[serial]
  fn env_depth_limits_freeze() {
    with_vars([(STORE_ROOT_ENV, None), (HASH_DEPTH_ENV, Some("3"))], || {
      let config = StoreConfig::current();
      let mut heap = Heap::new();
      let mut nested = heap.new_array(vec![]);
      for _ in 0..4 {
        nested = heap.new_array(vec![nested]);
      }
      let pkg = package(&mut heap, None, vec![nested]);

      let err = freeze_with_config(&mut heap, &config, &NamedRoots::new(), pkg).unwrap_err();
      assert_eq!(err, PkgError::Hash(HashError::RecursionLimit { limit: 3 }));
    });
  }
}
