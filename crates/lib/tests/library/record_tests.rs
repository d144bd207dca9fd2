//! Tests for persisted package records.

use pkgstore_lib::hash::NamedRoots;
use pkgstore_lib::pkg::{
  Package, PackageBundle, PackageRecord, PackageSpec, PkgError, RecordError, freeze, persist, restore,
};
use pkgstore_lib::value::{Heap, Value};
use tempfile::TempDir;

use super::common::{STORE_ROOT, builder, get};

fn full_package(heap: &mut Heap) -> Value {
  let dep = Package::create(heap, PackageSpec::default()).unwrap();
  let builder = builder(heap, vec![Value::Number(3.0)]);
  let name = heap.new_string("full");
  let key = heap.new_keyword("cmd");
  let cmd = heap.new_string("make");
  let content = heap.new_struct(vec![(key, cmd)]);
  let forced_refs = heap.new_tuple(vec![dep]);
  let extra_refs = heap.new_array(vec![dep]);
  let weak_refs = heap.new_tuple(vec![]);
  Package::create(
    heap,
    PackageSpec {
      builder,
      name,
      content,
      forced_refs,
      extra_refs,
      weak_refs,
    },
  )
  .unwrap()
}

#[test]
fn unfrozen_package_round_trips_every_field() {
  let mut heap = Heap::new();
  let pkg = full_package(&mut heap);
  let record = persist(&mut heap, pkg).unwrap();
  let back = restore(&mut heap, &record).unwrap();

  assert_eq!(get(&heap, back), get(&heap, pkg));
  assert!(!get(&heap, back).is_frozen());
}

#[test]
fn frozen_package_round_trips_identity_only() {
  let mut heap = Heap::new();
  let pkg = full_package(&mut heap);
  freeze(&mut heap, STORE_ROOT, &NamedRoots::new(), pkg).unwrap();
  let record = persist(&mut heap, pkg).unwrap();
  let back = restore(&mut heap, &record).unwrap();

  let (restored, original) = (get(&heap, back), get(&heap, pkg));
  assert!(restored.is_frozen());
  assert_eq!(restored.hash(), original.hash());
  assert_eq!(restored.path(), original.path());
  assert_eq!(restored.name(), original.name());
  assert_eq!(restored.builder(), original.builder());
  assert_eq!(restored.content(), None);
  assert_eq!(record.fields()[4..], [Value::Nil; 4]);
}

#[test]
fn malformed_ref_list_aborts_restore() {
  let mut heap = Heap::new();
  let pkg = full_package(&mut heap);
  let mut record = persist(&mut heap, pkg).unwrap();
  record.weak_refs = heap.new_tuple(vec![Value::Number(1.0)]);
  let before = heap.len();

  let err = restore(&mut heap, &record).unwrap_err();
  assert!(matches!(err, PkgError::Record(RecordError::Invalid(_))));
  assert_eq!(heap.len(), before);
}

#[test]
fn name_type_is_checked_on_restore() {
  let mut heap = Heap::new();
  let record = PackageRecord {
    builder: Value::Nil,
    name: Value::Number(5.0),
    hash: Value::Nil,
    path: Value::Nil,
    content: Value::Nil,
    forced_refs: Value::Nil,
    extra_refs: Value::Nil,
    weak_refs: Value::Nil,
  };
  assert!(matches!(
    restore(&mut heap, &record),
    Err(PkgError::Record(RecordError::Invalid(_)))
  ));
}

#[test]
fn bundle_crosses_a_file() {
  let temp = TempDir::new().unwrap();
  let file = temp.path().join("pkg.json");

  let mut heap = Heap::new();
  let pkg = full_package(&mut heap);
  let hash = freeze(&mut heap, STORE_ROOT, &NamedRoots::new(), pkg).unwrap();
  let json = PackageBundle::capture(&mut heap, pkg).unwrap().to_json().unwrap();
  std::fs::write(&file, json).unwrap();

  let read = std::fs::read_to_string(&file).unwrap();
  let (heap, back) = PackageBundle::from_json(&read).unwrap().restore().unwrap();
  let restored = get(&heap, back);
  assert_eq!(restored.hash(), Some(&hash));
  assert_eq!(restored.name(), Some("full"));
  assert!(restored.is_frozen());
}
