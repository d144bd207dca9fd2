use tracing::debug;

use super::types::{PkgError, package_id};
use crate::config::{HashConfig, StoreConfig};
use crate::hash::{HashCtx, NamedRoots};
use crate::util::hash::PkgHash;
use crate::value::{Heap, Value};

/// `"{store_root}/pkg/{hash}"`, with `-{name}` appended when named.
pub fn store_path(store_root: &str, hash: &PkgHash, name: Option<&str>) -> String {
  match name {
    Some(name) => format!("{store_root}/pkg/{hash}-{name}"),
    None => format!("{store_root}/pkg/{hash}"),
  }
}

/// Hash a package and fix its store path.
///
/// The hash covers the store root, the name and the full builder graph, in
/// that order, through one hashing context. Dependencies reached from the
/// builder must already be frozen. Freezing is one-shot: a second call
/// fails with [`PkgError::AlreadyFrozen`] and leaves the package untouched.
pub fn freeze(heap: &mut Heap, store_root: &str, roots: &NamedRoots, pkg: Value) -> Result<PkgHash, PkgError> {
  freeze_with(heap, store_root, roots, HashConfig::default(), pkg)
}

/// [`freeze`] using the store root and hashing limits from `config`.
pub fn freeze_with_config(
  heap: &mut Heap,
  config: &StoreConfig,
  roots: &NamedRoots,
  pkg: Value,
) -> Result<PkgHash, PkgError> {
  freeze_with(heap, &config.store_root, roots, config.hash, pkg)
}

fn freeze_with(
  heap: &mut Heap,
  store_root: &str,
  roots: &NamedRoots,
  hash_config: HashConfig,
  pkg: Value,
) -> Result<PkgHash, PkgError> {
  let id = package_id(heap, pkg)?;
  let package = heap.package(id)?;
  if package.is_frozen() {
    return Err(PkgError::AlreadyFrozen {
      hash: package.hash().cloned(),
    });
  }

  let mut ctx = HashCtx::new(heap, roots, hash_config)?;
  ctx.update_str(store_root)?;
  match package.name() {
    Some(name) => ctx.update_str(name)?,
    None => ctx.update(Value::Nil)?,
  }
  ctx.update(package.builder().unwrap_or(Value::Nil))?;
  let hash = ctx.finish();
  let path = store_path(store_root, &hash, package.name());

  debug!(hash = %hash, path = %path, "package frozen");

  let package = heap.package_mut(id)?;
  package.hash = Some(hash.clone());
  package.path = Some(path);
  package.frozen = true;
  Ok(hash)
}
