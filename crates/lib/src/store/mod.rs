//! Content-addressed store.
//!
//! Every artifact the pipeline produces lives in the store under a directory
//! named by the hash of its inputs. Objects are assembled in a scratch
//! directory and published with a single rename, so readers never observe a
//! partial object and concurrent producers of the same object are harmless.
//!
//! # Layout
//!
//! ```text
//! store/
//! ├── source/<hash>/    # filtered source snapshots
//! ├── deps/<hash>/      # dependency caches (target/)
//! ├── checks/<hash>/    # memoised passing check results
//! ├── package/<hash>/   # built executables (bin/)
//! ├── docs/<hash>/      # rendered documentation (doc/)
//! └── tmp/              # scratch directories, removed on drop
//! ```

pub mod marker;

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use tempfile::TempDir;
use thiserror::Error;
use tracing::{debug, warn};

use crate::platform::paths::store_dir;
use crate::util::hash::{DirHashError, ObjectHash};

#[derive(Debug, Error)]
pub enum StoreError {
  #[error("store io error at {path}: {source}")]
  Io {
    path: PathBuf,
    #[source]
    source: io::Error,
  },

  #[error("invalid completion marker at {path}: {message}")]
  Marker { path: PathBuf, message: String },

  #[error(transparent)]
  Hash(#[from] DirHashError),
}

/// The kinds of objects kept in the store, one top-level directory each.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ObjectKind {
  Source,
  Deps,
  Checks,
  Package,
  Docs,
}

impl ObjectKind {
  pub fn dir_name(&self) -> &'static str {
    match self {
      ObjectKind::Source => "source",
      ObjectKind::Deps => "deps",
      ObjectKind::Checks => "checks",
      ObjectKind::Package => "package",
      ObjectKind::Docs => "docs",
    }
  }
}

/// A scratch directory inside the store, deleted when dropped unless published.
#[derive(Debug)]
pub struct Scratch {
  dir: TempDir,
}

impl Scratch {
  pub fn path(&self) -> &Path {
    self.dir.path()
  }
}

#[derive(Debug, Clone)]
pub struct Store {
  root: PathBuf,
}

impl Store {
  pub fn new(root: impl Into<PathBuf>) -> Self {
    Self { root: root.into() }
  }

  /// The store at [`store_dir`] (honours `DEPOT_STORE`).
  pub fn open_default() -> Self {
    Self::new(store_dir())
  }

  pub fn root(&self) -> &Path {
    &self.root
  }

  pub fn object_path(&self, kind: ObjectKind, hash: &ObjectHash) -> PathBuf {
    self.root.join(kind.dir_name()).join(&hash.0)
  }

  /// Find a published object.
  ///
  /// An object whose marker is missing or whose contents no longer match it
  /// is removed and reported as absent, so the caller rebuilds it.
  pub fn lookup(&self, kind: ObjectKind, hash: &ObjectHash) -> Result<Option<PathBuf>, StoreError> {
    let path = self.object_path(kind, hash);
    if !path.exists() {
      return Ok(None);
    }
    if marker::verify(&path) {
      debug!(kind = kind.dir_name(), hash = %hash, "store hit");
      return Ok(Some(path));
    }
    warn!(path = ?path, "discarding incomplete store object");
    remove_dir(&path)?;
    Ok(None)
  }

  /// Create a fresh scratch directory under `<store>/tmp`.
  pub fn scratch(&self) -> Result<Scratch, StoreError> {
    let tmp = self.root.join("tmp");
    fs::create_dir_all(&tmp).map_err(|source| StoreError::Io {
      path: tmp.clone(),
      source,
    })?;
    let dir = tempfile::Builder::new()
      .prefix("scratch-")
      .tempdir_in(&tmp)
      .map_err(|source| StoreError::Io { path: tmp, source })?;
    Ok(Scratch { dir })
  }

  /// Mark `scratch` complete and move it into place as `kind/hash`.
  ///
  /// If another producer published the same object first, its copy wins and
  /// `scratch` is discarded.
  pub fn publish(&self, scratch: Scratch, kind: ObjectKind, hash: &ObjectHash) -> Result<PathBuf, StoreError> {
    let target = self.object_path(kind, hash);
    let parent = self.root.join(kind.dir_name());
    fs::create_dir_all(&parent).map_err(|source| StoreError::Io { path: parent, source })?;

    marker::write_marker(scratch.path())?;

    if let Err(source) = fs::rename(scratch.path(), &target) {
      if self.lookup(kind, hash)?.is_some() {
        debug!(path = ?target, "object already published by another producer");
        return Ok(target);
      }
      // A stale, invalid entry was removed by lookup; retry once.
      fs::rename(scratch.path(), &target).map_err(|_| StoreError::Io {
        path: target.clone(),
        source,
      })?;
    }

    debug!(kind = kind.dir_name(), hash = %hash, path = ?target, "published store object");
    Ok(target)
  }
}

fn remove_dir(path: &Path) -> Result<(), StoreError> {
  fs::remove_dir_all(path).map_err(|source| StoreError::Io {
    path: path.to_path_buf(),
    source,
  })
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::consts::COMPLETE_MARKER;
  use tempfile::TempDir;
  use tracing_test::traced_test;

  fn hash(s: &str) -> ObjectHash {
    ObjectHash(s.to_string())
  }

  #[test]
  fn publish_then_lookup() {
    let temp = TempDir::new().unwrap();
    let store = Store::new(temp.path());

    let scratch = store.scratch().unwrap();
    fs::write(scratch.path().join("result.json"), "{}").unwrap();
    let published = store.publish(scratch, ObjectKind::Checks, &hash("abc")).unwrap();

    assert_eq!(published, temp.path().join("checks/abc"));
    assert!(published.join(COMPLETE_MARKER).exists());
    assert_eq!(store.lookup(ObjectKind::Checks, &hash("abc")).unwrap(), Some(published));
  }

  #[test]
  fn lookup_of_missing_object_is_none() {
    let temp = TempDir::new().unwrap();
    let store = Store::new(temp.path());
    assert_eq!(store.lookup(ObjectKind::Deps, &hash("nope")).unwrap(), None);
  }

  #[test]
  #[traced_test]
  fn corrupted_object_is_discarded() {
    let temp = TempDir::new().unwrap();
    let store = Store::new(temp.path());

    let scratch = store.scratch().unwrap();
    fs::write(scratch.path().join("data"), "ok").unwrap();
    let path = store.publish(scratch, ObjectKind::Docs, &hash("h1")).unwrap();
    fs::write(path.join("data"), "corrupt").unwrap();

    assert_eq!(store.lookup(ObjectKind::Docs, &hash("h1")).unwrap(), None);
    assert!(!path.exists());
    assert!(logs_contain("discarding incomplete store object"));
  }

  #[test]
  fn object_without_marker_is_discarded() {
    let temp = TempDir::new().unwrap();
    let store = Store::new(temp.path());
    let partial = store.object_path(ObjectKind::Deps, &hash("partial"));
    fs::create_dir_all(&partial).unwrap();

    assert_eq!(store.lookup(ObjectKind::Deps, &hash("partial")).unwrap(), None);
    assert!(!partial.exists());
  }

  #[test]
  fn second_publisher_keeps_first_copy() {
    let temp = TempDir::new().unwrap();
    let store = Store::new(temp.path());

    let first = store.scratch().unwrap();
    fs::write(first.path().join("who"), "first").unwrap();
    store.publish(first, ObjectKind::Package, &hash("same")).unwrap();

    let second = store.scratch().unwrap();
    fs::write(second.path().join("who"), "second").unwrap();
    let path = store.publish(second, ObjectKind::Package, &hash("same")).unwrap();

    assert_eq!(fs::read_to_string(path.join("who")).unwrap(), "first");
  }

  #[test]
  fn dropped_scratch_is_removed() {
    let temp = TempDir::new().unwrap();
    let store = Store::new(temp.path());

    let scratch = store.scratch().unwrap();
    let path = scratch.path().to_path_buf();
    assert!(path.exists());
    drop(scratch);

    assert!(!path.exists());
  }
}
