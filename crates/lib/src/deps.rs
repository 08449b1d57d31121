//! Dependency cache builder.
//!
//! The package's external dependencies are compiled once against a dummy
//! copy of the package: the real manifest and lockfile with an empty stub at
//! every target path. The resulting target directory is published to the
//! store under a key that ignores ordinary source edits, and every later
//! step starts from a copy of it.

use std::fs;
use std::path::{Path, PathBuf};

use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info};
use walkdir::WalkDir;

use crate::config::BuildConfiguration;
use crate::execute::{CargoInvocation, ExecuteError, Runner};
use crate::store::{ObjectKind, Scratch, Store, StoreError};
use crate::util::fs::copy_tree;
use crate::util::hash::{HashError, ObjectHash};

/// Content of every stub target in the dummy source.
const STUB: &str = "#![allow(clippy::all)]\n#![allow(dead_code)]\npub fn main() {}\n";

/// Directories scanned for auto-discovered `*.rs` targets.
const TARGET_DIRS: &[&str] = &["src/bin", "tests", "benches", "examples"];

/// Manifest tables that declare explicit targets.
const TARGET_TABLES: &[&str] = &["bin", "test", "bench", "example"];

#[derive(Debug, Error)]
pub enum DepsError {
  #[error("failed to read manifest {path}: {message}")]
  Manifest { path: PathBuf, message: String },

  #[error("io error at {path}: {source}")]
  Io {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },

  #[error("dependency build step `{step}` failed: {source}")]
  Command {
    step: String,
    #[source]
    source: ExecuteError,
  },

  #[error("failed to compute cache key: {0}")]
  Key(#[from] HashError),

  #[error(transparent)]
  Store(#[from] StoreError),
}

/// The published, read-only dependency layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DependencyCacheArtifact {
  pub key: ObjectHash,
  pub store_path: PathBuf,
  /// The cached `CARGO_TARGET_DIR`.
  pub target_dir: PathBuf,
}

impl DependencyCacheArtifact {
  fn at(key: ObjectHash, store_path: PathBuf) -> Self {
    let target_dir = store_path.join("target");
    Self {
      key,
      store_path,
      target_dir,
    }
  }
}

/// A scratch working tree for one step: a writable copy of the source
/// snapshot and a target directory, optionally seeded from the cache.
#[derive(Debug)]
pub struct WorkTree {
  /// Holds the directory; dropping the tree removes it.
  _scratch: Scratch,
  pub src: PathBuf,
  pub target_dir: PathBuf,
}

impl WorkTree {
  pub fn prepare(
    store: &Store,
    config: &BuildConfiguration,
    cache: Option<&DependencyCacheArtifact>,
  ) -> Result<Self, StoreError> {
    let scratch = store.scratch()?;
    let src = scratch.path().join("src");
    let target_dir = scratch.path().join("target");

    config.source.materialize(&src).map_err(|source| StoreError::Io {
      path: src.clone(),
      source,
    })?;

    match cache {
      Some(cache) => {
        let bytes = copy_tree(&cache.target_dir, &target_dir).map_err(|source| StoreError::Io {
          path: cache.target_dir.clone(),
          source,
        })?;
        debug!(key = %cache.key, bytes, "inherited dependency cache");
      }
      None => fs::create_dir_all(&target_dir).map_err(|source| StoreError::Io {
        path: target_dir.clone(),
        source,
      })?,
    }

    Ok(Self {
      _scratch: scratch,
      src,
      target_dir,
    })
  }
}

/// The three compiles that populate the cache, one per mode consumers use.
pub fn dependency_steps() -> Vec<CargoInvocation> {
  vec![
    CargoInvocation::new(&["check"]).args(["--release", "--all-targets"]),
    CargoInvocation::new(&["build"]).arg("--release"),
    CargoInvocation::new(&["test"]).args(["--release", "--no-run"]),
  ]
}

/// Build (or find) the dependency cache for `config`.
pub async fn build_dependency_cache<R: Runner>(
  config: &BuildConfiguration,
  store: &Store,
  runner: &R,
) -> Result<DependencyCacheArtifact, DepsError> {
  let key = config.cache_key()?;

  if let Some(path) = store.lookup(ObjectKind::Deps, &key)? {
    info!(key = %key, "dependency cache hit");
    return Ok(DependencyCacheArtifact::at(key, path));
  }

  info!(key = %key, package = %config.package, platform = %config.platform, "building dependency cache");

  let scratch = store.scratch()?;
  let src = scratch.path().join("src");
  let target_dir = scratch.path().join("target");

  let stubs = write_dummy_source(&config.source.root, &src)?;
  debug!(stubs = stubs.len(), "wrote dummy source");

  for step in dependency_steps() {
    let inv = config.cargo(&step, &src, &target_dir);
    let name = step.subcommand.join(" ");
    let output = runner
      .run(&inv)
      .await
      .and_then(|out| out.require_success(&inv))
      .map_err(|source| DepsError::Command {
        step: name.clone(),
        source,
      })?;
    debug!(step = %name, stdout_len = output.stdout.len(), "dependency step finished");
  }

  let removed = remove_package_fingerprints(&target_dir, &config.package)?;
  debug!(removed, "removed stub fingerprints");

  fs::remove_dir_all(&src).map_err(|source| DepsError::Io { path: src, source })?;

  let path = store.publish(scratch, ObjectKind::Deps, &key)?;
  info!(key = %key, path = ?path, "published dependency cache");

  Ok(DependencyCacheArtifact::at(key, path))
}

/// Write the dummy source of the package at `source` into `dest`.
///
/// Returns the relative paths of the stubs written.
pub fn write_dummy_source(source: &Path, dest: &Path) -> Result<Vec<PathBuf>, DepsError> {
  let manifest_path = source.join("Cargo.toml");
  let content = fs::read_to_string(&manifest_path).map_err(|e| DepsError::Manifest {
    path: manifest_path.clone(),
    message: e.to_string(),
  })?;
  let manifest: toml::Table = toml::from_str(&content).map_err(|e| DepsError::Manifest {
    path: manifest_path.clone(),
    message: e.to_string(),
  })?;

  create_dir(dest)?;
  copy(&manifest_path, &dest.join("Cargo.toml"))?;
  let lockfile = source.join("Cargo.lock");
  if lockfile.exists() {
    copy(&lockfile, &dest.join("Cargo.lock"))?;
  }

  let stubs = target_paths(source, &manifest);
  for rel in &stubs {
    let path = dest.join(rel);
    if let Some(parent) = path.parent() {
      create_dir(parent)?;
    }
    fs::write(&path, STUB).map_err(|source| DepsError::Io { path, source })?;
  }

  Ok(stubs)
}

/// Every target source path the package declares or cargo would discover.
fn target_paths(source: &Path, manifest: &toml::Table) -> Vec<PathBuf> {
  let mut paths = Vec::new();

  for rel in ["src/lib.rs", "src/main.rs", "build.rs"] {
    if source.join(rel).is_file() {
      paths.push(PathBuf::from(rel));
    }
  }

  for dir in TARGET_DIRS {
    let Ok(entries) = fs::read_dir(source.join(dir)) else {
      continue;
    };
    let mut found: Vec<PathBuf> = entries
      .filter_map(Result::ok)
      .filter_map(|entry| {
        let path = entry.path();
        if path.is_file() && path.extension().is_some_and(|e| e == "rs") {
          Some(Path::new(dir).join(entry.file_name()))
        } else if path.join("main.rs").is_file() {
          Some(Path::new(dir).join(entry.file_name()).join("main.rs"))
        } else {
          None
        }
      })
      .collect();
    found.sort();
    paths.extend(found);
  }

  if let Some(build) = manifest
    .get("package")
    .and_then(|p| p.get("build"))
    .and_then(|b| b.as_str())
  {
    paths.push(PathBuf::from(build));
  }

  if let Some(path) = manifest.get("lib").and_then(|l| l.get("path")).and_then(|p| p.as_str()) {
    paths.push(PathBuf::from(path));
  }

  for table in TARGET_TABLES {
    let Some(targets) = manifest.get(*table).and_then(|t| t.as_array()) else {
      continue;
    };
    for target in targets {
      if let Some(path) = target.get("path").and_then(|p| p.as_str()) {
        paths.push(PathBuf::from(path));
      }
    }
  }

  paths.sort();
  paths.dedup();
  paths
}

/// Remove the fingerprints cargo recorded for the stub crate itself, so the
/// real sources are recompiled in consumers. Dependency fingerprints stay.
///
/// Returns the number of fingerprint entries removed.
pub fn remove_package_fingerprints(target_dir: &Path, package: &str) -> Result<usize, DepsError> {
  let names = [package.to_string(), package.replace('-', "_")];
  let mut removed = 0;

  let fingerprint_dirs: Vec<PathBuf> = WalkDir::new(target_dir)
    .max_depth(3)
    .into_iter()
    .filter_map(Result::ok)
    .filter(|e| e.file_type().is_dir() && e.file_name() == ".fingerprint")
    .map(|e| e.into_path())
    .collect();

  for dir in fingerprint_dirs {
    let entries = fs::read_dir(&dir).map_err(|source| DepsError::Io {
      path: dir.clone(),
      source,
    })?;
    for entry in entries.filter_map(Result::ok) {
      let file_name = entry.file_name();
      let Some(name) = file_name.to_str() else {
        continue;
      };
      if !names.iter().any(|n| is_fingerprint_of(name, n)) {
        continue;
      }
      let path = entry.path();
      fs::remove_dir_all(&path).map_err(|source| DepsError::Io { path, source })?;
      removed += 1;
    }
  }

  Ok(removed)
}

/// `<crate>-<hex hash>`, where the hash part is nothing but hex digits.
fn is_fingerprint_of(entry: &str, krate: &str) -> bool {
  entry
    .strip_prefix(krate)
    .and_then(|rest| rest.strip_prefix('-'))
    .is_some_and(|hash| !hash.is_empty() && hash.chars().all(|c| c.is_ascii_hexdigit()))
}

fn create_dir(path: &Path) -> Result<(), DepsError> {
  fs::create_dir_all(path).map_err(|source| DepsError::Io {
    path: path.to_path_buf(),
    source,
  })
}

fn copy(from: &Path, to: &Path) -> Result<(), DepsError> {
  fs::copy(from, to).map(|_| ()).map_err(|source| DepsError::Io {
    path: from.to_path_buf(),
    source,
  })
}
