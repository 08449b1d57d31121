//! Package builder.
//!
//! Builds the package's release executables on top of the dependency cache.
//! The build is deliberately independent of the checks: it never runs tests
//! and does not wait for any check result.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

use crate::check::CheckKind;
use crate::config::BuildConfiguration;
use crate::deps::{DependencyCacheArtifact, WorkTree};
use crate::execute::{CargoInvocation, ExecuteError, Runner};
use crate::store::{ObjectKind, Store, StoreError};
use crate::util::hash::{HashError, Hashable, ObjectHash};

#[derive(Debug, Error)]
pub enum PackageError {
  #[error("package build failed: {0}")]
  Build(#[from] ExecuteError),

  #[error("failed to copy {path}: {source}")]
  Copy {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },

  #[error("failed to hash package inputs: {0}")]
  Hash(#[from] HashError),

  #[error(transparent)]
  Store(#[from] StoreError),
}

#[derive(Debug, Clone, Serialize)]
pub struct PackageArtifact {
  pub store_path: PathBuf,
  pub binaries: Vec<PathBuf>,
  pub config: Arc<BuildConfiguration>,
  pub cache: Arc<DependencyCacheArtifact>,
  /// Checks registered for this configuration; not run by the build.
  pub checks: Vec<CheckKind>,
}

/// The subset of a cargo JSON message the builder reads.
#[derive(Debug, Deserialize)]
struct Message {
  reason: String,
  #[serde(default)]
  manifest_path: Option<PathBuf>,
  #[serde(default)]
  executable: Option<PathBuf>,
}

pub fn build_invocation() -> CargoInvocation {
  CargoInvocation::new(&["build"]).args(["--release", "--message-format", "json-render-diagnostics"])
}

#[derive(Serialize)]
struct PackageKey<'a> {
  config: &'a ObjectHash,
  cache: &'a ObjectHash,
  invocation: &'a CargoInvocation,
}

impl Hashable for PackageKey<'_> {}

/// Executables of the package at `manifest` listed in cargo's JSON output.
///
/// Lines that are not JSON (or not artifacts) are skipped; dependency
/// artifacts are recognised by their manifest path.
pub fn own_executables(stdout: &str, manifest: &Path) -> Vec<PathBuf> {
  stdout
    .lines()
    .filter_map(|line| serde_json::from_str::<Message>(line).ok())
    .filter(|msg| msg.reason == "compiler-artifact")
    .filter(|msg| msg.manifest_path.as_deref() == Some(manifest))
    .filter_map(|msg| msg.executable)
    .collect()
}

/// Build the release executables for `config`.
///
/// A successful build of a package without binary targets yields an
/// artifact with no binaries.
pub async fn build_package<R: Runner>(
  config: Arc<BuildConfiguration>,
  cache: Arc<DependencyCacheArtifact>,
  checks: Vec<CheckKind>,
  store: &Store,
  runner: &R,
) -> Result<PackageArtifact, PackageError> {
  let invocation = build_invocation();
  let config_hash = config.config_hash()?;
  let hash = PackageKey {
    config: &config_hash,
    cache: &cache.key,
    invocation: &invocation,
  }
  .compute_hash()?;

  let store_path = match store.lookup(ObjectKind::Package, &hash)? {
    Some(path) => {
      info!(hash = %hash, "package already built");
      path
    }
    None => {
      info!(package = %config.package, platform = %config.platform, "building package");
      let tree = WorkTree::prepare(store, &config, Some(&cache))?;
      let inv = config.cargo(&invocation, &tree.src, &tree.target_dir);
      let output = runner.run(&inv).await?.require_success(&inv)?;

      // A library-only package builds no executables and publishes an empty bin/
      let executables = own_executables(&output.stdout, &tree.src.join("Cargo.toml"));

      let out = store.scratch()?;
      let bin = out.path().join("bin");
      fs::create_dir_all(&bin).map_err(|source| PackageError::Copy {
        path: bin.clone(),
        source,
      })?;
      for exe in &executables {
        let Some(name) = exe.file_name() else {
          continue;
        };
        fs::copy(exe, bin.join(name)).map_err(|source| PackageError::Copy {
          path: exe.clone(),
          source,
        })?;
        debug!(exe = ?exe, "collected executable");
      }
      store.publish(out, ObjectKind::Package, &hash)?
    }
  };

  let binaries = list_binaries(&store_path.join("bin"))?;
  info!(path = ?store_path, binaries = binaries.len(), "package ready");

  Ok(PackageArtifact {
    store_path,
    binaries,
    config,
    cache,
    checks,
  })
}

fn list_binaries(bin: &Path) -> Result<Vec<PathBuf>, PackageError> {
  let entries = fs::read_dir(bin).map_err(|source| PackageError::Copy {
    path: bin.to_path_buf(),
    source,
  })?;
  let mut binaries: Vec<PathBuf> = entries.filter_map(Result::ok).map(|e| e.path()).collect();
  binaries.sort();
  Ok(binaries)
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::deps::build_dependency_cache;
  use crate::platform::PlatformKey;
  use crate::settings::Settings;
  use crate::source::{SourceFilter, SourceSnapshot};
  use crate::util::testutil::{FakeRunner, write_lib_package, write_package};
  use tempfile::TempDir;

  #[test]
  fn parses_only_own_executables() {
    let stdout = r#"{"reason":"compiler-artifact","manifest_path":"/registry/serde/Cargo.toml","executable":null}
warning: something unstructured
{"reason":"compiler-artifact","manifest_path":"/w/src/Cargo.toml","executable":"/w/target/release/demo"}
{"reason":"compiler-artifact","manifest_path":"/w/src/Cargo.toml","executable":null}
{"reason":"compiler-artifact","manifest_path":"/registry/tool/Cargo.toml","executable":"/w/target/release/tool"}
{"reason":"build-finished","success":true}"#;

    assert_eq!(
      own_executables(stdout, Path::new("/w/src/Cargo.toml")),
      vec![PathBuf::from("/w/target/release/demo")]
    );
  }

  #[tokio::test]
  async fn builds_without_running_tests() {
    let root = TempDir::new().unwrap();
    let store_dir = TempDir::new().unwrap();
    let store = Store::new(store_dir.path());
    write_package(root.path(), "demo", "0.1.0");
    let snapshot = SourceSnapshot::capture(root.path(), &SourceFilter::default(), &store).unwrap();
    let config = Arc::new(BuildConfiguration::new(
      "demo",
      snapshot,
      PlatformKey::X86_64Linux,
      &Settings::default(),
    ));
    let runner = FakeRunner::new();
    let cache = Arc::new(build_dependency_cache(&config, &store, &runner).await.unwrap());
    let before = runner.calls().len();

    let artifact = build_package(config, cache, CheckKind::ALL.to_vec(), &store, &runner)
      .await
      .unwrap();

    let calls = runner.calls();
    assert_eq!(calls.len(), before + 1);
    assert_eq!(calls[before].args[0], "build");
    assert_eq!(runner.count("nextest"), 0);
    assert_eq!(artifact.binaries, vec![artifact.store_path.join("bin/demo")]);
    assert_eq!(artifact.checks, CheckKind::ALL.to_vec());
  }

  #[tokio::test]
  async fn library_only_package_builds_without_binaries() {
    let root = TempDir::new().unwrap();
    let store_dir = TempDir::new().unwrap();
    let store = Store::new(store_dir.path());
    write_lib_package(root.path(), "utf8-command", "0.3.1");
    let snapshot = SourceSnapshot::capture(root.path(), &SourceFilter::default(), &store).unwrap();
    let config = Arc::new(BuildConfiguration::new(
      "utf8-command",
      snapshot,
      PlatformKey::X86_64Linux,
      &Settings::default(),
    ));
    let runner = FakeRunner::new();
    let cache = Arc::new(build_dependency_cache(&config, &store, &runner).await.unwrap());

    let artifact = build_package(config, cache, Vec::new(), &store, &runner).await.unwrap();

    assert!(artifact.binaries.is_empty());
    assert!(artifact.store_path.join("bin").is_dir());
    assert_eq!(runner.count("nextest"), 0);
  }

  #[test]
  fn library_artifacts_are_not_executables() {
    let stdout = r#"{"reason":"compiler-artifact","manifest_path":"/w/src/Cargo.toml","target":{"kind":["lib"]},"executable":null}
{"reason":"build-finished","success":true}"#;

    assert!(own_executables(stdout, Path::new("/w/src/Cargo.toml")).is_empty());
  }

  #[tokio::test]
  async fn build_failure_is_an_error() {
    let root = TempDir::new().unwrap();
    let store_dir = TempDir::new().unwrap();
    let store = Store::new(store_dir.path());
    write_package(root.path(), "demo", "0.1.0");
    let snapshot = SourceSnapshot::capture(root.path(), &SourceFilter::default(), &store).unwrap();
    let config = Arc::new(BuildConfiguration::new(
      "demo",
      snapshot,
      PlatformKey::X86_64Linux,
      &Settings::default(),
    ));
    let cache = Arc::new(build_dependency_cache(&config, &store, &FakeRunner::new()).await.unwrap());
    let runner = FakeRunner::new().respond(
      |inv| inv.args.iter().any(|a| a == "json-render-diagnostics"),
      crate::execute::CmdOutput {
        code: Some(101),
        stdout: String::new(),
        stderr: "error[E0425]: cannot find value `x`".to_string(),
      },
    );

    let err = build_package(config, cache, Vec::new(), &store, &runner).await.unwrap_err();

    assert!(matches!(err, PackageError::Build(ExecuteError::CmdFailed { .. })));
  }
}
