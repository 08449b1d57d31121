//! Manifest version reader.
//!
//! The release version is read from `cargo metadata`, never guessed: a
//! missing, duplicated or empty entry is an error.

use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::execute::{ExecuteError, Invocation, Runner};

#[derive(Debug, Error)]
pub enum VersionError {
  #[error("package '{package}' not found in cargo metadata")]
  NotFound { package: String },

  #[error("package name '{package}' is ambiguous: {count} packages match")]
  Ambiguous { package: String, count: usize },

  #[error("package '{package}' has an empty version")]
  EmptyVersion { package: String },

  #[error("malformed cargo metadata: {0}")]
  Malformed(#[from] serde_json::Error),

  #[error("cargo metadata failed: {0}")]
  Query(#[from] ExecuteError),
}

/// A non-empty version read from package metadata.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct VersionString(String);

impl VersionString {
  pub fn as_str(&self) -> &str {
    &self.0
  }
}

impl fmt::Display for VersionString {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(&self.0)
  }
}

#[derive(Deserialize)]
struct Metadata {
  packages: Vec<PackageEntry>,
}

#[derive(Deserialize)]
struct PackageEntry {
  name: String,
  #[serde(default)]
  version: String,
}

/// Extract the version of `package` from `cargo metadata` JSON.
pub fn version_from_metadata(json: &str, package: &str) -> Result<VersionString, VersionError> {
  let metadata: Metadata = serde_json::from_str(json)?;
  let matches: Vec<&PackageEntry> = metadata.packages.iter().filter(|p| p.name == package).collect();

  match matches.as_slice() {
    [] => Err(VersionError::NotFound {
      package: package.to_string(),
    }),
    [entry] if entry.version.trim().is_empty() => Err(VersionError::EmptyVersion {
      package: package.to_string(),
    }),
    [entry] => Ok(VersionString(entry.version.clone())),
    many => Err(VersionError::Ambiguous {
      package: package.to_string(),
      count: many.len(),
    }),
  }
}

/// Read the version of `package` from the manifest at `root`.
pub async fn read_version<R: Runner>(root: &Path, package: &str, runner: &R) -> Result<VersionString, VersionError> {
  let manifest = root.join("Cargo.toml");
  let inv = Invocation::new("cargo", root).args([
    "metadata".to_string(),
    "--format-version".to_string(),
    "1".to_string(),
    "--no-deps".to_string(),
    "--manifest-path".to_string(),
    manifest.to_string_lossy().into_owned(),
  ]);
  let output = runner.run(&inv).await?.require_success(&inv)?;
  let version = version_from_metadata(&output.stdout, package)?;
  debug!(package, version = %version, "read package version");
  Ok(version)
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::util::testutil::{FakeRunner, write_package};
  use tempfile::TempDir;

  #[test]
  fn single_match_yields_version() {
    let json = r#"{"packages":[{"name":"utf8-command","version":"0.3.1"},{"name":"other","version":"9.9.9"}]}"#;
    assert_eq!(version_from_metadata(json, "utf8-command").unwrap().as_str(), "0.3.1");
  }

  #[test]
  fn zero_matches_is_not_found() {
    let json = r#"{"packages":[{"name":"other","version":"1.0.0"}]}"#;
    let err = version_from_metadata(json, "utf8-command").unwrap_err();
    assert!(matches!(err, VersionError::NotFound { ref package } if package == "utf8-command"));
    assert!(!err.to_string().is_empty());
  }

  #[test]
  fn multiple_matches_are_ambiguous() {
    let json = r#"{"packages":[{"name":"dup","version":"1.0.0"},{"name":"dup","version":"2.0.0"}]}"#;
    assert!(matches!(
      version_from_metadata(json, "dup"),
      Err(VersionError::Ambiguous { count: 2, .. })
    ));
  }

  #[test]
  fn empty_version_is_rejected() {
    let json = r#"{"packages":[{"name":"blank","version":""}]}"#;
    assert!(matches!(
      version_from_metadata(json, "blank"),
      Err(VersionError::EmptyVersion { .. })
    ));
  }

  #[test]
  fn name_match_is_exact() {
    let json = r#"{"packages":[{"name":"utf8-command-extra","version":"1.0.0"}]}"#;
    assert!(matches!(
      version_from_metadata(json, "utf8-command"),
      Err(VersionError::NotFound { .. })
    ));
  }

  #[test]
  fn malformed_json_is_reported() {
    assert!(matches!(
      version_from_metadata("not json", "x"),
      Err(VersionError::Malformed(_))
    ));
  }

  #[tokio::test]
  async fn reads_version_through_cargo_metadata() {
    let root = TempDir::new().unwrap();
    write_package(root.path(), "utf8-command", "0.3.1");
    let runner = FakeRunner::new();

    let version = read_version(root.path(), "utf8-command", &runner).await.unwrap();

    assert_eq!(version.to_string(), "0.3.1");
    assert_eq!(runner.count("metadata"), 1);
  }

  #[tokio::test]
  async fn failing_metadata_query_is_an_error() {
    let root = TempDir::new().unwrap();
    let runner = FakeRunner::new().fail_subcommand("metadata", 101, "error: could not find `Cargo.toml`");

    let err = read_version(root.path(), "utf8-command", &runner).await.unwrap_err();

    assert!(matches!(err, VersionError::Query(_)));
  }
}
