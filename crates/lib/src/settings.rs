//! Package settings.
//!
//! Settings are read from an optional `depot.toml` at the package root.
//! A handful of values can be overridden from the environment:
//! - `DEPOT_ADVISORY_DB`: the advisory database passed to `cargo audit`
//!
//! The store location (`DEPOT_STORE`) is resolved in [`crate::platform::paths`].

use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;
use tracing::debug;

use crate::consts::SETTINGS_FILENAME;
use crate::platform::{NativeInput, PlatformKey};

#[derive(Debug, Error)]
pub enum SettingsError {
  #[error("failed to read {path}: {source}")]
  Read {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },

  #[error("invalid settings in {path}: {source}")]
  Parse {
    path: PathBuf,
    #[source]
    source: toml::de::Error,
  },

  #[error("no [package] name in {path}; set `package` in depot.toml")]
  NoPackageName { path: PathBuf },

  #[error("parallelism must be at least 1")]
  ZeroParallelism,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SourceSettings {
  /// Extra file names (`README.md`) or extensions (`*.sql`) kept in snapshots.
  pub include: Vec<String>,
  /// Extra directories dropped from snapshots, relative to the package root.
  pub exclude: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AuditSettings {
  pub advisory_db: Option<PathBuf>,
  /// Waived advisory ids.
  pub ignore: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DevenvSettings {
  /// Supplementary tools; `None` keeps the defaults.
  pub tools: Option<Vec<String>>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Settings {
  pub package: Option<String>,
  pub parallelism: Option<usize>,
  pub platforms: Vec<PlatformKey>,
  pub cargo_args: Vec<String>,
  /// Extra build inputs recorded in every configuration (e.g. `pkg-config`).
  pub extra_inputs: Vec<String>,
  /// System libraries added to every platform's own native inputs.
  pub native_inputs: Vec<NativeInput>,
  pub source: SourceSettings,
  pub audit: AuditSettings,
  pub devenv: DevenvSettings,
}

impl Settings {
  /// Load `depot.toml` from `root` if present, then apply environment overrides.
  pub fn load(root: &Path) -> Result<Self, SettingsError> {
    let path = root.join(SETTINGS_FILENAME);
    let mut settings = if path.exists() {
      let content = fs::read_to_string(&path).map_err(|source| SettingsError::Read {
        path: path.clone(),
        source,
      })?;
      debug!(path = ?path, "loading settings");
      Self::parse(&content, &path)?
    } else {
      Self::default()
    };

    if let Some(db) = std::env::var_os("DEPOT_ADVISORY_DB") {
      settings.audit.advisory_db = Some(PathBuf::from(db));
    }

    Ok(settings)
  }

  fn parse(content: &str, path: &Path) -> Result<Self, SettingsError> {
    let settings: Settings = toml::from_str(content).map_err(|source| SettingsError::Parse {
      path: path.to_path_buf(),
      source,
    })?;
    if settings.parallelism == Some(0) {
      return Err(SettingsError::ZeroParallelism);
    }
    Ok(settings)
  }

  /// The configured parallelism, or the number of available CPUs.
  pub fn parallelism(&self) -> usize {
    self
      .parallelism
      .unwrap_or_else(|| std::thread::available_parallelism().map(|n| n.get()).unwrap_or(1))
  }

  /// Platforms to build when none are requested explicitly.
  ///
  /// Falls back to the host platform; empty if the host is unsupported.
  pub fn default_platforms(&self) -> Vec<PlatformKey> {
    if !self.platforms.is_empty() {
      return self.platforms.clone();
    }
    PlatformKey::current().into_iter().collect()
  }

  /// The wrapped package's name: `package` from settings, else the
  /// `[package].name` of the root manifest.
  pub fn package_name(&self, root: &Path) -> Result<String, SettingsError> {
    if let Some(name) = &self.package {
      return Ok(name.clone());
    }

    let path = root.join("Cargo.toml");
    let content = fs::read_to_string(&path).map_err(|source| SettingsError::Read {
      path: path.clone(),
      source,
    })?;
    let manifest: toml::Table = toml::from_str(&content).map_err(|source| SettingsError::Parse {
      path: path.clone(),
      source,
    })?;

    manifest
      .get("package")
      .and_then(|p| p.get("name"))
      .and_then(|n| n.as_str())
      .map(str::to_string)
      .ok_or(SettingsError::NoPackageName { path })
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serial_test::serial;
  use tempfile::TempDir;

  const FULL: &str = r#"
package = "utf8-command"
parallelism = 4
platforms = ["x86_64-linux", "aarch64-darwin"]
cargo_args = ["--features", "serde"]

[source]
include = ["README.md"]
exclude = ["fuzz"]

[audit]
advisory_db = "/var/lib/advisory-db"
ignore = ["RUSTSEC-2020-0071"]

[devenv]
tools = ["rust-analyzer"]

[[native_inputs]]
name = "openssl"
rustflags = ["-L/opt/openssl/lib"]
env = { PKG_CONFIG_PATH = "/opt/openssl/lib/pkgconfig" }
"#;

  #[test]
  fn parses_full_settings() {
    let settings = Settings::parse(FULL, Path::new("depot.toml")).unwrap();

    assert_eq!(settings.package.as_deref(), Some("utf8-command"));
    assert_eq!(settings.parallelism(), 4);
    assert_eq!(
      settings.platforms,
      vec![PlatformKey::X86_64Linux, PlatformKey::Aarch64Darwin]
    );
    assert_eq!(settings.source.exclude, vec!["fuzz"]);
    assert_eq!(settings.audit.ignore, vec!["RUSTSEC-2020-0071"]);
    assert_eq!(settings.devenv.tools, Some(vec!["rust-analyzer".to_string()]));
    assert_eq!(
      settings.native_inputs,
      vec![NativeInput {
        name: "openssl".to_string(),
        rustflags: vec!["-L/opt/openssl/lib".to_string()],
        env: [("PKG_CONFIG_PATH".to_string(), "/opt/openssl/lib/pkgconfig".to_string())].into(),
      }]
    );
  }

  #[test]
  fn rejects_unknown_keys_and_platforms() {
    assert!(matches!(
      Settings::parse("paralelism = 2", Path::new("depot.toml")),
      Err(SettingsError::Parse { .. })
    ));
    assert!(matches!(
      Settings::parse("platforms = [\"riscv64-linux\"]", Path::new("depot.toml")),
      Err(SettingsError::Parse { .. })
    ));
  }

  #[test]
  fn rejects_zero_parallelism() {
    assert!(matches!(
      Settings::parse("parallelism = 0", Path::new("depot.toml")),
      Err(SettingsError::ZeroParallelism)
    ));
  }

  #[test]
  #[serial]
  fn missing_file_gives_defaults() {
    let temp = TempDir::new().unwrap();
    temp_env::with_var("DEPOT_ADVISORY_DB", None::<&str>, || {
      let settings = Settings::load(temp.path()).unwrap();
      assert_eq!(settings, Settings::default());
    });
  }

  #[test]
  #[serial]
  fn advisory_db_env_overrides_file() {
    let temp = TempDir::new().unwrap();
    fs::write(temp.path().join(SETTINGS_FILENAME), FULL).unwrap();

    temp_env::with_var("DEPOT_ADVISORY_DB", Some("/override/db"), || {
      let settings = Settings::load(temp.path()).unwrap();
      assert_eq!(settings.audit.advisory_db, Some(PathBuf::from("/override/db")));
    });
  }

  #[test]
  fn package_name_falls_back_to_manifest() {
    let temp = TempDir::new().unwrap();
    fs::write(
      temp.path().join("Cargo.toml"),
      "[package]\nname = \"utf8-command\"\nversion = \"0.3.1\"\n",
    )
    .unwrap();

    let settings = Settings::default();
    assert_eq!(settings.package_name(temp.path()).unwrap(), "utf8-command");

    let named = Settings {
      package: Some("other".to_string()),
      ..Settings::default()
    };
    assert_eq!(named.package_name(temp.path()).unwrap(), "other");
  }

  #[test]
  fn package_name_requires_package_table() {
    let temp = TempDir::new().unwrap();
    fs::write(temp.path().join("Cargo.toml"), "[workspace]\nmembers = []\n").unwrap();

    assert!(matches!(
      Settings::default().package_name(temp.path()),
      Err(SettingsError::NoPackageName { .. })
    ));
  }
}
