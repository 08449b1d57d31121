use std::path::PathBuf;

use crate::consts::APP_NAME;

/// Returns the user's home directory, falling back to the temp directory when
/// no home is configured (e.g., minimal CI containers).
#[cfg(windows)]
pub fn home_dir() -> PathBuf {
  std::env::var_os("USERPROFILE")
    .map(PathBuf::from)
    .unwrap_or_else(std::env::temp_dir)
}

/// Returns the user's home directory, falling back to the temp directory when
/// no home is configured (e.g., minimal CI containers).
#[cfg(not(windows))]
pub fn home_dir() -> PathBuf {
  std::env::var_os("HOME")
    .map(PathBuf::from)
    .unwrap_or_else(std::env::temp_dir)
}

/// Returns the directory for cache files for the application
#[cfg(windows)]
pub fn cache_dir() -> PathBuf {
  std::env::var_os("LOCALAPPDATA")
    .map(PathBuf::from)
    .unwrap_or_else(home_dir)
    .join(APP_NAME)
    .join("Cache")
}

/// Returns the directory for cache files for the application
#[cfg(not(windows))]
pub fn cache_dir() -> PathBuf {
  let cache_home = std::env::var("XDG_CACHE_HOME")
    .map(PathBuf::from)
    .unwrap_or_else(|_| home_dir().join(".cache"));
  cache_home.join(APP_NAME)
}

/// Returns the root of the content-addressed store.
///
/// `DEPOT_STORE` overrides the default `<cache_dir>/store`.
pub fn store_dir() -> PathBuf {
  if let Some(path) = std::env::var_os("DEPOT_STORE") {
    return PathBuf::from(path);
  }
  cache_dir().join("store")
}

/// Cargo's home directory: `CARGO_HOME`, else `~/.cargo`.
pub fn cargo_home() -> PathBuf {
  std::env::var_os("CARGO_HOME")
    .map(PathBuf::from)
    .unwrap_or_else(|| home_dir().join(".cargo"))
}

/// Where `cargo audit` keeps its advisory database by default.
pub fn default_advisory_db() -> PathBuf {
  cargo_home().join("advisory-db")
}
