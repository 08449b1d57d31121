//! Cargo argument composition.
//!
//! Every cargo command the pipeline runs is built from two parts:
//! - [`CargoArgs`]: the shared arguments carried by the build configuration
//!   (`--locked`, `--target`, user extras), identical for every step
//! - [`CargoInvocation`]: what a particular step adds on top
//!
//! The composed command line is always
//! `cargo <subcommand...> <shared> <args> [-- <trailing>]`.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use super::types::Invocation;

/// Arguments shared by every compiling cargo command of one configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CargoArgs {
  /// Pass `--locked`; requires a lockfile in the source snapshot.
  pub locked: bool,
  /// Rust target triple passed as `--target`.
  pub target: Option<String>,
  /// Extra user-supplied arguments from settings.
  #[serde(default)]
  pub extra: Vec<String>,
}

impl CargoArgs {
  pub fn shared(&self) -> Vec<String> {
    let mut args = Vec::new();
    if self.locked {
      args.push("--locked".to_string());
    }
    if let Some(target) = &self.target {
      args.push("--target".to_string());
      args.push(target.clone());
    }
    args.extend(self.extra.iter().cloned());
    args
  }

  /// Directory under a target dir holding artifacts for `profile`.
  ///
  /// With `--target` cargo nests outputs under the triple.
  pub fn profile_dir(&self, target_dir: &Path, profile: &str) -> std::path::PathBuf {
    match &self.target {
      Some(target) => target_dir.join(target).join(profile),
      None => target_dir.join(profile),
    }
  }

  /// Directory under a target dir where `cargo doc` writes.
  pub fn doc_dir(&self, target_dir: &Path) -> std::path::PathBuf {
    self.profile_dir(target_dir, "doc")
  }
}

/// One step's cargo command before the shared arguments are mixed in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CargoInvocation {
  pub subcommand: Vec<String>,
  /// Whether the shared [`CargoArgs`] apply (false for non-compiling tools).
  pub shared: bool,
  pub args: Vec<String>,
  pub trailing: Vec<String>,
  pub env: BTreeMap<String, String>,
}

impl CargoInvocation {
  pub fn new(subcommand: &[&str]) -> Self {
    Self {
      subcommand: subcommand.iter().map(|s| s.to_string()).collect(),
      shared: true,
      args: Vec::new(),
      trailing: Vec::new(),
      env: BTreeMap::new(),
    }
  }

  pub fn without_shared_args(mut self) -> Self {
    self.shared = false;
    self
  }

  pub fn arg(mut self, arg: impl Into<String>) -> Self {
    self.args.push(arg.into());
    self
  }

  pub fn args<I, S>(mut self, args: I) -> Self
  where
    I: IntoIterator<Item = S>,
    S: Into<String>,
  {
    self.args.extend(args.into_iter().map(Into::into));
    self
  }

  pub fn trailing<I, S>(mut self, args: I) -> Self
  where
    I: IntoIterator<Item = S>,
    S: Into<String>,
  {
    self.trailing.extend(args.into_iter().map(Into::into));
    self
  }

  pub fn env(mut self, key: &str, value: impl Into<String>) -> Self {
    self.env.insert(key.to_string(), value.into());
    self
  }

  /// The argument vector passed to `cargo`.
  pub fn compose(&self, shared: &CargoArgs) -> Vec<String> {
    let mut args = self.subcommand.clone();
    if self.shared {
      args.extend(shared.shared());
    }
    args.extend(self.args.iter().cloned());
    if !self.trailing.is_empty() {
      args.push("--".to_string());
      args.extend(self.trailing.iter().cloned());
    }
    args
  }

  /// Build the runnable [`Invocation`] in `cwd` with `CARGO_TARGET_DIR` set.
  pub fn to_invocation(&self, shared: &CargoArgs, cwd: &Path, target_dir: &Path) -> Invocation {
    let mut inv = Invocation::new("cargo", cwd)
      .args(self.compose(shared))
      .env("CARGO_TARGET_DIR", target_dir.to_string_lossy())
      .env("CARGO_TERM_PROGRESS_WHEN", "never");
    for (key, value) in &self.env {
      inv.env.insert(key.clone(), value.clone());
    }
    inv
  }
}
