//! The common build configuration.
//!
//! One [`BuildConfiguration`] is built per platform and shared by reference
//! with every step, so all steps compile against the same snapshot, target
//! and arguments.

use std::collections::BTreeMap;
use std::path::Path;

use serde::Serialize;

use crate::execute::{CargoArgs, CargoInvocation, Invocation};
use crate::platform::{NativeInput, PlatformKey};
use crate::settings::Settings;
use crate::source::SourceSnapshot;
use crate::util::hash::{ContentHash, HashError, Hashable, ObjectHash};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BuildConfiguration {
  pub package: String,
  pub source: SourceSnapshot,
  pub platform: PlatformKey,
  pub native_inputs: Vec<NativeInput>,
  pub extra_inputs: Vec<String>,
  pub cargo_args: CargoArgs,
}

/// Content identity of a whole configuration.
#[derive(Serialize)]
struct ConfigIdentity<'a> {
  package: &'a str,
  source: &'a ObjectHash,
  platform: PlatformKey,
  native_inputs: &'a [NativeInput],
  extra_inputs: &'a [String],
  cargo_args: &'a CargoArgs,
}

impl Hashable for ConfigIdentity<'_> {}

/// Inputs the dependency cache depends on: everything except source files
/// other than the manifest and lockfile.
#[derive(Serialize)]
struct CacheKey<'a> {
  package: &'a str,
  manifest_hash: &'a ContentHash,
  lockfile_hash: Option<&'a ContentHash>,
  platform: PlatformKey,
  native_inputs: &'a [NativeInput],
  extra_inputs: &'a [String],
  cargo_args: &'a CargoArgs,
}

impl Hashable for CacheKey<'_> {}

impl BuildConfiguration {
  /// Derive the configuration for `platform` from a snapshot and settings.
  ///
  /// `--locked` is only passed when the snapshot carries a lockfile.
  /// Native inputs from settings follow the platform's own.
  pub fn new(package: &str, source: SourceSnapshot, platform: PlatformKey, settings: &Settings) -> Self {
    let cargo_args = CargoArgs {
      locked: source.lockfile_hash.is_some(),
      target: Some(platform.rust_target()),
      extra: settings.cargo_args.clone(),
    };
    Self {
      package: package.to_string(),
      source,
      platform,
      native_inputs: platform
        .native_inputs()
        .into_iter()
        .chain(settings.native_inputs.iter().cloned())
        .collect(),
      extra_inputs: settings.extra_inputs.clone(),
      cargo_args,
    }
  }

  pub fn config_hash(&self) -> Result<ObjectHash, HashError> {
    ConfigIdentity {
      package: &self.package,
      source: &self.source.hash,
      platform: self.platform,
      native_inputs: &self.native_inputs,
      extra_inputs: &self.extra_inputs,
      cargo_args: &self.cargo_args,
    }
    .compute_hash()
  }

  pub fn cache_key(&self) -> Result<ObjectHash, HashError> {
    CacheKey {
      package: &self.package,
      manifest_hash: &self.source.manifest_hash,
      lockfile_hash: self.source.lockfile_hash.as_ref(),
      platform: self.platform,
      native_inputs: &self.native_inputs,
      extra_inputs: &self.extra_inputs,
      cargo_args: &self.cargo_args,
    }
    .compute_hash()
  }

  /// Environment every compiling command of this configuration receives.
  ///
  /// A later native input overrides an earlier one's variable of the same name.
  pub fn env(&self) -> BTreeMap<String, String> {
    let mut env: BTreeMap<String, String> = self
      .native_inputs
      .iter()
      .flat_map(|input| input.env.iter().map(|(k, v)| (k.clone(), v.clone())))
      .collect();
    let rustflags: Vec<&str> = self
      .native_inputs
      .iter()
      .flat_map(|input| input.rustflags.iter().map(String::as_str))
      .collect();
    if !rustflags.is_empty() {
      env.insert("RUSTFLAGS".to_string(), rustflags.join(" "));
    }
    env
  }

  /// Compose `cargo` for this configuration, run in `cwd` with `target_dir`.
  pub fn cargo(&self, invocation: &CargoInvocation, cwd: &Path, target_dir: &Path) -> Invocation {
    let mut inv = invocation.to_invocation(&self.cargo_args, cwd, target_dir);
    for (key, value) in self.env() {
      inv.env.entry(key).or_insert(value);
    }
    inv
  }
}
