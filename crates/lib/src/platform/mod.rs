//! Supported build platforms.
//!
//! [`PlatformKey`] is the closed set of platforms the pipeline runs on. All
//! platform-conditional behaviour (the rustc target, native build inputs)
//! is looked up from this table rather than branched on at use sites.

pub mod arch;
pub mod os;
pub mod paths;

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use arch::Arch;
use os::Os;

/// Platform identifier combining architecture and OS (e.g., "aarch64-darwin")
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum PlatformKey {
  X86_64Linux,
  Aarch64Linux,
  X86_64Darwin,
  Aarch64Darwin,
}

/// A native (non-Rust) build input a platform needs, e.g. a system library
/// the linker must find.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NativeInput {
  pub name: String,
  /// Extra `RUSTFLAGS` entries this input contributes.
  #[serde(default, skip_serializing_if = "Vec::is_empty")]
  pub rustflags: Vec<String>,
  /// Variables set for every compiling command, e.g. `PKG_CONFIG_PATH`.
  #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
  pub env: BTreeMap<String, String>,
}

impl NativeInput {
  pub fn new(name: &str) -> Self {
    Self {
      name: name.to_string(),
      rustflags: Vec::new(),
      env: BTreeMap::new(),
    }
  }

  pub fn with_env(mut self, key: &str, value: &str) -> Self {
    self.env.insert(key.to_string(), value.to_string());
    self
  }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
#[error("unsupported platform '{0}' (expected one of: x86_64-linux, aarch64-linux, x86_64-darwin, aarch64-darwin)")]
pub struct UnknownPlatform(pub String);

impl PlatformKey {
  pub const ALL: [PlatformKey; 4] = [
    PlatformKey::X86_64Linux,
    PlatformKey::Aarch64Linux,
    PlatformKey::X86_64Darwin,
    PlatformKey::Aarch64Darwin,
  ];

  pub fn new(arch: Arch, os: Os) -> Self {
    match (arch, os) {
      (Arch::X86_64, Os::Linux) => Self::X86_64Linux,
      (Arch::Aarch64, Os::Linux) => Self::Aarch64Linux,
      (Arch::X86_64, Os::MacOs) => Self::X86_64Darwin,
      (Arch::Aarch64, Os::MacOs) => Self::Aarch64Darwin,
    }
  }

  /// Detect the current platform at runtime
  ///
  /// Returns `None` if the OS or architecture is not supported
  pub fn current() -> Option<Self> {
    Some(Self::new(Arch::current()?, Os::current()?))
  }

  pub fn arch(&self) -> Arch {
    match self {
      Self::X86_64Linux | Self::X86_64Darwin => Arch::X86_64,
      Self::Aarch64Linux | Self::Aarch64Darwin => Arch::Aarch64,
    }
  }

  pub fn os(&self) -> Os {
    match self {
      Self::X86_64Linux | Self::Aarch64Linux => Os::Linux,
      Self::X86_64Darwin | Self::Aarch64Darwin => Os::MacOs,
    }
  }

  /// Returns the platform triple string (e.g., "aarch64-darwin")
  pub fn triple(&self) -> String {
    format!("{}-{}", self.arch(), self.os())
  }

  /// Returns the rustc target triple (e.g., "aarch64-apple-darwin")
  pub fn rust_target(&self) -> String {
    format!("{}-{}", self.arch().as_str(), self.os().rust_target_suffix())
  }

  /// Native inputs every build on this platform needs.
  pub fn native_inputs(&self) -> Vec<NativeInput> {
    match self.os() {
      Os::Linux => Vec::new(),
      // The darwin toolchain links libiconv for std's locale handling
      Os::MacOs => vec![NativeInput::new("libiconv")],
    }
  }
}

impl fmt::Display for PlatformKey {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}", self.triple())
  }
}

impl FromStr for PlatformKey {
  type Err = UnknownPlatform;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    Self::ALL
      .into_iter()
      .find(|key| key.triple() == s || key.rust_target() == s)
      .ok_or_else(|| UnknownPlatform(s.to_string()))
  }
}

impl TryFrom<String> for PlatformKey {
  type Error = UnknownPlatform;

  fn try_from(value: String) -> Result<Self, Self::Error> {
    value.parse()
  }
}

impl From<PlatformKey> for String {
  fn from(value: PlatformKey) -> Self {
    value.triple()
  }
}

/// Returns the platform triple for the current system (e.g., "aarch64-darwin")
///
/// Returns `None` if the current platform is not supported
pub fn platform_triple() -> Option<String> {
  PlatformKey::current().map(|p| p.triple())
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn platform_triple_format() {
    assert_eq!(PlatformKey::new(Arch::Aarch64, Os::MacOs).triple(), "aarch64-darwin");
    assert_eq!(PlatformKey::new(Arch::X86_64, Os::Linux).triple(), "x86_64-linux");
  }

  #[test]
  fn rust_targets() {
    assert_eq!(PlatformKey::X86_64Linux.rust_target(), "x86_64-unknown-linux-gnu");
    assert_eq!(PlatformKey::Aarch64Darwin.rust_target(), "aarch64-apple-darwin");
  }

  #[test]
  fn parses_triples_and_rust_targets() {
    for key in PlatformKey::ALL {
      assert_eq!(key.triple().parse::<PlatformKey>().unwrap(), key);
      assert_eq!(key.rust_target().parse::<PlatformKey>().unwrap(), key);
    }
    assert_eq!(
      "riscv64-linux".parse::<PlatformKey>(),
      Err(UnknownPlatform("riscv64-linux".to_string()))
    );
  }

  #[test]
  fn native_inputs_come_from_the_table() {
    assert!(PlatformKey::X86_64Linux.native_inputs().is_empty());
    let darwin = PlatformKey::Aarch64Darwin.native_inputs();
    assert_eq!(darwin, vec![NativeInput::new("libiconv")]);
  }

  #[test]
  fn serializes_as_triple() {
    let json = serde_json::to_string(&PlatformKey::X86_64Darwin).unwrap();
    assert_eq!(json, "\"x86_64-darwin\"");
    let back: PlatformKey = serde_json::from_str(&json).unwrap();
    assert_eq!(back, PlatformKey::X86_64Darwin);
  }
}
