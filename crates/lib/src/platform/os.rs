use std::fmt;

use serde::{Deserialize, Serialize};

/// Operating system variants the pipeline can target
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Os {
  Linux,
  MacOs,
}

impl Os {
  /// Detect the current operating system at runtime
  pub fn current() -> Option<Self> {
    match std::env::consts::OS {
      "linux" => Some(Self::Linux),
      "macos" => Some(Self::MacOs),
      _ => None,
    }
  }

  /// Returns the lowercase string identifier used in platform keys
  pub fn as_str(&self) -> &'static str {
    match self {
      Self::Linux => "linux",
      Self::MacOs => "darwin",
    }
  }

  /// Vendor and OS components of the rustc target triple
  pub fn rust_target_suffix(&self) -> &'static str {
    match self {
      Self::Linux => "unknown-linux-gnu",
      Self::MacOs => "apple-darwin",
    }
  }
}

impl fmt::Display for Os {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}", self.as_str())
  }
}
