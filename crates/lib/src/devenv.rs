//! Development environment composer.
//!
//! The environment's toolset is the union of what every registered check
//! needs plus a short list of supplementary tools. Registering a new check
//! is enough to make its tools available in the shell.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::{Path, PathBuf};
use std::process::ExitStatus;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

use crate::check::CheckRegistry;
use crate::execute::{Invocation, Runner};
use crate::settings::Settings;

/// Supplementary tools when settings name none.
pub const DEFAULT_SUPPLEMENTARY: &[&str] = &["rust-analyzer", "cargo-release"];

#[derive(Debug, Error)]
pub enum DevEnvError {
  #[error("failed to start shell {shell}: {source}")]
  Spawn {
    shell: PathBuf,
    #[source]
    source: std::io::Error,
  },
}

/// An executable expected on `PATH`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Tool(pub String);

impl Tool {
  pub fn new(name: &str) -> Self {
    Self(name.to_string())
  }

  pub fn name(&self) -> &str {
    &self.0
  }
}

impl fmt::Display for Tool {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}", self.0)
  }
}

/// Supplementary tools from settings, or [`DEFAULT_SUPPLEMENTARY`].
pub fn supplementary_tools(settings: &Settings) -> Vec<Tool> {
  match &settings.devenv.tools {
    Some(tools) => tools.iter().map(|t| Tool::new(t)).collect(),
    None => DEFAULT_SUPPLEMENTARY.iter().map(|t| Tool::new(t)).collect(),
  }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DevEnvironment {
  pub tools: BTreeSet<Tool>,
  pub env: BTreeMap<String, String>,
}

/// Compose the environment from the registry's checks and `supplementary`.
pub fn compose(registry: &CheckRegistry, supplementary: &[Tool], sysroot: Option<&Path>) -> DevEnvironment {
  let mut tools: BTreeSet<Tool> = registry.iter().flat_map(|def| def.tools.iter().cloned()).collect();
  tools.extend(supplementary.iter().cloned());

  let mut env = BTreeMap::new();
  if let Some(sysroot) = sysroot {
    env.insert(
      "RUST_SRC_PATH".to_string(),
      sysroot.join("lib/rustlib/src/rust/library").to_string_lossy().into_owned(),
    );
  }

  DevEnvironment { tools, env }
}

/// Ask `rustc` for its sysroot; `None` if rustc is unavailable.
pub async fn query_sysroot<R: Runner>(runner: &R, cwd: &Path) -> Option<PathBuf> {
  let inv = Invocation::new("rustc", cwd).args(["--print", "sysroot"]);
  match runner.run(&inv).await {
    Ok(out) if out.success() && !out.stdout.trim().is_empty() => Some(PathBuf::from(out.stdout.trim())),
    Ok(out) => {
      debug!(code = ?out.code, "rustc --print sysroot failed");
      None
    }
    Err(e) => {
      debug!(error = %e, "rustc not available");
      None
    }
  }
}

impl DevEnvironment {
  /// Tools that cannot be found on `PATH`.
  pub fn missing_tools(&self) -> Vec<Tool> {
    self
      .tools
      .iter()
      .filter(|tool| which::which(tool.name()).is_err())
      .cloned()
      .collect()
  }

  /// POSIX shell `export` lines for the environment variables.
  pub fn render_exports(&self) -> String {
    self
      .env
      .iter()
      .map(|(key, value)| format!("export {}='{}'\n", key, value.replace('\'', r"'\''")))
      .collect()
  }

  /// Run an interactive shell with the environment applied.
  ///
  /// Uses `shell`, else `$SHELL`, else `/bin/sh`.
  pub async fn enter(&self, shell: Option<&Path>, cwd: &Path) -> Result<ExitStatus, DevEnvError> {
    let shell = shell
      .map(Path::to_path_buf)
      .or_else(|| std::env::var_os("SHELL").map(PathBuf::from))
      .unwrap_or_else(|| PathBuf::from("/bin/sh"));

    info!(shell = ?shell, tools = self.tools.len(), "entering development shell");

    tokio::process::Command::new(&shell)
      .current_dir(cwd)
      .envs(&self.env)
      .status()
      .await
      .map_err(|source| DevEnvError::Spawn { shell, source })
  }
}
