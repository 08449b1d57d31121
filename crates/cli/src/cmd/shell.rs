//! Implementation of the `depot shell` command.

use std::path::Path;
use std::process::ExitCode;

use anyhow::{Context, Result};

use depot_lib::check::CheckRegistry;
use depot_lib::devenv::{compose, query_sysroot, supplementary_tools};
use depot_lib::execute::ProcessRunner;
use depot_lib::settings::Settings;

use super::canonical_root;
use crate::output::{OutputFormat, Status, print_json, print_status};

/// Compose the development environment from the registered checks and
/// either print it or run an interactive shell inside it.
///
/// The shell's exit code becomes ours.
pub fn cmd_shell(root: &Path, print: bool, shell: Option<&Path>, output: OutputFormat) -> Result<ExitCode> {
  let root = canonical_root(root)?;
  let settings = Settings::load(&root).context("Failed to load settings")?;
  let registry = CheckRegistry::standard(&settings);

  let rt = tokio::runtime::Runtime::new().context("Failed to create async runtime")?;
  let sysroot = rt.block_on(query_sysroot(&ProcessRunner::new(), &root));
  let env = compose(&registry, &supplementary_tools(&settings), sysroot.as_deref());

  for tool in env.missing_tools() {
    print_status(Status::Warning, &format!("{} not found on PATH", tool));
  }

  if output.is_json() {
    print_json(&env)?;
    return Ok(ExitCode::SUCCESS);
  }
  if print {
    print!("{}", env.render_exports());
    return Ok(ExitCode::SUCCESS);
  }

  let status = rt
    .block_on(env.enter(shell, &root))
    .context("Failed to start shell")?;
  Ok(match status.code() {
    Some(0) => ExitCode::SUCCESS,
    Some(code) => ExitCode::from(u8::try_from(code).unwrap_or(1)),
    None => ExitCode::FAILURE,
  })
}
