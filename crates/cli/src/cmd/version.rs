use std::path::Path;
use std::process::ExitCode;

use anyhow::{Context, Result};

use depot_lib::execute::ProcessRunner;
use depot_lib::settings::Settings;
use depot_lib::version::read_version;

use super::canonical_root;
use crate::output::{OutputFormat, print_json};

pub fn cmd_version(root: &Path, output: OutputFormat) -> Result<ExitCode> {
  let root = canonical_root(root)?;
  let settings = Settings::load(&root).context("Failed to load settings")?;
  let package = settings
    .package_name(&root)
    .context("Failed to determine package name")?;

  let rt = tokio::runtime::Runtime::new().context("Failed to create async runtime")?;
  let version = rt
    .block_on(read_version(&root, &package, &ProcessRunner::new()))
    .with_context(|| format!("Failed to read version of '{}'", package))?;

  if output.is_json() {
    print_json(&serde_json::json!({ "package": package, "version": version }))?;
  } else {
    println!("{}", version);
  }
  Ok(ExitCode::SUCCESS)
}
