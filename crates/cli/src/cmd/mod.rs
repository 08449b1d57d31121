mod build;
mod check;
mod docs;
mod info;
mod shell;
mod version;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::Args;

use depot_lib::execute::ProcessRunner;
use depot_lib::matrix::{MatrixOutputs, run_matrix};
use depot_lib::pipeline::{PipelineContext, PipelineRequest};
use depot_lib::platform::PlatformKey;
use depot_lib::settings::Settings;
use depot_lib::store::Store;

use crate::output::{Status, print_status};

pub use build::cmd_build;
pub use check::cmd_check;
pub use docs::cmd_docs;
pub use info::cmd_info;
pub use shell::cmd_shell;
pub use version::cmd_version;

/// Platform selection shared by the pipeline commands.
#[derive(Debug, Clone, Default, Args)]
pub struct PlatformArgs {
  /// Build for this platform (repeatable), e.g. x86_64-linux [default: host]
  #[arg(long = "platform", value_name = "PLATFORM")]
  pub platforms: Vec<PlatformKey>,

  /// Build for every supported platform
  #[arg(long, conflicts_with = "platforms")]
  pub all_platforms: bool,
}

impl PlatformArgs {
  pub fn resolve(&self, settings: &Settings) -> Vec<PlatformKey> {
    if self.all_platforms {
      PlatformKey::ALL.to_vec()
    } else if !self.platforms.is_empty() {
      self.platforms.clone()
    } else {
      settings.default_platforms()
    }
  }
}

/// The package at `root` with its settings, store and a process runner.
pub fn load_context(root: &Path) -> Result<Arc<PipelineContext<ProcessRunner>>> {
  let root = canonical_root(root)?;
  let settings = Settings::load(&root).context("Failed to load settings")?;
  let package = settings
    .package_name(&root)
    .context("Failed to determine package name")?;
  Ok(Arc::new(PipelineContext::new(
    root,
    package,
    settings,
    Store::open_default(),
    ProcessRunner::new(),
  )))
}

pub fn canonical_root(root: &Path) -> Result<PathBuf> {
  dunce::canonicalize(root).with_context(|| format!("Package root not found: {}", root.display()))
}

/// Run `request` over the selected platforms.
pub fn run_request(
  ctx: Arc<PipelineContext<ProcessRunner>>,
  platforms: &PlatformArgs,
  request: &PipelineRequest,
) -> Result<MatrixOutputs> {
  let platforms = platforms.resolve(&ctx.settings);
  let rt = tokio::runtime::Runtime::new().context("Failed to create async runtime")?;
  let outputs = rt
    .block_on(run_matrix(&platforms, request, ctx))
    .context("Pipeline failed")?;
  Ok(outputs)
}

/// Report failed and skipped steps; error naming them if there were any.
pub fn report_failures(outputs: &MatrixOutputs) -> Result<()> {
  let mut failed = Vec::new();

  for (platform, result) in outputs.iter() {
    for failure in &result.failures {
      print_status(Status::Failed, &format!("[{}] {} failed: {}", platform, failure.step, failure.message));
      failed.push(failure.step.to_string());
    }
    for (step, cause) in &result.skipped {
      print_status(Status::Warning, &format!("[{}] {} skipped: {} failed", platform, step, cause));
    }
  }

  if failed.is_empty() {
    return Ok(());
  }
  failed.sort();
  failed.dedup();
  bail!("Failed steps: {}", failed.join(", "))
}
