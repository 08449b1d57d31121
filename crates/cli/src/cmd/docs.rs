//! Implementation of the `depot docs` command.

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::Result;

use depot_lib::pipeline::{PipelineRequest, Step};

use super::{PlatformArgs, load_context, report_failures, run_request};
use crate::output::{OutputFormat, Status, print_field, print_json, print_status};

/// Build the documentation and package it as `<package>-docs-<version>.tar.gz`.
///
/// The archive lands in `out_dir`, or `<root>/dist` when not given. With
/// several platforms each gets its own subdirectory.
pub fn cmd_docs(
  root: &Path,
  out_dir: Option<PathBuf>,
  platforms: &PlatformArgs,
  output: OutputFormat,
) -> Result<ExitCode> {
  let ctx = load_context(root)?;
  let out_dir = out_dir.unwrap_or_else(|| ctx.root.join("dist"));
  let request = PipelineRequest::new(vec![Step::Archive], out_dir);

  let outputs = run_request(ctx, platforms, &request)?;

  if output.is_json() {
    print_json(&outputs)?;
  } else {
    for (platform, result) in outputs.iter() {
      let Some(archive) = &result.archive else {
        continue;
      };
      print_status(Status::Passed, &format!("Documentation for {} ({})", platform, archive.version));
      print_field("Archive", &archive.path.display().to_string());
    }
  }

  report_failures(&outputs)?;
  Ok(ExitCode::SUCCESS)
}
