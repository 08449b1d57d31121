//! Implementation of the `depot build` command.

use std::path::Path;
use std::process::ExitCode;
use std::time::Instant;

use anyhow::Result;

use depot_lib::pipeline::{PipelineRequest, Step};

use super::{PlatformArgs, load_context, report_failures, run_request};
use crate::output::{OutputFormat, Status, format_elapsed, print_field, print_json, print_status};

/// Build the package's executables for each selected platform.
///
/// Only the snapshot, dependency cache and package steps run; checks are
/// registered on the artifact but not executed.
pub fn cmd_build(root: &Path, platforms: &PlatformArgs, output: OutputFormat) -> Result<ExitCode> {
  let start = Instant::now();
  let ctx = load_context(root)?;
  let request = PipelineRequest::new(vec![Step::Package], ctx.root.join("dist"));

  let outputs = run_request(ctx, platforms, &request)?;

  if output.is_json() {
    print_json(&outputs)?;
  } else {
    for (platform, result) in outputs.iter() {
      let Some(package) = &result.package else {
        continue;
      };
      print_status(Status::Passed, &format!("Built {}", platform));
      print_field("Store path", &package.store_path.display().to_string());
      if package.binaries.is_empty() {
        print_field("Binaries", "none (library package)");
      }
      for binary in &package.binaries {
        print_field("Binary", &binary.display().to_string());
      }
    }
    print_field("Duration", &format_elapsed(start.elapsed()));
  }

  report_failures(&outputs)?;
  Ok(ExitCode::SUCCESS)
}
