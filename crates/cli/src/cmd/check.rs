//! Implementation of the `depot check` command.

use std::path::Path;
use std::process::ExitCode;

use anyhow::{Result, bail};

use depot_lib::check::CheckKind;
use depot_lib::matrix::MatrixOutputs;
use depot_lib::pipeline::{PipelineRequest, check_steps};

use super::{PlatformArgs, load_context, report_failures, run_request};
use crate::output::{OutputFormat, print_check, print_json, print_platform_header};

/// Run `only` (or every registered check) and report pass/fail per check.
pub fn cmd_check(root: &Path, only: &[CheckKind], platforms: &PlatformArgs, output: OutputFormat) -> Result<ExitCode> {
  let ctx = load_context(root)?;

  let mut kinds = if only.is_empty() {
    ctx.registry.kinds()
  } else {
    only.to_vec()
  };
  kinds.sort();
  kinds.dedup();

  if let Some(kind) = kinds.iter().find(|k| ctx.registry.get(**k).is_none()) {
    bail!("Check '{}' is not registered", kind);
  }

  let request = PipelineRequest::new(check_steps(&kinds), ctx.root.join("dist"));
  let outputs = run_request(ctx, platforms, &request)?;

  if output.is_json() {
    print_json(&outputs)?;
  } else {
    print_report(&outputs);
  }

  report_failures(&outputs)?;
  Ok(ExitCode::SUCCESS)
}

fn print_report(outputs: &MatrixOutputs) {
  for (platform, result) in outputs.iter() {
    print_platform_header(*platform);
    for check in &result.checks.results {
      print_check(check);
    }
  }
}
