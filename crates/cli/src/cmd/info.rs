use std::path::Path;
use std::process::ExitCode;

use anyhow::{Context, Result};
use serde::Serialize;

use depot_lib::check::{CheckKind, CheckRegistry};
use depot_lib::platform::{PlatformKey, platform_triple};
use depot_lib::settings::Settings;
use depot_lib::store::Store;

use super::canonical_root;
use crate::output::{OutputFormat, Status, print_field, print_json, print_status};

#[derive(Serialize)]
struct Info {
  platform: Option<String>,
  store: String,
  package: Option<String>,
  platforms: Vec<PlatformKey>,
  checks: Vec<CheckKind>,
}

pub fn cmd_info(root: &Path, output: OutputFormat) -> Result<ExitCode> {
  let root = canonical_root(root)?;
  let settings = Settings::load(&root).context("Failed to load settings")?;
  let registry = CheckRegistry::standard(&settings);

  let info = Info {
    platform: platform_triple(),
    store: Store::open_default().root().display().to_string(),
    package: settings.package_name(&root).ok(),
    platforms: settings.default_platforms(),
    checks: registry.kinds(),
  };

  if output.is_json() {
    print_json(&info)?;
    return Ok(ExitCode::SUCCESS);
  }

  match &info.platform {
    Some(triple) => print_status(Status::Note, &format!("Platform: {}", triple)),
    None => print_status(Status::Warning, "Could not detect platform."),
  }
  print_field("Store", &info.store);
  print_field("Package", info.package.as_deref().unwrap_or("(no Cargo.toml)"));
  let platforms: Vec<String> = info.platforms.iter().map(|p| p.to_string()).collect();
  print_field("Platforms", &platforms.join(", "));
  let checks: Vec<&str> = info.checks.iter().map(|c| c.name()).collect();
  print_field("Checks", &checks.join(", "));
  Ok(ExitCode::SUCCESS)
}
