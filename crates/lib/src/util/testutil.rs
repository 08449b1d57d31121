//! Test utilities for depot-lib.
//!
//! [`FakeRunner`] stands in for the Rust toolchain: it records every
//! invocation and simulates the files and output cargo would produce, so the
//! pipeline can be exercised end to end without compiling anything.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use serde_json::json;

use crate::execute::{CmdOutput, ExecuteError, Invocation, Runner};

type Matcher = Box<dyn Fn(&Invocation) -> bool + Send + Sync>;

struct Rule {
  matches: Matcher,
  output: CmdOutput,
}

/// A [`Runner`] that records invocations and simulates cargo.
#[derive(Default)]
pub struct FakeRunner {
  calls: Mutex<Vec<Invocation>>,
  rules: Vec<Rule>,
}

impl FakeRunner {
  pub fn new() -> Self {
    Self::default()
  }

  /// Answer invocations matching `matches` with `output` instead of simulating.
  pub fn respond<F>(mut self, matches: F, output: CmdOutput) -> Self
  where
    F: Fn(&Invocation) -> bool + Send + Sync + 'static,
  {
    self.rules.push(Rule {
      matches: Box::new(matches),
      output,
    });
    self
  }

  /// Fail every cargo invocation whose first argument is `subcommand`.
  pub fn fail_subcommand(self, subcommand: &str, code: i32, stderr: &str) -> Self {
    let subcommand = subcommand.to_string();
    self.respond(
      move |inv| inv.args.first() == Some(&subcommand),
      CmdOutput {
        code: Some(code),
        stdout: String::new(),
        stderr: stderr.to_string(),
      },
    )
  }

  pub fn calls(&self) -> Vec<Invocation> {
    self.calls.lock().map(|c| c.clone()).unwrap_or_default()
  }

  /// Number of recorded invocations whose first argument is `subcommand`.
  pub fn count(&self, subcommand: &str) -> usize {
    self
      .calls()
      .iter()
      .filter(|inv| inv.args.first().map(String::as_str) == Some(subcommand))
      .count()
  }
}

impl Runner for FakeRunner {
  async fn run(&self, invocation: &Invocation) -> Result<CmdOutput, ExecuteError> {
    if let Ok(mut calls) = self.calls.lock() {
      calls.push(invocation.clone());
    }
    if let Some(rule) = self.rules.iter().find(|r| (r.matches)(invocation)) {
      return Ok(rule.output.clone());
    }
    simulate(invocation)
  }
}

fn ok(stdout: String) -> Result<CmdOutput, ExecuteError> {
  Ok(CmdOutput {
    code: Some(0),
    stdout,
    stderr: String::new(),
  })
}

fn flag_value<'a>(args: &'a [String], flag: &str) -> Option<&'a str> {
  args
    .iter()
    .position(|a| a == flag)
    .and_then(|i| args.get(i + 1))
    .map(String::as_str)
}

fn manifest_field(manifest: &Path, field: &str) -> Option<String> {
  let content = fs::read_to_string(manifest).ok()?;
  let table: toml::Table = toml::from_str(&content).ok()?;
  table.get("package")?.get(field)?.as_str().map(str::to_string)
}

/// Produce the side effects and output of the cargo command in `inv`.
fn simulate(inv: &Invocation) -> Result<CmdOutput, ExecuteError> {
  if inv.program != "cargo" {
    return ok(String::new());
  }

  let args = &inv.args;
  let target_dir = inv
    .env
    .get("CARGO_TARGET_DIR")
    .map(PathBuf::from)
    .unwrap_or_else(|| inv.cwd.join("target"));
  let mut base = target_dir.clone();
  if let Some(triple) = flag_value(args, "--target") {
    base = base.join(triple);
  }
  let profile = if args.iter().any(|a| a == "--release") {
    "release"
  } else {
    "debug"
  };
  let manifest = inv.cwd.join("Cargo.toml");
  let name = manifest_field(&manifest, "name").unwrap_or_else(|| "demo".to_string());

  match args.first().map(String::as_str) {
    Some("metadata") => {
      let manifest = flag_value(args, "--manifest-path")
        .map(PathBuf::from)
        .unwrap_or(manifest);
      let packages = match (manifest_field(&manifest, "name"), manifest_field(&manifest, "version")) {
        (Some(name), Some(version)) => vec![json!({ "name": name, "version": version })],
        _ => Vec::new(),
      };
      ok(json!({ "packages": packages, "version": 1 }).to_string())
    }
    Some("check") | Some("test") => {
      compile(&base.join(profile), &name)?;
      ok(String::new())
    }
    Some("build") => {
      let out = base.join(profile);
      compile(&out, &name)?;
      if !args.iter().any(|a| a.starts_with("--message-format")) {
        return ok(String::new());
      }
      let mut messages = vec![json!({
        "reason": "compiler-artifact",
        "manifest_path": "/registry/serde-1.0.0/Cargo.toml",
        "target": { "name": "serde", "kind": ["lib"] },
        "filenames": [out.join("deps/libserde.rlib")],
        "executable": null,
        "fresh": true,
      })];
      if inv.cwd.join("src/lib.rs").is_file() {
        let rlib = out.join(format!("lib{}.rlib", name.replace('-', "_")));
        fs::write(&rlib, "rlib")?;
        messages.push(json!({
          "reason": "compiler-artifact",
          "manifest_path": manifest,
          "target": { "name": name, "kind": ["lib"] },
          "filenames": [rlib],
          "executable": null,
          "fresh": false,
        }));
      }
      if inv.cwd.join("src/main.rs").is_file() {
        let exe = out.join(&name);
        fs::write(&exe, format!("#!/bin/sh\necho {name}\n"))?;
        messages.push(json!({
          "reason": "compiler-artifact",
          "manifest_path": manifest,
          "target": { "name": name, "kind": ["bin"] },
          "filenames": [exe],
          "executable": exe,
          "fresh": false,
        }));
      }
      messages.push(json!({ "reason": "build-finished", "success": true }));
      let stdout: Vec<String> = messages.iter().map(|m| m.to_string()).collect();
      ok(stdout.join("\n") + "\n")
    }
    Some("doc") => {
      let doc = base.join("doc");
      for krate in [name.replace('-', "_"), "serde".to_string()] {
        fs::create_dir_all(doc.join(&krate))?;
        fs::write(doc.join(&krate).join("index.html"), format!("<h1>{krate}</h1>"))?;
      }
      ok(String::new())
    }
    _ => ok(String::new()),
  }
}

/// Leave behind what a compile leaves: dependency outputs and fingerprints
/// for both the dependencies and the package itself.
fn compile(out: &Path, name: &str) -> Result<(), ExecuteError> {
  fs::create_dir_all(out.join("deps"))?;
  fs::write(out.join("deps/libserde.rlib"), "rlib")?;
  for fingerprint in ["serde-1a2b3c", &format!("{name}-4d5e6f")] {
    let dir = out.join(".fingerprint").join(fingerprint);
    fs::create_dir_all(&dir)?;
    fs::write(dir.join("lib"), "fp")?;
  }
  Ok(())
}

fn write_manifest(dir: &Path, name: &str, version: &str) {
  fs::create_dir_all(dir.join("src")).unwrap();
  fs::write(
    dir.join("Cargo.toml"),
    format!("[package]\nname = \"{name}\"\nversion = \"{version}\"\nedition = \"2021\"\n\n[dependencies]\nserde = \"1\"\n"),
  )
  .unwrap();
  fs::write(dir.join("Cargo.lock"), "version = 4\n").unwrap();
}

/// Write a minimal binary package named `name` at `dir`.
pub fn write_package(dir: &Path, name: &str, version: &str) {
  write_manifest(dir, name, version);
  fs::write(dir.join("src/main.rs"), "fn main() { println!(\"hi\"); }\n").unwrap();
}

/// Write a minimal library-only package named `name` at `dir`.
pub fn write_lib_package(dir: &Path, name: &str, version: &str) {
  write_manifest(dir, name, version);
  fs::write(dir.join("src/lib.rs"), "pub fn decode(bytes: &[u8]) -> &[u8] { bytes }\n").unwrap();
}
