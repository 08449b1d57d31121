//! Check registry and runner.
//!
//! Five independent verification tasks run against the same configuration
//! and dependency cache. A check that finds a problem produces a failed
//! [`CheckResult`], never an error; errors mean the check could not run.

use std::fmt;
use std::fs;
use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::BuildConfiguration;
use crate::deps::{DependencyCacheArtifact, WorkTree};
use crate::devenv::Tool;
use crate::execute::{CargoInvocation, ExecuteError, Runner};
use crate::platform::paths::default_advisory_db;
use crate::settings::Settings;
use crate::store::{ObjectKind, Store, StoreError};
use crate::util::hash::{ContentHash, HashError, Hashable, ObjectHash, hash_directory};

const RESULT_FILE: &str = "result.json";

#[derive(Debug, Error)]
pub enum CheckError {
  #[error("check '{0}' is not registered")]
  NotRegistered(CheckKind),

  #[error("the audit check needs a Cargo.lock in the package root")]
  MissingLockfile,

  #[error("failed to run check: {0}")]
  Execute(#[from] ExecuteError),

  #[error("failed to hash check inputs: {0}")]
  Hash(#[from] HashError),

  #[error(transparent)]
  Store(#[from] StoreError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CheckKind {
  Test,
  Clippy,
  DocLint,
  Fmt,
  Audit,
}

impl CheckKind {
  pub const ALL: [CheckKind; 5] = [
    CheckKind::Test,
    CheckKind::Clippy,
    CheckKind::DocLint,
    CheckKind::Fmt,
    CheckKind::Audit,
  ];

  pub fn name(&self) -> &'static str {
    match self {
      CheckKind::Test => "test",
      CheckKind::Clippy => "clippy",
      CheckKind::DocLint => "doc-lint",
      CheckKind::Fmt => "fmt",
      CheckKind::Audit => "audit",
    }
  }
}

impl fmt::Display for CheckKind {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}", self.name())
  }
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("unknown check '{0}' (expected one of: test, clippy, doc-lint, fmt, audit)")]
pub struct UnknownCheck(pub String);

impl FromStr for CheckKind {
  type Err = UnknownCheck;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    Self::ALL
      .into_iter()
      .find(|kind| kind.name() == s)
      .ok_or_else(|| UnknownCheck(s.to_string()))
  }
}

/// How to run one check and what it needs on `PATH`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CheckDef {
  pub kind: CheckKind,
  pub invocation: CargoInvocation,
  pub tools: Vec<Tool>,
  /// Start from a copy of the dependency cache.
  pub inherits_cache: bool,
  /// Directories outside the package whose content the outcome depends on.
  #[serde(default, skip_serializing_if = "Vec::is_empty")]
  pub inputs: Vec<PathBuf>,
}

fn tools(names: &[&str]) -> Vec<Tool> {
  names.iter().map(|n| Tool::new(n)).collect()
}

#[derive(Debug, Clone, Default)]
pub struct CheckRegistry {
  defs: Vec<CheckDef>,
}

impl CheckRegistry {
  /// The five standard checks, configured from `settings`.
  pub fn standard(settings: &Settings) -> Self {
    let advisory_db = settings.audit.advisory_db.clone().unwrap_or_else(default_advisory_db);
    let mut audit = CargoInvocation::new(&["audit"]).without_shared_args().args([
      "--no-fetch".to_string(),
      "--db".to_string(),
      advisory_db.to_string_lossy().into_owned(),
      "--file".to_string(),
      "Cargo.lock".to_string(),
    ]);
    for id in &settings.audit.ignore {
      audit = audit.arg("--ignore").arg(id.clone());
    }

    let mut registry = Self::default();
    registry.register(CheckDef {
      kind: CheckKind::Test,
      invocation: CargoInvocation::new(&["nextest", "run"])
        .args(["--cargo-profile", "release", "--no-tests=pass"])
        .env("NEXTEST_HIDE_PROGRESS_BAR", "1"),
      tools: tools(&["cargo", "cargo-nextest"]),
      inherits_cache: true,
      inputs: Vec::new(),
    });
    registry.register(CheckDef {
      kind: CheckKind::Clippy,
      invocation: CargoInvocation::new(&["clippy"])
        .args(["--release", "--all-targets"])
        .trailing(["--deny", "warnings"]),
      tools: tools(&["cargo", "cargo-clippy"]),
      inherits_cache: true,
      inputs: Vec::new(),
    });
    registry.register(CheckDef {
      kind: CheckKind::DocLint,
      invocation: CargoInvocation::new(&["doc"])
        .args(["--release", "--no-deps", "--document-private-items"])
        .env("RUSTDOCFLAGS", "-D warnings"),
      tools: tools(&["cargo", "rustdoc"]),
      inherits_cache: true,
      inputs: Vec::new(),
    });
    registry.register(CheckDef {
      kind: CheckKind::Fmt,
      invocation: CargoInvocation::new(&["fmt"]).without_shared_args().arg("--check"),
      tools: tools(&["cargo", "rustfmt"]),
      inherits_cache: false,
      inputs: Vec::new(),
    });
    registry.register(CheckDef {
      kind: CheckKind::Audit,
      invocation: audit,
      tools: tools(&["cargo", "cargo-audit"]),
      inherits_cache: false,
      inputs: vec![advisory_db],
    });
    registry
  }

  /// Add `def`, replacing any definition of the same kind.
  pub fn register(&mut self, def: CheckDef) {
    match self.defs.iter_mut().find(|d| d.kind == def.kind) {
      Some(existing) => *existing = def,
      None => self.defs.push(def),
    }
  }

  pub fn get(&self, kind: CheckKind) -> Option<&CheckDef> {
    self.defs.iter().find(|d| d.kind == kind)
  }

  pub fn iter(&self) -> impl Iterator<Item = &CheckDef> {
    self.defs.iter()
  }

  /// Registered kinds in [`CheckKind::ALL`] order.
  pub fn kinds(&self) -> Vec<CheckKind> {
    CheckKind::ALL.into_iter().filter(|k| self.get(*k).is_some()).collect()
  }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckResult {
  pub check: CheckKind,
  pub config_hash: ObjectHash,
  pub cache_key: ObjectHash,
  pub passed: bool,
  pub exit_code: Option<i32>,
  pub diagnostics: String,
  /// Served from a memoised earlier pass.
  #[serde(default)]
  pub cached: bool,
}

impl CheckResult {
  /// A failed result for a check that could not run at all.
  pub fn could_not_run(
    kind: CheckKind,
    config: Option<&BuildConfiguration>,
    cache: Option<&DependencyCacheArtifact>,
    error: &dyn fmt::Display,
  ) -> Self {
    Self {
      check: kind,
      config_hash: config
        .and_then(|c| c.config_hash().ok())
        .unwrap_or_else(|| ObjectHash(String::new())),
      cache_key: cache.map(|c| c.key.clone()).unwrap_or_else(|| ObjectHash(String::new())),
      passed: false,
      exit_code: None,
      diagnostics: error.to_string(),
      cached: false,
    }
  }
}

/// Identity of a check run, naming its memoised result.
#[derive(Serialize)]
struct MemoKey<'a> {
  check: CheckKind,
  invocation: &'a CargoInvocation,
  config_hash: &'a ObjectHash,
  cache_key: &'a ObjectHash,
  /// `None` for an input that is missing or unreadable.
  inputs: Vec<Option<ContentHash>>,
}

impl Hashable for MemoKey<'_> {}

fn hash_inputs(def: &CheckDef) -> Vec<Option<ContentHash>> {
  def
    .inputs
    .iter()
    .map(|path| match hash_directory(path, &[".git"]) {
      Ok(hash) => Some(hash),
      Err(e) => {
        debug!(path = ?path, error = %e, "check input not hashable");
        None
      }
    })
    .collect()
}

/// Run one check in its own working tree.
pub async fn run_check<R: Runner>(
  kind: CheckKind,
  registry: &CheckRegistry,
  config: &BuildConfiguration,
  cache: &DependencyCacheArtifact,
  store: &Store,
  runner: &R,
) -> Result<CheckResult, CheckError> {
  let def = registry.get(kind).ok_or(CheckError::NotRegistered(kind))?;
  let config_hash = config.config_hash()?;
  let memo = MemoKey {
    check: kind,
    invocation: &def.invocation,
    config_hash: &config_hash,
    cache_key: &cache.key,
    inputs: hash_inputs(def),
  }
  .compute_hash()?;

  if let Some(result) = memoised(store, &memo)? {
    info!(check = %kind, "check passed previously, reusing result");
    return Ok(result);
  }

  if kind == CheckKind::Audit && config.source.lockfile_hash.is_none() {
    return Err(CheckError::MissingLockfile);
  }

  info!(check = %kind, platform = %config.platform, "running check");

  let tree = WorkTree::prepare(store, config, def.inherits_cache.then_some(cache))?;
  let inv = config.cargo(&def.invocation, &tree.src, &tree.target_dir);
  let output = runner.run(&inv).await?;

  let result = CheckResult {
    check: kind,
    config_hash,
    cache_key: cache.key.clone(),
    passed: output.success(),
    exit_code: output.code,
    diagnostics: output.diagnostics(),
    cached: false,
  };

  if result.passed {
    info!(check = %kind, "check passed");
    if let Err(e) = memoise(store, &memo, &result) {
      warn!(check = %kind, error = %e, "failed to memoise check result");
    }
  } else {
    warn!(check = %kind, code = ?result.exit_code, "check failed");
  }

  Ok(result)
}

fn memoised(store: &Store, memo: &ObjectHash) -> Result<Option<CheckResult>, StoreError> {
  let Some(path) = store.lookup(ObjectKind::Checks, memo)? else {
    return Ok(None);
  };
  let file = path.join(RESULT_FILE);
  let parsed = fs::read_to_string(&file)
    .ok()
    .and_then(|content| serde_json::from_str::<CheckResult>(&content).ok());
  match parsed {
    Some(result) => Ok(Some(CheckResult { cached: true, ..result })),
    None => {
      debug!(path = ?file, "unreadable memoised result, rerunning check");
      Ok(None)
    }
  }
}

fn memoise(store: &Store, memo: &ObjectHash, result: &CheckResult) -> Result<(), StoreError> {
  let scratch = store.scratch()?;
  let file = scratch.path().join(RESULT_FILE);
  let content = serde_json::to_string_pretty(result).map_err(|e| StoreError::Marker {
    path: file.clone(),
    message: e.to_string(),
  })?;
  fs::write(&file, content).map_err(|source| StoreError::Io { path: file, source })?;
  store.publish(scratch, ObjectKind::Checks, memo)?;
  Ok(())
}

/// Results of a batch of checks, in [`CheckKind::ALL`] order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CheckReport {
  pub results: Vec<CheckResult>,
}

impl CheckReport {
  pub fn get(&self, kind: CheckKind) -> Option<&CheckResult> {
    self.results.iter().find(|r| r.check == kind)
  }
}
