//! Pipeline execution.
//!
//! A run plans its steps with [`StepGraph`] and executes the plan wave by
//! wave:
//! - steps in a wave run concurrently, bounded by a semaphore
//! - a failed step's dependents are skipped, naming the failed dependency
//! - independent steps keep running after a failure
//!
//! Every artifact is published to the store by atomic rename, so concurrent
//! steps need no locking and an interrupted run leaves only scratch
//! directories behind.

pub mod graph;

use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::archive::{ArchiveError, VersionedArchive, package_docs};
use crate::check::{CheckError, CheckKind, CheckRegistry, CheckReport, CheckResult, run_check};
use crate::config::BuildConfiguration;
use crate::deps::{DependencyCacheArtifact, DepsError, build_dependency_cache};
use crate::docs::{DocsError, DocumentationArtifact, build_docs};
use crate::execute::Runner;
use crate::package::{PackageArtifact, PackageError, build_package};
use crate::platform::PlatformKey;
use crate::settings::Settings;
use crate::source::{SnapshotError, SourceFilter, SourceSnapshot};
use crate::store::Store;
use crate::util::hash::HashError;
use crate::version::{VersionError, VersionString, read_version};

pub use graph::{Step, StepGraph};

#[derive(Debug, Error)]
pub enum PipelineError {
  #[error("unknown step '{0}'")]
  UnknownStep(String),

  #[error("cycle detected in step graph")]
  CycleDetected,

  #[error("step {0} ran without its inputs")]
  MissingInput(Step),

  #[error(transparent)]
  Snapshot(#[from] SnapshotError),

  #[error(transparent)]
  Deps(#[from] DepsError),

  #[error(transparent)]
  Check(#[from] CheckError),

  #[error(transparent)]
  Package(#[from] PackageError),

  #[error(transparent)]
  Version(#[from] VersionError),

  #[error(transparent)]
  Docs(#[from] DocsError),

  #[error(transparent)]
  Archive(#[from] ArchiveError),

  #[error("failed to hash configuration: {0}")]
  Hash(#[from] HashError),
}

/// A step that failed, or a check that did not pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StepFailure {
  pub step: Step,
  pub message: String,
}

/// Everything shared by all runs of one package.
pub struct PipelineContext<R> {
  /// The package root as given by the user (not the snapshot).
  pub root: PathBuf,
  pub package: String,
  pub settings: Arc<Settings>,
  pub filter: SourceFilter,
  pub registry: Arc<CheckRegistry>,
  pub store: Store,
  pub runner: Arc<R>,
}

impl<R: Runner> PipelineContext<R> {
  /// Context for the package at `root`, configured from its settings.
  pub fn new(root: PathBuf, package: String, settings: Settings, store: Store, runner: R) -> Self {
    let filter = SourceFilter::from_settings(&settings.source);
    let registry = CheckRegistry::standard(&settings);
    Self {
      root,
      package,
      settings: Arc::new(settings),
      filter,
      registry: Arc::new(registry),
      store,
      runner: Arc::new(runner),
    }
  }
}

/// What to produce.
#[derive(Debug, Clone, Default)]
pub struct PipelineRequest {
  pub targets: Vec<Step>,
  /// Where the documentation archive is written.
  pub out_dir: PathBuf,
}

impl PipelineRequest {
  pub fn new(targets: Vec<Step>, out_dir: PathBuf) -> Self {
    Self { targets, out_dir }
  }
}

/// Artifacts and outcomes of one pipeline run on one platform.
#[derive(Debug, Clone, Serialize)]
pub struct PipelineOutputs {
  pub platform: PlatformKey,
  pub config: Option<Arc<BuildConfiguration>>,
  pub cache: Option<Arc<DependencyCacheArtifact>>,
  pub checks: CheckReport,
  pub package: Option<PackageArtifact>,
  pub version: Option<VersionString>,
  pub docs: Option<DocumentationArtifact>,
  pub archive: Option<VersionedArchive>,
  pub failures: Vec<StepFailure>,
  /// Skipped steps and the failed dependency that caused it.
  pub skipped: BTreeMap<Step, Step>,
}

impl PipelineOutputs {
  fn new(platform: PlatformKey) -> Self {
    Self {
      platform,
      config: None,
      cache: None,
      checks: CheckReport::default(),
      package: None,
      version: None,
      docs: None,
      archive: None,
      failures: Vec::new(),
      skipped: BTreeMap::new(),
    }
  }

  pub fn succeeded(&self) -> bool {
    self.failures.is_empty() && self.skipped.is_empty()
  }
}

/// What a finished step hands to its dependents.
enum StepOutput {
  Snapshot(Arc<BuildConfiguration>),
  Cache(Arc<DependencyCacheArtifact>),
  Check(CheckResult),
  Package(PackageArtifact),
  Version(VersionString),
  Docs(DocumentationArtifact),
  Archive(VersionedArchive),
}

/// Inputs available to a step when it starts.
#[derive(Clone, Default)]
struct Inputs {
  config: Option<Arc<BuildConfiguration>>,
  cache: Option<Arc<DependencyCacheArtifact>>,
  version: Option<VersionString>,
  docs: Option<DocumentationArtifact>,
}

impl Inputs {
  fn config(&self, step: Step) -> Result<&Arc<BuildConfiguration>, PipelineError> {
    self.config.as_ref().ok_or(PipelineError::MissingInput(step))
  }

  fn cache(&self, step: Step) -> Result<&Arc<DependencyCacheArtifact>, PipelineError> {
    self.cache.as_ref().ok_or(PipelineError::MissingInput(step))
  }
}

/// Run `request` for `platform`.
pub async fn run_pipeline<R: Runner>(
  ctx: Arc<PipelineContext<R>>,
  platform: PlatformKey,
  request: &PipelineRequest,
) -> Result<PipelineOutputs, PipelineError> {
  let graph = StepGraph::for_targets(&request.targets)?;
  let waves = graph.waves()?;

  info!(platform = %platform, steps = graph.len(), waves = waves.len(), "starting pipeline");

  let mut outputs = PipelineOutputs::new(platform);
  let mut inputs = Inputs::default();
  let mut failed: Vec<Step> = Vec::new();
  let mut completed: HashSet<Step> = HashSet::new();
  let semaphore = Arc::new(Semaphore::new(ctx.settings.parallelism().max(1)));

  for (wave_idx, wave) in waves.iter().enumerate() {
    debug!(wave = wave_idx, steps = wave.len(), "executing wave");

    let mut ready = Vec::new();
    for step in wave {
      let failed_dep = graph
        .dependencies(*step)
        .into_iter()
        .find(|dep| failed.contains(dep));
      match failed_dep {
        Some(dep) => {
          warn!(step = %step, failed_dep = %dep, "skipping step due to failed dependency");
          outputs.skipped.insert(*step, dep);
          failed.push(*step);
        }
        None => ready.push(*step),
      }
    }

    let mut join_set = JoinSet::new();
    for step in ready {
      let ctx = ctx.clone();
      let inputs = inputs.clone();
      let semaphore = semaphore.clone();
      let out_dir = request.out_dir.clone();
      join_set.spawn(async move {
        let _permit = semaphore.acquire().await;
        let result = run_step(step, &ctx, platform, &inputs, &out_dir).await;
        (step, result)
      });
    }

    while let Some(joined) = join_set.join_next().await {
      let (step, result) = match joined {
        Ok(pair) => pair,
        Err(e) => {
          error!(error = %e, "pipeline step panicked");
          continue;
        }
      };
      match result {
        Ok(output) => {
          completed.insert(step);
          record(step, output, &mut outputs, &mut inputs, &mut failed);
        }
        Err(e) => {
          error!(step = %step, error = %e, "step failed");
          if let Step::Check(kind) = step {
            outputs.checks.results.push(CheckResult::could_not_run(
              kind,
              inputs.config.as_deref(),
              inputs.cache.as_deref(),
              &e,
            ));
          }
          outputs.failures.push(StepFailure {
            step,
            message: e.to_string(),
          });
          failed.push(step);
        }
      }
    }

    // A panicked step produced neither output nor failure.
    for step in wave {
      if !failed.contains(step) && !completed.contains(step) {
        if let Step::Check(kind) = *step {
          outputs.checks.results.push(CheckResult::could_not_run(
            kind,
            inputs.config.as_deref(),
            inputs.cache.as_deref(),
            &"check task aborted",
          ));
        }
        outputs.failures.push(StepFailure {
          step: *step,
          message: "step aborted".to_string(),
        });
        failed.push(*step);
      }
    }
  }

  outputs.config = inputs.config;
  outputs.cache = inputs.cache;
  outputs.version = inputs.version;
  outputs.docs = inputs.docs;
  outputs.checks.results.sort_by_key(|r| r.check);
  outputs.failures.sort_by_key(|f| f.step);

  info!(
    platform = %platform,
    failed = outputs.failures.len(),
    skipped = outputs.skipped.len(),
    "pipeline complete"
  );

  Ok(outputs)
}

fn record(
  step: Step,
  output: StepOutput,
  outputs: &mut PipelineOutputs,
  inputs: &mut Inputs,
  failed: &mut Vec<Step>,
) {
  info!(step = %step, "step finished");
  match output {
    StepOutput::Snapshot(config) => inputs.config = Some(config),
    StepOutput::Cache(cache) => inputs.cache = Some(cache),
    StepOutput::Check(result) => {
      if !result.passed {
        outputs.failures.push(StepFailure {
          step,
          message: match result.exit_code {
            Some(code) => format!("check '{}' failed with exit code {}", result.check, code),
            None => format!("check '{}' failed", result.check),
          },
        });
        failed.push(step);
      }
      outputs.checks.results.push(result);
    }
    StepOutput::Package(package) => outputs.package = Some(package),
    StepOutput::Version(version) => inputs.version = Some(version),
    StepOutput::Docs(docs) => inputs.docs = Some(docs),
    StepOutput::Archive(archive) => outputs.archive = Some(archive),
  }
}

async fn run_step<R: Runner>(
  step: Step,
  ctx: &PipelineContext<R>,
  platform: PlatformKey,
  inputs: &Inputs,
  out_dir: &Path,
) -> Result<StepOutput, PipelineError> {
  info!(step = %step, platform = %platform, "starting step");
  let runner = ctx.runner.as_ref();

  match step {
    Step::Snapshot => {
      let snapshot = SourceSnapshot::capture(&ctx.root, &ctx.filter, &ctx.store)?;
      let config = BuildConfiguration::new(&ctx.package, snapshot, platform, &ctx.settings);
      Ok(StepOutput::Snapshot(Arc::new(config)))
    }
    Step::DependencyCache => {
      let cache = build_dependency_cache(inputs.config(step)?, &ctx.store, runner).await?;
      Ok(StepOutput::Cache(Arc::new(cache)))
    }
    Step::Check(kind) => {
      let result = run_check(
        kind,
        &ctx.registry,
        inputs.config(step)?,
        inputs.cache(step)?,
        &ctx.store,
        runner,
      )
      .await?;
      Ok(StepOutput::Check(result))
    }
    Step::Package => {
      let package = build_package(
        inputs.config(step)?.clone(),
        inputs.cache(step)?.clone(),
        ctx.registry.kinds(),
        &ctx.store,
        runner,
      )
      .await?;
      Ok(StepOutput::Package(package))
    }
    Step::Version => {
      let version = read_version(&ctx.root, &ctx.package, runner).await?;
      Ok(StepOutput::Version(version))
    }
    Step::Docs => {
      let docs = build_docs(inputs.config(step)?, inputs.cache(step)?, &ctx.store, runner).await?;
      Ok(StepOutput::Docs(docs))
    }
    Step::Archive => {
      let docs = inputs.docs.as_ref().ok_or(PipelineError::MissingInput(step))?;
      let version = inputs.version.as_ref().ok_or(PipelineError::MissingInput(step))?;
      let archive = package_docs(docs, version, &ctx.package, out_dir)?;
      Ok(StepOutput::Archive(archive))
    }
  }
}

/// Check steps of `kinds`, for building requests.
pub fn check_steps(kinds: &[CheckKind]) -> Vec<Step> {
  kinds.iter().map(|k| Step::Check(*k)).collect()
}
