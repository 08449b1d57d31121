//! Platform matrix.
//!
//! Runs the pipeline once per requested platform and keys the outputs by
//! platform. Selecting a platform that was not built is an error; there is
//! no fallback to another platform.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;
use tracing::info;

use crate::execute::Runner;
use crate::pipeline::{PipelineContext, PipelineError, PipelineOutputs, PipelineRequest, run_pipeline};
use crate::platform::PlatformKey;

#[derive(Debug, Error)]
pub enum MatrixError {
  #[error("platform {0} was not built")]
  NotBuilt(PlatformKey),

  #[error("no platforms requested and the host platform is unsupported")]
  NoPlatforms,

  #[error(transparent)]
  Pipeline(#[from] PipelineError),
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct MatrixOutputs {
  pub platforms: BTreeMap<PlatformKey, PipelineOutputs>,
}

impl MatrixOutputs {
  pub fn select(&self, key: PlatformKey) -> Result<&PipelineOutputs, MatrixError> {
    self.platforms.get(&key).ok_or(MatrixError::NotBuilt(key))
  }

  pub fn succeeded(&self) -> bool {
    self.platforms.values().all(PipelineOutputs::succeeded)
  }

  pub fn iter(&self) -> impl Iterator<Item = (&PlatformKey, &PipelineOutputs)> {
    self.platforms.iter()
  }
}

/// Run `request` for every platform in `platforms`, one after another.
///
/// With more than one platform each archive goes to `<out_dir>/<platform>/`
/// so their identically named files do not collide.
pub async fn run_matrix<R: Runner>(
  platforms: &[PlatformKey],
  request: &PipelineRequest,
  ctx: Arc<PipelineContext<R>>,
) -> Result<MatrixOutputs, MatrixError> {
  if platforms.is_empty() {
    return Err(MatrixError::NoPlatforms);
  }

  let mut unique = platforms.to_vec();
  unique.sort();
  unique.dedup();

  let mut outputs = MatrixOutputs::default();
  for platform in &unique {
    let mut request = request.clone();
    if unique.len() > 1 {
      request.out_dir = request.out_dir.join(platform.triple());
    }
    info!(platform = %platform, "running pipeline for platform");
    let result = run_pipeline(ctx.clone(), *platform, &request).await?;
    outputs.platforms.insert(*platform, result);
  }

  Ok(outputs)
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::pipeline::Step;
  use crate::settings::Settings;
  use crate::store::Store;
  use crate::util::testutil::{FakeRunner, write_package};
  use tempfile::TempDir;

  fn context(root: &TempDir, store: &TempDir) -> Arc<PipelineContext<FakeRunner>> {
    write_package(root.path(), "demo", "1.2.0");
    Arc::new(PipelineContext::new(
      root.path().to_path_buf(),
      "demo".to_string(),
      Settings::default(),
      Store::new(store.path()),
      FakeRunner::new(),
    ))
  }

  #[tokio::test]
  async fn selecting_an_unbuilt_platform_fails() {
    let root = TempDir::new().unwrap();
    let store = TempDir::new().unwrap();
    let ctx = context(&root, &store);
    let request = PipelineRequest::new(vec![Step::Package], root.path().join("dist"));

    let outputs = run_matrix(&[PlatformKey::X86_64Linux], &request, ctx).await.unwrap();

    assert!(outputs.select(PlatformKey::X86_64Linux).is_ok());
    assert!(matches!(
      outputs.select(PlatformKey::Aarch64Darwin),
      Err(MatrixError::NotBuilt(PlatformKey::Aarch64Darwin))
    ));
  }

  #[tokio::test]
  async fn each_platform_gets_its_own_cache() {
    let root = TempDir::new().unwrap();
    let store = TempDir::new().unwrap();
    let ctx = context(&root, &store);
    let request = PipelineRequest::new(vec![Step::DependencyCache], root.path().join("dist"));

    let outputs = run_matrix(
      &[PlatformKey::Aarch64Darwin, PlatformKey::X86_64Linux, PlatformKey::X86_64Linux],
      &request,
      ctx.clone(),
    )
    .await
    .unwrap();

    assert_eq!(outputs.platforms.len(), 2);
    let linux = outputs.select(PlatformKey::X86_64Linux).unwrap().cache.clone().unwrap();
    let darwin = outputs.select(PlatformKey::Aarch64Darwin).unwrap().cache.clone().unwrap();
    assert_ne!(linux.key, darwin.key);
    assert_eq!(
      outputs.select(PlatformKey::Aarch64Darwin).unwrap().config.as_ref().unwrap().native_inputs[0].name,
      "libiconv"
    );
    assert_eq!(ctx.runner.count("build"), 2);
  }

  #[tokio::test]
  async fn archives_are_split_per_platform() {
    let root = TempDir::new().unwrap();
    let store = TempDir::new().unwrap();
    let ctx = context(&root, &store);
    let dist = root.path().join("dist");
    let request = PipelineRequest::new(vec![Step::Archive], dist.clone());

    let outputs = run_matrix(&[PlatformKey::X86_64Linux, PlatformKey::Aarch64Linux], &request, ctx)
      .await
      .unwrap();

    assert!(outputs.succeeded());
    let archive = outputs.select(PlatformKey::Aarch64Linux).unwrap().archive.clone().unwrap();
    assert_eq!(archive.path, dist.join("aarch64-linux/demo-docs-1.2.0.tar.gz"));
  }

  #[tokio::test]
  async fn empty_platform_list_is_rejected() {
    let root = TempDir::new().unwrap();
    let store = TempDir::new().unwrap();
    let ctx = context(&root, &store);

    let err = run_matrix(&[], &PipelineRequest::default(), ctx).await.unwrap_err();
    assert!(matches!(err, MatrixError::NoPlatforms));
  }
}
