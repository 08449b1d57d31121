//! Documentation builder.
//!
//! Renders documentation for the package and its whole dependency graph
//! with every feature enabled. Any rustdoc warning fails the build.

use std::path::PathBuf;

use serde::Serialize;
use thiserror::Error;
use tracing::info;

use crate::config::BuildConfiguration;
use crate::deps::{DependencyCacheArtifact, WorkTree};
use crate::execute::{CargoInvocation, ExecuteError, Runner};
use crate::store::{ObjectKind, Store, StoreError};
use crate::util::fs::{copy_tree, is_empty_dir};
use crate::util::hash::{HashError, Hashable, ObjectHash};

#[derive(Debug, Error)]
pub enum DocsError {
  #[error("documentation build failed: {0}")]
  Build(#[from] ExecuteError),

  #[error("documentation build produced no output in {0}")]
  Empty(PathBuf),

  #[error("failed to collect documentation from {path}: {source}")]
  Collect {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },

  #[error("failed to hash documentation inputs: {0}")]
  Hash(#[from] HashError),

  #[error(transparent)]
  Store(#[from] StoreError),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DocumentationArtifact {
  pub store_path: PathBuf,
  pub doc_dir: PathBuf,
}

pub fn docs_invocation() -> CargoInvocation {
  CargoInvocation::new(&["doc"])
    .args(["--release", "--all-features"])
    .env("RUSTDOCFLAGS", "-D warnings")
}

#[derive(Serialize)]
struct DocsKey<'a> {
  config: &'a ObjectHash,
  cache: &'a ObjectHash,
  invocation: &'a CargoInvocation,
}

impl Hashable for DocsKey<'_> {}

pub async fn build_docs<R: Runner>(
  config: &BuildConfiguration,
  cache: &DependencyCacheArtifact,
  store: &Store,
  runner: &R,
) -> Result<DocumentationArtifact, DocsError> {
  let invocation = docs_invocation();
  let config_hash = config.config_hash()?;
  let hash = DocsKey {
    config: &config_hash,
    cache: &cache.key,
    invocation: &invocation,
  }
  .compute_hash()?;

  if let Some(store_path) = store.lookup(ObjectKind::Docs, &hash)? {
    info!(hash = %hash, "documentation already built");
    let doc_dir = store_path.join("doc");
    return Ok(DocumentationArtifact { store_path, doc_dir });
  }

  info!(package = %config.package, platform = %config.platform, "building documentation");

  let tree = WorkTree::prepare(store, config, Some(cache))?;
  let inv = config.cargo(&invocation, &tree.src, &tree.target_dir);
  runner.run(&inv).await?.require_success(&inv)?;

  let rendered = config.cargo_args.doc_dir(&tree.target_dir);
  if is_empty_dir(&rendered) {
    return Err(DocsError::Empty(rendered));
  }

  let out = store.scratch()?;
  copy_tree(&rendered, &out.path().join("doc")).map_err(|source| DocsError::Collect {
    path: rendered.clone(),
    source,
  })?;
  let store_path = store.publish(out, ObjectKind::Docs, &hash)?;
  let doc_dir = store_path.join("doc");

  info!(path = ?doc_dir, "documentation published");
  Ok(DocumentationArtifact { store_path, doc_dir })
}
