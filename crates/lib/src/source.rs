//! Source snapshots.
//!
//! A snapshot is the filtered copy of the package root that every step
//! builds from. It is named by the hash of the kept files, so two roots with
//! identical filtered content share one store object.

use std::fs;
use std::path::{Path, PathBuf};

use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info};
use walkdir::DirEntry;

use crate::consts::COMPLETE_MARKER;
use crate::settings::SourceSettings;
use crate::store::{ObjectKind, Store, StoreError};
use crate::util::fs::copy_tree;
use crate::util::hash::{ContentHash, DirHashError, HashError, Hashable, ObjectHash, hash_tree};

/// Directories at the package root never copied into a snapshot.
pub const DEFAULT_EXCLUDES: &[&str] = &[".git", "target", "result", ".direnv"];

#[derive(Debug, Error)]
pub enum SnapshotError {
  #[error("package root {0} does not exist")]
  MissingRoot(PathBuf),

  #[error("no Cargo.toml in {0}")]
  MissingManifest(PathBuf),

  #[error("failed to copy {path}: {source}")]
  Copy {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },

  #[error(transparent)]
  Hash(#[from] DirHashError),

  #[error("failed to hash snapshot: {0}")]
  Serialize(#[from] HashError),

  #[error(transparent)]
  Store(#[from] StoreError),
}

/// Decides which entries of the package root end up in a snapshot.
#[derive(Debug, Clone)]
pub struct SourceFilter {
  names: Vec<String>,
  extensions: Vec<String>,
  /// Directory paths relative to the package root, `/`-separated.
  excluded_dirs: Vec<String>,
}

impl Default for SourceFilter {
  fn default() -> Self {
    Self {
      names: vec!["Cargo.lock".to_string()],
      extensions: vec!["rs".to_string(), "toml".to_string()],
      excluded_dirs: DEFAULT_EXCLUDES.iter().map(|s| s.to_string()).collect(),
    }
  }
}

impl SourceFilter {
  /// The default filter extended with `settings`.
  ///
  /// Include entries of the form `*.ext` add an extension, anything else a
  /// file name. Exclude entries are directory paths relative to the root,
  /// so `fuzz` drops `<root>/fuzz` but not `<root>/src/fuzz`.
  pub fn from_settings(settings: &SourceSettings) -> Self {
    let mut filter = Self::default();
    for entry in &settings.include {
      match entry.strip_prefix("*.") {
        Some(ext) => filter.extensions.push(ext.to_string()),
        None => filter.names.push(entry.clone()),
      }
    }
    filter
      .excluded_dirs
      .extend(settings.exclude.iter().map(|d| d.trim_matches('/').to_string()));
    filter
  }

  pub fn keep(&self, entry: &DirEntry) -> bool {
    let name = entry.file_name().to_string_lossy();
    if entry.file_type().is_dir() {
      let rel = relative_path(entry);
      return !self.excluded_dirs.iter().any(|d| *d == rel);
    }
    if self.names.iter().any(|n| *n == name) {
      return true;
    }
    Path::new(name.as_ref())
      .extension()
      .and_then(|e| e.to_str())
      .is_some_and(|ext| self.extensions.iter().any(|e| e == ext))
  }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SourceSnapshot {
  pub hash: ObjectHash,
  /// Published location in the store.
  pub root: PathBuf,
  pub manifest_hash: ContentHash,
  pub lockfile_hash: Option<ContentHash>,
  pub files: usize,
}

#[derive(Serialize)]
struct SnapshotIdentity<'a> {
  files: &'a [(String, ContentHash)],
}

impl Hashable for SnapshotIdentity<'_> {}

impl SourceSnapshot {
  /// Filter `root`, hash what remains and publish it into `store`.
  pub fn capture(root: &Path, filter: &SourceFilter, store: &Store) -> Result<Self, SnapshotError> {
    if !root.is_dir() {
      return Err(SnapshotError::MissingRoot(root.to_path_buf()));
    }

    let (_, files) = hash_tree(root, |e| filter.keep(e))?;

    let manifest_hash = lookup_file(&files, "Cargo.toml")
      .ok_or_else(|| SnapshotError::MissingManifest(root.to_path_buf()))?;
    let lockfile_hash = lookup_file(&files, "Cargo.lock");

    // Directories are not part of the identity; only the kept files are.
    let hash = SnapshotIdentity { files: &files }.compute_hash()?;

    let store_path = match store.lookup(ObjectKind::Source, &hash)? {
      Some(path) => {
        debug!(hash = %hash, "source snapshot already in store");
        path
      }
      None => {
        let scratch = store.scratch()?;
        for (rel, _) in &files {
          let from = root.join(rel);
          let to = scratch.path().join(rel);
          if let Some(parent) = to.parent() {
            fs::create_dir_all(parent).map_err(|source| SnapshotError::Copy {
              path: parent.to_path_buf(),
              source,
            })?;
          }
          fs::copy(&from, &to).map_err(|source| SnapshotError::Copy { path: from, source })?;
        }
        store.publish(scratch, ObjectKind::Source, &hash)?
      }
    };

    info!(hash = %hash, files = files.len(), "captured source snapshot");

    Ok(Self {
      hash,
      root: store_path,
      manifest_hash,
      lockfile_hash,
      files: files.len(),
    })
  }

  /// Copy the snapshot into `dest` as a writable working tree.
  pub fn materialize(&self, dest: &Path) -> std::io::Result<()> {
    copy_tree(&self.root, dest)?;
    let marker = dest.join(COMPLETE_MARKER);
    if marker.exists() {
      fs::remove_file(marker)?;
    }
    Ok(())
  }
}

/// Path of `entry` below the walk root, `/`-separated.
fn relative_path(entry: &DirEntry) -> String {
  let mut parts: Vec<String> = entry
    .path()
    .components()
    .rev()
    .take(entry.depth())
    .map(|c| c.as_os_str().to_string_lossy().into_owned())
    .collect();
  parts.reverse();
  parts.join("/")
}

fn lookup_file(files: &[(String, ContentHash)], rel: &str) -> Option<ContentHash> {
  files.iter().find(|(path, _)| path == rel).map(|(_, hash)| hash.clone())
}
