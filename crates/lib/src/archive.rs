//! Versioned documentation archive.
//!
//! Packs a documentation tree into `<package>-docs-<version>.tar.gz` with a
//! single top-level `<package>-docs-<version>/` directory. Archives are
//! byte-for-byte reproducible: entries are sorted, tar headers carry no
//! timestamps or owners, and the gzip header has no mtime.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use flate2::Compression;
use flate2::GzBuilder;
use flate2::read::GzDecoder;
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info};
use walkdir::WalkDir;

use crate::docs::DocumentationArtifact;
use crate::util::fs::is_empty_dir;
use crate::version::VersionString;

#[derive(Debug, Error)]
pub enum ArchiveError {
  #[error("package name must not be empty")]
  EmptyPackageName,

  #[error("package name '{0}' cannot be used in a file name")]
  InvalidPackageName(String),

  #[error("documentation directory {0} does not exist")]
  MissingDocs(PathBuf),

  #[error("documentation directory {0} is empty")]
  EmptyDocs(PathBuf),

  #[error("archive io error at {path}: {source}")]
  Io {
    path: PathBuf,
    #[source]
    source: io::Error,
  },

  #[error("archive {0} does not have exactly one top-level directory")]
  Layout(PathBuf),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VersionedArchive {
  pub path: PathBuf,
  pub top_level_dir: String,
  pub version: VersionString,
}

fn io_err(path: &Path) -> impl FnOnce(io::Error) -> ArchiveError + '_ {
  move |source| ArchiveError::Io {
    path: path.to_path_buf(),
    source,
  }
}

/// `<package>-docs-<version>`, the archive stem and top-level directory.
pub fn archive_stem(package: &str, version: &VersionString) -> String {
  format!("{}-docs-{}", package, version)
}

/// Pack `docs` into `out_dir`.
///
/// Nothing is written unless the inputs are valid, and the archive only
/// appears under its final name once complete.
pub fn package_docs(
  docs: &DocumentationArtifact,
  version: &VersionString,
  package: &str,
  out_dir: &Path,
) -> Result<VersionedArchive, ArchiveError> {
  if package.trim().is_empty() {
    return Err(ArchiveError::EmptyPackageName);
  }
  if package.contains(['/', '\\']) || package.starts_with('.') {
    return Err(ArchiveError::InvalidPackageName(package.to_string()));
  }
  if !docs.doc_dir.is_dir() {
    return Err(ArchiveError::MissingDocs(docs.doc_dir.clone()));
  }
  if is_empty_dir(&docs.doc_dir) {
    return Err(ArchiveError::EmptyDocs(docs.doc_dir.clone()));
  }

  let stem = archive_stem(package, version);
  let path = out_dir.join(format!("{stem}.tar.gz"));

  fs::create_dir_all(out_dir).map_err(io_err(out_dir))?;
  let mut tmp = tempfile::Builder::new()
    .prefix(".archive-")
    .tempfile_in(out_dir)
    .map_err(io_err(out_dir))?;

  {
    let gz = GzBuilder::new().mtime(0).write(tmp.as_file_mut(), Compression::default());
    let mut builder = tar::Builder::new(gz);
    builder.mode(tar::HeaderMode::Deterministic);
    builder.follow_symlinks(false);

    let mut entries = 0usize;
    for entry in WalkDir::new(&docs.doc_dir).sort_by_file_name() {
      let entry = entry.map_err(|e| ArchiveError::Io {
        path: docs.doc_dir.clone(),
        source: io::Error::other(e),
      })?;
      let rel = entry.path().strip_prefix(&docs.doc_dir).unwrap_or(entry.path());
      let name = Path::new(&stem).join(rel);
      if entry.file_type().is_dir() {
        builder.append_dir(&name, entry.path()).map_err(io_err(entry.path()))?;
      } else {
        builder
          .append_path_with_name(entry.path(), &name)
          .map_err(io_err(entry.path()))?;
      }
      entries += 1;
    }
    debug!(entries, "wrote archive entries");

    let gz = builder.into_inner().map_err(io_err(&path))?;
    gz.finish().map_err(io_err(&path))?;
  }

  #[cfg(unix)]
  {
    use std::os::unix::fs::PermissionsExt;
    tmp
      .as_file()
      .set_permissions(fs::Permissions::from_mode(0o644))
      .map_err(io_err(&path))?;
  }

  tmp.persist(&path).map_err(|e| ArchiveError::Io {
    path: path.clone(),
    source: e.error,
  })?;

  info!(path = ?path, "wrote documentation archive");

  Ok(VersionedArchive {
    path,
    top_level_dir: stem,
    version: version.clone(),
  })
}

/// Unpack `archive` into `dest` and return its single top-level directory.
pub fn unpack(archive: &Path, dest: &Path) -> Result<PathBuf, ArchiveError> {
  let file = fs::File::open(archive).map_err(io_err(archive))?;
  tar::Archive::new(GzDecoder::new(file))
    .unpack(dest)
    .map_err(io_err(archive))?;

  let mut top: Vec<PathBuf> = fs::read_dir(dest)
    .map_err(io_err(dest))?
    .filter_map(Result::ok)
    .map(|e| e.path())
    .collect();
  match (top.pop(), top.is_empty()) {
    (Some(dir), true) if dir.is_dir() => Ok(dir),
    _ => Err(ArchiveError::Layout(archive.to_path_buf())),
  }
}
