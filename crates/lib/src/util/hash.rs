//! Hashing utilities for content-addressed storage and verification.
//!
//! This module provides:
//! - `ObjectHash`: A truncated 20-character hash naming store objects
//! - `ContentHash`: A full 64-character hash for content verification
//! - `hash_tree()`: Deterministic directory hashing with an entry filter
//! - `hash_directory()`: `hash_tree()` with a simple name exclusion list
//! - `hash_file()` / `hash_bytes()`: Single file and arbitrary byte hashing

use std::fs;
use std::io::Read;
use std::path::Path;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use walkdir::{DirEntry, WalkDir};

use crate::consts::OBJ_HASH_PREFIX_LEN;

pub type HashError = serde_json::Error;

/// A content-addressed hash identifying a unique store object.
///
/// The hash is a 20-character truncated SHA-256 of the JSON-serialized value.
/// Struct fields serialize in declaration order and maps are `BTreeMap`s, so
/// equal values always produce equal hashes.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ObjectHash(pub String);

impl std::fmt::Display for ObjectHash {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    write!(f, "{}", self.0)
  }
}

pub trait Hashable: Serialize {
  fn compute_hash(&self) -> Result<ObjectHash, HashError> {
    let serialized = serde_json::to_string(self)?;
    let mut hasher = Sha256::new();
    hasher.update(serialized.as_bytes());
    let full = format!("{:x}", hasher.finalize());
    Ok(ObjectHash(full[..OBJ_HASH_PREFIX_LEN].to_string()))
  }
}

/// A full 64-character SHA256 hash for content verification.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContentHash(pub String);

impl std::fmt::Display for ContentHash {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    write!(f, "{}", self.0)
  }
}

/// Error during directory hashing.
#[derive(Debug, thiserror::Error)]
pub enum DirHashError {
  #[error("failed to walk directory: {message}")]
  WalkDir { message: String },

  #[error("failed to read file {path}: {message}")]
  ReadFile { path: String, message: String },

  #[error("failed to read symlink {path}: {message}")]
  ReadSymlink { path: String, message: String },
}

/// Compute a deterministic hash of a directory's contents, keeping only the
/// entries accepted by `keep`.
///
/// `keep` is consulted for every entry below the root. Rejecting a directory
/// prunes its whole subtree. The hash covers file contents, directory
/// structure and symlink targets, never timestamps or permissions.
///
/// Returns the hash together with every hashed file's relative path and
/// content hash, sorted by path.
pub fn hash_tree<F>(path: &Path, mut keep: F) -> Result<(ContentHash, Vec<(String, ContentHash)>), DirHashError>
where
  F: FnMut(&DirEntry) -> bool,
{
  let mut entries: Vec<(String, String)> = Vec::new();
  let mut files = Vec::new();

  let walker = WalkDir::new(path)
    .sort_by_file_name()
    .into_iter()
    .filter_entry(|e| e.depth() == 0 || keep(e));

  for entry in walker {
    let entry = entry.map_err(|e| DirHashError::WalkDir { message: e.to_string() })?;
    let entry_path = entry.path();

    // Forward slashes keep hashes stable across platforms
    let rel_path = entry_path
      .strip_prefix(path)
      .unwrap_or(entry_path)
      .to_string_lossy()
      .replace('\\', "/");

    if rel_path.is_empty() {
      continue;
    }

    let file_type = entry.file_type();
    let entry_hash = if file_type.is_file() {
      let content_hash = hash_file(entry_path)?;
      let line = format!("F:{}:{}", rel_path, content_hash.0);
      files.push((rel_path.clone(), content_hash));
      line
    } else if file_type.is_dir() {
      format!("D:{}", rel_path)
    } else if file_type.is_symlink() {
      let target = fs::read_link(entry_path).map_err(|e| DirHashError::ReadSymlink {
        path: entry_path.display().to_string(),
        message: e.to_string(),
      })?;
      let target_hash = hash_bytes(target.to_string_lossy().as_bytes());
      format!("L:{}:{}", rel_path, target_hash.0)
    } else {
      // Sockets, devices, etc.
      continue;
    };

    entries.push((rel_path, entry_hash));
  }

  entries.sort_by(|a, b| a.0.cmp(&b.0));
  files.sort_by(|a, b| a.0.cmp(&b.0));

  let mut hasher = Sha256::new();
  for (_, entry_hash) in entries {
    hasher.update(entry_hash.as_bytes());
    hasher.update(b"\n");
  }

  Ok((ContentHash(format!("{:x}", hasher.finalize())), files))
}

/// Compute a deterministic hash of a directory, skipping entries whose file
/// name appears in `exclude` (e.g., `&[".depot-complete", "tmp"]`).
pub fn hash_directory(path: &Path, exclude: &[&str]) -> Result<ContentHash, DirHashError> {
  let (hash, _) = hash_tree(path, |e| {
    e.file_name()
      .to_str()
      .map(|name| !exclude.contains(&name))
      .unwrap_or(true)
  })?;
  Ok(hash)
}

/// Hash a file's contents.
///
/// Returns the full 64-character SHA256 hash of the file.
pub fn hash_file(path: &Path) -> Result<ContentHash, DirHashError> {
  let mut file = fs::File::open(path).map_err(|e| DirHashError::ReadFile {
    path: path.display().to_string(),
    message: e.to_string(),
  })?;

  let mut hasher = Sha256::new();
  let mut buffer = [0u8; 8192];

  loop {
    let bytes_read = file.read(&mut buffer).map_err(|e| DirHashError::ReadFile {
      path: path.display().to_string(),
      message: e.to_string(),
    })?;
    if bytes_read == 0 {
      break;
    }
    hasher.update(&buffer[..bytes_read]);
  }

  Ok(ContentHash(format!("{:x}", hasher.finalize())))
}

/// Hash arbitrary bytes.
pub fn hash_bytes(data: &[u8]) -> ContentHash {
  let mut hasher = Sha256::new();
  hasher.update(data);
  ContentHash(format!("{:x}", hasher.finalize()))
}

#[cfg(test)]
mod tests {
  use super::*;
  use tempfile::tempdir;

  #[derive(Serialize)]
  struct Sample {
    name: String,
    args: Vec<String>,
  }

  impl Hashable for Sample {}

  #[test]
  fn object_hash_is_truncated_and_stable() {
    let sample = Sample {
      name: "clippy".to_string(),
      args: vec!["--all-targets".to_string()],
    };

    let first = sample.compute_hash().unwrap();
    let second = sample.compute_hash().unwrap();

    assert_eq!(first, second);
    assert_eq!(first.0.len(), OBJ_HASH_PREFIX_LEN);
  }

  #[test]
  fn object_hash_depends_on_argument_order() {
    let a = Sample {
      name: "x".to_string(),
      args: vec!["-a".to_string(), "-b".to_string()],
    };
    let b = Sample {
      name: "x".to_string(),
      args: vec!["-b".to_string(), "-a".to_string()],
    };

    assert_ne!(a.compute_hash().unwrap(), b.compute_hash().unwrap());
  }

  #[test]
  fn hash_empty_directory() {
    let temp = tempdir().unwrap();
    let hash = hash_directory(temp.path(), &[]).unwrap();
    assert_eq!(hash.0.len(), 64);
  }

  #[test]
  fn hash_is_deterministic() {
    let temp = tempdir().unwrap();
    fs::write(temp.path().join("a.txt"), "content a").unwrap();
    fs::write(temp.path().join("b.txt"), "content b").unwrap();

    let hash1 = hash_directory(temp.path(), &[]).unwrap();
    let hash2 = hash_directory(temp.path(), &[]).unwrap();

    assert_eq!(hash1, hash2);
  }

  #[test]
  fn hash_changes_with_content() {
    let temp = tempdir().unwrap();
    fs::write(temp.path().join("file.txt"), "original").unwrap();
    let hash1 = hash_directory(temp.path(), &[]).unwrap();

    fs::write(temp.path().join("file.txt"), "modified").unwrap();
    let hash2 = hash_directory(temp.path(), &[]).unwrap();

    assert_ne!(hash1, hash2);
  }

  #[test]
  fn hash_respects_exclusions() {
    let temp = tempdir().unwrap();
    fs::write(temp.path().join("file.txt"), "content").unwrap();
    let hash1 = hash_directory(temp.path(), &[]).unwrap();

    fs::write(temp.path().join(".depot-complete"), "marker").unwrap();
    fs::create_dir(temp.path().join("tmp")).unwrap();
    fs::write(temp.path().join("tmp/temp-file"), "temp").unwrap();

    let hash2 = hash_directory(temp.path(), &[".depot-complete", "tmp"]).unwrap();

    assert_eq!(hash1, hash2);
  }

  #[test]
  fn hash_tree_reports_kept_files_sorted() {
    let temp = tempdir().unwrap();
    fs::create_dir(temp.path().join("src")).unwrap();
    fs::write(temp.path().join("src/lib.rs"), "").unwrap();
    fs::write(temp.path().join("Cargo.toml"), "").unwrap();
    fs::write(temp.path().join("notes.txt"), "").unwrap();

    let (_, files) = hash_tree(temp.path(), |e| {
      e.file_type().is_dir() || e.file_name().to_string_lossy() != "notes.txt"
    })
    .unwrap();

    let names: Vec<&str> = files.iter().map(|(name, _)| name.as_str()).collect();
    assert_eq!(names, vec!["Cargo.toml", "src/lib.rs"]);
    assert_eq!(files[0].1, hash_bytes(b""));
  }

  #[test]
  fn same_content_different_structure_different_hash() {
    let temp1 = tempdir().unwrap();
    fs::write(temp1.path().join("file.txt"), "content").unwrap();

    let temp2 = tempdir().unwrap();
    fs::create_dir(temp2.path().join("subdir")).unwrap();
    fs::write(temp2.path().join("subdir/file.txt"), "content").unwrap();

    let hash1 = hash_directory(temp1.path(), &[]).unwrap();
    let hash2 = hash_directory(temp2.path(), &[]).unwrap();

    assert_ne!(hash1, hash2);
  }

  #[test]
  fn hash_file_matches_hash_bytes() {
    let temp = tempdir().unwrap();
    let file_path = temp.path().join("test.txt");
    fs::write(&file_path, "hello world").unwrap();

    assert_eq!(hash_file(&file_path).unwrap(), hash_bytes(b"hello world"));
  }
}
