//! Completion markers for store objects.
//!
//! A store object is only served when its marker exists and the recorded
//! output hash matches the object's current contents.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::consts::COMPLETE_MARKER;
use crate::util::hash::hash_directory;

use super::StoreError;

/// Entries left out of the output hash; the marker is written after hashing.
const HASH_EXCLUSIONS: &[&str] = &[COMPLETE_MARKER];

/// Marker file content structure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Marker {
  /// Marker format version.
  pub version: u32,
  /// Always "complete" for published objects.
  pub status: String,
  /// Full 64-character SHA256 hash of the object's contents.
  pub output_hash: String,
}

/// Hash `dir` and write its completion marker.
pub fn write_marker(dir: &Path) -> Result<Marker, StoreError> {
  let output_hash = hash_directory(dir, HASH_EXCLUSIONS)?;
  let marker = Marker {
    version: 1,
    status: "complete".to_string(),
    output_hash: output_hash.0,
  };
  let content = serde_json::to_string(&marker).map_err(|e| StoreError::Marker {
    path: dir.to_path_buf(),
    message: e.to_string(),
  })?;
  let path = dir.join(COMPLETE_MARKER);
  fs::write(&path, format!("{}\n", content)).map_err(|source| StoreError::Io { path, source })?;
  Ok(marker)
}

/// Read the marker of `dir`.
///
/// Returns `None` if the marker doesn't exist.
pub fn read_marker(dir: &Path) -> Result<Option<Marker>, StoreError> {
  let path = dir.join(COMPLETE_MARKER);
  if !path.exists() {
    return Ok(None);
  }
  let content = fs::read_to_string(&path).map_err(|source| StoreError::Io {
    path: path.clone(),
    source,
  })?;
  let marker = serde_json::from_str(&content).map_err(|e| StoreError::Marker {
    path,
    message: e.to_string(),
  })?;
  Ok(Some(marker))
}

/// Whether `dir` holds a complete, uncorrupted object.
pub fn verify(dir: &Path) -> bool {
  let marker = match read_marker(dir) {
    Ok(Some(marker)) => marker,
    Ok(None) => {
      debug!(path = ?dir, "no completion marker");
      return false;
    }
    Err(e) => {
      warn!(path = ?dir, error = %e, "unreadable completion marker");
      return false;
    }
  };

  match hash_directory(dir, HASH_EXCLUSIONS) {
    Ok(current) if current.0 == marker.output_hash => true,
    Ok(current) => {
      warn!(
        path = ?dir,
        expected = %marker.output_hash,
        actual = %current.0,
        "store object corrupted, will rebuild"
      );
      false
    }
    Err(e) => {
      warn!(path = ?dir, error = %e, "failed to hash store object, will rebuild");
      false
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use tempfile::TempDir;

  #[test]
  fn marker_verifies_untouched_content() {
    let temp = TempDir::new().unwrap();
    fs::write(temp.path().join("out.txt"), "data").unwrap();

    write_marker(temp.path()).unwrap();

    assert!(verify(temp.path()));
  }

  #[test]
  fn modified_content_fails_verification() {
    let temp = TempDir::new().unwrap();
    fs::write(temp.path().join("out.txt"), "data").unwrap();
    write_marker(temp.path()).unwrap();

    fs::write(temp.path().join("out.txt"), "tampered").unwrap();

    assert!(!verify(temp.path()));
  }

  #[test]
  fn missing_or_garbled_marker_fails_verification() {
    let temp = TempDir::new().unwrap();
    assert!(!verify(temp.path()));

    fs::write(temp.path().join(COMPLETE_MARKER), "not json").unwrap();
    assert!(!verify(temp.path()));
    assert!(read_marker(temp.path()).is_err());
  }
}
