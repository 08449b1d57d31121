//! Filesystem helpers shared by the store and the pipeline steps.

use std::fs;
use std::io;
use std::path::Path;

use walkdir::WalkDir;

/// Recursively copy `src` into `dst`, creating `dst` if needed.
///
/// Symlinks are recreated rather than followed. Permissions are carried over
/// by `fs::copy`, so executables stay executable.
pub fn copy_tree(src: &Path, dst: &Path) -> io::Result<u64> {
  let mut copied = 0;
  fs::create_dir_all(dst)?;

  for entry in WalkDir::new(src).sort_by_file_name() {
    let entry = entry.map_err(io::Error::other)?;
    let rel = entry.path().strip_prefix(src).map_err(io::Error::other)?;
    if rel.as_os_str().is_empty() {
      continue;
    }
    let target = dst.join(rel);
    let file_type = entry.file_type();

    if file_type.is_dir() {
      fs::create_dir_all(&target)?;
    } else if file_type.is_symlink() {
      let link = fs::read_link(entry.path())?;
      symlink(&link, &target)?;
    } else if file_type.is_file() {
      if let Some(parent) = target.parent() {
        fs::create_dir_all(parent)?;
      }
      copied += fs::copy(entry.path(), &target)?;
    }
  }

  Ok(copied)
}

/// Returns true if `path` is missing, not a directory, or has no entries.
pub fn is_empty_dir(path: &Path) -> bool {
  match fs::read_dir(path) {
    Ok(mut entries) => entries.next().is_none(),
    Err(_) => true,
  }
}

#[cfg(unix)]
fn symlink(target: &Path, link: &Path) -> io::Result<()> {
  std::os::unix::fs::symlink(target, link)
}

#[cfg(windows)]
fn symlink(target: &Path, link: &Path) -> io::Result<()> {
  if target.is_dir() {
    std::os::windows::fs::symlink_dir(target, link)
  } else {
    std::os::windows::fs::symlink_file(target, link)
  }
}
