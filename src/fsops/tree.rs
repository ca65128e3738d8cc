//! Recursive copy and measurement helpers

use std::fs;
use std::path::{Path, PathBuf};

use walkdir::WalkDir;

use crate::error::{EngineError, EngineResult};

/// Copy the contents of `source` into `dest`, creating `dest` as needed
///
/// Existing files are overwritten. Returns the number of files copied.
pub fn copy_tree(source: &Path, dest: &Path) -> EngineResult<u64> {
    let mut copied = 0;
    fs::create_dir_all(dest)?;

    for entry in WalkDir::new(source).min_depth(1) {
        let entry = entry?;
        let relative = entry
            .path()
            .strip_prefix(source)
            .map_err(|e| EngineError::Io(format!("Failed to relativize path: {}", e)))?;
        let target = dest.join(relative);

        if entry.file_type().is_dir() {
            fs::create_dir_all(&target)?;
        } else {
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::copy(entry.path(), &target)?;
            copied += 1;
        }
    }

    Ok(copied)
}

/// Copy a file or a directory tree to `dest`
pub fn copy_path(source: &Path, dest: &Path) -> EngineResult<u64> {
    if source.is_dir() {
        copy_tree(source, dest)
    } else {
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::copy(source, dest)?;
        Ok(1)
    }
}

/// Total size of all files below `path`
pub fn dir_size(path: &Path) -> EngineResult<u64> {
    let mut total = 0;
    for entry in WalkDir::new(path) {
        let entry = entry?;
        if entry.file_type().is_file() {
            total += entry.metadata()?.len();
        }
    }
    Ok(total)
}

/// Every file below `root`, relative to it, sorted
pub fn list_files(root: &Path) -> EngineResult<Vec<PathBuf>> {
    let mut files = Vec::new();
    for entry in WalkDir::new(root).min_depth(1).sort_by_file_name() {
        let entry = entry?;
        if entry.file_type().is_file() {
            if let Ok(relative) = entry.path().strip_prefix(root) {
                files.push(relative.to_path_buf());
            }
        }
    }
    Ok(files)
}
