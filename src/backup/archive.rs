//! Zip packaging of backups
//!
//! Directory packages are compressed for transfer; `.zip` packages are
//! inspected in place for validation and extracted before a local restore.
//! Entry names are stored with `/` separators relative to the package root.

use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter};
use std::path::{Path, PathBuf};

use walkdir::WalkDir;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

use crate::error::{EngineError, EngineResult};

/// One entry of a zip package
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveEntry {
    /// Name as stored in the archive
    pub name: String,
    /// Uncompressed size
    pub size: u64,
    /// Whether the entry is a directory
    pub is_dir: bool,
}

/// Check whether `path` is a zip package
pub fn is_zip(path: &Path) -> bool {
    path.is_file()
        && path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("zip"))
}

/// Compress the contents of `source` into a new archive at `dest`
///
/// Returns the number of files stored.
pub fn zip_directory(source: &Path, dest: &Path) -> EngineResult<u64> {
    let file = File::create(dest)
        .map_err(|e| EngineError::Archive(format!("Failed to create {}: {}", dest.display(), e)))?;
    let mut zip = ZipWriter::new(BufWriter::new(file));
    let file_options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
    let dir_options = SimpleFileOptions::default().compression_method(CompressionMethod::Stored);

    let mut stored = 0;
    for entry in WalkDir::new(source).min_depth(1).sort_by_file_name() {
        let entry = entry?;
        let relative = entry
            .path()
            .strip_prefix(source)
            .map_err(|e| EngineError::Archive(format!("Failed to relativize path: {}", e)))?;
        let name = entry_name(relative);

        if entry.file_type().is_dir() {
            zip.add_directory(name, dir_options)?;
        } else {
            zip.start_file(name, file_options)?;
            let mut reader = BufReader::new(File::open(entry.path())?);
            io::copy(&mut reader, &mut zip)?;
            stored += 1;
        }
    }

    zip.finish()?;
    Ok(stored)
}

/// List the entries of an archive
pub fn list_entries(archive: &Path) -> EngineResult<Vec<ArchiveEntry>> {
    let mut zip = open(archive)?;
    let mut entries = Vec::with_capacity(zip.len());
    for index in 0..zip.len() {
        let file = zip.by_index(index)?;
        entries.push(ArchiveEntry {
            name: file.name().to_string(),
            size: file.size(),
            is_dir: file.is_dir(),
        });
    }
    Ok(entries)
}

/// Extract `archive` into `dest`, skipping entries that would escape it
///
/// Returns the number of files written.
pub fn extract_zip(archive: &Path, dest: &Path) -> EngineResult<u64> {
    let mut zip = open(archive)?;
    fs::create_dir_all(dest)?;

    let mut written = 0;
    for index in 0..zip.len() {
        let mut file = zip.by_index(index)?;
        let Some(relative) = file.enclosed_name() else {
            tracing::warn!("Skipping unsafe archive entry: {}", file.name());
            continue;
        };
        let target = dest.join(relative);

        if file.is_dir() {
            fs::create_dir_all(&target)?;
            continue;
        }
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut out = File::create(&target)?;
        io::copy(&mut file, &mut out)?;
        written += 1;
    }
    Ok(written)
}

fn open(archive: &Path) -> EngineResult<ZipArchive<BufReader<File>>> {
    let file = File::open(archive)
        .map_err(|e| EngineError::Archive(format!("Failed to open {}: {}", archive.display(), e)))?;
    Ok(ZipArchive::new(BufReader::new(file))?)
}

fn entry_name(relative: &Path) -> String {
    relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

/// Locate the data folder of an extracted or directory package
///
/// The folder sits either at the package root or one level down when the
/// archive was made from the folder containing the package.
pub fn find_component(root: &Path, component: &str) -> Option<PathBuf> {
    let direct = root.join(component);
    if direct.is_dir() {
        return Some(direct);
    }
    fs::read_dir(root)
        .ok()?
        .filter_map(Result::ok)
        .map(|entry| entry.path().join(component))
        .find(|candidate| candidate.is_dir())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn package(temp: &TempDir) -> PathBuf {
        let root = temp.path().join("Monday 04-03-2024-Backup");
        fs::create_dir_all(root.join("RegBackup")).unwrap();
        fs::create_dir_all(root.join("FileBackup").join("Plug-in Support")).unwrap();
        fs::write(root.join("RegBackup").join("Regbackup-Monday.reg"), "REGEDIT").unwrap();
        fs::write(root.join("FileBackup").join("Preferences.xml"), "x".repeat(150)).unwrap();
        root
    }

    #[test]
    fn test_zip_then_extract() {
        let temp = TempDir::new().unwrap();
        let root = package(&temp);
        let archive = temp.path().join("backup.zip");

        assert_eq!(zip_directory(&root, &archive).unwrap(), 2);
        assert!(is_zip(&archive));

        let names: Vec<String> = list_entries(&archive).unwrap().into_iter().map(|e| e.name).collect();
        assert!(names.contains(&"FileBackup/Preferences.xml".to_string()));

        let out = temp.path().join("out");
        assert_eq!(extract_zip(&archive, &out).unwrap(), 2);
        assert_eq!(
            fs::read_to_string(out.join("FileBackup").join("Preferences.xml")).unwrap().len(),
            150
        );
    }

    #[test]
    fn test_find_component_nested() {
        let temp = TempDir::new().unwrap();
        package(&temp);
        let found = find_component(temp.path(), "FileBackup").unwrap();
        assert!(found.ends_with("Monday 04-03-2024-Backup/FileBackup"));
        assert!(find_component(temp.path(), "Logs").is_none());
    }

    #[test]
    fn test_corrupt_archive_is_an_error() {
        let temp = TempDir::new().unwrap();
        let bogus = temp.path().join("broken.zip");
        fs::write(&bogus, "not a zip").unwrap();
        assert!(matches!(list_entries(&bogus), Err(EngineError::Archive(_))));
    }
}
