//! Free space on the destination volume

use std::path::{Path, PathBuf};

use sysinfo::{DiskExt, System, SystemExt};

use crate::error::{EngineError, EngineResult};

/// Reports how much space is free on the volume holding a path
pub trait FreeSpaceProbe: Send + Sync {
    /// Available bytes on the volume containing `path`
    fn available_space(&self, path: &Path) -> EngineResult<u64>;
}

/// Free space from the operating system's disk list
#[derive(Debug, Default, Clone, Copy)]
pub struct SysinfoFreeSpace;

impl FreeSpaceProbe for SysinfoFreeSpace {
    fn available_space(&self, path: &Path) -> EngineResult<u64> {
        let probe = existing_ancestor(path);
        let mut system = System::new();
        system.refresh_disks_list();

        // The most specific mount point wins
        system
            .disks()
            .iter()
            .filter(|disk| probe.starts_with(disk.mount_point()))
            .max_by_key(|disk| disk.mount_point().components().count())
            .map(|disk| disk.available_space())
            .ok_or_else(|| {
                EngineError::Io(format!("No volume found for {}", path.display()))
            })
    }
}

/// Nearest ancestor of `path` that exists, canonicalized when possible
fn existing_ancestor(path: &Path) -> PathBuf {
    let mut current = Some(path);
    while let Some(dir) = current {
        if dir.exists() {
            return dir.canonicalize().unwrap_or_else(|_| dir.to_path_buf());
        }
        current = dir.parent();
    }
    path.to_path_buf()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_existing_ancestor() {
        let temp = TempDir::new().unwrap();
        let missing = temp.path().join("a").join("b");
        let ancestor = existing_ancestor(&missing);
        assert_eq!(ancestor, temp.path().canonicalize().unwrap());
    }
}
