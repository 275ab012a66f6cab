//! Storage path helpers.

use std::path::{Path, PathBuf};

const POOLKIT_DIRNAME: &str = "poolkit";
const BLOBS_DIRNAME: &str = "blobs";
const LOCK_FILENAME: &str = "lock";

/// Paths for pool storage artifacts under `<root>/poolkit`.
#[derive(Debug, Clone)]
pub struct StoragePaths {
    root: PathBuf,
    poolkit_dir: PathBuf,
}

impl StoragePaths {
    /// Builds storage paths rooted at `root`.
    #[must_use]
    pub fn new(root: impl AsRef<Path>) -> Self {
        let root = root.as_ref().to_path_buf();
        let poolkit_dir = root.join(POOLKIT_DIRNAME);
        Self { root, poolkit_dir }
    }

    /// Returns the storage root directory.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Returns the directory holding encrypted blobs.
    #[must_use]
    pub fn blobs_dir(&self) -> PathBuf {
        self.poolkit_dir.join(BLOBS_DIRNAME)
    }

    /// Returns the path to the lock file.
    #[must_use]
    pub fn lock_path(&self) -> PathBuf {
        self.poolkit_dir.join(LOCK_FILENAME)
    }

    /// Returns the path of the blob stored under `name`.
    #[must_use]
    pub fn blob_path(&self, name: &str) -> PathBuf {
        self.blobs_dir().join(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_paths_layout() {
        let paths = StoragePaths::new("/tmp/wallet");
        assert_eq!(paths.root(), Path::new("/tmp/wallet"));
        assert_eq!(paths.lock_path(), PathBuf::from("/tmp/wallet/poolkit/lock"));
        assert_eq!(
            paths.blob_path("ab.cd"),
            PathBuf::from("/tmp/wallet/poolkit/blobs/ab.cd")
        );
    }
}
