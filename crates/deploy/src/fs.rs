//! File system utils.

use std::{
    io::Write,
    path::{Path, PathBuf},
};

use crate::error::{DeployError, Result};

pub struct FsHandler;

impl FsHandler {
    /// Create a directory (and its parents) if it doesn't exist.
    pub fn create_dir(path: &Path) -> Result<()> {
        std::fs::create_dir_all(path).map_err(|e| DeployError::storage(path, e))?;
        tracing::trace!(path = %path.display(), "Ensured directory exists");
        Ok(())
    }

    /// Path of the staging file used by [`FsHandler::write_atomic`].
    pub fn staging_path(path: &Path) -> PathBuf {
        let mut name = path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(".tmp");
        path.with_file_name(name)
    }

    /// Replace the contents of `path` so that a crash leaves either the old or the new content.
    ///
    /// The bytes are written and synced to a sibling staging file, which is then
    /// renamed over the destination.
    pub fn write_atomic(path: &Path, contents: &[u8], private: bool) -> Result<()> {
        let parent = path
            .parent()
            .ok_or_else(|| DeployError::storage(path, "path has no parent directory"))?;
        Self::create_dir(parent)?;

        let staging = Self::staging_path(path);
        {
            let mut file =
                std::fs::File::create(&staging).map_err(|e| DeployError::storage(&staging, e))?;
            if private {
                Self::set_private(&staging)?;
            }
            file.write_all(contents)
                .map_err(|e| DeployError::storage(&staging, e))?;
            file.sync_all()
                .map_err(|e| DeployError::storage(&staging, e))?;
        }

        std::fs::rename(&staging, path).map_err(|e| DeployError::storage(path, e))?;

        // Persist the rename itself. Not every platform allows opening a directory.
        if let Ok(dir) = std::fs::File::open(parent) {
            let _ = dir.sync_all();
        }

        tracing::trace!(path = %path.display(), bytes = contents.len(), "File written atomically");
        Ok(())
    }

    /// Read a file, returning `None` if it does not exist.
    pub fn read_optional(path: &Path) -> Result<Option<String>> {
        match std::fs::read_to_string(path) {
            Ok(content) => Ok(Some(content)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(DeployError::storage(path, e)),
        }
    }

    /// Remove a file, returning whether it existed.
    pub fn remove_optional(path: &Path) -> Result<bool> {
        match std::fs::remove_file(path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(DeployError::storage(path, e)),
        }
    }

    #[cfg(unix)]
    fn set_private(path: &Path) -> Result<()> {
        use std::os::unix::fs::PermissionsExt;

        std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))
            .map_err(|e| DeployError::storage(path, e))
    }

    #[cfg(not(unix))]
    fn set_private(_path: &Path) -> Result<()> {
        Ok(())
    }
}
