// Filesystem storage rooted at the served directory.

use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use tokio::fs;
use tracing::debug;

use super::traits::StorageProbe;
use super::StorageError;

#[derive(Debug, Clone)]
pub struct LocalStorage {
    root: PathBuf,
}

impl LocalStorage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Create the storage root if it does not exist yet.
    pub async fn ensure_root(&self) -> Result<(), StorageError> {
        fs::create_dir_all(&self.root).await?;
        Ok(())
    }

    /// Map a request-relative path onto the storage root.
    ///
    /// Empty and `.` segments are skipped. Parent references, absolute paths
    /// and drive prefixes are rejected so a request can never leave the root.
    pub fn resolve_path(&self, relative: &str) -> Result<PathBuf, StorageError> {
        let mut resolved = self.root.clone();
        for segment in relative.split(['/', '\\']) {
            if segment.is_empty() {
                continue;
            }
            match Path::new(segment).components().next() {
                Some(Component::Normal(part)) => resolved.push(part),
                Some(Component::CurDir) => {}
                _ => return Err(StorageError::InvalidPath(relative.to_string())),
            }
        }
        Ok(resolved)
    }

    /// Remove a file or a whole directory tree. A missing path is not an error.
    pub async fn remove_all(&self, relative: &str) -> Result<(), StorageError> {
        let target = self.resolve_path(relative)?;
        if target == self.root {
            return Err(StorageError::InvalidPath(relative.to_string()));
        }
        let metadata = match fs::symlink_metadata(&target).await {
            Ok(metadata) => metadata,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(()),
            Err(err) => return Err(err.into()),
        };
        if metadata.is_dir() {
            fs::remove_dir_all(&target).await?;
        } else {
            fs::remove_file(&target).await?;
        }
        Ok(())
    }

    pub async fn rename(&self, from: &str, to: &str) -> Result<(), StorageError> {
        let source = self.resolve_path(from)?;
        let target = self.resolve_path(to)?;
        debug!("rename {} -> {}", source.display(), target.display());
        fs::rename(&source, &target).await?;
        Ok(())
    }
}

#[async_trait]
impl StorageProbe for LocalStorage {
    async fn exists(&self, path: &str) -> bool {
        match self.resolve_path(path) {
            Ok(target) => fs::metadata(&target).await.is_ok(),
            Err(_) => false,
        }
    }
}
