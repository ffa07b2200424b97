// Upload extraction: stages an uploaded body on disk, then moves it over the
// canonical path and archives what it replaces.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::fs::{self, File};
use tokio::io::AsyncWriteExt;
use tracing::{debug, error, info};

use super::local::LocalStorage;
use super::StorageError;
use crate::config::{FORM_FILE, STAGING_PREFIX};
use crate::version::VersionResolver;

static NEXT_STAGING_ID: AtomicU64 = AtomicU64::new(0);

/// An upload body written chunk by chunk into a staging file under the storage root.
///
/// Dropping it before [`store_upload`] commits removes the staging file.
pub struct StagedUpload {
    path: PathBuf,
    file: Option<File>,
    len: u64,
    committed: bool,
}

impl StagedUpload {
    pub async fn create(storage: &LocalStorage) -> Result<Self, StorageError> {
        storage.ensure_root().await?;
        let id = NEXT_STAGING_ID.fetch_add(1, Ordering::Relaxed);
        let path =
            storage.resolve_path(&format!("{}{}-{}", STAGING_PREFIX, std::process::id(), id))?;
        let file = File::create(&path).await?;
        debug!("staging upload at {}", path.display());
        Ok(Self {
            path,
            file: Some(file),
            len: 0,
            committed: false,
        })
    }

    pub async fn write_chunk(&mut self, chunk: &[u8]) -> Result<(), StorageError> {
        let file = self
            .file
            .as_mut()
            .ok_or_else(|| io::Error::other("staging file already closed"))?;
        file.write_all(chunk).await?;
        self.len += chunk.len() as u64;
        Ok(())
    }

    pub fn bytes_written(&self) -> u64 {
        self.len
    }

    /// Flush the staging file and move it onto `target`.
    async fn commit(&mut self, target: &Path) -> io::Result<()> {
        if let Some(mut file) = self.file.take() {
            file.flush().await?;
        }
        fs::rename(&self.path, target).await?;
        self.committed = true;
        Ok(())
    }
}

impl Drop for StagedUpload {
    fn drop(&mut self) {
        if !self.committed {
            let _ = std::fs::remove_file(&self.path);
        }
    }
}

/// Store a staged upload as `dir/file_name` and return the stored relative path.
///
/// When a file already sits at the target and `override_existing` is false,
/// it is moved to the next free `name_N.ext` slot first, so the canonical path
/// keeps the newest upload and earlier ones stay downloadable by version
/// number. The archive rename only happens once the whole body is on disk, and
/// it is undone if the staged file cannot take its place.
pub async fn store_upload(
    storage: &LocalStorage,
    resolver: &VersionResolver,
    dir: &str,
    file_name: &str,
    mut upload: StagedUpload,
    override_existing: bool,
) -> Result<String, StorageError> {
    let name = Path::new(file_name)
        .file_name()
        .and_then(|n| n.to_str())
        .filter(|n| !n.is_empty())
        .ok_or_else(|| StorageError::MissingFile(FORM_FILE.to_string()))?;

    let dir = dir.trim_matches('/');
    let target = if dir.is_empty() {
        name.to_string()
    } else {
        format!("{}/{}", dir, name)
    };
    let target_path = storage.resolve_path(&target)?;

    let has_previous = match fs::metadata(&target_path).await {
        Ok(metadata) if metadata.is_dir() => return Err(StorageError::IsDirectory(target)),
        Ok(_) => true,
        Err(err) if err.kind() == io::ErrorKind::NotFound => false,
        Err(err) => return Err(err.into()),
    };
    if let Some(parent) = target_path.parent() {
        fs::create_dir_all(parent).await?;
    }

    let archived = if has_previous && !override_existing {
        let archived = resolver.next_version_path(&target).await;
        info!("archiving {} as {}", target, archived);
        storage.rename(&target, &archived).await?;
        Some(archived)
    } else {
        None
    };

    if let Err(err) = upload.commit(&target_path).await {
        if let Some(archived) = &archived {
            if let Err(restore) = storage.rename(archived, &target).await {
                error!("could not restore {} from {}: {}", target, archived, restore);
            }
        }
        return Err(err.into());
    }

    info!("stored {} ({} bytes)", target, upload.bytes_written());
    Ok(target)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::version::ResolutionOutcome;

    fn setup() -> (tempfile::TempDir, LocalStorage, VersionResolver) {
        let dir = tempfile::tempdir().unwrap();
        let storage = LocalStorage::new(dir.path());
        let resolver = VersionResolver::new(Arc::new(storage.clone()));
        (dir, storage, resolver)
    }

    async fn staged(storage: &LocalStorage, body: &[u8]) -> StagedUpload {
        let mut upload = StagedUpload::create(storage).await.unwrap();
        for chunk in body.chunks(3) {
            upload.write_chunk(chunk).await.unwrap();
        }
        upload
    }

    fn root_entries(dir: &tempfile::TempDir) -> Vec<String> {
        let mut names: Vec<String> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        names
    }

    #[tokio::test]
    async fn test_store_upload_archives_previous_content() {
        let (dir, storage, resolver) = setup();

        for body in ["one", "two", "three"] {
            let upload = staged(&storage, body.as_bytes()).await;
            let stored = store_upload(&storage, &resolver, "docs", "report.csv", upload, false)
                .await
                .unwrap();
            assert_eq!(stored, "docs/report.csv");
        }

        let read = |name: &str| std::fs::read_to_string(dir.path().join("docs").join(name)).unwrap();
        assert_eq!(read("report.csv"), "three");
        assert_eq!(read("report_1.csv"), "one");
        assert_eq!(read("report_2.csv"), "two");
        assert_eq!(root_entries(&dir), vec!["docs"]);

        assert_eq!(
            resolver.resolve("docs/report.csv", Some("3")).await,
            ResolutionOutcome::ServeLatest("docs/report.csv".into())
        );
        assert_eq!(
            resolver.resolve("docs/report.csv", Some("1")).await,
            ResolutionOutcome::ServeExact("docs/report_1.csv".into())
        );
    }

    #[tokio::test]
    async fn test_store_upload_override_replaces_in_place() {
        let (dir, storage, resolver) = setup();

        let upload = staged(&storage, b"old").await;
        store_upload(&storage, &resolver, "", "a.txt", upload, true).await.unwrap();
        let upload = staged(&storage, b"new").await;
        store_upload(&storage, &resolver, "/", "a.txt", upload, true).await.unwrap();

        assert_eq!(std::fs::read(dir.path().join("a.txt")).unwrap(), b"new");
        assert!(!dir.path().join("a_1.txt").exists());
    }

    #[tokio::test]
    async fn test_store_upload_strips_client_directories() {
        let (dir, storage, resolver) = setup();
        let upload = staged(&storage, b"x").await;
        let stored = store_upload(&storage, &resolver, "in", "../../evil.sh", upload, false)
            .await
            .unwrap();
        assert_eq!(stored, "in/evil.sh");
        assert!(dir.path().join("in/evil.sh").exists());
    }

    #[tokio::test]
    async fn test_store_upload_rejects_bad_input() {
        let (dir, storage, resolver) = setup();
        let upload = staged(&storage, b"x").await;
        assert!(matches!(
            store_upload(&storage, &resolver, "x", "", upload, false).await,
            Err(StorageError::MissingFile(_))
        ));
        let upload = staged(&storage, b"x").await;
        assert!(matches!(
            store_upload(&storage, &resolver, "../up", "a.txt", upload, false).await,
            Err(StorageError::InvalidPath(_))
        ));
        // Rejected uploads leave no staging files behind.
        assert!(root_entries(&dir).is_empty());
    }

    #[tokio::test]
    async fn test_store_upload_never_archives_a_directory() {
        let (dir, storage, resolver) = setup();
        std::fs::create_dir_all(dir.path().join("photos/2024")).unwrap();
        std::fs::write(dir.path().join("photos/2024/a.jpg"), "jpeg").unwrap();

        let upload = staged(&storage, b"x").await;
        assert!(matches!(
            store_upload(&storage, &resolver, "", "photos", upload, false).await,
            Err(StorageError::IsDirectory(_))
        ));
        let upload = staged(&storage, b"x").await;
        assert!(matches!(
            store_upload(&storage, &resolver, "", "photos", upload, true).await,
            Err(StorageError::IsDirectory(_))
        ));

        assert!(dir.path().join("photos").is_dir());
        assert!(dir.path().join("photos/2024/a.jpg").is_file());
        assert!(!dir.path().join("photos_1").exists());
        assert_eq!(root_entries(&dir), vec!["photos"]);
    }

    #[tokio::test]
    async fn test_failed_commit_keeps_canonical_file() {
        let (dir, storage, resolver) = setup();
        let upload = staged(&storage, b"first").await;
        store_upload(&storage, &resolver, "docs", "notes.txt", upload, false)
            .await
            .unwrap();

        // The staged body vanishes before it can be moved into place.
        let upload = staged(&storage, b"second").await;
        std::fs::remove_file(&upload.path).unwrap();
        assert!(store_upload(&storage, &resolver, "docs", "notes.txt", upload, false)
            .await
            .is_err());

        assert_eq!(
            std::fs::read_to_string(dir.path().join("docs/notes.txt")).unwrap(),
            "first"
        );
        assert!(!dir.path().join("docs/notes_1.txt").exists());
        assert_eq!(
            resolver.resolve("docs/notes.txt", Some("1")).await,
            ResolutionOutcome::ServeLatest("docs/notes.txt".into())
        );
    }

    #[tokio::test]
    async fn test_dropped_upload_removes_staging_file() {
        let (dir, storage, _resolver) = setup();
        let upload = staged(&storage, b"partial body").await;
        assert_eq!(upload.bytes_written(), 12);
        assert_eq!(root_entries(&dir).len(), 1);
        drop(upload);
        assert!(root_entries(&dir).is_empty());
    }
}
