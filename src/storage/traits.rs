use async_trait::async_trait;

/// Read-only existence check over a storage tree.
///
/// Paths are `/`-separated and relative to the storage root. Any failure to
/// inspect a path is reported as absent.
#[async_trait]
pub trait StorageProbe: Send + Sync {
    async fn exists(&self, path: &str) -> bool;
}
