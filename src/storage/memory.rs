// In-memory probe used to exercise resolution without touching disk.

use std::collections::HashSet;

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};

use super::traits::StorageProbe;

#[derive(Default)]
pub struct MemoryStorage {
    paths: RwLock<HashSet<String>>,
    probes: Mutex<Vec<String>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_paths<I, S>(paths: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let storage = Self::new();
        storage
            .paths
            .write()
            .extend(paths.into_iter().map(Into::into));
        storage
    }

    pub fn insert(&self, path: impl Into<String>) {
        self.paths.write().insert(path.into());
    }

    pub fn remove(&self, path: &str) -> bool {
        self.paths.write().remove(path)
    }

    /// Paths probed so far, in call order.
    pub fn probes(&self) -> Vec<String> {
        self.probes.lock().clone()
    }
}

#[async_trait]
impl StorageProbe for MemoryStorage {
    async fn exists(&self, path: &str) -> bool {
        self.probes.lock().push(path.to_string());
        self.paths.read().contains(path)
    }
}
