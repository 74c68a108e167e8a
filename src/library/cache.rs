/// Local on-disk cache of library databases for the import step
///
/// A working copy is considered fresh for 24 hours from its last fetch; past
/// that it is purged and re-fetched from the store on next use. Concurrent
/// requests for the same (identity, filename) inside the freshness window
/// reuse the same cached bytes.
use crate::{
    error::{AppError, AppResult},
    library::LibraryStore,
};
use std::path::PathBuf;
use std::time::{Duration, SystemTime};
use tokio::fs;
use tracing::{debug, warn};

const FRESHNESS: Duration = Duration::from_secs(24 * 60 * 60);

pub struct LibraryCache {
    base_path: PathBuf,
    freshness: Duration,
}

impl LibraryCache {
    pub fn new(base_path: PathBuf) -> Self {
        Self {
            base_path,
            freshness: FRESHNESS,
        }
    }

    #[cfg(test)]
    fn with_freshness(base_path: PathBuf, freshness: Duration) -> Self {
        Self {
            base_path,
            freshness,
        }
    }

    fn local_path(&self, identity_id: &str, filename: &str) -> AppResult<PathBuf> {
        if filename.is_empty()
            || filename.contains('/')
            || filename.contains('\\')
            || filename.contains("..")
        {
            return Err(AppError::Validation(format!(
                "Invalid database filename: {}",
                filename
            )));
        }
        Ok(self.base_path.join(identity_id).join(filename))
    }

    async fn is_fresh(&self, path: &PathBuf) -> bool {
        match fs::metadata(path).await {
            Ok(metadata) => metadata
                .modified()
                .ok()
                .and_then(|mtime| SystemTime::now().duration_since(mtime).ok())
                .map(|age| age < self.freshness)
                .unwrap_or(false),
            Err(_) => false,
        }
    }

    /// Resolve a local working copy, fetching from the store on a stale or
    /// missing cache entry
    ///
    /// A missing source database maps to `ResourceNotFound`, distinguished
    /// from generic storage failures so the caller can tell the user to
    /// upload a database first.
    pub async fn resolve(
        &self,
        identity_id: &str,
        filename: &str,
        store: &dyn LibraryStore,
    ) -> AppResult<PathBuf> {
        let path = self.local_path(identity_id, filename)?;

        if self.is_fresh(&path).await {
            debug!("Library cache hit: {}/{}", identity_id, filename);
            return Ok(path);
        }

        debug!("Library cache miss: {}/{}", identity_id, filename);
        let data = store
            .get(identity_id, filename)
            .await?
            .ok_or_else(|| AppError::ResourceNotFound(filename.to_string()))?;

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await.map_err(|e| {
                AppError::Storage(format!("Failed to create cache directory: {}", e))
            })?;
        }
        fs::write(&path, data)
            .await
            .map_err(|e| AppError::Storage(format!("Failed to write cache copy: {}", e)))?;

        Ok(path)
    }

    /// Remove stale working copies; returns the number removed
    pub async fn purge_stale(&self) -> AppResult<usize> {
        let mut removed = 0;

        let mut identities = match fs::read_dir(&self.base_path).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(AppError::Storage(format!("Failed to scan cache: {}", e))),
        };

        while let Some(identity_dir) = identities
            .next_entry()
            .await
            .map_err(|e| AppError::Storage(format!("Failed to scan cache: {}", e)))?
        {
            let mut files = match fs::read_dir(identity_dir.path()).await {
                Ok(files) => files,
                Err(_) => continue,
            };

            while let Some(file) = files
                .next_entry()
                .await
                .map_err(|e| AppError::Storage(format!("Failed to scan cache: {}", e)))?
            {
                let path = file.path();
                if !self.is_fresh(&path).await {
                    match fs::remove_file(&path).await {
                        Ok(()) => removed += 1,
                        Err(e) => warn!("Failed to purge stale cache copy {:?}: {}", path, e),
                    }
                }
            }
        }

        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::library::DiskLibraryStore;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_miss_fetches_from_store() {
        let store_dir = tempdir().unwrap();
        let cache_dir = tempdir().unwrap();
        let store = DiskLibraryStore::new(store_dir.path().to_path_buf());
        let cache = LibraryCache::new(cache_dir.path().to_path_buf());

        store
            .put("user-1", "database.v2", b"library bytes".to_vec())
            .await
            .unwrap();

        let path = cache.resolve("user-1", "database.v2", &store).await.unwrap();
        assert_eq!(fs::read(&path).await.unwrap(), b"library bytes");
    }

    #[tokio::test]
    async fn test_fresh_copy_is_reused() {
        let store_dir = tempdir().unwrap();
        let cache_dir = tempdir().unwrap();
        let store = DiskLibraryStore::new(store_dir.path().to_path_buf());
        let cache = LibraryCache::new(cache_dir.path().to_path_buf());

        store
            .put("user-1", "database.v2", b"v1".to_vec())
            .await
            .unwrap();
        let path = cache.resolve("user-1", "database.v2", &store).await.unwrap();

        // The store changes, but the fresh cache copy keeps being served
        store
            .put("user-1", "database.v2", b"v2".to_vec())
            .await
            .unwrap();
        let path2 = cache.resolve("user-1", "database.v2", &store).await.unwrap();
        assert_eq!(path, path2);
        assert_eq!(fs::read(&path2).await.unwrap(), b"v1");
    }

    #[tokio::test]
    async fn test_stale_copy_is_refetched() {
        let store_dir = tempdir().unwrap();
        let cache_dir = tempdir().unwrap();
        let store = DiskLibraryStore::new(store_dir.path().to_path_buf());
        let cache =
            LibraryCache::with_freshness(cache_dir.path().to_path_buf(), Duration::from_secs(0));

        store
            .put("user-1", "database.v2", b"v1".to_vec())
            .await
            .unwrap();
        cache.resolve("user-1", "database.v2", &store).await.unwrap();

        store
            .put("user-1", "database.v2", b"v2".to_vec())
            .await
            .unwrap();
        let path = cache.resolve("user-1", "database.v2", &store).await.unwrap();
        assert_eq!(fs::read(&path).await.unwrap(), b"v2");
    }

    #[tokio::test]
    async fn test_missing_source_is_resource_not_found() {
        let store_dir = tempdir().unwrap();
        let cache_dir = tempdir().unwrap();
        let store = DiskLibraryStore::new(store_dir.path().to_path_buf());
        let cache = LibraryCache::new(cache_dir.path().to_path_buf());

        let err = cache
            .resolve("user-1", "missing.v2", &store)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::ResourceNotFound(_)));
    }

    #[tokio::test]
    async fn test_purge_stale_removes_old_copies() {
        let store_dir = tempdir().unwrap();
        let cache_dir = tempdir().unwrap();
        let store = DiskLibraryStore::new(store_dir.path().to_path_buf());
        let cache =
            LibraryCache::with_freshness(cache_dir.path().to_path_buf(), Duration::from_secs(0));

        store
            .put("user-1", "database.v2", b"x".to_vec())
            .await
            .unwrap();
        cache.resolve("user-1", "database.v2", &store).await.unwrap();

        // Freshness zero: everything counts as stale
        assert_eq!(cache.purge_stale().await.unwrap(), 1);
        assert_eq!(cache.purge_stale().await.unwrap(), 0);
    }
}
