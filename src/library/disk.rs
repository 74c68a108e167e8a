/// Disk-based library database storage
use crate::{
    error::{AppError, AppResult},
    library::{LibraryFile, LibraryStore},
};
use async_trait::async_trait;
use std::path::PathBuf;
use tokio::fs;

/// Disk storage backend, one directory per identity
#[derive(Clone)]
pub struct DiskLibraryStore {
    base_path: PathBuf,
}

impl DiskLibraryStore {
    pub fn new(base_path: PathBuf) -> Self {
        Self { base_path }
    }

    fn identity_dir(&self, identity_id: &str) -> PathBuf {
        self.base_path.join(identity_id)
    }

    fn file_path(&self, identity_id: &str, filename: &str) -> AppResult<PathBuf> {
        // Filenames are caller-supplied; refuse anything that escapes the
        // identity's directory
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
        Ok(self.identity_dir(identity_id).join(filename))
    }
}

#[async_trait]
impl LibraryStore for DiskLibraryStore {
    async fn put(&self, identity_id: &str, filename: &str, data: Vec<u8>) -> AppResult<()> {
        let path = self.file_path(identity_id, filename)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await.map_err(|e| {
                AppError::Storage(format!("Failed to create library directory: {}", e))
            })?;
        }

        fs::write(&path, data)
            .await
            .map_err(|e| AppError::Storage(format!("Failed to write database {}: {}", filename, e)))?;

        Ok(())
    }

    async fn get(&self, identity_id: &str, filename: &str) -> AppResult<Option<Vec<u8>>> {
        let path = self.file_path(identity_id, filename)?;

        match fs::read(&path).await {
            Ok(data) => Ok(Some(data)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(AppError::Storage(format!(
                "Failed to read database {}: {}",
                filename, e
            ))),
        }
    }

    async fn list(&self, identity_id: &str) -> AppResult<Vec<LibraryFile>> {
        let dir = self.identity_dir(identity_id);

        let mut entries = match fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(AppError::Storage(format!(
                    "Failed to list databases: {}",
                    e
                )))
            }
        };

        let mut files = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| AppError::Storage(format!("Failed to list databases: {}", e)))?
        {
            let metadata = entry
                .metadata()
                .await
                .map_err(|e| AppError::Storage(format!("Failed to stat database: {}", e)))?;
            if metadata.is_file() {
                files.push(LibraryFile {
                    filename: entry.file_name().to_string_lossy().into_owned(),
                    size: metadata.len(),
                });
            }
        }

        files.sort_by(|a, b| a.filename.cmp(&b.filename));
        Ok(files)
    }

    async fn delete(&self, identity_id: &str, filename: &str) -> AppResult<()> {
        let path = self.file_path(identity_id, filename)?;

        match fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(AppError::Storage(format!(
                "Failed to delete database {}: {}",
                filename, e
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_put_and_get_database() {
        let dir = tempdir().unwrap();
        let store = DiskLibraryStore::new(dir.path().to_path_buf());

        let data = b"serato database v2".to_vec();
        store.put("user-1", "database.v2", data.clone()).await.unwrap();

        let retrieved = store.get("user-1", "database.v2").await.unwrap();
        assert_eq!(retrieved, Some(data));
    }

    #[tokio::test]
    async fn test_put_replaces_prior_upload() {
        let dir = tempdir().unwrap();
        let store = DiskLibraryStore::new(dir.path().to_path_buf());

        store.put("user-1", "database.v2", b"old".to_vec()).await.unwrap();
        store.put("user-1", "database.v2", b"new".to_vec()).await.unwrap();

        let retrieved = store.get("user-1", "database.v2").await.unwrap();
        assert_eq!(retrieved, Some(b"new".to_vec()));
        assert_eq!(store.list("user-1").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_get_nonexistent_database() {
        let dir = tempdir().unwrap();
        let store = DiskLibraryStore::new(dir.path().to_path_buf());

        let result = store.get("user-1", "missing.v2").await.unwrap();
        assert_eq!(result, None);
    }

    #[tokio::test]
    async fn test_list_is_scoped_per_identity() {
        let dir = tempdir().unwrap();
        let store = DiskLibraryStore::new(dir.path().to_path_buf());

        store.put("user-1", "a.v2", b"a".to_vec()).await.unwrap();
        store.put("user-2", "b.v2", b"b".to_vec()).await.unwrap();

        let files = store.list("user-1").await.unwrap();
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].filename, "a.v2");
        assert_eq!(files[0].size, 1);
    }

    #[tokio::test]
    async fn test_list_for_unknown_identity_is_empty() {
        let dir = tempdir().unwrap();
        let store = DiskLibraryStore::new(dir.path().to_path_buf());
        assert!(store.list("nobody").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_delete_database() {
        let dir = tempdir().unwrap();
        let store = DiskLibraryStore::new(dir.path().to_path_buf());

        store.put("user-1", "database.v2", b"x".to_vec()).await.unwrap();
        store.delete("user-1", "database.v2").await.unwrap();
        assert_eq!(store.get("user-1", "database.v2").await.unwrap(), None);

        // Deleting again is not an error
        store.delete("user-1", "database.v2").await.unwrap();
    }

    #[tokio::test]
    async fn test_traversal_filenames_rejected() {
        let dir = tempdir().unwrap();
        let store = DiskLibraryStore::new(dir.path().to_path_buf());

        assert!(store.get("user-1", "../secrets").await.is_err());
        assert!(store.get("user-1", "a/b").await.is_err());
        assert!(store.put("user-1", "", b"x".to_vec()).await.is_err());
    }
}
