/// Storage for uploaded DJ library databases
///
/// Databases are keyed by (identity id, filename). Uploading a file replaces
/// any prior upload of the same name for that identity.
pub mod cache;
pub mod disk;

use crate::error::AppResult;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub use cache::LibraryCache;
pub use disk::DiskLibraryStore;

/// A stored library database file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LibraryFile {
    pub filename: String,
    pub size: u64,
}

/// Backend for uploaded library databases
#[async_trait]
pub trait LibraryStore: Send + Sync {
    /// Store a database, replacing any prior upload of the same name
    async fn put(&self, identity_id: &str, filename: &str, data: Vec<u8>) -> AppResult<()>;

    /// Fetch a database's bytes; `None` when nothing is stored under the key
    async fn get(&self, identity_id: &str, filename: &str) -> AppResult<Option<Vec<u8>>>;

    /// List stored databases for an identity
    async fn list(&self, identity_id: &str) -> AppResult<Vec<LibraryFile>>;

    /// Remove a stored database; absent files are not an error
    async fn delete(&self, identity_id: &str, filename: &str) -> AppResult<()>;
}
