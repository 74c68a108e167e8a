/// External playlist import operation
///
/// The matching engine itself is an external collaborator; this module owns
/// the interface the backend needs from it: a long-running call that reports
/// progress through a callback and honors cooperative cancellation.
pub mod command;
pub mod progress;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;

pub use command::CommandImporter;

/// One import invocation
#[derive(Debug, Clone)]
pub struct ImportRequest {
    pub playlist_url: String,
    /// Matching threshold in percent
    pub threshold: u8,
    /// Local working copy of the uploaded library database
    pub database_path: PathBuf,
    /// Free-tier callers are subject to the playlist track ceiling
    pub free_tier: bool,
}

/// Result summary of a finished import
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImportOutcome {
    pub matched: u32,
    pub total: u32,
    /// Name of the crate file the importer wrote into the shared output
    /// directory; absent when no tracks matched
    pub crate_name: Option<String>,
}

#[derive(Error, Debug)]
pub enum ImportError {
    /// The playlist exceeds the free-tier track ceiling
    #[error("playlist exceeds the free tier track limit")]
    PlaylistTooLarge,

    /// Cancelled cooperatively, usually because the client disconnected
    #[error("import cancelled")]
    Cancelled,

    #[error("{0}")]
    Failed(String),
}

/// Cooperative cancellation token
///
/// The external engine has no native cancellation hook; it checks this token
/// (directly and through the progress callback's return value) and unwinds
/// with `ImportError::Cancelled`.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

/// Progress callback handed to the importer
///
/// Payloads are whatever the engine emits; normalization happens on the
/// consumer side. Returning an error (the cancellation signal) tells the
/// importer to abort forward progress.
pub type ProgressFn<'a> =
    &'a (dyn Fn(serde_json::Value) -> Result<(), ImportError> + Send + Sync);

/// The external long-running playlist import operation
#[async_trait]
pub trait PlaylistImporter: Send + Sync {
    async fn import(
        &self,
        request: &ImportRequest,
        progress: ProgressFn<'_>,
        cancel: &CancelToken,
    ) -> Result<ImportOutcome, ImportError>;
}
