/// Import job execution
///
/// Drives one playlist import through its stages and reports progress either
/// over an SSE stream or as a single blocking JSON result. Stream and import
/// are tied together through the session registry: dropping the stream (the
/// client went away) deactivates the session, and the import loop unwinds at
/// its next progress event.
use crate::{
    error::{AppError, AppResult},
    import::{
        progress::{JobStage, ProgressTracker, ProgressUpdate},
        CancelToken, ImportError, ImportOutcome, ImportRequest, PlaylistImporter,
    },
    jobs::registry::{JobRegistry, JobSession},
    library::{LibraryCache, LibraryStore},
};
use axum::response::sse::{Event, KeepAlive, Sse};
use futures::Stream;
use serde_json::{json, Value};
use std::convert::Infallible;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};
use std::time::{Duration, Instant};
use tokio::fs;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tracing::{debug, info, warn};

/// How long the stream may go quiet before a synthetic liveness event
const HEARTBEAT_AFTER: Duration = Duration::from_secs(3);

/// Inputs for one import job, already past the request gates
#[derive(Debug, Clone)]
pub struct JobParams {
    pub identity_id: String,
    pub playlist_url: String,
    pub threshold: u8,
    pub database_filename: String,
    pub free_tier: bool,
}

pub struct JobRunner {
    importer: Arc<dyn PlaylistImporter>,
    library_store: Arc<dyn LibraryStore>,
    library_cache: Arc<LibraryCache>,
    registry: Arc<JobRegistry>,
    shared_crate_dir: PathBuf,
    user_crate_dir: PathBuf,
}

impl JobRunner {
    pub fn new(
        importer: Arc<dyn PlaylistImporter>,
        library_store: Arc<dyn LibraryStore>,
        library_cache: Arc<LibraryCache>,
        registry: Arc<JobRegistry>,
        shared_crate_dir: PathBuf,
        user_crate_dir: PathBuf,
    ) -> Self {
        Self {
            importer,
            library_store,
            library_cache,
            registry,
            shared_crate_dir,
            user_crate_dir,
        }
    }

    /// Run an import with progress streamed as named SSE events
    ///
    /// The returned stream owns the session: dropping it releases the
    /// registry entry and cancels the in-flight import.
    pub fn run_streaming(
        self: &Arc<Self>,
        params: JobParams,
    ) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
        let session = self.registry.register(&params.identity_id);
        let (tx, rx) = mpsc::unbounded_channel::<Result<Event, Infallible>>();

        let runner = self.clone();
        let task_session = session.clone();
        tokio::spawn(async move {
            runner.drive_streaming(task_session, params, tx).await;
        });

        let stream = SessionStream {
            inner: UnboundedReceiverStream::new(rx),
            _guard: SessionGuard {
                registry: self.registry.clone(),
                session_id: session.id.clone(),
            },
        };
        Sse::new(stream).keep_alive(KeepAlive::new().interval(Duration::from_secs(15)))
    }

    /// Run an import to completion and return the single JSON result
    pub async fn run_blocking(&self, params: JobParams) -> AppResult<Value> {
        let session = self.registry.register(&params.identity_id);
        let tracker = Arc::new(Mutex::new(ProgressTracker::new()));
        let result = self.execute(&session, &params, &tracker, &|_| {}).await;
        crate::metrics::record_import_outcome(outcome_label(&result));
        self.registry.release(&session.id);
        result
    }

    async fn drive_streaming(
        self: Arc<Self>,
        session: Arc<JobSession>,
        params: JobParams,
        tx: mpsc::UnboundedSender<Result<Event, Infallible>>,
    ) {
        let tracker = Arc::new(Mutex::new(ProgressTracker::new()));
        let last_event = Arc::new(Mutex::new(Instant::now()));

        let emit = {
            let tx = tx.clone();
            let last_event = last_event.clone();
            move |update: ProgressUpdate| {
                *last_event.lock().unwrap() = Instant::now();
                let _ = tx.send(Ok(sse_event("progress", &update)));
            }
        };

        // Cosmetic liveness ticker so a slow matching phase does not look
        // like a hung request
        let heartbeat = tokio::spawn({
            let tx = tx.clone();
            let tracker = tracker.clone();
            let last_event = last_event.clone();
            let session = session.clone();
            async move {
                let mut interval = tokio::time::interval(HEARTBEAT_AFTER);
                interval.tick().await;
                loop {
                    interval.tick().await;
                    if !session.is_active() {
                        break;
                    }
                    if last_event.lock().unwrap().elapsed() >= HEARTBEAT_AFTER {
                        let beat = tracker.lock().unwrap().heartbeat();
                        if tx.send(Ok(sse_event("progress", &beat))).is_err() {
                            break;
                        }
                    }
                }
            }
        });

        let result = self.execute(&session, &params, &tracker, &emit).await;
        heartbeat.abort();
        crate::metrics::record_import_outcome(outcome_label(&result));

        if session.is_active() {
            let event = match result {
                Ok(body) => {
                    info!("Import {} completed", session.id);
                    sse_event("complete", &body)
                }
                Err(err) => {
                    warn!("Import {} failed: {}", session.id, err);
                    sse_event("error", &error_body(&err))
                }
            };
            let _ = tx.send(Ok(event));
        } else {
            debug!("Import {} ended after disconnect, result suppressed", session.id);
        }

        self.registry.release(&session.id);
    }

    /// The stage machine shared by both transports
    async fn execute(
        &self,
        session: &Arc<JobSession>,
        params: &JobParams,
        tracker: &Arc<Mutex<ProgressTracker>>,
        emit: &(dyn Fn(ProgressUpdate) + Send + Sync),
    ) -> AppResult<Value> {
        emit(tracker.lock().unwrap().enter_stage(JobStage::Initializing));

        emit(tracker
            .lock()
            .unwrap()
            .enter_stage(JobStage::DownloadingResource));
        let database_path = self
            .library_cache
            .resolve(
                &params.identity_id,
                &params.database_filename,
                self.library_store.as_ref(),
            )
            .await?;

        emit(tracker.lock().unwrap().enter_stage(JobStage::Running));
        let request = ImportRequest {
            playlist_url: params.playlist_url.clone(),
            threshold: params.threshold,
            database_path,
            free_tier: params.free_tier,
        };
        let cancel: CancelToken = session.cancel_token();
        let callback_session = session.clone();
        let callback_tracker = tracker.clone();
        let callback = move |value: Value| -> Result<(), ImportError> {
            if !callback_session.is_active() {
                return Err(ImportError::Cancelled);
            }
            let update = callback_tracker.lock().unwrap().observe(&value);
            emit(update);
            Ok(())
        };
        let outcome = self
            .importer
            .import(&request, &callback, &cancel)
            .await
            .map_err(map_import_error)?;

        emit(tracker.lock().unwrap().enter_stage(JobStage::Completing));
        let crate_file = self
            .claim_artifact(&params.identity_id, outcome.crate_name.as_deref())
            .await?;

        Ok(complete_body(&outcome, crate_file))
    }

    /// Move the importer's output file from the shared directory into the
    /// caller's own crate directory
    ///
    /// The destination is cleared first so the rename lands atomically. An
    /// absent artifact is a valid empty result (nothing matched).
    async fn claim_artifact(
        &self,
        identity_id: &str,
        crate_name: Option<&str>,
    ) -> AppResult<Option<String>> {
        let Some(name) = crate_name else {
            return Ok(None);
        };

        let source = self.shared_crate_dir.join(name);
        if fs::metadata(&source).await.is_err() {
            debug!("No artifact to claim for {}: {}", identity_id, name);
            return Ok(None);
        }

        let dest_dir = self.user_crate_dir.join(identity_id);
        fs::create_dir_all(&dest_dir)
            .await
            .map_err(|e| AppError::Storage(format!("Failed to create crate directory: {}", e)))?;

        let dest = dest_dir.join(name);
        match fs::remove_file(&dest).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                return Err(AppError::Storage(format!(
                    "Failed to clear previous crate file: {}",
                    e
                )))
            }
        }

        fs::rename(&source, &dest)
            .await
            .map_err(|e| AppError::Storage(format!("Failed to claim crate file {}: {}", name, e)))?;

        Ok(Some(name.to_string()))
    }
}

fn outcome_label(result: &AppResult<Value>) -> &'static str {
    match result {
        Ok(_) => "completed",
        Err(AppError::ClientDisconnected) => "cancelled",
        Err(_) => "failed",
    }
}

fn map_import_error(err: ImportError) -> AppError {
    match err {
        ImportError::PlaylistTooLarge => AppError::PlaylistTooLarge,
        ImportError::Cancelled => AppError::ClientDisconnected,
        ImportError::Failed(message) => AppError::UpstreamOperationFailed(message),
    }
}

fn complete_body(outcome: &ImportOutcome, crate_file: Option<String>) -> Value {
    let download_url = crate_file
        .as_deref()
        .map(|name| format!("/download-crate/{}", name));
    json!({
        "success": true,
        "results": {
            "matched": outcome.matched,
            "total": outcome.total,
        },
        "hasCrateFile": crate_file.is_some(),
        "crateFile": crate_file,
        "downloadUrl": download_url,
    })
}

fn error_body(err: &AppError) -> Value {
    let mut body = json!({
        "success": false,
        "error": err.to_string(),
    });
    if matches!(err, AppError::PlaylistTooLarge) {
        body["upgradeRequired"] = json!(true);
    }
    body
}

fn sse_event<T: serde::Serialize>(name: &str, data: &T) -> Event {
    Event::default()
        .event(name)
        .json_data(data)
        .unwrap_or_else(|_| Event::default().event(name))
}

struct SessionGuard {
    registry: Arc<JobRegistry>,
    session_id: String,
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        self.registry.release(&self.session_id);
    }
}

/// Receiver stream that releases the job session when dropped
struct SessionStream<S> {
    inner: S,
    _guard: SessionGuard,
}

impl<S: Stream + Unpin> Stream for SessionStream<S> {
    type Item = S::Item;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.get_mut().inner).poll_next(cx)
    }
}
