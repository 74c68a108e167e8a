/// Subprocess adapter for the external playlist matching engine
///
/// The engine is driven as a child process emitting JSON lines on stdout:
/// progress payloads in whatever shape it likes, a final
/// `{"event": "result", ...}` line on success, or an `{"event": "error", ...}`
/// line on failure. Cancellation is checked between lines.
use crate::import::{
    CancelToken, ImportError, ImportOutcome, ImportRequest, PlaylistImporter, ProgressFn,
};
use async_trait::async_trait;
use serde_json::Value;
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tracing::debug;

pub struct CommandImporter {
    command: String,
}

impl CommandImporter {
    pub fn new(command: String) -> Self {
        Self { command }
    }
}

/// Does an engine error message describe the free-tier track ceiling?
fn is_track_ceiling_error(message: &str) -> bool {
    let lower = message.to_lowercase();
    lower.contains("track limit")
        || lower.contains("too many tracks")
        || (lower.contains("exceeds") && lower.contains("track"))
}

fn outcome_from_line(obj: &serde_json::Map<String, Value>) -> ImportOutcome {
    ImportOutcome {
        matched: obj.get("matched").and_then(Value::as_u64).unwrap_or(0) as u32,
        total: obj.get("total").and_then(Value::as_u64).unwrap_or(0) as u32,
        crate_name: obj
            .get("crate")
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .map(str::to_string),
    }
}

#[async_trait]
impl PlaylistImporter for CommandImporter {
    async fn import(
        &self,
        request: &ImportRequest,
        progress: ProgressFn<'_>,
        cancel: &CancelToken,
    ) -> Result<ImportOutcome, ImportError> {
        if cancel.is_cancelled() {
            return Err(ImportError::Cancelled);
        }

        let mut parts = self.command.split_whitespace();
        let program = parts
            .next()
            .ok_or_else(|| ImportError::Failed("importer command not configured".to_string()))?;

        let mut command = Command::new(program);
        command
            .args(parts)
            .arg("--playlist")
            .arg(&request.playlist_url)
            .arg("--threshold")
            .arg(request.threshold.to_string())
            .arg("--database")
            .arg(&request.database_path);
        if request.free_tier {
            command.arg("--free-tier");
        }
        command.stdout(Stdio::piped()).stderr(Stdio::piped());

        let mut child = command
            .spawn()
            .map_err(|e| ImportError::Failed(format!("failed to launch importer: {}", e)))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| ImportError::Failed("importer stdout unavailable".to_string()))?;

        let mut lines = BufReader::new(stdout).lines();
        let mut outcome = None;
        let mut engine_error: Option<String> = None;

        while let Some(line) = lines
            .next_line()
            .await
            .map_err(|e| ImportError::Failed(format!("importer output unreadable: {}", e)))?
        {
            if cancel.is_cancelled() {
                let _ = child.kill().await;
                return Err(ImportError::Cancelled);
            }

            let value: Value =
                serde_json::from_str(&line).unwrap_or_else(|_| Value::String(line));

            if let Some(obj) = value.as_object() {
                match obj.get("event").and_then(Value::as_str) {
                    Some("result") => {
                        outcome = Some(outcome_from_line(obj));
                        continue;
                    }
                    Some("error") => {
                        engine_error = Some(
                            obj.get("message")
                                .and_then(Value::as_str)
                                .unwrap_or("import failed")
                                .to_string(),
                        );
                        continue;
                    }
                    _ => {}
                }
            }

            progress(value)?;
        }

        let status = child
            .wait()
            .await
            .map_err(|e| ImportError::Failed(format!("importer did not exit cleanly: {}", e)))?;
        debug!("Importer exited with {}", status);

        if let Some(message) = engine_error {
            if is_track_ceiling_error(&message) {
                return Err(ImportError::PlaylistTooLarge);
            }
            return Err(ImportError::Failed(message));
        }

        if !status.success() {
            return Err(ImportError::Failed(format!(
                "importer exited with {}",
                status
            )));
        }

        outcome.ok_or_else(|| ImportError::Failed("importer produced no result".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use std::sync::Mutex;

    fn request() -> ImportRequest {
        ImportRequest {
            playlist_url: "https://streaming.example/playlist/1".to_string(),
            threshold: 90,
            database_path: PathBuf::from("/tmp/database.v2"),
            free_tier: true,
        }
    }

    #[cfg(unix)]
    fn script_importer(dir: &tempfile::TempDir, body: &str) -> CommandImporter {
        use std::os::unix::fs::PermissionsExt;

        let path = dir.path().join("importer.sh");
        std::fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        CommandImporter::new(path.to_string_lossy().into_owned())
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_success_flow_forwards_progress() {
        let dir = tempfile::tempdir().unwrap();
        let importer = script_importer(
            &dir,
            concat!(
                "echo '{\"current\":1,\"total\":2}'\n",
                "echo 'Processing 2 / 2 tracks'\n",
                "echo '{\"event\":\"result\",\"matched\":2,\"total\":2,\"crate\":\"Mix.crate\"}'"
            ),
        );

        let seen = Mutex::new(Vec::new());
        let outcome = importer
            .import(
                &request(),
                &|value| {
                    seen.lock().unwrap().push(value);
                    Ok(())
                },
                &CancelToken::new(),
            )
            .await
            .unwrap();

        assert_eq!(outcome.matched, 2);
        assert_eq!(outcome.total, 2);
        assert_eq!(outcome.crate_name.as_deref(), Some("Mix.crate"));
        assert_eq!(seen.lock().unwrap().len(), 2);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_track_ceiling_error_is_distinguished() {
        let dir = tempfile::tempdir().unwrap();
        let importer = script_importer(
            &dir,
            concat!(
                "echo '{\"event\":\"error\",\"message\":",
                "\"Playlist exceeds free tier track limit (100)\"}'\n",
                "exit 1"
            ),
        );

        let err = importer
            .import(&request(), &|_| Ok(()), &CancelToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, ImportError::PlaylistTooLarge));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_generic_failure_passes_message_through() {
        let dir = tempfile::tempdir().unwrap();
        let importer = script_importer(
            &dir,
            "echo '{\"event\":\"error\",\"message\":\"playlist service unavailable\"}'",
        );

        let err = importer
            .import(&request(), &|_| Ok(()), &CancelToken::new())
            .await
            .unwrap_err();
        match err {
            ImportError::Failed(msg) => assert_eq!(msg, "playlist service unavailable"),
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_missing_result_line_is_a_failure() {
        let dir = tempfile::tempdir().unwrap();
        let importer = script_importer(&dir, "echo '{\"current\":1,\"total\":2}'");

        let err = importer
            .import(&request(), &|_| Ok(()), &CancelToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, ImportError::Failed(_)));
    }

    #[tokio::test]
    async fn test_pre_cancelled_token_skips_launch() {
        let importer = CommandImporter::new("definitely-not-a-real-binary".to_string());
        let cancel = CancelToken::new();
        cancel.cancel();

        let err = importer
            .import(&request(), &|_| Ok(()), &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, ImportError::Cancelled));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_callback_cancellation_unwinds_import() {
        let dir = tempfile::tempdir().unwrap();
        let importer = script_importer(
            &dir,
            concat!(
                "echo '{\"current\":1,\"total\":10}'\n",
                "sleep 5\n",
                "echo '{\"event\":\"result\",\"matched\":0,\"total\":0}'"
            ),
        );

        let err = importer
            .import(
                &request(),
                &|_| Err(ImportError::Cancelled),
                &CancelToken::new(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ImportError::Cancelled));
    }

    #[test]
    fn test_track_ceiling_patterns() {
        assert!(is_track_ceiling_error("Playlist exceeds free tier track limit"));
        assert!(is_track_ceiling_error("too many tracks for free plan"));
        assert!(is_track_ceiling_error("playlist exceeds 100 tracks"));
        assert!(!is_track_ceiling_error("network timeout"));
    }
}
