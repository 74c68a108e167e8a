/// Progress normalization for the external import operation
///
/// The engine's progress payloads are wildly heterogeneous: bare numbers,
/// `{current, total}` pairs, objects keyed `percentage`/`progress`/`value`/
/// `percent`, free-text strings with an embedded fraction, or nothing usable
/// at all. Everything is normalized to an integer percentage in [0, 100] and
/// a human-readable message. The tracker never regresses a displayed
/// percentage and never emits a missing value.
use serde_json::Value;

/// Stages of one import job, used for fallback estimates
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobStage {
    Initializing,
    DownloadingResource,
    Running,
    Completing,
}

impl JobStage {
    /// Minimum percentage a stage is displayed at
    fn floor_percent(&self) -> u8 {
        match self {
            JobStage::Initializing => 5,
            JobStage::DownloadingResource => 10,
            JobStage::Running => 15,
            JobStage::Completing => 95,
        }
    }

    fn default_message(&self) -> &'static str {
        match self {
            JobStage::Initializing => "Preparing import",
            JobStage::DownloadingResource => "Fetching library database",
            JobStage::Running => "Matching tracks",
            JobStage::Completing => "Writing crate file",
        }
    }
}

/// A normalized progress event
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct ProgressUpdate {
    pub percent: u8,
    pub message: String,
}

/// Ordered extractors over one raw payload; first match wins
fn extract(value: &Value) -> Option<(u8, Option<String>)> {
    extract_bare_number(value)
        .or_else(|| extract_ratio_object(value))
        .or_else(|| extract_keyed_percentage(value))
        .or_else(|| extract_string_fraction(value))
}

fn clamp_percent(value: f64) -> u8 {
    if value.is_nan() {
        return 0;
    }
    value.round().clamp(0.0, 100.0) as u8
}

fn extract_bare_number(value: &Value) -> Option<(u8, Option<String>)> {
    value.as_f64().map(|n| (clamp_percent(n), None))
}

fn extract_ratio_object(value: &Value) -> Option<(u8, Option<String>)> {
    let obj = value.as_object()?;
    let current = obj.get("current")?.as_f64()?;
    let total = obj.get("total")?.as_f64()?;
    if total <= 0.0 {
        return None;
    }
    let message = message_field(obj)
        .unwrap_or_else(|| format!("Processing {} of {}", current as u64, total as u64));
    Some((clamp_percent(current / total * 100.0), Some(message)))
}

fn extract_keyed_percentage(value: &Value) -> Option<(u8, Option<String>)> {
    let obj = value.as_object()?;
    for key in ["percentage", "progress", "value", "percent"] {
        if let Some(n) = obj.get(key).and_then(Value::as_f64) {
            return Some((clamp_percent(n), message_field(obj)));
        }
    }
    None
}

/// "Processing 4 / 9 tracks" style strings: first `a / b` or `a/b` pair wins
fn extract_string_fraction(value: &Value) -> Option<(u8, Option<String>)> {
    let text = value.as_str()?;
    let slash = text.find('/')?;

    let numerator: f64 = text[..slash]
        .trim_end()
        .rsplit(|c: char| !c.is_ascii_digit())
        .next()
        .filter(|s| !s.is_empty())?
        .parse()
        .ok()?;

    let after = text[slash + 1..].trim_start();
    let denominator: f64 = after
        .split(|c: char| !c.is_ascii_digit())
        .next()
        .filter(|s| !s.is_empty())?
        .parse()
        .ok()?;

    if denominator <= 0.0 {
        return None;
    }
    Some((
        clamp_percent(numerator / denominator * 100.0),
        Some(text.to_string()),
    ))
}

fn message_field(obj: &serde_json::Map<String, Value>) -> Option<String> {
    for key in ["message", "status", "text"] {
        if let Some(s) = obj.get(key).and_then(Value::as_str) {
            if !s.is_empty() {
                return Some(s.to_string());
            }
        }
    }
    None
}

/// Per-session progress state
///
/// Enforces the two display invariants in one place: the percentage never
/// regresses, and an unparseable payload still advances a stage-based
/// estimate instead of vanishing.
pub struct ProgressTracker {
    stage: JobStage,
    last_percent: u8,
}

impl ProgressTracker {
    pub fn new() -> Self {
        Self {
            stage: JobStage::Initializing,
            last_percent: 0,
        }
    }

    pub fn stage(&self) -> JobStage {
        self.stage
    }

    /// Enter a stage, lifting the displayed percentage to its floor
    pub fn enter_stage(&mut self, stage: JobStage) -> ProgressUpdate {
        self.stage = stage;
        self.last_percent = self.last_percent.max(stage.floor_percent());
        ProgressUpdate {
            percent: self.last_percent,
            message: stage.default_message().to_string(),
        }
    }

    /// Normalize one raw payload from the external operation
    pub fn observe(&mut self, value: &Value) -> ProgressUpdate {
        match extract(value) {
            Some((percent, message)) => {
                self.last_percent = self.last_percent.max(percent);
                ProgressUpdate {
                    percent: self.last_percent,
                    message: message
                        .unwrap_or_else(|| self.stage.default_message().to_string()),
                }
            }
            None => {
                // No numeric signal: advance strictly, capped shy of done
                let estimate = self
                    .last_percent
                    .saturating_add(1)
                    .max(self.stage.floor_percent())
                    .min(99);
                self.last_percent = estimate;
                let message = value
                    .as_str()
                    .filter(|s| !s.is_empty())
                    .map(str::to_string)
                    .unwrap_or_else(|| self.stage.default_message().to_string());
                ProgressUpdate {
                    percent: estimate,
                    message,
                }
            }
        }
    }

    /// Synthetic liveness event; repeats the current percentage
    pub fn heartbeat(&self) -> ProgressUpdate {
        ProgressUpdate {
            percent: self.last_percent,
            message: "Still working...".to_string(),
        }
    }
}

impl Default for ProgressTracker {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_bare_number() {
        let mut tracker = ProgressTracker::new();
        let update = tracker.observe(&json!(42));
        assert_eq!(update.percent, 42);
        assert!(!update.message.is_empty());
    }

    #[test]
    fn test_bare_number_clamped() {
        let mut tracker = ProgressTracker::new();
        assert_eq!(tracker.observe(&json!(250)).percent, 100);

        let mut tracker = ProgressTracker::new();
        assert_eq!(tracker.observe(&json!(-3)).percent, 0);
    }

    #[test]
    fn test_current_total_pair() {
        let mut tracker = ProgressTracker::new();
        let update = tracker.observe(&json!({"current": 3, "total": 10}));
        assert_eq!(update.percent, 30);
        assert_eq!(update.message, "Processing 3 of 10");
    }

    #[test]
    fn test_percentage_keyed_object() {
        let mut tracker = ProgressTracker::new();
        let update = tracker.observe(&json!({"percentage": 77}));
        assert_eq!(update.percent, 77);

        let mut tracker = ProgressTracker::new();
        let update = tracker.observe(&json!({"progress": 55.4, "message": "halfway-ish"}));
        assert_eq!(update.percent, 55);
        assert_eq!(update.message, "halfway-ish");
    }

    #[test]
    fn test_string_with_embedded_fraction() {
        let mut tracker = ProgressTracker::new();
        let update = tracker.observe(&json!("Processing 4 / 9 tracks"));
        assert_eq!(update.percent, 44);
        assert_eq!(update.message, "Processing 4 / 9 tracks");

        let mut tracker = ProgressTracker::new();
        let update = tracker.observe(&json!("step 2/4"));
        assert_eq!(update.percent, 50);
    }

    #[test]
    fn test_unparseable_payload_advances_strictly() {
        let mut tracker = ProgressTracker::new();
        tracker.enter_stage(JobStage::Running);

        let first = tracker.observe(&json!(null));
        let second = tracker.observe(&json!({"unrelated": true}));
        let third = tracker.observe(&json!("no numbers here"));

        assert!(first.percent >= JobStage::Running.floor_percent());
        assert!(second.percent > first.percent);
        assert!(third.percent > second.percent);
        assert!(third.percent <= 99);
    }

    #[test]
    fn test_percentage_never_regresses() {
        let mut tracker = ProgressTracker::new();
        assert_eq!(tracker.observe(&json!(80)).percent, 80);
        // A lower raw value is held at the high-water mark
        assert_eq!(tracker.observe(&json!(40)).percent, 80);
        assert_eq!(tracker.observe(&json!({"current": 1, "total": 10})).percent, 80);
        assert_eq!(tracker.observe(&json!(91)).percent, 91);
    }

    #[test]
    fn test_stage_floors() {
        let mut tracker = ProgressTracker::new();
        assert_eq!(tracker.enter_stage(JobStage::Initializing).percent, 5);
        assert_eq!(tracker.enter_stage(JobStage::DownloadingResource).percent, 10);
        assert_eq!(tracker.enter_stage(JobStage::Running).percent, 15);
        assert_eq!(tracker.enter_stage(JobStage::Completing).percent, 95);
    }

    #[test]
    fn test_stage_floor_does_not_regress_high_watermark() {
        let mut tracker = ProgressTracker::new();
        tracker.observe(&json!(97));
        assert_eq!(tracker.enter_stage(JobStage::Completing).percent, 97);
    }

    #[test]
    fn test_heartbeat_repeats_current_percent() {
        let mut tracker = ProgressTracker::new();
        tracker.observe(&json!(60));
        let beat = tracker.heartbeat();
        assert_eq!(beat.percent, 60);
        assert_eq!(beat.message, "Still working...");
    }

    #[test]
    fn test_zero_total_falls_through_to_estimate() {
        let mut tracker = ProgressTracker::new();
        let update = tracker.observe(&json!({"current": 3, "total": 0}));
        // Not a valid ratio; handled by the fallback path
        assert!(update.percent >= 1);
        assert!(update.percent <= 99);
    }
}
