// progress.rs - Per-target pipeline event log
// Purpose: Append stage lifecycle events to <target>/progress.jsonl and keep a
//          current_status.json snapshot next to it

use crate::model::{Stage, Target};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing::warn;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressEvent {
    pub timestamp: DateTime<Utc>,
    pub run_id: String,
    pub target: String,
    pub event_type: EventType,
    pub message: String,
    pub progress_percentage: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum EventType {
    PipelineStarted { stages: Vec<Stage> },
    StageStarted { stage: Stage },
    StageCompleted { stage: Stage, failures: usize },
    StageSkipped { stage: Stage, reason: String },
    StageFailed { stage: Stage, error: String },
    PipelineCompleted,
}

#[derive(Clone)]
pub struct ProgressTracker {
    run_id: String,
    target: String,
    output_dir: PathBuf,
    stages: Vec<Stage>,
    events: Arc<Mutex<Vec<ProgressEvent>>>,
}

impl ProgressTracker {
    pub fn new(run_id: &str, target: &Target, output_dir: PathBuf) -> Self {
        if let Err(e) = fs::create_dir_all(&output_dir) {
            warn!(dir = %output_dir.display(), error = %e, "cannot create progress directory");
        }

        Self {
            run_id: run_id.to_string(),
            target: target.to_string(),
            output_dir,
            stages: Vec::new(),
            events: Arc::new(Mutex::new(Vec::new())),
        }
    }

    fn add_event(&self, event_type: EventType, message: String, progress: f32) {
        let event = ProgressEvent {
            timestamp: Utc::now(),
            run_id: self.run_id.clone(),
            target: self.target.clone(),
            event_type,
            message,
            progress_percentage: progress,
        };

        if let Ok(mut events) = self.events.lock() {
            events.push(event.clone());
        }

        self.save_to_file(&event);
    }

    fn save_to_file(&self, event: &ProgressEvent) {
        let progress_file = self.output_dir.join("progress.jsonl");

        let appended = serde_json::to_string(event).map_err(std::io::Error::from).and_then(|json| {
            let mut file = fs::OpenOptions::new().create(true).append(true).open(&progress_file)?;
            writeln!(file, "{}", json)
        });
        if let Err(e) = appended {
            warn!(file = %progress_file.display(), error = %e, "cannot append progress event");
        }

        self.save_current_status(event);
    }

    fn save_current_status(&self, event: &ProgressEvent) {
        let total_events = self.events.lock().map(|e| e.len()).unwrap_or(0);
        let status = serde_json::json!({
            "run_id": self.run_id,
            "target": self.target,
            "last_update": event.timestamp,
            "progress": event.progress_percentage,
            "current_message": event.message,
            "event_type": event.event_type,
            "total_events": total_events,
        });

        if let Ok(json) = serde_json::to_string_pretty(&status) {
            fs::write(self.output_dir.join("current_status.json"), json).ok();
        }
    }

    /// Share of the requested stages that have finished once `stage` is done.
    fn percentage_after(&self, stage: Stage) -> f32 {
        if self.stages.is_empty() {
            return 0.0;
        }
        let done = self.stages.iter().position(|s| *s == stage).map(|i| i + 1).unwrap_or(0);
        done as f32 * 100.0 / self.stages.len() as f32
    }

    fn percentage_before(&self, stage: Stage) -> f32 {
        if self.stages.is_empty() {
            return 0.0;
        }
        let done = self.stages.iter().position(|s| *s == stage).unwrap_or(0);
        done as f32 * 100.0 / self.stages.len() as f32
    }

    pub fn pipeline_started(&mut self, stages: &[Stage]) {
        self.stages = stages.to_vec();
        let names: Vec<&str> = stages.iter().map(|s| s.name()).collect();
        self.add_event(
            EventType::PipelineStarted { stages: stages.to_vec() },
            format!("Starting pipeline for {}: {}", self.target, names.join(" -> ")),
            0.0,
        );
    }

    pub fn stage_started(&self, stage: Stage) {
        self.add_event(
            EventType::StageStarted { stage },
            format!("Running {}", stage),
            self.percentage_before(stage),
        );
    }

    pub fn stage_completed(&self, stage: Stage, summary: &str, failures: usize) {
        self.add_event(
            EventType::StageCompleted { stage, failures },
            format!("{} completed: {}", stage, summary),
            self.percentage_after(stage),
        );
    }

    pub fn stage_skipped(&self, stage: Stage, reason: &str) {
        self.add_event(
            EventType::StageSkipped { stage, reason: reason.to_string() },
            format!("{} skipped: {}", stage, reason),
            self.percentage_after(stage),
        );
    }

    pub fn stage_failed(&self, stage: Stage, error: &str) {
        self.add_event(
            EventType::StageFailed { stage, error: error.to_string() },
            format!("{} failed: {}", stage, error),
            self.percentage_after(stage),
        );
    }

    pub fn pipeline_completed(&self) {
        self.add_event(
            EventType::PipelineCompleted,
            format!("Pipeline for {} finished", self.target),
            100.0,
        );
    }

    pub fn get_events(&self) -> Vec<ProgressEvent> {
        self.events.lock().map(|e| e.clone()).unwrap_or_default()
    }

    pub fn read_events_from_file(progress_file: &Path) -> Vec<ProgressEvent> {
        fs::read_to_string(progress_file)
            .map(|content| {
                content
                    .lines()
                    .filter_map(|line| serde_json::from_str::<ProgressEvent>(line).ok())
                    .collect()
            })
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_events_are_appended_to_jsonl() {
        let dir = tempfile::tempdir().unwrap();
        let target = Target::new("example.com");
        let mut tracker = ProgressTracker::new("run-1", &target, dir.path().to_path_buf());

        tracker.pipeline_started(&[Stage::Gather, Stage::Verify]);
        tracker.stage_started(Stage::Gather);
        tracker.stage_completed(Stage::Gather, "5 unique JS URLs", 0);
        tracker.stage_skipped(Stage::Verify, "upstream gather failed");
        tracker.pipeline_completed();

        let events = ProgressTracker::read_events_from_file(&dir.path().join("progress.jsonl"));
        assert_eq!(events.len(), 5);
        assert_eq!(events[2].progress_percentage, 50.0);
        assert!(matches!(events[3].event_type, EventType::StageSkipped { stage: Stage::Verify, .. }));
        assert_eq!(tracker.get_events().len(), 5);
        assert!(dir.path().join("current_status.json").exists());
    }
}
