//! Domain types for runs, pipeline jobs, manifests and quizzes.
//!
//! Upstream payloads are read tolerantly: optional fields default, and
//! unknown fields are ignored. The projections built from them
//! ([`RunCard`], [`PlayerPayload`]) have fixed shapes.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::reference::RunReference;

// ============================================================================
// Runs
// ============================================================================

/// A completed run as listed by `GET /runs`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunInfo {
    #[serde(alias = "id")]
    pub run_id: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub created_at: Option<String>,
    #[serde(default)]
    pub segment_count: Option<u32>,
    #[serde(default)]
    pub duration_sec: Option<f64>,
}

/// `GET /runs` body.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunListing {
    #[serde(default)]
    pub runs: Vec<RunInfo>,
}

/// Read-only projection of a run for hosts and widgets.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunCard {
    pub run_id: String,
    pub title: String,
    pub created_at: Option<String>,
    pub segment_count: u32,
    pub duration_sec: Option<f64>,
    pub reference_url: String,
}

impl RunCard {
    pub fn project(info: RunInfo, refs: &RunReference) -> Self {
        let title = info
            .title
            .filter(|t| !t.trim().is_empty())
            .unwrap_or_else(|| info.run_id.clone());
        Self {
            reference_url: refs.url(&info.run_id),
            title,
            created_at: info.created_at,
            segment_count: info.segment_count.unwrap_or(0),
            duration_sec: info.duration_sec,
            run_id: info.run_id,
        }
    }
}

// ============================================================================
// Pipeline jobs
// ============================================================================

/// Backend job lifecycle. Strings the gateway does not recognize are kept
/// verbatim in `Other`, which is never terminal.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum JobStatus {
    #[default]
    Queued,
    Running,
    Completed,
    Failed,
    Other(String),
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }

    pub fn as_str(&self) -> &str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Other(raw) => raw,
        }
    }
}

impl From<String> for JobStatus {
    fn from(raw: String) -> Self {
        match raw.as_str() {
            "queued" => JobStatus::Queued,
            "running" => JobStatus::Running,
            "completed" => JobStatus::Completed,
            "failed" => JobStatus::Failed,
            _ => JobStatus::Other(raw),
        }
    }
}

impl From<JobStatus> for String {
    fn from(status: JobStatus) -> Self {
        match status {
            JobStatus::Other(raw) => raw,
            known => known.as_str().to_string(),
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Backend error attached to a failed job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "JobErrorRepr")]
pub struct JobError {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    pub message: String,
}

// Some pipeline versions send the error as a bare string.
#[derive(Deserialize)]
#[serde(untagged)]
enum JobErrorRepr {
    Text(String),
    Detail {
        #[serde(default)]
        code: Option<String>,
        #[serde(default)]
        message: String,
    },
}

impl From<JobErrorRepr> for JobError {
    fn from(repr: JobErrorRepr) -> Self {
        match repr {
            JobErrorRepr::Text(message) => JobError {
                code: None,
                message,
            },
            JobErrorRepr::Detail { code, message } => JobError { code, message },
        }
    }
}

/// Snapshot of an asynchronous walkthrough job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineJob {
    pub job_id: String,
    #[serde(default)]
    pub status: JobStatus,
    #[serde(default)]
    pub stage: Option<String>,
    #[serde(default)]
    pub progress_pct: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<JobError>,
}

impl PipelineJob {
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Completed run id, ignoring blanks.
    pub fn completed_run(&self) -> Option<&str> {
        self.run_id
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }
}

/// `GET /pipeline/jobs` body.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JobListing {
    #[serde(default)]
    pub jobs: Vec<PipelineJob>,
}

// ============================================================================
// Manifests and the player payload
// ============================================================================

/// Per-run media manifest from `GET /runs/{run_id}/manifest`.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Manifest {
    #[serde(default)]
    pub run_id: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub master: MasterMedia,
    #[serde(default)]
    pub segments: Vec<ManifestSegment>,
    #[serde(default)]
    pub languages: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct MasterMedia {
    #[serde(default)]
    pub available: bool,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub duration_sec: Option<f64>,
}

impl MasterMedia {
    /// Playable URL, present only when the media is marked available.
    pub fn playable_url(&self) -> Option<&str> {
        if !self.available {
            return None;
        }
        self.url
            .as_deref()
            .map(str::trim)
            .filter(|u| !u.is_empty())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManifestSegment {
    pub segment_id: String,
    #[serde(default)]
    pub title: Option<String>,
    pub start_s: f64,
    pub end_s: f64,
    #[serde(default)]
    pub quiz_available: bool,
    #[serde(default)]
    pub clip_url: Option<String>,
}

/// A named time range of the master video.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chapter {
    pub segment_id: String,
    pub name: String,
    pub start_s: f64,
    pub end_s: f64,
}

/// Segment metadata the widget shows next to each chapter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlayerSegment {
    pub segment_id: String,
    pub title: String,
    pub start_s: f64,
    pub end_s: f64,
    pub duration_s: f64,
    pub quiz_available: bool,
    pub clip_url: Option<String>,
}

/// Props handed to the playback widget.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlayerPayload {
    pub run_id: String,
    pub title: String,
    pub reference_url: String,
    pub master_url: String,
    pub duration_sec: f64,
    pub chapters: Vec<Chapter>,
    pub segments: Vec<PlayerSegment>,
}

// ============================================================================
// Quizzes
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Quiz {
    #[serde(default)]
    pub run_id: String,
    #[serde(default)]
    pub segment_id: String,
    #[serde(default)]
    pub questions: Vec<QuizQuestion>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuizQuestion {
    pub id: String,
    #[serde(alias = "question")]
    pub prompt: String,
    #[serde(default)]
    pub choices: Vec<String>,
}

/// One answer submitted for scoring.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct QuizAnswer {
    /// Question id
    pub id: String,
    /// Zero-based index into the question's choices
    pub selected_index: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuizScore {
    #[serde(default)]
    pub score: f64,
    #[serde(default)]
    pub total: u32,
    #[serde(default)]
    pub results: Vec<QuizResult>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuizResult {
    pub id: String,
    pub correct: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correct_index: Option<u32>,
}

// ============================================================================
// Tool results
// ============================================================================

/// `list_runs` result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunsResult {
    pub runs: Vec<RunCard>,
}

/// `list_pooms` result: completed runs plus jobs still in progress.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PoomOverview {
    pub runs: Vec<RunCard>,
    pub jobs: Vec<PipelineJob>,
}

/// `get_poom_status` result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PoomStatus {
    pub job: PipelineJob,
    pub runs: Vec<RunCard>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn unrecognized_status_is_kept_and_not_terminal() {
        let job: PipelineJob =
            serde_json::from_str(r#"{"job_id":"j1","status":"transcoding"}"#).unwrap();
        assert_eq!(job.status, JobStatus::Other("transcoding".into()));
        assert_eq!(job.status.to_string(), "transcoding");
        assert!(!job.is_terminal());

        let back = serde_json::to_value(&job).unwrap();
        assert_eq!(back["status"], "transcoding");
    }

    #[test]
    fn job_defaults_to_queued() {
        let job: PipelineJob = serde_json::from_str(r#"{"job_id":"j1"}"#).unwrap();
        assert_eq!(job.status, JobStatus::Queued);
        assert_eq!(job.stage, None);
        assert_eq!(job.completed_run(), None);
    }

    #[test]
    fn job_error_accepts_both_shapes() {
        let detailed: PipelineJob = serde_json::from_str(
            r#"{"job_id":"j1","status":"failed","error":{"code":"ASR","message":"decode error"}}"#,
        )
        .unwrap();
        assert_eq!(
            detailed.error,
            Some(JobError {
                code: Some("ASR".into()),
                message: "decode error".into()
            })
        );

        let bare: PipelineJob =
            serde_json::from_str(r#"{"job_id":"j1","status":"failed","error":"decode error"}"#)
                .unwrap();
        assert_eq!(bare.error.map(|e| e.message), Some("decode error".into()));
    }

    #[test]
    fn run_card_title_falls_back_to_id() {
        let refs = RunReference::new("poom");
        let info: RunInfo = serde_json::from_str(r#"{"run_id":"r1","title":"  "}"#).unwrap();
        let card = RunCard::project(info, &refs);
        assert_eq!(card.title, "r1");
        assert_eq!(card.segment_count, 0);
        assert_eq!(card.reference_url, "poom://run/r1");
    }

    #[test]
    fn manifest_tolerates_missing_fields() {
        let manifest: Manifest = serde_json::from_str(r#"{"run_id":"r1"}"#).unwrap();
        assert!(!manifest.master.available);
        assert!(manifest.segments.is_empty());
        assert_eq!(manifest.master.playable_url(), None);
    }

    #[test]
    fn unavailable_master_has_no_playable_url() {
        let master = MasterMedia {
            available: false,
            url: Some("https://cdn/x.mp4".into()),
            duration_sec: Some(10.0),
        };
        assert_eq!(master.playable_url(), None);
    }

    #[test]
    fn quiz_question_accepts_question_alias() {
        let q: QuizQuestion =
            serde_json::from_str(r#"{"id":"q1","question":"Why?","choices":["a","b"]}"#)
                .unwrap();
        assert_eq!(q.prompt, "Why?");
    }
}
