//! Job polling state machine.
//!
//! Pure: [`JobWatcher::handle`] takes an event and returns the effects the
//! driver must carry out. All timing lives in the driver.
//!
//! ```text
//! idle ──JobCreated──▶ polling ──status completed──▶ completed
//!                        │  ▲  ──status failed─────▶ failed
//!                        │  └── other status (reschedule)
//!                        └──── poll error ─────────▶ polling_error
//! ```

use poomconf::WatchConfig;
use poomproto::{JobStatus, PipelineJob, ToolError};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Poll timing and recent-jobs bound.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WatchTiming {
    pub first_poll: Duration,
    pub poll_interval: Duration,
    pub recent_jobs_cap: usize,
}

impl Default for WatchTiming {
    fn default() -> Self {
        Self::from(&WatchConfig::default())
    }
}

impl From<&WatchConfig> for WatchTiming {
    fn from(config: &WatchConfig) -> Self {
        Self {
            first_poll: config.first_poll(),
            poll_interval: config.poll_interval(),
            recent_jobs_cap: config.recent_jobs_cap.max(1),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum WatchState {
    Idle,
    Polling { job_id: String },
    Completed { job_id: String, run_id: Option<String> },
    Failed { job_id: String, message: String },
    PollingError { job_id: String, message: String },
}

impl WatchState {
    pub fn name(&self) -> &'static str {
        match self {
            WatchState::Idle => "idle",
            WatchState::Polling { .. } => "polling",
            WatchState::Completed { .. } => "completed",
            WatchState::Failed { .. } => "failed",
            WatchState::PollingError { .. } => "polling_error",
        }
    }

    /// Job being polled, if any.
    pub fn active_job(&self) -> Option<&str> {
        match self {
            WatchState::Polling { job_id } => Some(job_id),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum WatchEvent {
    /// A new job was created; supersedes whatever was being watched.
    JobCreated(PipelineJob),
    /// The scheduled delay for `job_id` elapsed.
    Tick { job_id: String },
    /// A status poll issued for `job_id` returned.
    StatusReceived { job_id: String, job: PipelineJob },
    /// A status poll issued for `job_id` failed.
    PollFailed { job_id: String, error: ToolError },
    /// Teardown.
    Cancel,
}

/// How a watch ended.
#[derive(Debug, Clone, PartialEq)]
pub enum WatchOutcome {
    Completed { job_id: String, run_id: Option<String> },
    Failed { job_id: String, message: String },
    PollingError { job_id: String, message: String },
    Cancelled { job_id: String },
}

#[derive(Debug, Clone, PartialEq)]
pub enum WatchEffect {
    /// Deliver `Tick { job_id }` after `after`.
    ScheduleTick { job_id: String, after: Duration },
    /// Call the status tool now and deliver the result.
    FetchStatus { job_id: String },
    /// Drop any pending tick or in-flight poll.
    CancelPending,
    /// The human-readable status message changed.
    Announce(String),
    /// Open the player for a completed run.
    OpenRun { run_id: String },
    Finished(WatchOutcome),
}

/// Most-recent-first job list, deduplicated by job id.
#[derive(Debug, Clone, PartialEq)]
pub struct RecentJobs {
    cap: usize,
    jobs: Vec<PipelineJob>,
}

impl RecentJobs {
    pub fn new(cap: usize) -> Self {
        Self {
            cap: cap.max(1),
            jobs: Vec::new(),
        }
    }

    pub fn merge(&mut self, job: PipelineJob) {
        self.jobs.retain(|j| j.job_id != job.job_id);
        self.jobs.insert(0, job);
        self.jobs.truncate(self.cap);
    }

    pub fn jobs(&self) -> &[PipelineJob] {
        &self.jobs
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }
}

pub struct JobWatcher {
    timing: WatchTiming,
    state: WatchState,
    message: String,
    recent: RecentJobs,
}

impl JobWatcher {
    pub fn new(timing: WatchTiming) -> Self {
        Self {
            recent: RecentJobs::new(timing.recent_jobs_cap),
            timing,
            state: WatchState::Idle,
            message: String::new(),
        }
    }

    pub fn state(&self) -> &WatchState {
        &self.state
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn recent_jobs(&self) -> &RecentJobs {
        &self.recent
    }

    pub fn handle(&mut self, event: WatchEvent) -> Vec<WatchEffect> {
        match event {
            WatchEvent::JobCreated(job) => self.on_created(job),
            WatchEvent::Tick { job_id } => {
                if self.is_active(&job_id) {
                    vec![WatchEffect::FetchStatus { job_id }]
                } else {
                    debug!(job.id = %job_id, "ignoring stale tick");
                    Vec::new()
                }
            }
            WatchEvent::StatusReceived { job_id, job } => {
                if self.is_active(&job_id) {
                    self.on_status(job_id, job)
                } else {
                    debug!(job.id = %job_id, "ignoring late status");
                    Vec::new()
                }
            }
            WatchEvent::PollFailed { job_id, error } => {
                if self.is_active(&job_id) {
                    self.on_poll_failed(job_id, error)
                } else {
                    Vec::new()
                }
            }
            WatchEvent::Cancel => self.on_cancel(),
        }
    }

    fn is_active(&self, job_id: &str) -> bool {
        self.state.active_job() == Some(job_id)
    }

    fn on_created(&mut self, job: PipelineJob) -> Vec<WatchEffect> {
        let mut effects = Vec::new();
        if let Some(previous) = self.state.active_job() {
            info!(job.id = %previous, superseded_by = %job.job_id, "job superseded");
            effects.push(WatchEffect::CancelPending);
        }

        let job_id = job.job_id.clone();
        self.state = WatchState::Polling {
            job_id: job_id.clone(),
        };

        if job.is_terminal() {
            effects.extend(self.on_status(job_id, job));
            return effects;
        }

        self.recent.merge(job.clone());
        effects.push(self.announce(describe(&job)));
        effects.push(WatchEffect::ScheduleTick {
            job_id,
            after: self.timing.first_poll,
        });
        effects
    }

    fn on_status(&mut self, job_id: String, job: PipelineJob) -> Vec<WatchEffect> {
        self.recent.merge(job.clone());

        match &job.status {
            JobStatus::Completed => {
                let run_id = job.completed_run().map(String::from);
                let mut effects = Vec::new();
                match &run_id {
                    Some(run_id) => {
                        effects.push(self.announce(format!("Walkthrough ready: run {}", run_id)));
                        effects.push(WatchEffect::OpenRun {
                            run_id: run_id.clone(),
                        });
                    }
                    None => {
                        effects.push(self.announce(format!(
                            "Job {} completed. Refresh the run list to open the new walkthrough.",
                            job_id
                        )));
                    }
                }
                info!(job.id = %job_id, run.id = ?run_id, "job completed");
                self.state = WatchState::Completed {
                    job_id: job_id.clone(),
                    run_id: run_id.clone(),
                };
                effects.push(WatchEffect::Finished(WatchOutcome::Completed { job_id, run_id }));
                effects
            }
            JobStatus::Failed => {
                let message = job
                    .error
                    .as_ref()
                    .map(|e| e.message.trim())
                    .filter(|m| !m.is_empty())
                    .map(String::from)
                    .unwrap_or_else(|| format!("Job {} failed.", job_id));
                warn!(job.id = %job_id, error = %message, "job failed");
                self.state = WatchState::Failed {
                    job_id: job_id.clone(),
                    message: message.clone(),
                };
                vec![
                    self.announce(message.clone()),
                    WatchEffect::Finished(WatchOutcome::Failed { job_id, message }),
                ]
            }
            JobStatus::Queued | JobStatus::Running | JobStatus::Other(_) => vec![
                self.announce(describe(&job)),
                WatchEffect::ScheduleTick {
                    job_id,
                    after: self.timing.poll_interval,
                },
            ],
        }
    }

    fn on_poll_failed(&mut self, job_id: String, error: ToolError) -> Vec<WatchEffect> {
        let message = format!("Status check failed: {}", error.message);
        warn!(job.id = %job_id, code = %error.code, "status poll failed");
        self.state = WatchState::PollingError {
            job_id: job_id.clone(),
            message: message.clone(),
        };
        vec![
            self.announce(message.clone()),
            WatchEffect::Finished(WatchOutcome::PollingError { job_id, message }),
        ]
    }

    fn on_cancel(&mut self) -> Vec<WatchEffect> {
        match std::mem::replace(&mut self.state, WatchState::Idle) {
            WatchState::Polling { job_id } => vec![
                WatchEffect::CancelPending,
                WatchEffect::Finished(WatchOutcome::Cancelled { job_id }),
            ],
            // Terminal states stay put so the outcome remains visible.
            other => {
                self.state = other;
                Vec::new()
            }
        }
    }

    fn announce(&mut self, message: String) -> WatchEffect {
        self.message = message.clone();
        WatchEffect::Announce(message)
    }
}

/// `Job j1: running (transcribe, 40%)`
pub fn describe(job: &PipelineJob) -> String {
    let mut detail = Vec::new();
    if let Some(stage) = job.stage.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
        detail.push(stage.to_string());
    }
    if let Some(pct) = job.progress_pct.filter(|p| p.is_finite()) {
        detail.push(format!("{:.0}%", pct.clamp(0.0, 100.0)));
    }

    if detail.is_empty() {
        format!("Job {}: {}", job.job_id, job.status)
    } else {
        format!("Job {}: {} ({})", job.job_id, job.status, detail.join(", "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use poomproto::JobError;
    use pretty_assertions::assert_eq;

    fn job(id: &str, status: JobStatus) -> PipelineJob {
        PipelineJob {
            job_id: id.to_string(),
            status,
            stage: None,
            progress_pct: None,
            run_id: None,
            error: None,
        }
    }

    fn status(watcher: &mut JobWatcher, job: PipelineJob) -> Vec<WatchEffect> {
        watcher.handle(WatchEvent::StatusReceived {
            job_id: job.job_id.clone(),
            job,
        })
    }

    #[test]
    fn created_job_schedules_first_poll() {
        let mut w = JobWatcher::new(WatchTiming::default());
        let effects = w.handle(WatchEvent::JobCreated(job("J1", JobStatus::Queued)));

        assert_eq!(
            effects,
            vec![
                WatchEffect::Announce("Job J1: queued".into()),
                WatchEffect::ScheduleTick {
                    job_id: "J1".into(),
                    after: Duration::from_millis(1200),
                },
            ]
        );
        assert_eq!(w.state().name(), "polling");
    }

    #[test]
    fn running_then_completed_opens_run() {
        let mut w = JobWatcher::new(WatchTiming::default());
        w.handle(WatchEvent::JobCreated(job("J1", JobStatus::Queued)));
        assert_eq!(
            w.handle(WatchEvent::Tick { job_id: "J1".into() }),
            vec![WatchEffect::FetchStatus { job_id: "J1".into() }]
        );

        let mut running = job("J1", JobStatus::Running);
        running.stage = Some("transcribe".into());
        running.progress_pct = Some(40.0);
        let effects = status(&mut w, running);
        assert_eq!(w.message(), "Job J1: running (transcribe, 40%)");
        assert!(effects.contains(&WatchEffect::ScheduleTick {
            job_id: "J1".into(),
            after: Duration::from_millis(3500),
        }));

        let mut done = job("J1", JobStatus::Completed);
        done.run_id = Some("R1".into());
        let effects = status(&mut w, done);
        assert!(effects.contains(&WatchEffect::OpenRun { run_id: "R1".into() }));
        assert_eq!(
            effects.last(),
            Some(&WatchEffect::Finished(WatchOutcome::Completed {
                job_id: "J1".into(),
                run_id: Some("R1".into()),
            }))
        );
        assert!(!effects
            .iter()
            .any(|e| matches!(e, WatchEffect::ScheduleTick { .. })));
    }

    #[test]
    fn completed_without_run_asks_for_refresh() {
        let mut w = JobWatcher::new(WatchTiming::default());
        w.handle(WatchEvent::JobCreated(job("J1", JobStatus::Queued)));
        let effects = status(&mut w, job("J1", JobStatus::Completed));

        assert!(!effects.iter().any(|e| matches!(e, WatchEffect::OpenRun { .. })));
        assert!(w.message().contains("Refresh"));
    }

    #[test]
    fn failed_surfaces_backend_message_verbatim() {
        let mut w = JobWatcher::new(WatchTiming::default());
        w.handle(WatchEvent::JobCreated(job("J1", JobStatus::Queued)));

        let mut failed = job("J1", JobStatus::Failed);
        failed.error = Some(JobError {
            code: None,
            message: "decode error".into(),
        });
        let effects = status(&mut w, failed);

        assert_eq!(w.message(), "decode error");
        assert_eq!(
            w.state(),
            &WatchState::Failed {
                job_id: "J1".into(),
                message: "decode error".into()
            }
        );
        assert!(!effects
            .iter()
            .any(|e| matches!(e, WatchEffect::ScheduleTick { .. })));

        // Terminal: further ticks do nothing.
        assert!(w.handle(WatchEvent::Tick { job_id: "J1".into() }).is_empty());
    }

    #[test]
    fn failed_without_error_uses_generic_message() {
        let mut w = JobWatcher::new(WatchTiming::default());
        w.handle(WatchEvent::JobCreated(job("J1", JobStatus::Queued)));
        status(&mut w, job("J1", JobStatus::Failed));
        assert_eq!(w.message(), "Job J1 failed.");
    }

    #[test]
    fn poll_failure_stops_immediately() {
        let mut w = JobWatcher::new(WatchTiming::default());
        w.handle(WatchEvent::JobCreated(job("J1", JobStatus::Queued)));
        let effects = w.handle(WatchEvent::PollFailed {
            job_id: "J1".into(),
            error: ToolError::upstream_timeout("GET /pipeline/jobs/J1 timed out", true),
        });

        assert_eq!(w.state().name(), "polling_error");
        assert!(matches!(
            effects.last(),
            Some(WatchEffect::Finished(WatchOutcome::PollingError { .. }))
        ));
    }

    #[test]
    fn superseded_job_results_are_ignored() {
        let mut w = JobWatcher::new(WatchTiming::default());
        w.handle(WatchEvent::JobCreated(job("J1", JobStatus::Queued)));
        let effects = w.handle(WatchEvent::JobCreated(job("J2", JobStatus::Queued)));
        assert_eq!(effects.first(), Some(&WatchEffect::CancelPending));

        let mut done = job("J1", JobStatus::Completed);
        done.run_id = Some("R1".into());
        assert!(status(&mut w, done).is_empty());
        assert!(w.handle(WatchEvent::Tick { job_id: "J1".into() }).is_empty());
        assert_eq!(w.state().active_job(), Some("J2"));
    }

    #[test]
    fn cancel_stops_polling_and_ignores_late_results() {
        let mut w = JobWatcher::new(WatchTiming::default());
        w.handle(WatchEvent::JobCreated(job("J1", JobStatus::Queued)));
        let effects = w.handle(WatchEvent::Cancel);
        assert_eq!(
            effects,
            vec![
                WatchEffect::CancelPending,
                WatchEffect::Finished(WatchOutcome::Cancelled { job_id: "J1".into() }),
            ]
        );
        assert!(status(&mut w, job("J1", JobStatus::Completed)).is_empty());
        assert_eq!(w.state(), &WatchState::Idle);
    }

    #[test]
    fn unrecognized_status_keeps_polling() {
        let mut w = JobWatcher::new(WatchTiming::default());
        w.handle(WatchEvent::JobCreated(job("J1", JobStatus::Queued)));
        let effects = status(&mut w, job("J1", JobStatus::Other("transcoding".into())));
        assert_eq!(w.message(), "Job J1: transcoding");
        assert!(effects
            .iter()
            .any(|e| matches!(e, WatchEffect::ScheduleTick { .. })));
    }

    #[test]
    fn polls_update_recent_jobs() {
        let timing = WatchTiming {
            recent_jobs_cap: 2,
            ..WatchTiming::default()
        };
        let mut w = JobWatcher::new(timing);
        w.handle(WatchEvent::JobCreated(job("J1", JobStatus::Queued)));
        assert_eq!(w.recent_jobs().jobs()[0].status, JobStatus::Queued);

        let mut running = job("J1", JobStatus::Running);
        running.progress_pct = Some(40.0);
        status(&mut w, running);
        assert_eq!(w.recent_jobs().len(), 1);
        assert_eq!(w.recent_jobs().jobs()[0].progress_pct, Some(40.0));

        w.handle(WatchEvent::JobCreated(job("J2", JobStatus::Queued)));
        w.handle(WatchEvent::JobCreated(job("J3", JobStatus::Queued)));
        status(&mut w, job("J3", JobStatus::Running));
        let ids: Vec<&str> = w
            .recent_jobs()
            .jobs()
            .iter()
            .map(|j| j.job_id.as_str())
            .collect();
        assert_eq!(ids, vec!["J3", "J2"]);
        assert_eq!(w.recent_jobs().jobs()[0].status, JobStatus::Running);
    }

    #[test]
    fn recent_jobs_dedupe_and_cap() {
        let mut recent = RecentJobs::new(3);
        for id in ["a", "b", "c", "a", "d"] {
            recent.merge(job(id, JobStatus::Queued));
        }
        let ids: Vec<&str> = recent.jobs().iter().map(|j| j.job_id.as_str()).collect();
        assert_eq!(ids, vec!["d", "a", "c"]);
    }

    #[test]
    fn describe_clamps_progress() {
        let mut j = job("J9", JobStatus::Running);
        j.progress_pct = Some(140.0);
        assert_eq!(describe(&j), "Job J9: running (100%)");
    }
}
