//! Tokio driver for [`JobWatcher`].
//!
//! Runs the machine as an actor: commands arrive on a channel, ticks and
//! polls run in a `JoinSet`, and every effect is carried out here. Status
//! updates are published on an unbounded channel for the presenter.

use async_trait::async_trait;
use poomproto::{PipelineJob, ToolError};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::machine::{JobWatcher, WatchEffect, WatchEvent, WatchOutcome, WatchState, WatchTiming};

/// Status lookups used by the driver. Implemented by the gateway's
/// `get_poom_status` tool.
#[async_trait]
pub trait StatusPort: Send + Sync + 'static {
    async fn job_status(&self, job_id: &str) -> Result<PipelineJob, ToolError>;
}

enum WatchCommand {
    Watch(PipelineJob),
    Stop,
}

/// What the presenter sees.
#[derive(Debug, Clone, PartialEq)]
pub enum WatchUpdate {
    /// `recent` is the recent-jobs list after the change, most recent first.
    Status {
        state: WatchState,
        message: String,
        recent: Vec<PipelineJob>,
    },
    OpenRun { run_id: String },
    Finished(WatchOutcome),
}

/// Handle to a running watcher.
pub struct WatchHandle {
    commands: mpsc::UnboundedSender<WatchCommand>,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl WatchHandle {
    /// Start watching `job`, superseding any job being watched.
    pub fn watch(&self, job: PipelineJob) -> bool {
        self.commands.send(WatchCommand::Watch(job)).is_ok()
    }

    /// Stop polling the current job without shutting the watcher down.
    pub fn stop(&self) -> bool {
        self.commands.send(WatchCommand::Stop).is_ok()
    }

    /// Tear down the watcher. Pending ticks and polls are dropped.
    pub async fn shutdown(self) {
        self.cancel.cancel();
        if let Err(e) = self.task.await {
            warn!(error = %e, "watch task ended abnormally");
        }
    }
}

/// Spawn the watcher. It runs until `cancel` fires or the handle is dropped.
pub fn spawn<P: StatusPort>(
    port: Arc<P>,
    timing: WatchTiming,
    cancel: CancellationToken,
) -> (WatchHandle, mpsc::UnboundedReceiver<WatchUpdate>) {
    let (command_tx, command_rx) = mpsc::unbounded_channel();
    let (update_tx, update_rx) = mpsc::unbounded_channel();

    let driver = Driver {
        port,
        machine: JobWatcher::new(timing),
        pending: JoinSet::new(),
        updates: update_tx,
    };
    let task = tokio::spawn(driver.run(command_rx, cancel.clone()));

    (
        WatchHandle {
            commands: command_tx,
            cancel,
            task,
        },
        update_rx,
    )
}

struct Driver<P> {
    port: Arc<P>,
    machine: JobWatcher,
    pending: JoinSet<WatchEvent>,
    updates: mpsc::UnboundedSender<WatchUpdate>,
}

impl<P: StatusPort> Driver<P> {
    async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<WatchCommand>,
        cancel: CancellationToken,
    ) {
        loop {
            tokio::select! {
                biased;

                _ = cancel.cancelled() => {
                    self.apply(WatchEvent::Cancel);
                    break;
                }
                command = commands.recv() => match command {
                    Some(WatchCommand::Watch(job)) => self.apply(WatchEvent::JobCreated(job)),
                    Some(WatchCommand::Stop) => self.apply(WatchEvent::Cancel),
                    None => {
                        self.apply(WatchEvent::Cancel);
                        break;
                    }
                },
                Some(joined) = self.pending.join_next(), if !self.pending.is_empty() => {
                    match joined {
                        Ok(event) => self.apply(event),
                        Err(e) if e.is_cancelled() => {}
                        Err(e) => warn!(error = %e, "watch task failed"),
                    }
                }
            }
        }
        self.pending.abort_all();
    }

    fn apply(&mut self, event: WatchEvent) {
        for effect in self.machine.handle(event) {
            self.perform(effect);
        }
    }

    fn perform(&mut self, effect: WatchEffect) {
        match effect {
            WatchEffect::ScheduleTick { job_id, after } => {
                debug!(job.id = %job_id, delay_ms = after.as_millis() as u64, "scheduling poll");
                self.pending.spawn(async move {
                    tokio::time::sleep(after).await;
                    WatchEvent::Tick { job_id }
                });
            }
            WatchEffect::FetchStatus { job_id } => {
                let port = Arc::clone(&self.port);
                self.pending.spawn(async move {
                    match port.job_status(&job_id).await {
                        Ok(job) => WatchEvent::StatusReceived { job_id, job },
                        Err(error) => WatchEvent::PollFailed { job_id, error },
                    }
                });
            }
            WatchEffect::CancelPending => self.pending.abort_all(),
            WatchEffect::Announce(message) => self.publish(WatchUpdate::Status {
                state: self.machine.state().clone(),
                message,
                recent: self.machine.recent_jobs().jobs().to_vec(),
            }),
            WatchEffect::OpenRun { run_id } => self.publish(WatchUpdate::OpenRun { run_id }),
            WatchEffect::Finished(outcome) => self.publish(WatchUpdate::Finished(outcome)),
        }
    }

    fn publish(&self, update: WatchUpdate) {
        // A closed receiver just means nobody is presenting any more.
        let _ = self.updates.send(update);
    }
}
