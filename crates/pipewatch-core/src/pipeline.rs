use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::progress_wire::{PipelineUpdate, ProgressEvent};
use crate::snapshot::{JobResult, JobSnapshot};
use crate::{JobId, JobStatus, StageStatus};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelinePhase {
    /// Nothing applied yet; render a waiting placeholder, not zero progress.
    Uninitialized,
    Observing,
    /// Absorbing.
    Terminal,
}

/// What applying an event or snapshot did to the view.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Ignored,
    Applied,
    /// The view just entered `Terminal`. Reported once per job.
    Terminated,
}

/// Presentation-ready state for one job. Mutated only through `apply*`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobView {
    pub job_id: JobId,
    pub phase: PipelinePhase,
    pub stages: Vec<StageStatus>,
    pub percentage: u8,
    pub job_status: JobStatus,
    pub terminal: bool,
    pub connected: bool,
    /// The push channel stopped reconnecting; no live update will arrive.
    pub channel_closed: bool,
    pub stale: bool,
    pub error_message: Option<String>,
    pub result: Option<JobResult>,
    pub settled: bool,
    pub updated_at: Option<DateTime<Utc>>,
}

pub fn clamp_percentage(raw: f64) -> u8 {
    if raw.is_nan() {
        return 0;
    }
    raw.clamp(0.0, 100.0) as u8
}

impl JobView {
    pub fn new(job_id: JobId) -> Self {
        Self {
            job_id,
            phase: PipelinePhase::Uninitialized,
            stages: Vec::new(),
            percentage: 0,
            job_status: JobStatus::Queued,
            terminal: false,
            connected: false,
            channel_closed: false,
            stale: false,
            error_message: None,
            result: None,
            settled: false,
            updated_at: None,
        }
    }

    pub fn is_waiting(&self) -> bool {
        self.phase == PipelinePhase::Uninitialized
    }

    pub fn apply(&mut self, event: ProgressEvent) -> Transition {
        if self.terminal {
            return Transition::Ignored;
        }
        match event {
            ProgressEvent::Progress(update) => {
                self.replace(update);
                self.phase = PipelinePhase::Observing;
                Transition::Applied
            }
            ProgressEvent::Complete(update) => {
                // A completed job always ends at 100; other outcomes keep what was carried.
                let forced = update.job_status == JobStatus::Completed
                    && update.percentage.map_or(true, |raw| clamp_percentage(raw) < 100);
                self.replace(update);
                if forced {
                    self.percentage = 100;
                }
                self.phase = PipelinePhase::Terminal;
                self.terminal = true;
                Transition::Terminated
            }
        }
    }

    /// Feeds a store snapshot through the same rules as a live event: a
    /// terminal status is a synthetic `complete`, anything else a `progress`
    /// that leaves stages and percentage untouched.
    pub fn apply_snapshot(&mut self, snapshot: &JobSnapshot) -> Transition {
        let update = PipelineUpdate {
            stages: None,
            percentage: None,
            job_status: snapshot.status.clone(),
            error_message: snapshot.error_message.clone(),
        };
        if snapshot.status.is_terminal() {
            self.apply(ProgressEvent::Complete(update))
        } else {
            self.apply(ProgressEvent::Progress(update))
        }
    }

    /// Records the post-terminal read of durable state. Only valid once the
    /// view is terminal; the phase itself never changes here.
    pub fn attach_final(&mut self, snapshot: Option<&JobSnapshot>, result: Option<JobResult>) {
        if !self.terminal {
            return;
        }
        if let Some(snapshot) = snapshot {
            if snapshot.status.is_terminal() {
                self.job_status = snapshot.status.clone();
            }
            if snapshot.error_message.is_some() {
                self.error_message = snapshot.error_message.clone();
            }
            if self.job_status == JobStatus::Completed {
                self.percentage = 100;
            }
            self.stale = false;
        }
        if result.is_some() {
            self.result = result;
        }
        self.settled = true;
        self.updated_at = Some(Utc::now());
    }

    pub fn set_connected(&mut self, connected: bool) {
        self.connected = connected;
        if connected {
            self.channel_closed = false;
        }
    }

    pub fn mark_channel_closed(&mut self) {
        self.connected = false;
        self.channel_closed = true;
    }

    pub fn mark_stale(&mut self) {
        self.stale = true;
    }

    fn replace(&mut self, update: PipelineUpdate) {
        if let Some(stages) = update.stages {
            self.stages = stages;
        }
        if let Some(raw) = update.percentage {
            self.percentage = clamp_percentage(raw);
        }
        self.job_status = update.job_status;
        if update.error_message.is_some() {
            self.error_message = update.error_message;
        }
        self.stale = false;
        self.updated_at = Some(Utc::now());
    }
}
