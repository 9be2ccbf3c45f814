use serde::Serialize;

use crate::{JobId, JobStatus};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobSummary {
    pub job_id: JobId,
    pub status: JobStatus,
    pub score: Option<f64>,
}

/// Aggregate over every job of one batch. Always rebuilt from a full job
/// list, never patched in place.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BatchView {
    pub batch_id: String,
    pub jobs: Vec<JobSummary>,
    pub total_count: usize,
    pub completed_count: usize,
    pub failed_count: usize,
    pub processing_count: usize,
    pub queued_count: usize,
    pub has_active: bool,
    pub progress_pct: u8,
}

impl BatchView {
    pub fn compute(batch_id: impl Into<String>, jobs: Vec<JobSummary>) -> Self {
        let total_count = jobs.len();
        let mut completed_count = 0;
        let mut failed_count = 0;
        let mut processing_count = 0;
        let mut queued_count = 0;
        for job in &jobs {
            match job.status {
                JobStatus::Completed => completed_count += 1,
                JobStatus::Failed => failed_count += 1,
                JobStatus::Processing => processing_count += 1,
                JobStatus::Queued => queued_count += 1,
                JobStatus::Other(_) => {}
            }
        }
        let finished = completed_count + failed_count;
        let progress_pct = if total_count == 0 {
            0
        } else {
            (finished * 100 / total_count) as u8
        };
        Self {
            batch_id: batch_id.into(),
            jobs,
            total_count,
            completed_count,
            failed_count,
            processing_count,
            queued_count,
            has_active: finished < total_count,
            progress_pct,
        }
    }

    pub fn finished_count(&self) -> usize {
        self.completed_count + self.failed_count
    }

    pub fn average_score(&self) -> Option<f64> {
        let scores: Vec<f64> = self.jobs.iter().filter_map(|job| job.score).collect();
        if scores.is_empty() {
            return None;
        }
        Some(scores.iter().sum::<f64>() / scores.len() as f64)
    }
}
