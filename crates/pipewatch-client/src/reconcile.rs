use std::sync::Arc;

use pipewatch_core::snapshot::{JobResult, JobSnapshot};
use pipewatch_core::{JobId, JobStatus};
use tracing::{debug, warn};

use crate::store::JobStore;

/// Durable state read after a job went terminal.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FinalRead {
    pub snapshot: Option<JobSnapshot>,
    pub result: Option<JobResult>,
}

/// Reads authoritative job state to correct drift in a live view. Every
/// failure is logged and reported as "nothing read"; there is no retry.
#[derive(Clone)]
pub struct ReconciliationBridge {
    store: Arc<dyn JobStore>,
}

impl ReconciliationBridge {
    pub fn new(store: Arc<dyn JobStore>) -> Self {
        Self { store }
    }

    pub async fn snapshot(&self, job_id: &JobId) -> Option<JobSnapshot> {
        match self.store.job(job_id).await {
            Ok(snapshot) => {
                debug!(
                    "reconcile_snapshot: job_id={job_id} status={}",
                    snapshot.status
                );
                Some(snapshot)
            }
            Err(err) => {
                warn!("reconcile_snapshot_error: job_id={job_id} {err}");
                None
            }
        }
    }

    /// Snapshot plus, for a completed job, its final results.
    pub async fn final_read(&self, job_id: &JobId) -> FinalRead {
        let snapshot = self.snapshot(job_id).await;
        let completed = snapshot
            .as_ref()
            .map(|snapshot| snapshot.status == JobStatus::Completed)
            .unwrap_or(false);
        if !completed {
            return FinalRead {
                snapshot,
                result: None,
            };
        }
        let result = match self.store.job_results(job_id).await {
            Ok(result) => Some(result),
            Err(err) => {
                warn!("reconcile_results_error: job_id={job_id} {err}");
                None
            }
        };
        FinalRead { snapshot, result }
    }
}
