use serde::{Deserialize, Serialize};

use crate::{JobId, JobStatus};

/// `GET /jobs/{id}`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JobSnapshot {
    pub id: JobId,
    pub status: JobStatus,
    #[serde(default)]
    pub batch_id: Option<String>,
    #[serde(default)]
    pub error_message: Option<String>,
    #[serde(default)]
    pub duration_seconds: Option<i64>,
    #[serde(default)]
    pub created_at: Option<String>,
    #[serde(default)]
    pub processed_at: Option<String>,
}

impl JobSnapshot {
    pub fn new(id: impl Into<JobId>, status: JobStatus) -> Self {
        Self {
            id: id.into(),
            status,
            batch_id: None,
            error_message: None,
            duration_seconds: None,
            created_at: None,
            processed_at: None,
        }
    }
}

/// `GET /jobs/{id}/results`, only meaningful once the job completed.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JobResult {
    #[serde(alias = "call_id")]
    pub job_id: JobId,
    pub status: JobStatus,
    #[serde(default)]
    pub overall_score: Option<f64>,
    #[serde(default)]
    pub score_label: Option<String>,
    #[serde(default)]
    pub score_name: Option<String>,
    #[serde(default)]
    pub fatal_flaw: Option<bool>,
    #[serde(default)]
    pub summary: Option<String>,
}

/// One page of `GET /jobs?batch_id=..`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JobPage {
    #[serde(alias = "calls")]
    pub jobs: Vec<JobSnapshot>,
    #[serde(default)]
    pub total: Option<u64>,
    #[serde(default)]
    pub page: Option<u32>,
    #[serde(default)]
    pub per_page: Option<u32>,
}
