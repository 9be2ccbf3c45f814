#![allow(dead_code)]

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use pipewatch_client::{ClientError, ClientResult, JobStore, PushChannel};
use pipewatch_core::snapshot::{JobPage, JobResult, JobSnapshot};
use pipewatch_core::{JobId, JobStatus};
use tokio::sync::watch;

/// In-memory job store with scripted answers and call counters.
#[derive(Default)]
pub struct ScriptedStore {
    jobs: Mutex<HashMap<JobId, JobSnapshot>>,
    scripted: Mutex<HashMap<JobId, VecDeque<JobStatus>>>,
    batch: Mutex<Vec<JobSnapshot>>,
    scores: Mutex<HashMap<JobId, f64>>,
    failing_jobs: Mutex<HashSet<JobId>>,
    failing_results: Mutex<HashSet<JobId>>,
    failing_listing: Mutex<bool>,
    pub job_calls: AtomicUsize,
    pub result_calls: AtomicUsize,
    pub page_calls: AtomicUsize,
    results_in_flight: AtomicUsize,
    max_results_in_flight: AtomicUsize,
}

impl ScriptedStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set_job(&self, id: u64, status: JobStatus) {
        let snapshot = JobSnapshot::new(id, status);
        self.jobs
            .lock()
            .expect("jobs lock")
            .insert(snapshot.id.clone(), snapshot);
    }

    /// Successive `job` reads walk `statuses`; the last one then sticks.
    pub fn script_job(&self, id: u64, statuses: &[JobStatus]) {
        self.scripted
            .lock()
            .expect("script lock")
            .insert(JobId::from(id), statuses.iter().cloned().collect());
    }

    pub fn set_job_error(&self, id: u64, message: &str) {
        let mut jobs = self.jobs.lock().expect("jobs lock");
        if let Some(job) = jobs.get_mut(&JobId::from(id)) {
            job.error_message = Some(message.to_string());
        }
    }

    pub fn fail_job(&self, id: u64, failing: bool) {
        let mut set = self.failing_jobs.lock().expect("failing lock");
        if failing {
            set.insert(JobId::from(id));
        } else {
            set.remove(&JobId::from(id));
        }
    }

    pub fn fail_results(&self, id: u64) {
        self.failing_results
            .lock()
            .expect("failing lock")
            .insert(JobId::from(id));
    }

    pub fn fail_listing(&self, failing: bool) {
        *self.failing_listing.lock().expect("listing lock") = failing;
    }

    pub fn set_score(&self, id: u64, score: f64) {
        self.scores
            .lock()
            .expect("scores lock")
            .insert(JobId::from(id), score);
    }

    pub fn set_batch(&self, jobs: &[(u64, JobStatus)]) {
        *self.batch.lock().expect("batch lock") = jobs
            .iter()
            .map(|(id, status)| JobSnapshot::new(*id, status.clone()))
            .collect();
    }

    pub fn job_calls(&self) -> usize {
        self.job_calls.load(Ordering::SeqCst)
    }

    pub fn result_calls(&self) -> usize {
        self.result_calls.load(Ordering::SeqCst)
    }

    pub fn page_calls(&self) -> usize {
        self.page_calls.load(Ordering::SeqCst)
    }

    pub fn max_results_in_flight(&self) -> usize {
        self.max_results_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl JobStore for ScriptedStore {
    async fn job(&self, job_id: &JobId) -> ClientResult<JobSnapshot> {
        self.job_calls.fetch_add(1, Ordering::SeqCst);
        if self.failing_jobs.lock().expect("failing lock").contains(job_id) {
            return Err(ClientError::ApiError {
                status: 503,
                message: "store unavailable".to_string(),
            });
        }
        if let Some(script) = self.scripted.lock().expect("script lock").get_mut(job_id) {
            let status = if script.len() > 1 {
                script.pop_front()
            } else {
                script.front().cloned()
            };
            if let Some(status) = status {
                return Ok(JobSnapshot::new(job_id.clone(), status));
            }
        }
        self.jobs
            .lock()
            .expect("jobs lock")
            .get(job_id)
            .cloned()
            .ok_or_else(|| ClientError::NotFound(format!("job {job_id}")))
    }

    async fn job_results(&self, job_id: &JobId) -> ClientResult<JobResult> {
        self.result_calls.fetch_add(1, Ordering::SeqCst);
        let in_flight = self.results_in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_results_in_flight.fetch_max(in_flight, Ordering::SeqCst);
        tokio::task::yield_now().await;
        self.results_in_flight.fetch_sub(1, Ordering::SeqCst);
        if self
            .failing_results
            .lock()
            .expect("failing lock")
            .contains(job_id)
        {
            return Err(ClientError::ApiError {
                status: 500,
                message: "scoring backend down".to_string(),
            });
        }
        let score = self.scores.lock().expect("scores lock").get(job_id).copied();
        Ok(JobResult {
            job_id: job_id.clone(),
            status: JobStatus::Completed,
            overall_score: score,
            score_label: Some("SQS".to_string()),
            score_name: Some("Service Quality Score".to_string()),
            fatal_flaw: Some(false),
            summary: None,
        })
    }

    async fn batch_page(&self, _batch_id: &str, page: u32, per_page: u32) -> ClientResult<JobPage> {
        self.page_calls.fetch_add(1, Ordering::SeqCst);
        if *self.failing_listing.lock().expect("listing lock") {
            return Err(ClientError::ApiError {
                status: 502,
                message: "bad gateway".to_string(),
            });
        }
        let batch = self.batch.lock().expect("batch lock");
        let start = ((page.max(1) - 1) * per_page) as usize;
        let jobs = batch
            .iter()
            .skip(start)
            .take(per_page as usize)
            .cloned()
            .collect();
        Ok(JobPage {
            jobs,
            total: Some(batch.len() as u64),
            page: Some(page),
            per_page: Some(per_page),
        })
    }
}

/// Push channel double that records every call made by the tracker.
#[derive(Clone, Default)]
pub struct RecordingChannel {
    pub calls: Arc<Mutex<Vec<String>>>,
}

impl RecordingChannel {
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().expect("calls lock").clone()
    }

    pub fn count(&self, prefix: &str) -> usize {
        self.calls()
            .iter()
            .filter(|call| call.starts_with(prefix))
            .count()
    }
}

impl PushChannel for RecordingChannel {
    fn open(&mut self, job_id: &JobId) {
        self.calls
            .lock()
            .expect("calls lock")
            .push(format!("open {job_id}"));
    }

    fn close(&mut self, job_id: &JobId) {
        self.calls
            .lock()
            .expect("calls lock")
            .push(format!("close {job_id}"));
    }

    fn send(&self, job_id: &JobId, payload: String) {
        self.calls
            .lock()
            .expect("calls lock")
            .push(format!("send {job_id} {payload}"));
    }
}

pub async fn wait_for<T, F>(rx: &mut watch::Receiver<T>, what: &str, mut predicate: F) -> T
where
    T: Clone,
    F: FnMut(&T) -> bool,
{
    let waited = tokio::time::timeout(Duration::from_secs(30), rx.wait_for(|value| predicate(value)))
        .await
        .unwrap_or_else(|_| panic!("timed out waiting for {what}"));
    let value = waited.unwrap_or_else(|_| panic!("sender dropped while waiting for {what}"));
    value.clone()
}

pub fn progress_frame(pct: f64, stages: &[(&str, &str)]) -> String {
    let stages: Vec<_> = stages
        .iter()
        .map(|(stage, status)| serde_json::json!({"stage": stage, "label": "", "status": status}))
        .collect();
    serde_json::json!({
        "type": "pipeline_progress",
        "stages": stages,
        "progress_pct": pct,
        "call_status": "processing",
    })
    .to_string()
}

pub fn complete_frame(status: &str, pct: Option<f64>) -> String {
    let mut frame = serde_json::json!({
        "type": "pipeline_complete",
        "call_status": status,
    });
    if let Some(pct) = pct {
        frame["progress_pct"] = serde_json::json!(pct);
    }
    frame.to_string()
}
