use std::sync::Arc;
use std::time::Duration;

use futures_util::stream::{self, StreamExt};
use pipewatch_core::batch::{BatchView, JobSummary};
use pipewatch_core::snapshot::JobSnapshot;
use pipewatch_core::JobStatus;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::BATCH_PAGE_SIZE;
use crate::error::ClientResult;
use crate::store::JobStore;
use crate::wait_until;

const MAX_BATCH_PAGES: u32 = 1000;
/// Score lookups in flight at once during one refresh.
pub const SCORE_FETCH_CONCURRENCY: usize = 8;

/// Polls every job of a batch through the store instead of holding one push
/// subscription per job.
pub struct BatchAggregator {
    batch_id: String,
    store: Arc<dyn JobStore>,
    refresh_interval: Duration,
    per_page: u32,
}

impl BatchAggregator {
    pub fn new(
        batch_id: impl Into<String>,
        store: Arc<dyn JobStore>,
        refresh_interval: Duration,
    ) -> Self {
        Self {
            batch_id: batch_id.into(),
            store,
            refresh_interval,
            per_page: BATCH_PAGE_SIZE,
        }
    }

    pub fn with_page_size(mut self, per_page: u32) -> Self {
        self.per_page = per_page.max(1);
        self
    }

    pub fn batch_id(&self) -> &str {
        &self.batch_id
    }

    /// One full refresh: list the batch, then look up scores of completed
    /// jobs. A failed score lookup only leaves that score empty.
    pub async fn refresh(&self) -> ClientResult<BatchView> {
        let jobs = self.list_jobs().await?;
        let summaries: Vec<JobSummary> = stream::iter(jobs)
            .map(|job| self.summarize(job))
            .buffered(SCORE_FETCH_CONCURRENCY)
            .collect()
            .await;
        Ok(BatchView::compute(self.batch_id.clone(), summaries))
    }

    pub fn spawn(self) -> BatchWatch {
        let cancel = CancellationToken::new();
        let (view_tx, view_rx) = watch::channel(None);
        let (command_tx, command_rx) = mpsc::channel(1);
        let task = tokio::spawn(self.run(view_tx, command_rx, cancel.clone()));
        BatchWatch {
            view: view_rx,
            commands: command_tx,
            cancel,
            task,
        }
    }

    async fn list_jobs(&self) -> ClientResult<Vec<JobSnapshot>> {
        let mut jobs = Vec::new();
        let mut page = 1;
        loop {
            let chunk = self
                .store
                .batch_page(&self.batch_id, page, self.per_page)
                .await?;
            let received = chunk.jobs.len();
            jobs.extend(chunk.jobs);
            let done = match chunk.total {
                _ if received == 0 => true,
                Some(total) => jobs.len() as u64 >= total,
                None => received < self.per_page as usize,
            };
            if done {
                break;
            }
            if page >= MAX_BATCH_PAGES {
                warn!(
                    "batch_page_limit: batch_id={} pages={page} jobs={}",
                    self.batch_id,
                    jobs.len()
                );
                break;
            }
            page += 1;
        }
        Ok(jobs)
    }

    async fn summarize(&self, job: JobSnapshot) -> JobSummary {
        let score = if job.status == JobStatus::Completed {
            match self.store.job_results(&job.id).await {
                Ok(result) => result.overall_score,
                Err(err) => {
                    warn!(
                        "batch_score_error: batch_id={} job_id={} {err}",
                        self.batch_id, job.id
                    );
                    None
                }
            }
        } else {
            None
        };
        JobSummary {
            job_id: job.id,
            status: job.status,
            score,
        }
    }

    async fn run(
        self,
        view_tx: watch::Sender<Option<BatchView>>,
        mut commands: mpsc::Receiver<()>,
        cancel: CancellationToken,
    ) {
        loop {
            let outcome = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                outcome = self.refresh() => outcome,
            };

            // The next refresh is armed only after this one settled.
            let next_at = match outcome {
                Ok(view) => {
                    let active = view.has_active;
                    debug!(
                        "batch_refreshed: batch_id={} total={} finished={} active={active}",
                        self.batch_id,
                        view.total_count,
                        view.finished_count()
                    );
                    view_tx.send_replace(Some(view));
                    if active {
                        Some(Instant::now() + self.refresh_interval)
                    } else {
                        info!("batch_settled: batch_id={}", self.batch_id);
                        None
                    }
                }
                Err(err) => {
                    warn!("batch_refresh_error: batch_id={} {err}", self.batch_id);
                    Some(Instant::now() + self.refresh_interval)
                }
            };

            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                command = commands.recv() => {
                    if command.is_none() {
                        break;
                    }
                }
                _ = wait_until(next_at) => {}
            }
        }
    }
}

/// Handle to a running batch refresh loop.
pub struct BatchWatch {
    view: watch::Receiver<Option<BatchView>>,
    commands: mpsc::Sender<()>,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl BatchWatch {
    /// `None` until the first refresh succeeded.
    pub fn view(&self) -> Option<BatchView> {
        self.view.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<Option<BatchView>> {
        self.view.clone()
    }

    /// Runs a refresh now instead of waiting for the schedule. Has no effect
    /// while a refresh is already pending.
    pub fn refresh(&self) {
        let _ = self.commands.try_send(());
    }

    pub fn stop(&self) {
        self.cancel.cancel();
    }

    pub async fn join(self) {
        if let Err(err) = self.task.await {
            warn!("batch_join_error: {err}");
        }
    }
}
