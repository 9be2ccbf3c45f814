use std::sync::Arc;
use std::time::Duration;

use pipewatch_core::pipeline::{JobView, Transition};
use pipewatch_core::progress_wire::{decode_progress_frame, DEFAULT_MAX_FRAME_BYTES};
use pipewatch_core::JobId;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::channel::{ChannelEvent, ChannelSettings, PushChannel, TransportChannel};
use crate::config::WatchConfig;
use crate::reconcile::ReconciliationBridge;
use crate::store::JobStore;
use crate::wait_until;

const EVENT_QUEUE_CAPACITY: usize = 64;
const COMMAND_QUEUE_CAPACITY: usize = 8;

/// Invoked once, when the job's view first becomes terminal.
pub type CompletionCallback = Box<dyn FnOnce(&JobView) + Send + 'static>;

#[derive(Clone, Debug)]
pub struct TrackerSettings {
    pub settle_delay: Duration,
    pub max_frame_bytes: usize,
}

impl TrackerSettings {
    pub fn from_config(config: &WatchConfig) -> Self {
        Self {
            settle_delay: config.settle_delay,
            max_frame_bytes: DEFAULT_MAX_FRAME_BYTES,
        }
    }
}

enum TrackerCommand {
    Refresh,
    Send(String),
}

/// Live view of one job: push channel, frame decoding, the pipeline reducer
/// and store reconciliation, all driven from a single task.
pub struct JobTracker {
    job_id: JobId,
    view: watch::Receiver<JobView>,
    commands: mpsc::Sender<TrackerCommand>,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl JobTracker {
    pub fn spawn(
        job_id: JobId,
        config: &WatchConfig,
        store: Arc<dyn JobStore>,
        on_complete: impl FnOnce(&JobView) + Send + 'static,
    ) -> Self {
        let cancel = CancellationToken::new();
        let (events_tx, events_rx) = mpsc::channel(EVENT_QUEUE_CAPACITY);
        let channel = TransportChannel::with_parent(
            ChannelSettings::from_config(config),
            events_tx,
            cancel.clone(),
        );
        Self::spawn_with_channel(
            job_id,
            channel,
            events_rx,
            store,
            TrackerSettings::from_config(config),
            cancel,
            Box::new(on_complete),
        )
    }

    pub fn spawn_with_channel<C: PushChannel + 'static>(
        job_id: JobId,
        channel: C,
        events: mpsc::Receiver<ChannelEvent>,
        store: Arc<dyn JobStore>,
        settings: TrackerSettings,
        cancel: CancellationToken,
        on_complete: CompletionCallback,
    ) -> Self {
        let (view_tx, view_rx) = watch::channel(JobView::new(job_id.clone()));
        let (command_tx, command_rx) = mpsc::channel(COMMAND_QUEUE_CAPACITY);
        let driver = TrackerDriver {
            job_id: job_id.clone(),
            view: JobView::new(job_id.clone()),
            view_tx,
            channel,
            bridge: ReconciliationBridge::new(store),
            settings,
            cancel: cancel.clone(),
            on_complete: Some(on_complete),
            settle_at: None,
        };
        let task = tokio::spawn(driver.run(events, command_rx));
        Self {
            job_id,
            view: view_rx,
            commands: command_tx,
            cancel,
            task,
        }
    }

    pub fn job_id(&self) -> &JobId {
        &self.job_id
    }

    pub fn view(&self) -> JobView {
        self.view.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<JobView> {
        self.view.clone()
    }

    /// User-triggered reconciliation. Returns false once the tracker stopped.
    pub async fn refresh(&self) -> bool {
        self.commands.send(TrackerCommand::Refresh).await.is_ok()
    }

    /// Pass a client message to the channel; dropped unless it is open.
    pub async fn send(&self, payload: String) -> bool {
        self.commands
            .send(TrackerCommand::Send(payload))
            .await
            .is_ok()
    }

    /// Tears down the subscription and any pending timers. Frames that
    /// arrive afterwards are dropped.
    pub fn stop(&self) {
        self.cancel.cancel();
    }

    pub async fn join(self) {
        if let Err(err) = self.task.await {
            warn!("tracker_join_error: job_id={} {err}", self.job_id);
        }
    }
}

struct TrackerDriver<C> {
    job_id: JobId,
    view: JobView,
    view_tx: watch::Sender<JobView>,
    channel: C,
    bridge: ReconciliationBridge,
    settings: TrackerSettings,
    cancel: CancellationToken,
    on_complete: Option<CompletionCallback>,
    settle_at: Option<Instant>,
}

impl<C: PushChannel> TrackerDriver<C> {
    async fn run(
        mut self,
        mut events: mpsc::Receiver<ChannelEvent>,
        mut commands: mpsc::Receiver<TrackerCommand>,
    ) {
        self.channel.open(&self.job_id);
        let cancel = self.cancel.clone();

        loop {
            let settle_at = self.settle_at;
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                Some(event) = events.recv() => self.handle_channel_event(event).await,
                command = commands.recv() => match command {
                    Some(TrackerCommand::Refresh) => self.refresh().await,
                    Some(TrackerCommand::Send(payload)) => self.channel.send(&self.job_id, payload),
                    None => break,
                },
                _ = wait_until(settle_at) => {
                    self.settle_at = None;
                    self.settle().await;
                }
            }
        }

        self.channel.close(&self.job_id);
        debug!("tracker_stopped: job_id={}", self.job_id);
    }

    async fn handle_channel_event(&mut self, event: ChannelEvent) {
        if event.job_id() != &self.job_id {
            return;
        }
        match event {
            ChannelEvent::Opened { .. } => {
                self.view.set_connected(true);
                self.publish();
                if !self.view.terminal {
                    self.reconcile().await;
                }
            }
            ChannelEvent::Frame { payload, .. } => {
                if self.view.terminal || self.cancel.is_cancelled() {
                    return;
                }
                match decode_progress_frame(
                    payload.as_bytes(),
                    &self.job_id,
                    self.settings.max_frame_bytes,
                ) {
                    Ok(event) => {
                        let transition = self.view.apply(event);
                        self.after_transition(transition);
                    }
                    Err(err) => debug!("progress_decode_drop: job_id={} {err}", self.job_id),
                }
            }
            ChannelEvent::Lost { .. } => {
                self.view.set_connected(false);
                self.publish();
            }
            ChannelEvent::Closed { .. } => {
                if self.view.terminal {
                    return;
                }
                warn!("progress_channel_gave_up: job_id={}", self.job_id);
                self.channel.close(&self.job_id);
                self.view.mark_channel_closed();
                self.publish();
            }
        }
    }

    async fn reconcile(&mut self) {
        let snapshot = self.bridge.snapshot(&self.job_id).await;
        if self.cancel.is_cancelled() {
            return;
        }
        match snapshot {
            Some(snapshot) => {
                let transition = self.view.apply_snapshot(&snapshot);
                self.after_transition(transition);
            }
            None => {
                self.view.mark_stale();
                self.publish();
            }
        }
    }

    async fn refresh(&mut self) {
        if self.view.terminal {
            self.settle_at = None;
            self.settle().await;
        } else {
            self.reconcile().await;
        }
    }

    async fn settle(&mut self) {
        let read = self.bridge.final_read(&self.job_id).await;
        if self.cancel.is_cancelled() {
            return;
        }
        let missing = read.snapshot.is_none();
        self.view.attach_final(read.snapshot.as_ref(), read.result);
        if missing {
            self.view.mark_stale();
        }
        self.publish();
    }

    fn after_transition(&mut self, transition: Transition) {
        match transition {
            Transition::Ignored => {}
            Transition::Applied => self.publish(),
            Transition::Terminated => {
                info!(
                    "pipeline_terminal: job_id={} status={} pct={}",
                    self.job_id, self.view.job_status, self.view.percentage
                );
                self.channel.close(&self.job_id);
                self.view.set_connected(false);
                self.publish();
                if let Some(on_complete) = self.on_complete.take() {
                    on_complete(&self.view);
                }
                self.settle_at = Some(Instant::now() + self.settings.settle_delay);
            }
        }
    }

    fn publish(&self) {
        self.view_tx.send_replace(self.view.clone());
    }
}
