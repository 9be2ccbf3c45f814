use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures_util::{SinkExt, StreamExt};
use pipewatch_core::progress_wire::HEARTBEAT_FRAME;
use pipewatch_core::JobId;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, Interval};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use url::Url;

use crate::config::WatchConfig;
use crate::error::ClientResult;

const OUTBOUND_QUEUE_CAPACITY: usize = 16;
const RETIRED_STATUS_LIMIT: usize = 256;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChannelState {
    Idle,
    Connecting,
    Open,
    Closed,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SubscriptionStatus {
    pub state: ChannelState,
    pub retry_count: u32,
    pub last_event_at: Option<DateTime<Utc>>,
}

impl SubscriptionStatus {
    fn idle() -> Self {
        Self {
            state: ChannelState::Idle,
            retry_count: 0,
            last_event_at: None,
        }
    }
}

/// Lifecycle and data surfaced by a subscription, tagged with its job.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ChannelEvent {
    Opened { job_id: JobId },
    Frame { job_id: JobId, payload: String },
    Lost { job_id: JobId },
    Closed { job_id: JobId },
}

impl ChannelEvent {
    pub fn job_id(&self) -> &JobId {
        match self {
            ChannelEvent::Opened { job_id }
            | ChannelEvent::Frame { job_id, .. }
            | ChannelEvent::Lost { job_id }
            | ChannelEvent::Closed { job_id } => job_id,
        }
    }
}

/// The push side as seen by a tracker.
pub trait PushChannel: Send {
    fn open(&mut self, job_id: &JobId);
    fn close(&mut self, job_id: &JobId);
    fn send(&self, job_id: &JobId, payload: String);
}

#[derive(Clone, Debug)]
pub struct ChannelSettings {
    pub ws_base_url: Url,
    pub reconnect_interval: Duration,
    pub max_reconnect_attempts: Option<u32>,
    pub heartbeat_interval: Option<Duration>,
}

impl ChannelSettings {
    pub fn from_config(config: &WatchConfig) -> Self {
        Self {
            ws_base_url: config.ws_base_url.clone(),
            reconnect_interval: config.reconnect_interval,
            max_reconnect_attempts: config.max_reconnect_attempts,
            heartbeat_interval: config.heartbeat_interval,
        }
    }

    fn job_url(&self, job_id: &JobId) -> ClientResult<Url> {
        let base = self.ws_base_url.as_str().trim_end_matches('/');
        Ok(Url::parse(&format!("{base}/ws/call/{job_id}"))?)
    }
}

struct Subscription {
    cancel: CancellationToken,
    status: Arc<watch::Sender<SubscriptionStatus>>,
    outbound: mpsc::Sender<String>,
    task: JoinHandle<()>,
}

/// One WebSocket per subscribed job, reconnecting at a fixed interval until
/// closed. All subscriptions report into a single event queue.
pub struct TransportChannel {
    settings: ChannelSettings,
    events: mpsc::Sender<ChannelEvent>,
    parent: CancellationToken,
    subscriptions: HashMap<JobId, Subscription>,
    // Final status of recently closed subscriptions, oldest first.
    retired: VecDeque<(JobId, SubscriptionStatus)>,
}

impl TransportChannel {
    pub fn new(settings: ChannelSettings, events: mpsc::Sender<ChannelEvent>) -> Self {
        Self::with_parent(settings, events, CancellationToken::new())
    }

    /// Subscriptions are cancelled together with `parent`.
    pub fn with_parent(
        settings: ChannelSettings,
        events: mpsc::Sender<ChannelEvent>,
        parent: CancellationToken,
    ) -> Self {
        Self {
            settings,
            events,
            parent,
            subscriptions: HashMap::new(),
            retired: VecDeque::new(),
        }
    }

    pub fn status(&self, job_id: &JobId) -> SubscriptionStatus {
        if let Some(sub) = self.subscriptions.get(job_id) {
            return sub.status.borrow().clone();
        }
        self.retired
            .iter()
            .find(|(id, _)| id == job_id)
            .map(|(_, status)| status.clone())
            .unwrap_or_else(SubscriptionStatus::idle)
    }

    pub fn watch_status(&self, job_id: &JobId) -> Option<watch::Receiver<SubscriptionStatus>> {
        self.subscriptions.get(job_id).map(|sub| sub.status.subscribe())
    }

    pub fn close_all(&mut self) {
        let job_ids: Vec<JobId> = self.subscriptions.keys().cloned().collect();
        for job_id in job_ids {
            self.close(&job_id);
        }
    }

    fn retire(&mut self, job_id: &JobId, status: SubscriptionStatus) {
        self.retired.retain(|(id, _)| id != job_id);
        self.retired.push_back((job_id.clone(), status));
        while self.retired.len() > RETIRED_STATUS_LIMIT {
            self.retired.pop_front();
        }
    }

    fn spawn_subscription(&mut self, job_id: &JobId) {
        let url = match self.settings.job_url(job_id) {
            Ok(url) => url,
            Err(err) => {
                warn!("progress_url_error: job_id={job_id} {err}");
                return;
            }
        };
        let cancel = self.parent.child_token();
        let (status_tx, _) = watch::channel(SubscriptionStatus {
            state: ChannelState::Connecting,
            retry_count: 0,
            last_event_at: None,
        });
        let status = Arc::new(status_tx);
        let (outbound_tx, outbound_rx) = mpsc::channel(OUTBOUND_QUEUE_CAPACITY);
        let worker = SubscriptionWorker {
            job_id: job_id.clone(),
            url,
            settings: self.settings.clone(),
            events: self.events.clone(),
            cancel: cancel.clone(),
            status: status.clone(),
            outbound: outbound_rx,
        };
        let task = tokio::spawn(worker.run());
        self.subscriptions.insert(
            job_id.clone(),
            Subscription {
                cancel,
                status,
                outbound: outbound_tx,
                task,
            },
        );
    }
}

impl PushChannel for TransportChannel {
    fn open(&mut self, job_id: &JobId) {
        if let Some(existing) = self.subscriptions.get(job_id) {
            let state = existing.status.borrow().state;
            if matches!(state, ChannelState::Connecting | ChannelState::Open) {
                return;
            }
        }
        if let Some(stale) = self.subscriptions.remove(job_id) {
            stale.cancel.cancel();
            stale.task.abort();
        }
        self.retired.retain(|(id, _)| id != job_id);
        self.spawn_subscription(job_id);
    }

    fn close(&mut self, job_id: &JobId) {
        let Some(sub) = self.subscriptions.remove(job_id) else {
            return;
        };
        sub.cancel.cancel();
        // Watchers see Closed before the entry goes away.
        sub.status.send_modify(|status| status.state = ChannelState::Closed);
        let last = sub.status.borrow().clone();
        self.retire(job_id, last);
    }

    fn send(&self, job_id: &JobId, payload: String) {
        let Some(sub) = self.subscriptions.get(job_id) else {
            return;
        };
        if sub.status.borrow().state != ChannelState::Open {
            debug!("progress_send_dropped: job_id={job_id} channel not open");
            return;
        }
        if sub.outbound.try_send(payload).is_err() {
            debug!("progress_send_dropped: job_id={job_id} outbound queue full");
        }
    }
}

impl Drop for TransportChannel {
    fn drop(&mut self) {
        self.close_all();
    }
}

enum PumpExit {
    Cancelled,
    Lost,
    ReceiverGone,
}

struct SubscriptionWorker {
    job_id: JobId,
    url: Url,
    settings: ChannelSettings,
    events: mpsc::Sender<ChannelEvent>,
    cancel: CancellationToken,
    status: Arc<watch::Sender<SubscriptionStatus>>,
    outbound: mpsc::Receiver<String>,
}

impl SubscriptionWorker {
    async fn run(mut self) {
        let mut retry_count: u32 = 0;

        loop {
            self.set_state(ChannelState::Connecting);
            let connect = tokio::select! {
                _ = self.cancel.cancelled() => break,
                connect = connect_async(self.url.as_str()) => connect,
            };

            match connect {
                Ok((ws, _)) => {
                    retry_count = 0;
                    if self.cancel.is_cancelled() {
                        break;
                    }
                    self.status.send_modify(|status| {
                        status.state = ChannelState::Open;
                        status.retry_count = 0;
                        status.last_event_at = Some(Utc::now());
                    });
                    info!("progress_connected: job_id={}", self.job_id);
                    if !self.emit(ChannelEvent::Opened {
                        job_id: self.job_id.clone(),
                    })
                    .await
                    {
                        break;
                    }
                    match self.pump(ws).await {
                        PumpExit::Cancelled | PumpExit::ReceiverGone => break,
                        PumpExit::Lost => {
                            self.set_state(ChannelState::Connecting);
                            if !self.emit(ChannelEvent::Lost {
                                job_id: self.job_id.clone(),
                            })
                            .await
                            {
                                break;
                            }
                        }
                    }
                }
                Err(err) => {
                    warn!("progress_connect_error: job_id={} {err}", self.job_id);
                }
            }

            if self.cancel.is_cancelled() {
                break;
            }
            if let Some(max) = self.settings.max_reconnect_attempts {
                if retry_count >= max {
                    warn!(
                        "progress_reconnect_exhausted: job_id={} attempts={retry_count}",
                        self.job_id
                    );
                    break;
                }
            }
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = tokio::time::sleep(self.settings.reconnect_interval) => {}
            }
            retry_count += 1;
            self.status
                .send_modify(|status| status.retry_count = retry_count);
            debug!(
                "progress_reconnecting: job_id={} retry_count={retry_count}",
                self.job_id
            );
        }

        self.status
            .send_modify(|status| status.state = ChannelState::Closed);
        if !self.cancel.is_cancelled() {
            let _ = self
                .events
                .send(ChannelEvent::Closed {
                    job_id: self.job_id.clone(),
                })
                .await;
        }
    }

    async fn pump(&mut self, mut ws: WsStream) -> PumpExit {
        let mut heartbeat = self.settings.heartbeat_interval.map(|period| {
            let mut interval = tokio::time::interval_at(Instant::now() + period, period);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            interval
        });

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    let _ = ws.close(None).await;
                    return PumpExit::Cancelled;
                }
                msg = ws.next() => {
                    let payload = match msg {
                        Some(Ok(Message::Text(text))) => text,
                        Some(Ok(Message::Binary(bytes))) => match String::from_utf8(bytes) {
                            Ok(text) => text,
                            Err(_) => {
                                debug!("progress_decode_drop: job_id={} non-utf8 binary frame", self.job_id);
                                continue;
                            }
                        },
                        Some(Ok(Message::Close(frame))) => {
                            info!("progress_closed_by_server: job_id={} frame={frame:?}", self.job_id);
                            return PumpExit::Lost;
                        }
                        Some(Ok(_)) => continue,
                        Some(Err(err)) => {
                            warn!("progress_read_error: job_id={} {err}", self.job_id);
                            return PumpExit::Lost;
                        }
                        None => return PumpExit::Lost,
                    };
                    // A frame that races teardown must not reach the tracker.
                    if self.cancel.is_cancelled() {
                        return PumpExit::Cancelled;
                    }
                    self.status.send_modify(|status| status.last_event_at = Some(Utc::now()));
                    if !self.emit(ChannelEvent::Frame { job_id: self.job_id.clone(), payload }).await {
                        return PumpExit::ReceiverGone;
                    }
                }
                Some(payload) = self.outbound.recv() => {
                    if let Err(err) = ws.send(Message::Text(payload)).await {
                        warn!("progress_send_error: job_id={} {err}", self.job_id);
                        return PumpExit::Lost;
                    }
                }
                _ = next_heartbeat(&mut heartbeat) => {
                    if let Err(err) = ws.send(Message::Text(HEARTBEAT_FRAME.to_string())).await {
                        warn!("progress_heartbeat_error: job_id={} {err}", self.job_id);
                        return PumpExit::Lost;
                    }
                }
            }
        }
    }

    fn set_state(&self, state: ChannelState) {
        if self.cancel.is_cancelled() {
            return;
        }
        self.status.send_modify(|status| status.state = state);
    }

    async fn emit(&self, event: ChannelEvent) -> bool {
        self.events.send(event).await.is_ok()
    }
}

async fn next_heartbeat(interval: &mut Option<Interval>) {
    match interval {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending::<()>().await,
    }
}
