//! Live update coordinator
//!
//! An actor that owns the live windows of the focused hive. At most one hive is
//! focused at a time and at most one feed task forwards readings for it.
//!
//! ## Message Flow
//!
//! ```text
//! CoordinatorHandle ──commands──→ CoordinatorActor ──ViewUpdate──→ [presentation, ...]
//!                                   ↑        │ owns WindowStore
//!            FeedMessage{token, ..} │        │ spawns / aborts
//!                                   └──── Forwarder (subscribe | poll)
//! ```
//!
//! ## Focus token
//!
//! Every focus change bumps a shared `AtomicU64`. Forwarders stop once the
//! token moves on, and the actor drops any message carrying an older token.
//! Since the actor is the only writer of its windows, a message dropped here
//! can never touch state again after `unfocus()` has returned.
//!
//! ## Subscription policy
//!
//! Subscribing is retried up to `max_attempts` times with a fixed backoff. When
//! the budget is exhausted, or a feed ends while active, the focus passes
//! through `Error` and either polls the store (`LiveMode::Polling`) or, without
//! a poll interval, goes back to `Idle`.

mod feed;
pub mod messages;

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, trace, warn};

use crate::config::{Config, SubscriptionConfig};
use crate::error::{TelemetryError, TelemetryResult};
use crate::health::{BandTable, SafeBands};
use crate::resolver::EntityGraph;
use crate::store::TelemetryStore;
use crate::view::{ApiaryRef, LiveMode, ViewBuilder, ViewModel};
use crate::window::{Sample, WindowStore};
use crate::{HiveId, Metric, NodeId, Reading};

use feed::Forwarder;
pub use messages::{CoordinatorCommand, CoordinatorStatus, FocusState, ViewUpdate};
use messages::{FeedEvent, FeedMessage};

/// Capacity of the view update broadcast channel
const UPDATE_BUFFER: usize = 64;

/// Capacity of the channel between feed tasks and the actor
const FEED_BUFFER: usize = 256;

/// The focused hive and its running feed task
struct Focus {
    hive_id: HiveId,
    node_id: NodeId,
    token: u64,
    task: JoinHandle<()>,
    mode: LiveMode,
    /// Latest accepted reading, for values without a window (battery)
    latest: Option<Reading>,
    /// Newest timestamp in the focused windows, followed by the poll task
    cursor: watch::Sender<Option<DateTime<Utc>>>,
}

pub struct CoordinatorActor {
    store: Arc<dyn TelemetryStore>,
    graph: EntityGraph,
    windows: WindowStore,
    bands: BandTable,
    safe_bands: SafeBands,
    policy: SubscriptionConfig,

    token: Arc<AtomicU64>,
    focus: Option<Focus>,
    state: FocusState,
    last_error: Option<String>,

    command_rx: mpsc::Receiver<CoordinatorCommand>,
    feed_tx: mpsc::Sender<FeedMessage>,
    feed_rx: mpsc::Receiver<FeedMessage>,
    update_tx: broadcast::Sender<ViewUpdate>,
}

impl CoordinatorActor {
    fn new(
        store: Arc<dyn TelemetryStore>,
        graph: EntityGraph,
        config: &Config,
        command_rx: mpsc::Receiver<CoordinatorCommand>,
        update_tx: broadcast::Sender<ViewUpdate>,
    ) -> Self {
        let (feed_tx, feed_rx) = mpsc::channel(FEED_BUFFER);

        Self {
            store,
            graph,
            windows: WindowStore::with_capacity(config.windows.live_capacity),
            bands: config.bands.clone(),
            safe_bands: config.safe_bands.clone(),
            policy: config.subscription,
            token: Arc::new(AtomicU64::new(0)),
            focus: None,
            state: FocusState::Idle,
            last_error: None,
            command_rx,
            feed_tx,
            feed_rx,
            update_tx,
        }
    }

    /// Run the actor's main loop until shutdown or until every handle is dropped
    #[instrument(skip(self))]
    pub async fn run(mut self) {
        debug!("starting coordinator actor");

        loop {
            tokio::select! {
                Some(message) = self.feed_rx.recv() => {
                    self.handle_feed(message);
                }

                cmd = self.command_rx.recv() => {
                    let Some(cmd) = cmd else {
                        debug!("command channel closed, shutting down");
                        break;
                    };

                    match cmd {
                        CoordinatorCommand::Focus { hive_id, respond_to } => {
                            let result = self.focus(hive_id).await;
                            let _ = respond_to.send(result);
                        }

                        CoordinatorCommand::Unfocus { respond_to } => {
                            self.unfocus().await;
                            let _ = respond_to.send(());
                        }

                        CoordinatorCommand::Seed { hive_id, windows, respond_to } => {
                            let applied = self.seed(&hive_id, &windows);
                            let _ = respond_to.send(applied);
                        }

                        CoordinatorCommand::UpdateGraph { graph, respond_to } => {
                            self.update_graph(graph).await;
                            let _ = respond_to.send(());
                        }

                        CoordinatorCommand::Status { respond_to } => {
                            let _ = respond_to.send(self.status());
                        }

                        CoordinatorCommand::Shutdown => {
                            debug!("received shutdown command");
                            break;
                        }
                    }
                }
            }
        }

        self.release_focus().await;
        debug!("coordinator actor stopped");
    }

    fn transition(&mut self, next: FocusState) {
        if self.state != next {
            debug!("focus state {:?} → {next:?}", self.state);
            self.state = next;
        }
    }

    async fn focus(&mut self, hive_id: HiveId) -> TelemetryResult<u64> {
        let node_id = self.graph.node_of(&hive_id)?;

        if let Some(focus) = &self.focus
            && focus.hive_id == hive_id
            && focus.node_id == node_id
        {
            trace!("hive {hive_id} is already focused");
            return Ok(focus.token);
        }

        self.release_focus().await;

        let token = self.token.fetch_add(1, Ordering::SeqCst) + 1;
        self.last_error = None;
        self.transition(FocusState::Subscribing);
        info!("focusing hive {hive_id} (node {node_id}, token {token})");

        let forwarder = self.forwarder(&node_id, token);
        let task = tokio::spawn(forwarder.subscribe(self.policy));

        self.focus = Some(Focus {
            hive_id,
            node_id,
            token,
            task,
            mode: LiveMode::Idle,
            latest: None,
            cursor: watch::Sender::new(None),
        });

        Ok(token)
    }

    async fn unfocus(&mut self) {
        if self.focus.is_none() {
            trace!("unfocus while idle");
            return;
        }
        self.release_focus().await;
    }

    /// Abort the feed, invalidate the token and clear the focused windows
    async fn release_focus(&mut self) {
        let Some(focus) = self.focus.take() else {
            return;
        };

        self.transition(FocusState::Unsubscribing);
        self.token.fetch_add(1, Ordering::SeqCst);

        focus.task.abort();
        // wait for the task to be dropped so its feed is released
        let _ = focus.task.await;

        self.windows.clear_hive(&focus.hive_id);
        debug!("released focus on hive {}", focus.hive_id);
        self.transition(FocusState::Idle);
    }

    /// Merge a historical load into the focused hive's windows.
    ///
    /// Live points newer than the history are kept on top of it.
    fn seed(&mut self, hive_id: &str, history: &WindowStore) -> bool {
        let Some(focus) = &self.focus else {
            return false;
        };
        if focus.hive_id != hive_id {
            debug!("ignoring seed for unfocused hive {hive_id}");
            return false;
        }

        for metric in Metric::ALL {
            let mut points = history.points(hive_id, metric);
            let newest = points.last().map(|sample| sample.timestamp);
            let live: Vec<Sample> = self
                .windows
                .points(hive_id, metric)
                .into_iter()
                .filter(|sample| newest.is_none_or(|newest| sample.timestamp > newest))
                .collect();
            points.extend(live);
            self.windows.seed(hive_id, metric, points);
        }

        if let Some(focus) = &self.focus {
            focus.cursor.send_replace(self.windows.last_timestamp(hive_id));
        }
        true
    }

    async fn update_graph(&mut self, graph: EntityGraph) {
        self.graph = graph;

        let Some(focus) = &self.focus else {
            return;
        };
        match self.graph.node_of(&focus.hive_id) {
            Ok(node_id) if node_id == focus.node_id => {}
            Ok(_) | Err(_) => {
                warn!("focused hive {} changed or disappeared, dropping focus", focus.hive_id);
                self.release_focus().await;
            }
        }
    }

    fn status(&self) -> CoordinatorStatus {
        CoordinatorStatus {
            state: self.state,
            hive_id: self.focus.as_ref().map(|focus| focus.hive_id.clone()),
            node_id: self.focus.as_ref().map(|focus| focus.node_id.clone()),
            live_mode: self.focus.as_ref().map_or(LiveMode::Idle, |focus| focus.mode),
            token: self.token.load(Ordering::SeqCst),
            last_error: self.last_error.clone(),
        }
    }

    fn handle_feed(&mut self, message: FeedMessage) {
        let current = self.token.load(Ordering::SeqCst);
        let Some(focus) = self.focus.as_mut().filter(|_| message.token == current) else {
            trace!("dropping feed event with stale token {}", message.token);
            return;
        };

        match message.event {
            FeedEvent::Subscribed => {
                focus.mode = LiveMode::Subscribed;
                self.transition(FocusState::Active);
            }

            FeedEvent::Reading(reading) => {
                let accepted = self.windows.append_reading(&focus.hive_id, &reading);
                if accepted == 0 {
                    trace!("reading at {} added nothing", reading.timestamp);
                    return;
                }
                focus.latest = Some(reading);
                focus
                    .cursor
                    .send_replace(self.windows.last_timestamp(&focus.hive_id));
                self.publish();
            }

            FeedEvent::Failed(err) => self.fall_back(err.to_string()),

            FeedEvent::Ended => {
                let error = format!("live feed for node {} ended", focus.node_id);
                self.fall_back(error);
            }
        }
    }

    /// Leave a failed feed for polling, or drop the focus without a poll interval
    fn fall_back(&mut self, error: String) {
        warn!("{error}");
        self.last_error = Some(error);
        self.transition(FocusState::Error);

        let Some(period) = self.policy.poll_interval() else {
            if let Some(focus) = self.focus.take() {
                self.token.fetch_add(1, Ordering::SeqCst);
                focus.task.abort();
                self.windows.clear_hive(&focus.hive_id);
            }
            self.transition(FocusState::Idle);
            return;
        };

        let Some(focus) = &self.focus else {
            return;
        };
        let cursor = focus.cursor.subscribe();
        let forwarder = self.forwarder(&focus.node_id, focus.token);
        let task = tokio::spawn(forwarder.poll(period, self.policy.poll_batch, cursor));

        if let Some(focus) = self.focus.as_mut() {
            focus.task.abort();
            focus.task = task;
            focus.mode = LiveMode::Polling;
        }
        self.transition(FocusState::Active);
    }

    fn forwarder(&self, node_id: &str, token: u64) -> Forwarder {
        Forwarder {
            store: self.store.clone(),
            node_id: node_id.to_string(),
            token,
            current_token: self.token.clone(),
            events: self.feed_tx.clone(),
        }
    }

    /// Broadcast the focused hive's recomputed view
    fn publish(&self) {
        let Some(focus) = &self.focus else {
            return;
        };
        let Some(hive) = self.graph.hive(&focus.hive_id) else {
            return;
        };

        let builder = ViewBuilder::new(&self.bands, &self.safe_bands);
        let view = ViewModel {
            apiary: self
                .graph
                .apiary_of(&focus.hive_id)
                .map(|(apiary, _)| ApiaryRef::from(apiary)),
            overview: None,
            hives: vec![builder.hive(hive, &self.windows, focus.latest.as_ref(), Utc::now())],
            degraded: false,
            live_mode: focus.mode,
            generated_at: Utc::now(),
        };

        let update = ViewUpdate {
            token: focus.token,
            hive_id: focus.hive_id.clone(),
            view,
        };

        match self.update_tx.send(update) {
            Ok(receivers) => trace!("published view update to {receivers} receivers"),
            Err(_) => trace!("no receivers for view update"),
        }
    }
}

/// Handle for controlling a CoordinatorActor
///
/// Cheap to clone; the actor stops once every handle is dropped or
/// [`CoordinatorHandle::shutdown`] is called.
#[derive(Clone)]
pub struct CoordinatorHandle {
    sender: mpsc::Sender<CoordinatorCommand>,
    update_tx: broadcast::Sender<ViewUpdate>,
}

impl CoordinatorHandle {
    pub fn spawn(store: Arc<dyn TelemetryStore>, graph: EntityGraph, config: &Config) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::channel(32);
        let (update_tx, _) = broadcast::channel(UPDATE_BUFFER);

        let actor = CoordinatorActor::new(store, graph, config, cmd_rx, update_tx.clone());
        tokio::spawn(actor.run());

        Self {
            sender: cmd_tx,
            update_tx,
        }
    }

    async fn request<T>(
        &self,
        command: impl FnOnce(oneshot::Sender<T>) -> CoordinatorCommand,
    ) -> TelemetryResult<T> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(command(tx))
            .await
            .map_err(|_| TelemetryError::ActorUnavailable)?;
        rx.await.map_err(|_| TelemetryError::ActorUnavailable)
    }

    /// Focus a hive; returns once the subscription task is started, not established
    pub async fn focus(&self, hive_id: impl Into<HiveId>) -> TelemetryResult<u64> {
        let hive_id = hive_id.into();
        self.request(|respond_to| CoordinatorCommand::Focus { hive_id, respond_to })
            .await?
    }

    /// Drop the focus; no event of the old feed is applied after this returns
    pub async fn unfocus(&self) -> TelemetryResult<()> {
        self.request(|respond_to| CoordinatorCommand::Unfocus { respond_to })
            .await
    }

    /// Returns `false` if the hive is not the focused one
    pub async fn seed(&self, hive_id: impl Into<HiveId>, windows: WindowStore) -> TelemetryResult<bool> {
        let hive_id = hive_id.into();
        self.request(|respond_to| CoordinatorCommand::Seed {
            hive_id,
            windows,
            respond_to,
        })
        .await
    }

    pub async fn update_graph(&self, graph: EntityGraph) -> TelemetryResult<()> {
        self.request(|respond_to| CoordinatorCommand::UpdateGraph { graph, respond_to })
            .await
    }

    pub async fn status(&self) -> TelemetryResult<CoordinatorStatus> {
        self.request(|respond_to| CoordinatorCommand::Status { respond_to })
            .await
    }

    pub fn subscribe_updates(&self) -> broadcast::Receiver<ViewUpdate> {
        self.update_tx.subscribe()
    }

    pub async fn shutdown(&self) -> TelemetryResult<()> {
        self.sender
            .send(CoordinatorCommand::Shutdown)
            .await
            .map_err(|_| TelemetryError::ActorUnavailable)
    }
}
