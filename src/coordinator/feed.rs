//! Feed tasks forwarding live readings to the coordinator
//!
//! Both tasks stop forwarding as soon as the shared focus token moves past the
//! token they were started with. The coordinator also aborts them on refocus,
//! and drops any message that still slips through with a stale token.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::StreamExt;
use tokio::sync::{mpsc, watch};
use tokio::time::{MissedTickBehavior, interval, sleep};
use tracing::{debug, instrument, trace, warn};

use super::messages::{FeedEvent, FeedMessage};
use crate::NodeId;
use crate::config::SubscriptionConfig;
use crate::error::TelemetryError;
use crate::store::{BackingStore, ReadingFeed, TelemetryStore};

/// Shared state of one forwarding task
pub(crate) struct Forwarder {
    pub store: Arc<dyn TelemetryStore>,
    pub node_id: NodeId,
    pub token: u64,
    pub current_token: Arc<AtomicU64>,
    pub events: mpsc::Sender<FeedMessage>,
}

impl Forwarder {
    fn is_current(&self) -> bool {
        self.current_token.load(Ordering::SeqCst) == self.token
    }

    /// Returns `false` once forwarding should stop
    async fn forward(&self, event: FeedEvent) -> bool {
        if !self.is_current() {
            trace!("token {} is stale, stopping forwarder", self.token);
            return false;
        }
        let message = FeedMessage {
            token: self.token,
            event,
        };
        self.events.send(message).await.is_ok()
    }

    /// Subscribe with bounded retries, then forward the feed until it ends
    #[instrument(skip_all, fields(node = %self.node_id, token = self.token))]
    pub async fn subscribe(self, policy: SubscriptionConfig) {
        let max_attempts = policy.max_attempts.max(1);
        let mut attempt = 0;

        let mut feed = loop {
            attempt += 1;
            match self.store.subscribe(&self.node_id).await {
                Ok(feed) => break feed,
                Err(err) => {
                    warn!("subscribe attempt {attempt}/{max_attempts} failed: {err}");
                    if attempt >= max_attempts {
                        let failed = TelemetryError::SubscriptionFailed {
                            node_id: self.node_id.clone(),
                            attempts: attempt,
                        };
                        self.forward(FeedEvent::Failed(failed)).await;
                        return;
                    }
                    sleep(policy.retry_backoff()).await;
                }
            }
        };

        debug!("subscribed after {attempt} attempt(s)");
        if !self.forward(FeedEvent::Subscribed).await {
            return;
        }

        while let Some(reading) = feed.next().await {
            if !self.forward(FeedEvent::Reading(reading)).await {
                return;
            }
        }

        debug!("live feed ended");
        self.forward(FeedEvent::Ended).await;
    }

    /// Periodically fetch readings newer than the focused windows.
    ///
    /// `cursor` follows the newest timestamp in the coordinator's windows, so a
    /// seed landing mid-poll moves the poll position too. Without a cursor only
    /// the newest stored reading is fetched; older history is never replayed
    /// as live data.
    #[instrument(skip_all, fields(node = %self.node_id, token = self.token))]
    pub async fn poll(
        self,
        period: Duration,
        batch: usize,
        cursor: watch::Receiver<Option<DateTime<Utc>>>,
    ) {
        debug!("polling every {period:?}");

        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut forwarded: Option<DateTime<Utc>> = None;

        loop {
            ticker.tick().await;
            if !self.is_current() {
                return;
            }

            let after = (*cursor.borrow()).max(forwarded);
            let result = match after {
                Some(after) => {
                    self.store
                        .readings_since(&self.node_id, Some(after), batch)
                        .await
                }
                None => self.store.latest_readings(&self.node_id, 1).await,
            };

            let readings = match result {
                Ok(readings) => readings,
                Err(err) => {
                    warn!("poll failed, retrying next interval: {err}");
                    continue;
                }
            };
            trace!("poll after {after:?} returned {} readings", readings.len());

            for reading in readings {
                forwarded = forwarded.max(Some(reading.timestamp));
                if !self.forward(FeedEvent::Reading(reading)).await {
                    return;
                }
            }
        }
    }
}
