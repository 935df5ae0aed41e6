//! Message types for the live update coordinator
//!
//! 1. **Commands**: request/response messages sent to the actor via mpsc
//! 2. **Feed messages**: events forwarded by the subscription and poll tasks,
//!    tagged with the focus token they were started under
//! 3. **View updates**: broadcast to every interested listener

use serde::Serialize;
use tokio::sync::oneshot;

use crate::error::{TelemetryError, TelemetryResult};
use crate::resolver::EntityGraph;
use crate::view::{LiveMode, ViewModel};
use crate::window::WindowStore;
use crate::{HiveId, NodeId, Reading};

/// Commands that can be sent to the CoordinatorActor
#[derive(Debug)]
pub enum CoordinatorCommand {
    /// Focus a hive and start listening to its node
    Focus {
        hive_id: HiveId,
        /// Receives the new focus token
        respond_to: oneshot::Sender<TelemetryResult<u64>>,
    },

    /// Drop the current focus, if any
    Unfocus { respond_to: oneshot::Sender<()> },

    /// Apply a historical load to the focused hive's windows
    Seed {
        hive_id: HiveId,
        windows: WindowStore,
        /// `false` when the hive is not focused and the load was ignored
        respond_to: oneshot::Sender<bool>,
    },

    /// Swap in a freshly built entity graph
    UpdateGraph {
        graph: EntityGraph,
        respond_to: oneshot::Sender<()>,
    },

    Status {
        respond_to: oneshot::Sender<CoordinatorStatus>,
    },

    /// Stop the actor, releasing the focus
    Shutdown,
}

/// Lifecycle of the focused hive's live feed
///
/// ```text
/// Idle → Subscribing → Active → Unsubscribing → Idle
///            └────────────┴──→ Error → Active (polling) | Idle
/// ```
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FocusState {
    #[default]
    Idle,
    Subscribing,
    Active,
    Unsubscribing,
    Error,
}

/// Snapshot of the coordinator, answered by `status()`
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CoordinatorStatus {
    pub state: FocusState,
    pub hive_id: Option<HiveId>,
    pub node_id: Option<NodeId>,
    pub live_mode: LiveMode,
    pub token: u64,
    /// Last feed failure, kept after falling back to polling or idle
    pub last_error: Option<String>,
}

/// Recomputed view after an accepted live event
#[derive(Debug, Clone, Serialize)]
pub struct ViewUpdate {
    pub token: u64,
    pub hive_id: HiveId,
    pub view: ViewModel,
}

/// Event forwarded from a feed or poll task
#[derive(Debug)]
pub(crate) struct FeedMessage {
    pub token: u64,
    pub event: FeedEvent,
}

#[derive(Debug)]
pub(crate) enum FeedEvent {
    /// Push feed established
    Subscribed,

    Reading(Reading),

    /// Retry budget exhausted
    Failed(TelemetryError),

    /// Push feed closed by the store
    Ended,
}
