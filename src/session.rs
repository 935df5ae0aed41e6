//! Dashboard session: the explicit selection context
//!
//! Holds what the user is looking at (selection and time range), reloads
//! through the query façade whenever either changes, and keeps the live
//! coordinator focused on the selected hive.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::broadcast;
use tracing::{debug, info};

use crate::config::Config;
use crate::coordinator::{CoordinatorHandle, ViewUpdate};
use crate::error::{TelemetryError, TelemetryResult};
use crate::query::{LoadedView, QueryFacade, Selection};
use crate::resolver::EntityGraph;
use crate::store::TelemetryStore;
use crate::view::ViewModel;
use crate::window::Sample;
use crate::{ApiaryId, HiveId, Metric, TimeRange};

/// Points of one window, as handed to an exporter
#[derive(Debug, Clone, Serialize)]
pub struct SeriesExport {
    pub hive_id: HiveId,
    pub metric: Metric,
    pub points: Vec<Sample>,
}

/// Everything an exporter needs to render the current view
#[derive(Debug, Clone, Serialize)]
pub struct ViewExport {
    pub selection: Selection,
    pub range: TimeRange,
    pub exported_at: DateTime<Utc>,
    pub view: ViewModel,
    pub series: Vec<SeriesExport>,
}

pub struct DashboardSession {
    facade: QueryFacade,
    coordinator: CoordinatorHandle,
    selection: Selection,
    range: TimeRange,
    current: Option<LoadedView>,
}

impl DashboardSession {
    /// Start a session with an idle coordinator and the default 24h range
    pub fn new(store: Arc<dyn TelemetryStore>, config: Config) -> Self {
        let coordinator = CoordinatorHandle::spawn(store.clone(), EntityGraph::default(), &config);

        Self {
            facade: QueryFacade::new(store, Arc::new(config)),
            coordinator,
            selection: Selection::All,
            range: TimeRange::preset("24h"),
            current: None,
        }
    }

    pub async fn select_apiary(&mut self, apiary_id: impl Into<ApiaryId>) -> TelemetryResult<&ViewModel> {
        self.apply(Selection::Apiary(apiary_id.into()), self.range).await
    }

    pub async fn select_hive(&mut self, hive_id: impl Into<HiveId>) -> TelemetryResult<&ViewModel> {
        self.apply(Selection::Hive(hive_id.into()), self.range).await
    }

    /// Reload the current selection over a new range
    pub async fn set_time_range(&mut self, range: TimeRange) -> TelemetryResult<&ViewModel> {
        self.apply(self.selection.clone(), range).await
    }

    /// The last loaded view with its window contents.
    ///
    /// Live updates are delivered separately through [`DashboardSession::updates`].
    pub fn export_current_view(&self) -> TelemetryResult<ViewExport> {
        let loaded = self
            .current
            .as_ref()
            .ok_or_else(|| TelemetryError::NotFound("no view loaded".to_string()))?;

        let series = loaded
            .view
            .hives
            .iter()
            .flat_map(|hive| {
                Metric::ALL.into_iter().map(|metric| SeriesExport {
                    hive_id: hive.hive_id.clone(),
                    metric,
                    points: loaded.windows.points(&hive.hive_id, metric),
                })
            })
            .filter(|series| !series.points.is_empty())
            .collect();

        Ok(ViewExport {
            selection: self.selection.clone(),
            range: self.range,
            exported_at: Utc::now(),
            view: loaded.view.clone(),
            series,
        })
    }

    pub fn updates(&self) -> broadcast::Receiver<ViewUpdate> {
        self.coordinator.subscribe_updates()
    }

    pub fn coordinator(&self) -> &CoordinatorHandle {
        &self.coordinator
    }

    pub fn selection(&self) -> &Selection {
        &self.selection
    }

    pub fn range(&self) -> TimeRange {
        self.range
    }

    pub fn current_view(&self) -> Option<&ViewModel> {
        self.current.as_ref().map(|loaded| &loaded.view)
    }

    pub async fn close(self) -> TelemetryResult<()> {
        self.coordinator.shutdown().await
    }

    /// Load a selection and hand the result to the coordinator.
    ///
    /// On error the previous selection and view stay in place.
    async fn apply(&mut self, selection: Selection, range: TimeRange) -> TelemetryResult<&ViewModel> {
        debug!("loading {selection:?} over {} .. {}", range.start, range.end);
        let mut loaded = self.facade.load_view(&selection, range).await?;

        self.coordinator.update_graph(loaded.entities.clone()).await?;

        match &selection {
            Selection::Hive(hive_id) => {
                match self.coordinator.focus(hive_id.clone()).await {
                    Ok(token) => {
                        info!("live updates for hive {hive_id} under token {token}");
                        self.coordinator.seed(hive_id.clone(), loaded.windows.clone()).await?;
                        loaded.view.live_mode = self.coordinator.status().await?.live_mode;
                    }
                    // hive without a sensor node: snapshot only
                    Err(TelemetryError::NotFound(what)) => {
                        debug!("no live updates: {what} not found");
                        self.coordinator.unfocus().await?;
                    }
                    Err(err) => return Err(err),
                }
            }
            Selection::Apiary(_) | Selection::All => self.coordinator.unfocus().await?,
        }

        self.selection = selection;
        self.range = range;
        Ok(&self.current.insert(loaded).view)
    }
}
