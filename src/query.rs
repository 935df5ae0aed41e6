//! Query façade: one consistent snapshot per selection and time range
//!
//! ```text
//! list_apiaries → list_hives → EntityGraph → pick hives → query_readings per node → seed windows → view
//! ```
//!
//! Nothing shared is touched while loading; the result is applied to the live
//! coordinator separately through its `seed` command.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use tracing::{debug, instrument};

use crate::config::Config;
use crate::error::{TelemetryError, TelemetryResult};
use crate::resolver::{EntityGraph, EntitySnapshot};
use crate::store::{BackingStore, ReadingQuery, StoreError, TelemetryStore};
use crate::view::{ApiaryRef, LiveMode, ViewBuilder, ViewModel};
use crate::window::WindowStore;
use crate::{ApiaryId, Hive, HiveId, Reading, TimeRange};

/// What the dashboard is looking at
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "id", rename_all = "lowercase")]
pub enum Selection {
    #[default]
    All,
    Apiary(ApiaryId),
    Hive(HiveId),
}

/// Result of one historical load
#[derive(Debug, Clone)]
pub struct LoadedView {
    pub entities: EntityGraph,
    pub windows: WindowStore,
    pub degraded: bool,
    pub view: ViewModel,
}

pub struct QueryFacade {
    store: Arc<dyn TelemetryStore>,
    config: Arc<Config>,
}

impl QueryFacade {
    pub fn new(store: Arc<dyn TelemetryStore>, config: Arc<Config>) -> Self {
        Self { store, config }
    }

    /// Fetch entities and build a fresh entity graph
    pub async fn load_entities(&self) -> TelemetryResult<EntityGraph> {
        let mut attempted = Vec::new();
        self.load_graph(&mut attempted).await
    }

    async fn load_graph(&self, attempted: &mut Vec<String>) -> TelemetryResult<EntityGraph> {
        let owner = self.config.owner_id.as_deref();

        attempted.push(format!("list_apiaries(owner={})", owner.unwrap_or("*")));
        let apiaries = self
            .store
            .list_apiaries(owner)
            .await
            .map_err(|source| store_error(attempted.as_slice(), source))?;

        attempted.push("list_hives".to_string());
        let hives = self
            .store
            .list_hives()
            .await
            .map_err(|source| store_error(attempted.as_slice(), source))?;

        Ok(EntityGraph::build(
            EntitySnapshot::new(apiaries, hives),
            &self.config.resolver,
        ))
    }

    #[instrument(skip(self))]
    pub async fn load_view(
        &self,
        selection: &Selection,
        range: TimeRange,
    ) -> TelemetryResult<LoadedView> {
        let mut attempted = Vec::new();
        let graph = self.load_graph(&mut attempted).await?;

        let (hives, apiary, degraded) = select_hives(&graph, selection)?;
        debug!(
            "selected {} hives for {selection:?} (degraded: {degraded})",
            hives.len()
        );

        let mut windows = WindowStore::with_capacity(self.config.windows.historical_capacity);
        let mut latest: HashMap<HiveId, Reading> = HashMap::new();

        for hive in &hives {
            if hive.node_id.is_none() {
                continue;
            }
            let node_id = graph.node_of(&hive.id)?;

            attempted.push(format!("query_readings(node={node_id})"));
            let readings = self
                .store
                .query_readings(ReadingQuery {
                    node_id,
                    range,
                    limit: Some(self.config.windows.historical_capacity),
                })
                .await
                .map_err(|source| store_error(&attempted, source))?;

            windows.seed_readings(&hive.id, &readings);
            if let Some(reading) = readings.last() {
                latest.insert(hive.id.clone(), reading.clone());
            }
        }

        let now = Utc::now();
        let builder = ViewBuilder::new(&self.config.bands, &self.config.safe_bands);
        let overview = matches!(selection, Selection::Apiary(_))
            .then(|| builder.apiary(&hives, &windows));
        let view = ViewModel {
            apiary,
            overview,
            hives: hives
                .iter()
                .map(|hive| builder.hive(hive, &windows, latest.get(&hive.id), now))
                .collect(),
            degraded,
            live_mode: LiveMode::Idle,
            generated_at: now,
        };

        Ok(LoadedView {
            entities: graph,
            windows,
            degraded,
            view,
        })
    }
}

fn store_error(attempted: &[String], source: StoreError) -> TelemetryError {
    TelemetryError::Store {
        attempted: attempted.to_vec(),
        source,
    }
}

/// Hives to load for a selection, the apiary they belong to and the degraded flag
fn select_hives<'a>(
    graph: &'a EntityGraph,
    selection: &Selection,
) -> TelemetryResult<(Vec<&'a Hive>, Option<ApiaryRef>, bool)> {
    match selection {
        Selection::All => Ok((graph.hives().iter().collect(), None, false)),

        Selection::Apiary(apiary_id) => {
            let apiary = graph
                .apiary(apiary_id)
                .ok_or_else(|| TelemetryError::NotFound(format!("apiary {apiary_id}")))?;
            let selection = graph.hives_for_apiary(apiary_id);
            Ok((selection.hives, Some(ApiaryRef::from(apiary)), selection.degraded))
        }

        Selection::Hive(hive_id) => {
            let hive = graph
                .hive(hive_id)
                .ok_or_else(|| TelemetryError::NotFound(format!("hive {hive_id}")))?;
            let apiary = graph
                .apiary_of(hive_id)
                .map(|(apiary, _)| ApiaryRef::from(apiary));
            Ok((vec![hive], apiary, false))
        }
    }
}
