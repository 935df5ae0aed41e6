//! Entity graph resolution: node → hive → apiary
//!
//! Hive records reference their apiary inconsistently. Depending on which form
//! or import created them the reference sits in the canonical column, in one of
//! several alias columns, or inside an embedded apiary object. The resolver
//! tries these in a fixed order:
//!
//! ```text
//! 1. Canonical   apiary_id = "a-1"
//! 2. Alias       apiary = "a-1", apiaryId = "a-1", ...   (configured order)
//! 3. Embedded    apiary = { "id": "a-1", ... }           (configured order)
//! 4. Degraded    apiary filter given but no hive links anywhere → all hives
//! ```
//!
//! A rule only matches when the referenced apiary exists in the snapshot, so
//! deleting an apiary drops its hives from resolution. Node → hive matching is
//! exact; a node claimed by two hives is reported, never picked.

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};
use tracing::{debug, trace, warn};

use crate::error::{TelemetryError, TelemetryResult};
use crate::{Apiary, ApiaryId, Hive, HiveId, NodeId, id_from_value};

/// Ordered field names the resolver inspects for an apiary reference
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct AliasTable {
    /// Canonical apiary reference column
    #[serde(default = "default_canonical")]
    pub canonical: String,

    /// Alias columns carrying a scalar apiary id, tried in order
    #[serde(default = "default_aliases")]
    pub aliases: Vec<String>,

    /// Columns carrying an embedded apiary object with an `id`, tried in order
    #[serde(default = "default_embedded")]
    pub embedded: Vec<String>,
}

fn default_canonical() -> String {
    "apiary_id".to_string()
}

fn default_aliases() -> Vec<String> {
    vec![
        "apiary".to_string(),
        "apiaryId".to_string(),
        "apiary_ref".to_string(),
    ]
}

fn default_embedded() -> Vec<String> {
    vec!["apiary".to_string(), "apiaries".to_string()]
}

impl Default for AliasTable {
    fn default() -> Self {
        Self {
            canonical: default_canonical(),
            aliases: default_aliases(),
            embedded: default_embedded(),
        }
    }
}

/// Which rule of the fallback chain linked a hive to its apiary
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "rule", content = "field", rename_all = "lowercase")]
pub enum LinkRule {
    Canonical,
    Alias(String),
    Embedded(String),
}

impl LinkRule {
    /// Whether the link came from a field other than the canonical one
    pub fn is_fallback(&self) -> bool {
        !matches!(self, LinkRule::Canonical)
    }
}

/// Resolved node → hive → apiary link
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResolvedLink {
    pub node_id: NodeId,
    pub hive_id: HiveId,
    pub apiary_id: ApiaryId,
    pub rule: LinkRule,
}

/// Hives selected for an apiary filter
#[derive(Debug, Clone)]
pub struct HiveSelection<'a> {
    pub hives: Vec<&'a Hive>,

    /// Set when no hive carried a usable apiary reference and all hives were returned
    pub degraded: bool,
}

/// Current apiaries and hives, as fetched from the backing store
#[derive(Debug, Clone, Default)]
pub struct EntitySnapshot {
    pub apiaries: Vec<Apiary>,
    pub hives: Vec<Hive>,
}

impl EntitySnapshot {
    pub fn new(apiaries: Vec<Apiary>, hives: Vec<Hive>) -> Self {
        Self { apiaries, hives }
    }
}

/// In-memory index over one entity snapshot.
///
/// Rebuild it with [`EntityGraph::build`] whenever apiaries or hives change.
#[derive(Debug, Clone, Default)]
pub struct EntityGraph {
    apiaries: BTreeMap<ApiaryId, Apiary>,
    hives: Vec<Hive>,

    /// hive id → (apiary id, rule) for hives with a resolvable reference
    hive_apiary: HashMap<HiveId, (ApiaryId, LinkRule)>,

    /// node id → every hive claiming it
    node_hives: HashMap<NodeId, Vec<HiveId>>,
}

impl EntityGraph {
    pub fn build(snapshot: EntitySnapshot, aliases: &AliasTable) -> Self {
        let apiaries: BTreeMap<ApiaryId, Apiary> = snapshot
            .apiaries
            .into_iter()
            .map(|apiary| (apiary.id.clone(), apiary))
            .collect();

        let mut hive_apiary = HashMap::new();
        let mut node_hives: HashMap<NodeId, Vec<HiveId>> = HashMap::new();

        for hive in &snapshot.hives {
            match apiary_reference(hive, aliases, &apiaries) {
                Some((apiary_id, rule)) => {
                    trace!("hive {} → apiary {apiary_id} via {rule:?}", hive.id);
                    hive_apiary.insert(hive.id.clone(), (apiary_id, rule));
                }
                None => trace!("hive {} has no resolvable apiary reference", hive.id),
            }

            if let Some(node_id) = &hive.node_id {
                node_hives
                    .entry(node_id.clone())
                    .or_default()
                    .push(hive.id.clone());
            }
        }

        for (node_id, hive_ids) in &node_hives {
            if hive_ids.len() > 1 {
                warn!("node {node_id} is claimed by {} hives: {hive_ids:?}", hive_ids.len());
            }
        }

        debug!(
            "built entity graph: {} apiaries, {} hives, {} linked, {} nodes",
            apiaries.len(),
            snapshot.hives.len(),
            hive_apiary.len(),
            node_hives.len()
        );

        Self {
            apiaries,
            hives: snapshot.hives,
            hive_apiary,
            node_hives,
        }
    }

    /// Resolve a sensor node to its hive and apiary
    pub fn resolve(&self, node_id: &str) -> TelemetryResult<ResolvedLink> {
        let hive_ids = self
            .node_hives
            .get(node_id)
            .ok_or_else(|| TelemetryError::NotFound(format!("node {node_id}")))?;

        let [hive_id] = hive_ids.as_slice() else {
            return Err(TelemetryError::AmbiguousNode {
                node_id: node_id.to_string(),
                hive_ids: hive_ids.clone(),
            });
        };

        let (apiary_id, rule) = self.hive_apiary.get(hive_id).ok_or_else(|| {
            TelemetryError::NotFound(format!("apiary of hive {hive_id} (node {node_id})"))
        })?;

        Ok(ResolvedLink {
            node_id: node_id.to_string(),
            hive_id: hive_id.clone(),
            apiary_id: apiary_id.clone(),
            rule: rule.clone(),
        })
    }

    /// The node of a hive, checked for uniqueness across hives
    pub fn node_of(&self, hive_id: &str) -> TelemetryResult<NodeId> {
        let hive = self
            .hive(hive_id)
            .ok_or_else(|| TelemetryError::NotFound(format!("hive {hive_id}")))?;
        let node_id = hive
            .node_id
            .clone()
            .ok_or_else(|| TelemetryError::NotFound(format!("sensor node of hive {hive_id}")))?;

        match self.node_hives.get(&node_id) {
            Some(hive_ids) if hive_ids.len() > 1 => Err(TelemetryError::AmbiguousNode {
                node_id,
                hive_ids: hive_ids.clone(),
            }),
            _ => Ok(node_id),
        }
    }

    /// Hives linked to the given apiary.
    ///
    /// If not a single hive in the snapshot carries a resolvable apiary
    /// reference, every hive is returned and the selection is marked degraded:
    /// showing too much beats showing nothing.
    pub fn hives_for_apiary(&self, apiary_id: &str) -> HiveSelection<'_> {
        if self.hive_apiary.is_empty() && !self.hives.is_empty() {
            warn!("no hive references an apiary, returning all hives for apiary {apiary_id}");
            return HiveSelection {
                hives: self.hives.iter().collect(),
                degraded: true,
            };
        }

        HiveSelection {
            hives: self
                .hives
                .iter()
                .filter(|hive| {
                    self.hive_apiary
                        .get(&hive.id)
                        .is_some_and(|(linked, _)| linked == apiary_id)
                })
                .collect(),
            degraded: false,
        }
    }

    pub fn apiary(&self, apiary_id: &str) -> Option<&Apiary> {
        self.apiaries.get(apiary_id)
    }

    pub fn apiaries(&self) -> impl Iterator<Item = &Apiary> {
        self.apiaries.values()
    }

    pub fn hive(&self, hive_id: &str) -> Option<&Hive> {
        self.hives.iter().find(|hive| hive.id == hive_id)
    }

    pub fn hives(&self) -> &[Hive] {
        &self.hives
    }

    /// Apiary a hive is linked to, and the rule that linked it
    pub fn apiary_of(&self, hive_id: &str) -> Option<(&Apiary, &LinkRule)> {
        let (apiary_id, rule) = self.hive_apiary.get(hive_id)?;
        self.apiaries.get(apiary_id).map(|apiary| (apiary, rule))
    }
}

/// Walk the fallback chain for one hive
fn apiary_reference(
    hive: &Hive,
    aliases: &AliasTable,
    apiaries: &BTreeMap<ApiaryId, Apiary>,
) -> Option<(ApiaryId, LinkRule)> {
    let known = |id: Option<String>| id.filter(|id| apiaries.contains_key(id));

    if let Some(id) = known(hive.field(&aliases.canonical).and_then(id_from_value)) {
        return Some((id, LinkRule::Canonical));
    }

    for alias in &aliases.aliases {
        if let Some(id) = known(hive.field(alias).and_then(id_from_value)) {
            return Some((id, LinkRule::Alias(alias.clone())));
        }
    }

    for field in &aliases.embedded {
        let embedded_id = hive
            .field(field)
            .and_then(|value| value.as_object())
            .and_then(|object| object.get("id"))
            .and_then(id_from_value);
        if let Some(id) = known(embedded_id) {
            return Some((id, LinkRule::Embedded(field.clone())));
        }
    }

    None
}
