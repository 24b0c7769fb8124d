//! Graph adjacency index.
//!
//! Two parallel maps give O(1) neighbor enumeration per endpoint and verb
//! tag; a global per-verb counter backs the statistics surface. Duplicate
//! (source, target, verb) triples collapse to the existing edge.

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use synapse_core::{Result, SynapseError, SynapseId, VerbType};
use tracing::debug;

/// Outcome of an edge insert.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EdgeInsert {
    /// New edge registered under this id
    Inserted(SynapseId),
    /// The (source, target, verb) triple already exists under this id
    Existing(SynapseId),
}

impl EdgeInsert {
    pub fn edge_id(&self) -> SynapseId {
        match self {
            EdgeInsert::Inserted(id) | EdgeInsert::Existing(id) => *id,
        }
    }

    pub fn is_new(&self) -> bool {
        matches!(self, EdgeInsert::Inserted(_))
    }
}

/// One direction of the adjacency: endpoint -> verb -> (other endpoint -> edge id).
type AdjacencyMap = DashMap<SynapseId, HashMap<VerbType, BTreeMap<SynapseId, SynapseId>>>;

/// Forward/reverse adjacency with verb counts.
#[derive(Debug, Default)]
pub struct GraphIndex {
    forward: AdjacencyMap,
    reverse: AdjacencyMap,
    counts: DashMap<VerbType, u64>,
}

/// An enumerated neighbor entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Neighbor {
    pub verb: VerbType,
    /// The other endpoint
    pub entity: SynapseId,
    pub edge: SynapseId,
}

impl GraphIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an edge. Duplicate triples return the existing edge id and
    /// leave counts untouched; dedup is serialized per source id by the
    /// forward entry lock.
    pub fn insert(
        &self,
        edge: SynapseId,
        source: SynapseId,
        target: SynapseId,
        verb: VerbType,
    ) -> EdgeInsert {
        let mut entry = self.forward.entry(source).or_default();
        let targets = entry.entry(verb).or_default();
        if let Some(existing) = targets.get(&target) {
            debug!(%source, %target, %verb, edge = %existing, "duplicate triple");
            return EdgeInsert::Existing(*existing);
        }
        targets.insert(target, edge);
        drop(entry);

        self.reverse
            .entry(target)
            .or_default()
            .entry(verb)
            .or_default()
            .insert(source, edge);
        *self.counts.entry(verb).or_insert(0) += 1;
        EdgeInsert::Inserted(edge)
    }

    /// Look up the edge id for an exact triple.
    pub fn edge_for(
        &self,
        source: SynapseId,
        target: SynapseId,
        verb: VerbType,
    ) -> Option<SynapseId> {
        self.forward
            .get(&source)?
            .get(&verb)?
            .get(&target)
            .copied()
    }

    /// Outgoing neighbors, optionally restricted to one verb.
    pub fn out(&self, id: SynapseId, verb: Option<VerbType>) -> Vec<Neighbor> {
        Self::collect(&self.forward, id, verb)
    }

    /// Incoming neighbors, optionally restricted to one verb.
    pub fn incoming(&self, id: SynapseId, verb: Option<VerbType>) -> Vec<Neighbor> {
        Self::collect(&self.reverse, id, verb)
    }

    /// All incident edges, both directions.
    pub fn any(&self, id: SynapseId) -> Vec<Neighbor> {
        let mut out = self.out(id, None);
        out.extend(self.incoming(id, None));
        out
    }

    /// Number of live edges carrying this verb.
    pub fn verb_count(&self, verb: VerbType) -> u64 {
        self.counts.get(&verb).map(|c| *c).unwrap_or(0)
    }

    /// All verb counts, for statistics.
    pub fn verb_counts(&self) -> BTreeMap<VerbType, u64> {
        self.counts.iter().map(|e| (*e.key(), *e.value())).collect()
    }

    /// Remove a single edge by its triple.
    pub fn remove_edge(
        &self,
        source: SynapseId,
        target: SynapseId,
        verb: VerbType,
    ) -> Result<SynapseId> {
        let edge = {
            let mut entry = self
                .forward
                .get_mut(&source)
                .ok_or_else(|| SynapseError::not_found(source.to_string()))?;
            let targets = entry
                .get_mut(&verb)
                .ok_or_else(|| SynapseError::not_found(target.to_string()))?;
            let edge = targets
                .remove(&target)
                .ok_or_else(|| SynapseError::not_found(target.to_string()))?;
            if targets.is_empty() {
                entry.remove(&verb);
            }
            edge
        };

        if let Some(mut entry) = self.reverse.get_mut(&target) {
            if let Some(sources) = entry.get_mut(&verb) {
                sources.remove(&source);
                if sources.is_empty() {
                    entry.remove(&verb);
                }
            }
        }
        self.decrement(verb, 1);
        Ok(edge)
    }

    /// Remove an entity and every incident edge; returns the removed edges.
    pub fn remove_entity(&self, id: SynapseId) -> Vec<(SynapseId, SynapseId, SynapseId, VerbType)> {
        let mut removed = Vec::new();

        if let Some((_, verbs)) = self.forward.remove(&id) {
            for (verb, targets) in verbs {
                for (target, edge) in targets {
                    if let Some(mut entry) = self.reverse.get_mut(&target) {
                        if let Some(sources) = entry.get_mut(&verb) {
                            sources.remove(&id);
                            if sources.is_empty() {
                                entry.remove(&verb);
                            }
                        }
                    }
                    self.decrement(verb, 1);
                    removed.push((edge, id, target, verb));
                }
            }
        }

        if let Some((_, verbs)) = self.reverse.remove(&id) {
            for (verb, sources) in verbs {
                for (source, edge) in sources {
                    if let Some(mut entry) = self.forward.get_mut(&source) {
                        if let Some(targets) = entry.get_mut(&verb) {
                            targets.remove(&id);
                            if targets.is_empty() {
                                entry.remove(&verb);
                            }
                        }
                    }
                    self.decrement(verb, 1);
                    removed.push((edge, source, id, verb));
                }
            }
        }

        removed
    }

    /// Total number of live edges.
    pub fn edge_count(&self) -> u64 {
        self.counts.iter().map(|e| *e.value()).sum()
    }

    fn decrement(&self, verb: VerbType, by: u64) {
        if let Some(mut count) = self.counts.get_mut(&verb) {
            *count = count.saturating_sub(by);
        }
    }

    fn collect(map: &AdjacencyMap, id: SynapseId, verb: Option<VerbType>) -> Vec<Neighbor> {
        let Some(entry) = map.get(&id) else {
            return Vec::new();
        };
        let mut out = Vec::new();
        for (tag, others) in entry.iter() {
            if verb.is_some_and(|v| v != *tag) {
                continue;
            }
            for (entity, edge) in others {
                out.push(Neighbor {
                    verb: *tag,
                    entity: *entity,
                    edge: *edge,
                });
            }
        }
        out
    }

    /// Serialize to the `graph-adjacency.json` singleton shape.
    pub fn snapshot(&self) -> GraphSnapshot {
        GraphSnapshot {
            forward: Self::side_snapshot(&self.forward),
            reverse: Self::side_snapshot(&self.reverse),
            verb_counts: self
                .counts
                .iter()
                .map(|e| (e.key().as_str().to_string(), *e.value()))
                .collect(),
        }
    }

    fn side_snapshot(map: &AdjacencyMap) -> BTreeMap<String, BTreeMap<String, BTreeMap<String, SynapseId>>> {
        map.iter()
            .map(|entry| {
                let verbs = entry
                    .value()
                    .iter()
                    .map(|(verb, others)| {
                        (
                            verb.as_str().to_string(),
                            others
                                .iter()
                                .map(|(other, edge)| (other.to_string(), *edge))
                                .collect(),
                        )
                    })
                    .collect();
                (entry.key().to_string(), verbs)
            })
            .collect()
    }

    /// Restore from a persisted snapshot.
    pub fn restore(snapshot: GraphSnapshot) -> Result<Self> {
        let index = Self::new();
        index.load_snapshot(snapshot)?;
        Ok(index)
    }

    /// Replace contents with a persisted snapshot in place.
    pub fn load_snapshot(&self, snapshot: GraphSnapshot) -> Result<()> {
        self.forward.clear();
        self.reverse.clear();
        self.counts.clear();
        for (source, verbs) in &snapshot.forward {
            let source = SynapseId::parse(source)
                .map_err(|e| SynapseError::internal(format!("bad adjacency id: {e}")))?;
            for (verb, targets) in verbs {
                let verb = VerbType::parse(verb)?;
                for (target, edge) in targets {
                    let target = SynapseId::parse(target)
                        .map_err(|e| SynapseError::internal(format!("bad adjacency id: {e}")))?;
                    self.insert(*edge, source, target, verb);
                }
            }
        }
        Ok(())
    }
}

/// Persisted shape of `graph-adjacency.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphSnapshot {
    pub forward: BTreeMap<String, BTreeMap<String, BTreeMap<String, SynapseId>>>,
    pub reverse: BTreeMap<String, BTreeMap<String, BTreeMap<String, SynapseId>>>,
    #[serde(rename = "verbCounts")]
    pub verb_counts: BTreeMap<String, u64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_duplicate_triple_returns_existing() {
        let graph = GraphIndex::new();
        let (a, b) = (SynapseId::new(), SynapseId::new());

        let first = graph.insert(SynapseId::new(), a, b, VerbType::CreatedBy);
        assert!(first.is_new());

        let second = graph.insert(SynapseId::new(), a, b, VerbType::CreatedBy);
        assert!(!second.is_new());
        assert_eq!(second.edge_id(), first.edge_id());
        assert_eq!(graph.verb_count(VerbType::CreatedBy), 1);
    }

    #[test]
    fn test_forward_and_reverse_entries() {
        let graph = GraphIndex::new();
        let (a, b) = (SynapseId::new(), SynapseId::new());
        let edge = SynapseId::new();
        graph.insert(edge, a, b, VerbType::PartOf);

        let out = graph.out(a, Some(VerbType::PartOf));
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].entity, b);

        let incoming = graph.incoming(b, None);
        assert_eq!(incoming.len(), 1);
        assert_eq!(incoming[0].edge, edge);

        assert!(graph.out(b, None).is_empty());
        assert_eq!(graph.any(a).len(), 1);
    }

    #[test]
    fn test_remove_entity_drops_incident_edges() {
        let graph = GraphIndex::new();
        let (a, b, c) = (SynapseId::new(), SynapseId::new(), SynapseId::new());
        graph.insert(SynapseId::new(), a, b, VerbType::Knows);
        graph.insert(SynapseId::new(), c, a, VerbType::Knows);

        let removed = graph.remove_entity(a);
        assert_eq!(removed.len(), 2);
        assert_eq!(graph.verb_count(VerbType::Knows), 0);
        assert!(graph.out(a, None).is_empty());
        assert!(graph.incoming(a, None).is_empty());
        assert!(graph.out(c, None).is_empty());
        assert!(graph.incoming(b, None).is_empty());
    }

    #[test]
    fn test_snapshot_roundtrip() {
        let graph = GraphIndex::new();
        let (a, b) = (SynapseId::new(), SynapseId::new());
        let edge = SynapseId::new();
        graph.insert(edge, a, b, VerbType::LocatedIn);

        let snapshot = graph.snapshot();
        let json = serde_json::to_string(&snapshot).unwrap();
        let restored = GraphIndex::restore(serde_json::from_str(&json).unwrap()).unwrap();

        assert_eq!(restored.verb_count(VerbType::LocatedIn), 1);
        assert_eq!(restored.edge_for(a, b, VerbType::LocatedIn), Some(edge));
    }

    #[test]
    fn test_remove_edge() {
        let graph = GraphIndex::new();
        let (a, b) = (SynapseId::new(), SynapseId::new());
        let edge = SynapseId::new();
        graph.insert(edge, a, b, VerbType::Uses);

        assert_eq!(graph.remove_edge(a, b, VerbType::Uses).unwrap(), edge);
        assert_eq!(graph.verb_count(VerbType::Uses), 0);
        assert!(graph.remove_edge(a, b, VerbType::Uses).is_err());
    }
}
