//! Engine statistics and per-service accounting.
//!
//! Writes carry an optional service tag; the registry aggregates activity
//! per tag for the `list_services` surface.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use synapse_index::CacheStats;

/// Operation counters for one service.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct OperationCounts {
    pub adds: u64,
    pub updates: u64,
    pub deletes: u64,
}

/// Aggregated activity for one service tag.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceStats {
    pub name: String,
    #[serde(rename = "totalNouns")]
    pub total_nouns: u64,
    #[serde(rename = "totalVerbs")]
    pub total_verbs: u64,
    #[serde(rename = "firstActivity")]
    pub first_activity: DateTime<Utc>,
    #[serde(rename = "lastActivity")]
    pub last_activity: DateTime<Utc>,
    pub operations: OperationCounts,
    #[serde(rename = "errorCount")]
    pub error_count: u64,
    /// active, inactive, or read-only
    pub status: String,
}

/// Engine-wide statistics snapshot (`stats()` and `statistics.json`).
#[derive(Debug, Clone, Serialize)]
pub struct EngineStats {
    #[serde(rename = "nounCount")]
    pub noun_count: usize,
    #[serde(rename = "verbCount")]
    pub verb_count: u64,
    #[serde(rename = "nounTypes")]
    pub noun_types: BTreeMap<String, usize>,
    #[serde(rename = "verbTypes")]
    pub verb_types: BTreeMap<String, u64>,
    pub services: Vec<ServiceStats>,
    pub cache: CacheStats,
    #[serde(rename = "lastFlush")]
    pub last_flush: Option<DateTime<Utc>>,
    #[serde(rename = "lastRefresh")]
    pub last_refresh: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
struct ServiceEntry {
    total_nouns: u64,
    total_verbs: u64,
    first_activity: DateTime<Utc>,
    last_activity: DateTime<Utc>,
    operations: OperationCounts,
    error_count: u64,
}

impl ServiceEntry {
    fn new(now: DateTime<Utc>) -> Self {
        Self {
            total_nouns: 0,
            total_verbs: 0,
            first_activity: now,
            last_activity: now,
            operations: OperationCounts::default(),
            error_count: 0,
        }
    }
}

/// Mutable statistics registry owned by the engine.
#[derive(Debug, Default)]
pub struct StatsRegistry {
    services: DashMap<String, ServiceEntry>,
    last_flush: RwLock<Option<DateTime<Utc>>>,
    last_refresh: RwLock<Option<DateTime<Utc>>>,
}

/// How long a service can be quiet before it reads as inactive.
const INACTIVE_AFTER_SECS: i64 = 3600;

impl StatsRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn touch(&self, service: &str) -> dashmap::mapref::one::RefMut<'_, String, ServiceEntry> {
        let now = Utc::now();
        let mut entry = self
            .services
            .entry(service.to_string())
            .or_insert_with(|| ServiceEntry::new(now));
        entry.last_activity = now;
        entry
    }

    pub fn record_add(&self, service: &str) {
        let mut entry = self.touch(service);
        entry.total_nouns += 1;
        entry.operations.adds += 1;
    }

    pub fn record_update(&self, service: &str) {
        self.touch(service).operations.updates += 1;
    }

    pub fn record_delete(&self, service: &str) {
        let mut entry = self.touch(service);
        entry.total_nouns = entry.total_nouns.saturating_sub(1);
        entry.operations.deletes += 1;
    }

    pub fn record_verb(&self, service: &str) {
        self.touch(service).total_verbs += 1;
    }

    pub fn record_error(&self, service: &str) {
        self.touch(service).error_count += 1;
    }

    pub fn mark_flush(&self) {
        *self.last_flush.write() = Some(Utc::now());
    }

    pub fn last_flush(&self) -> Option<DateTime<Utc>> {
        *self.last_flush.read()
    }

    pub fn mark_refresh(&self) {
        *self.last_refresh.write() = Some(Utc::now());
    }

    pub fn last_refresh(&self) -> Option<DateTime<Utc>> {
        *self.last_refresh.read()
    }

    /// Snapshot per-service statistics.
    pub fn services(&self, read_only: bool) -> Vec<ServiceStats> {
        let now = Utc::now();
        let mut out: Vec<ServiceStats> = self
            .services
            .iter()
            .map(|entry| {
                let service = entry.value();
                let status = if read_only {
                    "read-only"
                } else if (now - service.last_activity).num_seconds() > INACTIVE_AFTER_SECS {
                    "inactive"
                } else {
                    "active"
                };
                ServiceStats {
                    name: entry.key().clone(),
                    total_nouns: service.total_nouns,
                    total_verbs: service.total_verbs,
                    first_activity: service.first_activity,
                    last_activity: service.last_activity,
                    operations: service.operations,
                    error_count: service.error_count,
                    status: status.to_string(),
                }
            })
            .collect();
        out.sort_by(|a, b| a.name.cmp(&b.name));
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_service_accounting() {
        let stats = StatsRegistry::new();
        stats.record_add("importer");
        stats.record_add("importer");
        stats.record_verb("importer");
        stats.record_delete("importer");
        stats.record_error("importer");

        let services = stats.services(false);
        assert_eq!(services.len(), 1);
        let svc = &services[0];
        assert_eq!(svc.total_nouns, 1);
        assert_eq!(svc.total_verbs, 1);
        assert_eq!(svc.operations.adds, 2);
        assert_eq!(svc.operations.deletes, 1);
        assert_eq!(svc.error_count, 1);
        assert_eq!(svc.status, "active");
    }

    #[test]
    fn test_read_only_status() {
        let stats = StatsRegistry::new();
        stats.record_add("svc");
        assert_eq!(stats.services(true)[0].status, "read-only");
    }

    #[test]
    fn test_flush_and_refresh_marks() {
        let stats = StatsRegistry::new();
        assert!(stats.last_flush().is_none());
        stats.mark_flush();
        assert!(stats.last_flush().is_some());
        stats.mark_refresh();
        assert!(stats.last_refresh().is_some());
    }
}
