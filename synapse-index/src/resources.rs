//! Resource-aware cache sizing and memory-pressure sampling.
//!
//! Available memory is probed from cgroup v2, then cgroup v1, then the
//! host. Allocation ratios depend on the deployment environment, with a
//! fixed reservation for the embedding model and logarithmic damping on
//! very large hosts.

use parking_lot::RwLock;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use synapse_core::config::Environment;
use sysinfo::System;
use tracing::{debug, info, warn};

const CGROUP_V2_MAX: &str = "/sys/fs/cgroup/memory.max";
const CGROUP_V2_CURRENT: &str = "/sys/fs/cgroup/memory.current";
const CGROUP_V1_LIMIT: &str = "/sys/fs/cgroup/memory/memory.limit_in_bytes";
const CGROUP_V1_USAGE: &str = "/sys/fs/cgroup/memory/memory.usage_in_bytes";

/// Reserved for the embedding model runtime.
const MODEL_RESERVATION: u64 = 150 * 1024 * 1024;
/// Above this, extra host memory contributes logarithmically.
const DAMPING_KNEE: u64 = 64 * 1024 * 1024 * 1024;
/// Utilization above which a pressure warning is emitted.
const PRESSURE_THRESHOLD: f64 = 0.85;
/// Smallest budget the sensor will recommend.
const FLOOR: u64 = 64 * 1024 * 1024;

/// Where the memory limit was found.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemorySource {
    CgroupV2,
    CgroupV1,
    Host,
}

/// Memory probe and cache-budget calculator.
pub struct ResourceSensor {
    environment: Environment,
    limit: u64,
    source: MemorySource,
    pressure: AtomicBool,
    last_note: RwLock<Option<String>>,
}

impl ResourceSensor {
    /// Probe the system. An explicit environment overrides detection;
    /// detection treats any cgroup limit below the host total as a
    /// container.
    pub fn probe(environment: Option<Environment>) -> Self {
        let host_total = host_memory();
        let (limit, source) = detect_limit(host_total);

        let environment = environment.unwrap_or(match source {
            MemorySource::CgroupV2 | MemorySource::CgroupV1 => Environment::Container,
            MemorySource::Host => Environment::Development,
        });

        info!(
            ?environment,
            ?source,
            limit_mb = limit / (1024 * 1024),
            "probed memory"
        );

        Self {
            environment,
            limit,
            source,
            pressure: AtomicBool::new(false),
            last_note: RwLock::new(None),
        }
    }

    /// Construct with a fixed limit, for tests.
    pub fn fixed(environment: Environment, limit: u64) -> Self {
        Self {
            environment,
            limit,
            source: MemorySource::Host,
            pressure: AtomicBool::new(false),
            last_note: RwLock::new(None),
        }
    }

    pub fn limit(&self) -> u64 {
        self.limit
    }

    pub fn source(&self) -> MemorySource {
        self.source
    }

    /// Cache byte budget: ratio by environment, minus the model
    /// reservation, log-damped on very large hosts.
    pub fn cache_budget(&self) -> u64 {
        let ratio = match self.environment {
            Environment::Development => 0.25,
            Environment::Container => 0.40,
            Environment::Production => 0.50,
        };

        let effective = if self.limit > DAMPING_KNEE {
            let excess = self.limit as f64 / DAMPING_KNEE as f64;
            (DAMPING_KNEE as f64 * (1.0 + excess.ln())) as u64
        } else {
            self.limit
        };

        let budget = (effective as f64 * ratio) as u64;
        budget.saturating_sub(MODEL_RESERVATION).max(FLOOR)
    }

    /// Current utilization in [0, 1], against the probed limit.
    pub fn utilization(&self) -> f64 {
        if self.limit == 0 {
            return 0.0;
        }
        let used = match self.source {
            MemorySource::CgroupV2 => read_bytes(Path::new(CGROUP_V2_CURRENT)),
            MemorySource::CgroupV1 => read_bytes(Path::new(CGROUP_V1_USAGE)),
            MemorySource::Host => None,
        }
        .unwrap_or_else(host_used);
        used as f64 / self.limit as f64
    }

    /// Whether the last sample crossed the pressure threshold.
    pub fn under_pressure(&self) -> bool {
        self.pressure.load(Ordering::Relaxed)
    }

    /// Last advisory note produced by sampling.
    pub fn pressure_note(&self) -> Option<String> {
        self.last_note.read().clone()
    }

    /// Take one sample; warns and records a recommendation above the
    /// pressure threshold.
    pub fn sample(&self) -> f64 {
        let utilization = self.utilization();
        if utilization > PRESSURE_THRESHOLD {
            self.pressure.store(true, Ordering::Relaxed);
            let note = format!(
                "memory-pressure-high: utilization {:.0}%; reduce cache.max_size or scale memory",
                utilization * 100.0
            );
            warn!(utilization, "memory-pressure-high");
            *self.last_note.write() = Some(note);
        } else {
            self.pressure.store(false, Ordering::Relaxed);
            *self.last_note.write() = None;
        }
        debug!(utilization, "memory sample");
        utilization
    }

    /// Spawn the periodic sampler; the returned handle stops it on abort.
    pub fn spawn_monitor(
        sensor: &Arc<Self>,
        interval: Duration,
        cache: Arc<crate::cache::UnifiedCache>,
    ) -> tokio::task::JoinHandle<()> {
        let sensor = Arc::clone(sensor);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                sensor.sample();
                cache.set_pressure_note(sensor.pressure_note());
            }
        })
    }
}

fn detect_limit(host_total: u64) -> (u64, MemorySource) {
    if let Some(limit) = read_bytes(Path::new(CGROUP_V2_MAX)) {
        if limit < host_total {
            return (limit, MemorySource::CgroupV2);
        }
    }
    if let Some(limit) = read_bytes(Path::new(CGROUP_V1_LIMIT)) {
        if limit < host_total {
            return (limit, MemorySource::CgroupV1);
        }
    }
    (host_total, MemorySource::Host)
}

/// Parse a cgroup byte file; "max" and absurd sentinels read as None.
fn read_bytes(path: &Path) -> Option<u64> {
    let raw = std::fs::read_to_string(path).ok()?;
    let trimmed = raw.trim();
    if trimmed == "max" {
        return None;
    }
    let value: u64 = trimmed.parse().ok()?;
    // cgroup v1 reports an unset limit as a page-rounded i64::MAX
    if value >= i64::MAX as u64 / 2 {
        return None;
    }
    Some(value)
}

fn host_memory() -> u64 {
    let mut system = System::new();
    system.refresh_memory();
    system.total_memory()
}

fn host_used() -> u64 {
    let mut system = System::new();
    system.refresh_memory();
    system.used_memory()
}
