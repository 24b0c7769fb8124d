//! Streamed import with progressive index flushing.
//!
//! Records are processed in parallel chunks; the indexes are flushed on a
//! schedule keyed to the cumulative entity count, so long imports become
//! queryable while still running. Flush cadence: every 100 entities below
//! 1k, every 1k below 10k, every 5k beyond.

use crate::detect::{detect, FormatKind};
use crate::parsers::ParserRegistry;
use chrono::Utc;
use futures::future::join_all;
use serde::Serialize;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use synapse_core::{
    EntityExtractor, Extraction, Result, SourceRecord, SynapseError, SynapseId,
};
use synapse_engine::{AddOptions, ImportRecord, RelateOptions, Synapse};
use tokio::sync::mpsc::UnboundedSender;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Fetches remote sources; the network stack is a seam, not a dependency.
#[async_trait::async_trait]
pub trait SourceFetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>>;
}

/// An import source, normalized to bytes before detection.
#[derive(Debug, Clone)]
pub enum ImportSource {
    Bytes { name: String, data: Vec<u8> },
    Text { name: String, data: String },
    Path(PathBuf),
    Url(String),
}

/// Import pipeline stage, stable across formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ImportStage {
    Detecting,
    Extracting,
    StoringVfs,
    StoringGraph,
    Complete,
}

/// One progress event.
#[derive(Debug, Clone, Serialize)]
pub struct ImportProgress {
    pub stage: ImportStage,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub processed: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entities: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub relationships: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub throughput: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub eta_ms: Option<u64>,
    /// True once the indexes are flushed and reads will observe the batch
    #[serde(skip_serializing_if = "Option::is_none")]
    pub queryable: Option<bool>,
}

impl ImportProgress {
    fn stage(stage: ImportStage, message: impl Into<String>) -> Self {
        Self {
            stage,
            message: message.into(),
            processed: None,
            total: None,
            entities: None,
            relationships: None,
            throughput: None,
            eta_ms: None,
            queryable: None,
        }
    }
}

/// Import tuning knobs.
#[derive(Debug, Clone)]
pub struct ImportOptions {
    /// Records processed in parallel per chunk
    pub batch_size: usize,
    /// Error budget; exceeding it aborts the import
    pub max_errors: usize,
    /// Service tag attached to imported entities
    pub service: Option<String>,
}

impl Default for ImportOptions {
    fn default() -> Self {
        Self {
            batch_size: 10,
            max_errors: 100,
            service: None,
        }
    }
}

/// Outcome of one import.
#[derive(Debug, Clone)]
pub struct ImportReport {
    pub format: FormatKind,
    pub records: usize,
    pub entities: usize,
    pub relationships: usize,
    pub errors: Vec<String>,
    /// True when the error budget was exceeded; flushed batches remain valid
    pub aborted: bool,
}

/// Flush interval for the current cumulative entity count.
fn flush_interval(entities: usize) -> usize {
    if entities < 1_000 {
        100
    } else if entities < 10_000 {
        1_000
    } else {
        5_000
    }
}

/// Drives sources through detection, parsing, extraction, and the engine.
pub struct ImportCoordinator {
    engine: Arc<Synapse>,
    extractor: Arc<dyn EntityExtractor>,
    parsers: ParserRegistry,
    fetcher: Option<Arc<dyn SourceFetcher>>,
}

impl ImportCoordinator {
    pub fn new(engine: Arc<Synapse>, extractor: Arc<dyn EntityExtractor>) -> Self {
        Self {
            engine,
            extractor,
            parsers: ParserRegistry::builtin(),
            fetcher: None,
        }
    }

    /// Replace or extend the parser set (external PDF/OOXML parsers).
    pub fn with_parsers(mut self, parsers: ParserRegistry) -> Self {
        self.parsers = parsers;
        self
    }

    /// Wire a fetcher for `ImportSource::Url`.
    pub fn with_fetcher(mut self, fetcher: Arc<dyn SourceFetcher>) -> Self {
        self.fetcher = Some(fetcher);
        self
    }

    async fn resolve(&self, source: ImportSource) -> Result<(String, Vec<u8>)> {
        match source {
            ImportSource::Bytes { name, data } => Ok((name, data)),
            ImportSource::Text { name, data } => Ok((name, data.into_bytes())),
            ImportSource::Path(path) => {
                let data = tokio::fs::read(&path).await?;
                let name = path
                    .file_name()
                    .map(|n| n.to_string_lossy().to_string())
                    .unwrap_or_else(|| path.to_string_lossy().to_string());
                Ok((name, data))
            }
            ImportSource::Url(url) => {
                let fetcher = self.fetcher.as_ref().ok_or_else(|| {
                    SynapseError::config("URL sources require a fetcher; none is wired")
                })?;
                let data = fetcher.fetch(&url).await?;
                Ok((url, data))
            }
        }
    }

    /// Run an import to completion (or its error budget, or cancellation).
    pub async fn import(
        &self,
        source: ImportSource,
        opts: ImportOptions,
        progress: Option<UnboundedSender<ImportProgress>>,
        cancel: Option<CancellationToken>,
    ) -> Result<ImportReport> {
        let started = Instant::now();
        let started_at = Utc::now();
        let import_id = SynapseId::new();

        emit(&progress, ImportProgress::stage(ImportStage::Detecting, "detecting format"));
        let (name, bytes) = self.resolve(source).await?;
        let format = detect(&name, &bytes);
        let parser = self.parsers.get(format).ok_or_else(|| {
            SynapseError::invalid_input(format!(
                "no parser registered for format {} of {name}",
                format.as_str()
            ))
        })?;
        info!(source = %name, format = format.as_str(), "import started");

        emit(
            &progress,
            ImportProgress::stage(ImportStage::Extracting, format!("parsing {name}")),
        );
        let records = parser.parse(&bytes).await?;
        let total = records.len();

        // Near-duplicate detection is per-entity ANN work; past the
        // configured batch ceiling it auto-disables for the whole import
        let dedup_config = &self.engine.config().dedup;
        let dedup_override = if dedup_config.enabled && total > dedup_config.max_batch {
            warn!(
                records = total,
                max_batch = dedup_config.max_batch,
                "large import; auto-disabling per-add deduplication"
            );
            Some(false)
        } else {
            None
        };

        let mut report = ImportReport {
            format,
            records: total,
            entities: 0,
            relationships: 0,
            errors: Vec::new(),
            aborted: false,
        };
        // Entity names seen during this import; relationship endpoints and
        // repeated entities resolve through it
        let names: tokio::sync::Mutex<HashMap<String, SynapseId>> =
            tokio::sync::Mutex::new(HashMap::new());

        let mut processed = 0usize;
        let mut last_flush_entities = 0usize;

        for chunk in records.chunks(opts.batch_size.max(1)) {
            if let Some(token) = &cancel {
                if token.is_cancelled() {
                    warn!(processed, "import cancelled; committed batches remain");
                    return Err(SynapseError::Cancelled);
                }
            }

            let outcomes = join_all(chunk.iter().map(|record| {
                self.process_record(record, &names, &opts, dedup_override)
            }))
            .await;

            processed += chunk.len();
            for outcome in outcomes {
                match outcome {
                    Ok((entities, relationships)) => {
                        report.entities += entities;
                        report.relationships += relationships;
                    }
                    Err(e) => {
                        report.errors.push(e.to_string());
                        if report.errors.len() > opts.max_errors {
                            report.aborted = true;
                            warn!(
                                errors = report.errors.len(),
                                "import aborted; previously flushed batches remain valid"
                            );
                            emit(
                                &progress,
                                ImportProgress::stage(
                                    ImportStage::Complete,
                                    format!("aborted after {} errors", report.errors.len()),
                                ),
                            );
                            return Ok(report);
                        }
                    }
                }
            }

            // Progressive flush keyed to cumulative entity count
            if report.entities - last_flush_entities >= flush_interval(last_flush_entities) {
                self.engine.flush().await?;
                last_flush_entities = report.entities;
                let elapsed = started.elapsed().as_secs_f64();
                let throughput = if elapsed > 0.0 {
                    report.entities as f64 / elapsed
                } else {
                    0.0
                };
                let eta_ms = if throughput > 0.0 && total > processed {
                    Some((((total - processed) as f64 / throughput) * 1000.0) as u64)
                } else {
                    None
                };
                emit(
                    &progress,
                    ImportProgress {
                        processed: Some(processed),
                        total: Some(total),
                        entities: Some(report.entities),
                        relationships: Some(report.relationships),
                        throughput: Some(throughput),
                        eta_ms,
                        queryable: Some(true),
                        ..ImportProgress::stage(
                            ImportStage::StoringVfs,
                            format!("{} entities indexed and queryable", report.entities),
                        )
                    },
                );
            }
        }

        if report.relationships > 0 {
            emit(
                &progress,
                ImportProgress {
                    relationships: Some(report.relationships),
                    ..ImportProgress::stage(
                        ImportStage::StoringGraph,
                        format!("{} relationships stored", report.relationships),
                    )
                },
            );
        }

        self.engine.flush().await?;
        self.engine
            .record_import(ImportRecord {
                id: import_id,
                source: name.clone(),
                format: format.as_str().to_string(),
                entities: report.entities,
                relationships: report.relationships,
                errors: report.errors.len(),
                started_at,
                finished_at: Utc::now(),
            })
            .await?;

        emit(
            &progress,
            ImportProgress {
                processed: Some(processed),
                total: Some(total),
                entities: Some(report.entities),
                relationships: Some(report.relationships),
                queryable: Some(true),
                ..ImportProgress::stage(
                    ImportStage::Complete,
                    format!(
                        "imported {} entities, {} relationships from {name}",
                        report.entities, report.relationships
                    ),
                )
            },
        );
        info!(
            entities = report.entities,
            relationships = report.relationships,
            errors = report.errors.len(),
            "import complete"
        );
        Ok(report)
    }

    /// Extract one record and land its nouns and verbs in the engine.
    async fn process_record(
        &self,
        record: &SourceRecord,
        names: &tokio::sync::Mutex<HashMap<String, SynapseId>>,
        opts: &ImportOptions,
        dedup: Option<bool>,
    ) -> Result<(usize, usize)> {
        let Extraction { nouns, verbs } = self.extractor.extract(record).await?;

        let mut entities = 0usize;
        for noun in nouns {
            let mut registry = names.lock().await;
            if registry.contains_key(&noun.name) {
                continue;
            }
            let id = self
                .engine
                .add(
                    &noun.text,
                    noun.noun_type,
                    Some(noun.metadata),
                    AddOptions {
                        name: Some(noun.name.clone()),
                        service: opts.service.clone(),
                        dedup,
                    },
                )
                .await?;
            registry.insert(noun.name, id);
            entities += 1;
        }

        let mut relationships = 0usize;
        for verb in verbs {
            let registry = names.lock().await;
            let (Some(&source), Some(&target)) =
                (registry.get(&verb.source), registry.get(&verb.target))
            else {
                debug!(source = %verb.source, target = %verb.target, "verb endpoint not in import; skipping");
                continue;
            };
            drop(registry);
            self.engine
                .relate(
                    source,
                    target,
                    verb.verb,
                    RelateOptions {
                        weight: verb.weight,
                        service: opts.service.clone(),
                        ..Default::default()
                    },
                )
                .await?;
            relationships += 1;
        }

        Ok((entities, relationships))
    }
}

fn emit(progress: &Option<UnboundedSender<ImportProgress>>, event: ImportProgress) {
    if let Some(tx) = progress {
        let _ = tx.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flush_schedule() {
        assert_eq!(flush_interval(0), 100);
        assert_eq!(flush_interval(999), 100);
        assert_eq!(flush_interval(1_000), 1_000);
        assert_eq!(flush_interval(9_999), 1_000);
        assert_eq!(flush_interval(10_000), 5_000);
        assert_eq!(flush_interval(1_000_000), 5_000);
    }
}
