//! Versioned metadata migrations.
//!
//! A migration is an idempotent, pure transform over metadata documents.
//! Before the first write of a run, each touched document is copied into a
//! backup branch (`branches/pre-migration-{version}/...`), which realizes
//! the copy-on-write backup on object stores that have no constant-time
//! snapshot primitive. Re-running a completed migration transforms nothing:
//! every document returns `None`.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use std::time::Instant;
use synapse_core::{Result, SynapseError, SynapseId};
use synapse_storage::{keys, Page, StorageAdapter, StorageJson};
use tracing::{info, warn};

/// Which record streams a migration touches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Applies {
    Nouns,
    Verbs,
    Both,
}

/// A metadata transform; returns `None` when the document needs no change.
pub type Transform = Arc<dyn Fn(&Value) -> Option<Value> + Send + Sync>;

/// One registered migration.
#[derive(Clone)]
pub struct Migration {
    pub id: String,
    pub version: u32,
    pub applies: Applies,
    pub transform: Transform,
}

impl std::fmt::Debug for Migration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Migration")
            .field("id", &self.id)
            .field("version", &self.version)
            .field("applies", &self.applies)
            .finish()
    }
}

impl Migration {
    pub fn new(
        id: impl Into<String>,
        version: u32,
        applies: Applies,
        transform: impl Fn(&Value) -> Option<Value> + Send + Sync + 'static,
    ) -> Self {
        Self {
            id: id.into(),
            version,
            applies,
            transform: Arc::new(transform),
        }
    }
}

/// Outcome of one migration run.
#[derive(Debug, Clone, Serialize)]
pub struct MigrationReport {
    pub migration_id: String,
    pub scanned: usize,
    pub modified: usize,
    pub errors: Vec<String>,
}

/// Outcome of a dry run.
#[derive(Debug, Clone, Serialize)]
pub struct DryRunReport {
    pub pending: Vec<String>,
    pub affected: usize,
    pub scanned: usize,
    /// Up to five before/after pairs
    pub samples: Vec<(Value, Value)>,
    pub eta_ms: u64,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct CompletedMigrations {
    completed: Vec<String>,
}

const COMPLETED_KEY: &str = "migrations.json";
const PAGE_SIZE: usize = 200;
const SAMPLE_LIMIT: usize = 5;

/// Runs registered migrations against a storage adapter.
pub struct MigrationRunner {
    adapter: Arc<dyn StorageAdapter>,
    migrations: Vec<Migration>,
    max_errors: usize,
}

impl MigrationRunner {
    pub fn new(adapter: Arc<dyn StorageAdapter>, migrations: Vec<Migration>) -> Self {
        Self {
            adapter,
            migrations,
            max_errors: 100,
        }
    }

    pub fn with_max_errors(mut self, max_errors: usize) -> Self {
        self.max_errors = max_errors;
        self
    }

    async fn completed(&self) -> Result<Vec<String>> {
        Ok(self
            .adapter
            .get_json::<CompletedMigrations>(COMPLETED_KEY)
            .await?
            .unwrap_or_default()
            .completed)
    }

    async fn mark_completed(&self, id: &str) -> Result<()> {
        let mut record = self
            .adapter
            .get_json::<CompletedMigrations>(COMPLETED_KEY)
            .await?
            .unwrap_or_default();
        if !record.completed.iter().any(|c| c == id) {
            record.completed.push(id.to_string());
        }
        self.adapter.put_json(COMPLETED_KEY, &record).await
    }

    /// Migrations not yet recorded as completed, in version order.
    pub async fn pending(&self) -> Result<Vec<Migration>> {
        let completed = self.completed().await?;
        let mut pending: Vec<Migration> = self
            .migrations
            .iter()
            .filter(|m| !completed.contains(&m.id))
            .cloned()
            .collect();
        pending.sort_by_key(|m| m.version);
        Ok(pending)
    }

    /// Run every pending migration. Returns the per-migration reports;
    /// `true` in the second slot means metadata indexes need a rebuild.
    pub async fn run_pending(&self) -> Result<(Vec<MigrationReport>, bool)> {
        let mut reports = Vec::new();
        let mut any_modified = false;
        for migration in self.pending().await? {
            let report = self.run(&migration).await?;
            any_modified |= report.modified > 0;
            reports.push(report);
        }
        Ok((reports, any_modified))
    }

    /// Run one migration: back up touched documents, transform, record
    /// completion. Per-document failures are collected; exceeding the
    /// error budget aborts with partial changes retained on the main
    /// branch and the backup branch intact.
    pub async fn run(&self, migration: &Migration) -> Result<MigrationReport> {
        info!(id = %migration.id, version = migration.version, "running migration");
        let branch = format!("branches/pre-migration-{}", migration.version);
        self.adapter
            .put_json(
                &format!("{branch}/manifest.json"),
                &serde_json::json!({
                    "migrationId": migration.id,
                    "version": migration.version,
                    "createdAt": chrono::Utc::now(),
                }),
            )
            .await?;

        let mut report = MigrationReport {
            migration_id: migration.id.clone(),
            scanned: 0,
            modified: 0,
            errors: Vec::new(),
        };

        self.run_main_branch(migration, &branch, &mut report).await?;
        self.run_backup_branches(migration, &branch, &mut report)
            .await?;

        self.mark_completed(&migration.id).await?;
        info!(
            id = %migration.id,
            scanned = report.scanned,
            modified = report.modified,
            errors = report.errors.len(),
            "migration complete"
        );
        Ok(report)
    }

    async fn run_main_branch(
        &self,
        migration: &Migration,
        branch: &str,
        report: &mut MigrationReport,
    ) -> Result<()> {
        if matches!(migration.applies, Applies::Nouns | Applies::Both) {
            let mut offset = 0;
            loop {
                let ids = self
                    .adapter
                    .list_nouns(Page::new(offset, PAGE_SIZE))
                    .await?;
                if ids.is_empty() {
                    break;
                }
                offset += ids.len();
                for id in ids {
                    self.transform_noun(migration, branch, id, report).await?;
                }
            }
        }
        if matches!(migration.applies, Applies::Verbs | Applies::Both) {
            let mut offset = 0;
            loop {
                let ids = self
                    .adapter
                    .list_verbs(Page::new(offset, PAGE_SIZE))
                    .await?;
                if ids.is_empty() {
                    break;
                }
                offset += ids.len();
                for id in ids {
                    self.transform_verb(migration, branch, id, report).await?;
                }
            }
        }
        Ok(())
    }

    async fn transform_noun(
        &self,
        migration: &Migration,
        branch: &str,
        id: SynapseId,
        report: &mut MigrationReport,
    ) -> Result<()> {
        report.scanned += 1;
        let Some(record) = self.adapter.get_noun_metadata(id).await? else {
            return Ok(());
        };
        let Some(new_data) = (migration.transform)(&record.data) else {
            return Ok(());
        };

        let key = keys::noun_metadata(id);
        let mut updated = record.clone();
        updated.data = new_data;
        if let Err(e) = self.backup_then_write(branch, &key, &record, &updated).await {
            self.record_error(report, &key, e)?;
            return Ok(());
        }
        report.modified += 1;
        Ok(())
    }

    async fn transform_verb(
        &self,
        migration: &Migration,
        branch: &str,
        id: SynapseId,
        report: &mut MigrationReport,
    ) -> Result<()> {
        report.scanned += 1;
        let Some(record) = self.adapter.get_verb_metadata(id).await? else {
            return Ok(());
        };
        let Some(new_data) = (migration.transform)(&record.data) else {
            return Ok(());
        };

        let key = keys::verb_metadata(id);
        let mut updated = record.clone();
        updated.data = new_data;
        if let Err(e) = self.backup_then_write(branch, &key, &record, &updated).await {
            self.record_error(report, &key, e)?;
            return Ok(());
        }
        report.modified += 1;
        Ok(())
    }

    /// Copy the untouched record into the backup branch (first write of the
    /// run only), then persist the transformed record in place.
    async fn backup_then_write<R: Serialize + Sync>(
        &self,
        branch: &str,
        key: &str,
        original: &R,
        updated: &R,
    ) -> Result<()> {
        let backup_key = format!("{branch}/{key}");
        if self.adapter.get_raw(&backup_key).await?.is_none() {
            self.adapter.put_json(&backup_key, original).await?;
        }
        self.adapter.put_json(key, updated).await
    }

    fn record_error(
        &self,
        report: &mut MigrationReport,
        key: &str,
        error: SynapseError,
    ) -> Result<()> {
        warn!(key, %error, "migration transform write failed");
        report.errors.push(format!("{key}: {error}"));
        if report.errors.len() > self.max_errors {
            return Err(SynapseError::migration(format!(
                "aborted after {} errors; partial changes retained, backup branch intact",
                report.errors.len()
            )));
        }
        Ok(())
    }

    /// Apply the transform to documents held in earlier backup branches so
    /// a restored branch is never behind the schema. Already-transformed
    /// entries return `None` and are skipped.
    async fn run_backup_branches(
        &self,
        migration: &Migration,
        current_branch: &str,
        report: &mut MigrationReport,
    ) -> Result<()> {
        let branch_keys = self.adapter.list_raw("branches/").await?;
        let mut branches: Vec<String> = branch_keys
            .iter()
            .filter_map(|k| k.split('/').nth(1))
            .map(str::to_string)
            .collect();
        branches.sort();
        branches.dedup();

        for name in branches {
            let prefix = format!("branches/{name}");
            if prefix == current_branch {
                continue;
            }
            let scoped = self.adapter.with_prefix(&prefix);
            for key in scoped.list_raw(keys::NOUNS_METADATA).await? {
                if !matches!(migration.applies, Applies::Nouns | Applies::Both) {
                    break;
                }
                let Some(mut record) = scoped
                    .get_json::<synapse_core::NounMetadataRecord>(&key)
                    .await?
                else {
                    continue;
                };
                report.scanned += 1;
                if let Some(new_data) = (migration.transform)(&record.data) {
                    record.data = new_data;
                    scoped.put_json(&key, &record).await?;
                    report.modified += 1;
                }
            }
            for key in scoped.list_raw(keys::VERBS_METADATA).await? {
                if !matches!(migration.applies, Applies::Verbs | Applies::Both) {
                    break;
                }
                let Some(mut record) = scoped
                    .get_json::<synapse_core::VerbMetadataRecord>(&key)
                    .await?
                else {
                    continue;
                };
                report.scanned += 1;
                if let Some(new_data) = (migration.transform)(&record.data) {
                    record.data = new_data;
                    scoped.put_json(&key, &record).await?;
                    report.modified += 1;
                }
            }
        }
        Ok(())
    }

    /// Transform without writes: affected count, scan size, up to five
    /// before/after samples, and a rough projection of run time.
    pub async fn dry_run(&self, migration: &Migration) -> Result<DryRunReport> {
        let started = Instant::now();
        let pending = self
            .pending()
            .await?
            .into_iter()
            .map(|m| m.id)
            .collect::<Vec<_>>();

        let mut affected = 0;
        let mut scanned = 0;
        let mut samples = Vec::new();

        if matches!(migration.applies, Applies::Nouns | Applies::Both) {
            for id in self.adapter.list_nouns(Page::all()).await? {
                let Some(record) = self.adapter.get_noun_metadata(id).await? else {
                    continue;
                };
                scanned += 1;
                if let Some(new_data) = (migration.transform)(&record.data) {
                    affected += 1;
                    if samples.len() < SAMPLE_LIMIT {
                        samples.push((record.data.clone(), new_data));
                    }
                }
            }
        }
        if matches!(migration.applies, Applies::Verbs | Applies::Both) {
            for id in self.adapter.list_verbs(Page::all()).await? {
                let Some(record) = self.adapter.get_verb_metadata(id).await? else {
                    continue;
                };
                scanned += 1;
                if let Some(new_data) = (migration.transform)(&record.data) {
                    affected += 1;
                    if samples.len() < SAMPLE_LIMIT {
                        samples.push((record.data.clone(), new_data));
                    }
                }
            }
        }

        // Writes roughly double the per-document cost of the scan
        let elapsed_ms = started.elapsed().as_millis() as u64;
        let eta_ms = if scanned == 0 {
            0
        } else {
            elapsed_ms + (elapsed_ms * affected as u64 * 2) / scanned as u64
        };

        Ok(DryRunReport {
            pending,
            affected,
            scanned,
            samples,
            eta_ms,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use serde_json::json;
    use synapse_core::{NounMetadataRecord, NounType};
    use synapse_storage::MemoryAdapter;

    fn rename_state_to_status() -> Migration {
        Migration::new("rename-state-to-status", 1, Applies::Nouns, |data| {
            let state = data.get("state")?.clone();
            let mut new_data = data.clone();
            let map = new_data.as_object_mut()?;
            map.remove("state");
            map.insert("status".to_string(), state);
            Some(new_data)
        })
    }

    async fn seed(adapter: &Arc<dyn StorageAdapter>, n: usize) -> Vec<SynapseId> {
        let mut ids = Vec::new();
        for i in 0..n {
            let id = SynapseId::new();
            adapter
                .save_noun_metadata(&NounMetadataRecord {
                    id,
                    name: format!("doc-{i}"),
                    noun_type: NounType::Document,
                    data: json!({"state": "open", "index": i}),
                    created_at: Utc::now(),
                    vfs_path: None,
                    service: None,
                })
                .await
                .unwrap();
            ids.push(id);
        }
        ids
    }

    #[tokio::test]
    async fn test_migration_renames_and_is_idempotent() {
        let adapter: Arc<dyn StorageAdapter> = Arc::new(MemoryAdapter::new());
        let ids = seed(&adapter, 4).await;

        let runner = MigrationRunner::new(Arc::clone(&adapter), vec![rename_state_to_status()]);
        let (reports, rebuild) = runner.run_pending().await.unwrap();
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].modified, 4);
        assert!(rebuild);

        for id in &ids {
            let record = adapter.get_noun_metadata(*id).await.unwrap().unwrap();
            assert_eq!(record.data["status"], "open");
            assert!(record.data.get("state").is_none());
        }

        // Second run: everything returns None, zero writes, nothing pending
        let (reports, rebuild) = runner.run_pending().await.unwrap();
        assert!(reports.is_empty());
        assert!(!rebuild);

        let report = runner.run(&rename_state_to_status()).await.unwrap();
        assert_eq!(report.modified, 0);
    }

    #[tokio::test]
    async fn test_backup_branch_preserves_originals() {
        let adapter: Arc<dyn StorageAdapter> = Arc::new(MemoryAdapter::new());
        let ids = seed(&adapter, 2).await;

        let runner = MigrationRunner::new(Arc::clone(&adapter), vec![rename_state_to_status()]);
        runner.run(&rename_state_to_status()).await.unwrap();

        let backup = adapter.with_prefix("branches/pre-migration-1");
        let original = backup.get_noun_metadata(ids[0]).await.unwrap().unwrap();
        assert_eq!(original.data["state"], "open");
        assert!(backup.get_raw("manifest.json").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_dry_run_reports_without_writes() {
        let adapter: Arc<dyn StorageAdapter> = Arc::new(MemoryAdapter::new());
        let ids = seed(&adapter, 7).await;

        let migration = rename_state_to_status();
        let runner = MigrationRunner::new(Arc::clone(&adapter), vec![migration.clone()]);
        let report = runner.dry_run(&migration).await.unwrap();

        assert_eq!(report.scanned, 7);
        assert_eq!(report.affected, 7);
        assert_eq!(report.samples.len(), 5);
        assert_eq!(report.pending, vec!["rename-state-to-status".to_string()]);

        // Nothing was written
        let record = adapter.get_noun_metadata(ids[0]).await.unwrap().unwrap();
        assert_eq!(record.data["state"], "open");
    }

    #[tokio::test]
    async fn test_pending_ordering_by_version() {
        let adapter: Arc<dyn StorageAdapter> = Arc::new(MemoryAdapter::new());
        let later = Migration::new("later", 2, Applies::Nouns, |_| None);
        let earlier = Migration::new("earlier", 1, Applies::Nouns, |_| None);
        let runner = MigrationRunner::new(adapter, vec![later, earlier]);

        let pending = runner.pending().await.unwrap();
        assert_eq!(pending[0].id, "earlier");
        assert_eq!(pending[1].id, "later");
    }
}
