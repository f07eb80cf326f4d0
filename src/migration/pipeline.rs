//! Bulk re-encode of existing data into the target format.
//!
//! The pipeline walks every entity the provider names, replays its full
//! version history through the target-format store, and re-claims its
//! unique values without a TTL. Work is sharded round-robin
//! across worker threads; one entity failing is recorded and skipped, it
//! never aborts the run.

use crate::backend::{ColumnFamily, ColumnStore, MutationBatch};
use crate::codec::row_key::{decode_collection_row_key, decode_scoped_row_key, scope_prefix};
use crate::config::EvdbConfig;
use crate::error::EvdbError;
use crate::model::{time_uuid, Id, Scope};
use crate::store::entity::EntityStorage;
use crate::store::entity_codec::FormatVersion;
use crate::store::unique::{UniqueValue, UniqueValueStorage};
use std::sync::Arc;
use std::thread;
use tracing::{error, info};

/// Observer of migration progress. Implementations must tolerate concurrent
/// calls from every worker.
pub trait ProgressObserver: Send + Sync {
    fn update(&self, target: FormatVersion, message: &str);

    fn failed(&self, target: FormatVersion, entity_id: &Id, message: &str);
}

/// Default observer: progress at info, failures at error.
#[derive(Debug, Default)]
pub struct LoggingProgressObserver;

impl ProgressObserver for LoggingProgressObserver {
    fn update(&self, target: FormatVersion, message: &str) {
        info!(%target, message, "migration progress");
    }

    fn failed(&self, target: FormatVersion, entity_id: &Id, message: &str) {
        error!(%target, entity = %entity_id, message, "migration failure");
    }
}

/// Names the entities to migrate. Decoupled from the pipeline so tests and
/// partial re-runs can feed explicit lists.
pub trait MigrationDataProvider: Send + Sync {
    fn entity_ids(&self) -> Result<Vec<(Scope, Id)>, EvdbError>;
}

/// Provider that scans an old-format column family for row keys under one
/// scope. `collection_prefixed` must match the source format's key layout.
pub struct ScanningDataProvider {
    backend: Arc<dyn ColumnStore>,
    cf: ColumnFamily,
    scope: Scope,
    collection_prefixed: bool,
}

impl ScanningDataProvider {
    pub fn new(
        backend: Arc<dyn ColumnStore>,
        cf: ColumnFamily,
        scope: Scope,
        collection_prefixed: bool,
    ) -> Self {
        Self {
            backend,
            cf,
            scope,
            collection_prefixed,
        }
    }
}

impl MigrationDataProvider for ScanningDataProvider {
    fn entity_ids(&self) -> Result<Vec<(Scope, Id)>, EvdbError> {
        let prefix = scope_prefix(&self.scope);
        let rows = self.backend.scan_row_keys(self.cf, &prefix)?;
        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            let (scope, id) = if self.collection_prefixed {
                let (scope, _collection, id) = decode_collection_row_key(row.as_slice())?;
                (scope, id)
            } else {
                decode_scoped_row_key(row.as_slice())?
            };
            out.push((scope, id));
        }
        Ok(out)
    }
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct MigrationReport {
    pub entities_visited: u64,
    pub versions_migrated: u64,
    pub failed_entities: Vec<Id>,
}

pub struct MigrationPipeline {
    backend: Arc<dyn ColumnStore>,
    source: Arc<dyn EntityStorage>,
    target: Arc<dyn EntityStorage>,
    unique: Arc<dyn UniqueValueStorage>,
    batch_size: usize,
    workers: usize,
    history_page_size: usize,
}

impl MigrationPipeline {
    pub fn new(
        backend: Arc<dyn ColumnStore>,
        source: Arc<dyn EntityStorage>,
        target: Arc<dyn EntityStorage>,
        unique: Arc<dyn UniqueValueStorage>,
        config: &EvdbConfig,
    ) -> Self {
        Self {
            backend,
            source,
            target,
            unique,
            batch_size: config.migration_batch_size,
            workers: config.migration_workers.max(1),
            history_page_size: config.history_page_size,
        }
    }

    pub fn run(
        &self,
        provider: &dyn MigrationDataProvider,
        observer: &dyn ProgressObserver,
    ) -> Result<MigrationReport, EvdbError> {
        let ids = provider.entity_ids()?;
        let target_format = self.target.format();
        info!(
            entities = ids.len(),
            source = %self.source.format(),
            target = %target_format,
            workers = self.workers,
            "starting bulk migration"
        );

        let mut shards: Vec<Vec<(Scope, Id)>> = vec![Vec::new(); self.workers];
        for (n, item) in ids.into_iter().enumerate() {
            shards[n % self.workers].push(item);
        }

        let report = thread::scope(|s| {
            let handles: Vec<_> = shards
                .into_iter()
                .map(|shard| {
                    s.spawn(move || {
                        let mut report = MigrationReport::default();
                        for (scope, id) in shard {
                            report.entities_visited += 1;
                            match self.migrate_entity(&scope, &id, observer) {
                                Ok(versions) => report.versions_migrated += versions,
                                Err(err) => {
                                    observer.failed(target_format, &id, &err.to_string());
                                    report.failed_entities.push(id);
                                }
                            }
                        }
                        report
                    })
                })
                .collect();
            let mut merged = MigrationReport::default();
            for handle in handles {
                let partial = handle.join().map_err(|_| {
                    EvdbError::Transport("migration worker panicked".into())
                })?;
                merged.entities_visited += partial.entities_visited;
                merged.versions_migrated += partial.versions_migrated;
                merged.failed_entities.extend(partial.failed_entities);
            }
            Ok::<_, EvdbError>(merged)
        })?;

        info!(
            entities = report.entities_visited,
            versions = report.versions_migrated,
            failures = report.failed_entities.len(),
            "bulk migration finished"
        );
        Ok(report)
    }

    /// Replays one entity's full history into the target format, flushing
    /// every `batch_size` versions so batches stay bounded.
    fn migrate_entity(
        &self,
        scope: &Scope,
        id: &Id,
        observer: &dyn ProgressObserver,
    ) -> Result<u64, EvdbError> {
        let target_format = self.target.format();
        let mut batch = MutationBatch::new();
        let mut pending = 0usize;
        let mut total = 0u64;

        let history =
            self.source
                .load_descending_history(scope, id, time_uuid(), self.history_page_size);
        for item in history {
            let entity = item.map_err(|err| self.wrap(id, err))?;
            batch.merge(
                self.target
                    .write(scope, &entity)
                    .map_err(|err| self.wrap(id, err))?,
            );
            if let Some(payload) = &entity.entity {
                for field in payload.unique_fields() {
                    let value =
                        UniqueValue::new(field.clone(), entity.id.clone(), entity.version);
                    // migrated claims are settled facts, no TTL
                    batch.merge(
                        self.unique
                            .write(scope, &value, None)
                            .map_err(|err| self.wrap(id, err))?,
                    );
                }
            }
            pending += 1;
            total += 1;
            if pending >= self.batch_size {
                self.backend
                    .execute(std::mem::take(&mut batch))
                    .map_err(|err| self.wrap(id, err))?;
                observer.update(
                    target_format,
                    &format!("copied {total} versions of entity {id}"),
                );
                pending = 0;
            }
        }
        if !batch.is_empty() {
            self.backend
                .execute(batch)
                .map_err(|err| self.wrap(id, err))?;
        }
        Ok(total)
    }

    fn wrap(&self, id: &Id, err: EvdbError) -> EvdbError {
        EvdbError::Migration {
            entity: id.to_string(),
            message: err.to_string(),
        }
    }
}
