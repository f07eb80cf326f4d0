//! Online format migration.
//!
//! Each storage concern (entity data, the version log, unique values) is a
//! migration plugin with a persisted format version counter. While the
//! counter trails the target format the store graph runs in dual-write mode:
//! every mutation goes to both formats in one batch, every read comes from
//! the old format. Once the bulk pipeline finishes and the counter is bumped,
//! reads flip to the new format and the old one goes cold.

pub mod pipeline;

use crate::backend::{cf, ColumnStore, MutationBatch};
use crate::codec::composite::CompositeBuilder;
use crate::codec::EncodedKey;
use crate::config::EvdbConfig;
use crate::error::EvdbError;
use crate::model::{Field, Id, Scope};
use crate::mvcc::{EntitySet, MvccEntity, MvccLogEntry, VersionSet};
use crate::store::entity::{EntityHistoryIter, EntityStorage};
use crate::store::entity_codec::FormatVersion;
use crate::store::log::{LogHistoryIter, LogStorage};
use crate::store::unique::{UniqueValue, UniqueValueSet, UniqueValueStorage};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use uuid::Uuid;

/// Stable plugin names. These are persisted row keys; renaming one orphans
/// its counter.
pub mod plugin {
    pub const ENTITY_DATA: &str = "entity-data";
    pub const ENTITY_LOG: &str = "entity-log";
    pub const UNIQUE_VALUES: &str = "unique-values";
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MigrationState {
    /// All reads and writes use this format.
    Stable(FormatVersion),
    /// Bulk copy in flight: write both, read `from`.
    Migrating {
        from: FormatVersion,
        to: FormatVersion,
    },
}

impl MigrationState {
    pub fn needs_migration(&self) -> bool {
        matches!(self, MigrationState::Migrating { .. })
    }

    /// The format reads are served from.
    pub fn read_format(&self) -> FormatVersion {
        match *self {
            MigrationState::Stable(format) => format,
            MigrationState::Migrating { from, .. } => from,
        }
    }
}

const VERSION_COLUMN: &[u8] = b"version";

/// Persisted per-plugin format counters, with an in-process cache so the
/// hot path never touches the store.
pub struct MigrationInfoCache {
    backend: Arc<dyn ColumnStore>,
    cached: RwLock<HashMap<&'static str, Option<u16>>>,
}

impl MigrationInfoCache {
    pub fn new(backend: Arc<dyn ColumnStore>) -> Self {
        Self {
            backend,
            cached: RwLock::new(HashMap::new()),
        }
    }

    fn row_key(plugin: &str) -> EncodedKey {
        let mut builder = CompositeBuilder::new();
        builder.push_str(plugin);
        builder.finish()
    }

    pub fn version(&self, plugin: &'static str) -> Result<Option<u16>, EvdbError> {
        if let Some(cached) = self.cached.read().get(plugin) {
            return Ok(*cached);
        }
        let column =
            self.backend
                .get_column(cf::MIGRATION_INFO, &Self::row_key(plugin), VERSION_COLUMN)?;
        let version = match column {
            None => None,
            Some(column) => {
                let bytes: [u8; 2] = column.value.as_slice().try_into().map_err(|_| {
                    EvdbError::DataCorruption(format!(
                        "format counter for plugin '{plugin}' is not two bytes"
                    ))
                })?;
                Some(u16::from_be_bytes(bytes))
            }
        };
        self.cached.write().insert(plugin, version);
        Ok(version)
    }

    pub fn set_version(&self, plugin: &'static str, version: u16) -> Result<(), EvdbError> {
        let mut batch = MutationBatch::new();
        batch.put(
            cf::MIGRATION_INFO,
            Self::row_key(plugin),
            VERSION_COLUMN.to_vec(),
            version.to_be_bytes().to_vec(),
            None,
        );
        self.backend.execute(batch)?;
        self.cached.write().insert(plugin, Some(version));
        info!(plugin, version, "advanced format counter");
        Ok(())
    }

    /// Drops the cached counter so the next read hits the store. Needed when
    /// another process advances the counter.
    pub fn invalidate(&self, plugin: &'static str) {
        self.cached.write().remove(plugin);
    }
}

/// Resolves the plugin's current state against its target format. An absent
/// counter means the baseline (oldest) format is in effect.
pub fn resolve_state(
    info: &MigrationInfoCache,
    plugin: &'static str,
    baseline: FormatVersion,
    target: FormatVersion,
) -> Result<MigrationState, EvdbError> {
    let persisted = info.version(plugin)?.unwrap_or(baseline.as_u16());
    if persisted >= target.as_u16() {
        return Ok(MigrationState::Stable(target));
    }
    let from = FormatVersion::from_u16(persisted).ok_or_else(|| {
        EvdbError::DataCorruption(format!(
            "plugin '{plugin}' records unknown format version {persisted}"
        ))
    })?;
    Ok(MigrationState::Migrating { from, to: target })
}

fn store_for<S: ?Sized>(
    stores: &[Arc<S>],
    format: FormatVersion,
    pick: impl Fn(&S) -> FormatVersion,
) -> Result<&Arc<S>, EvdbError> {
    stores
        .iter()
        .find(|store| pick(store) == format)
        .ok_or_else(|| {
            EvdbError::Validation(format!("no store registered for format {format}"))
        })
}

/// Entity store proxy that routes by migration state.
pub struct VersionedEntityStore {
    stores: Vec<Arc<dyn EntityStorage>>,
    info: Arc<MigrationInfoCache>,
    baseline: FormatVersion,
    target: FormatVersion,
}

impl VersionedEntityStore {
    pub fn new(stores: Vec<Arc<dyn EntityStorage>>, info: Arc<MigrationInfoCache>) -> Self {
        let baseline = stores
            .iter()
            .map(|s| s.format())
            .min()
            .unwrap_or(FormatVersion::V1);
        let target = stores
            .iter()
            .map(|s| s.format())
            .max()
            .unwrap_or(FormatVersion::V1);
        Self {
            stores,
            info,
            baseline,
            target,
        }
    }

    pub fn state(&self) -> Result<MigrationState, EvdbError> {
        resolve_state(&self.info, plugin::ENTITY_DATA, self.baseline, self.target)
    }

    pub fn store_for(&self, format: FormatVersion) -> Result<&Arc<dyn EntityStorage>, EvdbError> {
        store_for(&self.stores, format, |s| s.format())
    }

    fn read_store(&self) -> Result<&Arc<dyn EntityStorage>, EvdbError> {
        self.store_for(self.state()?.read_format())
    }
}

impl EntityStorage for VersionedEntityStore {
    fn format(&self) -> FormatVersion {
        self.target
    }

    fn write(&self, scope: &Scope, entity: &MvccEntity) -> Result<MutationBatch, EvdbError> {
        match self.state()? {
            MigrationState::Stable(format) => self.store_for(format)?.write(scope, entity),
            MigrationState::Migrating { from, to } => {
                let mut batch = self.store_for(from)?.write(scope, entity)?;
                batch.merge(self.store_for(to)?.write(scope, entity)?);
                Ok(batch)
            }
        }
    }

    fn load(&self, scope: &Scope, ids: &[Id], max_version: Uuid) -> Result<EntitySet, EvdbError> {
        self.read_store()?.load(scope, ids, max_version)
    }

    fn load_descending_history(
        &self,
        scope: &Scope,
        id: &Id,
        version: Uuid,
        page_size: usize,
    ) -> EntityHistoryIter {
        match self.read_store() {
            Ok(store) => store.load_descending_history(scope, id, version, page_size),
            Err(err) => Box::new(std::iter::once(Err(err))),
        }
    }

    fn load_ascending_history(
        &self,
        scope: &Scope,
        id: &Id,
        version: Uuid,
        page_size: usize,
    ) -> EntityHistoryIter {
        match self.read_store() {
            Ok(store) => store.load_ascending_history(scope, id, version, page_size),
            Err(err) => Box::new(std::iter::once(Err(err))),
        }
    }

    fn mark(&self, scope: &Scope, id: &Id, version: &Uuid) -> Result<MutationBatch, EvdbError> {
        match self.state()? {
            MigrationState::Stable(format) => self.store_for(format)?.mark(scope, id, version),
            MigrationState::Migrating { from, to } => {
                let mut batch = self.store_for(from)?.mark(scope, id, version)?;
                batch.merge(self.store_for(to)?.mark(scope, id, version)?);
                Ok(batch)
            }
        }
    }

    fn delete(&self, scope: &Scope, id: &Id, version: &Uuid) -> Result<MutationBatch, EvdbError> {
        match self.state()? {
            MigrationState::Stable(format) => self.store_for(format)?.delete(scope, id, version),
            MigrationState::Migrating { from, to } => {
                let mut batch = self.store_for(from)?.delete(scope, id, version)?;
                batch.merge(self.store_for(to)?.delete(scope, id, version)?);
                Ok(batch)
            }
        }
    }
}

/// Log store proxy. Same routing rules as the entity proxy.
pub struct VersionedLogStore {
    stores: Vec<(FormatVersion, Arc<dyn LogStorage>)>,
    info: Arc<MigrationInfoCache>,
    baseline: FormatVersion,
    target: FormatVersion,
}

impl VersionedLogStore {
    pub fn new(
        stores: Vec<(FormatVersion, Arc<dyn LogStorage>)>,
        info: Arc<MigrationInfoCache>,
    ) -> Self {
        let baseline = stores
            .iter()
            .map(|(f, _)| *f)
            .min()
            .unwrap_or(FormatVersion::V1);
        let target = stores
            .iter()
            .map(|(f, _)| *f)
            .max()
            .unwrap_or(FormatVersion::V1);
        Self {
            stores,
            info,
            baseline,
            target,
        }
    }

    pub fn state(&self) -> Result<MigrationState, EvdbError> {
        resolve_state(&self.info, plugin::ENTITY_LOG, self.baseline, self.target)
    }

    fn store_for(&self, format: FormatVersion) -> Result<&Arc<dyn LogStorage>, EvdbError> {
        self.stores
            .iter()
            .find(|(f, _)| *f == format)
            .map(|(_, s)| s)
            .ok_or_else(|| {
                EvdbError::Validation(format!("no log store registered for format {format}"))
            })
    }

    fn read_store(&self) -> Result<&Arc<dyn LogStorage>, EvdbError> {
        self.store_for(self.state()?.read_format())
    }
}

impl LogStorage for VersionedLogStore {
    fn write(&self, scope: &Scope, entry: &MvccLogEntry) -> Result<MutationBatch, EvdbError> {
        match self.state()? {
            MigrationState::Stable(format) => self.store_for(format)?.write(scope, entry),
            MigrationState::Migrating { from, to } => {
                let mut batch = self.store_for(from)?.write(scope, entry)?;
                batch.merge(self.store_for(to)?.write(scope, entry)?);
                Ok(batch)
            }
        }
    }

    fn load(&self, scope: &Scope, ids: &[Id], max_version: Uuid) -> Result<VersionSet, EvdbError> {
        self.read_store()?.load(scope, ids, max_version)
    }

    fn load_history(
        &self,
        scope: &Scope,
        id: &Id,
        version: Uuid,
        max_size: usize,
    ) -> Result<Vec<MvccLogEntry>, EvdbError> {
        self.read_store()?.load_history(scope, id, version, max_size)
    }

    fn load_reversed(
        &self,
        scope: &Scope,
        id: &Id,
        min_version: Uuid,
        max_size: usize,
    ) -> Result<Vec<MvccLogEntry>, EvdbError> {
        self.read_store()?
            .load_reversed(scope, id, min_version, max_size)
    }

    fn history_iter(&self, scope: &Scope, id: &Id, version: Uuid) -> LogHistoryIter {
        match self.read_store() {
            Ok(store) => store.history_iter(scope, id, version),
            Err(err) => Box::new(std::iter::once(Err(err))),
        }
    }

    fn delete(&self, scope: &Scope, id: &Id, version: &Uuid) -> Result<MutationBatch, EvdbError> {
        match self.state()? {
            MigrationState::Stable(format) => self.store_for(format)?.delete(scope, id, version),
            MigrationState::Migrating { from, to } => {
                let mut batch = self.store_for(from)?.delete(scope, id, version)?;
                batch.merge(self.store_for(to)?.delete(scope, id, version)?);
                Ok(batch)
            }
        }
    }
}

/// Unique value store proxy.
pub struct VersionedUniqueStore {
    stores: Vec<Arc<dyn UniqueValueStorage>>,
    info: Arc<MigrationInfoCache>,
    baseline: FormatVersion,
    target: FormatVersion,
}

impl VersionedUniqueStore {
    pub fn new(stores: Vec<Arc<dyn UniqueValueStorage>>, info: Arc<MigrationInfoCache>) -> Self {
        let baseline = stores
            .iter()
            .map(|s| s.format())
            .min()
            .unwrap_or(FormatVersion::V1);
        let target = stores
            .iter()
            .map(|s| s.format())
            .max()
            .unwrap_or(FormatVersion::V1);
        Self {
            stores,
            info,
            baseline,
            target,
        }
    }

    pub fn state(&self) -> Result<MigrationState, EvdbError> {
        resolve_state(&self.info, plugin::UNIQUE_VALUES, self.baseline, self.target)
    }

    fn store_for(&self, format: FormatVersion) -> Result<&Arc<dyn UniqueValueStorage>, EvdbError> {
        store_for(&self.stores, format, |s| s.format())
    }

    fn read_store(&self) -> Result<&Arc<dyn UniqueValueStorage>, EvdbError> {
        self.store_for(self.state()?.read_format())
    }
}

impl UniqueValueStorage for VersionedUniqueStore {
    fn format(&self) -> FormatVersion {
        self.target
    }

    fn write(
        &self,
        scope: &Scope,
        value: &UniqueValue,
        ttl: Option<Duration>,
    ) -> Result<MutationBatch, EvdbError> {
        match self.state()? {
            MigrationState::Stable(format) => self.store_for(format)?.write(scope, value, ttl),
            MigrationState::Migrating { from, to } => {
                let mut batch = self.store_for(from)?.write(scope, value, ttl)?;
                batch.merge(self.store_for(to)?.write(scope, value, ttl)?);
                Ok(batch)
            }
        }
    }

    fn delete(&self, scope: &Scope, value: &UniqueValue) -> Result<MutationBatch, EvdbError> {
        match self.state()? {
            MigrationState::Stable(format) => self.store_for(format)?.delete(scope, value),
            MigrationState::Migrating { from, to } => {
                let mut batch = self.store_for(from)?.delete(scope, value)?;
                batch.merge(self.store_for(to)?.delete(scope, value)?);
                Ok(batch)
            }
        }
    }

    fn load(
        &self,
        scope: &Scope,
        entity_type: &str,
        fields: &[Field],
    ) -> Result<UniqueValueSet, EvdbError> {
        self.read_store()?.load(scope, entity_type, fields)
    }

    fn all_unique_fields(&self, scope: &Scope, id: &Id) -> Result<Vec<UniqueValue>, EvdbError> {
        self.read_store()?.all_unique_fields(scope, id)
    }
}
