//! Wires the store graph together.
//!
//! Construction is explicit: a validated config plus a backend handle yields
//! the full set of versioned stores sharing one migration info cache. No
//! globals, no registry.

use crate::backend::memory::InMemoryColumnStore;
use crate::backend::{cf, ColumnStore};
use crate::config::EvdbConfig;
use crate::error::EvdbError;
use crate::migration::pipeline::{MigrationPipeline, ScanningDataProvider};
use crate::migration::{
    MigrationInfoCache, VersionedEntityStore, VersionedLogStore, VersionedUniqueStore,
};
use crate::model::Scope;
use crate::repair::EntityRepair;
use crate::store::entity::EntityStorage;
use crate::store::entity_codec::{FormatVersion, VersionedEntityCodec};
use crate::store::log::{LogStorage, MvccLogEntryStore};
use crate::store::unique::UniqueValueStorage;
use crate::store::{MvccEntityStore, UniqueValueStore};
use std::sync::Arc;

/// The assembled store graph for one backend.
pub struct CollectionStores {
    pub entities: Arc<VersionedEntityStore>,
    pub log: Arc<VersionedLogStore>,
    pub unique: Arc<VersionedUniqueStore>,
    pub repair: Arc<EntityRepair>,
    pub migration_info: Arc<MigrationInfoCache>,
    backend: Arc<dyn ColumnStore>,
    config: EvdbConfig,
    entity_stores: Vec<Arc<dyn EntityStorage>>,
}

impl CollectionStores {
    pub fn backend(&self) -> &Arc<dyn ColumnStore> {
        &self.backend
    }

    pub fn config(&self) -> &EvdbConfig {
        &self.config
    }

    pub fn entity_store(&self, format: FormatVersion) -> Option<&Arc<dyn EntityStorage>> {
        self.entity_stores.iter().find(|s| s.format() == format)
    }

    /// Bulk pipeline copying entity data between two registered formats.
    pub fn entity_migration(
        &self,
        from: FormatVersion,
        to: FormatVersion,
    ) -> Result<MigrationPipeline, EvdbError> {
        let source = self.entity_store(from).ok_or_else(|| {
            EvdbError::Validation(format!("no store registered for format {from}"))
        })?;
        let target = self.entity_store(to).ok_or_else(|| {
            EvdbError::Validation(format!("no store registered for format {to}"))
        })?;
        Ok(MigrationPipeline::new(
            Arc::clone(&self.backend),
            Arc::clone(source),
            Arc::clone(target),
            self.unique.clone() as Arc<dyn UniqueValueStorage>,
            &self.config,
        ))
    }

    /// Provider scanning the given source format's rows for one scope.
    pub fn scan_provider(
        &self,
        from: FormatVersion,
        scope: Scope,
    ) -> ScanningDataProvider {
        let (family, collection_prefixed) = match from {
            FormatVersion::V1 => (cf::ENTITY_VERSION_DATA, true),
            FormatVersion::V2 => (cf::ENTITY_VERSION_DATA_V2, true),
            FormatVersion::V3 => (cf::ENTITY_VERSION_DATA_V3, false),
        };
        ScanningDataProvider::new(
            Arc::clone(&self.backend),
            family,
            scope,
            collection_prefixed,
        )
    }
}

#[derive(Debug, Default)]
pub struct StoreFactory;

impl StoreFactory {
    pub fn build(
        config: EvdbConfig,
        backend: Arc<dyn ColumnStore>,
    ) -> Result<CollectionStores, EvdbError> {
        config.validate()?;

        let migration_info = Arc::new(MigrationInfoCache::new(Arc::clone(&backend)));

        let entity_stores: Vec<Arc<dyn EntityStorage>> = vec![
            Arc::new(MvccEntityStore::new(
                Arc::clone(&backend),
                Arc::new(VersionedEntityCodec::v1(config.max_entity_size)),
                config.clone(),
            )),
            Arc::new(MvccEntityStore::new(
                Arc::clone(&backend),
                Arc::new(VersionedEntityCodec::v2(config.max_entity_size)),
                config.clone(),
            )),
            Arc::new(MvccEntityStore::new(
                Arc::clone(&backend),
                Arc::new(VersionedEntityCodec::v3(config.max_entity_size)),
                config.clone(),
            )),
        ];
        let entities = Arc::new(VersionedEntityStore::new(
            entity_stores.clone(),
            Arc::clone(&migration_info),
        ));

        let log_stores: Vec<(FormatVersion, Arc<dyn LogStorage>)> = vec![
            (
                FormatVersion::V1,
                Arc::new(MvccLogEntryStore::new_v1(
                    Arc::clone(&backend),
                    config.clone(),
                )),
            ),
            (
                FormatVersion::V2,
                Arc::new(MvccLogEntryStore::new_v2(
                    Arc::clone(&backend),
                    config.clone(),
                )),
            ),
        ];
        let log = Arc::new(VersionedLogStore::new(
            log_stores,
            Arc::clone(&migration_info),
        ));

        let unique_stores: Vec<Arc<dyn UniqueValueStorage>> = vec![
            Arc::new(UniqueValueStore::new_v1(Arc::clone(&backend), &config)),
            Arc::new(UniqueValueStore::new_v2(Arc::clone(&backend), &config)),
        ];
        let unique = Arc::new(VersionedUniqueStore::new(
            unique_stores,
            Arc::clone(&migration_info),
        ));

        let repair = Arc::new(EntityRepair::new(
            Arc::clone(&backend),
            entities.clone() as Arc<dyn EntityStorage>,
            &config,
        ));

        Ok(CollectionStores {
            entities,
            log,
            unique,
            repair,
            migration_info,
            backend,
            config,
            entity_stores,
        })
    }

    /// Full graph over a fresh in-memory backend, for tests and local use.
    pub fn in_memory(config: EvdbConfig) -> Result<CollectionStores, EvdbError> {
        Self::build(config, Arc::new(InMemoryColumnStore::new()))
    }
}
