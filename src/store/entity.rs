//! Entity version storage.
//!
//! One store, parameterized by an [`EntityCodec`]; the codec decides row key
//! layout, column family, and payload serialization. Writes return
//! [`MutationBatch`]es so callers can fuse entity, log, and unique-value
//! mutations into one execution.

use crate::backend::{Column, ColumnStore, MutationBatch};
use crate::codec::row_key::{decode_version_desc, encode_version_desc};
use crate::config::EvdbConfig;
use crate::error::EvdbError;
use crate::model::{Id, Scope};
use crate::mvcc::{EntitySet, MvccEntity, Status};
use crate::store::entity_codec::{EntityCodec, FormatVersion};
use crate::store::iter::PagedHistoryIter;
use std::sync::Arc;
use std::thread;
use tracing::warn;
use uuid::Uuid;

pub type EntityHistoryIter = Box<dyn Iterator<Item = Result<MvccEntity, EvdbError>> + Send>;

pub trait EntityStorage: Send + Sync {
    fn format(&self) -> FormatVersion;

    /// Persists one version. The version column is derived from the entity's
    /// version uuid; writing the same version twice is idempotent.
    fn write(&self, scope: &Scope, entity: &MvccEntity) -> Result<MutationBatch, EvdbError>;

    /// For each id, the newest version `<= max_version`, if any. Splits into
    /// parallel sub-loads when the worst-case result would overflow one
    /// transport buffer.
    fn load(&self, scope: &Scope, ids: &[Id], max_version: Uuid) -> Result<EntitySet, EvdbError>;

    /// Versions `<= version`, newest first.
    fn load_descending_history(
        &self,
        scope: &Scope,
        id: &Id,
        version: Uuid,
        page_size: usize,
    ) -> EntityHistoryIter;

    /// Versions `>= version`, oldest first.
    fn load_ascending_history(
        &self,
        scope: &Scope,
        id: &Id,
        version: Uuid,
        page_size: usize,
    ) -> EntityHistoryIter;

    /// Writes a payload-free COMPLETE marker at `version`.
    fn mark(&self, scope: &Scope, id: &Id, version: &Uuid) -> Result<MutationBatch, EvdbError>;

    /// Removes the version column entirely. Physical deletion, distinct from
    /// writing a DELETED tombstone version.
    fn delete(&self, scope: &Scope, id: &Id, version: &Uuid) -> Result<MutationBatch, EvdbError>;
}

pub struct MvccEntityStore {
    backend: Arc<dyn ColumnStore>,
    codec: Arc<dyn EntityCodec>,
    config: EvdbConfig,
}

impl MvccEntityStore {
    pub fn new(
        backend: Arc<dyn ColumnStore>,
        codec: Arc<dyn EntityCodec>,
        config: EvdbConfig,
    ) -> Self {
        Self {
            backend,
            codec,
            config,
        }
    }

    fn load_chunk(
        &self,
        scope: &Scope,
        ids: &[Id],
        max_version: &Uuid,
    ) -> Result<EntitySet, EvdbError> {
        let start = encode_version_desc(max_version);
        let mut set = EntitySet::with_capacity(ids.len());
        for id in ids {
            let row = self.codec.row_key(scope, id);
            let columns =
                self.backend
                    .get_columns(self.codec.column_family(), &row, Some(&start), 1, false)?;
            if let Some(column) = columns.into_iter().next() {
                set.add(parse_entity_column(self.codec.as_ref(), id, &column)?);
            }
        }
        Ok(set)
    }

    fn history_iter(
        &self,
        scope: &Scope,
        id: &Id,
        version: Uuid,
        page_size: usize,
        reversed: bool,
    ) -> EntityHistoryIter {
        let backend = Arc::clone(&self.backend);
        let codec = Arc::clone(&self.codec);
        let row = codec.row_key(scope, id);
        let cf = codec.column_family();
        let id = id.clone();
        let fetch = move |cursor: Uuid, limit: usize| {
            let start = encode_version_desc(&cursor);
            let columns = backend.get_columns(cf, &row, Some(&start), limit, reversed)?;
            columns
                .iter()
                .map(|column| parse_entity_column(codec.as_ref(), &id, column))
                .collect()
        };
        // The reversed scan walks toward smaller (newer-encoded) columns, so
        // tolerate short pages at the boundary.
        Box::new(PagedHistoryIter::new(version, page_size, reversed, fetch))
    }
}

/// Decodes one version column. A corrupt payload degrades to a DELETED
/// version at the same position rather than failing the surrounding read; a
/// corrupt column name cannot even yield a version, so it stays an error.
fn parse_entity_column(
    codec: &dyn EntityCodec,
    id: &Id,
    column: &Column,
) -> Result<MvccEntity, EvdbError> {
    let version = decode_version_desc(&column.name)?;
    match codec.decode(&column.value) {
        Ok((status, entity)) => Ok(MvccEntity {
            id: id.clone(),
            version,
            status,
            entity,
        }),
        Err(EvdbError::DataCorruption(reason)) => {
            warn!(entity = %id, %version, %reason, "unreadable entity payload, degrading to deleted");
            Ok(MvccEntity::deleted(id.clone(), version))
        }
        Err(err) => Err(err),
    }
}

impl EntityStorage for MvccEntityStore {
    fn format(&self) -> FormatVersion {
        self.codec.format()
    }

    fn write(&self, scope: &Scope, entity: &MvccEntity) -> Result<MutationBatch, EvdbError> {
        let value = self.codec.encode(entity.status, entity.entity.as_ref())?;
        let mut batch = MutationBatch::new();
        batch.put(
            self.codec.column_family(),
            self.codec.row_key(scope, &entity.id),
            encode_version_desc(&entity.version),
            value,
            None,
        );
        Ok(batch)
    }

    fn load(&self, scope: &Scope, ids: &[Id], max_version: Uuid) -> Result<EntitySet, EvdbError> {
        if ids.is_empty() {
            return Ok(EntitySet::default());
        }
        if ids.len() > self.config.max_load_size {
            return Err(EvdbError::Validation(format!(
                "bulk load of {} ids exceeds the maximum of {}",
                ids.len(),
                self.config.max_load_size
            )));
        }

        let worst_case = ids.len() * self.config.max_entity_size;
        let requests = worst_case.div_ceil(self.config.transport_buffer_size).max(1);
        if requests == 1 {
            return self.load_chunk(scope, ids, &max_version);
        }

        let chunk_size = ids.len().div_ceil(requests);
        thread::scope(|s| {
            let handles: Vec<_> = ids
                .chunks(chunk_size)
                .map(|chunk| s.spawn(move || self.load_chunk(scope, chunk, &max_version)))
                .collect();
            let mut merged = EntitySet::with_capacity(ids.len());
            for handle in handles {
                let set = handle.join().map_err(|_| {
                    EvdbError::Transport("bulk load worker panicked".into())
                })??;
                merged.merge(set);
            }
            Ok(merged)
        })
    }

    fn load_descending_history(
        &self,
        scope: &Scope,
        id: &Id,
        version: Uuid,
        page_size: usize,
    ) -> EntityHistoryIter {
        self.history_iter(scope, id, version, page_size, false)
    }

    fn load_ascending_history(
        &self,
        scope: &Scope,
        id: &Id,
        version: Uuid,
        page_size: usize,
    ) -> EntityHistoryIter {
        self.history_iter(scope, id, version, page_size, true)
    }

    fn mark(&self, scope: &Scope, id: &Id, version: &Uuid) -> Result<MutationBatch, EvdbError> {
        let value = self.codec.encode(Status::Complete, None)?;
        let mut batch = MutationBatch::new();
        batch.put(
            self.codec.column_family(),
            self.codec.row_key(scope, id),
            encode_version_desc(version),
            value,
            None,
        );
        Ok(batch)
    }

    fn delete(&self, scope: &Scope, id: &Id, version: &Uuid) -> Result<MutationBatch, EvdbError> {
        let mut batch = MutationBatch::new();
        batch.delete(
            self.codec.column_family(),
            self.codec.row_key(scope, id),
            encode_version_desc(version),
        );
        Ok(batch)
    }
}
