//! The append-only entity version log.
//!
//! The log records write progress per `(entity, version)` independently of
//! the entity payload, so readers can see in-flight writes and cleanup can
//! find every version ever attempted. Transient stages are written with a
//! TTL; durable stages are not.

use crate::backend::{ColumnFamily, ColumnStore, MutationBatch, cf};
use crate::codec::row_key::{
    collection_name, collection_row_key, decode_version_desc, encode_version_desc, scoped_row_key,
};
use crate::codec::EncodedKey;
use crate::config::EvdbConfig;
use crate::error::EvdbError;
use crate::model::{Id, Scope};
use crate::mvcc::{MvccLogEntry, Stage, VersionSet};
use crate::store::iter::PagedHistoryIter;
use std::sync::Arc;
use uuid::Uuid;

pub type LogHistoryIter = Box<dyn Iterator<Item = Result<MvccLogEntry, EvdbError>> + Send>;

pub trait LogStorage: Send + Sync {
    /// Persists one stage marker. Transient stages carry the configured TTL
    /// so abandoned writes expire on their own.
    fn write(&self, scope: &Scope, entry: &MvccLogEntry) -> Result<MutationBatch, EvdbError>;

    /// For each id, the newest log entry `<= max_version`, if any.
    fn load(&self, scope: &Scope, ids: &[Id], max_version: Uuid) -> Result<VersionSet, EvdbError>;

    /// Entries `<= version`, newest first, up to `max_size`.
    fn load_history(
        &self,
        scope: &Scope,
        id: &Id,
        version: Uuid,
        max_size: usize,
    ) -> Result<Vec<MvccLogEntry>, EvdbError>;

    /// Entries `>= min_version`, oldest first, up to `max_size`.
    fn load_reversed(
        &self,
        scope: &Scope,
        id: &Id,
        min_version: Uuid,
        max_size: usize,
    ) -> Result<Vec<MvccLogEntry>, EvdbError>;

    /// Unbounded paged walk, newest first.
    fn history_iter(&self, scope: &Scope, id: &Id, version: Uuid) -> LogHistoryIter;

    fn delete(&self, scope: &Scope, id: &Id, version: &Uuid) -> Result<MutationBatch, EvdbError>;
}

/// Row key shape of the log. The original layout kept a collection component
/// in the key; the current one scopes by entity id alone.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogKeyShape {
    CollectionScoped,
    Scoped,
}

pub struct MvccLogEntryStore {
    backend: Arc<dyn ColumnStore>,
    cf: ColumnFamily,
    shape: LogKeyShape,
    config: EvdbConfig,
}

impl MvccLogEntryStore {
    pub fn new_v1(backend: Arc<dyn ColumnStore>, config: EvdbConfig) -> Self {
        Self {
            backend,
            cf: cf::ENTITY_LOG,
            shape: LogKeyShape::CollectionScoped,
            config,
        }
    }

    pub fn new_v2(backend: Arc<dyn ColumnStore>, config: EvdbConfig) -> Self {
        Self {
            backend,
            cf: cf::ENTITY_LOG_V2,
            shape: LogKeyShape::Scoped,
            config,
        }
    }

    fn row_key(&self, scope: &Scope, id: &Id) -> EncodedKey {
        match self.shape {
            LogKeyShape::CollectionScoped => {
                collection_row_key(scope, &collection_name(&id.entity_type), id)
            }
            LogKeyShape::Scoped => scoped_row_key(scope, id),
        }
    }

    fn fetch(
        &self,
        scope: &Scope,
        id: &Id,
        start: &Uuid,
        limit: usize,
        reversed: bool,
    ) -> Result<Vec<MvccLogEntry>, EvdbError> {
        let row = self.row_key(scope, id);
        let start = encode_version_desc(start);
        let columns = self
            .backend
            .get_columns(self.cf, &row, Some(&start), limit, reversed)?;
        columns
            .iter()
            .map(|column| {
                let version = decode_version_desc(&column.name)?;
                let stage = column
                    .value
                    .first()
                    .and_then(|byte| Stage::from_id(*byte))
                    .ok_or_else(|| {
                        EvdbError::DataCorruption(format!(
                            "unrecognized log stage for {id} at {version}"
                        ))
                    })?;
                Ok(MvccLogEntry::new(id.clone(), version, stage))
            })
            .collect()
    }
}

impl LogStorage for MvccLogEntryStore {
    fn write(&self, scope: &Scope, entry: &MvccLogEntry) -> Result<MutationBatch, EvdbError> {
        let ttl = entry
            .stage
            .is_transient()
            .then_some(self.config.transient_timeout);
        let mut batch = MutationBatch::new();
        batch.put(
            self.cf,
            self.row_key(scope, &entry.entity_id),
            encode_version_desc(&entry.version),
            vec![entry.stage.id()],
            ttl,
        );
        Ok(batch)
    }

    fn load(&self, scope: &Scope, ids: &[Id], max_version: Uuid) -> Result<VersionSet, EvdbError> {
        if ids.len() > self.config.max_load_size {
            return Err(EvdbError::Validation(format!(
                "bulk log load of {} ids exceeds the maximum of {}",
                ids.len(),
                self.config.max_load_size
            )));
        }
        let mut set = VersionSet::with_capacity(ids.len());
        for id in ids {
            if let Some(entry) = self.fetch(scope, id, &max_version, 1, false)?.pop() {
                set.add(entry);
            }
        }
        Ok(set)
    }

    fn load_history(
        &self,
        scope: &Scope,
        id: &Id,
        version: Uuid,
        max_size: usize,
    ) -> Result<Vec<MvccLogEntry>, EvdbError> {
        self.fetch(scope, id, &version, max_size, false)
    }

    fn load_reversed(
        &self,
        scope: &Scope,
        id: &Id,
        min_version: Uuid,
        max_size: usize,
    ) -> Result<Vec<MvccLogEntry>, EvdbError> {
        self.fetch(scope, id, &min_version, max_size, true)
    }

    fn history_iter(&self, scope: &Scope, id: &Id, version: Uuid) -> LogHistoryIter {
        let backend = Arc::clone(&self.backend);
        let cf = self.cf;
        let row = self.row_key(scope, id);
        let id = id.clone();
        let fetch = move |cursor: Uuid, limit: usize| {
            let start = encode_version_desc(&cursor);
            let columns = backend.get_columns(cf, &row, Some(&start), limit, false)?;
            columns
                .iter()
                .map(|column| {
                    let version = decode_version_desc(&column.name)?;
                    let stage = column
                        .value
                        .first()
                        .and_then(|byte| Stage::from_id(*byte))
                        .ok_or_else(|| {
                            EvdbError::DataCorruption(format!(
                                "unrecognized log stage for {id} at {version}"
                            ))
                        })?;
                    Ok(MvccLogEntry::new(id.clone(), version, stage))
                })
                .collect()
        };
        Box::new(PagedHistoryIter::new(
            version,
            self.config.history_page_size,
            false,
            fetch,
        ))
    }

    fn delete(&self, scope: &Scope, id: &Id, version: &Uuid) -> Result<MutationBatch, EvdbError> {
        let mut batch = MutationBatch::new();
        batch.delete(
            self.cf,
            self.row_key(scope, id),
            encode_version_desc(version),
        );
        Ok(batch)
    }
}

#[cfg(test)]
mod tests {
    use super::{LogStorage, MvccLogEntryStore};
    use crate::backend::memory::InMemoryColumnStore;
    use crate::backend::ColumnStore;
    use crate::config::EvdbConfig;
    use crate::model::{time_uuid, Id, Scope};
    use crate::mvcc::{MvccLogEntry, Stage};
    use std::sync::Arc;
    use std::time::Duration;
    use uuid::Uuid;

    fn setup() -> (Arc<InMemoryColumnStore>, MvccLogEntryStore) {
        let backend = Arc::new(InMemoryColumnStore::new());
        let store = MvccLogEntryStore::new_v2(backend.clone(), EvdbConfig::development());
        (backend, store)
    }

    fn scope() -> Scope {
        Scope::new(Id::new("organization"), "app")
    }

    fn append(
        backend: &InMemoryColumnStore,
        store: &MvccLogEntryStore,
        scope: &Scope,
        id: &Id,
        stage: Stage,
    ) -> Uuid {
        let entry = MvccLogEntry::new(id.clone(), time_uuid(), stage);
        backend
            .execute(store.write(scope, &entry).expect("write"))
            .expect("execute");
        std::thread::sleep(Duration::from_millis(2));
        entry.version
    }

    #[test]
    fn newest_entry_wins_a_bulk_load() {
        let (backend, store) = setup();
        let scope = scope();
        let id = Id::new("user");
        append(&backend, &store, &scope, &id, Stage::Committed);
        let newest = append(&backend, &store, &scope, &id, Stage::Committed);

        let set = store
            .load(&scope, &[id.clone()], time_uuid())
            .expect("load");
        assert_eq!(set.get(&id).expect("present").version, newest);
    }

    #[test]
    fn history_and_reversed_agree() {
        let (backend, store) = setup();
        let scope = scope();
        let id = Id::new("user");
        let versions: Vec<Uuid> = (0..4)
            .map(|_| append(&backend, &store, &scope, &id, Stage::Committed))
            .collect();

        let history = store
            .load_history(&scope, &id, versions[3], 10)
            .expect("history");
        let newest_first: Vec<Uuid> = history.iter().map(|e| e.version).collect();
        let mut expected = versions.clone();
        expected.reverse();
        assert_eq!(newest_first, expected);

        let reversed = store
            .load_reversed(&scope, &id, versions[0], 10)
            .expect("reversed");
        let oldest_first: Vec<Uuid> = reversed.iter().map(|e| e.version).collect();
        assert_eq!(oldest_first, versions);
    }

    #[test]
    fn active_entries_expire_committed_entries_persist() {
        let (backend, store) = setup();
        let scope = scope();
        let id = Id::new("user");
        append(&backend, &store, &scope, &id, Stage::Active);
        let committed = append(&backend, &store, &scope, &id, Stage::Committed);

        backend.advance_clock(Duration::from_secs(60));
        let history = store
            .load_history(&scope, &id, time_uuid(), 10)
            .expect("history");
        let versions: Vec<Uuid> = history.iter().map(|e| e.version).collect();
        assert_eq!(versions, vec![committed]);
    }

    #[test]
    fn delete_removes_a_single_entry() {
        let (backend, store) = setup();
        let scope = scope();
        let id = Id::new("user");
        let first = append(&backend, &store, &scope, &id, Stage::Committed);
        let second = append(&backend, &store, &scope, &id, Stage::Deleted);

        backend
            .execute(store.delete(&scope, &id, &second).expect("delete"))
            .expect("execute");
        let history = store
            .load_history(&scope, &id, time_uuid(), 10)
            .expect("history");
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].version, first);
    }

    #[test]
    fn paged_iterator_covers_the_full_log() {
        let (backend, store) = setup();
        let scope = scope();
        let id = Id::new("user");
        let count = 25;
        for _ in 0..count {
            append(&backend, &store, &scope, &id, Stage::Committed);
        }
        let walked = store
            .history_iter(&scope, &id, time_uuid())
            .map(|r| r.expect("entry"))
            .count();
        assert_eq!(walked, count);
    }
}
