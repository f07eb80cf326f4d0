//! Collection-wide unique value claims.
//!
//! The row key IS the claimed value: `(scope, type, field name, normalized
//! field value)`. Concurrent claimants land in the same row and the oldest
//! claim column wins deterministically, no coordination required. A reverse
//! log row per entity lists everything the entity has ever claimed, so bulk
//! release does not need to know the field values.

use crate::backend::{cf, ColumnFamily, ColumnStore, MutationBatch};
use crate::codec::row_key::{
    decode_entity_version_column, decode_unique_log_column, encode_entity_version_column,
    encode_unique_log_column, unique_log_row_key, unique_value_row_key_v1,
    unique_value_row_key_v2,
};
use crate::codec::EncodedKey;
use crate::config::EvdbConfig;
use crate::error::EvdbError;
use crate::model::{Field, Id, Scope};
use crate::mvcc::EntityVersion;
use crate::store::entity_codec::FormatVersion;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;
use uuid::Uuid;

/// One claim: this entity version holds this field value.
#[derive(Debug, Clone, PartialEq)]
pub struct UniqueValue {
    pub field: Field,
    pub entity_id: Id,
    pub entity_version: Uuid,
}

impl UniqueValue {
    pub fn new(field: Field, entity_id: Id, entity_version: Uuid) -> Self {
        Self {
            field,
            entity_id,
            entity_version,
        }
    }
}

/// Winning claims keyed by field name.
#[derive(Debug, Default)]
pub struct UniqueValueSet {
    values: HashMap<String, UniqueValue>,
}

impl UniqueValueSet {
    pub fn add(&mut self, value: UniqueValue) {
        self.values.insert(value.field.name.clone(), value);
    }

    pub fn get(&self, field_name: &str) -> Option<&UniqueValue> {
        self.values.get(field_name)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &UniqueValue> {
        self.values.values()
    }
}

pub trait UniqueValueStorage: Send + Sync {
    fn format(&self) -> FormatVersion;

    /// Claims a value. `ttl` makes the claim tentative; pass `None` once the
    /// owning write is confirmed. The reverse log entry is always durable.
    fn write(
        &self,
        scope: &Scope,
        value: &UniqueValue,
        ttl: Option<Duration>,
    ) -> Result<MutationBatch, EvdbError>;

    /// Releases one claim and its reverse log entry.
    fn delete(&self, scope: &Scope, value: &UniqueValue) -> Result<MutationBatch, EvdbError>;

    /// Resolves the winning claim for each requested field. Fields with no
    /// live claim are absent from the result.
    fn load(
        &self,
        scope: &Scope,
        entity_type: &str,
        fields: &[Field],
    ) -> Result<UniqueValueSet, EvdbError>;

    /// Every value the entity currently holds, from the reverse log. Input
    /// for bulk release on entity deletion.
    fn all_unique_fields(&self, scope: &Scope, id: &Id) -> Result<Vec<UniqueValue>, EvdbError>;
}

/// How many claim columns one resolution scan reads. More than a handful of
/// live claims on one value only happens under pathological contention.
const CLAIM_SCAN_LIMIT: usize = 100;

const LOG_PAGE_SIZE: usize = 100;

#[derive(Debug, Clone, Copy)]
enum UniqueKeyLayout {
    V1,
    V2,
}

pub struct UniqueValueStore {
    backend: Arc<dyn ColumnStore>,
    layout: UniqueKeyLayout,
    value_cf: ColumnFamily,
    log_cf: ColumnFamily,
    read_repair: bool,
}

impl UniqueValueStore {
    pub fn new_v1(backend: Arc<dyn ColumnStore>, config: &EvdbConfig) -> Self {
        Self {
            backend,
            layout: UniqueKeyLayout::V1,
            value_cf: cf::UNIQUE_VALUES,
            log_cf: cf::ENTITY_UNIQUE_VALUES,
            read_repair: config.read_repair_enabled,
        }
    }

    pub fn new_v2(backend: Arc<dyn ColumnStore>, config: &EvdbConfig) -> Self {
        Self {
            backend,
            layout: UniqueKeyLayout::V2,
            value_cf: cf::UNIQUE_VALUES_V2,
            log_cf: cf::ENTITY_UNIQUE_VALUES_V2,
            read_repair: config.read_repair_enabled,
        }
    }

    fn value_row_key(&self, scope: &Scope, entity_type: &str, field: &Field) -> EncodedKey {
        match self.layout {
            UniqueKeyLayout::V1 => unique_value_row_key_v1(scope, entity_type, field),
            UniqueKeyLayout::V2 => unique_value_row_key_v2(scope, entity_type, field),
        }
    }

    /// First live claim wins; newer claims by other entities are losers. With
    /// read repair enabled the losers are deleted on sight.
    fn resolve_field(
        &self,
        scope: &Scope,
        entity_type: &str,
        field: &Field,
    ) -> Result<Option<UniqueValue>, EvdbError> {
        let row = self.value_row_key(scope, entity_type, field);
        let columns = self
            .backend
            .get_columns(self.value_cf, &row, None, CLAIM_SCAN_LIMIT, false)?;

        let mut winner: Option<EntityVersion> = None;
        let mut repair = MutationBatch::new();
        for column in &columns {
            let claim = decode_entity_version_column(&column.name)?;
            match &winner {
                None => winner = Some(claim),
                Some(won) if won.entity_id.uuid == claim.entity_id.uuid => {}
                Some(won) => {
                    if self.read_repair {
                        warn!(
                            field = %field.name,
                            loser = %claim.entity_id,
                            winner = %won.entity_id,
                            "deleting duplicate unique value claim"
                        );
                        repair.delete(self.value_cf, row.clone(), column.name.clone());
                    }
                }
            }
        }
        if !repair.is_empty() {
            self.backend.execute(repair)?;
        }
        Ok(winner.map(|won| UniqueValue::new(field.clone(), won.entity_id, won.version)))
    }
}

impl UniqueValueStorage for UniqueValueStore {
    fn format(&self) -> FormatVersion {
        match self.layout {
            UniqueKeyLayout::V1 => FormatVersion::V1,
            UniqueKeyLayout::V2 => FormatVersion::V2,
        }
    }

    fn write(
        &self,
        scope: &Scope,
        value: &UniqueValue,
        ttl: Option<Duration>,
    ) -> Result<MutationBatch, EvdbError> {
        let claim = EntityVersion::new(value.entity_id.clone(), value.entity_version);
        let mut batch = MutationBatch::new();
        batch.put(
            self.value_cf,
            self.value_row_key(scope, &value.entity_id.entity_type, &value.field),
            encode_entity_version_column(&claim),
            Vec::new(),
            ttl,
        );
        batch.put(
            self.log_cf,
            unique_log_row_key(scope, &value.entity_id),
            encode_unique_log_column(&value.entity_version, &value.field),
            Vec::new(),
            None,
        );
        Ok(batch)
    }

    fn delete(&self, scope: &Scope, value: &UniqueValue) -> Result<MutationBatch, EvdbError> {
        let claim = EntityVersion::new(value.entity_id.clone(), value.entity_version);
        let mut batch = MutationBatch::new();
        batch.delete(
            self.value_cf,
            self.value_row_key(scope, &value.entity_id.entity_type, &value.field),
            encode_entity_version_column(&claim),
        );
        batch.delete(
            self.log_cf,
            unique_log_row_key(scope, &value.entity_id),
            encode_unique_log_column(&value.entity_version, &value.field),
        );
        Ok(batch)
    }

    fn load(
        &self,
        scope: &Scope,
        entity_type: &str,
        fields: &[Field],
    ) -> Result<UniqueValueSet, EvdbError> {
        let mut set = UniqueValueSet::default();
        for field in fields {
            if let Some(value) = self.resolve_field(scope, entity_type, field)? {
                set.add(value);
            }
        }
        Ok(set)
    }

    fn all_unique_fields(&self, scope: &Scope, id: &Id) -> Result<Vec<UniqueValue>, EvdbError> {
        let row = unique_log_row_key(scope, id);
        let mut out = Vec::new();
        let mut cursor: Option<Vec<u8>> = None;
        loop {
            let request = if cursor.is_some() {
                LOG_PAGE_SIZE + 1
            } else {
                LOG_PAGE_SIZE
            };
            let mut columns =
                self.backend
                    .get_columns(self.log_cf, &row, cursor.as_deref(), request, false)?;
            if cursor.is_some() && columns.first().map(|c| &c.name) == cursor.as_ref() {
                columns.remove(0);
            }
            let full_page = columns.len() == LOG_PAGE_SIZE;
            cursor = columns.last().map(|c| c.name.clone());
            for column in &columns {
                let (version, field) = decode_unique_log_column(&column.name)?;
                out.push(UniqueValue::new(field, id.clone(), version));
            }
            if !full_page {
                break;
            }
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::{UniqueValue, UniqueValueStorage, UniqueValueStore};
    use crate::backend::memory::InMemoryColumnStore;
    use crate::backend::ColumnStore;
    use crate::config::EvdbConfig;
    use crate::model::{time_uuid, Field, FieldValue, Id, Scope};
    use std::sync::Arc;
    use std::time::Duration;

    fn setup(read_repair: bool) -> (Arc<InMemoryColumnStore>, UniqueValueStore) {
        let backend = Arc::new(InMemoryColumnStore::new());
        let config = EvdbConfig {
            read_repair_enabled: read_repair,
            ..EvdbConfig::development()
        };
        let store = UniqueValueStore::new_v2(backend.clone(), &config);
        (backend, store)
    }

    fn scope() -> Scope {
        Scope::new(Id::new("organization"), "app")
    }

    fn email_field(value: &str) -> Field {
        Field::unique("email", FieldValue::String(value.into()))
    }

    fn claim(
        backend: &InMemoryColumnStore,
        store: &UniqueValueStore,
        scope: &Scope,
        value: &UniqueValue,
        ttl: Option<Duration>,
    ) {
        backend
            .execute(store.write(scope, value, ttl).expect("write"))
            .expect("execute");
    }

    #[test]
    fn oldest_claim_wins_a_contended_value() {
        let (backend, store) = setup(false);
        let scope = scope();
        let field = email_field("ann@example.com");

        let first = UniqueValue::new(field.clone(), Id::new("user"), time_uuid());
        std::thread::sleep(Duration::from_millis(2));
        let second = UniqueValue::new(field.clone(), Id::new("user"), time_uuid());

        // written in reverse order; resolution must still favor the older claim
        claim(&backend, &store, &scope, &second, None);
        claim(&backend, &store, &scope, &first, None);

        let set = store.load(&scope, "user", &[field]).expect("load");
        let winner = set.get("email").expect("winner");
        assert_eq!(winner.entity_id, first.entity_id);
    }

    #[test]
    fn claims_are_case_insensitive() {
        let (backend, store) = setup(false);
        let scope = scope();
        let value = UniqueValue::new(email_field("Ann@Example.COM"), Id::new("user"), time_uuid());
        claim(&backend, &store, &scope, &value, None);

        let set = store
            .load(&scope, "user", &[email_field("ann@example.com")])
            .expect("load");
        assert_eq!(set.get("email").expect("winner").entity_id, value.entity_id);
    }

    #[test]
    fn tentative_claims_expire() {
        let (backend, store) = setup(false);
        let scope = scope();
        let field = email_field("ann@example.com");
        let value = UniqueValue::new(field.clone(), Id::new("user"), time_uuid());
        claim(&backend, &store, &scope, &value, Some(Duration::from_secs(5)));

        backend.advance_clock(Duration::from_secs(6));
        let set = store.load(&scope, "user", &[field]).expect("load");
        assert!(set.is_empty());
    }

    #[test]
    fn read_repair_deletes_losing_claims() {
        let (backend, store) = setup(true);
        let scope = scope();
        let field = email_field("ann@example.com");

        let winner = UniqueValue::new(field.clone(), Id::new("user"), time_uuid());
        std::thread::sleep(Duration::from_millis(2));
        let loser = UniqueValue::new(field.clone(), Id::new("user"), time_uuid());
        claim(&backend, &store, &scope, &winner, None);
        claim(&backend, &store, &scope, &loser, None);

        store.load(&scope, "user", &[field.clone()]).expect("load");

        // switch repair off and observe only one claim remains
        let plain = UniqueValueStore::new_v2(backend.clone(), &EvdbConfig::development());
        let set = plain.load(&scope, "user", &[field]).expect("load");
        assert_eq!(set.get("email").expect("winner").entity_id, winner.entity_id);
        let held = plain
            .all_unique_fields(&scope, &loser.entity_id)
            .expect("log");
        // the reverse log still lists the loser until its owner releases it
        assert_eq!(held.len(), 1);
    }

    #[test]
    fn delete_releases_claim_and_log_entry() {
        let (backend, store) = setup(false);
        let scope = scope();
        let field = email_field("ann@example.com");
        let value = UniqueValue::new(field.clone(), Id::new("user"), time_uuid());
        claim(&backend, &store, &scope, &value, None);

        backend
            .execute(store.delete(&scope, &value).expect("delete"))
            .expect("execute");
        assert!(store.load(&scope, "user", &[field]).expect("load").is_empty());
        assert!(store
            .all_unique_fields(&scope, &value.entity_id)
            .expect("log")
            .is_empty());
    }

    #[test]
    fn reverse_log_lists_every_held_value() {
        let (backend, store) = setup(false);
        let scope = scope();
        let id = Id::new("user");
        let version = time_uuid();
        for n in 0..3 {
            let field = Field::unique(format!("slot{n}"), FieldValue::Integer(n));
            let value = UniqueValue::new(field, id.clone(), version);
            claim(&backend, &store, &scope, &value, None);
        }
        let held = store.all_unique_fields(&scope, &id).expect("log");
        assert_eq!(held.len(), 3);
        assert!(held.iter().all(|v| v.entity_id == id));
    }
}
