//! Lazy materialization of partial entity versions.
//!
//! A crashed writer can leave its newest version marked PARTIAL: the version
//! column is durable but the payload is a fragment. Repair reconstructs the
//! full entity by replaying the field changes between the last known-good
//! base version and the partial one, then persists the result as COMPLETE so
//! the work happens once.

use crate::backend::ColumnStore;
use crate::config::EvdbConfig;
use crate::error::EvdbError;
use crate::model::{Entity, Field, Id, Scope};
use crate::mvcc::{EntitySet, MvccEntity, Status};
use crate::store::entity::EntityStorage;
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

/// Field-level difference between two consecutive versions.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct ChangeLog {
    pub writes: Vec<Field>,
    pub deletes: Vec<String>,
}

impl ChangeLog {
    /// Everything the fragment holds, as writes. A PARTIAL fragment lists
    /// only the fields its writer managed to persist before dying, so its
    /// missing fields say nothing about deletion; deletes may only be
    /// derived from fully materialized snapshots.
    pub fn additive(fragment: &Entity) -> Self {
        ChangeLog {
            writes: fragment.fields().cloned().collect(),
            deletes: Vec::new(),
        }
    }

    /// Diff of two fully materialized field sets. A field counts as written
    /// when it is new in `newer` or carries a different value than in
    /// `older`; a field counts as deleted when it vanished from `newer`.
    pub fn between(older: &Entity, newer: &Entity) -> Self {
        let mut log = ChangeLog::default();
        for field in newer.fields() {
            match older.field(&field.name) {
                Some(previous) if previous.value == field.value => {}
                _ => log.writes.push(field.clone()),
            }
        }
        for name in older.field_names() {
            if newer.field(name).is_none() {
                log.deletes.push(name.to_string());
            }
        }
        log
    }

    /// Deletes first, then writes, so a rename within one step lands cleanly.
    pub fn apply(&self, entity: &mut Entity) {
        for name in &self.deletes {
            entity.remove(name);
        }
        for field in &self.writes {
            entity.add(field.clone());
        }
    }

    pub fn is_empty(&self) -> bool {
        self.writes.is_empty() && self.deletes.is_empty()
    }
}

pub struct EntityRepair {
    backend: Arc<dyn ColumnStore>,
    store: Arc<dyn EntityStorage>,
    buffer_size: usize,
    requires_base: bool,
}

impl EntityRepair {
    pub fn new(
        backend: Arc<dyn ColumnStore>,
        store: Arc<dyn EntityStorage>,
        config: &EvdbConfig,
    ) -> Self {
        Self {
            backend,
            store,
            buffer_size: config.repair_buffer_size,
            requires_base: config.repair_requires_base,
        }
    }

    /// Bulk load with repair: every returned entity is materialized. Partial
    /// versions that cannot be repaired are dropped from the result.
    pub fn load_repaired(
        &self,
        scope: &Scope,
        ids: &[Id],
        max_version: Uuid,
    ) -> Result<EntitySet, EvdbError> {
        let loaded = self.store.load(scope, ids, max_version)?;
        let mut out = EntitySet::with_capacity(loaded.len());
        for entity in loaded.iter() {
            match self.maybe_repair(scope, entity)? {
                Some(repaired) => out.add(repaired),
                None => {}
            }
        }
        Ok(out)
    }

    /// Returns the entity as-is when it is already materialized (including
    /// payload-free COMPLETE markers), repairs it when it is partial, and
    /// drops deleted versions entirely.
    pub fn maybe_repair(
        &self,
        scope: &Scope,
        entity: &MvccEntity,
    ) -> Result<Option<MvccEntity>, EvdbError> {
        match entity.status {
            Status::Deleted => Ok(None),
            Status::Complete => Ok(Some(entity.clone())),
            Status::Partial => self.repair(scope, entity).map(Some),
        }
    }

    fn repair(&self, scope: &Scope, target: &MvccEntity) -> Result<MvccEntity, EvdbError> {
        debug!(entity = %target.id, version = %target.version, "repairing partial version");

        // Newest-to-oldest until a COMPLETE or DELETED base, bounded by the
        // buffer so one very long partial run cannot stall a read.
        let mut chain = vec![target.clone()];
        let mut found_base = false;
        let history =
            self.store
                .load_descending_history(scope, &target.id, target.version, self.buffer_size);
        for item in history {
            let entity = item?;
            if entity.version == target.version {
                continue;
            }
            let is_base = matches!(entity.status, Status::Complete | Status::Deleted);
            chain.push(entity);
            if is_base {
                found_base = true;
                break;
            }
            if chain.len() > self.buffer_size {
                break;
            }
        }
        if !found_base && self.requires_base {
            return Err(EvdbError::RepairIncomplete(format!(
                "no complete version of {} within {} versions of {}",
                target.id, self.buffer_size, target.version
            )));
        }

        // Replay oldest-to-newest: start from the base field set and fold
        // each step's change log into the accumulator. Every step above the
        // base is a PARTIAL fragment, so it contributes its fields as writes
        // and never deletes; the base's fields survive unless a later
        // fragment overwrote them.
        chain.reverse();
        let empty = Entity::new();
        let mut accumulated = chain[0].entity.clone().unwrap_or_default();
        for pair in chain.windows(2) {
            let newer = pair[1].entity.as_ref().unwrap_or(&empty);
            let log = match pair[1].status {
                Status::Partial => ChangeLog::additive(newer),
                _ => ChangeLog::between(pair[0].entity.as_ref().unwrap_or(&empty), newer),
            };
            log.apply(&mut accumulated);
        }

        let repaired = MvccEntity::complete(target.id.clone(), target.version, accumulated);
        self.backend.execute(self.store.write(scope, &repaired)?)?;
        info!(entity = %repaired.id, version = %repaired.version, "persisted repaired version");
        Ok(repaired)
    }
}
