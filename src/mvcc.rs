use crate::model::{Entity, Id};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// Write state of one entity version.
///
/// `Partial` means the version marker became durable before the payload
/// write completed; such versions are materialized lazily by repair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Status {
    Complete,
    Deleted,
    Partial,
}

impl Status {
    pub fn to_byte(self) -> u8 {
        match self {
            Status::Complete => 0,
            Status::Deleted => 1,
            Status::Partial => 2,
        }
    }

    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0 => Some(Status::Complete),
            1 => Some(Status::Deleted),
            2 => Some(Status::Partial),
            _ => None,
        }
    }
}

/// One immutable snapshot of an entity.
///
/// Invariants: `Deleted` carries no payload; `Complete` carries the fully
/// materialized entity; `Partial` may carry a fragment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MvccEntity {
    pub id: Id,
    pub version: Uuid,
    pub status: Status,
    pub entity: Option<Entity>,
}

impl MvccEntity {
    pub fn complete(id: Id, version: Uuid, entity: Entity) -> Self {
        Self {
            id,
            version,
            status: Status::Complete,
            entity: Some(entity),
        }
    }

    pub fn partial(id: Id, version: Uuid, entity: Entity) -> Self {
        Self {
            id,
            version,
            status: Status::Partial,
            entity: Some(entity),
        }
    }

    pub fn deleted(id: Id, version: Uuid) -> Self {
        Self {
            id,
            version,
            status: Status::Deleted,
            entity: None,
        }
    }

    /// True when this version can be handed to callers without repair.
    /// COMPLETE versions without a payload are deliberate markers (no field
    /// data retained), not broken writes.
    pub fn is_materialized(&self) -> bool {
        self.status != Status::Partial
    }
}

/// Identifies one snapshot: `(entity id, version)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EntityVersion {
    pub entity_id: Id,
    pub version: Uuid,
}

impl EntityVersion {
    pub fn new(entity_id: Id, version: Uuid) -> Self {
        Self { entity_id, version }
    }
}

/// Write-progress stage recorded in the entity version log, independent of
/// the entity payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Stage {
    /// Write started but not confirmed. Transient: persisted with a TTL so
    /// abandoned markers self-expire.
    Active,
    Committed,
    Deleted,
}

impl Stage {
    pub fn id(self) -> u8 {
        match self {
            Stage::Active => 0,
            Stage::Committed => 1,
            Stage::Deleted => 2,
        }
    }

    pub fn from_id(id: u8) -> Option<Self> {
        match id {
            0 => Some(Stage::Active),
            1 => Some(Stage::Committed),
            2 => Some(Stage::Deleted),
            _ => None,
        }
    }

    pub fn is_transient(self) -> bool {
        matches!(self, Stage::Active)
    }
}

/// One entry in the append-only per-entity version log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MvccLogEntry {
    pub entity_id: Id,
    pub version: Uuid,
    pub stage: Stage,
}

impl MvccLogEntry {
    pub fn new(entity_id: Id, version: Uuid, stage: Stage) -> Self {
        Self {
            entity_id,
            version,
            stage,
        }
    }
}

/// Result of a bulk entity load: at most one entity per requested id. Ids
/// with no matching version are simply absent.
#[derive(Debug, Default)]
pub struct EntitySet {
    entities: HashMap<Id, MvccEntity>,
}

impl EntitySet {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entities: HashMap::with_capacity(capacity),
        }
    }

    pub fn add(&mut self, entity: MvccEntity) {
        self.entities.insert(entity.id.clone(), entity);
    }

    pub fn get(&self, id: &Id) -> Option<&MvccEntity> {
        self.entities.get(id)
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &MvccEntity> {
        self.entities.values()
    }

    pub fn merge(&mut self, other: EntitySet) {
        self.entities.extend(other.entities);
    }
}

/// Result of a bulk version-log load: the newest log entry per id.
#[derive(Debug, Default)]
pub struct VersionSet {
    entries: HashMap<Id, MvccLogEntry>,
}

impl VersionSet {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: HashMap::with_capacity(capacity),
        }
    }

    pub fn add(&mut self, entry: MvccLogEntry) {
        self.entries.insert(entry.entity_id.clone(), entry);
    }

    pub fn get(&self, id: &Id) -> Option<&MvccLogEntry> {
        self.entries.get(id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::{MvccEntity, Stage, Status};
    use crate::model::{Entity, Id};
    use crate::model::time_uuid;

    #[test]
    fn status_bytes_are_stable() {
        assert_eq!(Status::Complete.to_byte(), 0);
        assert_eq!(Status::Deleted.to_byte(), 1);
        assert_eq!(Status::Partial.to_byte(), 2);
        assert_eq!(Status::from_byte(3), None);
    }

    #[test]
    fn only_active_stage_is_transient() {
        assert!(Stage::Active.is_transient());
        assert!(!Stage::Committed.is_transient());
        assert!(!Stage::Deleted.is_transient());
    }

    #[test]
    fn materialization_tracks_status() {
        let id = Id::new("user");
        let version = time_uuid();
        assert!(MvccEntity::complete(id.clone(), version, Entity::new()).is_materialized());
        assert!(MvccEntity::deleted(id.clone(), version).is_materialized());
        assert!(!MvccEntity::partial(id.clone(), version, Entity::new()).is_materialized());

        // payload-free COMPLETE markers are materialized, never repaired
        let marker = MvccEntity {
            id,
            version,
            status: Status::Complete,
            entity: None,
        };
        assert!(marker.is_materialized());
    }
}
