//! End-to-end entity write and read paths through the assembled store graph.

use evdb::backend::memory::InMemoryColumnStore;
use evdb::migration::plugin;
use evdb::model::{time_uuid, Entity, Field, FieldValue, Id, Scope};
use evdb::mvcc::{MvccEntity, MvccLogEntry, Stage, Status};
use evdb::store::{EntityStorage, LogStorage};
use evdb::{CollectionStores, EvdbConfig, FormatVersion, StoreFactory};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

fn stable_stores(config: EvdbConfig) -> (Arc<InMemoryColumnStore>, CollectionStores) {
    let backend = Arc::new(InMemoryColumnStore::new());
    let stores = StoreFactory::build(config, backend.clone()).expect("build");
    stores
        .migration_info
        .set_version(plugin::ENTITY_DATA, FormatVersion::V3.as_u16())
        .expect("entity counter");
    stores
        .migration_info
        .set_version(plugin::ENTITY_LOG, FormatVersion::V2.as_u16())
        .expect("log counter");
    stores
        .migration_info
        .set_version(plugin::UNIQUE_VALUES, FormatVersion::V2.as_u16())
        .expect("unique counter");
    (backend, stores)
}

fn scope() -> Scope {
    Scope::new(Id::new("organization"), "integration-app")
}

fn named_entity(name: &str) -> Entity {
    Entity::with_fields([Field::new("name", FieldValue::String(name.into()))])
}

/// The normal write protocol: an ACTIVE log marker, then the entity payload
/// and the COMMITTED marker fused into one batch.
fn committed_write(
    stores: &CollectionStores,
    scope: &Scope,
    entity: &MvccEntity,
) {
    let active = MvccLogEntry::new(entity.id.clone(), entity.version, Stage::Active);
    stores
        .backend()
        .execute(stores.log.write(scope, &active).expect("active"))
        .expect("execute active");

    let mut batch = stores.entities.write(scope, entity).expect("entity write");
    let committed = MvccLogEntry::new(entity.id.clone(), entity.version, Stage::Committed);
    batch.merge(stores.log.write(scope, &committed).expect("committed"));
    stores.backend().execute(batch).expect("execute commit");
}

#[test]
fn write_then_load_returns_the_entity() {
    let (_backend, stores) = stable_stores(EvdbConfig::development());
    let scope = scope();
    let id = Id::new("user");
    let entity = MvccEntity::complete(id.clone(), time_uuid(), named_entity("ann"));

    committed_write(&stores, &scope, &entity);

    let set = stores
        .entities
        .load(&scope, &[id.clone()], time_uuid())
        .expect("load");
    assert_eq!(set.get(&id), Some(&entity));

    let log = stores
        .log
        .load(&scope, &[id.clone()], time_uuid())
        .expect("log load");
    assert_eq!(log.get(&id).map(|e| e.stage), Some(Stage::Committed));
}

#[test]
fn reads_are_bounded_by_max_version() {
    let (_backend, stores) = stable_stores(EvdbConfig::development());
    let scope = scope();
    let id = Id::new("user");

    let mut versions = Vec::new();
    for name in ["one", "two", "three"] {
        let entity = MvccEntity::complete(id.clone(), time_uuid(), named_entity(name));
        versions.push(entity.version);
        committed_write(&stores, &scope, &entity);
        std::thread::sleep(Duration::from_millis(2));
    }

    let set = stores
        .entities
        .load(&scope, &[id.clone()], versions[0])
        .expect("load");
    assert_eq!(set.get(&id).expect("present").version, versions[0]);
}

#[test]
fn tombstones_hide_entities_from_repaired_reads() {
    let (_backend, stores) = stable_stores(EvdbConfig::development());
    let scope = scope();
    let id = Id::new("user");

    let entity = MvccEntity::complete(id.clone(), time_uuid(), named_entity("ann"));
    committed_write(&stores, &scope, &entity);
    std::thread::sleep(Duration::from_millis(2));

    let tombstone = MvccEntity::deleted(id.clone(), time_uuid());
    committed_write(&stores, &scope, &tombstone);

    let raw = stores
        .entities
        .load(&scope, &[id.clone()], time_uuid())
        .expect("load");
    assert_eq!(raw.get(&id).expect("present").status, Status::Deleted);

    let repaired = stores
        .repair
        .load_repaired(&scope, &[id.clone()], time_uuid())
        .expect("repaired load");
    assert!(repaired.get(&id).is_none());

    // older reads still see the live version
    let old = stores
        .repair
        .load_repaired(&scope, &[id.clone()], entity.version)
        .expect("repaired load");
    assert_eq!(old.get(&id), Some(&entity));
}

#[test]
fn history_pages_cover_every_version_exactly_once() {
    let config = EvdbConfig {
        history_page_size: 2,
        ..EvdbConfig::development()
    };
    let (_backend, stores) = stable_stores(config);
    let scope = scope();
    let id = Id::new("user");

    let mut versions = Vec::new();
    for n in 0..5 {
        let entity = MvccEntity::complete(
            id.clone(),
            time_uuid(),
            Entity::with_fields([Field::new("n", FieldValue::Integer(n))]),
        );
        versions.push(entity.version);
        committed_write(&stores, &scope, &entity);
        std::thread::sleep(Duration::from_millis(2));
    }

    let walked: Vec<Uuid> = stores
        .entities
        .load_descending_history(&scope, &id, versions[4], 2)
        .map(|r| r.expect("entry").version)
        .collect();
    let mut expected = versions.clone();
    expected.reverse();
    assert_eq!(walked, expected);
}

#[test]
fn abandoned_active_markers_expire() {
    let backend = Arc::new(InMemoryColumnStore::new());
    let stores = StoreFactory::build(EvdbConfig::development(), backend.clone()).expect("build");
    stores
        .migration_info
        .set_version(plugin::ENTITY_LOG, FormatVersion::V2.as_u16())
        .expect("log counter");
    let scope = scope();
    let id = Id::new("user");

    let active = MvccLogEntry::new(id.clone(), time_uuid(), Stage::Active);
    stores
        .backend()
        .execute(stores.log.write(&scope, &active).expect("write"))
        .expect("execute");

    backend.advance_clock(Duration::from_secs(60));
    let set = stores
        .log
        .load(&scope, &[id.clone()], time_uuid())
        .expect("load");
    assert!(set.get(&id).is_none());
}

#[test]
fn identical_versions_write_idempotently() {
    let (_backend, stores) = stable_stores(EvdbConfig::development());
    let scope = scope();
    let id = Id::new("user");
    let entity = MvccEntity::complete(id.clone(), time_uuid(), named_entity("ann"));

    committed_write(&stores, &scope, &entity);
    committed_write(&stores, &scope, &entity);

    let history: Vec<MvccEntity> = stores
        .entities
        .load_descending_history(&scope, &id, entity.version, 10)
        .map(|r| r.expect("entry"))
        .collect();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0], entity);
}
