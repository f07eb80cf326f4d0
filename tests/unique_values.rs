//! Unique value claims through the assembled store graph: contention,
//! tentative reservations, release, and dual-format routing.

use evdb::backend::memory::InMemoryColumnStore;
use evdb::migration::plugin;
use evdb::model::{time_uuid, Field, FieldValue, Id, Scope};
use evdb::store::{UniqueValue, UniqueValueStorage, UniqueValueStore};
use evdb::{CollectionStores, EvdbConfig, FormatVersion, StoreFactory};
use std::sync::Arc;
use std::time::Duration;

fn stable_stores() -> (Arc<InMemoryColumnStore>, CollectionStores) {
    let backend = Arc::new(InMemoryColumnStore::new());
    let stores = StoreFactory::build(EvdbConfig::development(), backend.clone()).expect("build");
    stores
        .migration_info
        .set_version(plugin::UNIQUE_VALUES, FormatVersion::V2.as_u16())
        .expect("unique counter");
    (backend, stores)
}

fn scope() -> Scope {
    Scope::new(Id::new("organization"), "integration-app")
}

fn email(value: &str) -> Field {
    Field::unique("email", FieldValue::String(value.into()))
}

fn claim(stores: &CollectionStores, scope: &Scope, value: &UniqueValue, ttl: Option<Duration>) {
    stores
        .backend()
        .execute(stores.unique.write(scope, value, ttl).expect("write"))
        .expect("execute");
}

#[test]
fn contended_claims_resolve_to_a_single_winner() {
    let (_backend, stores) = stable_stores();
    let scope = scope();
    let field = email("ann@example.com");

    let first = UniqueValue::new(field.clone(), Id::new("user"), time_uuid());
    std::thread::sleep(Duration::from_millis(2));
    let second = UniqueValue::new(field.clone(), Id::new("user"), time_uuid());

    claim(&stores, &scope, &first, None);
    claim(&stores, &scope, &second, None);

    let set = stores.unique.load(&scope, "user", &[field]).expect("load");
    assert_eq!(set.len(), 1);
    let winner = set.get("email").expect("winner");
    assert_eq!(winner.entity_id, first.entity_id);

    // resolution is stable on repeated reads
    let again = stores
        .unique
        .load(&scope, "user", &[email("ann@example.com")])
        .expect("load");
    assert_eq!(again.get("email").expect("winner").entity_id, first.entity_id);
}

#[test]
fn tentative_reservations_expire_unless_confirmed() {
    let (backend, stores) = stable_stores();
    let scope = scope();
    let field = email("ann@example.com");

    let tentative = UniqueValue::new(field.clone(), Id::new("user"), time_uuid());
    claim(&stores, &scope, &tentative, Some(Duration::from_secs(10)));

    let confirmed = UniqueValue::new(field.clone(), Id::new("user"), time_uuid());
    claim(&stores, &scope, &confirmed, None);

    backend.advance_clock(Duration::from_secs(30));
    let set = stores.unique.load(&scope, "user", &[field]).expect("load");
    assert_eq!(
        set.get("email").expect("winner").entity_id,
        confirmed.entity_id
    );
}

#[test]
fn deleting_an_entity_releases_every_claim() {
    let (_backend, stores) = stable_stores();
    let scope = scope();
    let id = Id::new("user");
    let version = time_uuid();

    for value in ["ann@example.com", "ann@corp.example"] {
        let claim_value = UniqueValue::new(email(value), id.clone(), version);
        claim(&stores, &scope, &claim_value, None);
    }

    let held = stores.unique.all_unique_fields(&scope, &id).expect("held");
    assert_eq!(held.len(), 2);

    let mut batch = evdb::backend::MutationBatch::new();
    for value in &held {
        batch.merge(stores.unique.delete(&scope, value).expect("delete"));
    }
    stores.backend().execute(batch).expect("execute");

    assert!(stores
        .unique
        .all_unique_fields(&scope, &id)
        .expect("held")
        .is_empty());
    assert!(stores
        .unique
        .load(&scope, "user", &[email("ann@example.com")])
        .expect("load")
        .is_empty());
}

#[test]
fn distinct_scopes_never_contend() {
    let (_backend, stores) = stable_stores();
    let scope_a = Scope::new(Id::new("organization"), "app-a");
    let scope_b = Scope::new(Id::new("organization"), "app-b");
    let field = email("ann@example.com");

    let in_a = UniqueValue::new(field.clone(), Id::new("user"), time_uuid());
    let in_b = UniqueValue::new(field.clone(), Id::new("user"), time_uuid());
    claim(&stores, &scope_a, &in_a, None);
    claim(&stores, &scope_b, &in_b, None);

    let set_a = stores
        .unique
        .load(&scope_a, "user", &[field.clone()])
        .expect("load");
    let set_b = stores.unique.load(&scope_b, "user", &[field]).expect("load");
    assert_eq!(set_a.get("email").expect("winner").entity_id, in_a.entity_id);
    assert_eq!(set_b.get("email").expect("winner").entity_id, in_b.entity_id);
}

#[test]
fn dual_write_mode_lands_claims_in_both_layouts() {
    // no persisted counter: the unique plugin is mid-migration (v1 -> v2)
    let backend = Arc::new(InMemoryColumnStore::new());
    let config = EvdbConfig::development();
    let stores = StoreFactory::build(config.clone(), backend.clone()).expect("build");
    let scope = scope();
    let field = email("ann@example.com");
    let value = UniqueValue::new(field.clone(), Id::new("user"), time_uuid());

    claim(&stores, &scope, &value, None);

    let v1 = UniqueValueStore::new_v1(backend.clone(), &config);
    let v2 = UniqueValueStore::new_v2(backend.clone(), &config);
    for store in [&v1 as &dyn UniqueValueStorage, &v2] {
        let set = store.load(&scope, "user", &[field.clone()]).expect("load");
        assert_eq!(
            set.get("email").expect("winner").entity_id,
            value.entity_id
        );
    }

    // the proxy itself reads from the old layout while migrating
    let set = stores.unique.load(&scope, "user", &[field]).expect("load");
    assert_eq!(set.get("email").expect("winner").entity_id, value.entity_id);
}
