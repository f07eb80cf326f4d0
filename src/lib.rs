//! Versioned entity storage over a wide-column substrate.
//!
//! Entities live as immutable versions: every write appends a new version
//! column keyed by a time-ordered uuid, reads resolve the newest version at
//! or below a bound, and deletes append tombstones. Around that core sit an
//! append-only write-progress log, collection-wide unique value enforcement,
//! lazy repair of partially written versions, and online migration between
//! on-disk formats with dual-write routing.
//!
//! ```
//! use evdb::{EvdbConfig, StoreFactory};
//! use evdb::model::{time_uuid, Entity, Field, FieldValue, Id, Scope};
//! use evdb::mvcc::MvccEntity;
//! use evdb::store::EntityStorage;
//!
//! let stores = StoreFactory::in_memory(EvdbConfig::development())?;
//! let scope = Scope::new(Id::new("organization"), "my-app");
//! let id = Id::new("user");
//!
//! let entity = MvccEntity::complete(
//!     id.clone(),
//!     time_uuid(),
//!     Entity::with_fields([Field::unique("email", FieldValue::String("ann@example.com".into()))]),
//! );
//! stores.backend().execute(stores.entities.write(&scope, &entity)?)?;
//!
//! let loaded = stores.entities.load(&scope, &[id.clone()], time_uuid())?;
//! assert!(loaded.get(&id).is_some());
//! # Ok::<(), evdb::EvdbError>(())
//! ```

pub mod backend;
pub mod codec;
pub mod config;
pub mod error;
pub mod factory;
pub mod migration;
pub mod model;
pub mod mvcc;
pub mod repair;
pub mod store;

pub use config::EvdbConfig;
pub use error::{EvdbError, EvdbErrorCode};
pub use factory::{CollectionStores, StoreFactory};
pub use store::entity_codec::FormatVersion;
