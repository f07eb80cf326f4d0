//! Storage strategies over the wide-column substrate: entity versions, the
//! write-progress log, and unique value claims.

pub mod entity;
pub mod entity_codec;
pub mod iter;
pub mod log;
pub mod unique;

pub use entity::{EntityHistoryIter, EntityStorage, MvccEntityStore};
pub use entity_codec::{EntityCodec, FormatVersion, VersionedEntityCodec};
pub use iter::{PagedHistoryIter, Versioned};
pub use log::{LogHistoryIter, LogKeyShape, LogStorage, MvccLogEntryStore};
pub use unique::{UniqueValue, UniqueValueSet, UniqueValueStorage, UniqueValueStore};
